//! JSON-file activity trail.
//!
//! The file holds a single JSON array, newest event first, capped at
//! `max_entries`. Writes go to a sibling temp file and are renamed over the
//! original, so a crash never leaves a half-written array behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use ticketgate_core::{ActivityError, ActivityEvent, ActivityFuture, ActivityRecorder};
use tokio::sync::Mutex;

/// [`ActivityRecorder`] backed by a JSON file.
#[derive(Debug)]
pub struct JsonFileActivityRecorder {
    path: PathBuf,
    max_entries: usize,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileActivityRecorder {
    /// Create a recorder for `path`, keeping at most `max_entries` events.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            path: path.into(),
            max_entries: max_entries.max(1),
            lock: Mutex::new(()),
        }
    }

    /// File backing this recorder.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_recent(&self, limit: usize) -> Result<Vec<ActivityEvent>, ActivityError> {
        let _guard = self.lock.lock().await;
        let mut events = self.load().await?;
        events.truncate(limit);
        Ok(events)
    }

    async fn load(&self) -> Result<Vec<ActivityEvent>, ActivityError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| {
                    ActivityError::Serialization(format!("{}: {e}", self.path.display()))
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ActivityError::Sink(format!("{}: {e}", self.path.display()))),
        }
    }

    async fn append(&self, event: ActivityEvent) -> Result<(), ActivityError> {
        let _guard = self.lock.lock().await;
        let mut events = self.load().await?;
        events.insert(0, event);
        events.truncate(self.max_entries);

        let bytes = serde_json::to_vec_pretty(&events)
            .map_err(|e| ActivityError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| ActivityError::Sink(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ActivityError::Sink(format!("{}: {e}", self.path.display())))
    }
}

impl ActivityRecorder for JsonFileActivityRecorder {
    fn record(&self, event: ActivityEvent) -> ActivityFuture<'_, ()> {
        Box::pin(self.append(event))
    }

    fn recent(&self, limit: usize) -> ActivityFuture<'_, Vec<ActivityEvent>> {
        Box::pin(self.read_recent(limit))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use ticketgate_core::{ActivityAction, Actor, TicketId};
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("ticketgate-activity-{}.json", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_newest_first_and_capped() {
        let path = temp_path();
        let recorder = JsonFileActivityRecorder::new(&path, 2);
        let start = Utc::now();

        for (i, email) in ["a@x.com", "b@x.com", "c@x.com"].iter().enumerate() {
            let at = start + Duration::seconds(i64::try_from(i).unwrap());
            let event = ActivityEvent::new(
                at,
                ActivityAction::PaymentConfirmed,
                *email,
                Actor::System,
                Some(TicketId::new()),
            );
            recorder.record(event).await.unwrap();
        }

        let recent = recorder.recent(10).await.unwrap();
        let subjects: Vec<&str> = recent.iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["c@x.com", "b@x.com"]);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let recorder = JsonFileActivityRecorder::new(temp_path(), 500);
        assert!(recorder.recent(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let path = temp_path();
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let recorder = JsonFileActivityRecorder::new(&path, 500);
        assert!(matches!(recorder.recent(5).await, Err(ActivityError::Serialization(_))));
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
