//! Debounced multi-part upload collector: one cancellable timer task per
//! (user, group) in flight, flushing a completed submission to a channel
//! once the debounce window elapses with no new part.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::models::{MediaKind, UserId};

#[derive(Debug, Clone)]
pub struct MediaPart {
    pub kind: MediaKind,
    pub file_handle: String,
}

#[derive(Debug, Clone, Default)]
pub struct CollectedSubmission {
    pub parts: Vec<MediaPart>,
    pub caption: Option<String>,
}

struct GroupState {
    parts: Vec<MediaPart>,
    caption: Option<String>,
    timer: JoinHandle<()>,
}

type GroupKey = (UserId, String);

/// Flushes a completed submission to whatever awaiting flow registered
/// for it (drop submission, admin bulk upload, ...).
pub type FlushSink = mpsc::UnboundedSender<(UserId, CollectedSubmission)>;

pub struct MediaGroupCollector {
    debounce: Duration,
    groups: Arc<Mutex<HashMap<GroupKey, GroupState>>>,
    sink: FlushSink,
}

impl MediaGroupCollector {
    pub fn new(debounce: Duration, sink: FlushSink) -> Self {
        Self {
            debounce,
            groups: Arc::new(Mutex::new(HashMap::new())),
            sink,
        }
    }

    /// Handles one incoming part of a media group: appends it
    /// (deduplicated by file handle), updates the caption if this part
    /// carries one, and reschedules the flush timer for `debounce` from
    /// now.
    pub async fn on_part(&self, user_id: UserId, group_id: String, part: MediaPart, caption: Option<String>) {
        let key = (user_id, group_id.clone());
        let mut groups = self.groups.lock().await;

        let state = groups.entry(key.clone()).or_insert_with(|| GroupState {
            parts: Vec::new(),
            caption: None,
            timer: tokio::spawn(async {}),
        });

        if !state.parts.iter().any(|p| p.file_handle == part.file_handle) {
            state.parts.push(part);
        }
        if caption.is_some() {
            state.caption = caption;
        }

        state.timer.abort();
        let groups_handle = self.groups.clone();
        let sink = self.sink.clone();
        let debounce = self.debounce;
        let key_for_timer = key.clone();
        state.timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            Self::flush(groups_handle, sink, key_for_timer).await;
        });
    }

    async fn flush(
        groups: Arc<Mutex<HashMap<GroupKey, GroupState>>>,
        sink: FlushSink,
        key: GroupKey,
    ) {
        let mut groups = groups.lock().await;
        if let Some(state) = groups.remove(&key) {
            let submission = CollectedSubmission {
                parts: state.parts,
                caption: state.caption,
            };
            let _ = sink.send((key.0, submission));
        }
    }

    /// Cancels an in-flight group without flushing it, used when the
    /// enclosing flow is aborted by the user.
    pub async fn cancel(&self, user_id: UserId, group_id: &str) {
        let key = (user_id, group_id.to_string());
        let mut groups = self.groups.lock().await;
        if let Some(state) = groups.remove(&key) {
            state.timer.abort();
        }
    }

    /// Emergency path for when the timer infrastructure is unavailable:
    /// flush the group immediately on the current part rather than
    /// waiting, accepting possible under-collection.
    pub async fn flush_immediately(&self, user_id: UserId, group_id: &str) {
        let key = (user_id, group_id.to_string());
        tracing::warn!(user_id, group_id, "flushing media group immediately: timer unavailable");
        Self::flush(self.groups.clone(), self.sink.clone(), key).await;
    }

    pub async fn is_collecting(&self, user_id: UserId, group_id: &str) -> bool {
        let key = (user_id, group_id.to_string());
        self.groups.lock().await.contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flushes_all_parts_in_arrival_order_after_quiet_period() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let collector = MediaGroupCollector::new(Duration::from_millis(50), tx);

        collector
            .on_part(1, "g1".into(), MediaPart { kind: MediaKind::Photo, file_handle: "a".into() }, None)
            .await;
        collector
            .on_part(1, "g1".into(), MediaPart { kind: MediaKind::Photo, file_handle: "b".into() }, Some("Hello".into()))
            .await;
        collector
            .on_part(1, "g1".into(), MediaPart { kind: MediaKind::Photo, file_handle: "c".into() }, None)
            .await;

        let (user_id, submission) = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(user_id, 1);
        assert_eq!(submission.parts.len(), 3);
        assert_eq!(submission.parts[0].file_handle, "a");
        assert_eq!(submission.parts[2].file_handle, "c");
        assert_eq!(submission.caption.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn deduplicates_by_file_handle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let collector = MediaGroupCollector::new(Duration::from_millis(30), tx);

        collector
            .on_part(1, "g1".into(), MediaPart { kind: MediaKind::Photo, file_handle: "a".into() }, None)
            .await;
        collector
            .on_part(1, "g1".into(), MediaPart { kind: MediaKind::Photo, file_handle: "a".into() }, None)
            .await;

        let (_, submission) = tokio::time::timeout(Duration::from_millis(300), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.parts.len(), 1);
    }

    #[tokio::test]
    async fn new_part_reschedules_the_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let collector = MediaGroupCollector::new(Duration::from_millis(100), tx);

        collector
            .on_part(1, "g1".into(), MediaPart { kind: MediaKind::Photo, file_handle: "a".into() }, None)
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        collector
            .on_part(1, "g1".into(), MediaPart { kind: MediaKind::Photo, file_handle: "b".into() }, None)
            .await;

        // Had the first timer not been cancelled, this would already have
        // flushed with only one part by now.
        assert!(collector.is_collecting(1, "g1").await);

        let (_, submission) = tokio::time::timeout(Duration::from_millis(300), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submission.parts.len(), 2);
    }
}
