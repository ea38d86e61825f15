//! SnapshotStore — the single place the current snapshot lives.
//!
//! Holds the current and the immediately-previous published snapshot
//! behind `ArcSwapOption`s. A publish is one pointer swap, so a reader
//! either sees the old snapshot or the new one in full. A watch channel
//! doubles as the readiness gate that opens on the first publish.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{MonitorError, MonitorResult};
use crate::types::GlobalSnapshot;

/// A snapshot together with its pre-rendered views.
///
/// Rendering happens once at publish time so readers only copy bytes.
#[derive(Debug)]
pub struct PublishedSnapshot {
    pub snapshot: GlobalSnapshot,
    /// Body of `/api/v1/state`.
    pub state_json: String,
    /// Body of `/metrics`.
    pub prometheus: String,
}

impl PublishedSnapshot {
    pub fn generation(&self) -> u64 {
        self.snapshot.generation
    }
}

struct Inner {
    current: ArcSwapOption<PublishedSnapshot>,
    previous: ArcSwapOption<PublishedSnapshot>,
    ready: watch::Sender<bool>,
}

/// Cheaply cloneable handle shared by the updater and the HTTP layer.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<Inner>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                current: ArcSwapOption::empty(),
                previous: ArcSwapOption::empty(),
                ready,
            }),
        }
    }

    /// The snapshot readers should serve, if one was ever published.
    pub fn current(&self) -> Option<Arc<PublishedSnapshot>> {
        self.inner.current.load_full()
    }

    /// The snapshot that was current before the last publish.
    pub fn previous(&self) -> Option<Arc<PublishedSnapshot>> {
        self.inner.previous.load_full()
    }

    /// Generation of the current snapshot, 0 before the first publish.
    pub fn generation(&self) -> u64 {
        self.inner
            .current
            .load_full()
            .map(|p| p.generation())
            .unwrap_or(0)
    }

    /// Replace the current snapshot.
    ///
    /// Generations must strictly increase. Only the updater publishes, so
    /// the check-then-swap below has a single writer.
    pub fn publish(&self, published: PublishedSnapshot) -> MonitorResult<Arc<PublishedSnapshot>> {
        let current = self.generation();
        let attempted = published.generation();
        if self.is_ready() && attempted <= current {
            return Err(MonitorError::StaleGeneration { current, attempted });
        }

        let published = Arc::new(published);
        let old = self.inner.current.swap(Some(Arc::clone(&published)));
        self.inner.previous.store(old);
        debug!(generation = attempted, "snapshot published");

        self.inner.ready.send_if_modified(|ready| {
            let opened = !*ready;
            *ready = true;
            opened
        });
        Ok(published)
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Wait until the first snapshot is published.
    pub async fn wait_ready(&self) {
        let mut rx = self.inner.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Readiness as a watch receiver, for callers that `select!` on it.
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.inner.ready.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn published(generation: u64) -> PublishedSnapshot {
        PublishedSnapshot {
            snapshot: GlobalSnapshot {
                generation,
                created_at: 1000.0,
                update_duration_secs: 0.5,
                update_period_secs: 60.0,
                bootstrap_states: Vec::new(),
                models: Vec::new(),
                top_contributors: Vec::new(),
            },
            state_json: format!("{{\"generation\":{generation}}}"),
            prometheus: String::new(),
        }
    }

    #[test]
    fn empty_store_is_not_ready() {
        let store = SnapshotStore::new();
        assert!(!store.is_ready());
        assert!(store.current().is_none());
        assert!(store.previous().is_none());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn publish_rotates_current_into_previous() {
        let store = SnapshotStore::new();
        store.publish(published(1)).unwrap();
        store.publish(published(2)).unwrap();

        assert_eq!(store.current().unwrap().generation(), 2);
        assert_eq!(store.previous().unwrap().generation(), 1);

        store.publish(published(3)).unwrap();
        assert_eq!(store.previous().unwrap().generation(), 2);
    }

    #[test]
    fn publish_rejects_non_increasing_generation() {
        let store = SnapshotStore::new();
        store.publish(published(5)).unwrap();

        let err = store.publish(published(5)).unwrap_err();
        assert!(matches!(
            err,
            MonitorError::StaleGeneration {
                current: 5,
                attempted: 5
            }
        ));
        assert!(store.publish(published(4)).is_err());
        assert_eq!(store.current().unwrap().generation(), 5);
    }

    #[test]
    fn readers_keep_their_snapshot_across_publish() {
        let store = SnapshotStore::new();
        store.publish(published(1)).unwrap();

        let held = store.current().unwrap();
        store.publish(published(2)).unwrap();

        assert_eq!(held.generation(), 1);
        assert_eq!(held.state_json, "{\"generation\":1}");
        assert_eq!(store.current().unwrap().generation(), 2);
    }

    #[tokio::test]
    async fn wait_ready_resolves_after_first_publish() {
        let store = SnapshotStore::new();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.wait_ready().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        store.publish(published(1)).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("readiness should fire")
            .unwrap();
        assert!(store.is_ready());
    }

    #[tokio::test]
    async fn concurrent_readers_see_whole_generations() {
        let store = SnapshotStore::new();
        store.publish(published(1)).unwrap();

        let mut readers = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            readers.push(tokio::spawn(async move {
                let mut last = 0;
                for _ in 0..500 {
                    let snap = store.current().unwrap();
                    // The rendered body always belongs to the same generation.
                    assert_eq!(
                        snap.state_json,
                        format!("{{\"generation\":{}}}", snap.generation())
                    );
                    assert!(snap.generation() >= last);
                    last = snap.generation();
                    tokio::task::yield_now().await;
                }
            }));
        }

        for generation in 2..200 {
            store.publish(published(generation)).unwrap();
            tokio::task::yield_now().await;
        }

        for reader in readers {
            reader.await.unwrap();
        }
    }
}
