//! Atomic snapshot publication.
//!
//! [`StatusBroadcaster`] is the producer half and is deliberately not
//! `Clone`: the cycle controller owns the only one.  Each publish swaps in a
//! whole `Arc<Snapshot>`, so a reader holds either the previous snapshot or
//! the new one and never a mix.
//!
//! [`SnapshotReader`] is the consumer half.  It is cheap to clone and can be
//! used from plain threads (`latest`) or async tasks (`changed`).
//!
//! ```
//! use lockstep_middleware::StatusBroadcaster;
//! use lockstep_types::Snapshot;
//!
//! let broadcaster = StatusBroadcaster::new();
//! let reader = broadcaster.reader();
//! assert!(!reader.latest().running);
//!
//! let mut snapshot = Snapshot::not_started();
//! snapshot.running = true;
//! broadcaster.publish(snapshot);
//! assert!(reader.latest().running);
//! ```

use std::sync::Arc;

use lockstep_types::Snapshot;
use tokio::sync::watch;
use tracing::trace;

/// Producer half.  Starts out holding [`Snapshot::not_started`].
#[derive(Debug)]
pub struct StatusBroadcaster {
    sender: watch::Sender<Arc<Snapshot>>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Arc::new(Snapshot::not_started()));
        Self { sender }
    }

    /// Replace the current snapshot.  Succeeds with or without readers.
    pub fn publish(&self, snapshot: Snapshot) {
        trace!(
            cycle = snapshot.cycle_count(),
            readers = self.sender.receiver_count(),
            "publishing snapshot"
        );
        self.sender.send_replace(Arc::new(snapshot));
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.sender.borrow().clone()
    }

    /// New consumer handle.  The current snapshot counts as already seen.
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Consumer half.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    receiver: watch::Receiver<Arc<Snapshot>>,
}

impl SnapshotReader {
    /// The most recent snapshot.  Never blocks on the writer.
    pub fn latest(&self) -> Arc<Snapshot> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next publish and return it.  `None` once the
    /// broadcaster has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<Snapshot>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}
