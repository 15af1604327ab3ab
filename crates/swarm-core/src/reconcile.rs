use crate::AggregateSnapshot;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Outcome of feeding one snapshot to the [`Reconciler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// The snapshot replaced the current view state.
    Updated,
    /// The snapshot replaced the current view state and the batch became done
    /// for the first time. Fires at most once per batch.
    Done,
    /// The snapshot carried a sequence number at or below one already applied
    /// and was dropped.
    Stale,
}

/// Owns the authoritative view state for the current batch.
///
/// Each snapshot replaces the previous one wholesale; nothing is merged. The
/// done signal is latched so repeated or reordered snapshots cannot re-fire
/// it until [`Reconciler::clear`] starts a new batch.
pub struct Reconciler {
    current: Arc<AggregateSnapshot>,
    signalled: bool,
    last_seq: Option<u64>,
    notify: watch::Sender<Arc<AggregateSnapshot>>,
}

impl Reconciler {
    pub fn new() -> Self {
        let current = Arc::new(AggregateSnapshot::empty());
        let (notify, _) = watch::channel(current.clone());
        Self {
            current,
            signalled: false,
            last_seq: None,
            notify,
        }
    }

    pub fn reconcile(&mut self, snapshot: AggregateSnapshot) -> Reconciled {
        if let (Some(seq), Some(last_seq)) = (snapshot.seq, self.last_seq) {
            if seq <= last_seq {
                debug!(event = "snapshot_stale", seq, last_seq);
                return Reconciled::Stale;
            }
        }
        if snapshot.seq.is_some() {
            self.last_seq = snapshot.seq;
        }
        if self.current.total > 0 && snapshot.total != self.current.total {
            warn!(
                event = "snapshot_total_changed",
                previous = self.current.total,
                next = snapshot.total
            );
        }

        let done = snapshot.is_done();
        self.replace(Arc::new(snapshot));

        if done && !self.signalled {
            self.signalled = true;
            info!(
                event = "batch_done",
                total = self.current.total,
                completed = self.current.completed,
                failed = self.current.failed
            );
            return Reconciled::Done;
        }
        Reconciled::Updated
    }

    /// Drops all view state ahead of a new batch and re-arms the done signal.
    pub fn clear(&mut self) {
        self.signalled = false;
        self.last_seq = None;
        self.replace(Arc::new(AggregateSnapshot::empty()));
    }

    pub fn current(&self) -> Arc<AggregateSnapshot> {
        self.current.clone()
    }

    pub fn snapshot(&self) -> &AggregateSnapshot {
        &self.current
    }

    pub fn is_signalled(&self) -> bool {
        self.signalled
    }

    /// Receives the latest view state after every replacement or clear.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AggregateSnapshot>> {
        self.notify.subscribe()
    }

    fn replace(&mut self, next: Arc<AggregateSnapshot>) {
        self.current = next.clone();
        self.notify.send_replace(next);
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}
