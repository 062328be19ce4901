//! Startup rendezvous for capture workers.
//!
//! The kernel fills the fanout hash table one socket at a time as workers
//! join the group. Packets hashed before the last socket joins are spread
//! over a smaller worker set and would look like routing violations, so no
//! worker reads until every worker has joined.

use std::sync::{Arc, Barrier};

use tracing::{debug, info};

use crate::models::WorkerId;

#[derive(Debug, Clone)]
pub struct StartupBarrier {
    inner: Arc<Barrier>,
    parties: usize,
}

impl StartupBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            inner: Arc::new(Barrier::new(parties)),
            parties,
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Record that `worker` has joined the fanout group and block until all
    /// parties have done the same.
    pub fn arrive(&self, worker: WorkerId) {
        debug!(worker, "joined fanout group, waiting for peers");
        if self.inner.wait().is_leader() {
            info!(workers = self.parties, "All workers joined the fanout group");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_nobody_passes_before_all_arrive() {
        let parties = 6;
        let barrier = StartupBarrier::new(parties);
        let arrived = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (1..=parties as WorkerId)
            .map(|id| {
                let barrier = barrier.clone();
                let arrived = arrived.clone();
                thread::spawn(move || {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    barrier.arrive(id);
                    arrived.load(Ordering::SeqCst)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), parties);
        }
    }

    #[test]
    fn test_single_party_does_not_block() {
        let barrier = StartupBarrier::new(1);
        barrier.arrive(1);
        assert_eq!(barrier.parties(), 1);
    }
}
