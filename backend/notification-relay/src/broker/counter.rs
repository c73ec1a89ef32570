use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::metrics;

/// Process-wide count of live streaming connections
///
/// Only [`ConnectionCounter::acquire`] can raise the count, and the returned
/// permit lowers it again when dropped, so increments and decrements are
/// always paired.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCounter {
    live: Arc<AtomicUsize>,
}

impl ConnectionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> ConnectionPermit {
        self.live.fetch_add(1, Ordering::AcqRel);
        metrics::connection_opened();
        ConnectionPermit {
            live: Arc::clone(&self.live),
        }
    }

    pub fn current(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// Held for the lifetime of one connection.
#[derive(Debug)]
pub struct ConnectionPermit {
    live: Arc<AtomicUsize>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        metrics::connection_closed();
    }
}
