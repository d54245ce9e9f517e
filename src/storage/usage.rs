//! Byte accounting shared by a storage and its blobs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks how many bytes the live blobs of a storage hold.
///
/// Blobs take a [`UsageGuard`] when created and release it when closed, so
/// `current` always equals the sum of the sizes of the open blobs. The peak
/// only ever grows. Both counters are atomic: a blob may be closed from a
/// compression worker while the owning thread creates new ones.
#[derive(Debug, Default)]
pub struct UsageTracker {
    current: AtomicU64,
    peak: AtomicU64,
}

impl UsageTracker {
    /// Creates a tracker at zero.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bytes currently held.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest value `current` has reached.
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::SeqCst)
    }

    /// Accounts `bytes`; the returned guard gives them back when dropped.
    pub fn reserve(self: &Arc<Self>, bytes: u64) -> UsageGuard {
        let now = self.current.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.peak.fetch_max(now, Ordering::SeqCst);
        UsageGuard {
            tracker: Arc::clone(self),
            bytes,
        }
    }

    fn release(&self, bytes: u64) {
        self.current.fetch_sub(bytes, Ordering::SeqCst);
    }
}

/// RAII guard for bytes accounted in a [`UsageTracker`].
#[derive(Debug)]
pub struct UsageGuard {
    tracker: Arc<UsageTracker>,
    bytes: u64,
}

impl UsageGuard {
    /// Number of bytes held by this guard.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.tracker.release(self.bytes);
        }
    }
}
