//! Concurrency measurement.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Tracks how many callers are inside a section at once.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
    entries: AtomicUsize,
}

impl ConcurrencyProbe {
    /// Creates a new probe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks entry into the section; leaving happens when the guard drops.
    #[must_use]
    pub fn enter(&self) -> ProbeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entries.fetch_add(1, Ordering::SeqCst);
        ProbeGuard { probe: self }
    }

    /// Callers inside right now.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest simultaneous count observed.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total entries so far.
    #[must_use]
    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }
}

/// Leaves the probed section on drop.
#[derive(Debug)]
pub struct ProbeGuard<'a> {
    probe: &'a ConcurrencyProbe,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.probe.current.fetch_sub(1, Ordering::SeqCst);
    }
}
