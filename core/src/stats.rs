use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Snapshot of pipeline activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnricherStats {
    pub scans: u64,
    pub cache_hits: u64,
    pub lookups: u64,
    pub flags_rendered: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    scans: AtomicU64,
    cache_hits: AtomicU64,
    lookups: AtomicU64,
    flags_rendered: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    pub(crate) fn scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn flag_rendered(&self) {
        self.flags_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EnricherStats {
        EnricherStats {
            scans: self.scans.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            flags_rendered: self.flags_rendered.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
