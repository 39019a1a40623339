//! Process-wide counters.
//!
//! All counters are plain atomics updated with fetch-add; the quota counter
//! is monotone and equals the total of response body bytes written.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use trawl_types::ExitStatus;

#[derive(Debug, Default)]
pub struct Stats {
    ndownloads: AtomicU64,
    nredirects: AtomicU64,
    nnotmodified: AtomicU64,
    nerrors: AtomicU64,
    nchunks: AtomicU64,
    /// Body bytes downloaded; doubles as the quota counter.
    bytes_body: AtomicU64,
    exit_status: AtomicU8,
}

impl Stats {
    pub fn add_download(&self) {
        self.ndownloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_redirect(&self) {
        self.nredirects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_not_modified(&self) {
        self.nnotmodified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.nerrors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_chunk(&self) {
        self.nchunks.fetch_add(1, Ordering::Relaxed);
    }

    /// Account body bytes; returns the counter value before the addition,
    /// which is what quota checks compare against.
    pub fn add_body_bytes(&self, n: u64) -> u64 {
        self.bytes_body.fetch_add(n, Ordering::Relaxed)
    }

    #[must_use]
    pub fn downloads(&self) -> u64 {
        self.ndownloads.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn redirects(&self) -> u64 {
        self.nredirects.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn not_modified(&self) -> u64 {
        self.nnotmodified.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.nerrors.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn chunks(&self) -> u64 {
        self.nchunks.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn body_bytes(&self) -> u64 {
        self.bytes_body.load(Ordering::Relaxed)
    }

    /// True when a nonzero quota has been met or exceeded.
    #[must_use]
    pub fn quota_reached(&self, quota: u64) -> bool {
        quota > 0 && self.body_bytes() >= quota
    }

    /// Fold an observed status into the process exit status
    /// (lowest nonzero code wins).
    pub fn set_exit_status(&self, status: ExitStatus) {
        let mut current = self.exit_status.load(Ordering::Relaxed);
        loop {
            let combined = ExitStatus::from_code(current)
                .unwrap_or_default()
                .combine(status);
            if combined.code() == current {
                return;
            }
            match self.exit_status.compare_exchange(
                current,
                combined.code(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        ExitStatus::from_code(self.exit_status.load(Ordering::Relaxed)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use trawl_types::ExitStatus;

    use super::Stats;

    #[test]
    fn quota_counter_is_monotone() {
        let stats = Stats::default();
        assert_eq!(stats.add_body_bytes(100), 0);
        assert_eq!(stats.add_body_bytes(50), 100);
        assert_eq!(stats.body_bytes(), 150);
        assert!(stats.quota_reached(150));
        assert!(!stats.quota_reached(151));
        assert!(!stats.quota_reached(0));
    }

    #[test]
    fn exit_status_takes_the_minimum_nonzero() {
        let stats = Stats::default();
        stats.set_exit_status(ExitStatus::Remote);
        stats.set_exit_status(ExitStatus::Network);
        stats.set_exit_status(ExitStatus::Remote);
        assert_eq!(stats.exit_status(), ExitStatus::Network);

        stats.set_exit_status(ExitStatus::Success);
        assert_eq!(stats.exit_status(), ExitStatus::Network);
    }
}
