//! Process exit status.
//!
//! When several errors occur over a run, the lowest nonzero code wins: a
//! parse/init problem outranks an I/O problem outranks a network problem,
//! and so on down the table.

/// Exit codes, ordered by severity (lower nonzero = more severe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum ExitStatus {
    #[default]
    Success = 0,
    /// Generic failure not covered by a more specific code.
    Generic = 1,
    /// Command line, rc file, or initialization error.
    Parse = 2,
    /// File open/write/fsync failure.
    Io = 3,
    /// DNS failure, refused or reset connections, exceeded retries.
    Network = 4,
    /// TLS handshake or certificate verification failure.
    Tls = 5,
    /// Authentication failed after credentials were attempted.
    Auth = 6,
    /// Malformed response, invalid chunking, integrity mismatch.
    Protocol = 7,
    /// Remote server error (4xx/5xx outside the special cases).
    Remote = 8,
}

impl ExitStatus {
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::Generic),
            2 => Some(Self::Parse),
            3 => Some(Self::Io),
            4 => Some(Self::Network),
            5 => Some(Self::Tls),
            6 => Some(Self::Auth),
            7 => Some(Self::Protocol),
            8 => Some(Self::Remote),
            _ => None,
        }
    }

    /// Combine two observed statuses: the lowest nonzero code wins.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Success, b) => b,
            (a, Self::Success) => a,
            (a, b) => {
                if a.code() <= b.code() {
                    a
                } else {
                    b
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExitStatus;

    #[test]
    fn lowest_nonzero_wins() {
        assert_eq!(
            ExitStatus::Network.combine(ExitStatus::Io),
            ExitStatus::Io
        );
        assert_eq!(
            ExitStatus::Io.combine(ExitStatus::Network),
            ExitStatus::Io
        );
    }

    #[test]
    fn success_never_masks_errors() {
        assert_eq!(
            ExitStatus::Success.combine(ExitStatus::Remote),
            ExitStatus::Remote
        );
        assert_eq!(
            ExitStatus::Remote.combine(ExitStatus::Success),
            ExitStatus::Remote
        );
    }

    #[test]
    fn round_trips_through_code() {
        for code in 0..=8 {
            assert_eq!(ExitStatus::from_code(code).unwrap().code(), code);
        }
        assert!(ExitStatus::from_code(9).is_none());
    }
}
