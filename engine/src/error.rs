//! Engine error type.
//!
//! Errors never unwind across the worker boundary: a worker observes one
//! [`FetchError`], maps it to a disposition (retry, move on, exit) and
//! folds its [`ExitStatus`] into the process-wide minimum.

use thiserror::Error;
use trawl_types::ExitStatus;

/// Error classes with distinct dispositions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad URI, bad header, bad config line: diagnose, skip, continue.
    MalformedInput,
    /// Connect refused/reset, DNS failure: retry up to `tries`.
    Network,
    /// Handshake or certificate failure: host finally failed.
    Tls,
    /// 401/407 after credentials, or no challenges offered.
    Auth,
    /// Malformed response, invalid chunking, integrity mismatch.
    Protocol,
    /// 4xx/5xx outside the special cases: record, move on.
    Remote,
    /// Local open/write/fsync failure.
    Io,
    /// Byte quota reached: soft stop.
    Quota,
    /// Operator interrupt.
    Interrupted,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
    /// Whether retrying the same request may succeed.
    pub retryable: bool,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(kind, ErrorKind::Network | ErrorKind::Protocol);
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        match self.kind {
            ErrorKind::MalformedInput => ExitStatus::Parse,
            ErrorKind::Network => ExitStatus::Network,
            ErrorKind::Tls => ExitStatus::Tls,
            ErrorKind::Auth => ExitStatus::Auth,
            ErrorKind::Protocol => ExitStatus::Protocol,
            ErrorKind::Remote => ExitStatus::Remote,
            ErrorKind::Io => ExitStatus::Io,
            // Soft conditions do not taint the exit status by themselves.
            ErrorKind::Quota | ErrorKind::Interrupted => ExitStatus::Success,
        }
    }
}

/// Classify a transport error from the HTTP layer.
///
/// reqwest does not expose a TLS error discriminant, so the error chain is
/// inspected for the rustls vocabulary before falling back to Network.
#[must_use]
pub fn classify_transport_error(err: &reqwest::Error) -> FetchError {
    let chain = error_chain_text(err);
    let lower = chain.to_ascii_lowercase();

    let kind = if lower.contains("certificate")
        || lower.contains("handshake")
        || lower.contains("tls")
        || lower.contains("ssl")
    {
        ErrorKind::Tls
    } else if err.is_timeout() || err.is_connect() || err.is_request() {
        ErrorKind::Network
    } else if err.is_body() || err.is_decode() {
        ErrorKind::Protocol
    } else {
        ErrorKind::Network
    };

    FetchError::new(kind, chain)
}

fn error_chain_text(err: &reqwest::Error) -> String {
    use std::error::Error as _;

    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use trawl_types::ExitStatus;

    use super::{ErrorKind, FetchError};

    #[test]
    fn kinds_map_to_exit_codes() {
        assert_eq!(
            FetchError::new(ErrorKind::Network, "x").exit_status(),
            ExitStatus::Network
        );
        assert_eq!(
            FetchError::new(ErrorKind::Tls, "x").exit_status(),
            ExitStatus::Tls
        );
        assert_eq!(
            FetchError::new(ErrorKind::Quota, "x").exit_status(),
            ExitStatus::Success
        );
    }

    #[test]
    fn default_retryability() {
        assert!(FetchError::new(ErrorKind::Network, "x").retryable);
        assert!(FetchError::new(ErrorKind::Protocol, "x").retryable);
        assert!(!FetchError::new(ErrorKind::Tls, "x").retryable);
        assert!(!FetchError::new(ErrorKind::Auth, "x").retryable);
    }
}
