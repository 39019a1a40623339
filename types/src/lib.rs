//! Shared value types for trawl.
//!
//! This crate holds the leaf types every other crate agrees on: the
//! canonical URI value, the process exit status, and the literal parsers
//! for the option values that appear on the command line and in rc files.

mod exit;
mod uri;
mod values;

pub use exit::ExitStatus;
pub use uri::{CanonicalUrl, Scheme, UriError, decode_to_utf8};
pub use values::{ValueError, parse_bool_literal, parse_duration_value, parse_size_value};
