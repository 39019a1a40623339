//! HTTP Strict Transport Security store.
//!
//! The persisted-state databases are collaborators behind narrow
//! interfaces; HSTS is the one the engine itself consults on every
//! connection, so it gets a trait plus the default in-memory
//! implementation with a line-format file behind it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The engine's view of an HSTS database.
pub trait HstsStore: Send + Sync {
    /// Record a `Strict-Transport-Security` observation.
    fn add(&self, host: &str, port: u16, max_age: Duration, include_subdomains: bool);

    /// Whether `host:port` must be upgraded to https.
    fn matches(&self, host: &str, port: u16) -> bool;

    /// Persist mutations, if the implementation persists at all.
    fn flush(&self) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
struct HstsEntry {
    /// Unix seconds after which the entry is stale.
    expires: u64,
    include_subdomains: bool,
}

/// In-memory store with an optional line-format backing file:
/// `host port expires include_subdomains` per line, `#` comments.
#[derive(Debug, Default)]
pub struct MemHstsStore {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<(String, u16), HstsEntry>>,
    dirty: RwLock<bool>,
}

impl MemHstsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`; a missing file is an empty store.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let mut entries = HashMap::new();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                for line in text.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    let mut it = line.split_whitespace();
                    let (Some(host), Some(port), Some(expires), Some(subs)) =
                        (it.next(), it.next(), it.next(), it.next())
                    else {
                        continue;
                    };
                    let (Ok(port), Ok(expires)) = (port.parse::<u16>(), expires.parse::<u64>())
                    else {
                        continue;
                    };
                    entries.insert(
                        (host.to_ascii_lowercase(), port),
                        HstsEntry {
                            expires,
                            include_subdomains: subs == "1",
                        },
                    );
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(Self {
            path: Some(path.to_path_buf()),
            entries: RwLock::new(entries),
            dirty: RwLock::new(false),
        })
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

impl HstsStore for MemHstsStore {
    fn add(&self, host: &str, port: u16, max_age: Duration, include_subdomains: bool) {
        let key = (host.to_ascii_lowercase(), port);
        let mut entries = self.entries.write().expect("hsts lock");
        if max_age.is_zero() {
            // max-age=0 withdraws the policy.
            entries.remove(&key);
        } else {
            entries.insert(
                key,
                HstsEntry {
                    expires: Self::now().saturating_add(max_age.as_secs()),
                    include_subdomains,
                },
            );
        }
        *self.dirty.write().expect("hsts dirty lock") = true;
    }

    fn matches(&self, host: &str, port: u16) -> bool {
        let now = Self::now();
        let host = host.to_ascii_lowercase();
        let entries = self.entries.read().expect("hsts lock");

        if let Some(entry) = entries.get(&(host.clone(), port))
            && entry.expires > now
        {
            return true;
        }

        // Parent-domain entries with includeSubdomains.
        let mut rest = host.as_str();
        while let Some(dot) = rest.find('.') {
            rest = &rest[dot + 1..];
            if let Some(entry) = entries.get(&(rest.to_string(), port))
                && entry.expires > now
                && entry.include_subdomains
            {
                return true;
            }
        }
        false
    }

    fn flush(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !*self.dirty.read().expect("hsts dirty lock") {
            return Ok(());
        }

        let entries = self.entries.read().expect("hsts lock");
        let now = Self::now();
        let mut out = String::from("# trawl HSTS store: host port expires include_subdomains\n");
        for ((host, port), entry) in entries.iter() {
            if entry.expires > now {
                out.push_str(&format!(
                    "{host} {port} {} {}\n",
                    entry.expires,
                    u8::from(entry.include_subdomains)
                ));
            }
        }
        std::fs::write(path, out)
    }
}

/// Parse a `Strict-Transport-Security` header value.
///
/// Returns `(max_age, include_subdomains)`.
#[must_use]
pub fn parse_hsts_header(value: &str) -> Option<(Duration, bool)> {
    let mut max_age = None;
    let mut include_subdomains = false;
    for directive in value.split(';') {
        let directive = directive.trim();
        if let Some(age) = directive
            .strip_prefix("max-age=")
            .or_else(|| directive.strip_prefix("Max-Age="))
        {
            max_age = age.trim_matches('"').parse::<u64>().ok();
        } else if directive.eq_ignore_ascii_case("includesubdomains") {
            include_subdomains = true;
        }
    }
    max_age.map(|secs| (Duration::from_secs(secs), include_subdomains))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{HstsStore, MemHstsStore, parse_hsts_header};

    #[test]
    fn add_and_match() {
        let store = MemHstsStore::new();
        store.add("h", 443, Duration::from_secs(60), false);
        assert!(store.matches("h", 443));
        assert!(!store.matches("h", 8443));
        assert!(!store.matches("other", 443));
    }

    #[test]
    fn subdomain_matching() {
        let store = MemHstsStore::new();
        store.add("example.com", 443, Duration::from_secs(60), true);
        assert!(store.matches("www.example.com", 443));
        assert!(store.matches("a.b.example.com", 443));

        store.add("strict.net", 443, Duration::from_secs(60), false);
        assert!(!store.matches("www.strict.net", 443));
    }

    #[test]
    fn zero_max_age_withdraws() {
        let store = MemHstsStore::new();
        store.add("h", 443, Duration::from_secs(60), false);
        store.add("h", 443, Duration::ZERO, false);
        assert!(!store.matches("h", 443));
    }

    #[test]
    fn header_parsing() {
        assert_eq!(
            parse_hsts_header("max-age=31536000; includeSubDomains"),
            Some((Duration::from_secs(31_536_000), true))
        );
        assert_eq!(
            parse_hsts_header("max-age=600"),
            Some((Duration::from_secs(600), false))
        );
        assert_eq!(parse_hsts_header("preload"), None);
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hsts");

        let store = MemHstsStore::load(&path).unwrap();
        store.add("h", 443, Duration::from_secs(3600), true);
        store.flush().unwrap();

        let reloaded = MemHstsStore::load(&path).unwrap();
        assert!(reloaded.matches("h", 443));
        assert!(reloaded.matches("sub.h", 443));
    }
}
