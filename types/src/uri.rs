//! Canonical URI value.
//!
//! A [`CanonicalUrl`] is an absolute `http`/`https` URL that has been pushed
//! through one normalization pass: the host is lowercase and IDNA-encoded,
//! the path is re-percent-encoded in canonical form, default ports are
//! elided, and the fragment is dropped from the canonical key. Immutable
//! after parse; canonicalizing an already-canonical URI is a no-op.

use std::fmt;

use thiserror::Error;
use url::Url;

/// The two schemes the retriever speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// The port implied when the URL carries none.
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UriError {
    #[error("malformed URI '{0}'")]
    Malformed(String),
    #[error("unsupported scheme '{scheme}' in '{uri}'")]
    UnsupportedScheme { scheme: String, uri: String },
}

/// An absolute, normalized `http`/`https` URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUrl {
    url: Url,
    scheme: Scheme,
    is_ip_address: bool,
}

impl CanonicalUrl {
    /// Parse and canonicalize an absolute URI.
    pub fn parse(candidate: &str) -> Result<Self, UriError> {
        Self::parse_with_base(candidate, None, None)
    }

    /// Parse a possibly-relative URI against `base`, recoding `candidate`
    /// from `source_encoding` first when one is given.
    ///
    /// Relative-to-absolute resolution follows RFC 3986; the `url` crate
    /// performs IDNA host encoding and canonical percent-encoding for us.
    pub fn parse_with_base(
        candidate: &str,
        base: Option<&Url>,
        source_encoding: Option<&str>,
    ) -> Result<Self, UriError> {
        let recoded;
        let candidate = match source_encoding {
            Some(enc) => {
                recoded = decode_to_utf8(candidate.as_bytes(), Some(enc));
                recoded.as_ref()
            }
            None => candidate,
        };
        let trimmed = candidate.trim();

        let url = match base {
            Some(base) => base
                .join(trimmed)
                .map_err(|_| UriError::Malformed(trimmed.to_string()))?,
            None => Url::parse(trimmed).map_err(|_| UriError::Malformed(trimmed.to_string()))?,
        };

        Self::from_url(url)
    }

    /// Wrap an already-parsed URL, enforcing the scheme gate.
    pub fn from_url(mut url: Url) -> Result<Self, UriError> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(UriError::UnsupportedScheme {
                    scheme: other.to_string(),
                    uri: url.to_string(),
                });
            }
        };

        if url.host_str().is_none() {
            return Err(UriError::Malformed(url.to_string()));
        }

        // The canonical key never contains a fragment.
        url.set_fragment(None);

        let is_ip_address = matches!(
            url.host(),
            Some(url::Host::Ipv4(_) | url::Host::Ipv6(_))
        );

        Ok(Self {
            url,
            scheme,
            is_ip_address,
        })
    }

    /// Rewrite the scheme to https, preserving an explicit non-default port.
    ///
    /// Used for HSTS upgrades before connecting.
    #[must_use]
    pub fn into_https(self) -> Self {
        if self.scheme == Scheme::Https {
            return self;
        }
        let mut url = self.url;
        let explicit_port = url.port();
        // set_scheme cannot fail going http -> https
        let _ = url.set_scheme("https");
        match explicit_port {
            // An explicit port survives the upgrade untouched.
            Some(p) => {
                let _ = url.set_port(Some(p));
            }
            None => {
                let _ = url.set_port(None);
            }
        }
        Self {
            url,
            scheme: Scheme::Https,
            is_ip_address: self.is_ip_address,
        }
    }

    /// Drop the query string, keeping everything else.
    #[must_use]
    pub fn without_query(mut self) -> Self {
        self.url.set_query(None);
        self
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.url.port().unwrap_or_else(|| self.scheme.default_port())
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }

    #[must_use]
    pub fn is_ip_address(&self) -> bool {
        self.is_ip_address
    }

    /// The canonical string form used as the blacklist key.
    #[must_use]
    pub fn canonical(&self) -> &str {
        self.url.as_str()
    }

    /// The directory portion of the path, including the trailing slash.
    ///
    /// `/a/b/c.html` yields `/a/b/`; `/` yields `/`.
    #[must_use]
    pub fn dir(&self) -> &str {
        let path = self.url.path();
        match path.rfind('/') {
            Some(idx) => &path[..=idx],
            None => "/",
        }
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Decode bytes to UTF-8 using a declared source encoding.
///
/// Only the encodings that realistically show up on Content-Type headers of
/// link-bearing text are mapped; everything else falls back to lossy UTF-8.
#[must_use]
pub fn decode_to_utf8(bytes: &[u8], encoding: Option<&str>) -> String {
    let name = encoding.map(str::trim).map(str::to_ascii_lowercase);
    match name.as_deref() {
        Some("iso-8859-1" | "latin1" | "latin-1") => bytes.iter().map(|&b| b as char).collect(),
        Some("windows-1252" | "cp1252") => bytes.iter().map(|&b| cp1252_char(b)).collect(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn cp1252_char(b: u8) -> char {
    // Windows-1252 deviates from Latin-1 only in 0x80..=0x9F.
    const HIGH: [char; 32] = [
        '\u{20AC}', '\u{81}', '\u{201A}', '\u{192}', '\u{201E}', '\u{2026}', '\u{2020}',
        '\u{2021}', '\u{2C6}', '\u{2030}', '\u{160}', '\u{2039}', '\u{152}', '\u{8D}',
        '\u{17D}', '\u{8F}', '\u{90}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}',
        '\u{2022}', '\u{2013}', '\u{2014}', '\u{2DC}', '\u{2122}', '\u{161}', '\u{203A}',
        '\u{153}', '\u{9D}', '\u{17E}', '\u{178}',
    ];
    match b {
        0x80..=0x9F => HIGH[(b - 0x80) as usize],
        other => other as char,
    }
}
