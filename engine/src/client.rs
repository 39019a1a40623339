//! Per-origin HTTP transport.
//!
//! One [`OriginClient`] stands for one persistent association with one
//! `(scheme, host, port)`: the worker keeps it while its jobs stay on that
//! origin and the server does not demand a close. Redirects are never
//! followed by the transport; the dispatcher folds them back into the
//! queue. HTTP/2 is whatever ALPN negotiated; the worker learns it from
//! the first response and widens its in-flight window accordingly.

use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use reqwest::cookie::Jar;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Method, Version};
use trawl_config::Config;

use crate::auth::{authorization_value, basic_value, select_challenge};
use crate::error::{ErrorKind, FetchError};
use crate::host::HostKey;
use crate::job::Job;

pub struct OriginClient {
    pub key: HostKey,
    client: reqwest::Client,
    /// Learned from the first response on this connection.
    pub http2: bool,
}

impl OriginClient {
    /// Build the transport for one origin.
    ///
    /// With a DNS timeout configured, resolution happens here under that
    /// timeout and the first address is pinned on the client; otherwise
    /// the transport resolves lazily under the connect timeout.
    pub async fn connect(
        key: HostKey,
        config: &Config,
        jar: &Arc<Jar>,
    ) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .user_agent(&config.user_agent);

        if let Some(dns_timeout) = config.dns_timeout
            && key.host.parse::<std::net::IpAddr>().is_err()
        {
            let lookup = tokio::net::lookup_host((key.host.as_str(), key.port));
            match tokio::time::timeout(dns_timeout, lookup).await {
                Ok(Ok(mut addrs)) => {
                    if let Some(addr) = addrs.next() {
                        builder = builder.resolve(&key.host, addr);
                    }
                }
                Ok(Err(e)) => {
                    return Err(FetchError::new(
                        ErrorKind::Network,
                        format!("dns lookup failed: {e}"),
                    ));
                }
                Err(_) => {
                    return Err(FetchError::new(ErrorKind::Network, "dns lookup timed out"));
                }
            }
        }

        if config.cookies {
            builder = builder.cookie_provider(Arc::clone(jar));
        }

        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = config.read_timeout {
            builder = builder.read_timeout(timeout);
        }

        if config.proxy {
            if let Some(proxy) = &config.http_proxy {
                let mut proxy = reqwest::Proxy::http(proxy).map_err(|e| {
                    FetchError::new(ErrorKind::MalformedInput, format!("bad http proxy: {e}"))
                })?;
                if !config.no_proxy.is_empty() {
                    proxy = proxy.no_proxy(reqwest::NoProxy::from_string(
                        &config.no_proxy.join(","),
                    ));
                }
                builder = builder.proxy(proxy);
            }
            if let Some(proxy) = &config.https_proxy {
                let mut proxy = reqwest::Proxy::https(proxy).map_err(|e| {
                    FetchError::new(ErrorKind::MalformedInput, format!("bad https proxy: {e}"))
                })?;
                if !config.no_proxy.is_empty() {
                    proxy = proxy.no_proxy(reqwest::NoProxy::from_string(
                        &config.no_proxy.join(","),
                    ));
                }
                builder = builder.proxy(proxy);
            }
        } else {
            builder = builder.no_proxy();
        }

        if !config.check_certificate {
            tracing::warn!("certificate checking disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|e| {
            FetchError::new(ErrorKind::Network, format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self {
            key,
            client,
            http2: false,
        })
    }

    /// Build the request for a job attempt.
    pub fn request(
        &self,
        method: Method,
        job: &Job,
        config: &Config,
        if_modified_since: Option<SystemTime>,
    ) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method.clone(), job.url.url().clone());

        for (name, value) in &config.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                request = request.header(name, value);
            }
        }

        if let Some(referer) = &job.referer {
            request = request.header(reqwest::header::REFERER, referer.canonical());
        }

        if let Some(part) = &job.part {
            let (position, length) = part.range();
            request = request.header(
                reqwest::header::RANGE,
                format!("bytes={}-{}", position, position + length - 1),
            );
        }

        if let Some(since) = if_modified_since {
            request = request.header(reqwest::header::IF_MODIFIED_SINCE, http_date(since));
        }

        // Challenge-driven authorization wins; --auth-no-challenge sends
        // Basic pre-emptively.
        let username = config.http_username.as_deref().unwrap_or("");
        let password = config.http_password.as_deref().unwrap_or("");
        if let Some(challenge) = select_challenge(&job.challenges) {
            if let Some(value) =
                authorization_value(challenge, username, password, method.as_str(), job.url.path())
            {
                request = request.header(reqwest::header::AUTHORIZATION, value);
            }
        } else if config.auth_no_challenge && config.http_username.is_some() {
            request = request.header(
                reqwest::header::AUTHORIZATION,
                basic_value(username, password),
            );
        }

        if let Some(challenge) = select_challenge(&job.proxy_challenges)
            && let Some(value) =
                authorization_value(challenge, username, password, method.as_str(), job.url.path())
        {
            request = request.header(reqwest::header::PROXY_AUTHORIZATION, value);
        }

        request
    }

    /// Note what the first response told us about the connection.
    pub fn observe_version(&mut self, version: Version) {
        self.http2 = version == Version::HTTP_2;
    }
}

/// Format a timestamp as an HTTP-date (RFC 9110 IMF-fixdate).
#[must_use]
pub fn http_date(time: SystemTime) -> String {
    let datetime: DateTime<Utc> = time.into();
    datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP-date header value.
#[must_use]
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).into())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::{http_date, parse_http_date};

    #[test]
    fn http_date_roundtrip() {
        let time = UNIX_EPOCH + Duration::from_secs(784_111_777);
        let formatted = http_date(time);
        assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&formatted), Some(time));
    }

    #[test]
    fn parse_tolerates_offsets() {
        let parsed = parse_http_date("Sun, 06 Nov 1994 08:49:37 +0000").unwrap();
        assert_eq!(
            parsed.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs(),
            784_111_777
        );
        assert!(parse_http_date("not a date").is_none());
    }
}
