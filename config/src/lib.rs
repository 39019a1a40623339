//! Configuration for trawl.
//!
//! [`Config`] is the single flat bag of knobs every other crate reads.
//! Values arrive from three places, later ones winning: rc files (system,
//! then user, then any `--config` files), environment proxies, and the
//! command line. All three funnel through the same declarative option
//! table in [`options`].

mod cli;
mod file;
mod options;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use cli::{CliOutcome, parse_command_line};
pub use file::load_rc_file;
pub use options::{OptionKind, OptionSpec, apply_option, find_option, options_table};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown option '{0}'")]
    UnknownOption(String),
    #[error("option '{name}' requires a value")]
    MissingValue { name: String },
    #[error("invalid value for '{name}': {reason}")]
    InvalidValue { name: String, reason: String },
    #[error("cannot read config file '{path}': {reason}")]
    FileRead { path: String, reason: String },
    #[error("config include depth exceeds {0}")]
    IncludeDepth(usize),
    #[error("malformed config line {line} in '{path}'")]
    MalformedLine { path: String, line: usize },
}

/// File-name restriction modes (`--restrict-file-names`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestrictNames {
    /// Escape characters Windows filesystems refuse.
    pub windows: bool,
    /// Escape control characters (on by default via `unix`).
    pub nocontrol: bool,
    /// Escape all non-ASCII bytes.
    pub ascii: bool,
    pub case: NameCase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameCase {
    #[default]
    Keep,
    Lower,
    Upper,
}

/// Every knob the engine reads. Field defaults follow the predecessor
/// utility where it had one, otherwise the conservative choice.
#[derive(Debug, Clone)]
pub struct Config {
    // Seeds and input
    pub urls: Vec<String>,
    /// `-` means standard input.
    pub input_file: Option<String>,
    pub base: Option<String>,

    // Recursion
    pub recursive: bool,
    /// Maximum recursion depth; 0 means infinite.
    pub level: u32,
    pub page_requisites: bool,
    pub robots: bool,
    pub span_hosts: bool,
    pub domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    /// False disables ascending above the seed's directory (`--no-parent`).
    pub parent: bool,
    pub https_only: bool,
    /// Apply accept/reject filtering to URIs at admission, in addition to
    /// the always-on filename phase.
    pub filter_urls: bool,

    // Scheduling
    pub max_threads: usize,
    pub wait: Option<Duration>,
    pub random_wait: bool,
    pub waitretry: Option<Duration>,
    /// Retries per host before it is finally failed; 0 means unlimited.
    pub tries: u32,
    /// Redirection chain cap; 0 stops at the first redirect.
    pub max_redirect: u32,
    pub http2_request_window: usize,
    /// Piece size for synthetic chunked downloads; 0 disables chunking.
    pub chunk_size: u64,
    pub metalink: bool,

    // Network
    pub dns_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub http_username: Option<String>,
    pub http_password: Option<String>,
    /// Send Basic credentials without waiting for a challenge.
    pub auth_no_challenge: bool,
    pub proxy: bool,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Vec<String>,
    pub check_certificate: bool,
    pub hsts: bool,
    pub hsts_file: Option<PathBuf>,
    pub cookies: bool,

    // Quota and filters
    /// Byte quota; 0 means unlimited.
    pub quota: u64,
    pub accept_patterns: Vec<String>,
    pub reject_patterns: Vec<String>,
    pub accept_regex: Option<String>,
    pub reject_regex: Option<String>,

    // Local file layout
    pub directory_prefix: PathBuf,
    /// Create per-host directories.
    pub host_directories: bool,
    pub protocol_directories: bool,
    pub cut_dirs: u32,
    pub default_page: String,
    pub restrict_file_names: RestrictNames,
    pub cut_url_get_vars: bool,
    pub cut_file_get_vars: bool,

    // Sink behavior
    pub output_document: Option<String>,
    pub clobber: bool,
    pub backups: u32,
    pub timestamping: bool,
    pub adjust_extension: bool,
    pub content_disposition: bool,
    pub trust_server_names: bool,
    pub save_headers: bool,
    pub content_on_error: bool,
    pub spider: bool,
    pub delete_after: bool,
    pub fsync: bool,
    pub xattr: bool,

    // Post-pass
    pub convert_links: bool,
    pub backup_converted: bool,

    pub verbose: bool,
    /// Extra rc files named with `--config`.
    pub config_files: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            input_file: None,
            base: None,

            recursive: false,
            level: 5,
            page_requisites: false,
            robots: true,
            span_hosts: false,
            domains: Vec::new(),
            exclude_domains: Vec::new(),
            parent: true,
            https_only: false,
            filter_urls: false,

            max_threads: 5,
            wait: None,
            random_wait: false,
            waitretry: Some(Duration::from_secs(10)),
            tries: 20,
            max_redirect: 30,
            http2_request_window: 30,
            chunk_size: 0,
            metalink: true,

            dns_timeout: None,
            connect_timeout: None,
            read_timeout: None,
            user_agent: format!("trawl/{}", env!("CARGO_PKG_VERSION")),
            headers: Vec::new(),
            http_username: None,
            http_password: None,
            auth_no_challenge: false,
            proxy: true,
            http_proxy: None,
            https_proxy: None,
            no_proxy: Vec::new(),
            check_certificate: true,
            hsts: true,
            hsts_file: None,
            cookies: true,

            quota: 0,
            accept_patterns: Vec::new(),
            reject_patterns: Vec::new(),
            accept_regex: None,
            reject_regex: None,

            directory_prefix: PathBuf::from("."),
            host_directories: true,
            protocol_directories: false,
            cut_dirs: 0,
            default_page: "index.html".to_string(),
            restrict_file_names: RestrictNames::default(),
            cut_url_get_vars: false,
            cut_file_get_vars: false,

            output_document: None,
            clobber: true,
            backups: 0,
            timestamping: false,
            adjust_extension: false,
            content_disposition: false,
            trust_server_names: false,
            save_headers: false,
            content_on_error: false,
            spider: false,
            delete_after: false,
            fsync: false,
            xattr: false,

            convert_links: false,
            backup_converted: false,

            verbose: true,
            config_files: Vec::new(),
        }
    }
}

impl Config {
    /// The recursion-depth allowance for a job at `level`.
    ///
    /// `level == 0` means infinite depth; page requisites get one extra hop.
    #[must_use]
    pub fn level_allows(&self, level: u32) -> bool {
        if !self.recursive {
            return false;
        }
        if self.level == 0 {
            return true;
        }
        let extra = u32::from(self.page_requisites);
        level < self.level + extra
    }

    /// Pull proxy settings from the environment when proxying is enabled
    /// and nothing explicit was configured.
    pub fn finalize_from_env(&mut self) {
        if !self.proxy {
            return;
        }
        if self.http_proxy.is_none()
            && let Ok(v) = std::env::var("http_proxy")
            && !v.is_empty()
        {
            self.http_proxy = Some(v);
        }
        if self.https_proxy.is_none()
            && let Ok(v) = std::env::var("https_proxy")
            && !v.is_empty()
        {
            self.https_proxy = Some(v);
        }
        if self.no_proxy.is_empty()
            && let Ok(v) = std::env::var("no_proxy")
        {
            self.no_proxy = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn level_allowance() {
        let mut config = Config {
            recursive: true,
            level: 1,
            ..Config::default()
        };
        assert!(config.level_allows(0));
        assert!(!config.level_allows(1));

        config.page_requisites = true;
        assert!(config.level_allows(1));

        config.level = 0; // mirror-style infinite recursion
        assert!(config.level_allows(10_000));

        config.recursive = false;
        assert!(!config.level_allows(0));
    }
}
