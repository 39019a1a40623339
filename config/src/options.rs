//! The declarative option table.
//!
//! Every option is a row: canonical kebab-case name, optional short letter,
//! and a tagged [`OptionKind`] naming the field it writes through an
//! accessor. One generic [`apply_option`] consumes the row; composite
//! options (`--mirror`) are rows whose kind lists the `(option, value)`
//! pairs they expand to, applied through the same entry point.

use std::path::PathBuf;
use std::time::Duration;

use trawl_types::{parse_bool_literal, parse_duration_value, parse_size_value};

use crate::{Config, ConfigError, NameCase, RestrictNames};

type Setter<T> = fn(&mut Config) -> &mut T;

/// What a value means and where it lands.
pub enum OptionKind {
    Bool(Setter<bool>),
    /// Unsigned integer; `inf`/`infinity` stores 0.
    Integer(Setter<u32>),
    IntegerUsize(Setter<usize>),
    /// Byte count with `k/m/g/t` suffixes; `inf` stores 0.
    Size(Setter<u64>),
    /// Duration with `s/m/h/d` suffixes; `0`/`inf` stores `None`.
    Duration(Setter<Option<Duration>>),
    Text(Setter<Option<String>>),
    TextDirect(Setter<String>),
    Path(Setter<Option<PathBuf>>),
    PathDirect(Setter<PathBuf>),
    /// Comma-separated list, appended across occurrences.
    List(Setter<Vec<String>>),
    PathList(Setter<Vec<PathBuf>>),
    /// `Name: value` request header, appended. An empty value clears.
    Header,
    RestrictNames,
    /// Expands to other `(option, value)` pairs.
    Composite(&'static [(&'static str, &'static str)]),
}

pub struct OptionSpec {
    pub name: &'static str,
    pub short: Option<char>,
    pub kind: OptionKind,
    pub help: &'static str,
}

/// The table. Sorted by name; `find_option` relies on it for binary search.
pub static OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        name: "accept",
        short: Some('A'),
        kind: OptionKind::List(|c| &mut c.accept_patterns),
        help: "Comma-separated list of accepted file name patterns.",
    },
    OptionSpec {
        name: "accept-regex",
        short: None,
        kind: OptionKind::Text(|c| &mut c.accept_regex),
        help: "Regex matching accepted URLs/filenames.",
    },
    OptionSpec {
        name: "adjust-extension",
        short: Some('E'),
        kind: OptionKind::Bool(|c| &mut c.adjust_extension),
        help: "Append a matching extension to saved files (.html, .css, ...).",
    },
    OptionSpec {
        name: "auth-no-challenge",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.auth_no_challenge),
        help: "Send Basic authentication before any challenge.",
    },
    OptionSpec {
        name: "backup-converted",
        short: Some('K'),
        kind: OptionKind::Bool(|c| &mut c.backup_converted),
        help: "Keep a .orig copy of files rewritten by link conversion.",
    },
    OptionSpec {
        name: "backups",
        short: None,
        kind: OptionKind::Integer(|c| &mut c.backups),
        help: "Rotate .1..N backups instead of overwriting.",
    },
    OptionSpec {
        name: "base",
        short: Some('B'),
        kind: OptionKind::Text(|c| &mut c.base),
        help: "Base for relative URLs read from the input file.",
    },
    OptionSpec {
        name: "check-certificate",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.check_certificate),
        help: "Verify the server certificate. (default: on)",
    },
    OptionSpec {
        name: "chunk-size",
        short: None,
        kind: OptionKind::Size(|c| &mut c.chunk_size),
        help: "Download files larger than this in concurrent chunks.",
    },
    OptionSpec {
        name: "clobber",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.clobber),
        help: "Allow overwriting existing files. (default: on)",
    },
    OptionSpec {
        name: "config",
        short: None,
        kind: OptionKind::PathList(|c| &mut c.config_files),
        help: "Additional rc file to load.",
    },
    OptionSpec {
        name: "connect-timeout",
        short: None,
        kind: OptionKind::Duration(|c| &mut c.connect_timeout),
        help: "Connect timeout; 0 means infinite.",
    },
    OptionSpec {
        name: "content-disposition",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.content_disposition),
        help: "Take local file names from Content-Disposition.",
    },
    OptionSpec {
        name: "content-on-error",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.content_on_error),
        help: "Save response bodies of failing requests too.",
    },
    OptionSpec {
        name: "convert-links",
        short: Some('k'),
        kind: OptionKind::Bool(|c| &mut c.convert_links),
        help: "After the run, rewrite links in saved HTML to local copies.",
    },
    OptionSpec {
        name: "cookies",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.cookies),
        help: "Accept and send cookies. (default: on)",
    },
    OptionSpec {
        name: "cut-dirs",
        short: None,
        kind: OptionKind::Integer(|c| &mut c.cut_dirs),
        help: "Skip this many leading path components when saving.",
    },
    OptionSpec {
        name: "cut-file-get-vars",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.cut_file_get_vars),
        help: "Strip ?query from generated local file names.",
    },
    OptionSpec {
        name: "cut-url-get-vars",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.cut_url_get_vars),
        help: "Strip ?query from URLs at admission.",
    },
    OptionSpec {
        name: "default-page",
        short: None,
        kind: OptionKind::TextDirect(|c| &mut c.default_page),
        help: "File name for directory URLs. (default: index.html)",
    },
    OptionSpec {
        name: "delete-after",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.delete_after),
        help: "Delete files after download (crawl-only runs).",
    },
    OptionSpec {
        name: "directory-prefix",
        short: Some('P'),
        kind: OptionKind::PathDirect(|c| &mut c.directory_prefix),
        help: "Directory all saved files go under.",
    },
    OptionSpec {
        name: "dns-timeout",
        short: None,
        kind: OptionKind::Duration(|c| &mut c.dns_timeout),
        help: "DNS resolution timeout; 0 means infinite.",
    },
    OptionSpec {
        name: "domains",
        short: None,
        kind: OptionKind::List(|c| &mut c.domains),
        help: "Hosts recursion may touch.",
    },
    OptionSpec {
        name: "exclude-domains",
        short: None,
        kind: OptionKind::List(|c| &mut c.exclude_domains),
        help: "Hosts recursion must not touch.",
    },
    OptionSpec {
        name: "filter-urls",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.filter_urls),
        help: "Apply accept/reject rules to URLs at admission as well.",
    },
    OptionSpec {
        name: "fsync",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.fsync),
        help: "fsync files after writing.",
    },
    OptionSpec {
        name: "header",
        short: None,
        kind: OptionKind::Header,
        help: "Extra request header as 'Name: value'; empty clears.",
    },
    OptionSpec {
        name: "host-directories",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.host_directories),
        help: "Create a directory per host. (default: on)",
    },
    OptionSpec {
        name: "hsts",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.hsts),
        help: "Honor HTTP Strict Transport Security. (default: on)",
    },
    OptionSpec {
        name: "hsts-file",
        short: None,
        kind: OptionKind::Path(|c| &mut c.hsts_file),
        help: "File the HSTS store is loaded from and flushed to.",
    },
    OptionSpec {
        name: "http-password",
        short: None,
        kind: OptionKind::Text(|c| &mut c.http_password),
        help: "Password for HTTP authentication.",
    },
    OptionSpec {
        name: "http-proxy",
        short: None,
        kind: OptionKind::Text(|c| &mut c.http_proxy),
        help: "Proxy for http URLs.",
    },
    OptionSpec {
        name: "http-user",
        short: None,
        kind: OptionKind::Text(|c| &mut c.http_username),
        help: "Username for HTTP authentication.",
    },
    OptionSpec {
        name: "http2-request-window",
        short: None,
        kind: OptionKind::IntegerUsize(|c| &mut c.http2_request_window),
        help: "Max in-flight requests on one HTTP/2 connection.",
    },
    OptionSpec {
        name: "https-only",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.https_only),
        help: "Follow https links only.",
    },
    OptionSpec {
        name: "https-proxy",
        short: None,
        kind: OptionKind::Text(|c| &mut c.https_proxy),
        help: "Proxy for https URLs.",
    },
    OptionSpec {
        name: "input-file",
        short: Some('i'),
        kind: OptionKind::Text(|c| &mut c.input_file),
        help: "File with URLs to fetch; '-' reads standard input.",
    },
    OptionSpec {
        name: "level",
        short: Some('l'),
        kind: OptionKind::Integer(|c| &mut c.level),
        help: "Maximum recursion depth; 0 or inf means unlimited.",
    },
    OptionSpec {
        name: "max-redirect",
        short: None,
        kind: OptionKind::Integer(|c| &mut c.max_redirect),
        help: "Redirections to follow per job; 0 follows none.",
    },
    OptionSpec {
        name: "max-threads",
        short: None,
        kind: OptionKind::IntegerUsize(|c| &mut c.max_threads),
        help: "Number of downloader threads. (default: 5)",
    },
    OptionSpec {
        name: "metalink",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.metalink),
        help: "Parse metalink descriptions and spread over mirrors.",
    },
    OptionSpec {
        name: "mirror",
        short: Some('m'),
        kind: OptionKind::Composite(&[
            ("recursive", "on"),
            ("level", "inf"),
            ("timestamping", "on"),
        ]),
        help: "Shorthand for -r -l inf --timestamping.",
    },
    OptionSpec {
        name: "output-document",
        short: Some('O'),
        kind: OptionKind::Text(|c| &mut c.output_document),
        help: "Write everything to this file; '-' writes standard output.",
    },
    OptionSpec {
        name: "page-requisites",
        short: Some('p'),
        kind: OptionKind::Bool(|c| &mut c.page_requisites),
        help: "Fetch images/styles needed to render each page.",
    },
    OptionSpec {
        name: "parent",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.parent),
        help: "Allow ascending above the seed directory. (default: on)",
    },
    OptionSpec {
        name: "protocol-directories",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.protocol_directories),
        help: "Add the scheme as a directory level.",
    },
    OptionSpec {
        name: "proxy",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.proxy),
        help: "Consult proxy settings/environment. (default: on)",
    },
    OptionSpec {
        name: "quota",
        short: Some('Q'),
        kind: OptionKind::Size(|c| &mut c.quota),
        help: "Stop starting new downloads past this many bytes.",
    },
    OptionSpec {
        name: "random-wait",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.random_wait),
        help: "Jitter waits between 0.5x and 1.5x of --wait.",
    },
    OptionSpec {
        name: "read-timeout",
        short: None,
        kind: OptionKind::Duration(|c| &mut c.read_timeout),
        help: "Socket read timeout; 0 means infinite.",
    },
    OptionSpec {
        name: "recursive",
        short: Some('r'),
        kind: OptionKind::Bool(|c| &mut c.recursive),
        help: "Recurse into discovered links.",
    },
    OptionSpec {
        name: "reject",
        short: Some('R'),
        kind: OptionKind::List(|c| &mut c.reject_patterns),
        help: "Comma-separated list of rejected file name patterns.",
    },
    OptionSpec {
        name: "reject-regex",
        short: None,
        kind: OptionKind::Text(|c| &mut c.reject_regex),
        help: "Regex matching rejected URLs/filenames.",
    },
    OptionSpec {
        name: "restrict-file-names",
        short: None,
        kind: OptionKind::RestrictNames,
        help: "none|unix|windows|nocontrol|ascii|lowercase|uppercase (comma-joined).",
    },
    OptionSpec {
        name: "robots",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.robots),
        help: "Honor robots.txt under recursion. (default: on)",
    },
    OptionSpec {
        name: "save-headers",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.save_headers),
        help: "Prefix saved files with the response headers.",
    },
    OptionSpec {
        name: "span-hosts",
        short: Some('H'),
        kind: OptionKind::Bool(|c| &mut c.span_hosts),
        help: "Let recursion leave the seed hosts.",
    },
    OptionSpec {
        name: "spider",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.spider),
        help: "Crawl without saving anything.",
    },
    OptionSpec {
        name: "timestamping",
        short: Some('N'),
        kind: OptionKind::Bool(|c| &mut c.timestamping),
        help: "Skip downloads whose local copy is up to date.",
    },
    OptionSpec {
        name: "tries",
        short: Some('t'),
        kind: OptionKind::Integer(|c| &mut c.tries),
        help: "Retries per host before giving up; 0 or inf is unlimited.",
    },
    OptionSpec {
        name: "trust-server-names",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.trust_server_names),
        help: "Name redirected downloads after the final URL.",
    },
    OptionSpec {
        name: "user-agent",
        short: Some('U'),
        kind: OptionKind::TextDirect(|c| &mut c.user_agent),
        help: "User-Agent header to send.",
    },
    OptionSpec {
        name: "verbose",
        short: Some('v'),
        kind: OptionKind::Bool(|c| &mut c.verbose),
        help: "Print per-response status lines. (default: on)",
    },
    OptionSpec {
        name: "wait",
        short: Some('w'),
        kind: OptionKind::Duration(|c| &mut c.wait),
        help: "Pause between requests to the same host.",
    },
    OptionSpec {
        name: "waitretry",
        short: None,
        kind: OptionKind::Duration(|c| &mut c.waitretry),
        help: "Pause before retrying a failed request. (default: 10s)",
    },
    OptionSpec {
        name: "xattr",
        short: None,
        kind: OptionKind::Bool(|c| &mut c.xattr),
        help: "Record origin URL and mime type in extended attributes.",
    },
];

/// The full table, in name order. Help output walks this.
#[must_use]
pub fn options_table() -> &'static [OptionSpec] {
    OPTIONS
}

/// Look an option up by canonical name.
#[must_use]
pub fn find_option(name: &str) -> Option<&'static OptionSpec> {
    OPTIONS
        .binary_search_by(|spec| spec.name.cmp(name))
        .ok()
        .map(|idx| &OPTIONS[idx])
}

/// Look an option up by rc-file key: case-insensitive, `-`/`_` interchangeable.
#[must_use]
pub fn find_option_relaxed(name: &str) -> Option<&'static OptionSpec> {
    let normalized: String = name
        .chars()
        .map(|c| match c {
            '_' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect();
    find_option(&normalized)
}

/// Look an option up by short letter.
#[must_use]
pub fn find_short_option(short: char) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|spec| spec.short == Some(short))
}

/// Apply one `(option, value)` pair to the config.
///
/// `invert` is true for the `--no-` prefix form; it is only meaningful for
/// boolean options.
pub fn apply_option(
    config: &mut Config,
    spec: &OptionSpec,
    value: Option<&str>,
    invert: bool,
) -> Result<(), ConfigError> {
    fn required_value<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, ConfigError> {
        value.ok_or_else(|| ConfigError::MissingValue {
            name: name.to_string(),
        })
    }
    let invalid = |reason: String| ConfigError::InvalidValue {
        name: spec.name.to_string(),
        reason,
    };

    match &spec.kind {
        OptionKind::Bool(setter) => {
            let mut parsed = match value {
                Some(v) => parse_bool_literal(v).map_err(|e| invalid(e.to_string()))?,
                None => true,
            };
            if invert {
                parsed = !parsed;
            }
            *setter(config) = parsed;
        }
        OptionKind::Integer(setter) => {
            let v = required_value(value, spec.name)?;
            let parsed = if v.eq_ignore_ascii_case("inf") || v.eq_ignore_ascii_case("infinity") {
                0
            } else {
                v.trim().parse().map_err(|_| invalid(format!("'{v}' is not a number")))?
            };
            *setter(config) = parsed;
        }
        OptionKind::IntegerUsize(setter) => {
            let v = required_value(value, spec.name)?;
            *setter(config) = v
                .trim()
                .parse()
                .map_err(|_| invalid(format!("'{v}' is not a number")))?;
        }
        OptionKind::Size(setter) => {
            let v = required_value(value, spec.name)?;
            let parsed = parse_size_value(v).map_err(|e| invalid(e.to_string()))?;
            *setter(config) = parsed.unwrap_or(0);
        }
        OptionKind::Duration(setter) => {
            let v = required_value(value, spec.name)?;
            *setter(config) = parse_duration_value(v).map_err(|e| invalid(e.to_string()))?;
        }
        OptionKind::Text(setter) => {
            *setter(config) = Some(required_value(value, spec.name)?.to_string());
        }
        OptionKind::TextDirect(setter) => {
            *setter(config) = required_value(value, spec.name)?.to_string();
        }
        OptionKind::Path(setter) => {
            *setter(config) = Some(PathBuf::from(required_value(value, spec.name)?));
        }
        OptionKind::PathDirect(setter) => {
            *setter(config) = PathBuf::from(required_value(value, spec.name)?);
        }
        OptionKind::List(setter) => {
            let list = setter(config);
            for item in required_value(value, spec.name)?.split(',') {
                let item = item.trim();
                if !item.is_empty() {
                    list.push(item.to_string());
                }
            }
        }
        OptionKind::PathList(setter) => {
            setter(config).push(PathBuf::from(required_value(value, spec.name)?));
        }
        OptionKind::Header => {
            let v = required_value(value, spec.name)?;
            if v.trim().is_empty() {
                config.headers.clear();
            } else {
                let (name, val) = v
                    .split_once(':')
                    .ok_or_else(|| invalid("expected 'Name: value'".to_string()))?;
                config
                    .headers
                    .push((name.trim().to_string(), val.trim().to_string()));
            }
        }
        OptionKind::RestrictNames => {
            let v = required_value(value, spec.name)?;
            config.restrict_file_names = parse_restrict_names(v).map_err(invalid)?;
        }
        OptionKind::Composite(pairs) => {
            for &(name, value) in *pairs {
                let inner = find_option(name)
                    .ok_or_else(|| ConfigError::UnknownOption(name.to_string()))?;
                apply_option(config, inner, Some(value), false)?;
            }
        }
    }

    Ok(())
}

fn parse_restrict_names(value: &str) -> Result<RestrictNames, String> {
    let mut restrict = RestrictNames::default();
    for mode in value.split(',').map(str::trim) {
        match mode.to_ascii_lowercase().as_str() {
            "none" => restrict = RestrictNames::default(),
            "unix" => restrict.nocontrol = true,
            "windows" => {
                restrict.windows = true;
                restrict.nocontrol = true;
            }
            "nocontrol" => restrict.nocontrol = true,
            "ascii" => {
                restrict.ascii = true;
                restrict.nocontrol = true;
            }
            "lowercase" => restrict.case = NameCase::Lower,
            "uppercase" => restrict.case = NameCase::Upper,
            other => return Err(format!("unknown restriction '{other}'")),
        }
    }
    Ok(restrict)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{OPTIONS, apply_option, find_option, find_option_relaxed, find_short_option};
    use crate::{Config, NameCase};

    #[test]
    fn table_is_sorted_for_binary_search() {
        for window in OPTIONS.windows(2) {
            assert!(
                window[0].name < window[1].name,
                "{} >= {}",
                window[0].name,
                window[1].name
            );
        }
    }

    #[test]
    fn bool_with_and_without_value() {
        let mut config = Config::default();
        let spec = find_option("recursive").unwrap();

        apply_option(&mut config, spec, None, false).unwrap();
        assert!(config.recursive);

        apply_option(&mut config, spec, Some("off"), false).unwrap();
        assert!(!config.recursive);

        // --no-recursive=off double-negates
        apply_option(&mut config, spec, Some("off"), true).unwrap();
        assert!(config.recursive);
    }

    #[test]
    fn mirror_expands_to_three_fields() {
        let mut config = Config::default();
        let spec = find_option("mirror").unwrap();
        apply_option(&mut config, spec, None, false).unwrap();
        assert!(config.recursive);
        assert_eq!(config.level, 0);
        assert!(config.timestamping);
    }

    #[test]
    fn sizes_durations_and_inf() {
        let mut config = Config::default();
        apply_option(&mut config, find_option("chunk-size").unwrap(), Some("2m"), false).unwrap();
        assert_eq!(config.chunk_size, 2 << 20);

        apply_option(&mut config, find_option("quota").unwrap(), Some("inf"), false).unwrap();
        assert_eq!(config.quota, 0);

        apply_option(&mut config, find_option("wait").unwrap(), Some("2s"), false).unwrap();
        assert_eq!(config.wait, Some(std::time::Duration::from_secs(2)));

        apply_option(&mut config, find_option("read-timeout").unwrap(), Some("0"), false).unwrap();
        assert_eq!(config.read_timeout, None);
    }

    #[test]
    fn lists_accumulate() {
        let mut config = Config::default();
        let spec = find_option("accept").unwrap();
        apply_option(&mut config, spec, Some("*.html,*.css"), false).unwrap();
        apply_option(&mut config, spec, Some("*.png"), false).unwrap();
        assert_eq!(config.accept_patterns, vec!["*.html", "*.css", "*.png"]);
    }

    #[test]
    fn headers_append_and_clear() {
        let mut config = Config::default();
        let spec = find_option("header").unwrap();
        apply_option(&mut config, spec, Some("X-Custom: 1"), false).unwrap();
        assert_eq!(config.headers, vec![("X-Custom".to_string(), "1".to_string())]);
        apply_option(&mut config, spec, Some(""), false).unwrap();
        assert!(config.headers.is_empty());
    }

    #[test]
    fn restrict_names_combinations() {
        let mut config = Config::default();
        let spec = find_option("restrict-file-names").unwrap();
        apply_option(&mut config, spec, Some("windows,lowercase"), false).unwrap();
        assert!(config.restrict_file_names.windows);
        assert_eq!(config.restrict_file_names.case, NameCase::Lower);
    }

    #[test]
    fn relaxed_lookup_for_rc_files() {
        assert!(find_option_relaxed("Max_Threads").is_some());
        assert!(find_option_relaxed("ADJUST_EXTENSION").is_some());
        // exact lookup stays strict
        assert!(find_option("Max_Threads").is_none());
    }

    #[test]
    fn short_options_resolve() {
        assert_eq!(find_short_option('r').unwrap().name, "recursive");
        assert_eq!(find_short_option('A').unwrap().name, "accept");
        assert!(find_short_option('z').is_none());
    }
}
