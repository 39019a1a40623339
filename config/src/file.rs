//! rc-file loading.
//!
//! Line-oriented `name value` or `name = value`; single- or double-quoted
//! values; a trailing backslash continues onto the next line; `#` starts a
//! comment unless the previous line ended with a backslash; `include path`
//! loads another file, capped at 20 levels.

use std::path::Path;

use crate::options::{apply_option, find_option_relaxed};
use crate::{Config, ConfigError};

const MAX_INCLUDE_DEPTH: usize = 20;

/// Load one rc file into `config`.
pub fn load_rc_file(config: &mut Config, path: &Path) -> Result<(), ConfigError> {
    load_at_depth(config, path, 0)
}

fn load_at_depth(config: &mut Config, path: &Path, depth: usize) -> Result<(), ConfigError> {
    if depth >= MAX_INCLUDE_DEPTH {
        return Err(ConfigError::IncludeDepth(MAX_INCLUDE_DEPTH));
    }

    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    tracing::debug!(path = %path.display(), depth, "loading rc file");

    let mut lineno = 0usize;
    let mut pending = String::new();
    let mut continued = false;

    for raw_line in text.lines() {
        lineno += 1;

        // A '#' opens a comment only when this line is not a continuation.
        let line = if continued {
            raw_line
        } else {
            raw_line.split('#').next().unwrap_or("")
        };

        let (line, continues) = match line.trim_end().strip_suffix('\\') {
            Some(head) => (head, true),
            None => (line.trim_end(), false),
        };

        pending.push_str(line);
        continued = continues;
        if continues {
            continue;
        }

        let logical = std::mem::take(&mut pending);
        let logical = logical.trim();
        if logical.is_empty() {
            continue;
        }

        apply_line(config, path, logical, lineno, depth)?;
    }

    if !pending.trim().is_empty() {
        // Trailing backslash on the last line; treat what we have as a line.
        let logical = pending.trim().to_string();
        apply_line(config, path, &logical, lineno, depth)?;
    }

    Ok(())
}

fn apply_line(
    config: &mut Config,
    path: &Path,
    line: &str,
    lineno: usize,
    depth: usize,
) -> Result<(), ConfigError> {
    let (name, rest) = split_name(line).ok_or_else(|| ConfigError::MalformedLine {
        path: path.display().to_string(),
        line: lineno,
    })?;

    let value = unquote(rest);

    if name.eq_ignore_ascii_case("include") {
        let include_path = resolve_include(path, &value);
        return load_at_depth(config, &include_path, depth + 1);
    }

    let spec = find_option_relaxed(name)
        .ok_or_else(|| ConfigError::UnknownOption(name.to_string()))?;

    let value_opt = if value.is_empty() { None } else { Some(value.as_str()) };
    apply_option(config, spec, value_opt, false)
}

/// Split `name value` or `name = value` into name and raw value text.
fn split_name(line: &str) -> Option<(&str, &str)> {
    let name_end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if name.is_empty() {
        return None;
    }

    let rest = line[name_end..].trim_start();
    let rest = rest.strip_prefix('=').map_or(rest, str::trim_start);
    Some((name, rest))
}

fn unquote(value: &str) -> String {
    let v = value.trim();
    for quote in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(quote) && v.ends_with(quote) {
            return v[1..v.len() - 1].to_string();
        }
    }
    v.to_string()
}

/// Relative include paths resolve against the including file's directory.
fn resolve_include(including: &Path, target: &str) -> std::path::PathBuf {
    let target_path = Path::new(target);
    if target_path.is_absolute() {
        return target_path.to_path_buf();
    }
    including
        .parent()
        .map_or_else(|| target_path.to_path_buf(), |dir| dir.join(target_path))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::load_rc_file;
    use crate::{Config, ConfigError};

    fn write_rc(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn name_value_and_equals_forms() {
        let dir = TempDir::new().unwrap();
        let rc = write_rc(
            &dir,
            "rc",
            "max_threads 8\nlevel = 3\nuser-agent = \"my agent/1.0\"\n",
        );
        let mut config = Config::default();
        load_rc_file(&mut config, &rc).unwrap();
        assert_eq!(config.max_threads, 8);
        assert_eq!(config.level, 3);
        assert_eq!(config.user_agent, "my agent/1.0");
    }

    #[test]
    fn comments_and_blank_lines() {
        let dir = TempDir::new().unwrap();
        let rc = write_rc(&dir, "rc", "# a comment\n\nrecursive on # trailing\n");
        let mut config = Config::default();
        load_rc_file(&mut config, &rc).unwrap();
        assert!(config.recursive);
    }

    #[test]
    fn backslash_continuation() {
        let dir = TempDir::new().unwrap();
        let rc = write_rc(&dir, "rc", "accept *.html,\\\n*.css\n");
        let mut config = Config::default();
        load_rc_file(&mut config, &rc).unwrap();
        assert_eq!(config.accept_patterns, vec!["*.html", "*.css"]);
    }

    #[test]
    fn single_quoted_values() {
        let dir = TempDir::new().unwrap();
        let rc = write_rc(&dir, "rc", "default_page 'start page.html'\n");
        let mut config = Config::default();
        load_rc_file(&mut config, &rc).unwrap();
        assert_eq!(config.default_page, "start page.html");
    }

    #[test]
    fn include_resolves_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        write_rc(&dir, "inner", "level 9\n");
        let rc = write_rc(&dir, "outer", "include inner\nrecursive on\n");
        let mut config = Config::default();
        load_rc_file(&mut config, &rc).unwrap();
        assert_eq!(config.level, 9);
        assert!(config.recursive);
    }

    #[test]
    fn include_depth_capped() {
        let dir = TempDir::new().unwrap();
        let rc = write_rc(&dir, "self", "include self\n");
        let mut config = Config::default();
        let err = load_rc_file(&mut config, &rc).unwrap_err();
        assert!(matches!(err, ConfigError::IncludeDepth(_)));
    }

    #[test]
    fn unknown_name_is_an_error() {
        let dir = TempDir::new().unwrap();
        let rc = write_rc(&dir, "rc", "not_an_option 1\n");
        let mut config = Config::default();
        assert!(matches!(
            load_rc_file(&mut config, &rc),
            Err(ConfigError::UnknownOption(_))
        ));
    }

    #[test]
    fn case_and_separator_insensitive_names() {
        let dir = TempDir::new().unwrap();
        let rc = write_rc(&dir, "rc", "Adjust_Extension on\nMAX-THREADS 2\n");
        let mut config = Config::default();
        load_rc_file(&mut config, &rc).unwrap();
        assert!(config.adjust_extension);
        assert_eq!(config.max_threads, 2);
    }
}
