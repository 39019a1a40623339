//! Literal parsers for option values.
//!
//! Booleans accept `y/n/1/0/yes/no/on/off`. Sizes take `k/m/g/t` suffixes
//! (binary multiples). Durations take `s/m/h/d` suffixes and default to
//! seconds. `inf`/`infinity` means "no limit"; for durations a value of `0`
//! also means infinite, a deliberate backward-compatibility choice.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("invalid boolean '{0}' (expected y/n/1/0/yes/no/on/off)")]
    Bool(String),
    #[error("invalid size '{0}' (expected a number with optional k/m/g/t suffix)")]
    Size(String),
    #[error("invalid duration '{0}' (expected a number with optional s/m/h/d suffix)")]
    Duration(String),
}

pub fn parse_bool_literal(value: &str) -> Result<bool, ValueError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "on" | "1" => Ok(true),
        "n" | "no" | "off" | "0" => Ok(false),
        _ => Err(ValueError::Bool(value.to_string())),
    }
}

/// Parse a byte-count literal. `None` means unlimited.
pub fn parse_size_value(value: &str) -> Result<Option<u64>, ValueError> {
    let v = value.trim();
    if v.eq_ignore_ascii_case("inf") || v.eq_ignore_ascii_case("infinity") {
        return Ok(None);
    }

    let (digits, multiplier) = split_suffix(v, |c| match c {
        'k' | 'K' => Some(1u64 << 10),
        'm' | 'M' => Some(1 << 20),
        'g' | 'G' => Some(1 << 30),
        't' | 'T' => Some(1 << 40),
        _ => None,
    });

    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|_| ValueError::Size(value.to_string()))?;
    n.checked_mul(multiplier)
        .map(Some)
        .ok_or_else(|| ValueError::Size(value.to_string()))
}

/// Parse a duration literal. `None` means infinite (no timeout).
pub fn parse_duration_value(value: &str) -> Result<Option<Duration>, ValueError> {
    let v = value.trim();
    if v.eq_ignore_ascii_case("inf") || v.eq_ignore_ascii_case("infinity") {
        return Ok(None);
    }

    let (digits, seconds_per_unit) = split_suffix(v, |c| match c {
        's' | 'S' => Some(1u64),
        'm' | 'M' => Some(60),
        'h' | 'H' => Some(3600),
        'd' | 'D' => Some(86400),
        _ => None,
    });

    let n: f64 = digits
        .trim()
        .parse()
        .map_err(|_| ValueError::Duration(value.to_string()))?;
    if !n.is_finite() || n < 0.0 {
        return Err(ValueError::Duration(value.to_string()));
    }

    // Timeout 0 is treated as infinite.
    if n == 0.0 {
        return Ok(None);
    }

    Ok(Some(Duration::from_secs_f64(n * seconds_per_unit as f64)))
}

fn split_suffix(v: &str, map: impl Fn(char) -> Option<u64>) -> (&str, u64) {
    if let Some(last) = v.chars().last()
        && let Some(mult) = map(last)
    {
        return (&v[..v.len() - last.len_utf8()], mult);
    }
    (v, 1)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{parse_bool_literal, parse_duration_value, parse_size_value};

    #[test]
    fn bool_literals() {
        for yes in ["y", "yes", "on", "1", "YES", "On"] {
            assert_eq!(parse_bool_literal(yes), Ok(true), "{yes}");
        }
        for no in ["n", "no", "off", "0", "No", "OFF"] {
            assert_eq!(parse_bool_literal(no), Ok(false), "{no}");
        }
        assert!(parse_bool_literal("maybe").is_err());
    }

    #[test]
    fn size_suffixes() {
        assert_eq!(parse_size_value("10").unwrap(), Some(10));
        assert_eq!(parse_size_value("2k").unwrap(), Some(2048));
        assert_eq!(parse_size_value("3M").unwrap(), Some(3 << 20));
        assert_eq!(parse_size_value("1g").unwrap(), Some(1 << 30));
        assert_eq!(parse_size_value("1T").unwrap(), Some(1 << 40));
        assert_eq!(parse_size_value("inf").unwrap(), None);
        assert_eq!(parse_size_value("Infinity").unwrap(), None);
        assert!(parse_size_value("10x").is_err());
        assert!(parse_size_value("").is_err());
    }

    #[test]
    fn duration_suffixes() {
        assert_eq!(
            parse_duration_value("30").unwrap(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_duration_value("1.5s").unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            parse_duration_value("2m").unwrap(),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            parse_duration_value("1h").unwrap(),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            parse_duration_value("1d").unwrap(),
            Some(Duration::from_secs(86400))
        );
    }

    #[test]
    fn zero_duration_is_infinite() {
        assert_eq!(parse_duration_value("0").unwrap(), None);
        assert_eq!(parse_duration_value("inf").unwrap(), None);
    }
}
