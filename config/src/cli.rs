//! Command-line parsing.
//!
//! `--option[=value]`, `--no-option`, short clusters `-rkx`, short options
//! with attached or following values (`-l3`, `-l 3`), `--` ends option
//! processing, everything else is a seed URL. Long names are matched
//! case-sensitively; rc files are the relaxed side.

use crate::options::{OptionKind, apply_option, find_option, find_short_option};
use crate::{Config, ConfigError};

/// What the command line asked for beyond plain configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliOutcome {
    Run,
    PrintHelp,
    PrintVersion,
}

/// Parse `args` (without the program name) into `config`.
pub fn parse_command_line(
    config: &mut Config,
    args: impl IntoIterator<Item = String>,
) -> Result<CliOutcome, ConfigError> {
    let mut args = args.into_iter();
    let mut options_done = false;

    while let Some(arg) = args.next() {
        if options_done || !arg.starts_with('-') || arg == "-" {
            config.urls.push(arg);
            continue;
        }

        if arg == "--" {
            options_done = true;
            continue;
        }

        if let Some(long) = arg.strip_prefix("--") {
            match long {
                "help" => return Ok(CliOutcome::PrintHelp),
                "version" => return Ok(CliOutcome::PrintVersion),
                _ => {}
            }

            let (name, value) = match long.split_once('=') {
                Some((n, v)) => (n, Some(v.to_string())),
                None => (long, None),
            };

            // `--no-clobber` style; an exact option name always wins over
            // prefix stripping.
            let (name, invert) = if find_option(name).is_some() {
                (name, false)
            } else if let Some(base) = name.strip_prefix("no-") {
                (base, true)
            } else {
                (name, false)
            };

            let spec = find_option(name)
                .ok_or_else(|| ConfigError::UnknownOption(format!("--{name}")))?;

            // Non-boolean options may take the next argument as their value.
            let takes_value =
                !matches!(spec.kind, OptionKind::Bool(_) | OptionKind::Composite(_));
            let value = match value {
                Some(v) => Some(v),
                None if takes_value => args.next(),
                None => None,
            };

            apply_option(config, spec, value.as_deref(), invert)?;
            continue;
        }

        // Short option cluster.
        let cluster: Vec<char> = arg[1..].chars().collect();
        let mut idx = 0;
        while idx < cluster.len() {
            let ch = cluster[idx];
            let spec = find_short_option(ch)
                .ok_or_else(|| ConfigError::UnknownOption(format!("-{ch}")))?;

            match &spec.kind {
                OptionKind::Bool(_) | OptionKind::Composite(_) => {
                    apply_option(config, spec, None, false)?;
                    idx += 1;
                }
                _ => {
                    // The rest of the cluster, or the next argument, is the value.
                    let rest: String = cluster[idx + 1..].iter().collect();
                    let value = if rest.is_empty() { args.next() } else { Some(rest) };
                    apply_option(config, spec, value.as_deref(), false)?;
                    idx = cluster.len();
                }
            }
        }
    }

    Ok(CliOutcome::Run)
}
