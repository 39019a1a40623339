//! trawl - a multi-threaded recursive HTTP/HTTPS retriever.
//!
//! Startup order: tracing, rc files (system, user, `--config` extras),
//! environment proxies, command line, then the engine. The process exit
//! code is the engine's folded status; option and rc-file problems exit
//! with the parse/init code before any network activity.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use trawl_config::{CliOutcome, Config, load_rc_file, parse_command_line};
use trawl_engine::{Engine, install_signal_handler};
use trawl_types::ExitStatus;

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// rc files in application order: system first, user second, so the user
/// wins. `SYSTEM_TRAWLRC` / `TRAWLRC` override the conventional paths.
fn rc_file_chain() -> Vec<PathBuf> {
    let mut chain = Vec::new();

    match std::env::var("SYSTEM_TRAWLRC") {
        Ok(path) if !path.is_empty() => chain.push(PathBuf::from(path)),
        _ => {
            let system = PathBuf::from("/etc/trawlrc");
            if system.is_file() {
                chain.push(system);
            }
        }
    }

    match std::env::var("TRAWLRC") {
        Ok(path) if !path.is_empty() => chain.push(PathBuf::from(path)),
        _ => {
            if let Ok(home) = std::env::var("HOME") {
                let user = PathBuf::from(home).join(".trawlrc");
                if user.is_file() {
                    chain.push(user);
                }
            }
        }
    }

    chain
}

fn load_configuration() -> Result<(Config, CliOutcome), trawl_config::ConfigError> {
    let mut config = Config::default();

    for rc in rc_file_chain() {
        load_rc_file(&mut config, &rc)?;
    }

    let outcome = parse_command_line(&mut config, std::env::args().skip(1))?;

    // --config files load after the defaults but can't see later CLI
    // options; re-apply the command line so it keeps the last word.
    if !config.config_files.is_empty() {
        let extras = std::mem::take(&mut config.config_files);
        for rc in &extras {
            load_rc_file(&mut config, rc)?;
        }
        config.urls.clear();
        parse_command_line(&mut config, std::env::args().skip(1))?;
    }

    config.finalize_from_env();
    Ok((config, outcome))
}

fn print_help() {
    println!("Usage: trawl [OPTION]... [URL]...");
    println!();
    println!("Recursively retrieve HTTP/HTTPS resources into a local mirror.");
    println!();
    println!("Options:");
    for spec in trawl_config::options_table() {
        match spec.short {
            Some(short) => println!("  -{short}, --{:<24} {}", spec.name, spec.help),
            None => println!("      --{:<24} {}", spec.name, spec.help),
        }
    }
}

fn main() -> ExitCode {
    let (config, outcome) = match load_configuration() {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("trawl: {e}");
            return ExitCode::from(ExitStatus::Parse.code());
        }
    };

    init_tracing(config.verbose);

    match outcome {
        CliOutcome::PrintHelp => {
            print_help();
            return ExitCode::SUCCESS;
        }
        CliOutcome::PrintVersion => {
            println!("trawl {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        CliOutcome::Run => {}
    }

    if config.urls.is_empty() && config.input_file.is_none() {
        eprintln!("trawl: missing URL");
        eprintln!("Usage: trawl [OPTION]... [URL]...");
        return ExitCode::from(ExitStatus::Parse.code());
    }

    let threads = config.max_threads.max(1);
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads.min(32))
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("trawl: cannot start runtime: {e}");
            return ExitCode::from(ExitStatus::Generic.code());
        }
    };

    let status = runtime.block_on(async move {
        let engine = match Engine::new(Arc::new(config)) {
            Ok(engine) => engine,
            Err(e) => {
                tracing::error!("initialization failed: {e}");
                return ExitStatus::Parse;
            }
        };

        install_signal_handler(Arc::clone(&engine));
        engine.run().await
    });

    ExitCode::from(status.code())
}
