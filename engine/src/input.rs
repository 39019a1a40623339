//! Seed input: URL list files and the stdin reader task.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use crate::Engine;
use crate::admission::add_seed;

/// Load seeds from a URL list file, one per line, `#` comments allowed.
/// Relative entries resolve against `--base`.
pub fn load_input_file(engine: &Engine, path: &Path) -> std::io::Result<usize> {
    let text = std::fs::read_to_string(path)?;
    let base = base_url(engine);
    let mut added = 0;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if add_seed(engine, line, base.as_ref()) {
            added += 1;
        }
    }
    Ok(added)
}

/// The stdin reader: feeds seeds into the frontier while workers already
/// run. Returns when stdin closes.
pub async fn stdin_seed_task(engine: Arc<Engine>) {
    let base = base_url(&engine);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                add_seed(&engine, line, base.as_ref());
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!("reading standard input: {e}");
                break;
            }
        }
        if engine.terminated() {
            break;
        }
    }

    engine.input_finished();
}

fn base_url(engine: &Engine) -> Option<Url> {
    engine
        .config
        .base
        .as_ref()
        .and_then(|b| Url::parse(b).ok())
}
