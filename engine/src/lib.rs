//! The trawl retrieval engine.
//!
//! [`Engine`] owns every process-wide collaborator as an explicit field:
//! the frontier (blacklist + host registry + queues), the statistics, the
//! ETag and known-URL sets, the conversion records, the HSTS store, the
//! cookie jar and the plugin list. [`Engine::run`] seeds the frontier,
//! spawns the worker pool, waits for the drain, runs the link-conversion
//! post-pass and flushes the mutable stores, in that order.

mod admission;
mod auth;
mod blacklist;
mod client;
mod convert;
mod error;
mod filename;
mod filters;
mod frontier;
mod host;
mod hsts;
mod input;
mod job;
mod plugin;
mod response;
mod sink;
mod stats;
mod worker;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use trawl_config::Config;
use trawl_parse::ExtractedLink;
use trawl_types::ExitStatus;
use url::Url;

pub use admission::{AddKind, add_seed, add_url};
pub use convert::ConversionRecord;
pub use error::{ErrorKind, FetchError};
pub use filters::FilterSet;
pub use frontier::{Acquire, Frontier};
pub use hsts::{HstsStore, MemHstsStore};
pub use job::{Job, PartSet};
pub use plugin::{Plugin, UrlVerdict};
pub use sink::{FileOrigin, NoXattr, Sink, XattrWriter};
pub use stats::Stats;

pub struct Engine {
    pub config: Arc<Config>,
    pub frontier: Frontier,
    pub stats: Stats,
    pub filters: Arc<FilterSet>,
    pub sink: Sink,
    /// ETags seen on HEAD probes; stops re-crawling identical resources.
    pub etags: Mutex<HashSet<String>>,
    /// Raw reference strings already pushed through admission.
    pub known_urls: Mutex<HashSet<String>>,
    pub conversions: Mutex<Vec<ConversionRecord>>,
    pub hsts: Box<dyn HstsStore>,
    pub cookie_jar: Arc<reqwest::cookie::Jar>,
    pub plugins: Vec<Box<dyn Plugin>>,
    terminate: AtomicBool,
    pub terminate_notify: Notify,
    /// False while the stdin seed reader may still produce work.
    input_done: AtomicBool,
}

impl Engine {
    pub fn new(config: Arc<Config>) -> Result<Arc<Self>, FetchError> {
        Self::with_plugins(config, Vec::new())
    }

    pub fn with_plugins(
        config: Arc<Config>,
        plugins: Vec<Box<dyn Plugin>>,
    ) -> Result<Arc<Self>, FetchError> {
        let filters = Arc::new(FilterSet::from_config(&config)?);

        let hsts: Box<dyn HstsStore> = match &config.hsts_file {
            Some(path) => Box::new(MemHstsStore::load(path).map_err(|e| {
                FetchError::new(ErrorKind::Io, format!("cannot load HSTS store: {e}"))
            })?),
            None => Box::new(MemHstsStore::new()),
        };

        Ok(Arc::new(Self {
            frontier: Frontier::new(Arc::clone(&config)),
            stats: Stats::default(),
            sink: Sink::new(Arc::clone(&config), Arc::clone(&filters)),
            filters,
            etags: Mutex::new(HashSet::new()),
            known_urls: Mutex::new(HashSet::new()),
            conversions: Mutex::new(Vec::new()),
            hsts,
            cookie_jar: Arc::new(reqwest::cookie::Jar::default()),
            plugins,
            terminate: AtomicBool::new(false),
            terminate_notify: Notify::new(),
            input_done: AtomicBool::new(true),
            config,
        }))
    }

    /// Soft cancel: workers drain and exit; nothing new starts.
    pub fn soft_cancel(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.terminate_notify.notify_waiters();
        self.frontier.worker_notify.notify_waiters();
        self.frontier.main_notify.notify_waiters();
    }

    #[must_use]
    pub fn terminated(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    pub(crate) fn input_finished(&self) {
        self.input_done.store(true, Ordering::SeqCst);
        self.frontier.main_notify.notify_waiters();
    }

    /// Remember a saved HTML document for the link-conversion post-pass.
    pub fn record_conversion(
        &self,
        filename: std::path::PathBuf,
        base: Url,
        encoding: Option<String>,
        links: Vec<ExtractedLink>,
    ) {
        let mut conversions = self.conversions.lock().expect("conversions lock");
        conversions.push(ConversionRecord {
            filename,
            base,
            encoding,
            links,
        });
    }

    /// Run the retrieval to completion. Returns the process exit status.
    pub async fn run(self: &Arc<Self>) -> ExitStatus {
        let config = &self.config;

        let base = config.base.as_ref().and_then(|b| Url::parse(b).ok());
        for url in &config.urls {
            admission::add_seed(self, url, base.as_ref());
        }

        let mut input_task = None;
        if let Some(input) = &config.input_file {
            if input == "-" {
                use std::io::IsTerminal;
                if std::io::stdin().is_terminal() {
                    tracing::warn!("standard input is a terminal; not reading URLs from it");
                } else {
                    self.input_done.store(false, Ordering::SeqCst);
                    input_task = Some(tokio::spawn(input::stdin_seed_task(Arc::clone(self))));
                }
            } else {
                match input::load_input_file(self, std::path::Path::new(input)) {
                    Ok(n) => tracing::debug!(file = input, seeds = n, "input file loaded"),
                    Err(e) => {
                        tracing::error!(file = input, "cannot read input file: {e}");
                        self.stats.set_exit_status(ExitStatus::Io);
                    }
                }
            }
        }

        if self.frontier.finished() && self.input_done.load(Ordering::SeqCst) {
            tracing::warn!("nothing to do");
            return self.stats.exit_status();
        }

        let workers: Vec<_> = (0..config.max_threads.max(1))
            .map(|id| tokio::spawn(worker::run_worker(Arc::clone(self), id)))
            .collect();

        // The coordinator sleeps until a worker signals; the timeout keeps
        // it honest against missed notifications.
        loop {
            if self.terminated()
                || (self.frontier.finished() && self.input_done.load(Ordering::SeqCst))
            {
                break;
            }
            tokio::select! {
                () = self.frontier.main_notify.notified() => {}
                () = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
        }

        // Tell idle workers (and the input reader) the run is over.
        self.soft_cancel();
        if let Some(task) = input_task {
            task.abort();
        }
        for worker in workers {
            let _ = worker.await;
        }

        if config.convert_links && !config.delete_after {
            convert::convert_all(self);
        }

        // Mutable stores flush after the workers joined, before exit.
        if let Err(e) = self.hsts.flush() {
            tracing::warn!("HSTS store flush failed: {e}");
        }

        tracing::info!(
            downloads = self.stats.downloads(),
            redirects = self.stats.redirects(),
            not_modified = self.stats.not_modified(),
            errors = self.stats.errors(),
            chunks = self.stats.chunks(),
            bytes = self.stats.body_bytes(),
            "run finished"
        );

        self.stats.exit_status()
    }
}

/// First interrupt: soft cancel. Second: abort the process.
pub fn install_signal_handler(engine: Arc<Engine>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("interrupt received, finishing in-flight work");
        engine.soft_cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::error!("second interrupt, aborting");
            std::process::exit(1);
        }
    });
}
