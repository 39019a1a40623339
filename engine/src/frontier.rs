//! The frontier: every host's job queue plus the admission blacklist,
//! under one lock.
//!
//! Workers pull work with [`Frontier::acquire`] and give it back with one
//! of the release operations; the disposition decides whether the job is
//! gone, requeued with a pacing delay, or discarded with its host. Two
//! notifications fan out from here: `worker_notify` wakes sleeping workers
//! when work arrives, `main_notify` wakes the coordinator when work
//! completes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use trawl_config::Config;
use trawl_parse::RobotsRules;
use trawl_types::CanonicalUrl;

use crate::blacklist::Blacklist;
use crate::host::{Availability, Host, HostKey};
use crate::job::Job;

#[derive(Debug, Default)]
pub struct FrontierState {
    pub blacklist: Blacklist,
    pub hosts: HashMap<HostKey, Host>,
    /// Seed directories for the no-parent rule.
    pub parents: Vec<CanonicalUrl>,
    /// Jobs queued or in flight; zero means the run is drained.
    active_jobs: usize,
}

impl FrontierState {
    /// Get or lazily create the host bucket for a URL.
    ///
    /// Returns whether the bucket is new; the caller schedules the robots
    /// job for new hosts when recursion wants it.
    pub fn host_entry(&mut self, url: &CanonicalUrl) -> (&mut Host, bool) {
        let key = HostKey::of(url);
        let mut is_new = false;
        let host = self.hosts.entry(key.clone()).or_insert_with(|| {
            is_new = true;
            Host::new(key)
        });
        (host, is_new)
    }

    pub fn enqueue(&mut self, job: Job) {
        let (host, _) = self.host_entry(&job.url);
        host.push(job);
        self.active_jobs += 1;
    }
}

/// What `acquire` handed back.
#[derive(Debug)]
pub enum Acquire {
    Job(Job),
    /// Nothing available; sleep until the instant (pacing) or until
    /// notified (None).
    Sleep(Option<Instant>),
    /// The frontier is drained; no job will ever appear again.
    Finished,
}

pub struct Frontier {
    config: Arc<Config>,
    state: Mutex<FrontierState>,
    pub worker_notify: Notify,
    pub main_notify: Notify,
}

impl Frontier {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            state: Mutex::new(FrontierState::default()),
            worker_notify: Notify::new(),
            main_notify: Notify::new(),
        }
    }

    /// Run a closure under the frontier lock.
    ///
    /// Admission needs the blacklist, the host registry and the queues in
    /// one critical section; this is the door.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut FrontierState) -> R) -> R {
        let mut state = self.state.lock().expect("frontier lock");
        f(&mut state)
    }

    /// Enqueue a job and wake one worker.
    pub fn enqueue(&self, job: Job) {
        self.with_state(|state| state.enqueue(job));
        self.worker_notify.notify_one();
    }

    /// Hand out a job, preferring the worker's current host so connections
    /// get reused.
    ///
    /// With `only_preferred` the scan is limited to that host: a worker
    /// with responses in flight keeps its batch on one origin, exactly as
    /// one connection implies.
    pub fn acquire(&self, preferred: Option<&HostKey>, only_preferred: bool) -> Acquire {
        let now = Instant::now();
        let mut state = self.state.lock().expect("frontier lock");

        if state.active_jobs == 0 {
            return Acquire::Finished;
        }

        if let Some(key) = preferred
            && let Some(host) = state.hosts.get_mut(key)
            && host.available_at(now) == Availability::Ready
        {
            let job = host.pop().expect("ready host has a job");
            return Acquire::Job(job);
        }

        if only_preferred {
            let hint = preferred
                .and_then(|key| state.hosts.get(key))
                .and_then(|host| match host.available_at(now) {
                    Availability::Blocked(until) => Some(until),
                    _ => None,
                });
            return Acquire::Sleep(hint);
        }

        let mut nearest: Option<Instant> = None;
        let mut ready: Option<HostKey> = None;
        for (key, host) in &state.hosts {
            match host.available_at(now) {
                Availability::Ready => {
                    ready = Some(key.clone());
                    break;
                }
                Availability::Blocked(until) => {
                    nearest = Some(nearest.map_or(until, |n| n.min(until)));
                }
                Availability::Nothing => {}
            }
        }

        if let Some(key) = ready {
            let host = state.hosts.get_mut(&key).expect("host exists");
            let job = host.pop().expect("ready host has a job");
            return Acquire::Job(job);
        }

        Acquire::Sleep(nearest)
    }

    /// The job finished for good (success, redirect folded, or moved on).
    pub fn release_completed(&self, key: &HostKey) {
        self.with_state(|state| {
            if let Some(host) = state.hosts.get_mut(key) {
                host.in_flight = host.in_flight.saturating_sub(1);
            }
            state.active_jobs = state.active_jobs.saturating_sub(1);
        });
        self.main_notify.notify_waiters();
        self.worker_notify.notify_one();
    }

    /// Requeue the job; the host is paced for `delay` when given.
    ///
    /// A job coming back to a finally-failed host is dropped instead: the
    /// host will never hand out work again.
    pub fn release_retry(&self, job: Job, delay: Option<Duration>) {
        let key = HostKey::of(&job.url);
        let dropped = self.with_state(|state| {
            let host = state
                .hosts
                .entry(key.clone())
                .or_insert_with(|| Host::new(key.clone()));
            host.in_flight = host.in_flight.saturating_sub(1);
            if host.finally_failed {
                state.active_jobs = state.active_jobs.saturating_sub(1);
                return true;
            }
            if let Some(delay) = delay {
                host.blocked_until = Some(Instant::now() + delay);
            }
            host.push_retry(job);
            false
        });
        if dropped {
            self.main_notify.notify_waiters();
        }
        self.worker_notify.notify_waiters();
    }

    /// The job is gone and counts as a failure.
    pub fn release_failed(&self, key: &HostKey) {
        self.release_completed(key);
    }

    /// Record a transport failure against the host. Once `config.tries` is
    /// exceeded the host is finally failed: its queue is discarded.
    /// Returns true when this call tipped it over.
    pub fn host_error(&self, key: &HostKey) -> bool {
        let tries = self.config.tries;
        let discarded = self.with_state(|state| {
            let Some(host) = state.hosts.get_mut(key) else {
                return None;
            };
            host.failures += 1;
            if tries > 0 && host.failures >= tries && !host.finally_failed {
                host.finally_failed = true;
                let n = host.discard_queue();
                state.active_jobs = state.active_jobs.saturating_sub(n);
                Some(n)
            } else {
                None
            }
        });

        if let Some(n) = discarded {
            tracing::error!(host = %key, dropped = n, "host failed finally");
            self.main_notify.notify_waiters();
            self.worker_notify.notify_waiters();
            true
        } else {
            false
        }
    }

    /// Fail the host immediately, dropping its queue. Used for TLS
    /// failures, which no amount of retrying fixes.
    pub fn host_fail_finally(&self, key: &HostKey) {
        let dropped = self.with_state(|state| {
            let Some(host) = state.hosts.get_mut(key) else {
                return 0;
            };
            host.finally_failed = true;
            let n = host.discard_queue();
            state.active_jobs = state.active_jobs.saturating_sub(n);
            n
        });
        if dropped > 0 {
            tracing::error!(host = %key, dropped, "host failed finally");
        }
        self.main_notify.notify_waiters();
        self.worker_notify.notify_waiters();
    }

    /// Any 2xx/3xx from the host clears its failure counter.
    pub fn host_ok(&self, key: &HostKey) {
        self.with_state(|state| {
            if let Some(host) = state.hosts.get_mut(key) {
                host.failures = 0;
            }
        });
    }

    /// The robots job for `key` finished (or definitively failed).
    ///
    /// Held jobs are re-checked against the new rules; disallowed ones are
    /// dropped here, with seeds exempt.
    pub fn robots_done(&self, key: &HostKey, rules: Option<RobotsRules>) {
        self.with_state(|state| {
            let Some(host) = state.hosts.get_mut(key) else {
                return;
            };
            host.robots_pending = false;
            let mut dropped = 0;
            if let Some(rules) = rules {
                let before = host.queue.len();
                host.queue.retain(|job| {
                    let keep = job.requested_by_user || !rules.is_disallowed(job.url.path());
                    if !keep {
                        tracing::info!(url = %job.url, "URL not followed (disallowed by robots.txt)");
                    }
                    keep
                });
                dropped = before - host.queue.len();
                host.robots = Some(rules);
            }
            state.active_jobs = state.active_jobs.saturating_sub(dropped);
        });
        self.worker_notify.notify_waiters();
        self.main_notify.notify_waiters();
    }

    pub fn add_parent(&self, url: CanonicalUrl) {
        self.with_state(|state| state.parents.push(url));
    }

    /// True when no job is queued or in flight anywhere.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.with_state(|state| state.active_jobs == 0)
    }

    /// Drop every queued job (quota reached or soft cancel); in-flight jobs
    /// finish on their own.
    pub fn discard_queued(&self) {
        self.with_state(|state| {
            let mut dropped = 0;
            for host in state.hosts.values_mut() {
                dropped += host.discard_queue();
            }
            state.active_jobs = state.active_jobs.saturating_sub(dropped);
        });
        self.main_notify.notify_waiters();
        self.worker_notify.notify_waiters();
    }

    /// The pause before a retry, honoring `waitretry` and `random_wait`.
    #[must_use]
    pub fn retry_delay(&self) -> Option<Duration> {
        let base = self.config.waitretry?;
        Some(jitter(base, self.config.random_wait))
    }

    /// The pause between requests to one host, honoring `wait` and
    /// `random_wait`.
    #[must_use]
    pub fn request_pause(&self) -> Option<Duration> {
        let base = self.config.wait?;
        Some(jitter(base, self.config.random_wait))
    }
}

/// 0.5x..1.5x jitter when `random_wait` is on.
fn jitter(base: Duration, random_wait: bool) -> Duration {
    if random_wait {
        base.mul_f64(0.5 + rand::random::<f64>())
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use trawl_config::Config;
    use trawl_types::CanonicalUrl;

    use super::{Acquire, Frontier, jitter};
    use crate::host::HostKey;
    use crate::job::Job;

    fn frontier() -> Frontier {
        Frontier::new(Arc::new(Config::default()))
    }

    fn job(url: &str) -> Job {
        Job::new(CanonicalUrl::parse(url).unwrap())
    }

    #[test]
    fn acquire_prefers_the_workers_host() {
        let frontier = frontier();
        frontier.enqueue(job("http://a/1"));
        frontier.enqueue(job("http://b/1"));

        let key_b = HostKey::of(&CanonicalUrl::parse("http://b/").unwrap());
        let Acquire::Job(got) = frontier.acquire(Some(&key_b), false) else {
            panic!("expected a job");
        };
        assert_eq!(got.url.host(), "b");
    }

    #[test]
    fn drains_to_finished() {
        let frontier = frontier();
        frontier.enqueue(job("http://a/1"));
        assert!(!frontier.finished());

        let Acquire::Job(got) = frontier.acquire(None, false) else {
            panic!("expected a job");
        };
        // in flight: not finished yet
        assert!(!frontier.finished());

        frontier.release_completed(&HostKey::of(&got.url));
        assert!(frontier.finished());
        assert!(matches!(frontier.acquire(None, false), Acquire::Finished));
    }

    #[test]
    fn retry_requeues_with_pacing() {
        let frontier = frontier();
        frontier.enqueue(job("http://a/1"));
        let Acquire::Job(got) = frontier.acquire(None, false) else {
            panic!("expected a job");
        };

        frontier.release_retry(got, Some(Duration::from_secs(60)));
        assert!(!frontier.finished());
        // paced: nothing available, wakeup hint returned
        match frontier.acquire(None, false) {
            Acquire::Sleep(Some(_)) => {}
            other => panic!("expected pacing sleep, got {other:?}"),
        }
    }

    #[test]
    fn exceeded_tries_discards_the_host() {
        let config = Config {
            tries: 2,
            ..Config::default()
        };
        let frontier = Frontier::new(Arc::new(config));
        frontier.enqueue(job("http://a/1"));
        frontier.enqueue(job("http://a/2"));

        let key = HostKey::of(&CanonicalUrl::parse("http://a/").unwrap());
        assert!(!frontier.host_error(&key));
        assert!(frontier.host_error(&key));
        assert!(frontier.finished());
    }

    #[test]
    fn robots_completion_filters_held_jobs() {
        let frontier = frontier();
        frontier.enqueue(job("http://a/private/secret"));
        frontier.enqueue(job("http://a/public/page"));

        let key = HostKey::of(&CanonicalUrl::parse("http://a/").unwrap());
        let rules = trawl_parse::parse_robots("User-agent: *\nDisallow: /private/", "trawl");
        frontier.robots_done(&key, Some(rules));

        let Acquire::Job(got) = frontier.acquire(None, false) else {
            panic!("expected a job");
        };
        assert_eq!(got.url.path(), "/public/page");
        frontier.release_completed(&key);
        assert!(frontier.finished());
    }

    #[test]
    fn jitter_stays_in_half_to_threehalves() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let j = jitter(base, true);
            assert!(j >= Duration::from_millis(500), "{j:?}");
            assert!(j <= Duration::from_millis(1500), "{j:?}");
        }
        assert_eq!(jitter(base, false), base);
    }
}
