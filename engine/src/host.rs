//! Per-origin scheduling state.
//!
//! One [`Host`] exists per `(scheme, host, port)` triple, created lazily on
//! the first job targeting it. The host owns its job queue; the frontier
//! owns the hosts. Failure accounting, robots gating and pacing all hang
//! off this struct.

use std::collections::VecDeque;
use std::time::Instant;

use trawl_parse::RobotsRules;
use trawl_types::{CanonicalUrl, Scheme};

use crate::job::Job;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl HostKey {
    #[must_use]
    pub fn of(url: &CanonicalUrl) -> Self {
        Self {
            scheme: url.scheme(),
            host: url.host().to_string(),
            port: url.port(),
        }
    }
}

impl std::fmt::Display for HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[derive(Debug)]
pub struct Host {
    pub key: HostKey,
    pub queue: VecDeque<Job>,
    pub failures: u32,
    /// Set once retries are exhausted; the host takes no further jobs.
    pub finally_failed: bool,
    /// Parsed robots rules, present once the robots job finished.
    pub robots: Option<RobotsRules>,
    /// True while a robots.txt job is queued or in flight; every other job
    /// on this host is held back until it clears.
    pub robots_pending: bool,
    /// Pacing: no job is handed out before this instant.
    pub blocked_until: Option<Instant>,
    pub in_flight: usize,
}

impl Host {
    #[must_use]
    pub fn new(key: HostKey) -> Self {
        Self {
            key,
            queue: VecDeque::new(),
            failures: 0,
            finally_failed: false,
            robots: None,
            robots_pending: false,
            blocked_until: None,
            in_flight: 0,
        }
    }

    /// Whether a job could be handed out right now, and if not because of
    /// pacing, when to look again.
    #[must_use]
    pub fn available_at(&self, now: Instant) -> Availability {
        if self.finally_failed || self.queue.is_empty() {
            return Availability::Nothing;
        }

        if let Some(until) = self.blocked_until
            && until > now
        {
            return Availability::Blocked(until);
        }

        // While robots is pending only the robots job itself may run.
        if self.robots_pending {
            let front_is_robots = self.queue.front().is_some_and(|j| j.robotstxt);
            if !front_is_robots {
                return Availability::Nothing;
            }
        }

        Availability::Ready
    }

    /// Push a job, keeping the robots job ahead of everything else.
    pub fn push(&mut self, job: Job) {
        if job.robotstxt {
            self.robots_pending = true;
            self.queue.push_front(job);
        } else {
            self.queue.push_back(job);
        }
    }

    /// Requeue a job for retry; it goes to the front so the retry happens
    /// before new work on this host.
    pub fn push_retry(&mut self, job: Job) {
        self.queue.push_front(job);
    }

    pub fn pop(&mut self) -> Option<Job> {
        let job = self.queue.pop_front()?;
        self.in_flight += 1;
        Some(job)
    }

    /// Drop all queued jobs; returns how many were discarded.
    pub fn discard_queue(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        n
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// A job can be popped now.
    Ready,
    /// Pacing delay; retry at the given instant.
    Blocked(Instant),
    /// Nothing to hand out (empty, failed, or robots-gated).
    Nothing,
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use trawl_types::CanonicalUrl;

    use super::{Availability, Host, HostKey};
    use crate::job::Job;

    fn host() -> Host {
        let url = CanonicalUrl::parse("http://h/").unwrap();
        Host::new(HostKey::of(&url))
    }

    fn job(path: &str) -> Job {
        Job::new(CanonicalUrl::parse(&format!("http://h{path}")).unwrap())
    }

    #[test]
    fn robots_job_jumps_the_queue_and_gates_the_rest() {
        let mut host = host();
        host.push(job("/a"));
        let mut robots = job("/robots.txt");
        robots.robotstxt = true;
        host.push(robots);

        assert_eq!(host.available_at(Instant::now()), Availability::Ready);
        let first = host.pop().unwrap();
        assert!(first.robotstxt);

        // /a is held back while robots is pending
        assert_eq!(host.available_at(Instant::now()), Availability::Nothing);
        host.robots_pending = false;
        assert_eq!(host.available_at(Instant::now()), Availability::Ready);
    }

    #[test]
    fn pacing_reports_the_wakeup_instant() {
        let mut host = host();
        host.push(job("/a"));
        let until = Instant::now() + Duration::from_secs(5);
        host.blocked_until = Some(until);
        assert_eq!(host.available_at(Instant::now()), Availability::Blocked(until));
    }

    #[test]
    fn finally_failed_hosts_offer_nothing() {
        let mut host = host();
        host.push(job("/a"));
        host.finally_failed = true;
        assert_eq!(host.available_at(Instant::now()), Availability::Nothing);
    }

    #[test]
    fn fifo_within_a_host() {
        let mut host = host();
        host.push(job("/1"));
        host.push(job("/2"));
        assert_eq!(host.pop().unwrap().url.path(), "/1");
        assert_eq!(host.pop().unwrap().url.path(), "/2");
        assert_eq!(host.in_flight, 2);
    }
}
