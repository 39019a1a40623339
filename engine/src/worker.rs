//! The downloader worker.
//!
//! Each worker drives the four-state machine `GET_JOB → GET_RESPONSE →
//! ERROR → EXIT`. In `GET_JOB` it pulls work (restricted to its current
//! origin while responses are in flight), paces itself, sends the request
//! and decides whether to keep batching (HTTP/2 window) or drain. In
//! `GET_RESPONSE` it awaits one response and hands it to dispatch. `ERROR`
//! closes the connection, charges the host and puts the in-flight jobs
//! back. The terminate flag short-circuits everything into `EXIT`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use reqwest::Method;

use crate::Engine;
use crate::client::OriginClient;
use crate::error::{ErrorKind, FetchError, classify_transport_error};
use crate::frontier::Acquire;
use crate::host::HostKey;
use crate::job::Job;
use crate::response::{Verdict, dispatch};

/// Fallback poll interval while idle, so a missed notify never wedges.
const IDLE_POLL: Duration = Duration::from_millis(250);

enum State {
    GetJob,
    GetResponse,
    Error { job: Job, error: FetchError },
}

type SendResult = (u64, Result<reqwest::Response, reqwest::Error>);

pub async fn run_worker(engine: Arc<Engine>, id: usize) {
    let mut conn: Option<OriginClient> = None;
    let mut pending: FuturesUnordered<BoxFuture<'static, SendResult>> = FuturesUnordered::new();
    let mut in_flight: HashMap<u64, (Job, bool)> = HashMap::new();
    let mut next_token = 0u64;
    let mut max_pending = 1usize;
    let mut state = State::GetJob;

    loop {
        if engine.terminated() {
            break;
        }

        // Take the state out; arms that do not set a successor stay in
        // GET_JOB, which is also the machine's resting state.
        match std::mem::replace(&mut state, State::GetJob) {
            State::GetJob => {
                // Quota is a soft stop: nothing new starts, in-flight work
                // finishes.
                if engine.stats.quota_reached(engine.config.quota) {
                    engine.frontier.discard_queued();
                    if in_flight.is_empty() {
                        break;
                    }
                    state = State::GetResponse;
                    continue;
                }

                let preferred = conn.as_ref().map(|c| c.key.clone());
                match engine
                    .frontier
                    .acquire(preferred.as_ref(), !in_flight.is_empty())
                {
                    Acquire::Job(job) => {
                        let key = HostKey::of(&job.url);

                        if conn.as_ref().is_some_and(|c| c.key != key) {
                            conn = None;
                        }
                        if conn.is_none() {
                            match OriginClient::connect(key.clone(), &engine.config, &engine.cookie_jar)
                                .await
                            {
                                Ok(client) => conn = Some(client),
                                Err(error) => {
                                    state = State::Error { job, error };
                                    continue;
                                }
                            }
                        }
                        let client = conn.as_ref().expect("connection just ensured");

                        // Pacing between requests to the same host. On
                        // HTTP/2 this applies per job dispatch.
                        if let Some(pause) = engine.frontier.request_pause() {
                            tokio::time::sleep(pause).await;
                            if engine.terminated() {
                                engine.frontier.release_retry(job, None);
                                break;
                            }
                        }

                        let was_head = job.head_first;
                        let method = if was_head { Method::HEAD } else { Method::GET };

                        let if_modified_since = (engine.config.timestamping
                            && !was_head
                            && job.part.is_none())
                        .then(|| {
                            job.local_filename
                                .as_deref()
                                .and_then(crate::sink::existing_mtime)
                        })
                        .flatten();

                        let request =
                            client.request(method, &job, &engine.config, if_modified_since);

                        let token = next_token;
                        next_token += 1;
                        in_flight.insert(token, (job, was_head));
                        pending.push(Box::pin(async move { (token, request.send().await) }));

                        // The batch window: several in-flight requests only
                        // make sense on a multiplexed connection with no
                        // pacing and no range assembly going on.
                        max_pending = if engine.config.wait.is_some()
                            || !client.http2
                            || in_flight.values().any(|(j, _)| j.part.is_some())
                        {
                            1
                        } else {
                            engine.config.http2_request_window.max(1)
                        };

                        if in_flight.len() >= max_pending {
                            state = State::GetResponse;
                        }
                    }
                    Acquire::Sleep(hint) => {
                        if !in_flight.is_empty() {
                            state = State::GetResponse;
                        } else {
                            conn = None;
                            wait_for_work(&engine, hint).await;
                        }
                    }
                    Acquire::Finished => {
                        if in_flight.is_empty() {
                            break;
                        }
                        state = State::GetResponse;
                    }
                }
            }

            State::GetResponse => {
                // Interrupts abort blocking receives: dropping the futures
                // aborts their connections.
                let next = tokio::select! {
                    next = pending.next() => next,
                    () = engine.terminate_notify.notified() => continue,
                };
                let Some((token, result)) = next else {
                    state = State::GetJob;
                    continue;
                };
                let (job, was_head) = in_flight.remove(&token).expect("in-flight job");
                let key = HostKey::of(&job.url);

                match result {
                    Err(e) => {
                        let error = classify_transport_error(&e);
                        state = State::Error { job, error };
                    }
                    Ok(response) => {
                        if let Some(conn) = conn.as_mut() {
                            conn.observe_version(response.version());
                        }

                        let outcome = dispatch(&engine, job, response, was_head).await;
                        if outcome.close_connection {
                            conn = None;
                        }

                        match outcome.verdict {
                            Verdict::Done => engine.frontier.release_completed(&key),
                            Verdict::Requeue(job, delay) => {
                                engine.frontier.release_retry(job, delay);
                            }
                            Verdict::Transport(job, error) => {
                                state = State::Error { job, error };
                                continue;
                            }
                        }

                        state = State::GetJob;
                    }
                }
            }

            State::Error { job, error } => {
                tracing::debug!(worker = id, url = %job.url, "download error: {error}");
                conn = None;
                pending.clear();

                let key = HostKey::of(&job.url);
                if !matches!(error.kind, ErrorKind::Interrupted) {
                    engine.stats.set_exit_status(error.exit_status());
                }

                let finally_failed = if error.kind == ErrorKind::Tls {
                    engine.frontier.host_fail_finally(&key);
                    true
                } else {
                    engine.frontier.host_error(&key)
                };

                if finally_failed || !error.retryable {
                    engine.stats.add_error();
                    tracing::error!(url = %job.url, "giving up: {error}");
                    if job.robotstxt {
                        engine
                            .frontier
                            .robots_done(&HostKey::of(&job.original_url), None);
                    }
                    engine.frontier.release_failed(&key);
                } else {
                    engine.frontier.release_retry(job, engine.frontier.retry_delay());
                }

                // The connection died under the whole batch; everything
                // else in flight goes back to the queue.
                for (_, (job, _)) in in_flight.drain() {
                    engine.frontier.release_retry(job, None);
                }

                state = State::GetJob;
            }
        }
    }

    // EXIT: anything still in flight goes back so the accounting stays
    // truthful even on interrupt.
    pending.clear();
    for (_, (job, _)) in in_flight.drain() {
        engine.frontier.release_retry(job, None);
    }
    drop(conn);

    tracing::debug!(worker = id, "worker exiting");
    // A terminating worker wakes the others so they notice too.
    engine.frontier.worker_notify.notify_waiters();
    engine.frontier.main_notify.notify_waiters();
}

/// Idle wait: until notified, until the pacing hint, or the fallback poll.
async fn wait_for_work(engine: &Engine, hint: Option<Instant>) {
    let sleep_for = hint
        .map(|at| at.saturating_duration_since(Instant::now()))
        .unwrap_or(IDLE_POLL)
        .max(Duration::from_millis(1));

    tokio::select! {
        () = engine.frontier.worker_notify.notified() => {}
        () = engine.terminate_notify.notified() => {}
        () = tokio::time::sleep(sleep_for) => {}
    }
}
