//! Session lifecycle manager: one polling loop for the current job.
//!
//! `start()` cancels and joins whatever loop is running, resets all job
//! state, and spawns a fresh loop whose first query fires immediately.
//! Each loop owns its `JobContext`; the shared snapshot is only written
//! while the loop's token is live and its run id is still current, so a
//! superseded loop can never leak results into the next job.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backoff::BackoffPolicy;
use super::connection::ConnectionState;
use super::context::{JobContext, JobSnapshot};
use super::events::PollEvent;
use crate::config::PollerConfig;
use crate::error::{SessionError, SourceError};
use crate::source::{FetchResponse, JobId, ResultSource};
use crate::subtask::{SubtaskName, expected_subtasks};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// State shared between the manager and its loop task.
struct Shared {
    source: Arc<dyn ResultSource>,
    config: PollerConfig,
    backoff: BackoffPolicy,
    subtasks: Vec<SubtaskName>,
    snapshot: RwLock<JobSnapshot>,
    events: broadcast::Sender<PollEvent>,
}

/// Handle to the running loop.
struct ActiveLoop {
    run_id: Uuid,
    job_id: JobId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveLoop {
    /// Cancel and wait for the task to finish.
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!(job_id = %self.job_id, run_id = %self.run_id, "Polling loop panicked: {e}");
            }
        }
    }
}

/// Owns "the current job" and its polling loop.
pub struct SessionManager {
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveLoop>>,
}

impl SessionManager {
    /// Create a manager expecting the standard subtask enumeration.
    pub fn new(source: Arc<dyn ResultSource>, config: PollerConfig) -> Arc<Self> {
        Self::with_subtasks(source, config, expected_subtasks())
    }

    /// Create a manager expecting a custom subtask enumeration.
    pub fn with_subtasks(
        source: Arc<dyn ResultSource>,
        config: PollerConfig,
        subtasks: Vec<SubtaskName>,
    ) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            shared: Arc::new(Shared {
                source,
                backoff: BackoffPolicy::new(&config),
                config,
                subtasks,
                snapshot: RwLock::new(JobSnapshot::default()),
                events,
            }),
            active: Mutex::new(None),
        })
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.shared.events.subscribe()
    }

    /// Current read model.
    pub async fn snapshot(&self) -> JobSnapshot {
        self.shared.snapshot.read().await.clone()
    }

    /// Start polling `job_id`, replacing any running loop.
    pub async fn start(&self, job_id: impl Into<String>) -> Result<Uuid, SessionError> {
        let job_id = JobId::new(job_id)?;
        let mut active = self.active.lock().await;

        if let Some(previous) = active.take() {
            info!(
                previous_job = %previous.job_id,
                job_id = %job_id,
                "Cancelling previous polling loop"
            );
            previous.shutdown().await;
        }

        let ctx = JobContext::new(job_id.clone(), self.shared.subtasks.iter().cloned());
        let run_id = ctx.run_id;
        let cancel = CancellationToken::new();

        {
            let mut snapshot = self.shared.snapshot.write().await;
            let from = snapshot.connection;
            *snapshot = ctx.snapshot();
            let _ = self.shared.events.send(PollEvent::SessionStarted {
                run_id,
                job_id: job_id.clone(),
            });
            let _ = self.shared.events.send(PollEvent::ConnectionChanged {
                run_id,
                from,
                to: ConnectionState::Connecting,
                reason: Some("New job".to_string()),
            });
        }

        info!(job_id = %job_id, run_id = %run_id, "Polling started");

        let handle = tokio::spawn(run_poll_loop(
            Arc::clone(&self.shared),
            ctx,
            cancel.clone(),
        ));

        *active = Some(ActiveLoop {
            run_id,
            job_id,
            cancel,
            handle,
        });

        Ok(run_id)
    }

    /// Stop polling. Safe to call repeatedly or with nothing running.
    ///
    /// An error state is kept so the consumer can still offer a retry.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        let Some(previous) = active.take() else {
            return;
        };

        let run_id = previous.run_id;
        let job_id = previous.job_id.clone();
        previous.shutdown().await;

        let mut snapshot = self.shared.snapshot.write().await;
        if snapshot.run_id != Some(run_id) || !snapshot.is_active() {
            return;
        }

        let from = snapshot.connection;
        snapshot.connection = ConnectionState::Idle;
        snapshot.loading_started_at = None;

        let _ = self.shared.events.send(PollEvent::ConnectionChanged {
            run_id,
            from,
            to: ConnectionState::Idle,
            reason: Some("Stopped".to_string()),
        });
        let _ = self.shared.events.send(PollEvent::Stopped {
            run_id,
            job_id: job_id.clone(),
        });

        info!(job_id = %job_id, run_id = %run_id, "Polling stopped");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().as_ref() {
            active.cancel.cancel();
        }
    }
}

async fn run_poll_loop(shared: Arc<Shared>, mut ctx: JobContext, cancel: CancellationToken) {
    loop {
        let Some(result) = query(&shared, &mut ctx, &cancel).await else {
            debug!(job_id = %ctx.job_id, run_id = %ctx.run_id, "Polling loop cancelled");
            return;
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                fail(&shared, &mut ctx, &cancel, e).await;
                return;
            }
        };

        let stop_requested = response.is_stop();
        let hint = response.recommendation().cloned();
        let mut events = absorb(&mut ctx, response);

        if stop_requested {
            info!(job_id = %ctx.job_id, "Server signalled stop, issuing final query");
            if !publish(&shared, &ctx, &cancel, events).await {
                return;
            }

            let Some(result) = query(&shared, &mut ctx, &cancel).await else {
                return;
            };
            let events = match result {
                Ok(response) => absorb(&mut ctx, response),
                Err(e) => {
                    warn!(
                        job_id = %ctx.job_id,
                        error = %e,
                        "Final query after stop failed, finishing with merged results"
                    );
                    Vec::new()
                }
            };

            ctx.tracker.force_complete();
            complete(&shared, &mut ctx, &cancel, events, "Server signalled stop").await;
            return;
        }

        if ctx.tracker.is_complete() {
            complete(&shared, &mut ctx, &cancel, events, "All subtasks merged").await;
            return;
        }

        let delay = shared.backoff.next_delay(hint.as_ref(), ctx.empty_polls);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        events.push(PollEvent::PollScheduled {
            run_id: ctx.run_id,
            delay_ms,
            empty_polls: ctx.empty_polls,
        });
        if !publish(&shared, &ctx, &cancel, events).await {
            return;
        }

        debug!(
            job_id = %ctx.job_id,
            delay_ms,
            pending = ctx.tracker.pending().len(),
            "Next poll scheduled"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = sleep(delay) => {}
        }
    }
}

/// Issue one query, racing cancellation and, until the first response,
/// the waking timer. `None` means the loop was cancelled.
async fn query(
    shared: &Shared,
    ctx: &mut JobContext,
    cancel: &CancellationToken,
) -> Option<Result<FetchResponse, SourceError>> {
    ctx.polls += 1;
    let job_id = ctx.job_id.clone();
    let cursor = ctx.cursor.clone();
    let fetch = shared.source.fetch_results(&job_id, cursor.as_ref());
    tokio::pin!(fetch);

    loop {
        let waking_at = ctx.waking_deadline(shared.config.waking_threshold);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = &mut fetch => return Some(result),
            _ = sleep_until(waking_at.unwrap_or_else(Instant::now)), if waking_at.is_some() => {
                if let Some(event) = transition(
                    ctx,
                    ConnectionState::Waking,
                    "No response yet, service is likely cold-starting",
                ) {
                    info!(job_id = %ctx.job_id, "Analysis service is waking up");
                    if !publish(shared, ctx, cancel, vec![event]).await {
                        return None;
                    }
                }
            }
        }
    }
}

/// Fold a response into the context and describe what changed.
fn absorb(ctx: &mut JobContext, response: FetchResponse) -> Vec<PollEvent> {
    let mut events = Vec::new();

    if ctx.connection.state().is_awaiting_first_response() {
        events.extend(transition(ctx, ConnectionState::Connected, "First response"));
    }

    let outcome = ctx.apply_response(response);
    if !outcome.decode_failures.is_empty() {
        let retry: Vec<&str> = outcome
            .decode_failures
            .iter()
            .map(|f| f.subtask.as_str())
            .collect();
        info!(job_id = %ctx.job_id, subtasks = ?retry, "Undecodable subtasks stay pending for the next poll");
    }
    if outcome.merge.has_new_data() {
        events.push(PollEvent::ResultsMerged {
            run_id: ctx.run_id,
            subtasks: outcome.merge.merged,
            progress: ctx.tracker.progress(),
            pending: ctx.tracker.pending().len(),
        });
    }

    events
}

fn transition(ctx: &mut JobContext, to: ConnectionState, reason: &str) -> Option<PollEvent> {
    match ctx.connection.transition_to(to, Some(reason.to_string())) {
        Ok(t) => Some(PollEvent::ConnectionChanged {
            run_id: ctx.run_id,
            from: t.from,
            to: t.to,
            reason: t.reason,
        }),
        Err(e) => {
            warn!(job_id = %ctx.job_id, error = %e, "Rejected connection transition");
            None
        }
    }
}

async fn complete(
    shared: &Shared,
    ctx: &mut JobContext,
    cancel: &CancellationToken,
    mut events: Vec<PollEvent>,
    reason: &str,
) {
    ctx.finish_loading();
    events.extend(transition(ctx, ConnectionState::Idle, reason));
    events.push(PollEvent::Completed {
        run_id: ctx.run_id,
        job_id: ctx.job_id.clone(),
        results: ctx.results.len(),
    });

    if publish(shared, ctx, cancel, events).await {
        info!(
            job_id = %ctx.job_id,
            results = ctx.results.len(),
            polls = ctx.polls,
            reason,
            "Analysis results complete"
        );
    }
}

async fn fail(shared: &Shared, ctx: &mut JobContext, cancel: &CancellationToken, e: SourceError) {
    error!(job_id = %ctx.job_id, error = %e, "Result query failed, polling stopped");

    let message = e.to_string();
    ctx.last_error = Some(message.clone());
    ctx.finish_loading();

    let mut events: Vec<PollEvent> = transition(ctx, ConnectionState::Error, &message)
        .into_iter()
        .collect();
    events.push(PollEvent::Failed {
        run_id: ctx.run_id,
        error: message,
    });

    publish(shared, ctx, cancel, events).await;
}

/// Write the snapshot and broadcast `events`, unless this loop has been
/// superseded. Returns whether the update was applied.
async fn publish(
    shared: &Shared,
    ctx: &JobContext,
    cancel: &CancellationToken,
    events: Vec<PollEvent>,
) -> bool {
    let mut snapshot = shared.snapshot.write().await;
    if cancel.is_cancelled() || snapshot.run_id != Some(ctx.run_id) {
        debug!(run_id = %ctx.run_id, "Discarding update from superseded polling loop");
        return false;
    }

    *snapshot = ctx.snapshot();
    for event in events {
        let _ = shared.events.send(event);
    }
    true
}
