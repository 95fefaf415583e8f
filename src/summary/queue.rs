//! Summary request queue
//!
//! A single worker task owns every pending job, so exactly one summarization
//! call is in flight at a time and jobs run in arrival order. A job hit by a
//! rate limit goes back to the tail of the queue until its retries run out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::{SummaryError, Summarizer};
use super::transcript::build_transcript;
use super::{Summary, EMPTY_SESSION_SUMMARY, FAILED_SUMMARY, FALLBACK_TITLE, RATE_LIMITED_SUMMARY};
use crate::config::SummarySettings;

/// Longest server-requested backoff honoured between jobs
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Where summaries read transcripts from and are written back to
#[async_trait]
pub trait SummaryTarget: Send + Sync {
    /// The last `max_chunks` output chunks, or `None` if the session is gone
    async fn transcript(&self, id: Uuid, max_chunks: usize) -> Option<Vec<String>>;

    /// Store and announce a summary; `false` if the session is gone
    async fn apply_summary(&self, id: Uuid, summary: &Summary) -> bool;
}

/// How a summary request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// The API produced a summary
    Generated(Summary),
    /// The session had no output yet; no API call was made
    EmptySession(Summary),
    /// The call failed; `summary` holds the placeholder that was applied
    Failed { summary: Summary, reason: String },
    /// The session no longer existed when the job was picked up
    SessionGone,
}

impl SummaryOutcome {
    /// The summary to store, if any
    pub fn summary(&self) -> Option<&Summary> {
        match self {
            SummaryOutcome::Generated(summary)
            | SummaryOutcome::EmptySession(summary)
            | SummaryOutcome::Failed { summary, .. } => Some(summary),
            SummaryOutcome::SessionGone => None,
        }
    }

    fn failed(placeholder: &str, reason: impl Into<String>) -> Self {
        SummaryOutcome::Failed {
            summary: Summary::new(FALLBACK_TITLE, placeholder),
            reason: reason.into(),
        }
    }
}

/// Lifecycle of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    InFlight,
    RetryQueued,
    Resolved,
}

/// One pending summary request
struct SummaryJob {
    session_id: Uuid,
    retries: u32,
    state: JobState,
    reply: Option<oneshot::Sender<SummaryOutcome>>,
}

impl SummaryJob {
    fn new(session_id: Uuid) -> (Self, SummaryHandle) {
        let (tx, rx) = oneshot::channel();
        let job = Self {
            session_id,
            retries: 0,
            state: JobState::Queued,
            reply: Some(tx),
        };
        (job, SummaryHandle { session_id, rx })
    }

    fn resolve(&mut self, outcome: SummaryOutcome) {
        self.state = JobState::Resolved;
        if let Some(reply) = self.reply.take() {
            // The requester may have stopped waiting
            let _ = reply.send(outcome);
        }
    }
}

/// Completion handle returned by [`SummaryQueue::enqueue`]
#[derive(Debug)]
pub struct SummaryHandle {
    session_id: Uuid,
    rx: oneshot::Receiver<SummaryOutcome>,
}

impl SummaryHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Wait for the job to resolve
    ///
    /// Always completes: a job dropped without an answer (worker gone)
    /// resolves as a failure.
    pub async fn wait(self) -> SummaryOutcome {
        self.rx.await.unwrap_or_else(|_| {
            SummaryOutcome::failed(FAILED_SUMMARY, "summary worker stopped")
        })
    }
}

/// Queue settings extracted from [`SummarySettings`]
#[derive(Debug, Clone)]
struct QueueConfig {
    max_retries: u32,
    delay: Duration,
    transcript_chunks: usize,
    transcript_max_chars: usize,
}

/// Cloneable front end of the summary worker
#[derive(Clone)]
pub struct SummaryQueue {
    tx: mpsc::UnboundedSender<SummaryJob>,
}

impl SummaryQueue {
    /// Spawn the worker task and return the queue front end
    ///
    /// The worker exits once every queue clone is dropped and the backlog
    /// has drained.
    pub fn start(
        settings: &SummarySettings,
        summarizer: Arc<dyn Summarizer>,
        target: Arc<dyn SummaryTarget>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            config: QueueConfig {
                max_retries: settings.max_retries,
                delay: Duration::from_millis(settings.queue_delay_ms),
                transcript_chunks: settings.transcript_chunks,
                transcript_max_chars: settings.transcript_max_chars,
            },
            summarizer,
            target,
        };
        tokio::spawn(worker.run(rx));
        Self { tx }
    }

    /// Queue a summary request for a session
    pub fn enqueue(&self, session_id: Uuid) -> SummaryHandle {
        let (job, handle) = SummaryJob::new(session_id);
        if let Err(mpsc::error::SendError(mut job)) = self.tx.send(job) {
            warn!("Summary worker is gone, dropping request for {}", session_id);
            job.resolve(SummaryOutcome::failed(FAILED_SUMMARY, "summary worker stopped"));
        } else {
            debug!("Queued summary for session {}", session_id);
        }
        handle
    }
}

struct Worker {
    config: QueueConfig,
    summarizer: Arc<dyn Summarizer>,
    target: Arc<dyn SummaryTarget>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<SummaryJob>) {
        let mut pending: VecDeque<SummaryJob> = VecDeque::new();

        loop {
            drain_into(&mut rx, &mut pending);

            let mut job = match pending.pop_front() {
                Some(job) => job,
                None => match rx.recv().await {
                    Some(job) => job,
                    None => break,
                },
            };

            let backoff = self.process(&mut job).await;

            // Jobs that arrived meanwhile go ahead of the retry
            drain_into(&mut rx, &mut pending);
            if job.state == JobState::RetryQueued {
                pending.push_back(job);
            }

            if !pending.is_empty() {
                let delay = backoff.map_or(self.config.delay, |b| b.max(self.config.delay));
                tokio::time::sleep(delay).await;
            }
        }

        debug!("Summary worker stopped");
    }

    /// Run one job; returns the server's backoff hint when it was re-queued
    async fn process(&self, job: &mut SummaryJob) -> Option<Duration> {
        job.state = JobState::InFlight;
        let id = job.session_id;

        let Some(chunks) = self.target.transcript(id, self.config.transcript_chunks).await else {
            debug!("Session {} gone before its summary ran", id);
            job.resolve(SummaryOutcome::SessionGone);
            return None;
        };

        let transcript = build_transcript(&chunks, self.config.transcript_max_chars);
        let outcome = if transcript.trim().is_empty() {
            SummaryOutcome::EmptySession(Summary::new(FALLBACK_TITLE, EMPTY_SESSION_SUMMARY))
        } else {
            match self.summarizer.summarize(&transcript).await {
                Ok(summary) => SummaryOutcome::Generated(summary),
                Err(SummaryError::RateLimited { retry_after })
                    if job.retries < self.config.max_retries =>
                {
                    job.retries += 1;
                    job.state = JobState::RetryQueued;
                    info!(
                        "Summary for {} rate limited, retry {}/{}",
                        id, job.retries, self.config.max_retries
                    );
                    return Some(retry_after.map_or(Duration::ZERO, |d| d.min(MAX_RETRY_AFTER)));
                }
                Err(e @ SummaryError::RateLimited { .. }) => {
                    warn!("Summary for {} gave up after {} retries", id, job.retries);
                    SummaryOutcome::failed(RATE_LIMITED_SUMMARY, e.to_string())
                }
                Err(e) => {
                    warn!("Summary for {} failed: {}", id, e);
                    SummaryOutcome::failed(FAILED_SUMMARY, e.to_string())
                }
            }
        };

        if let Some(summary) = outcome.summary() {
            if !self.target.apply_summary(id, summary).await {
                debug!("Session {} deleted while summarizing, result discarded", id);
            }
        }

        job.resolve(outcome);
        None
    }
}

fn drain_into(rx: &mut mpsc::UnboundedReceiver<SummaryJob>, pending: &mut VecDeque<SummaryJob>) {
    while let Ok(job) = rx.try_recv() {
        pending.push_back(job);
    }
}
