//! Waiting for asynchronous jobs.
//!
//! The status endpoint is polled at a fixed interval until the job reaches a
//! terminal state or the poll budget runs out. Some status/message pairs look
//! final but are not: the gateway reports `Success` before the result object
//! is attached, and `Error` / `"Job Not Found."` right after a job is created.
//! Those are listed in [`PollConfig::pending_rules`] so they can be adjusted
//! without touching the loop.

use serde_json::Value;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::decode::decode_json;
use crate::error::{Error, Result};
use crate::job::{JobHandle, JobState, JobStatus, StatusEnvelope};
use crate::transport::{HttpRequest, RequestBody, Transport};
use crate::util::{path_segment, urljoin};

pub const DEFAULT_MAX_POLLS: usize = 180;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const JOB_NOT_FOUND: &str = "Job Not Found.";

/// A status that must be treated as "still running".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRule {
    /// `state` reported with no usable result payload.
    EmptyResult(JobState),
    /// `state` reported with exactly this message.
    Message { state: JobState, message: String },
}

impl PendingRule {
    pub fn matches(&self, status: &JobStatus) -> bool {
        match self {
            Self::EmptyResult(state) => status.state == *state && status.payload().is_none(),
            Self::Message { state, message } => {
                status.state == *state && status.message.as_deref() == Some(message.as_str())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Upper bound on status requests for one job.
    pub max_polls: usize,
    /// Pause between consecutive status requests.
    pub interval: Duration,
    pub pending_rules: Vec<PendingRule>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_polls: DEFAULT_MAX_POLLS,
            interval: DEFAULT_POLL_INTERVAL,
            pending_rules: vec![
                PendingRule::EmptyResult(JobState::Success),
                PendingRule::Message {
                    state: JobState::Error,
                    message: JOB_NOT_FOUND.to_string(),
                },
            ],
        }
    }
}

impl PollConfig {
    pub fn with_max_polls(mut self, max_polls: usize) -> Self {
        self.max_polls = max_polls;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_pending_rule(mut self, rule: PendingRule) -> Self {
        self.pending_rules.push(rule);
        self
    }
}

/// Cooperative cancellation for [`JobPoller::wait`].
///
/// Clones share state; cancelling any clone wakes every waiter.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `dur` or until cancelled. Returns `true` if cancelled.
    pub fn sleep(&self, dur: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Too far out to represent: wait for cancellation alone.
        let Some(deadline) = Instant::now().checked_add(dur) else {
            while !*cancelled {
                cancelled = cvar.wait(cancelled).unwrap_or_else(PoisonError::into_inner);
            }
            return true;
        };
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancelled = cvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *cancelled
    }
}

/// What a single status observation means for the loop.
#[derive(Debug)]
pub(crate) enum Verdict {
    Continue,
    Done(Value),
    Failed(Error),
}

/// Polls one job's status endpoint until it settles.
///
/// A poller holds no per-job state, so one instance can serve many jobs from
/// many threads; each call to [`wait`](Self::wait) keeps its own counter.
pub struct JobPoller<'a> {
    transport: &'a dyn Transport,
    config: &'a PollConfig,
}

impl<'a> JobPoller<'a> {
    pub fn new(transport: &'a dyn Transport, config: &'a PollConfig) -> Self {
        Self { transport, config }
    }

    /// Blocks until the job finishes and returns its result payload.
    ///
    /// `base` is the gateway address; status is read from `{base}/job/{job_id}`.
    /// Transport, HTTP and decode failures on any poll end the wait.
    pub fn wait(&self, job_id: &str, base: &str, auth: &str, cancel: &CancelToken) -> Result<Value> {
        let job = JobHandle::new(job_id)?;
        let url = urljoin(base, &format!("job/{}", path_segment(job.as_str())));
        let mut last_state: Option<JobState> = None;

        for poll in 1..=self.config.max_polls {
            if cancel.is_cancelled() {
                return Err(self.cancelled(&job));
            }

            debug!(job_id = %job, poll, "polling job status");
            let resp = self.transport.send(HttpRequest {
                method: reqwest::Method::GET,
                url: url.clone(),
                auth: auth.to_string(),
                body: RequestBody::Empty,
            })?;
            if cancel.is_cancelled() {
                return Err(self.cancelled(&job));
            }
            if !resp.is_success() {
                return Err(Error::HttpStatus {
                    method: reqwest::Method::GET,
                    url,
                    status: resp.status,
                    message: crate::error::extract_backend_message(&resp.body),
                    body: resp.body,
                });
            }
            let decoded = decode_json::<StatusEnvelope>(resp.body)?;
            let raw = decoded.raw_text();
            let status = JobStatus::from(decoded.value);

            if last_state.as_ref() != Some(&status.state) {
                info!(job_id = %job, state = %status.state, "job state changed");
                last_state = Some(status.state.clone());
            }

            match self.classify(&job, status, raw) {
                Verdict::Done(result) => return Ok(result),
                Verdict::Failed(err) => return Err(err),
                Verdict::Continue => {}
            }

            if poll < self.config.max_polls && cancel.sleep(self.config.interval) {
                return Err(self.cancelled(&job));
            }
        }

        warn!(job_id = %job, polls = self.config.max_polls, "job never completed");
        Err(Error::Timeout {
            job_id: job.to_string(),
            polls: self.config.max_polls,
        })
    }

    pub(crate) fn classify(&self, job: &JobHandle, status: JobStatus, raw: String) -> Verdict {
        if status.state.is_in_progress()
            || self.config.pending_rules.iter().any(|r| r.matches(&status))
        {
            return Verdict::Continue;
        }

        match status.state {
            JobState::Success => match status.result {
                Some(result) if crate::job::has_payload(&result) => Verdict::Done(result),
                // Success without a result is not trusted, whatever the rules say.
                _ => Verdict::Continue,
            },
            JobState::Fail => Verdict::Failed(Error::JobFailed {
                job_id: job.to_string(),
                body: raw,
            }),
            JobState::Error => Verdict::Failed(Error::JobError {
                job_id: job.to_string(),
                message: status.message,
                body: raw,
            }),
            JobState::Unknown(s) => Verdict::Failed(Error::UnknownStatus {
                job_id: job.to_string(),
                status: s,
                body: raw,
            }),
            JobState::Submitted | JobState::Running | JobState::Pending => Verdict::Continue,
        }
    }

    fn cancelled(&self, job: &JobHandle) -> Error {
        warn!(job_id = %job, "wait cancelled");
        Error::Cancelled {
            job_id: job.to_string(),
        }
    }
}
