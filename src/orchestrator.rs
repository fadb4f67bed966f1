use std::future::Future;

use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, info, warn};

use crate::context::{Deadline, FlowContext};
use crate::error::FlowError;
use crate::jenkins::{BuildHandle, BuildStatus, JobClient, JobClientError, RemoteState};
use crate::progress::ProgressSink;
use crate::state_machine::{
    AttemptOutcome, BuildResult, Invocation, InvocationOutcome, InvocationStateMachine,
    ProgressRecord, Transition,
};

/// Why a remote call gave up.
enum CallError {
    Client(JobClientError),
    DeadlineExpired,
}

/// How polling one attempt ended.
enum PollEnd {
    Finished(BuildStatus),
    Failed(JobClientError),
    TimedOut,
}

/// Drives one invocation through start → poll → retry until it is terminal.
pub struct JobController<'a> {
    ctx: &'a FlowContext,
    client: &'a dyn JobClient,
    sink: &'a dyn ProgressSink,
    limiter: Option<&'a Semaphore>,
}

impl<'a> JobController<'a> {
    pub fn new(ctx: &'a FlowContext, client: &'a dyn JobClient, sink: &'a dyn ProgressSink) -> Self {
        Self {
            ctx,
            client,
            sink,
            limiter: None,
        }
    }

    /// Hold a permit from `limiter` while the invocation runs.
    pub fn with_limiter(mut self, limiter: Option<&'a Semaphore>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Run `invocation` to a terminal outcome.
    ///
    /// Returns the final `Success`/`Unstable` result, or the fatal error.
    /// Exactly one progress record is emitted either way.
    pub async fn run(
        &self,
        invocation: &mut Invocation,
        deadline: Deadline,
    ) -> Result<BuildResult, FlowError> {
        let started = Instant::now();

        let _permit = match (self.limiter, deadline.instant()) {
            (Some(limiter), Some(at)) => match timeout_at(at, limiter.acquire()).await {
                Ok(permit) => permit.ok(),
                Err(_) => return Err(self.timed_out(invocation, None, started).await),
            },
            (Some(limiter), None) => limiter.acquire().await.ok(),
            (None, _) => None,
        };

        loop {
            if deadline.expired() {
                return Err(self.timed_out(invocation, None, started).await);
            }

            let attempt = InvocationStateMachine::begin_attempt(invocation);
            info!(
                job = %invocation.job_name,
                path = %invocation.path,
                attempt,
                max_tries = invocation.policy.max_tries,
                "starting"
            );

            let outcome = match self.start(invocation, deadline).await {
                Ok(mut handle) => {
                    InvocationStateMachine::started(invocation);
                    match self.poll_until_done(invocation, &mut handle, deadline, started).await {
                        PollEnd::Finished(status) => match status.result {
                            Some(result) => AttemptOutcome::Finished {
                                result,
                                build_id: status.build_id,
                            },
                            None => AttemptOutcome::Errored("finished without a result".into()),
                        },
                        PollEnd::Failed(err) => {
                            warn!(
                                job = %invocation.job_name,
                                build = ?handle.build_id,
                                error = %err,
                                "lost track of build, stopping it"
                            );
                            self.stop_remote(invocation, &handle).await;
                            attempt_error(err)
                        }
                        PollEnd::TimedOut => {
                            return Err(self.timed_out(invocation, Some(&handle), started).await);
                        }
                    }
                }
                Err(CallError::Client(err)) => attempt_error(err),
                Err(CallError::DeadlineExpired) => {
                    return Err(self.timed_out(invocation, None, started).await);
                }
            };

            match InvocationStateMachine::next(invocation, outcome) {
                Transition::Retry {
                    next_attempt,
                    reason,
                } => {
                    log_retry(invocation, next_attempt, &reason);
                }
                Transition::Complete(outcome) => {
                    self.emit(invocation, started);
                    return match outcome {
                        InvocationOutcome::Resolved { result } => Ok(result),
                        InvocationOutcome::Failed { last } => Err(FlowError::FailedJob {
                            job: invocation.job_name.clone(),
                            path: invocation.path.clone(),
                            attempts: invocation.attempts,
                            last,
                        }),
                        InvocationOutcome::Rejected => Err(FlowError::Unauthorized {
                            job: invocation.job_name.clone(),
                            path: invocation.path.clone(),
                            message: invocation
                                .history
                                .last()
                                .and_then(|a| a.error.clone())
                                .unwrap_or_else(|| "credentials refused".into()),
                        }),
                        InvocationOutcome::TimedOut => Err(self.timeout_error(invocation, started)),
                    };
                }
            }
        }
    }

    async fn start(
        &self,
        invocation: &Invocation,
        deadline: Deadline,
    ) -> Result<BuildHandle, CallError> {
        let name = invocation
            .job_name
            .strip_prefix(&self.ctx.job_name_prefix)
            .unwrap_or(&invocation.job_name);
        self.call_with_retry(deadline, &invocation.job_name, "start", || {
            self.client
                .start(name, &self.ctx.job_name_prefix, &invocation.params)
        })
        .await
    }

    async fn poll_until_done(
        &self,
        invocation: &mut Invocation,
        handle: &mut BuildHandle,
        deadline: Deadline,
        started: Instant,
    ) -> PollEnd {
        let mut last_report = Instant::now();
        loop {
            if deadline.expired() {
                return PollEnd::TimedOut;
            }

            let polled = {
                let current: &BuildHandle = handle;
                self.call_with_retry(deadline, &invocation.job_name, "poll", || {
                    self.client.poll(current)
                })
                .await
            };
            let status = match polled {
                Ok(status) => status,
                Err(CallError::Client(err)) => return PollEnd::Failed(err),
                Err(CallError::DeadlineExpired) => return PollEnd::TimedOut,
            };

            if let Some(build_id) = status.build_id
                && handle.build_id.is_none()
            {
                handle.build_id = Some(build_id);
                InvocationStateMachine::bind_build(invocation, build_id);
                debug!(job = %invocation.job_name, build = build_id, "build assigned");
            }

            if status.state == RemoteState::Finished {
                return PollEnd::Finished(status);
            }

            debug!(job = %invocation.job_name, state = ?status.state, "polled");
            if !self.ctx.report_interval.is_zero()
                && last_report.elapsed() >= self.ctx.report_interval
            {
                info!(
                    job = %invocation.job_name,
                    build = ?handle.build_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "still running"
                );
                last_report = Instant::now();
            }

            sleep_until(deadline.clamp(Instant::now() + self.ctx.poll_interval)).await;
        }
    }

    /// Call `op`, retrying transient errors up to the configured bound.
    async fn call_with_retry<T, F, Fut>(
        &self,
        deadline: Deadline,
        job: &str,
        what: &str,
        mut op: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, JobClientError>>,
    {
        let mut failures = 0;
        loop {
            let response = match deadline.instant() {
                Some(at) => match timeout_at(at, op()).await {
                    Ok(response) => response,
                    Err(_) => return Err(CallError::DeadlineExpired),
                },
                None => op().await,
            };
            match response {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && failures < self.ctx.transient_retries => {
                    failures += 1;
                    warn!(
                        job,
                        request = what,
                        try_number = failures,
                        max = self.ctx.transient_retries,
                        error = %err,
                        "transient error, retrying"
                    );
                    sleep_until(deadline.clamp(Instant::now() + self.ctx.transient_retry_delay))
                        .await;
                    if deadline.expired() {
                        return Err(CallError::DeadlineExpired);
                    }
                }
                Err(err) => return Err(CallError::Client(err)),
            }
        }
    }

    async fn timed_out(
        &self,
        invocation: &mut Invocation,
        handle: Option<&BuildHandle>,
        started: Instant,
    ) -> FlowError {
        InvocationStateMachine::time_out(invocation);
        warn!(
            job = %invocation.job_name,
            path = %invocation.path,
            attempt = invocation.attempts,
            "deadline elapsed while job in flight"
        );
        if let Some(handle) = handle {
            self.stop_remote(invocation, handle).await;
        }
        self.emit(invocation, started);
        self.timeout_error(invocation, started)
    }

    /// Best effort: the outcome of the invocation does not depend on it.
    async fn stop_remote(&self, invocation: &Invocation, handle: &BuildHandle) {
        if let Err(err) = self.client.stop(handle).await {
            debug!(job = %invocation.job_name, error = %err, "could not stop remote build");
        }
    }

    fn timeout_error(&self, invocation: &Invocation, started: Instant) -> FlowError {
        FlowError::Timeout {
            job: invocation.job_name.clone(),
            path: invocation.path.clone(),
            attempts: invocation.attempts,
            elapsed: started.elapsed(),
        }
    }

    fn emit(&self, invocation: &Invocation, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.sink
            .record(&ProgressRecord::from_invocation(invocation, elapsed_ms));
    }
}

fn attempt_error(err: JobClientError) -> AttemptOutcome {
    match err {
        JobClientError::Unauthorized { .. } => AttemptOutcome::Unauthorized(err.to_string()),
        other => AttemptOutcome::Errored(other.to_string()),
    }
}

fn log_retry(invocation: &Invocation, next_attempt: u32, reason: &str) {
    warn!(
        job = %invocation.job_name,
        path = %invocation.path,
        next_attempt,
        max_tries = invocation.policy.max_tries,
        reason,
        "retrying"
    );
    if invocation.failed_attempts > invocation.policy.max_fails {
        warn!(
            job = %invocation.job_name,
            failed = invocation.failed_attempts,
            max_fails = invocation.policy.max_fails,
            "more failed attempts than max_fails"
        );
    }
}
