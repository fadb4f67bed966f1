use std::fmt;

use serde::{Deserialize, Serialize};

use super::job::{AttemptRecord, Invocation, InvocationOutcome};
use super::result::BuildResult;

/// Lifecycle of an invocation.
///
/// PENDING → STARTING → POLLING → (STARTING again on retry) → terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Pending,
    Starting,
    Polling,
    Resolved,
    Failed,
    TimedOut,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvocationState::Resolved | InvocationState::Failed | InvocationState::TimedOut
        )
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationState::Pending => write!(f, "PENDING"),
            InvocationState::Starting => write!(f, "STARTING"),
            InvocationState::Polling => write!(f, "POLLING"),
            InvocationState::Resolved => write!(f, "RESOLVED"),
            InvocationState::Failed => write!(f, "FAILED"),
            InvocationState::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Finished {
        result: BuildResult,
        build_id: Option<u64>,
    },
    /// Start or poll could not complete after transient retries.
    Errored(String),
    /// Credentials refused; never retried.
    Unauthorized(String),
}

/// Decision taken after an attempt ends.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Start attempt number `next_attempt`.
    Retry { next_attempt: u32, reason: String },
    Complete(InvocationOutcome),
}

/// Applies the retry policy to an invocation's attempts.
pub struct InvocationStateMachine;

impl InvocationStateMachine {
    /// Record the start of a new attempt.
    pub fn begin_attempt(invocation: &mut Invocation) -> u32 {
        invocation.attempts += 1;
        invocation.state = InvocationState::Starting;
        invocation.history.push(AttemptRecord {
            attempt: invocation.attempts,
            build_id: None,
            result: None,
            error: None,
        });
        invocation.attempts
    }

    /// The remote build exists and is being polled.
    pub fn started(invocation: &mut Invocation) {
        invocation.state = InvocationState::Polling;
    }

    pub fn bind_build(invocation: &mut Invocation, build_id: u64) {
        if let Some(current) = invocation.history.last_mut() {
            current.build_id = Some(build_id);
        }
    }

    /// Compute and apply the transition for a finished attempt.
    ///
    /// - `Success` and `Unstable` complete on first occurrence.
    /// - `Failed`/`Aborted` and attempt errors retry while attempts remain.
    /// - `Unauthorized` completes as rejected immediately.
    pub fn next(invocation: &mut Invocation, outcome: AttemptOutcome) -> Transition {
        if let Some(current) = invocation.history.last_mut() {
            match &outcome {
                AttemptOutcome::Finished { result, build_id } => {
                    current.result = Some(*result);
                    current.build_id = build_id.or(current.build_id);
                }
                AttemptOutcome::Errored(reason) | AttemptOutcome::Unauthorized(reason) => {
                    current.error = Some(reason.clone());
                }
            }
        }

        let transition = match outcome {
            AttemptOutcome::Finished { result, .. } if !result.is_failure() => {
                Transition::Complete(InvocationOutcome::Resolved { result })
            }
            AttemptOutcome::Finished { result, .. } => {
                Self::handle_failure(invocation, format!("finished with {result}"))
            }
            AttemptOutcome::Errored(reason) => Self::handle_failure(invocation, reason),
            AttemptOutcome::Unauthorized(_) => Transition::Complete(InvocationOutcome::Rejected),
        };

        match &transition {
            Transition::Retry { .. } => invocation.state = InvocationState::Starting,
            Transition::Complete(outcome) => Self::finish(invocation, *outcome),
        }

        transition
    }

    /// Mark the invocation as timed out.
    pub fn time_out(invocation: &mut Invocation) {
        Self::finish(invocation, InvocationOutcome::TimedOut);
    }

    fn finish(invocation: &mut Invocation, outcome: InvocationOutcome) {
        invocation.state = match outcome {
            InvocationOutcome::Resolved { .. } => InvocationState::Resolved,
            InvocationOutcome::TimedOut => InvocationState::TimedOut,
            InvocationOutcome::Failed { .. } | InvocationOutcome::Rejected => {
                InvocationState::Failed
            }
        };
        invocation.outcome = Some(outcome);
    }

    fn handle_failure(invocation: &mut Invocation, reason: String) -> Transition {
        invocation.failed_attempts += 1;
        if invocation.attempts < invocation.policy.max_tries {
            Transition::Retry {
                next_attempt: invocation.attempts + 1,
                reason,
            }
        } else {
            let last = match invocation.history.last() {
                Some(AttemptRecord { result: Some(r), .. }) => Some(*r),
                _ => None,
            };
            Transition::Complete(InvocationOutcome::Failed { last })
        }
    }
}
