use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::BuildResult;
use super::state::InvocationState;
use crate::path::ScopePath;

/// A scalar job parameter value. Values are forwarded as-is; no coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Integer(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::String(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

/// Flat mapping of parameter names to scalar values.
pub type Params = BTreeMap<String, ParamValue>;

/// Retry budget for one invocation.
///
/// `max_tries` caps the total number of attempts. `max_fails` is only
/// reported: exceeding it logs a warning but never stops a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub max_fails: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 1,
            max_fails: 0,
        }
    }
}

/// A job as declared inside a scope, before it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub max_tries: Option<u32>,
    #[serde(default)]
    pub max_fails: Option<u32>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Params::new(),
            max_tries: None,
            max_fails: None,
        }
    }

    pub fn param(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn max_tries(&mut self, max_tries: u32) -> &mut Self {
        self.max_tries = Some(max_tries);
        self
    }

    pub fn max_fails(&mut self, max_fails: u32) -> &mut Self {
        self.max_fails = Some(max_fails);
        self
    }

    /// Resolve this job's budget against the inherited default.
    pub fn retry_policy(&self, inherited: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_tries: self.max_tries.unwrap_or(inherited.max_tries).max(1),
            max_fails: self.max_fails.unwrap_or(inherited.max_fails),
        }
    }
}

/// Terminal outcome of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum InvocationOutcome {
    /// Finished with a non-failing result (`Success` or `Unstable`).
    Resolved { result: BuildResult },
    /// Retry budget exhausted; `last` is the result of the final attempt if it ran.
    Failed { last: Option<BuildResult> },
    /// The effective deadline elapsed first.
    TimedOut,
    /// The remote service refused our credentials.
    Rejected,
}

impl InvocationOutcome {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, InvocationOutcome::Resolved { .. })
    }
}

impl fmt::Display for InvocationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationOutcome::Resolved { result } => write!(f, "{result}"),
            InvocationOutcome::Failed { last: Some(result) } => write!(f, "failed ({result})"),
            InvocationOutcome::Failed { last: None } => write!(f, "failed (not started)"),
            InvocationOutcome::TimedOut => write!(f, "timed out"),
            InvocationOutcome::Rejected => write!(f, "rejected"),
        }
    }
}

/// One attempt of an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub build_id: Option<u64>,
    pub result: Option<BuildResult>,
    /// Start or poll error that ended the attempt without a result.
    pub error: Option<String>,
}

/// One logical request to run a remote job, possibly over several attempts.
///
/// Owned by exactly one job controller for its whole life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub id: String,
    /// Remote job name including the flow's prefix.
    pub job_name: String,
    pub params: Params,
    pub path: ScopePath,
    pub policy: RetryPolicy,
    pub state: InvocationState,
    pub attempts: u32,
    pub failed_attempts: u32,
    pub history: Vec<AttemptRecord>,
    pub outcome: Option<InvocationOutcome>,
    pub created_at: DateTime<Utc>,
}

impl Invocation {
    pub fn new(job_name: String, params: Params, path: ScopePath, policy: RetryPolicy) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_name,
            params,
            path,
            policy,
            state: InvocationState::Pending,
            attempts: 0,
            failed_attempts: 0,
            history: Vec::new(),
            outcome: None,
            created_at: Utc::now(),
        }
    }

    pub fn build_id(&self) -> Option<u64> {
        self.history.last().and_then(|a| a.build_id)
    }
}

/// Progress event emitted once per resolved invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub invocation_id: String,
    pub job_name: String,
    pub path: ScopePath,
    pub attempt: u32,
    pub build_id: Option<u64>,
    pub elapsed_ms: u64,
    pub outcome: InvocationOutcome,
    pub resolved_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn from_invocation(invocation: &Invocation, elapsed_ms: u64) -> Self {
        Self {
            invocation_id: invocation.id.clone(),
            job_name: invocation.job_name.clone(),
            path: invocation.path.clone(),
            attempt: invocation.attempts,
            build_id: invocation.build_id(),
            elapsed_ms,
            outcome: invocation
                .outcome
                .unwrap_or(InvocationOutcome::Failed { last: None }),
            resolved_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_spec_builder_collects_params() {
        let mut spec = JobSpec::new("quick");
        spec.param("password", "X").param("c1", true).param("n", 3i64);
        assert_eq!(spec.params.len(), 3);
        assert_eq!(spec.params["c1"], ParamValue::Bool(true));
        assert_eq!(spec.params["n"].to_string(), "3");
    }

    #[test]
    fn retry_policy_prefers_own_settings() {
        let inherited = RetryPolicy {
            max_tries: 3,
            max_fails: 1,
        };
        let mut spec = JobSpec::new("j1");
        assert_eq!(spec.retry_policy(inherited), inherited);

        spec.max_tries(5);
        assert_eq!(spec.retry_policy(inherited).max_tries, 5);
        assert_eq!(spec.retry_policy(inherited).max_fails, 1);
    }

    #[test]
    fn zero_max_tries_still_allows_one_attempt() {
        let mut spec = JobSpec::new("j1");
        spec.max_tries(0);
        assert_eq!(spec.retry_policy(RetryPolicy::default()).max_tries, 1);
    }

    #[test]
    fn invocation_defaults() {
        let inv = Invocation::new(
            "pre_j1".into(),
            Params::new(),
            ScopePath::root().child(0),
            RetryPolicy::default(),
        );
        assert_eq!(inv.state, InvocationState::Pending);
        assert_eq!(inv.attempts, 0);
        assert!(inv.outcome.is_none());
        assert!(inv.build_id().is_none());
    }

    #[test]
    fn outcome_fatality() {
        assert!(!InvocationOutcome::Resolved {
            result: BuildResult::Unstable
        }
        .is_fatal());
        assert!(InvocationOutcome::TimedOut.is_fatal());
        assert!(InvocationOutcome::Failed { last: None }.is_fatal());
    }

    #[test]
    fn params_deserialize_untagged() {
        let params: Params = serde_json::from_str(r#"{"s":"x","b":false,"i":2,"f":1.5}"#).unwrap();
        assert_eq!(params["s"], ParamValue::String("x".into()));
        assert_eq!(params["b"], ParamValue::Bool(false));
        assert_eq!(params["i"], ParamValue::Integer(2));
        assert_eq!(params["f"], ParamValue::Float(1.5));
    }
}
