//! Shared, read-only settings for one flow run and deadline arithmetic.
//!
//! A [`FlowContext`] is built once, before the root scope opens, and is
//! shared by reference with every controller in the tree. [`Deadline`]
//! carries the nearest enclosing time budget down the tree.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::state_machine::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("endpoint URL must not be empty")]
    EmptyUrl,

    #[error("max_parallel must be at least 1")]
    ZeroParallelism,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Where the job service lives.
///
/// `direct_url` is used for requests when `url` is a proxy; `url` stays the
/// name reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub direct_url: Option<String>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            direct_url: None,
        }
    }

    pub fn request_url(&self) -> &str {
        self.direct_url.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone)]
pub struct FlowContext {
    pub endpoint: Endpoint,
    pub credentials: Option<Credentials>,
    pub job_name_prefix: String,
    pub poll_interval: Duration,
    /// How often an in-flight job logs that it is still running.
    pub report_interval: Duration,
    /// Budget for jobs whose scopes and declarations set none.
    pub retry: RetryPolicy,
    /// Extra tries for a start or poll request failing transiently.
    pub transient_retries: u32,
    pub transient_retry_delay: Duration,
    pub request_timeout: Duration,
    /// Upper bound on invocations running at once; `None` is unbounded.
    pub max_parallel: Option<usize>,
}

impl FlowContext {
    pub fn builder(url: impl Into<String>) -> FlowContextBuilder {
        FlowContextBuilder {
            ctx: FlowContext {
                endpoint: Endpoint::new(url),
                credentials: None,
                job_name_prefix: String::new(),
                poll_interval: Duration::from_millis(500),
                report_interval: Duration::from_secs(5),
                retry: RetryPolicy::default(),
                transient_retries: 3,
                transient_retry_delay: Duration::from_millis(200),
                request_timeout: Duration::from_secs(30),
                max_parallel: None,
            },
        }
    }

    /// Name of `job` as known to the remote service.
    pub fn qualified_name(&self, job: &str) -> String {
        format!("{}{job}", self.job_name_prefix)
    }
}

pub struct FlowContextBuilder {
    ctx: FlowContext,
}

impl FlowContextBuilder {
    pub fn direct_url(mut self, url: impl Into<String>) -> Self {
        self.ctx.endpoint.direct_url = Some(url.into());
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.ctx.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn job_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ctx.job_name_prefix = prefix.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.ctx.poll_interval = interval;
        self
    }

    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.ctx.report_interval = interval;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.ctx.retry = policy;
        self
    }

    pub fn transient_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.ctx.transient_retries = retries;
        self.ctx.transient_retry_delay = delay;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.ctx.request_timeout = timeout;
        self
    }

    pub fn max_parallel(mut self, max: Option<usize>) -> Self {
        self.ctx.max_parallel = max;
        self
    }

    pub fn build(self) -> Result<FlowContext, ContextError> {
        if self.ctx.poll_interval.is_zero() {
            return Err(ContextError::ZeroPollInterval);
        }
        if self.ctx.endpoint.url.trim().is_empty() {
            return Err(ContextError::EmptyUrl);
        }
        if self.ctx.max_parallel == Some(0) {
            return Err(ContextError::ZeroParallelism);
        }
        Ok(self.ctx)
    }
}

/// The tightest time budget of all enclosing scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn unbounded() -> Self {
        Self { at: None }
    }

    /// A budget too large to represent is unbounded.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    /// `min(self, now + timeout)`; a nested scope can only tighten.
    pub fn tighten(self, timeout: Option<Duration>) -> Self {
        let Some(own) = timeout.and_then(|t| Instant::now().checked_add(t)) else {
            return self;
        };
        Self {
            at: Some(match self.at {
                Some(parent) => parent.min(own),
                None => own,
            }),
        }
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// `wanted`, or the deadline if that comes first.
    pub fn clamp(&self, wanted: Instant) -> Instant {
        match self.at {
            Some(at) => at.min(wanted),
            None => wanted,
        }
    }
}
