//! The flow tree and its execution.
//!
//! A [`FlowScope`] is declared first (jobs and nested scopes appended in
//! order) and then closed by a [`FlowRunner`], which runs the tree and
//! aggregates every scope bottom-up. Serial scopes run their children one
//! after another on the caller's task and stop at the first fatal child.
//! Parallel scopes spawn one task per child and always wait for all of
//! them, so every failure is reported.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::aggregate::{ChildOutcome, InvocationReport, NodeReport, ScopeReport, aggregate};
use crate::context::{Deadline, FlowContext};
use crate::error::FlowError;
use crate::jenkins::JobClient;
use crate::orchestrator::JobController;
use crate::path::ScopePath;
use crate::progress::{ProgressSink, TracingSink};
use crate::state_machine::{Invocation, JobSpec, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Composition {
    Serial,
    Parallel,
}

impl fmt::Display for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Composition::Serial => write!(f, "serial"),
            Composition::Parallel => write!(f, "parallel"),
        }
    }
}

/// A child of a scope.
#[derive(Debug, Clone)]
pub enum FlowNode {
    Job(JobSpec),
    Scope(FlowScope),
}

/// A composite node: an ordered list of jobs and nested scopes.
#[derive(Debug, Clone)]
pub struct FlowScope {
    mode: Composition,
    timeout: Option<Duration>,
    max_tries: Option<u32>,
    children: Vec<FlowNode>,
}

impl FlowScope {
    pub fn new(mode: Composition) -> Self {
        Self {
            mode,
            timeout: None,
            max_tries: None,
            children: Vec::new(),
        }
    }

    /// Time budget counted from when this scope starts running.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Default retry budget for jobs below this scope.
    pub fn max_tries(&mut self, max_tries: u32) -> &mut Self {
        self.max_tries = Some(max_tries);
        self
    }

    /// Append a job; configure it through the returned spec.
    pub fn invoke(&mut self, name: impl Into<String>) -> &mut JobSpec {
        self.children.push(FlowNode::Job(JobSpec::new(name)));
        let Some(FlowNode::Job(job)) = self.children.last_mut() else {
            unreachable!("a job was just appended");
        };
        job
    }

    /// Append a nested serial scope.
    pub fn serial(&mut self) -> &mut FlowScope {
        self.nested(Composition::Serial)
    }

    /// Append a nested parallel scope.
    pub fn parallel(&mut self) -> &mut FlowScope {
        self.nested(Composition::Parallel)
    }

    /// Append an already built child.
    pub fn push(&mut self, node: FlowNode) {
        self.children.push(node);
    }

    fn nested(&mut self, mode: Composition) -> &mut FlowScope {
        self.children.push(FlowNode::Scope(FlowScope::new(mode)));
        let Some(FlowNode::Scope(scope)) = self.children.last_mut() else {
            unreachable!("a scope was just appended");
        };
        scope
    }

    pub fn mode(&self) -> Composition {
        self.mode
    }

    pub fn timeout_value(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn max_tries_value(&self) -> Option<u32> {
        self.max_tries
    }

    pub fn children(&self) -> &[FlowNode] {
        &self.children
    }

    /// Number of jobs in this scope and all nested scopes.
    pub fn job_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                FlowNode::Job(_) => 1,
                FlowNode::Scope(scope) => scope.job_count(),
            })
            .sum()
    }
}

/// Everything a running node needs, cheap to clone into spawned tasks.
#[derive(Clone)]
struct Exec {
    ctx: Arc<FlowContext>,
    client: Arc<dyn JobClient>,
    sink: Arc<dyn ProgressSink>,
    limiter: Option<Arc<Semaphore>>,
}

/// Opens and closes root scopes against one context and job client.
pub struct FlowRunner {
    exec: Exec,
}

impl FlowRunner {
    pub fn new(ctx: FlowContext, client: Arc<dyn JobClient>) -> Self {
        let limiter = ctx.max_parallel.map(|n| Arc::new(Semaphore::new(n)));
        Self {
            exec: Exec {
                ctx: Arc::new(ctx),
                client,
                sink: Arc::new(TracingSink),
                limiter,
            },
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.exec.sink = sink;
        self
    }

    pub fn context(&self) -> &FlowContext {
        &self.exec.ctx
    }

    /// Open a root serial scope, declare its children, then close it.
    pub async fn serial<F>(&self, timeout: Duration, declare: F) -> Result<ScopeReport, FlowError>
    where
        F: FnOnce(&mut FlowScope) -> anyhow::Result<()>,
    {
        let mut scope = FlowScope::new(Composition::Serial);
        scope.timeout(timeout);
        self.open(scope, declare).await
    }

    /// Open a root parallel scope, declare its children, then close it.
    pub async fn parallel<F>(&self, timeout: Duration, declare: F) -> Result<ScopeReport, FlowError>
    where
        F: FnOnce(&mut FlowScope) -> anyhow::Result<()>,
    {
        let mut scope = FlowScope::new(Composition::Parallel);
        scope.timeout(timeout);
        self.open(scope, declare).await
    }

    /// Run `declare` against `scope`, then close the scope exactly once.
    ///
    /// If `declare` fails the scope is closed without starting any job.
    pub async fn open<F>(&self, mut scope: FlowScope, declare: F) -> Result<ScopeReport, FlowError>
    where
        F: FnOnce(&mut FlowScope) -> anyhow::Result<()>,
    {
        match declare(&mut scope) {
            Ok(()) => self.run(scope).await,
            Err(err) => {
                warn!(
                    path = %ScopePath::root(),
                    abandoned_jobs = scope.job_count(),
                    error = %err,
                    "declaration failed, closing scope without starting jobs"
                );
                Err(FlowError::Declaration {
                    path: ScopePath::root(),
                    message: format!("{err:#}"),
                })
            }
        }
    }

    /// Close a declared root scope: run it and aggregate its outcome.
    pub async fn run(&self, scope: FlowScope) -> Result<ScopeReport, FlowError> {
        let inherited = self.exec.ctx.retry;
        run_scope(
            self.exec.clone(),
            scope,
            ScopePath::root(),
            Deadline::unbounded(),
            inherited,
        )
        .await
    }
}

fn run_node(
    exec: Exec,
    node: FlowNode,
    path: ScopePath,
    deadline: Deadline,
    inherited: RetryPolicy,
) -> BoxFuture<'static, Result<NodeReport, FlowError>> {
    async move {
        match node {
            FlowNode::Job(spec) => run_job(&exec, spec, path, deadline, inherited)
                .await
                .map(NodeReport::Job),
            FlowNode::Scope(scope) => run_scope(exec, scope, path, deadline, inherited)
                .await
                .map(NodeReport::Scope),
        }
    }
    .boxed()
}

async fn run_job(
    exec: &Exec,
    spec: JobSpec,
    path: ScopePath,
    deadline: Deadline,
    inherited: RetryPolicy,
) -> Result<InvocationReport, FlowError> {
    let policy = spec.retry_policy(inherited);
    let mut invocation = Invocation::new(
        exec.ctx.qualified_name(&spec.name),
        spec.params,
        path,
        policy,
    );
    let result = JobController::new(exec.ctx.as_ref(), exec.client.as_ref(), exec.sink.as_ref())
        .with_limiter(exec.limiter.as_deref())
        .run(&mut invocation, deadline)
        .await?;
    Ok(InvocationReport::from_invocation(&invocation, result))
}

async fn run_scope(
    exec: Exec,
    scope: FlowScope,
    path: ScopePath,
    parent_deadline: Deadline,
    inherited: RetryPolicy,
) -> Result<ScopeReport, FlowError> {
    let deadline = parent_deadline.tighten(scope.timeout);
    let policy = RetryPolicy {
        max_tries: scope.max_tries.unwrap_or(inherited.max_tries),
        ..inherited
    };
    info!(
        path = %path,
        mode = %scope.mode,
        children = scope.children.len(),
        timeout = ?scope.timeout,
        "scope started"
    );

    let outcomes = match scope.mode {
        Composition::Serial => run_serial(&exec, scope.children, &path, deadline, policy).await,
        Composition::Parallel => run_parallel(&exec, scope.children, &path, deadline, policy).await,
    };

    let report = aggregate(scope.mode, &path, outcomes);
    match &report {
        Ok(report) => info!(path = %path, result = %report.result, "scope finished"),
        Err(err) => warn!(path = %path, error = %err, "scope failed"),
    }
    report
}

async fn run_serial(
    exec: &Exec,
    children: Vec<FlowNode>,
    path: &ScopePath,
    deadline: Deadline,
    policy: RetryPolicy,
) -> Vec<ChildOutcome> {
    let total = children.len();
    let mut outcomes = Vec::with_capacity(total);
    for (position, child) in children.into_iter().enumerate() {
        let outcome = run_node(exec.clone(), child, path.child(position), deadline, policy).await;
        let fatal = outcome.is_err();
        outcomes.push((position, outcome));
        if fatal {
            debug!(path = %path, position, skipped = total - position - 1, "not starting remaining children");
            break;
        }
    }
    outcomes
}

async fn run_parallel(
    exec: &Exec,
    children: Vec<FlowNode>,
    path: &ScopePath,
    deadline: Deadline,
    policy: RetryPolicy,
) -> Vec<ChildOutcome> {
    let mut join_set = JoinSet::new();
    let total = children.len();
    for (position, child) in children.into_iter().enumerate() {
        join_set.spawn(
            run_node(exec.clone(), child, path.child(position), deadline, policy)
                .map(move |outcome| (position, outcome)),
        );
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => match err.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                Err(err) => warn!(path = %path, error = %err, "child task cancelled"),
            },
        }
    }
    outcomes.sort_by_key(|(position, _)| *position);
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockJob, MockJobClient};
    use crate::state_machine::BuildResult;

    fn runner(client: Arc<MockJobClient>) -> FlowRunner {
        let ctx = FlowContext::builder("http://mock")
            .poll_interval(Duration::from_millis(100))
            .build()
            .unwrap();
        FlowRunner::new(ctx, client)
    }

    #[test]
    fn declaration_builds_tree() {
        let mut root = FlowScope::new(Composition::Serial);
        root.invoke("j1").param("a", "b");
        let inner = root.parallel();
        inner.max_tries(2).timeout(Duration::from_secs(10));
        inner.invoke("j2");
        inner.invoke("j3").max_tries(3);

        assert_eq!(root.children().len(), 2);
        assert_eq!(root.job_count(), 3);
        match &root.children()[1] {
            FlowNode::Scope(scope) => {
                assert_eq!(scope.mode(), Composition::Parallel);
                assert_eq!(scope.max_tries_value(), Some(2));
                assert_eq!(scope.timeout_value(), Some(Duration::from_secs(10)));
            }
            FlowNode::Job(_) => panic!("expected nested scope"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scope_retry_default_reaches_jobs() {
        let client = Arc::new(MockJobClient::new());
        client.job("flaky", MockJob::new(Duration::from_secs(1)).fails(1));

        let report = runner(client.clone())
            .serial(Duration::from_secs(60), |s| {
                s.parallel().max_tries(2).invoke("flaky");
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(report.result, BuildResult::Success);
        assert_eq!(report.invocations()[0].attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_declaration_starts_nothing() {
        let client = Arc::new(MockJobClient::new());
        client.job("j1", MockJob::new(Duration::ZERO));

        let err = runner(client.clone())
            .serial(Duration::from_secs(60), |s| {
                s.invoke("j1");
                anyhow::bail!("bad flow definition")
            })
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::Declaration { .. }));
        assert!(err.to_string().contains("bad flow definition"));
        assert!(client.started().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn max_parallel_caps_concurrent_jobs() {
        let client = Arc::new(MockJobClient::new());
        for name in ["a", "b", "c"] {
            client.job(name, MockJob::new(Duration::from_secs(2)));
        }
        let ctx = FlowContext::builder("http://mock")
            .poll_interval(Duration::from_millis(500))
            .max_parallel(Some(1))
            .build()
            .unwrap();

        let begin = tokio::time::Instant::now();
        FlowRunner::new(ctx, client.clone())
            .parallel(Duration::from_secs(60), |s| {
                s.invoke("a");
                s.invoke("b");
                s.invoke("c");
                Ok(())
            })
            .await
            .unwrap();

        assert!(begin.elapsed() >= Duration::from_secs(6));
        let mut starts: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| client.start_times(n)[0])
            .collect();
        starts.sort();
        assert!(starts[1] - starts[0] >= Duration::from_secs(2));
    }
}
