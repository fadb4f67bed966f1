//! Merging child outcomes into a scope's outcome.
//!
//! [`aggregate`] is pure: it never starts or waits for anything. It is run
//! exactly once per scope, after every started child has resolved.

use serde::Serialize;

use crate::error::{ChildFailure, FlowError};
use crate::path::ScopePath;
use crate::scope::Composition;
use crate::state_machine::{BuildResult, Invocation};

/// A non-fatal invocation as seen by its scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationReport {
    pub job_name: String,
    pub path: ScopePath,
    pub attempts: u32,
    pub build_id: Option<u64>,
    pub result: BuildResult,
}

impl InvocationReport {
    pub fn from_invocation(invocation: &Invocation, result: BuildResult) -> Self {
        Self {
            job_name: invocation.job_name.clone(),
            path: invocation.path.clone(),
            attempts: invocation.attempts,
            build_id: invocation.build_id(),
            result,
        }
    }
}

/// A scope that completed without a fatal child.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeReport {
    pub mode: Composition,
    pub path: ScopePath,
    pub result: BuildResult,
    pub children: Vec<NodeReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum NodeReport {
    Job(InvocationReport),
    Scope(ScopeReport),
}

impl NodeReport {
    pub fn result(&self) -> BuildResult {
        match self {
            NodeReport::Job(job) => job.result,
            NodeReport::Scope(scope) => scope.result,
        }
    }
}

impl ScopeReport {
    pub fn child(&self, position: usize) -> Option<&NodeReport> {
        self.children.get(position)
    }

    /// The nested scope at `position`, if that child is a scope.
    pub fn scope(&self, position: usize) -> Option<&ScopeReport> {
        match self.child(position) {
            Some(NodeReport::Scope(scope)) => Some(scope),
            _ => None,
        }
    }

    /// Jobs whose result is worse than `Success`, depth first.
    pub fn degraded_by(&self) -> Vec<&InvocationReport> {
        let mut jobs = Vec::new();
        collect_degraded(self, &mut jobs);
        jobs
    }

    /// Every invocation in the tree, depth first.
    pub fn invocations(&self) -> Vec<&InvocationReport> {
        let mut jobs = Vec::new();
        for child in &self.children {
            match child {
                NodeReport::Job(job) => jobs.push(job),
                NodeReport::Scope(scope) => jobs.extend(scope.invocations()),
            }
        }
        jobs
    }
}

fn collect_degraded<'a>(scope: &'a ScopeReport, out: &mut Vec<&'a InvocationReport>) {
    for child in &scope.children {
        match child {
            NodeReport::Job(job) if job.result > BuildResult::Success => out.push(job),
            NodeReport::Job(_) => {}
            NodeReport::Scope(inner) => collect_degraded(inner, out),
        }
    }
}

/// Outcome of one child, keyed by its position in the scope.
pub type ChildOutcome = (usize, Result<NodeReport, FlowError>);

/// Merge child outcomes into the scope's report or fatal error.
///
/// `outcomes` must be ordered by position. Without fatal children the
/// result is the worst child result (`Success` for no children). With
/// fatal children a serial scope wraps its failing child with the
/// position; a parallel scope passes a single failure through unchanged
/// and wraps several in [`FlowError::Aggregate`].
pub fn aggregate(
    mode: Composition,
    path: &ScopePath,
    outcomes: Vec<ChildOutcome>,
) -> Result<ScopeReport, FlowError> {
    let mut children = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (position, outcome) in outcomes {
        match outcome {
            Ok(report) => children.push(report),
            Err(error) => failures.push(ChildFailure { position, error }),
        }
    }

    if failures.is_empty() {
        let result = BuildResult::merge_all(children.iter().map(NodeReport::result));
        return Ok(ScopeReport {
            mode,
            path: path.clone(),
            result,
            children,
        });
    }

    match mode {
        Composition::Serial => {
            let first = failures.remove(0);
            Err(FlowError::SerialChild {
                path: path.clone(),
                position: first.position,
                source: Box::new(first.error),
            })
        }
        Composition::Parallel if failures.len() == 1 => Err(failures.remove(0).error),
        Composition::Parallel => Err(FlowError::Aggregate {
            path: path.clone(),
            failures,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str, position: usize, result: BuildResult) -> ChildOutcome {
        (
            position,
            Ok(NodeReport::Job(InvocationReport {
                job_name: name.into(),
                path: ScopePath::root().child(position),
                attempts: 1,
                build_id: Some(1),
                result,
            })),
        )
    }

    fn fatal(name: &str, position: usize) -> ChildOutcome {
        (
            position,
            Err(FlowError::FailedJob {
                job: name.into(),
                path: ScopePath::root().child(position),
                attempts: 1,
                last: Some(BuildResult::Failed),
            }),
        )
    }

    #[test]
    fn empty_scope_is_success() {
        let report = aggregate(Composition::Serial, &ScopePath::root(), vec![]).unwrap();
        assert_eq!(report.result, BuildResult::Success);
        assert!(report.children.is_empty());
    }

    #[test]
    fn unstable_child_makes_scope_unstable() {
        let report = aggregate(
            Composition::Serial,
            &ScopePath::root(),
            vec![
                job("j1", 0, BuildResult::Success),
                job("j2", 1, BuildResult::Unstable),
                job("j3", 2, BuildResult::Success),
            ],
        )
        .unwrap();
        assert_eq!(report.result, BuildResult::Unstable);
        let degraded: Vec<&str> = report
            .degraded_by()
            .into_iter()
            .map(|j| j.job_name.as_str())
            .collect();
        assert_eq!(degraded, vec!["j2"]);
    }

    #[test]
    fn serial_failure_carries_position() {
        let err = aggregate(
            Composition::Serial,
            &ScopePath::root(),
            vec![job("j1", 0, BuildResult::Unstable), fatal("j2", 1)],
        )
        .unwrap_err();
        match err {
            FlowError::SerialChild {
                position, source, ..
            } => {
                assert_eq!(position, 1);
                assert!(matches!(*source, FlowError::FailedJob { ref job, .. } if job == "j2"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parallel_single_failure_passes_through() {
        let err = aggregate(
            Composition::Parallel,
            &ScopePath::root(),
            vec![job("a", 0, BuildResult::Success), fatal("b", 1)],
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::FailedJob { ref job, .. } if job == "b"));
    }

    #[test]
    fn parallel_multiple_failures_are_all_reported() {
        let err = aggregate(
            Composition::Parallel,
            &ScopePath::root(),
            vec![fatal("a", 0), job("b", 1, BuildResult::Success), fatal("c", 2)],
        )
        .unwrap_err();
        match err {
            FlowError::Aggregate { failures, .. } => {
                let positions: Vec<usize> = failures.iter().map(|f| f.position).collect();
                assert_eq!(positions, vec![0, 2]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nested_scope_result_propagates() {
        let inner = ScopeReport {
            mode: Composition::Parallel,
            path: ScopePath::root().child(1),
            result: BuildResult::Unstable,
            children: vec![NodeReport::Job(InvocationReport {
                job_name: "j22".into(),
                path: ScopePath::root().child(1).child(1),
                attempts: 1,
                build_id: None,
                result: BuildResult::Unstable,
            })],
        };
        let report = aggregate(
            Composition::Serial,
            &ScopePath::root(),
            vec![
                job("j11", 0, BuildResult::Success),
                (1, Ok(NodeReport::Scope(inner))),
            ],
        )
        .unwrap();
        assert_eq!(report.result, BuildResult::Unstable);
        assert_eq!(report.scope(1).unwrap().result, BuildResult::Unstable);
        assert_eq!(report.degraded_by()[0].job_name, "j22");
        assert_eq!(report.invocations().len(), 2);
    }
}
