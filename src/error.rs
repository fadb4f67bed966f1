use std::time::Duration;

use thiserror::Error;

use crate::path::ScopePath;
use crate::state_machine::BuildResult;

/// A fatal outcome of a node in the flow tree.
///
/// These never degrade to a [`BuildResult`]: a caller must be able to tell
/// "completed but unstable" from "could not finish".
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("job '{job}' at {path} failed after {attempts} attempt(s){}", last_result(.last))]
    FailedJob {
        job: String,
        path: ScopePath,
        attempts: u32,
        last: Option<BuildResult>,
    },

    #[error("flow timeout: job '{job}' at {path} still in flight after {attempts} attempt(s) ({elapsed:?})")]
    Timeout {
        job: String,
        path: ScopePath,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("job '{job}' at {path} rejected: {message}")]
    Unauthorized {
        job: String,
        path: ScopePath,
        message: String,
    },

    #[error("serial scope {path} failed at child {position}: {source}")]
    SerialChild {
        path: ScopePath,
        position: usize,
        #[source]
        source: Box<FlowError>,
    },

    #[error("parallel scope {path}: {} children failed: {}", .failures.len(), list_failures(.failures))]
    Aggregate {
        path: ScopePath,
        failures: Vec<ChildFailure>,
    },

    #[error("scope {path} declaration aborted, no jobs started: {message}")]
    Declaration { path: ScopePath, message: String },
}

/// One fatal child of a parallel scope.
#[derive(Debug)]
pub struct ChildFailure {
    pub position: usize,
    pub error: FlowError,
}

fn last_result(last: &Option<BuildResult>) -> String {
    match last {
        Some(result) => format!(" (last result {result})"),
        None => String::new(),
    }
}

fn list_failures(failures: &[ChildFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[child {}] {}", f.position, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl FlowError {
    /// Path of the node that raised this error.
    pub fn path(&self) -> &ScopePath {
        match self {
            FlowError::FailedJob { path, .. }
            | FlowError::Timeout { path, .. }
            | FlowError::Unauthorized { path, .. }
            | FlowError::SerialChild { path, .. }
            | FlowError::Aggregate { path, .. }
            | FlowError::Declaration { path, .. } => path,
        }
    }

    /// Every job that contributed to this failure, depth first.
    pub fn failed_jobs(&self) -> Vec<(&str, &ScopePath)> {
        match self {
            FlowError::FailedJob { job, path, .. }
            | FlowError::Timeout { job, path, .. }
            | FlowError::Unauthorized { job, path, .. } => vec![(job.as_str(), path)],
            FlowError::SerialChild { source, .. } => source.failed_jobs(),
            FlowError::Aggregate { failures, .. } => {
                failures.iter().flat_map(|f| f.error.failed_jobs()).collect()
            }
            FlowError::Declaration { .. } => Vec::new(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            FlowError::Timeout { .. } => true,
            FlowError::SerialChild { source, .. } => source.is_timeout(),
            FlowError::Aggregate { failures, .. } => failures.iter().any(|f| f.error.is_timeout()),
            _ => false,
        }
    }
}
