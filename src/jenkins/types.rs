//! Handle and status types shared by every job client, plus the JSON
//! shapes returned by the Jenkins REST API.

use serde::{Deserialize, Serialize};

use crate::state_machine::BuildResult;

/// Opaque reference to one started execution.
///
/// `ticket` identifies the request with the remote service (a queue item
/// for Jenkins). `build_id` is filled in once the service reports which
/// build number the request became.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildHandle {
    pub job_name: String,
    pub ticket: u64,
    pub build_id: Option<u64>,
}

impl BuildHandle {
    pub fn new(job_name: impl Into<String>, ticket: u64) -> Self {
        Self {
            job_name: job_name.into(),
            ticket,
            build_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteState {
    /// Accepted but not yet running (queued).
    Pending,
    Running,
    Finished,
}

/// Snapshot returned by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub state: RemoteState,
    /// Only set once `state` is `Finished`.
    pub result: Option<BuildResult>,
    pub build_id: Option<u64>,
}

impl BuildStatus {
    pub fn pending() -> Self {
        Self {
            state: RemoteState::Pending,
            result: None,
            build_id: None,
        }
    }

    pub fn running(build_id: u64) -> Self {
        Self {
            state: RemoteState::Running,
            result: None,
            build_id: Some(build_id),
        }
    }

    pub fn finished(build_id: u64, result: BuildResult) -> Self {
        Self {
            state: RemoteState::Finished,
            result: Some(result),
            build_id: Some(build_id),
        }
    }
}

/// `GET /queue/item/{id}/api/json`
#[derive(Debug, Clone, Deserialize)]
pub struct QueueItem {
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub executable: Option<QueueExecutable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueExecutable {
    pub number: u64,
}

/// `GET /job/{name}/{number}/api/json`
#[derive(Debug, Clone, Deserialize)]
pub struct BuildInfo {
    pub number: u64,
    #[serde(default)]
    pub building: bool,
    pub result: Option<String>,
}
