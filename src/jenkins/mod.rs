pub mod client;
pub mod error;
pub mod types;

use async_trait::async_trait;

pub use client::JenkinsClient;
pub use error::JobClientError;
pub use types::{BuildHandle, BuildStatus, RemoteState};

use crate::state_machine::Params;

/// Capability the flow engine needs from a job-execution service.
///
/// Implementations must be safe to call from many controllers at once.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Request one execution of `prefix + job_name`.
    async fn start(
        &self,
        job_name: &str,
        prefix: &str,
        params: &Params,
    ) -> Result<BuildHandle, JobClientError>;

    /// Current state of a started execution.
    async fn poll(&self, handle: &BuildHandle) -> Result<BuildStatus, JobClientError>;

    /// Best-effort request to stop an execution the engine gave up on.
    async fn stop(&self, _handle: &BuildHandle) -> Result<(), JobClientError> {
        Ok(())
    }
}
