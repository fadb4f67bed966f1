mod job;
mod result;
mod state;

pub use job::{
    AttemptRecord, Invocation, InvocationOutcome, JobSpec, ParamValue, Params, ProgressRecord,
    RetryPolicy,
};
pub use result::{BuildResult, UnknownBuildResult};
pub use state::{AttemptOutcome, InvocationState, InvocationStateMachine, Transition};
