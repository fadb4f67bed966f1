//! Orchestrate builds of remote CI jobs as a tree of serial and parallel
//! scopes.
//!
//! A flow is declared as a [`FlowScope`] tree and run by a [`FlowRunner`]
//! against a [`JobClient`]. Every job is started, polled and retried by a
//! [`orchestrator::JobController`]; each scope merges its children's
//! [`BuildResult`]s into one, so a single `UNSTABLE` leaf degrades every
//! ancestor while a fatal leaf fails the flow with a [`FlowError`] naming
//! the job and its [`ScopePath`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use jobflow::{FlowContext, FlowRunner, JenkinsClient};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let ctx = FlowContext::builder("http://localhost:8080").build()?;
//! let client = Arc::new(JenkinsClient::from_context(&ctx));
//! let report = FlowRunner::new(ctx, client)
//!     .serial(Duration::from_secs(300), |flow| {
//!         flow.invoke("build").param("branch", "main");
//!         let tests = flow.parallel();
//!         tests.invoke("test_unit");
//!         tests.invoke("test_integration").max_tries(2);
//!         Ok(())
//!     })
//!     .await?;
//! println!("{}", report.result);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod flowfile;
pub mod jenkins;
pub mod mock;
pub mod orchestrator;
pub mod path;
pub mod progress;
pub mod scope;
pub mod state_machine;
pub mod ui;

pub use aggregate::{InvocationReport, NodeReport, ScopeReport};
pub use context::{Credentials, Deadline, FlowContext};
pub use error::FlowError;
pub use jenkins::{JenkinsClient, JobClient, JobClientError};
pub use path::ScopePath;
pub use progress::{ChannelSink, NullSink, ProgressSink, TracingSink};
pub use scope::{Composition, FlowNode, FlowRunner, FlowScope};
pub use state_machine::{BuildResult, JobSpec, ParamValue, Params, RetryPolicy};
