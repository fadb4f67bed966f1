//! Flow descriptions read from TOML.
//!
//! ```toml
//! [flow]
//! mode = "serial"
//! timeout_secs = 70
//!
//! [[flow.children]]
//! job = "build"
//!
//! [[flow.children]]
//! mode = "parallel"
//! max_tries = 2
//! children = [
//!     { job = "test_unit" },
//!     { job = "test_integration", params = { suite = "full" } },
//! ]
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::scope::{Composition, FlowNode, FlowScope};
use crate::state_machine::{JobSpec, Params};

#[derive(Debug, Clone, Deserialize)]
pub struct FlowFile {
    pub flow: ScopeDef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeDef {
    pub mode: Composition,
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    #[serde(default)]
    pub max_tries: Option<u32>,
    #[serde(default)]
    pub children: Vec<NodeDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDef {
    pub job: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub max_tries: Option<u32>,
    #[serde(default)]
    pub max_fails: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NodeDef {
    Job(JobDef),
    Scope(ScopeDef),
}

impl FlowFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read flow file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid flow file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str::<FlowFile>(contents)?)
    }

    /// Build the declared scope tree.
    pub fn into_scope(self) -> Result<FlowScope> {
        build_scope(self.flow, "flow")
    }
}

fn build_scope(def: ScopeDef, location: &str) -> Result<FlowScope> {
    let mut scope = FlowScope::new(def.mode);
    if let Some(secs) = def.timeout_secs {
        let timeout = parse_timeout(secs).with_context(|| format!("{location}: timeout_secs"))?;
        scope.timeout(timeout);
    }
    if let Some(max_tries) = def.max_tries {
        scope.max_tries(max_tries);
    }

    for (index, child) in def.children.into_iter().enumerate() {
        let child_location = format!("{location}.children[{index}]");
        match child {
            NodeDef::Job(job) => {
                if job.job.trim().is_empty() {
                    bail!("{child_location}: job name must not be empty");
                }
                let mut spec = JobSpec::new(job.job);
                spec.params = job.params;
                spec.max_tries = job.max_tries;
                spec.max_fails = job.max_fails;
                scope.push(FlowNode::Job(spec));
            }
            NodeDef::Scope(inner) => {
                scope.push(FlowNode::Scope(build_scope(inner, &child_location)?));
            }
        }
    }
    Ok(scope)
}

/// A positive number of seconds that fits in a [`Duration`].
pub fn parse_timeout(secs: f64) -> Result<Duration> {
    if secs.is_nan() || secs <= 0.0 {
        bail!("timeout must be positive, got {secs}");
    }
    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("timeout of {secs}s is out of range"))
}
