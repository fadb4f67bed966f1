use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of a finished build or of an aggregated scope.
///
/// Variants are declared in severity order so the derived `Ord` is the
/// aggregation order: `Success < Unstable < Failed < Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
    Success,
    Unstable,
    Failed,
    /// Counts as at least as bad as `Failed` when merging.
    Aborted,
}

impl BuildResult {
    /// The worse of the two results.
    pub fn merge(self, other: BuildResult) -> BuildResult {
        self.max(other)
    }

    /// Merge a sequence of results, `Success` for an empty sequence.
    pub fn merge_all<I: IntoIterator<Item = BuildResult>>(results: I) -> BuildResult {
        results
            .into_iter()
            .fold(BuildResult::Success, BuildResult::merge)
    }

    /// `Failed` and `Aborted` consume a retry; everything else is terminal.
    pub fn is_failure(self) -> bool {
        matches!(self, BuildResult::Failed | BuildResult::Aborted)
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildResult::Success => write!(f, "SUCCESS"),
            BuildResult::Unstable => write!(f, "UNSTABLE"),
            BuildResult::Failed => write!(f, "FAILED"),
            BuildResult::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Error returned when a remote result string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown build result: {0}")]
pub struct UnknownBuildResult(pub String);

impl FromStr for BuildResult {
    type Err = UnknownBuildResult;

    /// Accepts both the remote service spelling (`FAILURE`) and ours (`FAILED`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(BuildResult::Success),
            "UNSTABLE" => Ok(BuildResult::Unstable),
            "FAILURE" | "FAILED" => Ok(BuildResult::Failed),
            "ABORTED" => Ok(BuildResult::Aborted),
            _ => Err(UnknownBuildResult(s.to_string())),
        }
    }
}
