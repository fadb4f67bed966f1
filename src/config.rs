//! Settings loaded from `jobflow.toml`.
//!
//! [`FlowConfig`] holds every tunable of a flow run. Missing keys fall back
//! to defaults; the binary layers CLI flags and `JOBFLOW_PASSWORD` on top
//! before turning it into a [`FlowContext`].

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::context::FlowContext;
use crate::state_machine::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "jobflow.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    /// Public base URL of the job service.
    #[serde(default = "default_url")]
    pub url: String,

    /// Alternate URL used for requests when `url` is a proxy.
    #[serde(default)]
    pub direct_url: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub job_name_prefix: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,

    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    #[serde(default)]
    pub max_fails: u32,

    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,

    #[serde(default)]
    pub max_parallel: Option<usize>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_report_interval_ms() -> u64 {
    5000
}

fn default_max_tries() -> u32 {
    1
}

fn default_transient_retries() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            direct_url: None,
            username: None,
            password: None,
            job_name_prefix: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            report_interval_ms: default_report_interval_ms(),
            max_tries: default_max_tries(),
            max_fails: 0,
            transient_retries: default_transient_retries(),
            max_parallel: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl FlowConfig {
    /// Load `path`, or defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<FlowConfig>(&contents)?)
    }

    /// Build the engine's context; fails on invalid values.
    pub fn to_context(&self) -> Result<FlowContext> {
        let mut builder = FlowContext::builder(self.url.clone())
            .job_name_prefix(self.job_name_prefix.clone())
            .poll_interval(Duration::from_millis(self.poll_interval_ms))
            .report_interval(Duration::from_millis(self.report_interval_ms))
            .retry(RetryPolicy {
                max_tries: self.max_tries.max(1),
                max_fails: self.max_fails,
            })
            .transient_retries(self.transient_retries, Duration::from_millis(200))
            .request_timeout(Duration::from_secs(self.request_timeout_secs))
            .max_parallel(self.max_parallel);

        if let Some(direct) = &self.direct_url {
            builder = builder.direct_url(direct.clone());
        }
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => {
                builder = builder.credentials(user.clone(), password.clone());
            }
            (None, None) => {}
            _ => anyhow::bail!("username and password must be given together"),
        }
        Ok(builder.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = FlowConfig::default();
        assert_eq!(config.url, "http://localhost:8080");
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.max_tries, 1);
        assert_eq!(config.transient_retries, 3);
        assert!(config.username.is_none());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            url = "http://ci.example.com"
            job_name_prefix = "rel_"
            max_tries = 2
        "#;
        let config: FlowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.url, "http://ci.example.com");
        assert_eq!(config.job_name_prefix, "rel_");
        assert_eq!(config.max_tries, 2);
        assert_eq!(config.poll_interval_ms, 500);
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let config = FlowConfig::load(Path::new("/nonexistent/jobflow.toml")).unwrap();
        assert_eq!(config.max_tries, 1);
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_ms = 250\nmax_parallel = 4").unwrap();
        let config = FlowConfig::load(file.path()).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.max_parallel, Some(4));
    }

    #[test]
    fn to_context_carries_settings() {
        let config = FlowConfig {
            username: Some("flow".into()),
            password: Some("secret".into()),
            direct_url: Some("http://10.0.0.1:8080".into()),
            max_fails: 2,
            ..FlowConfig::default()
        };
        let ctx = config.to_context().unwrap();
        assert_eq!(ctx.credentials.unwrap().username, "flow");
        assert_eq!(ctx.endpoint.request_url(), "http://10.0.0.1:8080");
        assert_eq!(ctx.retry.max_fails, 2);
        assert_eq!(ctx.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn to_context_rejects_half_credentials() {
        let config = FlowConfig {
            username: Some("flow".into()),
            ..FlowConfig::default()
        };
        assert!(config.to_context().is_err());
    }

    #[test]
    fn to_context_rejects_zero_poll_interval() {
        let config = FlowConfig {
            poll_interval_ms: 0,
            ..FlowConfig::default()
        };
        let err = config.to_context().unwrap_err();
        assert!(err.to_string().contains("poll interval"));
    }
}
