//! Command-line interface of `jobflow`, built with clap.
//!
//! [`Cli`] holds the subcommands ([`Command`]) and global flags that
//! override values from `jobflow.toml`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::FlowConfig;

/// jobflow: run serial and parallel flows of remote CI jobs.
#[derive(Debug, Parser)]
#[command(name = "jobflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file.
    #[arg(long, global = true, default_value = crate::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Base URL of the job service.
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// URL used for requests when --url is a proxy.
    #[arg(long, global = true)]
    pub direct_url: Option<String>,

    #[arg(long, global = true)]
    pub username: Option<String>,

    /// Visible in the process list; prefer JOBFLOW_PASSWORD.
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Prefix added to every job name.
    #[arg(long, global = true)]
    pub job_name_prefix: Option<String>,

    #[arg(long, global = true)]
    pub poll_interval_ms: Option<u64>,

    /// Upper bound on jobs running at once.
    #[arg(long, global = true)]
    pub max_parallel: Option<usize>,

    /// Verbose output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the flow described in a TOML file.
    Run {
        /// Path to the flow description.
        flow: PathBuf,

        /// Timeout for the whole flow in seconds, overriding the file.
        #[arg(long)]
        timeout_secs: Option<f64>,

        /// Print the final report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Check a flow description and print its tree.
    Validate {
        flow: PathBuf,
    },
}

impl Cli {
    /// Apply command-line overrides to `config`.
    pub fn apply(&self, config: &mut FlowConfig) {
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(direct) = &self.direct_url {
            config.direct_url = Some(direct.clone());
        }
        if let Some(user) = &self.username {
            config.username = Some(user.clone());
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if let Some(prefix) = &self.job_name_prefix {
            config.job_name_prefix = prefix.clone();
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(max) = self.max_parallel {
            config.max_parallel = Some(max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["jobflow", "run", "release.toml", "--timeout-secs", "70"]);
        match cli.command {
            Command::Run {
                flow,
                timeout_secs,
                json,
            } => {
                assert_eq!(flow, PathBuf::from("release.toml"));
                assert_eq!(timeout_secs, Some(70.0));
                assert!(!json);
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "jobflow",
            "--url",
            "http://ci:8080",
            "--username",
            "flow",
            "--poll-interval-ms",
            "250",
            "--verbose",
            "validate",
            "flow.toml",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.url.as_deref(), Some("http://ci:8080"));
        assert_eq!(cli.poll_interval_ms, Some(250));
        assert_eq!(cli.config, PathBuf::from("jobflow.toml"));
        assert!(matches!(cli.command, Command::Validate { .. }));
    }

    #[test]
    fn overrides_apply_to_config() {
        let cli = Cli::parse_from([
            "jobflow",
            "--url",
            "http://other",
            "--max-parallel",
            "2",
            "validate",
            "f.toml",
        ]);
        let mut config = FlowConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.url, "http://other");
        assert_eq!(config.max_parallel, Some(2));
        assert_eq!(config.poll_interval_ms, 500);
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
