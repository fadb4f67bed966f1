use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobflow::cli::{Cli, Command};
use jobflow::config::FlowConfig;
use jobflow::flowfile::{FlowFile, parse_timeout};
use jobflow::ui::{self, TerminalSink};
use jobflow::{FlowRunner, JenkinsClient};

const PASSWORD_ENV: &str = "JOBFLOW_PASSWORD";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "jobflow=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Errors returned here are configuration or flow-file problems; flow
/// failures are reported and mapped to an exit code instead.
async fn execute(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        Command::Validate { flow } => {
            let scope = FlowFile::load(flow)?.into_scope()?;
            print!("{}", ui::describe(&scope));
            println!("{} job(s)", scope.job_count());
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            flow,
            timeout_secs,
            json,
        } => {
            let mut config = FlowConfig::load(&cli.config)?;
            cli.apply(&mut config);
            if let Ok(password) = std::env::var(PASSWORD_ENV) {
                config.password = Some(password);
            }
            let ctx = config.to_context()?;

            let mut scope = FlowFile::load(flow)?.into_scope()?;
            if let Some(secs) = *timeout_secs {
                scope.timeout(parse_timeout(secs).context("--timeout-secs")?);
            }

            let client = Arc::new(JenkinsClient::from_context(&ctx));
            let sink = Arc::new(TerminalSink::start(scope.job_count()));
            let runner = FlowRunner::new(ctx, client).with_sink(sink.clone());
            let outcome = runner.run(scope).await;
            sink.finish();

            match outcome {
                Ok(report) => {
                    if *json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        ui::print_report(&report);
                        if cli.verbose {
                            for line in ui::summarize(&report) {
                                println!("  {line}");
                            }
                        }
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    ui::print_failure(&err);
                    Ok(ExitCode::from(1))
                }
            }
        }
    }
}
