//! Terminal output for the `jobflow` binary: spinner and colored lines.
//!
//! [`TerminalSink`] is a [`ProgressSink`] that prints one line per resolved
//! invocation above a spinner. The `print_*` helpers render the final
//! outcome and the declared tree.

use std::fmt::Write as _;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::aggregate::{NodeReport, ScopeReport};
use crate::error::FlowError;
use crate::progress::ProgressSink;
use crate::scope::{FlowNode, FlowScope};
use crate::state_machine::{BuildResult, InvocationOutcome, ProgressRecord};

pub struct TerminalSink {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl TerminalSink {
    /// Start the spinner for a flow with `total_jobs` jobs.
    pub fn start(total_jobs: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("running flow (0/{total_jobs} jobs resolved)"));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_length(total_jobs as u64);

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl ProgressSink for TerminalSink {
    fn record(&self, record: &ProgressRecord) {
        let mark = match record.outcome {
            InvocationOutcome::Resolved {
                result: BuildResult::Success,
            } => self.green.apply_to("✓"),
            InvocationOutcome::Resolved { .. } => self.yellow.apply_to("!"),
            _ => self.red.apply_to("✗"),
        };
        let build = record
            .build_id
            .map(|b| format!(" #{b}"))
            .unwrap_or_default();
        self.pb.println(format!(
            "  {mark} {}{build} [{}] {} (attempt {}, {:.1}s)",
            record.job_name,
            record.path,
            record.outcome,
            record.attempt,
            record.elapsed_ms as f64 / 1000.0
        ));
        self.pb.inc(1);
        let done = self.pb.position();
        let total = self.pb.length().unwrap_or(done);
        self.pb
            .set_message(format!("running flow ({done}/{total} jobs resolved)"));
    }
}

/// Print the outcome of a flow that completed.
pub fn print_report(report: &ScopeReport) {
    let style = match report.result {
        BuildResult::Success => Style::new().green().bold(),
        BuildResult::Unstable => Style::new().yellow().bold(),
        _ => Style::new().red().bold(),
    };
    println!();
    println!("{}", style.apply_to(format!("Flow finished: {}", report.result)));
    for job in report.degraded_by() {
        println!(
            "  {} {} [{}] was {}",
            Style::new().yellow().apply_to("!"),
            job.job_name,
            job.path,
            job.result
        );
    }
}

/// Print every contributing failure of a fatal flow.
pub fn print_failure(err: &FlowError) {
    let red = Style::new().red().bold();
    println!();
    println!("{}", red.apply_to("Flow failed"));
    println!("  {err}");
    for (job, path) in err.failed_jobs() {
        println!("  {} {job} [{path}]", red.apply_to("✗"));
    }
}

/// Render the declared tree, one node per line.
pub fn describe(scope: &FlowScope) -> String {
    let mut out = String::new();
    describe_into(scope, 0, &mut out);
    out
}

fn describe_into(scope: &FlowScope, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let _ = write!(out, "{indent}{}", scope.mode());
    if let Some(timeout) = scope.timeout_value() {
        let _ = write!(out, " timeout={timeout:?}");
    }
    if let Some(max_tries) = scope.max_tries_value() {
        let _ = write!(out, " max_tries={max_tries}");
    }
    out.push('\n');
    for child in scope.children() {
        match child {
            FlowNode::Job(job) => {
                let _ = write!(out, "{indent}  job {}", job.name);
                if !job.params.is_empty() {
                    let params: Vec<String> =
                        job.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
                    let _ = write!(out, " ({})", params.join(", "));
                }
                out.push('\n');
            }
            FlowNode::Scope(inner) => describe_into(inner, depth + 1, out),
        }
    }
}

/// Result of every node in a finished tree, for `--verbose` summaries.
pub fn summarize(report: &ScopeReport) -> Vec<String> {
    let mut lines = Vec::new();
    for child in &report.children {
        match child {
            NodeReport::Job(job) => lines.push(format!(
                "{} {} attempts={} result={}",
                job.path, job.job_name, job.attempts, job.result
            )),
            NodeReport::Scope(scope) => {
                lines.push(format!("{} {} result={}", scope.path, scope.mode, scope.result));
                lines.extend(summarize(scope));
            }
        }
    }
    lines
}
