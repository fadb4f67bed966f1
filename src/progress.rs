//! Where resolved invocations are reported.
//!
//! The engine calls [`ProgressSink::record`] once per invocation as it
//! resolves. Sinks are for reporting only; nothing they do affects the
//! flow's outcome.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::state_machine::{InvocationOutcome, ProgressRecord};

pub trait ProgressSink: Send + Sync {
    fn record(&self, record: &ProgressRecord);
}

/// Discards every record.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn record(&self, _record: &ProgressRecord) {}
}

/// Logs each record as a structured `tracing` event.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn record(&self, record: &ProgressRecord) {
        match record.outcome {
            InvocationOutcome::Resolved { .. } => info!(
                job = %record.job_name,
                path = %record.path,
                attempt = record.attempt,
                build = ?record.build_id,
                elapsed_ms = record.elapsed_ms,
                outcome = %record.outcome,
                "invocation resolved"
            ),
            _ => warn!(
                job = %record.job_name,
                path = %record.path,
                attempt = record.attempt,
                build = ?record.build_id,
                elapsed_ms = record.elapsed_ms,
                outcome = %record.outcome,
                "invocation resolved fatally"
            ),
        }
    }
}

/// Forwards records, in resolution order, to an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressRecord>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn record(&self, record: &ProgressRecord) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.tx.send(record.clone());
    }
}
