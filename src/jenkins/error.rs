//! Errors raised by a [`JobClient`](super::JobClient).
//!
//! Each variant maps to one handling path in the job controller:
//! - [`Transient`](JobClientError::Transient): retried a bounded number of times
//! - [`Unauthorized`](JobClientError::Unauthorized): fatal, never retried
//! - everything else: ends the current attempt as failed

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobClientError {
    /// Connection reset, request timeout or a 5xx response.
    #[error("transient error: {0}")]
    Transient(String),

    /// The service rejected our credentials (HTTP 401/403).
    #[error("unauthorized (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// Any other non-success response.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The response could not be understood.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl JobClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, JobClientError::Transient(_))
    }

    /// Classify an HTTP status that is not a success.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => JobClientError::Unauthorized { status, message },
            500..=599 => JobClientError::Transient(format!("status {status}: {message}")),
            _ => JobClientError::Api { status, message },
        }
    }
}

impl From<reqwest::Error> for JobClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return JobClientError::Protocol(err.to_string());
        }
        if let Some(status) = err.status() {
            return JobClientError::from_status(status.as_u16(), err.to_string());
        }
        // connect, timeout, body and request errors are all transport level
        JobClientError::Transient(err.to_string())
    }
}
