//! Error types for the order pipeline.
//!
//! `PipelineError` is the taxonomy callers branch on: configuration problems and
//! an unreachable broker are fatal at process startup. Any handler failure stays
//! inside the consumer loop and publish failures stay inside the publisher.

use std::fmt;

use thiserror::Error;

/// Top-level error taxonomy.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Configuration error: {key}: {message}")]
    Configuration { key: String, message: String },

    #[error("{0}")]
    BrokerUnreachable(UnreachableReport),

    #[error("Message decode error: {message}")]
    MessageDecode { message: String },

    #[error("Processing error: {message}")]
    Processing { message: String },

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Create a configuration error for the given key
    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a message decode error
    pub fn message_decode(message: impl Into<String>) -> Self {
        Self::MessageDecode {
            message: message.into(),
        }
    }

    /// Create a processing error
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }
}

/// Transport-level errors raised by a broker backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Channel operation failed: {operation}: {message}")]
    Channel { operation: String, message: String },

    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Connection is closed")]
    ConnectionClosed,
}

impl MessagingError {
    pub fn connection(message: impl fmt::Display) -> Self {
        Self::Connection {
            message: message.to_string(),
        }
    }

    pub fn channel(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Channel {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Persistence collaborator errors.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// One failed connection attempt against one candidate address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    /// Candidate address, password masked
    pub candidate: String,
    /// 1-based attempt number on this candidate
    pub attempt: u32,
    /// Underlying error text
    pub error: String,
}

/// Every attempt made before giving up on the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreachableReport {
    pub attempts: Vec<FailedAttempt>,
}

impl UnreachableReport {
    /// Distinct candidates in the order they were tried.
    pub fn candidates(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for attempt in &self.attempts {
            if !seen.contains(&attempt.candidate.as_str()) {
                seen.push(attempt.candidate.as_str());
            }
        }
        seen
    }
}

impl fmt::Display for UnreachableReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Could not connect to the message broker. Tried the following addresses:")?;
        for a in &self.attempts {
            writeln!(f, " - {} (attempt {}): {}", a.candidate, a.attempt, a.error)?;
        }
        write!(
            f,
            "Make sure the broker is running (e.g. the 'rabbitmq' compose service) or set BROKER_URL to the correct address."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(candidate: &str, attempt: u32) -> FailedAttempt {
        FailedAttempt {
            candidate: candidate.to_string(),
            attempt,
            error: "connection refused".to_string(),
        }
    }

    #[test]
    fn test_report_lists_every_attempt() {
        let report = UnreachableReport {
            attempts: vec![
                attempt("amqp://localhost:5672", 1),
                attempt("amqp://localhost:5672", 2),
                attempt("amqp://rabbitmq:5672", 1),
            ],
        };
        let text = PipelineError::BrokerUnreachable(report.clone()).to_string();

        assert!(text.contains("amqp://localhost:5672 (attempt 1): connection refused"));
        assert!(text.contains("amqp://localhost:5672 (attempt 2): connection refused"));
        assert!(text.contains("amqp://rabbitmq:5672 (attempt 1)"));
        assert_eq!(
            report.candidates(),
            vec!["amqp://localhost:5672", "amqp://rabbitmq:5672"]
        );
    }
}
