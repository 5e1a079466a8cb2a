// SPDX-License-Identifier: MIT OR Apache-2.0
//! Log sink handed to a workspace.
//!
//! [`build_dispatch`] assembles a subscriber from a [`LogConfig`] without
//! installing it globally. Events also reach the returned receiver through
//! [`LogBridge`], so a host can show them however it likes.

use crate::config::LogConfig;
use std::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging setup errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Invalid filter directive
    #[error("Invalid log filter '{filter}': {source}")]
    Filter {
        /// Directive text
        filter: String,
        /// Parser error
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
}

/// A log event captured by the [`LogBridge`] layer.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Severity
    pub level: tracing::Level,
    /// Message with any extra fields appended
    pub message: String,
    /// Module path that emitted it
    pub target: String,
    /// Source file
    pub file: Option<String>,
    /// Source line
    pub line: Option<u32>,
}

/// A `tracing_subscriber::Layer` that forwards events over an `mpsc` channel.
pub struct LogBridge {
    sender: mpsc::Sender<LogRecord>,
}

impl LogBridge {
    /// Create a new bridge and return `(layer, receiver)`.
    pub fn new() -> (Self, mpsc::Receiver<LogRecord>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl<S> tracing_subscriber::Layer<S> for LogBridge
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        // Receiver may be gone
        let _ = self.sender.send(LogRecord {
            level: *meta.level(),
            message: visitor.finish(),
            target: meta.target().to_string(),
            file: meta.file().map(str::to_string),
            line: meta.line(),
        });
    }
}

/// Collects the `message` field followed by the other fields.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields.join(", "),
            (false, false) => format!("{} ({})", self.message, self.fields.join(", ")),
        }
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{} = {:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{} = {}", field.name(), value));
        }
    }
}

/// Build a dispatch for `config` and the receiver of its bridged records
pub fn build_dispatch(
    config: &LogConfig,
) -> Result<(tracing::Dispatch, mpsc::Receiver<LogRecord>), LoggingError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|source| LoggingError::Filter {
        filter: config.filter.clone(),
        source,
    })?;
    let (bridge, receiver) = LogBridge::new();
    let echo = config.echo_to_stdout.then(fmt::layer);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(echo)
        .with(bridge);
    Ok((tracing::Dispatch::new(subscriber), receiver))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_receives_events() {
        let (dispatch, receiver) = build_dispatch(&LogConfig::default()).unwrap();
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(node = "hash", "Node finished");
            tracing::debug!("Filtered out");
        });

        let records: Vec<_> = receiver.try_iter().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, tracing::Level::INFO);
        assert_eq!(records[0].message, "Node finished (node = hash)");
    }

    #[test]
    fn test_filter_directives() {
        let config = LogConfig {
            filter: "debug".to_string(),
            echo_to_stdout: false,
        };
        let (dispatch, receiver) = build_dispatch(&config).unwrap();
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::debug!("Kept");
            tracing::trace!("Dropped");
        });
        assert_eq!(receiver.try_iter().count(), 1);
    }

    #[test]
    fn test_invalid_filter() {
        let config = LogConfig {
            filter: "cipherflow=loud".to_string(),
            echo_to_stdout: false,
        };
        assert!(matches!(build_dispatch(&config), Err(LoggingError::Filter { .. })));
    }
}
