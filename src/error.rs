//! Error taxonomy for the station transport core.
//!
//! Channel, framing and parse errors are recovered where they happen (logged, loop
//! continues). Only [`StationError`] reaches the front end.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`LinkChannel`](crate::link::LinkChannel) primitive.
#[derive(Error, Debug)]
pub enum LinkError {
    /// The endpoint could not be opened.
    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    /// No data arrived before the deadline.
    #[error("no data within {0:?}")]
    Timeout(Duration),

    /// The channel was closed locally or the peer hung up.
    #[error("channel closed")]
    Closed,

    /// Any other transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel is not connected right now.
    #[error("channel {0} is not connected")]
    Unavailable(&'static str),
}

impl LinkError {
    /// Errors that mean the transport is gone and must be reopened.
    pub fn is_fault(&self) -> bool {
        matches!(self, LinkError::Closed | LinkError::Io(_) | LinkError::Connect { .. })
    }
}

impl From<serialport::Error> for LinkError {
    fn from(e: serialport::Error) -> Self {
        LinkError::Io(e.into())
    }
}

/// Video frame could not be recovered from the byte stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// A serial record that does not match any known layout.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty record")]
    Empty,

    #[error("record is not valid UTF-8")]
    Encoding,

    #[error("{record}: expected {expected} fields, got {actual}")]
    FieldCount {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("field {index} is not a number: {value:?}")]
    InvalidNumber { index: usize, value: String },

    #[error("field {index} is not True/False: {value:?}")]
    InvalidBool { index: usize, value: String },

    #[error("index {index} outside 1..={max}")]
    InvalidIndex { index: u8, max: u8 },

    #[error("unknown record tag {0:?}")]
    UnknownTag(String),
}

/// An outbound command that cannot be written as a single comma-delimited line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot encode {field}: {value:?} contains a delimiter")]
pub struct EncodeError {
    pub field: &'static str,
    pub value: String,
}

/// Configuration load/save failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures surfaced to the operator.
#[derive(Error, Debug)]
pub enum StationError {
    /// The channel a command needs is not Connected.
    #[error("link unavailable: {0}")]
    LinkUnavailable(&'static str),

    /// Both channels stayed down longer than the grace period.
    #[error("both links down for more than {0:?}")]
    GracePeriodExceeded(Duration),

    #[error("{event} is not valid in mode {mode}")]
    InvalidTransition {
        mode: &'static str,
        event: &'static str,
    },

    #[error("emergency stop latched, reset required")]
    EmergencyStopLatched,

    /// The station consumer loop has stopped.
    #[error("station is not running")]
    NotRunning,

    /// The consumer loop is alive but did not answer in time.
    #[error("no answer from the station loop within {0:?}")]
    DispatchTimeout(Duration),

    /// Operator text that names no action.
    #[error("unknown action {0:?}")]
    UnknownAction(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_fault_classification() {
        assert!(LinkError::Closed.is_fault());
        assert!(LinkError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "x")).is_fault());
        assert!(!LinkError::Timeout(Duration::from_millis(5)).is_fault());
        assert!(!LinkError::Unavailable("serial").is_fault());
    }

    #[test]
    fn test_error_display() {
        let e = FramingError::Truncated { expected: 10, actual: 4 };
        assert_eq!(e.to_string(), "frame truncated: expected 10 bytes, got 4");

        let e = ParseError::FieldCount { record: "controller", expected: 16, actual: 15 };
        assert!(e.to_string().contains("expected 16 fields, got 15"));

        let e = StationError::LinkUnavailable("serial");
        assert_eq!(e.to_string(), "link unavailable: serial");
    }
}
