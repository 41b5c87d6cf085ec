use thiserror::Error;

/// Failures raised by the evaluator and the session tracker.
///
/// None of these are transient; callers decide whether to skip the offending
/// snapshot or halt the stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),

    #[error("manual override is active but no forced irrigation state is set")]
    MissingForcedState,

    #[error("out-of-order decision: timestamp {received} is not after {previous}")]
    OutOfOrder { previous: i64, received: i64 },

    #[error("session from {start} to {end} is too long to measure")]
    DurationOverflow { start: i64, end: i64 },

    #[error("irrigation turned on at {at} while a session opened at {open_since} is still open")]
    SessionAlreadyOpen { open_since: i64, at: i64 },

    #[error("irrigation turned off at {at} but no session is open")]
    NoOpenSession { at: i64 },

    #[error("cannot resume tracker: {0}")]
    InconsistentResume(String),
}

/// Taxonomy class of a [`MonitorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Sequence,
    Invariant,
}

impl MonitorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidThresholds(_) | Self::MissingForcedState => ErrorKind::Configuration,
            Self::OutOfOrder { .. } | Self::DurationOverflow { .. } => ErrorKind::Sequence,
            Self::SessionAlreadyOpen { .. }
            | Self::NoOpenSession { .. }
            | Self::InconsistentResume(_) => ErrorKind::Invariant,
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(MonitorError::MissingForcedState.kind(), ErrorKind::Configuration);
        assert_eq!(
            MonitorError::InvalidThresholds("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            MonitorError::OutOfOrder { previous: 2, received: 1 }.kind(),
            ErrorKind::Sequence
        );
        assert_eq!(
            MonitorError::DurationOverflow { start: i64::MIN, end: i64::MAX }.kind(),
            ErrorKind::Sequence
        );
        assert_eq!(MonitorError::NoOpenSession { at: 5 }.kind(), ErrorKind::Invariant);
    }

    #[test]
    fn out_of_order_message_names_both_timestamps() {
        let msg = MonitorError::OutOfOrder { previous: 100, received: 99 }.to_string();
        assert!(msg.contains("99") && msg.contains("100"), "got: {msg}");
    }
}
