//! Provider error classification
//!
//! Every status-code and message rule the engine applies to provider errors
//! lives here. The same status means different things depending on which call
//! produced it (a 404 on the change journal is an expired cursor, a 404 on a
//! label modification is a deleted label), so callers pass the operation.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Which provider call produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Reading the change journal from a cursor
    ChangeJournal,
    /// Fetching a single message
    MessageFetch,
    /// Adding/removing labels on a message
    LabelModify,
    /// Anything else (profile cursor, listing, label creation)
    Other,
}

/// Closed set of error classes the engine acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Worth retrying: timeouts, rate limits, 5xx, connection resets
    Transient,
    /// The referenced cursor or message no longer exists on the provider
    Invalidated,
    /// A label the operation relied on is gone; retrying cannot help
    PermanentLabelError,
    /// Nothing matched
    Unknown,
}

const CURSOR_INVALID_MESSAGES: &[&str] = &["invalid history id", "history expired"];

const LABEL_MISSING_MESSAGES: &[&str] = &[
    "label not found",
    "invalid label",
    "requested entity was not found",
    "may have been deleted",
];

const TRANSIENT_MESSAGES: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "ratelimit",
    "too many requests",
    "connection reset",
    "connection refused",
    "broken pipe",
    "temporarily unavailable",
    "backend error",
];

const TRANSIENT_STATUSES: &[u16] = &[408, 425, 429, 500, 502, 503, 504];

/// Classify a provider error raised by `operation`.
pub fn classify(operation: Operation, err: &ProviderError) -> ErrorClass {
    let message = err.message.to_lowercase();

    match operation {
        Operation::ChangeJournal => {
            if matches!(err.status, Some(404 | 410)) || contains_any(&message, CURSOR_INVALID_MESSAGES)
            {
                return ErrorClass::Invalidated;
            }
        }
        Operation::MessageFetch => {
            if matches!(err.status, Some(404 | 410)) {
                return ErrorClass::Invalidated;
            }
        }
        Operation::LabelModify => {
            if err.status == Some(404) || contains_any(&message, LABEL_MISSING_MESSAGES) {
                return ErrorClass::PermanentLabelError;
            }
        }
        Operation::Other => {}
    }

    if is_transient(err.status, &message) {
        ErrorClass::Transient
    } else {
        ErrorClass::Unknown
    }
}

/// Whether a change-journal error means the stored cursor is unusable.
pub fn is_cursor_invalid(err: &ProviderError) -> bool {
    classify(Operation::ChangeJournal, err) == ErrorClass::Invalidated
}

/// Whether a label-modify error means the label itself is gone.
pub fn is_label_missing(err: &ProviderError) -> bool {
    classify(Operation::LabelModify, err) == ErrorClass::PermanentLabelError
}

fn is_transient(status: Option<u16>, message: &str) -> bool {
    if let Some(code) = status {
        if TRANSIENT_STATUSES.contains(&code) {
            return true;
        }
    }
    contains_any(message, TRANSIENT_MESSAGES)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(status: Option<u16>, message: &str) -> ProviderError {
        ProviderError {
            status,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_change_journal_classification() {
        let cases = [
            (Some(404), "Not Found", ErrorClass::Invalidated),
            (Some(410), "Gone", ErrorClass::Invalidated),
            (Some(400), "Invalid history ID", ErrorClass::Invalidated),
            (None, "history expired for start id", ErrorClass::Invalidated),
            (Some(503), "Service Unavailable", ErrorClass::Transient),
            (Some(429), "Too Many Requests", ErrorClass::Transient),
            (None, "request timed out", ErrorClass::Transient),
            (Some(401), "Unauthorized", ErrorClass::Unknown),
        ];
        for (status, message, expected) in cases {
            assert_eq!(
                classify(Operation::ChangeJournal, &err(status, message)),
                expected,
                "{:?} {}",
                status,
                message
            );
        }
    }

    #[test]
    fn test_label_modify_classification() {
        let cases = [
            (Some(404), "whatever", ErrorClass::PermanentLabelError),
            (Some(400), "Invalid label: Label_42", ErrorClass::PermanentLabelError),
            (Some(400), "Label not found", ErrorClass::PermanentLabelError),
            (None, "Requested entity was not found.", ErrorClass::PermanentLabelError),
            (Some(400), "The label may have been deleted", ErrorClass::PermanentLabelError),
            (Some(500), "Backend Error", ErrorClass::Transient),
            (None, "connection reset by peer", ErrorClass::Transient),
            (Some(403), "Insufficient Permission", ErrorClass::Unknown),
            (Some(410), "Gone", ErrorClass::Unknown),
        ];
        for (status, message, expected) in cases {
            assert_eq!(
                classify(Operation::LabelModify, &err(status, message)),
                expected,
                "{:?} {}",
                status,
                message
            );
        }
    }

    #[test]
    fn test_message_fetch_404_is_invalidated() {
        assert_eq!(
            classify(Operation::MessageFetch, &err(Some(404), "Not Found")),
            ErrorClass::Invalidated
        );
        assert_eq!(
            classify(Operation::MessageFetch, &err(Some(504), "Gateway Timeout")),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_status_meaning_depends_on_operation() {
        let not_found = err(Some(404), "Not Found");
        assert_eq!(classify(Operation::Other, &not_found), ErrorClass::Unknown);
        assert!(is_cursor_invalid(&not_found));
        assert!(is_label_missing(&not_found));
    }
}
