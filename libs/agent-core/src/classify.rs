//! Maps failures onto a retry decision.
//!
//! Structured probes (cancellation, timeout, transport, HTTP status) are
//! consulted first; the error text is only a fallback for errors that carry
//! no structure.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
    /// Not recognised. Never retried.
    Unknown,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Retryable)
    }
}

/// Structured facts an error can expose to [`classify`].
pub trait RetryClassify: std::error::Error {
    fn status_code(&self) -> Option<u16> {
        None
    }

    fn is_cancelled(&self) -> bool {
        false
    }

    fn is_timeout(&self) -> bool {
        false
    }

    fn is_network(&self) -> bool {
        false
    }
}

const CONTEXT_LIMIT_PHRASES: &[&str] = &[
    "context length",
    "maximum context",
    "token limit",
    "tokens exceeded",
];

pub fn classify<E: RetryClassify + ?Sized>(error: Option<&E>) -> ErrorClass {
    let Some(error) = error else {
        return ErrorClass::NonRetryable;
    };

    if error.is_cancelled() {
        return ErrorClass::NonRetryable;
    }

    let text = error.to_string().to_ascii_lowercase();

    if is_context_limit_text(&text) {
        return ErrorClass::NonRetryable;
    }

    if error.is_timeout() || error.is_network() {
        return ErrorClass::Retryable;
    }

    if let Some(status) = error.status_code() {
        return classify_status(status);
    }

    if text.contains("timeout") || text.contains("timed out") {
        return ErrorClass::Retryable;
    }

    ErrorClass::Unknown
}

pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        429 | 502 | 503 | 504 => ErrorClass::Retryable,
        500..=599 => ErrorClass::Retryable,
        400..=499 => ErrorClass::NonRetryable,
        _ => ErrorClass::Unknown,
    }
}

/// True when the text reports an oversized prompt.
pub fn is_context_limit_error(text: &str) -> bool {
    is_context_limit_text(&text.to_ascii_lowercase())
}

fn is_context_limit_text(lowercase: &str) -> bool {
    CONTEXT_LIMIT_PHRASES
        .iter()
        .any(|phrase| lowercase.contains(phrase))
}

impl RetryClassify for io::Error {
    fn is_timeout(&self) -> bool {
        self.kind() == io::ErrorKind::TimedOut
    }

    fn is_network(&self) -> bool {
        matches!(
            self.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::AddrNotAvailable
                | io::ErrorKind::UnexpectedEof
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;

    fn status(code: u16) -> ModelError {
        ModelError::Status {
            status: code,
            message: "provider said no".to_string(),
        }
    }

    #[test]
    fn nothing_to_retry_without_an_error() {
        assert_eq!(classify::<ModelError>(None), ErrorClass::NonRetryable);
    }

    #[test]
    fn transient_statuses_are_retryable() {
        for code in [429, 500, 502, 503, 504, 507, 599] {
            assert_eq!(
                classify(Some(&status(code))),
                ErrorClass::Retryable,
                "status {code} should be retryable"
            );
        }
    }

    #[test]
    fn client_statuses_are_not_retryable() {
        for code in [400, 401, 403, 404, 409, 422] {
            assert_eq!(
                classify(Some(&status(code))),
                ErrorClass::NonRetryable,
                "status {code} should not be retryable"
            );
        }
    }

    #[test]
    fn cancellation_is_never_retried() {
        assert_eq!(
            classify(Some(&ModelError::Cancelled)),
            ErrorClass::NonRetryable
        );
    }

    #[test]
    fn deadline_and_transport_failures_are_retryable() {
        assert_eq!(
            classify(Some(&ModelError::Timeout("deadline exceeded".to_string()))),
            ErrorClass::Retryable
        );
        assert_eq!(
            classify(Some(&ModelError::Network("connection reset by peer".to_string()))),
            ErrorClass::Retryable
        );
    }

    #[test]
    fn context_limit_wins_over_status() {
        let error = ModelError::Status {
            status: 503,
            message: "This model's maximum context length is 128000 tokens".to_string(),
        };
        assert_eq!(classify(Some(&error)), ErrorClass::NonRetryable);

        let error = ModelError::Other("prompt tokens exceeded".to_string());
        assert_eq!(classify(Some(&error)), ErrorClass::NonRetryable);
    }

    #[test]
    fn timeout_text_is_a_fallback() {
        let error = ModelError::Other("upstream request timeout".to_string());
        assert_eq!(classify(Some(&error)), ErrorClass::Retryable);
    }

    #[test]
    fn unrecognised_errors_are_unknown() {
        let error = ModelError::Other("something odd happened".to_string());
        assert_eq!(classify(Some(&error)), ErrorClass::Unknown);
        assert!(!ErrorClass::Unknown.is_retryable());
    }

    #[test]
    fn io_errors_map_by_kind() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        let missing = io::Error::from(io::ErrorKind::NotFound);

        assert_eq!(classify(Some(&reset)), ErrorClass::Retryable);
        assert_eq!(classify(Some(&timed_out)), ErrorClass::Retryable);
        assert_eq!(classify(Some(&missing)), ErrorClass::Unknown);
    }
}
