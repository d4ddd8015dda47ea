//! Error and status types for the bus client
//!
//! Every fallible operation surfaces a `BusError` carrying a status
//! class (broad category), a status code (specific condition), an
//! optional custom code for middleware extensions, and a
//! human-readable reason. The (class, code, reason) triple is the
//! contract external callers key off of; validation failures
//! additionally carry the complete discrepancy list.

use std::fmt;
use thiserror::Error;

/// Broad category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    /// Configuration value missing or malformed
    Config,
    /// Connection lifecycle failure (create/connect/disconnect/reconnect)
    Connection,
    /// Malformed message, subject, or field
    Message,
    /// Message failed schema validation
    Validation,
    /// Callback registration or dispatch misuse
    Callback,
    /// Iterator advanced past its end
    Iterator,
    /// A blocking operation timed out
    Timeout,
    /// Middleware-level send/receive failure
    Transport,
    /// Schema template loading failure
    Schema,
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusClass::Config => "CONFIG",
            StatusClass::Connection => "CONNECTION",
            StatusClass::Message => "MESSAGE",
            StatusClass::Validation => "VALIDATION",
            StatusClass::Callback => "CALLBACK",
            StatusClass::Iterator => "ITERATOR",
            StatusClass::Timeout => "TIMEOUT",
            StatusClass::Transport => "TRANSPORT",
            StatusClass::Schema => "SCHEMA",
        };
        write!(f, "{}", s)
    }
}

/// Specific failure condition within a status class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    // Config
    InvalidValue,
    EntryNotFound,
    InvalidSchemaLevel,

    // Connection
    ConnectFailed,
    NotConnected,
    InvalidState,
    ReconnectExhausted,

    // Message
    InvalidFieldName,
    InvalidSubject,
    InvalidKind,
    FieldNotFound,
    TypeMismatch,
    ConversionError,
    ParseError,
    UnknownSchemaId,

    // Validation
    NonCompliant,

    // Callback
    DuplicateSubscription,
    ForeignHandle,
    AutoDispatchActive,
    NullCallback,

    // Iterator
    IteratorExhausted,

    // Timeout
    TimeoutOccurred,

    // Transport
    SendFailed,
    ReceiveFailed,
    SessionLost,

    // Schema
    TemplateDirNotFound,
    TemplateMalformed,

    /// Extension point; pair with a custom code
    Other,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Structured error for all fallible bus operations
#[derive(Error, Debug, Clone)]
#[error("[{class}:{code}] {reason}")]
pub struct BusError {
    class: StatusClass,
    code: StatusCode,
    custom: i32,
    reason: String,
    discrepancies: Vec<String>,
}

impl BusError {
    pub fn new(class: StatusClass, code: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            class,
            code,
            custom: 0,
            reason: reason.into(),
            discrepancies: Vec::new(),
        }
    }

    pub fn config(code: StatusCode, reason: impl Into<String>) -> Self {
        Self::new(StatusClass::Config, code, reason)
    }

    pub fn connection(code: StatusCode, reason: impl Into<String>) -> Self {
        Self::new(StatusClass::Connection, code, reason)
    }

    pub fn message(code: StatusCode, reason: impl Into<String>) -> Self {
        Self::new(StatusClass::Message, code, reason)
    }

    /// Validation failure carrying the complete discrepancy list,
    /// never just the first finding.
    pub fn validation(discrepancies: Vec<String>) -> Self {
        let reason = format!("message is non-compliant ({} discrepancies)", discrepancies.len());
        Self {
            class: StatusClass::Validation,
            code: StatusCode::NonCompliant,
            custom: 0,
            reason,
            discrepancies,
        }
    }

    pub fn callback(code: StatusCode, reason: impl Into<String>) -> Self {
        Self::new(StatusClass::Callback, code, reason)
    }

    pub fn iterator(code: StatusCode, reason: impl Into<String>) -> Self {
        Self::new(StatusClass::Iterator, code, reason)
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::new(StatusClass::Timeout, StatusCode::TimeoutOccurred, reason)
    }

    pub fn transport(code: StatusCode, reason: impl Into<String>) -> Self {
        Self::new(StatusClass::Transport, code, reason)
    }

    pub fn schema(code: StatusCode, reason: impl Into<String>) -> Self {
        Self::new(StatusClass::Schema, code, reason)
    }

    /// Attach a middleware-specific code
    pub fn with_custom_code(mut self, custom: i32) -> Self {
        self.custom = custom;
        self
    }

    pub fn class(&self) -> StatusClass {
        self.class
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn custom_code(&self) -> i32 {
        self.custom
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Validation discrepancies; empty for every other class
    pub fn discrepancies(&self) -> &[String] {
        &self.discrepancies
    }
}

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::message(StatusCode::ParseError, e.to_string())
    }
}

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BusError::connection(StatusCode::ConnectFailed, "no route to server");
        assert_eq!(err.to_string(), "[CONNECTION:ConnectFailed] no route to server");
    }

    #[test]
    fn test_error_accessors() {
        let err = BusError::message(StatusCode::FieldNotFound, "no field named X");
        assert_eq!(err.class(), StatusClass::Message);
        assert_eq!(err.code(), StatusCode::FieldNotFound);
        assert_eq!(err.custom_code(), 0);
        assert_eq!(err.reason(), "no field named X");
        assert!(err.discrepancies().is_empty());
    }

    #[test]
    fn test_custom_code() {
        let err = BusError::transport(StatusCode::SendFailed, "broker NAK").with_custom_code(42);
        assert_eq!(err.custom_code(), 42);
    }

    #[test]
    fn test_validation_carries_all_discrepancies() {
        let err = BusError::validation(vec![
            "missing required field MISSION-ID".to_string(),
            "missing required field COMPONENT".to_string(),
        ]);
        assert_eq!(err.class(), StatusClass::Validation);
        assert_eq!(err.code(), StatusCode::NonCompliant);
        assert_eq!(err.discrepancies().len(), 2);
        assert!(err.reason().contains("2 discrepancies"));
    }

    #[test]
    fn test_timeout_class() {
        let err = BusError::timeout("request timed out");
        assert_eq!(err.class(), StatusClass::Timeout);
        assert_eq!(err.code(), StatusCode::TimeoutOccurred);
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<String>("not valid json").unwrap_err();
        let err: BusError = json_err.into();
        assert_eq!(err.class(), StatusClass::Message);
        assert_eq!(err.code(), StatusCode::ParseError);
    }

    #[test]
    fn test_result_type() {
        let ok: Result<i32> = Ok(7);
        assert_eq!(ok.unwrap(), 7);
        let err: Result<i32> = Err(BusError::timeout("t"));
        assert!(err.is_err());
    }
}
