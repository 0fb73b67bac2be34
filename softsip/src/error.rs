use std::str::Utf8Error;

use thiserror::Error;

use crate::message::{SipMethod, StatusCode};

pub type Result<T> = std::result::Result<T, Error>;

/// Error on parsing
#[derive(Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SipParserError {
    /// Message in error
    pub message: String,
}

#[allow(missing_docs)]
impl SipParserError {
    pub fn new<T>(s: T) -> Self
    where
        T: AsRef<str>,
    {
        Self {
            message: s.as_ref().to_string(),
        }
    }
}

impl std::convert::From<&str> for SipParserError {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl std::convert::From<String> for SipParserError {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl std::convert::From<Utf8Error> for SipParserError {
    fn from(value: Utf8Error) -> Self {
        SipParserError {
            message: format!("{:#?}", value),
        }
    }
}

impl std::convert::From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::ParseError(value.into())
    }
}

impl From<std::fmt::Error> for Error {
    fn from(value: std::fmt::Error) -> Self {
        Self::FmtError(value)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    ParseError(#[from] SipParserError),

    #[error("Missing required '{0}' header")]
    MissingRequiredHeader(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Fmt Error")]
    FmtError(std::fmt::Error),

    #[error("Transaction timed out waiting for a final response")]
    TsxTimeout,

    #[error("Transport to {0} is down")]
    TransportDown(std::net::SocketAddr),

    #[error("Authentication failed ({0} after credentials were sent)")]
    AuthenticationFailed(StatusCode),

    #[error("The registrar rejected the registration with {0}")]
    RegisterFailed(StatusCode),

    #[error("Server challenge is not a usable digest challenge")]
    InvalidChallenge,

    #[error("No account registered for '{0}'")]
    UnknownAccount(String),

    #[error("No call with id '{0}'")]
    UnknownCall(String),

    #[error("Call '{0}' does not accept this operation in its current state")]
    InvalidCallState(String),

    #[error("Method {0} cannot establish a dialog")]
    InvalidDialogMethod(SipMethod),

    #[error("Request cancelled")]
    Cancelled,
}
