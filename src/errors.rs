//! Errors.

use std::io;

/// Various errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("socket error occurred: {0}")]
    SocketError(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("unsupported feature: {0}")]
    Unsupported(String),
    #[error("{message}")]
    Execution {
        message: String,
        sqlstate: Option<String>,
    },
    #[error("bad client startup packet")]
    ClientBadStartup,
    #[error("unexpected startup code {0}")]
    UnexpectedStartupCode(i32),
    #[error("bad configuration: {0}")]
    BadConfig(String),
    #[error("shutting down")]
    ShuttingDown,
    #[error("message exceeds the maximum message size")]
    MaxMessageSize,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// SQLSTATE sent in the `C` field of an `ErrorResponse` for this error.
    pub fn sqlstate(&self) -> &str {
        match self {
            Error::Protocol(_) | Error::ClientBadStartup | Error::UnexpectedStartupCode(_) => {
                "08P01"
            }
            Error::Unsupported(_) => "0A000",
            Error::Execution { sqlstate, .. } => sqlstate.as_deref().unwrap_or("XX000"),
            Error::MaxMessageSize => "08P01",
            Error::ShuttingDown => "57P01",
            _ => "XX000",
        }
    }

    /// True when no further bytes should be written to the client.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::SocketError(_) | Error::MaxMessageSize | Error::ClientBadStartup
        )
    }
}

impl From<crate::executor::ExecuteError> for Error {
    fn from(err: crate::executor::ExecuteError) -> Self {
        Error::Execution {
            message: err.message,
            sqlstate: err.sqlstate,
        }
    }
}
