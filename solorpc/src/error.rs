//! Error type for streams, managers and connections.
//!
//! This module provides [`Error`], returned by every fallible operation in
//! this crate. Errors are cheap to clone because a single termination cause
//! is handed to every task waiting on a stream or connection.

use std::io;
use std::sync::Arc;

use solorpc_core::{Code, Status, WireError};

/// Errors surfaced by solorpc.
///
/// The variants fall into a few classes:
/// - [`Error::Status`]: an application error, local or sent by the peer
/// - [`Error::Protocol`] and [`Error::Transport`]: the connection is broken
/// - [`Error::Canceled`] and [`Error::DeadlineExceeded`]: a call's context ended
/// - the remaining variants: a stream or connection already terminated
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// An application error with an optional numeric code.
    #[error("{0}")]
    Status(Status),

    /// The peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport failed, or reached end of stream.
    #[error("transport error: {0}")]
    Transport(Arc<io::Error>),

    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("stream terminated by sending close")]
    Closed,

    #[error("stream terminated by sending error")]
    ErrorSent,

    #[error("remote closed stream")]
    RemoteClosed,

    #[error("stream terminated by both sides closing send")]
    BothClosed,

    #[error("send after CloseSend")]
    SendClosed,

    #[error("manager closed")]
    ManagerClosed,

    #[error("manager closed after inactivity")]
    InactivityTimeout,

    /// Message encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Message decoding failed.
    #[error("decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Create a protocol error.
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Error::Protocol(message.into())
    }

    /// Get the status code for this error.
    ///
    /// For non-Status variants, returns an appropriate code:
    /// - Protocol: `Internal`
    /// - Transport, ManagerClosed, InactivityTimeout: `Unavailable`
    /// - stream termination sentinels: `FailedPrecondition`
    /// - Encode/Decode: `Internal`
    pub fn code(&self) -> Code {
        match self {
            Error::Status(status) => status.code(),
            Error::Protocol(_) | Error::Encode(_) | Error::Decode(_) => Code::Internal,
            Error::Transport(_) | Error::ManagerClosed | Error::InactivityTimeout => {
                Code::Unavailable
            }
            Error::Canceled => Code::Canceled,
            Error::DeadlineExceeded => Code::DeadlineExceeded,
            Error::Closed
            | Error::ErrorSent
            | Error::RemoteClosed
            | Error::BothClosed
            | Error::SendClosed => Code::FailedPrecondition,
        }
    }

    /// The numeric code written into an Error packet for this error.
    ///
    /// Application statuses keep their raw code, including custom ones.
    pub fn wire_code(&self) -> u64 {
        match self {
            Error::Status(status) => status.raw_code(),
            other => other.code().as_u64(),
        }
    }

    /// The application status, if this is one.
    pub fn status(&self) -> Option<&Status> {
        match self {
            Error::Status(status) => Some(status),
            _ => None,
        }
    }

    /// Returns true when the transport reached a clean end of stream.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Transport(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }

    /// Returns true for context cancellation and deadline expiry.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled | Error::DeadlineExceeded)
    }

    /// Returns true when the error ended the whole connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::Transport(_) | Error::ManagerClosed | Error::InactivityTimeout
        )
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Status(status)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(Arc::new(err))
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(err) => Error::from(err),
            other => Error::Protocol(other.to_string()),
        }
    }
}
