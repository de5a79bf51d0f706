//! Wire errors, status codes and the application error payload.
//!
//! This module provides:
//! - [`WireError`]: failures while decoding or reassembling frames
//! - [`Code`]: numeric status codes carried by Error packets
//! - [`Status`]: an application error with a code and message
//! - [`marshal_error`] / [`unmarshal_error`]: the Error packet payload

use std::io;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

/// Errors produced by the wire codec.
///
/// Everything except [`WireError::Io`] is a protocol violation: the peer sent
/// bytes that break the framing rules and the connection cannot continue.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A varint ran past the 10 bytes a `u64` can need.
    #[error("varint too long")]
    VarintOverflow,

    /// A frame arrived with an ID lower than, or equal to a completed, ID.
    #[error("id monotonicity violation")]
    IdMonotonicity,

    /// A frame continued a packet under a different kind.
    #[error("packet kind change")]
    KindChange,

    /// A packet or frame exceeded the configured maximum size.
    #[error("data overflow")]
    DataOverflow,

    /// The underlying transport failed (including end of stream).
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl WireError {
    /// Returns true when the error is a framing violation rather than I/O.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, WireError::Io(_))
    }

    /// Returns true when the transport reached a clean end of stream.
    pub fn is_eof(&self) -> bool {
        matches!(self, WireError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Status codes that can travel with an Error packet.
///
/// The numeric value is what goes on the wire. `Ok` (zero) means "no code".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

/// Every code in wire order; index equals numeric value.
const CODES: [Code; 17] = [
    Code::Ok,
    Code::Canceled,
    Code::Unknown,
    Code::InvalidArgument,
    Code::DeadlineExceeded,
    Code::NotFound,
    Code::AlreadyExists,
    Code::PermissionDenied,
    Code::ResourceExhausted,
    Code::FailedPrecondition,
    Code::Aborted,
    Code::OutOfRange,
    Code::Unimplemented,
    Code::Internal,
    Code::Unavailable,
    Code::DataLoss,
    Code::Unauthenticated,
];

const NAMES: [&str; 17] = [
    "ok",
    "canceled",
    "unknown",
    "invalid_argument",
    "deadline_exceeded",
    "not_found",
    "already_exists",
    "permission_denied",
    "resource_exhausted",
    "failed_precondition",
    "aborted",
    "out_of_range",
    "unimplemented",
    "internal",
    "unavailable",
    "data_loss",
    "unauthenticated",
];

impl Code {
    /// Snake-case name, e.g. `"not_found"`.
    pub fn as_str(&self) -> &'static str {
        NAMES[*self as usize]
    }

    /// Map a numeric wire code back to a known [`Code`].
    pub fn from_u64(value: u64) -> Option<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|i| CODES.get(i))
            .copied()
    }

    /// The numeric value written on the wire.
    pub fn as_u64(&self) -> u64 {
        *self as u64
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no [`Code`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseCodeError(());

impl std::fmt::Display for ParseCodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("unrecognized status code name")
    }
}

impl std::error::Error for ParseCodeError {}

impl FromStr for Code {
    type Err = ParseCodeError;

    /// Accepts the names produced by [`Code::as_str`], plus `"cancelled"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "cancelled" {
            return Ok(Code::Canceled);
        }
        NAMES
            .iter()
            .position(|name| *name == s)
            .map(|i| CODES[i])
            .ok_or(ParseCodeError(()))
    }
}

/// Application error carried across the wire in an Error packet.
///
/// The code is kept as a raw `u64` so that application-specific codes outside
/// the [`Code`] table survive the round trip.
///
/// # Example
///
/// ```
/// use solorpc_core::{Code, Status};
///
/// let status = Status::not_found("user not found");
/// assert_eq!(status.code(), Code::NotFound);
/// assert_eq!(status.message(), "user not found");
///
/// let custom = Status::with_raw_code(4040, "teapot");
/// assert_eq!(custom.raw_code(), 4040);
/// assert_eq!(custom.code(), Code::Unknown);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    code: u64,
    message: String,
}

impl Status {
    /// Create a new status with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self::with_raw_code(code.as_u64(), message)
    }

    /// Create a status with an application-defined numeric code.
    pub fn with_raw_code<S: Into<String>>(code: u64, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a status without a code.
    pub fn from_message<S: Into<String>>(message: S) -> Self {
        Self::with_raw_code(0, message)
    }

    /// The error code. Codes outside the table map to [`Code::Unknown`].
    pub fn code(&self) -> Code {
        Code::from_u64(self.code).unwrap_or(Code::Unknown)
    }

    /// The numeric code exactly as carried on the wire.
    pub fn raw_code(&self) -> u64 {
        self.code
    }

    /// Returns true when a non-zero code is attached.
    pub fn has_code(&self) -> bool {
        self.code != 0
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn canceled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Canceled, message)
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    pub fn failed_precondition<S: Into<String>>(message: S) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// A server-side failure the caller cannot fix.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Status {}

/// Size of the big-endian code that prefixes an Error payload.
pub const ERROR_CODE_SIZE: usize = 8;

/// Encode an Error packet payload: `[code:8 big-endian][message]`.
pub fn marshal_error(code: u64, message: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(ERROR_CODE_SIZE + message.len());
    buf.put_u64(code);
    buf.put_slice(message.as_bytes());
    buf.freeze()
}

/// Decode an Error packet payload.
///
/// Payloads shorter than the code prefix are read as a code-less message.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn unmarshal_error(data: &[u8]) -> Status {
    if data.len() < ERROR_CODE_SIZE {
        return Status::from_message(String::from_utf8_lossy(data));
    }
    let (code, message) = data.split_at(ERROR_CODE_SIZE);
    let mut raw = [0u8; ERROR_CODE_SIZE];
    raw.copy_from_slice(code);
    Status::with_raw_code(u64::from_be_bytes(raw), String::from_utf8_lossy(message))
}
