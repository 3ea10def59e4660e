//! Error types for the wire protocol layer.
//!
//! Everything below the session boundary reports a [`ProtocolError`]. A
//! protocol error is always fatal to the connection: it means the byte stream
//! is no longer in a state we can interpret (truncated part, bad length
//! indicator, mismatched locator, ...). Server-reported SQL errors are *not*
//! protocol errors; they travel as a regular [`ServerError`] part and leave
//! the connection usable.

use thiserror::Error;

/// Errors raised while encoding or decoding the wire format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Decoder ran past the end of the declared part body
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    Underflow {
        /// Bytes the operation needed
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// Length indicator byte is one of the reserved values 246..=254
    #[error("reserved length indicator {0:#04x}")]
    ReservedLengthIndicator(u8),

    /// Byte sequence is not valid CESU-8
    #[error("invalid CESU-8 sequence at offset {0}")]
    InvalidCesu8(usize),

    /// CESU-8 sequence is cut off at a buffer boundary
    #[error("incomplete CESU-8 sequence at end of chunk")]
    IncompleteCesu8,

    /// Value does not fit the wire field
    #[error("value out of range for {field}: {value}")]
    OutOfRange {
        /// Wire field that overflowed
        field: &'static str,
        /// Offending value
        value: i64,
    },

    /// Part argument count exceeds the 32-bit big argument count field
    #[error("maximum number of arguments exceeded: {0}")]
    TooManyArguments(usize),

    /// Nested auth parameter block larger than 65535 bytes
    #[error("invalid sub parameter size {size} - maximum {max}")]
    SubParameterSize {
        /// Actual block size
        size: usize,
        /// Largest encodable size (2^16 - 1)
        max: usize,
    },

    /// Message header announced an unsupported segment count
    #[error("invalid number of segments {0} - expected 1")]
    InvalidSegmentCount(i16),

    /// Unknown enumeration value on the wire
    #[error("invalid {what}: {value}")]
    InvalidEnumValue {
        /// Which enumeration failed to parse
        what: &'static str,
        /// Raw wire value
        value: i64,
    },

    /// Server reply violated the authentication exchange shape
    #[error("invalid auth payload: {0}")]
    InvalidAuthPayload(String),

    /// Unsolicited or out-of-sequence LOB locator
    #[error("lob locator mismatch: got {got}, expected {expected}")]
    LocatorMismatch {
        /// Locator the server sent
        got: u64,
        /// Locator we were streaming
        expected: u64,
    },

    /// Anything else that makes the stream unusable
    #[error("protocol error: {0}")]
    Other(String),
}

/// Result alias used throughout the protocol crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// A structured error reported by the server.
///
/// Carried in an `Error` part of an error-kind reply segment. Unlike
/// [`ProtocolError`] this is an SQL-level condition; the connection stays
/// healthy and the caller decides what to do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Numeric error code
    pub code: i32,
    /// 1-based position in the SQL text, 0 if not applicable
    pub position: i32,
    /// Severity: 0 warning, 1 error, 2 fatal
    pub level: i8,
    /// Five-character SQLSTATE
    pub sql_state: [u8; 5],
    /// Error text
    pub text: String,
}

impl ServerError {
    /// Severity level of a warning.
    pub const LEVEL_WARNING: i8 = 0;
    /// Severity level of a statement error.
    pub const LEVEL_ERROR: i8 = 1;
    /// Severity level of a fatal session error.
    pub const LEVEL_FATAL: i8 = 2;

    /// True if this error is only a warning.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        self.level == Self::LEVEL_WARNING
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SQL error {} (sqlstate {}): {}",
            self.code,
            String::from_utf8_lossy(&self.sql_state),
            self.text
        )
    }
}

impl std::error::Error for ServerError {}
