//! Driver error taxonomy.
//!
//! Four families with different blast radius:
//!
//! - parse/DSN errors: static, never touch a connection
//! - transport and protocol errors: the connection is marked bad and every
//!   further operation returns [`DriverError::BadConnection`]
//! - server ([`ServerError`]) errors: typed SQL failures, connection stays
//!   usable
//! - caller contract errors: nested query/transaction, argument counts

use hdbc_proto::{ProtocolError, ServerError};
use thiserror::Error;

use crate::dsn::ParseError;

/// Errors surfaced by the driver core.
#[derive(Error, Debug)]
pub enum DriverError {
    /// DSN or parameter parse failure
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Connection has been marked bad (transport failure or cancellation)
    #[error("bad connection")]
    BadConnection,

    /// Operation cancelled by the caller
    #[error("db connection is canceled")]
    Cancelled,

    /// I/O failure on the wire
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Read or write deadline exceeded
    #[error("connection timeout")]
    Timeout,

    /// Wire format violation; fatal to the connection
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Structured error reported by the server; connection stays usable
    #[error(transparent)]
    Hdb(ServerError),

    /// A statement was executed while a result set is still open
    #[error("nested sql queries are not supported")]
    NestedQuery,

    /// A transaction was started inside a transaction
    #[error("nested transactions are not supported")]
    NestedTransaction,

    /// The requested isolation level is not supported
    #[error("unsupported isolation level")]
    UnsupportedIsolationLevel,

    /// Argument count does not match the prepared statement
    #[error("invalid number of arguments {got} - {expected} expected")]
    InvalidArgumentCount {
        /// Arguments supplied
        got: usize,
        /// Arguments the statement requires
        expected: usize,
    },

    /// A value could not be coerced to its parameter type
    #[error("conversion error: {0}")]
    Conversion(String),

    /// The server assigned an unusable session id
    #[error("invalid session id {0}")]
    InvalidSessionId(i64),

    /// `exec_many` failed after some packages were written
    #[error("execute aborted after {rows_affected} rows: {source}")]
    PartialExecute {
        /// Affected rows of the packages that succeeded
        rows_affected: u64,
        /// The failure that stopped the sequence
        source: Box<DriverError>,
    },
}

impl DriverError {
    /// True if the connection must be discarded after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::BadConnection
            | Self::Cancelled
            | Self::Io(_)
            | Self::Timeout
            | Self::Protocol(_)
            | Self::InvalidSessionId(_) => true,
            Self::PartialExecute { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

/// Result alias used throughout the client crate.
pub type Result<T> = std::result::Result<T, DriverError>;
