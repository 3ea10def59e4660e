//! # hdbc-proto: wire format of the hdbc driver
//!
//! This crate implements the framed binary protocol the driver speaks: a
//! three-level framing (message → segments → parts), a typed part registry,
//! the column type system, and the authentication state machines.
//!
//! It is pure encode/decode logic over in-memory buffers. No I/O, no
//! sessions, no sockets. The companion crate `hdbc-client` owns the
//! connection machinery and drives these codecs against a TCP stream.
//!
//! # Layout on the wire
//!
//! ```text
//! [message header 32B]
//!   [segment header 24B]
//!     [part header 16B][body][pad to 8]
//!     ...
//! ```
//!
//! All integers are little-endian except a few auth-only fields (the
//! sub-parameter size prefix and the PBKDF2 round count), which are
//! big-endian.
//!
//! # Modules
//!
//! - [`encoding`]: deferred-error byte codec
//! - [`cesu8`]: CESU-8 transcoding and the server's character counting
//! - [`framing`]: the three headers and size accounting
//! - [`parts`]: the request part registry
//! - [`fields`] / [`resultset`]: metadata and row decoding
//! - [`lob`]: piecewise LOB descriptors and parts
//! - [`auth`]: authentication methods (SCRAM variants, JWT, X509,
//!   session cookie)
//! - [`prolog`]: the pre-framing initialization handshake

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cesu8;
pub mod encoding;
pub mod error;
pub mod fields;
pub mod framing;
pub mod function_code;
pub mod lob;
pub mod message_type;
pub mod options;
pub mod part_kind;
pub mod parts;
pub mod prolog;
pub mod resultset;
pub mod typecode;
pub mod value;

pub use error::{ProtocolError, Result, ServerError};
pub use framing::{MessageHeader, PartAttributes, PartHeader, SegmentHeader, SegmentKind};
pub use function_code::FunctionCode;
pub use message_type::MessageType;
pub use part_kind::PartKind;
pub use typecode::TypeCode;
pub use value::HdbValue;
