//! Typed option parts.
//!
//! Several part kinds share one layout: a list of `(key, typed value)`
//! entries where the key is an 8-bit code from a part-specific enumeration
//! and the value is self-describing via a type-code byte. Connect options,
//! client context and DB connect info all use this shape.

use crate::{
    encoding::{Decoder, Encoder},
    error::ProtocolError,
    typecode::TypeCode,
};

/// A typed option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// BOOLEAN option
    Bool(bool),
    /// TINYINT option
    TinyInt(i8),
    /// INTEGER option
    Int(i32),
    /// BIGINT option
    BigInt(i64),
    /// DOUBLE option
    Double(f64),
    /// String option (plain bytes on the wire, always ASCII-safe)
    String(String),
    /// Byte-string option
    Bytes(Vec<u8>),
}

impl OptionValue {
    fn type_code(&self) -> TypeCode {
        match self {
            Self::Bool(_) => TypeCode::Boolean,
            Self::TinyInt(_) => TypeCode::Tinyint,
            Self::Int(_) => TypeCode::Integer,
            Self::BigInt(_) => TypeCode::Bigint,
            Self::Double(_) => TypeCode::Double,
            Self::String(_) => TypeCode::String,
            Self::Bytes(_) => TypeCode::Bstring,
        }
    }

    /// Encoded size of the value body (without key and type-code bytes).
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Bool(_) | Self::TinyInt(_) => 1,
            Self::Int(_) => 4,
            Self::BigInt(_) | Self::Double(_) => 8,
            Self::String(s) => 2 + s.len(),
            Self::Bytes(b) => 2 + b.len(),
        }
    }

    /// Encode type-code byte plus value body.
    pub fn encode(&self, enc: &mut Encoder<'_>) {
        enc.u8(self.type_code() as u8);
        match self {
            Self::Bool(v) => enc.bool(*v),
            Self::TinyInt(v) => enc.i8(*v),
            Self::Int(v) => enc.i32(*v),
            Self::BigInt(v) => enc.i64(*v),
            Self::Double(v) => enc.f64(*v),
            Self::String(s) => {
                enc.i16(s.len() as i16);
                enc.bytes(s.as_bytes());
            },
            Self::Bytes(b) => {
                enc.i16(b.len() as i16);
                enc.bytes(b);
            },
        }
    }

    /// Decode a type-code byte plus value body.
    pub fn decode(dec: &mut Decoder<'_>) -> Option<Self> {
        let raw_tc = dec.u8();
        match TypeCode::from_u8(raw_tc) {
            Some(TypeCode::Boolean) => Some(Self::Bool(dec.bool())),
            Some(TypeCode::Tinyint) => Some(Self::TinyInt(dec.i8())),
            Some(TypeCode::Integer) => Some(Self::Int(dec.i32())),
            Some(TypeCode::Bigint) => Some(Self::BigInt(dec.i64())),
            Some(TypeCode::Double) => Some(Self::Double(dec.f64())),
            Some(TypeCode::String) => {
                let n = dec.i16() as usize;
                Some(Self::String(String::from_utf8_lossy(dec.bytes(n)).into_owned()))
            },
            Some(TypeCode::Bstring) => {
                let n = dec.i16() as usize;
                Some(Self::Bytes(dec.bytes(n).to_vec()))
            },
            _ => {
                dec.latch(ProtocolError::InvalidEnumValue {
                    what: "option type code",
                    value: i64::from(raw_tc),
                });
                None
            },
        }
    }
}

/// Key enumeration of an option part.
pub trait OptionKey: Copy + Eq + std::fmt::Debug {
    /// Convert from the raw wire value.
    fn from_i8(v: i8) -> Option<Self>
    where
        Self: Sized;
    /// Convert to the raw wire value.
    fn to_i8(self) -> i8;
}

/// An ordered `(key, value)` option list.
#[derive(Debug, Clone, PartialEq)]
pub struct Options<K: OptionKey> {
    entries: Vec<(K, OptionValue)>,
}

impl<K: OptionKey> Default for Options<K> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<K: OptionKey> Options<K> {
    /// Empty option list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries (the part's argument count).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace `key`.
    pub fn set(&mut self, key: K, value: OptionValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style [`Options::set`].
    #[must_use]
    pub fn with(mut self, key: K, value: OptionValue) -> Self {
        self.set(key, value);
        self
    }

    /// Look up `key`.
    #[must_use]
    pub fn get(&self, key: K) -> Option<&OptionValue> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(K, OptionValue)> {
        self.entries.iter()
    }

    /// Merge `other` into `self`, replacing existing keys.
    pub fn merge(&mut self, other: Options<K>) {
        for (k, v) in other.entries {
            self.set(k, v);
        }
    }

    /// Encoded body size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.iter().map(|(_, v)| 2 + v.size()).sum()
    }

    /// Encode all entries.
    pub fn encode(&self, enc: &mut Encoder<'_>) {
        for (k, v) in &self.entries {
            enc.i8(k.to_i8());
            v.encode(enc);
        }
    }

    /// Decode `num_arg` entries. Unknown keys are consumed and dropped.
    pub fn decode(dec: &mut Decoder<'_>, num_arg: usize) -> Self {
        let mut opts = Self::new();
        for _ in 0..num_arg {
            let raw_key = dec.i8();
            let Some(value) = OptionValue::decode(dec) else { break };
            match K::from_i8(raw_key) {
                Some(key) => opts.set(key, value),
                None => tracing::debug!(key = raw_key, "skipping unknown option key"),
            }
        }
        opts
    }
}

/// Connect option keys negotiated at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
#[allow(missing_docs)]
pub enum ConnectOptionKey {
    ConnectionId = 1,
    CompleteArrayExecution = 2,
    ClientLocale = 3,
    SupportsLargeBulkOperations = 4,
    DistributionEnabled = 5,
    SelectForUpdateSupported = 14,
    ClientDistributionMode = 15,
    DistributionProtocolVersion = 17,
    SplitBatchCommands = 18,
    DataFormatVersion2 = 23,
    OsUser = 32,
    FullVersionString = 44,
    DatabaseName = 45,
    BuildPlatform = 46,
}

impl OptionKey for ConnectOptionKey {
    fn from_i8(v: i8) -> Option<Self> {
        match v {
            1 => Some(Self::ConnectionId),
            2 => Some(Self::CompleteArrayExecution),
            3 => Some(Self::ClientLocale),
            4 => Some(Self::SupportsLargeBulkOperations),
            5 => Some(Self::DistributionEnabled),
            14 => Some(Self::SelectForUpdateSupported),
            15 => Some(Self::ClientDistributionMode),
            17 => Some(Self::DistributionProtocolVersion),
            18 => Some(Self::SplitBatchCommands),
            23 => Some(Self::DataFormatVersion2),
            32 => Some(Self::OsUser),
            44 => Some(Self::FullVersionString),
            45 => Some(Self::DatabaseName),
            46 => Some(Self::BuildPlatform),
            _ => None,
        }
    }

    fn to_i8(self) -> i8 {
        self as i8
    }
}

/// Client distribution modes (value of `ClientDistributionMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ClientDistributionMode {
    /// Distribution off
    Off = 0,
    /// Connection-level distribution
    Connection = 1,
    /// Statement-level distribution
    Statement = 2,
    /// Both
    ConnectionStatement = 3,
}

/// Client context keys sent with the authenticate message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
#[allow(missing_docs)]
pub enum ClientContextKey {
    ClientVersion = 1,
    ClientType = 2,
    ClientApplicationProgram = 3,
}

impl OptionKey for ClientContextKey {
    fn from_i8(v: i8) -> Option<Self> {
        match v {
            1 => Some(Self::ClientVersion),
            2 => Some(Self::ClientType),
            3 => Some(Self::ClientApplicationProgram),
            _ => None,
        }
    }

    fn to_i8(self) -> i8 {
        self as i8
    }
}

/// DB connect info keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
#[allow(missing_docs)]
pub enum DbConnectInfoKey {
    DatabaseName = 1,
    Host = 2,
    Port = 3,
    IsConnected = 4,
}

impl OptionKey for DbConnectInfoKey {
    fn from_i8(v: i8) -> Option<Self> {
        match v {
            1 => Some(Self::DatabaseName),
            2 => Some(Self::Host),
            3 => Some(Self::Port),
            4 => Some(Self::IsConnected),
            _ => None,
        }
    }

    fn to_i8(self) -> i8 {
        self as i8
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn options_round_trip() {
        let opts = Options::new()
            .with(ConnectOptionKey::CompleteArrayExecution, OptionValue::Bool(true))
            .with(ConnectOptionKey::DataFormatVersion2, OptionValue::Int(8))
            .with(ConnectOptionKey::ClientLocale, OptionValue::String("en_US".into()))
            .with(ConnectOptionKey::ConnectionId, OptionValue::BigInt(123_456));

        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        opts.encode(&mut enc);
        enc.finish().unwrap();
        assert_eq!(buf.len(), opts.size());

        let mut dec = Decoder::new(&buf);
        let parsed: Options<ConnectOptionKey> = Options::decode(&mut dec, opts.len());
        dec.finish().unwrap();
        assert_eq!(parsed, opts);
    }

    #[test]
    fn unknown_keys_are_consumed() {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        enc.i8(99); // unknown key
        OptionValue::Int(1).encode(&mut enc);
        enc.i8(ConnectOptionKey::DatabaseName.to_i8());
        OptionValue::String("HXE".into()).encode(&mut enc);
        enc.finish().unwrap();

        let mut dec = Decoder::new(&buf);
        let parsed: Options<ConnectOptionKey> = Options::decode(&mut dec, 2);
        dec.finish().unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(
            parsed.get(ConnectOptionKey::DatabaseName),
            Some(&OptionValue::String("HXE".into()))
        );
    }

    #[test]
    fn set_replaces_existing_key() {
        let mut opts: Options<ClientContextKey> = Options::new();
        opts.set(ClientContextKey::ClientVersion, OptionValue::String("0.1".into()));
        opts.set(ClientContextKey::ClientVersion, OptionValue::String("0.2".into()));
        assert_eq!(opts.len(), 1);
        assert_eq!(
            opts.get(ClientContextKey::ClientVersion),
            Some(&OptionValue::String("0.2".into()))
        );
    }
}
