//! Typed field values and their wire codecs.
//!
//! Parameter values travel with a leading type-code byte (the null bit set
//! on the code stands in for the whole value); result values travel without
//! a type code (the metadata already fixes the type) but with a leading
//! one-byte validity flag.
//!
//! Decimal layouts depend on the negotiated data format version: the classic
//! 16-byte packed decimal is used everywhere, and the FIXED8/12/16 codes
//! (plain scaled integers) appear in metadata from dfv 8 on.

use crate::{
    cesu8,
    encoding::{var_bytes_size, Decoder, Encoder},
    error::{ProtocolError, Result},
    lob::{LobInDescr, LobOutDescr, LOB_PRM_SIZE},
    typecode::TypeCode,
};

/// Exponent bias of the classic 16-byte decimal layout.
const DECIMAL_EXP_BIAS: i32 = 6176;
const DECIMAL_MANTISSA_BITS: u32 = 113;

/// A single field value.
pub enum HdbValue {
    /// SQL NULL
    Null,
    /// BOOLEAN
    Bool(bool),
    /// TINYINT (unsigned on the wire)
    TinyInt(u8),
    /// SMALLINT
    SmallInt(i16),
    /// INTEGER
    Int(i32),
    /// BIGINT
    BigInt(i64),
    /// REAL
    Real(f32),
    /// DOUBLE
    Double(f64),
    /// DECIMAL and the FIXED8/12/16 variants: `mantissa * 10^exponent`
    Decimal {
        /// Signed coefficient
        mantissa: i128,
        /// Power-of-ten scale
        exponent: i16,
    },
    /// Character data
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// LONGDATE / SECONDDATE tick count
    DateTime(i64),
    /// DAYDATE / SECONDTIME day or second count
    DayTime(i32),
    /// LOB parameter to upload
    Lob(LobInDescr),
    /// LOB result value to download
    LobOut(LobOutDescr),
}

impl std::fmt::Debug for HdbValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::TinyInt(v) => write!(f, "TinyInt({v})"),
            Self::SmallInt(v) => write!(f, "SmallInt({v})"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::BigInt(v) => write!(f, "BigInt({v})"),
            Self::Real(v) => write!(f, "Real({v})"),
            Self::Double(v) => write!(f, "Double({v})"),
            Self::Decimal { mantissa, exponent } => write!(f, "Decimal({mantissa}e{exponent})"),
            Self::String(v) => write!(f, "String({v:?})"),
            Self::Bytes(v) => write!(f, "Bytes({} bytes)", v.len()),
            Self::DateTime(v) => write!(f, "DateTime({v})"),
            Self::DayTime(v) => write!(f, "DayTime({v})"),
            Self::Lob(d) => d.fmt(f),
            Self::LobOut(d) => d.fmt(f),
        }
    }
}

impl PartialEq for HdbValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::TinyInt(a), Self::TinyInt(b)) => a == b,
            (Self::SmallInt(a), Self::SmallInt(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (
                Self::Decimal { mantissa: am, exponent: ae },
                Self::Decimal { mantissa: bm, exponent: be },
            ) => am == bm && ae == be,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::DayTime(a), Self::DayTime(b)) => a == b,
            (Self::LobOut(a), Self::LobOut(b)) => a == b,
            // upload descriptors have reader identity, not value identity
            _ => false,
        }
    }
}

impl HdbValue {
    /// True for [`HdbValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Body size of this value as a parameter, excluding the type-code byte.
    ///
    /// LOB chunks are not included here; they are appended at the end of the
    /// row and accounted for by the input-parameter sizing pass.
    #[must_use]
    pub fn prm_size(&self, tc: TypeCode) -> usize {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::TinyInt(_) => 1,
            Self::SmallInt(_) => 2,
            Self::Int(_) => 4,
            Self::BigInt(_) => 8,
            Self::Real(_) => 4,
            Self::Double(_) => 8,
            Self::Decimal { .. } => match tc {
                TypeCode::Fixed8 => 8,
                TypeCode::Fixed12 => 12,
                TypeCode::Fixed16 => 16,
                _ => 16,
            },
            Self::String(s) => var_bytes_size(cesu8::str_size(s)),
            Self::Bytes(b) => var_bytes_size(b.len()),
            Self::DateTime(_) => 8,
            Self::DayTime(_) => 4,
            Self::Lob(_) => LOB_PRM_SIZE,
            Self::LobOut(_) => 0,
        }
    }

    /// Encode this value as a parameter: type-code byte, then the body.
    pub fn encode_prm(&self, enc: &mut Encoder<'_>, tc: TypeCode) {
        if self.is_null() {
            enc.u8(tc.null_value());
            return;
        }
        enc.u8(tc as u8);
        match self {
            Self::Null => unreachable!("handled above"),
            Self::Bool(v) => enc.bool(*v),
            Self::TinyInt(v) => enc.u8(*v),
            Self::SmallInt(v) => enc.i16(*v),
            Self::Int(v) => enc.i32(*v),
            Self::BigInt(v) => enc.i64(*v),
            Self::Real(v) => enc.u32(v.to_bits()),
            Self::Double(v) => enc.f64(*v),
            Self::Decimal { mantissa, exponent } => {
                encode_decimal(enc, tc, *mantissa, *exponent);
            },
            Self::String(s) => enc.li_cesu8_str(s),
            Self::Bytes(b) => enc.li_bytes(b),
            Self::DateTime(v) => enc.i64(*v),
            Self::DayTime(v) => enc.i32(*v),
            Self::Lob(descr) => descr.encode_descr(enc),
            Self::LobOut(_) => {
                enc.latch(ProtocolError::Other("lob output descriptor sent as parameter".into()));
            },
        }
    }

    /// Decode a result value per the field's type code.
    pub fn decode_res(dec: &mut Decoder<'_>, tc: TypeCode, fraction: i16) -> Result<Self> {
        if tc.is_lob() {
            return Ok(match LobOutDescr::decode(dec, tc.is_char_based()) {
                Some(descr) => Self::LobOut(descr),
                None => Self::Null,
            });
        }
        if !dec.bool() {
            return Ok(Self::Null);
        }
        let v = match tc {
            TypeCode::Boolean => Self::Bool(dec.bool()),
            TypeCode::Tinyint => Self::TinyInt(dec.u8()),
            TypeCode::Smallint => Self::SmallInt(dec.i16()),
            TypeCode::Integer => Self::Int(dec.i32()),
            TypeCode::Bigint => Self::BigInt(dec.i64()),
            TypeCode::Real => Self::Real(f32::from_bits(dec.u32())),
            TypeCode::Double => Self::Double(dec.f64()),
            TypeCode::Decimal => decode_classic_decimal(dec),
            TypeCode::Fixed8 => Self::Decimal { mantissa: i128::from(dec.i64()), exponent: -fraction },
            TypeCode::Fixed12 => Self::Decimal { mantissa: decode_i96(dec), exponent: -fraction },
            TypeCode::Fixed16 => {
                Self::Decimal { mantissa: dec.u128() as i128, exponent: -fraction }
            },
            TypeCode::Char
            | TypeCode::Varchar
            | TypeCode::Nchar
            | TypeCode::Nvarchar
            | TypeCode::String
            | TypeCode::Nstring
            | TypeCode::Shorttext => {
                // transcoding failures are per-field conversion errors, not
                // stream corruption: the cursor is already past the value
                Self::String(cesu8::decode(dec.li_bytes())?)
            },
            TypeCode::Binary
            | TypeCode::Varbinary
            | TypeCode::Bstring
            | TypeCode::Geometry
            | TypeCode::Point => Self::Bytes(dec.li_bytes().to_vec()),
            TypeCode::Longdate | TypeCode::Seconddate => Self::DateTime(dec.i64()),
            TypeCode::Daydate | TypeCode::Secondtime => Self::DayTime(dec.i32()),
            TypeCode::Clob | TypeCode::Nclob | TypeCode::Blob | TypeCode::Text => {
                unreachable!("lob handled above")
            },
        };
        Ok(v)
    }

    /// Encode in the result-value layout (server side; used by tests).
    pub fn encode_res(&self, enc: &mut Encoder<'_>, tc: TypeCode) {
        if tc.is_lob() {
            match self {
                Self::LobOut(descr) => descr.encode(enc),
                _ => {
                    enc.u8(0);
                    enc.u8(crate::lob::LobOptions::NULL_INDICATOR.bits());
                    enc.zeroes(2);
                },
            }
            return;
        }
        if self.is_null() {
            enc.bool(false);
            return;
        }
        enc.bool(true);
        match self {
            Self::Null | Self::LobOut(_) => unreachable!("handled above"),
            Self::Bool(v) => enc.bool(*v),
            Self::TinyInt(v) => enc.u8(*v),
            Self::SmallInt(v) => enc.i16(*v),
            Self::Int(v) => enc.i32(*v),
            Self::BigInt(v) => enc.i64(*v),
            Self::Real(v) => enc.u32(v.to_bits()),
            Self::Double(v) => enc.f64(*v),
            Self::Decimal { mantissa, exponent } => encode_decimal(enc, tc, *mantissa, *exponent),
            Self::String(s) => enc.li_cesu8_str(s),
            Self::Bytes(b) => enc.li_bytes(b),
            Self::DateTime(v) => enc.i64(*v),
            Self::DayTime(v) => enc.i32(*v),
            Self::Lob(_) => {
                enc.latch(ProtocolError::Other("lob input descriptor in result row".into()));
            },
        }
    }
}

fn decode_classic_decimal(dec: &mut Decoder<'_>) -> HdbValue {
    let raw = dec.u128();
    let negative = raw >> 127 != 0;
    let exponent = ((raw >> DECIMAL_MANTISSA_BITS) & 0x3FFF) as i32 - DECIMAL_EXP_BIAS;
    let magnitude = (raw & ((1u128 << DECIMAL_MANTISSA_BITS) - 1)) as i128;
    let mantissa = if negative { -magnitude } else { magnitude };
    HdbValue::Decimal { mantissa, exponent: exponent as i16 }
}

fn encode_decimal(enc: &mut Encoder<'_>, tc: TypeCode, mantissa: i128, exponent: i16) {
    match tc {
        TypeCode::Fixed8 => enc.i64(mantissa as i64),
        TypeCode::Fixed12 => {
            let bytes = mantissa.to_le_bytes();
            enc.bytes(&bytes[..12]);
        },
        TypeCode::Fixed16 => enc.u128(mantissa as u128),
        _ => {
            let negative = mantissa < 0;
            let magnitude = mantissa.unsigned_abs();
            if magnitude >> DECIMAL_MANTISSA_BITS != 0 {
                enc.latch(ProtocolError::OutOfRange {
                    field: "decimal mantissa",
                    value: i64::MAX,
                });
                return;
            }
            let biased = (i32::from(exponent) + DECIMAL_EXP_BIAS) as u128;
            let mut raw = magnitude | (biased << DECIMAL_MANTISSA_BITS);
            if negative {
                raw |= 1u128 << 127;
            }
            enc.u128(raw);
        },
    }
}

/// Read a little-endian signed 96-bit integer (FIXED12).
fn decode_i96(dec: &mut Decoder<'_>) -> i128 {
    let raw = dec.bytes(12);
    if raw.len() < 12 {
        return 0;
    }
    let mut b = [0u8; 16];
    b[..12].copy_from_slice(raw);
    // sign-extend from bit 95
    if raw[11] & 0x80 != 0 {
        b[12..].fill(0xFF);
    }
    i128::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use proptest::prelude::*;

    use super::*;

    fn res_round_trip(v: &HdbValue, tc: TypeCode, fraction: i16) -> HdbValue {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        v.encode_res(&mut enc, tc);
        enc.finish().unwrap();
        let mut dec = Decoder::new(&buf);
        let out = HdbValue::decode_res(&mut dec, tc, fraction).unwrap();
        dec.finish().unwrap();
        out
    }

    #[test]
    fn scalar_results_round_trip() {
        let cases: Vec<(HdbValue, TypeCode)> = vec![
            (HdbValue::Bool(true), TypeCode::Boolean),
            (HdbValue::TinyInt(200), TypeCode::Tinyint),
            (HdbValue::SmallInt(-12345), TypeCode::Smallint),
            (HdbValue::Int(1), TypeCode::Integer),
            (HdbValue::BigInt(i64::MIN), TypeCode::Bigint),
            (HdbValue::Real(1.5), TypeCode::Real),
            (HdbValue::Double(-2.25), TypeCode::Double),
            (HdbValue::String("東京 taxi".into()), TypeCode::Nvarchar),
            (HdbValue::Bytes(vec![0, 1, 2, 255]), TypeCode::Varbinary),
            (HdbValue::DateTime(635_604_223_210_000_000), TypeCode::Longdate),
            (HdbValue::DayTime(739_000), TypeCode::Daydate),
            (HdbValue::Null, TypeCode::Integer),
        ];
        for (v, tc) in &cases {
            assert_eq!(&res_round_trip(v, *tc, 0), v);
        }
    }

    #[test]
    fn classic_decimal_round_trip() {
        for (mantissa, exponent) in
            [(0i128, 0i16), (12_345, -2), (-98_765_432_101_234, 5), (1, -6176 + 100)]
        {
            let v = HdbValue::Decimal { mantissa, exponent };
            assert_eq!(res_round_trip(&v, TypeCode::Decimal, 0), v);
        }
    }

    #[test]
    fn fixed_decimals_use_metadata_fraction() {
        let v = HdbValue::Decimal { mantissa: -314_159, exponent: -5 };
        assert_eq!(res_round_trip(&v, TypeCode::Fixed8, 5), v);
        assert_eq!(res_round_trip(&v, TypeCode::Fixed12, 5), v);
        assert_eq!(res_round_trip(&v, TypeCode::Fixed16, 5), v);
    }

    #[test]
    fn null_parameter_is_one_byte() {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        HdbValue::Null.encode_prm(&mut enc, TypeCode::Integer);
        enc.finish().unwrap();
        assert_eq!(&buf[..], [TypeCode::Integer.null_value()]);
    }

    #[test]
    fn parameter_carries_type_code() {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        HdbValue::Int(7).encode_prm(&mut enc, TypeCode::Integer);
        enc.finish().unwrap();
        assert_eq!(&buf[..], [TypeCode::Integer as u8, 7, 0, 0, 0]);
        assert_eq!(HdbValue::Int(7).prm_size(TypeCode::Integer), 4);
    }

    proptest! {
        #[test]
        fn string_prm_size_matches_encoding(s in "\\PC{0,300}") {
            let v = HdbValue::String(s);
            let mut buf = BytesMut::new();
            let mut enc = Encoder::new(&mut buf);
            v.encode_prm(&mut enc, TypeCode::String);
            enc.finish().unwrap();
            // 1 type-code byte + declared body size
            prop_assert_eq!(buf.len(), 1 + v.prm_size(TypeCode::String));
        }
    }
}
