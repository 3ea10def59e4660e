//! Column type codes.

use crate::error::ProtocolError;

/// Bit set on a parameter type code to signal a null value.
pub const NULL_VALUE_BIT: u8 = 0x80;

/// Wire type code of a field.
///
/// Closed enumeration. Nullability of an encoded parameter is signalled by
/// OR-ing [`NULL_VALUE_BIT`] onto the code, so all codes stay below 0x80.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeCode {
    /// TINYINT
    Tinyint = 1,
    /// SMALLINT
    Smallint = 2,
    /// INTEGER
    Integer = 3,
    /// BIGINT
    Bigint = 4,
    /// DECIMAL (classic 16-byte layout)
    Decimal = 5,
    /// REAL
    Real = 6,
    /// DOUBLE
    Double = 7,
    /// CHAR
    Char = 8,
    /// VARCHAR
    Varchar = 9,
    /// NCHAR
    Nchar = 10,
    /// NVARCHAR
    Nvarchar = 11,
    /// BINARY
    Binary = 12,
    /// VARBINARY
    Varbinary = 13,
    /// CLOB
    Clob = 25,
    /// NCLOB
    Nclob = 26,
    /// BLOB
    Blob = 27,
    /// BOOLEAN
    Boolean = 28,
    /// STRING
    String = 29,
    /// NSTRING
    Nstring = 30,
    /// BSTRING
    Bstring = 33,
    /// TEXT (LOB-valued)
    Text = 51,
    /// SHORTTEXT
    Shorttext = 52,
    /// ST_GEOMETRY
    Geometry = 74,
    /// ST_POINT
    Point = 75,
    /// FIXED16 decimal (dfv >= 8)
    Fixed16 = 76,
    /// FIXED8 decimal (dfv >= 8)
    Fixed8 = 81,
    /// FIXED12 decimal (dfv >= 8)
    Fixed12 = 82,
    /// LONGDATE timestamp
    Longdate = 61,
    /// SECONDDATE timestamp
    Seconddate = 62,
    /// DAYDATE date
    Daydate = 63,
    /// SECONDTIME time
    Secondtime = 64,
}

/// Semantic category of a type code ("scan type").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Boolean values
    Boolean,
    /// Signed integers up to 64 bit
    Integer,
    /// IEEE floating point
    Float,
    /// Fixed-point decimals
    Decimal,
    /// Unicode text
    Text,
    /// Raw bytes
    Binary,
    /// Dates, times, timestamps
    Datetime,
    /// Large objects streamed via locators
    Lob,
}

impl TypeCode {
    /// Convert from the raw wire value (without the null bit).
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Tinyint),
            2 => Some(Self::Smallint),
            3 => Some(Self::Integer),
            4 => Some(Self::Bigint),
            5 => Some(Self::Decimal),
            6 => Some(Self::Real),
            7 => Some(Self::Double),
            8 => Some(Self::Char),
            9 => Some(Self::Varchar),
            10 => Some(Self::Nchar),
            11 => Some(Self::Nvarchar),
            12 => Some(Self::Binary),
            13 => Some(Self::Varbinary),
            25 => Some(Self::Clob),
            26 => Some(Self::Nclob),
            27 => Some(Self::Blob),
            28 => Some(Self::Boolean),
            29 => Some(Self::String),
            30 => Some(Self::Nstring),
            33 => Some(Self::Bstring),
            51 => Some(Self::Text),
            52 => Some(Self::Shorttext),
            61 => Some(Self::Longdate),
            62 => Some(Self::Seconddate),
            63 => Some(Self::Daydate),
            64 => Some(Self::Secondtime),
            74 => Some(Self::Geometry),
            75 => Some(Self::Point),
            76 => Some(Self::Fixed16),
            81 => Some(Self::Fixed8),
            82 => Some(Self::Fixed12),
            _ => None,
        }
    }

    /// Parse a wire byte that may carry the null bit.
    ///
    /// Returns `(code, is_null)`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidEnumValue`] on an unknown code.
    pub fn from_wire(v: u8) -> Result<(Self, bool), ProtocolError> {
        let is_null = v & NULL_VALUE_BIT != 0;
        match Self::from_u8(v & !NULL_VALUE_BIT) {
            Some(tc) => Ok((tc, is_null)),
            None => {
                Err(ProtocolError::InvalidEnumValue { what: "type code", value: i64::from(v) })
            },
        }
    }

    /// SQL type name reported to callers.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Tinyint => "TINYINT",
            Self::Smallint => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::Bigint => "BIGINT",
            Self::Decimal | Self::Fixed8 | Self::Fixed12 | Self::Fixed16 => "DECIMAL",
            Self::Real => "REAL",
            Self::Double => "DOUBLE",
            Self::Char => "CHAR",
            Self::Varchar => "VARCHAR",
            Self::Nchar => "NCHAR",
            Self::Nvarchar => "NVARCHAR",
            Self::Binary => "BINARY",
            Self::Varbinary => "VARBINARY",
            Self::Clob => "CLOB",
            Self::Nclob => "NCLOB",
            Self::Blob => "BLOB",
            Self::Boolean => "BOOLEAN",
            Self::String => "STRING",
            Self::Nstring => "NSTRING",
            Self::Bstring => "BSTRING",
            Self::Text => "TEXT",
            Self::Shorttext => "SHORTTEXT",
            Self::Geometry => "ST_GEOMETRY",
            Self::Point => "ST_POINT",
            Self::Longdate => "TIMESTAMP",
            Self::Seconddate => "SECONDDATE",
            Self::Daydate => "DATE",
            Self::Secondtime => "TIME",
        }
    }

    /// Scan-type category.
    #[must_use]
    pub const fn data_type(self) -> DataType {
        match self {
            Self::Boolean => DataType::Boolean,
            Self::Tinyint | Self::Smallint | Self::Integer | Self::Bigint => DataType::Integer,
            Self::Real | Self::Double => DataType::Float,
            Self::Decimal | Self::Fixed8 | Self::Fixed12 | Self::Fixed16 => DataType::Decimal,
            Self::Char
            | Self::Varchar
            | Self::Nchar
            | Self::Nvarchar
            | Self::String
            | Self::Nstring
            | Self::Shorttext => DataType::Text,
            Self::Binary | Self::Varbinary | Self::Bstring | Self::Geometry | Self::Point => {
                DataType::Binary
            },
            Self::Longdate | Self::Seconddate | Self::Daydate | Self::Secondtime => {
                DataType::Datetime
            },
            Self::Clob | Self::Nclob | Self::Blob | Self::Text => DataType::Lob,
        }
    }

    /// True for LOB-valued types (streamed via locator ids).
    #[must_use]
    pub const fn is_lob(self) -> bool {
        matches!(self, Self::Clob | Self::Nclob | Self::Blob | Self::Text)
    }

    /// True for character-based types (CESU-8 on the wire).
    #[must_use]
    pub const fn is_char_based(self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::Varchar
                | Self::Nchar
                | Self::Nvarchar
                | Self::String
                | Self::Nstring
                | Self::Shorttext
                | Self::Clob
                | Self::Nclob
                | Self::Text
        )
    }

    /// True for variable-length types (length reported to callers).
    #[must_use]
    pub const fn is_variable_length(self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::Varchar
                | Self::Nchar
                | Self::Nvarchar
                | Self::Binary
                | Self::Varbinary
                | Self::String
                | Self::Nstring
                | Self::Bstring
                | Self::Shorttext
        )
    }

    /// True for decimal types (precision/scale reported to callers).
    #[must_use]
    pub const fn is_decimal(self) -> bool {
        matches!(self, Self::Decimal | Self::Fixed8 | Self::Fixed12 | Self::Fixed16)
    }

    /// True if a parameter of this type may be encoded as null.
    #[must_use]
    pub const fn supports_null(self) -> bool {
        // all codes stay below 0x80, so the null bit is always available
        true
    }

    /// Wire code with the null bit set.
    #[must_use]
    pub const fn null_value(self) -> u8 {
        self as u8 | NULL_VALUE_BIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_with_null_bit() {
        for tc in [TypeCode::Tinyint, TypeCode::Decimal, TypeCode::Nclob, TypeCode::Fixed12] {
            assert_eq!(TypeCode::from_wire(tc as u8).unwrap(), (tc, false));
            assert_eq!(TypeCode::from_wire(tc.null_value()).unwrap(), (tc, true));
        }
        assert!(TypeCode::from_wire(0x7F).is_err());
    }

    #[test]
    fn categories() {
        assert!(TypeCode::Nclob.is_lob());
        assert!(TypeCode::Nclob.is_char_based());
        assert!(!TypeCode::Blob.is_char_based());
        assert!(TypeCode::Fixed8.is_decimal());
        assert_eq!(TypeCode::Longdate.data_type(), DataType::Datetime);
        assert_eq!(TypeCode::Varbinary.data_type(), DataType::Binary);
    }
}
