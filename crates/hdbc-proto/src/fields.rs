//! Field descriptions for parameters and result columns.
//!
//! Both metadata parts share the same trick: the fixed-size field records
//! carry byte offsets into a name table appended after the records. Name
//! resolution happens while the part is decoded; fields are never exposed
//! upward with unresolved names.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::{
    encoding::Decoder,
    error::ProtocolError,
    typecode::TypeCode,
};

/// Offset value marking "no name".
const NO_NAME: u32 = u32::MAX;

bitflags! {
    /// Options attached to a parameter field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParameterOptions: u8 {
        /// Value required
        const MANDATORY = 0x01;
        /// Value may be null
        const OPTIONAL = 0x02;
        /// Server applies a default when absent
        const DEFAULT = 0x04;
    }
}

bitflags! {
    /// Options attached to a result column.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ColumnOptions: u8 {
        /// Column may be null
        const OPTIONAL = 0x02;
    }
}

/// Direction of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum ParameterMode {
    /// Input only
    In = 0x01,
    /// Input and output
    InOut = 0x02,
    /// Output only
    Out = 0x04,
}

impl ParameterMode {
    /// Convert from the raw wire value.
    #[must_use]
    pub const fn from_i8(v: i8) -> Option<Self> {
        match v {
            0x01 => Some(Self::In),
            0x02 => Some(Self::InOut),
            0x04 => Some(Self::Out),
            _ => None,
        }
    }
}

/// A parameter field of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterField {
    /// Resolved parameter name (may be empty)
    pub name: String,
    /// Wire type
    pub type_code: TypeCode,
    /// Direction
    pub mode: ParameterMode,
    /// Options bitmask
    pub options: ParameterOptions,
    /// Declared length / precision
    pub length: i16,
    /// Declared fraction / scale
    pub fraction: i16,
    offset: u32,
}

impl ParameterField {
    /// True if the field accepts input.
    #[must_use]
    pub fn is_in(&self) -> bool {
        matches!(self.mode, ParameterMode::In | ParameterMode::InOut)
    }

    /// True if the field produces output.
    #[must_use]
    pub fn is_out(&self) -> bool {
        matches!(self.mode, ParameterMode::Out | ParameterMode::InOut)
    }

    /// True if the field may be null.
    #[must_use]
    pub fn nullable(&self) -> bool {
        self.options.contains(ParameterOptions::OPTIONAL)
    }

    fn decode(dec: &mut Decoder<'_>) -> Self {
        let raw_options = dec.u8();
        let raw_tc = dec.u8();
        let raw_mode = dec.i8();
        dec.skip(1);
        let offset = dec.u32();
        let length = dec.i16();
        let fraction = dec.i16();
        dec.skip(4);

        let type_code = match TypeCode::from_u8(raw_tc) {
            Some(tc) => tc,
            None => {
                dec.latch(ProtocolError::InvalidEnumValue {
                    what: "parameter type code",
                    value: i64::from(raw_tc),
                });
                TypeCode::Integer
            },
        };
        let mode = match ParameterMode::from_i8(raw_mode) {
            Some(m) => m,
            None => {
                dec.latch(ProtocolError::InvalidEnumValue {
                    what: "parameter mode",
                    value: i64::from(raw_mode),
                });
                ParameterMode::In
            },
        };
        Self {
            name: String::new(),
            type_code,
            mode,
            options: ParameterOptions::from_bits_retain(raw_options),
            length,
            fraction,
            offset,
        }
    }
}

/// A column of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultField {
    /// Resolved column display name
    pub name: String,
    /// Resolved table name
    pub table_name: String,
    /// Wire type
    pub type_code: TypeCode,
    /// Options bitmask
    pub options: ColumnOptions,
    /// Declared length / precision
    pub length: i16,
    /// Declared fraction / scale
    pub fraction: i16,
    table_name_ofs: u32,
    schema_name_ofs: u32,
    column_name_ofs: u32,
    display_name_ofs: u32,
}

impl ResultField {
    /// True if the column may be null.
    #[must_use]
    pub fn nullable(&self) -> bool {
        self.options.contains(ColumnOptions::OPTIONAL)
    }

    fn decode(dec: &mut Decoder<'_>) -> Self {
        let raw_options = dec.u8();
        let raw_tc = dec.u8();
        let fraction = dec.i16();
        let length = dec.i16();
        dec.skip(2);
        let table_name_ofs = dec.u32();
        let schema_name_ofs = dec.u32();
        let column_name_ofs = dec.u32();
        let display_name_ofs = dec.u32();

        let type_code = match TypeCode::from_u8(raw_tc) {
            Some(tc) => tc,
            None => {
                dec.latch(ProtocolError::InvalidEnumValue {
                    what: "column type code",
                    value: i64::from(raw_tc),
                });
                TypeCode::Integer
            },
        };
        Self {
            name: String::new(),
            table_name: String::new(),
            type_code,
            options: ColumnOptions::from_bits_retain(raw_options),
            length,
            fraction,
            table_name_ofs,
            schema_name_ofs,
            column_name_ofs,
            display_name_ofs,
        }
    }
}

/// Name table appended to metadata parts.
///
/// Names are stored back to back as length-prefixed CESU-8 strings; the
/// field records point at them by byte offset.
#[derive(Debug, Default)]
struct FieldNames {
    offsets: BTreeMap<u32, String>,
}

impl FieldNames {
    fn insert(&mut self, offset: u32) {
        if offset != NO_NAME {
            self.offsets.entry(offset).or_default();
        }
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) {
        let mut pos = 0u32;
        let offsets: Vec<u32> = self.offsets.keys().copied().collect();
        for offset in offsets {
            if offset > pos {
                dec.skip((offset - pos) as usize);
                pos = offset;
            }
            let len = dec.u8();
            let name = dec.cesu8_str(usize::from(len));
            pos += 1 + u32::from(len);
            self.offsets.insert(offset, name);
        }
    }

    fn name(&self, offset: u32) -> String {
        self.offsets.get(&offset).cloned().unwrap_or_default()
    }
}

/// Decoded `ParameterMetadata` part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterMetadata {
    /// Fields in parameter order
    pub fields: Vec<ParameterField>,
}

impl ParameterMetadata {
    /// Decode `num_arg` parameter fields plus the trailing name table.
    pub fn decode(dec: &mut Decoder<'_>, num_arg: usize) -> Self {
        let mut names = FieldNames::default();
        let mut fields = Vec::with_capacity(num_arg);
        for _ in 0..num_arg {
            let f = ParameterField::decode(dec);
            names.insert(f.offset);
            fields.push(f);
        }
        names.decode(dec);
        for f in &mut fields {
            if f.offset != NO_NAME {
                f.name = names.name(f.offset);
            }
        }
        Self { fields }
    }
}

/// Decoded `ResultMetadata` part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultMetadata {
    /// Columns in select order
    pub fields: Vec<ResultField>,
}

impl ResultMetadata {
    /// Decode `num_arg` result fields plus the trailing name table.
    pub fn decode(dec: &mut Decoder<'_>, num_arg: usize) -> Self {
        let mut names = FieldNames::default();
        let mut fields = Vec::with_capacity(num_arg);
        for _ in 0..num_arg {
            let f = ResultField::decode(dec);
            names.insert(f.table_name_ofs);
            names.insert(f.schema_name_ofs);
            names.insert(f.column_name_ofs);
            names.insert(f.display_name_ofs);
            fields.push(f);
        }
        names.decode(dec);
        for f in &mut fields {
            if f.display_name_ofs != NO_NAME {
                f.name = names.name(f.display_name_ofs);
            }
            if f.table_name_ofs != NO_NAME {
                f.table_name = names.name(f.table_name_ofs);
            }
        }
        Self { fields }
    }
}
