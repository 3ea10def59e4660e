//! Reply parts carrying row data: result sets, output parameters, affected
//! rows, server errors.

use crate::{
    encoding::Decoder,
    error::ServerError,
    fields::{ParameterField, ResultField},
    value::HdbValue,
};

/// A decode/conversion failure on a single field.
///
/// Non-fatal: the field surfaces as null and iteration continues; callers
/// can inspect the collected errors after draining the rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// Row index within the fetched chunk
    pub row: usize,
    /// Name of the affected field
    pub field_name: String,
    /// What went wrong
    pub reason: String,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {} field {}: {}", self.row, self.field_name, self.reason)
    }
}

/// Decode a `Resultset` part: `num_arg` rows in row-major order.
///
/// Appends to `values`, which the caller reuses across fetches (grow-only).
/// Field-level failures are recorded in `errors` and the value becomes null.
pub fn decode_resultset(
    dec: &mut Decoder<'_>,
    fields: &[ResultField],
    num_arg: usize,
    values: &mut Vec<HdbValue>,
    errors: &mut Vec<DecodeError>,
) {
    values.reserve(num_arg * fields.len());
    for row in 0..num_arg {
        for f in fields {
            match HdbValue::decode_res(dec, f.type_code, f.fraction) {
                Ok(v) => values.push(v),
                Err(err) => {
                    errors.push(DecodeError {
                        row,
                        field_name: f.name.clone(),
                        reason: err.to_string(),
                    });
                    values.push(HdbValue::Null);
                },
            }
        }
    }
}

/// Decode an `OutputParameters` part against the out-fields of a call.
pub fn decode_output_parameters(
    dec: &mut Decoder<'_>,
    fields: &[ParameterField],
    num_arg: usize,
    errors: &mut Vec<DecodeError>,
) -> Vec<HdbValue> {
    let mut values = Vec::with_capacity(num_arg * fields.len());
    for row in 0..num_arg {
        for f in fields {
            match HdbValue::decode_res(dec, f.type_code, f.fraction) {
                Ok(v) => values.push(v),
                Err(err) => {
                    errors.push(DecodeError {
                        row,
                        field_name: f.name.clone(),
                        reason: err.to_string(),
                    });
                    values.push(HdbValue::Null);
                },
            }
        }
    }
    values
}

/// Per-statement sentinel: row count unknown but execution succeeded.
pub const ROWS_AFFECTED_SUCCESS_NO_INFO: i32 = -2;
/// Per-statement sentinel: execution failed.
pub const ROWS_AFFECTED_EXECUTION_FAILED: i32 = -3;

/// Decoded `RowsAffected` part: one count per executed row/statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowsAffected {
    /// Raw per-statement counts including sentinels
    pub rows: Vec<i32>,
}

impl RowsAffected {
    /// Decode `num_arg` counts.
    pub fn decode(dec: &mut Decoder<'_>, num_arg: usize) -> Self {
        let rows = (0..num_arg).map(|_| dec.i32()).collect();
        Self { rows }
    }

    /// Sum of the known counts; sentinels contribute zero.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.rows.iter().filter(|&&v| v > 0).map(|&v| v as u64).sum()
    }
}

/// Decode an `Error` part into the server error list.
pub fn decode_server_errors(dec: &mut Decoder<'_>, num_arg: usize) -> Vec<ServerError> {
    let mut errors = Vec::with_capacity(num_arg);
    for _ in 0..num_arg {
        let code = dec.i32();
        let position = dec.i32();
        let text_len = dec.i32();
        let level = dec.i8();
        let mut sql_state = [0u8; 5];
        sql_state.copy_from_slice(dec.bytes(5));
        let text = dec.cesu8_str(text_len as usize);
        errors.push(ServerError { code, position, level, sql_state, text });
    }
    errors
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::{
        encoding::Encoder,
        fields::ResultMetadata,
        typecode::TypeCode,
    };

    fn int_column(name: &str) -> Vec<ResultField> {
        // build metadata through the wire format to get a ResultField
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        enc.u8(0x02);
        enc.u8(TypeCode::Integer as u8);
        enc.i16(0);
        enc.i16(10);
        enc.zeroes(2);
        enc.u32(u32::MAX);
        enc.u32(u32::MAX);
        enc.u32(0);
        enc.u32(0);
        enc.u8(name.len() as u8);
        enc.bytes(name.as_bytes());
        enc.finish().unwrap();
        let mut dec = Decoder::new(&buf);
        let meta = ResultMetadata::decode(&mut dec, 1);
        dec.finish().unwrap();
        meta.fields
    }

    #[test]
    fn resultset_rows_append_to_reused_buffer() {
        let fields = int_column("N");

        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        for v in [1i32, 2, 3] {
            HdbValue::Int(v).encode_res(&mut enc, TypeCode::Integer);
        }
        enc.finish().unwrap();

        let mut values = Vec::new();
        let mut errors = Vec::new();
        let mut dec = Decoder::new(&buf);
        decode_resultset(&mut dec, &fields, 3, &mut values, &mut errors);
        dec.finish().unwrap();

        assert_eq!(values, vec![HdbValue::Int(1), HdbValue::Int(2), HdbValue::Int(3)]);
        assert!(errors.is_empty());

        // second fetch appends
        let mut dec = Decoder::new(&buf);
        decode_resultset(&mut dec, &fields, 3, &mut values, &mut errors);
        dec.finish().unwrap();
        assert_eq!(values.len(), 6);
    }

    #[test]
    fn rows_affected_total_skips_sentinels() {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        for v in [5i32, ROWS_AFFECTED_SUCCESS_NO_INFO, 7, ROWS_AFFECTED_EXECUTION_FAILED] {
            enc.i32(v);
        }
        enc.finish().unwrap();

        let mut dec = Decoder::new(&buf);
        let rows = RowsAffected::decode(&mut dec, 4);
        dec.finish().unwrap();
        assert_eq!(rows.total(), 12);
    }

    #[test]
    fn server_error_part_round_trip() {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        enc.i32(257);
        enc.i32(12);
        let text = "sql syntax error";
        enc.i32(text.len() as i32);
        enc.i8(1);
        enc.bytes(b"HY000");
        enc.cesu8_str(text);
        enc.finish().unwrap();

        let mut dec = Decoder::new(&buf);
        let errors = decode_server_errors(&mut dec, 1);
        dec.finish().unwrap();

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, 257);
        assert_eq!(errors[0].position, 12);
        assert_eq!(errors[0].level, 1);
        assert_eq!(&errors[0].sql_state, b"HY000");
        assert_eq!(errors[0].text, text);
        assert!(!errors[0].is_warning());
    }

    #[test]
    fn bad_field_surfaces_as_null_with_decode_error() {
        let fields = {
            let mut buf = BytesMut::new();
            let mut enc = Encoder::new(&mut buf);
            enc.u8(0x02);
            enc.u8(TypeCode::Nvarchar as u8);
            enc.i16(0);
            enc.i16(10);
            enc.zeroes(2);
            enc.u32(u32::MAX);
            enc.u32(u32::MAX);
            enc.u32(0);
            enc.u32(0);
            enc.u8(1);
            enc.bytes(b"S");
            enc.finish().unwrap();
            let mut dec = Decoder::new(&buf);
            ResultMetadata::decode(&mut dec, 1).fields
        };

        // row 0: invalid CESU-8; row 1: fine
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        enc.bool(true);
        enc.li_bytes(&[0xFF, 0xFE]);
        HdbValue::String("ok".into()).encode_res(&mut enc, TypeCode::Nvarchar);
        enc.finish().unwrap();

        let mut values = Vec::new();
        let mut errors = Vec::new();
        let mut dec = Decoder::new(&buf);
        decode_resultset(&mut dec, &fields, 2, &mut values, &mut errors);
        dec.finish().unwrap();

        assert_eq!(values, vec![HdbValue::Null, HdbValue::String("ok".into())]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row, 0);
        assert_eq!(errors[0].field_name, "S");
    }
}
