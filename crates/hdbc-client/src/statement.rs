//! Bulk and many-row execution on top of prepared statements.
//!
//! Two surface modes share the package machinery:
//!
//! - a [`BulkStatement`] buffers rows across calls and flushes as one
//!   `Execute` when the bulk size is reached, on an explicit flush, or not
//!   at all if the caller forgets (closing discards with a log line; it is
//!   the caller's contract to flush);
//! - [`crate::Connection::exec_many`] takes a whole row collection, splits
//!   it into packages of at most bulk-size rows and sends one `Execute`
//!   per package. Deliberately non-atomic: a mid-sequence failure reports
//!   the partial count.

use hdbc_proto::{
    cesu8,
    fields::ParameterField,
    lob::LobInDescr,
    typecode::DataType,
    value::HdbValue,
};
use tokio_util::sync::CancellationToken;

use crate::{
    connection::Connection,
    error::{DriverError, Result},
    rows::{ExecuteResult, PrepareResult},
};

/// A prepared DML statement buffering rows for bulk execution.
pub struct BulkStatement {
    conn: Connection,
    prep: PrepareResult,
    bulk_size: usize,
    buffered: Vec<HdbValue>,
    num_rows: usize,
}

impl BulkStatement {
    pub(crate) fn new(conn: Connection, prep: PrepareResult, bulk_size: usize) -> Self {
        Self { conn, prep, bulk_size, buffered: Vec::new(), num_rows: 0 }
    }

    /// The underlying prepare result.
    #[must_use]
    pub fn prepare_result(&self) -> &PrepareResult {
        &self.prep
    }

    /// Rows currently buffered.
    #[must_use]
    pub fn buffered_rows(&self) -> usize {
        self.num_rows
    }

    /// Buffer one row; flushes automatically once the bulk size is reached.
    ///
    /// Returns the execute result of an automatic flush, `None` when the
    /// row was only buffered.
    ///
    /// # Errors
    ///
    /// Argument-count mismatches, conversion failures, or any execute error
    /// on flush.
    pub async fn push(
        &mut self,
        token: &CancellationToken,
        row: Vec<HdbValue>,
    ) -> Result<Option<ExecuteResult>> {
        let expected = self.prep.num_fields();
        if row.len() != expected {
            return Err(DriverError::InvalidArgumentCount { got: row.len(), expected });
        }
        for (field, value) in self.prep.parameter_fields.iter().zip(row) {
            self.buffered.push(coerce_value(value, field)?);
        }
        self.num_rows += 1;

        if self.num_rows >= self.bulk_size {
            return self.flush(token).await.map(Some);
        }
        Ok(None)
    }

    /// Send all buffered rows as one execute.
    pub async fn flush(&mut self, token: &CancellationToken) -> Result<ExecuteResult> {
        if self.num_rows == 0 {
            return Ok(ExecuteResult::NoRows);
        }
        let mut args = std::mem::take(&mut self.buffered);
        self.num_rows = 0;
        let res = self.conn.exec_buffered(token, &self.prep, &mut args).await;
        // keep the allocation for the next batch
        args.clear();
        self.buffered = args;
        res
    }

    /// Drop the statement. Unflushed rows are discarded.
    pub async fn close(self, token: &CancellationToken) -> Result<()> {
        if self.num_rows != 0 {
            tracing::warn!(
                rows = self.num_rows,
                statement_id = self.prep.statement_id,
                "closing bulk statement with unflushed rows"
            );
        }
        self.conn.drop_statement(token, &self.prep).await
    }
}

/// Split `rows` into bulk-size packages, coercing each column.
///
/// Used by [`crate::Connection::exec_many`]; returns row-major value
/// buffers ready for execution.
pub(crate) fn build_packages(
    prep: &PrepareResult,
    rows: Vec<Vec<HdbValue>>,
    bulk_size: usize,
) -> Result<Vec<Vec<HdbValue>>> {
    let num_fields = prep.num_fields();
    let mut packages = Vec::with_capacity(rows.len().div_ceil(bulk_size.max(1)));
    let mut current: Vec<HdbValue> = Vec::new();
    let mut rows_in_package = 0usize;

    for (i, row) in rows.into_iter().enumerate() {
        if row.len() != num_fields {
            return Err(DriverError::Conversion(format!(
                "invalid number of fields in row {i} - got {} - expected {num_fields}",
                row.len()
            )));
        }
        for (field, value) in prep.parameter_fields.iter().zip(row) {
            current.push(coerce_value(value, field)?);
        }
        rows_in_package += 1;
        if rows_in_package == bulk_size {
            packages.push(std::mem::take(&mut current));
            rows_in_package = 0;
        }
    }
    if rows_in_package != 0 {
        packages.push(current);
    }
    Ok(packages)
}

/// Coerce `value` to the wire type of `field`.
///
/// Numeric values widen (and range-check) into the field's exact type;
/// strings and byte runs feed character and binary fields; for LOB fields
/// in-memory values are wrapped into upload descriptors.
pub(crate) fn coerce_value(value: HdbValue, field: &ParameterField) -> Result<HdbValue> {
    let tc = field.type_code;
    if value.is_null() {
        return Ok(HdbValue::Null);
    }
    if tc.is_lob() {
        return match value {
            lob @ HdbValue::Lob(_) => Ok(lob),
            HdbValue::String(s) => {
                // character LOBs travel as CESU-8
                Ok(HdbValue::Lob(LobInDescr::new(Box::new(std::io::Cursor::new(cesu8::encode(
                    &s,
                ))))))
            },
            HdbValue::Bytes(b) => {
                Ok(HdbValue::Lob(LobInDescr::new(Box::new(std::io::Cursor::new(b)))))
            },
            other => Err(conversion_error(&other, field)),
        };
    }

    match tc.data_type() {
        DataType::Boolean => match value {
            HdbValue::Bool(_) => Ok(value),
            other => Err(conversion_error(&other, field)),
        },
        DataType::Integer => {
            let n = match value {
                HdbValue::TinyInt(v) => i128::from(v),
                HdbValue::SmallInt(v) => i128::from(v),
                HdbValue::Int(v) => i128::from(v),
                HdbValue::BigInt(v) => i128::from(v),
                other => return Err(conversion_error(&other, field)),
            };
            integer_in_range(n, field)
        },
        DataType::Float => match value {
            HdbValue::Real(_) if tc == hdbc_proto::TypeCode::Real => Ok(value),
            HdbValue::Double(v) if tc == hdbc_proto::TypeCode::Double => Ok(HdbValue::Double(v)),
            HdbValue::Real(v) => Ok(HdbValue::Double(f64::from(v))),
            other => Err(conversion_error(&other, field)),
        },
        DataType::Decimal => match value {
            HdbValue::Decimal { .. } => Ok(value),
            HdbValue::TinyInt(v) => Ok(HdbValue::Decimal { mantissa: i128::from(v), exponent: 0 }),
            HdbValue::SmallInt(v) => Ok(HdbValue::Decimal { mantissa: i128::from(v), exponent: 0 }),
            HdbValue::Int(v) => Ok(HdbValue::Decimal { mantissa: i128::from(v), exponent: 0 }),
            HdbValue::BigInt(v) => Ok(HdbValue::Decimal { mantissa: i128::from(v), exponent: 0 }),
            other => Err(conversion_error(&other, field)),
        },
        DataType::Text => match value {
            HdbValue::String(_) => Ok(value),
            other => Err(conversion_error(&other, field)),
        },
        DataType::Binary => match value {
            HdbValue::Bytes(_) => Ok(value),
            other => Err(conversion_error(&other, field)),
        },
        DataType::Datetime => match value {
            HdbValue::DateTime(_) | HdbValue::DayTime(_) => Ok(value),
            other => Err(conversion_error(&other, field)),
        },
        DataType::Lob => unreachable!("lob handled above"),
    }
}

fn integer_in_range(n: i128, field: &ParameterField) -> Result<HdbValue> {
    use hdbc_proto::TypeCode;

    let out_of_range = || {
        DriverError::Conversion(format!("value {n} out of range for {}", field.type_code.type_name()))
    };
    match field.type_code {
        TypeCode::Tinyint => u8::try_from(n).map(HdbValue::TinyInt).map_err(|_| out_of_range()),
        TypeCode::Smallint => i16::try_from(n).map(HdbValue::SmallInt).map_err(|_| out_of_range()),
        TypeCode::Integer => i32::try_from(n).map(HdbValue::Int).map_err(|_| out_of_range()),
        _ => i64::try_from(n).map(HdbValue::BigInt).map_err(|_| out_of_range()),
    }
}

fn conversion_error(value: &HdbValue, field: &ParameterField) -> DriverError {
    DriverError::Conversion(format!(
        "unsupported value {value:?} for {} field {}",
        field.type_code.type_name(),
        field.name
    ))
}
