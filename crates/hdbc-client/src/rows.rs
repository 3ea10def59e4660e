//! Prepared-statement and result data carried between exchanges.

use std::{collections::HashMap, sync::Mutex};

use hdbc_proto::{
    fields::{ParameterField, ResultField},
    resultset::DecodeError,
    FunctionCode, HdbValue, PartAttributes,
};
use once_cell::sync::Lazy;

/// Outcome of an execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteResult {
    /// DML: number of affected rows
    RowsAffected(u64),
    /// DDL: no row semantics
    NoRows,
}

impl ExecuteResult {
    /// Affected rows; zero for DDL.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        match self {
            Self::RowsAffected(n) => *n,
            Self::NoRows => 0,
        }
    }
}

/// Result of a prepare.
///
/// Lives until [`crate::Connection::drop_statement`]; on a fatal connection
/// error the statement dies with its connection.
#[derive(Debug, Clone)]
pub struct PrepareResult {
    /// Server-assigned statement id
    pub statement_id: u64,
    /// Parameter fields in declaration order
    pub parameter_fields: Vec<ParameterField>,
    /// Result fields for statements with a result shape
    pub result_fields: Vec<ResultField>,
    /// Statement classification
    pub function_code: FunctionCode,
}

impl PrepareResult {
    /// Total number of parameter fields.
    #[must_use]
    pub fn num_fields(&self) -> usize {
        self.parameter_fields.len()
    }

    /// Number of input parameter fields.
    #[must_use]
    pub fn num_input_fields(&self) -> usize {
        self.parameter_fields.iter().filter(|f| f.is_in()).count()
    }

    /// True for procedure calls (drive them through [`crate::Connection::call`]).
    #[must_use]
    pub fn is_procedure_call(&self) -> bool {
        self.function_code.is_procedure_call()
    }
}

/// One result set: fields, buffered rows, server attributes.
///
/// The field-value buffer is grow-only: `fetch_next` appends to it so a
/// drained fetch does not re-allocate.
#[derive(Debug, Default)]
pub struct ResultSetData {
    /// Server-assigned result set id
    pub id: u64,
    /// Column metadata
    pub fields: Vec<ResultField>,
    /// Row-major field values
    pub values: Vec<HdbValue>,
    /// Attributes of the latest `Resultset` part
    pub attributes: PartAttributes,
    /// Field-level decode failures collected while reading rows
    pub decode_errors: Vec<DecodeError>,
}

impl ResultSetData {
    /// Number of buffered rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        if self.fields.is_empty() {
            0
        } else {
            self.values.len() / self.fields.len()
        }
    }

    /// Values of row `i` (row-major slice).
    #[must_use]
    pub fn row(&self, i: usize) -> &[HdbValue] {
        let cols = self.fields.len();
        &self.values[i * cols..(i + 1) * cols]
    }

    /// True once the server reported the final packet.
    #[must_use]
    pub fn last_packet(&self) -> bool {
        self.attributes.last_packet()
    }

    /// True once the server closed the result set on its side.
    #[must_use]
    pub fn server_closed(&self) -> bool {
        self.attributes.resultset_closed()
    }

    /// True while the server still holds rows for this result set.
    #[must_use]
    pub fn needs_fetch(&self) -> bool {
        !self.last_packet() && !self.server_closed()
    }
}

/// Result of a procedure call: scalar outputs plus table-valued outputs in
/// server order.
#[derive(Debug, Default)]
pub struct CallResultData {
    /// Out/inout parameter fields
    pub output_fields: Vec<ParameterField>,
    /// One value per output field, set after the call (or after the last
    /// LOB chunk was written)
    pub output_values: Vec<HdbValue>,
    /// Decode failures on output parameters
    pub decode_errors: Vec<DecodeError>,
    /// Table outputs, one per `ResultMetadata` part in the reply
    pub tables: Vec<ResultSetData>,
}

struct CacheEntry {
    conn_id: u64,
    rs: ResultSetData,
}

/// Process-wide cache of table-valued procedure outputs, keyed by result
/// set id. Filled by the call path in legacy mode; entries die with their
/// connection.
static TABLE_RESULT_CACHE: Lazy<Mutex<HashMap<u64, CacheEntry>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn cache() -> std::sync::MutexGuard<'static, HashMap<u64, CacheEntry>> {
    TABLE_RESULT_CACHE.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub(crate) fn cache_insert(conn_id: u64, rs: ResultSetData) {
    cache().insert(rs.id, CacheEntry { conn_id, rs });
}

pub(crate) fn cache_take(id: u64) -> Option<ResultSetData> {
    cache().remove(&id).map(|entry| entry.rs)
}

pub(crate) fn cache_cleanup(conn_id: u64) {
    cache().retain(|_, entry| entry.conn_id != conn_id);
}
