//! Reply function codes.

/// Server-side classification of the executed statement.
///
/// Returned in the reply segment header. The client uses it to decide
/// between "no rows" semantics (DDL) and affected-row counts, and to detect
/// procedure calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i16)]
pub enum FunctionCode {
    /// No function code supplied
    #[default]
    Nil = 0,
    /// Data definition statement
    Ddl = 1,
    /// INSERT
    Insert = 2,
    /// UPDATE
    Update = 3,
    /// DELETE
    Delete = 4,
    /// SELECT
    Select = 5,
    /// SELECT ... FOR UPDATE
    SelectForUpdate = 6,
    /// EXPLAIN
    Explain = 7,
    /// Procedure call without result
    DbProcedureCall = 8,
    /// Procedure call with result
    DbProcedureCallWithResult = 9,
    /// Fetch
    Fetch = 10,
    /// Commit
    Commit = 11,
    /// Rollback
    Rollback = 12,
}

impl FunctionCode {
    /// Convert from the raw wire value.
    #[must_use]
    pub const fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Self::Nil),
            1 => Some(Self::Ddl),
            2 => Some(Self::Insert),
            3 => Some(Self::Update),
            4 => Some(Self::Delete),
            5 => Some(Self::Select),
            6 => Some(Self::SelectForUpdate),
            7 => Some(Self::Explain),
            8 => Some(Self::DbProcedureCall),
            9 => Some(Self::DbProcedureCallWithResult),
            10 => Some(Self::Fetch),
            11 => Some(Self::Commit),
            12 => Some(Self::Rollback),
            _ => None,
        }
    }

    /// True for either procedure-call classification.
    #[must_use]
    pub const fn is_procedure_call(self) -> bool {
        matches!(self, Self::DbProcedureCall | Self::DbProcedureCallWithResult)
    }
}
