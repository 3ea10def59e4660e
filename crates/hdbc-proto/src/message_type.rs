//! Request message types.

/// Action requested from the server, carried in the request segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum MessageType {
    /// Directly execute an SQL statement
    ExecuteDirect = 2,
    /// Prepare an SQL statement
    Prepare = 3,
    /// Execute a previously prepared statement
    Execute = 13,
    /// Read large object data
    ReadLob = 16,
    /// Write large object data
    WriteLob = 17,
    /// Send authentication data
    Authenticate = 65,
    /// Connect to the database
    Connect = 66,
    /// Commit the current transaction
    Commit = 67,
    /// Roll back the current transaction
    Rollback = 68,
    /// Close a result set
    CloseResultset = 69,
    /// Drop a prepared statement id
    DropStatementId = 70,
    /// Fetch the next chunk from a result set
    FetchNext = 71,
    /// Disconnect the session
    Disconnect = 77,
    /// Request database connect information
    DbConnectInfo = 82,
}

impl MessageType {
    /// Convert from the raw wire value.
    #[must_use]
    pub const fn from_i8(v: i8) -> Option<Self> {
        match v {
            2 => Some(Self::ExecuteDirect),
            3 => Some(Self::Prepare),
            13 => Some(Self::Execute),
            16 => Some(Self::ReadLob),
            17 => Some(Self::WriteLob),
            65 => Some(Self::Authenticate),
            66 => Some(Self::Connect),
            67 => Some(Self::Commit),
            68 => Some(Self::Rollback),
            69 => Some(Self::CloseResultset),
            70 => Some(Self::DropStatementId),
            71 => Some(Self::FetchNext),
            77 => Some(Self::Disconnect),
            82 => Some(Self::DbConnectInfo),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for mt in [
            MessageType::ExecuteDirect,
            MessageType::Prepare,
            MessageType::Execute,
            MessageType::Authenticate,
            MessageType::Connect,
            MessageType::Disconnect,
            MessageType::DbConnectInfo,
        ] {
            assert_eq!(MessageType::from_i8(mt as i8), Some(mt));
        }
        assert_eq!(MessageType::from_i8(99), None);
    }
}
