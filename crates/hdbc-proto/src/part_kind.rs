//! Part kinds.

/// Payload discriminator carried in every part header.
///
/// Closed enumeration; an unknown value on the wire is a protocol error.
/// Kinds the client never inspects (e.g. `StatementContext`) still need a
/// variant so their parts can be skipped by framed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum PartKind {
    /// SQL command text
    Command = 3,
    /// Result set row data
    Resultset = 5,
    /// Server error list
    Error = 6,
    /// Prepared statement id
    StatementId = 10,
    /// Transaction id
    TransactionId = 11,
    /// Affected-row counts
    RowsAffected = 12,
    /// Result set id
    ResultsetId = 13,
    /// Topology information (skipped)
    TopologyInformation = 15,
    /// Table location (skipped)
    TableLocation = 16,
    /// Piecewise LOB read request
    ReadLobRequest = 17,
    /// Piecewise LOB read reply
    ReadLobReply = 18,
    /// Command information (skipped)
    CommandInfo = 27,
    /// Piecewise LOB write request
    WriteLobRequest = 28,
    /// Client context options
    ClientContext = 29,
    /// Piecewise LOB write reply (locator ids)
    WriteLobReply = 30,
    /// Input parameter values
    Parameters = 32,
    /// Authentication payload
    Authentication = 33,
    /// Session context (skipped)
    SessionContext = 34,
    /// Client identification
    ClientId = 35,
    /// Statement execution context (skipped)
    StatementContext = 39,
    /// Output parameter values
    OutputParameters = 41,
    /// Connect options
    ConnectOptions = 42,
    /// Fetch size
    FetchSize = 45,
    /// Parameter metadata
    ParameterMetadata = 47,
    /// Result set metadata
    ResultMetadata = 48,
    /// Session variables as key/value pairs
    ClientInfo = 57,
    /// Transaction flags (skipped)
    TransactionFlags = 64,
    /// Database connect information
    DbConnectInfo = 67,
}

impl PartKind {
    /// Convert from the raw wire value.
    #[must_use]
    pub const fn from_i8(v: i8) -> Option<Self> {
        match v {
            3 => Some(Self::Command),
            5 => Some(Self::Resultset),
            6 => Some(Self::Error),
            10 => Some(Self::StatementId),
            11 => Some(Self::TransactionId),
            12 => Some(Self::RowsAffected),
            13 => Some(Self::ResultsetId),
            15 => Some(Self::TopologyInformation),
            16 => Some(Self::TableLocation),
            17 => Some(Self::ReadLobRequest),
            18 => Some(Self::ReadLobReply),
            27 => Some(Self::CommandInfo),
            28 => Some(Self::WriteLobRequest),
            29 => Some(Self::ClientContext),
            30 => Some(Self::WriteLobReply),
            32 => Some(Self::Parameters),
            33 => Some(Self::Authentication),
            34 => Some(Self::SessionContext),
            35 => Some(Self::ClientId),
            39 => Some(Self::StatementContext),
            41 => Some(Self::OutputParameters),
            42 => Some(Self::ConnectOptions),
            45 => Some(Self::FetchSize),
            47 => Some(Self::ParameterMetadata),
            48 => Some(Self::ResultMetadata),
            57 => Some(Self::ClientInfo),
            64 => Some(Self::TransactionFlags),
            67 => Some(Self::DbConnectInfo),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for pk in [
            PartKind::Command,
            PartKind::Resultset,
            PartKind::Error,
            PartKind::Authentication,
            PartKind::WriteLobReply,
            PartKind::DbConnectInfo,
        ] {
            assert_eq!(PartKind::from_i8(pk as i8), Some(pk));
        }
        assert_eq!(PartKind::from_i8(-7), None);
    }
}
