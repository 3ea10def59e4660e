//! The request part registry.
//!
//! [`Part`] is a sum type over every part kind the client sends; framing
//! dispatches on it for the three operations every part must support:
//! `kind`, `num_arg`/`size` (for the part header) and `encode`. The closed
//! enumeration keeps the dispatch exhaustive: adding a kind without
//! handling it everywhere is a compile error.
//!
//! Reply parts have no variants here: they are decoded by typed readers
//! driven from the session's part iteration, which knows the expected kinds
//! per operation.

use crate::{
    auth::AuthPrms,
    cesu8,
    encoding::Encoder,
    error::{ProtocolError, Result},
    fields::ParameterField,
    lob::{ReadLobRequest, WriteLobChunk},
    options::{ClientContextKey, ConnectOptionKey, DbConnectInfoKey, Options},
    part_kind::PartKind,
    value::HdbValue,
};

/// A part of an outgoing request message.
#[derive(Debug)]
pub enum Part<'a> {
    /// SQL text
    Command(&'a str),
    /// Client identification (process and host)
    ClientId(&'a str),
    /// Session variables as key/value pairs
    ClientInfo(&'a [(String, String)]),
    /// Fetch size for `FetchNext`
    Fetchsize(i32),
    /// Prepared statement id
    StatementId(u64),
    /// Result set id
    ResultsetId(u64),
    /// Client context options
    ClientContext(&'a Options<ClientContextKey>),
    /// Connect options
    ConnectOptions(&'a Options<ConnectOptionKey>),
    /// DB connect info request
    DbConnectInfo(&'a Options<DbConnectInfoKey>),
    /// Authentication init request
    AuthInit(&'a AuthPrms),
    /// Authentication final request
    AuthFinal(&'a AuthPrms),
    /// Input parameter rows
    Input(InputParameters<'a>),
    /// Piecewise LOB read
    ReadLob(ReadLobRequest),
    /// Piecewise LOB write
    WriteLob(&'a [WriteLobChunk<'a>]),
}

impl Part<'_> {
    /// Part kind for the header.
    #[must_use]
    pub fn kind(&self) -> PartKind {
        match self {
            Part::Command(_) => PartKind::Command,
            Part::ClientId(_) => PartKind::ClientId,
            Part::ClientInfo(_) => PartKind::ClientInfo,
            Part::Fetchsize(_) => PartKind::FetchSize,
            Part::StatementId(_) => PartKind::StatementId,
            Part::ResultsetId(_) => PartKind::ResultsetId,
            Part::ClientContext(_) => PartKind::ClientContext,
            Part::ConnectOptions(_) => PartKind::ConnectOptions,
            Part::DbConnectInfo(_) => PartKind::DbConnectInfo,
            Part::AuthInit(_) | Part::AuthFinal(_) => PartKind::Authentication,
            Part::Input(_) => PartKind::Parameters,
            Part::ReadLob(_) => PartKind::ReadLobRequest,
            Part::WriteLob(_) => PartKind::WriteLobRequest,
        }
    }

    /// Argument count for the header.
    #[must_use]
    pub fn num_arg(&self) -> usize {
        match self {
            Part::Command(_)
            | Part::ClientId(_)
            | Part::Fetchsize(_)
            | Part::StatementId(_)
            | Part::ResultsetId(_)
            | Part::AuthInit(_)
            | Part::AuthFinal(_)
            | Part::ReadLob(_) => 1,
            Part::ClientContext(o) => o.len(),
            Part::ConnectOptions(o) => o.len(),
            Part::DbConnectInfo(o) => o.len(),
            Part::ClientInfo(vars) => vars.len(),
            Part::Input(p) => p.num_arg(),
            Part::WriteLob(chunks) => chunks.len(),
        }
    }

    /// Encoded body size in bytes, before padding.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Part::Command(s) => cesu8::str_size(s),
            Part::ClientId(s) => s.len(),
            Part::ClientInfo(vars) => vars
                .iter()
                .map(|(k, v)| {
                    crate::encoding::var_bytes_size(cesu8::str_size(k))
                        + crate::encoding::var_bytes_size(cesu8::str_size(v))
                })
                .sum(),
            Part::Fetchsize(_) => 4,
            Part::StatementId(_) | Part::ResultsetId(_) => 8,
            Part::ClientContext(o) => o.size(),
            Part::ConnectOptions(o) => o.size(),
            Part::DbConnectInfo(o) => o.size(),
            Part::AuthInit(p) | Part::AuthFinal(p) => p.size(),
            Part::Input(p) => p.size(),
            Part::ReadLob(_) => ReadLobRequest::SIZE,
            Part::WriteLob(chunks) => chunks.iter().map(WriteLobChunk::size).sum(),
        }
    }

    /// Encode the body into `enc`.
    pub fn encode(&self, enc: &mut Encoder<'_>) {
        match self {
            Part::Command(s) => enc.cesu8_str(s),
            Part::ClientId(s) => enc.bytes(s.as_bytes()),
            Part::ClientInfo(vars) => {
                for (k, v) in *vars {
                    enc.li_cesu8_str(k);
                    enc.li_cesu8_str(v);
                }
            },
            Part::Fetchsize(n) => enc.i32(*n),
            Part::StatementId(id) | Part::ResultsetId(id) => enc.u64(*id),
            Part::ClientContext(o) => o.encode(enc),
            Part::ConnectOptions(o) => o.encode(enc),
            Part::DbConnectInfo(o) => o.encode(enc),
            Part::AuthInit(p) | Part::AuthFinal(p) => p.encode(enc),
            Part::Input(p) => p.encode(enc),
            Part::ReadLob(r) => r.encode(enc),
            Part::WriteLob(chunks) => {
                for chunk in *chunks {
                    chunk.encode(enc);
                }
            },
        }
    }
}

/// Input parameter rows for an `Execute`.
///
/// Construction runs the sizing pass: per row the type-code bytes and value
/// bodies, then (for LOB parameters) the in-part offset of each first
/// chunk is recorded in its descriptor before the chunk bytes are accounted
/// at the end of the row. The offsets must be assigned here, before any
/// header is written, because the part header needs the final body size.
#[derive(Debug)]
pub struct InputParameters<'a> {
    fields: &'a [ParameterField],
    args: &'a [HdbValue],
    has_lob: bool,
    size: usize,
}

impl<'a> InputParameters<'a> {
    /// Run the sizing pass over `args` (row-major, one entry per field and
    /// row).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Other`] when the argument count is not a multiple of
    /// the field count.
    pub fn new(fields: &'a [ParameterField], args: &'a mut [HdbValue]) -> Result<Self> {
        let num_columns = fields.len();
        if num_columns == 0 {
            return Ok(Self { fields, args: &[], has_lob: false, size: 0 });
        }
        if args.len() % num_columns != 0 {
            return Err(ProtocolError::Other(format!(
                "invalid number of arguments {} - multiple of {num_columns} expected",
                args.len()
            )));
        }

        let has_lob = fields.iter().any(|f| f.type_code.is_lob());
        let mut size = 0usize;
        for row in args.chunks_mut(num_columns) {
            size += num_columns; // one type-code byte per value
            for (f, v) in fields.iter().zip(row.iter()) {
                size += v.prm_size(f.type_code);
            }
            if has_lob {
                for v in row.iter_mut() {
                    if let HdbValue::Lob(descr) = v {
                        descr.set_pos(size);
                        size += descr.chunk().len();
                    }
                }
            }
        }
        Ok(Self { fields, args, has_lob, size })
    }

    /// Number of parameter rows.
    #[must_use]
    pub fn num_arg(&self) -> usize {
        if self.fields.is_empty() {
            0
        } else {
            self.args.len() / self.fields.len()
        }
    }

    /// Encoded body size computed by the sizing pass.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Encode all rows; LOB first chunks follow their row inline.
    pub fn encode(&self, enc: &mut Encoder<'_>) {
        let num_columns = self.fields.len();
        if num_columns == 0 {
            return;
        }
        for row in self.args.chunks(num_columns) {
            for (f, v) in self.fields.iter().zip(row.iter()) {
                v.encode_prm(enc, f.type_code);
            }
            if self.has_lob {
                for v in row {
                    if let HdbValue::Lob(descr) = v {
                        enc.bytes(descr.chunk());
                    }
                }
            }
        }
    }
}
