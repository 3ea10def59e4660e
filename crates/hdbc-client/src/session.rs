//! Session operations: one method per protocol exchange.
//!
//! [`SessionInner`] owns the framed channel and implements the
//! request/reply choreography of each operation: which parts go out, which
//! reply part kinds are read, and what state is carried between exchanges.
//! Locking, cancellation and the public API live one layer up in
//! [`crate::Connection`]; everything here assumes exclusive access.

use hdbc_proto::{
    auth::Authenticator,
    fields::{ParameterField, ParameterMetadata, ResultMetadata},
    lob::LocatorId,
    options::{
        ClientContextKey, ClientDistributionMode, ConnectOptionKey, DbConnectInfoKey, OptionValue,
        Options,
    },
    parts::{InputParameters, Part},
    resultset::{decode_resultset, RowsAffected},
    value::HdbValue,
    FunctionCode, MessageType, PartKind,
};

use crate::{
    channel::Channel,
    error::{DriverError, Result},
    lob,
    rows::{CallResultData, ExecuteResult, PrepareResult, ResultSetData},
};

const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const CLIENT_TYPE: &str = "hdbc-rust";

/// Database connect information for `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbConnectInfo {
    /// Queried database name
    pub database_name: String,
    /// Host serving that database
    pub host: String,
    /// Port serving that database
    pub port: u16,
    /// True if this connection already points at that database
    pub is_connected: bool,
}

/// Session state behind the connection lock.
pub(crate) struct SessionInner {
    pub(crate) channel: Channel,
    pub(crate) conn_id: u64,
    pub(crate) fetch_size: usize,
    pub(crate) lob_chunk_size: usize,
    pub(crate) bulk_size: usize,
    pub(crate) legacy: bool,
    pub(crate) in_tx: bool,
    server_options: Options<ConnectOptionKey>,
    dfv: u8,
}

impl SessionInner {
    pub(crate) fn new(
        channel: Channel,
        conn_id: u64,
        fetch_size: usize,
        lob_chunk_size: usize,
        bulk_size: usize,
        legacy: bool,
    ) -> Self {
        Self {
            channel,
            conn_id,
            fetch_size,
            lob_chunk_size,
            bulk_size,
            legacy,
            in_tx: false,
            server_options: Options::new(),
            dfv: 0,
        }
    }

    pub(crate) fn is_bad(&self) -> bool {
        self.channel.is_bad()
    }

    /// Negotiated connect options as reported by the server.
    pub(crate) fn server_options(&self) -> &Options<ConnectOptionKey> {
        &self.server_options
    }

    /// Negotiated data format version.
    pub(crate) fn dfv(&self) -> u8 {
        self.dfv
    }

    fn server_string_option(&self, key: ConnectOptionKey) -> String {
        match self.server_options.get(key) {
            Some(OptionValue::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    /// Server version string from the connect options.
    pub(crate) fn full_version_string(&self) -> String {
        self.server_string_option(ConnectOptionKey::FullVersionString)
    }

    /// Database name from the connect options.
    pub(crate) fn database_name(&self) -> String {
        self.server_string_option(ConnectOptionKey::DatabaseName)
    }

    /// Run the prolog and the two-round authentication exchange.
    ///
    /// On success the channel carries the server-assigned session id and
    /// the merged connect options are available via
    /// [`SessionInner::server_options`].
    pub(crate) async fn authenticate(
        &mut self,
        auth: &mut Authenticator,
        application_name: &str,
        dfv: u8,
        locale: &str,
        session_variables: &[(String, String)],
    ) -> Result<()> {
        self.channel.prolog().await?;

        let client_context = Options::new()
            .with(ClientContextKey::ClientVersion, OptionValue::String(DRIVER_VERSION.into()))
            .with(ClientContextKey::ClientType, OptionValue::String(CLIENT_TYPE.into()))
            .with(
                ClientContextKey::ClientApplicationProgram,
                OptionValue::String(application_name.into()),
            );

        let init_prms = auth.init_request()?;
        let reply = self
            .channel
            .exchange(
                MessageType::Authenticate,
                false,
                &[Part::ClientContext(&client_context), Part::AuthInit(&init_prms)],
            )
            .await?;
        let mut auth_result = Ok(());
        reply.for_each_part(|ph, dec| {
            if ph.part_kind == PartKind::Authentication && auth_result.is_ok() {
                auth_result = auth.init_reply_decode(dec);
            }
            Ok(())
        })?;
        auth_result?;

        let mut connect_options = Options::new()
            .with(ConnectOptionKey::DistributionProtocolVersion, OptionValue::Bool(false))
            .with(ConnectOptionKey::SelectForUpdateSupported, OptionValue::Bool(false))
            .with(ConnectOptionKey::SplitBatchCommands, OptionValue::Bool(true))
            .with(ConnectOptionKey::DataFormatVersion2, OptionValue::Int(i32::from(dfv)))
            .with(ConnectOptionKey::CompleteArrayExecution, OptionValue::Bool(true))
            .with(
                ConnectOptionKey::ClientDistributionMode,
                OptionValue::Int(ClientDistributionMode::Off as i32),
            );
        if !locale.is_empty() {
            connect_options
                .set(ConnectOptionKey::ClientLocale, OptionValue::String(locale.to_string()));
        }

        let final_prms = auth.final_request()?;
        let client_id = client_id();
        let mut parts = vec![Part::AuthFinal(&final_prms), Part::ClientId(&client_id)];
        if !session_variables.is_empty() {
            parts.push(Part::ClientInfo(session_variables));
        }
        parts.push(Part::ConnectOptions(&connect_options));
        let reply = self.channel.exchange(MessageType::Connect, false, &parts).await?;
        let mut auth_result = Ok(());
        reply.for_each_part(|ph, dec| {
            match ph.part_kind {
                PartKind::Authentication => {
                    if auth_result.is_ok() {
                        auth_result = auth.final_reply_decode(dec);
                    }
                },
                PartKind::ConnectOptions => {
                    connect_options.merge(Options::decode(dec, ph.num_arg()));
                },
                _ => {},
            }
            Ok(())
        })?;
        auth_result?;

        self.dfv = match connect_options.get(ConnectOptionKey::DataFormatVersion2) {
            Some(OptionValue::Int(v)) => *v as u8,
            _ => dfv,
        };
        self.server_options = connect_options;

        let session_id = self.channel.session_id();
        if session_id <= 0 {
            return Err(DriverError::InvalidSessionId(session_id));
        }
        tracing::debug!(session_id, dfv = self.dfv, "session authenticated");
        Ok(())
    }

    /// Execute SQL without a prepared statement, discarding any rows.
    pub(crate) async fn execute_direct(
        &mut self,
        query: &str,
        commit: bool,
    ) -> Result<ExecuteResult> {
        let reply =
            self.channel.exchange(MessageType::ExecuteDirect, commit, &[Part::Command(query)]).await?;
        let mut total = 0u64;
        reply.for_each_part(|ph, dec| {
            if ph.part_kind == PartKind::RowsAffected {
                total = RowsAffected::decode(dec, ph.num_arg()).total();
            }
            Ok(())
        })?;
        if reply.function_code == FunctionCode::Ddl {
            Ok(ExecuteResult::NoRows)
        } else {
            Ok(ExecuteResult::RowsAffected(total))
        }
    }

    /// Execute SQL without a prepared statement, keeping the result set.
    ///
    /// `None` for queries without a result shape.
    pub(crate) async fn query_direct(
        &mut self,
        query: &str,
        commit: bool,
    ) -> Result<Option<ResultSetData>> {
        let reply =
            self.channel.exchange(MessageType::ExecuteDirect, commit, &[Part::Command(query)]).await?;
        let rs = Self::read_resultset(&reply, Vec::new())?;
        Ok(if rs.id == 0 { None } else { Some(rs) })
    }

    fn read_resultset(
        reply: &crate::channel::Reply,
        fields: Vec<hdbc_proto::fields::ResultField>,
    ) -> Result<ResultSetData> {
        let mut rs = ResultSetData { fields, ..ResultSetData::default() };
        reply.for_each_part(|ph, dec| {
            match ph.part_kind {
                PartKind::ResultMetadata => {
                    rs.fields = ResultMetadata::decode(dec, ph.num_arg()).fields;
                },
                PartKind::ResultsetId => rs.id = dec.u64(),
                PartKind::Resultset => {
                    decode_resultset(
                        dec,
                        &rs.fields,
                        ph.num_arg(),
                        &mut rs.values,
                        &mut rs.decode_errors,
                    );
                    rs.attributes = ph.part_attributes;
                },
                _ => {},
            }
            Ok(())
        })?;
        Ok(rs)
    }

    /// Prepare a statement.
    pub(crate) async fn prepare(&mut self, query: &str) -> Result<PrepareResult> {
        let reply =
            self.channel.exchange(MessageType::Prepare, false, &[Part::Command(query)]).await?;
        let mut pr = PrepareResult {
            statement_id: 0,
            parameter_fields: Vec::new(),
            result_fields: Vec::new(),
            function_code: reply.function_code,
        };
        reply.for_each_part(|ph, dec| {
            match ph.part_kind {
                PartKind::StatementId => pr.statement_id = dec.u64(),
                PartKind::ResultMetadata => {
                    pr.result_fields = ResultMetadata::decode(dec, ph.num_arg()).fields;
                },
                PartKind::ParameterMetadata => {
                    pr.parameter_fields = ParameterMetadata::decode(dec, ph.num_arg()).fields;
                },
                _ => {},
            }
            Ok(())
        })?;
        Ok(pr)
    }

    /// Execute a prepared query; `None` for non-SELECT-shaped statements.
    pub(crate) async fn query(
        &mut self,
        prep: &PrepareResult,
        args: &mut [HdbValue],
        commit: bool,
    ) -> Result<Option<ResultSetData>> {
        if has_lob(&prep.parameter_fields) {
            self.fetch_first_lob_chunks(args)?;
        }
        let input = InputParameters::new(&prep.parameter_fields, args)?;
        let reply = self
            .channel
            .exchange(
                MessageType::Execute,
                commit,
                &[Part::StatementId(prep.statement_id), Part::Input(input)],
            )
            .await?;
        let rs = Self::read_resultset(&reply, prep.result_fields.clone())?;
        Ok(if rs.id == 0 { None } else { Some(rs) })
    }

    /// Execute a prepared DML statement, splitting rows so that piecewise
    /// LOB data only ever sits in the last row of a package.
    pub(crate) async fn execute_bulk(
        &mut self,
        prep: &PrepareResult,
        args: &mut [HdbValue],
        commit: bool,
    ) -> Result<ExecuteResult> {
        let num_columns = prep.parameter_fields.len();
        let lobs = has_lob(&prep.parameter_fields);

        // single server call: no LOBs involved, or exactly one row
        if !lobs || args.len() == num_columns {
            if lobs {
                self.fetch_first_lob_chunks(args)?;
            }
            return self.execute(prep, args, commit).await;
        }

        let num_rows = args.len() / num_columns;
        let mut total = 0u64;
        let mut is_ddl = false;
        let mut last_from = 0;
        for row in 0..num_rows {
            let from = row * num_columns;
            let to = from + num_columns;
            let has_next = self.fetch_first_lob_chunks(&mut args[from..to])?;

            // flush when a LOB spills over into follow-up chunks or when
            // this is the final row
            if has_next || row == num_rows - 1 {
                match self.execute(prep, &mut args[last_from..to], commit).await? {
                    ExecuteResult::RowsAffected(n) => total += n,
                    ExecuteResult::NoRows => is_ddl = true,
                }
                last_from = to;
            }
        }
        if is_ddl {
            Ok(ExecuteResult::NoRows)
        } else {
            Ok(ExecuteResult::RowsAffected(total))
        }
    }

    /// One `Execute` round trip plus the trailing LOB upload, if any.
    async fn execute(
        &mut self,
        prep: &PrepareResult,
        args: &mut [HdbValue],
        commit: bool,
    ) -> Result<ExecuteResult> {
        let input = InputParameters::new(&prep.parameter_fields, args)?;
        let reply = self
            .channel
            .exchange(
                MessageType::Execute,
                commit,
                &[Part::StatementId(prep.statement_id), Part::Input(input)],
            )
            .await?;

        let mut total = 0u64;
        let mut ids: Vec<LocatorId> = Vec::new();
        reply.for_each_part(|ph, dec| {
            match ph.part_kind {
                PartKind::RowsAffected => {
                    total = RowsAffected::decode(dec, ph.num_arg()).total();
                },
                PartKind::WriteLobReply => {
                    ids = hdbc_proto::lob::WriteLobReply::decode(dec, ph.num_arg()).ids;
                },
                _ => {},
            }
            Ok(())
        })?;
        let function_code = reply.function_code;

        if !ids.is_empty() {
            // exec has no output parameters to wait for
            lob::write_lobs(self, None, ids, &prep.parameter_fields, args).await?;
        }

        if function_code == FunctionCode::Ddl {
            Ok(ExecuteResult::NoRows)
        } else {
            Ok(ExecuteResult::RowsAffected(total))
        }
    }

    /// Call a stored procedure.
    pub(crate) async fn call(
        &mut self,
        prep: &PrepareResult,
        args: Vec<HdbValue>,
    ) -> Result<CallResultData> {
        // callers may pass input arguments only, or one argument per field
        let consume_all = args.len() == prep.parameter_fields.len();
        let mut in_fields: Vec<ParameterField> = Vec::new();
        let mut out_fields: Vec<ParameterField> = Vec::new();
        let mut in_args: Vec<HdbValue> = Vec::new();
        let mut args = args.into_iter();
        for f in &prep.parameter_fields {
            let arg = if f.is_in() || consume_all { args.next() } else { None };
            if f.is_in() {
                in_fields.push(f.clone());
                in_args.push(crate::statement::coerce_value(
                    arg.unwrap_or(HdbValue::Null),
                    f,
                )?);
            }
            if f.is_out() {
                out_fields.push(f.clone());
            }
        }

        if has_lob(&in_fields) {
            self.fetch_first_lob_chunks(&mut in_args)?;
        }
        let input = InputParameters::new(&in_fields, &mut in_args)?;
        let reply = self
            .channel
            .exchange(
                MessageType::Execute,
                false,
                &[Part::StatementId(prep.statement_id), Part::Input(input)],
            )
            .await?;

        let mut cr = CallResultData { output_fields: out_fields, ..CallResultData::default() };
        let mut ids: Vec<LocatorId> = Vec::new();
        reply.for_each_part(|ph, dec| {
            match ph.part_kind {
                PartKind::OutputParameters => {
                    cr.output_values = hdbc_proto::resultset::decode_output_parameters(
                        dec,
                        &cr.output_fields,
                        ph.num_arg(),
                        &mut cr.decode_errors,
                    );
                },
                PartKind::ResultMetadata => {
                    // each metadata part starts a new table output
                    cr.tables.push(ResultSetData {
                        fields: ResultMetadata::decode(dec, ph.num_arg()).fields,
                        ..ResultSetData::default()
                    });
                },
                PartKind::ResultsetId => {
                    if let Some(table) = cr.tables.last_mut() {
                        table.id = dec.u64();
                    }
                },
                PartKind::Resultset => {
                    if let Some(table) = cr.tables.last_mut() {
                        let mut values = std::mem::take(&mut table.values);
                        decode_resultset(
                            dec,
                            &table.fields,
                            ph.num_arg(),
                            &mut values,
                            &mut table.decode_errors,
                        );
                        table.values = values;
                        table.attributes = ph.part_attributes;
                    }
                },
                PartKind::WriteLobReply => {
                    ids = hdbc_proto::lob::WriteLobReply::decode(dec, ph.num_arg()).ids;
                },
                _ => {},
            }
            Ok(())
        })?;

        if !ids.is_empty() {
            // output parameters arrive with the final LOB write reply
            lob::write_lobs(self, Some(&mut cr), ids, &in_fields, &mut in_args).await?;
        }

        if self.legacy {
            for table in &mut cr.tables {
                let rs = std::mem::take(table);
                let id = rs.id;
                crate::rows::cache_insert(self.conn_id, rs);
                table.id = id;
            }
        }
        Ok(cr)
    }

    /// Fetch the next chunk of rows into `rs` (grow-only buffer reuse).
    pub(crate) async fn fetch_next(&mut self, rs: &mut ResultSetData) -> Result<()> {
        let reply = self
            .channel
            .exchange(
                MessageType::FetchNext,
                false,
                &[Part::ResultsetId(rs.id), Part::Fetchsize(self.fetch_size as i32)],
            )
            .await?;
        reply.for_each_part(|ph, dec| {
            if ph.part_kind == PartKind::Resultset {
                decode_resultset(dec, &rs.fields, ph.num_arg(), &mut rs.values, &mut rs.decode_errors);
                rs.attributes = ph.part_attributes;
            }
            Ok(())
        })
    }

    /// Close a server-side result set.
    pub(crate) async fn close_resultset(&mut self, id: u64) -> Result<()> {
        self.channel
            .write_message(MessageType::CloseResultset, false, &[Part::ResultsetId(id)])
            .await?;
        self.channel.read_skip().await
    }

    /// Drop a prepared statement.
    pub(crate) async fn drop_statement(&mut self, id: u64) -> Result<()> {
        self.channel
            .write_message(MessageType::DropStatementId, false, &[Part::StatementId(id)])
            .await?;
        self.channel.read_skip().await
    }

    /// Commit the current transaction.
    pub(crate) async fn commit(&mut self) -> Result<()> {
        self.channel.write_message(MessageType::Commit, false, &[]).await?;
        self.channel.read_skip().await
    }

    /// Roll back the current transaction.
    pub(crate) async fn rollback(&mut self) -> Result<()> {
        self.channel.write_message(MessageType::Rollback, false, &[]).await?;
        self.channel.read_skip().await
    }

    /// Send the disconnect message.
    ///
    /// The reply is deliberately not read: the server may drop the TCP
    /// connection before it can be drained.
    pub(crate) async fn disconnect(&mut self) -> Result<()> {
        self.channel.write_message(MessageType::Disconnect, false, &[]).await
    }

    /// Query routing information for `database_name`.
    pub(crate) async fn db_connect_info(&mut self, database_name: &str) -> Result<DbConnectInfo> {
        let request: Options<DbConnectInfoKey> = Options::new()
            .with(DbConnectInfoKey::DatabaseName, OptionValue::String(database_name.to_string()));
        let reply = self
            .channel
            .exchange(MessageType::DbConnectInfo, false, &[Part::DbConnectInfo(&request)])
            .await?;

        let mut info =
            DbConnectInfo { database_name: database_name.to_string(), ..DbConnectInfo::default() };
        reply.for_each_part(|ph, dec| {
            if ph.part_kind == PartKind::DbConnectInfo {
                let opts: Options<DbConnectInfoKey> = Options::decode(dec, ph.num_arg());
                if let Some(OptionValue::String(host)) = opts.get(DbConnectInfoKey::Host) {
                    info.host = host.clone();
                }
                if let Some(OptionValue::Int(port)) = opts.get(DbConnectInfoKey::Port) {
                    info.port = *port as u16;
                }
                if let Some(OptionValue::Bool(connected)) = opts.get(DbConnectInfoKey::IsConnected)
                {
                    info.is_connected = *connected;
                }
            }
            Ok(())
        })?;
        Ok(info)
    }

    /// Pull the first chunk of every LOB argument; true if any LOB has more
    /// data than fits its first chunk.
    pub(crate) fn fetch_first_lob_chunks(&mut self, args: &mut [HdbValue]) -> Result<bool> {
        let mut has_next = false;
        for arg in args {
            if let HdbValue::Lob(descr) = arg {
                let last = descr.fetch_next(self.lob_chunk_size)?;
                if !last {
                    has_next = true;
                }
            }
        }
        Ok(has_next)
    }
}

fn has_lob(fields: &[ParameterField]) -> bool {
    fields.iter().any(|f| f.type_code.is_lob())
}

/// Client identification sent with the connect message: `pid@hostname`.
fn client_id() -> String {
    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{}@{hostname}", std::process::id())
}
