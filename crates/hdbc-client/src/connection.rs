//! The public connection: lock discipline, cancellation, lifecycle.
//!
//! # Locking
//!
//! All session state sits behind one async mutex. An atomic "lock reason"
//! rides next to it so the nested-query rule can be checked without taking
//! the lock: while a [`QueryResult`] cursor holds the connection, any other
//! statement fails fast with [`DriverError::NestedQuery`] instead of
//! deadlocking behind the cursor. Cursor-producing calls hand their guard
//! to the returned cursor, which releases it on close; everything else
//! releases on return.
//!
//! # Cancellation
//!
//! Every potentially long operation races its protocol exchange against
//! the caller's [`CancellationToken`]. When the token fires mid-exchange
//! the wire is left in an undefined position, so the connection is latched
//! as cancelled (the only fail-stop action in the driver) and pooling
//! layers observe [`Connection::is_valid`] turning false and discard it.

use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    Arc,
};

use hdbc_proto::{auth::Authenticator, lob::LobOutDescr, HdbValue, PartAttributes};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::{
    attrs::ConnAttrs,
    channel::Channel,
    dsn::Dsn,
    error::{DriverError, Result},
    rows::{cache_cleanup, cache_take, CallResultData, ExecuteResult, PrepareResult, ResultSetData},
    session::{DbConnectInfo, SessionInner},
    statement::{build_packages, coerce_value, BulkStatement},
    wire::{Dialer, TcpDialer, Wire},
};

const DUMMY_QUERY: &str = "select 1 from dummy";
const SET_ISOLATION_LEVEL: &str = "set transaction isolation level";
const SET_ACCESS_MODE: &str = "set transaction";
const SET_DEFAULT_SCHEMA: &str = "set schema";

/// Lock reason: a streaming cursor owns the connection.
const LR_NESTED_QUERY: i64 = 1;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Transaction isolation levels supported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// READ COMMITTED (server default)
    #[default]
    ReadCommitted,
    /// REPEATABLE READ
    RepeatableRead,
    /// SERIALIZABLE
    Serializable,
}

impl IsolationLevel {
    fn sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "" | "DEFAULT" | "READ COMMITTED" => Ok(Self::ReadCommitted),
            "REPEATABLE READ" => Ok(Self::RepeatableRead),
            "SERIALIZABLE" => Ok(Self::Serializable),
            _ => Err(DriverError::UnsupportedIsolationLevel),
        }
    }
}

/// Signs the X509 server challenge; shared so every connect can hand the
/// auth engine its own boxed closure.
pub type ChallengeSigner =
    Arc<dyn Fn(&[u8]) -> hdbc_proto::Result<Vec<u8>> + Send + Sync>;

/// Credentials the connector registers with the authentication engine.
enum Credential {
    Basic { username: String, password: String },
    Jwt { token: String },
    X509 { chain: Vec<Vec<u8>>, signer: ChallengeSigner },
    SessionCookie { logonname: String, cookie: Vec<u8>, client_id: String },
}

/// Builds connections from attributes and credentials.
pub struct Connector {
    attrs: ConnAttrs,
    credentials: Vec<Credential>,
    dialer: Arc<dyn Dialer>,
}

impl Connector {
    /// A connector over `attrs` with no credentials yet.
    #[must_use]
    pub fn new(attrs: ConnAttrs) -> Self {
        Self { attrs, credentials: Vec::new(), dialer: Arc::new(TcpDialer) }
    }

    /// Build a connector from a DSN string (credentials become basic auth).
    ///
    /// # Errors
    ///
    /// DSN parse failures.
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        let dsn = Dsn::parse(dsn)?;
        let attrs = ConnAttrs::new(dsn.host.clone());
        attrs.set_default_schema(dsn.default_schema.clone());
        attrs.set_timeout(dsn.timeout);
        attrs.set_ping_interval(dsn.ping_interval);
        attrs.set_tls(dsn.tls.clone());
        let mut connector = Self::new(attrs);
        if !dsn.username.is_empty() || !dsn.password.is_empty() {
            connector = connector.with_basic_auth(&dsn.username, &dsn.password);
        }
        Ok(connector)
    }

    /// The connector's attributes (shared; tune before connecting).
    #[must_use]
    pub fn attrs(&self) -> &ConnAttrs {
        &self.attrs
    }

    /// Register user/password authentication (both SCRAM variants).
    #[must_use]
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        self.credentials.push(Credential::Basic {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    /// Register JWT authentication.
    #[must_use]
    pub fn with_jwt_auth(mut self, token: &str) -> Self {
        self.credentials.push(Credential::Jwt { token: token.to_string() });
        self
    }

    /// Register X509 client-certificate authentication.
    #[must_use]
    pub fn with_x509_auth(mut self, chain: Vec<Vec<u8>>, signer: ChallengeSigner) -> Self {
        self.credentials.push(Credential::X509 { chain, signer });
        self
    }

    /// Register session-cookie reconnect authentication.
    #[must_use]
    pub fn with_session_cookie(mut self, logonname: &str, cookie: Vec<u8>, client_id: &str) -> Self {
        self.credentials.push(Credential::SessionCookie {
            logonname: logonname.to_string(),
            cookie,
            client_id: client_id.to_string(),
        });
        self
    }

    /// Substitute the transport dialer (tests, tunnels).
    #[must_use]
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    fn authenticator(&self) -> Authenticator {
        let logonname = self
            .credentials
            .iter()
            .find_map(|c| match c {
                Credential::Basic { username, .. } => Some(username.clone()),
                Credential::SessionCookie { logonname, .. } => Some(logonname.clone()),
                Credential::Jwt { .. } | Credential::X509 { .. } => None,
            })
            .unwrap_or_default();
        let mut auth = Authenticator::new(logonname);
        for credential in &self.credentials {
            match credential {
                Credential::Basic { username, password } => auth.add_basic(username, password),
                Credential::Jwt { token } => auth.add_jwt(token),
                Credential::X509 { chain, signer } => {
                    let signer = Arc::clone(signer);
                    auth.add_x509(chain.clone(), Box::new(move |challenge| signer(challenge)));
                },
                Credential::SessionCookie { cookie, client_id, .. } => {
                    auth.add_session_cookie(cookie.clone(), client_id);
                },
            }
        }
        auth
    }

    /// Open a connection: dial, prolog, authenticate, apply the default
    /// schema, start the pinger.
    ///
    /// # Errors
    ///
    /// Transport, authentication, or protocol failures.
    pub async fn connect(&self, token: &CancellationToken) -> Result<Connection> {
        let attrs = &self.attrs;
        let cancelled = Arc::new(AtomicBool::new(false));
        let tls = attrs.tls();
        let wire = Wire::connect(
            self.dialer.as_ref(),
            &attrs.host(),
            attrs.timeout(),
            attrs.tcp_keep_alive(),
            tls.as_ref(),
            Arc::clone(&cancelled),
        )
        .await?;

        let channel = Channel::new(wire, attrs.buffer_size());
        let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        let mut session = SessionInner::new(
            channel,
            conn_id,
            attrs.fetch_size(),
            attrs.lob_chunk_size(),
            attrs.bulk_size(),
            attrs.legacy(),
        );

        let mut auth = self.authenticator();
        let session_variables = attrs.session_variables();
        run_cancellable(
            token,
            &cancelled,
            session.authenticate(
                &mut auth,
                &attrs.application_name(),
                attrs.dfv(),
                &attrs.locale(),
                &session_variables,
            ),
        )
        .await?;

        let version = session.full_version_string();
        let database_name = session.database_name();

        let default_schema = attrs.default_schema();
        if !default_schema.is_empty() {
            let query = format!("{SET_DEFAULT_SCHEMA} {}", quote_identifier(&default_schema));
            run_cancellable(token, &cancelled, session.execute_direct(&query, true)).await?;
        }

        let conn = Connection {
            inner: Arc::new(Mutex::new(session)),
            lock_reason: Arc::new(AtomicI64::new(0)),
            cancelled,
            conn_id,
            version,
            database_name,
            shutdown: CancellationToken::new(),
        };

        let ping_interval = attrs.ping_interval();
        if !ping_interval.is_zero() {
            conn.spawn_pinger(ping_interval);
        }
        Ok(conn)
    }
}

/// An authenticated connection to the server.
///
/// Cheap to clone; all clones share the same session and serialise through
/// the connection lock.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Mutex<SessionInner>>,
    lock_reason: Arc<AtomicI64>,
    cancelled: Arc<AtomicBool>,
    conn_id: u64,
    version: String,
    database_name: String,
    shutdown: CancellationToken,
}

/// Guard owning the connection lock; resets the lock reason on release.
struct ConnGuard {
    guard: OwnedMutexGuard<SessionInner>,
    lock_reason: Arc<AtomicI64>,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.lock_reason.store(0, Ordering::SeqCst);
    }
}

impl std::ops::Deref for ConnGuard {
    type Target = SessionInner;

    fn deref(&self) -> &SessionInner {
        &self.guard
    }
}

impl std::ops::DerefMut for ConnGuard {
    fn deref_mut(&mut self) -> &mut SessionInner {
        &mut self.guard
    }
}

async fn run_cancellable<T>(
    token: &CancellationToken,
    cancelled: &AtomicBool,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        res = fut => res,
        () = token.cancelled() => {
            // the exchange is abandoned mid-flight; the wire position is
            // undefined, so the connection must not be reused
            cancelled.store(true, Ordering::SeqCst);
            Err(DriverError::Cancelled)
        },
    }
}

impl Connection {
    async fn try_lock_conn(&self, reason: i64) -> Result<ConnGuard> {
        if self.lock_reason.load(Ordering::SeqCst) == LR_NESTED_QUERY {
            return Err(DriverError::NestedQuery);
        }
        let guard = Arc::clone(&self.inner).lock_owned().await;
        self.lock_reason.store(reason, Ordering::SeqCst);
        Ok(ConnGuard { guard, lock_reason: Arc::clone(&self.lock_reason) })
    }

    fn check_usable(&self, session: &SessionInner) -> Result<()> {
        if session.is_bad() {
            return Err(DriverError::BadConnection);
        }
        Ok(())
    }

    /// True while the connection may still be used.
    pub async fn is_valid(&self) -> bool {
        let session = self.inner.lock().await;
        !session.is_bad()
    }

    /// Drop pooled state between checkouts; fails if the connection went bad.
    pub async fn reset(&self, _token: &CancellationToken) -> Result<()> {
        let session = self.inner.lock().await;
        cache_cleanup(self.conn_id);
        self.check_usable(&session)
    }

    /// Execute the dummy query to probe liveness.
    pub async fn ping(&self, token: &CancellationToken) -> Result<()> {
        let mut guard = self.try_lock_conn(0).await?;
        self.check_usable(&guard)?;
        let commit = !guard.in_tx;
        run_cancellable(token, &self.cancelled, async {
            guard.query_direct(DUMMY_QUERY, commit).await.map(|_| ())
        })
        .await
    }

    /// Server version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Connected database name.
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Negotiated data format version.
    pub async fn dfv(&self) -> u8 {
        self.inner.lock().await.dfv()
    }

    /// Connect options as negotiated with the server.
    pub async fn server_options(
        &self,
    ) -> hdbc_proto::options::Options<hdbc_proto::options::ConnectOptionKey> {
        self.inner.lock().await.server_options().clone()
    }

    /// Query routing information for `database_name`.
    pub async fn db_connect_info(
        &self,
        token: &CancellationToken,
        database_name: &str,
    ) -> Result<DbConnectInfo> {
        let mut guard = self.try_lock_conn(0).await?;
        self.check_usable(&guard)?;
        run_cancellable(token, &self.cancelled, guard.db_connect_info(database_name)).await
    }

    /// Execute SQL directly, returning affected rows (DDL gives
    /// [`ExecuteResult::NoRows`]).
    pub async fn exec_direct(
        &self,
        token: &CancellationToken,
        query: &str,
    ) -> Result<ExecuteResult> {
        let mut guard = self.try_lock_conn(0).await?;
        self.check_usable(&guard)?;
        let commit = !guard.in_tx;
        run_cancellable(token, &self.cancelled, guard.execute_direct(query, commit)).await
    }

    /// Query SQL directly; `None` for statements without a result shape.
    pub async fn query_direct(
        &self,
        token: &CancellationToken,
        query: &str,
    ) -> Result<Option<QueryResult>> {
        let mut guard = self.try_lock_conn(LR_NESTED_QUERY).await?;
        self.check_usable(&guard)?;
        let commit = !guard.in_tx;
        let rs =
            run_cancellable(token, &self.cancelled, guard.query_direct(query, commit)).await?;
        Ok(rs.map(|rs| self.make_cursor(rs, guard)))
    }

    /// Prepare a statement.
    pub async fn prepare(&self, token: &CancellationToken, query: &str) -> Result<PrepareResult> {
        let mut guard = self.try_lock_conn(0).await?;
        self.check_usable(&guard)?;
        run_cancellable(token, &self.cancelled, guard.prepare(query)).await
    }

    /// Prepare a statement for bulk insertion.
    pub async fn prepare_bulk(
        &self,
        token: &CancellationToken,
        query: &str,
    ) -> Result<BulkStatement> {
        let prep = self.prepare(token, query).await?;
        let bulk_size = self.inner.lock().await.bulk_size;
        Ok(BulkStatement::new(self.clone(), prep, bulk_size))
    }

    /// Execute a prepared statement with one row of arguments.
    pub async fn exec(
        &self,
        token: &CancellationToken,
        prep: &PrepareResult,
        args: Vec<HdbValue>,
    ) -> Result<ExecuteResult> {
        let expected = prep.num_fields();
        if args.len() != expected {
            return Err(DriverError::InvalidArgumentCount { got: args.len(), expected });
        }
        let mut coerced = Vec::with_capacity(args.len());
        for (field, value) in prep.parameter_fields.iter().zip(args) {
            coerced.push(coerce_value(value, field)?);
        }
        self.exec_buffered(token, prep, &mut coerced).await
    }

    /// Execute pre-coerced row-major argument buffers (bulk flush path).
    pub(crate) async fn exec_buffered(
        &self,
        token: &CancellationToken,
        prep: &PrepareResult,
        args: &mut [HdbValue],
    ) -> Result<ExecuteResult> {
        let mut guard = self.try_lock_conn(0).await?;
        self.check_usable(&guard)?;
        let commit = !guard.in_tx;
        run_cancellable(token, &self.cancelled, guard.execute_bulk(prep, args, commit)).await
    }

    /// Execute a prepared statement once per row, split into bulk-size
    /// packages.
    ///
    /// Non-atomic: a failing package aborts the sequence and reports the
    /// affected-row sum of the finished packages via
    /// [`DriverError::PartialExecute`].
    pub async fn exec_many(
        &self,
        token: &CancellationToken,
        prep: &PrepareResult,
        rows: Vec<Vec<HdbValue>>,
    ) -> Result<u64> {
        let bulk_size = self.inner.lock().await.bulk_size;
        let packages = build_packages(prep, rows, bulk_size)?;

        let mut total = 0u64;
        for mut package in packages {
            match self.exec_buffered(token, prep, &mut package).await {
                Ok(res) => total += res.rows_affected(),
                Err(err) => {
                    return Err(DriverError::PartialExecute {
                        rows_affected: total,
                        source: Box::new(err),
                    });
                },
            }
        }
        Ok(total)
    }

    /// Execute a prepared query; `None` for non-SELECT-shaped statements.
    pub async fn query(
        &self,
        token: &CancellationToken,
        prep: &PrepareResult,
        args: Vec<HdbValue>,
    ) -> Result<Option<QueryResult>> {
        let expected = prep.num_fields();
        if args.len() != expected {
            return Err(DriverError::InvalidArgumentCount { got: args.len(), expected });
        }
        let mut coerced = Vec::with_capacity(args.len());
        for (field, value) in prep.parameter_fields.iter().zip(args) {
            coerced.push(coerce_value(value, field)?);
        }

        let mut guard = self.try_lock_conn(LR_NESTED_QUERY).await?;
        self.check_usable(&guard)?;
        let commit = !guard.in_tx;
        let rs = run_cancellable(
            token,
            &self.cancelled,
            guard.query(prep, &mut coerced, commit),
        )
        .await?;
        Ok(rs.map(|rs| self.make_cursor(rs, guard)))
    }

    /// Call a stored procedure.
    pub async fn call(
        &self,
        token: &CancellationToken,
        prep: &PrepareResult,
        args: Vec<HdbValue>,
    ) -> Result<CallResult> {
        let expected = prep.num_input_fields();
        if args.len() != expected && args.len() != prep.num_fields() {
            return Err(DriverError::InvalidArgumentCount { got: args.len(), expected });
        }
        let mut guard = self.try_lock_conn(LR_NESTED_QUERY).await?;
        self.check_usable(&guard)?;
        let data = run_cancellable(token, &self.cancelled, guard.call(prep, args)).await?;
        Ok(CallResult { data, guard, cancelled: Arc::clone(&self.cancelled) })
    }

    /// Drop a prepared statement on the server.
    pub async fn drop_statement(
        &self,
        token: &CancellationToken,
        prep: &PrepareResult,
    ) -> Result<()> {
        let mut guard = self.try_lock_conn(0).await?;
        self.check_usable(&guard)?;
        run_cancellable(token, &self.cancelled, guard.drop_statement(prep.statement_id)).await
    }

    /// Begin a transaction with the given isolation level and access mode.
    pub async fn begin(
        &self,
        token: &CancellationToken,
        isolation: IsolationLevel,
        read_only: bool,
    ) -> Result<Transaction> {
        let mut guard = self.try_lock_conn(0).await?;
        self.check_usable(&guard)?;
        if guard.in_tx {
            return Err(DriverError::NestedTransaction);
        }

        run_cancellable(token, &self.cancelled, async {
            guard
                .execute_direct(&format!("{SET_ISOLATION_LEVEL} {}", isolation.sql()), true)
                .await?;
            let mode = if read_only { "READ ONLY" } else { "READ WRITE" };
            guard.execute_direct(&format!("{SET_ACCESS_MODE} {mode}"), true).await?;
            Ok(())
        })
        .await?;

        guard.in_tx = true;
        Ok(Transaction { conn: self.clone(), done: false })
    }

    /// Table output of an earlier procedure call, by result-set id
    /// (legacy mode).
    #[must_use]
    pub fn table_result(&self, id: u64) -> Option<ResultSet> {
        cache_take(id).map(|data| ResultSet { data })
    }

    /// Close the connection, disconnecting politely when still healthy.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        let mut session = self.inner.lock().await;
        cache_cleanup(self.conn_id);
        if !session.is_bad() {
            // reply is never read; the server may drop the link first
            let _ = session.disconnect().await;
        }
        Ok(())
    }

    fn make_cursor(&self, rs: ResultSetData, guard: ConnGuard) -> QueryResult {
        QueryResult {
            data: rs,
            guard: Some(guard),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    fn spawn_pinger(&self, interval: std::time::Duration) {
        let conn = self.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick is immediate
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = conn.ping(&CancellationToken::new()).await {
                            tracing::debug!(%err, "pinger: ping failed");
                        }
                    },
                }
            }
        });
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// An open transaction. Must be finished explicitly.
pub struct Transaction {
    conn: Connection,
    done: bool,
}

impl Transaction {
    /// Commit the transaction.
    pub async fn commit(mut self, token: &CancellationToken) -> Result<()> {
        self.finish(token, false).await
    }

    /// Roll the transaction back.
    pub async fn rollback(mut self, token: &CancellationToken) -> Result<()> {
        self.finish(token, true).await
    }

    async fn finish(&mut self, token: &CancellationToken, rollback: bool) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        let mut guard = self.conn.try_lock_conn(0).await?;
        guard.in_tx = false;
        self.conn.check_usable(&guard)?;
        run_cancellable(token, &self.conn.cancelled, async {
            if rollback {
                guard.rollback().await
            } else {
                guard.commit().await
            }
        })
        .await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!("transaction dropped without commit or rollback");
        }
    }
}

/// A streaming cursor over a query's result set.
///
/// Holds the connection lock until [`QueryResult::close`]; other statements
/// on the same connection fail with [`DriverError::NestedQuery`] while the
/// cursor is open.
pub struct QueryResult {
    data: ResultSetData,
    guard: Option<ConnGuard>,
    cancelled: Arc<AtomicBool>,
}

impl QueryResult {
    /// Buffered rows and metadata.
    #[must_use]
    pub fn data(&self) -> &ResultSetData {
        &self.data
    }

    /// Column metadata.
    #[must_use]
    pub fn fields(&self) -> &[hdbc_proto::fields::ResultField] {
        &self.data.fields
    }

    /// Number of buffered rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.data.num_rows()
    }

    /// Values of row `i`.
    #[must_use]
    pub fn row(&self, i: usize) -> &[HdbValue] {
        self.data.row(i)
    }

    /// Attributes reported with the latest fetch.
    #[must_use]
    pub fn attributes(&self) -> PartAttributes {
        self.data.attributes
    }

    /// Field decode errors collected so far; inspect after iterating.
    #[must_use]
    pub fn decode_errors(&self) -> &[hdbc_proto::resultset::DecodeError] {
        &self.data.decode_errors
    }

    /// Fetch the next chunk of rows into the (grow-only) buffer.
    ///
    /// Returns false once the result set is exhausted.
    pub async fn fetch_next(&mut self, token: &CancellationToken) -> Result<bool> {
        if !self.data.needs_fetch() {
            return Ok(false);
        }
        let Some(guard) = self.guard.as_mut() else {
            return Err(DriverError::BadConnection);
        };
        let session: &mut SessionInner = guard;
        run_cancellable(token, &self.cancelled, session.fetch_next(&mut self.data)).await?;
        Ok(self.data.needs_fetch())
    }

    /// Download a LOB cell of this result set into `out`.
    ///
    /// Keeps working after the last row packet: the result set stays open
    /// for LOB reads until every locator reported its final chunk.
    pub async fn read_lob(
        &mut self,
        token: &CancellationToken,
        descr: &LobOutDescr,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let Some(guard) = self.guard.as_mut() else {
            return Err(DriverError::BadConnection);
        };
        let session: &mut SessionInner = guard;
        run_cancellable(token, &self.cancelled, crate::lob::read_lob_into(session, descr, out))
            .await
    }

    /// Close the cursor and release the connection.
    ///
    /// The explicit close-resultset message is suppressed when the server
    /// already delivered the last packet or closed the set on its side.
    pub async fn close(mut self, token: &CancellationToken) -> Result<()> {
        let Some(mut guard) = self.guard.take() else { return Ok(()) };
        if !self.data.last_packet() && !self.data.server_closed() {
            let session: &mut SessionInner = &mut guard;
            run_cancellable(token, &self.cancelled, session.close_resultset(self.data.id))
                .await?;
        }
        Ok(())
    }

    /// Detach the buffered data, closing the cursor without the server
    /// round trip (only valid when no close message is needed).
    #[must_use]
    pub fn into_data(mut self) -> ResultSetData {
        self.guard = None;
        std::mem::take(&mut self.data)
    }
}

impl Drop for QueryResult {
    fn drop(&mut self) {
        if self.guard.is_some() && !self.data.last_packet() && !self.data.server_closed() {
            tracing::warn!(id = self.data.id, "query result dropped without close");
        }
    }
}

/// Result of a procedure call: output parameters plus table outputs in
/// server order. Holds the connection lock until closed.
pub struct CallResult {
    data: CallResultData,
    guard: ConnGuard,
    cancelled: Arc<AtomicBool>,
}

impl CallResult {
    /// Output parameter fields and values.
    #[must_use]
    pub fn output(&self) -> (&[hdbc_proto::fields::ParameterField], &[HdbValue]) {
        (&self.data.output_fields, &self.data.output_values)
    }

    /// Table-valued outputs in server order.
    #[must_use]
    pub fn tables(&self) -> &[ResultSetData] {
        &self.data.tables
    }

    /// Consume into the raw call data, releasing the connection.
    #[must_use]
    pub fn into_data(self) -> CallResultData {
        self.data
    }

    /// Download a LOB output value into `out`.
    pub async fn read_lob(
        &mut self,
        token: &CancellationToken,
        descr: &LobOutDescr,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let session: &mut SessionInner = &mut self.guard;
        run_cancellable(token, &self.cancelled, crate::lob::read_lob_into(session, descr, out))
            .await
    }
}

/// Table output detached from the connection (legacy cache retrieval).
pub struct ResultSet {
    data: ResultSetData,
}

impl ResultSet {
    /// Buffered rows and metadata.
    #[must_use]
    pub fn data(&self) -> &ResultSetData {
        &self.data
    }
}
