//! Connection attributes.
//!
//! Read-mostly configuration shared between the connector and open
//! connections. Mutation after construction is rare (post-construction
//! tuning), so the attributes sit behind a reader/writer lock. Out-of-range
//! values saturate at their bounds instead of being rejected.

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

/// Default frame buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 16_276;
/// Default number of rows buffered by a bulk statement.
pub const DEFAULT_BULK_SIZE: usize = 10_000;
/// Default connection timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Default TCP keep-alive interval.
pub const DEFAULT_TCP_KEEP_ALIVE: Duration = Duration::from_secs(15);
/// Default number of rows per fetch.
pub const DEFAULT_FETCH_SIZE: usize = 128;
/// Default LOB transfer chunk size in bytes.
pub const DEFAULT_LOB_CHUNK_SIZE: usize = 8_192;
/// Default data format version.
pub const DEFAULT_DFV: u8 = 8;

const MIN_BULK_SIZE: usize = 1;
const MAX_BULK_SIZE: usize = hdbc_proto::framing::MAX_NUM_ARG;
const MIN_FETCH_SIZE: usize = 1;
const MIN_LOB_CHUNK_SIZE: usize = 128;
const MAX_LOB_CHUNK_SIZE: usize = 1 << 14;

const SUPPORTED_DFVS: [u8; 4] = [1, 4, 6, 8];

/// TLS settings derived from the DSN or set directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsAttrs {
    /// Server name for certificate verification
    pub server_name: String,
    /// Skip certificate chain and host name verification
    pub insecure_skip_verify: bool,
    /// PEM files with additional root certificates
    pub root_ca_files: Vec<String>,
}

#[derive(Debug, Clone)]
struct Inner {
    host: String,
    timeout: Duration,
    ping_interval: Duration,
    buffer_size: usize,
    bulk_size: usize,
    tcp_keep_alive: Duration,
    tls: Option<TlsAttrs>,
    default_schema: String,
    application_name: String,
    session_variables: Vec<(String, String)>,
    locale: String,
    fetch_size: usize,
    lob_chunk_size: usize,
    dfv: u8,
    legacy: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            host: String::new(),
            timeout: DEFAULT_TIMEOUT,
            ping_interval: Duration::ZERO,
            buffer_size: DEFAULT_BUFFER_SIZE,
            bulk_size: DEFAULT_BULK_SIZE,
            tcp_keep_alive: DEFAULT_TCP_KEEP_ALIVE,
            tls: None,
            default_schema: String::new(),
            application_name: default_application_name(),
            session_variables: Vec::new(),
            locale: String::new(),
            fetch_size: DEFAULT_FETCH_SIZE,
            lob_chunk_size: DEFAULT_LOB_CHUNK_SIZE,
            dfv: DEFAULT_DFV,
            legacy: false,
        }
    }
}

fn default_application_name() -> String {
    std::env::args().next().unwrap_or_else(|| "hdbc".to_string())
}

/// Shared connection attributes.
#[derive(Debug, Clone, Default)]
pub struct ConnAttrs {
    inner: Arc<RwLock<Inner>>,
}

macro_rules! getter {
    ($name:ident, $ty:ty) => {
        /// Current value of the attribute.
        #[must_use]
        pub fn $name(&self) -> $ty {
            self.read().$name.clone()
        }
    };
}

impl ConnAttrs {
    /// Attributes with all defaults for `host` (`"host:port"`).
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        let attrs = Self::default();
        attrs.write().host = host.into();
        attrs
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    getter!(host, String);
    getter!(timeout, Duration);
    getter!(ping_interval, Duration);
    getter!(buffer_size, usize);
    getter!(bulk_size, usize);
    getter!(tcp_keep_alive, Duration);
    getter!(tls, Option<TlsAttrs>);
    getter!(default_schema, String);
    getter!(application_name, String);
    getter!(session_variables, Vec<(String, String)>);
    getter!(locale, String);
    getter!(fetch_size, usize);
    getter!(lob_chunk_size, usize);
    getter!(dfv, u8);
    getter!(legacy, bool);

    /// Set the host address (`"host:port"`).
    pub fn set_host(&self, host: impl Into<String>) {
        self.write().host = host.into();
    }

    /// Set the connection timeout; zero disables deadlines.
    pub fn set_timeout(&self, timeout: Duration) {
        self.write().timeout = timeout;
    }

    /// Set the ping interval; zero disables the pinger.
    pub fn set_ping_interval(&self, interval: Duration) {
        self.write().ping_interval = interval;
    }

    /// Set the frame buffer size.
    pub fn set_buffer_size(&self, size: usize) {
        self.write().buffer_size = size;
    }

    /// Set the bulk row count, saturating at the part argument limit.
    pub fn set_bulk_size(&self, size: usize) {
        self.write().bulk_size = size.clamp(MIN_BULK_SIZE, MAX_BULK_SIZE);
    }

    /// Set the TCP keep-alive interval.
    pub fn set_tcp_keep_alive(&self, interval: Duration) {
        self.write().tcp_keep_alive = interval;
    }

    /// Set the TLS attributes.
    pub fn set_tls(&self, tls: Option<TlsAttrs>) {
        self.write().tls = tls;
    }

    /// Set the schema activated right after connect.
    pub fn set_default_schema(&self, schema: impl Into<String>) {
        self.write().default_schema = schema.into();
    }

    /// Set the application name reported to the server.
    pub fn set_application_name(&self, name: impl Into<String>) {
        self.write().application_name = name.into();
    }

    /// Set the session variables sent at connect.
    pub fn set_session_variables(&self, vars: Vec<(String, String)>) {
        self.write().session_variables = vars;
    }

    /// Set the client locale.
    pub fn set_locale(&self, locale: impl Into<String>) {
        self.write().locale = locale.into();
    }

    /// Set the fetch size, saturating at the minimum.
    pub fn set_fetch_size(&self, size: usize) {
        self.write().fetch_size = size.max(MIN_FETCH_SIZE);
    }

    /// Set the LOB chunk size, saturating at its bounds.
    pub fn set_lob_chunk_size(&self, size: usize) {
        self.write().lob_chunk_size = size.clamp(MIN_LOB_CHUNK_SIZE, MAX_LOB_CHUNK_SIZE);
    }

    /// Set the data format version; unsupported levels fall back to the
    /// default.
    pub fn set_dfv(&self, dfv: u8) {
        self.write().dfv = if SUPPORTED_DFVS.contains(&dfv) { dfv } else { DEFAULT_DFV };
    }

    /// Enable legacy mode (table outputs retrievable by result-set id).
    pub fn set_legacy(&self, legacy: bool) {
        self.write().legacy = legacy;
    }
}
