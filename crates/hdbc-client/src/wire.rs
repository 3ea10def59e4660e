//! The raw byte pipe under a session.
//!
//! [`Wire`] wraps the dialed stream (TCP by default, optionally upgraded to
//! TLS) and enforces the connection-level failure rules: every read and
//! write honours the configured deadline, and the first transport failure
//! (or a caller cancellation) latches the connection as bad so all
//! subsequent operations fail fast with [`DriverError::BadConnection`].
//! Cancellation is observed from another task, so the latch is an atomic
//! shared with the owning connection.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

use crate::{
    attrs::TlsAttrs,
    error::{DriverError, Result},
};

/// Byte stream a session can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// Options handed to a dialer.
#[derive(Debug, Clone, Copy)]
pub struct DialerOptions {
    /// Connect timeout; zero means no deadline
    pub timeout: Duration,
    /// Requested TCP keep-alive interval (advisory for custom dialers)
    pub tcp_keep_alive: Duration,
}

/// Establishes the transport under a connection.
///
/// The default [`TcpDialer`] opens a plain TCP stream; tests and embedders
/// may substitute in-memory or tunnelled transports.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial `host` (a `"host:port"` address).
    async fn dial(&self, host: &str, options: DialerOptions) -> io::Result<Box<dyn Transport>>;
}

/// The default TCP dialer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, host: &str, options: DialerOptions) -> io::Result<Box<dyn Transport>> {
        let connect = TcpStream::connect(host);
        let stream = if options.timeout.is_zero() {
            connect.await?
        } else {
            tokio::time::timeout(options.timeout, connect)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))??
        };
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Byte pipe with deadlines and a bad-connection latch.
pub(crate) struct Wire {
    stream: Box<dyn Transport>,
    timeout: Duration,
    cancelled: Arc<AtomicBool>,
    broken: bool,
}

impl Wire {
    /// Dial `host` through `dialer`, optionally upgrading to TLS.
    pub(crate) async fn connect(
        dialer: &dyn Dialer,
        host: &str,
        timeout: Duration,
        tcp_keep_alive: Duration,
        tls: Option<&TlsAttrs>,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Self> {
        let stream = dialer.dial(host, DialerOptions { timeout, tcp_keep_alive }).await?;

        let stream: Box<dyn Transport> = match tls {
            None => stream,
            Some(tls_attrs) => {
                let config = client_config(tls_attrs)?;
                let server_name = if tls_attrs.server_name.is_empty() {
                    host.split(':').next().unwrap_or(host)
                } else {
                    &tls_attrs.server_name
                };
                let name = ServerName::try_from(server_name.to_string()).map_err(|err| {
                    DriverError::Io(io::Error::new(io::ErrorKind::InvalidInput, err))
                })?;
                let connector = TlsConnector::from(Arc::new(config));
                Box::new(connector.connect(name, stream).await?)
            },
        };

        Ok(Self { stream, timeout, cancelled, broken: false })
    }

    /// True once a transport error or cancellation latched the connection.
    pub(crate) fn is_bad(&self) -> bool {
        self.broken || self.cancelled.load(Ordering::SeqCst)
    }

    fn check_usable(&self) -> Result<()> {
        if self.is_bad() {
            return Err(DriverError::BadConnection);
        }
        Ok(())
    }

    async fn with_deadline<T>(
        timeout: Duration,
        fut: impl std::future::Future<Output = io::Result<T>>,
    ) -> Result<T> {
        if timeout.is_zero() {
            Ok(fut.await?)
        } else {
            match tokio::time::timeout(timeout, fut).await {
                Ok(res) => Ok(res?),
                Err(_) => Err(DriverError::Timeout),
            }
        }
    }

    /// Read exactly `buf.len()` bytes.
    pub(crate) async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.check_usable()?;
        let timeout = self.timeout;
        let stream = &mut self.stream;
        let res =
            Self::with_deadline(timeout, async { stream.read_exact(buf).await.map(|_| ()) }).await;
        if res.is_err() {
            self.broken = true;
        }
        res
    }

    /// Write the whole buffer and flush.
    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.check_usable()?;
        let timeout = self.timeout;
        let stream = &mut self.stream;
        let res = Self::with_deadline(timeout, async {
            stream.write_all(buf).await?;
            stream.flush().await
        })
        .await;
        if res.is_err() {
            self.broken = true;
        }
        res
    }
}

fn client_config(tls: &TlsAttrs) -> Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    for file in &tls.root_ca_files {
        let pem = std::fs::read(file)?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert?;
            roots.add(cert).map_err(|err| {
                DriverError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("failed to parse root certificate - filename: {file}: {err}"),
                ))
            })?;
        }
    }

    let config =
        rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();

    if tls.insecure_skip_verify {
        let mut config = config;
        config.dangerous().set_certificate_verifier(Arc::new(danger::NoVerification::new()));
        Ok(config)
    } else {
        Ok(config)
    }
}

mod danger {
    //! Certificate verifier for `TLSInsecureSkipVerify`.

    use rustls::{
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider},
        pki_types::{CertificateDer, ServerName, UnixTime},
        DigitallySignedStruct, SignatureScheme,
    };

    /// Accepts any server certificate; handshake signatures are still
    /// checked against the provider's supported algorithms.
    #[derive(Debug)]
    pub(super) struct NoVerification {
        provider: std::sync::Arc<CryptoProvider>,
    }

    impl NoVerification {
        pub(super) fn new() -> Self {
            let provider = CryptoProvider::get_default().cloned().unwrap_or_else(|| {
                std::sync::Arc::new(rustls::crypto::aws_lc_rs::default_provider())
            });
            Self { provider }
        }
    }

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.provider.signature_verification_algorithms.supported_schemes()
        }
    }
}
