//! Authentication methods and the two-round-trip exchange.
//!
//! The client advertises every registered method in the init request; the
//! server picks one and the engine drives that method through the remaining
//! steps:
//!
//! ```text
//! Authenticate(ClientContext, AuthInitRequest)  ->
//!                          <-  Authentication(method tag, init payload)
//! Connect(AuthFinalRequest, ClientId, ConnectOptions)  ->
//!                          <-  Authentication(final payload), ConnectOptions
//! ```
//!
//! Registration order is fixed by each method's priority byte and determines
//! the order of the init-request parameters.
//!
//! # Sub-parameter sizes
//!
//! Nested parameter blocks use a one-byte size up to 245 and otherwise a
//! `0xFF` prefix followed by a big-endian `u16`. Anything larger is an
//! encode error; the limit is 2^16 - 1.

mod jwt;
mod scram;
mod session_cookie;
mod x509;

pub use jwt::Jwt;
pub use scram::{ScramPbkdf2Sha256, ScramSha256};
pub use session_cookie::SessionCookie;
pub use x509::{Signer, X509};

use bytes::BytesMut;

use crate::{
    encoding::{var_bytes_size_auth, Decoder, Encoder},
    error::{ProtocolError, Result},
};

/// Method tag of SCRAM-SHA-256 (password).
pub const MT_SCRAMSHA256: &str = "SCRAMSHA256";
/// Method tag of SCRAM-PBKDF2-SHA-256 (password).
pub const MT_SCRAMPBKDF2SHA256: &str = "SCRAMPBKDF2SHA256";
/// Method tag of X509 (client certificate).
pub const MT_X509: &str = "X509";
/// Method tag of JWT (token).
pub const MT_JWT: &str = "JWT";
/// Method tag of session-cookie reconnect.
pub const MT_SESSION_COOKIE: &str = "SessionCookie";

/// Priority of the session-cookie method (highest).
pub const MO_SESSION_COOKIE: u8 = 0;
/// Priority of the X509 method.
pub const MO_X509: u8 = 1;
/// Priority of the JWT method.
pub const MO_JWT: u8 = 2;
/// Priority of the SCRAM-PBKDF2-SHA-256 method.
pub const MO_SCRAMPBKDF2SHA256: u8 = 3;
/// Priority of the SCRAM-SHA-256 method (lowest).
pub const MO_SCRAMSHA256: u8 = 4;

/// One step of an authentication method.
///
/// `prepare_*` build request parameters, `*_decode` consume the matching
/// reply payloads. The engine guarantees the call sequence
/// `prepare_init_req`, `init_rep_decode`, `prepare_final_req`,
/// `final_rep_decode`.
pub trait Method: Send + std::fmt::Debug {
    /// Method tag.
    fn typ(&self) -> &'static str;

    /// Priority byte; lower is tried first.
    fn order(&self) -> u8;

    /// Append this method's init-request parameters.
    fn prepare_init_req(&self, prms: &mut AuthPrms);

    /// Decode the method-specific init-reply payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidAuthPayload`] when the payload shape or the
    /// declared lengths do not match the protocol.
    fn init_rep_decode(&mut self, d: &mut AuthDecoder<'_, '_>) -> Result<()>;

    /// Build the final-request parameters.
    ///
    /// # Errors
    ///
    /// Fails when derived material (e.g. the client proof) has the wrong
    /// length.
    fn prepare_final_req(&mut self, prms: &mut AuthPrms) -> Result<()>;

    /// Decode the method-specific final-reply payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidAuthPayload`] on a malformed payload.
    fn final_rep_decode(&mut self, d: &mut AuthDecoder<'_, '_>) -> Result<()>;

    /// Session cookie for later reconnect, if the method obtained one.
    fn cookie(&self) -> Option<(&str, &[u8])> {
        None
    }
}

/// Checks the server echoed the expected method tag.
pub(crate) fn check_method_type(got: &str, expected: &str) -> Result<()> {
    if got != expected {
        return Err(ProtocolError::InvalidAuthPayload(format!(
            "invalid method {got} - expected {expected}"
        )));
    }
    Ok(())
}

const MAX_SUB_PRMS_1BYTE: usize = 245;
const SUB_PRMS_2BYTE_INDICATOR: u8 = 255;

fn sub_size_field(size: usize) -> usize {
    if size > MAX_SUB_PRMS_1BYTE {
        3
    } else {
        1
    }
}

fn encode_sub_size(enc: &mut Encoder<'_>, size: usize) {
    if size <= MAX_SUB_PRMS_1BYTE {
        enc.u8(size as u8);
    } else if size <= usize::from(u16::MAX) {
        enc.u8(SUB_PRMS_2BYTE_INDICATOR);
        enc.u16_be(size as u16);
    } else {
        enc.latch(ProtocolError::SubParameterSize { size, max: usize::from(u16::MAX) });
    }
}

/// An authentication parameter list.
///
/// The wire shape is a 16-bit parameter count followed by the parameters:
/// byte runs and CESU-8 strings are length-indicated (auth variant), nested
/// lists are preceded by their sub-parameter size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthPrms {
    prms: Vec<AuthPrm>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthPrm {
    /// Raw bytes (method tags, challenges, tokens)
    Bytes(Vec<u8>),
    /// CESU-8 encoded string (logon names)
    Cesu8(String),
    /// Nested parameter list
    Nested(AuthPrms),
}

impl AuthPrms {
    /// Empty parameter list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw byte parameter.
    pub fn add_bytes(&mut self, b: impl Into<Vec<u8>>) {
        self.prms.push(AuthPrm::Bytes(b.into()));
    }

    /// Append a string treated as raw bytes (method tags).
    pub fn add_string(&mut self, s: &str) {
        self.prms.push(AuthPrm::Bytes(s.as_bytes().to_vec()));
    }

    /// Append an empty parameter.
    pub fn add_empty(&mut self) {
        self.prms.push(AuthPrm::Bytes(Vec::new()));
    }

    /// Append a CESU-8 string parameter (logon names).
    pub fn add_cesu8_string(&mut self, s: &str) {
        self.prms.push(AuthPrm::Cesu8(s.to_string()));
    }

    /// Append and return a nested parameter list.
    pub fn add_nested(&mut self) -> &mut AuthPrms {
        self.prms.push(AuthPrm::Nested(AuthPrms::new()));
        match self.prms.last_mut() {
            Some(AuthPrm::Nested(nested)) => nested,
            _ => unreachable!("just pushed a nested list"),
        }
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        let mut size = 2; // parameter count
        for prm in &self.prms {
            size += match prm {
                AuthPrm::Bytes(b) => var_bytes_size_auth(b.len()),
                AuthPrm::Cesu8(s) => var_bytes_size_auth(crate::cesu8::str_size(s)),
                AuthPrm::Nested(nested) => {
                    let sub = nested.size();
                    sub + sub_size_field(sub)
                },
            };
        }
        size
    }

    /// Encode the parameter list.
    pub fn encode(&self, enc: &mut Encoder<'_>) {
        if self.prms.len() > i16::MAX as usize {
            enc.latch(ProtocolError::TooManyArguments(self.prms.len()));
            return;
        }
        enc.i16(self.prms.len() as i16);
        for prm in &self.prms {
            match prm {
                AuthPrm::Bytes(b) => enc.li_bytes_auth(b),
                AuthPrm::Cesu8(s) => enc.li_cesu8_str_auth(s),
                AuthPrm::Nested(nested) => {
                    encode_sub_size(enc, nested.size());
                    nested.encode(enc);
                },
            }
        }
    }

    /// Encode into a standalone byte vector.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        self.encode(&mut enc);
        // size() guards every overflow path
        debug_assert!(enc.finish().is_ok());
        buf.to_vec()
    }
}

/// Reader for authentication reply payloads.
pub struct AuthDecoder<'d, 'a> {
    dec: &'d mut Decoder<'a>,
}

impl<'d, 'a> AuthDecoder<'d, 'a> {
    /// Wrap a part decoder.
    pub fn new(dec: &'d mut Decoder<'a>) -> Self {
        Self { dec }
    }

    /// Check the 16-bit parameter count.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidAuthPayload`] if the count differs.
    pub fn num_prm(&mut self, expected: usize) -> Result<()> {
        let got = self.dec.i16();
        if got as usize != expected {
            return Err(ProtocolError::InvalidAuthPayload(format!(
                "invalid number of parameters {got} - expected {expected}"
            )));
        }
        Ok(())
    }

    /// Read a byte-run parameter as a string.
    pub fn string(&mut self) -> String {
        String::from_utf8_lossy(self.dec.li_bytes_auth()).into_owned()
    }

    /// Read a CESU-8 string parameter.
    pub fn cesu8_string(&mut self) -> String {
        self.dec.li_cesu8_str_auth()
    }

    /// Read a byte-run parameter.
    pub fn bytes(&mut self) -> Vec<u8> {
        self.dec.li_bytes_auth().to_vec()
    }

    /// Read a big-endian u32 parameter (e.g. the PBKDF2 round count).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidAuthPayload`] if the field size is not 4.
    pub fn big_u32(&mut self) -> Result<u32> {
        let size = self.dec.u8();
        if size != 4 {
            return Err(ProtocolError::InvalidAuthPayload(format!(
                "invalid auth uint32 size {size} - expected 4"
            )));
        }
        Ok(self.dec.u32_be())
    }

    /// Read a sub-parameter block size.
    pub fn sub_size(&mut self) -> usize {
        let b = self.dec.u8();
        match b {
            0..=245 => usize::from(b),
            SUB_PRMS_2BYTE_INDICATOR => usize::from(self.dec.u16_be()),
            _ => {
                self.dec.latch(ProtocolError::ReservedLengthIndicator(b));
                0
            },
        }
    }

    /// First latched decoder error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ProtocolError> {
        self.dec.error()
    }
}

/// The client-side authentication engine.
///
/// Holds all registered methods ordered by priority and tracks the one the
/// server selected in its init reply.
#[derive(Debug)]
pub struct Authenticator {
    logonname: String,
    methods: Vec<Box<dyn Method>>,
    selected: Option<usize>,
}

impl Authenticator {
    /// Create an engine for `logonname` with no methods registered.
    #[must_use]
    pub fn new(logonname: impl Into<String>) -> Self {
        Self { logonname: logonname.into(), methods: Vec::new(), selected: None }
    }

    /// The logon name sent in the init request.
    #[must_use]
    pub fn logonname(&self) -> &str {
        &self.logonname
    }

    /// Register a method, keeping the list sorted by priority.
    pub fn register(&mut self, method: Box<dyn Method>) {
        let pos = self
            .methods
            .iter()
            .position(|m| m.order() > method.order())
            .unwrap_or(self.methods.len());
        self.methods.insert(pos, method);
    }

    /// Register both password-based SCRAM variants.
    pub fn add_basic(&mut self, username: &str, password: &str) {
        self.register(Box::new(ScramPbkdf2Sha256::new(username, password)));
        self.register(Box::new(ScramSha256::new(username, password)));
    }

    /// Register JWT authentication.
    pub fn add_jwt(&mut self, token: &str) {
        self.register(Box::new(Jwt::new(token)));
    }

    /// Register X509 authentication.
    pub fn add_x509(&mut self, chain: Vec<Vec<u8>>, signer: Signer) {
        self.register(Box::new(X509::new(chain, signer)));
    }

    /// Register session-cookie reconnect authentication.
    pub fn add_session_cookie(&mut self, cookie: Vec<u8>, client_id: &str) {
        self.register(Box::new(SessionCookie::new(cookie, client_id)));
    }

    /// The method selected by the server, once the init reply is in.
    #[must_use]
    pub fn method(&self) -> Option<&dyn Method> {
        self.selected.map(|i| self.methods[i].as_ref())
    }

    /// Build the `AuthInitRequest` parameter list.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidAuthPayload`] when no method is registered.
    pub fn init_request(&self) -> Result<AuthPrms> {
        if self.methods.is_empty() {
            return Err(ProtocolError::InvalidAuthPayload(
                "no authentication method registered".into(),
            ));
        }
        let mut prms = AuthPrms::new();
        prms.add_cesu8_string(&self.logonname);
        for m in &self.methods {
            m.prepare_init_req(&mut prms);
        }
        Ok(prms)
    }

    /// Decode the `Authentication` init reply: select the server's method
    /// and hand it the method-specific payload.
    ///
    /// # Errors
    ///
    /// Unknown method tag or a malformed method payload.
    pub fn init_reply_decode(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        let mut d = AuthDecoder::new(dec);
        d.num_prm(2)?;
        let mt = d.string();
        let idx = self
            .methods
            .iter()
            .position(|m| m.typ() == mt)
            .ok_or_else(|| ProtocolError::InvalidAuthPayload(format!("invalid method type: {mt}")))?;
        self.selected = Some(idx);
        tracing::debug!(method = %mt, "server selected authentication method");
        self.methods[idx].init_rep_decode(&mut d)
    }

    /// Build the `AuthFinalRequest` parameter list.
    ///
    /// # Errors
    ///
    /// Called before the init reply selected a method, or the method fails
    /// to derive its proof material.
    pub fn final_request(&mut self) -> Result<AuthPrms> {
        let idx = self.selected.ok_or_else(|| {
            ProtocolError::InvalidAuthPayload("final request before method selection".into())
        })?;
        let mut prms = AuthPrms::new();
        self.methods[idx].prepare_final_req(&mut prms)?;
        Ok(prms)
    }

    /// Decode the `Authentication` final reply.
    ///
    /// # Errors
    ///
    /// Malformed method payload.
    pub fn final_reply_decode(&mut self, dec: &mut Decoder<'_>) -> Result<()> {
        let idx = self.selected.ok_or_else(|| {
            ProtocolError::InvalidAuthPayload("final reply before method selection".into())
        })?;
        let mut d = AuthDecoder::new(dec);
        self.methods[idx].final_rep_decode(&mut d)
    }

    /// Session cookie obtained by the selected method, if any.
    #[must_use]
    pub fn cookie(&self) -> Option<(&str, &[u8])> {
        self.method().and_then(Method::cookie)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn encode_size(n: usize) -> Vec<u8> {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        encode_sub_size(&mut enc, n);
        enc.finish().unwrap();
        buf.to_vec()
    }

    fn decode_size(b: &[u8]) -> usize {
        let mut dec = Decoder::new(b);
        let mut d = AuthDecoder::new(&mut dec);
        let n = d.sub_size();
        assert!(d.error().is_none());
        n
    }

    proptest! {
        #[test]
        fn sub_size_round_trip(n in 0usize..=65_535) {
            let encoded = encode_size(n);
            // one-byte form iff n <= 245
            prop_assert_eq!(encoded.len(), if n <= 245 { 1 } else { 3 });
            prop_assert_eq!(decode_size(&encoded), n);
        }
    }

    #[test]
    fn sub_size_rejects_past_u16() {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        encode_sub_size(&mut enc, 65_536);
        assert!(matches!(
            enc.finish(),
            Err(ProtocolError::SubParameterSize { size: 65_536, max: 65_535 })
        ));
    }

    #[test]
    fn registration_orders_by_priority() {
        let mut auth = Authenticator::new("user");
        auth.add_basic("user", "pw");
        auth.add_jwt("tok");
        let orders: Vec<u8> = auth.methods.iter().map(|m| m.order()).collect();
        assert_eq!(orders, vec![MO_JWT, MO_SCRAMPBKDF2SHA256, MO_SCRAMSHA256]);
    }

    #[test]
    fn init_request_without_methods_fails() {
        let auth = Authenticator::new("user");
        assert!(auth.init_request().is_err());
    }

    #[test]
    fn nested_prms_size_accounts_for_sub_size_field() {
        let mut prms = AuthPrms::new();
        prms.add_string("TAG");
        let nested = prms.add_nested();
        nested.add_bytes(vec![0u8; 300]);

        let bytes = prms.to_bytes();
        assert_eq!(bytes.len(), prms.size());
    }
}
