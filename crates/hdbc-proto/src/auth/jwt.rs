//! JWT (token) authentication.

use super::{check_method_type, AuthDecoder, AuthPrms, Method, MO_JWT, MT_JWT};
use crate::error::Result;

/// JWT authentication: the init request carries the raw token, the init
/// reply maps it to a logon name, and the final reply hands back a session
/// cookie usable with the session-cookie method on reconnect.
pub struct Jwt {
    token: String,
    logonname: String,
    cookie: Vec<u8>,
}

impl Jwt {
    /// Create an instance for `token`.
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self { token: token.to_string(), logonname: String::new(), cookie: Vec::new() }
    }

    /// Logon name assigned by the server in the init reply.
    #[must_use]
    pub fn logonname(&self) -> &str {
        &self.logonname
    }
}

impl std::fmt::Debug for Jwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never log the token
        f.debug_struct("Jwt").field("logonname", &self.logonname).finish_non_exhaustive()
    }
}

impl Method for Jwt {
    fn typ(&self) -> &'static str {
        MT_JWT
    }

    fn order(&self) -> u8 {
        MO_JWT
    }

    fn prepare_init_req(&self, prms: &mut AuthPrms) {
        prms.add_string(self.typ());
        prms.add_string(&self.token);
    }

    fn init_rep_decode(&mut self, d: &mut AuthDecoder<'_, '_>) -> Result<()> {
        self.logonname = d.string();
        tracing::debug!(logonname = %self.logonname, "jwt logon name assigned");
        Ok(())
    }

    fn prepare_final_req(&mut self, prms: &mut AuthPrms) -> Result<()> {
        prms.add_cesu8_string(&self.logonname);
        prms.add_string(self.typ());
        prms.add_empty();
        Ok(())
    }

    fn final_rep_decode(&mut self, d: &mut AuthDecoder<'_, '_>) -> Result<()> {
        d.num_prm(2)?;
        let mt = d.string();
        check_method_type(&mt, self.typ())?;
        self.cookie = d.bytes();
        Ok(())
    }

    fn cookie(&self) -> Option<(&str, &[u8])> {
        if self.cookie.is_empty() {
            None
        } else {
            Some((&self.logonname, &self.cookie))
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::{
        auth::Authenticator,
        encoding::{Decoder, Encoder},
    };

    fn encode_prms(prms: &AuthPrms) -> Vec<u8> {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf);
        prms.encode(&mut enc);
        enc.finish().unwrap();
        buf.to_vec()
    }

    #[test]
    fn dummy_token_exchange() {
        let mut auth = Authenticator::new("");
        auth.add_jwt("dummy token");

        // step 0: init request
        let init = auth.init_request().unwrap();
        assert_eq!(encode_prms(&init), b"\x03\x00\x00\x03JWT\x0Bdummy token");

        // step 1: init reply assigns the logon name
        let mut dec = Decoder::new(b"\x02\x00\x03JWT\x07USER123");
        auth.init_reply_decode(&mut dec).unwrap();
        dec.finish().unwrap();
        assert_eq!(auth.method().unwrap().typ(), MT_JWT);

        // step 2: final request
        let fin = auth.final_request().unwrap();
        assert_eq!(encode_prms(&fin), b"\x03\x00\x07USER123\x03JWT\x00");

        // step 3: final reply carries the session cookie
        let mut dec = Decoder::new(b"\x02\x00\x03JWT\x205be8f43e064e0589ce07ba9de6fce107");
        auth.final_reply_decode(&mut dec).unwrap();
        dec.finish().unwrap();

        let (logonname, cookie) = auth.cookie().unwrap();
        assert_eq!(logonname, "USER123");
        assert_eq!(cookie, b"5be8f43e064e0589ce07ba9de6fce107");
    }
}
