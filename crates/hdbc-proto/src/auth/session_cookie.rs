//! Session-cookie reconnect authentication.

use super::{check_method_type, AuthDecoder, AuthPrms, Method, MO_SESSION_COOKIE, MT_SESSION_COOKIE};
use crate::error::Result;

/// Reconnect with a cookie obtained from an earlier token-based session.
///
/// The cookie is bound to the client id it was issued for, so both travel
/// together in the init request.
pub struct SessionCookie {
    cookie: Vec<u8>,
    client_id: String,
    logonname: String,
}

impl SessionCookie {
    /// Create an instance for `cookie` issued to `client_id`.
    #[must_use]
    pub fn new(cookie: Vec<u8>, client_id: &str) -> Self {
        Self { cookie, client_id: client_id.to_string(), logonname: String::new() }
    }
}

impl std::fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCookie").field("client_id", &self.client_id).finish_non_exhaustive()
    }
}

impl Method for SessionCookie {
    fn typ(&self) -> &'static str {
        MT_SESSION_COOKIE
    }

    fn order(&self) -> u8 {
        MO_SESSION_COOKIE
    }

    fn prepare_init_req(&self, prms: &mut AuthPrms) {
        prms.add_string(self.typ());
        let mut payload = self.cookie.clone();
        payload.extend_from_slice(self.client_id.as_bytes());
        prms.add_bytes(payload);
    }

    fn init_rep_decode(&mut self, d: &mut AuthDecoder<'_, '_>) -> Result<()> {
        self.logonname = d.string();
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
        d.bytes(); // reserved payload
        Ok(())
    }
}
