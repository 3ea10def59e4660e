//! X509 (client certificate) authentication.

use super::{check_method_type, AuthDecoder, AuthPrms, Method, MO_X509, MT_X509};
use crate::error::{ProtocolError, Result};

/// Signs the server challenge with the client certificate's private key.
///
/// Key handling stays with the caller (typically the same material that is
/// loaded into the TLS configuration); the method only transports the
/// resulting signature.
pub type Signer = Box<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send>;

/// Client-certificate authentication: the final request proves key
/// possession by signing the server challenge from the init reply and
/// sending it together with the DER certificate chain.
pub struct X509 {
    chain: Vec<Vec<u8>>,
    signer: Signer,
    server_challenge: Vec<u8>,
    logonname: String,
}

impl X509 {
    /// Create an instance for a DER certificate `chain` and its `signer`.
    #[must_use]
    pub fn new(chain: Vec<Vec<u8>>, signer: Signer) -> Self {
        Self { chain, signer, server_challenge: Vec::new(), logonname: String::new() }
    }

    /// Logon name assigned by the server in the final reply.
    #[must_use]
    pub fn logonname(&self) -> &str {
        &self.logonname
    }
}

impl std::fmt::Debug for X509 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X509").field("chain_len", &self.chain.len()).finish_non_exhaustive()
    }
}

impl Method for X509 {
    fn typ(&self) -> &'static str {
        MT_X509
    }

    fn order(&self) -> u8 {
        MO_X509
    }

    fn prepare_init_req(&self, prms: &mut AuthPrms) {
        prms.add_string(self.typ());
        prms.add_empty();
    }

    fn init_rep_decode(&mut self, d: &mut AuthDecoder<'_, '_>) -> Result<()> {
        self.server_challenge = d.bytes();
        if self.server_challenge.is_empty() {
            return Err(ProtocolError::InvalidAuthPayload("empty x509 server challenge".into()));
        }
        Ok(())
    }

    fn prepare_final_req(&mut self, prms: &mut AuthPrms) -> Result<()> {
        let signature = (self.signer)(&self.server_challenge)?;

        // empty logon name: the server derives the user from the certificate
        prms.add_cesu8_string("");
        prms.add_string(self.typ());
        let sub = prms.add_nested();
        for cert in &self.chain {
            sub.add_bytes(cert.clone());
        }
        sub.add_bytes(signature);
        Ok(())
    }

    fn final_rep_decode(&mut self, d: &mut AuthDecoder<'_, '_>) -> Result<()> {
        d.num_prm(2)?;
        let mt = d.string();
        check_method_type(&mt, self.typ())?;
        self.logonname = d.cesu8_string();
        Ok(())
    }
}
