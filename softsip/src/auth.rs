//! Digest authentication.
//!
//! Computes the MD5 digest response for `401`/`407` challenges and keeps the
//! per-account nonce bookkeeping (nc counter, cached realm/nonce/qop).

use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;
use util::ArcStr;

use crate::error::{Error, Result};
use crate::message::{Credential, DigestChallenge, DigestCredential, SipMethod};

/// The account secrets digest responses are computed from.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// The authentication username.
    pub username: String,
    /// The authentication password.
    pub password: String,
    /// The expected realm, when known ahead of the first challenge.
    pub realm: Option<String>,
}

impl Credentials {
    /// Creates a new credential set.
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            realm: None,
        }
    }

    /// Sets the expected realm.
    pub fn with_realm(mut self, realm: &str) -> Self {
        self.realm = Some(realm.to_string());
        self
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
struct NonceKey {
    realm: ArcStr,
    nonce: ArcStr,
}

/// Computes digest responses and tracks nonce usage per `(realm, nonce)`.
///
/// One authenticator lives per account; the nc counter increments across
/// requests that reuse a nonce, as required for `qop=auth`.
#[derive(Default)]
pub struct DigestAuthenticator {
    nonce_counts: Mutex<HashMap<NonceKey, u32>>,
}

impl DigestAuthenticator {
    /// Creates a new authenticator with an empty nonce cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers a digest challenge for the given request.
    ///
    /// Computes, per RFC2617:
    ///
    /// ```text
    /// HA1      = MD5(user:realm:password)
    /// HA2      = MD5(method:uri)
    /// response = MD5(HA1:nonce:nc:cnonce:qop:HA2)   when qop=auth
    /// response = MD5(HA1:nonce:HA2)                 otherwise
    /// ```
    pub fn respond(
        &self,
        credentials: &Credentials,
        challenge: &DigestChallenge,
        method: SipMethod,
        uri: &str,
    ) -> Result<Credential> {
        let realm = challenge
            .realm
            .as_deref()
            .or(credentials.realm.as_deref())
            .ok_or(Error::InvalidChallenge)?;
        let nonce = challenge.nonce.as_deref().ok_or(Error::InvalidChallenge)?;

        let ha1 = md5_hex(&format!("{}:{}:{}", credentials.username, realm, credentials.password));
        let ha2 = md5_hex(&format!("{}:{}", method, uri));

        let qop_auth = challenge
            .qop
            .as_deref()
            .is_some_and(|qop| qop.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")));

        let mut digest = DigestCredential {
            username: Some(credentials.username.as_str().into()),
            realm: Some(realm.into()),
            nonce: Some(nonce.into()),
            uri: Some(uri.into()),
            algorithm: Some("MD5".into()),
            opaque: challenge.opaque.clone(),
            ..Default::default()
        };

        let response = if qop_auth {
            let nc = self.next_nonce_count(realm, nonce);
            let nc = format!("{:08x}", nc);
            let cnonce = make_cnonce();

            let response = md5_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}"));

            digest.qop = Some("auth".into());
            digest.nc = Some(nc.as_str().into());
            digest.cnonce = Some(cnonce.as_str().into());
            response
        } else {
            md5_hex(&format!("{ha1}:{nonce}:{ha2}"))
        };

        digest.response = Some(response.as_str().into());

        Ok(Credential::Digest(digest))
    }

    /// Drops the nonce counters of a realm.
    ///
    /// Called when the server flags the nonce as stale; the replacement nonce
    /// starts counting from one again.
    pub fn forget_realm(&self, realm: &str) {
        let mut counts = self.nonce_counts.lock().expect("Lock failed");
        counts.retain(|key, _| key.realm.as_ref() != realm);
    }

    fn next_nonce_count(&self, realm: &str, nonce: &str) -> u32 {
        let mut counts = self.nonce_counts.lock().expect("Lock failed");
        let count = counts
            .entry(NonceKey {
                realm: realm.into(),
                nonce: nonce.into(),
            })
            .or_insert(0);
        *count += 1;
        *count
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

fn make_cnonce() -> String {
    let mut rng = rand::rng();
    let value: u64 = rng.random();
    format!("{value:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(qop: Option<&str>) -> DigestChallenge {
        DigestChallenge {
            realm: Some("ex.test".into()),
            nonce: Some("abc".into()),
            qop: qop.map(|q| q.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_response_without_qop() {
        let auth = DigestAuthenticator::new();
        let credentials = Credentials::new("alice", "secret");

        let credential = auth
            .respond(&credentials, &challenge(None), SipMethod::Register, "sip:ex.test")
            .unwrap();
        let digest = credential.digest().unwrap();

        let ha1 = md5_hex("alice:ex.test:secret");
        let ha2 = md5_hex("REGISTER:sip:ex.test");
        let expected = md5_hex(&format!("{ha1}:abc:{ha2}"));

        assert_eq!(digest.response.as_deref(), Some(expected.as_str()));
        assert_eq!(digest.nc, None);
        assert_eq!(digest.qop, None);
    }

    #[test]
    fn test_response_with_qop_auth() {
        let auth = DigestAuthenticator::new();
        let credentials = Credentials::new("alice", "secret");

        let credential = auth
            .respond(&credentials, &challenge(Some("auth")), SipMethod::Register, "sip:ex.test")
            .unwrap();
        let digest = credential.digest().unwrap();

        assert_eq!(digest.nc.as_deref(), Some("00000001"));
        assert_eq!(digest.qop.as_deref(), Some("auth"));
        let cnonce = digest.cnonce.as_deref().unwrap().to_string();

        let ha1 = md5_hex("alice:ex.test:secret");
        let ha2 = md5_hex("REGISTER:sip:ex.test");
        let expected = md5_hex(&format!("{ha1}:abc:00000001:{cnonce}:auth:{ha2}"));
        assert_eq!(digest.response.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn test_nonce_count_increments() {
        let auth = DigestAuthenticator::new();
        let credentials = Credentials::new("alice", "secret");
        let challenge = challenge(Some("auth"));

        for expected in ["00000001", "00000002", "00000003"] {
            let credential = auth
                .respond(&credentials, &challenge, SipMethod::Register, "sip:ex.test")
                .unwrap();
            assert_eq!(credential.digest().unwrap().nc.as_deref(), Some(expected));
        }
    }

    #[test]
    fn test_forget_realm_resets_counter() {
        let auth = DigestAuthenticator::new();
        let credentials = Credentials::new("alice", "secret");
        let challenge = challenge(Some("auth"));

        auth.respond(&credentials, &challenge, SipMethod::Register, "sip:ex.test")
            .unwrap();
        auth.forget_realm("ex.test");

        let credential = auth
            .respond(&credentials, &challenge, SipMethod::Register, "sip:ex.test")
            .unwrap();
        assert_eq!(credential.digest().unwrap().nc.as_deref(), Some("00000001"));
    }
}
