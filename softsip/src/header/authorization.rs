use core::fmt;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::message::Credential;
use crate::parser::Parser;

/// The `Authorization` SIP header.
///
/// Carries the credentials answering a `WWW-Authenticate` challenge.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Authorization(pub Credential);

impl Authorization {
    /// Creates a new `Authorization` header.
    pub fn new(credential: Credential) -> Self {
        Self(credential)
    }

    /// Returns the credential.
    pub fn credential(&self) -> &Credential {
        &self.0
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Authorization::NAME, self.0)
    }
}

impl HeaderParse for Authorization {
    const NAME: &'static str = "Authorization";

    /*
     * Authorization  =  "Authorization" HCOLON credentials
     * credentials    =  ("Digest" LWS digest-response) / other-response
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        Ok(Authorization(Credential::parse(parser)?))
    }
}

/// The `Proxy-Authorization` SIP header.
///
/// Carries the credentials answering a `Proxy-Authenticate` challenge.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ProxyAuthorization(pub Credential);

impl ProxyAuthorization {
    /// Creates a new `Proxy-Authorization` header.
    pub fn new(credential: Credential) -> Self {
        Self(credential)
    }

    /// Returns the credential.
    pub fn credential(&self) -> &Credential {
        &self.0
    }
}

impl fmt::Display for ProxyAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", ProxyAuthorization::NAME, self.0)
    }
}

impl HeaderParse for ProxyAuthorization {
    const NAME: &'static str = "Proxy-Authorization";

    /*
     * Proxy-Authorization  =  "Proxy-Authorization" HCOLON credentials
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        Ok(ProxyAuthorization(Credential::parse(parser)?))
    }
}
