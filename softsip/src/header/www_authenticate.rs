use core::fmt;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::message::Challenge;
use crate::parser::Parser;

/// The `WWW-Authenticate` SIP header.
///
/// Carries the digest challenge of a `401 Unauthorized` response.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WwwAuthenticate(pub Challenge);

impl WwwAuthenticate {
    /// Creates a new `WWW-Authenticate` header.
    pub fn new(challenge: Challenge) -> Self {
        Self(challenge)
    }

    /// Returns the challenge.
    pub fn challenge(&self) -> &Challenge {
        &self.0
    }
}

impl fmt::Display for WwwAuthenticate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", WwwAuthenticate::NAME, self.0)
    }
}

impl HeaderParse for WwwAuthenticate {
    const NAME: &'static str = "WWW-Authenticate";

    /*
     * WWW-Authenticate  =  "WWW-Authenticate" HCOLON challenge
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        Ok(WwwAuthenticate(Challenge::parse(parser)?))
    }
}

/// The `Proxy-Authenticate` SIP header.
///
/// Carries the digest challenge of a `407 Proxy Authentication Required`
/// response.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ProxyAuthenticate(pub Challenge);

impl ProxyAuthenticate {
    /// Creates a new `Proxy-Authenticate` header.
    pub fn new(challenge: Challenge) -> Self {
        Self(challenge)
    }

    /// Returns the challenge.
    pub fn challenge(&self) -> &Challenge {
        &self.0
    }
}

impl fmt::Display for ProxyAuthenticate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", ProxyAuthenticate::NAME, self.0)
    }
}

impl HeaderParse for ProxyAuthenticate {
    const NAME: &'static str = "Proxy-Authenticate";

    /*
     * Proxy-Authenticate  =  "Proxy-Authenticate" HCOLON challenge
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        Ok(ProxyAuthenticate(Challenge::parse(parser)?))
    }
}
