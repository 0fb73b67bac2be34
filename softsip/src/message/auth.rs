//! SIP Auth types
//!
use std::fmt;

use util::ArcStr;

use crate::error::Result;
use crate::message::Parameters;
use crate::parser::Parser;

/// A Digest Challenge.
///
/// All values are stored unquoted; quoting is applied when the challenge is
/// written back out.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct DigestChallenge {
    /// The realm of the digest authentication.
    pub realm: Option<ArcStr>,

    /// The domain of the digest authentication.
    pub domain: Option<ArcStr>,

    /// The nonce of the digest authentication.
    pub nonce: Option<ArcStr>,

    /// The opaque value of the digest authentication.
    pub opaque: Option<ArcStr>,

    /// Indicates whether the previous request used a stale nonce.
    pub stale: bool,

    /// The algorithm used in the digest authentication.
    pub algorithm: Option<ArcStr>,

    /// The quality of protection (qop) value.
    pub qop: Option<ArcStr>,
}

/// This enum represents an authentication challenge mechanism
/// used in `Proxy-Authenticate` and `WWW-Authenticate` headers.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Challenge {
    /// A `Digest` authentication scheme.
    Digest(DigestChallenge),
    /// Any other authentication scheme not specifically handled.
    Other {
        /// The name of the authentication scheme.
        scheme: ArcStr,

        /// The parameters associated with the scheme.
        param: Parameters,
    },
}

impl Challenge {
    /// Returns the digest challenge, if this is a digest scheme.
    pub fn digest(&self) -> Option<&DigestChallenge> {
        match self {
            Challenge::Digest(digest) => Some(digest),
            Challenge::Other { .. } => None,
        }
    }

    /*
     * challenge        =  ("Digest" LWS digest-cln *(COMMA digest-cln))
     *                     / other-challenge
     * digest-cln       =  realm / domain / nonce
     *                     / opaque / stale / algorithm
     *                     / qop-options / auth-param
     */
    pub(crate) fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let scheme = parser.parse_token()?.to_string();
        parser.take_ws();

        if !scheme.eq_ignore_ascii_case("Digest") {
            let mut param = Parameters::new();
            for (name, value) in parser.parse_auth_params()? {
                param.push((name.as_str(), value.as_deref()).into());
            }
            return Ok(Challenge::Other {
                scheme: scheme.as_str().into(),
                param,
            });
        }

        let mut digest = DigestChallenge::default();
        for (name, value) in parser.parse_auth_params()? {
            let value = value.unwrap_or_default();
            match name.to_ascii_lowercase().as_str() {
                "realm" => digest.realm = Some(value.as_str().into()),
                "domain" => digest.domain = Some(value.as_str().into()),
                "nonce" => digest.nonce = Some(value.as_str().into()),
                "opaque" => digest.opaque = Some(value.as_str().into()),
                "stale" => digest.stale = value.eq_ignore_ascii_case("true"),
                "algorithm" => digest.algorithm = Some(value.as_str().into()),
                "qop" => digest.qop = Some(value.as_str().into()),
                _ => (),
            }
        }

        Ok(Challenge::Digest(digest))
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Challenge::Digest(DigestChallenge {
                realm,
                domain,
                nonce,
                opaque,
                stale,
                algorithm,
                qop,
            }) => {
                write!(f, "Digest ")?;
                let mut sep = "";
                if let Some(realm) = realm {
                    write!(f, "realm=\"{realm}\"")?;
                    sep = ", ";
                }
                if let Some(domain) = domain {
                    write!(f, "{sep}domain=\"{domain}\"")?;
                    sep = ", ";
                }
                if let Some(nonce) = nonce {
                    write!(f, "{sep}nonce=\"{nonce}\"")?;
                    sep = ", ";
                }
                if let Some(opaque) = opaque {
                    write!(f, "{sep}opaque=\"{opaque}\"")?;
                    sep = ", ";
                }
                if *stale {
                    write!(f, "{sep}stale=true")?;
                    sep = ", ";
                }
                if let Some(algorithm) = algorithm {
                    write!(f, "{sep}algorithm={algorithm}")?;
                    sep = ", ";
                }
                if let Some(qop) = qop {
                    write!(f, "{sep}qop=\"{qop}\"")?;
                }

                Ok(())
            }
            Challenge::Other { scheme, param } => {
                write!(f, "{scheme}")?;
                let mut sep = " ";
                for p in param.iter() {
                    write!(f, "{sep}{}", p.name())?;
                    if let Some(value) = p.value() {
                        write!(f, "={value}")?;
                    }
                    sep = ", ";
                }
                Ok(())
            }
        }
    }
}

/// Represents credentials for a `Digest` authentication scheme,
/// typically found in the `Authorization` and `Proxy-Authorization` headers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DigestCredential {
    /// The realm value that defines the protection space.
    pub realm: Option<ArcStr>,

    /// The username associated with the credential.
    pub username: Option<ArcStr>,

    /// The nonce value provided by the server.
    pub nonce: Option<ArcStr>,

    /// The URI of the requested resource.
    pub uri: Option<ArcStr>,

    /// The response hash calculated from the credential data.
    pub response: Option<ArcStr>,

    /// The algorithm used to hash the credentials (e.g., "MD5").
    pub algorithm: Option<ArcStr>,

    /// The client nonce value (cnonce) used to prevent replay attacks.
    pub cnonce: Option<ArcStr>,

    /// The opaque value provided by the server, to be returned unchanged.
    pub opaque: Option<ArcStr>,

    /// The quality of protection (qop) applied to the message.
    pub qop: Option<ArcStr>,

    /// The nonce count (nc), indicating the number of requests made with the
    /// same nonce.
    pub nc: Option<ArcStr>,
}

/// This type represent a credential containing the
/// authentication information in `Authorization` and
/// `Proxy-Authorization` headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// A `digest` authentication scheme.
    Digest(DigestCredential),
    /// Other scheme not specified.
    Other {
        /// The name of the authentication scheme.
        scheme: ArcStr,

        /// The parameters associated with the scheme.
        param: Parameters,
    },
}

impl Credential {
    /// Returns the digest credential, if this is a digest scheme.
    pub fn digest(&self) -> Option<&DigestCredential> {
        match self {
            Credential::Digest(digest) => Some(digest),
            Credential::Other { .. } => None,
        }
    }

    pub(crate) fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let scheme = parser.parse_token()?.to_string();
        parser.take_ws();

        if !scheme.eq_ignore_ascii_case("Digest") {
            let mut param = Parameters::new();
            for (name, value) in parser.parse_auth_params()? {
                param.push((name.as_str(), value.as_deref()).into());
            }
            return Ok(Credential::Other {
                scheme: scheme.as_str().into(),
                param,
            });
        }

        let mut digest = DigestCredential::default();
        for (name, value) in parser.parse_auth_params()? {
            let value = value.unwrap_or_default();
            match name.to_ascii_lowercase().as_str() {
                "realm" => digest.realm = Some(value.as_str().into()),
                "username" => digest.username = Some(value.as_str().into()),
                "nonce" => digest.nonce = Some(value.as_str().into()),
                "uri" => digest.uri = Some(value.as_str().into()),
                "response" => digest.response = Some(value.as_str().into()),
                "algorithm" => digest.algorithm = Some(value.as_str().into()),
                "cnonce" => digest.cnonce = Some(value.as_str().into()),
                "opaque" => digest.opaque = Some(value.as_str().into()),
                "qop" => digest.qop = Some(value.as_str().into()),
                "nc" => digest.nc = Some(value.as_str().into()),
                _ => (),
            }
        }

        Ok(Credential::Digest(digest))
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Digest(DigestCredential {
                realm,
                username,
                nonce,
                uri,
                response,
                algorithm,
                cnonce,
                opaque,
                qop,
                nc,
            }) => {
                write!(f, "Digest ")?;
                let mut sep = "";
                if let Some(username) = username {
                    write!(f, "username=\"{username}\"")?;
                    sep = ", ";
                }
                if let Some(realm) = realm {
                    write!(f, "{sep}realm=\"{realm}\"")?;
                    sep = ", ";
                }
                if let Some(nonce) = nonce {
                    write!(f, "{sep}nonce=\"{nonce}\"")?;
                    sep = ", ";
                }
                if let Some(uri) = uri {
                    write!(f, "{sep}uri=\"{uri}\"")?;
                    sep = ", ";
                }
                if let Some(response) = response {
                    write!(f, "{sep}response=\"{response}\"")?;
                    sep = ", ";
                }
                if let Some(algorithm) = algorithm {
                    write!(f, "{sep}algorithm={algorithm}")?;
                    sep = ", ";
                }
                if let Some(cnonce) = cnonce {
                    write!(f, "{sep}cnonce=\"{cnonce}\"")?;
                    sep = ", ";
                }
                if let Some(qop) = qop {
                    write!(f, "{sep}qop={qop}")?;
                    sep = ", ";
                }
                if let Some(nc) = nc {
                    write!(f, "{sep}nc={nc}")?;
                    sep = ", ";
                }
                if let Some(opaque) = opaque {
                    write!(f, "{sep}opaque=\"{opaque}\"")?;
                }

                Ok(())
            }
            Credential::Other { scheme, param } => {
                write!(f, "{scheme}")?;
                let mut sep = " ";
                for p in param.iter() {
                    write!(f, "{sep}{}", p.name())?;
                    if let Some(value) = p.value() {
                        write!(f, "={value}")?;
                    }
                    sep = ", ";
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_digest_challenge() {
        let src = b"Digest realm=\"ex.test\", nonce=\"abc\", qop=\"auth\"";
        let challenge = Challenge::parse(&mut Parser::new(src)).unwrap();

        let Challenge::Digest(digest) = challenge else {
            panic!("expected digest challenge");
        };
        assert_eq!(digest.realm.as_deref(), Some("ex.test"));
        assert_eq!(digest.nonce.as_deref(), Some("abc"));
        assert_eq!(digest.qop.as_deref(), Some("auth"));
        assert!(!digest.stale);
    }

    #[test]
    fn test_parse_stale_challenge() {
        let src = b"Digest realm=\"ex.test\", nonce=\"def\", stale=true";
        let challenge = Challenge::parse(&mut Parser::new(src)).unwrap();

        let digest = challenge.digest().unwrap();
        assert!(digest.stale);
        assert_eq!(digest.nonce.as_deref(), Some("def"));
    }

    #[test]
    fn test_credential_display_quoting() {
        let credential = Credential::Digest(DigestCredential {
            username: Some("alice".into()),
            realm: Some("ex.test".into()),
            nonce: Some("abc".into()),
            uri: Some("sip:ex.test".into()),
            response: Some("0123456789abcdef0123456789abcdef".into()),
            qop: Some("auth".into()),
            nc: Some("00000001".into()),
            cnonce: Some("xyz".into()),
            ..Default::default()
        });

        let s = credential.to_string();
        assert!(s.starts_with("Digest username=\"alice\""));
        assert!(s.contains("nc=00000001"));
        assert!(s.contains("qop=auth"));
        assert!(s.contains("response=\"0123456789abcdef0123456789abcdef\""));
    }
}
