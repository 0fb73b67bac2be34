use core::fmt;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::message::{Parameters, SipAddr};
use crate::parser::Parser;

/// The `Contact` SIP header.
///
/// Carries the URI at which the sender can be reached directly. For
/// registrations, the `expires` parameter carries the binding lifetime
/// granted by the registrar.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Contact {
    /// The contact address.
    pub addr: SipAddr,
    /// Any header parameters (q, expires, extensions).
    pub params: Option<Parameters>,
}

impl Contact {
    /// Creates a new `Contact` header.
    pub fn new(addr: SipAddr) -> Self {
        Self { addr, params: None }
    }

    /// Returns the `expires` parameter value, if present.
    pub fn expires_param(&self) -> Option<u32> {
        self.params
            .as_ref()
            .and_then(|p| p.get_named("expires"))
            .and_then(|v| v.parse().ok())
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Contact::NAME, self.addr)?;
        if let Some(params) = &self.params {
            write!(f, "{params}")?;
        }
        Ok(())
    }
}

impl HeaderParse for Contact {
    const NAME: &'static str = "Contact";
    const SHORT_NAME: Option<&'static str> = Some("m");

    /*
     * Contact        =  ("Contact" / "m" ) HCOLON
     *                   ( STAR / (contact-param *(COMMA contact-param)))
     * contact-param  =  (name-addr / addr-spec) *(SEMI contact-params)
     * contact-params =  c-p-q / c-p-expires / contact-extension
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        let addr = parser.parse_sip_addr()?;
        let params = crate::macros::parse_param!(parser,);

        Ok(Contact { addr, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let src = b"<sip:bob@192.0.2.4>;expires=3600\r\n";
        let contact = Contact::parse(&mut Parser::new(src)).unwrap();

        assert_eq!(contact.expires_param(), Some(3600));
        assert_eq!(contact.addr.uri().user_str(), Some("bob"));
    }
}
