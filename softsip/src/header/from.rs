use core::fmt;

use util::ArcStr;

use crate::error::Result;
use crate::header::{HeaderParse, TAG_PARAM};
use crate::message::{Parameters, SipAddr};
use crate::parser::Parser;

/// The `From` SIP header.
///
/// Indicates the initiator of the request. The tag parameter stays stable for
/// the whole lifetime of a dialog.
///
/// # Examples
///
/// ```
/// # use softsip::header::From;
/// # use softsip::header::HeaderParse;
/// let from = From::from_bytes(b"<sip:alice@ex.test>;tag=48s2").unwrap();
///
/// assert_eq!(from.tag(), Some("48s2"));
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct From {
    /// The address of the sender.
    pub addr: SipAddr,
    /// The dialog tag.
    tag: Option<ArcStr>,
    /// Any other header parameters.
    params: Option<Parameters>,
}

impl From {
    /// Creates a new `From` header without a tag.
    pub fn new(addr: SipAddr) -> Self {
        Self {
            addr,
            tag: None,
            params: None,
        }
    }

    /// Creates a new `From` header with the given tag.
    pub fn with_tag(addr: SipAddr, tag: &str) -> Self {
        Self {
            addr,
            tag: Some(tag.into()),
            params: None,
        }
    }

    /// Returns the tag parameter.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Sets the tag parameter.
    pub fn set_tag(&mut self, tag: Option<&str>) {
        self.tag = tag.map(|t| t.into());
    }
}

impl fmt::Display for From {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", From::NAME, self.addr)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        if let Some(params) = &self.params {
            write!(f, "{}", params)?;
        }
        Ok(())
    }
}

impl HeaderParse for From {
    const NAME: &'static str = "From";
    const SHORT_NAME: Option<&'static str> = Some("f");

    /*
     * From        =  ( "From" / "f" ) HCOLON from-spec
     * from-spec   =  ( name-addr / addr-spec ) *( SEMI from-param )
     * from-param  =  tag-param / generic-param
     * tag-param   =  "tag" EQUAL token
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        let addr = parser.parse_sip_addr()?;
        let mut tag = None;
        let params = crate::macros::parse_param!(parser, TAG_PARAM = tag);

        Ok(From {
            addr,
            tag: tag.map(|t: &str| t.into()),
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let src = b"Bob <sip:bob@biloxi.com>;tag=456248\r\n";
        let from = From::parse(&mut Parser::new(src)).unwrap();

        assert_eq!(from.addr.display(), Some("Bob"));
        assert_eq!(from.tag(), Some("456248"));
    }

    #[test]
    fn test_parse_addr_spec() {
        let src = b"sip:alice@ex.test;tag=887s\r\n";
        let from = From::parse(&mut Parser::new(src)).unwrap();

        assert!(from.addr.is_uri());
        assert_eq!(from.tag(), Some("887s"));
    }
}
