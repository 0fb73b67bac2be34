use core::fmt;

use util::ArcStr;

use crate::error::Result;
use crate::header::{HeaderParse, TAG_PARAM};
use crate::message::{Parameters, SipAddr};
use crate::parser::Parser;

/// The `To` SIP header.
///
/// Specifies the logical recipient of the request. The tag parameter is added
/// by the answering side and, together with the `From` tag and the `Call-ID`,
/// identifies the dialog.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct To {
    /// The address of the recipient.
    pub addr: SipAddr,
    /// The dialog tag.
    tag: Option<ArcStr>,
    /// Any other header parameters.
    params: Option<Parameters>,
}

impl To {
    /// Creates a new `To` header without a tag.
    pub fn new(addr: SipAddr) -> Self {
        Self {
            addr,
            tag: None,
            params: None,
        }
    }

    /// Creates a new `To` header with the given tag.
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

impl fmt::Display for To {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", To::NAME, self.addr)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        if let Some(params) = &self.params {
            write!(f, "{}", params)?;
        }
        Ok(())
    }
}

impl HeaderParse for To {
    const NAME: &'static str = "To";
    const SHORT_NAME: Option<&'static str> = Some("t");

    /*
     * To        =  ( "To" / "t" ) HCOLON ( name-addr / addr-spec )
     *              *( SEMI to-param )
     * to-param  =  tag-param / generic-param
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        let addr = parser.parse_sip_addr()?;
        let mut tag = None;
        let params = crate::macros::parse_param!(parser, TAG_PARAM = tag);

        Ok(To {
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
        let src = b"Bob <sip:bob@biloxi.com>\r\n";
        let to = To::parse(&mut Parser::new(src)).unwrap();

        assert_eq!(to.addr.display(), Some("Bob"));
        assert_eq!(to.tag(), None);
    }
}
