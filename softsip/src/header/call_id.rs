use core::fmt;

use util::ArcStr;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::parser::Parser;

/// The `Call-ID` SIP header.
///
/// Uniquely identifies a call between two user agents. Every message that
/// belongs to the same call carries the same `Call-ID`.
///
/// # Examples
///
/// ```
/// # use softsip::header::CallId;
/// let cid = CallId::new("bs9ki9iqbee8k5kal8mpqb");
///
/// assert_eq!("Call-ID: bs9ki9iqbee8k5kal8mpqb", cid.to_string());
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Hash, Default)]
pub struct CallId(ArcStr);

impl CallId {
    /// Creates a new `CallId` instance.
    pub fn new(id: &str) -> Self {
        Self(id.into())
    }

    /// Returns the inner id.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", CallId::NAME, self.0)
    }
}

impl HeaderParse for CallId {
    const NAME: &'static str = "Call-ID";
    const SHORT_NAME: Option<&'static str> = Some("i");

    /*
     * Call-ID  =  ( "Call-ID" / "i" ) HCOLON callid
     * callid   =  word [ "@" word ]
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        let id = parser.read_until_newline();
        let id = std::str::from_utf8(id)?.trim_end();

        Ok(CallId(id.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let src = b"843817637684230@998sdasdh09\r\n";
        let cid = CallId::parse(&mut Parser::new(src)).unwrap();

        assert_eq!(cid.id(), "843817637684230@998sdasdh09");
    }
}
