use core::fmt;

use itertools::Itertools;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::message::SipMethod;
use crate::parser::Parser;

/// The `Allow` SIP header.
///
/// Lists the methods the sender supports.
///
/// # Examples
///
/// ```
/// # use softsip::header::Allow;
/// # use softsip::message::SipMethod;
/// let allow = Allow::supported();
///
/// assert!(allow.allows(SipMethod::Invite));
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Allow(Vec<SipMethod>);

impl Allow {
    /// Creates a new `Allow` header from a method list.
    pub fn new(methods: Vec<SipMethod>) -> Self {
        Self(methods)
    }

    /// The methods this user agent supports.
    pub fn supported() -> Self {
        Self(SipMethod::supported().to_vec())
    }

    /// Returns `true` if the given method is listed.
    pub fn allows(&self, method: SipMethod) -> bool {
        self.0.contains(&method)
    }

    /// Returns the listed methods.
    pub fn methods(&self) -> &[SipMethod] {
        &self.0
    }
}

impl fmt::Display for Allow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Allow::NAME, self.0.iter().join(", "))
    }
}

impl HeaderParse for Allow {
    const NAME: &'static str = "Allow";

    /*
     * Allow  =  "Allow" HCOLON [Method *(COMMA Method)]
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let mut methods = Vec::new();

        parser.take_ws();
        loop {
            let b_method = parser.alpha();
            if b_method.is_empty() {
                break;
            }
            methods.push(SipMethod::from(b_method));
            parser.take_ws();
            if parser.peek() != Some(&b',') {
                break;
            }
            parser.advance();
            parser.take_ws();
        }

        Ok(Allow(methods))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let src = b"INVITE, ACK, BYE, CANCEL\r\n";
        let allow = Allow::parse(&mut Parser::new(src)).unwrap();

        assert_eq!(allow.methods().len(), 4);
        assert!(allow.allows(SipMethod::Bye));
        assert!(!allow.allows(SipMethod::Info));
    }
}
