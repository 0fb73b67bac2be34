use core::fmt;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::message::SipMethod;
use crate::parser::Parser;

/// The `CSeq` SIP header.
///
/// Ensures order and tracking of SIP transactions within a
/// session.
///
/// # Examples
///
/// ```
/// # use softsip::{header::CSeq, message::SipMethod};
/// let cseq = CSeq::new(1, SipMethod::Options);
///
/// assert_eq!(
///     "CSeq: 1 OPTIONS",
///     cseq.to_string()
/// );
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct CSeq {
    /// The sequence number.
    pub cseq: u32,
    /// The method associated with this sequence number.
    pub method: SipMethod,
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", CSeq::NAME, self.cseq, self.method)
    }
}

impl CSeq {
    /// Creates a new `CSeq` instance.
    pub fn new(cseq: u32, method: SipMethod) -> Self {
        Self { cseq, method }
    }

    /// Returns the cseq number.
    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    /// Returns the SIP method associated with the cseq.
    pub fn method(&self) -> SipMethod {
        self.method
    }
}

impl HeaderParse for CSeq {
    const NAME: &'static str = "CSeq";

    /*
     * CSeq  =  "CSeq" HCOLON 1*DIGIT LWS Method
     */
    fn parse(parser: &mut Parser<'_>) -> Result<CSeq> {
        parser.take_ws();
        let cseq = parser.parse_u32()?;

        parser.take_ws();
        let b_method = parser.alpha();
        let method = SipMethod::from(b_method);

        Ok(CSeq { cseq, method })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let src = b"4711 INVITE\r\n";
        let cseq = CSeq::parse(&mut Parser::new(src)).unwrap();

        assert_eq!(cseq.method, SipMethod::Invite);
        assert_eq!(cseq.cseq, 4711);
    }
}
