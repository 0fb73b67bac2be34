use core::fmt;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::parser::Parser;

/// The `Max-Forwards` SIP header.
///
/// Limits the number of hops a request can make on the way to its
/// destination.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct MaxForwards(u32);

impl MaxForwards {
    /// Creates a new `MaxForwards` instance.
    pub fn new(max: u32) -> Self {
        Self(max)
    }

    /// Returns the hop limit.
    pub fn max_forwards(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MaxForwards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", MaxForwards::NAME, self.0)
    }
}

impl HeaderParse for MaxForwards {
    const NAME: &'static str = "Max-Forwards";

    /*
     * Max-Forwards  =  "Max-Forwards" HCOLON 1*DIGIT
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        let max = parser.parse_u32()?;

        Ok(MaxForwards(max))
    }
}
