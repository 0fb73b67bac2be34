use core::fmt;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::parser::Parser;

/// The `Expires` SIP header.
///
/// Gives the relative time after which the message, or the registration it
/// requests, expires.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Expires(u32);

impl Expires {
    /// Creates a new `Expires` instance.
    pub fn new(secs: u32) -> Self {
        Self(secs)
    }

    /// Returns the expiry in seconds.
    pub fn seconds(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Expires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", Expires::NAME, self.0)
    }
}

impl HeaderParse for Expires {
    const NAME: &'static str = "Expires";

    /*
     * Expires  =  "Expires" HCOLON delta-seconds
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        let secs = parser.parse_u32()?;

        Ok(Expires(secs))
    }
}
