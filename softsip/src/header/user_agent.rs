use core::fmt;

use util::ArcStr;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::parser::Parser;

/// The `User-Agent` SIP header.
///
/// Identifies the software originating the message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UserAgent(ArcStr);

impl UserAgent {
    /// Creates a new `UserAgent` instance.
    pub fn new(agent: &str) -> Self {
        Self(agent.into())
    }

    /// Returns the agent product string.
    pub fn agent(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", UserAgent::NAME, self.0)
    }
}

impl HeaderParse for UserAgent {
    const NAME: &'static str = "User-Agent";

    /*
     * User-Agent  =  "User-Agent" HCOLON server-val *(LWS server-val)
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        let agent = parser.read_until_newline();
        let agent = std::str::from_utf8(agent)?.trim_end();

        Ok(UserAgent(agent.into()))
    }
}
