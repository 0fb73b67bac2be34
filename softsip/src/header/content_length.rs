use core::fmt;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::parser::Parser;

/// The `Content-Length` SIP header.
///
/// Indicates the size of the message body in bytes.
///
/// # Examples
///
/// ```
/// # use softsip::header::ContentLength;
/// let clen = ContentLength::new(0);
///
/// assert_eq!("Content-Length: 0", clen.to_string());
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct ContentLength(u32);

impl ContentLength {
    /// Creates a new `ContentLength` instance.
    pub fn new(len: u32) -> Self {
        Self(len)
    }

    /// Returns the length in bytes.
    pub fn len(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ContentLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", ContentLength::NAME, self.0)
    }
}

impl HeaderParse for ContentLength {
    const NAME: &'static str = "Content-Length";
    const SHORT_NAME: Option<&'static str> = Some("l");

    /*
     * Content-Length  =  ( "Content-Length" / "l" ) HCOLON 1*DIGIT
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        let len = parser.parse_u32()?;

        Ok(ContentLength(len))
    }
}
