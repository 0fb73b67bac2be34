use core::fmt;

use util::ArcStr;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::message::Parameters;
use crate::parser::Parser;

/// The `media-type` that appears in `Content-Type` SIP headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// The type part (e.g. `application`).
    pub mtype: ArcStr,
    /// The subtype part (e.g. `sdp`).
    pub subtype: ArcStr,
    /// Optional media parameters.
    pub param: Option<Parameters>,
}

impl MediaType {
    /// Constructs a `MediaType` from a type and a subtype.
    pub fn new(mtype: &str, subtype: &str) -> Self {
        Self {
            mtype: mtype.into(),
            subtype: subtype.into(),
            param: None,
        }
    }

    /// The `application/sdp` media type.
    pub fn sdp() -> Self {
        Self::new("application", "sdp")
    }

    /// The `application/dtmf-relay` media type used by SIP INFO digits.
    pub fn dtmf_relay() -> Self {
        Self::new("application", "dtmf-relay")
    }

    /// Returns `true` if this media type matches the given type/subtype pair.
    pub fn is(&self, mtype: &str, subtype: &str) -> bool {
        self.mtype.eq_ignore_ascii_case(mtype) && self.subtype.eq_ignore_ascii_case(subtype)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mtype, self.subtype)?;
        if let Some(param) = &self.param {
            write!(f, "{}", param)?;
        }
        Ok(())
    }
}

/// The `Content-Type` SIP header.
///
/// Indicates the media type of the message body.
///
/// # Examples
///
/// ```
/// # use softsip::header::{ContentType, MediaType};
/// let ctype = ContentType::new(MediaType::sdp());
///
/// assert_eq!("Content-Type: application/sdp", ctype.to_string());
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ContentType(MediaType);

impl ContentType {
    /// Creates a new `ContentType` instance.
    pub fn new(media_type: MediaType) -> Self {
        Self(media_type)
    }

    /// Returns the media type.
    pub fn media_type(&self) -> &MediaType {
        &self.0
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", ContentType::NAME, self.0)
    }
}

impl HeaderParse for ContentType {
    const NAME: &'static str = "Content-Type";
    const SHORT_NAME: Option<&'static str> = Some("c");

    /*
     * Content-Type     =  ( "Content-Type" / "c" ) HCOLON media-type
     * media-type       =  m-type SLASH m-subtype *(SEMI m-parameter)
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        let mtype = parser.parse_token()?.to_string();
        parser.advance();
        let subtype = parser.parse_token()?.to_string();
        let param = crate::macros::parse_param!(parser,);

        Ok(ContentType(MediaType {
            mtype: mtype.as_str().into(),
            subtype: subtype.as_str().into(),
            param,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let src = b"application/sdp\r\n";
        let ctype = ContentType::parse(&mut Parser::new(src)).unwrap();

        assert!(ctype.media_type().is("application", "sdp"));
    }
}
