#![warn(missing_docs)]
//! SIP Headers types
//!
//! The module provide the [`Headers`] struct that contains
//! an list of [`Header`] and a can be used to manipulating
//! SIP headers.

mod allow;
mod authorization;
mod call_id;
mod contact;
mod content_length;
mod content_type;
mod cseq;
mod expires;
mod from;
mod max_forwards;
mod record_route;
mod route;
mod to;
mod user_agent;
mod via;
mod www_authenticate;

pub use allow::Allow;
pub use authorization::{Authorization, ProxyAuthorization};
pub use call_id::CallId;
pub use contact::Contact;
pub use content_length::ContentLength;
pub use content_type::{ContentType, MediaType};
pub use cseq::CSeq;
pub use expires::Expires;
pub use from::From;
pub use max_forwards::MaxForwards;
pub use record_route::RecordRoute;
pub use route::Route;
pub use to::To;
pub use user_agent::UserAgent;
pub use via::{Via, BRANCH_RFC3261_COOKIE};
pub use www_authenticate::{ProxyAuthenticate, WwwAuthenticate};

use core::fmt;

use util::ArcStr;

use crate::error::Result;
use crate::parser::Parser;

/// The tag parameter that is used normaly in [`From`] and [`To`] headers.
pub(crate) const TAG_PARAM: &str = "tag";

/// Trait to parse SIP headers.
///
/// This trait defines how a specific SIP header type can be parsed from a byte
/// slice, as typically received in SIP messages.
pub trait HeaderParse: Sized {
    /// The full name of the SIP header (e.g., `"Contact"`).
    const NAME: &'static str;
    /// The abbreviated name of the SIP header, if any (e.g., `"f"` for
    /// `"From"`).
    const SHORT_NAME: Option<&'static str> = None;

    /// Checks if the given name matches this header's name.
    fn matches_name(name: &[u8]) -> bool {
        name.eq_ignore_ascii_case(Self::NAME.as_bytes())
            || Self::SHORT_NAME.is_some_and(|short| name.eq_ignore_ascii_case(short.as_bytes()))
    }

    /// Parses this header's value from the given `Parser`.
    fn parse(parser: &mut Parser<'_>) -> Result<Self>;

    /// Parses this header from a raw byte slice.
    ///
    /// This is a convenience method that creates a [`Parser`] and delegates to
    /// [`HeaderParse::parse`].
    fn from_bytes(src: &[u8]) -> Result<Self> {
        Self::parse(&mut Parser::new(src))
    }
}

/// A typed SIP header.
///
/// Headers this crate does not model keep their raw name and value in the
/// [`Header::Other`] variant, so a reparsed message serializes back byte for
/// byte.
#[derive(Debug, PartialEq, Clone)]
pub enum Header {
    /// The `Via` header.
    Via(Via),
    /// The `From` header.
    From(From),
    /// The `To` header.
    To(To),
    /// The `Call-ID` header.
    CallId(CallId),
    /// The `CSeq` header.
    CSeq(CSeq),
    /// The `Contact` header.
    Contact(Contact),
    /// The `Max-Forwards` header.
    MaxForwards(MaxForwards),
    /// The `Content-Length` header.
    ContentLength(ContentLength),
    /// The `Content-Type` header.
    ContentType(ContentType),
    /// The `Expires` header.
    Expires(Expires),
    /// The `Authorization` header.
    Authorization(Authorization),
    /// The `Proxy-Authorization` header.
    ProxyAuthorization(ProxyAuthorization),
    /// The `WWW-Authenticate` header.
    WwwAuthenticate(WwwAuthenticate),
    /// The `Proxy-Authenticate` header.
    ProxyAuthenticate(ProxyAuthenticate),
    /// The `Record-Route` header.
    RecordRoute(RecordRoute),
    /// The `Route` header.
    Route(Route),
    /// The `User-Agent` header.
    UserAgent(UserAgent),
    /// The `Allow` header.
    Allow(Allow),
    /// Any header not otherwise modeled, kept verbatim.
    Other(OtherHeader),
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Header::Via(h) => write!(f, "{h}"),
            Header::From(h) => write!(f, "{h}"),
            Header::To(h) => write!(f, "{h}"),
            Header::CallId(h) => write!(f, "{h}"),
            Header::CSeq(h) => write!(f, "{h}"),
            Header::Contact(h) => write!(f, "{h}"),
            Header::MaxForwards(h) => write!(f, "{h}"),
            Header::ContentLength(h) => write!(f, "{h}"),
            Header::ContentType(h) => write!(f, "{h}"),
            Header::Expires(h) => write!(f, "{h}"),
            Header::Authorization(h) => write!(f, "{h}"),
            Header::ProxyAuthorization(h) => write!(f, "{h}"),
            Header::WwwAuthenticate(h) => write!(f, "{h}"),
            Header::ProxyAuthenticate(h) => write!(f, "{h}"),
            Header::RecordRoute(h) => write!(f, "{h}"),
            Header::Route(h) => write!(f, "{h}"),
            Header::UserAgent(h) => write!(f, "{h}"),
            Header::Allow(h) => write!(f, "{h}"),
            Header::Other(h) => write!(f, "{h}"),
        }
    }
}

/// A header kept as a raw name and value pair.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OtherHeader {
    /// The header name as it appeared on the wire.
    pub name: ArcStr,
    /// The header value, verbatim.
    pub value: ArcStr,
}

impl OtherHeader {
    /// Creates a new raw header.
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for OtherHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// A collection of SIP Headers.
///
/// A wrapper over Vec<[`Header`]> that contains the header list and preserves
/// insertion order, which matters for `Via` and `Record-Route` processing and
/// for byte-exact reserialization.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Headers(Vec<Header>);

impl Headers {
    /// Create a new empty collection of headers.
    #[inline]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Constructs a new, empty collection of `Headers` with at least the
    /// specified capacity.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Push an new header.
    #[inline]
    pub fn push(&mut self, hdr: Header) {
        self.0.push(hdr);
    }

    /// Removes the last element and returns it, or None if it is empty.
    #[inline]
    pub fn pop(&mut self) -> Option<Header> {
        self.0.pop()
    }

    /// Returns an iterator over headers.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    /// Returns a mutable iterator over headers.
    #[inline]
    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, Header> {
        self.0.iter_mut()
    }

    /// Moves all the elements of `other` into `self`, leaving `other` empty.
    #[inline]
    pub fn append(&mut self, other: &mut Self) {
        self.0.append(&mut other.0);
    }

    /// Extends the headers collection with the contents of an another.
    #[inline]
    pub fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = Header>,
    {
        self.0.extend(iter);
    }

    /// Returns the number of headers in the collection.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the header collection contains no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get an reference to an header at the index specified.
    pub fn get(&self, index: usize) -> Option<&Header> {
        self.0.get(index)
    }
}

impl<const N: usize> std::convert::From<[Header; N]> for Headers {
    fn from(array: [Header; N]) -> Self {
        Self(array.into_iter().collect())
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Headers(iter.into_iter().collect())
    }
}

impl std::convert::From<Vec<Header>> for Headers {
    fn from(headers: Vec<Header>) -> Self {
        Self(headers)
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hdr in self.iter() {
            write!(f, "{hdr}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieves_header_by_index_correctly() {
        let mut headers = Headers::new();

        let clen = ContentLength::new(10);
        let cid = CallId::new("bs9ki9iqbee8k5kal8mpqb");

        headers.push(Header::CallId(cid.clone()));
        headers.push(Header::ContentLength(clen));

        assert_eq!(headers.get(0), Some(&Header::CallId(cid)));
        assert_eq!(headers.get(1), Some(&Header::ContentLength(clen)));

        assert!(headers.get(2).is_none());
    }

    #[test]
    fn test_finds_header_matching_predicate() {
        let clen = ContentLength::new(10);
        let headers = Headers::from([Header::ContentLength(clen)]);
        let header = headers.iter().find(|h| matches!(h, Header::ContentLength(_)));

        assert_eq!(header.unwrap().to_string(), "Content-Length: 10");
    }

    #[test]
    fn test_appends_headers_from_another_collection() {
        let mut headers1 = Headers::new();
        let mut headers2 = Headers::new();

        headers1.push(Header::Expires(Expires::new(10)));
        headers2.push(Header::ContentLength(ContentLength::new(20)));

        headers1.append(&mut headers2);

        assert_eq!(headers1.len(), 2);
        assert!(headers2.is_empty());
    }

    #[test]
    fn test_other_header_round_trip() {
        let hdr = OtherHeader::new("X-Asterisk-Info", "forwarded");

        assert_eq!(hdr.to_string(), "X-Asterisk-Info: forwarded");
    }
}
