#![warn(missing_docs)]
//! SIP message types
//!
//! The module provide the [`SipMsg`] enum that can be an
//! [`SipMsg::Request`] or [`SipMsg::Response`] and represents a SIP
//! message.

use std::sync::Arc;

use enum_as_inner::EnumAsInner;

use crate::header::Headers;
use crate::parser::SIPV2;

mod auth;
mod code;
mod method;
mod param;
mod uri;

pub use auth::*;
pub use code::*;
pub use method::*;
pub use param::*;
pub use uri::*;

/// A SIP message.
///
/// It can be either a request from a client to a server,
/// or a response from a server to a client.
///
/// See [`Request`] and [`Response`] for more details.
#[derive(Debug, Clone, EnumAsInner)]
pub enum SipMsg {
    /// An SIP Request.
    Request(Request),
    /// An SIP Response.
    Response(Response),
}

impl SipMsg {
    /// Returns a reference to the headers of the message.
    pub fn headers(&self) -> &Headers {
        match self {
            SipMsg::Request(req) => &req.headers,
            SipMsg::Response(res) => &res.headers,
        }
    }

    /// Returns a mutable reference to the headers of this [`SipMsg`].
    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            SipMsg::Request(req) => &mut req.headers,
            SipMsg::Response(res) => &mut res.headers,
        }
    }

    /// Returns a reference to the message body.
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            SipMsg::Request(request) => request.body.as_deref(),
            SipMsg::Response(response) => response.body.as_deref(),
        }
    }

    /// Sets the body of the message. It can be `None` to remove the body.
    pub fn set_body(&mut self, body: Option<&[u8]>) {
        let slot = match self {
            SipMsg::Request(req) => &mut req.body,
            SipMsg::Response(res) => &mut res.body,
        };
        *slot = body.map(|b| b.into());
    }
}

impl From<Request> for SipMsg {
    fn from(value: Request) -> Self {
        SipMsg::Request(value)
    }
}

impl From<Response> for SipMsg {
    fn from(value: Response) -> Self {
        SipMsg::Response(value)
    }
}

/// A parsed SIP Request.
///
/// SIP request represents a request from a client to a server.
#[derive(Debug, Clone)]
pub struct Request {
    /// The Request-Line of the SIP message.
    pub req_line: RequestLine,
    /// All headers present in the SIP message.
    pub headers: Headers,
    /// The body of the SIP message, if present.
    pub body: Option<Arc<[u8]>>,
}

impl Request {
    /// Creates a new SIP `Request`.
    pub fn new(req_line: RequestLine) -> Self {
        Request {
            req_line,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Creates a new `Request` with the given headers.
    #[inline]
    pub const fn with_headers(req_line: RequestLine, headers: Headers) -> Self {
        Self {
            req_line,
            headers,
            body: None,
        }
    }

    /// Returns the SIP method of the request.
    pub fn method(&self) -> SipMethod {
        self.req_line.method
    }

    /// Sets the message body.
    pub fn set_body(&mut self, body: &[u8]) {
        self.body = Some(body.into());
    }
}

/// Represents a SIP Request-Line.
///
/// The Request-Line contains the method and the Request-URI, which indicate the
/// target of the SIP request.
#[derive(Debug, Clone)]
pub struct RequestLine {
    /// The SIP method associated with the request.
    pub method: SipMethod,
    /// The Request-URI indicating the target of the request.
    pub uri: Uri,
}

impl RequestLine {
    /// Creates a new `RequestLine` instance from the given [`SipMethod`] and
    /// [`Uri`].
    pub const fn new(method: SipMethod, uri: Uri) -> Self {
        Self { method, uri }
    }
}

impl std::fmt::Display for RequestLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {SIPV2}\r\n", self.method, self.uri)
    }
}

/// A parsed SIP Response.
#[derive(Debug, Clone)]
pub struct Response {
    /// The Status-Line of the SIP message.
    pub status_line: StatusLine,
    /// All headers present in the SIP message.
    pub headers: Headers,
    /// The body of the SIP message, if present.
    pub body: Option<Arc<[u8]>>,
}

impl Response {
    /// Creates a new SIP `Response` from a `Status-Line`, with empty headers
    /// and no body.
    pub fn new(status_line: StatusLine) -> Self {
        Self {
            status_line,
            headers: Default::default(),
            body: None,
        }
    }

    /// Returns the message response code.
    pub fn code(&self) -> StatusCode {
        self.status_line.code
    }

    /// Returns the reason.
    pub fn reason(&self) -> &str {
        &self.status_line.reason
    }

    /// Creates a new `Response` with the given `Status-Line` and headers,
    pub const fn with_headers(status_line: StatusLine, headers: Headers) -> Self {
        Self {
            status_line,
            headers,
            body: None,
        }
    }

    /// Set the headers of the response, replacing any existing headers.
    pub fn set_headers(&mut self, headers: Headers) {
        self.headers = headers;
    }

    /// Appends headers from another collection to the current headers.
    pub fn append_headers(&mut self, other: &mut Headers) {
        self.headers.append(other);
    }

    /// Sets the message body.
    pub fn set_body(&mut self, body: &[u8]) {
        self.body = Some(body.into());
    }
}

/// Represents a SIP Status-Line.
///
/// The Status-Line appears in SIP responses and includes a status code and a
/// `reason-phrase` explaining the result of the request.
#[derive(Debug, Clone)]
pub struct StatusLine {
    /// The SIP status code associated with the response.
    pub code: StatusCode,
    /// The reason phrase explaining the status code.
    pub reason: Arc<str>,
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{SIPV2} {} {}\r\n", self.code.into_i32(), self.reason)
    }
}

impl StatusLine {
    /// Creates a new `StatusLine` instance from the given
    /// [`StatusCode`] and `reason-phrase`.
    pub fn new(code: StatusCode, reason: &str) -> Self {
        StatusLine {
            code,
            reason: reason.into(),
        }
    }
}

impl From<StatusCode> for StatusLine {
    fn from(code: StatusCode) -> Self {
        StatusLine {
            code,
            reason: code.reason().into(),
        }
    }
}
