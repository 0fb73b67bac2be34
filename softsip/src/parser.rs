#![warn(missing_docs)]
//! SIP Parser
//!
//! This module contains functions for sip parsing.

use std::str;

use crate::error::Result;
use crate::header::{
    Allow, Authorization, CSeq, CallId, Contact, ContentLength, ContentType, Expires, From, Header, HeaderParse,
    MaxForwards, OtherHeader, ProxyAuthenticate, ProxyAuthorization, RecordRoute, Route, To, UserAgent, Via,
    WwwAuthenticate,
};
use crate::macros::{b_map, parse_error};
use crate::message::{
    Host, HostPort, NameAddr, ParameterRef, Request, RequestLine, Response, Scheme, SipMethod, SipMsg, SipAddr,
    StatusLine, Uri, UserInfo,
};

pub(crate) const SIPV2: &str = "SIP/2.0";

const B_SIPV2: &[u8] = SIPV2.as_bytes();
const SIP: &[u8] = b"sip";
const SIPS: &[u8] = b"sips";
const TRANSPORT_PARAM: &str = "transport";
const ALPHA_NUM: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const UNRESERVED: &[u8] = b"-_.!~*'()%";
const ESCAPED: &[u8] = b"%";
const USER_UNRESERVED: &[u8] = b"&=+$,;?/";
const TOKEN: &[u8] = b"-.!%*_`'~+";
const PASS: &[u8] = b"&=+$,";
const HOST: &[u8] = b"_-.";

// For reading user part in uri.
b_map!(USER_MAP => ALPHA_NUM, UNRESERVED, USER_UNRESERVED, ESCAPED);
// For reading password in uri.
b_map!(PASS_MAP => ALPHA_NUM, UNRESERVED, ESCAPED, PASS);
// For reading host in uri.
b_map!(HOST_MAP => ALPHA_NUM, HOST);
// For reading parameter names and values.
b_map!(PARAM_MAP => b"[]/:&+$", ALPHA_NUM, UNRESERVED, ESCAPED);
// For reading token.
b_map!(TOKEN_MAP => ALPHA_NUM, TOKEN);

#[inline]
fn is_host(b: u8) -> bool {
    HOST_MAP[b as usize]
}

#[inline]
fn is_token(b: u8) -> bool {
    TOKEN_MAP[b as usize]
}

#[inline]
fn is_param(b: u8) -> bool {
    PARAM_MAP[b as usize]
}

#[inline]
fn is_newline(b: u8) -> bool {
    matches!(b, b'\r' | b'\n')
}

/// A type for parsing SIP messages.
///
/// This struct provides methods for parsing various components of SIP
/// messages, such as headers, URIs, and start lines.
pub struct Parser<'buf> {
    buf: &'buf [u8],
    idx: usize,
}

impl<'buf> Parser<'buf> {
    /// Create an new `Parser` from the given slice.
    pub fn new(buf: &'buf [u8]) -> Self {
        Self { buf, idx: 0 }
    }

    /// Returns the next byte without consuming it.
    #[inline]
    pub fn peek(&self) -> Option<&u8> {
        self.buf.get(self.idx)
    }

    /// Consumes and returns the next byte.
    #[inline]
    pub fn advance(&mut self) -> Option<u8> {
        let b = self.buf.get(self.idx).copied();
        if b.is_some() {
            self.idx += 1;
        }
        b
    }

    /// Returns the unconsumed remainder of the buffer.
    #[inline]
    pub fn remaining(&self) -> &'buf [u8] {
        &self.buf[self.idx..]
    }

    /// Returns `true` if the whole buffer was consumed.
    #[inline]
    pub fn is_eof(&self) -> bool {
        self.idx >= self.buf.len()
    }

    /// Consumes spaces and horizontal tabs.
    pub fn take_ws(&mut self) {
        while let Some(b' ') | Some(b'\t') = self.peek() {
            self.idx += 1;
        }
    }

    /// Consumes a single CRLF (or a bare LF).
    pub fn take_newline(&mut self) {
        if let Some(&b'\r') = self.peek() {
            self.idx += 1;
        }
        if let Some(&b'\n') = self.peek() {
            self.idx += 1;
        }
    }

    fn read_while<F>(&mut self, f: F) -> &'buf [u8]
    where
        F: Fn(u8) -> bool,
    {
        let start = self.idx;
        while let Some(&b) = self.peek() {
            if !f(b) {
                break;
            }
            self.idx += 1;
        }
        &self.buf[start..self.idx]
    }

    /// Reads bytes up to (not including) the given byte or the end of line.
    pub fn read_until_byte(&mut self, byte: u8) -> &'buf [u8] {
        self.read_while(|b| b != byte && !is_newline(b))
    }

    /// Reads bytes up to the end of the current line.
    pub fn read_until_newline(&mut self) -> &'buf [u8] {
        self.read_while(|b| !is_newline(b))
    }

    /// Reads consecutive alphabetic bytes.
    pub fn alpha(&mut self) -> &'buf [u8] {
        self.read_while(|b| b.is_ascii_alphabetic())
    }

    /// Parses a decimal number.
    pub fn parse_u32(&mut self) -> Result<u32> {
        let digits = self.read_while(|b| b.is_ascii_digit());
        if digits.is_empty() {
            return parse_error!("Expected a number");
        }
        match str::from_utf8(digits)?.parse() {
            Ok(n) => Ok(n),
            Err(_) => parse_error!("Number out of range"),
        }
    }

    /// Parses a SIP token.
    pub fn parse_token(&mut self) -> Result<&'buf str> {
        let token = self.read_while(is_token);
        if token.is_empty() {
            return parse_error!("Expected a token");
        }

        Ok(str::from_utf8(token)?)
    }

    /// Consumes the `SIP/2.0` version marker.
    pub fn parse_sip_v2(&mut self) -> Result<()> {
        if self.remaining().starts_with(B_SIPV2) {
            self.idx += B_SIPV2.len();
            Ok(())
        } else {
            parse_error!("Expected SIP/2.0")
        }
    }

    /// Reads a quoted string, returning its content without the quotes.
    fn read_quoted(&mut self) -> Result<&'buf str> {
        if self.peek() != Some(&b'"') {
            return parse_error!("Expected '\"'");
        }
        self.idx += 1;
        let content = self.read_while(|b| b != b'"' && !is_newline(b));
        if self.advance() != Some(b'"') {
            return parse_error!("Unterminated quoted string");
        }

        Ok(str::from_utf8(content)?)
    }

    /// Parses a `name[=value]` parameter after a `;` separator was consumed.
    pub fn parse_ref_param(&mut self) -> Result<ParameterRef<'buf>> {
        self.take_ws();
        let name = self.read_while(is_param);
        if name.is_empty() {
            return parse_error!("Expected a parameter name");
        }
        let name = str::from_utf8(name)?;

        if self.peek() != Some(&b'=') {
            return Ok((name, None));
        }
        self.idx += 1;

        let value = if self.peek() == Some(&b'"') {
            self.read_quoted()?
        } else {
            str::from_utf8(self.read_while(is_param))?
        };

        Ok((name, Some(value)))
    }

    /// Parses the comma separated `name=value` list of a digest challenge or
    /// credential. Quoted values are returned unquoted.
    pub fn parse_auth_params(&mut self) -> Result<Vec<(String, Option<String>)>> {
        let mut params = Vec::new();

        loop {
            self.take_ws();
            let name = self.read_while(is_token);
            if name.is_empty() {
                break;
            }
            let name = str::from_utf8(name)?.to_string();

            self.take_ws();
            let value = if self.peek() == Some(&b'=') {
                self.idx += 1;
                self.take_ws();
                let value = if self.peek() == Some(&b'"') {
                    self.read_quoted()?
                } else {
                    str::from_utf8(self.read_while(is_token))?
                };
                Some(value.to_string())
            } else {
                None
            };

            params.push((name, value));

            self.take_ws();
            if self.peek() != Some(&b',') {
                break;
            }
            self.idx += 1;
        }

        Ok(params)
    }

    /// Parses the host and optional port of a uri.
    pub fn parse_host_port(&mut self) -> Result<HostPort> {
        let host = if self.peek() == Some(&b'[') {
            // IPv6 reference.
            self.idx += 1;
            let inner = self.read_until_byte(b']');
            if self.advance() != Some(b']') {
                return parse_error!("Unterminated IPv6 reference");
            }
            match str::from_utf8(inner)?.parse() {
                Ok(ip) => Host::IpAddr(ip),
                Err(_) => return parse_error!("Invalid IPv6 host"),
            }
        } else {
            let host = self.read_while(is_host);
            if host.is_empty() {
                return parse_error!("Expected a host");
            }
            str::from_utf8(host)?.parse()?
        };

        let port = if self.peek() == Some(&b':') {
            self.idx += 1;
            Some(self.parse_u32()? as u16)
        } else {
            None
        };

        Ok(HostPort { host, port })
    }

    /*
     * SIP-URI  =  "sip:" [ userinfo ] hostport
     *             uri-parameters [ headers ]
     * SIPS-URI =  "sips:" [ userinfo ] hostport
     *             uri-parameters [ headers ]
     * userinfo =  ( user / telephone-subscriber ) [ ":" password ] "@"
     */
    /// Parses a SIP uri. When `parse_params` is `false` parsing stops before
    /// any `;` parameters, which then belong to the surrounding header.
    pub fn parse_uri(&mut self, parse_params: bool) -> Result<Uri> {
        let scheme = if self.remaining()[..].len() >= 5 && self.remaining()[..4].eq_ignore_ascii_case(SIPS) {
            self.idx += 4;
            Scheme::Sips
        } else if self.remaining().len() >= 4 && self.remaining()[..3].eq_ignore_ascii_case(SIP) {
            self.idx += 3;
            Scheme::Sip
        } else {
            return parse_error!("Unsupported uri scheme");
        };
        if self.advance() != Some(b':') {
            return parse_error!("Expected ':' after scheme");
        }

        // The user part is present only if an '@' appears before the end of
        // the uri.
        let has_user = self.remaining().iter().take_while(|&&b| !is_newline(b) && b != b'>' && b != b' ').any(|&b| b == b'@');

        let user = if has_user {
            let user = self.read_while(|b| USER_MAP[b as usize] && b != b';' && b != b':');
            let user = str::from_utf8(user)?;
            let pass = if self.peek() == Some(&b':') {
                self.idx += 1;
                let pass = self.read_while(|b| PASS_MAP[b as usize]);
                Some(str::from_utf8(pass)?)
            } else {
                None
            };
            if self.advance() != Some(b'@') {
                return parse_error!("Expected '@' after user info");
            }
            Some(UserInfo::new(user, pass))
        } else {
            None
        };

        let host_port = self.parse_host_port()?;

        let mut uri = Uri::new(scheme, user, host_port);

        if parse_params {
            let mut transport = None;
            uri.parameters = crate::macros::parse_param!(self, TRANSPORT_PARAM = transport);
            uri.transport_param = transport.map(|t: &str| t.as_bytes().into());
        }

        Ok(uri)
    }

    /*
     * name-addr =  [ display-name ] LAQUOT addr-spec RAQUOT
     * display-name  =  *(token LWS) / quoted-string
     */
    /// Parses a `name-addr` with an optional display name.
    pub fn parse_name_addr(&mut self) -> Result<NameAddr> {
        self.take_ws();

        let display = if self.peek() == Some(&b'"') {
            let display = self.read_quoted()?;
            self.take_ws();
            Some(format!("\"{display}\""))
        } else if self.peek() != Some(&b'<') {
            let display = self.read_until_byte(b'<');
            Some(str::from_utf8(display)?.trim_end().to_string())
        } else {
            None
        };
        let display = display.filter(|d| !d.is_empty());

        if self.advance() != Some(b'<') {
            return parse_error!("Expected '<' in name-addr");
        }
        let uri = self.parse_uri(true)?;
        if self.advance() != Some(b'>') {
            return parse_error!("Expected '>' in name-addr");
        }

        Ok(NameAddr::new(uri, display.as_deref()))
    }

    /// Parses either a `name-addr` or a bare `addr-spec`.
    ///
    /// For a bare `addr-spec` the uri parameters are left unconsumed; per
    /// RFC3261 they belong to the enclosing header.
    pub fn parse_sip_addr(&mut self) -> Result<SipAddr> {
        self.take_ws();

        let rem = self.remaining();
        let is_addr_spec = (rem.len() >= 4 && rem[..4].eq_ignore_ascii_case(b"sip:"))
            || (rem.len() >= 5 && rem[..5].eq_ignore_ascii_case(b"sips:"));

        if is_addr_spec {
            Ok(SipAddr::Uri(self.parse_uri(false)?))
        } else {
            Ok(SipAddr::NameAddr(self.parse_name_addr()?))
        }
    }

    fn parse_start_line(&mut self) -> Result<SipMsg> {
        if self.remaining().starts_with(B_SIPV2) {
            // Status-Line  =  SIP-Version SP Status-Code SP Reason-Phrase CRLF
            self.parse_sip_v2()?;
            self.take_ws();
            let code = self.parse_u32()? as i32;
            self.take_ws();
            let reason = str::from_utf8(self.read_until_newline())?;
            self.take_newline();

            Ok(SipMsg::Response(Response::new(StatusLine::new(code.into(), reason))))
        } else {
            // Request-Line  =  Method SP Request-URI SP SIP-Version CRLF
            let method = SipMethod::from(self.alpha());
            if method == SipMethod::Unknown {
                // Kept so an unsupported request still gets a 405 answer.
                log::debug!("Unknown method in request line");
            }
            self.take_ws();
            let uri = self.parse_uri(true)?;
            self.take_ws();
            self.parse_sip_v2()?;
            self.take_newline();

            Ok(SipMsg::Request(Request::new(RequestLine::new(method, uri))))
        }
    }

    /// Parse a buffer of bytes into a `SipMsg`.
    ///
    /// # Example
    ///
    /// This example parses a simple SIP response message and asserts its
    /// contents:
    ///
    /// ```rust
    /// use softsip::parser::Parser;
    /// use softsip::header::{Header, ContentLength};
    ///
    /// let buf = b"SIP/2.0 200 OK\r\nContent-Length: 0\r\n\r\n";
    /// let parser = &mut Parser::new(buf);
    /// let result = parser.parse_sip_msg().unwrap();
    /// let response = result.as_response().unwrap();
    /// assert_eq!(response.code().into_i32(), 200);
    /// assert_eq!(response.reason(), "OK");
    /// assert_eq!(response.headers.len(), 1);
    /// ```
    pub fn parse_sip_msg(&mut self) -> Result<SipMsg> {
        // Parse the start line of the SIP message and initialize the
        // message with empty headers and body.
        let mut msg = self.parse_start_line()?;

        // Parse headers.
        let headers = msg.headers_mut();

        loop {
            if self.is_eof() {
                break;
            }
            if let Some(&b) = self.peek() {
                if is_newline(b) {
                    // Empty line, the body follows.
                    self.take_newline();
                    break;
                }
            }

            let name = self.read_until_byte(b':');
            let name = name.trim_ascii();
            let Some(b':') = self.advance() else {
                return parse_error!("Missing ':' after header name");
            };
            self.take_ws();

            headers.push(self.parse_header_value(name)?);

            // Anything a header parser left behind on its line (a second
            // comma separated value, an exotic parameter) is skipped so the
            // next line starts clean.
            let rest = self.read_until_newline();
            if !rest.is_empty() {
                log::debug!("Skipping unparsed header tail: {:?}", String::from_utf8_lossy(rest));
            }
            self.take_newline();
        }

        if !self.is_eof() {
            let body = self.remaining();
            msg.set_body(Some(body));
        }

        Ok(msg)
    }

    fn parse_header_value(&mut self, name: &[u8]) -> Result<Header> {
        let header = if Via::matches_name(name) {
            Header::Via(Via::parse(self)?)
        } else if From::matches_name(name) {
            Header::From(From::parse(self)?)
        } else if To::matches_name(name) {
            Header::To(To::parse(self)?)
        } else if CallId::matches_name(name) {
            Header::CallId(CallId::parse(self)?)
        } else if CSeq::matches_name(name) {
            Header::CSeq(CSeq::parse(self)?)
        } else if Contact::matches_name(name) {
            Header::Contact(Contact::parse(self)?)
        } else if MaxForwards::matches_name(name) {
            Header::MaxForwards(MaxForwards::parse(self)?)
        } else if ContentLength::matches_name(name) {
            Header::ContentLength(ContentLength::parse(self)?)
        } else if ContentType::matches_name(name) {
            Header::ContentType(ContentType::parse(self)?)
        } else if Expires::matches_name(name) {
            Header::Expires(Expires::parse(self)?)
        } else if Authorization::matches_name(name) {
            Header::Authorization(Authorization::parse(self)?)
        } else if ProxyAuthorization::matches_name(name) {
            Header::ProxyAuthorization(ProxyAuthorization::parse(self)?)
        } else if WwwAuthenticate::matches_name(name) {
            Header::WwwAuthenticate(WwwAuthenticate::parse(self)?)
        } else if ProxyAuthenticate::matches_name(name) {
            Header::ProxyAuthenticate(ProxyAuthenticate::parse(self)?)
        } else if RecordRoute::matches_name(name) {
            Header::RecordRoute(RecordRoute::parse(self)?)
        } else if Route::matches_name(name) {
            Header::Route(Route::parse(self)?)
        } else if UserAgent::matches_name(name) {
            Header::UserAgent(UserAgent::parse(self)?)
        } else if Allow::matches_name(name) {
            Header::Allow(Allow::parse(self)?)
        } else {
            let name = str::from_utf8(name)?;
            let value = str::from_utf8(self.read_until_newline())?.trim_end();
            Header::Other(OtherHeader::new(name, value))
        };

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::find_map_header;

    const REGISTER_MSG: &[u8] = b"REGISTER sip:registrar.biloxi.com SIP/2.0\r\n\
    Via: SIP/2.0/TCP bobspc.biloxi.com:5060;branch=z9hG4bKnashds7\r\n\
    Max-Forwards: 70\r\n\
    To: Bob <sip:bob@biloxi.com>\r\n\
    From: Bob <sip:bob@biloxi.com>;tag=456248\r\n\
    Call-ID: 843817637684230@998sdasdh09\r\n\
    CSeq: 1826 REGISTER\r\n\
    Contact: <sip:bob@192.0.2.4>\r\n\
    Expires: 7200\r\n\
    Content-Length: 0\r\n\r\n";

    const INVITE_MSG: &[u8] = b"INVITE sip:bob@ex.test SIP/2.0\r\n\
    Via: SIP/2.0/TCP client.ex.test:5060;branch=z9hG4bK74bf9\r\n\
    Max-Forwards: 70\r\n\
    From: Alice <sip:alice@ex.test>;tag=9fxced76sl\r\n\
    To: Bob <sip:bob@ex.test>\r\n\
    Call-ID: 3848276298220188511@ex.test\r\n\
    CSeq: 1 INVITE\r\n\
    Contact: <sip:alice@client.ex.test>\r\n\
    X-Custom-Hint: keep-me\r\n\
    Content-Type: application/sdp\r\n\
    Content-Length: 23\r\n\
    \r\n\
    v=0\r\no=- 0 0 IN IP4 0\r\n";

    #[test]
    fn test_parse_register() {
        let msg = Parser::new(REGISTER_MSG).parse_sip_msg().unwrap();
        let request = msg.as_request().unwrap();

        assert_eq!(request.method(), SipMethod::Register);
        assert_eq!(request.headers.len(), 9);

        let cseq = find_map_header!(request.headers, CSeq).unwrap();
        assert_eq!(cseq.cseq(), 1826);
        assert_eq!(cseq.method(), SipMethod::Register);

        let expires = find_map_header!(request.headers, Expires).unwrap();
        assert_eq!(expires.seconds(), 7200);

        let via = find_map_header!(request.headers, Via).unwrap();
        assert_eq!(via.branch(), Some("z9hG4bKnashds7"));
    }

    #[test]
    fn test_parse_invite_with_body() {
        let msg = Parser::new(INVITE_MSG).parse_sip_msg().unwrap();
        let request = msg.as_request().unwrap();

        assert_eq!(request.method(), SipMethod::Invite);
        assert_eq!(request.body.as_deref(), Some(b"v=0\r\no=- 0 0 IN IP4 0\r\n" as &[u8]));

        let from = find_map_header!(request.headers, From).unwrap();
        assert_eq!(from.tag(), Some("9fxced76sl"));

        let to = find_map_header!(request.headers, To).unwrap();
        assert_eq!(to.tag(), None);

        // Unknown headers survive verbatim.
        let other = request
            .headers
            .iter()
            .find_map(|h| if let Header::Other(o) = h { Some(o) } else { None })
            .unwrap();
        assert_eq!(other.to_string(), "X-Custom-Hint: keep-me");
    }

    #[test]
    fn test_parse_response() {
        let src = b"SIP/2.0 180 Ringing\r\n\
        Via: SIP/2.0/TCP client.ex.test:5060;branch=z9hG4bK74bf9\r\n\
        To: Bob <sip:bob@ex.test>;tag=8321234356\r\n\
        From: Alice <sip:alice@ex.test>;tag=9fxced76sl\r\n\
        Call-ID: 3848276298220188511@ex.test\r\n\
        CSeq: 1 INVITE\r\n\
        Content-Length: 0\r\n\r\n";

        let msg = Parser::new(src).parse_sip_msg().unwrap();
        let response = msg.as_response().unwrap();

        assert_eq!(response.code().into_i32(), 180);
        assert_eq!(response.reason(), "Ringing");

        let to = find_map_header!(response.headers, To).unwrap();
        assert_eq!(to.tag(), Some("8321234356"));
    }

    #[test]
    fn test_round_trip() {
        let msg = Parser::new(INVITE_MSG).parse_sip_msg().unwrap();
        let request = msg.as_request().unwrap();

        let mut serialized = String::new();
        serialized.push_str(&request.req_line.to_string());
        for h in request.headers.iter() {
            serialized.push_str(&format!("{h}\r\n"));
        }
        serialized.push_str("\r\n");
        serialized.push_str(std::str::from_utf8(request.body.as_deref().unwrap()).unwrap());

        assert_eq!(serialized.as_bytes(), INVITE_MSG);
    }

    #[test]
    fn test_malformed_message() {
        let src = b"INVITE not-a-uri SIP/2.0\r\n\r\n";
        assert!(Parser::new(src).parse_sip_msg().is_err());
    }
}
