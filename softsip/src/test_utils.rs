//! Shared helpers for unit tests: an in-memory transport that records what
//! the code under test sends, plus canned message fixtures.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bytes::Bytes;

use crate::endpoint::make_branch;
use crate::error::Result;
use crate::header::{CSeq, CallId, Contact, Header, HeaderParse, To, Via};
use crate::message::{
    Request, RequestLine, Response, SipMethod, StatusCode, StatusLine, Uri,
};
use crate::transport::{
    CoreHeaders, IncomingRequest, IncomingResponse, OutgoingRequest, OutgoingResponse, Packet, SipTransport,
    Transport, TransportKind,
};

/// Frames written by the code under test, in send order.
pub type Outbox = Arc<Mutex<Vec<Vec<u8>>>>;

struct MockTransport {
    outbox: Outbox,
    addr: SocketAddr,
    remote_addr: SocketAddr,
}

#[async_trait::async_trait]
impl SipTransport for MockTransport {
    async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.outbox.lock().expect("Lock failed").push(buf.to_vec());
        Ok(buf.len())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn local_name(&self) -> Cow<'_, str> {
        Cow::Owned(self.addr.to_string())
    }

    fn reliable(&self) -> bool {
        true
    }

    fn secure(&self) -> bool {
        false
    }
}

/// Creates a transport that swallows frames into an inspectable outbox.
pub fn mock_transport() -> (Transport, Outbox) {
    let outbox: Outbox = Arc::default();
    let transport = Transport::new(MockTransport {
        outbox: outbox.clone(),
        addr: "127.0.0.1:5060".parse().unwrap(),
        remote_addr: "127.0.0.1:5070".parse().unwrap(),
    });

    (transport, outbox)
}

fn fixture_uri() -> Uri {
    "sip:bob@127.0.0.1:5070".parse().unwrap()
}

fn packet(transport: &Transport) -> Packet {
    Packet {
        payload: Bytes::new(),
        addr: transport.remote_addr(),
        time: SystemTime::now(),
    }
}

/// An outgoing request with the mandatory headers and a fresh branch.
pub fn outgoing_request(method: SipMethod, transport: &Transport) -> OutgoingRequest {
    let mut request = Request::new(RequestLine::new(method, fixture_uri()));

    let via = Via::new_tcp(transport.addr().into(), Some(&make_branch()));
    let from = crate::header::From::with_tag("sip:alice@ex.test".parse().unwrap(), "9fxced76sl");
    let to = To::new("sip:bob@ex.test".parse().unwrap());

    request.headers.push(Header::Via(via));
    request.headers.push(Header::From(from));
    request.headers.push(Header::To(to));
    request.headers.push(Header::CallId(CallId::new("bs9ki9iqbee8k5kal8mpqb")));
    request.headers.push(Header::CSeq(CSeq::new(1, method)));

    OutgoingRequest {
        msg: request,
        addr: transport.remote_addr(),
        transport: transport.clone(),
        buf: None,
    }
}

/// An incoming request as the transport layer would deliver it.
pub fn incoming_request(method: SipMethod, transport: &Transport) -> IncomingRequest {
    let via = Via::from_bytes(b"SIP/2.0/TCP 127.0.0.1:5070;branch=z9hG4bK3060200").unwrap();
    let from = crate::header::From::with_tag("sip:bob@ex.test".parse().unwrap(), "456248");
    let to = To::new("sip:alice@ex.test".parse().unwrap());
    let call_id = CallId::new("bs9ki9iqbee8k5kal8mpqb");
    let cseq = CSeq::new(1, method);

    let mut request = Request::new(RequestLine::new(method, fixture_uri()));
    request.headers.push(Header::Via(via.clone()));
    request.headers.push(Header::From(from.clone()));
    request.headers.push(Header::To(to.clone()));
    request.headers.push(Header::CallId(call_id.clone()));
    request.headers.push(Header::CSeq(cseq));
    request
        .headers
        .push(Header::Contact(Contact::new("sip:bob@127.0.0.1:5070".parse().unwrap())));

    IncomingRequest {
        msg: request,
        core: CoreHeaders {
            via,
            from,
            to,
            call_id,
            cseq,
        },
        transport: transport.clone(),
        packet: packet(transport),
    }
}

/// An incoming response matching the [`outgoing_request`] fixture.
pub fn incoming_response(code: StatusCode, transport: &Transport) -> IncomingResponse {
    let via = Via::from_bytes(b"SIP/2.0/TCP 127.0.0.1:5060;branch=z9hG4bK3060200").unwrap();
    let from = crate::header::From::with_tag("sip:alice@ex.test".parse().unwrap(), "9fxced76sl");
    let to = To::with_tag("sip:bob@ex.test".parse().unwrap(), "8321234356");
    let call_id = CallId::new("bs9ki9iqbee8k5kal8mpqb");
    let cseq = CSeq::new(1, SipMethod::Invite);

    let mut response = Response::new(StatusLine::from(code));
    response.headers.push(Header::Via(via.clone()));
    response.headers.push(Header::From(from.clone()));
    response.headers.push(Header::To(to.clone()));
    response.headers.push(Header::CallId(call_id.clone()));
    response.headers.push(Header::CSeq(cseq));
    response
        .headers
        .push(Header::Contact(Contact::new("sip:bob@127.0.0.1:5070".parse().unwrap())));

    IncomingResponse {
        msg: response,
        core: CoreHeaders {
            via,
            from,
            to,
            call_id,
            cseq,
        },
        transport: transport.clone(),
        packet: packet(transport),
    }
}

/// A response to an incoming request, headers copied the way the endpoint
/// builds them.
pub fn new_response(request: &IncomingRequest, code: StatusCode) -> OutgoingResponse {
    let mut response = Response::new(StatusLine::from(code));

    response.headers.push(Header::Via(request.core.via.clone()));
    response.headers.push(Header::From(request.core.from.clone()));

    let mut to = request.core.to.clone();
    if to.tag().is_none() && code.into_i32() > 100 {
        to.set_tag(Some("mock-tag"));
    }
    response.headers.push(Header::To(to));
    response.headers.push(Header::CallId(request.core.call_id.clone()));
    response.headers.push(Header::CSeq(request.core.cseq));

    OutgoingResponse {
        msg: response,
        addr: request.packet.addr,
        transport: request.transport.clone(),
        buf: None,
    }
}
