#![warn(missing_docs)]
//! SIP Transport Layer.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::header::{CSeq, CallId, ContentLength, From as FromHdr, Header, HeaderParse, To, Via};
use crate::message::{Request, Response, StatusCode};
use crate::{find_map_header, filter_map_header};

mod decoder;

pub mod tcp;

pub(crate) use decoder::StreamingDecoder;

/// The channel used to hand transport events to the endpoint.
pub type TransportTx = mpsc::Sender<TransportEvent>;

/// This trait represents a abstraction over a SIP transport implementation.
#[async_trait::async_trait]
pub trait SipTransport: Send + Sync + 'static {
    /// Sends a buffer over this transport.
    ///
    /// Returns the number of bytes sent or an I/O error.
    async fn send(&self, buf: &[u8]) -> Result<usize>;

    /// Returns the transport kind (e.g., TCP, TLS).
    fn kind(&self) -> TransportKind;

    /// Returns the local socket address bound to this transport.
    fn addr(&self) -> SocketAddr;

    /// Returns the remote socket address this transport is connected to.
    fn remote_addr(&self) -> SocketAddr;

    /// Returns the local transport name.
    fn local_name(&self) -> Cow<'_, str>;

    /// Returns `true` if the transport is reliable (e.g., TCP or TLS).
    fn reliable(&self) -> bool;

    /// Returns `true` if the transport is secure (e.g., TLS).
    fn secure(&self) -> bool;
}

/// Represents a reference-counted handle to a transport implementation.
#[derive(Clone)]
pub struct Transport(Arc<dyn SipTransport>);

impl Transport {
    /// Creates a new transport handle.
    pub fn new(transport: impl SipTransport) -> Self {
        Self(Arc::new(transport))
    }

    /// Sends a buffer over this transport.
    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.0.send(buf).await
    }

    /// Returns the transport kind.
    pub fn kind(&self) -> TransportKind {
        self.0.kind()
    }

    /// Returns the local socket address.
    pub fn addr(&self) -> SocketAddr {
        self.0.addr()
    }

    /// Returns the remote socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.0.remote_addr()
    }

    /// Returns `true` if the transport is reliable.
    pub fn reliable(&self) -> bool {
        self.0.reliable()
    }

    /// Returns `true` if the transport is secure.
    pub fn secure(&self) -> bool {
        self.0.secure()
    }

    /// Returns the key that uniquely identifies this transport connection.
    pub fn key(&self) -> TransportKey {
        TransportKey::new(self.remote_addr(), self.kind())
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("kind", &self.kind())
            .field("addr", &self.addr())
            .field("remote_addr", &self.remote_addr())
            .finish()
    }
}

const TCP: &str = "TCP";
const TLS: &str = "TLS";
const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
/// An SIP Transport Protocol.
pub enum TransportKind {
    #[default]
    /// `TCP` transport.
    Tcp,
    /// `TLS` transport.
    Tls,
    /// UNKNOWN transport.
    Unknown,
}

impl TransportKind {
    /// Returns the default port number associated with the transport protocol.
    #[inline]
    pub const fn default_port(&self) -> u16 {
        match self {
            TransportKind::Tcp => 5060,
            TransportKind::Tls => 5061,
            TransportKind::Unknown => 0,
        }
    }

    /// Returns the transport string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => TCP,
            TransportKind::Tls => TLS,
            TransportKind::Unknown => UNKNOWN,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TransportKind {
    fn from(s: &str) -> Self {
        s.as_bytes().into()
    }
}

impl From<&[u8]> for TransportKind {
    fn from(b: &[u8]) -> Self {
        match b {
            b"TCP" | b"tcp" => TransportKind::Tcp,
            b"TLS" | b"tls" => TransportKind::Tls,
            _ => TransportKind::Unknown,
        }
    }
}

/// This type represents a key used to identify a transport connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TransportKey {
    /// The remote socket address of the transport.
    addr: SocketAddr,
    /// The transport kind (e.g., TCP, TLS).
    kind: TransportKind,
}

impl TransportKey {
    /// Creates a new `TransportKey`.
    pub fn new(addr: SocketAddr, kind: TransportKind) -> Self {
        TransportKey { addr, kind }
    }

    /// Returns the remote address of the keyed connection.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// This type represents a SIP packet.
#[derive(Debug, Clone)]
pub struct Packet {
    /// The packet payload.
    pub payload: Bytes,
    /// The address of the sender.
    pub addr: SocketAddr,
    /// The time the packet was received.
    pub time: SystemTime,
}

/// A packet received together with the transport it arrived on.
#[derive(Debug)]
pub struct TransportPacket {
    /// The transport the packet arrived on.
    pub transport: Transport,
    /// The packet itself.
    pub packet: Packet,
}

/// Events emitted by transports towards the endpoint.
#[derive(Debug)]
pub enum TransportEvent {
    /// A new transport connection was established.
    Created(Transport),
    /// A packet arrived on a transport.
    Packet(TransportPacket),
    /// A transport connection was closed.
    Closed(TransportKey),
}

/// The collection of live transport connections.
///
/// Each registered account keeps one persistent connection to its SIP edge;
/// this registry maps remote addresses to those connections.
#[derive(Default, Clone)]
pub struct Transports {
    inner: Arc<Mutex<HashMap<TransportKey, Transport>>>,
}

impl Transports {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a transport to the registry.
    pub fn register(&self, transport: Transport) {
        let mut map = self.inner.lock().expect("Lock failed");
        map.insert(transport.key(), transport);
    }

    /// Removes a transport from the registry.
    pub fn remove(&self, key: &TransportKey) -> Option<Transport> {
        let mut map = self.inner.lock().expect("Lock failed");
        map.remove(key)
    }

    /// Finds the transport connected to the given remote address.
    pub fn find(&self, addr: SocketAddr, kind: TransportKind) -> Option<Transport> {
        let map = self.inner.lock().expect("Lock failed");
        map.get(&TransportKey::new(addr, kind)).cloned()
    }

    /// Finds a transport by its key.
    pub fn get(&self, key: &TransportKey) -> Option<Transport> {
        let map = self.inner.lock().expect("Lock failed");
        map.get(key).cloned()
    }
}

/// This trait is used to convert a type into a byte buffer.
pub trait ToBytes: Sized {
    /// Converts the type into a byte buffer.
    fn to_bytes(&self) -> Result<Bytes>;
}

/// This type represents an outbound SIP request.
pub struct OutgoingRequest {
    /// The SIP request message.
    pub msg: Request,
    /// The addr to send the request to.
    pub addr: SocketAddr,
    /// The transport to use for sending the request.
    pub transport: Transport,
    /// The message raw buffer.
    pub buf: Option<Bytes>,
}

impl ToBytes for OutgoingRequest {
    fn to_bytes(&self) -> Result<Bytes> {
        encode_msg(
            &self.msg.req_line.to_string(),
            &self.msg.headers,
            self.msg.body.as_deref(),
        )
    }
}

/// This type represents an outgoing SIP response.
pub struct OutgoingResponse {
    /// The SIP response message.
    pub msg: Response,
    /// The address to send the response to.
    pub addr: SocketAddr,
    /// The transport to use for sending the response.
    pub transport: Transport,
    /// The message raw buffer.
    pub buf: Option<Bytes>,
}

impl OutgoingResponse {
    /// Returns the message status code.
    pub fn status_code(&self) -> StatusCode {
        self.msg.status_line.code
    }

    /// Returns the message reason text.
    pub fn reason(&self) -> &str {
        &self.msg.status_line.reason
    }

    /// Returns `true` if this is a provisional response.
    pub fn is_provisional(&self) -> bool {
        self.msg.status_line.code.is_provisional()
    }

    /// Set the message body and its content type header.
    pub fn set_body(&mut self, body: &[u8], content_type: crate::header::MediaType) {
        self.msg.headers.push(Header::ContentType(crate::header::ContentType::new(content_type)));
        self.msg.set_body(body);
    }
}

impl ToBytes for OutgoingResponse {
    fn to_bytes(&self) -> Result<Bytes> {
        encode_msg(
            &self.msg.status_line.to_string(),
            &self.msg.headers,
            self.msg.body.as_deref(),
        )
    }
}

fn encode_msg(start_line: &str, headers: &crate::header::Headers, body: Option<&[u8]>) -> Result<Bytes> {
    let estimated_message_size = if body.is_none() { 800 } else { 1500 };
    let buf = BytesMut::with_capacity(estimated_message_size);

    let mut buf_writer = buf.writer();

    write!(buf_writer, "{start_line}")?;

    for header in headers.iter() {
        write!(buf_writer, "{header}\r\n")?;
    }

    // The decoder on the other side frames on Content-Length, write one if
    // the builder did not.
    let has_content_length = headers.iter().any(|h| matches!(h, Header::ContentLength(_)));
    if !has_content_length {
        let len = body.map_or(0, |b| b.len());
        write!(buf_writer, "{}: {}\r\n", ContentLength::NAME, len)?;
    }

    write!(buf_writer, "\r\n")?;
    if let Some(body) = body {
        buf_writer.write_all(body)?;
    }

    Ok(buf_writer.into_inner().freeze())
}

/// The mandatory headers every incoming message must carry.
#[derive(Debug, Clone)]
pub struct CoreHeaders {
    /// The topmost `Via` header.
    pub via: Via,
    /// The `From` header.
    pub from: FromHdr,
    /// The `To` header.
    pub to: To,
    /// The `Call-ID` header.
    pub call_id: CallId,
    /// The `CSeq` header.
    pub cseq: CSeq,
}

impl CoreHeaders {
    /// Extracts the mandatory headers from a header list.
    pub fn extract(headers: &crate::header::Headers) -> Result<Self> {
        let via = find_map_header!(headers, Via)
            .cloned()
            .ok_or(crate::error::Error::MissingRequiredHeader(Via::NAME))?;
        let from = find_map_header!(headers, From)
            .cloned()
            .ok_or(crate::error::Error::MissingRequiredHeader(FromHdr::NAME))?;
        let to = find_map_header!(headers, To)
            .cloned()
            .ok_or(crate::error::Error::MissingRequiredHeader(To::NAME))?;
        let call_id = find_map_header!(headers, CallId)
            .cloned()
            .ok_or(crate::error::Error::MissingRequiredHeader(CallId::NAME))?;
        let cseq = find_map_header!(headers, CSeq)
            .copied()
            .ok_or(crate::error::Error::MissingRequiredHeader(CSeq::NAME))?;

        Ok(Self {
            via,
            from,
            to,
            call_id,
            cseq,
        })
    }
}

/// This type represents an incoming SIP request.
pub struct IncomingRequest {
    /// The SIP request message.
    pub msg: Request,
    /// The mandatory request headers.
    pub core: CoreHeaders,
    /// The transport the request arrived on.
    pub transport: Transport,
    /// The packet the request was parsed from.
    pub packet: Packet,
}

impl IncomingRequest {
    /// Returns the request method.
    pub fn method(&self) -> crate::message::SipMethod {
        self.msg.method()
    }

    /// Returns the address the request came from.
    pub fn addr(&self) -> SocketAddr {
        self.packet.addr
    }

    /// Returns the request Call-ID.
    pub fn call_id(&self) -> &CallId {
        &self.core.call_id
    }

    /// Returns the route set recorded by proxies on the path, in message
    /// order.
    pub fn record_route(&self) -> Vec<crate::message::SipAddr> {
        filter_map_header!(self.msg.headers, RecordRoute)
            .map(|rr| rr.addr.clone())
            .collect()
    }
}

/// This type represents an incoming SIP response.
#[derive(Debug)]
pub struct IncomingResponse {
    /// The SIP response message.
    pub msg: Response,
    /// The mandatory response headers.
    pub core: CoreHeaders,
    /// The transport the response arrived on.
    pub transport: Transport,
    /// The packet the response was parsed from.
    pub packet: Packet,
}

impl IncomingResponse {
    /// Returns the response status code.
    pub fn code(&self) -> StatusCode {
        self.msg.code()
    }

    /// Returns the response Call-ID.
    pub fn call_id(&self) -> &CallId {
        &self.core.call_id
    }

    /// Returns the route set recorded by proxies on the path, reversed into
    /// sending order for a UAC.
    pub fn route_set(&self) -> Vec<crate::message::SipAddr> {
        let mut set: Vec<_> = filter_map_header!(self.msg.headers, RecordRoute)
            .map(|rr| rr.addr.clone())
            .collect();
        set.reverse();
        set
    }
}
