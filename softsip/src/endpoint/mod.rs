#![warn(missing_docs)]
//! SIP Endpoint

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::{mpsc, Mutex};
use util::DnsResolver;

use crate::config::Config;
use crate::error::Result;
use crate::header::{
    Allow, CSeq, CallId, Header, MaxForwards, To, UserAgent as UserAgentHdr, Via,
    BRANCH_RFC3261_COOKIE,
};
use crate::message::{Host, HostPort, Response, SipMsg, StatusCode, StatusLine, SipMethod, Uri};
use crate::parser::Parser;
use crate::transaction::{ClientTransaction, ServerTransaction, Transactions};
use crate::transport::tcp::TcpConnector;
use crate::transport::{
    CoreHeaders, IncomingRequest, IncomingResponse, OutgoingRequest, OutgoingResponse, ToBytes, Transport,
    TransportEvent, TransportPacket, Transports,
};

mod builder;
mod service;

pub use builder::EndpointBuilder;
pub use service::EndpointService;

struct Inner {
    /// The transport connections of the endpoint.
    transports: Transports,
    /// The transaction layer for the endpoint.
    transactions: Transactions,
    /// The endpoint configuration.
    config: Config,
    /// The capability set advertised in `Allow` headers.
    capabilities: Allow,
    /// The resolver for DNS lookups.
    resolver: DnsResolver,
    /// The list of services registered.
    services: Vec<Box<dyn EndpointService>>,
    /// Producer side of the transport event channel.
    transport_tx: crate::transport::TransportTx,
    /// Consumer side, taken once by [`Endpoint::run`].
    transport_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

#[derive(Clone)]
/// The SIP endpoint.
///
/// An endpoint is a logical entity that can send and receive SIP messages,
/// manage transactions, and interact with various SIP services. The endpoint
/// is responsible for handling incoming requests and responses, as well as
/// sending outgoing messages.
pub struct Endpoint(Arc<Inner>);

impl Endpoint {
    /// Returns a builder to create an `Endpoint`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use softsip::endpoint::EndpointBuilder;
    /// let builder = EndpointBuilder::new().with_name("My Endpoint");
    /// ```
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    /// Runs the endpoint by processing messages from the transport layer.
    ///
    /// This method spawns a Tokio task that runs until every transport
    /// sender is gone.
    pub async fn run(&self) -> Result<()> {
        let rx = {
            let mut guard = self.0.transport_rx.lock().await;
            guard.take()
        };
        let Some(rx) = rx else {
            return Ok(());
        };

        let endpoint = self.clone();
        tokio::spawn(endpoint.receive_loop(rx));

        Ok(())
    }

    async fn receive_loop(self, mut rx: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Created(transport) => {
                    self.0.transports.register(transport);
                }
                TransportEvent::Packet(packet) => {
                    if let Err(err) = self.process_packet(packet).await {
                        log::warn!("Failed to process packet: {:#}", err);
                    }
                }
                TransportEvent::Closed(key) => {
                    self.0.transports.remove(&key);
                    self.0.transactions.on_transport_closed(&key);
                    for service in self.0.services.iter() {
                        if let Err(err) = service.on_transport_closed(&self, &key).await {
                            log::warn!("Service '{}' failed on transport close: {:#}", service.name(), err);
                        }
                    }
                }
            }
        }
    }

    async fn process_packet(&self, packet: TransportPacket) -> Result<()> {
        let TransportPacket { transport, packet } = packet;

        let parsed = Parser::new(&packet.payload).parse_sip_msg();
        let msg = match parsed {
            Ok(msg) => msg,
            Err(err) => {
                // A malformed frame is dropped; the stream itself stays up.
                log::warn!("Dropping malformed frame from {}: {:#}", packet.addr, err);
                for service in self.0.services.iter() {
                    service.on_parse_error(self, packet.addr, &err).await?;
                }
                return Ok(());
            }
        };

        match msg {
            SipMsg::Request(request) => {
                let core = CoreHeaders::extract(&request.headers)?;
                let incoming = IncomingRequest {
                    msg: request,
                    core,
                    transport,
                    packet,
                };
                self.process_request(incoming).await
            }
            SipMsg::Response(response) => {
                let core = CoreHeaders::extract(&response.headers)?;
                let incoming = IncomingResponse {
                    msg: response,
                    core,
                    transport,
                    packet,
                };
                self.process_response(incoming).await
            }
        }
    }

    pub(crate) async fn process_response(&self, msg: IncomingResponse) -> Result<()> {
        log::debug!(
            "<= Response ({} {})",
            msg.msg.status_line.code.into_i32(),
            msg.msg.status_line.reason
        );

        let Some(unmatched) = self.0.transactions.handle_response(msg).await? else {
            return Ok(());
        };

        let mut response = Some(unmatched);
        for service in self.0.services.iter() {
            service.on_incoming_response(self, &mut response).await?;
            if response.is_none() {
                return Ok(());
            }
        }

        if let Some(response) = response {
            log::debug!(
                "Response ({} {}) from /{} was unhandled by any service",
                response.code().into_i32(),
                response.msg.reason(),
                response.packet.addr
            );
        }

        Ok(())
    }

    pub(crate) async fn process_request(&self, msg: IncomingRequest) -> Result<()> {
        log::debug!("<= Request {} from /{}", msg.method(), msg.addr());

        let Some(unmatched) = self.0.transactions.handle_request(msg).await? else {
            return Ok(());
        };

        let mut request = Some(unmatched);
        for service in self.0.services.iter() {
            service.on_incoming_request(self, &mut request).await?;
            if request.is_none() {
                return Ok(());
            }
        }

        if let Some(request) = request {
            self.default_reply(&request).await?;
        }

        Ok(())
    }

    // Requests no service claimed get a protocol-level answer here.
    async fn default_reply(&self, request: &IncomingRequest) -> Result<()> {
        match request.method() {
            SipMethod::Options => {
                let mut response = self.new_response(request, StatusCode::Ok, None);
                response.msg.headers.push(Header::Allow(self.0.capabilities.clone()));
                self.send_response(response).await
            }
            SipMethod::Ack => Ok(()),
            SipMethod::Unknown => {
                let mut response = self.new_response(request, StatusCode::MethodNotAllowed, None);
                response.msg.headers.push(Header::Allow(self.0.capabilities.clone()));
                self.send_response(response).await
            }
            _ => {
                let response =
                    self.new_response(request, StatusCode::CallOrTransactionDoesNotExist, None);
                self.send_response(response).await
            }
        }
    }

    /// Opens (or reuses) the persistent connection towards a SIP edge.
    pub async fn connect(&self, host: &HostPort) -> Result<Transport> {
        let ip = self.resolve_host_to_ip(&host.host).await?;
        let port = host.port.unwrap_or(crate::transport::TransportKind::Tcp.default_port());
        let addr = SocketAddr::new(ip, port);

        if let Some(transport) = self.0.transports.find(addr, crate::transport::TransportKind::Tcp) {
            return Ok(transport);
        }

        let connector = TcpConnector::new(self.0.config.write_timeout);
        let transport = connector.connect(addr, self.0.transport_tx.clone()).await?;
        self.0.transports.register(transport.clone());

        Ok(transport)
    }

    async fn resolve_host_to_ip(&self, host: &Host) -> Result<IpAddr> {
        match host {
            Host::DomainName(domain) => Ok(self.0.resolver.resolve(domain.as_str()).await?),
            Host::IpAddr(ip) => Ok(*ip),
        }
    }

    /// Creates a new SIP response based on an incoming request.
    ///
    /// This method generates a response message with the specified status
    /// code. It also sets the necessary headers from the request, including
    /// Call-ID, From, To, CSeq, and Via headers. Per RFC3261 section 8.2.6.2
    /// a tag is added to the To header for any response above 100 that does
    /// not carry one; pass `local_tag` to control its value when the
    /// response establishes a dialog.
    pub fn new_response(
        &self,
        request: &IncomingRequest,
        code: StatusCode,
        local_tag: Option<&str>,
    ) -> OutgoingResponse {
        let mut headers = crate::header::Headers::with_capacity(8);

        // `Via` headers, topmost first.
        for via in crate::filter_map_header!(request.msg.headers, Via) {
            headers.push(Header::Via(via.clone()));
        }

        // `Record-Route` headers.
        for rr in crate::filter_map_header!(request.msg.headers, RecordRoute) {
            headers.push(Header::RecordRoute(rr.clone()));
        }

        // `From` header.
        headers.push(Header::From(request.core.from.clone()));

        // `To` header.
        let mut to = request.core.to.clone();
        // 8.2.6.2 Headers and Tags
        // The UAS MUST add a tag to the To header field in the response
        // (with the exception of the 100 (Trying) response, in which a tag
        // MAY be present).
        if to.tag().is_none() && code.into_i32() > 100 {
            match local_tag {
                Some(tag) => to.set_tag(Some(tag)),
                None => to.set_tag(Some(&make_tag())),
            }
        }
        headers.push(Header::To(to));

        // `Call-ID` header.
        headers.push(Header::CallId(request.core.call_id.clone()));

        // `CSeq` header.
        headers.push(Header::CSeq(request.core.cseq));

        let status_line = StatusLine::from(code);
        let msg = Response::with_headers(status_line, headers);

        OutgoingResponse {
            msg,
            addr: request.packet.addr,
            transport: request.transport.clone(),
            buf: None,
        }
    }

    /// Sends a SIP response statelessly.
    pub async fn send_response(&self, response: OutgoingResponse) -> Result<()> {
        log::debug!(
            "=> Response {} {}",
            response.status_code().into_i32(),
            response.reason()
        );
        let buf = response.to_bytes()?;
        response.transport.send(&buf).await?;

        Ok(())
    }

    /// Responds statelessly to a request.
    pub async fn respond(&self, request: &IncomingRequest, code: StatusCode) -> Result<()> {
        let response = self.new_response(request, code, None);
        self.send_response(response).await
    }

    /// Creates a new server transaction for an incoming request.
    pub fn new_server_tsx(&self, request: &IncomingRequest) -> Option<ServerTransaction> {
        ServerTransaction::new(&self.0.transactions, request)
    }

    /// Builds an outgoing request with the headers every request carries.
    ///
    /// The Via branch is freshly generated; Contact, Expires, Authorization
    /// and body are the caller's business.
    pub fn new_request(
        &self,
        method: SipMethod,
        target: Uri,
        from: crate::header::From,
        to: To,
        call_id: CallId,
        cseq: u32,
        transport: &Transport,
    ) -> OutgoingRequest {
        let mut request = crate::message::Request::new(crate::message::RequestLine::new(method, target));

        let sent_by: HostPort = transport.addr().into();
        let via = Via::new(transport.kind(), sent_by, Some(&make_branch()));

        request.headers.push(Header::Via(via));
        request.headers.push(Header::MaxForwards(MaxForwards::new(70)));
        request.headers.push(Header::From(from));
        request.headers.push(Header::To(to));
        request.headers.push(Header::CallId(call_id));
        request.headers.push(Header::CSeq(CSeq::new(cseq, method)));
        request
            .headers
            .push(Header::UserAgent(UserAgentHdr::new(&self.0.config.user_agent)));

        OutgoingRequest {
            msg: request,
            addr: transport.remote_addr(),
            transport: transport.clone(),
            buf: None,
        }
    }

    /// Sends a request inside a new client transaction.
    pub async fn send_request(&self, request: OutgoingRequest, timeout: Duration) -> Result<ClientTransaction> {
        ClientTransaction::send(&self.0.transactions, request, timeout).await
    }

    /// Transmits a request outside of any transaction (ACK to a 2xx).
    pub async fn send_raw_request(&self, request: OutgoingRequest) -> Result<()> {
        let buf = request.to_bytes()?;
        log::debug!("=> Request {} ({} bytes)", request.msg.method(), buf.len());
        request.transport.send(&buf).await?;

        Ok(())
    }

    /// Returns the endpoint configuration.
    pub fn config(&self) -> &Config {
        &self.0.config
    }

    /// Returns the capability set advertised in `Allow` headers.
    pub fn capabilities(&self) -> &Allow {
        &self.0.capabilities
    }

    /// Looks a live transport up by its key.
    pub fn transport_for(&self, key: &crate::transport::TransportKey) -> Option<Transport> {
        self.0.transports.get(key)
    }
}

/// Generates a fresh RFC3261 branch parameter.
pub fn make_branch() -> String {
    format!("{}{}", BRANCH_RFC3261_COOKIE, random_alnum(16))
}

/// Generates a fresh dialog tag.
pub fn make_tag() -> String {
    random_alnum(10)
}

/// Generates a fresh Call-ID for the given domain.
pub fn make_call_id(domain: &str) -> CallId {
    CallId::new(&format!("{}@{}", uuid::Uuid::new_v4().simple(), domain))
}

fn random_alnum(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_branch_has_cookie() {
        let branch = make_branch();
        assert!(branch.starts_with(BRANCH_RFC3261_COOKIE));
        assert_eq!(branch.len(), BRANCH_RFC3261_COOKIE.len() + 16);
    }

    #[test]
    fn test_make_tag_is_unique() {
        assert_ne!(make_tag(), make_tag());
    }

    #[test]
    fn test_make_call_id() {
        let cid = make_call_id("ex.test");
        assert!(cid.id().ends_with("@ex.test"));
    }
}
