use std::net::SocketAddr;

use crate::error::{Error, Result};
use crate::transport::{IncomingRequest, IncomingResponse, TransportKey};
use crate::Endpoint;

/// A trait which provides a way to extend the SIP endpoint functionalities.
///
/// Services are offered messages in registration order; a service claims a
/// message by `take()`-ing it out of the option, which stops the chain.
#[async_trait::async_trait]
#[allow(unused_variables)]
pub trait EndpointService: Sync + Send + 'static {
    /// Returns the service name.
    fn name(&self) -> &str;

    /// Called when an inbound SIP request was not claimed by the transaction
    /// layer.
    async fn on_incoming_request(
        &self,
        endpoint: &Endpoint,
        request: &mut Option<IncomingRequest>,
    ) -> Result<()> {
        Ok(())
    }

    /// Called when an inbound SIP response did not match a transaction.
    async fn on_incoming_response(
        &self,
        endpoint: &Endpoint,
        response: &mut Option<IncomingResponse>,
    ) -> Result<()> {
        Ok(())
    }

    /// Called when a transport connection went down.
    async fn on_transport_closed(&self, endpoint: &Endpoint, key: &TransportKey) -> Result<()> {
        Ok(())
    }

    /// Called when an inbound frame could not be parsed.
    async fn on_parse_error(&self, endpoint: &Endpoint, addr: SocketAddr, error: &Error) -> Result<()> {
        Ok(())
    }
}
