use util::ArcStr;

use crate::error::{Error, Result};
use crate::find_map_header;
use crate::message::SipMethod;
use crate::transport::{IncomingRequest, IncomingResponse, OutgoingRequest};

/// The possible roles of a SIP Transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// (User Agent Client): The entity that initiates the request.
    Uac,
    /// (User Agent Server): The entity that responds to the request.
    Uas,
}

/// The key used to match messages to transactions.
///
/// RFC3261 transaction matching for this user agent reduces to the branch
/// parameter of the topmost `Via` plus the `CSeq` method, since every branch
/// we generate carries the `z9hG4bK` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TsxKey {
    branch: ArcStr,
    method: SipMethod,
    role: Role,
}

impl TsxKey {
    /// Creates a client transaction key.
    pub fn client(branch: &str, method: SipMethod) -> Self {
        Self {
            branch: branch.into(),
            method: key_method(method),
            role: Role::Uac,
        }
    }

    /// Creates a server transaction key.
    pub fn server(branch: &str, method: SipMethod) -> Self {
        Self {
            branch: branch.into(),
            method: key_method(method),
            role: Role::Uas,
        }
    }

    /// Derives the client key of an outgoing request.
    pub fn from_outgoing(request: &OutgoingRequest) -> Result<Self> {
        let via = find_map_header!(request.msg.headers, Via)
            .ok_or(Error::MissingRequiredHeader("Via"))?;
        let branch = via.branch().ok_or(Error::MissingRequiredHeader("Via branch"))?;

        Ok(Self::client(branch, request.msg.method()))
    }

    /// Derives the server key of an incoming request.
    pub fn from_incoming(request: &IncomingRequest) -> Option<Self> {
        let branch = request.core.via.branch()?;

        Some(Self::server(branch, request.method()))
    }

    /// Derives the client key an incoming response matches against.
    pub fn from_response(response: &IncomingResponse) -> Option<Self> {
        let branch = response.core.via.branch()?;

        Some(Self::client(branch, response.core.cseq.method()))
    }
}

// An ACK for a non-2xx final response arrives on the INVITE branch and
// belongs to the INVITE transaction. (The ACK for a 2xx carries a fresh
// branch and never matches here.)
fn key_method(method: SipMethod) -> SipMethod {
    match method {
        SipMethod::Ack => SipMethod::Invite,
        m => m,
    }
}
