//! SIP Dialogs.
//!
//! A dialog is the peer-to-peer relationship created by an INVITE, keyed by
//! Call-ID plus the two tags. It owns the CSeq counters, the remote target
//! and the route set every in-dialog request is built from.
//!
//! ```text
//! UAC (Caller)                 UAS (Receiver)
//!     |--- INVITE ----------->|    // Request to establish a session
//!     |<--- 180 Ringing ------|    // Indicates ringing (early dialog)
//!     |<--- 200 OK -----------|    // Session accepted, dialog confirmed
//!     |--- ACK -------------->|    // Confirms receipt of 200 OK
//!     |--- BYE -------------->|    // Terminates the session
//!     |<--- 200 OK -----------|    // Confirms termination
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use util::ArcStr;

use crate::endpoint::{make_branch, Endpoint};
use crate::error::{Error, Result};
use crate::find_map_header;
use crate::header::{CSeq, CallId, Header, HeaderParse, MaxForwards, Route, To, Via};
use crate::message::{Request, RequestLine, SipAddr, SipMethod, Uri};
use crate::transport::{IncomingRequest, IncomingResponse, OutgoingRequest, Transport};

/// Unique identifier of a SIP dialog (Call-ID + local tag + remote tag).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    /// The Call-ID shared by both sides.
    pub call_id: CallId,
    /// The tag this side generated.
    pub local_tag: ArcStr,
    /// The tag the peer generated.
    pub remote_tag: ArcStr,
}

struct Inner {
    id: DialogId,
    // Local identity, placed in From of requests we send.
    local: crate::header::From,
    // Remote identity, placed in To of requests we send.
    remote: To,
    // Next CSeq to use locally is last + 1.
    local_seq: AtomicU32,
    // Last CSeq seen from the peer.
    remote_seq: AtomicU32,
    // Where in-dialog requests are sent (the peer's Contact).
    remote_target: Mutex<Uri>,
    // Route set captured when the dialog formed, already in sending order.
    route_set: Vec<SipAddr>,
    // The connection the dialog lives on.
    transport: Transport,
}

/// Represents a SIP Dialog.
#[derive(Clone)]
pub struct Dialog {
    inner: Arc<Inner>,
}

impl Dialog {
    /// Forms a dialog on the UAC side from the INVITE and the first response
    /// that carries a To tag.
    ///
    /// The route set is the reversed Record-Route of that response; the
    /// remote target is its Contact.
    pub fn new_uac(invite: &Request, response: &IncomingResponse, transport: Transport) -> Result<Dialog> {
        let local = find_map_header!(invite.headers, From)
            .cloned()
            .ok_or(Error::MissingRequiredHeader(crate::header::From::NAME))?;
        let local_tag: ArcStr = local
            .tag()
            .ok_or(Error::MissingRequiredHeader("From tag"))?
            .into();

        let remote = response.core.to.clone();
        let remote_tag: ArcStr = remote
            .tag()
            .ok_or(Error::MissingRequiredHeader("To tag"))?
            .into();

        let cseq = find_map_header!(invite.headers, CSeq)
            .copied()
            .ok_or(Error::MissingRequiredHeader(CSeq::NAME))?;

        let remote_target = find_map_header!(response.msg.headers, Contact)
            .map(|c| c.addr.uri().clone())
            .unwrap_or_else(|| invite.req_line.uri.clone());

        Ok(Dialog {
            inner: Arc::new(Inner {
                id: DialogId {
                    call_id: response.core.call_id.clone(),
                    local_tag,
                    remote_tag,
                },
                local,
                remote,
                local_seq: AtomicU32::new(cseq.cseq()),
                remote_seq: AtomicU32::new(0),
                remote_target: Mutex::new(remote_target),
                route_set: response.route_set(),
                transport,
            }),
        })
    }

    /// Forms a dialog on the UAS side from an incoming INVITE and the local
    /// tag our first non-100 response carries.
    ///
    /// The route set is the Record-Route of the request in message order;
    /// the remote target is the request's Contact.
    pub fn new_uas(request: &IncomingRequest, local_tag: &str) -> Result<Dialog> {
        let method = request.method();
        if !method.can_establish_a_dialog() {
            return Err(Error::InvalidDialogMethod(method));
        }

        let remote_from = request.core.from.clone();
        let remote_tag: ArcStr = remote_from
            .tag()
            .ok_or(Error::MissingRequiredHeader("From tag"))?
            .into();

        // Our identity is the To of the INVITE plus the tag we answer with.
        let local = crate::header::From::with_tag(request.core.to.addr.clone(), local_tag);
        // The peer's identity keeps its From tag.
        let remote = To::with_tag(remote_from.addr.clone(), &remote_tag);

        let remote_target = find_map_header!(request.msg.headers, Contact)
            .map(|c| c.addr.uri().clone())
            .ok_or(Error::MissingRequiredHeader("Contact"))?;

        Ok(Dialog {
            inner: Arc::new(Inner {
                id: DialogId {
                    call_id: request.core.call_id.clone(),
                    local_tag: local_tag.into(),
                    remote_tag,
                },
                local,
                remote,
                local_seq: AtomicU32::new(0),
                remote_seq: AtomicU32::new(request.core.cseq.cseq()),
                remote_target: Mutex::new(remote_target),
                route_set: request.record_route(),
                transport: request.transport.clone(),
            }),
        })
    }

    /// Returns the dialog id.
    pub fn id(&self) -> &DialogId {
        &self.inner.id
    }

    /// Returns the transport the dialog lives on.
    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    /// Returns the last CSeq number used locally.
    pub fn local_cseq(&self) -> u32 {
        self.inner.local_seq.load(Ordering::Relaxed)
    }

    /// Records the CSeq of a request received from the peer.
    ///
    /// Returns `false` when the number went backwards, which the caller
    /// answers with `500` per RFC3261 section 12.2.2.
    pub fn check_remote_cseq(&self, cseq: u32) -> bool {
        let last = self.inner.remote_seq.load(Ordering::Relaxed);
        if cseq < last {
            return false;
        }
        self.inner.remote_seq.store(cseq, Ordering::Relaxed);
        true
    }

    /// Replaces the remote target after a re-INVITE updated the Contact.
    pub fn set_remote_target(&self, target: Uri) {
        let mut guard = self.inner.remote_target.lock().expect("Lock failed");
        *guard = target;
    }

    /// Builds an in-dialog request.
    ///
    /// The request goes to the remote target, carries the captured route set
    /// and bumps the local CSeq.
    pub fn new_request(&self, endpoint: &Endpoint, method: SipMethod) -> OutgoingRequest {
        let cseq = self.inner.local_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.build_request(endpoint, method, cseq)
    }

    /// Builds the ACK for a 2xx response.
    ///
    /// The ACK is its own transaction: fresh branch, same CSeq number as the
    /// INVITE with the method replaced, routed like any other in-dialog
    /// request.
    pub fn new_ack(&self, endpoint: &Endpoint, invite_cseq: u32) -> OutgoingRequest {
        self.build_request(endpoint, SipMethod::Ack, invite_cseq)
    }

    fn build_request(&self, endpoint: &Endpoint, method: SipMethod, cseq: u32) -> OutgoingRequest {
        let target = {
            let guard = self.inner.remote_target.lock().expect("Lock failed");
            guard.clone()
        };

        let mut request = Request::new(RequestLine::new(method, target));

        let sent_by = self.inner.transport.addr().into();
        let via = Via::new(self.inner.transport.kind(), sent_by, Some(&make_branch()));

        request.headers.push(Header::Via(via));
        request.headers.push(Header::MaxForwards(MaxForwards::new(70)));
        request.headers.push(Header::From(self.inner.local.clone()));
        request.headers.push(Header::To(self.inner.remote.clone()));
        request.headers.push(Header::CallId(self.inner.id.call_id.clone()));
        request.headers.push(Header::CSeq(CSeq::new(cseq, method)));
        for route in &self.inner.route_set {
            request.headers.push(Header::Route(Route::new(route.clone())));
        }
        request.headers.push(Header::UserAgent(crate::header::UserAgent::new(
            &endpoint.config().user_agent,
        )));

        OutgoingRequest {
            msg: request,
            addr: self.inner.transport.remote_addr(),
            transport: self.inner.transport.clone(),
            buf: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StatusCode;
    use crate::test_utils::{incoming_request, incoming_response, mock_transport, outgoing_request};

    #[tokio::test]
    async fn test_uas_dialog_from_invite() {
        let (transport, _outbox) = mock_transport();
        let invite = incoming_request(SipMethod::Invite, &transport);

        let dialog = Dialog::new_uas(&invite, "local-tag-1").unwrap();

        assert_eq!(dialog.id().local_tag, "local-tag-1");
        assert_eq!(dialog.id().remote_tag, "456248");
        assert!(dialog.check_remote_cseq(invite.core.cseq.cseq() + 1));
        assert!(!dialog.check_remote_cseq(1));
    }

    #[tokio::test]
    async fn test_uas_dialog_rejects_non_invite() {
        let (transport, _outbox) = mock_transport();
        let register = incoming_request(SipMethod::Register, &transport);

        assert!(Dialog::new_uas(&register, "tag").is_err());
    }

    #[tokio::test]
    async fn test_uac_dialog_cseq_increments() {
        let (transport, _outbox) = mock_transport();
        let endpoint = Endpoint::builder().build();
        let invite = outgoing_request(SipMethod::Invite, &transport);
        let response = incoming_response(StatusCode::Ok, &transport);

        let dialog = Dialog::new_uac(&invite.msg, &response, transport).unwrap();
        let invite_cseq = dialog.local_cseq();

        let bye = dialog.new_request(&endpoint, SipMethod::Bye);
        let cseq = find_map_header!(bye.msg.headers, CSeq).unwrap();
        assert_eq!(cseq.cseq(), invite_cseq + 1);
        assert_eq!(cseq.method(), SipMethod::Bye);

        // The ACK reuses the INVITE CSeq number.
        let ack = dialog.new_ack(&endpoint, invite_cseq);
        let cseq = find_map_header!(ack.msg.headers, CSeq).unwrap();
        assert_eq!(cseq.cseq(), invite_cseq);
        assert_eq!(cseq.method(), SipMethod::Ack);
    }
}
