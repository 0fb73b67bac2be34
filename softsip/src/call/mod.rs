#![warn(missing_docs)]
//! Call state machine.
//!
//! Every call runs as one task consuming a per-call event queue, so SIP
//! signaling, local actions and media events are applied strictly in arrival
//! order. Observers read immutable [`CallInfo`] snapshots through `watch`
//! channels.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::{mpsc, watch};
use util::ArcStr;

use crate::account::AccountKey;
use crate::header::CallId;
use crate::media::MediaEvent;
use crate::message::{SipAddr, StatusCode};
use crate::transport::{IncomingRequest, IncomingResponse};

mod session;

pub(crate) use session::{CallPublisher, CallSession};

use crate::dtmf::DtmfQueue;

/// The direction a call was set up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    /// The peer called us.
    Incoming,
    /// We called the peer.
    Outgoing,
}

/// The detailed state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    /// No call activity yet.
    #[default]
    Idle,
    /// The INVITE is being prepared and sent.
    OutgoingInit,
    /// The server confirmed it is working on the INVITE (100).
    OutgoingProgress,
    /// The remote side is ringing (180/183).
    OutgoingRinging,
    /// An INVITE arrived and we are ringing.
    IncomingReceived,
    /// The session was accepted, media is being wired up.
    Connected,
    /// Audio flows in both directions.
    StreamsRunning,
    /// A hold re-INVITE is in flight.
    Pausing,
    /// The call is on hold.
    Paused,
    /// A resume re-INVITE is in flight.
    Resuming,
    /// The call is being torn down.
    Ending,
    /// The call ended normally.
    Ended,
    /// The call failed; see [`CallErrorReason`].
    Error,
}

impl CallState {
    /// Returns `true` while the call occupies signaling or media resources.
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            CallState::OutgoingProgress
                | CallState::OutgoingRinging
                | CallState::IncomingReceived
                | CallState::Connected
                | CallState::StreamsRunning
                | CallState::Pausing
                | CallState::Paused
                | CallState::Resuming
                | CallState::Ending
        )
    }

    /// Returns `true` once no further transitions are possible.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Error)
    }

    /// Returns `true` while DTMF digits may be transmitted.
    pub const fn accepts_dtmf(&self) -> bool {
        matches!(self, CallState::Connected | CallState::StreamsRunning)
    }

    /// The state name used in transition labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "IDLE",
            CallState::OutgoingInit => "OUTGOING_INIT",
            CallState::OutgoingProgress => "OUTGOING_PROGRESS",
            CallState::OutgoingRinging => "OUTGOING_RINGING",
            CallState::IncomingReceived => "INCOMING_RECEIVED",
            CallState::Connected => "CONNECTED",
            CallState::StreamsRunning => "STREAMS_RUNNING",
            CallState::Pausing => "PAUSING",
            CallState::Paused => "PAUSED",
            CallState::Resuming => "RESUMING",
            CallState::Ending => "ENDING",
            CallState::Ended => "ENDED",
            CallState::Error => "ERROR",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call failed or ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallErrorReason {
    /// Nothing went wrong.
    #[default]
    None,
    /// The peer is busy (486/600).
    Busy,
    /// The peer declined (603).
    Declined,
    /// The destination does not exist (404).
    NotFound,
    /// The destination is currently unreachable (480).
    TemporarilyUnavailable,
    /// No final response arrived in time (408 or local timer).
    RequestTimeout,
    /// The server refused us (403).
    Forbidden,
    /// A server failure (5xx).
    ServerError,
    /// The service is unavailable (503).
    ServiceUnavailable,
    /// The transport died under the call.
    NetworkError,
    /// Credentials were rejected twice.
    AuthenticationFailed,
    /// SDP negotiation failed (488).
    IncompatibleMedia,
    /// We cancelled the call before it was answered (487).
    CancelledLocal,
    /// The call ended with a normal BYE.
    NormalTermination,
    /// Anything else.
    Unknown,
}

impl CallErrorReason {
    /// Classifies a SIP failure code.
    ///
    /// Codes without a dedicated reason fall back to their class: 4xx to the
    /// declined family, 5xx to server errors, 6xx to the busy family.
    pub fn from_status(code: StatusCode) -> Self {
        match code {
            StatusCode::BusyHere | StatusCode::BusyEverywhere => CallErrorReason::Busy,
            StatusCode::Decline => CallErrorReason::Declined,
            StatusCode::NotFound => CallErrorReason::NotFound,
            StatusCode::TemporarilyUnavailable => CallErrorReason::TemporarilyUnavailable,
            StatusCode::RequestTimeout => CallErrorReason::RequestTimeout,
            StatusCode::Forbidden => CallErrorReason::Forbidden,
            StatusCode::ServiceUnavailable => CallErrorReason::ServiceUnavailable,
            StatusCode::NotAcceptableHere => CallErrorReason::IncompatibleMedia,
            StatusCode::RequestTerminated => CallErrorReason::CancelledLocal,
            code if code.class() == 5 => CallErrorReason::ServerError,
            code if code.class() == 6 => CallErrorReason::Busy,
            code if code.class() == 4 => CallErrorReason::Declined,
            _ => CallErrorReason::Unknown,
        }
    }

    /// A short human readable description of the reason.
    pub const fn describe(&self) -> &'static str {
        match self {
            CallErrorReason::None => "No error",
            CallErrorReason::Busy => "The other side is busy",
            CallErrorReason::Declined => "The call was declined",
            CallErrorReason::NotFound => "The destination was not found",
            CallErrorReason::TemporarilyUnavailable => "The destination is temporarily unavailable",
            CallErrorReason::RequestTimeout => "The request timed out",
            CallErrorReason::Forbidden => "The request was forbidden",
            CallErrorReason::ServerError => "The server failed",
            CallErrorReason::ServiceUnavailable => "The service is unavailable",
            CallErrorReason::NetworkError => "The network connection was lost",
            CallErrorReason::AuthenticationFailed => "Authentication failed",
            CallErrorReason::IncompatibleMedia => "The media was not acceptable",
            CallErrorReason::CancelledLocal => "The call was cancelled",
            CallErrorReason::NormalTermination => "The call ended",
            CallErrorReason::Unknown => "Unknown error",
        }
    }
}

/// The hold state of a call, unknown until negotiated once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoldState {
    /// No hold negotiation happened yet.
    #[default]
    Unknown,
    /// We put the call on hold.
    LocalHold,
    /// The call is not on hold.
    NotOnHold,
}

/// An immutable call snapshot, replaced wholesale on every transition.
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// The Call-ID.
    pub call_id: CallId,
    /// The account the call belongs to.
    pub account: AccountKey,
    /// The call direction.
    pub direction: CallDirection,
    /// The detailed state.
    pub state: CallState,
    /// The remote party.
    pub remote: SipAddr,
    /// The hold state.
    pub hold: HoldState,
    /// The last SIP status code observed, if any.
    pub sip_code: Option<i32>,
    /// The last SIP reason phrase observed, if any.
    pub sip_phrase: Option<ArcStr>,
    /// The error classification.
    pub reason: CallErrorReason,
    /// When media started flowing (entry into STREAMS_RUNNING).
    pub started_at: Option<SystemTime>,
}

impl CallInfo {
    /// Milliseconds of running call time, zero before media started.
    pub fn duration_ms(&self) -> u64 {
        self.started_at
            .and_then(|start| start.elapsed().ok())
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// How a finished call is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The call connected and ended normally.
    Success,
    /// An incoming call was never answered.
    Missed,
    /// An incoming call was declined locally.
    Declined,
    /// The call failed or was abandoned.
    Aborted,
}

/// A call log entry, emitted once when a call reaches a terminal state.
#[derive(Debug, Clone)]
pub struct CallLogEntry {
    /// The Call-ID.
    pub id: CallId,
    /// The call direction.
    pub direction: CallDirection,
    /// The called party.
    pub to: SipAddr,
    /// The calling party.
    pub from: SipAddr,
    /// The remote contact, when a dialog formed.
    pub contact: Option<SipAddr>,
    /// When the call was created.
    pub start_time: SystemTime,
    /// Seconds of running call time.
    pub duration_secs: u64,
    /// How the call went.
    pub outcome: CallOutcome,
    /// The local transport address the call used.
    pub local_addr: Option<SocketAddr>,
}

/// A local user decision applied to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    /// Answer an incoming call.
    Accept,
    /// Reject an incoming call.
    Decline,
    /// Tear the call down.
    Hangup,
    /// Put the call on hold.
    Hold,
    /// Take the call off hold.
    Resume,
}

/// Events consumed, in arrival order, by a call's task.
pub(crate) enum CallEvent {
    /// A local action.
    Action(CallAction),
    /// An in-dialog request for this call.
    Request(IncomingRequest),
    /// A response that matched no transaction (a retransmitted 2xx).
    Response(IncomingResponse),
    /// A media engine event.
    Media(MediaEvent),
    /// The transport under the call went down.
    TransportDown,
}

/// A shareable handle to a running call.
#[derive(Clone)]
pub struct Call {
    call_id: CallId,
    account: AccountKey,
    direction: CallDirection,
    events: mpsc::Sender<CallEvent>,
    info: watch::Receiver<CallInfo>,
    dtmf: DtmfQueue,
}

impl Call {
    pub(crate) fn new(
        call_id: CallId,
        account: AccountKey,
        direction: CallDirection,
        events: mpsc::Sender<CallEvent>,
        info: watch::Receiver<CallInfo>,
        dtmf: DtmfQueue,
    ) -> Self {
        Self {
            call_id,
            account,
            direction,
            events,
            info,
            dtmf,
        }
    }

    /// Returns the DTMF queue of this call.
    pub fn dtmf(&self) -> &DtmfQueue {
        &self.dtmf
    }

    /// Returns the Call-ID.
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Returns the owning account.
    pub fn account(&self) -> &AccountKey {
        &self.account
    }

    /// Returns the call direction.
    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    /// Returns the current call snapshot.
    pub fn info(&self) -> CallInfo {
        self.info.borrow().clone()
    }

    /// Subscribes to call snapshots.
    pub fn subscribe(&self) -> watch::Receiver<CallInfo> {
        self.info.clone()
    }

    /// Hands a local action to the call task.
    pub async fn apply(&self, action: CallAction) -> crate::error::Result<()> {
        self.events.send(CallEvent::Action(action)).await?;
        Ok(())
    }

    pub(crate) async fn deliver(&self, event: CallEvent) -> crate::error::Result<()> {
        self.events.send(event).await?;
        Ok(())
    }
}

/// The shared store of live calls, keyed by Call-ID.
///
/// The lock is held only across map operations, never across I/O. There is
/// at most one entry per Call-ID; terminated calls are removed after a grace
/// window absorbing late retransmissions.
#[derive(Default, Clone)]
pub struct CallStore {
    inner: Arc<Mutex<HashMap<CallId, Call>>>,
}

impl CallStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a call; refuses a duplicate Call-ID.
    pub fn insert(&self, call: Call) -> bool {
        let mut map = self.inner.lock().expect("Lock failed");
        if map.contains_key(call.call_id()) {
            return false;
        }
        map.insert(call.call_id().clone(), call);
        true
    }

    /// Looks a call up by Call-ID.
    pub fn get(&self, call_id: &CallId) -> Option<Call> {
        let map = self.inner.lock().expect("Lock failed");
        map.get(call_id).cloned()
    }

    /// Removes a call.
    pub fn remove(&self, call_id: &CallId) -> Option<Call> {
        let mut map = self.inner.lock().expect("Lock failed");
        map.remove(call_id)
    }

    /// Returns the first call that is not terminal, if any.
    pub fn active_call(&self) -> Option<Call> {
        let map = self.inner.lock().expect("Lock failed");
        map.values().find(|call| !call.info().state.is_terminal()).cloned()
    }

    /// Returns every call of the given account.
    pub fn calls_of(&self, account: &AccountKey) -> Vec<Call> {
        let map = self.inner.lock().expect("Lock failed");
        map.values().filter(|call| call.account() == account).cloned().collect()
    }

    /// Returns all live calls.
    pub fn all(&self) -> Vec<Call> {
        let map = self.inner.lock().expect("Lock failed");
        map.values().cloned().collect()
    }

    /// Returns the number of stored calls.
    pub fn len(&self) -> usize {
        let map = self.inner.lock().expect("Lock failed");
        map.len()
    }

    /// Returns `true` when no calls are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_state_set() {
        let active = [
            CallState::OutgoingProgress,
            CallState::OutgoingRinging,
            CallState::IncomingReceived,
            CallState::Connected,
            CallState::StreamsRunning,
            CallState::Pausing,
            CallState::Paused,
            CallState::Resuming,
            CallState::Ending,
        ];
        for state in active {
            assert!(state.is_active(), "{state} should be active");
        }
        for state in [CallState::Idle, CallState::OutgoingInit, CallState::Ended, CallState::Error] {
            assert!(!state.is_active(), "{state} should not be active");
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(CallState::Ended.is_terminal());
        assert!(CallState::Error.is_terminal());
        assert!(!CallState::Ending.is_terminal());
    }

    #[test]
    fn test_reason_classification() {
        assert_eq!(CallErrorReason::from_status(StatusCode::BusyHere), CallErrorReason::Busy);
        assert_eq!(CallErrorReason::from_status(StatusCode::Decline), CallErrorReason::Declined);
        assert_eq!(CallErrorReason::from_status(StatusCode::NotFound), CallErrorReason::NotFound);
        assert_eq!(
            CallErrorReason::from_status(StatusCode::ServiceUnavailable),
            CallErrorReason::ServiceUnavailable
        );
        assert_eq!(
            CallErrorReason::from_status(StatusCode::RequestTerminated),
            CallErrorReason::CancelledLocal
        );

        // Unknown codes classify by class.
        assert_eq!(
            CallErrorReason::from_status(StatusCode::Custom(499)),
            CallErrorReason::Declined
        );
        assert_eq!(
            CallErrorReason::from_status(StatusCode::Custom(599)),
            CallErrorReason::ServerError
        );
        assert_eq!(CallErrorReason::from_status(StatusCode::Custom(699)), CallErrorReason::Busy);
    }
}
