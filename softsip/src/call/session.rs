use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, watch};

use super::{
    Call, CallAction, CallDirection, CallErrorReason, CallEvent, CallInfo, CallLogEntry, CallOutcome, CallState,
    CallStore, HoldState,
};
use crate::account::AccountConfig;
use crate::dialog::Dialog;
use crate::dtmf::{spawn_drainer, DtmfQueue};
use crate::endpoint::{make_call_id, make_tag, Endpoint};
use crate::error::{Error, Result};
use crate::find_map_header;
use crate::header::{Contact, ContentType, Header, MediaType};
use crate::media::{MediaConnectionState, MediaEngine, MediaEvent, MediaSession, SdpKind};
use crate::message::{SipAddr, SipMethod, StatusCode};
use crate::sdp::{self, SdpDirection};
use crate::transaction::{ClientTransaction, ServerTransaction};
use crate::transport::{IncomingRequest, IncomingResponse, Transport};

/// Callbacks the call machinery publishes through; owned by the user agent.
pub(crate) struct CallPublisher {
    /// Latest call snapshot.
    pub info: watch::Sender<Option<CallInfo>>,
    /// Latest transition label, `"FROM→TO (reason)"`.
    pub transition: watch::Sender<Option<String>>,
    /// Call log entries for external persistence.
    pub log: mpsc::UnboundedSender<CallLogEntry>,
}

/// The per-call state machine task.
///
/// All events of one call funnel through one mpsc consumer, so transitions
/// never interleave. Snapshot readers go through the `watch` channel and see
/// each state exactly as published.
pub(crate) struct CallSession {
    endpoint: Endpoint,
    store: CallStore,
    publisher: Arc<CallPublisher>,
    media: Arc<dyn MediaSession>,
    events_rx: mpsc::Receiver<CallEvent>,
    info_tx: watch::Sender<CallInfo>,
    info: CallInfo,
    account: AccountConfig,
    transport: Transport,
    dtmf: DtmfQueue,

    dialog: Option<Dialog>,
    /// The INVITE that created the call, kept verbatim for CANCEL and ACK
    /// construction.
    invite: Option<crate::message::Request>,
    invite_cseq: u32,
    server_tsx: Option<ServerTransaction>,
    incoming_invite: Option<IncomingRequest>,
    local_tag: String,
    local_sdp: Option<String>,
    remote_sdp: Option<String>,

    created_at: SystemTime,
    answered: bool,
    declined: bool,
}

impl CallSession {
    /// Creates and spawns an outgoing call towards `destination`.
    pub(crate) fn spawn_outgoing(
        endpoint: Endpoint,
        store: CallStore,
        publisher: Arc<CallPublisher>,
        engine: &dyn MediaEngine,
        account: AccountConfig,
        transport: Transport,
        destination: SipAddr,
    ) -> Result<Call> {
        let call_id = make_call_id(&account.domain);
        let (session, call) = Self::new(
            endpoint,
            store.clone(),
            publisher,
            engine,
            account,
            transport,
            call_id,
            CallDirection::Outgoing,
            destination.clone(),
        );

        if !store.insert(call.clone()) {
            return Err(Error::InvalidCallState(call.call_id().id().to_string()));
        }

        tokio::spawn(async move {
            session.run_outgoing(destination).await;
        });

        Ok(call)
    }

    /// Creates and spawns a call for an inbound INVITE.
    ///
    /// Sends `100 Trying` and `180 Ringing` before the task starts waiting
    /// for a local decision.
    pub(crate) async fn spawn_incoming(
        endpoint: Endpoint,
        store: CallStore,
        publisher: Arc<CallPublisher>,
        engine: &dyn MediaEngine,
        account: AccountConfig,
        request: IncomingRequest,
    ) -> Result<Call> {
        let call_id = request.call_id().clone();
        let remote = request.core.from.addr.clone();

        let (mut session, call) = Self::new(
            endpoint.clone(),
            store.clone(),
            publisher,
            engine,
            account,
            request.transport.clone(),
            call_id,
            CallDirection::Incoming,
            remote,
        );

        if !store.insert(call.clone()) {
            // A second INVITE with a known Call-ID is not a new call.
            endpoint.respond(&request, StatusCode::CallOrTransactionDoesNotExist).await?;
            return Err(Error::InvalidCallState(call.call_id().id().to_string()));
        }

        let setup = Self::incoming_setup(&endpoint, &mut session, &request).await;
        if let Err(err) = setup {
            store.remove(call.call_id());
            let _ = endpoint.respond(&request, StatusCode::BadRequest).await;
            return Err(err);
        }

        session.remote_sdp = request
            .msg
            .body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned());
        session.invite = Some(request.msg.clone());
        session.invite_cseq = request.core.cseq.cseq();
        session.incoming_invite = Some(request);

        tokio::spawn(async move {
            session.run_incoming().await;
        });

        Ok(call)
    }

    async fn incoming_setup(endpoint: &Endpoint, session: &mut Self, request: &IncomingRequest) -> Result<()> {
        let tsx = endpoint
            .new_server_tsx(request)
            .ok_or(Error::MissingRequiredHeader("Via branch"))?;

        // 100 goes out untagged, the 180 carries our dialog tag.
        tsx.respond(endpoint.new_response(request, StatusCode::Trying, None)).await?;

        let dialog = Dialog::new_uas(request, &session.local_tag)?;
        tsx.respond(endpoint.new_response(request, StatusCode::Ringing, Some(&session.local_tag)))
            .await?;

        session.dialog = Some(dialog);
        session.server_tsx = Some(tsx);

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        endpoint: Endpoint,
        store: CallStore,
        publisher: Arc<CallPublisher>,
        engine: &dyn MediaEngine,
        account: AccountConfig,
        transport: Transport,
        call_id: crate::header::CallId,
        direction: CallDirection,
        remote: SipAddr,
    ) -> (Self, Call) {
        let (events_tx, events_rx) = mpsc::channel(32);

        let info = CallInfo {
            call_id: call_id.clone(),
            account: account.key(),
            direction,
            state: CallState::Idle,
            remote,
            hold: HoldState::Unknown,
            sip_code: None,
            sip_phrase: None,
            reason: CallErrorReason::None,
            started_at: None,
        };
        let (info_tx, info_rx) = watch::channel(info.clone());

        // Media events join the same queue as everything else.
        let (media_tx, mut media_rx) = mpsc::channel(16);
        let media = engine.create_session(media_tx);
        let forward = events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = media_rx.recv().await {
                if forward.send(CallEvent::Media(event)).await.is_err() {
                    break;
                }
            }
        });

        let dtmf = DtmfQueue::new();
        let call = Call::new(
            call_id,
            account.key(),
            direction,
            events_tx,
            info_rx,
            dtmf.clone(),
        );

        let session = Self {
            endpoint,
            store,
            publisher,
            media,
            events_rx,
            info_tx,
            info,
            account,
            transport,
            dtmf,
            dialog: None,
            invite: None,
            invite_cseq: 0,
            server_tsx: None,
            incoming_invite: None,
            local_tag: make_tag(),
            local_sdp: None,
            remote_sdp: None,
            created_at: SystemTime::now(),
            answered: false,
            declined: false,
        };

        (session, call)
    }

    // ---- state publication ------------------------------------------------

    fn set_state(&mut self, to: CallState, reason: Option<CallErrorReason>) {
        let from = self.info.state;
        if from == to {
            return;
        }

        self.info.state = to;
        if let Some(reason) = reason {
            self.info.reason = reason;
        }
        if to == CallState::StreamsRunning && self.info.started_at.is_none() {
            self.info.started_at = Some(SystemTime::now());
        }

        let note = match self.info.reason {
            CallErrorReason::None => self
                .info
                .sip_phrase
                .as_deref()
                .unwrap_or("")
                .to_string(),
            reason => reason.describe().to_string(),
        };
        let label = format!("{}→{} ({})", from, to, note);
        log::info!("Call {}: {}", self.info.call_id.id(), label);

        self.info_tx.send_replace(self.info.clone());
        let _ = self.publisher.info.send(Some(self.info.clone()));
        let _ = self.publisher.transition.send(Some(label));
    }

    fn record_status(&mut self, code: StatusCode, phrase: &str) {
        self.info.sip_code = Some(code.into_i32());
        self.info.sip_phrase = Some(phrase.into());
    }

    fn fail(&mut self, reason: CallErrorReason) {
        self.set_state(CallState::Error, Some(reason));
    }

    fn fail_with_status(&mut self, code: StatusCode, phrase: &str) {
        self.record_status(code, phrase);
        self.fail(CallErrorReason::from_status(code));
    }

    fn classify_error(&mut self, err: Error) {
        match err {
            Error::TsxTimeout => {
                self.record_status(StatusCode::RequestTimeout, StatusCode::RequestTimeout.reason());
                self.fail(CallErrorReason::RequestTimeout);
            }
            Error::TransportDown(_) => self.fail(CallErrorReason::NetworkError),
            err => {
                log::warn!("Call {} failed: {:#}", self.info.call_id.id(), err);
                self.fail(CallErrorReason::Unknown);
            }
        }
    }

    // ---- outgoing ---------------------------------------------------------

    async fn run_outgoing(mut self, destination: SipAddr) {
        if let Err(err) = self.outgoing_flow(destination).await {
            self.classify_error(err);
        }
        self.finish().await;
    }

    async fn outgoing_flow(&mut self, destination: SipAddr) -> Result<()> {
        let offer = self.media.create_offer().await?;

        let from = crate::header::From::with_tag(self.account.address(), &self.local_tag);
        let to = crate::header::To::new(destination.clone());

        let mut request = self.endpoint.new_request(
            SipMethod::Invite,
            destination.uri().clone(),
            from,
            to,
            self.info.call_id.clone(),
            1,
            &self.transport,
        );
        request
            .msg
            .headers
            .push(Header::Contact(Contact::new(self.account.contact_addr(&self.transport))));
        request
            .msg
            .headers
            .push(Header::ContentType(ContentType::new(MediaType::sdp())));
        request.msg.set_body(offer.as_bytes());

        self.invite = Some(request.msg.clone());
        self.invite_cseq = 1;
        self.local_sdp = Some(offer);
        self.set_state(CallState::OutgoingInit, None);

        let timeout = self.endpoint.config().invite_timeout;
        let mut tsx = self.endpoint.send_request(request, timeout).await?;

        loop {
            tokio::select! {
                response = tsx.receive() => {
                    match response {
                        Ok(response) => {
                            if self.on_invite_response(&mut tsx, response).await? {
                                return Ok(());
                            }
                        }
                        Err(err) => {
                            self.classify_error(err);
                            return Ok(());
                        }
                    }
                }
                event = self.events_rx.recv() => {
                    match event {
                        Some(CallEvent::Action(CallAction::Hangup)) => {
                            tsx.cancel().await?;
                            self.set_state(CallState::Ending, None);
                        }
                        Some(CallEvent::TransportDown) => {
                            self.fail(CallErrorReason::NetworkError);
                            return Ok(());
                        }
                        Some(_) => (),
                        None => return Ok(()),
                    }
                }
            }

            if self.info.state.is_terminal() {
                return Ok(());
            }
            if matches!(self.info.state, CallState::Connected) {
                drop(tsx);
                return self.in_call_loop().await;
            }
        }
    }

    /// Applies one INVITE response. Returns `true` when the INVITE
    /// transaction concluded in a terminal call state.
    async fn on_invite_response(&mut self, tsx: &mut ClientTransaction, response: IncomingResponse) -> Result<bool> {
        let code = response.code();
        self.record_status(code, response.msg.reason());

        match code.into_i32() {
            100..=199 => {
                match code {
                    StatusCode::Trying => {
                        if self.info.state == CallState::OutgoingInit {
                            self.set_state(CallState::OutgoingProgress, None);
                        }
                    }
                    StatusCode::Ringing | StatusCode::SessionProgress => {
                        self.set_state(CallState::OutgoingRinging, None);
                    }
                    _ => (),
                }
                Ok(false)
            }
            200..=299 => {
                let invite = self.invite.as_ref().expect("INVITE is set before sending");
                let dialog = Dialog::new_uac(invite, &response, self.transport.clone())?;

                let ack = dialog.new_ack(&self.endpoint, self.invite_cseq);
                self.endpoint.send_raw_request(ack).await?;

                if tsx.is_cancelled() {
                    // The CANCEL raced the answer; ACK then BYE per the
                    // dominant glare handling.
                    let bye = dialog.new_request(&self.endpoint, SipMethod::Bye);
                    let timeout = self.endpoint.config().indialog_timeout;
                    let _ = self.endpoint.send_request(bye, timeout).await?;
                    self.set_state(CallState::Ended, Some(CallErrorReason::CancelledLocal));
                    return Ok(true);
                }

                if let Some(body) = response.msg.body.as_deref() {
                    let answer = String::from_utf8_lossy(body).into_owned();
                    self.media.set_remote_description(&answer, SdpKind::Answer).await?;
                    self.remote_sdp = Some(answer);
                }

                self.dialog = Some(dialog);
                self.answered = true;
                self.set_state(CallState::Connected, None);
                Ok(false)
            }
            487 if tsx.is_cancelled() => {
                self.set_state(CallState::Ended, Some(CallErrorReason::CancelledLocal));
                Ok(true)
            }
            _ => {
                self.fail_with_status(code, response.msg.reason());
                Ok(true)
            }
        }
    }

    // ---- incoming ---------------------------------------------------------

    async fn run_incoming(mut self) {
        self.set_state(CallState::IncomingReceived, None);
        if let Err(err) = self.incoming_flow().await {
            self.classify_error(err);
        }
        self.finish().await;
    }

    async fn incoming_flow(&mut self) -> Result<()> {
        loop {
            let Some(event) = self.events_rx.recv().await else {
                return Ok(());
            };

            match event {
                CallEvent::Action(CallAction::Accept) => {
                    self.accept().await?;
                    return self.in_call_loop().await;
                }
                CallEvent::Action(CallAction::Decline) | CallEvent::Action(CallAction::Hangup) => {
                    self.decline().await?;
                    return Ok(());
                }
                CallEvent::Request(request) if request.method() == SipMethod::Cancel => {
                    self.on_cancelled(request).await?;
                    return Ok(());
                }
                CallEvent::Request(request) => {
                    // Nothing else is legal before the call is answered.
                    self.endpoint
                        .respond(&request, StatusCode::CallOrTransactionDoesNotExist)
                        .await?;
                }
                CallEvent::TransportDown => {
                    self.fail(CallErrorReason::NetworkError);
                    return Ok(());
                }
                CallEvent::Action(_) | CallEvent::Media(_) | CallEvent::Response(_) => (),
            }
        }
    }

    async fn accept(&mut self) -> Result<()> {
        let request = self
            .incoming_invite
            .as_ref()
            .ok_or(Error::InvalidCallState(self.info.call_id.id().to_string()))?;

        let offer = self.remote_sdp.clone().unwrap_or_default();
        self.media.set_remote_description(&offer, SdpKind::Offer).await?;
        let answer = self.media.create_answer(&offer).await?;

        let tsx = self
            .server_tsx
            .clone()
            .ok_or(Error::InvalidCallState(self.info.call_id.id().to_string()))?;

        let mut response = self
            .endpoint
            .new_response(request, StatusCode::Ok, Some(&self.local_tag));
        response
            .msg
            .headers
            .push(Header::Contact(Contact::new(self.account.contact_addr(&self.transport))));
        response.set_body(answer.as_bytes(), MediaType::sdp());

        tsx.respond(response).await?;

        self.local_sdp = Some(answer);
        self.answered = true;
        self.record_status(StatusCode::Ok, StatusCode::Ok.reason());
        self.set_state(CallState::Connected, None);

        Ok(())
    }

    async fn decline(&mut self) -> Result<()> {
        let request = self
            .incoming_invite
            .as_ref()
            .ok_or(Error::InvalidCallState(self.info.call_id.id().to_string()))?;
        let tsx = self
            .server_tsx
            .clone()
            .ok_or(Error::InvalidCallState(self.info.call_id.id().to_string()))?;

        let response = self
            .endpoint
            .new_response(request, StatusCode::Decline, Some(&self.local_tag));
        self.set_state(CallState::Ending, None);
        tsx.respond(response).await?;

        self.declined = true;
        self.record_status(StatusCode::Decline, StatusCode::Decline.reason());
        self.set_state(CallState::Ended, Some(CallErrorReason::Declined));

        Ok(())
    }

    async fn on_cancelled(&mut self, cancel: IncomingRequest) -> Result<()> {
        self.endpoint.respond(&cancel, StatusCode::Ok).await?;

        if let (Some(tsx), Some(invite)) = (self.server_tsx.clone(), self.incoming_invite.as_ref()) {
            let response =
                self.endpoint
                    .new_response(invite, StatusCode::RequestTerminated, Some(&self.local_tag));
            tsx.respond(response).await?;
        }

        self.set_state(CallState::Ending, None);
        self.record_status(StatusCode::RequestTerminated, StatusCode::RequestTerminated.reason());
        self.set_state(CallState::Ended, Some(CallErrorReason::NormalTermination));

        Ok(())
    }

    // ---- established call -------------------------------------------------

    async fn in_call_loop(&mut self) -> Result<()> {
        let dialog = self.dialog.clone().ok_or(Error::InvalidCallState(
            self.info.call_id.id().to_string(),
        ))?;

        // The DTMF drainer runs for the whole established phase; its own
        // state gate keeps it idle outside CONNECTED/STREAMS_RUNNING.
        let drainer = spawn_drainer(
            self.dtmf.clone(),
            self.endpoint.clone(),
            dialog,
            self.media.clone(),
            self.info_tx.subscribe(),
        );

        let result = self.established_loop().await;

        drainer.stop().await;
        result
    }

    async fn established_loop(&mut self) -> Result<()> {
        loop {
            let Some(event) = self.events_rx.recv().await else {
                return Ok(());
            };

            match event {
                CallEvent::Media(MediaEvent::ConnectionState(MediaConnectionState::Connected)) => {
                    if self.info.state == CallState::Connected {
                        if self.info.hold == HoldState::Unknown {
                            self.info.hold = HoldState::NotOnHold;
                        }
                        self.set_state(CallState::StreamsRunning, None);
                    }
                }
                CallEvent::Media(MediaEvent::ConnectionState(MediaConnectionState::Failed)) => {
                    self.fail(CallErrorReason::NetworkError);
                    return Ok(());
                }
                CallEvent::Media(_) => (),
                CallEvent::Action(CallAction::Hangup) => {
                    self.send_bye().await?;
                    return Ok(());
                }
                CallEvent::Action(CallAction::Hold) => {
                    if matches!(self.info.state, CallState::Connected | CallState::StreamsRunning) {
                        self.reinvite(SdpDirection::SendOnly).await?;
                    }
                }
                CallEvent::Action(CallAction::Resume) => {
                    if self.info.state == CallState::Paused {
                        self.reinvite(SdpDirection::SendRecv).await?;
                    }
                }
                CallEvent::Action(_) => (),
                CallEvent::Request(request) => {
                    self.on_in_dialog_request(request).await?;
                }
                CallEvent::Response(response) => {
                    self.on_stray_response(response).await?;
                }
                CallEvent::TransportDown => {
                    self.fail(CallErrorReason::NetworkError);
                    return Ok(());
                }
            }

            if self.info.state.is_terminal() {
                return Ok(());
            }
        }
    }

    async fn send_bye(&mut self) -> Result<()> {
        let dialog = self.dialog.clone().expect("established call has a dialog");

        let bye = dialog.new_request(&self.endpoint, SipMethod::Bye);
        self.set_state(CallState::Ending, None);

        let timeout = self.endpoint.config().indialog_timeout;
        let mut tsx = self.endpoint.send_request(bye, timeout).await?;

        loop {
            match tsx.receive().await {
                Ok(response) if response.code().is_final() => {
                    self.record_status(response.code(), response.msg.reason());
                    break;
                }
                Ok(_) => continue,
                Err(err) => {
                    log::debug!("BYE concluded without a response: {:#}", err);
                    break;
                }
            }
        }

        self.media.set_audio_enabled(false).await;
        self.set_state(CallState::Ended, Some(CallErrorReason::NormalTermination));

        Ok(())
    }

    /// Sends a hold or resume re-INVITE and waits for its outcome.
    async fn reinvite(&mut self, direction: SdpDirection) -> Result<()> {
        let dialog = self.dialog.clone().expect("established call has a dialog");
        let hold = direction.is_hold();

        let base = self.local_sdp.clone().unwrap_or_default();
        let sdp = sdp::with_direction(&base, direction);

        let mut request = dialog.new_request(&self.endpoint, SipMethod::Invite);
        request
            .msg
            .headers
            .push(Header::Contact(Contact::new(self.account.contact_addr(&self.transport))));
        request
            .msg
            .headers
            .push(Header::ContentType(ContentType::new(MediaType::sdp())));
        request.msg.set_body(sdp.as_bytes());

        let reinvite_cseq = dialog.local_cseq();

        self.set_state(
            if hold { CallState::Pausing } else { CallState::Resuming },
            None,
        );

        let timeout = self.endpoint.config().indialog_timeout;
        let mut tsx = self.endpoint.send_request(request, timeout).await?;

        loop {
            match tsx.receive().await {
                Ok(response) => {
                    let code = response.code();
                    if code.is_provisional() {
                        continue;
                    }
                    self.record_status(code, response.msg.reason());

                    let ack = dialog.new_ack(&self.endpoint, reinvite_cseq);
                    self.endpoint.send_raw_request(ack).await?;

                    if code.into_i32() >= 300 {
                        self.fail_with_status(code, response.msg.reason());
                        return Ok(());
                    }

                    if let Some(body) = response.msg.body.as_deref() {
                        let answer = String::from_utf8_lossy(body).into_owned();
                        self.media.set_remote_description(&answer, SdpKind::Answer).await?;
                        self.remote_sdp = Some(answer);
                    }

                    self.local_sdp = Some(sdp);
                    self.media.set_audio_enabled(!hold).await;
                    if hold {
                        self.info.hold = HoldState::LocalHold;
                        self.set_state(CallState::Paused, None);
                    } else {
                        self.info.hold = HoldState::NotOnHold;
                        self.set_state(CallState::StreamsRunning, None);
                    }
                    return Ok(());
                }
                Err(err) => {
                    self.classify_error(err);
                    return Ok(());
                }
            }
        }
    }

    async fn on_in_dialog_request(&mut self, request: IncomingRequest) -> Result<()> {
        let method = request.method();

        if let Some(dialog) = &self.dialog {
            if !matches!(method, SipMethod::Ack | SipMethod::Cancel)
                && !dialog.check_remote_cseq(request.core.cseq.cseq())
            {
                // 12.2.2: a lower CSeq than the last one seen is answered
                // with 500.
                self.endpoint.respond(&request, StatusCode::ServerInternalError).await?;
                return Ok(());
            }
        }

        match method {
            SipMethod::Bye => {
                if let Some(tsx) = self.endpoint.new_server_tsx(&request) {
                    let response = self
                        .endpoint
                        .new_response(&request, StatusCode::Ok, Some(&self.local_tag));
                    tsx.respond(response).await?;
                }

                self.media.set_audio_enabled(false).await;
                self.set_state(CallState::Ending, None);
                self.set_state(CallState::Ended, Some(CallErrorReason::NormalTermination));
            }
            SipMethod::Invite => {
                self.on_remote_reinvite(request).await?;
            }
            SipMethod::Info => {
                self.endpoint.respond(&request, StatusCode::Ok).await?;
            }
            SipMethod::Ack => (),
            SipMethod::Cancel => {
                // Nothing cancellable remains once the call is established.
                self.endpoint
                    .respond(&request, StatusCode::CallOrTransactionDoesNotExist)
                    .await?;
            }
            _ => {
                self.endpoint.respond(&request, StatusCode::MethodNotAllowed).await?;
            }
        }

        Ok(())
    }

    /// A re-INVITE from the peer, driving remote hold and resume.
    async fn on_remote_reinvite(&mut self, request: IncomingRequest) -> Result<()> {
        let tsx = self
            .endpoint
            .new_server_tsx(&request)
            .ok_or(Error::MissingRequiredHeader("Via branch"))?;

        let offer = request
            .msg
            .body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        let direction = sdp::direction(&offer);

        if direction.is_hold() {
            self.set_state(CallState::Pausing, None);
        } else if self.info.state == CallState::Paused {
            self.set_state(CallState::Resuming, None);
        }

        self.media.set_remote_description(&offer, SdpKind::Offer).await?;
        let answer = self.media.create_answer(&offer).await?;

        let mut response = self
            .endpoint
            .new_response(&request, StatusCode::Ok, Some(&self.local_tag));
        response
            .msg
            .headers
            .push(Header::Contact(Contact::new(self.account.contact_addr(&self.transport))));
        response.set_body(answer.as_bytes(), MediaType::sdp());
        tsx.respond(response).await?;

        if let (Some(dialog), Some(contact)) = (
            &self.dialog,
            find_map_header!(request.msg.headers, Contact),
        ) {
            dialog.set_remote_target(contact.addr.uri().clone());
        }

        self.remote_sdp = Some(offer);
        self.local_sdp = Some(answer);

        if direction.is_hold() {
            self.set_state(CallState::Paused, None);
        } else {
            self.set_state(CallState::StreamsRunning, None);
        }

        Ok(())
    }

    /// A retransmitted 2xx whose INVITE transaction is gone still needs its
    /// ACK.
    async fn on_stray_response(&mut self, response: IncomingResponse) -> Result<()> {
        let is_invite_ok = response.core.cseq.method().is_invite() && response.code().into_i32() < 300;
        if !is_invite_ok {
            return Ok(());
        }

        if let Some(dialog) = &self.dialog {
            let ack = dialog.new_ack(&self.endpoint, response.core.cseq.cseq());
            self.endpoint.send_raw_request(ack).await?;
        }

        Ok(())
    }

    // ---- teardown ---------------------------------------------------------

    async fn finish(mut self) {
        if !self.info.state.is_terminal() {
            self.set_state(CallState::Ended, None);
        }

        let aborted = self.dtmf.flush();
        if !aborted.is_empty() {
            log::info!(
                "Call {}: {} queued DTMF digits aborted",
                self.info.call_id.id(),
                aborted.len()
            );
        }

        self.media.dispose().await;

        let duration_secs = self.info.duration_ms() / 1000;
        let outcome = if self.declined {
            CallOutcome::Declined
        } else if self.info.reason == CallErrorReason::NormalTermination && duration_secs > 0 {
            CallOutcome::Success
        } else if self.info.direction == CallDirection::Incoming && !self.answered {
            CallOutcome::Missed
        } else {
            CallOutcome::Aborted
        };

        let (to, from) = match self.info.direction {
            CallDirection::Outgoing => (self.info.remote.clone(), self.account.address()),
            CallDirection::Incoming => (self.account.address(), self.info.remote.clone()),
        };

        let entry = CallLogEntry {
            id: self.info.call_id.clone(),
            direction: self.info.direction,
            to,
            from,
            contact: self
                .incoming_invite
                .as_ref()
                .and_then(|req| find_map_header!(req.msg.headers, Contact).map(|c| c.addr.clone())),
            start_time: self.created_at,
            duration_secs,
            outcome,
            local_addr: Some(self.transport.addr()),
        };
        let _ = self.publisher.log.send(entry);

        // Keep the entry around briefly so late retransmissions of BYE or
        // ACK still find the call.
        let store = self.store;
        let call_id = self.info.call_id.clone();
        let linger = self.endpoint.config().call_linger;
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            store.remove(&call_id);
        });
    }
}
