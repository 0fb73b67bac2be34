#![warn(missing_docs)]
//! The user agent facade.
//!
//! One `UserAgent` instance is constructed at startup and passed around
//! explicitly; it ties the endpoint, the registration manager, the call
//! store and the media engine together and exposes the operations a dialer
//! UI needs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::account::{AccountConfig, AccountKey};
use crate::auth::DigestAuthenticator;
use crate::call::{
    Call, CallAction, CallInfo, CallLogEntry, CallPublisher, CallSession, CallStore,
};
use crate::config::Config;
use crate::dtmf::{self, DtmfMode, DtmfQueueStatus, DtmfRequest};
use crate::endpoint::{Endpoint, EndpointService};
use crate::error::{Error, Result};
use crate::media::MediaEngine;
use crate::message::SipAddr;
use crate::registration::{RegistrationManager, RegistrationSummary};
use crate::transport::{IncomingRequest, IncomingResponse, TransportKey};

/// Application lifecycle events routed into the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    /// The application came to the foreground.
    Foreground,
    /// The application was backgrounded.
    Background,
    /// The process is about to exit.
    WillTerminate,
    /// Network connectivity returned.
    DataAvailable,
    /// Network connectivity was lost.
    DataUnavailable,
}

/// A coarse call state for simple UI surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BasicCallState {
    /// No call.
    #[default]
    Idle,
    /// An incoming call is ringing.
    Incoming,
    /// An outgoing call is being set up.
    Outgoing,
    /// A call is established.
    Connected,
    /// The last call ended.
    Ended,
}

impl From<crate::call::CallState> for BasicCallState {
    fn from(state: crate::call::CallState) -> Self {
        use crate::call::CallState::*;
        match state {
            Idle => BasicCallState::Idle,
            OutgoingInit | OutgoingProgress | OutgoingRinging => BasicCallState::Outgoing,
            IncomingReceived => BasicCallState::Incoming,
            Connected | StreamsRunning | Pausing | Paused | Resuming => BasicCallState::Connected,
            Ending | Ended | Error => BasicCallState::Ended,
        }
    }
}

struct UaCore {
    endpoint: OnceLock<Endpoint>,
    registrations: OnceLock<RegistrationManager>,
    engine: Box<dyn MediaEngine>,
    accounts: Mutex<HashMap<AccountKey, AccountConfig>>,
    // Survives unregister so a later re-register reuses the nonce cache.
    auth_caches: Mutex<HashMap<AccountKey, Arc<DigestAuthenticator>>>,
    calls: CallStore,
    publisher: Arc<CallPublisher>,
    call_info_rx: watch::Receiver<Option<CallInfo>>,
    transition_rx: watch::Receiver<Option<String>>,
    log_rx: Mutex<Option<mpsc::UnboundedReceiver<CallLogEntry>>>,
    parse_errors: AtomicU64,
}

impl UaCore {
    fn endpoint(&self) -> &Endpoint {
        self.endpoint.get().expect("UserAgent::start sets the endpoint")
    }

    fn registrations(&self) -> &RegistrationManager {
        self.registrations
            .get()
            .expect("UserAgent::start sets the registration manager")
    }
}

/// The top level handle of the library.
#[derive(Clone)]
pub struct UserAgent {
    core: Arc<UaCore>,
}

impl UserAgent {
    /// Builds the whole core and starts the endpoint dispatch loop.
    pub async fn start(config: Config, engine: Box<dyn MediaEngine>) -> Result<Self> {
        let (info_tx, call_info_rx) = watch::channel(None);
        let (transition_tx, transition_rx) = watch::channel(None);
        let (log_tx, log_rx) = mpsc::unbounded_channel();

        let core = Arc::new(UaCore {
            endpoint: OnceLock::new(),
            registrations: OnceLock::new(),
            engine,
            accounts: Mutex::new(HashMap::new()),
            auth_caches: Mutex::new(HashMap::new()),
            calls: CallStore::new(),
            publisher: Arc::new(CallPublisher {
                info: info_tx,
                transition: transition_tx,
                log: log_tx,
            }),
            call_info_rx,
            transition_rx,
            log_rx: Mutex::new(Some(log_rx)),
            parse_errors: AtomicU64::new(0),
        });

        let endpoint = Endpoint::builder()
            .with_config(config)
            .with_service(UaService(core.clone()))
            .build();
        endpoint.run().await?;

        core.endpoint
            .set(endpoint.clone())
            .unwrap_or_else(|_| unreachable!("endpoint is set exactly once"));
        core.registrations
            .set(RegistrationManager::new(endpoint))
            .unwrap_or_else(|_| panic!("registration manager is set exactly once"));

        Ok(Self { core })
    }

    // ---- accounts ---------------------------------------------------------

    /// Registers an account and keeps it registered.
    pub fn register(&self, account: AccountConfig) {
        let key = account.key();

        let auth = {
            let mut caches = self.core.auth_caches.lock().expect("Lock failed");
            caches.entry(key.clone()).or_default().clone()
        };
        {
            let mut accounts = self.core.accounts.lock().expect("Lock failed");
            accounts.insert(key, account.clone());
        }

        self.core.registrations().register_account(account, auth);
    }

    /// Unregisters an account.
    ///
    /// The nonce cache of the account survives, so a later re-register
    /// continues its nc counting where it left off.
    pub async fn unregister(&self, key: &AccountKey) -> Result<()> {
        {
            let mut accounts = self.core.accounts.lock().expect("Lock failed");
            accounts.remove(key);
        }
        self.core.registrations().unregister_account(key).await
    }

    // ---- calls ------------------------------------------------------------

    /// Places a call from the given account.
    ///
    /// The destination may be a full uri (`sip:bob@ex.test`), a bare AOR
    /// (`bob@ex.test`) or just a user, completed with the account's domain.
    pub async fn make_call(&self, from_account: &AccountKey, destination: &str) -> Result<Call> {
        let account = {
            let accounts = self.core.accounts.lock().expect("Lock failed");
            accounts
                .get(from_account)
                .cloned()
                .ok_or_else(|| Error::UnknownAccount(from_account.to_string()))?
        };

        let destination = parse_destination(destination, &account.domain)?;

        let transport = match self.core.registrations().transport_of(from_account) {
            Some(transport) => transport,
            None => self.core.endpoint().connect(&account.edge).await?,
        };

        CallSession::spawn_outgoing(
            self.core.endpoint().clone(),
            self.core.calls.clone(),
            self.core.publisher.clone(),
            self.core.engine.as_ref(),
            account,
            transport,
            destination,
        )
    }

    /// Answers the ringing call.
    pub async fn accept(&self) -> Result<()> {
        self.apply_to_active(CallAction::Accept).await
    }

    /// Rejects the ringing call.
    pub async fn decline(&self) -> Result<()> {
        self.apply_to_active(CallAction::Decline).await
    }

    /// Tears the active call down.
    pub async fn hangup(&self) -> Result<()> {
        self.apply_to_active(CallAction::Hangup).await
    }

    /// Puts the active call on hold.
    pub async fn hold(&self) -> Result<()> {
        self.apply_to_active(CallAction::Hold).await
    }

    /// Takes the active call off hold.
    pub async fn resume(&self) -> Result<()> {
        self.apply_to_active(CallAction::Resume).await
    }

    /// Queues a DTMF digit on the active call.
    pub fn send_dtmf(&self, digit: char, duration: Option<Duration>, mode: Option<DtmfMode>) -> Result<()> {
        if !dtmf::is_valid_digit(digit) {
            return Err(Error::InvalidCallState(format!("'{digit}' is not a DTMF digit")));
        }

        let call = self.active_call().ok_or(Error::UnknownCall("active".into()))?;
        if !call.info().state.accepts_dtmf() {
            return Err(Error::InvalidCallState(call.call_id().id().to_string()));
        }

        let config = self.core.endpoint().config();
        call.dtmf().enqueue(DtmfRequest {
            digit,
            duration: duration.unwrap_or(config.dtmf_digit_duration),
            mode: mode.unwrap_or_default(),
        });

        Ok(())
    }

    /// Returns the call that is currently not terminal, if any.
    pub fn active_call(&self) -> Option<Call> {
        self.core.calls.active_call()
    }

    async fn apply_to_active(&self, action: CallAction) -> Result<()> {
        let call = self.active_call().ok_or(Error::UnknownCall("active".into()))?;
        call.apply(action).await
    }

    // ---- lifecycle --------------------------------------------------------

    /// Routes an application lifecycle event into the core.
    pub async fn set_app_state(&self, event: AppEvent) {
        tracing::info!("App state event: {:?}", event);
        match event {
            AppEvent::Foreground => self.core.registrations().exit_push_mode().await,
            AppEvent::Background => self.core.registrations().enter_push_mode().await,
            AppEvent::WillTerminate => self.shutdown().await,
            AppEvent::DataAvailable => self.core.registrations().refresh_all().await,
            AppEvent::DataUnavailable => (),
        }
    }

    /// Best-effort teardown, bounded by the configured shutdown timeout.
    ///
    /// Active dialogs get a BYE, accounts an `Expires: 0` REGISTER; whatever
    /// does not finish in time is abandoned.
    pub async fn shutdown(&self) {
        let deadline = self.core.endpoint().config().shutdown_timeout;

        let cleanup = async {
            for call in self.core.calls.all() {
                let _ = call.apply(CallAction::Hangup).await;
            }
            for key in self.core.registrations().account_keys() {
                let _ = self.core.registrations().unregister_account(&key).await;
            }
            // Give the spawned BYEs a moment to hit the wire.
            loop {
                if self.core.calls.all().iter().all(|c| c.info().state.is_terminal()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };

        if tokio::time::timeout(deadline, cleanup).await.is_err() {
            tracing::warn!("Shutdown cleanup did not finish in {:?}", deadline);
        }
    }

    // ---- observables ------------------------------------------------------

    /// Subscribes to the aggregated registration summary.
    pub fn registration_states(&self) -> watch::Receiver<RegistrationSummary> {
        self.core.registrations().subscribe()
    }

    /// The coarse state of the current call.
    pub fn call_state(&self) -> BasicCallState {
        self.core
            .call_info_rx
            .borrow()
            .as_ref()
            .map(|info| info.state.into())
            .unwrap_or_default()
    }

    /// Subscribes to detailed call snapshots.
    pub fn detailed_call_state(&self) -> watch::Receiver<Option<CallInfo>> {
        self.core.call_info_rx.clone()
    }

    /// Wall-clock milliseconds since media started on the active call.
    pub fn call_duration(&self) -> Option<u64> {
        self.active_call().map(|call| call.info().duration_ms())
    }

    /// Subscribes to transition labels, `"FROM→TO (reason)"`.
    pub fn last_state_transition(&self) -> watch::Receiver<Option<String>> {
        self.core.transition_rx.clone()
    }

    /// The DTMF queue status of the active call.
    pub fn dtmf_queue_status(&self) -> Option<DtmfQueueStatus> {
        self.active_call().map(|call| call.dtmf().status())
    }

    /// Takes the stream of call log entries; available once.
    pub fn call_log_events(&self) -> Option<mpsc::UnboundedReceiver<CallLogEntry>> {
        self.core.log_rx.lock().expect("Lock failed").take()
    }

    /// How many inbound frames failed to parse and were dropped.
    pub fn parse_error_count(&self) -> u64 {
        self.core.parse_errors.load(Ordering::Relaxed)
    }
}

fn parse_destination(destination: &str, domain: &str) -> Result<SipAddr> {
    if destination.starts_with("sip:") || destination.starts_with("sips:") {
        destination.parse()
    } else if destination.contains('@') {
        format!("sip:{destination}").parse()
    } else {
        format!("sip:{destination}@{domain}").parse()
    }
}

/// Routes endpoint traffic into the call machinery and the registration
/// manager.
struct UaService(Arc<UaCore>);

#[async_trait::async_trait]
impl EndpointService for UaService {
    fn name(&self) -> &str {
        "UserAgent"
    }

    async fn on_incoming_request(
        &self,
        endpoint: &Endpoint,
        request: &mut Option<IncomingRequest>,
    ) -> Result<()> {
        let Some(incoming) = request.take() else {
            return Ok(());
        };

        // In-dialog traffic goes to the owning call task. A send error means
        // the call is in its removal grace window; the retransmission is
        // absorbed silently.
        if let Some(call) = self.0.calls.get(incoming.call_id()) {
            let _ = call.deliver(crate::call::CallEvent::Request(incoming)).await;
            return Ok(());
        }

        if incoming.method() == crate::message::SipMethod::Invite {
            let Some(account) = self.account_for(&incoming) else {
                endpoint
                    .respond(&incoming, crate::message::StatusCode::NotFound)
                    .await?;
                return Ok(());
            };

            match CallSession::spawn_incoming(
                endpoint.clone(),
                self.0.calls.clone(),
                self.0.publisher.clone(),
                self.0.engine.as_ref(),
                account,
                incoming,
            )
            .await
            {
                Ok(call) => tracing::info!("Incoming call {}", call.call_id().id()),
                Err(err) => tracing::warn!("Failed to take incoming call: {:#}", err),
            }
            return Ok(());
        }

        // Everything else falls through to the endpoint's default replies.
        *request = Some(incoming);
        Ok(())
    }

    async fn on_incoming_response(
        &self,
        _endpoint: &Endpoint,
        response: &mut Option<IncomingResponse>,
    ) -> Result<()> {
        let Some(incoming) = response.take() else {
            return Ok(());
        };

        // A response without a transaction can still matter to a call: a
        // retransmitted 200 to an INVITE needs another ACK.
        if let Some(call) = self.0.calls.get(incoming.call_id()) {
            let _ = call.deliver(crate::call::CallEvent::Response(incoming)).await;
            return Ok(());
        }

        *response = Some(incoming);
        Ok(())
    }

    async fn on_transport_closed(&self, _endpoint: &Endpoint, key: &TransportKey) -> Result<()> {
        tracing::warn!("Transport to {} went down", key.addr());

        let registrations = self.0.registrations();
        let affected = registrations.accounts_on_transport(key);

        for account in &affected {
            for call in self.0.calls.calls_of(account) {
                let _ = call.deliver(crate::call::CallEvent::TransportDown).await;
            }
        }

        registrations.on_transport_closed(key).await;
        Ok(())
    }

    async fn on_parse_error(&self, _endpoint: &Endpoint, addr: SocketAddr, error: &Error) -> Result<()> {
        self.0.parse_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("Parse error from {}: {:#}", addr, error);
        Ok(())
    }
}

impl UaService {
    /// Picks the account an INVITE is addressed to, by To header first and
    /// request-uri second.
    fn account_for(&self, request: &IncomingRequest) -> Option<AccountConfig> {
        let accounts = self.0.accounts.lock().expect("Lock failed");

        let to_uri = request.core.to.addr.uri();
        let to_key = to_uri
            .user_str()
            .map(|user| AccountKey::new(user, to_uri.host_port.host.as_str().as_ref()));
        if let Some(config) = to_key.and_then(|key| accounts.get(&key)) {
            return Some(config.clone());
        }

        let req_uri = &request.msg.req_line.uri;
        let req_key = req_uri
            .user_str()
            .map(|user| AccountKey::new(user, req_uri.host_port.host.as_str().as_ref()));
        if let Some(config) = req_key.and_then(|key| accounts.get(&key)) {
            return Some(config.clone());
        }

        // A single-account agent answers regardless of the addressing.
        if accounts.len() == 1 {
            return accounts.values().next().cloned();
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_destination_forms() {
        assert_eq!(
            parse_destination("sip:bob@ex.test", "ignored").unwrap().to_string(),
            "sip:bob@ex.test"
        );
        assert_eq!(
            parse_destination("bob@ex.test", "ignored").unwrap().to_string(),
            "sip:bob@ex.test"
        );
        assert_eq!(
            parse_destination("bob", "ex.test").unwrap().to_string(),
            "sip:bob@ex.test"
        );
    }

    #[test]
    fn test_basic_state_mapping() {
        use crate::call::CallState;

        assert_eq!(BasicCallState::from(CallState::OutgoingRinging), BasicCallState::Outgoing);
        assert_eq!(BasicCallState::from(CallState::IncomingReceived), BasicCallState::Incoming);
        assert_eq!(BasicCallState::from(CallState::Paused), BasicCallState::Connected);
        assert_eq!(BasicCallState::from(CallState::Error), BasicCallState::Ended);
    }
}
