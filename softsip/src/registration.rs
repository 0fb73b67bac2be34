//! Multi-account registration manager.
//!
//! One cooperative task per account owns that account's persistent
//! connection and REGISTER refresh loop; no two REGISTERs of one account are
//! ever in flight together. The manager aggregates per-account states into a
//! coalesced summary observable.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch, Notify};

use crate::account::{AccountConfig, AccountKey};
use crate::auth::DigestAuthenticator;
use crate::endpoint::{make_call_id, make_tag, Endpoint};
use crate::error::{Error, Result};
use crate::find_map_header;
use crate::header::{Contact, Expires, Header, To};
use crate::message::{SipAddr, NameAddr, SipMethod, StatusCode};
use crate::transport::{IncomingResponse, Transport, TransportKey};

/// The registration state of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationState {
    /// The account was never registered.
    #[default]
    None,
    /// The connection to the edge is being established.
    Progress,
    /// A REGISTER is in flight.
    InProgress,
    /// The registration is active.
    Ok,
    /// The last registration attempt failed; a retry is scheduled.
    Failed,
    /// The account was unregistered on purpose.
    Cleared,
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistrationState::None => "NONE",
            RegistrationState::Progress => "PROGRESS",
            RegistrationState::InProgress => "IN_PROGRESS",
            RegistrationState::Ok => "OK",
            RegistrationState::Failed => "FAILED",
            RegistrationState::Cleared => "CLEARED",
        };
        f.write_str(s)
    }
}

/// The aggregated registration picture across all accounts.
#[derive(Debug, Clone, Default)]
pub struct RegistrationSummary {
    /// The state of every known account.
    pub states: HashMap<AccountKey, RegistrationState>,
    /// A short summary line, `"3/4 registered"`.
    pub summary: String,
}

impl RegistrationSummary {
    fn from_states(states: &HashMap<AccountKey, RegistrationState>) -> Self {
        let registered = states
            .values()
            .filter(|state| matches!(state, RegistrationState::Ok))
            .count();
        Self {
            states: states.clone(),
            summary: format!("{}/{} registered", registered, states.len()),
        }
    }
}

/// Commands handed to an account's registration task.
enum AccountCommand {
    /// Re-register immediately.
    Refresh,
    /// Re-register with the push wake-up contact.
    EnterPushMode,
    /// Re-register with the normal contact.
    ExitPushMode,
    /// Send a final REGISTER with `Expires: 0` and stop.
    Unregister,
    /// The connection under the account went away.
    ConnectionLost,
}

struct AccountHandle {
    commands: mpsc::Sender<AccountCommand>,
    transport_key: Arc<Mutex<Option<TransportKey>>>,
}

/// Owns one registration loop per account and the aggregate observable.
pub struct RegistrationManager {
    endpoint: Endpoint,
    accounts: Mutex<HashMap<AccountKey, AccountHandle>>,
    states: Arc<Mutex<HashMap<AccountKey, RegistrationState>>>,
    dirty: Arc<Notify>,
    summary_rx: watch::Receiver<RegistrationSummary>,
}

/// How long state change bursts are batched before a summary goes out.
const SUMMARY_COALESCE: Duration = Duration::from_millis(50);

/// The floor of the refresh margin before expiry.
const REFRESH_MARGIN_MIN: Duration = Duration::from_secs(30);

/// Retry backoff base and cap.
const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(300);

impl RegistrationManager {
    /// Creates the manager and starts the summary coalescer.
    pub fn new(endpoint: Endpoint) -> Self {
        let states: Arc<Mutex<HashMap<AccountKey, RegistrationState>>> = Arc::default();
        let dirty = Arc::new(Notify::new());
        let (summary_tx, summary_rx) = watch::channel(RegistrationSummary::default());

        // Bursts of state changes collapse into at most one emission per
        // coalescing window.
        {
            let states = states.clone();
            let dirty = dirty.clone();
            tokio::spawn(async move {
                loop {
                    dirty.notified().await;
                    tokio::time::sleep(SUMMARY_COALESCE).await;
                    let summary = {
                        let states = states.lock().expect("Lock failed");
                        RegistrationSummary::from_states(&states)
                    };
                    if summary_tx.send(summary).is_err() {
                        return;
                    }
                }
            });
        }

        Self {
            endpoint,
            accounts: Mutex::new(HashMap::new()),
            states,
            dirty,
            summary_rx,
        }
    }

    /// Subscribes to the aggregated registration summary.
    pub fn subscribe(&self) -> watch::Receiver<RegistrationSummary> {
        self.summary_rx.clone()
    }

    /// Returns the state of one account.
    pub fn state_of(&self, key: &AccountKey) -> RegistrationState {
        let states = self.states.lock().expect("Lock failed");
        states.get(key).copied().unwrap_or_default()
    }

    /// Returns the connection of one account, when it is up.
    pub fn transport_of(&self, key: &AccountKey) -> Option<Transport> {
        let transport_key = {
            let accounts = self.accounts.lock().expect("Lock failed");
            let handle = accounts.get(key)?;
            let guard = handle.transport_key.lock().expect("Lock failed");
            (*guard)?
        };
        self.endpoint.transport_for(&transport_key)
    }

    /// Starts the registration loop of a new account.
    ///
    /// A re-registration of a known key replaces the old loop.
    pub fn register_account(&self, config: AccountConfig, auth: Arc<DigestAuthenticator>) {
        let key = config.key();

        let (commands_tx, commands_rx) = mpsc::channel(8);
        let transport_key = Arc::new(Mutex::new(None));

        let task = AccountTask {
            endpoint: self.endpoint.clone(),
            config,
            auth,
            commands: commands_rx,
            states: self.states.clone(),
            dirty: self.dirty.clone(),
            transport_key: transport_key.clone(),
        };
        tokio::spawn(task.run());

        let handle = AccountHandle {
            commands: commands_tx,
            transport_key,
        };

        let mut accounts = self.accounts.lock().expect("Lock failed");
        accounts.insert(key, handle);
    }

    /// Unregisters an account and stops its loop.
    pub async fn unregister_account(&self, key: &AccountKey) -> Result<()> {
        let handle = {
            let mut accounts = self.accounts.lock().expect("Lock failed");
            accounts.remove(key)
        };
        let Some(handle) = handle else {
            return Err(Error::UnknownAccount(key.to_string()));
        };

        handle.commands.send(AccountCommand::Unregister).await?;
        Ok(())
    }

    /// Switches every account to the push wake-up contact.
    pub async fn enter_push_mode(&self) {
        self.broadcast(|| AccountCommand::EnterPushMode).await;
    }

    /// Switches every account back to the normal contact.
    pub async fn exit_push_mode(&self) {
        self.broadcast(|| AccountCommand::ExitPushMode).await;
    }

    /// Forces an immediate refresh of every account.
    pub async fn refresh_all(&self) {
        self.broadcast(|| AccountCommand::Refresh).await;
    }

    /// Returns the accounts currently riding the given connection.
    pub fn accounts_on_transport(&self, key: &TransportKey) -> Vec<AccountKey> {
        let accounts = self.accounts.lock().expect("Lock failed");
        accounts
            .iter()
            .filter(|(_, handle)| {
                let guard = handle.transport_key.lock().expect("Lock failed");
                *guard == Some(*key)
            })
            .map(|(account, _)| account.clone())
            .collect()
    }

    /// Tells the affected accounts that their connection died.
    pub async fn on_transport_closed(&self, key: &TransportKey) {
        let affected: Vec<_> = {
            let accounts = self.accounts.lock().expect("Lock failed");
            accounts
                .values()
                .filter(|handle| {
                    let guard = handle.transport_key.lock().expect("Lock failed");
                    *guard == Some(*key)
                })
                .map(|handle| handle.commands.clone())
                .collect()
        };

        for commands in affected {
            let _ = commands.send(AccountCommand::ConnectionLost).await;
        }
    }

    /// Returns the account keys currently managed.
    pub fn account_keys(&self) -> Vec<AccountKey> {
        let accounts = self.accounts.lock().expect("Lock failed");
        accounts.keys().cloned().collect()
    }

    async fn broadcast<F>(&self, command: F)
    where
        F: Fn() -> AccountCommand,
    {
        let senders: Vec<_> = {
            let accounts = self.accounts.lock().expect("Lock failed");
            accounts.values().map(|handle| handle.commands.clone()).collect()
        };
        for sender in senders {
            let _ = sender.send(command()).await;
        }
    }
}

struct AccountTask {
    endpoint: Endpoint,
    config: AccountConfig,
    auth: Arc<DigestAuthenticator>,
    commands: mpsc::Receiver<AccountCommand>,
    states: Arc<Mutex<HashMap<AccountKey, RegistrationState>>>,
    dirty: Arc<Notify>,
    transport_key: Arc<Mutex<Option<TransportKey>>>,
}

impl AccountTask {
    async fn run(mut self) {
        let key = self.config.key();
        let call_id = make_call_id(&self.config.domain);
        let mut cseq: u32 = 0;
        let mut push_mode = false;
        let mut backoff = BACKOFF_BASE;

        log::info!("Registration loop for {} started", key);
        self.set_state(RegistrationState::Progress);

        loop {
            // 1. The persistent connection to the edge.
            let transport = match self.endpoint.connect(&self.config.edge).await {
                Ok(transport) => transport,
                Err(err) => {
                    log::warn!("{}: connect to edge failed: {:#}", key, err);
                    self.set_state(RegistrationState::Failed);
                    if !self.backoff_wait(&mut backoff, &mut push_mode).await {
                        return;
                    }
                    continue;
                }
            };
            {
                let mut guard = self.transport_key.lock().expect("Lock failed");
                *guard = Some(transport.key());
            }

            // 2. One REGISTER cycle, with its single authenticated retry.
            self.set_state(RegistrationState::InProgress);
            let expires = self.endpoint.config().register_expires;
            let granted = match self
                .register_once(&transport, &call_id, &mut cseq, expires, push_mode)
                .await
            {
                Ok(granted) => granted,
                Err(err) => {
                    log::warn!("{}: REGISTER failed: {:#}", key, err);
                    self.set_state(RegistrationState::Failed);
                    if !self.backoff_wait(&mut backoff, &mut push_mode).await {
                        return;
                    }
                    continue;
                }
            };

            backoff = BACKOFF_BASE;
            self.set_state(RegistrationState::Ok);
            log::info!("{} registered for {}s", key, granted);

            // 3. Sleep until the refresh is due, or act on a command.
            let refresh_in = refresh_interval(granted);
            tokio::select! {
                _ = tokio::time::sleep(refresh_in) => {}
                command = self.commands.recv() => {
                    match command {
                        Some(AccountCommand::Refresh) => {}
                        Some(AccountCommand::EnterPushMode) => push_mode = true,
                        Some(AccountCommand::ExitPushMode) => push_mode = false,
                        Some(AccountCommand::ConnectionLost) => {
                            self.set_state(RegistrationState::Failed);
                        }
                        Some(AccountCommand::Unregister) | None => {
                            self.unregister(&transport, &call_id, &mut cseq, push_mode).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Sends one REGISTER and follows its challenge, if any.
    ///
    /// Returns the expiry granted by the registrar, which may be shorter
    /// than the one requested.
    async fn register_once(
        &self,
        transport: &Transport,
        call_id: &crate::header::CallId,
        cseq: &mut u32,
        expires: u32,
        push_mode: bool,
    ) -> Result<u32> {
        let timeout = self.endpoint.config().register_timeout;

        *cseq += 1;
        let request = self.build_register(transport, call_id, *cseq, expires, push_mode, None)?;
        let mut tsx = self.endpoint.send_request(request, timeout).await?;

        let mut auth_sent = false;
        loop {
            let response = tsx.receive().await?;
            let code = response.code();

            match code {
                code if code.is_provisional() => continue,
                StatusCode::Ok => {
                    return Ok(granted_expiry(&response, expires));
                }
                StatusCode::Unauthorized | StatusCode::ProxyAuthenticationRequired => {
                    if auth_sent {
                        // A second challenge is a terminal failure of this
                        // request.
                        return Err(Error::AuthenticationFailed(code));
                    }

                    let challenge = extract_challenge(&response)?;
                    if challenge.stale {
                        // Stale nonce: same credentials, fresh nonce and a
                        // reset nc counter.
                        if let Some(realm) = challenge.realm.as_deref() {
                            self.auth.forget_realm(realm);
                        }
                    }

                    let uri = self.config.registrar().to_string();
                    let credential = self.auth.respond(
                        &self.config.credentials,
                        &challenge,
                        SipMethod::Register,
                        &uri,
                    )?;

                    *cseq += 1;
                    let request = self.build_register(
                        transport,
                        call_id,
                        *cseq,
                        expires,
                        push_mode,
                        Some((code, credential)),
                    )?;
                    tsx = self.endpoint.send_request(request, timeout).await?;
                    auth_sent = true;
                }
                code => return Err(Error::RegisterFailed(code)),
            }
        }
    }

    fn build_register(
        &self,
        transport: &Transport,
        call_id: &crate::header::CallId,
        cseq: u32,
        expires: u32,
        push_mode: bool,
        credential: Option<(StatusCode, crate::message::Credential)>,
    ) -> Result<crate::transport::OutgoingRequest> {
        let address = self.config.address();
        let from = crate::header::From::with_tag(address.clone(), &make_tag());
        let to = To::new(address);

        let mut request = self.endpoint.new_request(
            SipMethod::Register,
            self.config.registrar(),
            from,
            to,
            call_id.clone(),
            cseq,
            transport,
        );

        let contact_uri = if push_mode {
            self.config
                .push_contact(transport)
                .unwrap_or_else(|| self.config.contact(transport))
        } else {
            self.config.contact(transport)
        };
        let contact = SipAddr::NameAddr(NameAddr::new(contact_uri, None));
        request.msg.headers.push(Header::Contact(Contact::new(contact)));
        request.msg.headers.push(Header::Expires(Expires::new(expires)));
        request.msg.headers.push(Header::Allow(self.endpoint.capabilities().clone()));

        if let Some((code, credential)) = credential {
            let header = match code {
                StatusCode::ProxyAuthenticationRequired => {
                    Header::ProxyAuthorization(crate::header::ProxyAuthorization::new(credential))
                }
                _ => Header::Authorization(crate::header::Authorization::new(credential)),
            };
            request.msg.headers.push(header);
        }

        Ok(request)
    }

    /// Clears the binding with `Expires: 0`, best effort.
    async fn unregister(
        &self,
        transport: &Transport,
        call_id: &crate::header::CallId,
        cseq: &mut u32,
        push_mode: bool,
    ) {
        let result = self.register_once(transport, call_id, cseq, 0, push_mode).await;

        match result {
            Ok(_) => self.set_state(RegistrationState::Cleared),
            Err(err) => {
                log::warn!("{}: unregister failed: {:#}", self.config.key(), err);
                self.set_state(RegistrationState::Failed);
            }
        }
    }

    /// Waits out the retry backoff, still reacting to commands.
    ///
    /// Returns `false` when the loop must stop.
    async fn backoff_wait(&mut self, backoff: &mut Duration, push_mode: &mut bool) -> bool {
        let wait = jittered(*backoff);
        *backoff = (*backoff * 2).min(BACKOFF_CAP);

        tokio::select! {
            _ = tokio::time::sleep(wait) => true,
            command = self.commands.recv() => match command {
                Some(AccountCommand::Refresh) | Some(AccountCommand::ConnectionLost) => true,
                Some(AccountCommand::EnterPushMode) => {
                    *push_mode = true;
                    true
                }
                Some(AccountCommand::ExitPushMode) => {
                    *push_mode = false;
                    true
                }
                Some(AccountCommand::Unregister) | None => {
                    self.set_state(RegistrationState::Cleared);
                    false
                }
            }
        }
    }

    fn set_state(&self, state: RegistrationState) {
        let key = self.config.key();
        log::debug!("{} registration state -> {}", key, state);
        {
            let mut states = self.states.lock().expect("Lock failed");
            states.insert(key, state);
        }
        self.dirty.notify_one();
    }
}

/// When to refresh, given the granted expiry.
///
/// Normally `granted - max(30s, granted/10)`. A registrar granting less than
/// twice the margin gets a refresh at half its expiry instead, never sooner
/// than five seconds after the last REGISTER.
fn refresh_interval(granted: u32) -> Duration {
    let granted = Duration::from_secs(granted as u64);
    let margin = REFRESH_MARGIN_MIN.max(granted / 10);

    if granted < margin * 2 {
        return (granted / 2).max(Duration::from_secs(5));
    }
    granted - margin
}

fn jittered(base: Duration) -> Duration {
    let factor = rand::rng().random_range(0.8..1.2);
    base.mul_f64(factor)
}

/// Pulls the digest challenge out of a 401/407 response.
fn extract_challenge(response: &IncomingResponse) -> Result<crate::message::DigestChallenge> {
    let challenge = find_map_header!(response.msg.headers, WwwAuthenticate)
        .map(|h| h.challenge())
        .or_else(|| find_map_header!(response.msg.headers, ProxyAuthenticate).map(|h| h.challenge()));

    challenge
        .and_then(|c| c.digest())
        .cloned()
        .ok_or(Error::InvalidChallenge)
}

/// The expiry the registrar actually granted.
///
/// The Contact's `expires` parameter wins over the `Expires` header; without
/// either the requested value stands.
fn granted_expiry(response: &IncomingResponse, requested: u32) -> u32 {
    let contact_expiry = find_map_header!(response.msg.headers, Contact).and_then(|c| c.expires_param());
    let header_expiry = find_map_header!(response.msg.headers, Expires).map(|e| e.seconds());

    contact_expiry.or(header_expiry).unwrap_or(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_interval_normal() {
        // 3600s granted: margin is max(30, 360) = 360, refresh at 3240.
        assert_eq!(refresh_interval(3600), Duration::from_secs(3240));
        // 120s granted: margin is max(30, 12) = 30, refresh at 90.
        assert_eq!(refresh_interval(120), Duration::from_secs(90));
    }

    #[test]
    fn test_refresh_interval_short_grant() {
        // Below twice the margin the refresh lands at half the expiry.
        assert_eq!(refresh_interval(50), Duration::from_secs(25));
        // But never closer than five seconds after the previous REGISTER.
        assert_eq!(refresh_interval(6), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let wait = jittered(base);
            assert!(wait >= Duration::from_secs(8));
            assert!(wait <= Duration::from_secs(12));
        }
    }

    #[test]
    fn test_summary_line() {
        let mut states = HashMap::new();
        states.insert(AccountKey::new("alice", "ex.test"), RegistrationState::Ok);
        states.insert(AccountKey::new("bob", "ex.test"), RegistrationState::Failed);
        states.insert(AccountKey::new("carol", "ex.test"), RegistrationState::Ok);

        let summary = RegistrationSummary::from_states(&states);
        assert_eq!(summary.summary, "2/3 registered");
    }
}
