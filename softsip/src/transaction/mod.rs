#![warn(missing_docs)]
//! SIP Transaction Layer.
//!
//! Transactions pair a request with the responses it provokes. On the
//! reliable transport this user agent speaks, retransmission timers are not
//! armed; what remains is response matching, final-response timeouts and
//! absorption of stray retransmissions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::Result;
use crate::transport::{IncomingRequest, IncomingResponse, TransportKey};

mod client;
mod key;
mod server;

pub use client::ClientTransaction;
pub use key::{Role, TsxKey};
pub use server::ServerTransaction;

/// Events delivered to a waiting client transaction.
pub enum TsxEvent {
    /// A response matched the transaction.
    Response(IncomingResponse),
    /// The transport carrying the transaction went down.
    TransportError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Defines the possible states of a SIP Transaction.
pub enum State {
    #[default]
    /// Initial state
    Initial,
    /// Request sent, no response seen yet.
    Calling,
    /// A provisional response was received.
    Proceeding,
    /// A final response was received or sent.
    Completed,
    /// The ACK for a final response was seen (INVITE server only).
    Confirmed,
    /// The transaction is finished.
    Terminated,
}

struct ClientEntry {
    sender: mpsc::Sender<TsxEvent>,
    transport: TransportKey,
}

#[derive(Default, Clone)]
/// Represents the transaction layer of the SIP protocol.
///
/// This type holds all server and client transactions created by the TU
/// (Transaction User).
pub struct Transactions {
    client_transactions: Arc<Mutex<HashMap<TsxKey, ClientEntry>>>,
    server_transactions: Arc<Mutex<HashMap<TsxKey, ServerTransaction>>>,
}

impl Transactions {
    /// Creates an empty transaction layer.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_client(&self, key: TsxKey, sender: mpsc::Sender<TsxEvent>, transport: TransportKey) {
        let mut map = self.client_transactions.lock().expect("Lock failed");
        map.insert(key, ClientEntry { sender, transport });
    }

    pub(crate) fn remove_client(&self, key: &TsxKey) {
        let mut map = self.client_transactions.lock().expect("Lock failed");
        map.remove(key);
    }

    pub(crate) fn register_server(&self, tsx: ServerTransaction) {
        let mut map = self.server_transactions.lock().expect("Lock failed");
        map.insert(tsx.key().clone(), tsx);
    }

    pub(crate) fn remove_server(&self, key: &TsxKey) {
        let mut map = self.server_transactions.lock().expect("Lock failed");
        map.remove(key);
    }

    /// Routes a response to the client transaction waiting for it.
    ///
    /// Returns the response back when no transaction matches, so the caller
    /// can offer it to the services (a retransmitted `200 OK` to an INVITE
    /// whose transaction already finished still needs an ACK).
    pub(crate) async fn handle_response(&self, response: IncomingResponse) -> Result<Option<IncomingResponse>> {
        let Some(key) = TsxKey::from_response(&response) else {
            return Ok(Some(response));
        };

        let sender = {
            let map = self.client_transactions.lock().expect("Lock failed");
            map.get(&key).map(|entry| entry.sender.clone())
        };

        match sender {
            Some(sender) => {
                if sender.send(TsxEvent::Response(response)).await.is_err() {
                    // The waiter is gone, drop the stale entry.
                    self.remove_client(&key);
                }
                Ok(None)
            }
            None => Ok(Some(response)),
        }
    }

    /// Hands an incoming request to a matching server transaction.
    ///
    /// Returns the request back when no transaction matches and the TU should
    /// process it.
    pub(crate) async fn handle_request(&self, request: IncomingRequest) -> Result<Option<IncomingRequest>> {
        let Some(key) = TsxKey::from_incoming(&request) else {
            return Ok(Some(request));
        };

        let tsx = {
            let map = self.server_transactions.lock().expect("Lock failed");
            map.get(&key).cloned()
        };

        match tsx {
            Some(tsx) => {
                tsx.recv_msg(&request).await?;
                Ok(None)
            }
            None => Ok(Some(request)),
        }
    }

    /// Fails every client transaction whose transport went down.
    pub(crate) fn on_transport_closed(&self, transport: &TransportKey) {
        let senders: Vec<_> = {
            let mut map = self.client_transactions.lock().expect("Lock failed");
            let keys: Vec<_> = map
                .iter()
                .filter(|(_, entry)| entry.transport == *transport)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter().filter_map(|key| map.remove(&key)).collect()
        };

        for entry in senders {
            let sender = entry.sender;
            tokio::spawn(async move {
                let _ = sender.send(TsxEvent::TransportError).await;
            });
        }
    }

    #[cfg(test)]
    pub(crate) fn client_len(&self) -> usize {
        self.client_transactions.lock().expect("Lock failed").len()
    }

    #[cfg(test)]
    pub(crate) fn server_len(&self) -> usize {
        self.server_transactions.lock().expect("Lock failed").len()
    }
}
