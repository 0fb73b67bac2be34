use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use super::{State, Transactions, TsxKey};
use crate::error::Result;
use crate::message::StatusCode;
use crate::transport::{IncomingRequest, OutgoingResponse, ToBytes, Transport};

struct Inner {
    /// The key used to identify the transaction.
    key: TsxKey,
    /// The transaction layer this transaction is registered in.
    transactions: Transactions,
    /// The transport the request arrived on.
    transport: Transport,
    /// The address of the remote endpoint.
    addr: SocketAddr,
    /// The current state of the transaction.
    state: Mutex<State>,
    /// The last status code sent in the transaction.
    status_code: Mutex<Option<StatusCode>>,
    /// The last response sent, kept for absorbing request retransmissions.
    last_msg: Mutex<Option<Bytes>>,
    /// Whether the transaction answers an INVITE.
    invite: bool,
}

#[derive(Clone)]
/// Represents a server (UAS) transaction, INVITE or non-INVITE.
///
/// The TU responds through [`ServerTransaction::respond`], possibly several
/// times for an INVITE (`100`, `180`, then a final code). The transaction
/// unregisters itself once it completes.
pub struct ServerTransaction(Arc<Inner>);

impl ServerTransaction {
    /// Creates a server transaction for the given request and registers it.
    ///
    /// Returns `None` for requests without a branch parameter.
    pub fn new(transactions: &Transactions, request: &IncomingRequest) -> Option<Self> {
        let key = TsxKey::from_incoming(request)?;
        let invite = request.method().is_invite();

        let tsx = Self(Arc::new(Inner {
            key,
            transactions: transactions.clone(),
            transport: request.transport.clone(),
            addr: request.addr(),
            state: Mutex::new(State::Calling),
            status_code: Mutex::new(None),
            last_msg: Mutex::new(None),
            invite,
        }));

        transactions.register_server(tsx.clone());
        log::trace!("Transaction Created [UAS] ({:p})", tsx.0);

        Some(tsx)
    }

    pub(crate) fn key(&self) -> &TsxKey {
        &self.0.key
    }

    #[inline]
    /// Retrieves the current state of the Transaction.
    pub fn state(&self) -> State {
        *self.0.state.lock().expect("Lock failed")
    }

    #[inline]
    /// Retrieves the last status code sent.
    pub fn last_status_code(&self) -> Option<StatusCode> {
        *self.0.status_code.lock().expect("Lock failed")
    }

    fn set_state(&self, state: State) {
        let old = {
            let mut guard = self.0.state.lock().expect("Lock failed");
            std::mem::replace(&mut *guard, state)
        };
        log::trace!("State Changed [{old:?} -> {state:?}] ({:p})", self.0);
    }

    /// Sends a response within this transaction.
    ///
    /// A final response completes the transaction: non-INVITE transactions
    /// terminate at once on a reliable transport, INVITE transactions stay
    /// registered until the ACK arrives (with a fallback timer for a lost
    /// ACK).
    pub async fn respond(&self, response: OutgoingResponse) -> Result<()> {
        let code = response.status_code();
        log::debug!("=> Response {} {}", code.into_i32(), response.reason());

        let buf = response.to_bytes()?;
        self.0.transport.send(&buf).await?;

        {
            let mut status = self.0.status_code.lock().expect("Lock failed");
            *status = Some(code);
        }
        {
            let mut last = self.0.last_msg.lock().expect("Lock failed");
            *last = Some(buf);
        }

        if code.is_provisional() {
            self.set_state(State::Proceeding);
            return Ok(());
        }

        self.set_state(State::Completed);
        if self.0.invite {
            // Wait for the ACK; give up on it after the RFC3261 Timer H
            // interval.
            self.schedule_termination(Duration::from_secs(32));
        } else {
            self.terminate();
        }

        Ok(())
    }

    /// Handles a request matching this transaction.
    ///
    /// An ACK confirms a completed INVITE transaction; anything else is a
    /// retransmission and gets the last response replayed.
    pub(crate) async fn recv_msg(&self, request: &IncomingRequest) -> Result<()> {
        if request.method().is_ack() {
            if self.state() == State::Completed {
                self.set_state(State::Confirmed);
                self.terminate();
            }
            return Ok(());
        }

        let last = {
            let guard = self.0.last_msg.lock().expect("Lock failed");
            guard.clone()
        };
        if let Some(last) = last {
            log::trace!("Replaying last response to retransmission from {}", self.0.addr);
            self.0.transport.send(&last).await?;
        }

        Ok(())
    }

    fn schedule_termination(&self, after: Duration) {
        let tsx = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            tsx.terminate();
        });
    }

    fn terminate(&self) {
        self.set_state(State::Terminated);
        self.0.transactions.remove_server(&self.0.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SipMethod;
    use crate::test_utils::{incoming_request, mock_transport, new_response};

    #[tokio::test]
    async fn test_non_invite_terminates_on_final() {
        let transactions = Transactions::new();
        let (transport, _outbox) = mock_transport();
        let request = incoming_request(SipMethod::Register, &transport);

        let tsx = ServerTransaction::new(&transactions, &request).unwrap();
        assert_eq!(transactions.server_len(), 1);

        let response = new_response(&request, StatusCode::Ok);
        tsx.respond(response).await.unwrap();

        assert_eq!(tsx.state(), State::Terminated);
        assert_eq!(transactions.server_len(), 0);
        assert_eq!(tsx.last_status_code(), Some(StatusCode::Ok));
    }

    #[tokio::test]
    async fn test_invite_waits_for_ack() {
        let transactions = Transactions::new();
        let (transport, _outbox) = mock_transport();
        let request = incoming_request(SipMethod::Invite, &transport);

        let tsx = ServerTransaction::new(&transactions, &request).unwrap();

        tsx.respond(new_response(&request, StatusCode::Ringing)).await.unwrap();
        assert_eq!(tsx.state(), State::Proceeding);

        tsx.respond(new_response(&request, StatusCode::BusyHere)).await.unwrap();
        assert_eq!(tsx.state(), State::Completed);
        assert_eq!(transactions.server_len(), 1);

        let ack = incoming_request(SipMethod::Ack, &transport);
        tsx.recv_msg(&ack).await.unwrap();

        assert_eq!(tsx.state(), State::Terminated);
        assert_eq!(transactions.server_len(), 0);
    }
}
