use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use super::{State, Transactions, TsxEvent, TsxKey};
use crate::error::{Error, Result};
use crate::find_map_header;
use crate::header::{CSeq, Header, MaxForwards};
use crate::message::{Request, RequestLine, SipMethod};
use crate::transport::{IncomingResponse, OutgoingRequest, ToBytes, Transport};

/// Represents a client transaction, INVITE or non-INVITE.
///
/// The owner drives the transaction by calling [`ClientTransaction::receive`]
/// until a final response, a timeout or a transport error ends it. Dropping
/// the value unregisters it from the transaction layer.
pub struct ClientTransaction {
    key: TsxKey,
    transactions: Transactions,
    transport: Transport,
    request: Request,
    rx: mpsc::Receiver<TsxEvent>,
    state: State,
    deadline: Instant,
    cancelled: bool,
}

impl ClientTransaction {
    /// Sends the request and registers the transaction.
    ///
    /// `timeout` bounds the whole wait for a final response (Timer F / Timer
    /// B analog).
    pub async fn send(transactions: &Transactions, request: OutgoingRequest, timeout: Duration) -> Result<Self> {
        let method = request.msg.method();
        assert!(
            !method.is_ack(),
            "ACK is transmitted outside of any transaction"
        );

        let key = TsxKey::from_outgoing(&request)?;
        let (tx, rx) = mpsc::channel(8);

        transactions.register_client(key.clone(), tx, request.transport.key());

        let buf = match request.to_bytes() {
            Ok(buf) => buf,
            Err(err) => {
                transactions.remove_client(&key);
                return Err(err);
            }
        };

        log::debug!("=> Request {} ({} bytes)", method, buf.len());
        if let Err(err) = request.transport.send(&buf).await {
            transactions.remove_client(&key);
            return Err(err);
        }

        Ok(Self {
            key,
            transactions: transactions.clone(),
            transport: request.transport,
            request: request.msg,
            rx,
            state: State::Calling,
            deadline: Instant::now() + timeout,
            cancelled: false,
        })
    }

    /// Retrieves the current state of the transaction.
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the request this transaction transmitted.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Waits for the next response of this transaction.
    ///
    /// Provisional responses are returned as they arrive; the caller keeps
    /// calling until a final response shows up. Errors:
    ///
    /// * [`Error::TsxTimeout`] when no final response arrived in time.
    /// * [`Error::TransportDown`] when the connection died mid-transaction.
    pub async fn receive(&mut self) -> Result<IncomingResponse> {
        loop {
            let event = match time::timeout_at(self.deadline, self.rx.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    self.state = State::Terminated;
                    return Err(Error::TsxTimeout);
                }
            };

            match event {
                Some(TsxEvent::Response(response)) => {
                    let code = response.code();
                    log::debug!("<= Response {} {}", code.into_i32(), response.msg.reason());

                    self.state = if code.is_provisional() {
                        State::Proceeding
                    } else {
                        State::Completed
                    };

                    // A non-2xx final to an INVITE gets its hop-by-hop ACK
                    // here, on the INVITE branch. The ACK for a 2xx is the
                    // TU's, routed through the dialog.
                    if self.request.method().is_invite() && code.into_i32() >= 300 {
                        if let Err(err) = self.ack_non_2xx(&response).await {
                            log::warn!("Failed to ACK final response: {:#}", err);
                        }
                    }

                    return Ok(response);
                }
                Some(TsxEvent::TransportError) => {
                    self.state = State::Terminated;
                    return Err(Error::TransportDown(self.transport.remote_addr()));
                }
                None => {
                    self.state = State::Terminated;
                    return Err(Error::ChannelClosed);
                }
            }
        }
    }

    /// Cancels a pending INVITE transaction.
    ///
    /// Valid only while no final response was received. The CANCEL reuses the
    /// INVITE branch and CSeq number per RFC3261 section 9.1; a `487 Request
    /// Terminated` on the INVITE is then expected through
    /// [`ClientTransaction::receive`].
    pub async fn cancel(&mut self) -> Result<()> {
        if !self.request.method().is_invite() {
            return Err(Error::Cancelled);
        }
        if self.cancelled || !matches!(self.state, State::Calling | State::Proceeding) {
            return Ok(());
        }

        let mut cancel = Request::new(RequestLine::new(
            SipMethod::Cancel,
            self.request.req_line.uri.clone(),
        ));

        let via = find_map_header!(self.request.headers, Via)
            .cloned()
            .ok_or(Error::MissingRequiredHeader("Via"))?;
        let from = find_map_header!(self.request.headers, From)
            .cloned()
            .ok_or(Error::MissingRequiredHeader("From"))?;
        let to = find_map_header!(self.request.headers, To)
            .cloned()
            .ok_or(Error::MissingRequiredHeader("To"))?;
        let call_id = find_map_header!(self.request.headers, CallId)
            .cloned()
            .ok_or(Error::MissingRequiredHeader("Call-ID"))?;
        let cseq = find_map_header!(self.request.headers, CSeq)
            .copied()
            .ok_or(Error::MissingRequiredHeader("CSeq"))?;

        cancel.headers.push(Header::Via(via));
        cancel.headers.push(Header::MaxForwards(MaxForwards::new(70)));
        cancel.headers.push(Header::From(from));
        cancel.headers.push(Header::To(to));
        cancel.headers.push(Header::CallId(call_id));
        cancel.headers.push(Header::CSeq(CSeq::new(cseq.cseq(), SipMethod::Cancel)));

        let outgoing = OutgoingRequest {
            msg: cancel,
            addr: self.transport.remote_addr(),
            transport: self.transport.clone(),
            buf: None,
        };

        let buf = outgoing.to_bytes()?;
        log::debug!("=> Request CANCEL ({} bytes)", buf.len());
        self.transport.send(&buf).await?;

        self.cancelled = true;
        Ok(())
    }

    /// Returns `true` if a CANCEL was transmitted for this transaction.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /*
     * 17.1.1.3: The ACK MUST contain the same Request-URI, Call-ID, From and
     * CSeq number as the INVITE; the To comes from the response being
     * acknowledged, and the Via carries the INVITE branch.
     */
    async fn ack_non_2xx(&self, response: &IncomingResponse) -> Result<()> {
        let mut ack = Request::new(RequestLine::new(
            SipMethod::Ack,
            self.request.req_line.uri.clone(),
        ));

        let via = find_map_header!(self.request.headers, Via)
            .cloned()
            .ok_or(Error::MissingRequiredHeader("Via"))?;
        let from = find_map_header!(self.request.headers, From)
            .cloned()
            .ok_or(Error::MissingRequiredHeader("From"))?;
        let call_id = find_map_header!(self.request.headers, CallId)
            .cloned()
            .ok_or(Error::MissingRequiredHeader("Call-ID"))?;
        let cseq = find_map_header!(self.request.headers, CSeq)
            .copied()
            .ok_or(Error::MissingRequiredHeader("CSeq"))?;

        ack.headers.push(Header::Via(via));
        ack.headers.push(Header::MaxForwards(MaxForwards::new(70)));
        ack.headers.push(Header::From(from));
        ack.headers.push(Header::To(response.core.to.clone()));
        ack.headers.push(Header::CallId(call_id));
        ack.headers.push(Header::CSeq(CSeq::new(cseq.cseq(), SipMethod::Ack)));

        let outgoing = OutgoingRequest {
            msg: ack,
            addr: self.transport.remote_addr(),
            transport: self.transport.clone(),
            buf: None,
        };

        let buf = outgoing.to_bytes()?;
        self.transport.send(&buf).await?;

        Ok(())
    }
}

impl Drop for ClientTransaction {
    fn drop(&mut self) {
        self.transactions.remove_client(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_transport, outgoing_request};

    #[tokio::test]
    async fn test_registers_and_unregisters() {
        let transactions = Transactions::new();
        let (transport, _outbox) = mock_transport();
        let request = outgoing_request(SipMethod::Options, &transport);

        let tsx = ClientTransaction::send(&transactions, request, Duration::from_secs(32))
            .await
            .unwrap();

        assert_eq!(transactions.client_len(), 1);
        assert_eq!(tsx.state(), State::Calling);

        drop(tsx);
        assert_eq!(transactions.client_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires() {
        let transactions = Transactions::new();
        let (transport, _outbox) = mock_transport();
        let request = outgoing_request(SipMethod::Register, &transport);

        let mut tsx = ClientTransaction::send(&transactions, request, Duration::from_secs(32))
            .await
            .unwrap();

        let err = tsx.receive().await.unwrap_err();
        assert!(matches!(err, Error::TsxTimeout));
        assert_eq!(tsx.state(), State::Terminated);
    }

    #[tokio::test]
    async fn test_cancel_writes_same_branch() {
        let transactions = Transactions::new();
        let (transport, outbox) = mock_transport();
        let request = outgoing_request(SipMethod::Invite, &transport);

        let mut tsx = ClientTransaction::send(&transactions, request, Duration::from_secs(180))
            .await
            .unwrap();
        tsx.cancel().await.unwrap();

        let frames = outbox.lock().unwrap();
        assert_eq!(frames.len(), 2);

        let invite = String::from_utf8_lossy(&frames[0]);
        let cancel = String::from_utf8_lossy(&frames[1]);
        assert!(invite.starts_with("INVITE "));
        assert!(cancel.starts_with("CANCEL "));

        let branch_of = |s: &str| {
            let i = s.find("branch=").unwrap();
            s[i..].split(';').next().unwrap().trim_end().to_string()
        };
        let invite_line = invite.lines().find(|l| l.starts_with("Via:")).unwrap().to_string();
        let cancel_line = cancel.lines().find(|l| l.starts_with("Via:")).unwrap().to_string();
        assert_eq!(branch_of(&invite_line), branch_of(&cancel_line));
    }
}
