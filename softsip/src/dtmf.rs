//! DTMF dispatch queue.
//!
//! Each call owns one strictly-FIFO digit queue and one drainer task. The
//! drainer transmits only while the call is in CONNECTED or STREAMS_RUNNING,
//! paces digits by tone length plus a fixed gap, and aborts whatever is left
//! when the call leaves its active states.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::call::CallInfo;
use crate::dialog::Dialog;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::header::{ContentType, Header, MediaType};
use crate::media::MediaSession;
use crate::message::SipMethod;

/// The default tone length of a digit.
pub const DEFAULT_DIGIT_DURATION: Duration = Duration::from_millis(160);

/// How a digit travels to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DtmfMode {
    /// A SIP INFO request with an `application/dtmf-relay` body.
    #[default]
    Info,
    /// An in-band RTP telephone-event inserted by the media engine.
    Rfc2833,
}

/// One queued digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfRequest {
    /// The digit, one of `0-9`, `*`, `#` or `A-D`.
    pub digit: char,
    /// The tone length.
    pub duration: Duration,
    /// The transport mode.
    pub mode: DtmfMode,
}

impl DtmfRequest {
    /// Creates a request with the default duration and mode.
    pub fn new(digit: char) -> Self {
        Self {
            digit,
            duration: DEFAULT_DIGIT_DURATION,
            mode: DtmfMode::default(),
        }
    }
}

/// Returns `true` for the sixteen digits DTMF can carry.
pub fn is_valid_digit(digit: char) -> bool {
    matches!(digit, '0'..='9' | '*' | '#' | 'A'..='D')
}

/// A snapshot of the queue, refreshed on every enqueue and dequeue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DtmfQueueStatus {
    /// Digits waiting to be sent.
    pub pending: usize,
    /// Whether the drainer is currently working the queue.
    pub draining: bool,
    /// The waiting digits, concatenated in send order.
    pub pending_digits: String,
}

struct Shared {
    queue: Mutex<VecDeque<DtmfRequest>>,
    notify: Notify,
    status_tx: watch::Sender<DtmfQueueStatus>,
    status_rx: watch::Receiver<DtmfQueueStatus>,
}

/// The FIFO digit queue of one call.
#[derive(Clone)]
pub struct DtmfQueue {
    shared: Arc<Shared>,
}

impl Default for DtmfQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DtmfQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (status_tx, status_rx) = watch::channel(DtmfQueueStatus::default());
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                status_tx,
                status_rx,
            }),
        }
    }

    /// Appends a digit; the drainer picks it up in insertion order.
    pub fn enqueue(&self, request: DtmfRequest) {
        {
            let mut queue = self.shared.queue.lock().expect("Lock failed");
            queue.push_back(request);
        }
        self.publish(None);
        self.shared.notify.notify_one();
    }

    /// Returns the current queue status.
    pub fn status(&self) -> DtmfQueueStatus {
        self.shared.status_rx.borrow().clone()
    }

    /// Subscribes to queue status updates.
    pub fn subscribe(&self) -> watch::Receiver<DtmfQueueStatus> {
        self.shared.status_rx.clone()
    }

    /// Drops every pending digit and returns them for the abort report.
    pub(crate) fn flush(&self) -> Vec<DtmfRequest> {
        let aborted: Vec<_> = {
            let mut queue = self.shared.queue.lock().expect("Lock failed");
            queue.drain(..).collect()
        };
        self.publish(Some(false));
        aborted
    }

    fn pop(&self) -> Option<DtmfRequest> {
        let popped = {
            let mut queue = self.shared.queue.lock().expect("Lock failed");
            queue.pop_front()
        };
        if popped.is_some() {
            self.publish(None);
        }
        popped
    }

    fn is_empty(&self) -> bool {
        self.shared.queue.lock().expect("Lock failed").is_empty()
    }

    /// Resolves once the queue is non-empty.
    async fn ready(&self) {
        loop {
            let notified = self.shared.notify.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn publish(&self, draining: Option<bool>) {
        let (pending, pending_digits) = {
            let queue = self.shared.queue.lock().expect("Lock failed");
            (queue.len(), queue.iter().map(|r| r.digit).collect())
        };
        self.shared.status_tx.send_modify(|status| {
            status.pending = pending;
            status.pending_digits = pending_digits;
            if let Some(draining) = draining {
                status.draining = draining;
            }
        });
    }

    fn set_draining(&self, draining: bool) {
        self.shared.status_tx.send_modify(|status| status.draining = draining);
    }
}

/// Stops a drainer and joins its task.
pub(crate) struct DrainerHandle {
    token: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl DrainerHandle {
    pub(crate) async fn stop(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

/// Spawns the drainer task of one call.
pub(crate) fn spawn_drainer(
    queue: DtmfQueue,
    endpoint: Endpoint,
    dialog: Dialog,
    media: Arc<dyn MediaSession>,
    mut info_rx: watch::Receiver<CallInfo>,
) -> DrainerHandle {
    let token = CancellationToken::new();
    let child = token.clone();
    let gap = endpoint.config().dtmf_inter_digit_gap;

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = child.cancelled() => break,
                _ = queue.ready() => {}
            }

            // Digits flow only while the call is connected; in every other
            // active state the queue just waits.
            if !info_rx.borrow().state.accepts_dtmf() {
                tokio::select! {
                    _ = child.cancelled() => break,
                    changed = info_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            let Some(request) = queue.pop() else {
                continue;
            };
            queue.set_draining(true);

            let sent = match request.mode {
                DtmfMode::Info => send_info(&endpoint, &dialog, &request).await,
                DtmfMode::Rfc2833 => media.insert_dtmf(request.digit, request.duration).await,
            };
            if let Err(err) = sent {
                log::warn!("Failed to send DTMF '{}': {:#}", request.digit, err);
            }

            // Pacing: the tone plus the inter-digit gap must elapse before
            // the next digit starts.
            tokio::select! {
                _ = child.cancelled() => break,
                _ = tokio::time::sleep(request.duration + gap) => {}
            }

            if queue.is_empty() {
                queue.set_draining(false);
            }
        }

        queue.set_draining(false);
    });

    DrainerHandle { token, task }
}

async fn send_info(endpoint: &Endpoint, dialog: &Dialog, request: &DtmfRequest) -> Result<()> {
    let mut info = dialog.new_request(endpoint, SipMethod::Info);
    info.msg
        .headers
        .push(Header::ContentType(ContentType::new(MediaType::dtmf_relay())));

    let body = format!("Signal={}\nDuration={}\n", request.digit, request.duration.as_millis());
    info.msg.set_body(body.as_bytes());

    let timeout = endpoint.config().indialog_timeout;
    let mut tsx = endpoint.send_request(info, timeout).await?;

    // The answer does not gate the queue pacing; drain it on the side.
    tokio::spawn(async move {
        loop {
            match tsx.receive().await {
                Ok(response) if response.code().is_final() => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_and_status() {
        let queue = DtmfQueue::new();

        for digit in ['1', '2', '3'] {
            queue.enqueue(DtmfRequest::new(digit));
        }

        let status = queue.status();
        assert_eq!(status.pending, 3);
        assert_eq!(status.pending_digits, "123");

        assert_eq!(queue.pop().unwrap().digit, '1');
        assert_eq!(queue.pop().unwrap().digit, '2');
        assert_eq!(queue.pop().unwrap().digit, '3');
        assert!(queue.pop().is_none());

        assert_eq!(queue.status().pending, 0);
    }

    #[test]
    fn test_flush_reports_aborted_digits() {
        let queue = DtmfQueue::new();
        queue.enqueue(DtmfRequest::new('5'));
        queue.enqueue(DtmfRequest::new('#'));

        let aborted = queue.flush();
        assert_eq!(aborted.len(), 2);
        assert_eq!(aborted[1].digit, '#');
        assert!(queue.is_empty());
    }

    #[test]
    fn test_digit_validation() {
        for digit in "0123456789*#ABCD".chars() {
            assert!(is_valid_digit(digit), "{digit} should be valid");
        }
        for digit in "Exyz!%".chars() {
            assert!(!is_valid_digit(digit), "{digit} should be invalid");
        }
    }

    #[tokio::test]
    async fn test_ready_resolves_on_enqueue() {
        let queue = DtmfQueue::new();
        let waiter = queue.clone();

        let task = tokio::spawn(async move { waiter.ready().await });
        queue.enqueue(DtmfRequest::new('7'));

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("ready should resolve")
            .unwrap();
    }
}
