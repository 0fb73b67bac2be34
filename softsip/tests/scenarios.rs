//! End-to-end scenarios over a scripted SIP edge.
//!
//! Each test binds a local TCP listener that plays the server side of the
//! wire protocol, answers frame by frame, and asserts what the user agent
//! puts on the wire and publishes through its observables.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use softsip::account::{AccountConfig, AccountKey};
use softsip::call::{CallInfo, CallOutcome, CallState};
use softsip::config::Config;
use softsip::dtmf::DtmfMode;
use softsip::media::{MediaEngine, MediaEvent, MediaEventTx, MediaConnectionState, MediaSession, SdpKind};
use softsip::message::{Host, HostPort};
use softsip::UserAgent;

const OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\nm=audio 4000 RTP/AVP 0\r\n";
const ANSWER_SDP: &str = "v=0\r\no=- 2 2 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\nm=audio 4002 RTP/AVP 0\r\n";

// ---- mock media engine ----------------------------------------------------

struct MockSession {
    events: MediaEventTx,
    dtmf: Arc<Mutex<Vec<char>>>,
}

#[async_trait::async_trait]
impl MediaSession for MockSession {
    async fn create_offer(&self) -> softsip::Result<String> {
        Ok(OFFER_SDP.to_string())
    }

    async fn create_answer(&self, _remote_sdp: &str) -> softsip::Result<String> {
        Ok(ANSWER_SDP.to_string())
    }

    async fn set_remote_description(&self, _sdp: &str, _kind: SdpKind) -> softsip::Result<()> {
        // The engine reports media up as soon as a remote description lands.
        let _ = self
            .events
            .send(MediaEvent::ConnectionState(MediaConnectionState::Connected))
            .await;
        Ok(())
    }

    async fn set_audio_enabled(&self, _enabled: bool) {}

    async fn set_muted(&self, _muted: bool) {}

    async fn insert_dtmf(&self, digit: char, _duration: Duration) -> softsip::Result<()> {
        self.dtmf.lock().unwrap().push(digit);
        Ok(())
    }

    async fn dispose(&self) {}
}

#[derive(Default)]
struct MockEngine {
    dtmf: Arc<Mutex<Vec<char>>>,
}

impl MediaEngine for MockEngine {
    fn create_session(&self, events: MediaEventTx) -> Arc<dyn MediaSession> {
        Arc::new(MockSession {
            events,
            dtmf: self.dtmf.clone(),
        })
    }
}

// ---- scripted edge --------------------------------------------------------

struct Edge {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Edge {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.expect("accept");
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    /// Reads one Content-Length framed message.
    async fn read_frame(&mut self) -> String {
        loop {
            if let Some(frame) = extract_frame(&mut self.buf) {
                return frame;
            }
            let mut tmp = [0u8; 4096];
            let n = self.stream.read(&mut tmp).await.expect("read");
            assert!(n > 0, "edge connection closed while waiting for a frame");
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }

    async fn send(&mut self, frame: &str) {
        self.stream.write_all(frame.as_bytes()).await.expect("write");
        self.stream.flush().await.expect("flush");
    }

    /// Builds a response echoing the dialog headers of `frame`.
    fn reply(frame: &str, code: u16, reason: &str, to_tag: Option<&str>, extra: &[String], body: Option<&str>) -> String {
        let via = header_line(frame, "Via:");
        let from = header_line(frame, "From:");
        let mut to = header_line(frame, "To:").to_string();
        if let Some(tag) = to_tag {
            if !to.contains("tag=") {
                to = format!("{to};tag={tag}");
            }
        }
        let call_id = header_line(frame, "Call-ID:");
        let cseq = header_line(frame, "CSeq:");

        let body = body.unwrap_or("");
        let mut msg = format!("SIP/2.0 {code} {reason}\r\n{via}\r\n{from}\r\n{to}\r\n{call_id}\r\n{cseq}\r\n");
        for line in extra {
            msg.push_str(line);
            msg.push_str("\r\n");
        }
        msg.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
        msg
    }
}

fn extract_frame(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
    let head = String::from_utf8_lossy(&buf[..pos + 4]).into_owned();

    let content_length: usize = head
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("content-length"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    let total = pos + 4 + content_length;
    if buf.len() < total {
        return None;
    }

    let frame: Vec<u8> = buf.drain(..total).collect();
    Some(String::from_utf8(frame).expect("utf8 frame"))
}

fn header_line<'a>(frame: &'a str, name: &str) -> &'a str {
    frame
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with(&name.to_ascii_lowercase()))
        .unwrap_or_else(|| panic!("no {name} header in:\n{frame}"))
}

fn body_of(frame: &str) -> &str {
    frame.split("\r\n\r\n").nth(1).unwrap_or("")
}

// ---- harness --------------------------------------------------------------

struct Harness {
    ua: UserAgent,
    listener: TcpListener,
    key: AccountKey,
    dtmf: Arc<Mutex<Vec<char>>>,
}

async fn harness() -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().unwrap().port();

    let engine = MockEngine::default();
    let dtmf = engine.dtmf.clone();
    let ua = UserAgent::start(Config::default(), Box::new(engine))
        .await
        .expect("start");

    let account = AccountConfig::new("alice", "ex.test", "secret")
        .with_display_name("Alice")
        .with_edge(HostPort {
            host: Host::IpAddr("127.0.0.1".parse().unwrap()),
            port: Some(port),
        });
    let key = account.key();
    ua.register(account);

    Harness {
        ua,
        listener,
        key,
        dtmf,
    }
}

/// Answers the initial REGISTER with 200 and returns the edge connection.
async fn registered_edge(h: &Harness) -> Edge {
    let mut edge = Edge::accept(&h.listener).await;

    let register = edge.read_frame().await;
    assert!(register.starts_with("REGISTER sip:ex.test SIP/2.0"));
    edge.send(&Edge::reply(&register, 200, "OK", None, &[expires(3600)], None)).await;

    wait_registered(h).await;
    edge
}

fn expires(secs: u32) -> String {
    format!("Expires: {secs}")
}

async fn wait_registered(h: &Harness) {
    let mut states = h.ua.registration_states();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if states.borrow().summary == "1/1 registered" {
                return;
            }
            states.changed().await.expect("summary channel");
        }
    })
    .await
    .expect("registration should reach OK");
}

async fn wait_state(rx: &mut watch::Receiver<Option<CallInfo>>, want: CallState) -> CallInfo {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(info) = rx.borrow().clone() {
                if info.state == want {
                    return info;
                }
                assert!(
                    !info.state.is_terminal() || want.is_terminal(),
                    "call reached terminal {:?} while waiting for {:?}",
                    info.state,
                    want
                );
            }
            rx.changed().await.expect("call info channel");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"))
}

// ---- S3: auth protected REGISTER ------------------------------------------

#[test_log::test(tokio::test)]
async fn register_answers_digest_challenge() {
    let h = harness().await;
    let mut edge = Edge::accept(&h.listener).await;

    let first = edge.read_frame().await;
    assert!(first.starts_with("REGISTER sip:ex.test SIP/2.0"));
    assert!(!first.contains("Authorization:"));

    let challenge =
        "WWW-Authenticate: Digest realm=\"ex.test\", nonce=\"abc\", qop=\"auth\"".to_string();
    edge.send(&Edge::reply(&first, 401, "Unauthorized", None, &[challenge], None)).await;

    let second = edge.read_frame().await;
    let auth = header_line(&second, "Authorization:");
    assert!(auth.contains("username=\"alice\""));
    assert!(auth.contains("realm=\"ex.test\""));
    assert!(auth.contains("nonce=\"abc\""));
    assert!(auth.contains("uri=\"sip:ex.test\""));
    assert!(auth.contains("qop=auth"));
    assert!(auth.contains("nc=00000001"));

    // The response is a 32 digit hex md5.
    let response_param = auth.split("response=\"").nth(1).unwrap();
    let digest = &response_param[..response_param.find('"').unwrap()];
    assert_eq!(digest.len(), 32);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));

    // The CSeq advanced between the two attempts.
    let cseq_of = |frame: &str| {
        header_line(frame, "CSeq:")
            .split_whitespace()
            .nth(1)
            .unwrap()
            .parse::<u32>()
            .unwrap()
    };
    assert!(cseq_of(&second) > cseq_of(&first));

    edge.send(&Edge::reply(&second, 200, "OK", None, &[expires(3600)], None)).await;
    wait_registered(&h).await;

    let summary = h.ua.registration_states().borrow().clone();
    assert_eq!(summary.summary, "1/1 registered");
}

// ---- S1: outgoing call success --------------------------------------------

#[test_log::test(tokio::test)]
async fn outgoing_call_success() {
    let h = harness().await;
    let mut edge = registered_edge(&h).await;
    let mut log = h.ua.call_log_events().expect("log stream");

    let call = h.ua.make_call(&h.key, "bob").await.expect("make_call");
    let mut states = h.ua.detailed_call_state();

    let invite = edge.read_frame().await;
    assert!(invite.starts_with("INVITE sip:bob@ex.test SIP/2.0"));
    assert!(body_of(&invite).contains("m=audio"));
    assert!(header_line(&invite, "From:").contains("tag="));

    edge.send(&Edge::reply(&invite, 100, "Trying", None, &[], None)).await;
    wait_state(&mut states, CallState::OutgoingProgress).await;

    edge.send(&Edge::reply(&invite, 180, "Ringing", Some("totag1"), &[], None)).await;
    wait_state(&mut states, CallState::OutgoingRinging).await;

    let contact = "Contact: <sip:bob@127.0.0.1:5070>".to_string();
    let ctype = "Content-Type: application/sdp".to_string();
    edge.send(&Edge::reply(&invite, 200, "OK", Some("totag1"), &[contact, ctype], Some(ANSWER_SDP)))
        .await;

    let ack = edge.read_frame().await;
    assert!(ack.starts_with("ACK sip:bob@127.0.0.1:5070 SIP/2.0"));
    assert!(header_line(&ack, "CSeq:").contains("1 ACK"));

    let info = wait_state(&mut states, CallState::StreamsRunning).await;
    assert!(info.started_at.is_some());

    // Hold long enough for the duration to round to a full second.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(h.ua.call_duration().unwrap() >= 1000);

    h.ua.hangup().await.expect("hangup");
    let bye = edge.read_frame().await;
    assert!(bye.starts_with("BYE sip:bob@127.0.0.1:5070 SIP/2.0"));
    assert!(header_line(&bye, "CSeq:").contains("2 BYE"));
    edge.send(&Edge::reply(&bye, 200, "OK", None, &[], None)).await;

    wait_state(&mut states, CallState::Ended).await;

    let entry = log.recv().await.expect("log entry");
    assert_eq!(entry.id, *call.call_id());
    assert_eq!(entry.outcome, CallOutcome::Success);
    assert!(entry.duration_secs >= 1);
}

// ---- S2: outgoing busy ----------------------------------------------------

#[test_log::test(tokio::test)]
async fn outgoing_call_busy() {
    let h = harness().await;
    let mut edge = registered_edge(&h).await;
    let mut log = h.ua.call_log_events().expect("log stream");

    h.ua.make_call(&h.key, "bob").await.expect("make_call");
    let mut states = h.ua.detailed_call_state();

    let invite = edge.read_frame().await;
    edge.send(&Edge::reply(&invite, 100, "Trying", None, &[], None)).await;
    wait_state(&mut states, CallState::OutgoingProgress).await;

    edge.send(&Edge::reply(&invite, 486, "Busy Here", Some("totag2"), &[], None)).await;

    let info = wait_state(&mut states, CallState::Error).await;
    assert_eq!(info.sip_code, Some(486));
    assert_eq!(info.reason, softsip::call::CallErrorReason::Busy);

    // The failure is acknowledged on the INVITE branch.
    let ack = edge.read_frame().await;
    assert!(ack.starts_with("ACK "));
    let branch_of = |frame: &str| {
        let via = header_line(frame, "Via:").to_string();
        via.split("branch=").nth(1).unwrap().trim().to_string()
    };
    assert_eq!(branch_of(&invite), branch_of(&ack));

    let entry = log.recv().await.expect("log entry");
    assert_eq!(entry.outcome, CallOutcome::Aborted);
    assert_eq!(entry.duration_secs, 0);
}

// ---- S4: incoming decline -------------------------------------------------

#[test_log::test(tokio::test)]
async fn incoming_call_declined() {
    let h = harness().await;
    let mut edge = registered_edge(&h).await;
    let mut log = h.ua.call_log_events().expect("log stream");
    let mut states = h.ua.detailed_call_state();

    let invite = format!(
        "INVITE sip:alice@ex.test SIP/2.0\r\n\
         Via: SIP/2.0/TCP 127.0.0.1:5070;branch=z9hG4bKcarol1\r\n\
         Max-Forwards: 70\r\n\
         From: Carol <sip:carol@ex.test>;tag=caroltag\r\n\
         To: Alice <sip:alice@ex.test>\r\n\
         Call-ID: carol-call-1@ex.test\r\n\
         CSeq: 1 INVITE\r\n\
         Contact: <sip:carol@127.0.0.1:5070>\r\n\
         Content-Type: application/sdp\r\n\
         Content-Length: {}\r\n\r\n{}",
        OFFER_SDP.len(),
        OFFER_SDP
    );
    edge.send(&invite).await;

    let trying = edge.read_frame().await;
    assert!(trying.starts_with("SIP/2.0 100 Trying"));

    let ringing = edge.read_frame().await;
    assert!(ringing.starts_with("SIP/2.0 180 Ringing"));
    assert!(header_line(&ringing, "To:").contains("tag="));

    let info = wait_state(&mut states, CallState::IncomingReceived).await;
    assert!(info.remote.to_string().contains("carol@ex.test"));

    h.ua.decline().await.expect("decline");

    let decline = edge.read_frame().await;
    assert!(decline.starts_with("SIP/2.0 603 Decline"));

    // Acknowledge the final response to let the server transaction finish.
    let ack = format!(
        "ACK sip:alice@ex.test SIP/2.0\r\n\
         Via: SIP/2.0/TCP 127.0.0.1:5070;branch=z9hG4bKcarol1\r\n\
         From: Carol <sip:carol@ex.test>;tag=caroltag\r\n\
         {}\r\n\
         Call-ID: carol-call-1@ex.test\r\n\
         CSeq: 1 ACK\r\n\
         Content-Length: 0\r\n\r\n",
        header_line(&decline, "To:")
    );
    edge.send(&ack).await;

    wait_state(&mut states, CallState::Ended).await;

    let entry = log.recv().await.expect("log entry");
    assert_eq!(entry.outcome, CallOutcome::Declined);
}

// ---- S5: DTMF ordering ----------------------------------------------------

#[test_log::test(tokio::test)]
async fn dtmf_info_ordering_and_pacing() {
    let h = harness().await;
    let mut edge = registered_edge(&h).await;

    h.ua.make_call(&h.key, "bob").await.expect("make_call");
    let mut states = h.ua.detailed_call_state();

    let invite = edge.read_frame().await;
    let contact = "Contact: <sip:bob@127.0.0.1:5070>".to_string();
    let ctype = "Content-Type: application/sdp".to_string();
    edge.send(&Edge::reply(&invite, 200, "OK", Some("totag5"), &[contact, ctype], Some(ANSWER_SDP)))
        .await;
    let _ack = edge.read_frame().await;
    wait_state(&mut states, CallState::StreamsRunning).await;

    for digit in ['1', '2', '3'] {
        h.ua.send_dtmf(digit, Some(Duration::from_millis(120)), None).expect("enqueue");
    }

    let mut arrivals = Vec::new();
    for expected in ["1", "2", "3"] {
        let info = edge.read_frame().await;
        arrivals.push(Instant::now());
        assert!(info.starts_with("INFO sip:bob@127.0.0.1:5070 SIP/2.0"));
        assert!(header_line(&info, "Content-Type:").contains("application/dtmf-relay"));
        assert_eq!(body_of(&info), format!("Signal={expected}\nDuration=120\n"));
        edge.send(&Edge::reply(&info, 200, "OK", None, &[], None)).await;
    }

    // Pacing: tone (120ms) plus gap (40ms) between successive sends.
    for pair in arrivals.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(140), "digits too close: {gap:?}");
    }

    // The queue drained completely.
    let status = h.ua.dtmf_queue_status().expect("active call");
    assert_eq!(status.pending, 0);
    assert_eq!(status.pending_digits, "");

    // RFC2833 digits go to the media engine instead of the wire.
    h.ua.send_dtmf('9', None, Some(DtmfMode::Rfc2833)).expect("enqueue");
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if h.dtmf.lock().unwrap().as_slice() == ['9'].as_slice() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("media engine should receive the digit");
}

// ---- S6: transport drop during a call -------------------------------------

#[test_log::test(tokio::test)]
async fn network_drop_fails_call_and_reregisters() {
    let h = harness().await;
    let mut edge = registered_edge(&h).await;

    h.ua.make_call(&h.key, "bob").await.expect("make_call");
    let mut states = h.ua.detailed_call_state();

    let invite = edge.read_frame().await;
    let contact = "Contact: <sip:bob@127.0.0.1:5070>".to_string();
    let ctype = "Content-Type: application/sdp".to_string();
    edge.send(&Edge::reply(&invite, 200, "OK", Some("totag6"), &[contact, ctype], Some(ANSWER_SDP)))
        .await;
    let _ack = edge.read_frame().await;
    wait_state(&mut states, CallState::StreamsRunning).await;

    // The edge dies under the call.
    drop(edge);

    let info = wait_state(&mut states, CallState::Error).await;
    assert_eq!(info.reason, softsip::call::CallErrorReason::NetworkError);

    // The account reconnects and registers again.
    let mut edge = Edge::accept(&h.listener).await;
    let register = edge.read_frame().await;
    assert!(register.starts_with("REGISTER sip:ex.test SIP/2.0"));
    edge.send(&Edge::reply(&register, 200, "OK", None, &[expires(3600)], None)).await;

    wait_registered(&h).await;
}
