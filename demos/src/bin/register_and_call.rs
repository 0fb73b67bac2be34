//! Registers an account and places a call.
//!
//! ```text
//! register_and_call <user> <password> <domain> <destination>
//! ```

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use softsip::account::AccountConfig;
use softsip::config::Config;
use softsip::media::{MediaEngine, MediaEvent, MediaEventTx, MediaConnectionState, MediaSession, SdpKind};
use softsip::ua::AppEvent;
use softsip::UserAgent;
use tracing::Level;

// A stand-in for the real audio engine: answers with a static PCMU
// description and reports media up immediately.
struct NullSession(MediaEventTx);

const SDP: &str = "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=-\r\nc=IN IP4 0.0.0.0\r\nt=0 0\r\nm=audio 4000 RTP/AVP 0\r\n";

#[async_trait]
impl MediaSession for NullSession {
    async fn create_offer(&self) -> softsip::Result<String> {
        Ok(SDP.to_string())
    }

    async fn create_answer(&self, _remote_sdp: &str) -> softsip::Result<String> {
        Ok(SDP.to_string())
    }

    async fn set_remote_description(&self, _sdp: &str, _kind: SdpKind) -> softsip::Result<()> {
        let _ = self
            .0
            .send(MediaEvent::ConnectionState(MediaConnectionState::Connected))
            .await;
        Ok(())
    }

    async fn set_audio_enabled(&self, _enabled: bool) {}

    async fn set_muted(&self, _muted: bool) {}

    async fn insert_dtmf(&self, digit: char, _duration: Duration) -> softsip::Result<()> {
        tracing::info!("in-band DTMF '{digit}' requested");
        Ok(())
    }

    async fn dispose(&self) {}
}

struct NullEngine;

impl MediaEngine for NullEngine {
    fn create_session(&self, events: MediaEventTx) -> Arc<dyn MediaSession> {
        Arc::new(NullSession(events))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .with_env_filter("softsip=debug,register_and_call=info")
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new(String::from(
            "%H:%M:%S%.3f",
        )))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(user), Some(password), Some(domain), Some(destination)) =
        (args.next(), args.next(), args.next(), args.next())
    else {
        eprintln!("usage: register_and_call <user> <password> <domain> <destination>");
        std::process::exit(2);
    };

    let ua = UserAgent::start(Config::default(), Box::new(NullEngine)).await?;

    let account = AccountConfig::new(&user, &domain, &password);
    let key = account.key();
    ua.register(account);

    let mut registrations = ua.registration_states();
    loop {
        registrations.changed().await?;
        let summary = registrations.borrow().clone();
        tracing::info!("registration: {}", summary.summary);
        if summary.summary.starts_with("1/") {
            break;
        }
    }

    let call = ua.make_call(&key, &destination).await?;
    tracing::info!("calling {} (call id {})", destination, call.call_id().id());

    let mut transitions = ua.last_state_transition();
    let watcher = tokio::spawn(async move {
        while transitions.changed().await.is_ok() {
            if let Some(label) = transitions.borrow().clone() {
                tracing::info!("call: {}", label);
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    println!();

    ua.set_app_state(AppEvent::WillTerminate).await;
    watcher.abort();

    Ok(())
}
