//! Registers an account and answers every incoming call.
//!
//! ```text
//! auto_answer <user> <password> <domain>
//! ```

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use softsip::account::AccountConfig;
use softsip::call::CallState;
use softsip::config::Config;
use softsip::media::{MediaEngine, MediaEvent, MediaEventTx, MediaConnectionState, MediaSession, SdpKind};
use softsip::UserAgent;
use tracing::Level;

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

    async fn insert_dtmf(&self, _digit: char, _duration: Duration) -> softsip::Result<()> {
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
        .with_env_filter("softsip=debug,auto_answer=info")
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(user), Some(password), Some(domain)) = (args.next(), args.next(), args.next()) else {
        eprintln!("usage: auto_answer <user> <password> <domain>");
        std::process::exit(2);
    };

    let ua = UserAgent::start(Config::default(), Box::new(NullEngine)).await?;
    ua.register(AccountConfig::new(&user, &domain, &password));

    let mut calls = ua.detailed_call_state();
    let answerer = {
        let ua = ua.clone();
        tokio::spawn(async move {
            while calls.changed().await.is_ok() {
                let ringing = calls
                    .borrow()
                    .as_ref()
                    .is_some_and(|info| info.state == CallState::IncomingReceived);
                if ringing {
                    tracing::info!("answering incoming call");
                    if let Err(err) = ua.accept().await {
                        tracing::warn!("accept failed: {err}");
                    }
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    println!();
    answerer.abort();

    Ok(())
}
