//! The media engine seam.
//!
//! The core never touches audio; it exchanges opaque SDP strings with an
//! external engine and flips its enable/mute switches. Everything the engine
//! must provide is the [`MediaSession`] trait below.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::Result;

/// Whether an SDP string is an offer or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    /// The SDP opens a negotiation.
    Offer,
    /// The SDP answers a received offer.
    Answer,
}

/// Connection states reported by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaConnectionState {
    /// The session was created but nothing flows yet.
    New,
    /// Transport negotiation is running.
    Connecting,
    /// Media flows.
    Connected,
    /// The media path was interrupted.
    Disconnected,
    /// The media path failed permanently.
    Failed,
    /// The session was closed.
    Closed,
}

/// Events the media engine pushes towards the call machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    /// The engine connection state changed.
    ConnectionState(MediaConnectionState),
    /// The remote audio track arrived.
    RemoteTrackAdded,
}

/// The channel media events arrive on.
pub type MediaEventTx = mpsc::Sender<MediaEvent>;

/// One media session per call, implemented by the external engine.
#[async_trait::async_trait]
pub trait MediaSession: Send + Sync + 'static {
    /// Produces the SDP offer for an outgoing call or a re-INVITE.
    async fn create_offer(&self) -> Result<String>;

    /// Produces the SDP answer to a received offer.
    async fn create_answer(&self, remote_sdp: &str) -> Result<String>;

    /// Applies the remote description.
    async fn set_remote_description(&self, sdp: &str, kind: SdpKind) -> Result<()>;

    /// Starts or stops sending and receiving audio.
    async fn set_audio_enabled(&self, enabled: bool);

    /// Mutes or unmutes the microphone.
    async fn set_muted(&self, muted: bool);

    /// Inserts an in-band RTP telephone-event digit (RFC2833).
    async fn insert_dtmf(&self, digit: char, duration: Duration) -> Result<()>;

    /// Releases the session.
    async fn dispose(&self);
}

/// Creates media sessions, one per call.
pub trait MediaEngine: Send + Sync + 'static {
    /// Creates a session whose events are pushed into `events`.
    fn create_session(&self, events: MediaEventTx) -> std::sync::Arc<dyn MediaSession>;
}
