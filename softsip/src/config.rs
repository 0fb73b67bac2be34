//! User agent configuration.

use std::time::Duration;

/// Timeouts and defaults for the user agent core.
///
/// Every timer the core arms is taken from here, so tests can shrink them
/// and deployments can stretch them.
#[derive(Debug, Clone)]
pub struct Config {
    /// The product string placed in `User-Agent` headers.
    pub user_agent: String,
    /// How long an INVITE may wait for a final response.
    pub invite_timeout: Duration,
    /// How long a REGISTER may wait for a final response.
    pub register_timeout: Duration,
    /// How long any in-dialog request may wait for a final response.
    pub indialog_timeout: Duration,
    /// How long a transport write may block before the link counts as dead.
    pub write_timeout: Duration,
    /// The registration lifetime requested from the registrar, in seconds.
    pub register_expires: u32,
    /// The tone length of a DTMF digit when the caller does not pick one.
    pub dtmf_digit_duration: Duration,
    /// The silence between two queued DTMF digits.
    pub dtmf_inter_digit_gap: Duration,
    /// How long a terminated call lingers in the store to absorb late
    /// retransmissions.
    pub call_linger: Duration,
    /// The bound on best-effort cleanup (BYEs, unregister) at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: concat!("softsip/", env!("CARGO_PKG_VERSION")).to_string(),
            invite_timeout: Duration::from_secs(180),
            register_timeout: Duration::from_secs(32),
            indialog_timeout: Duration::from_secs(32),
            write_timeout: Duration::from_secs(10),
            register_expires: 3600,
            dtmf_digit_duration: Duration::from_millis(160),
            dtmf_inter_digit_gap: Duration::from_millis(40),
            call_linger: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}
