//! # softsip
//!
//! A SIP user-agent core for placing and receiving voice calls over a
//! persistent connection to a SIP edge. The crate covers the protocol
//! engine (parsing, transactions, dialogs, digest auth), the call state
//! machine, the multi-account registration manager and the DTMF dispatch
//! queue; audio itself is delegated to an external media engine behind the
//! [`media::MediaSession`] trait.

pub mod account;
pub mod auth;
pub mod call;
pub mod config;
pub mod dialog;
pub mod dtmf;
pub mod endpoint;
pub mod header;
pub mod media;
pub mod message;
pub mod parser;
pub mod registration;
pub mod sdp;
pub mod transaction;
pub mod transport;
pub mod ua;

pub(crate) mod error;
pub(crate) mod macros;

pub use endpoint::{Endpoint, EndpointService};
pub use error::{Error, Result};
pub use ua::UserAgent;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

#[cfg(test)]
pub(crate) mod test_utils;
