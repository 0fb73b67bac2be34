//! SIP accounts.
//!
//! An account is one AOR on one registrar. Its configuration feeds both the
//! registration loop and the identity headers of the calls it owns.

use std::fmt;
use std::net::SocketAddr;

use util::ArcStr;

use crate::auth::Credentials;
use crate::message::{Host, HostPort, NameAddr, Scheme, SipAddr, Uri, UserInfo};
use crate::transport::Transport;

/// Identifies an account as `(user, domain)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountKey {
    /// The user part of the AOR.
    pub user: ArcStr,
    /// The domain part of the AOR.
    pub domain: ArcStr,
}

impl AccountKey {
    /// Creates a new account key.
    pub fn new(user: &str, domain: &str) -> Self {
        Self {
            user: user.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.domain)
    }
}

/// Push wake-up parameters carried in the registration contact while the
/// application is backgrounded.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// The push provider tag (`pn-provider`).
    pub provider: String,
    /// The push registration id (`pn-prid`).
    pub prid: String,
    /// The provider specific parameter (`pn-param`).
    pub param: String,
}

/// Everything the core needs to operate one account.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    /// The user part of the AOR.
    pub user: String,
    /// The domain part of the AOR.
    pub domain: String,
    /// The display name placed before the AOR in From headers.
    pub display_name: Option<String>,
    /// The digest credentials.
    pub credentials: Credentials,
    /// The SIP edge the persistent connection goes to. Defaults to the
    /// domain on the transport default port.
    pub edge: HostPort,
    /// The push wake-up parameters, when the application can be woken.
    pub push: Option<PushConfig>,
}

impl AccountConfig {
    /// Creates an account configuration with the edge defaulted to the
    /// domain itself.
    pub fn new(user: &str, domain: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            domain: domain.to_string(),
            display_name: None,
            credentials: Credentials::new(user, password),
            edge: HostPort {
                host: Host::DomainName(domain.into()),
                port: None,
            },
            push: None,
        }
    }

    /// Sets the display name.
    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = Some(name.to_string());
        self
    }

    /// Sets the SIP edge address.
    pub fn with_edge(mut self, edge: HostPort) -> Self {
        self.edge = edge;
        self
    }

    /// Sets the push wake-up parameters.
    pub fn with_push(mut self, push: PushConfig) -> Self {
        self.push = Some(push);
        self
    }

    /// Returns the account key.
    pub fn key(&self) -> AccountKey {
        AccountKey::new(&self.user, &self.domain)
    }

    /// The address-of-record uri, `sip:user@domain`.
    pub fn aor(&self) -> Uri {
        Uri::new(
            Scheme::Sip,
            Some(UserInfo::new(&self.user, None)),
            HostPort {
                host: Host::DomainName(self.domain.as_str().into()),
                port: None,
            },
        )
    }

    /// The AOR with the display name, as placed in From/To headers.
    pub fn address(&self) -> SipAddr {
        SipAddr::NameAddr(NameAddr::new(self.aor(), self.display_name.as_deref()))
    }

    /// The registrar uri, `sip:domain`.
    pub fn registrar(&self) -> Uri {
        Uri::new(
            Scheme::Sip,
            None,
            HostPort {
                host: Host::DomainName(self.domain.as_str().into()),
                port: None,
            },
        )
    }

    /// The contact uri wrapped in angle brackets, ready for a `Contact`
    /// header.
    pub fn contact_addr(&self, transport: &Transport) -> SipAddr {
        SipAddr::NameAddr(NameAddr::new(self.contact(transport), None))
    }

    /// The contact uri for the given connection.
    pub fn contact(&self, transport: &Transport) -> Uri {
        Uri::new(
            Scheme::Sip,
            Some(UserInfo::new(&self.user, None)),
            contact_host(transport.addr()),
        )
    }

    /// The contact uri registered while in push mode; carries the
    /// `pn-provider`, `pn-prid` and `pn-param` parameters so the registrar
    /// can wake the device.
    pub fn push_contact(&self, transport: &Transport) -> Option<Uri> {
        let push = self.push.as_ref()?;

        let uri = Uri::builder()
            .scheme(Scheme::Sip)
            .user(UserInfo::new(&self.user, None))
            .host(contact_host(transport.addr()))
            .param("pn-provider", Some(&push.provider))
            .param("pn-prid", Some(&push.prid))
            .param("pn-param", Some(&push.param))
            .build();

        Some(uri)
    }
}

// A socket bound to the wildcard address is useless in a Contact; fall back
// to the machine's primary interface.
fn contact_host(addr: SocketAddr) -> HostPort {
    let ip = if addr.ip().is_unspecified() {
        local_ip_address::local_ip().unwrap_or(addr.ip())
    } else {
        addr.ip()
    };

    HostPort {
        host: Host::IpAddr(ip),
        port: Some(addr.port()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aor_and_key() {
        let account = AccountConfig::new("alice", "ex.test", "secret");

        assert_eq!(account.key().to_string(), "alice@ex.test");
        assert_eq!(account.aor().to_string(), "sip:alice@ex.test");
        assert_eq!(account.registrar().to_string(), "sip:ex.test");
    }

    #[test]
    fn test_address_carries_display_name() {
        let account = AccountConfig::new("alice", "ex.test", "secret").with_display_name("Alice");

        assert_eq!(account.address().to_string(), "Alice <sip:alice@ex.test>");
    }
}
