use core::fmt;
use std::net::IpAddr;

use util::ArcStr;

use crate::error::Result;
use crate::header::HeaderParse;
use crate::message::{HostPort, Parameters};
use crate::parser::{Parser, SIPV2};
use crate::transport::TransportKind;

const BRANCH_PARAM: &str = "branch";
const RPORT_PARAM: &str = "rport";
const RECEIVED_PARAM: &str = "received";

/// The branch prefix every RFC3261 transaction id starts with.
pub const BRANCH_RFC3261_COOKIE: &str = "z9hG4bK";

/// The `Via` SIP header.
///
/// Indicates the path taken by the request so far and the
/// path that should be followed in routing responses.
///
/// # Examples
/// ```
/// # use softsip::header::Via;
/// # use std::str::FromStr;
///
/// let via = Via::new_tcp(
///     "client.ex.test:5060".parse().unwrap(),
///     Some("z9hG4bKnashds8"),
/// );
///
/// assert_eq!(
///     "Via: SIP/2.0/TCP client.ex.test:5060;branch=z9hG4bKnashds8",
///     via.to_string()
/// );
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Via {
    transport: TransportKind,
    sent_by: HostPort,
    received: Option<IpAddr>,
    branch: Option<ArcStr>,
    rport: Option<u16>,
    params: Option<Parameters>,
}

impl Via {
    /// Creates a new `Via` header with TCP transport and optional branch.
    ///
    /// # Arguments
    /// * `sent_by` - The host and optional port to which responses should be
    ///   sent.
    /// * `branch` - Optional branch parameter to identify the transaction.
    pub fn new_tcp(sent_by: HostPort, branch: Option<&str>) -> Self {
        Self::new(TransportKind::Tcp, sent_by, branch)
    }

    /// Creates a new `Via` header.
    pub fn new(transport: TransportKind, sent_by: HostPort, branch: Option<&str>) -> Self {
        Self {
            transport,
            sent_by,
            received: None,
            branch: branch.map(|b| b.into()),
            rport: None,
            params: None,
        }
    }

    /// Set the `received` parameter.
    pub fn set_received(&mut self, received: IpAddr) {
        self.received = Some(received);
    }

    /// Returns the `received` parameter.
    pub fn received(&self) -> Option<IpAddr> {
        self.received
    }

    /// Returns the `transport`.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Returns the `rport`.
    pub fn rport(&self) -> Option<u16> {
        self.rport
    }

    /// Set the sent_by field.
    pub fn set_sent_by(&mut self, sent_by: HostPort) {
        self.sent_by = sent_by;
    }

    /// Returns the branch parameter.
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Returns the sent_by field.
    pub fn sent_by(&self) -> &HostPort {
        &self.sent_by
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}/{} {}", Via::NAME, SIPV2, self.transport, self.sent_by)?;

        if let Some(rport) = self.rport {
            write!(f, ";rport={}", rport)?;
        }
        if let Some(received) = &self.received {
            write!(f, ";received={received}")?;
        }
        if let Some(branch) = &self.branch {
            write!(f, ";branch={branch}")?;
        }
        if let Some(params) = &self.params {
            write!(f, "{params}")?;
        }

        Ok(())
    }
}

impl HeaderParse for Via {
    const NAME: &'static str = "Via";
    const SHORT_NAME: Option<&'static str> = Some("v");

    /*
     * Via               =  ( "Via" / "v" ) HCOLON via-parm *(COMMA via-parm)
     * via-parm          =  sent-protocol LWS sent-by *( SEMI via-params )
     * via-params        =  via-ttl / via-maddr
     *                      / via-received / via-branch
     *                      / via-extension
     * via-received      =  "received" EQUAL (IPv4address / IPv6address)
     * via-branch        =  "branch" EQUAL token
     * sent-protocol     =  protocol-name SLASH protocol-version
     *                      SLASH transport
     * sent-by           =  host [ COLON port ]
     */
    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        parser.take_ws();
        parser.parse_sip_v2()?;
        parser.advance();

        let b = parser.read_until_byte(b' ');
        let transport = b.into();

        parser.take_ws();

        let sent_by = parser.parse_host_port()?;
        let mut branch = None;
        let mut received = None;
        let mut rport_p = None;
        let params = crate::macros::parse_param!(
            parser,
            BRANCH_PARAM = branch,
            RECEIVED_PARAM = received,
            RPORT_PARAM = rport_p
        );
        let received = received.and_then(|r: &str| r.parse().ok());
        let rport = rport_p.and_then(|rport: &str| rport.parse().ok());

        Ok(Via {
            transport,
            sent_by,
            params,
            received,
            branch: branch.map(|b: &str| b.into()),
            rport,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::message::Host;

    #[test]
    fn test_parse() {
        let src = b"SIP/2.0/TCP bobspc.biloxi.com:5060;received=192.0.2.4\r\n";
        let via = Via::parse(&mut Parser::new(src)).unwrap();

        assert_eq!(via.transport, TransportKind::Tcp);
        assert_eq!(
            via.sent_by,
            HostPort {
                host: Host::DomainName("bobspc.biloxi.com".into()),
                port: Some(5060)
            }
        );

        assert_eq!(via.received, Some("192.0.2.4".parse().unwrap()));
    }

    #[test]
    fn test_parse_branch() {
        let src = b"SIP/2.0/TCP 192.0.2.1:5060 ;received=192.0.2.207 \
        ;branch=z9hG4bK77asjd\r\n";
        let via = Via::parse(&mut Parser::new(src)).unwrap();

        assert_eq!(via.transport, TransportKind::Tcp);
        assert_eq!(
            via.sent_by,
            HostPort {
                host: Host::IpAddr(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))),
                port: Some(5060)
            }
        );

        assert_eq!(via.received, Some("192.0.2.207".parse().unwrap()));
        assert_eq!(via.branch(), Some("z9hG4bK77asjd"));
    }
}
