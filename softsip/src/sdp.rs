//! Minimal SDP inspection.
//!
//! Session descriptions pass through this crate opaquely; the only things
//! the signaling plane reads out of them are the connection address (for
//! diagnostics) and the media direction attribute (for hold detection). For
//! hold re-INVITEs the direction attribute of the current description is
//! rewritten in place, everything else stays byte-identical.

/// The media direction attribute of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SdpDirection {
    /// `a=sendrecv` (also the implied default).
    #[default]
    SendRecv,
    /// `a=sendonly`, the classic local-hold direction.
    SendOnly,
    /// `a=recvonly`.
    RecvOnly,
    /// `a=inactive`, symmetric hold.
    Inactive,
}

impl SdpDirection {
    /// The attribute line for this direction, without the `a=` prefix.
    pub fn attribute(&self) -> &'static str {
        match self {
            SdpDirection::SendRecv => "sendrecv",
            SdpDirection::SendOnly => "sendonly",
            SdpDirection::RecvOnly => "recvonly",
            SdpDirection::Inactive => "inactive",
        }
    }

    /// Returns `true` if this direction means the peer hears nothing from
    /// us or we hear nothing from it.
    pub fn is_hold(&self) -> bool {
        !matches!(self, SdpDirection::SendRecv)
    }
}

/// Extracts the direction attribute of a session description.
///
/// Returns the first explicit `a=sendonly|sendrecv|recvonly|inactive` line;
/// an SDP without one means `sendrecv` per RFC3264.
pub fn direction(sdp: &str) -> SdpDirection {
    for line in sdp.lines() {
        match line.trim_end() {
            "a=sendrecv" => return SdpDirection::SendRecv,
            "a=sendonly" => return SdpDirection::SendOnly,
            "a=recvonly" => return SdpDirection::RecvOnly,
            "a=inactive" => return SdpDirection::Inactive,
            _ => (),
        }
    }

    SdpDirection::SendRecv
}

/// Extracts the connection address of the `c=` line, for diagnostics.
pub fn connection_address(sdp: &str) -> Option<&str> {
    sdp.lines()
        .find(|line| line.starts_with("c="))
        .and_then(|line| line.split_whitespace().nth(2))
}

/// Returns the description with its direction attribute replaced.
///
/// When the description carries no explicit direction line, one is appended
/// after the first `m=` line (or at the end for an audio-less blob).
pub fn with_direction(sdp: &str, direction: SdpDirection) -> String {
    let attribute = format!("a={}", direction.attribute());
    let mut replaced = false;

    let mut lines: Vec<String> = sdp
        .lines()
        .map(|line| match line.trim_end() {
            "a=sendrecv" | "a=sendonly" | "a=recvonly" | "a=inactive" => {
                replaced = true;
                attribute.clone()
            }
            _ => line.to_string(),
        })
        .collect();

    if !replaced {
        let media_idx = lines.iter().position(|line| line.starts_with("m="));
        match media_idx {
            Some(idx) => lines.insert(idx + 1, attribute),
            None => lines.push(attribute),
        }
    }

    let mut out = lines.join("\r\n");
    out.push_str("\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\n\
    o=- 20518 0 IN IP4 203.0.113.1\r\n\
    s=-\r\n\
    c=IN IP4 203.0.113.1\r\n\
    t=0 0\r\n\
    m=audio 49170 RTP/AVP 0\r\n\
    a=rtpmap:0 PCMU/8000\r\n";

    #[test]
    fn test_default_direction_is_sendrecv() {
        assert_eq!(direction(SDP), SdpDirection::SendRecv);
    }

    #[test]
    fn test_connection_address() {
        assert_eq!(connection_address(SDP), Some("203.0.113.1"));
    }

    #[test]
    fn test_with_direction_appends_after_media() {
        let held = with_direction(SDP, SdpDirection::SendOnly);

        assert_eq!(direction(&held), SdpDirection::SendOnly);
        let m_idx = held.find("m=audio").unwrap();
        let a_idx = held.find("a=sendonly").unwrap();
        assert!(a_idx > m_idx);
    }

    #[test]
    fn test_with_direction_replaces_existing() {
        let held = with_direction(SDP, SdpDirection::SendOnly);
        let resumed = with_direction(&held, SdpDirection::SendRecv);

        assert_eq!(direction(&resumed), SdpDirection::SendRecv);
        assert!(!resumed.contains("a=sendonly"));
    }

    #[test]
    fn test_hold_predicate() {
        assert!(SdpDirection::SendOnly.is_hold());
        assert!(SdpDirection::Inactive.is_hold());
        assert!(!SdpDirection::SendRecv.is_hold());
    }
}
