use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::config::ProbeProtocol;

/// One outbound measurement packet.
///
/// `(identifier, sequence)` names the probe while it is in flight. The port
/// and checksum fields are only set when the flow policy pins them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub identifier: u16,
    pub sequence: u16,
    pub ttl: u8,
    pub protocol: ProbeProtocol,
    /// UDP source port; None lets the kernel pick an ephemeral port
    pub src_port: Option<u16>,
    /// UDP destination port (unused for ICMP)
    pub dst_port: u16,
    /// Checksum to pin: the shared ICMP checksum of a Paris flow, or the
    /// per-probe UDP checksum that tells pinned-port probes apart
    pub checksum: Option<u16>,
    pub payload_size: usize,
}

impl Probe {
    /// Plain ICMP echo probe, as used by ping
    pub fn icmp(identifier: u16, sequence: u16, ttl: u8, payload_size: usize) -> Self {
        Self {
            identifier,
            sequence,
            ttl,
            protocol: ProbeProtocol::Icmp,
            src_port: None,
            dst_port: 0,
            checksum: None,
            payload_size,
        }
    }
}

/// Classification of an inbound ICMP message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    EchoReply,
    TimeExceeded,
    DestinationUnreachable,
    Malformed,
}

/// An inbound response correlated to a probe
#[derive(Debug, Clone)]
pub struct Reply {
    pub source: IpAddr,
    pub kind: ReplyKind,
    /// ICMP message length (IP header excluded)
    pub bytes: usize,
    /// TTL of the reply's IP header
    pub reply_ttl: u8,
    pub sent_at: Instant,
    pub received_at: Instant,
}

impl Reply {
    pub fn rtt(&self) -> Duration {
        self.received_at.saturating_duration_since(self.sent_at)
    }
}

/// Result of one send/await cycle
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Reply(Reply),
    Loss,
}

impl ProbeOutcome {
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Self::Reply(reply) => Some(reply),
            Self::Loss => None,
        }
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.reply().map(Reply::rtt)
    }

    pub fn is_loss(&self) -> bool {
        matches!(self, Self::Loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_reply_rtt() {
        let sent_at = Instant::now();
        let reply = Reply {
            source: IpAddr::V4(Ipv4Addr::LOCALHOST),
            kind: ReplyKind::EchoReply,
            bytes: 64,
            reply_ttl: 64,
            sent_at,
            received_at: sent_at + Duration::from_millis(12),
        };
        assert_eq!(reply.rtt(), Duration::from_millis(12));

        let outcome = ProbeOutcome::Reply(reply);
        assert_eq!(outcome.rtt(), Some(Duration::from_millis(12)));
        assert!(!outcome.is_loss());
    }

    #[test]
    fn test_loss_has_no_rtt() {
        assert!(ProbeOutcome::Loss.rtt().is_none());
        assert!(ProbeOutcome::Loss.is_loss());
    }
}
