//! Protocol strategies.
//!
//! The hop sweep never looks at the protocol; it hands a `Probe` to the
//! transport, which asks the codec for the wire bytes and whether a parsed
//! reply answers that probe.

use std::net::IpAddr;

use crate::config::ProbeProtocol;
use crate::probe::correlate::{ParsedReply, QuotedProbe};
use crate::probe::icmp::{build_echo_request, build_echo_request_with_checksum};
use crate::probe::udp::build_udp_payload;
use crate::state::{Probe, ReplyKind};

pub trait ProbeCodec: Send + Sync {
    /// Bytes handed to the socket: a full ICMP message, or a UDP payload
    fn encode(&self, probe: &Probe) -> Vec<u8>;

    /// Whether `reply` answers `probe` sent to `destination`
    fn matches(&self, reply: &ParsedReply, probe: &Probe, destination: IpAddr) -> bool;
}

pub struct IcmpCodec;

impl ProbeCodec for IcmpCodec {
    fn encode(&self, probe: &Probe) -> Vec<u8> {
        match probe.checksum {
            Some(checksum) => build_echo_request_with_checksum(
                probe.identifier,
                probe.sequence,
                probe.payload_size,
                checksum,
            ),
            None => build_echo_request(probe.identifier, probe.sequence, probe.payload_size),
        }
    }

    fn matches(&self, reply: &ParsedReply, probe: &Probe, destination: IpAddr) -> bool {
        match (reply.kind, reply.quoted) {
            (ReplyKind::EchoReply, _) => {
                reply.source == destination
                    && reply.header.identifier == probe.identifier
                    && reply.header.sequence == probe.sequence
            }
            (
                ReplyKind::TimeExceeded | ReplyKind::DestinationUnreachable,
                Some(QuotedProbe::Icmp {
                    destination: quoted_dest,
                    identifier,
                    sequence,
                }),
            ) => {
                IpAddr::V4(quoted_dest) == destination
                    && identifier == probe.identifier
                    && sequence == probe.sequence
            }
            _ => false,
        }
    }
}

pub struct UdpCodec;

impl ProbeCodec for UdpCodec {
    /// A pinned `probe.checksum` is applied by the transport, which knows the source address.
    fn encode(&self, probe: &Probe) -> Vec<u8> {
        build_udp_payload(probe.identifier, probe.sequence, probe.payload_size)
    }

    /// The transport fills `probe.src_port` with the bound port before matching.
    fn matches(&self, reply: &ParsedReply, probe: &Probe, destination: IpAddr) -> bool {
        let Some(QuotedProbe::Udp {
            destination: quoted_dest,
            src_port,
            dst_port,
            checksum,
            probe_id,
        }) = reply.quoted
        else {
            return false;
        };
        if !matches!(reply.kind, ReplyKind::TimeExceeded | ReplyKind::DestinationUnreachable)
            || IpAddr::V4(quoted_dest) != destination
            || Some(src_port) != probe.src_port
            || dst_port != probe.dst_port
        {
            return false;
        }

        match (probe_id, probe.checksum) {
            (Some(id), _) => id == (probe.identifier, probe.sequence),
            // 8-byte quote of a pinned flow: every probe shares the ports
            (None, Some(expected)) => checksum == expected,
            // classic ports belong to one probe
            (None, None) => true,
        }
    }
}

pub fn codec_for(protocol: ProbeProtocol) -> &'static dyn ProbeCodec {
    match protocol {
        ProbeProtocol::Icmp => &IcmpCodec,
        ProbeProtocol::Udp => &UdpCodec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::correlate::parse_reply;
    use crate::config::Config;
    use crate::probe::correlate::tests::{
        echo_reply_datagram, icmp_error_datagram, quoted_echo, quoted_udp, quoted_udp_with_checksum,
    };
    use crate::probe::icmp::{ICMP_DEST_UNREACHABLE, ICMP_TIME_EXCEEDED, internet_checksum};
    use crate::trace::{FlowPolicy, ParisFlow};
    use std::net::Ipv4Addr;

    const ROUTER: Ipv4Addr = Ipv4Addr::new(10, 1, 1, 1);
    const DEST: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

    fn udp_probe(sequence: u16, src_port: u16, dst_port: u16) -> Probe {
        Probe {
            protocol: ProbeProtocol::Udp,
            src_port: Some(src_port),
            dst_port,
            ..Probe::icmp(0, sequence, 4, 32)
        }
    }

    #[test]
    fn test_icmp_encode_respects_pinned_checksum() {
        let mut probe = Probe::icmp(0x7777, 12, 3, 56);
        probe.checksum = Some(0x1234);
        let wire = IcmpCodec.encode(&probe);
        assert_eq!(&wire[2..4], &[0x12, 0x34]);
        assert_eq!(internet_checksum(&wire), 0);
    }

    #[test]
    fn test_icmp_echo_reply_matches_exact_pair() {
        let packet = echo_reply_datagram(DEST, 0x0102, 9);
        let reply = parse_reply(&packet, IpAddr::V4(DEST)).unwrap();

        assert!(IcmpCodec.matches(&reply, &Probe::icmp(0x0102, 9, 64, 56), IpAddr::V4(DEST)));
        assert!(!IcmpCodec.matches(&reply, &Probe::icmp(0x0102, 10, 64, 56), IpAddr::V4(DEST)));
        assert!(!IcmpCodec.matches(&reply, &Probe::icmp(0x0103, 9, 64, 56), IpAddr::V4(DEST)));
    }

    #[test]
    fn test_icmp_echo_reply_from_other_host_ignored() {
        let packet = echo_reply_datagram(ROUTER, 0x0102, 9);
        let reply = parse_reply(&packet, IpAddr::V4(ROUTER)).unwrap();
        assert!(!IcmpCodec.matches(&reply, &Probe::icmp(0x0102, 9, 64, 56), IpAddr::V4(DEST)));
    }

    #[test]
    fn test_icmp_time_exceeded_matches_quoted_probe() {
        let packet = icmp_error_datagram(ROUTER, ICMP_TIME_EXCEEDED, 0, &quoted_echo(DEST, 0x0102, 4));
        let reply = parse_reply(&packet, IpAddr::V4(ROUTER)).unwrap();

        assert!(IcmpCodec.matches(&reply, &Probe::icmp(0x0102, 4, 2, 56), IpAddr::V4(DEST)));
        // quoted probe was headed elsewhere
        assert!(!IcmpCodec.matches(&reply, &Probe::icmp(0x0102, 4, 2, 56), IpAddr::V4(ROUTER)));
        assert!(!UdpCodec.matches(&reply, &udp_probe(4, 50000, 33434), IpAddr::V4(DEST)));
    }

    fn paris_udp_flow() -> ParisFlow {
        let config = Config {
            protocol: ProbeProtocol::Udp,
            src_port: 41000,
            port: 33434,
            ..Config::default()
        };
        ParisFlow::new(&config, 0x0F0F)
    }

    #[test]
    fn test_udp_matches_ports_and_sequence() {
        let payload = build_udp_payload(0, 21, 32);
        let packet = icmp_error_datagram(
            ROUTER,
            ICMP_TIME_EXCEEDED,
            0,
            &quoted_udp(DEST, 50000, 33434, &payload),
        );
        let reply = parse_reply(&packet, IpAddr::V4(ROUTER)).unwrap();

        assert!(UdpCodec.matches(&reply, &udp_probe(21, 50000, 33434), IpAddr::V4(DEST)));
        assert!(!UdpCodec.matches(&reply, &udp_probe(22, 50000, 33434), IpAddr::V4(DEST)));
        assert!(!UdpCodec.matches(&reply, &udp_probe(21, 50001, 33434), IpAddr::V4(DEST)));
        assert!(!UdpCodec.matches(&reply, &udp_probe(21, 50000, 33435), IpAddr::V4(DEST)));
    }

    #[test]
    fn test_udp_quoted_identifier_must_match() {
        let payload = build_udp_payload(0xAAAA, 4, 32);
        let packet = icmp_error_datagram(
            ROUTER,
            ICMP_TIME_EXCEEDED,
            0,
            &quoted_udp(DEST, 41000, 33434, &payload),
        );
        let reply = parse_reply(&packet, IpAddr::V4(ROUTER)).unwrap();

        let mut ours = udp_probe(4, 41000, 33434);
        ours.identifier = 0xAAAA;
        let mut other_session = ours.clone();
        other_session.identifier = 0xBBBB;

        assert!(UdpCodec.matches(&reply, &ours, IpAddr::V4(DEST)));
        assert!(!UdpCodec.matches(&reply, &other_session, IpAddr::V4(DEST)));
    }

    #[test]
    fn test_classic_minimal_quote_matches_on_ports() {
        let packet = icmp_error_datagram(
            DEST,
            ICMP_DEST_UNREACHABLE,
            3,
            &quoted_udp(DEST, 41000, 33437, &[]),
        );
        let reply = parse_reply(&packet, IpAddr::V4(DEST)).unwrap();
        assert!(UdpCodec.matches(&reply, &udp_probe(3, 41000, 33437), IpAddr::V4(DEST)));
    }

    #[test]
    fn test_pinned_flow_minimal_quote_needs_checksum() {
        let flow = paris_udp_flow();
        // header-only quote of the probe sent at ttl 2, sequence 3
        let sent = flow.probe(2, 3);
        let quote = quoted_udp_with_checksum(DEST, 41000, 33434, sent.checksum.unwrap(), &[]);
        let packet = icmp_error_datagram(ROUTER, ICMP_TIME_EXCEEDED, 0, &quote);
        let reply = parse_reply(&packet, IpAddr::V4(ROUTER)).unwrap();

        assert!(UdpCodec.matches(&reply, &sent, IpAddr::V4(DEST)));
        for (ttl, seq) in [(1u8, 0u16), (5, 14), (64, 90)] {
            assert!(
                !UdpCodec.matches(&reply, &flow.probe(ttl, seq), IpAddr::V4(DEST)),
                "ttl {ttl} seq {seq}"
            );
        }
    }

    #[test]
    fn test_pinned_flow_bare_quote_matches_nothing() {
        let flow = paris_udp_flow();
        let packet = icmp_error_datagram(
            ROUTER,
            ICMP_TIME_EXCEEDED,
            0,
            &quoted_udp(DEST, 41000, 33434, &[]),
        );
        let reply = parse_reply(&packet, IpAddr::V4(ROUTER)).unwrap();
        for (ttl, seq) in [(1u8, 0u16), (2, 3), (5, 14), (64, 90)] {
            assert!(!UdpCodec.matches(&reply, &flow.probe(ttl, seq), IpAddr::V4(DEST)));
        }
    }

    #[test]
    fn test_udp_never_matches_echo_reply() {
        let packet = echo_reply_datagram(DEST, 0, 3);
        let reply = parse_reply(&packet, IpAddr::V4(DEST)).unwrap();
        assert!(!UdpCodec.matches(&reply, &udp_probe(3, 50000, 33434), IpAddr::V4(DEST)));
    }
}
