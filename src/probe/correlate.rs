use pnet::packet::ipv4::Ipv4Packet;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::ProbeError;
use crate::probe::icmp::{
    ICMP_ECHO_REQUEST, ICMP_HEADER_SIZE, IcmpHeader, classify_reply, decode_icmp_header,
    internet_checksum,
};
use crate::probe::udp::{IPPROTO_UDP, UDP_HEADER_SIZE, extract_probe_id};
use crate::state::ReplyKind;

/// IP protocol number for ICMP
pub const IPPROTO_ICMP: u8 = 1;

const IPV4_MIN_HEADER: usize = 20;

/// The original probe quoted inside a TimeExceeded/DestinationUnreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotedProbe {
    Icmp {
        destination: Ipv4Addr,
        identifier: u16,
        sequence: u16,
    },
    Udp {
        destination: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        checksum: u16,
        /// `(identifier, sequence)`, only when the router quoted past the UDP header
        probe_id: Option<(u16, u16)>,
    },
}

/// A received datagram, stripped of its IP header and classified
#[derive(Debug, Clone)]
pub struct ParsedReply {
    pub source: IpAddr,
    pub kind: ReplyKind,
    pub header: IcmpHeader,
    /// TTL of the reply's own IP header
    pub reply_ttl: u8,
    /// ICMP message length
    pub icmp_len: usize,
    pub quoted: Option<QuotedProbe>,
}

/// Parse a datagram read from a raw IPv4 ICMP socket.
///
/// Fails with `MalformedPacket` when the datagram is too short to carry an
/// IP header plus an ICMP header, or is not IPv4. Unknown ICMP types and
/// echo replies with a bad checksum parse as `ReplyKind::Malformed`.
pub fn parse_reply(data: &[u8], source: IpAddr) -> Result<ParsedReply, ProbeError> {
    let malformed = || ProbeError::MalformedPacket { len: data.len() };

    let ip_packet = Ipv4Packet::new(data).ok_or_else(malformed)?;
    if ip_packet.get_version() != 4 {
        return Err(malformed());
    }
    let ip_header_len = (ip_packet.get_header_length() as usize) * 4;
    if ip_header_len < IPV4_MIN_HEADER || data.len() < ip_header_len {
        return Err(malformed());
    }

    let icmp_data = &data[ip_header_len..];
    let header = decode_icmp_header(icmp_data)?;
    let mut kind = classify_reply(header.icmp_type, header.code);

    if kind == ReplyKind::EchoReply && internet_checksum(icmp_data) != 0 {
        kind = ReplyKind::Malformed;
    }

    let quoted = match kind {
        ReplyKind::TimeExceeded | ReplyKind::DestinationUnreachable => {
            parse_quoted(&icmp_data[ICMP_HEADER_SIZE..])
        }
        _ => None,
    };

    Ok(ParsedReply {
        source,
        kind,
        header,
        reply_ttl: ip_packet.get_ttl(),
        icmp_len: icmp_data.len(),
        quoted,
    })
}

/// Parse the original IP header + leading payload bytes quoted by an ICMP error
fn parse_quoted(original: &[u8]) -> Option<QuotedProbe> {
    let original_ip = Ipv4Packet::new(original)?;
    let orig_ihl = (original_ip.get_header_length() as usize) * 4;
    if orig_ihl < IPV4_MIN_HEADER || original.len() < orig_ihl + 8 {
        return None;
    }
    let destination = original_ip.get_destination();
    let payload = &original[orig_ihl..];

    match original_ip.get_next_level_protocol().0 {
        IPPROTO_ICMP => {
            if payload[0] != ICMP_ECHO_REQUEST {
                return None;
            }
            Some(QuotedProbe::Icmp {
                destination,
                identifier: u16::from_be_bytes([payload[4], payload[5]]),
                sequence: u16::from_be_bytes([payload[6], payload[7]]),
            })
        }
        IPPROTO_UDP => Some(QuotedProbe::Udp {
            destination,
            src_port: u16::from_be_bytes([payload[0], payload[1]]),
            dst_port: u16::from_be_bytes([payload[2], payload[3]]),
            checksum: u16::from_be_bytes([payload[6], payload[7]]),
            probe_id: extract_probe_id(&payload[UDP_HEADER_SIZE..]),
        }),
        _ => None,
    }
}
