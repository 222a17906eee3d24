use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use crate::probe::icmp::{compensation_word, internet_checksum};

/// UDP protocol number
pub const IPPROTO_UDP: u8 = 17;
/// UDP header size
pub const UDP_HEADER_SIZE: usize = 8;

/// Minimum UDP payload size (identifier + sequence + marker + checksum word)
pub const MIN_UDP_PAYLOAD: usize = 8;

const MAGIC: [u8; 2] = [0x4E, 0x50]; // "NP"

/// Payload offset of the word that steers the UDP checksum
const CHECKSUM_WORD_OFFSET: usize = 6;

/// Build a UDP probe payload
///
/// Payload layout:
/// - Bytes 0-1: identifier
/// - Bytes 2-3: sequence
/// - Bytes 4-5: marker, so quoted payloads can be recognised as ours
/// - Bytes 6-7: checksum word (zero unless the checksum is pinned)
/// - Bytes 8+: pattern fill
pub fn build_udp_payload(identifier: u16, sequence: u16, size: usize) -> Vec<u8> {
    let size = size.max(MIN_UDP_PAYLOAD);
    let mut payload = vec![0u8; size];

    payload[0..2].copy_from_slice(&identifier.to_be_bytes());
    payload[2..4].copy_from_slice(&sequence.to_be_bytes());
    payload[4..6].copy_from_slice(&MAGIC);

    for (i, byte) in payload[MIN_UDP_PAYLOAD..].iter_mut().enumerate() {
        *byte = (i & 0xFF) as u8;
    }
    payload
}

/// `(identifier, sequence)` carried in a (possibly quoted) UDP payload, if it is one of ours
pub fn extract_probe_id(udp_payload: &[u8]) -> Option<(u16, u16)> {
    if udp_payload.len() < 6 || udp_payload[4..6] != MAGIC {
        return None;
    }
    Some((
        u16::from_be_bytes([udp_payload[0], udp_payload[1]]),
        u16::from_be_bytes([udp_payload[2], udp_payload[3]]),
    ))
}

/// UDP checksum that names a Paris probe.
///
/// Routers that quote only the UDP header leave the checksum as the one
/// field that differs between probes of a pinned flow. Zero means "no
/// checksum" on the wire, hence the offset.
pub fn paris_udp_checksum(sequence: u16) -> u16 {
    sequence.wrapping_add(1)
}

/// Checksum the kernel writes for this datagram (RFC 768, pseudo-header included)
pub fn udp_checksum(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> u16 {
    match internet_checksum(&pseudo_datagram(source, destination, src_port, dst_port, payload)) {
        0 => 0xFFFF,
        cksum => cksum,
    }
}

/// Rewrite the checksum word of `payload` so the datagram's UDP checksum equals `checksum`
pub fn pin_udp_checksum(
    payload: &mut [u8],
    source: Ipv4Addr,
    destination: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    checksum: u16,
) {
    if payload.len() < MIN_UDP_PAYLOAD {
        return;
    }
    payload[CHECKSUM_WORD_OFFSET..CHECKSUM_WORD_OFFSET + 2].fill(0);
    let sum = !internet_checksum(&pseudo_datagram(source, destination, src_port, dst_port, payload));
    let word = compensation_word(sum, checksum);
    payload[CHECKSUM_WORD_OFFSET..CHECKSUM_WORD_OFFSET + 2].copy_from_slice(&word.to_be_bytes());
}

/// Pseudo-header followed by the UDP header (checksum zero) and payload
fn pseudo_datagram(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp_len = (UDP_HEADER_SIZE + payload.len()) as u16;
    let mut buf = Vec::with_capacity(12 + UDP_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&source.octets());
    buf.extend_from_slice(&destination.octets());
    buf.extend_from_slice(&[0, IPPROTO_UDP]);
    buf.extend_from_slice(&udp_len.to_be_bytes());
    buf.extend_from_slice(&src_port.to_be_bytes());
    buf.extend_from_slice(&dst_port.to_be_bytes());
    buf.extend_from_slice(&udp_len.to_be_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(payload);
    buf
}

/// Local address the kernel would route `destination` from.
///
/// Connecting a UDP socket picks the route without sending anything.
pub fn source_address_for(destination: Ipv4Addr, port: u16) -> io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect((destination, port))?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(addr) => Ok(addr),
        IpAddr::V6(_) => Err(io::Error::new(io::ErrorKind::InvalidInput, "no IPv4 route")),
    }
}

/// Create a DGRAM UDP socket bound to `src_port` (0 = ephemeral).
///
/// No SO_REUSEADDR: a pinned port held by another process is a bind error.
pub fn create_udp_socket(src_port: u16) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(false)?;
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), src_port);
    socket.bind(&SockAddr::from(bind_addr))?;
    Ok(socket)
}

/// Local port a UDP socket is bound to
pub fn local_port(socket: &Socket) -> io::Result<u16> {
    socket
        .local_addr()?
        .as_socket()
        .map(|addr| addr.port())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "socket is not an inet socket"))
}

/// Send a UDP probe
pub fn send_udp_probe(socket: &Socket, payload: &[u8], target: IpAddr, port: u16) -> io::Result<usize> {
    let addr = SockAddr::from(SocketAddr::new(target, port));
    socket.send_to(payload, &addr)
}
