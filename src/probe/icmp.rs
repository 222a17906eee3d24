use crate::error::ProbeError;
use crate::state::ReplyKind;

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// Default payload size (standard ping)
pub const DEFAULT_PAYLOAD_SIZE: usize = 56;
/// Minimum payload size (4 bytes id/seq + 4 bytes timestamp + 2 bytes flow word)
pub const MIN_PAYLOAD_SIZE: usize = 10;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_DEST_UNREACHABLE: u8 = 3;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_TIME_EXCEEDED: u8 = 11;

/// Payload offset of the word used to pin the checksum of Paris probes
const FLOW_WORD_OFFSET: usize = ICMP_HEADER_SIZE + 8;

/// Get process identifier for ICMP identification field
pub fn get_identifier() -> u16 {
    std::process::id() as u16
}

/// Decoded ICMP header (echo layout for the rest-of-header word)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

/// Encode an 8-byte ICMP echo header, all fields big-endian
pub fn encode_echo_header(
    icmp_type: u8,
    code: u8,
    identifier: u16,
    sequence: u16,
    checksum: u16,
) -> [u8; ICMP_HEADER_SIZE] {
    let mut header = [0u8; ICMP_HEADER_SIZE];
    header[0] = icmp_type;
    header[1] = code;
    header[2..4].copy_from_slice(&checksum.to_be_bytes());
    header[4..6].copy_from_slice(&identifier.to_be_bytes());
    header[6..8].copy_from_slice(&sequence.to_be_bytes());
    header
}

/// RFC 1071 Internet checksum.
///
/// Sums big-endian 16-bit words (odd trailing byte zero-padded), folds the
/// carries back into the low 16 bits and returns the one's complement.
/// Over a packet that already carries its checksum the result is 0.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u64 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u64;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u64) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Decode the first 8 bytes of an ICMP message
pub fn decode_icmp_header(data: &[u8]) -> Result<IcmpHeader, ProbeError> {
    if data.len() < ICMP_HEADER_SIZE {
        return Err(ProbeError::MalformedPacket { len: data.len() });
    }
    Ok(IcmpHeader {
        icmp_type: data[0],
        code: data[1],
        checksum: u16::from_be_bytes([data[2], data[3]]),
        identifier: u16::from_be_bytes([data[4], data[5]]),
        sequence: u16::from_be_bytes([data[6], data[7]]),
    })
}

pub fn classify_reply(icmp_type: u8, code: u8) -> ReplyKind {
    match (icmp_type, code) {
        (ICMP_ECHO_REPLY, 0) => ReplyKind::EchoReply,
        (ICMP_TIME_EXCEEDED, 0) => ReplyKind::TimeExceeded,
        (ICMP_DEST_UNREACHABLE, _) => ReplyKind::DestinationUnreachable,
        _ => ReplyKind::Malformed,
    }
}

/// Build an ICMP Echo Request packet with configurable payload size
///
/// Payload layout:
/// - Bytes 0-1: identifier
/// - Bytes 2-3: sequence
/// - Bytes 4-7: timestamp (lower 32 bits of microseconds since epoch)
/// - Bytes 8-9: flow word (zero unless the checksum is pinned)
/// - Bytes 10+: pattern fill
pub fn build_echo_request(identifier: u16, sequence: u16, payload_size: usize) -> Vec<u8> {
    let payload_size = payload_size.max(MIN_PAYLOAD_SIZE);
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + payload_size];

    buffer[..ICMP_HEADER_SIZE]
        .copy_from_slice(&encode_echo_header(ICMP_ECHO_REQUEST, 0, identifier, sequence, 0));

    let payload = &mut buffer[ICMP_HEADER_SIZE..];
    payload[0..2].copy_from_slice(&identifier.to_be_bytes());
    payload[2..4].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u32)
        .unwrap_or(0);
    payload[4..8].copy_from_slice(&timestamp.to_be_bytes());

    for (i, byte) in payload[10..].iter_mut().enumerate() {
        *byte = (i & 0xFF) as u8;
    }

    let cksum = internet_checksum(&buffer);
    buffer[2..4].copy_from_slice(&cksum.to_be_bytes());
    buffer
}

/// Build an Echo Request whose checksum field equals `checksum`.
///
/// Load balancers that hash the first four bytes of the transport header
/// see the ICMP checksum where a UDP source port would be, so Paris probes
/// hold it constant. The flow word in the payload absorbs the difference.
/// `checksum` should come from a real packet (`flow_checksum`); 0xFFFF is
/// never produced by the checksum algorithm and cannot be pinned.
pub fn build_echo_request_with_checksum(
    identifier: u16,
    sequence: u16,
    payload_size: usize,
    checksum: u16,
) -> Vec<u8> {
    let mut buffer = build_echo_request(identifier, sequence, payload_size);
    buffer[2..4].fill(0);

    // One's-complement sum of everything except the flow word (still zero)
    let word = compensation_word(!internet_checksum(&buffer), checksum);

    buffer[FLOW_WORD_OFFSET..FLOW_WORD_OFFSET + 2].copy_from_slice(&word.to_be_bytes());
    buffer[2..4].copy_from_slice(&checksum.to_be_bytes());
    buffer
}

/// Word that, added to a packet whose one's-complement sum is `sum`, makes
/// its checksum come out as `checksum`
pub fn compensation_word(sum: u16, checksum: u16) -> u16 {
    let target = !checksum as u32;
    ((target + 0xFFFF - sum as u32) % 0xFFFF) as u16
}

/// Checksum to pin for a Paris flow with this identifier
pub fn flow_checksum(identifier: u16, payload_size: usize) -> u16 {
    let packet = build_echo_request(identifier, 0, payload_size);
    u16::from_be_bytes([packet[2], packet[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::icmp::{IcmpPacket, checksum};
    use proptest::prelude::*;

    #[test]
    fn test_build_echo_request() {
        let packet = build_echo_request(0x1234, 0x0001, DEFAULT_PAYLOAD_SIZE);

        assert_eq!(packet.len(), ICMP_HEADER_SIZE + DEFAULT_PAYLOAD_SIZE);
        assert_eq!(packet[0], ICMP_ECHO_REQUEST);
        assert_eq!(packet[1], 0);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), 0x1234);
        assert_eq!(u16::from_be_bytes([packet[6], packet[7]]), 0x0001);
        assert_eq!(internet_checksum(&packet), 0);
    }

    #[test]
    fn test_small_payload_is_padded_to_minimum() {
        let packet = build_echo_request(1, 1, 0);
        assert_eq!(packet.len(), ICMP_HEADER_SIZE + MIN_PAYLOAD_SIZE);
    }

    #[test]
    fn test_checksum_agrees_with_pnet() {
        let packet = build_echo_request(0xBEEF, 42, 64);
        let icmp = IcmpPacket::new(&packet).unwrap();
        assert_eq!(checksum(&icmp), u16::from_be_bytes([packet[2], packet[3]]));
    }

    #[test]
    fn test_checksum_rfc1071_example() {
        // Worked example from RFC 1071 section 3
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn test_checksum_odd_length_pads_low_byte() {
        assert_eq!(internet_checksum(&[0xAB]), !0xAB00);
    }

    #[test]
    fn test_encode_decode_header() {
        let header = encode_echo_header(ICMP_ECHO_REPLY, 0, 0xCAFE, 7, 0x1234);
        assert_eq!(header, [0, 0, 0x12, 0x34, 0xCA, 0xFE, 0x00, 0x07]);

        let decoded = decode_icmp_header(&header).unwrap();
        assert_eq!(decoded.icmp_type, ICMP_ECHO_REPLY);
        assert_eq!(decoded.checksum, 0x1234);
        assert_eq!(decoded.identifier, 0xCAFE);
        assert_eq!(decoded.sequence, 7);
    }

    #[test]
    fn test_decode_short_is_malformed() {
        let err = decode_icmp_header(&[0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProbeError::MalformedPacket { len: 5 }));
    }

    #[test]
    fn test_classify_reply() {
        assert_eq!(classify_reply(0, 0), ReplyKind::EchoReply);
        assert_eq!(classify_reply(11, 0), ReplyKind::TimeExceeded);
        assert_eq!(classify_reply(3, 0), ReplyKind::DestinationUnreachable);
        assert_eq!(classify_reply(3, 3), ReplyKind::DestinationUnreachable);
        assert_eq!(classify_reply(3, 13), ReplyKind::DestinationUnreachable);
        // fragment reassembly timeout is not a hop answer
        assert_eq!(classify_reply(11, 1), ReplyKind::Malformed);
        assert_eq!(classify_reply(8, 0), ReplyKind::Malformed);
        assert_eq!(classify_reply(0, 1), ReplyKind::Malformed);
    }

    #[test]
    fn test_pinned_checksum_across_sequences() {
        let pinned = flow_checksum(0x4242, DEFAULT_PAYLOAD_SIZE);
        for seq in [0u16, 1, 2, 255, 4096, u16::MAX] {
            let packet = build_echo_request_with_checksum(0x4242, seq, DEFAULT_PAYLOAD_SIZE, pinned);
            assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), pinned);
            assert_eq!(u16::from_be_bytes([packet[6], packet[7]]), seq);
            assert_eq!(internet_checksum(&packet), 0, "seq {seq}");
        }
    }

    proptest! {
        #[test]
        fn checksum_roundtrip_law(
            id in any::<u16>(),
            seq in any::<u16>(),
            payload in proptest::collection::vec(any::<u8>(), 0..600),
        ) {
            let mut packet = encode_echo_header(ICMP_ECHO_REQUEST, 0, id, seq, 0).to_vec();
            packet.extend_from_slice(&payload);
            let cksum = internet_checksum(&packet);
            packet[2..4].copy_from_slice(&cksum.to_be_bytes());
            prop_assert_eq!(internet_checksum(&packet), 0);
        }

        #[test]
        fn pinned_checksum_verifies(id in any::<u16>(), seq in any::<u16>(), size in 10usize..200) {
            let pinned = flow_checksum(id, size);
            let packet = build_echo_request_with_checksum(id, seq, size, pinned);
            prop_assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), pinned);
            prop_assert_eq!(internet_checksum(&packet), 0);
        }

        #[test]
        fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..32)) {
            let _ = decode_icmp_header(&data);
        }
    }
}
