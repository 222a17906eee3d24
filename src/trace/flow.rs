use crate::config::{Config, ProbeProtocol};
use crate::probe::{flow_checksum, paris_udp_checksum};
use crate::state::Probe;

/// Decides the header fields of each probe in a sweep.
///
/// The sweep only supplies TTL and sequence; what load balancers get to
/// hash is up to the policy.
pub trait FlowPolicy: Send + Sync {
    fn probe(&self, ttl: u8, sequence: u16) -> Probe;
}

/// Plain traceroute: the flow changes from hop to hop
#[derive(Debug, Clone)]
pub struct ClassicFlow {
    identifier: u16,
    protocol: ProbeProtocol,
    base_port: u16,
    payload_size: usize,
}

impl ClassicFlow {
    pub fn new(config: &Config, identifier: u16) -> Self {
        Self {
            identifier,
            protocol: config.protocol,
            base_port: config.port,
            payload_size: config.payload_size,
        }
    }
}

impl FlowPolicy for ClassicFlow {
    fn probe(&self, ttl: u8, sequence: u16) -> Probe {
        Probe {
            identifier: self.identifier.wrapping_add(ttl as u16),
            sequence,
            ttl,
            protocol: self.protocol,
            src_port: None,
            dst_port: self.base_port.wrapping_add(sequence),
            checksum: None,
            payload_size: self.payload_size,
        }
    }
}

/// Paris traceroute: every probe of the sweep shares one flow.
///
/// ICMP probes keep identifier and checksum. UDP probes keep both ports and
/// move the sequence into the UDP checksum, which balancers do not hash.
#[derive(Debug, Clone)]
pub struct ParisFlow {
    identifier: u16,
    checksum: u16,
    protocol: ProbeProtocol,
    src_port: u16,
    dst_port: u16,
    payload_size: usize,
}

impl ParisFlow {
    pub fn new(config: &Config, identifier: u16) -> Self {
        Self {
            identifier,
            checksum: flow_checksum(identifier, config.payload_size),
            protocol: config.protocol,
            src_port: config.src_port,
            dst_port: config.port,
            payload_size: config.payload_size,
        }
    }
}

impl FlowPolicy for ParisFlow {
    fn probe(&self, ttl: u8, sequence: u16) -> Probe {
        let (src_port, checksum) = match self.protocol {
            ProbeProtocol::Icmp => (None, Some(self.checksum)),
            ProbeProtocol::Udp => (Some(self.src_port), Some(paris_udp_checksum(sequence))),
        };
        Probe {
            identifier: self.identifier,
            sequence,
            ttl,
            protocol: self.protocol,
            src_port,
            dst_port: self.dst_port,
            checksum,
            payload_size: self.payload_size,
        }
    }
}
