use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::{PingArgs, TraceArgs};

/// Probe protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeProtocol {
    #[default]
    Icmp,
    Udp,
}

impl ProbeProtocol {
    /// Parse a protocol name, case-insensitively
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "icmp" => Some(Self::Icmp),
            "udp" => Some(Self::Udp),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Icmp => "icmp",
            Self::Udp => "udp",
        }
    }
}

/// Default UDP destination port (classic traceroute base port)
pub const DEFAULT_UDP_PORT: u16 = 33434;
/// Default UDP source port held fixed for Paris flows
pub const DEFAULT_SRC_PORT: u16 = 50000;

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target hostname or IP literal
    pub hostname: String,
    /// Number of ping probes (None = until interrupted)
    pub count: Option<u64>,
    /// Interval between ping probes
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// Per-probe reply deadline
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Probe protocol (traceroute modes)
    pub protocol: ProbeProtocol,
    /// Hop ceiling
    pub max_hops: u8,
    /// Probes issued at each TTL
    pub probes_per_hop: u8,
    /// Hops probed concurrently (1 = strictly sequential sweep)
    pub parallel_hops: u8,
    /// UDP destination (base) port
    pub port: u16,
    /// UDP source port for Paris flows
    pub src_port: u16,
    /// ICMP payload bytes
    pub payload_size: usize,
    /// Probes in the Paris end-to-end round
    pub path_probes: u16,
    /// Enable reverse DNS lookups
    pub dns_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            count: None,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(4),
            protocol: ProbeProtocol::Icmp,
            max_hops: 30,
            probes_per_hop: 3,
            parallel_hops: 1,
            port: DEFAULT_UDP_PORT,
            src_port: DEFAULT_SRC_PORT,
            payload_size: crate::probe::icmp::DEFAULT_PAYLOAD_SIZE,
            path_probes: 10,
            dns_enabled: true,
        }
    }
}

impl Config {
    pub fn for_host(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Self::default()
        }
    }
}

impl From<&PingArgs> for Config {
    fn from(args: &PingArgs) -> Self {
        Self {
            hostname: args.hostname.clone(),
            count: args.count.filter(|&c| c > 0),
            interval: args.interval_duration(),
            timeout: args.timeout_duration(),
            payload_size: args.size,
            ..Self::default()
        }
    }
}

impl From<&TraceArgs> for Config {
    fn from(args: &TraceArgs) -> Self {
        Self {
            hostname: args.hostname.clone(),
            timeout: args.timeout_duration(),
            protocol: ProbeProtocol::parse(&args.protocol).unwrap_or_default(),
            max_hops: args.max_hops,
            probes_per_hop: args.queries,
            parallel_hops: args.parallel,
            port: args.port,
            src_port: args.src_port,
            path_probes: args.path_probes,
            ..Self::default()
        }
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
