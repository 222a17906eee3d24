use clap::{Parser, Subcommand};
use std::time::Duration;

use crate::config::{Config, DEFAULT_SRC_PORT, DEFAULT_UDP_PORT, ProbeProtocol};

/// Upper bound on the hop ceiling (IPv4 TTL is one byte, but nothing real is this deep)
const MAX_SAFE_TTL: u8 = 64;
/// Upper bound on concurrently probed hops
const MAX_PARALLEL_HOPS: u8 = 16;
/// Largest ICMP payload that still fits a 1500-byte MTU
const MAX_PAYLOAD_SIZE: usize = 1472;

/// Ping, traceroute and Paris-traceroute over raw ICMP/UDP probes
#[derive(Parser, Debug, Clone)]
#[command(name = "netprobe")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print the final report as JSON instead of streaming text
    #[arg(long = "json", global = true)]
    pub json: bool,

    /// Skip reverse DNS lookups
    #[arg(short = 'n', long = "no-dns", global = true)]
    pub no_dns: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Send echo requests to a host and report loss and latency
    #[command(alias = "p")]
    Ping(PingArgs),

    /// Discover the hops toward a host
    #[command(alias = "t")]
    Traceroute(TraceArgs),

    /// Traceroute with every probe on one flow, then measure the whole path
    #[command(name = "paris-traceroute", alias = "pt")]
    ParisTraceroute(TraceArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct PingArgs {
    /// Target host (IPv4 address or hostname)
    pub hostname: String,

    /// Number of probes to send (omit or 0 = until interrupted)
    #[arg(short = 'c', long = "count")]
    pub count: Option<u64>,

    /// Probe timeout in seconds
    #[arg(short = 't', long = "timeout", default_value = "4")]
    pub timeout: f64,

    /// Probe interval in seconds
    #[arg(short = 'i', long = "interval", default_value = "1.0")]
    pub interval: f64,

    /// ICMP payload size in bytes
    #[arg(short = 's', long = "size", default_value = "56")]
    pub size: usize,
}

impl PingArgs {
    /// Get probe interval as Duration
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }

    /// Get timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    fn validate(&self) -> Result<(), String> {
        validate_hostname(&self.hostname)?;
        validate_timeout(self.timeout)?;

        if !self.interval.is_finite() || self.interval <= 0.0 {
            return Err("Interval must be positive".into());
        }

        let min = crate::probe::MIN_PAYLOAD_SIZE;
        if self.size < min || self.size > MAX_PAYLOAD_SIZE {
            return Err(format!("Size must be between {} and {} bytes", min, MAX_PAYLOAD_SIZE));
        }

        Ok(())
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct TraceArgs {
    /// Target host (IPv4 address or hostname)
    pub hostname: String,

    /// Probe timeout in seconds
    #[arg(short = 't', long = "timeout", default_value = "4")]
    pub timeout: f64,

    /// Probe protocol (icmp, udp)
    #[arg(short = 'p', long = "protocol", default_value = "icmp")]
    pub protocol: String,

    /// Maximum TTL (hops)
    #[arg(short = 'm', long = "max-hops", default_value = "30")]
    pub max_hops: u8,

    /// Probes per hop
    #[arg(short = 'q', long = "queries", default_value = "3")]
    pub queries: u8,

    /// Hops probed concurrently
    #[arg(long = "parallel", default_value = "1")]
    pub parallel: u8,

    /// UDP destination port (base port for classic traceroute)
    #[arg(long = "port", default_value_t = DEFAULT_UDP_PORT)]
    pub port: u16,

    /// UDP source port held fixed by Paris traceroute
    #[arg(long = "src-port", default_value_t = DEFAULT_SRC_PORT)]
    pub src_port: u16,

    /// Probes in the Paris end-to-end round
    #[arg(long = "path-probes", default_value = "10")]
    pub path_probes: u16,
}

impl TraceArgs {
    /// Get timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    fn validate(&self) -> Result<(), String> {
        validate_hostname(&self.hostname)?;
        validate_timeout(self.timeout)?;

        if ProbeProtocol::parse(&self.protocol).is_none() {
            return Err(format!("Unknown protocol: {}. Use icmp or udp", self.protocol));
        }

        if self.max_hops == 0 {
            return Err("Max hops must be at least 1".into());
        }
        if self.max_hops > MAX_SAFE_TTL {
            return Err(format!("Max hops cannot exceed {}", MAX_SAFE_TTL));
        }

        if self.queries == 0 {
            return Err("Queries per hop must be at least 1".into());
        }

        if self.parallel == 0 {
            return Err("Parallel hops must be at least 1".into());
        }
        if self.parallel > MAX_PARALLEL_HOPS {
            return Err(format!("Parallel hops cannot exceed {} (resource limit)", MAX_PARALLEL_HOPS));
        }

        if self.port == 0 {
            return Err("Port must be non-zero".into());
        }

        Ok(())
    }
}

fn validate_hostname(hostname: &str) -> Result<(), String> {
    if hostname.trim().is_empty() {
        return Err("Hostname cannot be empty".into());
    }
    Ok(())
}

fn validate_timeout(timeout: f64) -> Result<(), String> {
    if !timeout.is_finite() || timeout <= 0.0 {
        return Err("Timeout must be positive".into());
    }
    Ok(())
}

impl Args {
    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Command::Ping(args) => args.validate(),
            Command::Traceroute(args) | Command::ParisTraceroute(args) => args.validate(),
        }
    }

    /// Runtime configuration for the selected command
    pub fn config(&self) -> Config {
        let config = match &self.command {
            Command::Ping(args) => Config::from(args),
            Command::Traceroute(args) | Command::ParisTraceroute(args) => Config::from(args),
        };
        Config {
            dns_enabled: !self.no_dns,
            ..config
        }
    }
}
