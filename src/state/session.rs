use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::probe::ProbeOutcome;
use super::samples_serde;
use super::stats::PingStatistics;
use crate::config::ProbeProtocol;

/// Target host information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Name as given on the command line
    pub original: String,
    pub resolved: IpAddr,
    /// Reverse DNS name of `resolved`, if looked up
    pub hostname: Option<String>,
}

impl Target {
    pub fn new(original: String, resolved: IpAddr) -> Self {
        Self {
            original,
            resolved,
            hostname: None,
        }
    }
}

/// Aggregate for one TTL value of a sweep.
///
/// `samples[i]` holds the outcome of attempt `i` at this hop, whatever order
/// the replies arrived in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopResult {
    pub ttl: u8,
    /// Most frequent responder (first seen wins ties)
    pub address: Option<IpAddr>,
    pub hostname: Option<String>,
    #[serde(with = "samples_serde")]
    pub samples: Vec<Option<Duration>>,
    /// Responder per attempt (ECMP paths show up here)
    pub responders: Vec<Option<IpAddr>>,
    /// Some attempt was answered by the destination itself
    pub reached_destination: bool,
}

impl HopResult {
    pub fn new(ttl: u8, probes: usize) -> Self {
        Self {
            ttl,
            address: None,
            hostname: None,
            samples: vec![None; probes],
            responders: vec![None; probes],
            reached_destination: false,
        }
    }

    /// Record the outcome of attempt `attempt` at this hop
    pub fn record(&mut self, attempt: usize, outcome: &ProbeOutcome, destination: IpAddr) {
        if attempt >= self.samples.len() {
            return;
        }
        if let ProbeOutcome::Reply(reply) = outcome {
            self.samples[attempt] = Some(reply.rtt());
            self.responders[attempt] = Some(reply.source);
            if reply.source == destination {
                self.reached_destination = true;
            }
            self.update_primary();
        }
    }

    fn update_primary(&mut self) {
        let mut best: Option<(IpAddr, usize)> = None;
        for ip in self.responders.iter().flatten() {
            let count = self.responders.iter().flatten().filter(|r| *r == ip).count();
            if best.is_none_or(|(_, c)| count > c) {
                best = Some((*ip, count));
            }
        }
        self.address = best.map(|(ip, _)| ip);
    }

    /// Every attempt timed out
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(Option::is_none)
    }

    pub fn stats(&self) -> PingStatistics {
        PingStatistics::from_samples(&self.samples)
    }

    pub fn loss_pct(&self) -> f64 {
        self.stats().loss_pct()
    }
}

/// Final result of a ping run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReport {
    pub target: Target,
    pub started_at: DateTime<Utc>,
    pub statistics: PingStatistics,
}

/// Final result of a traceroute or Paris-traceroute run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceReport {
    pub target: Target,
    pub started_at: DateTime<Utc>,
    pub protocol: ProbeProtocol,
    pub paris: bool,
    /// Completed hops in ascending TTL order
    pub hops: Vec<HopResult>,
    pub reached_destination: bool,
    /// End-to-end statistics from the Paris path round
    pub path_statistics: Option<PingStatistics>,
}

impl TraceReport {
    pub fn hop(&self, ttl: u8) -> Option<&HopResult> {
        self.hops.iter().find(|h| h.ttl == ttl)
    }

    pub fn destination_hop(&self) -> Option<&HopResult> {
        self.hops.iter().find(|h| h.reached_destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::probe::{Reply, ReplyKind};
    use std::net::Ipv4Addr;
    use std::time::Instant;

    fn reply(source: Ipv4Addr, kind: ReplyKind, rtt_ms: u64) -> ProbeOutcome {
        let sent_at = Instant::now();
        ProbeOutcome::Reply(Reply {
            source: IpAddr::V4(source),
            kind,
            bytes: 36,
            reply_ttl: 250,
            sent_at,
            received_at: sent_at + Duration::from_millis(rtt_ms),
        })
    }

    const DEST: IpAddr = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));

    #[test]
    fn test_new_hop_is_silent() {
        let hop = HopResult::new(4, 3);
        assert_eq!(hop.samples.len(), 3);
        assert!(hop.is_silent());
        assert!(hop.address.is_none());
        assert!(!hop.reached_destination);
    }

    #[test]
    fn test_samples_follow_attempt_index() {
        let router = Ipv4Addr::new(10, 0, 0, 1);
        let mut hop = HopResult::new(1, 3);

        // attempt 2 answers before attempt 0
        hop.record(2, &reply(router, ReplyKind::TimeExceeded, 7), DEST);
        hop.record(0, &reply(router, ReplyKind::TimeExceeded, 3), DEST);
        hop.record(1, &ProbeOutcome::Loss, DEST);

        assert_eq!(
            hop.samples,
            vec![Some(Duration::from_millis(3)), None, Some(Duration::from_millis(7))]
        );
        assert_eq!(hop.address, Some(IpAddr::V4(router)));
        assert!(!hop.reached_destination);
        assert!((hop.loss_pct() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_attempt_ignored() {
        let mut hop = HopResult::new(1, 2);
        hop.record(5, &reply(Ipv4Addr::new(10, 0, 0, 1), ReplyKind::TimeExceeded, 1), DEST);
        assert!(hop.is_silent());
    }

    #[test]
    fn test_destination_reply_marks_hop() {
        let mut hop = HopResult::new(9, 3);
        hop.record(0, &reply(Ipv4Addr::new(8, 8, 8, 8), ReplyKind::EchoReply, 20), DEST);
        assert!(hop.reached_destination);
        assert_eq!(hop.address, Some(DEST));
    }

    #[test]
    fn test_ecmp_primary_is_most_frequent() {
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let b = Ipv4Addr::new(10, 0, 0, 2);
        let mut hop = HopResult::new(3, 3);
        hop.record(0, &reply(a, ReplyKind::TimeExceeded, 1), DEST);
        hop.record(1, &reply(b, ReplyKind::TimeExceeded, 1), DEST);
        assert_eq!(hop.address, Some(IpAddr::V4(a)));
        hop.record(2, &reply(b, ReplyKind::TimeExceeded, 1), DEST);
        assert_eq!(hop.address, Some(IpAddr::V4(b)));
    }

    #[test]
    fn test_trace_report_serialization() {
        let mut hop = HopResult::new(1, 2);
        hop.record(0, &reply(Ipv4Addr::new(10, 0, 0, 1), ReplyKind::TimeExceeded, 2), DEST);
        let report = TraceReport {
            target: Target::new("dns.google".to_string(), DEST),
            started_at: Utc::now(),
            protocol: ProbeProtocol::Udp,
            paris: true,
            hops: vec![hop],
            reached_destination: false,
            path_statistics: None,
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"samples\":[2000,null]"));
        assert!(json.contains("\"protocol\":\"udp\""));

        let back: TraceReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hops[0].samples[0], Some(Duration::from_millis(2)));
        assert!(back.hop(1).is_some());
        assert!(back.destination_hop().is_none());
    }
}
