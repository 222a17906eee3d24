use chrono::Utc;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ProbeError;
use crate::export::ReportSink;
use crate::lookup::{DnsLookup, resolve_target};
use crate::probe::{ProbeTransport, get_identifier, send_probe};
use crate::state::{PingReport, PingStatistics, Probe};

/// TTL for ping probes
const PING_TTL: u8 = 64;

/// Repeats echo probes against one destination.
///
/// Probes go out one per interval tick, each waiting up to the timeout for
/// its reply. The run ends when `count` probes have completed or the token
/// is cancelled; a probe cut short by cancellation is not counted.
pub struct Pinger {
    config: Config,
    transport: Arc<dyn ProbeTransport>,
    dns: Option<Arc<DnsLookup>>,
    cancel: CancellationToken,
    identifier: u16,
}

impl Pinger {
    pub fn new(
        config: Config,
        transport: Arc<dyn ProbeTransport>,
        dns: Option<Arc<DnsLookup>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            transport,
            dns,
            cancel,
            identifier: get_identifier(),
        }
    }

    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub async fn run<S: ReportSink + ?Sized>(&self, sink: &mut S) -> Result<PingReport, ProbeError> {
        let started_at = Utc::now();
        let mut target = resolve_target(&self.config.hostname).await?;
        if let Some(dns) = &self.dns {
            target.hostname = dns.reverse_lookup_until(target.resolved, &self.cancel).await;
        }
        sink.ping_started(&target, self.config.payload_size)?;

        let mut stats = PingStatistics::new();
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sequence: u16 = 0;

        loop {
            if self.config.count.is_some_and(|count| stats.transmitted >= count) {
                debug!(count = stats.transmitted, "probe count reached");
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            sequence = sequence.wrapping_add(1);
            let probe = Probe::icmp(self.identifier, sequence, PING_TTL, self.config.payload_size);
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                outcome = send_probe(
                    self.transport.clone(),
                    target.resolved,
                    probe,
                    self.config.timeout,
                    self.cancel.clone(),
                ) => outcome?,
            };

            stats.record(&outcome);
            sink.ping_outcome(&target, sequence, &outcome)?;
        }

        info!(
            transmitted = stats.transmitted,
            received = stats.received,
            "ping finished"
        );
        sink.ping_summary(&target, &stats)?;

        Ok(PingReport {
            target,
            started_at,
            statistics: stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::NullReport;
    use crate::state::{ProbeOutcome, Reply, ReplyKind};
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    /// Answers every probe whose sequence is not in `drop`
    struct Echoing {
        drop: Vec<u16>,
        sent: AtomicU32,
    }

    impl ProbeTransport for Echoing {
        fn send_and_await(
            &self,
            destination: IpAddr,
            probe: &Probe,
            _: Duration,
            _: &CancellationToken,
        ) -> Result<ProbeOutcome, ProbeError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.drop.contains(&probe.sequence) {
                return Ok(ProbeOutcome::Loss);
            }
            let sent_at = Instant::now();
            Ok(ProbeOutcome::Reply(Reply {
                source: destination,
                kind: ReplyKind::EchoReply,
                bytes: 64,
                reply_ttl: 64,
                sent_at,
                received_at: sent_at + Duration::from_millis(1),
            }))
        }
    }

    fn config(count: u64) -> Config {
        Config {
            count: Some(count),
            interval: Duration::from_millis(1),
            ..Config::for_host("127.0.0.1")
        }
    }

    #[tokio::test]
    async fn test_counts_losses() {
        let transport = Arc::new(Echoing {
            drop: vec![2, 5],
            sent: AtomicU32::new(0),
        });
        let pinger = Pinger::new(config(6), transport.clone(), None, CancellationToken::new());
        let report = pinger.run(&mut NullReport).await.unwrap();

        assert_eq!(transport.sent.load(Ordering::SeqCst), 6);
        assert_eq!(report.statistics.transmitted, 6);
        assert_eq!(report.statistics.received, 4);
        assert!((report.statistics.loss_pct() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_sends_nothing() {
        let transport = Arc::new(Echoing {
            drop: vec![],
            sent: AtomicU32::new(0),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pinger = Pinger::new(config(5), transport.clone(), None, cancel);
        let report = pinger.run(&mut NullReport).await.unwrap();

        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
        assert_eq!(report.statistics.transmitted, 0);
        assert_eq!(report.statistics.loss_pct(), 0.0);
    }

    #[tokio::test]
    async fn test_unresolvable_host_fails() {
        let transport = Arc::new(Echoing {
            drop: vec![],
            sent: AtomicU32::new(0),
        });
        let config = Config {
            hostname: "::1".to_string(),
            ..config(1)
        };
        let pinger = Pinger::new(config, transport, None, CancellationToken::new());
        let err = pinger.run(&mut NullReport).await.unwrap_err();
        assert!(matches!(err, ProbeError::Resolution { .. }));
    }
}
