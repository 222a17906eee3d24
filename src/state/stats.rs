use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::probe::ProbeOutcome;

/// Loss and latency accumulated over a run of probes.
///
/// Owned by one orchestrator and folded after each completed probe. Latency
/// figures cover received probes only and are `None` until one arrives.
/// Serialized as a [`StatisticsSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "StatisticsSummary", from = "StatisticsSummary")]
pub struct PingStatistics {
    pub transmitted: u64,
    pub received: u64,
    min_rtt: Duration,
    max_rtt: Duration,
    total_rtt: Duration,
    mean_rtt: f64, // microseconds
    m2: f64,       // for stddev calculation
}

/// Exported form of [`PingStatistics`]. Latencies are microseconds and are
/// null when nothing was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSummary {
    pub transmitted: u64,
    pub received: u64,
    pub loss_pct: f64,
    pub min_rtt: Option<u64>,
    pub avg_rtt: Option<u64>,
    pub max_rtt: Option<u64>,
    pub stddev: Option<u64>,
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

impl From<PingStatistics> for StatisticsSummary {
    fn from(stats: PingStatistics) -> Self {
        Self {
            transmitted: stats.transmitted,
            received: stats.received,
            loss_pct: stats.loss_pct(),
            min_rtt: stats.min_rtt().map(micros),
            avg_rtt: stats.avg_rtt().map(micros),
            max_rtt: stats.max_rtt().map(micros),
            stddev: stats.stddev().map(micros),
        }
    }
}

impl From<StatisticsSummary> for PingStatistics {
    /// Rebuilds the accumulator closely enough to keep folding: the mean and
    /// spread are recovered from avg and stddev
    fn from(summary: StatisticsSummary) -> Self {
        let received = summary.received.min(summary.transmitted);
        let avg = summary.avg_rtt.unwrap_or(0);
        let stddev = summary.stddev.unwrap_or(0) as f64;
        let divisor = u32::try_from(received).unwrap_or(u32::MAX);
        Self {
            transmitted: summary.transmitted,
            received,
            min_rtt: Duration::from_micros(summary.min_rtt.unwrap_or(0)),
            max_rtt: Duration::from_micros(summary.max_rtt.unwrap_or(0)),
            total_rtt: Duration::from_micros(avg) * divisor,
            mean_rtt: avg as f64,
            m2: stddev * stddev * received as f64,
        }
    }
}

impl Default for PingStatistics {
    fn default() -> Self {
        Self {
            transmitted: 0,
            received: 0,
            min_rtt: Duration::ZERO,
            max_rtt: Duration::ZERO,
            total_rtt: Duration::ZERO,
            mean_rtt: 0.0,
            m2: 0.0,
        }
    }
}

impl PingStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one completed probe outcome
    pub fn record(&mut self, outcome: &ProbeOutcome) {
        match outcome.rtt() {
            Some(rtt) => self.record_response(rtt),
            None => self.record_loss(),
        }
    }

    pub fn record_loss(&mut self) {
        self.transmitted += 1;
    }

    pub fn record_response(&mut self, rtt: Duration) {
        self.transmitted += 1;
        self.received += 1;

        if self.received == 1 || rtt < self.min_rtt {
            self.min_rtt = rtt;
        }
        if rtt > self.max_rtt {
            self.max_rtt = rtt;
        }
        self.total_rtt += rtt;

        // Welford's online algorithm for variance
        let rtt_micros = rtt.as_micros() as f64;
        let delta = rtt_micros - self.mean_rtt;
        self.mean_rtt += delta / self.received as f64;
        let delta2 = rtt_micros - self.mean_rtt;
        self.m2 += delta * delta2;
    }

    /// Build statistics from a hop's ordered samples
    pub fn from_samples<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a Option<Duration>>,
    {
        let mut stats = Self::new();
        for sample in samples {
            match sample {
                Some(rtt) => stats.record_response(*rtt),
                None => stats.record_loss(),
            }
        }
        stats
    }

    /// `(transmitted - received) / transmitted * 100`, 0 before anything is sent
    pub fn loss_pct(&self) -> f64 {
        if self.transmitted == 0 {
            return 0.0;
        }
        (self.transmitted - self.received) as f64 / self.transmitted as f64 * 100.0
    }

    pub fn min_rtt(&self) -> Option<Duration> {
        (self.received > 0).then_some(self.min_rtt)
    }

    pub fn max_rtt(&self) -> Option<Duration> {
        (self.received > 0).then_some(self.max_rtt)
    }

    /// Mean over received samples, never outside `[min_rtt, max_rtt]`
    pub fn avg_rtt(&self) -> Option<Duration> {
        if self.received == 0 {
            return None;
        }
        let divisor = u32::try_from(self.received).unwrap_or(u32::MAX);
        Some(self.total_rtt / divisor)
    }

    /// Population standard deviation
    pub fn stddev(&self) -> Option<Duration> {
        match self.received {
            0 => None,
            1 => Some(Duration::ZERO),
            n => Some(Duration::from_micros((self.m2 / n as f64).sqrt() as u64)),
        }
    }
}
