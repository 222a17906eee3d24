use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ProbeError;
use crate::export::ReportSink;
use crate::lookup::DnsLookup;
use crate::probe::{ProbeTransport, get_identifier, send_probe};
use crate::state::{PingStatistics, TraceReport};
use crate::trace::flow::{FlowPolicy, ParisFlow};
use crate::trace::traceroute::Tracer;

/// TTL for the end-to-end round, high enough to reach anything the sweep did
const PATH_TTL: u8 = 64;

/// Traceroute over a single fixed flow.
///
/// Runs the same sweep as [`Tracer`] with a [`ParisFlow`], so per-flow load
/// balancers keep every probe on one path. Once the destination answers, a
/// round of `path_probes` probes on that flow measures the whole path.
pub struct ParisTracer {
    tracer: Tracer<ParisFlow>,
}

impl ParisTracer {
    pub fn new(
        config: Config,
        transport: Arc<dyn ProbeTransport>,
        dns: Option<Arc<DnsLookup>>,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_identifier(config, transport, dns, cancel, get_identifier())
    }

    pub fn with_identifier(
        config: Config,
        transport: Arc<dyn ProbeTransport>,
        dns: Option<Arc<DnsLookup>>,
        cancel: CancellationToken,
        identifier: u16,
    ) -> Self {
        let flow = ParisFlow::new(&config, identifier);
        Self {
            tracer: Tracer::with_flow(config, flow, transport, dns, cancel).paris(),
        }
    }

    pub fn flow(&self) -> &ParisFlow {
        self.tracer.flow()
    }

    pub async fn run<S: ReportSink + ?Sized>(&self, sink: &mut S) -> Result<TraceReport, ProbeError> {
        let (target, started_at) = self.tracer.begin(sink).await?;
        let sweep = self.tracer.sweep(target.resolved, sink).await?;

        let path_statistics = if sweep.reached && !self.tracer.cancel.is_cancelled() {
            let stats = self.measure_path(target.resolved).await?;
            sink.path_summary(&target, &stats)?;
            Some(stats)
        } else {
            debug!("destination not reached, skipping path round");
            None
        };

        Ok(self.tracer.report(target, started_at, sweep, path_statistics))
    }

    /// End-to-end loss and latency over the sweep's flow
    async fn measure_path(&self, destination: IpAddr) -> Result<PingStatistics, ProbeError> {
        let config = &self.tracer.config;
        // Continue numbering after the sweep so no sequence is reused
        let first = (config.max_hops as u16).wrapping_mul(config.probes_per_hop.max(1) as u16);

        let mut stats = PingStatistics::new();
        for i in 0..config.path_probes {
            let probe = self.tracer.flow.probe(PATH_TTL, first.wrapping_add(i));
            let outcome = tokio::select! {
                biased;
                _ = self.tracer.cancel.cancelled() => break,
                outcome = send_probe(
                    self.tracer.transport.clone(),
                    destination,
                    probe,
                    config.timeout,
                    self.tracer.cancel.clone(),
                ) => outcome?,
            };
            stats.record(&outcome);
        }

        info!(
            transmitted = stats.transmitted,
            received = stats.received,
            "path round finished"
        );
        Ok(stats)
    }
}
