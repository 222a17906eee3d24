use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ProbeError;
use crate::export::ReportSink;
use crate::lookup::{DnsLookup, resolve_target};
use crate::probe::{ProbeTransport, get_identifier, send_probe};
use crate::state::{HopResult, PingStatistics, Target, TraceReport};
use crate::trace::flow::{ClassicFlow, FlowPolicy};

/// Hops collected by one TTL sweep
#[derive(Debug, Default)]
pub struct Sweep {
    pub hops: Vec<HopResult>,
    pub reached: bool,
}

/// TTL sweep from 1 up to the hop ceiling.
///
/// Up to `parallel_hops` TTLs are probed at once; results are still handed
/// out strictly in TTL order and the sweep stops at the first hop answered
/// by the destination, cancelling any higher TTLs still in flight.
pub struct Tracer<F: FlowPolicy> {
    pub(crate) config: Config,
    pub(crate) flow: F,
    pub(crate) transport: Arc<dyn ProbeTransport>,
    dns: Option<Arc<DnsLookup>>,
    pub(crate) cancel: CancellationToken,
    paris: bool,
}

impl Tracer<ClassicFlow> {
    pub fn new(
        config: Config,
        transport: Arc<dyn ProbeTransport>,
        dns: Option<Arc<DnsLookup>>,
        cancel: CancellationToken,
    ) -> Self {
        let flow = ClassicFlow::new(&config, get_identifier());
        Self::with_flow(config, flow, transport, dns, cancel)
    }
}

impl<F: FlowPolicy> Tracer<F> {
    pub fn with_flow(
        config: Config,
        flow: F,
        transport: Arc<dyn ProbeTransport>,
        dns: Option<Arc<DnsLookup>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            flow,
            transport,
            dns,
            cancel,
            paris: false,
        }
    }

    /// Mark the run as Paris: reports say so and each hop line is followed
    /// by that hop's loss/latency summary
    pub(crate) fn paris(mut self) -> Self {
        self.paris = true;
        self
    }

    pub fn flow(&self) -> &F {
        &self.flow
    }

    fn probes_per_hop(&self) -> u8 {
        self.config.probes_per_hop.max(1)
    }

    /// Sequence number of attempt `attempt` at `ttl`; unique within a sweep
    pub fn sequence_for(&self, ttl: u8, attempt: u8) -> u16 {
        (ttl.saturating_sub(1) as u16)
            .wrapping_mul(self.probes_per_hop() as u16)
            .wrapping_add(attempt as u16)
    }

    pub async fn run<S: ReportSink + ?Sized>(&self, sink: &mut S) -> Result<TraceReport, ProbeError> {
        let (target, started_at) = self.begin(sink).await?;
        let sweep = self.sweep(target.resolved, sink).await?;
        Ok(self.report(target, started_at, sweep, None))
    }

    pub(crate) async fn begin<S: ReportSink + ?Sized>(
        &self,
        sink: &mut S,
    ) -> Result<(Target, DateTime<Utc>), ProbeError> {
        let started_at = Utc::now();
        let target = resolve_target(&self.config.hostname).await?;
        sink.trace_started(&target, self.config.max_hops, self.config.protocol)?;
        Ok((target, started_at))
    }

    pub(crate) fn report(
        &self,
        target: Target,
        started_at: DateTime<Utc>,
        sweep: Sweep,
        path_statistics: Option<PingStatistics>,
    ) -> TraceReport {
        TraceReport {
            target,
            started_at,
            protocol: self.config.protocol,
            paris: self.paris,
            hops: sweep.hops,
            reached_destination: sweep.reached,
            path_statistics,
        }
    }

    pub(crate) async fn sweep<S: ReportSink + ?Sized>(
        &self,
        destination: IpAddr,
        sink: &mut S,
    ) -> Result<Sweep, ProbeError> {
        // Cancels in-flight hops on every way out of the sweep
        let sweep_cancel = self.cancel.child_token();
        let _stop_in_flight = sweep_cancel.clone().drop_guard();

        let concurrency = self.config.parallel_hops.max(1) as usize;
        let mut hops = stream::iter(1..=self.config.max_hops)
            .map(|ttl| self.probe_hop(ttl, destination, sweep_cancel.clone()))
            .buffered(concurrency);

        let mut sweep = Sweep::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(completed = sweep.hops.len(), "sweep interrupted");
                    break;
                }
                next = hops.next() => next,
            };
            let Some(hop) = next else {
                info!(max_hops = self.config.max_hops, "hop ceiling reached");
                break;
            };
            let mut hop = hop?;

            if let (Some(dns), Some(ip)) = (&self.dns, hop.address) {
                hop.hostname = dns.reverse_lookup_until(ip, &self.cancel).await;
            }

            sink.hop(&hop)?;
            if self.paris {
                sink.hop_statistics(&hop)?;
            }

            let (ttl, reached) = (hop.ttl, hop.reached_destination);
            sweep.hops.push(hop);
            if reached {
                info!(ttl, "destination reached");
                sweep.reached = true;
                break;
            }
        }
        Ok(sweep)
    }

    async fn probe_hop(
        &self,
        ttl: u8,
        destination: IpAddr,
        cancel: CancellationToken,
    ) -> Result<HopResult, ProbeError> {
        let probes = self.probes_per_hop();
        let mut hop = HopResult::new(ttl, probes as usize);

        for attempt in 0..probes {
            if cancel.is_cancelled() {
                break;
            }
            let probe = self.flow.probe(ttl, self.sequence_for(ttl, attempt));
            let outcome = send_probe(
                self.transport.clone(),
                destination,
                probe,
                self.config.timeout,
                cancel.clone(),
            )
            .await?;
            hop.record(attempt as usize, &outcome, destination);
        }
        debug!(ttl, address = ?hop.address, reached = hop.reached_destination, "hop complete");
        Ok(hop)
    }
}
