use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::Duration;

use crate::config::ProbeProtocol;
use crate::state::{HopResult, PingStatistics, ProbeOutcome, Target};

/// Output boundary for orchestrators.
///
/// Called as results complete: per probe in ping mode, per hop in the
/// traceroute modes, then once for the summary.
pub trait ReportSink {
    fn ping_started(&mut self, target: &Target, payload_size: usize) -> io::Result<()>;
    fn ping_outcome(&mut self, target: &Target, sequence: u16, outcome: &ProbeOutcome) -> io::Result<()>;
    fn ping_summary(&mut self, target: &Target, stats: &PingStatistics) -> io::Result<()>;

    fn trace_started(&mut self, target: &Target, max_hops: u8, protocol: ProbeProtocol) -> io::Result<()>;
    fn hop(&mut self, hop: &HopResult) -> io::Result<()>;
    /// Per-hop loss/latency lines (Paris mode)
    fn hop_statistics(&mut self, hop: &HopResult) -> io::Result<()>;
    /// End-to-end statistics from the Paris path round
    fn path_summary(&mut self, target: &Target, stats: &PingStatistics) -> io::Result<()>;
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn display_host(target: &Target) -> &str {
    target.hostname.as_deref().unwrap_or(&target.original)
}

/// `<n> bytes from <hostname> (<ip>): ttl=<ttl> time=<rtt> ms`
pub fn format_ping_reply(target: &Target, outcome: &ProbeOutcome, sequence: u16) -> String {
    match outcome {
        ProbeOutcome::Reply(reply) => {
            let from = match &target.hostname {
                Some(name) => format!("{} ({})", name, reply.source),
                None => reply.source.to_string(),
            };
            format!(
                "{} bytes from {}: ttl={} time={:.2} ms",
                reply.bytes,
                from,
                reply.reply_ttl,
                ms(reply.rtt())
            )
        }
        ProbeOutcome::Loss => format!("Request timeout for icmp_seq {}", sequence),
    }
}

/// Loss line, plus the rtt line when anything was received
pub fn format_summary(stats: &PingStatistics) -> Vec<String> {
    let mut lines = vec![format!("{:.2}% packet loss", stats.loss_pct())];
    if let (Some(min), Some(avg), Some(max)) = (stats.min_rtt(), stats.avg_rtt(), stats.max_rtt()) {
        lines.push(format!(
            "rtt min/avg/max = {:.2}/{:.2}/{:.2} ms",
            ms(min),
            ms(avg),
            ms(max)
        ));
    }
    lines
}

/// Hop index, hostname, (address), then each sample or `*`
pub fn format_hop(hop: &HopResult) -> String {
    let mut line = format!("{:>2}", hop.ttl);
    match (&hop.hostname, hop.address) {
        (Some(name), Some(ip)) => {
            let _ = write!(line, "  {} ({})", name, ip);
        }
        (None, Some(ip)) => {
            let _ = write!(line, "  {}", ip);
        }
        _ => {}
    }
    for sample in &hop.samples {
        match sample {
            Some(rtt) => {
                let _ = write!(line, "  {:.3} ms", ms(*rtt));
            }
            None => line.push_str("  *"),
        }
    }
    line
}

/// Streams plain-text output to any writer
pub struct TextReport<W: Write> {
    writer: W,
}

impl<W: Write> TextReport<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for TextReport<W> {
    fn ping_started(&mut self, target: &Target, payload_size: usize) -> io::Result<()> {
        writeln!(
            self.writer,
            "PING {} ({}): {} data bytes",
            target.original, target.resolved, payload_size
        )?;
        self.writer.flush()
    }

    fn ping_outcome(&mut self, target: &Target, sequence: u16, outcome: &ProbeOutcome) -> io::Result<()> {
        writeln!(self.writer, "{}", format_ping_reply(target, outcome, sequence))?;
        self.writer.flush()
    }

    fn ping_summary(&mut self, target: &Target, stats: &PingStatistics) -> io::Result<()> {
        writeln!(self.writer)?;
        writeln!(self.writer, "--- {} ping statistics ---", display_host(target))?;
        writeln!(
            self.writer,
            "{} packets transmitted, {} packets received",
            stats.transmitted, stats.received
        )?;
        for line in format_summary(stats) {
            writeln!(self.writer, "{}", line)?;
        }
        self.writer.flush()
    }

    fn trace_started(&mut self, target: &Target, max_hops: u8, protocol: ProbeProtocol) -> io::Result<()> {
        writeln!(
            self.writer,
            "traceroute to {} ({}), {} hops max, {}",
            target.original,
            target.resolved,
            max_hops,
            protocol.label()
        )?;
        self.writer.flush()
    }

    fn hop(&mut self, hop: &HopResult) -> io::Result<()> {
        writeln!(self.writer, "{}", format_hop(hop))?;
        self.writer.flush()
    }

    fn hop_statistics(&mut self, hop: &HopResult) -> io::Result<()> {
        if hop.address.is_none() {
            return Ok(());
        }
        for line in format_summary(&hop.stats()) {
            writeln!(self.writer, "    {}", line)?;
        }
        self.writer.flush()
    }

    fn path_summary(&mut self, target: &Target, stats: &PingStatistics) -> io::Result<()> {
        writeln!(self.writer)?;
        writeln!(
            self.writer,
            "--- {} path statistics ({} probes) ---",
            display_host(target),
            stats.transmitted
        )?;
        for line in format_summary(stats) {
            writeln!(self.writer, "{}", line)?;
        }
        self.writer.flush()
    }
}

/// Discards streaming output (JSON mode prints only the final report)
pub struct NullReport;

impl ReportSink for NullReport {
    fn ping_started(&mut self, _: &Target, _: usize) -> io::Result<()> {
        Ok(())
    }
    fn ping_outcome(&mut self, _: &Target, _: u16, _: &ProbeOutcome) -> io::Result<()> {
        Ok(())
    }
    fn ping_summary(&mut self, _: &Target, _: &PingStatistics) -> io::Result<()> {
        Ok(())
    }
    fn trace_started(&mut self, _: &Target, _: u8, _: ProbeProtocol) -> io::Result<()> {
        Ok(())
    }
    fn hop(&mut self, _: &HopResult) -> io::Result<()> {
        Ok(())
    }
    fn hop_statistics(&mut self, _: &HopResult) -> io::Result<()> {
        Ok(())
    }
    fn path_summary(&mut self, _: &Target, _: &PingStatistics) -> io::Result<()> {
        Ok(())
    }
}
