use anyhow::Result;
use clap::Parser;
use std::io::{self, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use netprobe::cli::{Args, Command};
use netprobe::error::ProbeError;
use netprobe::export::{NullReport, ReportSink, TextReport, export_json};
use netprobe::lookup::DnsLookup;
use netprobe::probe::{ProbeTransport, SocketTransport, check_permissions};
use netprobe::trace::{ParisTracer, Pinger, Tracer};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    init_tracing(args.verbose);

    // Check permissions early
    if let Err(e) = check_permissions() {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let config = args.config();
    debug!(?config, "starting");

    // Cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel_clone.cancel();
    });

    let transport: Arc<dyn ProbeTransport> = Arc::new(SocketTransport::new());
    let dns = config.dns_enabled.then(|| Arc::new(DnsLookup::new()));

    // JSON mode prints only the final report
    let mut sink: Box<dyn ReportSink> = if args.json {
        Box::new(NullReport)
    } else {
        Box::new(TextReport::new(io::stdout()))
    };

    let outcome = match &args.command {
        Command::Ping(_) => {
            let pinger = Pinger::new(config, transport, dns, cancel);
            pinger.run(sink.as_mut()).await.and_then(|report| emit(&report, args.json))
        }
        Command::Traceroute(_) => {
            let tracer = Tracer::new(config, transport, dns, cancel);
            tracer.run(sink.as_mut()).await.and_then(|report| emit(&report, args.json))
        }
        Command::ParisTraceroute(_) => {
            let tracer = ParisTracer::new(config, transport, dns, cancel);
            tracer.run(sink.as_mut()).await.and_then(|report| emit(&report, args.json))
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        if e.is_permission_denied() {
            eprintln!("Raw sockets need root or CAP_NET_RAW (sudo setcap cap_net_raw+ep <binary>)");
        }
        std::process::exit(1);
    }

    Ok(())
}

/// RUST_LOG wins; otherwise each -v raises the level one step from warn
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("netprobe={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn emit<T: serde::Serialize>(report: &T, json: bool) -> Result<(), ProbeError> {
    if !json {
        return Ok(());
    }
    let mut stdout = io::stdout().lock();
    export_json(report, &mut stdout).map_err(|e| ProbeError::Output(io::Error::other(e)))?;
    stdout.flush()?;
    Ok(())
}
