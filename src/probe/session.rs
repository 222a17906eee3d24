use parking_lot::Mutex;
use socket2::Socket;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::ProbeProtocol;
use crate::error::ProbeError;
use crate::probe::codec::{ProbeCodec, codec_for};
use crate::probe::correlate::parse_reply;
use crate::probe::socket::{RawIcmpSocket, send_icmp, set_ttl};
use crate::probe::udp::{
    create_udp_socket, local_port, pin_udp_checksum, send_udp_probe, source_address_for,
};
use crate::state::{Probe, ProbeOutcome, Reply};

/// Upper bound on a single blocking read, so cancellation is noticed promptly
pub const POLL_SLICE: Duration = Duration::from_millis(100);

const RECV_BUFFER_SIZE: usize = 1500;

/// Where reply datagrams come from during a wait
pub trait ReplySource {
    /// Read one datagram, waiting at most `wait`. `Ok(None)` means nothing arrived.
    fn recv_within(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<Option<(usize, IpAddr)>>;
}

/// Sends one probe and waits for its reply.
///
/// Implementations block the calling thread; `send_probe` runs them on the
/// blocking pool.
pub trait ProbeTransport: Send + Sync {
    fn send_and_await(
        &self,
        destination: IpAddr,
        probe: &Probe,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, ProbeError>;
}

/// Read datagrams until one answers `probe` or the deadline passes.
///
/// Unparsable and unrelated datagrams are dropped and the wait goes on.
/// A cancelled token ends the wait as `Loss`; callers that cancel discard it.
pub fn await_reply<R: ReplySource + ?Sized>(
    source: &mut R,
    codec: &dyn ProbeCodec,
    probe: &Probe,
    destination: IpAddr,
    sent_at: Instant,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ProbeOutcome, ProbeError> {
    let deadline = sent_at + timeout;
    let mut buf = [0u8; RECV_BUFFER_SIZE];

    loop {
        let now = Instant::now();
        if now >= deadline || cancel.is_cancelled() {
            return Ok(ProbeOutcome::Loss);
        }
        let wait = (deadline - now).min(POLL_SLICE);

        let Some((len, from)) = source
            .recv_within(&mut buf, wait)
            .map_err(|e| ProbeError::transport("receive reply", e))?
        else {
            continue;
        };
        let received_at = Instant::now();

        match parse_reply(&buf[..len], from) {
            Ok(reply) if codec.matches(&reply, probe, destination) => {
                return Ok(ProbeOutcome::Reply(Reply {
                    source: reply.source,
                    kind: reply.kind,
                    bytes: reply.icmp_len,
                    reply_ttl: reply.reply_ttl,
                    sent_at,
                    received_at,
                }));
            }
            Ok(reply) => {
                trace!(source = %reply.source, kind = ?reply.kind, seq = probe.sequence, "ignoring unrelated reply");
            }
            Err(e) => {
                trace!(source = %from, error = %e, "discarding datagram");
            }
        }
    }
}

/// Raw-socket transport: one receive socket per probe.
///
/// UDP probes with a pinned source port share one send socket per port for
/// the life of the transport; the lock is held only for set-TTL + send.
/// Their pinned checksum is written once the route's source address is known.
#[derive(Default)]
pub struct SocketTransport {
    udp_pool: Mutex<HashMap<u16, Socket>>,
}

impl SocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn send_pooled_udp(
        &self,
        port: u16,
        probe: &Probe,
        payload: &mut [u8],
        destination: IpAddr,
    ) -> Result<Instant, ProbeError> {
        if let (Some(checksum), IpAddr::V4(dest)) = (probe.checksum, destination) {
            let source = source_address_for(dest, probe.dst_port)
                .map_err(|e| ProbeError::transport("find source address", e))?;
            pin_udp_checksum(payload, source, dest, port, probe.dst_port, checksum);
        }

        let mut pool = self.udp_pool.lock();
        let socket = match pool.entry(port) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let socket = create_udp_socket(port)
                    .map_err(|e| ProbeError::transport(format!("bind UDP source port {port}"), e))?;
                entry.insert(socket)
            }
        };
        set_ttl(socket, probe.ttl).map_err(|e| ProbeError::transport("set TTL", e))?;
        let sent_at = Instant::now();
        send_udp_probe(socket, payload, destination, probe.dst_port)
            .map_err(|e| ProbeError::transport("send probe", e))?;
        Ok(sent_at)
    }
}

impl ProbeTransport for SocketTransport {
    fn send_and_await(
        &self,
        destination: IpAddr,
        probe: &Probe,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, ProbeError> {
        // Opened before sending so a fast reply cannot slip past
        let mut receiver =
            RawIcmpSocket::open().map_err(|e| ProbeError::transport("open raw ICMP socket", e))?;
        let codec = codec_for(probe.protocol);
        let mut wire = codec.encode(probe);

        let mut outstanding = probe.clone();
        let mut udp_guard = None;

        let sent_at = match probe.protocol {
            ProbeProtocol::Icmp => {
                set_ttl(receiver.socket(), probe.ttl)
                    .map_err(|e| ProbeError::transport("set TTL", e))?;
                let sent_at = Instant::now();
                send_icmp(receiver.socket(), &wire, destination)
                    .map_err(|e| ProbeError::transport("send probe", e))?;
                sent_at
            }
            ProbeProtocol::Udp => match probe.src_port {
                Some(port) => self.send_pooled_udp(port, probe, &mut wire, destination)?,
                None => {
                    let socket = create_udp_socket(0)
                        .map_err(|e| ProbeError::transport("open UDP socket", e))?;
                    outstanding.src_port = Some(
                        local_port(&socket).map_err(|e| ProbeError::transport("read UDP port", e))?,
                    );
                    set_ttl(&socket, probe.ttl).map_err(|e| ProbeError::transport("set TTL", e))?;
                    let sent_at = Instant::now();
                    send_udp_probe(&socket, &wire, destination, probe.dst_port)
                        .map_err(|e| ProbeError::transport("send probe", e))?;
                    // keep the ephemeral port ours until the wait ends
                    udp_guard = Some(socket);
                    sent_at
                }
            },
        };
        trace!(%destination, ttl = probe.ttl, seq = probe.sequence, id = probe.identifier, "probe sent");

        let outcome = await_reply(
            &mut receiver,
            codec,
            &outstanding,
            destination,
            sent_at,
            timeout,
            cancel,
        );
        drop(udp_guard);
        outcome
    }
}

/// Run one send/await cycle on the blocking pool
pub async fn send_probe(
    transport: Arc<dyn ProbeTransport>,
    destination: IpAddr,
    probe: Probe,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<ProbeOutcome, ProbeError> {
    tokio::task::spawn_blocking(move || {
        transport.send_and_await(destination, &probe, timeout, &cancel)
    })
    .await
    .map_err(|e| ProbeError::transport("probe task", io::Error::other(e)))?
}
