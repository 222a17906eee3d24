use anyhow::{Result, anyhow};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::probe::session::ReplySource;

/// Shortest read timeout the kernel accepts (zero means "block forever")
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Check that raw ICMP sockets can be opened before any probing starts
pub fn check_permissions() -> Result<()> {
    match create_raw_icmp_socket() {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            let binary_path = std::env::current_exe()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "netprobe".to_string());
            Err(anyhow!(
                "Insufficient permissions for raw sockets.\n\n\
                 Fix options:\n\
                 \u{2022} Run with sudo: sudo netprobe <command> <host>\n\
                 \u{2022} Add capability: sudo setcap cap_net_raw+ep {}",
                binary_path
            ))
        }
        Err(e) => Err(anyhow!("Failed to create raw ICMP socket: {}", e)),
    }
}

/// Create a raw IPv4 ICMP socket (received datagrams include the IP header)
pub fn create_raw_icmp_socket() -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
    socket.set_nonblocking(false)?;
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    Ok(socket)
}

/// Set TTL on a socket
pub fn set_ttl(socket: &Socket, ttl: u8) -> io::Result<()> {
    socket.set_ttl(ttl as u32)
}

/// Send ICMP packet to target
pub fn send_icmp(socket: &Socket, packet: &[u8], target: IpAddr) -> io::Result<usize> {
    let addr = SocketAddr::new(target, 0);
    socket.send_to(packet, &SockAddr::from(addr))
}

/// Raw ICMP socket owned by one probe for the length of its wait.
///
/// The descriptor is closed when this value drops, on every exit path.
pub struct RawIcmpSocket {
    socket: Socket,
}

impl RawIcmpSocket {
    pub fn open() -> io::Result<Self> {
        Ok(Self {
            socket: create_raw_icmp_socket()?,
        })
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }
}

impl ReplySource for RawIcmpSocket {
    fn recv_within(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<Option<(usize, IpAddr)>> {
        self.socket.set_read_timeout(Some(wait.max(MIN_READ_TIMEOUT)))?;

        // SAFETY: recv_from only writes into the buffer, and u8 has no
        // invalid bit patterns, so viewing initialized bytes as
        // MaybeUninit is sound.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };

        match self.socket.recv_from(uninit) {
            Ok((len, addr)) => Ok(addr.as_socket().map(|a| (len, a.ip()))),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
