//! The UDP multicast command channel: join the group, bind the
//! command port, and drop membership exactly once on shutdown.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

/// An open command-channel socket, still a member of the multicast
/// group it was opened against.
pub struct MulticastEndpoint {
    socket: UdpSocket,
    group: Ipv4Addr,
    left: AtomicBool,
}

impl MulticastEndpoint {
    /// Create an IPv4 UDP socket, join `group` on `INADDR_ANY`, and
    /// bind it to `0.0.0.0:port`.
    pub fn open(group: Ipv4Addr, port: u16) -> Result<MulticastEndpoint> {
        let raw = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )
        .context("failed to create UDP socket")?;

        raw.set_reuse_address(true)
            .context("failed to set SO_REUSEADDR")?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        raw.bind(&bind_addr.into())
            .with_context(|| format!("failed to bind command port {port}"))?;

        raw.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .with_context(|| format!("failed to join multicast group {group}"))?;

        raw.set_nonblocking(true)
            .context("failed to set socket non-blocking")?;

        let std_sock: std::net::UdpSocket = raw.into();
        let socket = UdpSocket::from_std(std_sock).context("failed to hand socket to tokio")?;

        Ok(MulticastEndpoint {
            socket,
            group,
            left: AtomicBool::new(false),
        })
    }

    pub fn group(&self) -> Ipv4Addr {
        self.group
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    pub async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> std::io::Result<usize> {
        self.socket.send_to(buf, dest).await
    }

    /// Drop multicast group membership. Safe to call more than once —
    /// only the first call does anything, matching the "at most once
    /// per process" requirement.
    pub fn close(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        let raw = socket2::SockRef::from(&self.socket);
        if let Err(e) = raw.leave_multicast_v4(&self.group, &Ipv4Addr::UNSPECIFIED) {
            tracing::warn!(group = %self.group, error = %e, "failed to leave multicast group");
        }
    }
}

impl Drop for MulticastEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
