//! UDP multicast transport for data messages and keepalives.
//!
//! Both channels are IPv4 multicast on the same group: data on the configured
//! port, keepalives on port + 1. Each socket is built for one direction per
//! role — the sender transmits data and collects keepalives, the receiver the
//! reverse. Outbound multicast sockets use TTL 3 with loopback enabled so
//! same-host peers work.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use crate::codec::RawMessage;

const MULTICAST_TTL: u32 = 3;

fn udp_socket() -> Result<Socket> {
    Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("creating UDP socket")
}

fn recv_into(sock: &Socket, buf: &mut [u8]) -> io::Result<usize> {
    let uninit: &mut [MaybeUninit<u8>] =
        unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr() as _, buf.len()) };
    sock.recv(uninit)
}

/// The data channel: one datagram per framed chunk.
pub struct DataSocket {
    sock: Socket,
    /// Multicast destination; `None` on the receiving side.
    dest: Option<SocketAddrV4>,
}

impl DataSocket {
    /// Transmit-mode socket. `iface` selects the outgoing interface;
    /// `UNSPECIFIED` leaves the choice to the routing table.
    pub fn sender(group: Ipv4Addr, port: u16, iface: Ipv4Addr) -> Result<Self> {
        let sock = udp_socket()?;
        sock.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())
            .context("binding data socket")?;
        sock.set_multicast_if_v4(&iface)
            .context("setting outgoing multicast interface")?;
        sock.set_multicast_ttl_v4(MULTICAST_TTL)?;
        sock.set_multicast_loop_v4(true)?;
        Ok(Self { sock, dest: Some(SocketAddrV4::new(group, port)) })
    }

    /// Receive-mode socket: bound to the data port on any address, joined to
    /// the group.
    pub fn receiver(group: Ipv4Addr, port: u16) -> Result<Self> {
        let sock = udp_socket()?;
        sock.set_reuse_address(true)?;
        sock.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())
            .with_context(|| format!("binding data socket to port {}", port))?;
        sock.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .with_context(|| format!("joining multicast group {}", group))?;
        Ok(Self { sock, dest: None })
    }

    /// Bound blocking for the receive side, so timer channels get serviced
    /// even when the group is silent. `None` restores indefinite blocking.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.sock.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn send(&self, raw: &RawMessage) -> io::Result<usize> {
        let dest = self.dest.expect("send on a receive-mode data socket");
        self.sock.send_to(raw, &dest.into())
    }

    /// Receive one datagram into `raw`; the returned length may be short of a
    /// full message for runt datagrams.
    pub fn recv(&self, raw: &mut RawMessage) -> io::Result<usize> {
        recv_into(&self.sock, raw)
    }

    pub fn shutdown(&self) {
        let _ = self.sock.shutdown(std::net::Shutdown::Both);
    }
}

/// The keepalive channel: single-word datagrams, non-blocking in both roles.
pub struct KeepaliveSocket {
    sock: Socket,
    dest: Option<SocketAddrV4>,
}

impl KeepaliveSocket {
    /// Sender-side collector: joined to the group on the keepalive port,
    /// drained opportunistically between data sends.
    pub fn collector(group: Ipv4Addr, port: u16) -> Result<Self> {
        let sock = udp_socket()?;
        sock.set_nonblocking(true)?;
        sock.set_reuse_address(true)?;
        sock.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())
            .with_context(|| format!("binding keepalive socket to port {}", port))?;
        sock.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .with_context(|| format!("joining multicast group {}", group))?;
        Ok(Self { sock, dest: None })
    }

    /// Receiver-side emitter: transmits heartbeats to the group.
    pub fn emitter(group: Ipv4Addr, port: u16) -> Result<Self> {
        let sock = udp_socket()?;
        sock.set_nonblocking(true)?;
        sock.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())
            .context("binding keepalive socket")?;
        sock.set_multicast_if_v4(&Ipv4Addr::UNSPECIFIED)?;
        sock.set_multicast_ttl_v4(MULTICAST_TTL)?;
        sock.set_multicast_loop_v4(true)?;
        Ok(Self { sock, dest: Some(SocketAddrV4::new(group, port)) })
    }

    /// Send one heartbeat word, network byte order.
    pub fn send_word(&self, word: u32) -> io::Result<usize> {
        let dest = self.dest.expect("send on a collect-mode keepalive socket");
        self.sock.send_to(&word.to_be_bytes(), &dest.into())
    }

    /// Pull the next pending heartbeat word, or `None` once the queue is
    /// empty. Datagrams of the wrong size are discarded.
    pub fn recv_word(&self) -> io::Result<Option<u32>> {
        let mut buf = [0u8; 4];
        loop {
            match recv_into(&self.sock, &mut buf) {
                Ok(4) => return Ok(Some(u32::from_be_bytes(buf))),
                Ok(n) => {
                    tracing::debug!(len = n, "discarding malformed keepalive datagram");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Primary IPv4 address of the named interface.
pub fn resolve_interface_addr(interface: &str) -> Result<Ipv4Addr> {
    #[cfg(target_os = "linux")]
    {
        use std::ffi::CStr;
        use std::ptr::null_mut;
        unsafe {
            let mut addrs: *mut libc::ifaddrs = null_mut();
            if libc::getifaddrs(&mut addrs) != 0 {
                anyhow::bail!("getifaddrs failed");
            }
            let mut current = addrs;
            while !current.is_null() {
                let ifa = &*current;
                if !ifa.ifa_name.is_null() && !ifa.ifa_addr.is_null() {
                    let name = CStr::from_ptr(ifa.ifa_name).to_str().unwrap_or("");
                    if name == interface
                        && (*ifa.ifa_addr).sa_family == libc::AF_INET as libc::sa_family_t
                    {
                        let sin = &*(ifa.ifa_addr as *const libc::sockaddr_in);
                        let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                        libc::freeifaddrs(addrs);
                        return Ok(ip);
                    }
                }
                current = ifa.ifa_next;
            }
            libc::freeifaddrs(addrs);
        }
        anyhow::bail!("interface {} not found", interface);
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = interface;
        Ok(Ipv4Addr::LOCALHOST)
    }
}

/// Default client id: the low two bytes of the interface address, so hosts on
/// one /16 get distinct ids without coordination.
pub fn client_id_from_addr(addr: Ipv4Addr) -> u16 {
    let o = addr.octets();
    ((o[2] as u16) << 8) | o[3] as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_low_two_octets() {
        assert_eq!(client_id_from_addr(Ipv4Addr::new(10, 0, 2, 3)), 0x0203);
        assert_eq!(client_id_from_addr(Ipv4Addr::new(192, 168, 255, 1)), 0xFF01);
        assert_eq!(client_id_from_addr(Ipv4Addr::new(127, 0, 0, 1)), 1);
    }
}
