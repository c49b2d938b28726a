// NETLINK_ROUTE socket used to dump the kernel routing table

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::wire::{self, NetlinkTransport};
use super::RouteEntry;
use crate::error::DiscoveryResult;

static NEXT_SEQ: AtomicU32 = AtomicU32::new(1);

fn next_sequence() -> u32 {
    NEXT_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// A datagram netlink socket bound to a kernel-assigned port id
pub struct NetlinkSocket {
    fd: OwnedFd,
    port_id: u32,
}

impl NetlinkSocket {
    /// Open a NETLINK_ROUTE socket with a receive timeout
    pub fn open(recv_timeout: Duration) -> io::Result<Self> {
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                libc::NETLINK_ROUTE,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: raw is a freshly created descriptor we own
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;

        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        // Read back the port id the kernel assigned
        let mut bound: libc::sockaddr_nl = unsafe { mem::zeroed() };
        let mut addrlen = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockname(
                fd.as_raw_fd(),
                &mut bound as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                &mut addrlen,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        crate::sys::set_timeout(&fd, libc::SO_RCVTIMEO, recv_timeout)?;

        Ok(NetlinkSocket {
            fd,
            port_id: bound.nl_pid,
        })
    }
}

impl NetlinkTransport for NetlinkSocket {
    fn port_id(&self) -> u32 {
        self.port_id
    }

    fn send(&mut self, msg: &[u8]) -> io::Result<()> {
        let sent = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                msg.as_ptr() as *const libc::c_void,
                msg.len(),
                0,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

/// Dump the IPv4 main routing table from the kernel
pub fn read_route_table(recv_timeout: Duration) -> DiscoveryResult<Vec<RouteEntry>> {
    let mut socket = NetlinkSocket::open(recv_timeout)?;
    let routes = wire::dump_routes(&mut socket, next_sequence())?;

    tracing::debug!("Read {} IPv4 routes from the main table", routes.len());
    Ok(routes)
}
