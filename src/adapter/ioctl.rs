// Interface queries through SIOCGIF* ioctls on a throwaway datagram socket

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use super::{AdapterInfo, InterfaceList, InterfaceSource, MacAddr};
use crate::error::DiscoveryResult;

// struct ifconf with the ifc_req arm of its union
#[repr(C)]
struct IfConf {
    ifc_len: libc::c_int,
    ifc_req: *mut libc::ifreq,
}

/// An AF_INET datagram socket used only as an ioctl handle
pub struct IoctlInterfaces {
    fd: OwnedFd,
}

impl IoctlInterfaces {
    pub fn open() -> io::Result<Self> {
        let raw = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: raw is a freshly created descriptor we own
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(IoctlInterfaces { fd })
    }

    fn query(&self, name: &str, request: libc::c_ulong) -> io::Result<libc::ifreq> {
        let mut req: libc::ifreq = unsafe { mem::zeroed() };
        let len = name.len().min(libc::IFNAMSIZ - 1);
        for (dst, src) in req.ifr_name.iter_mut().zip(&name.as_bytes()[..len]) {
            *dst = *src as libc::c_char;
        }

        let ret = unsafe { libc::ioctl(self.fd.as_raw_fd(), request as _, &mut req as *mut libc::ifreq) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(req)
    }
}

fn ifreq_name(req: &libc::ifreq) -> String {
    let bytes: Vec<u8> = req
        .ifr_name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn sockaddr_ipv4(addr: &libc::sockaddr) -> Ipv4Addr {
    // SAFETY: sockaddr and sockaddr_in share a prefix and an AF_INET ioctl
    // fills the sockaddr_in layout
    let sin = unsafe { &*(addr as *const libc::sockaddr as *const libc::sockaddr_in) };
    Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))
}

impl InterfaceSource for IoctlInterfaces {
    fn list(&mut self, capacity: usize) -> io::Result<InterfaceList> {
        let mut slots: Vec<libc::ifreq> = (0..capacity).map(|_| unsafe { mem::zeroed() }).collect();
        let mut conf = IfConf {
            ifc_len: (capacity * mem::size_of::<libc::ifreq>()) as libc::c_int,
            ifc_req: slots.as_mut_ptr(),
        };

        let ret = unsafe {
            libc::ioctl(self.fd.as_raw_fd(), libc::SIOCGIFCONF as _, &mut conf as *mut IfConf)
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        let count = (conf.ifc_len.max(0) as usize / mem::size_of::<libc::ifreq>()).min(capacity);
        let names = slots[..count].iter().map(ifreq_name).collect();

        Ok(InterfaceList {
            names,
            truncated: capacity > 0 && count == capacity,
        })
    }

    fn flags(&mut self, name: &str) -> io::Result<u32> {
        let req = self.query(name, libc::SIOCGIFFLAGS as libc::c_ulong)?;
        Ok(unsafe { req.ifr_ifru.ifru_flags } as u16 as u32)
    }

    fn index(&mut self, name: &str) -> io::Result<i32> {
        let req = self.query(name, libc::SIOCGIFINDEX as libc::c_ulong)?;
        Ok(unsafe { req.ifr_ifru.ifru_ifindex })
    }

    fn ipv4(&mut self, name: &str) -> io::Result<Ipv4Addr> {
        let req = self.query(name, libc::SIOCGIFADDR as libc::c_ulong)?;
        Ok(sockaddr_ipv4(unsafe { &req.ifr_ifru.ifru_addr }))
    }

    fn hardware_addr(&mut self, name: &str) -> io::Result<MacAddr> {
        let req = self.query(name, libc::SIOCGIFHWADDR as libc::c_ulong)?;
        let data = unsafe { req.ifr_ifru.ifru_hwaddr.sa_data };
        let mut mac = [0u8; 6];
        for (dst, src) in mac.iter_mut().zip(data.iter()) {
            *dst = *src as u8;
        }
        Ok(MacAddr(mac))
    }

    fn netmask(&mut self, name: &str) -> io::Result<Ipv4Addr> {
        let req = self.query(name, libc::SIOCGIFNETMASK as libc::c_ulong)?;
        Ok(sockaddr_ipv4(unsafe { &req.ifr_ifru.ifru_netmask }))
    }
}

/// Resolve the local adapter for `egress_index` using the kernel's interface list
pub fn resolve_local_adapter(egress_index: i32, capacity: usize) -> DiscoveryResult<AdapterInfo> {
    let mut source = IoctlInterfaces::open()?;
    super::resolve_adapter(&mut source, egress_index, capacity)
}
