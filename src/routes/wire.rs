// Route dump wire format - netlink header, rtmsg and rtattr codec
//
// All netlink integers are in host byte order. Address attributes carry the
// four IPv4 octets in network order and are read as-is.

use byteorder::{ByteOrder, NativeEndian};
use std::io;
use std::net::Ipv4Addr;

use super::RouteEntry;
use crate::error::{DiscoveryError, DiscoveryResult};

pub const NLMSG_HDR_LEN: usize = 16;
pub const RTMSG_LEN: usize = 12;
const RTA_HDR_LEN: usize = 4;

/// Size of the buffer a dump reply is received into
pub const RECV_BUF_SIZE: usize = 8192;

// Netlink message types
pub const NLMSG_NOOP: u16 = 1;
pub const NLMSG_ERROR: u16 = 2;
pub const NLMSG_DONE: u16 = 3;
pub const RTM_NEWROUTE: u16 = 24;
pub const RTM_GETROUTE: u16 = 26;

// Netlink flags
pub const NLM_F_REQUEST: u16 = 0x0001;
pub const NLM_F_MULTI: u16 = 0x0002;
pub const NLM_F_DUMP: u16 = 0x0100 | 0x0200; // ROOT | MATCH

// Route attributes
pub const RTA_DST: u16 = 1;
pub const RTA_OIF: u16 = 4;
pub const RTA_GATEWAY: u16 = 5;
pub const RTA_PRIORITY: u16 = 6;
pub const RTA_PREFSRC: u16 = 7;

pub const AF_INET: u8 = 2;
pub const RT_TABLE_MAIN: u8 = 254;

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// Fixed netlink message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlMsgHeader {
    pub len: u32,
    pub msg_type: u16,
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
}

impl NlMsgHeader {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < NLMSG_HDR_LEN {
            return None;
        }
        Some(NlMsgHeader {
            len: NativeEndian::read_u32(&buf[0..4]),
            msg_type: NativeEndian::read_u16(&buf[4..6]),
            flags: NativeEndian::read_u16(&buf[6..8]),
            seq: NativeEndian::read_u32(&buf[8..12]),
            pid: NativeEndian::read_u32(&buf[12..16]),
        })
    }

    pub fn write(&self, buf: &mut [u8]) {
        NativeEndian::write_u32(&mut buf[0..4], self.len);
        NativeEndian::write_u16(&mut buf[4..6], self.msg_type);
        NativeEndian::write_u16(&mut buf[6..8], self.flags);
        NativeEndian::write_u32(&mut buf[8..12], self.seq);
        NativeEndian::write_u32(&mut buf[12..16], self.pid);
    }

    pub fn is_multipart(&self) -> bool {
        self.flags & NLM_F_MULTI != 0
    }
}

/// Build an RTM_GETROUTE dump request for IPv4 routes
pub fn build_dump_request(seq: u32, pid: u32) -> Vec<u8> {
    let len = NLMSG_HDR_LEN + RTMSG_LEN;
    let mut msg = vec![0u8; align4(len)];

    NlMsgHeader {
        len: len as u32,
        msg_type: RTM_GETROUTE,
        flags: NLM_F_REQUEST | NLM_F_DUMP,
        seq,
        pid,
    }
    .write(&mut msg);

    // rtmsg: family, the rest zero
    msg[NLMSG_HDR_LEN] = AF_INET;

    msg
}

/// Iterator over the netlink messages packed in one received datagram
pub struct Messages<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Messages<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Messages { buf, offset: 0 }
    }
}

impl<'a> Iterator for Messages<'a> {
    type Item = DiscoveryResult<(NlMsgHeader, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        let buf = self.buf;
        let rest = &buf[self.offset..];
        if rest.is_empty() {
            return None;
        }

        let header = match NlMsgHeader::parse(rest) {
            Some(h) => h,
            None => {
                self.offset = self.buf.len();
                return Some(Err(DiscoveryError::Protocol(format!(
                    "truncated netlink header ({} bytes)",
                    rest.len()
                ))));
            }
        };

        let len = header.len as usize;
        if len < NLMSG_HDR_LEN || len > rest.len() {
            self.offset = self.buf.len();
            return Some(Err(DiscoveryError::Protocol(format!(
                "bad netlink message length {} with {} bytes left",
                len,
                rest.len()
            ))));
        }

        let payload = &rest[NLMSG_HDR_LEN..len];
        self.offset = (self.offset + align4(len)).min(self.buf.len());

        Some(Ok((header, payload)))
    }
}

/// Iterator over the rtattr list following an rtmsg. Stops at the first
/// attribute whose length does not fit.
pub struct Attributes<'a> {
    buf: &'a [u8],
}

impl<'a> Attributes<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Attributes { buf }
    }
}

impl<'a> Iterator for Attributes<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let buf = self.buf;
        if buf.len() < RTA_HDR_LEN {
            return None;
        }

        let len = NativeEndian::read_u16(&buf[0..2]) as usize;
        let kind = NativeEndian::read_u16(&buf[2..4]);
        if len < RTA_HDR_LEN || len > buf.len() {
            self.buf = &[];
            return None;
        }

        let data = &buf[RTA_HDR_LEN..len];
        self.buf = &buf[align4(len).min(buf.len())..];

        Some((kind, data))
    }
}

fn read_ipv4(data: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = data.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

fn read_u32(data: &[u8]) -> Option<u32> {
    (data.len() == 4).then(|| NativeEndian::read_u32(data))
}

/// Parse the payload of one RTM_NEWROUTE message. Returns `None` for routes
/// that are not IPv4 or not in the main table.
pub fn parse_route(payload: &[u8]) -> DiscoveryResult<Option<RouteEntry>> {
    if payload.len() < RTMSG_LEN {
        return Err(DiscoveryError::Protocol(format!(
            "route message too short ({} bytes)",
            payload.len()
        )));
    }

    let family = payload[0];
    let table = payload[4];
    if family != AF_INET || table != RT_TABLE_MAIN {
        return Ok(None);
    }

    let mut entry = RouteEntry::default();

    for (kind, data) in Attributes::new(&payload[RTMSG_LEN..]) {
        let applied = match kind {
            RTA_OIF => read_u32(data).map(|v| entry.egress_index = v as i32),
            RTA_GATEWAY => read_ipv4(data).map(|v| entry.gateway = v),
            RTA_PREFSRC => read_ipv4(data).map(|v| entry.preferred_source = v),
            RTA_DST => read_ipv4(data).map(|v| entry.destination = v),
            RTA_PRIORITY => read_u32(data).map(|v| entry.metric = v),
            _ => {
                tracing::debug!("Ignoring unsupported route attribute {}", kind);
                Some(())
            }
        };

        if applied.is_none() {
            tracing::debug!(
                "Ignoring route attribute {} with unexpected length {}",
                kind,
                data.len()
            );
        }
    }

    Ok(Some(entry))
}

/// What the receive loop should do after a datagram has been consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// More parts of the dump are expected
    More,
    /// The dump is complete
    Done,
    /// The datagram belongs to another exchange and was skipped
    Foreign,
}

/// Consume one received datagram, appending parsed routes to `routes`
pub fn consume_batch(
    batch: &[u8],
    seq: u32,
    pid: u32,
    routes: &mut Vec<RouteEntry>,
) -> DiscoveryResult<BatchOutcome> {
    let first = NlMsgHeader::parse(batch).ok_or_else(|| {
        DiscoveryError::Protocol(format!("truncated netlink reply ({} bytes)", batch.len()))
    })?;
    if first.seq != seq || first.pid != pid {
        return Ok(BatchOutcome::Foreign);
    }

    let mut multipart = false;

    for message in Messages::new(batch) {
        let (header, payload) = message?;

        match header.msg_type {
            NLMSG_DONE => return Ok(BatchOutcome::Done),
            NLMSG_ERROR => {
                let errno = read_u32(payload.get(0..4).unwrap_or_default())
                    .map(|v| v as i32)
                    .unwrap_or(0);
                let reason = if errno < 0 {
                    io::Error::from_raw_os_error(-errno).to_string()
                } else {
                    "unexpected acknowledgement".to_string()
                };
                return Err(DiscoveryError::Protocol(format!(
                    "kernel rejected route dump: {}",
                    reason
                )));
            }
            NLMSG_NOOP => {}
            RTM_NEWROUTE => {
                if let Some(entry) = parse_route(payload)? {
                    routes.push(entry);
                }
            }
            other => tracing::debug!("Skipping netlink message type {}", other),
        }

        multipart = header.is_multipart();
    }

    if multipart {
        Ok(BatchOutcome::More)
    } else {
        Ok(BatchOutcome::Done)
    }
}

/// A connected routing-protocol channel
pub trait NetlinkTransport {
    /// Port id the kernel addresses replies to
    fn port_id(&self) -> u32;

    fn send(&mut self, msg: &[u8]) -> io::Result<()>;

    /// Receive one datagram into `buf`, returning its length
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Send a dump request over `transport` and collect the IPv4 main-table
/// routes of the reply, in the order received.
pub fn dump_routes<T: NetlinkTransport>(
    transport: &mut T,
    seq: u32,
) -> DiscoveryResult<Vec<RouteEntry>> {
    let pid = transport.port_id();
    transport.send(&build_dump_request(seq, pid))?;

    let mut routes = Vec::new();
    let mut buf = vec![0u8; RECV_BUF_SIZE];

    loop {
        let len = transport.recv(&mut buf)?;

        match consume_batch(&buf[..len], seq, pid, &mut routes)? {
            BatchOutcome::Done => break,
            BatchOutcome::More => {}
            BatchOutcome::Foreign => {
                tracing::debug!("Discarding netlink reply for another request");
            }
        }
    }

    Ok(routes)
}
