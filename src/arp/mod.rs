// ARP module - resolve the gateway's hardware address with raw ARP requests

#[cfg(target_os = "linux")]
pub mod socket;

use byteorder::{ByteOrder, NetworkEndian};
use std::io;
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::adapter::{AdapterInfo, MacAddr};
use crate::error::{DiscoveryError, DiscoveryResult, RetryPolicy};

pub const ETH_HDR_LEN: usize = 14;
pub const ARP_LEN: usize = 28;
pub const FRAME_LEN: usize = ETH_HDR_LEN + ARP_LEN;

pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const HW_ETHERNET: u16 = 0x0001;

pub const ARP_OP_REQUEST: u16 = 0x0001;
pub const ARP_OP_REPLY: u16 = 0x0002;

const RECV_BUF_SIZE: usize = 1024;

/// An Ethernet/IPv4 ARP message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        ArpPacket {
            operation: ARP_OP_REQUEST,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    /// Parse an ARP payload. Anything other than Ethernet/IPv4 with 6/4 byte
    /// addresses is rejected.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < ARP_LEN {
            return None;
        }

        let hw_type = NetworkEndian::read_u16(&buf[0..2]);
        let proto_type = NetworkEndian::read_u16(&buf[2..4]);
        if hw_type != HW_ETHERNET || proto_type != ETHERTYPE_IPV4 || buf[4] != 6 || buf[5] != 4 {
            return None;
        }

        Some(ArpPacket {
            operation: NetworkEndian::read_u16(&buf[6..8]),
            sender_mac: MacAddr(buf[8..14].try_into().ok()?),
            sender_ip: Ipv4Addr::from(<[u8; 4]>::try_from(&buf[14..18]).ok()?),
            target_mac: MacAddr(buf[18..24].try_into().ok()?),
            target_ip: Ipv4Addr::from(<[u8; 4]>::try_from(&buf[24..28]).ok()?),
        })
    }

    pub fn write(&self, buf: &mut [u8]) {
        NetworkEndian::write_u16(&mut buf[0..2], HW_ETHERNET);
        NetworkEndian::write_u16(&mut buf[2..4], ETHERTYPE_IPV4);
        buf[4] = 6;
        buf[5] = 4;
        NetworkEndian::write_u16(&mut buf[6..8], self.operation);
        buf[8..14].copy_from_slice(&self.sender_mac.octets());
        buf[14..18].copy_from_slice(&self.sender_ip.octets());
        buf[18..24].copy_from_slice(&self.target_mac.octets());
        buf[24..28].copy_from_slice(&self.target_ip.octets());
    }
}

/// Build a broadcast Ethernet frame carrying an ARP request for `target_ip`
pub fn build_request_frame(local_mac: MacAddr, local_ip: Ipv4Addr, target_ip: Ipv4Addr) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];

    frame[0..6].copy_from_slice(&MacAddr::BROADCAST.octets());
    frame[6..12].copy_from_slice(&local_mac.octets());
    NetworkEndian::write_u16(&mut frame[12..14], ETHERTYPE_ARP);

    ArpPacket::request(local_mac, local_ip, target_ip).write(&mut frame[ETH_HDR_LEN..]);

    frame
}

/// A link-layer channel that sends and receives whole frames. `recv` returns
/// a timeout-kind error when nothing arrived within the socket timeout.
pub trait FrameChannel {
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn check_request(target_ip: Ipv4Addr, adapter: &AdapterInfo) -> DiscoveryResult<()> {
    if target_ip.is_unspecified() {
        return Err(DiscoveryError::InvalidArgument("no target address".to_string()));
    }
    if adapter.local_ipv4.is_unspecified() {
        return Err(DiscoveryError::InvalidArgument(format!(
            "{} has no local IPv4 address",
            adapter.name
        )));
    }
    Ok(())
}

/// Run the ARP request/reply exchange over `channel`. Every pass sends the
/// request again, then waits for one frame; replies from other senders are
/// discarded.
pub fn exchange<C: FrameChannel>(
    channel: &mut C,
    target_ip: Ipv4Addr,
    adapter: &AdapterInfo,
    policy: &RetryPolicy,
) -> DiscoveryResult<MacAddr> {
    check_request(target_ip, adapter)?;

    let frame = build_request_frame(adapter.local_mac, adapter.local_ipv4, target_ip);
    let mut buf = [0u8; RECV_BUF_SIZE];
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        channel.send(&frame)?;
        attempts += 1;

        match channel.recv(&mut buf) {
            Ok(n) if n >= frame.len() => match ArpPacket::parse(&buf[ETH_HDR_LEN..n]) {
                Some(reply) if reply.sender_ip == target_ip => {
                    tracing::debug!(
                        "ARP reply from {} after {} request(s)",
                        target_ip,
                        attempts
                    );
                    return Ok(reply.sender_mac);
                }
                Some(reply) => {
                    tracing::debug!("Discarding ARP message from {}", reply.sender_ip);
                }
                None => tracing::debug!("Ignoring non-ARP frame of {} bytes", n),
            },
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(e) => return Err(e.into()),
        }

        let elapsed = start.elapsed();
        if !policy.allows_another(attempts, elapsed) {
            return Err(DiscoveryError::Timeout {
                target: target_ip,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
    }
}

/// Resolve `target_ip` to a hardware address on `adapter`'s interface
#[cfg(target_os = "linux")]
pub fn resolve_mac(target_ip: Ipv4Addr, adapter: &AdapterInfo, policy: &RetryPolicy) -> DiscoveryResult<MacAddr> {
    check_request(target_ip, adapter)?;

    let mut channel = socket::PacketSocket::open(adapter.index, policy.socket_timeout)?;
    exchange(&mut channel, target_ip, adapter, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    const GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const GATEWAY_MAC: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn adapter() -> AdapterInfo {
        AdapterInfo {
            index: 2,
            name: "eth0".to_string(),
            local_ipv4: Ipv4Addr::new(192, 168, 1, 20),
            netmask_ipv4: Ipv4Addr::new(255, 255, 255, 0),
            local_mac: MacAddr([0x02, 0, 0, 0, 0, 0x14]),
            ..Default::default()
        }
    }

    fn reply_frame(sender_mac: MacAddr, sender_ip: Ipv4Addr) -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_LEN];
        frame[0..6].copy_from_slice(&adapter().local_mac.octets());
        frame[6..12].copy_from_slice(&sender_mac.octets());
        NetworkEndian::write_u16(&mut frame[12..14], ETHERTYPE_ARP);
        ArpPacket {
            operation: ARP_OP_REPLY,
            sender_mac,
            sender_ip,
            target_mac: adapter().local_mac,
            target_ip: adapter().local_ipv4,
        }
        .write(&mut frame[ETH_HDR_LEN..]);
        frame
    }

    struct FakeChannel {
        sent: Vec<Vec<u8>>,
        incoming: VecDeque<io::Result<Vec<u8>>>,
        idle: Duration,
    }

    impl FakeChannel {
        fn new(incoming: Vec<io::Result<Vec<u8>>>) -> Self {
            FakeChannel {
                sent: Vec::new(),
                incoming: incoming.into(),
                idle: Duration::ZERO,
            }
        }
    }

    impl FrameChannel for FakeChannel {
        fn send(&mut self, frame: &[u8]) -> io::Result<()> {
            self.sent.push(frame.to_vec());
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.incoming.pop_front() {
                Some(Ok(frame)) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                Some(Err(e)) => Err(e),
                None => {
                    std::thread::sleep(self.idle);
                    Err(io::Error::from(io::ErrorKind::WouldBlock))
                }
            }
        }
    }

    #[test]
    fn test_request_frame_layout() {
        let a = adapter();
        let frame = build_request_frame(a.local_mac, a.local_ipv4, GATEWAY);

        assert_eq!(frame.len(), 42);
        assert_eq!(&frame[0..6], &[0xff; 6]);
        assert_eq!(&frame[6..12], &a.local_mac.octets());
        assert_eq!(&frame[12..14], &[0x08, 0x06]);
        assert_eq!(&frame[14..22], &[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01]);
        assert_eq!(&frame[22..28], &a.local_mac.octets());
        assert_eq!(&frame[28..32], &[192, 168, 1, 20]);
        assert_eq!(&frame[32..38], &[0; 6]);
        assert_eq!(&frame[38..42], &[192, 168, 1, 1]);
    }

    #[test]
    fn test_parse_rejects_non_ethernet() {
        let mut payload = [0u8; ARP_LEN];
        ArpPacket::request(GATEWAY_MAC, GATEWAY, Ipv4Addr::new(192, 168, 1, 20)).write(&mut payload);
        assert!(ArpPacket::parse(&payload).is_some());

        payload[1] = 6; // IEEE 802 hardware type
        assert!(ArpPacket::parse(&payload).is_none());
        assert!(ArpPacket::parse(&payload[..20]).is_none());
    }

    #[test]
    fn test_invalid_arguments_send_nothing() {
        let mut channel = FakeChannel::new(vec![]);
        let policy = RetryPolicy::default();

        assert!(matches!(
            exchange(&mut channel, Ipv4Addr::UNSPECIFIED, &adapter(), &policy),
            Err(DiscoveryError::InvalidArgument(_))
        ));

        let mut unset = adapter();
        unset.local_ipv4 = Ipv4Addr::UNSPECIFIED;
        assert!(matches!(
            exchange(&mut channel, GATEWAY, &unset, &policy),
            Err(DiscoveryError::InvalidArgument(_))
        ));

        assert!(channel.sent.is_empty());
    }

    #[test]
    fn test_discards_unrelated_reply() {
        let other_mac = MacAddr([0xde, 0xad, 0xbe, 0xef, 0, 1]);
        let mut channel = FakeChannel::new(vec![
            Ok(reply_frame(other_mac, Ipv4Addr::new(192, 168, 1, 77))),
            Ok(reply_frame(GATEWAY_MAC, GATEWAY)),
        ]);

        let mac = exchange(&mut channel, GATEWAY, &adapter(), &RetryPolicy::default()).unwrap();
        assert_eq!(mac, GATEWAY_MAC);
        assert_eq!(channel.sent.len(), 2);
    }

    #[test]
    fn test_ignores_short_frame() {
        let mut short = reply_frame(GATEWAY_MAC, GATEWAY);
        short.truncate(FRAME_LEN - 1);
        let mut channel = FakeChannel::new(vec![Ok(short), Ok(reply_frame(GATEWAY_MAC, GATEWAY))]);

        let mac = exchange(&mut channel, GATEWAY, &adapter(), &RetryPolicy::default()).unwrap();
        assert_eq!(mac, GATEWAY_MAC);
        assert_eq!(channel.sent.len(), 2);
    }

    #[test]
    fn test_times_out_after_deadline() {
        let mut channel = FakeChannel::new(vec![Ok(reply_frame(
            MacAddr([0xde, 0xad, 0xbe, 0xef, 0, 1]),
            Ipv4Addr::new(192, 168, 1, 77),
        ))]);
        channel.idle = Duration::from_millis(5);
        let policy = RetryPolicy {
            deadline: Duration::from_millis(40),
            socket_timeout: Duration::from_millis(5),
            max_attempts: None,
        };

        let start = Instant::now();
        let result = exchange(&mut channel, GATEWAY, &adapter(), &policy);

        assert!(matches!(result, Err(DiscoveryError::Timeout { target, .. }) if target == GATEWAY));
        assert!(start.elapsed() > policy.deadline);
        assert!(channel.sent.len() > 1);
    }

    #[test]
    fn test_attempt_cap_independent_of_deadline() {
        let mut channel = FakeChannel::new(vec![]);
        let policy = RetryPolicy {
            deadline: Duration::from_secs(60),
            socket_timeout: Duration::from_millis(100),
            max_attempts: Some(3),
        };

        let result = exchange(&mut channel, GATEWAY, &adapter(), &policy);
        assert!(matches!(result, Err(DiscoveryError::Timeout { .. })));
        assert_eq!(channel.sent.len(), 3);
    }

    #[test]
    fn test_receive_error_aborts() {
        let mut channel = FakeChannel::new(vec![Err(io::Error::from(io::ErrorKind::ConnectionReset))]);

        let result = exchange(&mut channel, GATEWAY, &adapter(), &RetryPolicy::default());
        assert!(matches!(result, Err(DiscoveryError::Io(_))));
        assert_eq!(channel.sent.len(), 1);
    }
}
