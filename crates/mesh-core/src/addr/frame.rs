use mac_address::MacAddress;

use crate::error::{CoreError, CoreResult};

use super::inner::InnerAddr;

/// Which kind of virtual interface a frame was read from / is destined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelKind {
    /// L3 frames (IPv4/IPv6 packets), no link-layer header.
    Tun,
    /// L2 frames (Ethernet II, optionally 802.1Q tagged).
    Tap,
}

/// Coarse delivery class of a frame's destination, independent of whether the
/// destination is known to the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrClass {
    Unicast,
    Broadcast,
    Multicast,
}

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_8021Q: u16 = 0x8100;
const ETHER_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;

/// Parses `frame` according to `kind`, returning the (src, dst, class) triple
/// the routing table needs. `class` is derived purely from the destination
/// address; broadcast/multicast destinations are never learned as routes.
pub fn extract_from_packet(
    kind: TunnelKind,
    frame: &[u8],
) -> CoreResult<(InnerAddr, InnerAddr, AddrClass)> {
    match kind {
        TunnelKind::Tun => extract_from_ip(frame),
        TunnelKind::Tap => extract_from_ether(frame),
    }
}

fn extract_from_ip(frame: &[u8]) -> CoreResult<(InnerAddr, InnerAddr, AddrClass)> {
    let Some(version_nibble) = frame.first().map(|b| b >> 4) else {
        return Err(CoreError::FrameTooShort);
    };

    match version_nibble {
        4 => {
            if frame.len() < 20 {
                return Err(CoreError::FrameTooShort);
            }
            let src = std::net::Ipv4Addr::new(frame[12], frame[13], frame[14], frame[15]);
            let dst = std::net::Ipv4Addr::new(frame[16], frame[17], frame[18], frame[19]);
            let src = InnerAddr::ipv4(src);
            let dst = InnerAddr::ipv4(dst);
            let class = classify(&dst);
            Ok((src, dst, class))
        }
        6 => {
            if frame.len() < 40 {
                return Err(CoreError::FrameTooShort);
            }
            let mut src_bytes = [0u8; 16];
            let mut dst_bytes = [0u8; 16];
            src_bytes.copy_from_slice(&frame[8..24]);
            dst_bytes.copy_from_slice(&frame[24..40]);
            let src = InnerAddr::ipv6(std::net::Ipv6Addr::from(src_bytes));
            let dst = InnerAddr::ipv6(std::net::Ipv6Addr::from(dst_bytes));
            let class = classify(&dst);
            Ok((src, dst, class))
        }
        _ => Err(CoreError::FrameTooShort),
    }
}

fn extract_from_ether(frame: &[u8]) -> CoreResult<(InnerAddr, InnerAddr, AddrClass)> {
    if frame.len() < ETHER_HEADER_LEN {
        return Err(CoreError::FrameTooShort);
    }

    let dst_mac = MacAddress::new(frame[0..6].try_into().unwrap());
    let src_mac = MacAddress::new(frame[6..12].try_into().unwrap());

    let mut ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype == ETHERTYPE_8021Q {
        if frame.len() < ETHER_HEADER_LEN + VLAN_TAG_LEN {
            return Err(CoreError::FrameTooShort);
        }
        ethertype = u16::from_be_bytes([frame[16], frame[17]]);
    }

    // Only frames carrying IP payloads (or ARP, via the generic fallback
    // below) are in scope for routing; anything else still yields a valid
    // MAC-keyed (src, dst) pair — classification of the destination never
    // depends on the payload's ethertype.
    if !matches!(ethertype, ETHERTYPE_IPV4 | ETHERTYPE_IPV6) && !is_known_ethertype(ethertype) {
        return Err(CoreError::UnknownEtherType(ethertype));
    }

    let src = InnerAddr::ether(src_mac);
    let dst = InnerAddr::ether(dst_mac);
    let class = classify(&dst);
    Ok((src, dst, class))
}

fn is_known_ethertype(ethertype: u16) -> bool {
    const ETHERTYPE_ARP: u16 = 0x0806;
    const ETHERTYPE_RARP: u16 = 0x8035;
    matches!(ethertype, ETHERTYPE_ARP | ETHERTYPE_RARP)
}

fn classify(dst: &InnerAddr) -> AddrClass {
    if dst.is_broadcast() {
        AddrClass::Broadcast
    } else if dst.is_multicast() {
        AddrClass::Multicast
    } else {
        AddrClass::Unicast
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ipv4_frame(src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let mut buf = vec![0u8; 20];
        buf[0] = 0x45;
        buf[12..16].copy_from_slice(&src.octets());
        buf[16..20].copy_from_slice(&dst.octets());
        buf
    }

    #[test]
    fn extracts_ipv4_host_pair_from_tun_frame() {
        let frame = ipv4_frame(Ipv4Addr::new(10, 8, 0, 6), Ipv4Addr::new(10, 8, 0, 10));
        let (src, dst, class) = extract_from_packet(TunnelKind::Tun, &frame).unwrap();
        assert_eq!(src, InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 6)));
        assert_eq!(dst, InnerAddr::ipv4(Ipv4Addr::new(10, 8, 0, 10)));
        assert_eq!(class, AddrClass::Unicast);
    }

    #[test]
    fn too_short_tun_frame_fails() {
        let frame = [0x45u8; 10];
        assert!(extract_from_packet(TunnelKind::Tun, &frame).is_err());
    }

    #[test]
    fn broadcast_ethernet_frame_is_classified() {
        let mut frame = vec![0u8; 64];
        frame[0..6].copy_from_slice(&[0xFF; 6]);
        frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        frame[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        let (_, _, class) = extract_from_packet(TunnelKind::Tap, &frame).unwrap();
        assert_eq!(class, AddrClass::Broadcast);
    }

    #[test]
    fn vlan_tagged_frame_reads_inner_ethertype() {
        let mut frame = vec![0u8; 68];
        frame[0..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 2]);
        frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        frame[12..14].copy_from_slice(&ETHERTYPE_8021Q.to_be_bytes());
        frame[14..16].copy_from_slice(&[0x00, 0x0A]); // VLAN id 10
        frame[16..18].copy_from_slice(&ETHERTYPE_IPV6.to_be_bytes());
        let (_, _, class) = extract_from_packet(TunnelKind::Tap, &frame).unwrap();
        assert_eq!(class, AddrClass::Unicast);
    }

    #[test]
    fn unknown_ethertype_fails() {
        let mut frame = vec![0u8; 14];
        frame[0..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 2]);
        frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        frame[12..14].copy_from_slice(&0x1234u16.to_be_bytes());
        assert!(extract_from_packet(TunnelKind::Tap, &frame).is_err());
    }
}
