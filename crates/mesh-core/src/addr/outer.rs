use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// The kernel-chosen local endpoint a datagram arrived on, recorded so a
/// multi-homed UDP socket replies from the same local address/interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketInfo {
    pub local_addr: IpAddr,
    pub if_index: Option<u32>,
}

/// The peer's transport-level (real) address, as observed by the server
/// socket. `PacketInfo` is carried for reply routing only and is excluded
/// from equality/hashing by hand — it is kernel-chosen per-datagram metadata,
/// not part of a peer's identity, and a transport that populates it with a
/// value that varies across datagrams from the same peer must still resolve
/// to the same registry entry (at most one entry in the by-real map).
#[derive(Debug, Clone)]
pub enum OuterAddr {
    Ipv4(SocketAddr, Option<PacketInfo>),
    Ipv6(SocketAddr, Option<PacketInfo>),
    Unix(PathBuf),
}

impl PartialEq for OuterAddr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ipv4(a, _), Self::Ipv4(b, _)) => a == b,
            (Self::Ipv6(a, _), Self::Ipv6(b, _)) => a == b,
            (Self::Unix(a), Self::Unix(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for OuterAddr {}

impl Hash for OuterAddr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Ipv4(addr, _) | Self::Ipv6(addr, _) => addr.hash(state),
            Self::Unix(path) => path.hash(state),
        }
    }
}

impl OuterAddr {
    pub fn from_socket_addr(addr: SocketAddr, pktinfo: Option<PacketInfo>) -> Self {
        if addr.is_ipv4() {
            Self::Ipv4(addr, pktinfo)
        } else {
            Self::Ipv6(addr, pktinfo)
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::Unix(path.into())
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Ipv4(addr, _) | Self::Ipv6(addr, _) => Some(*addr),
            Self::Unix(_) => None,
        }
    }

    pub fn packet_info(&self) -> Option<PacketInfo> {
        match self {
            Self::Ipv4(_, pi) | Self::Ipv6(_, pi) => *pi,
            Self::Unix(_) => None,
        }
    }
}

impl fmt::Display for OuterAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4(addr, _) | Self::Ipv6(addr, _) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_and_ipv6_are_distinguished() {
        let v4: SocketAddr = "1.2.3.4:1194".parse().unwrap();
        let v6: SocketAddr = "[::1]:1194".parse().unwrap();
        assert!(matches!(
            OuterAddr::from_socket_addr(v4, None),
            OuterAddr::Ipv4(_, _)
        ));
        assert!(matches!(
            OuterAddr::from_socket_addr(v6, None),
            OuterAddr::Ipv6(_, _)
        ));
    }

    #[test]
    fn packet_info_does_not_affect_identity_or_hash() {
        use std::collections::hash_map::DefaultHasher;

        let addr: SocketAddr = "1.2.3.4:1194".parse().unwrap();
        let pi_a = PacketInfo {
            local_addr: "10.0.0.1".parse().unwrap(),
            if_index: Some(1),
        };
        let pi_b = PacketInfo {
            local_addr: "10.0.0.2".parse().unwrap(),
            if_index: Some(2),
        };

        let a = OuterAddr::from_socket_addr(addr, Some(pi_a));
        let b = OuterAddr::from_socket_addr(addr, Some(pi_b));
        assert_eq!(a, b);

        let hash_of = |v: &OuterAddr| {
            let mut hasher = DefaultHasher::new();
            v.hash(&mut hasher);
            hasher.finish()
        };
        assert_eq!(hash_of(&a), hash_of(&b));
    }
}
