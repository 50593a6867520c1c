//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use ipnetwork::Ipv6Network;

// Extension methods for Ipv6Addr.
pub trait Ipv6AddrExt {
    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Returns true if this is a link-local unicast address (fe80::/10).
    fn is_link_local(&self) -> bool;

    // Converts this IP address into a host prefix network.
    fn to_host_prefix(&self) -> Ipv6Network;
}

// Extension methods for Ipv6Network.
pub trait Ipv6NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Applies the network mask, zeroing the host bits.
    fn apply_mask(&self) -> Ipv6Network;

    // Returns the ::/0 prefix.
    fn default_route() -> Ipv6Network;
}

// ===== impl Ipv6Addr =====

impl Ipv6AddrExt for Ipv6Addr {
    fn is_usable(&self) -> bool {
        !(self.is_loopback() || self.is_multicast() || self.is_unspecified())
    }

    fn is_link_local(&self) -> bool {
        (self.segments()[0] & 0xffc0) == 0xfe80
    }

    fn to_host_prefix(&self) -> Ipv6Network {
        Ipv6Network::new(*self, Ipv6Network::MAX_PREFIXLEN).unwrap()
    }
}

// ===== impl Ipv6Network =====

impl Ipv6NetworkExt for Ipv6Network {
    const MAX_PREFIXLEN: u8 = 128;

    fn apply_mask(&self) -> Ipv6Network {
        Ipv6Network::new(self.network(), self.prefix()).unwrap()
    }

    fn default_route() -> Ipv6Network {
        Ipv6Network::new(Ipv6Addr::UNSPECIFIED, 0).unwrap()
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_local() {
        let addr: Ipv6Addr = "fe80::1".parse().unwrap();
        assert!(Ipv6AddrExt::is_link_local(&addr));
        let addr: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert!(!Ipv6AddrExt::is_link_local(&addr));
    }

    #[test]
    fn mask() {
        let prefix: Ipv6Network = "2001:db8:1::1/64".parse().unwrap();
        let addr: Ipv6Addr = "2001:db8:1::".parse().unwrap();
        assert_eq!(prefix.apply_mask().ip(), addr);
        assert_eq!(prefix.apply_mask().prefix(), 64);

        let addr: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert_eq!(addr.to_host_prefix().prefix(), 128);
        assert_eq!(Ipv6Network::default_route().prefix(), 0);
    }
}
