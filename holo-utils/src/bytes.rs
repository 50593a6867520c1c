//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::Ipv6Network;

thread_local!(
    pub static TLS_BUF: RefCell<BytesMut> =
        RefCell::new(BytesMut::with_capacity(4096))
);

// Extension methods for Bytes.
pub trait BytesExt {
    /// Gets an unsigned 24 bit integer from `self` in the big-endian byte
    /// order.
    ///
    /// The current position is advanced by 3.
    fn get_u24(&mut self) -> u32;

    /// Gets an IPv4 addr from `self` in big-endian byte order.
    ///
    /// The current position is advanced by 4.
    fn get_ipv4(&mut self) -> Ipv4Addr;

    /// Gets an IPv6 addr from `self` in big-endian byte order.
    ///
    /// The current position is advanced by 16.
    fn get_ipv6(&mut self) -> Ipv6Addr;

    /// Gets an IPv6 prefix encoded in the minimum number of 32-bit words
    /// needed to hold `plen` bits.
    ///
    /// Returns `None` if the prefix length is invalid.
    fn get_ipv6_prefix(&mut self, plen: u8) -> Option<Ipv6Network>;
}

// Extension methods for BytesMut.
pub trait BytesMutExt {
    /// Writes an unsigned 24 bit integer to `self` in big-endian byte order.
    ///
    /// The current position is advanced by 3.
    fn put_u24(&mut self, n: u32);

    /// Writes an IPv4 addr to `self` in big-endian byte order.
    ///
    /// The current position is advanced by 4.
    fn put_ipv4(&mut self, addr: &Ipv4Addr);

    /// Writes an IPv6 addr to `self` in big-endian byte order.
    ///
    /// The current position is advanced by 16.
    fn put_ipv6(&mut self, addr: &Ipv6Addr);

    /// Writes the address part of an IPv6 prefix, padded to a 32-bit
    /// boundary.
    fn put_ipv6_prefix(&mut self, prefix: &Ipv6Network);
}

/// Number of bytes an IPv6 prefix of the given length takes on the wire.
pub fn prefix_wire_len(plen: u8) -> usize {
    (plen as usize).div_ceil(32) * 4
}

// ===== impl Bytes =====

impl BytesExt for Bytes {
    fn get_u24(&mut self) -> u32 {
        let mut n = [0; 4];
        self.copy_to_slice(&mut n[1..=3]);
        u32::from_be_bytes(n)
    }

    fn get_ipv4(&mut self) -> Ipv4Addr {
        Ipv4Addr::from(self.get_u32())
    }

    fn get_ipv6(&mut self) -> Ipv6Addr {
        Ipv6Addr::from(self.get_u128())
    }

    fn get_ipv6_prefix(&mut self, plen: u8) -> Option<Ipv6Network> {
        let wire_len = prefix_wire_len(plen);
        if plen > 128 || self.remaining() < wire_len {
            return None;
        }
        let mut octets = [0; 16];
        self.copy_to_slice(&mut octets[..wire_len]);
        Ipv6Network::new(Ipv6Addr::from(octets), plen).ok()
    }
}

// ===== impl BytesMut =====

impl BytesMutExt for BytesMut {
    fn put_u24(&mut self, n: u32) {
        let n = n.to_be_bytes();
        self.put_slice(&n[1..=3]);
    }

    fn put_ipv4(&mut self, addr: &Ipv4Addr) {
        self.put_u32((*addr).into())
    }

    fn put_ipv6(&mut self, addr: &Ipv6Addr) {
        self.put_slice(&addr.octets())
    }

    fn put_ipv6_prefix(&mut self, prefix: &Ipv6Network) {
        let wire_len = prefix_wire_len(prefix.prefix());
        self.put_slice(&prefix.ip().octets()[..wire_len]);
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_padding() {
        assert_eq!(prefix_wire_len(0), 0);
        assert_eq!(prefix_wire_len(1), 4);
        assert_eq!(prefix_wire_len(64), 8);
        assert_eq!(prefix_wire_len(65), 12);
        assert_eq!(prefix_wire_len(128), 16);
    }

    #[test]
    fn prefix_encoding() {
        let prefix: Ipv6Network = "2001:db8:1::/48".parse().unwrap();
        let mut buf = BytesMut::new();
        buf.put_ipv6_prefix(&prefix);
        assert_eq!(buf.len(), 8);

        let mut buf = buf.freeze();
        assert_eq!(buf.get_ipv6_prefix(48), Some(prefix));
        assert!(buf.is_empty());
    }
}
