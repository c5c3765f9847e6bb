//! Address parsing and classification
//!
//! Every lookup starts here: the input text is trimmed, parsed as an IPv4
//! or IPv6 address and tagged as public or private/reserved. Private and
//! reserved addresses never reach a database.

use crate::error::LookupError;
use ipnet::{Ipv4Net, Ipv6Net};
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Classification of an input address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressClass {
    /// Not a valid IPv4 or IPv6 address
    Malformed,
    /// Loopback, RFC1918, link-local, or another special-purpose range
    Private,
    /// Publicly routable
    Public,
}

/// A parsed and classified address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    ip: IpAddr,
    class: AddressClass,
}

impl Address {
    /// The parsed address
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// `Private` or `Public`
    pub fn class(&self) -> AddressClass {
        self.class
    }

    /// True for publicly routable addresses
    pub fn is_public(&self) -> bool {
        self.class == AddressClass::Public
    }

    /// The address with IPv4-mapped IPv6 unwrapped to IPv4
    pub fn canonical(&self) -> IpAddr {
        match self.ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(self.ip, IpAddr::V4),
            v4 => v4,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.ip.fmt(f)
    }
}

/// IPv4 special-purpose ranges
const PRIVATE_V4: &[Ipv4Net] = &[
    Ipv4Net::new_assert(Ipv4Addr::new(0, 0, 0, 0), 8),
    Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 0, 0), 8),
    Ipv4Net::new_assert(Ipv4Addr::new(100, 64, 0, 0), 10),
    Ipv4Net::new_assert(Ipv4Addr::new(127, 0, 0, 0), 8),
    Ipv4Net::new_assert(Ipv4Addr::new(169, 254, 0, 0), 16),
    Ipv4Net::new_assert(Ipv4Addr::new(172, 16, 0, 0), 12),
    Ipv4Net::new_assert(Ipv4Addr::new(192, 0, 0, 0), 24),
    Ipv4Net::new_assert(Ipv4Addr::new(192, 0, 2, 0), 24),
    Ipv4Net::new_assert(Ipv4Addr::new(192, 168, 0, 0), 16),
    Ipv4Net::new_assert(Ipv4Addr::new(198, 18, 0, 0), 15),
    Ipv4Net::new_assert(Ipv4Addr::new(198, 51, 100, 0), 24),
    Ipv4Net::new_assert(Ipv4Addr::new(203, 0, 113, 0), 24),
    Ipv4Net::new_assert(Ipv4Addr::new(224, 0, 0, 0), 4),
    Ipv4Net::new_assert(Ipv4Addr::new(240, 0, 0, 0), 4),
];

/// IPv6 special-purpose ranges
///
/// `::/8` covers the unspecified, loopback and deprecated IPv4-compatible
/// (`::a.b.c.d`) forms. IPv4-mapped addresses are unwrapped before this
/// table is consulted.
const PRIVATE_V6: &[Ipv6Net] = &[
    Ipv6Net::new_assert(Ipv6Addr::UNSPECIFIED, 8),
    Ipv6Net::new_assert(Ipv6Addr::new(0x0100, 0, 0, 0, 0, 0, 0, 0), 64),
    Ipv6Net::new_assert(Ipv6Addr::new(0x2001, 0, 0, 0, 0, 0, 0, 0), 23),
    Ipv6Net::new_assert(Ipv6Addr::new(0x2001, 0x0db8, 0, 0, 0, 0, 0, 0), 32),
    Ipv6Net::new_assert(Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
    Ipv6Net::new_assert(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    Ipv6Net::new_assert(Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8),
];

/// Parse and classify `text`
///
/// Surrounding whitespace is ignored. Returns `InvalidFormat` for anything
/// that is not an IPv4 dotted quad or an IPv6 address.
pub fn classify(text: &str) -> Result<Address, LookupError> {
    let ip: IpAddr = text
        .trim()
        .parse()
        .map_err(|_| LookupError::InvalidFormat {
            input: text.to_string(),
        })?;

    let class = if is_private(ip) {
        AddressClass::Private
    } else {
        AddressClass::Public
    };
    Ok(Address { ip, class })
}

/// Classify `text` and reject anything that is not publicly routable
pub fn require_public(text: &str) -> Result<Address, LookupError> {
    let address = classify(text)?;
    if !address.is_public() {
        return Err(LookupError::PrivateAddress { ip: address.ip });
    }
    Ok(address)
}

/// Classification tag for `text`, `Malformed` when it does not parse
pub fn class_of(text: &str) -> AddressClass {
    classify(text)
        .map(|address| address.class)
        .unwrap_or(AddressClass::Malformed)
}

/// True for addresses in any private or reserved range
///
/// IPv4-mapped IPv6 addresses are judged by the IPv4 address they carry.
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_v4(v4),
            None => is_private_v6(v6),
        },
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip == Ipv4Addr::BROADCAST || PRIVATE_V4.iter().any(|net| net.contains(&ip))
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    PRIVATE_V6.iter().any(|net| net.contains(&ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_inputs() {
        for text in [
            "",
            "   ",
            "not-an-ip",
            "256.1.1.1",
            "1.2.3",
            "1.2.3.4.5",
            "01.2.3.4",
            "8.8.8.8/24",
            "2001:db8:::1",
            "fe80::1%eth0",
            "example.com",
        ] {
            assert_eq!(class_of(text), AddressClass::Malformed, "{:?}", text);
        }
    }

    #[test]
    fn test_private_inputs() {
        for text in [
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.0.1",
            "127.0.0.1",
            "169.254.10.10",
            "0.0.0.0",
            "100.64.0.1",
            "192.0.2.55",
            "198.51.100.1",
            "203.0.113.200",
            "198.19.1.1",
            "224.0.0.251",
            "250.1.1.1",
            "255.255.255.255",
            "::",
            "::1",
            "fe80::1",
            "fd12:3456::1",
            "fc00::1",
            "ff02::1",
            "2001:db8::1",
            "100::1",
            "::ffff:10.0.0.1",
            "::ffff:127.0.0.1",
            "::8.8.8.8",
            "::1.1.1.1",
            "2001::1",
            "2001:1ff::1",
        ] {
            assert_eq!(class_of(text), AddressClass::Private, "{:?}", text);
        }
    }

    #[test]
    fn test_public_inputs() {
        for text in [
            "8.8.8.8",
            "1.1.1.1",
            "172.32.0.1",
            "100.128.0.1",
            "192.0.3.1",
            "2001:4860:4860::8888",
            "2606:4700:4700::1111",
            "::ffff:8.8.8.8",
            "2001:200::1",
        ] {
            assert_eq!(class_of(text), AddressClass::Public, "{:?}", text);
        }
    }

    #[test]
    fn test_classify_trims_and_reports_input() {
        let address = classify("  8.8.8.8\n").unwrap();
        assert_eq!(address.ip(), "8.8.8.8".parse::<IpAddr>().unwrap());
        assert!(address.is_public());
        assert_eq!(address.to_string(), "8.8.8.8");

        match classify("bogus") {
            Err(LookupError::InvalidFormat { input }) => assert_eq!(input, "bogus"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
