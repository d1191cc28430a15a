//! Fixed IP whitelist.
//!
//! Loopback, RFC 1918, link-local and IPv6 ULA space are exempt from every
//! ban action, automatic or manual. The table is frozen when the engine is
//! constructed; there is no runtime mutation path, which is what makes
//! invariant checking trivial.

use std::net::IpAddr;

/// Exact addresses on the whitelist.
const WHITELIST_IPS: &[&str] = &["127.0.0.1", "::1"];

/// Whitelisted networks in CIDR notation.
const WHITELIST_CIDRS: &[&str] = &[
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
];

/// A parsed CIDR network.
#[derive(Debug, Clone, Copy)]
struct Network {
    addr: IpAddr,
    prefix: u8,
}

impl Network {
    fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = cidr.split_once('/')?;
        let addr: IpAddr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return None;
        }
        Some(Self { addr, prefix })
    }

    /// Prefix match over the raw address bytes. Families never mix.
    fn contains(&self, ip: &IpAddr) -> bool {
        let (net_bytes, ip_bytes): (Vec<u8>, Vec<u8>) = match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => (net.octets().to_vec(), ip.octets().to_vec()),
            (IpAddr::V6(net), IpAddr::V6(ip)) => (net.octets().to_vec(), ip.octets().to_vec()),
            _ => return false,
        };

        let full_bytes = (self.prefix / 8) as usize;
        let rem_bits = self.prefix % 8;
        if net_bytes[..full_bytes] != ip_bytes[..full_bytes] {
            return false;
        }
        if rem_bits == 0 {
            return true;
        }
        let mask = 0xffu8 << (8 - rem_bits);
        (net_bytes[full_bytes] & mask) == (ip_bytes[full_bytes] & mask)
    }
}

/// The process-wide whitelist, built once at engine construction.
pub struct Whitelist {
    ips: Vec<IpAddr>,
    networks: Vec<Network>,
}

impl Whitelist {
    /// Construct the built-in whitelist.
    pub fn builtin() -> Self {
        let ips = WHITELIST_IPS
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        let networks = WHITELIST_CIDRS
            .iter()
            .filter_map(|s| Network::parse(s))
            .collect();
        Self { ips, networks }
    }

    /// True if the textual IP equals a listed address or falls inside a
    /// listed network. Unparsable strings are not whitelisted.
    pub fn contains(&self, ip_str: &str) -> bool {
        let ip: IpAddr = match ip_str.parse() {
            Ok(ip) => ip,
            Err(_) => return false,
        };
        self.ips.contains(&ip) || self.networks.iter().any(|n| n.contains(&ip))
    }
}
