//! Prefix helpers shared by the pool registry and the subnet picker

use crate::ipbits;
use ipnet::IpNet;
use std::net::IpAddr;

/// Returns the last address of `prefix` (the broadcast address for IPv4).
pub fn last_addr(prefix: IpNet) -> IpAddr {
    prefix.broadcast()
}

/// Returns the position of `addr` within its parent prefix of length
/// `parent_bits`, i.e. the host portion of the address as an integer.
pub fn host_id(addr: IpAddr, parent_bits: u8) -> u64 {
    let bitlen = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    ipbits::field(addr, parent_bits as u32, bitlen)
}

/// Returns the prefix of size `sz` immediately after the end of `prev`, or
/// `None` when the next prefix would wrap past the end of the address family.
pub fn prefix_after(prev: IpNet, sz: u8) -> Option<IpNet> {
    let bits = prev.prefix_len().min(sz);
    let addr = ipbits::add(prev.addr(), 1, (prev.max_prefix_len() - bits) as u32);
    if ip_is_zero(addr) {
        return None;
    }
    IpNet::new(addr, sz).ok().map(|p| p.trunc())
}

/// Returns the interval, in host ordinals of `parent`, spanned by the
/// sub-range `child`. Both bounds are inclusive.
pub fn subnet_range(parent: IpNet, child: IpNet) -> (u64, u64) {
    let start = host_id(child.network(), parent.prefix_len());
    let end = host_id(last_addr(child), parent.prefix_len());
    (start, end)
}

/// Reports whether the two prefixes share any address. Prefixes of different
/// families never overlap.
pub fn overlaps(a: IpNet, b: IpNet) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

fn ip_is_zero(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(a) => u32::from(a) == 0,
        IpAddr::V6(a) => u128::from(a) == 0,
    }
}
