//! Numeric operations on IP addresses treated as fixed-width integers
//!
//! IPv4 addresses are manipulated as big-endian `u32`, IPv6 as `u128`. All
//! the big-integer edge cases of the allocator live here so the rest of the
//! crate never touches raw address bytes.

use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Returns `ip + (x << shift)`, wrapping within the address family.
pub fn add(ip: IpAddr, x: u64, shift: u32) -> IpAddr {
    match ip {
        IpAddr::V4(ip) => {
            let shifted = (x as u32).checked_shl(shift).unwrap_or(0);
            IpAddr::V4(Ipv4Addr::from(u32::from(ip).wrapping_add(shifted)))
        }
        IpAddr::V6(ip) => {
            let shifted = (x as u128).checked_shl(shift).unwrap_or(0);
            IpAddr::V6(Ipv6Addr::from(u128::from(ip).wrapping_add(shifted)))
        }
    }
}

/// Returns `ip - (x << shift)`, wrapping within the address family.
pub fn sub(ip: IpAddr, x: u64, shift: u32) -> IpAddr {
    match ip {
        IpAddr::V4(ip) => {
            let shifted = (x as u32).checked_shl(shift).unwrap_or(0);
            IpAddr::V4(Ipv4Addr::from(u32::from(ip).wrapping_sub(shifted)))
        }
        IpAddr::V6(ip) => {
            let shifted = (x as u128).checked_shl(shift).unwrap_or(0);
            IpAddr::V6(Ipv6Addr::from(u128::from(ip).wrapping_sub(shifted)))
        }
    }
}

/// Returns the value of the bitfield `[u, v)` in `ip` as an integer, where
/// bit 0 is the most-significant bit of the address.
///
/// The result is undefined if `u > v`, if `v - u > 64`, or if either index
/// is larger than the family bit length.
pub fn field(ip: IpAddr, u: u32, v: u32) -> u64 {
    match ip {
        IpAddr::V4(ip) => {
            let mask = u32::MAX.checked_shr(u).unwrap_or(0);
            (u32::from(ip) & mask).checked_shr(32 - v).unwrap_or(0) as u64
        }
        IpAddr::V6(ip) => {
            let mask = u128::MAX.checked_shr(u).unwrap_or(0);
            (u128::from(ip) & mask).checked_shr(128 - v).unwrap_or(0) as u64
        }
    }
}

/// Computes the number of subnets of size `sz` available between `p1` and
/// `p2`, both re-masked to `sz`. The result saturates at [`u64::MAX`].
/// Returns 0 when the families differ, `sz` exceeds the family bit length,
/// or `p2` sorts before `p1`.
pub fn distance(p1: IpNet, p2: IpNet, sz: u8) -> u64 {
    if p1.addr().is_ipv4() != p2.addr().is_ipv4() || p2.addr() < p1.addr() {
        return 0;
    }

    match (p1.addr(), p2.addr()) {
        (IpAddr::V4(a1), IpAddr::V4(a2)) => {
            if sz > 32 {
                return 0;
            }
            let mask = prefix_mask_v4(sz);
            let diff = (u32::from(a2) & mask).wrapping_sub(u32::from(a1) & mask);
            diff.checked_shr(32 - sz as u32).unwrap_or(0) as u64
        }
        (IpAddr::V6(a1), IpAddr::V6(a2)) => {
            if sz > 128 {
                return 0;
            }
            let mask = prefix_mask_v6(sz);
            let diff = (u128::from(a2) & mask).wrapping_sub(u128::from(a1) & mask);
            let d = diff.checked_shr(128 - sz as u32).unwrap_or(0);
            u64::try_from(d).unwrap_or(u64::MAX)
        }
        _ => 0,
    }
}

fn prefix_mask_v4(prefix_len: u8) -> u32 {
    u32::MAX.checked_shl(32 - prefix_len as u32).unwrap_or(0)
}

fn prefix_mask_v6(prefix_len: u8) -> u128 {
    u128::MAX.checked_shl(128 - prefix_len as u32).unwrap_or(0)
}
