//! Predefined pool catalogs and allocator configuration

use crate::error::{Error, Result};
use crate::ipbits;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A predefined candidate network: a base prefix together with the target
/// prefix length it is carved into when pools are allocated dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkToSplit {
    /// Base prefix the candidate subnets are carved from
    pub base: IpNet,
    /// Prefix length of the subnets handed out of `base`
    pub size: u8,
}

impl NetworkToSplit {
    pub fn new(base: IpNet, size: u8) -> Self {
        Self { base, size }
    }

    /// Validate the split and return a copy with the base masked.
    pub fn masked(&self) -> Result<Self> {
        let base = self.base.trunc();
        if self.size < base.prefix_len() || self.size > base.max_prefix_len() {
            return Err(Error::InvalidParameter(format!(
                "network {} cannot be split into /{} subnets",
                base, self.size
            )));
        }
        Ok(Self {
            base,
            size: self.size,
        })
    }

    /// The first size-`size` subnet of the base prefix.
    pub fn first_prefix(&self) -> IpNet {
        // size was validated against the base at construction
        IpNet::new(self.base.network(), self.size)
            .expect("split size validated against base prefix")
            .trunc()
    }

    /// Number of size-`size` subnets the base prefix holds, saturating at
    /// [`u64::MAX`].
    pub fn subnet_count(&self) -> u64 {
        let split_bits = u32::from(self.size - self.base.prefix_len());
        1u64.checked_shl(split_bits).unwrap_or(u64::MAX)
    }

    /// The `n`-th size-`size` subnet of the base prefix.
    pub fn subnet_at(&self, n: u64) -> IpNet {
        let shift = (self.base.max_prefix_len() - self.size) as u32;
        let addr = ipbits::add(self.base.network(), n, shift);
        IpNet::new(addr, self.size)
            .expect("split size validated against base prefix")
            .trunc()
    }
}

fn split(s: &str, size: u8) -> NetworkToSplit {
    NetworkToSplit::new(IpNet::from_str(s).expect("static catalog entry"), size)
}

/// Default candidates for the local address space: the RFC 1918 ranges a
/// container network daemon hands to host-local networks.
pub fn local_default_networks() -> Vec<NetworkToSplit> {
    let mut predefined: Vec<NetworkToSplit> = (17..=31)
        .map(|second| split(&format!("172.{second}.0.0/16"), 16))
        .collect();
    predefined.push(split("192.168.0.0/16", 20));
    predefined
}

/// Default candidates for the global address space.
pub fn global_default_networks() -> Vec<NetworkToSplit> {
    vec![split("30.0.0.0/8", 24), split("40.0.0.0/8", 24)]
}

/// Default IPv6 candidates for the local address space: the ULA range split
/// into /64 subnets. The space is large enough that allocation is randomized
/// when the allocator carries a seed.
pub fn local_default_networks_v6() -> Vec<NetworkToSplit> {
    vec![split("fd00::/8", 64)]
}

/// Allocator configuration: one candidate catalog per address space and
/// family, plus the seed driving randomized IPv6 allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// IPv4 candidates for the local address space
    pub local: Vec<NetworkToSplit>,
    /// IPv6 candidates for the local address space
    pub local_v6: Vec<NetworkToSplit>,
    /// IPv4 candidates for the global address space
    pub global: Vec<NetworkToSplit>,
    /// IPv6 candidates for the global address space
    pub global_v6: Vec<NetworkToSplit>,
    /// Seed for randomized IPv6 subnet draws; `None` seeds from entropy
    pub ula_seed: Option<u64>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            local: local_default_networks(),
            local_v6: local_default_networks_v6(),
            global: global_default_networks(),
            global_v6: Vec::new(),
            ula_seed: None,
        }
    }
}
