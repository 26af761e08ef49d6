//! Pool identifiers and per-pool allocation state

use crate::bitmap::Bitmap;
use crate::error::Error;
use ipnet::IpNet;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Composite reference to an allocated pool: address space, parent subnet,
/// and optional sub-range. This is the only handle a caller needs to retain
/// to later request or release addresses, or deallocate the pool.
///
/// The string form is `/`-separated: `AS/parent_addr/parent_bits` for a
/// parent-only pool, with `child_addr/child_bits` appended for a sub-range
/// (3 or 5 components; anything else is rejected).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolId {
    /// Name of the address space the pool belongs to
    pub address_space: String,
    /// The allocated parent prefix
    pub subnet: IpNet,
    /// The sub-range within the parent, when one was requested
    pub child_subnet: Option<IpNet>,
}

impl PoolId {
    pub fn new(address_space: impl Into<String>, subnet: IpNet, child_subnet: Option<IpNet>) -> Self {
        Self {
            address_space: address_space.into(),
            subnet,
            child_subnet,
        }
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.child_subnet {
            Some(child) => write!(f, "{}/{}/{}", self.address_space, self.subnet, child),
            None => write!(f, "{}/{}", self.address_space, self.subnet),
        }
    }
}

impl FromStr for PoolId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidParameter(format!("invalid pool identifier: {s:?}"));

        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 3 && parts.len() != 5 {
            return Err(invalid());
        }
        if parts[0].is_empty() {
            return Err(invalid());
        }
        let subnet = format!("{}/{}", parts[1], parts[2])
            .parse::<IpNet>()
            .map_err(|_| invalid())?;
        let child_subnet = if parts.len() == 5 {
            Some(
                format!("{}/{}", parts[3], parts[4])
                    .parse::<IpNet>()
                    .map_err(|_| invalid())?,
            )
        } else {
            None
        };

        Ok(PoolId {
            address_space: parts[0].to_string(),
            subnet,
            child_subnet,
        })
    }
}

impl Serialize for PoolId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PoolId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e: Error| D::Error::custom(e.to_string()))
    }
}

/// Allocation state of one parent pool
#[derive(Debug, Clone)]
pub(crate) struct PoolData {
    /// Host-address bitmap; ordinal 0 is the network address
    pub(crate) addrs: Bitmap,
    /// Sub-ranges carved out of this pool
    pub(crate) children: HashSet<IpNet>,
    /// Deallocate the pool once the last child is removed
    pub(crate) auto_release: bool,
}

impl PoolData {
    pub(crate) fn new(pool: IpNet) -> Self {
        let host_bits = u32::from(pool.max_prefix_len() - pool.prefix_len());
        let num_addresses = 1u64.checked_shl(host_bits).unwrap_or(u64::MAX);

        let mut addrs = Bitmap::new(num_addresses);

        // Pre-reserve the network address on any pool large enough to have
        // one (i.e. anything bigger than an IPv4 /31).
        if !(pool.addr().is_ipv4() && num_addresses <= 2) {
            addrs
                .set(0)
                .expect("fresh bitmap always has ordinal 0 free");
        }

        Self {
            addrs,
            children: HashSet::new(),
            auto_release: false,
        }
    }
}
