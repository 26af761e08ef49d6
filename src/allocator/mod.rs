//! Default IPAM allocator
//!
//! Hands out subnets and host addresses to virtual networks:
//! - Dynamic pools carved out of predefined candidate catalogs
//! - User-specified pools and sub-ranges with overlap validation
//! - Per-pool host address allocation, serialized or cursor-ordered
//! - Randomized IPv6 allocation for ULA-scale catalogs

mod address_space;
mod cursor;
mod pool;
mod shuffler;

pub use pool::PoolId;

use crate::config::AllocatorConfig;
use crate::error::{Error, Result};
use address_space::AddrSpace;
use ipnet::IpNet;
use std::collections::HashMap;
use std::net::IpAddr;

/// Name of the address space backing host-local networks
pub const LOCAL_ADDRESS_SPACE: &str = "LocalDefault";

/// Name of the address space backing cluster-wide networks
pub const GLOBAL_ADDRESS_SPACE: &str = "GlobalDefault";

/// `request_address` option enabling lowest-first address allocation
pub const OPT_SERIAL_ALLOC: &str = "SerialAlloc";

/// A pool request, either user-specified (`pool` set, optionally with a
/// `sub_pool`) or dynamic (`pool` absent; the next free predefined subnet is
/// picked).
#[derive(Debug, Clone, Default)]
pub struct PoolRequest {
    /// Target address space name
    pub address_space: String,
    /// Explicit parent prefix; `None` requests a dynamic pool
    pub pool: Option<IpNet>,
    /// Sub-range constraining address allocation within `pool`
    pub sub_pool: Option<IpNet>,
    /// Prefixes treated as off-limits for this call without being tracked
    /// in the allocation list
    pub exclude: Vec<IpNet>,
    /// Address family of the request
    pub v6: bool,
}

/// A successfully allocated pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedPool {
    /// Identifier to retain for later address requests and release
    pub pool_id: PoolId,
    /// The allocated parent prefix
    pub pool: IpNet,
}

/// Default IPAM allocator
///
/// Owns one pool registry per address space. Every public operation locks
/// the targeted address space for its full duration and either commits its
/// mutation or fails without leaving partial state behind.
pub struct Allocator {
    spaces: HashMap<String, AddrSpace>,
}

impl Allocator {
    /// Allocator over the default local and global catalogs.
    pub fn new() -> Result<Self> {
        Self::with_config(AllocatorConfig::default())
    }

    /// Allocator over caller-provided catalogs.
    pub fn with_config(config: AllocatorConfig) -> Result<Self> {
        let seed = config.ula_seed.unwrap_or_else(rand::random);

        let mut spaces = HashMap::new();
        spaces.insert(
            LOCAL_ADDRESS_SPACE.to_string(),
            AddrSpace::new(
                LOCAL_ADDRESS_SPACE,
                config.local,
                config.local_v6,
                Some(seed),
            )?,
        );
        spaces.insert(
            GLOBAL_ADDRESS_SPACE.to_string(),
            AddrSpace::new(
                GLOBAL_ADDRESS_SPACE,
                config.global,
                config.global_v6,
                Some(seed.wrapping_add(1)),
            )?,
        );

        Ok(Self { spaces })
    }

    /// Names of the default local and global address spaces.
    pub fn default_address_spaces() -> (&'static str, &'static str) {
        (LOCAL_ADDRESS_SPACE, GLOBAL_ADDRESS_SPACE)
    }

    /// Allocate a pool: either validate and insert the user-specified
    /// prefix, or carve the next free subnet out of the predefined catalog.
    pub fn request_pool(&self, req: PoolRequest) -> Result<AllocatedPool> {
        let space = self.space(&req.address_space)?;

        let Some(pool) = req.pool else {
            if req.sub_pool.is_some() {
                return Err(Error::InvalidParameter(
                    "a sub-pool requires an explicit parent pool".to_string(),
                ));
            }
            let nw = space.allocate_predefined(&req.exclude, req.v6)?;
            return Ok(AllocatedPool {
                pool_id: PoolId::new(space.name(), nw, None),
                pool: nw,
            });
        };

        if pool.addr().is_ipv6() != req.v6 {
            return Err(Error::InvalidParameter(format!(
                "address family of pool {pool} does not match the request"
            )));
        }
        let pool = pool.trunc();

        let sub_pool = match req.sub_pool {
            Some(sub) => {
                let sub = sub.trunc();
                if !pool.contains(&sub) || sub.prefix_len() <= pool.prefix_len() {
                    return Err(Error::InvalidParameter(format!(
                        "sub-pool {sub} must be strictly contained in pool {pool}"
                    )));
                }
                Some(sub)
            }
            None => None,
        };

        space.allocate_subnet(pool, sub_pool)?;
        Ok(AllocatedPool {
            pool_id: PoolId::new(space.name(), pool, sub_pool),
            pool,
        })
    }

    /// Release a pool, or remove its sub-range. The pool is deallocated
    /// once it has no sub-ranges left and was flagged for release.
    pub fn release_pool(&self, pool_id: &PoolId) -> Result<()> {
        let space = self.space(&pool_id.address_space)?;
        space.release_subnet(pool_id.subnet, pool_id.child_subnet)
    }

    /// Allocate one host address within the pool, honoring a preferred
    /// address and the [`OPT_SERIAL_ALLOC`] option. The result carries the
    /// parent pool's prefix length.
    pub fn request_address(
        &self,
        pool_id: &PoolId,
        preferred: Option<IpAddr>,
        options: &HashMap<String, String>,
    ) -> Result<IpNet> {
        let space = self.space(&pool_id.address_space)?;
        let serial = options.get(OPT_SERIAL_ALLOC).is_some_and(|v| v == "true");

        let addr =
            space.request_address(pool_id.subnet, pool_id.child_subnet, preferred, serial)?;
        Ok(IpNet::new(addr, pool_id.subnet.prefix_len())?)
    }

    /// Return one host address to the pool.
    pub fn release_address(&self, pool_id: &PoolId, address: IpAddr) -> Result<()> {
        let space = self.space(&pool_id.address_space)?;
        space.release_address(pool_id.subnet, pool_id.child_subnet, address)
    }

    fn space(&self, name: &str) -> Result<&AddrSpace> {
        self.spaces
            .get(name)
            .ok_or_else(|| Error::InvalidParameter(format!("unknown address space: {name}")))
    }
}
