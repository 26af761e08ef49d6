//! Default IPAM allocator core
//!
//! Hands out subnets and host addresses to virtual networks:
//! - Carves dynamic pools out of predefined candidate catalogs, skipping
//!   everything already allocated or reserved on the host
//! - Validates user-specified pools and sub-ranges against existing
//!   allocations with well-defined overlap semantics
//! - Allocates and releases individual host addresses per pool, with
//!   serialized or cursor-based ordering
//! - Randomizes subnet selection for ULA-scale IPv6 catalogs via a
//!   draw-without-replacement shuffle
//!
//! The crate is in-memory and process-local: no persistence format, no
//! multi-host coordination. Callers hold on to the [`PoolId`] returned by
//! [`Allocator::request_pool`] to later request addresses or release the
//! pool.
//!
//! ```
//! use ipam_core::{Allocator, PoolRequest, LOCAL_ADDRESS_SPACE};
//! use std::collections::HashMap;
//!
//! let allocator = Allocator::new()?;
//! let pool = allocator.request_pool(PoolRequest {
//!     address_space: LOCAL_ADDRESS_SPACE.to_string(),
//!     ..Default::default()
//! })?;
//! let address = allocator.request_address(&pool.pool_id, None, &HashMap::new())?;
//! assert!(pool.pool.contains(&address.addr()));
//! # allocator.release_address(&pool.pool_id, address.addr())?;
//! # allocator.release_pool(&pool.pool_id)?;
//! # Ok::<(), ipam_core::Error>(())
//! ```

pub mod allocator;
pub mod bitmap;
pub mod config;
pub mod error;
pub mod ipbits;
pub mod netutil;

// Re-export core types
pub use allocator::{
    AllocatedPool, Allocator, PoolId, PoolRequest, GLOBAL_ADDRESS_SPACE, LOCAL_ADDRESS_SPACE,
    OPT_SERIAL_ALLOC,
};
pub use config::{
    global_default_networks, local_default_networks, local_default_networks_v6, AllocatorConfig,
    NetworkToSplit,
};
pub use error::{Error, Result};
