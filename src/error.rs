//! Error types for IPAM operations

use thiserror::Error;

/// Result type for allocator operations
pub type Result<T> = std::result::Result<T, Error>;

/// IPAM allocator errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed prefix, bad pool identifier, or mismatched address family
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A requested pool overlaps an existing allocation, or the exact pool
    /// is already allocated
    #[error("requested pool overlaps an existing pool on this address space")]
    PoolOverlap,

    /// Release targets a pool or sub-range that does not exist
    #[error("release targets a pool that does not exist")]
    BadPool,

    /// An address operation names a pool that does not exist
    #[error("address pool not found: {0}")]
    NotFound(String),

    /// Preferred or released address lies outside its pool
    #[error("requested address is out of the pool's range")]
    IpOutOfRange,

    /// Every predefined candidate is exhausted
    #[error("no available subnet left in the predefined pools")]
    NoMoreSubnets,

    /// The pool has no free address left
    #[error("no available address left in the pool")]
    NoMoreAddresses,
}

impl From<ipnet::PrefixLenError> for Error {
    fn from(e: ipnet::PrefixLenError) -> Self {
        Error::InvalidParameter(e.to_string())
    }
}
