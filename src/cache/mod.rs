//! Client-side caches
//!
//! Only chunk locations are cached. Attributes are snapshots and are always
//! re-fetched from the metadata server.

pub mod location_cache;
pub mod policy;

pub use location_cache::{LocationCache, LocationEntry};
pub use policy::CachePolicy;
