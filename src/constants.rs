//! Protocol constants shared with the metadata and chunk servers
//!
//! The layout math in [`crate::data`] must agree with the servers byte for
//! byte, so every number the two sides depend on lives here.

/// Fixed chunk size: 64MB
///
/// Every chunk on a chunk server holds at most this many bytes. Replicated
/// files map one chunk to one `CHUNK_SIZE` range of the file; striped files
/// spread `CHUNK_SIZE * num_stripes` bytes of data over one chunk block.
pub const CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Stripe sizes must be a multiple of this (4KB)
pub const STRIPE_ALIGNMENT: u64 = 4096;

/// Smallest accepted stripe size
pub const MIN_STRIPE_SIZE: u64 = STRIPE_ALIGNMENT;

/// Largest accepted stripe size (one full chunk)
pub const MAX_STRIPE_SIZE: u64 = CHUNK_SIZE;

/// Maximum number of data stripes per chunk block
pub const MAX_DATA_STRIPES: u32 = 64;

/// Maximum number of recovery stripes per chunk block
pub const MAX_RECOVERY_STRIPES: u32 = 32;

/// Maximum replication factor accepted by the metadata server
pub const MAX_REPLICATION: u32 = 64;

/// Lowest storage tier
pub const MIN_STORAGE_TIER: u8 = 0;

/// Highest storage tier
pub const MAX_STORAGE_TIER: u8 = 15;

/// Wire value for "no user" in stat/create payloads
pub const USER_NONE: u32 = 0xFFFF_FFFF;

/// Wire value for "no group" in stat/create payloads
pub const GROUP_NONE: u32 = 0xFFFF_FFFF;

/// Maximum path length accepted before any RPC is made (4KB)
pub const MAX_PATH_LENGTH: usize = 4096;

/// Maximum single chunk-server transfer (one chunk)
pub const MAX_TRANSFER_SIZE: usize = CHUNK_SIZE as usize;

/// Wire value of the striper type for plain replicated files
pub const STRIPER_TYPE_NONE: i32 = 1;

/// Wire value of the Reed-Solomon striper type
pub const STRIPER_TYPE_RS: i32 = 2;
