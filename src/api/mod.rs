/// Access client API
///
/// [`QfsClient`] is the entry point: one instance owns one chunk-server
/// connection pool and one location cache, and hands out channels.
pub mod file_ops;
pub mod types;

// Re-export main types
pub use file_ops::*;
pub use types::*;
