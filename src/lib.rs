//! qfs-access - Client access layer for a chunk-based distributed file system
//!
//! The crate is everything an application links against to talk to a
//! QFS-style cluster: a metadata server holding the namespace and chunk
//! assignments, and chunk servers holding fixed-size chunks of file data.
//!
//! - **Namespace operations** ([`metadata`]): create, stat, rename,
//!   readdir/readdirplus, recursive mkdir/rmdir, with paths normalized
//!   client-side before any request is made
//! - **Layout planning** ([`data`]): replicated and Reed-Solomon striped
//!   layouts, validated before they reach the metadata server
//! - **Chunk location** ([`locate`]): byte ranges to chunk slots and their
//!   replicas, cached per file generation
//! - **Buffered channels** ([`io`]): write buffering with explicit sync, and
//!   reads with background read-ahead
//! - **Delegation tokens** ([`delegation`]): issue, renew and cancel
//! - **In-process cluster** ([`memory`]): metadata and chunk servers living
//!   in the client's process
//!
//! The network protocols are not part of this crate; the client reaches the
//! servers through the [`rpc::MetaServerClient`] and
//! [`rpc::ChunkServerClient`] traits.
//!
//! # Example
//!
//! ```rust,no_run
//! use qfs_access::config::ClientConfig;
//! use qfs_access::memory::MemoryCluster;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = MemoryCluster::new(3);
//! let client = cluster.client(ClientConfig::default())?;
//!
//! client.mkdirs("/data/logs").await?;
//! let mut out = client.create_with_params("/data/logs/a", "2").await?;
//! out.write(b"Hello, QFS!").await?;
//! out.close().await?;
//!
//! let mut input = client.open("/data/logs/a").await?;
//! let mut buf = vec![0u8; 64];
//! let n = input.read(&mut buf).await?;
//! assert_eq!(&buf[..n], b"Hello, QFS!");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod constants;
pub mod data;
pub mod delegation;
pub mod error;
pub mod io;
pub mod locate;
pub mod logging;
pub mod memory;
pub mod metadata;
pub mod rpc;
pub mod stats;

pub use api::{CreateOptions, QfsClient};
pub use error::{AccessError, AccessResult};
