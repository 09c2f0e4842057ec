//! RPC collaborators of the access layer
//!
//! The client never speaks a wire protocol itself. Everything it needs from
//! the metadata service goes through [`MetaServerClient`], and every chunk
//! byte goes through a [`ChunkServerClient`] obtained from a
//! [`ChunkServerConnector`]. Replies carry a status code: `Ok` for status 0,
//! [`RpcError::Status`] with the raw negative code otherwise.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::data::layout::StripeLayout;
use crate::delegation::DelegationToken;
use crate::metadata::types::FileAttr;

pub mod connection;

pub use connection::ConnectionPool;

/// RPC error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The server answered with a negative status
    #[error("server returned status {0}")]
    Status(i32),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC timeout")]
    Timeout,

    /// The reply could not be decoded
    #[error("Invalid reply: {0}")]
    InvalidReply(String),
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Address of a metadata or chunk server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerLocation {
    pub host: String,
    pub port: u16,
}

impl ServerLocation {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && self.port > 0
    }
}

impl fmt::Display for ServerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identifies one version of one chunk on a chunk server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHandle {
    pub chunk_id: i64,
    pub version: i64,
}

/// A chunk slot of a file and the servers holding it
///
/// Slot numbering follows [`crate::data::chunking::StripeMapper`]: for
/// replicated files slot `n` covers bytes `[n * CHUNK_SIZE, (n + 1) * CHUNK_SIZE)`,
/// for striped files each block of `num_stripes + num_recovery_stripes`
/// consecutive slots holds one stripe set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSlot {
    pub slot: u64,
    pub chunk_id: i64,
    pub version: i64,
    /// Replica order as reported by the metadata server
    pub servers: Vec<ServerLocation>,
}

impl ChunkSlot {
    pub fn handle(&self) -> ChunkHandle {
        ChunkHandle {
            chunk_id: self.chunk_id,
            version: self.version,
        }
    }
}

/// File create request
///
/// `user` and `group` are wire values, `USER_NONE` / `GROUP_NONE` meaning
/// "unset".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub path: String,
    pub exclusive: bool,
    pub layout: StripeLayout,
    pub mode: u32,
    pub user: u32,
    pub group: u32,
}

/// Directory create request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkdirRequest {
    pub path: String,
    pub mode: u32,
    pub user: u32,
    pub group: u32,
}

/// Token material returned by the metadata server for create and renew
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenReply {
    pub token: Vec<u8>,
    pub key: Vec<u8>,
    pub delegation_allowed: bool,
    pub issued_time: u64,
    pub token_valid_for_sec: u64,
    pub delegation_valid_for_sec: u64,
}

impl From<TokenReply> for DelegationToken {
    fn from(reply: TokenReply) -> Self {
        DelegationToken {
            token: reply.token,
            key: reply.key,
            delegation_allowed: reply.delegation_allowed,
            issued_time: reply.issued_time,
            token_valid_for_sec: reply.token_valid_for_sec,
            delegation_valid_for_sec: reply.delegation_valid_for_sec,
        }
    }
}

/// Request/response interface to the metadata service
///
/// Paths handed to this trait are already normalized and absolute.
#[async_trait]
pub trait MetaServerClient: Send + Sync {
    /// Address the client was constructed with
    fn location(&self) -> &ServerLocation;

    async fn lookup(&self, path: &str) -> RpcResult<FileAttr>;

    /// Create (or truncate, when not exclusive) a regular file
    async fn create(&self, request: CreateRequest) -> RpcResult<FileAttr>;

    async fn mkdir(&self, request: MkdirRequest) -> RpcResult<FileAttr>;

    async fn remove(&self, path: &str) -> RpcResult<()>;

    async fn rmdir(&self, path: &str) -> RpcResult<()>;

    async fn rename(&self, src: &str, dst: &str, overwrite: bool) -> RpcResult<()>;

    /// Entry names, excluding `.` and `..`
    async fn readdir(&self, path: &str) -> RpcResult<Vec<String>>;

    async fn readdirplus(&self, path: &str) -> RpcResult<Vec<FileAttr>>;

    /// Set the size of a file, dropping chunks past the new end
    async fn truncate(&self, file_id: i64, size: u64) -> RpcResult<()>;

    /// Record that bytes up to `size` have been written (never shrinks)
    async fn extend_size(&self, file_id: i64, size: u64) -> RpcResult<()>;

    /// Allocated slots in `[first_slot, first_slot + count)`, unallocated
    /// slots are simply absent from the reply
    async fn get_chunk_slots(
        &self,
        file_id: i64,
        first_slot: u64,
        count: u64,
    ) -> RpcResult<Vec<ChunkSlot>>;

    /// Allocate the chunk for `slot` (idempotent)
    async fn allocate_chunk(&self, file_id: i64, slot: u64) -> RpcResult<ChunkSlot>;

    /// `user` is the wire value of the requesting identity
    async fn create_delegation_token(
        &self,
        user: u32,
        allow_delegation: bool,
        valid_for_sec: u64,
    ) -> RpcResult<TokenReply>;

    async fn renew_delegation_token(&self, token: &[u8], key: &[u8]) -> RpcResult<TokenReply>;

    async fn cancel_delegation_token(&self, token: &[u8], key: &[u8]) -> RpcResult<()>;
}

/// Byte-range interface to one chunk server
#[async_trait]
pub trait ChunkServerClient: Send + Sync {
    fn location(&self) -> &ServerLocation;

    /// Read up to `len` bytes at `offset` of the chunk
    ///
    /// The reply is shorter than `len` when the chunk holds fewer bytes; the
    /// caller treats the missing tail as a hole.
    async fn read(&self, chunk: ChunkHandle, offset: u64, len: usize) -> RpcResult<Bytes>;

    /// Write `data` at `offset`, returning the bytes accepted
    async fn write(&self, chunk: ChunkHandle, offset: u64, data: Bytes) -> RpcResult<usize>;

    /// Make every accepted write to the chunk durable
    async fn sync(&self, chunk: ChunkHandle) -> RpcResult<()>;
}

/// Opens chunk server clients for the connection pool
#[async_trait]
pub trait ChunkServerConnector: Send + Sync {
    async fn connect(&self, location: &ServerLocation) -> RpcResult<Arc<dyn ChunkServerClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_location_display() {
        let loc = ServerLocation::new("chunk7", 22000);
        assert_eq!(loc.to_string(), "chunk7:22000");
        assert!(loc.is_valid());
        assert!(!ServerLocation::new("", 1).is_valid());
    }

    #[test]
    fn test_chunk_slot_handle() {
        let slot = ChunkSlot {
            slot: 3,
            chunk_id: 42,
            version: 7,
            servers: vec![],
        };
        assert_eq!(
            slot.handle(),
            ChunkHandle {
                chunk_id: 42,
                version: 7
            }
        );
    }
}
