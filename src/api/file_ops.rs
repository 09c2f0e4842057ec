/// Access client
///
/// Namespace calls, location queries, delegation tokens and channel
/// construction, all scoped to one client instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::api::types::CreateOptions;
use crate::cache::CachePolicy;
use crate::config::ClientConfig;
use crate::data::layout::{CreateParams, LayoutPlanner};
use crate::delegation::{DelegationToken, DelegationTokenManager};
use crate::error::{AccessError, AccessResult};
use crate::io::data_path::ChunkIo;
use crate::io::{InputChannel, OutputChannel};
use crate::locate::ChunkLocationResolver;
use crate::logging;
use crate::metadata::path;
use crate::metadata::{
    DirEntry, DirEntryPlus, DirectoryTree, EffectiveIdentity, FileAttr, GroupId, MetadataOps,
    UserId,
};
use crate::rpc::{ChunkServerConnector, ConnectionPool, MetaServerClient};
use crate::stats::ClientStats;

/// Default mode for directories created through the client
const DEFAULT_DIR_MODE: u32 = 0o777;

/// Client of one metadata server
///
/// Owns a chunk-server connection pool, a location cache and a set of
/// counters. There is no shared default instance; drop the client (or call
/// [`shutdown`](Self::shutdown)) to release its connections.
pub struct QfsClient {
    config: ClientConfig,
    meta: Arc<dyn MetaServerClient>,
    pool: Arc<ConnectionPool>,
    resolver: Arc<ChunkLocationResolver>,
    ops: Arc<MetadataOps>,
    tree: DirectoryTree,
    tokens: DelegationTokenManager,
    io: Arc<ChunkIo>,
    stats: Arc<ClientStats>,
    default_params: CreateParams,
}

impl QfsClient {
    /// Build a client over the given RPC collaborators
    pub fn new(
        config: ClientConfig,
        meta: Arc<dyn MetaServerClient>,
        connector: Arc<dyn ChunkServerConnector>,
    ) -> AccessResult<Self> {
        config.validate()?;
        let default_params: CreateParams = config.io.default_create_params.parse()?;

        let stats = Arc::new(ClientStats::new(config.enable_stats));
        let pool = Arc::new(ConnectionPool::new(connector));
        let resolver = Arc::new(ChunkLocationResolver::new(
            meta.clone(),
            CachePolicy::from_config(&config.cache),
            stats.clone(),
        ));
        let ops = Arc::new(MetadataOps::new(
            meta.clone(),
            resolver.clone(),
            Arc::new(EffectiveIdentity::default()),
            stats.clone(),
        ));
        let io = Arc::new(ChunkIo::new(
            resolver.clone(),
            pool.clone(),
            stats.clone(),
            config.io.max_concurrent_chunk_rpcs,
        ));

        tracing::info!(
            "access client for {} (write buffer {}, read-ahead {})",
            config.meta_server,
            config.io.write_buffer_size,
            config.io.read_ahead_size
        );

        Ok(Self {
            tree: DirectoryTree::new(ops.clone()),
            tokens: DelegationTokenManager::new(meta.clone(), stats.clone()),
            config,
            meta,
            pool,
            resolver,
            ops,
            io,
            stats,
            default_params,
        })
    }

    /// [`new`](Self::new), after installing the hostname-prefixed log
    /// subscriber at the configured `log_level`
    ///
    /// A subscriber that is already installed is kept.
    pub fn with_logging(
        config: ClientConfig,
        meta: Arc<dyn MetaServerClient>,
        connector: Arc<dyn ChunkServerConnector>,
    ) -> AccessResult<Self> {
        config.validate()?;
        logging::init_with_hostname(&config.log_level);
        Self::new(config, meta, connector)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Metadata operations of this client
    pub fn metadata(&self) -> &MetadataOps {
        &self.ops
    }

    /// Recursive directory operations of this client
    pub fn tree(&self) -> &DirectoryTree {
        &self.tree
    }

    pub fn resolver(&self) -> &ChunkLocationResolver {
        &self.resolver
    }

    /// Identity stamped on later create and mkdir requests
    pub fn set_effective_identity(&self, user: Option<UserId>, group: Option<GroupId>) {
        tracing::debug!("effective identity set to {:?}/{:?}", user, group);
        self.ops.identity().set(user, group);
    }

    // ----- namespace -----

    pub async fn stat(&self, path: &str) -> AccessResult<FileAttr> {
        self.ops.stat(path).await
    }

    pub async fn exists(&self, path: &str) -> AccessResult<bool> {
        self.ops.exists(path).await
    }

    pub async fn is_directory(&self, path: &str) -> AccessResult<bool> {
        self.ops.is_directory(path).await
    }

    pub async fn is_file(&self, path: &str) -> AccessResult<bool> {
        self.ops.is_file(path).await
    }

    pub async fn filesize(&self, path: &str) -> AccessResult<u64> {
        self.ops.filesize(path).await
    }

    pub async fn get_modification_time(&self, path: &str) -> AccessResult<DateTime<Utc>> {
        self.ops.get_modification_time(path).await
    }

    pub async fn mkdir(&self, path: &str) -> AccessResult<()> {
        self.ops.mkdir(path, DEFAULT_DIR_MODE).await.map(|_| ())
    }

    pub async fn mkdir_with_mode(&self, path: &str, mode: u32) -> AccessResult<()> {
        self.ops.mkdir(path, mode).await.map(|_| ())
    }

    pub async fn mkdirs(&self, path: &str) -> AccessResult<()> {
        self.tree.mkdirs(path, DEFAULT_DIR_MODE).await
    }

    pub async fn rmdir(&self, path: &str) -> AccessResult<()> {
        self.ops.rmdir(path).await
    }

    pub async fn rmdirs(&self, path: &str) -> AccessResult<()> {
        self.tree.rmdirs(path).await
    }

    pub async fn remove(&self, path: &str) -> AccessResult<()> {
        self.ops.remove(path).await
    }

    pub async fn rename(&self, src: &str, dst: &str, overwrite: bool) -> AccessResult<()> {
        self.ops.rename(src, dst, overwrite).await
    }

    /// Rename with `mv` semantics, returning the final path
    pub async fn move_path(&self, src: &str, dst: &str) -> AccessResult<String> {
        self.tree.move_path(src, dst).await
    }

    pub async fn readdir(&self, path: &str) -> AccessResult<Option<Vec<DirEntry>>> {
        self.ops.readdir(path).await
    }

    pub async fn readdirplus(&self, path: &str) -> AccessResult<Option<Vec<DirEntryPlus>>> {
        self.ops.readdirplus(path).await
    }

    pub async fn truncate(&self, path: &str, size: u64) -> AccessResult<()> {
        self.ops.truncate(path, size).await
    }

    // ----- channels -----

    /// Create (or replace) `path` with the client's default layout
    pub async fn create(&self, path: &str) -> AccessResult<OutputChannel> {
        self.create_with_options(path, CreateOptions::new(self.default_params))
            .await
    }

    /// Create `path` from a compact parameter string; `""` means the client
    /// default
    pub async fn create_with_params(&self, path: &str, params: &str) -> AccessResult<OutputChannel> {
        let params = if params.trim().is_empty() {
            self.default_params
        } else {
            params.parse()?
        };
        self.create_with_options(path, CreateOptions::new(params))
            .await
    }

    #[tracing::instrument(skip(self, opts))]
    pub async fn create_with_options(
        &self,
        path: &str,
        opts: CreateOptions,
    ) -> AccessResult<OutputChannel> {
        let layout = LayoutPlanner::plan_with(&opts.params, opts.force_type)?;
        let path = path::normalize(path)?;
        let attr = self
            .ops
            .create_with_layout(&path, layout, opts.exclusive, opts.mode)
            .await?;
        Ok(self.output_channel(path, attr, 0, opts.write_buffer_size))
    }

    /// Output channel positioned at the end of an existing file
    #[tracing::instrument(skip(self))]
    pub async fn append(&self, path: &str) -> AccessResult<OutputChannel> {
        let path = path::normalize(path)?;
        let attr = self.ops.stat(&path).await?;
        if attr.is_directory {
            return Err(AccessError::NotAFile(path));
        }
        let start = attr.filesize;
        Ok(self.output_channel(path, attr, start, None))
    }

    fn output_channel(
        &self,
        path: String,
        attr: FileAttr,
        start: u64,
        buffer_size: Option<usize>,
    ) -> OutputChannel {
        OutputChannel::new(
            path,
            attr,
            start,
            buffer_size.unwrap_or(self.config.io.write_buffer_size),
            self.io.clone(),
            self.meta.clone(),
            self.stats.clone(),
        )
    }

    /// Input channel with the client's default read-ahead
    pub async fn open(&self, path: &str) -> AccessResult<InputChannel> {
        self.open_with_read_ahead(path, None).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn open_with_read_ahead(
        &self,
        path: &str,
        read_ahead: Option<usize>,
    ) -> AccessResult<InputChannel> {
        let path = path::normalize(path)?;
        let attr = self.ops.stat(&path).await?;
        if attr.is_directory {
            return Err(AccessError::NotAFile(path));
        }
        Ok(InputChannel::new(
            path,
            attr,
            read_ahead.unwrap_or(self.config.io.read_ahead_size),
            self.io.clone(),
            self.stats.clone(),
        ))
    }

    // ----- locations -----

    /// Replicas of every chunk overlapping `[start, start + len)`, one row
    /// of `host:port` strings per chunk
    #[tracing::instrument(skip(self))]
    pub async fn get_data_location(
        &self,
        path: &str,
        start: u64,
        len: u64,
    ) -> AccessResult<Vec<Vec<String>>> {
        Ok(self
            .resolver
            .resolve(path, start, len)
            .await?
            .iter()
            .map(|location| location.server_names())
            .collect())
    }

    /// Block size in hex as row 0, then one row per slot of every block
    /// overlapping the range
    #[tracing::instrument(skip(self))]
    pub async fn get_blocks_location(
        &self,
        path: &str,
        start: u64,
        len: u64,
    ) -> AccessResult<Vec<Vec<String>>> {
        let (block_size, rows) = self.resolver.resolve_blocks(path, start, len).await?;
        let mut out = Vec::with_capacity(rows.len() + 1);
        out.push(vec![format!("{:x}", block_size)]);
        out.extend(rows.iter().map(|location| location.server_names()));
        Ok(out)
    }

    pub fn clear_location_cache(&self) {
        self.resolver.clear_cache();
    }

    // ----- delegation -----

    /// Token for the effective user
    pub async fn create_delegation_token(
        &self,
        allow_delegation: bool,
        valid_for_sec: u64,
    ) -> AccessResult<DelegationToken> {
        self.tokens
            .create(self.ops.identity().user(), allow_delegation, valid_for_sec)
            .await
    }

    /// Renewed copy of `token`; the caller replaces its own value with it
    pub async fn renew_delegation_token(
        &self,
        token: &DelegationToken,
    ) -> AccessResult<DelegationToken> {
        self.tokens.renew(token).await
    }

    pub async fn cancel_delegation_token(&self, token: &DelegationToken) -> AccessResult<()> {
        self.tokens.cancel(token).await
    }

    // ----- housekeeping -----

    /// Counter snapshot, all values as decimal strings
    pub fn get_stats(&self) -> BTreeMap<String, String> {
        let mut stats = self.stats.snapshot();
        stats.insert(
            "chunk_connections".to_string(),
            self.pool.connection_count().to_string(),
        );
        stats.insert(
            "cached_location_paths".to_string(),
            self.resolver.cached_paths().to_string(),
        );
        stats
    }

    pub fn set_stats_enabled(&self, enabled: bool) {
        self.stats.set_enabled(enabled);
    }

    /// Drop every chunk-server connection and cached location
    pub fn shutdown(&self) {
        tracing::info!(
            "shutting down access client for {} ({} chunk connections)",
            self.meta.location(),
            self.pool.connection_count()
        );
        self.pool.close_all();
        self.resolver.clear_cache();
    }
}

impl Drop for QfsClient {
    fn drop(&mut self) {
        self.pool.close_all();
    }
}
