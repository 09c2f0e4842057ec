//! Metadata operations
//!
//! Thin wrappers around [`MetaServerClient`] calls. Every path is normalized
//! before it leaves the client, every failure keeps the server's status
//! code, and every mutation drops the cached chunk locations it affects.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::data::layout::{CreateParams, LayoutPlanner, StripeLayout};
use crate::error::{AccessError, AccessResult};
use crate::locate::ChunkLocationResolver;
use crate::metadata::path;
use crate::metadata::types::{DirEntry, DirEntryPlus, FileAttr, GroupId, UserId};
use crate::rpc::{CreateRequest, MetaServerClient, MkdirRequest};
use crate::stats::{ClientStats, Counter};

/// Identity stamped on create and mkdir requests
#[derive(Debug, Default)]
pub struct EffectiveIdentity {
    inner: RwLock<(Option<UserId>, Option<GroupId>)>,
}

impl EffectiveIdentity {
    pub fn set(&self, user: Option<UserId>, group: Option<GroupId>) {
        *self.inner.write() = (user, group);
    }

    pub fn user(&self) -> Option<UserId> {
        self.inner.read().0
    }

    pub fn group(&self) -> Option<GroupId> {
        self.inner.read().1
    }

    fn wire(&self) -> (u32, u32) {
        let (user, group) = *self.inner.read();
        (UserId::to_wire(user), GroupId::to_wire(group))
    }
}

pub struct MetadataOps {
    meta: Arc<dyn MetaServerClient>,
    resolver: Arc<ChunkLocationResolver>,
    identity: Arc<EffectiveIdentity>,
    stats: Arc<ClientStats>,
}

/// Listing results for a missing path or a file are "absent", not errors
fn absent_if_missing<T>(result: AccessResult<T>) -> AccessResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(AccessError::NotFound(_)) | Err(AccessError::NotADirectory(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

impl MetadataOps {
    pub fn new(
        meta: Arc<dyn MetaServerClient>,
        resolver: Arc<ChunkLocationResolver>,
        identity: Arc<EffectiveIdentity>,
        stats: Arc<ClientStats>,
    ) -> Self {
        Self {
            meta,
            resolver,
            identity,
            stats,
        }
    }

    pub fn identity(&self) -> &Arc<EffectiveIdentity> {
        &self.identity
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn stat(&self, path: &str) -> AccessResult<FileAttr> {
        let path = path::normalize(path)?;
        self.stats.incr(Counter::MetaOps);
        self.meta
            .lookup(&path)
            .await
            .map_err(|e| AccessError::from_rpc(e, &path))
    }

    pub async fn exists(&self, path: &str) -> AccessResult<bool> {
        Ok(absent_if_missing(self.stat(path).await)?.is_some())
    }

    pub async fn is_directory(&self, path: &str) -> AccessResult<bool> {
        Ok(absent_if_missing(self.stat(path).await)?.is_some_and(|a| a.is_directory))
    }

    pub async fn is_file(&self, path: &str) -> AccessResult<bool> {
        Ok(absent_if_missing(self.stat(path).await)?.is_some_and(|a| a.is_file()))
    }

    pub async fn filesize(&self, path: &str) -> AccessResult<u64> {
        let attr = self.stat(path).await?;
        if attr.is_directory {
            return Err(AccessError::NotAFile(path::normalize(path)?));
        }
        Ok(attr.filesize)
    }

    pub async fn get_modification_time(&self, path: &str) -> AccessResult<DateTime<Utc>> {
        Ok(self.stat(path).await?.mtime())
    }

    /// Create a regular file from unvalidated layout parameters
    ///
    /// Invalid parameters fail with [`AccessError::InvalidLayout`] before
    /// anything is sent.
    pub async fn create(
        &self,
        path: &str,
        params: &CreateParams,
        exclusive: bool,
        mode: u32,
    ) -> AccessResult<FileAttr> {
        let layout = LayoutPlanner::plan(params)?;
        self.create_with_layout(path, layout, exclusive, mode).await
    }

    /// Create a regular file with a planned layout
    ///
    /// A non-exclusive create of an existing file replaces it.
    #[tracing::instrument(level = "debug", skip(self, layout))]
    pub async fn create_with_layout(
        &self,
        path: &str,
        layout: StripeLayout,
        exclusive: bool,
        mode: u32,
    ) -> AccessResult<FileAttr> {
        let path = path::normalize(path)?;
        if path == path::ROOT {
            return Err(AccessError::NotAFile(path));
        }
        let (user, group) = self.identity.wire();

        self.stats.incr(Counter::MetaOps);
        let attr = self
            .meta
            .create(CreateRequest {
                path: path.clone(),
                exclusive,
                layout,
                mode,
                user,
                group,
            })
            .await
            .map_err(|e| AccessError::from_rpc(e, &path))?;
        self.resolver.invalidate(&path);
        Ok(attr)
    }

    /// Create one directory; the parent must exist
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn mkdir(&self, path: &str, mode: u32) -> AccessResult<FileAttr> {
        let path = path::normalize(path)?;
        let (user, group) = self.identity.wire();

        self.stats.incr(Counter::MetaOps);
        self.meta
            .mkdir(MkdirRequest {
                path: path.clone(),
                mode,
                user,
                group,
            })
            .await
            .map_err(|e| AccessError::from_rpc(e, &path))
    }

    /// Rename `src` to `dst`
    ///
    /// With `overwrite == false` an existing `dst` fails the call with
    /// [`AccessError::AlreadyExists`] and neither path changes.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn rename(&self, src: &str, dst: &str, overwrite: bool) -> AccessResult<()> {
        let src = path::normalize(src)?;
        let dst = path::normalize(dst)?;

        self.stats.incr(Counter::MetaOps);
        let result = self
            .meta
            .rename(&src, &dst, overwrite)
            .await
            .map_err(|e| AccessError::from_rpc(e, &src));

        // Even a failed rename may have raced with another client
        self.resolver.invalidate_tree(&src);
        self.resolver.invalidate_tree(&dst);
        result
    }

    /// Remove a file
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn remove(&self, path: &str) -> AccessResult<()> {
        let path = path::normalize(path)?;
        self.stats.incr(Counter::MetaOps);
        let result = self
            .meta
            .remove(&path)
            .await
            .map_err(|e| AccessError::from_rpc(e, &path));
        self.resolver.invalidate(&path);
        result
    }

    /// Remove an empty directory
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn rmdir(&self, path: &str) -> AccessResult<()> {
        let path = path::normalize(path)?;
        self.stats.incr(Counter::MetaOps);
        let result = self
            .meta
            .rmdir(&path)
            .await
            .map_err(|e| AccessError::from_rpc(e, &path));
        self.resolver.invalidate_tree(&path);
        result
    }

    /// Entry names of a directory, `None` if it does not exist or is a file
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn readdir(&self, path: &str) -> AccessResult<Option<Vec<DirEntry>>> {
        let path = path::normalize(path)?;
        self.stats.incr(Counter::MetaOps);
        let names = self
            .meta
            .readdir(&path)
            .await
            .map_err(|e| AccessError::from_rpc(e, &path));
        Ok(absent_if_missing(names)?
            .map(|names| names.into_iter().map(|name| DirEntry { name }).collect()))
    }

    /// Entries with attributes, `None` if the directory does not exist or is
    /// a file
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn readdirplus(&self, path: &str) -> AccessResult<Option<Vec<DirEntryPlus>>> {
        let path = path::normalize(path)?;
        self.stats.incr(Counter::MetaOps);
        let attrs = self
            .meta
            .readdirplus(&path)
            .await
            .map_err(|e| AccessError::from_rpc(e, &path));
        Ok(absent_if_missing(attrs)?.map(|attrs| attrs.into_iter().map(DirEntryPlus::from).collect()))
    }

    /// Set the size of a file
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn truncate(&self, path: &str, size: u64) -> AccessResult<()> {
        let attr = self.stat(path).await?;
        let path = path::normalize(path)?;
        if attr.is_directory {
            return Err(AccessError::NotAFile(path));
        }

        self.stats.incr(Counter::MetaOps);
        let result = self
            .meta
            .truncate(attr.file_id, size)
            .await
            .map_err(|e| AccessError::from_rpc(e, &path));
        self.resolver.invalidate(&path);
        result
    }
}
