//! Recursive directory operations
//!
//! Built from single-entry [`MetadataOps`] calls. None of them is atomic:
//! a failed `mkdirs` may leave some ancestors behind, and `rmdirs` treats
//! entries that vanish underneath it as already removed.

use std::sync::Arc;

use crate::error::{AccessError, AccessResult};
use crate::metadata::ops::MetadataOps;
use crate::metadata::path;

pub struct DirectoryTree {
    ops: Arc<MetadataOps>,
}

/// Work item of the post-order walk in [`DirectoryTree::rmdirs`]
enum Visit {
    Enter(String),
    Leave(String),
}

impl DirectoryTree {
    pub fn new(ops: Arc<MetadataOps>) -> Self {
        Self { ops }
    }

    /// Create `path` and every missing ancestor
    ///
    /// Succeeds without changes when `path` already is a directory.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn mkdirs(&self, path: &str, mode: u32) -> AccessResult<()> {
        let path = path::normalize(path)?;

        for dir in path::prefixes(&path) {
            match self.ops.stat(&dir).await {
                Ok(attr) if attr.is_directory => continue,
                Ok(_) => return Err(AccessError::NotADirectory(dir)),
                Err(AccessError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }

            match self.ops.mkdir(&dir, mode).await {
                Ok(_) => tracing::debug!("mkdirs: created {}", dir),
                // Lost a race with another creator; fine if it made a directory
                Err(AccessError::AlreadyExists(_)) => {
                    if !self.ops.stat(&dir).await?.is_directory {
                        return Err(AccessError::NotADirectory(dir));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Remove `path` with everything below it
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn rmdirs(&self, path: &str) -> AccessResult<()> {
        let path = path::normalize(path)?;
        if path == path::ROOT {
            return Err(AccessError::InvalidArgument(
                "refusing to remove the root directory".to_string(),
            ));
        }
        if !self.ops.stat(&path).await?.is_directory {
            return Err(AccessError::NotADirectory(path));
        }

        let mut stack = vec![Visit::Enter(path)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(dir) => {
                    let Some(entries) = self.ops.readdirplus(&dir).await? else {
                        tracing::warn!("rmdirs: {} vanished before listing", dir);
                        continue;
                    };
                    stack.push(Visit::Leave(dir.clone()));

                    for entry in entries {
                        let child = path::join(&dir, &entry.name);
                        if entry.attr.is_directory {
                            stack.push(Visit::Enter(child));
                            continue;
                        }
                        match self.ops.remove(&child).await {
                            Ok(()) => {}
                            Err(AccessError::NotFound(_)) => {
                                tracing::warn!("rmdirs: {} already removed", child);
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
                Visit::Leave(dir) => match self.ops.rmdir(&dir).await {
                    Ok(()) => tracing::debug!("rmdirs: removed {}", dir),
                    Err(AccessError::NotFound(_)) => {
                        tracing::warn!("rmdirs: {} already removed", dir);
                    }
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(())
    }

    /// Rename with `mv` semantics
    ///
    /// When `dst` is an existing directory the source moves into it under
    /// its own name. An existing file at the final target is replaced.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn move_path(&self, src: &str, dst: &str) -> AccessResult<String> {
        let src = path::normalize(src)?;
        let dst = path::normalize(dst)?;

        let target = if self.ops.is_directory(&dst).await? && dst != src {
            path::join(&dst, path::basename(&src))
        } else {
            dst
        };
        if target != src && path::is_within(&target, &src) {
            return Err(AccessError::InvalidArgument(format!(
                "cannot move {} into itself",
                src
            )));
        }

        self.ops.rename(&src, &target, true).await?;
        Ok(target)
    }
}
