//! Error taxonomy for the access layer
//!
//! Every failure surfaced to a caller is an [`AccessError`]. Raw negative
//! statuses coming back from the metadata or chunk servers are converted with
//! [`AccessError::from_status`] / [`AccessError::from_status_at`]; the
//! originating code is always recoverable through [`AccessError::status`].

use thiserror::Error;

use crate::config::ConfigError;
use crate::rpc::RpcError;

/// Negative errno values used on the wire (Linux numbering)
pub mod errno {
    pub const SUCCESS: i32 = 0;
    pub const EPERM: i32 = -1;
    pub const ENOENT: i32 = -2;
    pub const EIO: i32 = -5;
    pub const EBADF: i32 = -9;
    pub const EAGAIN: i32 = -11;
    pub const EACCES: i32 = -13;
    pub const EEXIST: i32 = -17;
    pub const ENOTDIR: i32 = -20;
    pub const EISDIR: i32 = -21;
    pub const EINVAL: i32 = -22;
    pub const EFBIG: i32 = -27;
    pub const ENOSPC: i32 = -28;
    pub const ENAMETOOLONG: i32 = -36;
    pub const ENOTEMPTY: i32 = -39;
    pub const ETIMEDOUT: i32 = -110;
    pub const ECONNREFUSED: i32 = -111;
    pub const EHOSTUNREACH: i32 = -113;
    pub const EKEYEXPIRED: i32 = -127;
    pub const EKEYREVOKED: i32 = -128;
}

/// Access layer errors
#[derive(Debug, Error)]
pub enum AccessError {
    /// Layout parameters rejected before any RPC was made
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// Path, offset or option rejected before any RPC was made
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{}no such file or directory", at(.0))]
    NotFound(String),

    #[error("{}file exists", at(.0))]
    AlreadyExists(String),

    #[error("{}not a directory", at(.0))]
    NotADirectory(String),

    #[error("{}not a regular file", at(.0))]
    NotAFile(String),

    #[error("{}permission denied (status {code})", at(.path))]
    Auth { path: String, code: i32 },

    #[error("delegation token expired")]
    TokenExpired,

    /// Renders like an absent token; callers that care match on the variant
    #[error("delegation token not found")]
    TokenRevoked,

    #[error("channel is closed")]
    ClosedChannel,

    #[error("{}transport error: {reason}", at(.path))]
    Transport {
        path: String,
        reason: String,
        code: i32,
    },

    #[error("{}server error: status {code}", at(.path))]
    Server { path: String, code: i32 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type AccessResult<T> = Result<T, AccessError>;

fn at(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{}: ", path)
    }
}

impl AccessError {
    /// Convert a bare status code (no path context)
    pub fn from_status(code: i32) -> Self {
        Self::from_status_at(code, "")
    }

    /// Convert a status code returned for an operation on `path`
    pub fn from_status_at(code: i32, path: &str) -> Self {
        let path = path.to_string();
        match code {
            errno::ENOENT => AccessError::NotFound(path),
            errno::EEXIST => AccessError::AlreadyExists(path),
            errno::ENOTDIR => AccessError::NotADirectory(path),
            errno::EISDIR => AccessError::NotAFile(path),
            errno::EPERM | errno::EACCES => AccessError::Auth { path, code },
            errno::EKEYEXPIRED => AccessError::TokenExpired,
            errno::EKEYREVOKED => AccessError::TokenRevoked,
            errno::ETIMEDOUT | errno::EHOSTUNREACH | errno::ECONNREFUSED => {
                AccessError::Transport {
                    path,
                    reason: format!("status {}", code),
                    code,
                }
            }
            _ => AccessError::Server { path, code },
        }
    }

    /// Convert an RPC collaborator failure for an operation on `path`
    pub fn from_rpc(err: RpcError, path: &str) -> Self {
        match err {
            RpcError::Status(code) => Self::from_status_at(code, path),
            RpcError::Transport(reason) => AccessError::Transport {
                path: path.to_string(),
                reason,
                code: errno::EIO,
            },
            RpcError::Timeout => AccessError::Transport {
                path: path.to_string(),
                reason: "request timed out".to_string(),
                code: errno::ETIMEDOUT,
            },
            RpcError::InvalidReply(msg) => {
                tracing::debug!("{}: invalid reply from server: {}", path, msg);
                AccessError::Server {
                    path: path.to_string(),
                    code: errno::EIO,
                }
            }
        }
    }

    /// The negative status this error corresponds to
    pub fn status(&self) -> i32 {
        match self {
            AccessError::InvalidLayout(_) | AccessError::InvalidArgument(_) => errno::EINVAL,
            AccessError::NotFound(_) => errno::ENOENT,
            AccessError::AlreadyExists(_) => errno::EEXIST,
            AccessError::NotADirectory(_) => errno::ENOTDIR,
            AccessError::NotAFile(_) => errno::EISDIR,
            AccessError::Auth { code, .. } => *code,
            AccessError::TokenExpired => errno::EKEYEXPIRED,
            AccessError::TokenRevoked => errno::EKEYREVOKED,
            AccessError::ClosedChannel => errno::EBADF,
            AccessError::Transport { code, .. } => *code,
            AccessError::Server { code, .. } => *code,
            AccessError::Config(_) => errno::EINVAL,
        }
    }

    /// True for connectivity failures (the only case that yields short writes)
    pub fn is_transport(&self) -> bool {
        matches!(self, AccessError::Transport { .. })
    }

    /// True when the target path does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, AccessError::NotFound(_))
    }
}

/// Turn a C-style return value into a `Result`, mirroring how callers of the
/// status-returning calls want to bail out
pub fn check_status(code: i32, path: &str) -> AccessResult<()> {
    if code >= 0 {
        Ok(())
    } else {
        Err(AccessError::from_status_at(code, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_keeps_raw_code() {
        for code in [
            errno::ENOENT,
            errno::EEXIST,
            errno::ENOTDIR,
            errno::EISDIR,
            errno::EPERM,
            errno::EACCES,
            errno::ETIMEDOUT,
            errno::ENOTEMPTY,
            -1234,
        ] {
            assert_eq!(AccessError::from_status(code).status(), code);
            assert_eq!(AccessError::from_status_at(code, "/a/b").status(), code);
        }
    }

    #[test]
    fn test_path_qualified_message() {
        let err = AccessError::from_status_at(errno::ENOENT, "/jtest/foo.1");
        assert_eq!(err.to_string(), "/jtest/foo.1: no such file or directory");

        let err = AccessError::from_status(errno::ENOENT);
        assert_eq!(err.to_string(), "no such file or directory");

        let err = AccessError::from_status_at(-1234, "/x");
        assert!(matches!(err, AccessError::Server { code: -1234, .. }));
        assert!(err.to_string().contains("-1234"));
    }

    #[test]
    fn test_revoked_token_reads_as_absent() {
        let revoked = AccessError::TokenRevoked;
        assert!(revoked.to_string().contains("not found"));
        assert!(!revoked.is_not_found());
        assert_eq!(revoked.status(), errno::EKEYREVOKED);
    }

    #[test]
    fn test_rpc_conversion() {
        let err = AccessError::from_rpc(RpcError::Timeout, "/f");
        assert!(err.is_transport());
        assert_eq!(err.status(), errno::ETIMEDOUT);

        let err = AccessError::from_rpc(RpcError::Status(errno::EEXIST), "/f");
        assert!(matches!(err, AccessError::AlreadyExists(ref p) if p == "/f"));
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(0, "/a").is_ok());
        assert!(check_status(7, "/a").is_ok());
        assert!(matches!(
            check_status(errno::ENOTDIR, "/a"),
            Err(AccessError::NotADirectory(_))
        ));
    }
}
