// メタデータ操作モジュール
pub mod ops;
pub mod path;
pub mod tree;
pub mod types;

pub use ops::{EffectiveIdentity, MetadataOps};
pub use tree::DirectoryTree;
pub use types::{DirEntry, DirEntryPlus, FileAttr, FileId, GroupId, UserId};
