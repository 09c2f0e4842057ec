use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{GROUP_NONE, USER_NONE};
use crate::data::layout::StripeLayout;

/// ファイルID (メタデータサーバが割り当てる)
pub type FileId = i64;

/// ユーザID
///
/// 「未設定」は `Option<UserId>` の `None` で表す。ワイヤ上では
/// `USER_NONE` (0xFFFFFFFF) になる
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u32);

impl UserId {
    /// ワイヤ値から変換 (`USER_NONE` は `None`)
    pub fn from_wire(value: u32) -> Option<Self> {
        (value != USER_NONE).then_some(UserId(value))
    }

    /// ワイヤ値へ変換
    pub fn to_wire(id: Option<Self>) -> u32 {
        id.map_or(USER_NONE, |u| u.0)
    }
}

/// グループID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

impl GroupId {
    /// ワイヤ値から変換 (`GROUP_NONE` は `None`)
    pub fn from_wire(value: u32) -> Option<Self> {
        (value != GROUP_NONE).then_some(GroupId(value))
    }

    /// ワイヤ値へ変換
    pub fn to_wire(id: Option<Self>) -> u32 {
        id.map_or(GROUP_NONE, |g| g.0)
    }
}

/// ファイル属性のスナップショット
///
/// stat / readdirplus が返す値。変更されることはなく、必要なら再取得する
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttr {
    /// エントリ名 (ルートは "/")
    pub name: String,

    pub is_directory: bool,

    /// ファイルサイズ (バイト、ディレクトリは 0)
    pub filesize: u64,

    /// 最終更新時刻 (エポックからのマイクロ秒)
    pub modification_time: i64,

    /// 属性変更時刻 (マイクロ秒)
    pub attr_change_time: i64,

    /// 作成時刻 (マイクロ秒)
    pub creation_time: i64,

    /// レイアウト (ディレクトリは既定値)
    pub layout: StripeLayout,

    pub owner: Option<UserId>,
    pub group: Option<GroupId>,

    /// 所有者名 (解決できなければ数値の文字列)
    pub owner_name: String,
    pub group_name: String,

    /// Unix mode (例: 0o644)
    pub mode: u32,

    pub file_id: FileId,

    /// 子ディレクトリ数 (ディレクトリのみ)
    pub dir_count: u64,

    /// 子ファイル数 (ディレクトリのみ)
    pub file_count: u64,

    /// 割り当て済みチャンク数
    pub chunk_count: u64,
}

impl FileAttr {
    pub fn is_file(&self) -> bool {
        !self.is_directory
    }

    /// 最終更新時刻
    pub fn mtime(&self) -> DateTime<Utc> {
        micros_to_datetime(self.modification_time)
    }

    /// 作成時刻
    pub fn ctime(&self) -> DateTime<Utc> {
        micros_to_datetime(self.creation_time)
    }

    /// 属性変更時刻
    pub fn attr_change(&self) -> DateTime<Utc> {
        micros_to_datetime(self.attr_change_time)
    }

    pub fn replication(&self) -> u32 {
        self.layout.replication
    }
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// ディレクトリエントリ (readdir)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
}

/// ディレクトリエントリと属性 (readdirplus)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryPlus {
    pub name: String,
    pub attr: FileAttr,
}

impl From<FileAttr> for DirEntryPlus {
    fn from(attr: FileAttr) -> Self {
        Self {
            name: attr.name.clone(),
            attr,
        }
    }
}
