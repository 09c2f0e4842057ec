use crate::rpc::ServerLocation;

/// チャンク配置戦略
///
/// ファイルのチャンクスロットをどのチャンクサーバに配置するかを決定する戦略
pub trait PlacementStrategy: Send + Sync {
    /// 複数のサーバを取得 (レプリケーション用)
    ///
    /// # Arguments
    /// * `file_id` - ファイルID
    /// * `slot` - チャンクスロット番号
    /// * `count` - 取得するサーバ数
    ///
    /// # Returns
    /// 配置先のサーバリスト (重複なし、最大でサーバ数まで)
    fn place_chunk_replicas(&self, file_id: i64, slot: u64, count: usize) -> Vec<ServerLocation>;
}

/// ラウンドロビン配置戦略
///
/// スロットを順番にサーバに配置する。開始位置はファイルIDでずらす
pub struct RoundRobinPlacement {
    /// サーバリスト
    servers: Vec<ServerLocation>,
}

impl RoundRobinPlacement {
    /// 新しいラウンドロビン配置戦略を作成
    pub fn new(servers: Vec<ServerLocation>) -> Self {
        Self { servers }
    }

    /// サーバ数を取得
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }
}

impl PlacementStrategy for RoundRobinPlacement {
    fn place_chunk_replicas(&self, file_id: i64, slot: u64, count: usize) -> Vec<ServerLocation> {
        if self.servers.is_empty() {
            return Vec::new();
        }

        let n = self.servers.len();
        let start_index = (file_id.unsigned_abs().wrapping_add(slot) % n as u64) as usize;

        (0..count.min(n))
            .map(|i| self.servers[(start_index + i) % n].clone())
            .collect()
    }
}
