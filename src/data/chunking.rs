use std::ops::Range;

use crate::constants::CHUNK_SIZE;
use crate::data::layout::StripeLayout;

/// チャンク片
///
/// ファイル上の連続した範囲のうち、1つのチャンクの連続領域に収まる部分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPiece {
    /// チャンクスロット番号
    pub slot: u64,

    /// ストライプ番号 (レプリケーションのみのファイルでは None)
    pub stripe_index: Option<u32>,

    /// チャンク内オフセット (バイト)
    pub chunk_offset: u64,

    /// ファイル内オフセット (バイト)
    pub file_offset: u64,

    /// 長さ (バイト)
    pub len: u64,
}

impl ChunkPiece {
    /// ファイル上の終端オフセット
    pub fn file_end(&self) -> u64 {
        self.file_offset + self.len
    }
}

/// ストライプマッパー
///
/// ファイルオフセットを (チャンクスロット, チャンク内オフセット) に変換する。
/// ブロック `b` のストライプ `s`、行 `r` はスロット
/// `b * (num_stripes + num_recovery_stripes) + s`、チャンク内オフセット
/// `r * stripe_size + (pos % stripe_size)` に置かれる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeMapper {
    striped: bool,
    chunk_size: u64,
    stripe_size: u64,
    num_stripes: u64,
    num_recovery_stripes: u64,
}

impl StripeMapper {
    /// 新しいストライプマッパーを作成 (デフォルトチャンクサイズ)
    pub fn new(layout: &StripeLayout) -> Self {
        Self::with_chunk_size(layout, CHUNK_SIZE)
    }

    /// 指定されたチャンクサイズでストライプマッパーを作成
    pub fn with_chunk_size(layout: &StripeLayout, chunk_size: u64) -> Self {
        if layout.is_striped() {
            Self {
                striped: true,
                chunk_size,
                stripe_size: layout.stripe_size,
                num_stripes: layout.num_stripes as u64,
                num_recovery_stripes: layout.num_recovery_stripes as u64,
            }
        } else {
            Self {
                striped: false,
                chunk_size,
                stripe_size: chunk_size,
                num_stripes: 1,
                num_recovery_stripes: 0,
            }
        }
    }

    /// 1ブロックが保持するデータ量 (バイト)
    pub fn block_size(&self) -> u64 {
        self.chunk_size * self.num_stripes
    }

    /// 1ブロックあたりのスロット数 (リカバリストライプを含む)
    pub fn slots_per_block(&self) -> u64 {
        self.num_stripes + self.num_recovery_stripes
    }

    /// 指定されたオフセットを含むブロック番号
    pub fn block_index(&self, pos: u64) -> u64 {
        pos / self.block_size()
    }

    /// ブロックに属するスロット範囲
    pub fn block_slots(&self, block: u64) -> Range<u64> {
        let first = block * self.slots_per_block();
        first..first + self.slots_per_block()
    }

    /// 指定されたオフセットの位置を計算
    ///
    /// 返される片の長さは、同じチャンク領域が続く残りバイト数
    pub fn locate(&self, pos: u64) -> ChunkPiece {
        let block = pos / self.block_size();
        let pos_in_block = pos % self.block_size();
        let row = pos_in_block / (self.stripe_size * self.num_stripes);
        let stripe = (pos_in_block / self.stripe_size) % self.num_stripes;
        let within = pos % self.stripe_size;

        ChunkPiece {
            slot: block * self.slots_per_block() + stripe,
            stripe_index: self.striped.then_some(stripe as u32),
            chunk_offset: row * self.stripe_size + within,
            file_offset: pos,
            len: self.stripe_size - within,
        }
    }

    /// 範囲 (offset, length) をチャンク片に分割
    ///
    /// 片はファイル順に並ぶ
    pub fn map_range(&self, offset: u64, length: u64) -> Vec<ChunkPiece> {
        let end = offset.saturating_add(length);
        let mut pieces = Vec::new();
        let mut pos = offset;
        while pos < end {
            let mut piece = self.locate(pos);
            piece.len = piece.len.min(end - pos);
            pos += piece.len;
            pieces.push(piece);
        }
        pieces
    }

    /// 範囲 (offset, length) が触れるブロックの全スロット
    pub fn slot_range(&self, offset: u64, length: u64) -> Range<u64> {
        if length == 0 {
            let first = self.block_slots(self.block_index(offset)).start;
            return first..first;
        }
        let first = self.block_slots(self.block_index(offset)).start;
        let last = self.block_slots(self.block_index(offset.saturating_add(length - 1))).end;
        first..last
    }
}
