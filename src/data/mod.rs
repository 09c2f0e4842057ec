// データレイアウトモジュール
pub mod chunking;
pub mod layout;
pub mod placement;

pub use chunking::{ChunkPiece, StripeMapper};
pub use layout::{CreateParams, LayoutPlanner, StorageTierRange, StripeLayout, StriperType};
pub use placement::{PlacementStrategy, RoundRobinPlacement};
