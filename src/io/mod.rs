//! Buffered channel I/O
//!
//! [`OutputChannel`] and [`InputChannel`] stream bytes between the caller
//! and the chunk servers. Both sit on the shared chunk data path, which maps
//! byte ranges onto chunk slots through the location resolver and talks to
//! replicas through the client's connection pool.

pub(crate) mod data_path;
pub mod input;
pub mod output;

pub use input::InputChannel;
pub use output::{OutputChannel, OutputState};
