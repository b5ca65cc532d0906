pub mod chess;
pub mod codec;
pub mod config;
pub mod error;
pub mod forward;
pub mod index;
pub mod persist;
pub mod pipeline;
pub mod pool;
pub mod query;
pub mod repl;
pub mod stats;

/// Zobrist hash of a board state, stored as a signed 64-bit value on disk.
pub type PositionHash = i64;
/// 1-based game number assigned in forward database read order.
pub type GameOrdinal = i32;

pub use forward::{ForwardDbReader, ForwardDbWriter, ForwardRecord};
pub use index::InvertedIndex;
pub use query::QueryEngine;
