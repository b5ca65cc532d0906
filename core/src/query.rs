use std::path::Path;

use anyhow::{Context, Result};
use shakmaty::{Chess, Position};

use crate::chess::{open_pgn, position_from_fen, position_hash};
use crate::index::InvertedIndex;
use crate::stats::grouped;

/// Point-query result after one half-move of a traced game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceStep {
    pub fullmove: u32,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct TracedGame {
    pub description: String,
    pub steps: Vec<TraceStep>,
}

/// Answers queries from whichever index was loaded.
pub struct QueryEngine {
    index: InvertedIndex,
}

impl QueryEngine {
    pub fn new(index: InvertedIndex) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &InvertedIndex {
        &self.index
    }

    pub fn indexed_games(&self) -> usize {
        self.index.game_count()
    }

    pub fn count_position(&self, pos: &Chess) -> usize {
        self.index.count(position_hash(pos))
    }

    /// Number of indexed games reaching the FEN's position; 0 for bad input.
    pub fn query_fen(&self, fen: &str) -> usize {
        match position_from_fen(fen) {
            Ok(pos) => self.count_position(&pos),
            Err(e) => {
                tracing::error!(fen, "{e}");
                0
            }
        }
    }

    /// Replays every game of a PGN file, querying after each half-move.
    pub fn trace_file(&self, path: &Path) -> Result<Vec<TracedGame>> {
        let games = open_pgn(path).with_context(|| format!("opening {}", path.display()))?;
        let mut traced = Vec::new();
        for (n, game) in games.enumerate() {
            let mut game = match game {
                Ok(game) => game,
                Err(e) => {
                    tracing::warn!(file = %path.display(), games = n, "stopped reading: {e}");
                    break;
                }
            };
            game.id = format!("game {}", grouped(n as u64 + 1));
            if let Some(e) = &game.parse_error {
                tracing::warn!(game = %game.id, "trace stops early: {e}");
            }

            let mut board = game.start.clone();
            let mut steps = Vec::with_capacity(game.moves.len());
            for m in &game.moves {
                board.play_unchecked(m);
                steps.push(TraceStep { fullmove: board.fullmoves().get(), count: self.count_position(&board) });
            }
            traced.push(TracedGame { description: game.short_description(), steps });
        }
        Ok(traced)
    }
}
