//! Position -> games inversion of the forward database, and its on-disk
//! artifact:
//!
//! `{i32 games}{(i32 ordinal, string gameId)...}{i32 positions}{(i64 hash, i32 len, i32[len])...}`

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::codec;
use crate::forward::ForwardDbReader;
use crate::persist::{create_file, load_meta, save_meta, IndexMeta};
use crate::stats::grouped;
use crate::{GameOrdinal, PositionHash};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvertedIndex {
    games: BTreeMap<GameOrdinal, String>,
    /// Every list is non-empty and ascending.
    positions: HashMap<PositionHash, Vec<GameOrdinal>>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the next game and returns its ordinal.
    pub fn push_game(&mut self, game_id: String, positions: &[PositionHash]) -> GameOrdinal {
        let ordinal = self.games.keys().next_back().map_or(1, |last| last + 1);
        self.games.insert(ordinal, game_id);
        for &position in positions {
            let games = self.positions.entry(position).or_default();
            if games.last() != Some(&ordinal) {
                games.push(ordinal);
            }
        }
        ordinal
    }

    /// Inverts a whole forward database in one pass.
    pub fn from_forward_db(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "loading forward database");
        let reader = ForwardDbReader::open(path)?;
        let index = Self::from_records(reader)
            .with_context(|| format!("inverting {}", path.display()))?;
        tracing::info!(
            games = %grouped(index.game_count() as u64),
            positions = %grouped(index.position_count() as u64),
            "forward database loaded"
        );
        Ok(index)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Self::from_records(ForwardDbReader::new(reader))
    }

    fn from_records<R: Read>(records: ForwardDbReader<R>) -> Result<Self> {
        let mut index = Self::new();
        for record in records {
            let record = record?;
            index.push_game(record.game_id, &record.positions);
        }
        Ok(index)
    }

    /// Writes the artifact and its JSON sidecar.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(create_file(path)?);
        self.write_to(&mut w).with_context(|| format!("writing {}", path.display()))?;
        w.flush()?;
        save_meta(path, &IndexMeta::new(self.game_count(), self.position_count()))?;
        tracing::info!(
            path = %path.display(),
            games = %grouped(self.game_count() as u64),
            positions = %grouped(self.position_count() as u64),
            "index written"
        );
        Ok(())
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        codec::write_i32(w, count_i32(self.games.len())?)?;
        for (ordinal, game_id) in &self.games {
            codec::write_i32(w, *ordinal)?;
            codec::write_string(w, game_id)?;
        }
        codec::write_i32(w, count_i32(self.positions.len())?)?;
        for (position, games) in &self.positions {
            codec::write_i64(w, *position)?;
            codec::write_full_i32_array(w, games)?;
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "loading index");
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let index = Self::read_from(&mut BufReader::new(file))
            .with_context(|| format!("reading {}", path.display()))?;

        match load_meta(path) {
            Ok(Some(meta))
                if meta.num_games as usize != index.game_count()
                    || meta.num_positions as usize != index.position_count() =>
            {
                tracing::warn!(
                    expected_games = meta.num_games,
                    expected_positions = meta.num_positions,
                    "index does not match its metadata sidecar"
                );
            }
            Ok(Some(meta)) => tracing::debug!(created_at = %meta.created_at, "index metadata ok"),
            Ok(None) => {}
            Err(e) => tracing::warn!("ignoring unreadable index metadata: {e:#}"),
        }
        Ok(index)
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut index = Self::new();

        let nb_games = read_count(r)?;
        tracing::info!(games = %grouped(nb_games as u64), ". games");
        for _ in 0..nb_games {
            let ordinal = codec::read_i32(r)?;
            let game_id = codec::read_string(r)?;
            index.games.insert(ordinal, game_id);
        }

        let nb_positions = read_count(r)?;
        tracing::info!(positions = %grouped(nb_positions as u64), ". positions");
        let step = (nb_positions / 10).max(1);
        // the count is untrusted until the entries are actually read
        index.positions.reserve(nb_positions.min(1 << 20));
        for p in 0..nb_positions {
            let position = codec::read_i64(r)?;
            let games = codec::read_full_i32_array(r)?;
            if games.is_empty() {
                tracing::debug!(position, "skipping position without games");
                continue;
            }
            index.positions.insert(position, games);
            if p % step == 0 {
                tracing::info!("    {}", grouped(p as u64));
            }
        }
        Ok(index)
    }

    pub fn game_count(&self) -> usize {
        self.games.len()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Ordinals of the games that reached `position`; empty when unknown.
    pub fn games_with(&self, position: PositionHash) -> &[GameOrdinal] {
        self.positions.get(&position).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, position: PositionHash) -> usize {
        self.games_with(position).len()
    }

    pub fn game_id(&self, ordinal: GameOrdinal) -> Option<&str> {
        self.games.get(&ordinal).map(String::as_str)
    }
}

fn count_i32(len: usize) -> Result<i32> {
    i32::try_from(len).with_context(|| format!("{len} entries do not fit the index format"))
}

fn read_count<R: Read>(r: &mut R) -> Result<usize> {
    let n = codec::read_i32(r)?;
    if n < 0 {
        bail!("negative entry count {n}");
    }
    Ok(n as usize)
}
