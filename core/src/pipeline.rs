//! Corpus indexing: a file pool parses PGN files and feeds a game pool that
//! replays each game and appends its position set to the forward database.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use shakmaty::{Chess, Position};
use walkdir::WalkDir;

use crate::chess::{board_key, open_pgn, position_hash, GameRecord};
use crate::config::PipelineConfig;
use crate::forward::{ForwardDbWriter, ForwardRecord};
use crate::pool::{BoundedPool, TaskHandle};
use crate::stats::{grouped, IndexStats, StatsSnapshot};
use crate::PositionHash;

/// State shared by all game tasks.
struct GameContext {
    sink: Option<ForwardDbWriter>,
    stats: IndexStats,
    collisions: Option<CollisionCheck>,
}

#[derive(Default)]
struct CollisionCheck {
    boards: Mutex<HashMap<PositionHash, String>>,
}

impl CollisionCheck {
    fn observe(&self, hash: PositionHash, board: &Chess, stats: &IndexStats) {
        let key = board_key(board);
        let mut boards = self.boards.lock();
        match boards.get(&hash) {
            Some(first) if *first != key => {
                stats.collision();
                tracing::warn!(hash, first = %first, second = %key, "position hash collision");
            }
            Some(_) => {}
            None => {
                boards.insert(hash, key);
            }
        }
    }
}

pub struct Indexer {
    config: PipelineConfig,
    file_pool: BoundedPool,
    game_pool: Arc<BoundedPool>,
    ctx: Arc<GameContext>,
}

impl Indexer {
    /// Without a sink the games are still replayed and counted, but nothing
    /// is persisted.
    pub fn new(config: PipelineConfig, sink: Option<ForwardDbWriter>) -> Result<Self> {
        let file_pool = BoundedPool::with_config("file", &config.file_pool)?;
        let game_pool = Arc::new(BoundedPool::with_config("game", &config.game_pool)?);
        let ctx = Arc::new(GameContext {
            sink,
            stats: IndexStats::default(),
            collisions: config.verify_collisions.then(CollisionCheck::default),
        });
        Ok(Self { config, file_pool, game_pool, ctx })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Indexes every file under `root`, waits for all work to finish and
    /// closes the sink.
    pub fn run(self, root: &Path) -> Result<StatsSnapshot> {
        if !root.exists() {
            bail!("unknown corpus path {}", root.display());
        }
        let handles = self.submit_files(root);
        self.finish(handles)
    }

    fn submit_files(&self, root: &Path) -> Vec<TaskHandle<()>> {
        let mut walker = WalkDir::new(root).follow_links(true).sort_by_file_name();
        if !self.config.recursive {
            walker = walker.max_depth(1);
        }

        let mut handles = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("skipping unreadable corpus entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = relative_name(root, entry.path());
            let path = entry.into_path();
            let game_pool = Arc::clone(&self.game_pool);
            let ctx = Arc::clone(&self.ctx);
            let file = path.clone();
            handles.push(self.file_pool.submit(move || index_file(&game_pool, &ctx, &file, &rel)));
            tracing::info!(tasks = handles.len(), file = %path.display(), "file task submitted");
        }
        handles
    }

    fn finish(self, handles: Vec<TaskHandle<()>>) -> Result<StatsSnapshot> {
        tracing::info!("shutting down the thread pools 1/2");
        for handle in handles {
            if let Err(e) = handle.join() {
                tracing::error!("file task failed: {e}");
            }
        }
        self.file_pool.shutdown_and_await();

        // file tasks only enqueue games, so the game pool drains strictly afterwards
        tracing::info!("shutting down the thread pools 2/2");
        self.game_pool.shutdown_and_await();

        let stats = self.ctx.stats.snapshot();
        tracing::info!(
            "{} files indexed, {} games indexed, {} moves indexed",
            grouped(stats.files_indexed),
            grouped(stats.games_seen),
            grouped(stats.moves_indexed)
        );
        tracing::info!(
            rejected = stats.games_rejected,
            failed = stats.games_failed,
            written = stats.games_written,
            collisions = stats.collisions,
            "game outcomes"
        );

        if let Some(sink) = &self.ctx.sink {
            sink.finish()?;
        }
        Ok(stats)
    }
}

/// Creates the forward database at `db` and fills it from `corpus`.
pub fn build_forward_db(corpus: &Path, db: &Path, config: PipelineConfig) -> Result<StatsSnapshot> {
    if !corpus.exists() {
        bail!("unknown corpus path {}", corpus.display());
    }
    let sink = ForwardDbWriter::create(db)?;
    Indexer::new(config, Some(sink))?.run(corpus)
}

fn relative_name(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().into_owned(),
        _ => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned()),
    }
}

fn index_file(game_pool: &BoundedPool, ctx: &Arc<GameContext>, path: &Path, rel: &str) {
    match open_pgn(path) {
        Ok(games) => {
            for (n, game) in games.enumerate() {
                match game {
                    Ok(mut record) => {
                        record.id = format!("[{}]{rel}", n + 1);
                        submit_game(game_pool, ctx, record);
                    }
                    Err(e) => {
                        tracing::warn!(file = rel, games = n, "skipping rest of file: {e}");
                        break;
                    }
                }
            }
        }
        Err(e) => tracing::warn!(file = %path.display(), "cannot open: {e}"),
    }
    ctx.stats.file_done();
    tracing::debug!(file = rel, "file done");
}

fn submit_game(game_pool: &BoundedPool, ctx: &Arc<GameContext>, record: GameRecord) {
    ctx.stats.game_seen();
    if !record.is_parsable() || record.parse_error.is_some() {
        ctx.stats.game_rejected();
        tracing::debug!(
            game = %record.id,
            reason = record.parse_error.as_deref().unwrap_or("unsupported variant"),
            "game not indexed"
        );
        return;
    }

    let ctx = Arc::clone(ctx);
    game_pool.execute(move || {
        if let Err(e) = index_game(&ctx, &record) {
            ctx.stats.game_failed();
            tracing::warn!(game = %record.id, "game dropped: {e:#}");
        }
    });
}

fn index_game(ctx: &GameContext, record: &GameRecord) -> Result<()> {
    let mut board = record.start.clone();
    let mut positions = BTreeSet::new();
    for (ply, m) in record.moves.iter().enumerate() {
        if !board.is_legal(m) {
            bail!("illegal half-move {} {m:?}", ply + 1);
        }
        board.play_unchecked(m);
        ctx.stats.move_indexed();
        let hash = position_hash(&board);
        if let Some(check) = &ctx.collisions {
            check.observe(hash, &board, &ctx.stats);
        }
        positions.insert(hash);
    }

    if let Some(sink) = &ctx.sink {
        let entry = ForwardRecord {
            game_id: record.id.clone(),
            positions: positions.into_iter().collect(),
        };
        sink.append(&entry)?;
        ctx.stats.game_written();
    }
    tracing::debug!(game = %record.id, "processed {}", record.short_description());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::PgnGames;
    use crate::forward::ForwardDbReader;
    use std::path::PathBuf;

    #[test]
    fn relative_names_keep_subdirectories() {
        let root = PathBuf::from("/corpus");
        assert_eq!(relative_name(&root, &root.join("2019/01.pgn")), "2019/01.pgn");
        let single = PathBuf::from("/corpus/one.pgn");
        assert_eq!(relative_name(&single, &single), "one.pgn");
    }

    fn parse_one(pgn: &str) -> GameRecord {
        let mut record = PgnGames::new(pgn.as_bytes()).next().unwrap().unwrap();
        record.id = "[1]k.pgn".into();
        record
    }

    #[test]
    fn game_replay_collects_distinct_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.db");
        let ctx = GameContext {
            sink: Some(ForwardDbWriter::create(&path).unwrap()),
            stats: IndexStats::default(),
            collisions: None,
        };
        // knights out and back: the position after 1. Nf3 shows up twice
        let record = parse_one("1. Nf3 Nf6 2. Ng1 Ng8 3. Nf3 *\n");
        index_game(&ctx, &record).unwrap();
        ctx.sink.as_ref().unwrap().finish().unwrap();

        let read: Vec<_> = ForwardDbReader::open(&path).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].game_id, "[1]k.pgn");
        assert_eq!(read[0].positions.len(), 4);
        assert!(read[0].positions.windows(2).all(|w| w[0] < w[1]));
        let stats = ctx.stats.snapshot();
        assert_eq!(stats.moves_indexed, 5);
        assert_eq!(stats.games_written, 1);
    }

    #[test]
    fn replay_fault_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.db");
        let ctx = GameContext {
            sink: Some(ForwardDbWriter::create(&path).unwrap()),
            stats: IndexStats::default(),
            collisions: None,
        };
        let mut record = parse_one("1. e4 e5 *\n");
        // black's reply cannot be played from the initial position
        record.moves.remove(0);
        assert!(index_game(&ctx, &record).is_err());
        ctx.sink.as_ref().unwrap().finish().unwrap();

        assert_eq!(ForwardDbReader::open(&path).unwrap().count(), 0);
        assert_eq!(ctx.stats.snapshot().moves_indexed, 0);
    }

    #[test]
    fn collisions_are_counted_only_for_different_boards() {
        let stats = IndexStats::default();
        let check = CollisionCheck::default();
        let start = Chess::default();
        check.observe(1, &start, &stats);
        check.observe(1, &start, &stats);
        assert_eq!(stats.snapshot().collisions, 0);

        let mut moved = start.clone();
        let m = moved.legal_moves()[0].clone();
        moved.play_unchecked(&m);
        check.observe(1, &moved, &stats);
        assert_eq!(stats.snapshot().collisions, 1);
    }
}
