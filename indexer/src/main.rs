use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use pgnindex_core::config::{available_threads, PipelineConfig, PoolConfig};
use pgnindex_core::pipeline::build_forward_db;
use pgnindex_core::{repl, InvertedIndex, QueryEngine};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "pgnindexer")]
#[command(about = "Index chess positions of PGN corpora and query them by FEN", long_about = None)]
struct Cli {
    /// PGN file or directory to index (requires --database)
    #[arg(short, long, env = "PGNINDEX_PGN")]
    pgn: Option<PathBuf>,
    /// Forward database: written when --pgn is given, loaded otherwise
    #[arg(short, long, env = "PGNINDEX_DATABASE")]
    database: Option<PathBuf>,
    /// Inverted index: written from --database, or loaded on its own
    #[arg(short, long, env = "PGNINDEX_INDEX")]
    index: Option<PathBuf>,
    /// Workers per pool (defaults to the number of CPUs)
    #[arg(long, env = "PGNINDEX_THREADS")]
    threads: Option<usize>,
    /// Admission ceiling of the file pool
    #[arg(long, env = "PGNINDEX_FILE_CEILING")]
    file_ceiling: Option<usize>,
    /// Admission ceiling of the game pool
    #[arg(long, env = "PGNINDEX_GAME_CEILING")]
    game_ceiling: Option<usize>,
    /// Sleep between admission checks of a blocked submitter
    #[arg(long, env = "PGNINDEX_POLL_MS", default_value_t = 250)]
    poll_ms: u64,
    /// Only index the files directly under --pgn
    #[arg(long, env = "PGNINDEX_NO_RECURSIVE", default_value_t = false)]
    no_recursive: bool,
    /// Report distinct boards sharing a position hash while building
    #[arg(long, env = "PGNINDEX_VERIFY_COLLISIONS", default_value_t = false)]
    verify_collisions: bool,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        let mut cfg = PipelineConfig::with_threads(self.threads.unwrap_or_else(available_threads));
        let poll = Duration::from_millis(self.poll_ms);
        cfg.file_pool = pool(&cfg.file_pool, self.file_ceiling, poll);
        cfg.game_pool = pool(&cfg.game_pool, self.game_ceiling, poll);
        cfg.recursive = !self.no_recursive;
        cfg.verify_collisions = self.verify_collisions;
        cfg
    }
}

fn pool(base: &PoolConfig, ceiling: Option<usize>, poll: Duration) -> PoolConfig {
    base.clone().with_ceiling(ceiling.unwrap_or(base.ceiling)).with_poll_interval(poll)
}

/// Which steps a run performs, derived from the path flags alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Phases {
    build_db: bool,
    load_db: bool,
    write_index: bool,
    load_index: bool,
}

impl Phases {
    fn from_flags(pgn: bool, db: bool, index: bool) -> Self {
        Self {
            build_db: pgn && db,
            load_db: db,
            write_index: db && index,
            load_index: index && !db,
        }
    }
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let index = prepare_index(&cli).unwrap_or_else(|| {
        tracing::warn!("no index loaded, every query will count 0 games");
        InvertedIndex::new()
    });
    let engine = QueryEngine::new(index);
    tracing::info!(games = engine.indexed_games(), "ready");
    repl::run(&engine, io::stdin().lock(), &mut io::stdout())
}

/// Runs the selected phases. A failing phase is logged and skips the phases
/// that depend on it.
fn prepare_index(cli: &Cli) -> Option<InvertedIndex> {
    let phases = Phases::from_flags(cli.pgn.is_some(), cli.database.is_some(), cli.index.is_some());
    if cli.pgn.is_some() && !phases.build_db {
        tracing::warn!("--pgn ignored without --database");
    }

    let mut index = None;
    if let Some(db) = &cli.database {
        let mut db_ready = true;
        if let (true, Some(pgn)) = (phases.build_db, &cli.pgn) {
            tracing::info!(pgn = %pgn.display(), db = %db.display(), "building forward database");
            if let Err(e) = build_forward_db(pgn, db, cli.pipeline_config()) {
                tracing::error!("forward database not built: {e:#}");
                db_ready = false;
            }
        }
        if phases.load_db && db_ready {
            match InvertedIndex::from_forward_db(db) {
                Ok(loaded) => index = Some(loaded),
                Err(e) => tracing::error!("forward database not loaded: {e:#}"),
            }
        } else if phases.load_db {
            tracing::warn!(db = %db.display(), "not loading a forward database left over from an earlier build");
        }
    }

    if let Some(path) = &cli.index {
        if phases.load_index {
            index = load_index(path);
        } else if let (true, Some(loaded)) = (phases.write_index, &index) {
            if let Err(e) = loaded.save(path) {
                tracing::error!("index not written: {e:#}");
            }
        } else {
            tracing::warn!(path = %path.display(), "index not written, no forward database loaded");
        }
    }
    index
}

fn load_index(path: &Path) -> Option<InvertedIndex> {
    match InvertedIndex::load(path) {
        Ok(index) => Some(index),
        Err(e) => {
            tracing::error!("index not loaded: {e:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgnindex_core::{ForwardDbWriter, ForwardRecord};
    use std::fs;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("pgnindexer").chain(args.iter().copied()))
    }

    #[test]
    fn phases_follow_path_flags() {
        let none = Phases::from_flags(false, false, false);
        assert_eq!(none, Phases { build_db: false, load_db: false, write_index: false, load_index: false });

        // build then load in the same run
        let p = Phases::from_flags(true, true, false);
        assert!(p.build_db && p.load_db && !p.write_index && !p.load_index);

        let p = Phases::from_flags(true, true, true);
        assert!(p.build_db && p.load_db && p.write_index && !p.load_index);

        let p = Phases::from_flags(false, true, true);
        assert!(!p.build_db && p.load_db && p.write_index && !p.load_index);

        let p = Phases::from_flags(false, false, true);
        assert!(!p.build_db && !p.load_db && !p.write_index && p.load_index);

        let p = Phases::from_flags(true, false, false);
        assert_eq!(p, none);
    }

    #[test]
    fn build_then_load_then_write_index() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus");
        fs::create_dir(&corpus).unwrap();
        fs::write(corpus.join("a.pgn"), "1. e4 e5 *\n\n1. d4 d5 *\n").unwrap();
        let db = dir.path().join("games.db");
        let idx = dir.path().join("games.idx");

        let args = cli(&[
            "-p", corpus.to_str().unwrap(),
            "-d", db.to_str().unwrap(),
            "-i", idx.to_str().unwrap(),
            "--threads", "2",
            "--poll-ms", "5",
        ]);
        let index = prepare_index(&args).unwrap();
        assert_eq!(index.game_count(), 2);

        let reloaded = prepare_index(&cli(&["-i", idx.to_str().unwrap()])).unwrap();
        assert_eq!(reloaded, index);
    }

    #[test]
    fn failed_build_does_not_load_stale_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("games.db");
        let old = ForwardDbWriter::create(&db).unwrap();
        old.append(&ForwardRecord { game_id: "[1]old.pgn".into(), positions: vec![1, 2] }).unwrap();
        old.finish().unwrap();

        let missing = dir.path().join("no-such-corpus");
        let args = cli(&["-p", missing.to_str().unwrap(), "-d", db.to_str().unwrap(), "--threads", "2"]);
        assert!(prepare_index(&args).is_none());

        // the same database still loads when no build was requested
        let index = prepare_index(&cli(&["-d", db.to_str().unwrap()])).unwrap();
        assert_eq!(index.game_count(), 1);
    }
}
