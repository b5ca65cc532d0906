use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every file and game task of one indexing run.
#[derive(Debug, Default)]
pub struct IndexStats {
    files_indexed: AtomicU64,
    games_seen: AtomicU64,
    games_rejected: AtomicU64,
    games_failed: AtomicU64,
    games_written: AtomicU64,
    moves_indexed: AtomicU64,
    collisions: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub files_indexed: u64,
    pub games_seen: u64,
    pub games_rejected: u64,
    pub games_failed: u64,
    pub games_written: u64,
    pub moves_indexed: u64,
    pub collisions: u64,
}

impl IndexStats {
    pub fn file_done(&self) {
        self.files_indexed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn game_seen(&self) {
        self.games_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn game_rejected(&self) {
        self.games_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn game_failed(&self) {
        self.games_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn game_written(&self) {
        self.games_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn move_indexed(&self) {
        self.moves_indexed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn collision(&self) {
        self.collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files_indexed: self.files_indexed.load(Ordering::Relaxed),
            games_seen: self.games_seen.load(Ordering::Relaxed),
            games_rejected: self.games_rejected.load(Ordering::Relaxed),
            games_failed: self.games_failed.load(Ordering::Relaxed),
            games_written: self.games_written.load(Ordering::Relaxed),
            moves_indexed: self.moves_indexed.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
        }
    }
}

/// `1234567` -> `"1,234,567"`.
pub fn grouped(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
