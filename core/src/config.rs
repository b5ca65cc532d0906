use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_GAME_CEILING: usize = 10_000;

/// Sizing of one bounded pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Admission ceiling on active + queued tasks; must exceed `workers`.
    pub ceiling: usize,
    /// How long a blocked submitter sleeps between admission checks.
    pub poll_interval: Duration,
}

impl PoolConfig {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self { workers, ceiling: workers * 2, poll_interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub file_pool: PoolConfig,
    pub game_pool: PoolConfig,
    /// Descend into sub-directories of the corpus root.
    pub recursive: bool,
    /// Record the board placement behind every hash and report collisions.
    pub verify_collisions: bool,
}

impl PipelineConfig {
    pub fn with_threads(threads: usize) -> Self {
        let threads = threads.max(1);
        Self {
            file_pool: PoolConfig::new(threads).with_ceiling(threads * 3),
            game_pool: PoolConfig::new(threads).with_ceiling(DEFAULT_GAME_CEILING.max(threads + 1)),
            recursive: true,
            verify_collisions: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::with_threads(available_threads())
    }
}

pub fn available_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}
