//! Log stream configuration.

/// Configuration for opening a log stream.
#[derive(Debug, Clone)]
pub struct LogStreamConfig {
    /// Target size of one indexed block in bytes.
    ///
    /// The indexer creates one block index entry per roughly this many
    /// scanned bytes.
    pub index_block_size: usize,

    /// Fractional tolerance applied to `index_block_size`.
    ///
    /// A block is considered full once it has accumulated
    /// `index_block_size * (1 - deviation)` bytes.
    pub deviation: f64,

    /// Initial size of the indexer's read buffer.
    ///
    /// The buffer doubles whenever a single frame does not fit.
    pub read_buffer_size: usize,

    /// Maximum number of bytes the appender takes from the write buffer
    /// per append.
    pub max_append_block_size: usize,

    /// Number of indexed positions between block index snapshots.
    pub snapshot_interval: u64,
}

impl Default for LogStreamConfig {
    fn default() -> Self {
        Self {
            index_block_size: 4 * 1024 * 1024, // 4 MiB
            deviation: 0.1,
            read_buffer_size: 32 * 1024,      // 32 KiB
            max_append_block_size: 2 * 1024 * 1024, // 2 MiB
            snapshot_interval: 10_000,
        }
    }
}

impl LogStreamConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target indexed block size in bytes.
    #[must_use]
    pub const fn index_block_size(mut self, size: usize) -> Self {
        self.index_block_size = size;
        self
    }

    /// Sets the block fill deviation.
    #[must_use]
    pub const fn deviation(mut self, deviation: f64) -> Self {
        self.deviation = deviation;
        self
    }

    /// Sets the initial indexer read buffer size.
    #[must_use]
    pub const fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Sets the maximum bytes appended per write-buffer block.
    #[must_use]
    pub const fn max_append_block_size(mut self, size: usize) -> Self {
        self.max_append_block_size = size;
        self
    }

    /// Sets the number of indexed positions between snapshots.
    #[must_use]
    pub const fn snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Returns the accumulated byte count at which a block is indexed.
    #[must_use]
    pub fn block_fill_threshold(&self) -> usize {
        (self.index_block_size as f64 * (1.0 - self.deviation)) as usize
    }
}
