//! Engine configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database root if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync the log after every mutation (safer but slower).
    pub sync_on_write: bool,

    /// Minimum number of log frames before automatic compaction is
    /// considered.
    pub compact_min_frames: u64,

    /// Live-records-to-frames ratio below which automatic compaction runs.
    pub compact_live_ratio: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
            compact_min_frames: 1024,
            compact_live_ratio: 0.5,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database root if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync the log after every mutation.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the frame-count floor for automatic compaction.
    #[must_use]
    pub const fn compact_min_frames(mut self, frames: u64) -> Self {
        self.compact_min_frames = frames;
        self
    }

    /// Sets the live-ratio threshold for automatic compaction.
    #[must_use]
    pub const fn compact_live_ratio(mut self, ratio: f64) -> Self {
        self.compact_live_ratio = ratio;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_write);
        assert_eq!(config.compact_min_frames, 1024);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_write(false)
            .compact_min_frames(16)
            .compact_live_ratio(0.25);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_write);
        assert_eq!(config.compact_min_frames, 16);
        assert!((config.compact_live_ratio - 0.25).abs() < f64::EPSILON);
    }
}
