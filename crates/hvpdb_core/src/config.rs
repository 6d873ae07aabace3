//! Database open options.

/// Options controlling how [`crate::Database::open`] behaves.
///
/// Every field has a sensible default and a `#[must_use] const fn` setter
/// so callers chain only the knobs they care about.
#[derive(Debug, Clone)]
pub struct Options {
    /// Whether WAL appends `flush` + `fsync` before returning. A
    /// performance knob, not a correctness one — tests run with this
    /// `true`.
    pub durable: bool,

    /// Whether to create the snapshot/WAL pair if missing. `open()` always
    /// creates an empty in-memory database when the snapshot is absent;
    /// this only gates whether that is allowed or treated as an error.
    pub create_if_missing: bool,

    /// Argon2id time cost (iterations). Default 4.
    pub kdf_time_cost: u32,

    /// Argon2id memory cost in KiB. Default 102_400 (100 MiB).
    pub kdf_memory_cost_kib: u32,

    /// Argon2id parallelism (lanes). Default 4.
    pub kdf_parallelism: u32,

    /// Auto-checkpoint once the WAL exceeds this many bytes. `0` disables
    /// the threshold (the caller must call `commit()`/`checkpoint()`
    /// explicitly). A size-based trigger in place of a background timer.
    pub checkpoint_threshold_bytes: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            durable: true,
            create_if_missing: true,
            kdf_time_cost: 4,
            kdf_memory_cost_kib: 102_400,
            kdf_parallelism: 4,
            checkpoint_threshold_bytes: 0,
        }
    }
}

impl Options {
    /// Creates a new set of options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether WAL appends fsync before returning.
    #[must_use]
    pub const fn durable(mut self, value: bool) -> Self {
        self.durable = value;
        self
    }

    /// Sets whether the database may be created if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the Argon2id time cost.
    #[must_use]
    pub const fn kdf_time_cost(mut self, value: u32) -> Self {
        self.kdf_time_cost = value;
        self
    }

    /// Sets the Argon2id memory cost in KiB.
    #[must_use]
    pub const fn kdf_memory_cost_kib(mut self, value: u32) -> Self {
        self.kdf_memory_cost_kib = value;
        self
    }

    /// Sets the Argon2id parallelism.
    #[must_use]
    pub const fn kdf_parallelism(mut self, value: u32) -> Self {
        self.kdf_parallelism = value;
        self
    }

    /// Sets the auto-checkpoint WAL size threshold in bytes (`0` disables).
    #[must_use]
    pub const fn checkpoint_threshold_bytes(mut self, value: u64) -> Self {
        self.checkpoint_threshold_bytes = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let opts = Options::default();
        assert!(opts.durable);
        assert!(opts.create_if_missing);
        assert_eq!(opts.kdf_time_cost, 4);
        assert_eq!(opts.kdf_parallelism, 4);
    }

    #[test]
    fn builder_pattern() {
        let opts = Options::new()
            .durable(false)
            .kdf_time_cost(2)
            .checkpoint_threshold_bytes(1024);

        assert!(!opts.durable);
        assert_eq!(opts.kdf_time_cost, 2);
        assert_eq!(opts.checkpoint_threshold_bytes, 1024);
    }
}
