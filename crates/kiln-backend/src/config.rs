//! Backend configuration.

/// Configuration for a [`Backend`](crate::Backend).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Wrap every kernel call in a validation error scope.
    ///
    /// Captured errors are delivered to the caller's error sink as deferred
    /// checks. Costs one scope push/pop per kernel call.
    pub validation: bool,

    /// Flush automatically once this many dispatches are recorded.
    pub max_pending_dispatches: usize,

    /// Maximum number of compiled programs kept in the cache.
    pub program_cache_capacity: u64,

    /// Record host-side wall time per operator type.
    pub profiling: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            validation: false,
            max_pending_dispatches: 16,
            program_cache_capacity: 1024,
            profiling: false,
        }
    }
}

impl BackendConfig {
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }

    /// Set the auto-flush threshold. Values below 1 are clamped to 1.
    pub fn with_max_pending_dispatches(mut self, count: usize) -> Self {
        self.max_pending_dispatches = count.max(1);
        self
    }

    pub fn with_program_cache_capacity(mut self, capacity: u64) -> Self {
        self.program_cache_capacity = capacity;
        self
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        self
    }
}
