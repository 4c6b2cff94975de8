//! Runtime configuration.

/// Device selection and profiling options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub power_preference: wgpu::PowerPreference,

    /// Record a timestamp pair around every compute pass. Ignored, with a
    /// warning, when the adapter lacks timestamp queries.
    pub profiling: bool,

    /// Passes that can be timed between two [`read_pass_timings`] calls;
    /// later passes run untimed.
    ///
    /// [`read_pass_timings`]: crate::WgpuDevice::read_pass_timings
    pub max_timestamp_passes: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            profiling: false,
            max_timestamp_passes: 256,
        }
    }
}

impl RuntimeConfig {
    pub fn with_power_preference(mut self, power_preference: wgpu::PowerPreference) -> Self {
        self.power_preference = power_preference;
        self
    }

    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    pub fn with_max_timestamp_passes(mut self, passes: u32) -> Self {
        self.max_timestamp_passes = passes.max(1);
        self
    }
}
