//! Small typed runtime configuration, in the style of the teacher's
//! `config::target::TargetConfig` builder-with-defaults.

/// Hard ceiling on operands a single model may declare (spec §4.C).
pub const MAX_OPERANDS: usize = 0xFFFF;

/// Hard ceiling on operations a single model may declare (spec §4.C).
pub const MAX_OPERATIONS: usize = 0xFFFF;

/// Largest total size (in bytes) a packed pointer-argument pool may reach
/// before `start_compute` rejects the request (spec §4.F step 2).
pub const MAX_POOL_BYTES: u64 = u32::MAX as u64;

/// Runtime-wide knobs that influence scheduling and numeric tolerance.
#[derive(Clone, Copy, Debug)]
pub struct RuntimeConfig {
    /// Default planner preference when a request doesn't pick one.
    pub default_preference: crate::planner::Preference,
    /// Whether float ops may round through reduced (F16-like) precision.
    pub relaxed_f16: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_preference: crate::planner::Preference::FastSingleAnswer,
            relaxed_f16: false,
        }
    }
}

impl RuntimeConfig {
    pub fn with_preference(mut self, preference: crate::planner::Preference) -> Self {
        self.default_preference = preference;
        self
    }

    pub fn with_relaxed_f16(mut self, relaxed: bool) -> Self {
        self.relaxed_f16 = relaxed;
        self
    }
}
