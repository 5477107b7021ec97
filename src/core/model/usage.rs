// src/core/model/usage.rs

//! Derived usage-rollup records, keyed by `(scope, period start)`.

use strum_macros::{Display, EnumString};

/// Granularity of a rollup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RollupPeriod {
    Hour,
    Day,
    Month,
}

/// Per-cluster consumption for one window. After reconciliation,
/// `alloc + down + planned_down + reserved + idle + over == total_time`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterUsage {
    pub cluster: String,
    pub period_start: i64,
    /// Live CPU count at the end of the window.
    pub cpu_count: u32,
    /// Capacity of the window in CPU-seconds.
    pub total_time: u64,
    pub alloc_secs: u64,
    pub down_secs: u64,
    pub pdown_secs: u64,
    pub idle_secs: u64,
    pub over_secs: u64,
    pub resv_secs: u64,
}

/// Per-association consumption for one window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssocUsage {
    pub assoc_id: u32,
    pub period_start: i64,
    pub alloc_secs: u64,
}

/// Per-wckey consumption for one window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WckeyUsage {
    pub wckey: String,
    pub period_start: i64,
    pub alloc_secs: u64,
}
