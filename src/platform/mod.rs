//! Abstraction over the OS display-configuration API.
//!
//! Isolates the rest of the crate from the concrete Win32 surface so unit tests can run
//! against a mock implementation instead of touching real hardware.

/// Test double for [`PlatformApi`]. Public (not test-gated) so integration tests and
/// downstream crates can drive the engine without real hardware.
pub mod mock;
#[cfg(windows)]
pub mod windows_api;

use crate::types::{EdidData, Rational};

/// A Windows `LUID`-shaped adapter identifier, kept as plain integers so the rest of the
/// crate does not need to depend on `windows` types directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AdapterId {
    pub low_part: u32,
    pub high_part: i32,
}

/// Which subset of paths a query should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// Only currently active paths.
    Active,
    /// Every configurable path, active paths first.
    All,
}

/// Source-side information for a path: which adapter/source id it uses, which source mode
/// it points at (if any), and bookkeeping indexes Windows tracks per path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePathInfo {
    pub adapter_id: AdapterId,
    pub id: u32,
    pub mode_info_idx: Option<u32>,
    pub clone_group_id: Option<u32>,
    pub in_use: bool,
}

/// Target-side information for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPathInfo {
    pub adapter_id: AdapterId,
    pub id: u32,
    pub mode_info_idx: Option<u32>,
    pub desktop_mode_info_idx: Option<u32>,
    pub target_available: bool,
}

/// A logical connection from an adapter source to a display target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub source: SourcePathInfo,
    pub target: TargetPathInfo,
    pub active: bool,
}

/// A source mode: resolution and desktop origin for a source on an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceModeInfo {
    pub adapter_id: AdapterId,
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub position_x: i32,
    pub position_y: i32,
}

/// A target mode: signal-level parameters for a target, of which we only track the
/// refresh rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetModeInfo {
    pub adapter_id: AdapterId,
    pub id: u32,
    pub refresh_rate: Rational,
}

/// An entry in the queried mode list; which kind it is determines which accessor applies.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeInfo {
    Source(SourceModeInfo),
    Target(TargetModeInfo),
}

/// Paths and modes returned by a successful query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayConfig {
    pub paths: Vec<Path>,
    pub modes: Vec<ModeInfo>,
}

impl Default for ModeInfo {
    fn default() -> Self {
        ModeInfo::Source(SourceModeInfo {
            adapter_id: AdapterId::default(),
            id: 0,
            width: 0,
            height: 0,
            position_x: 0,
            position_y: 0,
        })
    }
}

/// Outcome of committing a display configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetConfigOutcome {
    Ok,
    ApiTemporarilyUnavailable,
    Failed,
}

/// Abstract OS display-configuration surface. One production implementation (Windows)
/// plus a test double share every call site in this crate.
pub trait PlatformApi: Send + Sync {
    /// Queries the current paths/modes, or `None` on failure (already logged).
    fn query(&self, query_type: QueryType) -> Option<DisplayConfig>;

    /// Diagnostic-only string for an OS error code.
    fn get_error_string(&self, code: i64) -> String;

    /// A stable, persistent device id for the path's target, or empty on failure.
    fn get_device_id(&self, path: &Path) -> String;

    /// Adapter+target key used to group related paths, or empty if missing.
    fn get_monitor_device_path(&self, path: &Path) -> String;

    /// Human-readable name, possibly empty.
    fn get_friendly_name(&self, path: &Path) -> String;

    /// OS-assigned logical display name (e.g. `\\.\DISPLAY1`), possibly empty for
    /// inactive paths.
    fn get_display_name(&self, path: &Path) -> String;

    /// Atomically commits the given paths/modes as the new display configuration.
    fn set_display_config(&self, paths: &[Path], modes: &[ModeInfo]) -> SetConfigOutcome;

    /// The target's parsed EDID manufacturer/product identity, or `None` if unavailable.
    fn get_edid(&self, path: &Path) -> Option<EdidData>;
}

pub const INVALID_INDEX: Option<u32> = None;
