//! Test double for [`super::PlatformApi`]. Lets unit tests exercise topology/display
//! device/settings-engine logic without touching real hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::{AdapterId, DisplayConfig, ModeInfo, Path, PlatformApi, QueryType, SetConfigOutcome};
use crate::types::EdidData;

/// A canned response set, keyed by target adapter+id, used to answer the per-path
/// accessor calls (`get_device_id`, `get_friendly_name`, ...).
#[derive(Debug, Clone, Default)]
pub struct MockTargetInfo {
    pub device_id: String,
    pub monitor_device_path: String,
    pub friendly_name: String,
    pub display_name: String,
    pub edid: Option<EdidData>,
}

/// Records every `set_display_config` call so tests can assert on what was committed.
#[derive(Debug, Clone, Default)]
pub struct Committed {
    pub paths: Vec<Path>,
    pub modes: Vec<ModeInfo>,
}

pub struct MockPlatformApi {
    pub active: Mutex<DisplayConfig>,
    pub all: Mutex<DisplayConfig>,
    pub targets: Mutex<HashMap<(AdapterId, u32), MockTargetInfo>>,
    pub last_committed: Mutex<Option<Committed>>,
    pub set_outcome: Mutex<SetConfigOutcome>,
    /// Outcomes consumed one at a time by successive `set_display_config` calls, ahead of
    /// the sticky `set_outcome` fallback. Lets a test make e.g. the first commit in a
    /// multi-step apply succeed and a later one fail.
    pub queued_outcomes: Mutex<VecDeque<SetConfigOutcome>>,
}

impl MockPlatformApi {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(DisplayConfig::default()),
            all: Mutex::new(DisplayConfig::default()),
            targets: Mutex::new(HashMap::new()),
            last_committed: Mutex::new(None),
            set_outcome: Mutex::new(SetConfigOutcome::Ok),
            queued_outcomes: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_config(&self, active: DisplayConfig, all: DisplayConfig) {
        *self.active.lock().unwrap() = active;
        *self.all.lock().unwrap() = all;
    }

    pub fn register_target(&self, adapter_id: AdapterId, target_id: u32, info: MockTargetInfo) {
        self.targets.lock().unwrap().insert((adapter_id, target_id), info);
    }

    pub fn set_outcome(&self, outcome: SetConfigOutcome) {
        *self.set_outcome.lock().unwrap() = outcome;
    }

    /// Queues outcomes for successive commits, ahead of `set_outcome`. Used to force a
    /// later step in a multi-step apply to fail after an earlier one already committed.
    pub fn queue_outcomes(&self, outcomes: impl IntoIterator<Item = SetConfigOutcome>) {
        self.queued_outcomes.lock().unwrap().extend(outcomes);
    }
}

/// Assigns fresh mode indexes to any path whose source/target index was reset to invalid,
/// mirroring the re-resolution real Windows performs when a commit supplies
/// `DISPLAYCONFIG_PATH_*_MODE_IDX_INVALID` and relies on the OS to pick a slot. Matches by
/// `(adapter_id, id)` against `modes`, the same key `DISPLAYCONFIG_MODE_INFO` entries carry.
fn resolve_mode_indices(paths: &mut [Path], modes: &[ModeInfo]) {
    for path in paths.iter_mut() {
        if path.source.mode_info_idx.is_none() {
            path.source.mode_info_idx = modes.iter().position(|mode| {
                matches!(mode, ModeInfo::Source(source) if source.adapter_id == path.source.adapter_id && source.id == path.source.id)
            }).map(|idx| idx as u32);
        }
        if path.target.mode_info_idx.is_none() {
            path.target.mode_info_idx = modes.iter().position(|mode| {
                matches!(mode, ModeInfo::Target(target) if target.adapter_id == path.target.adapter_id && target.id == path.target.id)
            }).map(|idx| idx as u32);
        }
    }
}

impl Default for MockPlatformApi {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformApi for MockPlatformApi {
    fn query(&self, query_type: QueryType) -> Option<DisplayConfig> {
        match query_type {
            QueryType::Active => Some(self.active.lock().unwrap().clone()),
            QueryType::All => Some(self.all.lock().unwrap().clone()),
        }
    }

    fn get_error_string(&self, code: i64) -> String {
        format!("mock error {code}")
    }

    fn get_device_id(&self, path: &Path) -> String {
        self.targets
            .lock()
            .unwrap()
            .get(&(path.target.adapter_id, path.target.id))
            .map(|info| info.device_id.clone())
            .unwrap_or_default()
    }

    fn get_monitor_device_path(&self, path: &Path) -> String {
        self.targets
            .lock()
            .unwrap()
            .get(&(path.target.adapter_id, path.target.id))
            .map(|info| info.monitor_device_path.clone())
            .unwrap_or_default()
    }

    fn get_friendly_name(&self, path: &Path) -> String {
        self.targets
            .lock()
            .unwrap()
            .get(&(path.target.adapter_id, path.target.id))
            .map(|info| info.friendly_name.clone())
            .unwrap_or_default()
    }

    fn get_display_name(&self, path: &Path) -> String {
        self.targets
            .lock()
            .unwrap()
            .get(&(path.target.adapter_id, path.target.id))
            .map(|info| info.display_name.clone())
            .unwrap_or_default()
    }

    fn get_edid(&self, path: &Path) -> Option<EdidData> {
        self.targets
            .lock()
            .unwrap()
            .get(&(path.target.adapter_id, path.target.id))
            .and_then(|info| info.edid.clone())
    }

    fn set_display_config(&self, paths: &[Path], modes: &[ModeInfo]) -> SetConfigOutcome {
        let outcome = self
            .queued_outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| *self.set_outcome.lock().unwrap());
        if outcome == SetConfigOutcome::Ok {
            let mut resolved_paths = paths.to_vec();
            resolve_mode_indices(&mut resolved_paths, modes);
            *self.last_committed.lock().unwrap() = Some(Committed {
                paths: resolved_paths.clone(),
                modes: modes.to_vec(),
            });
            let mut active = self.active.lock().unwrap();
            active.paths = resolved_paths;
            active.modes = modes.to_vec();
        }
        outcome
    }
}
