//! Apply/revert/reset logic: state capture, rollback guards, and persistence.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::display_device::{CommitOutcome, DisplayDevice};
use crate::error::{ApplyResult, RevertResult};
use crate::persistence::FileSettingsPersistence;
use crate::types::{
    DevicePreparation, DisplayMode, EnumeratedDevice, HdrState, InitialState, ModifiedState,
    Rational, Resolution, SingleDisplayConfigState, SingleDisplayConfiguration,
};

/// A compensating action pushed while applying a multi-step change; run in LIFO order if
/// a later step fails. Borrows the facade and owns whatever prior state it needs to
/// actually undo the step it was pushed for.
type RollbackGuard<'a> = Box<dyn FnOnce() + 'a>;

/// Optional workarounds the engine may be configured to apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnabledWorkarounds {
    /// Sleep this long between committing modes and committing HDR states whenever the
    /// requested device's HDR state is actually transitioning.
    pub hdr_blank_delay: Option<Duration>,
}

/// Stateful, persistable settings engine. Owns its persistence handle and in-memory
/// mirror of the persisted state; does not own the platform connection (borrowed per
/// call) since the engine itself is not what needs to outlive a single operation.
pub struct SettingsEngine {
    persistence: FileSettingsPersistence,
    workarounds: EnabledWorkarounds,
    state: Option<SingleDisplayConfigState>,
}

impl SettingsEngine {
    pub fn new(persistence: FileSettingsPersistence, workarounds: EnabledWorkarounds) -> Self {
        let state = persistence
            .load()
            .filter(|bytes| !bytes.is_empty())
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());
        Self {
            persistence,
            workarounds,
            state,
        }
    }

    pub fn state(&self) -> Option<&SingleDisplayConfigState> {
        self.state.as_ref()
    }

    fn persist(&self) -> bool {
        match &self.state {
            None => self.persistence.clear(),
            Some(state) => match serde_json::to_vec(state) {
                Ok(bytes) => self.persistence.store(&bytes),
                Err(error) => {
                    tracing::error!(%error, "failed to serialize settings state");
                    false
                }
            },
        }
    }

    /// Reuses persisted Initial if present; otherwise derives it from the live topology
    /// and enumerated devices. Fails if no device is currently primary.
    fn compute_initial_state(
        &self,
        facade: &DisplayDevice<'_>,
        devices: &[EnumeratedDevice],
    ) -> Option<InitialState> {
        if let Some(existing) = self.state.as_ref().and_then(|s| s.initial.clone()) {
            return Some(existing);
        }

        let topology = facade.get_current_topology();
        let primary_devices: HashSet<String> = devices
            .iter()
            .filter(|d| d.info.as_ref().is_some_and(|i| i.primary))
            .map(|d| d.device_id.clone())
            .collect();
        if primary_devices.is_empty() {
            return None;
        }
        Some(InitialState { topology, primary_devices })
    }

    /// Computes the new topology for a device prep, per the resolved `EnsureActive`/
    /// `EnsurePrimary` semantics: leave any existing group containing the device alone;
    /// only append a new singleton group if it's absent from the whole topology.
    fn compute_new_topology(
        device_prep: DevicePreparation,
        device_id: &str,
        initial: &InitialState,
    ) -> Vec<Vec<String>> {
        match device_prep {
            DevicePreparation::VerifyOnly => initial.topology.clone(),
            DevicePreparation::EnsureActive | DevicePreparation::EnsurePrimary => {
                let already_present = initial.topology.iter().any(|group| group.contains(&device_id.to_string()));
                if already_present {
                    initial.topology.clone()
                } else {
                    let mut topology = initial.topology.clone();
                    topology.push(vec![device_id.to_string()]);
                    topology
                }
            }
            // The requested device becomes the only display: every other group is
            // dropped, including any group the device previously shared with others.
            DevicePreparation::EnsureOnlyDisplay => vec![vec![device_id.to_string()]],
        }
    }

    /// Devices that should receive the same resolution/refresh-rate/HDR change as the
    /// requested device: the requested device itself, plus — when it is/becomes primary —
    /// any "additional primaries" grouped with it.
    fn additional_primaries(
        device_prep: DevicePreparation,
        device_id: &str,
        initial: &InitialState,
    ) -> Vec<String> {
        match device_prep {
            // EnsureOnlyDisplay drops every other device from the topology entirely, so
            // there is no duplicate group left to keep consistent.
            DevicePreparation::EnsurePrimary => initial
                .primary_devices
                .iter()
                .filter(|id| id.as_str() != device_id)
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn apply_settings(
        &mut self,
        facade: &DisplayDevice<'_>,
        devices: &[EnumeratedDevice],
        config: &SingleDisplayConfiguration,
    ) -> ApplyResult {
        let Some(initial) = self.compute_initial_state(facade, devices) else {
            return ApplyResult::DevicePrepFailed;
        };

        let device_id = if config.device_id.is_empty() {
            match initial.primary_devices.iter().next() {
                Some(id) => id.clone(),
                None => return ApplyResult::DevicePrepFailed,
            }
        } else {
            config.device_id.clone()
        };

        if !devices.iter().any(|d| d.device_id == device_id) {
            return ApplyResult::DevicePrepFailed;
        }

        let new_topology = Self::compute_new_topology(config.device_prep, &device_id, &initial);
        let affected = Self::additional_primaries(config.device_prep, &device_id, &initial);

        let mut guards: Vec<RollbackGuard<'_>> = Vec::new();
        let current_topology = facade.get_current_topology();
        let mut query_ids = vec![device_id.clone()];
        query_ids.extend(affected.iter().cloned());
        let current_modes = facade.get_current_display_modes(&query_ids);
        let current_hdr = facade.get_current_hdr_states(&query_ids);
        let current_primary = devices
            .iter()
            .find(|d| d.info.as_ref().is_some_and(|i| i.primary))
            .map(|d| d.device_id.clone())
            .unwrap_or_default();

        if !facade.is_topology_the_same(&current_topology, &new_topology) {
            match facade.set_topology(&new_topology) {
                CommitOutcome::Ok => {
                    let rollback_to = current_topology.clone();
                    guards.push(Box::new(move || {
                        facade.set_topology(&rollback_to);
                    }));
                }
                CommitOutcome::ApiTemporarilyUnavailable => {
                    Self::unwind(guards);
                    return ApplyResult::ApiTemporarilyUnavailable;
                }
                CommitOutcome::Failed => {
                    Self::unwind(guards);
                    return ApplyResult::DevicePrepFailed;
                }
            }
        }

        let mut original_modes: HashMap<String, DisplayMode> = HashMap::new();
        if config.resolution.is_some() || config.refresh_rate.is_some() {
            let mut new_modes = HashMap::new();
            let mut targets = vec![device_id.clone()];
            targets.extend(affected.iter().cloned());
            for id in &targets {
                let current = current_modes.get(id).cloned().unwrap_or(DisplayMode {
                    resolution: Resolution { width: 0, height: 0 },
                    refresh_rate: Rational::new(0, 1),
                });
                // Only record an original mode when the device actually had one: a device
                // with no prior active mode has nothing meaningful to revert to, and
                // recording a zeroed placeholder would make revert try to restore it.
                if let Some(previous) = current_modes.get(id) {
                    original_modes.insert(id.clone(), previous.clone());
                }
                new_modes.insert(
                    id.clone(),
                    DisplayMode {
                        resolution: config.resolution.unwrap_or(current.resolution),
                        refresh_rate: config
                            .refresh_rate
                            .map(|r| Rational::from_floating_point(r.as_f64()))
                            .unwrap_or(current.refresh_rate),
                    },
                );
            }
            match facade.set_display_modes(&new_modes) {
                CommitOutcome::Ok => {
                    let rollback_modes = current_modes.clone();
                    guards.push(Box::new(move || {
                        facade.set_display_modes(&rollback_modes);
                    }));
                }
                CommitOutcome::ApiTemporarilyUnavailable => {
                    Self::unwind(guards);
                    return ApplyResult::ApiTemporarilyUnavailable;
                }
                CommitOutcome::Failed => {
                    Self::unwind(guards);
                    return ApplyResult::DisplayModePrepFailed;
                }
            }
        }

        let wants_primary = matches!(
            config.device_prep,
            DevicePreparation::EnsurePrimary | DevicePreparation::EnsureOnlyDisplay
        );
        if wants_primary && !facade.is_primary(&device_id) {
            if !facade.set_as_primary(&device_id) {
                Self::unwind(guards);
                return ApplyResult::PrimaryDevicePrepFailed;
            }
            // Nothing to restore if no device was primary beforehand (e.g. the topology
            // step just activated the very first display).
            if !current_primary.is_empty() {
                let rollback_primary = current_primary.clone();
                guards.push(Box::new(move || {
                    facade.set_as_primary(&rollback_primary);
                }));
            }
        }

        if let Some(duration) = self.workarounds.hdr_blank_delay {
            let wanted_hdr = config.hdr_state;
            let current = current_hdr.get(&device_id).copied().flatten();
            if let Some(wanted) = wanted_hdr {
                if Some(wanted) != current {
                    std::thread::sleep(duration);
                }
            }
        }

        let mut original_hdr_states: HashMap<String, Option<HdrState>> = HashMap::new();
        if let Some(wanted_hdr) = config.hdr_state {
            let mut new_hdr = HashMap::new();
            let mut targets = vec![device_id.clone()];
            targets.extend(affected.iter().cloned());
            for id in &targets {
                // Same reasoning as original_modes: only record a prior HDR state for a
                // device that was actually queryable (i.e. active) beforehand.
                if let Some(&previous) = current_hdr.get(id) {
                    original_hdr_states.insert(id.clone(), previous);
                }
                new_hdr.insert(id.clone(), Some(wanted_hdr));
            }
            match facade.set_hdr_states(&new_hdr) {
                CommitOutcome::Ok => {
                    let rollback_hdr = current_hdr.clone();
                    guards.push(Box::new(move || {
                        facade.set_hdr_states(&rollback_hdr);
                    }));
                }
                CommitOutcome::ApiTemporarilyUnavailable => {
                    Self::unwind(guards);
                    return ApplyResult::ApiTemporarilyUnavailable;
                }
                CommitOutcome::Failed => {
                    Self::unwind(guards);
                    return ApplyResult::HdrStatePrepFailed;
                }
            }
        }

        let modified = ModifiedState {
            topology: new_topology,
            original_modes,
            original_hdr_states,
            original_primary_device: current_primary,
        };
        let new_state = SingleDisplayConfigState {
            initial: Some(initial),
            modified: Some(modified),
        };

        let previous_state = self.state.clone();
        self.state = Some(new_state);
        if !self.persist() {
            self.state = previous_state;
            Self::unwind(guards);
            return ApplyResult::PersistenceSaveFailed;
        }

        guards.clear();
        ApplyResult::Ok
    }

    fn unwind(guards: Vec<RollbackGuard<'_>>) {
        for guard in guards.into_iter().rev() {
            guard();
        }
    }

    pub fn revert_settings(&mut self, facade: &DisplayDevice<'_>, devices: &[EnumeratedDevice]) -> RevertResult {
        let Some(state) = self.state.clone() else {
            return RevertResult::Ok;
        };
        let Some(modified) = state.modified.clone() else {
            return RevertResult::Ok;
        };
        let Some(mut initial) = state.initial.clone() else {
            return RevertResult::TopologyIsInvalid;
        };

        let present: HashSet<String> = devices.iter().map(|d| d.device_id.clone()).collect();
        initial.topology.retain_mut(|group| {
            group.retain(|id| present.contains(id));
            !group.is_empty()
        });
        initial.primary_devices.retain(|id| present.contains(id));
        if initial.primary_devices.is_empty() || initial.topology.is_empty() {
            return RevertResult::TopologyIsInvalid;
        }

        let mut guards: Vec<RollbackGuard<'_>> = Vec::new();
        let current_topology = facade.get_current_topology();
        let mode_ids: Vec<String> = modified.original_modes.keys().cloned().collect();
        let hdr_ids: Vec<String> = modified.original_hdr_states.keys().cloned().collect();
        let current_modes = facade.get_current_display_modes(&mode_ids);
        let current_hdr = facade.get_current_hdr_states(&hdr_ids);
        let current_primary = devices
            .iter()
            .find(|d| d.info.as_ref().is_some_and(|i| i.primary))
            .map(|d| d.device_id.clone())
            .unwrap_or_default();

        match facade.set_topology(&initial.topology) {
            CommitOutcome::Ok => {
                let rollback_to = current_topology.clone();
                guards.push(Box::new(move || {
                    facade.set_topology(&rollback_to);
                }));
            }
            CommitOutcome::ApiTemporarilyUnavailable => return RevertResult::ApiTemporarilyUnavailable,
            CommitOutcome::Failed => return RevertResult::SwitchingTopologyFailed,
        }

        let surviving_modes: HashMap<String, DisplayMode> = modified
            .original_modes
            .into_iter()
            .filter(|(id, _)| present.contains(id))
            .collect();
        match facade.set_display_modes(&surviving_modes) {
            CommitOutcome::Ok => {
                let rollback_modes = current_modes.clone();
                guards.push(Box::new(move || {
                    facade.set_display_modes(&rollback_modes);
                }));
            }
            CommitOutcome::ApiTemporarilyUnavailable => {
                Self::unwind(guards);
                return RevertResult::ApiTemporarilyUnavailable;
            }
            CommitOutcome::Failed => {
                Self::unwind(guards);
                return RevertResult::RevertingDisplayModesFailed;
            }
        }

        if !modified.original_primary_device.is_empty() && present.contains(&modified.original_primary_device) {
            if !facade.set_as_primary(&modified.original_primary_device) {
                Self::unwind(guards);
                return RevertResult::RevertingPrimaryDeviceFailed;
            }
            if !current_primary.is_empty() {
                let rollback_primary = current_primary.clone();
                guards.push(Box::new(move || {
                    facade.set_as_primary(&rollback_primary);
                }));
            }
        }

        let surviving_hdr: HashMap<String, Option<HdrState>> = modified
            .original_hdr_states
            .into_iter()
            .filter(|(id, _)| present.contains(id))
            .collect();
        match facade.set_hdr_states(&surviving_hdr) {
            CommitOutcome::Ok => {
                let rollback_hdr = current_hdr.clone();
                guards.push(Box::new(move || {
                    facade.set_hdr_states(&rollback_hdr);
                }));
            }
            CommitOutcome::ApiTemporarilyUnavailable => {
                Self::unwind(guards);
                return RevertResult::ApiTemporarilyUnavailable;
            }
            CommitOutcome::Failed => {
                Self::unwind(guards);
                return RevertResult::RevertingHdrStatesFailed;
            }
        }

        let previous_state = self.state.clone();
        self.state = None;
        if !self.persist() {
            self.state = previous_state;
            Self::unwind(guards);
            return RevertResult::PersistenceSaveFailed;
        }

        guards.clear();
        RevertResult::Ok
    }

    pub fn reset_persistence(&mut self) -> bool {
        self.state = None;
        self.persistence.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockPlatformApi, MockTargetInfo};
    use crate::platform::{
        AdapterId, DisplayConfig, Path, SetConfigOutcome, SourceModeInfo, SourcePathInfo, TargetModeInfo, TargetPathInfo,
    };
    use crate::types::{EnumeratedDeviceInfo, FloatingPoint, Point};

    fn adapter(n: u32) -> AdapterId {
        AdapterId { low_part: n, high_part: 0 }
    }

    fn two_device_fixture() -> (MockPlatformApi, Vec<EnumeratedDevice>) {
        let api = MockPlatformApi::new();
        let adapter_id = adapter(1);

        api.register_target(
            adapter_id,
            10,
            MockTargetInfo {
                device_id: "DeviceId1".into(),
                monitor_device_path: "path-1".into(),
                friendly_name: "Primary".into(),
                display_name: "\\\\.\\DISPLAY1".into(),
                edid: None,
            },
        );
        api.register_target(
            adapter_id,
            11,
            MockTargetInfo {
                device_id: "DeviceId4".into(),
                monitor_device_path: "path-4".into(),
                friendly_name: "Secondary".into(),
                display_name: "\\\\.\\DISPLAY2".into(),
                edid: None,
            },
        );

        let path_primary = Path {
            source: SourcePathInfo {
                adapter_id,
                id: 0,
                mode_info_idx: Some(0),
                clone_group_id: Some(0),
                in_use: true,
            },
            target: TargetPathInfo {
                adapter_id,
                id: 10,
                mode_info_idx: Some(2),
                desktop_mode_info_idx: None,
                target_available: true,
            },
            active: true,
        };
        let path_secondary = Path {
            source: SourcePathInfo {
                adapter_id,
                id: 1,
                mode_info_idx: Some(1),
                clone_group_id: None,
                in_use: false,
            },
            target: TargetPathInfo {
                adapter_id,
                id: 11,
                mode_info_idx: Some(3),
                desktop_mode_info_idx: None,
                target_available: true,
            },
            active: false,
        };

        let modes = vec![
            ModeInfo::Source(SourceModeInfo {
                adapter_id,
                id: 0,
                width: 1920,
                height: 1080,
                position_x: 0,
                position_y: 0,
            }),
            ModeInfo::Source(SourceModeInfo {
                adapter_id,
                id: 1,
                width: 1280,
                height: 720,
                position_x: 1920,
                position_y: 0,
            }),
            ModeInfo::Target(TargetModeInfo {
                adapter_id,
                id: 10,
                refresh_rate: Rational::new(60, 1),
            }),
            ModeInfo::Target(TargetModeInfo {
                adapter_id,
                id: 11,
                refresh_rate: Rational::new(60, 1),
            }),
        ];

        let active = DisplayConfig { paths: vec![path_primary], modes: modes.clone() };
        let all = DisplayConfig { paths: vec![active.paths[0].clone(), path_secondary], modes };
        api.set_config(active, all);

        let devices = vec![
            EnumeratedDevice {
                device_id: "DeviceId1".into(),
                display_name: "\\\\.\\DISPLAY1".into(),
                friendly_name: "Primary".into(),
                edid: None,
                info: Some(EnumeratedDeviceInfo {
                    resolution: Resolution { width: 1920, height: 1080 },
                    resolution_scale: FloatingPoint::Double(1.0),
                    refresh_rate: FloatingPoint::Double(60.0),
                    primary: true,
                    origin_point: Point { x: 0, y: 0 },
                    hdr_state: Some(HdrState::Disabled),
                }),
            },
            EnumeratedDevice {
                device_id: "DeviceId4".into(),
                display_name: "\\\\.\\DISPLAY2".into(),
                friendly_name: "Secondary".into(),
                edid: None,
                info: None,
            },
        ];

        (api, devices)
    }

    fn temp_persistence(name: &str) -> FileSettingsPersistence {
        let dir = std::env::temp_dir().join(format!("display-device-engine-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        FileSettingsPersistence::new(dir.join(name))
    }

    #[test]
    fn apply_ensure_active_adds_singleton_group_and_persists() {
        let (api, devices) = two_device_fixture();
        let facade = DisplayDevice::new(&api);
        let persistence = temp_persistence("apply_ensure_active.json");
        persistence.clear();
        let mut engine = SettingsEngine::new(persistence.clone(), EnabledWorkarounds::default());

        let config = SingleDisplayConfiguration {
            device_id: "DeviceId4".into(),
            device_prep: DevicePreparation::EnsureActive,
            resolution: None,
            refresh_rate: None,
            hdr_state: None,
        };

        let result = engine.apply_settings(&facade, &devices, &config);
        assert_eq!(result, ApplyResult::Ok);
        assert!(persistence.load().unwrap().len() > 0);

        let state = engine.state().unwrap();
        let modified = state.modified.as_ref().unwrap();
        assert!(modified.topology.iter().any(|g| g == &vec!["DeviceId4".to_string()]));

        persistence.clear();
    }

    #[test]
    fn apply_unknown_device_fails_without_persisting() {
        let (api, devices) = two_device_fixture();
        let facade = DisplayDevice::new(&api);
        let persistence = temp_persistence("apply_unknown_device.json");
        persistence.clear();
        let mut engine = SettingsEngine::new(persistence.clone(), EnabledWorkarounds::default());

        let config = SingleDisplayConfiguration {
            device_id: "DoesNotExist".into(),
            device_prep: DevicePreparation::EnsureActive,
            resolution: None,
            refresh_rate: None,
            hdr_state: None,
        };

        let result = engine.apply_settings(&facade, &devices, &config);
        assert_eq!(result, ApplyResult::DevicePrepFailed);
        assert_eq!(persistence.load(), Some(Vec::new()));

        persistence.clear();
    }

    #[test]
    fn revert_with_no_modified_state_is_ok() {
        let (api, devices) = two_device_fixture();
        let facade = DisplayDevice::new(&api);
        let persistence = temp_persistence("revert_noop.json");
        persistence.clear();
        let mut engine = SettingsEngine::new(persistence.clone(), EnabledWorkarounds::default());

        assert_eq!(engine.revert_settings(&facade, &devices), RevertResult::Ok);
        persistence.clear();
    }

    /// A later step (display modes) failing after an earlier one (topology) already
    /// committed must unwind the earlier step, not just abort.
    #[test]
    fn apply_rolls_back_topology_when_a_later_step_fails() {
        let (api, devices) = two_device_fixture();
        api.queue_outcomes([
            SetConfigOutcome::Ok,     // topology commit for EnsureActive succeeds
            SetConfigOutcome::Failed, // display-mode commit fails
            SetConfigOutcome::Ok,     // rollback guard restores the prior topology
        ]);
        let facade = DisplayDevice::new(&api);
        let persistence = temp_persistence("apply_rolls_back_topology.json");
        persistence.clear();
        let mut engine = SettingsEngine::new(persistence.clone(), EnabledWorkarounds::default());

        let config = SingleDisplayConfiguration {
            device_id: "DeviceId4".into(),
            device_prep: DevicePreparation::EnsureActive,
            resolution: Some(Resolution { width: 2560, height: 1440 }),
            refresh_rate: None,
            hdr_state: None,
        };

        let result = engine.apply_settings(&facade, &devices, &config);
        assert_eq!(result, ApplyResult::DisplayModePrepFailed);
        assert_eq!(facade.get_current_topology(), vec![vec!["DeviceId1".to_string()]]);
        assert!(engine.state().is_none());
        assert_eq!(persistence.load(), Some(Vec::new()));

        persistence.clear();
    }

    #[test]
    fn reset_persistence_clears_state_and_file() {
        let (api, devices) = two_device_fixture();
        let facade = DisplayDevice::new(&api);
        let persistence = temp_persistence("reset_persistence.json");
        persistence.clear();
        let mut engine = SettingsEngine::new(persistence.clone(), EnabledWorkarounds::default());

        let config = SingleDisplayConfiguration {
            device_id: "DeviceId4".into(),
            device_prep: DevicePreparation::EnsureActive,
            resolution: None,
            refresh_rate: None,
            hdr_state: None,
        };
        engine.apply_settings(&facade, &devices, &config);
        assert!(engine.reset_persistence());
        assert_eq!(persistence.load(), Some(Vec::new()));
        assert!(engine.state().is_none());
    }
}
