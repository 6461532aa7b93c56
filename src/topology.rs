//! Path/mode index bookkeeping and construction of path sets for a requested topology.

use std::collections::HashMap;

use crate::platform::{AdapterId, ModeInfo, Path, PlatformApi, SourceModeInfo};
use crate::types::{ActiveTopology, PathSourceIndexData, PathSourceIndexDataMap};

pub fn is_available(path: &Path) -> bool {
    path.target.target_available
}

pub fn is_active(path: &Path) -> bool {
    path.active
}

pub fn set_active(path: &mut Path, active: bool) {
    path.active = active;
    path.source.in_use = active;
}

pub fn clone_group_id(path: &Path) -> Option<u32> {
    path.source.clone_group_id
}

pub fn set_clone_group_id(path: &mut Path, id: Option<u32>) {
    path.source.clone_group_id = id;
}

pub fn source_mode_index(path: &Path) -> Option<u32> {
    path.source.mode_info_idx
}

pub fn set_source_mode_index(path: &mut Path, index: Option<u32>) {
    path.source.mode_info_idx = index;
}

pub fn target_mode_index(path: &Path) -> Option<u32> {
    path.target.mode_info_idx
}

pub fn set_target_mode_index(path: &mut Path, index: Option<u32>) {
    path.target.mode_info_idx = index;
}

pub fn desktop_mode_index(path: &Path) -> Option<u32> {
    path.target.desktop_mode_info_idx
}

pub fn set_desktop_mode_index(path: &mut Path, index: Option<u32>) {
    path.target.desktop_mode_info_idx = index;
}

/// Resolves a source mode index to the `SourceModeInfo` it points at, or `None` if the
/// index is absent, out of bounds, or doesn't name a source-typed entry.
pub fn get_source_mode(index: Option<u32>, modes: &[ModeInfo]) -> Option<&SourceModeInfo> {
    let index = index? as usize;
    match modes.get(index) {
        Some(ModeInfo::Source(source)) => Some(source),
        Some(ModeInfo::Target(_)) => {
            tracing::warn!(index, "mode index points at a target mode, expected source");
            None
        }
        None => {
            tracing::warn!(index, len = modes.len(), "source mode index out of bounds");
            None
        }
    }
}

/// Looks up the (device_id, device_path, display_name) triple for a path, applying the
/// "valid path" rule: must be target-available, non-empty identifiers, and (if
/// `must_be_active`) currently active.
fn device_info_for_valid_path(
    platform: &dyn PlatformApi,
    path: &Path,
    must_be_active: bool,
) -> Option<(String, String, String)> {
    if !is_available(path) {
        return None;
    }
    if must_be_active && !is_active(path) {
        return None;
    }
    let device_id = platform.get_device_id(path);
    let device_path = platform.get_monitor_device_path(path);
    let display_name = platform.get_display_name(path);
    if device_id.is_empty() || device_path.is_empty() || display_name.is_empty() {
        return None;
    }
    Some((device_id, device_path, display_name))
}

fn adapter_key(adapter_id: AdapterId) -> (i32, u32) {
    (adapter_id.high_part, adapter_id.low_part)
}

/// Collects, per device_id, which source ids are reachable on which path index and which
/// one is currently active. Fails (returns an empty map) on any of the bijection/ordering
/// invariants from the spec being violated.
pub fn collect_source_data(paths: &[Path], platform: &dyn PlatformApi) -> PathSourceIndexDataMap {
    let mut by_device_id: PathSourceIndexDataMap = HashMap::new();
    let mut device_path_to_id: HashMap<String, String> = HashMap::new();
    let mut seen_inactive: std::collections::HashSet<String> = std::collections::HashSet::new();

    for (path_index, path) in paths.iter().enumerate() {
        let Some((device_id, device_path, _display_name)) =
            device_info_for_valid_path(platform, path, false)
        else {
            continue;
        };

        match device_path_to_id.get(&device_path) {
            Some(existing) if existing != &device_id => {
                tracing::warn!(device_path, "device path maps to more than one device id");
                return PathSourceIndexDataMap::new();
            }
            Some(_) => {}
            None => {
                device_path_to_id.insert(device_path.clone(), device_id.clone());
            }
        }

        let adapter_id = adapter_key(path.source.adapter_id);
        let source_id = path.source.id;
        let active = is_active(path);

        match by_device_id.get_mut(&device_id) {
            Some(entry) => {
                if entry.adapter_id != adapter_id {
                    tracing::warn!(device_id, "path adapter mismatch for device");
                    return PathSourceIndexDataMap::new();
                }
                if active && seen_inactive.contains(&device_id) {
                    tracing::warn!(device_id, "active path found after inactive path");
                    return PathSourceIndexDataMap::new();
                }
                if entry.source_id_to_path_index.contains_key(&source_id) {
                    tracing::warn!(device_id, source_id, "duplicate source id for device");
                    return PathSourceIndexDataMap::new();
                }
                entry.source_id_to_path_index.insert(source_id, path_index);
                if active {
                    entry.active_source_id.get_or_insert(source_id);
                } else {
                    seen_inactive.insert(device_id);
                }
            }
            None => {
                let mut data = PathSourceIndexData {
                    source_id_to_path_index: Default::default(),
                    adapter_id,
                    active_source_id: None,
                };
                data.source_id_to_path_index.insert(source_id, path_index);
                if active {
                    data.active_source_id = Some(source_id);
                } else {
                    seen_inactive.insert(device_id.clone());
                }
                by_device_id.insert(device_id, data);
            }
        }
    }

    by_device_id
}

/// Builds the path set that commits `new_topology`, drawing source ids from
/// `path_source_data` and reusing entries from `input_paths`. Returns `None` if no valid
/// assignment exists (e.g. a group can't agree on a shared source id).
pub fn make_paths_for_new_topology(
    new_topology: &ActiveTopology,
    path_source_data: &PathSourceIndexDataMap,
    input_paths: &[Path],
) -> Option<Vec<Path>> {
    let mut used_source_ids_per_adapter: HashMap<(i32, u32), std::collections::HashSet<u32>> =
        HashMap::new();
    let mut result = Vec::new();

    for (clone_group_id, group) in new_topology.iter().enumerate() {
        let clone_group_id = clone_group_id as u32;

        let mut candidate_adapters: Option<std::collections::HashSet<(i32, u32)>> = None;
        for device_id in group {
            let data = path_source_data.get(device_id)?;
            let adapters: std::collections::HashSet<(i32, u32)> = [data.adapter_id].into_iter().collect();
            candidate_adapters = Some(match candidate_adapters {
                Some(existing) => existing.intersection(&adapters).copied().collect(),
                None => adapters,
            });
        }
        let candidate_adapters = candidate_adapters?;
        if candidate_adapters.is_empty() {
            return None;
        }

        let mut chosen_source_id = None;
        'adapter: for adapter_id in &candidate_adapters {
            let used = used_source_ids_per_adapter.entry(*adapter_id).or_default();

            let mut common_source_ids: Option<std::collections::HashSet<u32>> = None;
            for device_id in group {
                let data = path_source_data.get(device_id)?;
                if data.adapter_id != *adapter_id {
                    continue 'adapter;
                }
                let ids: std::collections::HashSet<u32> =
                    data.source_id_to_path_index.keys().copied().collect();
                common_source_ids = Some(match common_source_ids {
                    Some(existing) => existing.intersection(&ids).copied().collect(),
                    None => ids,
                });
            }
            let Some(common_source_ids) = common_source_ids else {
                continue;
            };

            let preferred = group
                .iter()
                .filter_map(|device_id| path_source_data.get(device_id))
                .find_map(|data| data.active_source_id)
                .filter(|id| common_source_ids.contains(id) && !used.contains(id));

            let pick = preferred.or_else(|| common_source_ids.iter().find(|id| !used.contains(id)).copied());

            if let Some(source_id) = pick {
                used.insert(source_id);
                chosen_source_id = Some((*adapter_id, source_id));
                break;
            }
        }

        let (adapter_id, source_id) = chosen_source_id?;

        for device_id in group {
            let data = path_source_data.get(device_id)?;
            let path_index = *data.source_id_to_path_index.get(&source_id)?;
            let mut path = input_paths.get(path_index)?.clone();

            set_active(&mut path, true);
            set_clone_group_id(&mut path, Some(clone_group_id));
            path.source.adapter_id = AdapterId {
                high_part: adapter_id.0,
                low_part: adapter_id.1,
            };
            path.source.id = source_id;
            // The path's prior mode indexes were assigned under the old topology and may
            // no longer point at the right slots once this path set is committed; reset
            // them to invalid and let the OS re-resolve them on commit.
            set_source_mode_index(&mut path, None);
            set_target_mode_index(&mut path, None);
            set_desktop_mode_index(&mut path, None);

            result.push(path);
        }
    }

    Some(result)
}
