//! End-to-end scenarios spanning multiple modules: apply + revert round-trips, topology
//! canonical equality, and persistence lifecycle, driven against the mock platform.

use display_device::display_device::DisplayDevice;
use display_device::persistence::FileSettingsPersistence;
use display_device::platform::mock::{MockPlatformApi, MockTargetInfo};
use display_device::platform::{AdapterId, DisplayConfig, ModeInfo, Path, SourceModeInfo, SourcePathInfo, TargetModeInfo, TargetPathInfo};
use display_device::settings_engine::{EnabledWorkarounds, SettingsEngine};
use display_device::types::{DevicePreparation, EnumeratedDevice, EnumeratedDeviceInfo, FloatingPoint, HdrState, Point, Rational, Resolution, SingleDisplayConfiguration};
use display_device::{ApplyResult, RevertResult};

fn adapter(n: u32) -> AdapterId {
    AdapterId { low_part: n, high_part: 0 }
}

/// Three devices: DeviceId1+DeviceId2 duplicated as the initial primary group,
/// DeviceId3 extended, DeviceId4 available but inactive.
fn three_active_one_inactive() -> (MockPlatformApi, Vec<EnumeratedDevice>) {
    let api = MockPlatformApi::new();
    let adapter_id = adapter(1);

    for (target_id, device_id) in [(10u32, "DeviceId1"), (11, "DeviceId2"), (12, "DeviceId3"), (13, "DeviceId4")] {
        api.register_target(
            adapter_id,
            target_id,
            MockTargetInfo {
                device_id: device_id.into(),
                monitor_device_path: format!("path-{device_id}"),
                friendly_name: device_id.into(),
                display_name: format!("\\\\.\\DISPLAY{target_id}"),
                edid: None,
            },
        );
    }

    let path1 = Path {
        source: SourcePathInfo { adapter_id, id: 0, mode_info_idx: Some(0), clone_group_id: Some(0), in_use: true },
        target: TargetPathInfo { adapter_id, id: 10, mode_info_idx: Some(3), desktop_mode_info_idx: None, target_available: true },
        active: true,
    };
    let path2 = Path {
        source: SourcePathInfo { adapter_id, id: 0, mode_info_idx: Some(0), clone_group_id: Some(0), in_use: true },
        target: TargetPathInfo { adapter_id, id: 11, mode_info_idx: Some(4), desktop_mode_info_idx: None, target_available: true },
        active: true,
    };
    let path3 = Path {
        source: SourcePathInfo { adapter_id, id: 1, mode_info_idx: Some(1), clone_group_id: Some(1), in_use: true },
        target: TargetPathInfo { adapter_id, id: 12, mode_info_idx: Some(5), desktop_mode_info_idx: None, target_available: true },
        active: true,
    };
    let path4_inactive = Path {
        source: SourcePathInfo { adapter_id, id: 2, mode_info_idx: Some(2), clone_group_id: None, in_use: false },
        target: TargetPathInfo { adapter_id, id: 13, mode_info_idx: Some(6), desktop_mode_info_idx: None, target_available: true },
        active: false,
    };

    let modes = vec![
        ModeInfo::Source(SourceModeInfo { adapter_id, id: 0, width: 1920, height: 1080, position_x: 0, position_y: 0 }),
        ModeInfo::Source(SourceModeInfo { adapter_id, id: 1, width: 1280, height: 720, position_x: 1920, position_y: 0 }),
        ModeInfo::Source(SourceModeInfo { adapter_id, id: 2, width: 1920, height: 1080, position_x: 3200, position_y: 0 }),
        ModeInfo::Target(TargetModeInfo { adapter_id, id: 10, refresh_rate: Rational::new(60, 1) }),
        ModeInfo::Target(TargetModeInfo { adapter_id, id: 11, refresh_rate: Rational::new(60, 1) }),
        ModeInfo::Target(TargetModeInfo { adapter_id, id: 12, refresh_rate: Rational::new(60, 1) }),
        ModeInfo::Target(TargetModeInfo { adapter_id, id: 13, refresh_rate: Rational::new(60, 1) }),
    ];

    let active = DisplayConfig { paths: vec![path1.clone(), path2.clone(), path3.clone()], modes: modes.clone() };
    let all = DisplayConfig { paths: vec![path1, path2, path3, path4_inactive], modes };
    api.set_config(active, all);

    let devices = vec![
        EnumeratedDevice {
            device_id: "DeviceId1".into(),
            display_name: "\\\\.\\DISPLAY10".into(),
            friendly_name: "DeviceId1".into(),
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
            device_id: "DeviceId2".into(),
            display_name: "\\\\.\\DISPLAY11".into(),
            friendly_name: "DeviceId2".into(),
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
            device_id: "DeviceId3".into(),
            display_name: "\\\\.\\DISPLAY12".into(),
            friendly_name: "DeviceId3".into(),
            edid: None,
            info: Some(EnumeratedDeviceInfo {
                resolution: Resolution { width: 1280, height: 720 },
                resolution_scale: FloatingPoint::Double(1.0),
                refresh_rate: FloatingPoint::Double(60.0),
                primary: false,
                origin_point: Point { x: 1920, y: 0 },
                hdr_state: Some(HdrState::Disabled),
            }),
        },
        EnumeratedDevice {
            device_id: "DeviceId4".into(),
            display_name: String::new(),
            friendly_name: "DeviceId4".into(),
            edid: None,
            info: None,
        },
    ];

    (api, devices)
}

fn temp_persistence(name: &str) -> FileSettingsPersistence {
    let dir = std::env::temp_dir().join(format!("display-device-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let store = FileSettingsPersistence::new(path);
    store.clear();
    store
}

#[test]
fn apply_ensure_only_display_then_revert_restores_topology_and_clears_persistence() {
    let (api, devices) = three_active_one_inactive();
    let facade = DisplayDevice::new(&api);
    let persistence = temp_persistence("apply_revert_round_trip.json");
    let mut engine = SettingsEngine::new(persistence.clone(), EnabledWorkarounds::default());

    let initial_topology = facade.get_current_topology();

    let config = SingleDisplayConfiguration {
        device_id: "DeviceId4".into(),
        device_prep: DevicePreparation::EnsureOnlyDisplay,
        resolution: Some(Resolution { width: 1920, height: 1080 }),
        refresh_rate: Some(FloatingPoint::Double(120.0)),
        hdr_state: Some(HdrState::Enabled),
    };

    let apply_result = engine.apply_settings(&facade, &devices, &config);
    assert_eq!(apply_result, ApplyResult::Ok);
    assert!(persistence.load().unwrap().len() > 0);

    let after_apply_topology = facade.get_current_topology();
    let expected_after_apply = vec![vec!["DeviceId4".to_string()]];
    assert!(facade.is_topology_the_same(&after_apply_topology, &expected_after_apply));

    let revert_result = engine.revert_settings(&facade, &devices);
    assert_eq!(revert_result, RevertResult::Ok);

    let after_revert_topology = facade.get_current_topology();
    assert!(facade.is_topology_the_same(&after_revert_topology, &initial_topology));
    assert_eq!(persistence.load(), Some(Vec::new()));

    persistence.clear();
}

#[test]
fn topology_canonical_equality_matches_spec_examples() {
    let (api, _) = three_active_one_inactive();
    let facade = DisplayDevice::new(&api);

    let a = vec![vec!["A".to_string(), "B".to_string()], vec!["C".to_string()]];
    let b = vec![vec!["C".to_string()], vec!["B".to_string(), "A".to_string()]];
    assert!(facade.is_topology_the_same(&a, &b));

    let c = vec![vec!["A".to_string(), "B".to_string()]];
    let d = vec![vec!["A".to_string()], vec!["B".to_string()]];
    assert!(!facade.is_topology_the_same(&c, &d));
}

#[test]
fn revert_with_missing_device_prunes_it_from_the_restored_topology() {
    let (api, mut devices) = three_active_one_inactive();
    let facade = DisplayDevice::new(&api);
    let persistence = temp_persistence("revert_prunes_missing_device.json");
    let mut engine = SettingsEngine::new(persistence.clone(), EnabledWorkarounds::default());

    let config = SingleDisplayConfiguration {
        device_id: "DeviceId4".into(),
        device_prep: DevicePreparation::EnsureActive,
        resolution: None,
        refresh_rate: None,
        hdr_state: None,
    };
    assert_eq!(engine.apply_settings(&facade, &devices, &config), ApplyResult::Ok);

    devices.retain(|d| d.device_id != "DeviceId3");

    let result = engine.revert_settings(&facade, &devices);
    assert_eq!(result, RevertResult::Ok);

    persistence.clear();
}
