//! Single-display configuration control plane: queries the OS display topology, applies a
//! caller-requested resolution/refresh-rate/HDR/role change to one device, and reverts it
//! later — transactionally, and persisted across process restarts.

pub mod display_device;
pub mod edid;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod platform;
pub mod retry_scheduler;
pub mod settings_engine;
pub mod topology;
pub mod types;

use platform::{PlatformApi, QueryType};
use types::{EnumeratedDevice, EnumeratedDeviceInfo};

pub use display_device::DisplayDevice;
pub use error::{ApplyResult, RevertResult};
pub use settings_engine::{EnabledWorkarounds, SettingsEngine};
pub use types::{DevicePreparation, FloatingPoint, Rational, Resolution, SingleDisplayConfiguration};

/// Enumerates every display device the platform currently reports, active or not.
pub fn enum_available_devices(platform: &dyn PlatformApi) -> Vec<EnumeratedDevice> {
    let Some(config) = platform.query(QueryType::All) else {
        return Vec::new();
    };
    let facade = DisplayDevice::new(platform);

    let mut result = Vec::new();
    for path in &config.paths {
        if !topology::is_available(path) {
            continue;
        }
        let device_id = platform.get_device_id(path);
        let device_path = platform.get_monitor_device_path(path);
        let display_name = platform.get_display_name(path);
        if device_id.is_empty() || device_path.is_empty() {
            continue;
        }
        let friendly_name = platform.get_friendly_name(path);

        let info = if topology::is_active(path) {
            let modes = facade.get_current_display_modes(&[device_id.clone()]);
            let hdr = facade.get_current_hdr_states(&[device_id.clone()]);
            modes.get(&device_id).map(|mode| EnumeratedDeviceInfo {
                resolution: mode.resolution,
                resolution_scale: FloatingPoint::Double(1.0),
                refresh_rate: FloatingPoint::Rational(mode.refresh_rate),
                primary: facade.is_primary(&device_id),
                origin_point: topology::get_source_mode(topology::source_mode_index(path), &config.modes)
                    .map(|mode| types::Point { x: mode.position_x, y: mode.position_y })
                    .unwrap_or(types::Point { x: 0, y: 0 }),
                hdr_state: hdr.get(&device_id).copied().flatten(),
            })
        } else {
            None
        };

        let edid = platform.get_edid(path);

        result.push(EnumeratedDevice {
            device_id,
            display_name,
            friendly_name,
            edid,
            info,
        });
    }
    result
}

/// Looks up the OS-assigned display name for a device id; empty if inactive or unknown.
pub fn get_display_name(platform: &dyn PlatformApi, device_id: &str) -> String {
    let Some(config) = platform.query(QueryType::Active) else {
        return String::new();
    };
    config
        .paths
        .iter()
        .find(|path| platform.get_device_id(path) == device_id)
        .map(|path| platform.get_display_name(path))
        .unwrap_or_default()
}
