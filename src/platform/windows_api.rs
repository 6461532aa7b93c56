//! Win32 implementation of [`super::PlatformApi`] backed by `QueryDisplayConfig` /
//! `SetDisplayConfig` / `DisplayConfigGetDeviceInfo`.

use std::os::windows::ffi::OsStringExt;

use sha2::{Digest, Sha256};
use windows::Win32::Devices::Display::{
    DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME, DISPLAYCONFIG_DEVICE_INFO_GET_TARGET_NAME,
    DISPLAYCONFIG_DEVICE_INFO_HEADER, DISPLAYCONFIG_MODE_INFO, DISPLAYCONFIG_MODE_INFO_TYPE_SOURCE,
    DISPLAYCONFIG_MODE_INFO_TYPE_TARGET, DISPLAYCONFIG_PATH_INFO, DISPLAYCONFIG_RATIONAL,
    DISPLAYCONFIG_SOURCE_DEVICE_NAME, DISPLAYCONFIG_TARGET_DEVICE_NAME, DisplayConfigGetDeviceInfo,
    GetDisplayConfigBufferSizes, QDC_ALL_PATHS, QDC_ONLY_ACTIVE_PATHS, QueryDisplayConfig, SDC_APPLY,
    SDC_USE_SUPPLIED_DISPLAY_CONFIG, SetDisplayConfig,
};
use windows::Win32::Foundation::{ERROR_INSUFFICIENT_BUFFER, ERROR_SUCCESS, HLOCAL, LocalFree, WIN32_ERROR};
use windows::Win32::Graphics::Gdi::{
    DISPLAYCONFIG_PATH_ACTIVE, DISPLAYCONFIG_PATH_CLONE_GROUP_INVALID,
    DISPLAYCONFIG_PATH_DESKTOP_IMAGE_IDX_INVALID, DISPLAYCONFIG_PATH_MODE_IDX_INVALID,
    DISPLAYCONFIG_PATH_SOURCE_MODE_IDX_INVALID, DISPLAYCONFIG_PATH_TARGET_MODE_IDX_INVALID,
    DISPLAYCONFIG_SOURCE_IN_USE,
};
use windows::Win32::System::Diagnostics::Debug::{
    FORMAT_MESSAGE_ALLOCATE_BUFFER, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
    FormatMessageW,
};
use windows::core::PWSTR;

use super::{
    AdapterId, DisplayConfig, ModeInfo, Path, PlatformApi, QueryType, SetConfigOutcome,
    SourceModeInfo, SourcePathInfo, TargetModeInfo, TargetPathInfo,
};
use crate::types::{EdidData, Rational};

pub fn windows_error_to_string(error: WIN32_ERROR) -> String {
    use winapi::um::winnt::{LANG_NEUTRAL, MAKELANGID, SUBLANG_DEFAULT};

    let mut error_text: PWSTR = PWSTR(std::ptr::null_mut());
    unsafe {
        let num_chars = FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_ALLOCATE_BUFFER | FORMAT_MESSAGE_IGNORE_INSERTS,
            None,
            error.0,
            MAKELANGID(LANG_NEUTRAL, SUBLANG_DEFAULT).into(),
            PWSTR((&mut error_text) as *mut PWSTR as *mut _),
            0,
            None,
        );
        if num_chars == 0 {
            return format!("0x{:x}", error.0);
        }
        let string = std::ffi::OsString::from_wide(std::slice::from_raw_parts(error_text.0, num_chars as _));
        let _ = LocalFree(Some(HLOCAL(error_text.0 as *mut _)));
        format!("0x{:x} {}", error.0, string.to_string_lossy())
    }
}

fn adapter_id_from_luid(luid: windows::Win32::Foundation::LUID) -> AdapterId {
    AdapterId {
        low_part: luid.LowPart,
        high_part: luid.HighPart,
    }
}

fn luid_from_adapter_id(adapter_id: AdapterId) -> windows::Win32::Foundation::LUID {
    windows::Win32::Foundation::LUID {
        LowPart: adapter_id.low_part,
        HighPart: adapter_id.high_part,
    }
}

fn wchar_null_terminated_to_string(slice: &[u16]) -> String {
    let end = slice.iter().position(|&c| c == 0).unwrap_or(slice.len());
    String::from_utf16_lossy(&slice[..end])
}

fn get_target_device_name(
    id: u32,
    adapter_id: windows::Win32::Foundation::LUID,
) -> windows::core::Result<DISPLAYCONFIG_TARGET_DEVICE_NAME> {
    let mut device_name = DISPLAYCONFIG_TARGET_DEVICE_NAME {
        header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
            r#type: DISPLAYCONFIG_DEVICE_INFO_GET_TARGET_NAME,
            size: std::mem::size_of::<DISPLAYCONFIG_TARGET_DEVICE_NAME>() as u32,
            adapterId: adapter_id,
            id,
        },
        ..Default::default()
    };
    unsafe {
        let result = DisplayConfigGetDeviceInfo(&mut device_name.header as *mut _);
        if result != ERROR_SUCCESS.0 as i32 {
            return Err(windows::core::Error::from(WIN32_ERROR(result as u32)));
        }
    }
    Ok(device_name)
}

fn get_source_device_name(
    id: u32,
    adapter_id: windows::Win32::Foundation::LUID,
) -> windows::core::Result<DISPLAYCONFIG_SOURCE_DEVICE_NAME> {
    let mut device_name = DISPLAYCONFIG_SOURCE_DEVICE_NAME {
        header: DISPLAYCONFIG_DEVICE_INFO_HEADER {
            r#type: DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME,
            size: std::mem::size_of::<DISPLAYCONFIG_SOURCE_DEVICE_NAME>() as u32,
            adapterId: adapter_id,
            id,
        },
        ..Default::default()
    };
    unsafe {
        let result = DisplayConfigGetDeviceInfo(&mut device_name.header as *mut _);
        if result != ERROR_SUCCESS.0 as i32 {
            return Err(windows::core::Error::from(WIN32_ERROR(result as u32)));
        }
    }
    Ok(device_name)
}

/// Production display-configuration backend. Stateless beyond the handle to the OS APIs
/// it wraps; every call re-queries the live configuration.
#[derive(Debug, Default)]
pub struct WindowsPlatformApi;

impl WindowsPlatformApi {
    pub fn new() -> Self {
        Self
    }

    fn raw_query(&self, query_type: QueryType) -> windows::core::Result<(Vec<DISPLAYCONFIG_PATH_INFO>, Vec<DISPLAYCONFIG_MODE_INFO>)> {
        let flags = match query_type {
            QueryType::Active => QDC_ONLY_ACTIVE_PATHS,
            QueryType::All => QDC_ALL_PATHS,
        };
        unsafe {
            loop {
                let mut num_paths = 0u32;
                let mut num_modes = 0u32;
                let sizes_result = GetDisplayConfigBufferSizes(flags, &mut num_paths, &mut num_modes);
                if sizes_result != ERROR_SUCCESS {
                    return Err(windows::core::Error::from(sizes_result));
                }

                let mut paths: Vec<DISPLAYCONFIG_PATH_INFO> = Vec::with_capacity(num_paths as usize);
                let mut modes: Vec<DISPLAYCONFIG_MODE_INFO> = Vec::with_capacity(num_modes as usize);

                let query_result = QueryDisplayConfig(
                    flags,
                    &mut num_paths,
                    paths.as_mut_ptr(),
                    &mut num_modes,
                    modes.as_mut_ptr(),
                    None,
                );
                if query_result == ERROR_INSUFFICIENT_BUFFER {
                    continue;
                }
                if query_result != ERROR_SUCCESS {
                    return Err(windows::core::Error::from(query_result));
                }

                paths.set_len(num_paths as usize);
                modes.set_len(num_modes as usize);
                return Ok((paths, modes));
            }
        }
    }

}

/// Bit 2 of `DISPLAYCONFIG_TARGET_DEVICE_NAME.flags` marks `edidManufactureId`/
/// `edidProductCodeId` as populated; unset on targets the OS can't query EDID for.
fn is_target_device_edid_ids_valid(flags: windows::Win32::Devices::Display::DISPLAYCONFIG_TARGET_DEVICE_NAME_FLAGS) -> bool {
    unsafe { flags.Anonymous.value & 0x4 != 0 }
}

fn to_path(path: &DISPLAYCONFIG_PATH_INFO) -> Path {
    // Both the source and target sides carry their mode index (and clone-group-id /
    // desktop-mode-index) in a packed bitfield (`Anonymous.Anonymous`) alongside the flat
    // `Anonymous.modeInfoIdx` union variant; the flat variant aliases only *one* of the
    // packed sub-fields, so reading distinct fields requires going through the nested
    // struct on both sides, not the flat field twice.
    let (source_mode_idx, clone_group_id) = unsafe {
        (
            path.sourceInfo.Anonymous.Anonymous.sourceModeInfoIdx,
            path.sourceInfo.Anonymous.Anonymous.cloneGroupId,
        )
    };
    let (target_mode_idx, desktop_mode_idx) = unsafe {
        (
            path.targetInfo.Anonymous.Anonymous.targetModeInfoIdx,
            path.targetInfo.Anonymous.Anonymous.desktopModeInfoIdx,
        )
    };

    Path {
        source: SourcePathInfo {
            adapter_id: adapter_id_from_luid(path.sourceInfo.adapterId),
            id: path.sourceInfo.id,
            mode_info_idx: if source_mode_idx == DISPLAYCONFIG_PATH_SOURCE_MODE_IDX_INVALID {
                None
            } else {
                Some(source_mode_idx)
            },
            clone_group_id: if clone_group_id == DISPLAYCONFIG_PATH_CLONE_GROUP_INVALID {
                None
            } else {
                Some(clone_group_id)
            },
            in_use: path.sourceInfo.statusFlags != 0,
        },
        target: TargetPathInfo {
            adapter_id: adapter_id_from_luid(path.targetInfo.adapterId),
            id: path.targetInfo.id,
            mode_info_idx: if target_mode_idx == DISPLAYCONFIG_PATH_TARGET_MODE_IDX_INVALID
                || target_mode_idx == DISPLAYCONFIG_PATH_MODE_IDX_INVALID
            {
                None
            } else {
                Some(target_mode_idx)
            },
            desktop_mode_info_idx: if desktop_mode_idx == DISPLAYCONFIG_PATH_DESKTOP_IMAGE_IDX_INVALID {
                None
            } else {
                Some(desktop_mode_idx)
            },
            target_available: path.targetInfo.targetAvailable.as_bool(),
        },
        active: path.flags & DISPLAYCONFIG_PATH_ACTIVE.0 != 0,
    }
}

fn to_mode(mode: &DISPLAYCONFIG_MODE_INFO) -> Option<ModeInfo> {
    let adapter_id = adapter_id_from_luid(mode.adapterId);
    unsafe {
        if mode.infoType == DISPLAYCONFIG_MODE_INFO_TYPE_SOURCE {
            let source = mode.Anonymous.sourceMode;
            Some(ModeInfo::Source(SourceModeInfo {
                adapter_id,
                id: mode.id,
                width: source.width,
                height: source.height,
                position_x: source.position.x,
                position_y: source.position.y,
            }))
        } else if mode.infoType == DISPLAYCONFIG_MODE_INFO_TYPE_TARGET {
            let target = mode.Anonymous.targetMode;
            let rational = target.targetVideoSignalInfo.vSyncFreq;
            Some(ModeInfo::Target(TargetModeInfo {
                adapter_id,
                id: mode.id,
                refresh_rate: Rational::new(rational.Numerator, rational.Denominator.max(1)),
            }))
        } else {
            None
        }
    }
}

impl PlatformApi for WindowsPlatformApi {
    fn query(&self, query_type: QueryType) -> Option<DisplayConfig> {
        match self.raw_query(query_type) {
            Ok((paths, modes)) => Some(DisplayConfig {
                paths: paths.iter().map(to_path).collect(),
                modes: modes.iter().filter_map(to_mode).collect(),
            }),
            Err(error) => {
                tracing::warn!(%error, "QueryDisplayConfig failed");
                None
            }
        }
    }

    fn get_error_string(&self, code: i64) -> String {
        windows_error_to_string(WIN32_ERROR(code as u32))
    }

    fn get_device_id(&self, path: &Path) -> String {
        let luid = luid_from_adapter_id(path.target.adapter_id);
        let Ok(name) = get_target_device_name(path.target.id, luid) else {
            return String::new();
        };
        let instance_name = wchar_null_terminated_to_string(&name.monitorDevicePath);

        let mut hasher = Sha256::new();
        hasher.update(instance_name.as_bytes());
        if is_target_device_edid_ids_valid(name.flags) {
            hasher.update(name.edidManufactureId.to_be_bytes());
            hasher.update(name.edidProductCodeId.to_be_bytes());
        }
        let digest = hasher.finalize();
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    fn get_edid(&self, path: &Path) -> Option<EdidData> {
        let luid = luid_from_adapter_id(path.target.adapter_id);
        let name = get_target_device_name(path.target.id, luid).ok()?;
        if !is_target_device_edid_ids_valid(name.flags) {
            return None;
        }
        EdidData::from_windows_ids(name.edidManufactureId, name.edidProductCodeId)
    }

    fn get_monitor_device_path(&self, path: &Path) -> String {
        let luid = luid_from_adapter_id(path.target.adapter_id);
        get_target_device_name(path.target.id, luid)
            .map(|name| wchar_null_terminated_to_string(&name.monitorDevicePath))
            .unwrap_or_default()
    }

    fn get_friendly_name(&self, path: &Path) -> String {
        let luid = luid_from_adapter_id(path.target.adapter_id);
        get_target_device_name(path.target.id, luid)
            .map(|name| wchar_null_terminated_to_string(&name.monitorFriendlyDeviceName))
            .unwrap_or_default()
    }

    fn get_display_name(&self, path: &Path) -> String {
        let luid = luid_from_adapter_id(path.source.adapter_id);
        get_source_device_name(path.source.id, luid)
            .map(|name| wchar_null_terminated_to_string(&name.viewGdiDeviceName))
            .unwrap_or_default()
    }

    fn set_display_config(&self, paths: &[Path], modes: &[ModeInfo]) -> SetConfigOutcome {
        let mut raw_paths: Vec<DISPLAYCONFIG_PATH_INFO> = Vec::with_capacity(paths.len());
        for path in paths {
            let mut raw = DISPLAYCONFIG_PATH_INFO::default();
            raw.sourceInfo.adapterId = luid_from_adapter_id(path.source.adapter_id);
            raw.sourceInfo.id = path.source.id;
            unsafe {
                raw.sourceInfo.Anonymous.Anonymous.sourceModeInfoIdx = path
                    .source
                    .mode_info_idx
                    .unwrap_or(DISPLAYCONFIG_PATH_SOURCE_MODE_IDX_INVALID);
                raw.sourceInfo.Anonymous.Anonymous.cloneGroupId = path
                    .source
                    .clone_group_id
                    .unwrap_or(DISPLAYCONFIG_PATH_CLONE_GROUP_INVALID);
            }
            if path.source.in_use {
                raw.sourceInfo.statusFlags |= DISPLAYCONFIG_SOURCE_IN_USE;
            }

            raw.targetInfo.adapterId = luid_from_adapter_id(path.target.adapter_id);
            raw.targetInfo.id = path.target.id;
            unsafe {
                raw.targetInfo.Anonymous.Anonymous.targetModeInfoIdx = path
                    .target
                    .mode_info_idx
                    .unwrap_or(DISPLAYCONFIG_PATH_TARGET_MODE_IDX_INVALID);
                raw.targetInfo.Anonymous.Anonymous.desktopModeInfoIdx = path
                    .target
                    .desktop_mode_info_idx
                    .unwrap_or(DISPLAYCONFIG_PATH_DESKTOP_IMAGE_IDX_INVALID);
            }
            raw.targetInfo.targetAvailable = path.target.target_available.into();
            if path.active {
                raw.flags |= DISPLAYCONFIG_PATH_ACTIVE.0;
            }
            raw_paths.push(raw);
        }

        let mut raw_modes: Vec<DISPLAYCONFIG_MODE_INFO> = Vec::with_capacity(modes.len());
        for mode in modes {
            let mut raw = DISPLAYCONFIG_MODE_INFO::default();
            match mode {
                ModeInfo::Source(source) => {
                    raw.infoType = DISPLAYCONFIG_MODE_INFO_TYPE_SOURCE;
                    raw.id = source.id;
                    raw.adapterId = luid_from_adapter_id(source.adapter_id);
                    unsafe {
                        raw.Anonymous.sourceMode.width = source.width;
                        raw.Anonymous.sourceMode.height = source.height;
                        raw.Anonymous.sourceMode.position.x = source.position_x;
                        raw.Anonymous.sourceMode.position.y = source.position_y;
                    }
                }
                ModeInfo::Target(target) => {
                    raw.infoType = DISPLAYCONFIG_MODE_INFO_TYPE_TARGET;
                    raw.id = target.id;
                    raw.adapterId = luid_from_adapter_id(target.adapter_id);
                    unsafe {
                        raw.Anonymous.targetMode.targetVideoSignalInfo.vSyncFreq = DISPLAYCONFIG_RATIONAL {
                            Numerator: target.refresh_rate.numerator,
                            Denominator: target.refresh_rate.denominator,
                        };
                    }
                }
            }
            raw_modes.push(raw);
        }

        let result = unsafe {
            SetDisplayConfig(
                Some(&raw_paths),
                Some(&raw_modes),
                SDC_APPLY | SDC_USE_SUPPLIED_DISPLAY_CONFIG,
            )
        };
        match WIN32_ERROR(result as u32) {
            ERROR_SUCCESS => SetConfigOutcome::Ok,
            code if code == ERROR_INSUFFICIENT_BUFFER => SetConfigOutcome::ApiTemporarilyUnavailable,
            code => {
                tracing::warn!(error = %windows_error_to_string(code), "SetDisplayConfig failed");
                SetConfigOutcome::Failed
            }
        }
    }
}

