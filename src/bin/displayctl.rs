//! Diagnostic CLI over the display-device control plane.

use anyhow::Result;
use clap::{Parser, Subcommand};

use display_device::platform::PlatformApi;
use display_device::settings_engine::{EnabledWorkarounds, SettingsEngine};
use display_device::{ApplyResult, DevicePreparation, DisplayDevice, RevertResult, SingleDisplayConfiguration};
use display_device::{FloatingPoint, Rational, Resolution};
use display_device::persistence::FileSettingsPersistence;
use display_device::types::HdrState;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List every display device the platform currently reports.
    List,
    /// Apply a single-display configuration request.
    Apply {
        #[arg(long)]
        device_id: String,
        #[arg(long, value_enum)]
        prep: PrepArg,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        #[arg(long)]
        refresh_rate: Option<f64>,
        #[arg(long)]
        hdr: Option<HdrArg>,
    },
    /// Revert to the last captured baseline.
    Revert,
    /// Discard persisted state without reverting.
    ResetPersistence,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PrepArg {
    VerifyOnly,
    EnsureActive,
    EnsurePrimary,
    EnsureOnlyDisplay,
}

impl From<PrepArg> for DevicePreparation {
    fn from(value: PrepArg) -> Self {
        match value {
            PrepArg::VerifyOnly => DevicePreparation::VerifyOnly,
            PrepArg::EnsureActive => DevicePreparation::EnsureActive,
            PrepArg::EnsurePrimary => DevicePreparation::EnsurePrimary,
            PrepArg::EnsureOnlyDisplay => DevicePreparation::EnsureOnlyDisplay,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum HdrArg {
    Enabled,
    Disabled,
}

impl From<HdrArg> for HdrState {
    fn from(value: HdrArg) -> Self {
        match value {
            HdrArg::Enabled => HdrState::Enabled,
            HdrArg::Disabled => HdrState::Disabled,
        }
    }
}

fn persistence_path() -> std::path::PathBuf {
    std::path::PathBuf::from("display-device-state.json")
}

#[cfg(windows)]
fn platform() -> display_device::platform::windows_api::WindowsPlatformApi {
    display_device::platform::windows_api::WindowsPlatformApi::new()
}

#[cfg(not(windows))]
fn platform() -> ! {
    eprintln!("displayctl only talks to a real display on Windows");
    std::process::exit(1);
}

fn main() -> Result<()> {
    let _guard = display_device::logging::setup();
    let args = Args::parse();

    let code = match args.command {
        Some(Command::List) => run_list()?,
        Some(Command::Apply { device_id, prep, width, height, refresh_rate, hdr }) => {
            run_apply(device_id, prep.into(), width, height, refresh_rate, hdr.map(Into::into))?
        }
        Some(Command::Revert) => run_revert()?,
        Some(Command::ResetPersistence) => run_reset_persistence()?,
        None => {
            eprintln!("no subcommand given; try `displayctl list`");
            1
        }
    };
    std::process::exit(code);
}

#[cfg(windows)]
fn run_list() -> Result<i32> {
    let api = platform();
    for device in display_device::enum_available_devices(&api) {
        println!("{} ({}) [{}]", device.device_id, device.friendly_name, device.display_name);
    }
    Ok(0)
}

#[cfg(not(windows))]
fn run_list() -> Result<i32> {
    platform()
}

#[cfg(windows)]
fn run_apply(
    device_id: String,
    device_prep: DevicePreparation,
    width: Option<u32>,
    height: Option<u32>,
    refresh_rate: Option<f64>,
    hdr_state: Option<HdrState>,
) -> Result<i32> {
    let api = platform();
    let facade = DisplayDevice::new(&api);
    let devices = display_device::enum_available_devices(&api);
    let mut engine = SettingsEngine::new(
        FileSettingsPersistence::new(persistence_path()),
        EnabledWorkarounds::default(),
    );

    let resolution = match (width, height) {
        (Some(width), Some(height)) => Some(Resolution { width, height }),
        _ => None,
    };
    let config = SingleDisplayConfiguration {
        device_id,
        device_prep,
        resolution,
        refresh_rate: refresh_rate.map(|r| FloatingPoint::Rational(Rational::from_floating_point(r))),
        hdr_state,
    };

    let result = engine.apply_settings(&facade, &devices, &config);
    if result != ApplyResult::Ok {
        eprintln!("{result:?}");
    }
    Ok(if result.is_ok() { 0 } else { 1 })
}

#[cfg(not(windows))]
fn run_apply(
    _device_id: String,
    _device_prep: DevicePreparation,
    _width: Option<u32>,
    _height: Option<u32>,
    _refresh_rate: Option<f64>,
    _hdr_state: Option<HdrState>,
) -> Result<i32> {
    platform()
}

#[cfg(windows)]
fn run_revert() -> Result<i32> {
    let api = platform();
    let facade = DisplayDevice::new(&api);
    let devices = display_device::enum_available_devices(&api);
    let mut engine = SettingsEngine::new(
        FileSettingsPersistence::new(persistence_path()),
        EnabledWorkarounds::default(),
    );

    let result = engine.revert_settings(&facade, &devices);
    if result != RevertResult::Ok {
        eprintln!("{result:?}");
    }
    Ok(if result.is_ok() { 0 } else { 1 })
}

#[cfg(not(windows))]
fn run_revert() -> Result<i32> {
    platform()
}

#[cfg(windows)]
fn run_reset_persistence() -> Result<i32> {
    let mut engine = SettingsEngine::new(
        FileSettingsPersistence::new(persistence_path()),
        EnabledWorkarounds::default(),
    );
    Ok(if engine.reset_persistence() { 0 } else { 1 })
}

#[cfg(not(windows))]
fn run_reset_persistence() -> Result<i32> {
    platform()
}

