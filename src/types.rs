//! Public data model shared across every component: resolutions, rationals, topology,
//! enumerated devices, and the persisted settings state.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Unsigned width x height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Signed x,y desktop position of a source mode's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Exact numerator/denominator representation of a refresh rate or pixel scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub numerator: u32,
    pub denominator: u32,
}

impl Rational {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self { numerator, denominator }
    }

    pub fn as_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Converts an `f64` into an exact rational with a fixed denominator of 10000,
    /// matching how an externally supplied floating refresh rate is turned into a
    /// persistable exact value.
    pub fn from_floating_point(value: f64) -> Self {
        Self {
            numerator: (value * 10000.0).round() as u32,
            denominator: 10000,
        }
    }
}

/// Relative-epsilon fuzzy comparison: `|a-b| * 10^12 <= min(|a|, |b|)`.
pub fn fuzzy_compare(lhs: f64, rhs: f64) -> bool {
    (lhs - rhs).abs() * 1e12 <= lhs.abs().min(rhs.abs())
}

/// Floating point value that can round-trip either as an exact rational or as an
/// approximate double, tagged on the wire so a reader can tell which one it got.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FloatingPoint {
    Double(f64),
    Rational(Rational),
}

impl FloatingPoint {
    pub fn as_f64(self) -> f64 {
        match self {
            FloatingPoint::Double(v) => v,
            FloatingPoint::Rational(r) => r.as_f64(),
        }
    }

    /// Fuzzy-compares two floating point values. Same-variant comparisons use the
    /// appropriate exact/fuzzy rule for that variant; cross-variant comparisons fall back
    /// to a fuzzy compare of the decimal values.
    pub fn fuzzy_eq(self, other: Self) -> bool {
        match (self, other) {
            (FloatingPoint::Rational(a), FloatingPoint::Rational(b)) => a == b,
            _ => fuzzy_compare(self.as_f64(), other.as_f64()),
        }
    }
}

mod floating_point_serde {
    use super::{FloatingPoint, Rational};
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

    #[derive(Serialize, Deserialize)]
    #[serde(tag = "type", content = "value", rename_all = "lowercase")]
    enum Wire {
        Double(f64),
        Rational(Rational),
    }

    pub fn serialize<S: Serializer>(value: &FloatingPoint, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match *value {
            FloatingPoint::Double(v) => Wire::Double(v),
            FloatingPoint::Rational(r) => Wire::Rational(r),
        };
        wire.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FloatingPoint, D::Error> {
        match Wire::deserialize(deserializer)? {
            Wire::Double(v) => {
                if !v.is_finite() {
                    return Err(D::Error::custom("floating point value must be finite"));
                }
                Ok(FloatingPoint::Double(v))
            }
            Wire::Rational(r) => Ok(FloatingPoint::Rational(r)),
        }
    }
}

impl Serialize for FloatingPoint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        floating_point_serde::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for FloatingPoint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        floating_point_serde::deserialize(deserializer)
    }
}

/// The device's HDR state in the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HdrState {
    Disabled,
    Enabled,
}

/// Resolution + refresh rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayMode {
    pub resolution: Resolution,
    pub refresh_rate: Rational,
}

/// Parsed EDID data: manufacturer id, product code, serial number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdidData {
    pub manufacturer_id: String,
    pub product_code: String,
    pub serial_number: u32,
}

/// Additional information available only for an active display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumeratedDeviceInfo {
    pub resolution: Resolution,
    pub resolution_scale: FloatingPoint,
    pub refresh_rate: FloatingPoint,
    pub primary: bool,
    pub origin_point: Point,
    pub hdr_state: Option<HdrState>,
}

/// A single display device known to the system, active or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumeratedDevice {
    pub device_id: String,
    pub display_name: String,
    pub friendly_name: String,
    pub edid: Option<EdidData>,
    pub info: Option<EnumeratedDeviceInfo>,
}

/// Instruction on how to prepare a requested display device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevicePreparation {
    VerifyOnly,
    EnsureActive,
    EnsurePrimary,
    EnsureOnlyDisplay,
}

/// A request to configure a single display device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleDisplayConfiguration {
    pub device_id: String,
    pub device_prep: DevicePreparation,
    pub resolution: Option<Resolution>,
    pub refresh_rate: Option<FloatingPoint>,
    pub hdr_state: Option<HdrState>,
}

/// Ordered sequence of groups of device_ids; devices within a group are duplicated
/// (mirrored), distinct groups are extended.
pub type ActiveTopology = Vec<Vec<String>>;

/// Canonicalises a topology by sorting device_ids within each group, then sorting groups,
/// so that two topologies differing only by group/device ordering compare equal.
pub fn canonicalize_topology(topology: &ActiveTopology) -> ActiveTopology {
    let mut copy: ActiveTopology = topology
        .iter()
        .map(|group| {
            let mut group = group.clone();
            group.sort();
            group
        })
        .collect();
    copy.sort();
    copy
}

/// Per-device-id bookkeeping collected while scanning queried paths: which source ids are
/// available on which path index, the adapter those paths share, and the currently active
/// source id (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSourceIndexData {
    pub source_id_to_path_index: BTreeMap<u32, usize>,
    pub adapter_id: (i32, u32),
    pub active_source_id: Option<u32>,
}

pub type PathSourceIndexDataMap = HashMap<String, PathSourceIndexData>;

/// Snapshot captured on the very first successful apply; never overwritten until a full
/// revert succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    pub topology: ActiveTopology,
    pub primary_devices: HashSet<String>,
}

/// What must be undone on revert; rewritten on every successful apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifiedState {
    pub topology: ActiveTopology,
    pub original_modes: HashMap<String, DisplayMode>,
    pub original_hdr_states: HashMap<String, Option<HdrState>>,
    pub original_primary_device: String,
}

impl ModifiedState {
    pub fn has_modifications(&self) -> bool {
        !self.original_modes.is_empty()
            || !self.original_hdr_states.is_empty()
            || !self.original_primary_device.is_empty()
    }
}

/// Persisted settings state: the baseline to revert to, plus the most recent deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SingleDisplayConfigState {
    pub initial: Option<InitialState>,
    pub modified: Option<ModifiedState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_compare_matches_formula() {
        assert!(fuzzy_compare(1.0, 1.0 + 1e-13));
        assert!(!fuzzy_compare(1.0, 1.1));
    }

    #[test]
    fn rational_from_floating_point_uses_fixed_denominator() {
        let r = Rational::from_floating_point(59.94);
        assert_eq!(r.denominator, 10000);
        assert_eq!(r.numerator, 599400);
    }

    #[test]
    fn floating_point_tagged_json_round_trips() {
        let double = FloatingPoint::Double(120.0);
        let json = serde_json::to_string(&double).unwrap();
        assert_eq!(json, r#"{"type":"double","value":120.0}"#);
        let back: FloatingPoint = serde_json::from_str(&json).unwrap();
        assert!(back.fuzzy_eq(double));

        let rational = FloatingPoint::Rational(Rational::new(120, 1));
        let json = serde_json::to_string(&rational).unwrap();
        assert_eq!(
            json,
            r#"{"type":"rational","value":{"numerator":120,"denominator":1}}"#
        );
        let back: FloatingPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rational);
    }

    #[test]
    fn canonicalize_topology_sorts_groups_and_members() {
        let a = vec![vec!["B".to_string(), "A".to_string()], vec!["C".to_string()]];
        let b = vec![vec!["C".to_string()], vec!["A".to_string(), "B".to_string()]];
        assert_eq!(canonicalize_topology(&a), canonicalize_topology(&b));
    }

    #[test]
    fn modified_state_has_modifications_checks_all_three_fields() {
        let mut state = ModifiedState::default();
        assert!(!state.has_modifications());
        state.original_primary_device = "dev".to_string();
        assert!(state.has_modifications());
    }
}
