//! Outcome enums returned from the public apply/revert/reset operations.
//!
//! These are deliberately flat, serializable enums rather than `thiserror`-derived error
//! types: callers branch on *which* step failed, not on a formatted message, and the
//! result is success-or-one-of-several-named-failures rather than an exceptional error.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    Ok,
    ApiTemporarilyUnavailable,
    DevicePrepFailed,
    PrimaryDevicePrepFailed,
    DisplayModePrepFailed,
    HdrStatePrepFailed,
    PersistenceSaveFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevertResult {
    Ok,
    ApiTemporarilyUnavailable,
    TopologyIsInvalid,
    SwitchingTopologyFailed,
    RevertingPrimaryDeviceFailed,
    RevertingDisplayModesFailed,
    RevertingHdrStatesFailed,
    PersistenceSaveFailed,
}

impl ApplyResult {
    pub fn is_ok(self) -> bool {
        matches!(self, ApplyResult::Ok)
    }
}

impl RevertResult {
    pub fn is_ok(self) -> bool {
        matches!(self, RevertResult::Ok)
    }
}
