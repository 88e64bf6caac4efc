// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::route_alias::RouteId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const MISSING_STATE_FILE: &str = "state.json";
pub const HEARTBEAT_FILE: &str = "heartbeat.json";

/// Epoch second at which each under-covered route was first seen missing.
///
/// Invariant: a route returning to full coverage is removed immediately,
/// so a duration window never spans two unrelated gaps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissingState {
    pub first_missing_at: BTreeMap<RouteId, u64>,
}

impl MissingState {
    pub fn is_empty(&self) -> bool {
        self.first_missing_at.is_empty()
    }
}

/// Self-health record of the monitor itself, updated on every run whether
/// or not the cycle's business logic succeeds. `alerted_down` stays set
/// until the first successful run after it, which clears it exactly once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatRecord {
    pub last_run_at: Option<u64>,
    pub last_success_at: Option<u64>,
    pub alerted_down: bool,
}

pub fn missing_state_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(MISSING_STATE_FILE)
}

pub fn heartbeat_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(HEARTBEAT_FILE)
}

/// Read a persisted record, treating a missing or unreadable file as the
/// default value. A predecessor run that died mid-write must not wedge
/// every following run.
pub fn load_json_state<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                eprintln!("Could not parse state file {}: {}", path.display(), e);
                T::default()
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            eprintln!("Could not read state file {}: {}", path.display(), e);
            T::default()
        }
    }
}

/// Replace-on-write: serialize next to the target, then rename into place,
/// so a concurrent reader never observes a torn file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let serialized = serde_json::to_string_pretty(value).map_err(io::Error::other)?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, serialized)?;
    fs::rename(&tmp_path, path)
}
