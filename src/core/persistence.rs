use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::throttle_store::ThrottleState;
use crate::utils::{log_store_event, GuardResult};

/// Path of the scratch file renamed over `path` on each write
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Load the persisted identifier -> state map
///
/// A missing, empty or unparsable file yields an empty map. Entries that do
/// not decode as a state are dropped individually.
pub fn load_state(path: &Path) -> HashMap<String, ThrottleState> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            log_store_event("load", false, Some(&format!("{}: {}", path.display(), e)));
            return HashMap::new();
        }
    };
    if raw.trim().is_empty() {
        return HashMap::new();
    }

    let entries: HashMap<String, Value> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            log_store_event(
                "load",
                false,
                Some(&format!("corrupt state file {}, starting fresh: {}", path.display(), e)),
            );
            return HashMap::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|(ip, value)| match serde_json::from_value::<ThrottleState>(value) {
            Ok(mut state) => {
                if state.ip.is_empty() {
                    state.ip = ip.clone();
                }
                Some((ip, state))
            }
            Err(e) => {
                log_store_event("load", false, Some(&format!("skipping entry {}: {}", ip, e)));
                None
            }
        })
        .collect()
}

/// Write `state` as pretty JSON to a temp file in the same directory, then
/// rename it over `path`
pub fn write_state_atomic(path: &Path, state: &HashMap<String, ThrottleState>) -> GuardResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(state)?;
    let tmp = temp_path(path);
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
