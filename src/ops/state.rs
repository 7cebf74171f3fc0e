//! Checkpoint files for in-progress multi-step operations. Every engine that can be interrupted
//! mid-way (merge, revert, stack sync) persists a small JSON state file under `.wit/` so a repeat
//! invocation can find `--continue`/`--abort` work, and so that at most one such operation is ever
//! in flight at a time.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Serialize, de::DeserializeOwned};

use crate::errors::GitError;

pub const MERGE_STATE_FILE: &str = "MERGE_STATE.json";
pub const REVERT_STATE_FILE: &str = "REVERT_STATE.json";
pub const REBASE_STATE_FILE: &str = "REBASE_STATE.json";

/// Every checkpoint file that gates the "one operation at a time" exclusivity rule.
const GATING_STATE_FILES: &[&str] = &[MERGE_STATE_FILE, REVERT_STATE_FILE, REBASE_STATE_FILE];

/// Load and deserialize a state file, or `None` if it doesn't exist.
pub fn load<T: DeserializeOwned>(wit_dir: &Path, file_name: &str) -> Result<Option<T>, GitError> {
    let path = wit_dir.join(file_name);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(GitError::IOError(e)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| GitError::ConversionError(e.to_string()))
}

/// Serialize and write a state file through a temp file + rename.
pub fn save<T: Serialize>(wit_dir: &Path, file_name: &str, state: &T) -> Result<(), GitError> {
    fs::create_dir_all(wit_dir)?;
    let body = serde_json::to_string_pretty(state)
        .map_err(|e| GitError::ConversionError(e.to_string()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(wit_dir)?;
    tmp.write_all(body.as_bytes())?;
    tmp.persist(wit_dir.join(file_name))
        .map_err(|e| GitError::IOError(e.error))?;
    Ok(())
}

/// Remove a state file; not finding one is not an error (the operation may already be clear).
pub fn clear(wit_dir: &Path, file_name: &str) -> Result<(), GitError> {
    match fs::remove_file(wit_dir.join(file_name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GitError::IOError(e)),
    }
}

/// Enforce that no *other* gating operation has a checkpoint on disk. `allowed_file` is the
/// caller's own state file (e.g. a merge resuming via `--continue` checks its own `MERGE_STATE.json`
/// is allowed to exist); every other gating file present is an error.
pub fn guard_no_other_operation(wit_dir: &Path, allowed_file: &str) -> Result<(), GitError> {
    for file_name in GATING_STATE_FILES {
        if *file_name == allowed_file {
            continue;
        }
        if wit_dir.join(file_name).is_file() {
            return Err(match *file_name {
                MERGE_STATE_FILE => GitError::MergeInProgress(file_name.to_string()),
                _ => GitError::OperationInProgress(file_name.to_string()),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn save_load_and_clear_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load::<Sample>(dir.path(), MERGE_STATE_FILE).unwrap().is_none());

        save(dir.path(), MERGE_STATE_FILE, &Sample { value: 7 }).unwrap();
        let loaded: Sample = load(dir.path(), MERGE_STATE_FILE).unwrap().unwrap();
        assert_eq!(loaded, Sample { value: 7 });

        clear(dir.path(), MERGE_STATE_FILE).unwrap();
        assert!(load::<Sample>(dir.path(), MERGE_STATE_FILE).unwrap().is_none());
    }

    #[test]
    fn guard_allows_its_own_file_but_rejects_others() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), MERGE_STATE_FILE, &Sample { value: 1 }).unwrap();

        assert!(guard_no_other_operation(dir.path(), MERGE_STATE_FILE).is_ok());
        match guard_no_other_operation(dir.path(), REVERT_STATE_FILE) {
            Err(GitError::MergeInProgress(_)) => {}
            other => panic!("expected MergeInProgress, got {other:?}"),
        }
    }

    #[test]
    fn guard_reports_operation_in_progress_for_non_merge_files() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), REVERT_STATE_FILE, &Sample { value: 1 }).unwrap();

        match guard_no_other_operation(dir.path(), MERGE_STATE_FILE) {
            Err(GitError::OperationInProgress(_)) => {}
            other => panic!("expected OperationInProgress, got {other:?}"),
        }
    }
}
