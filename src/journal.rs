//! Append-only operation journal: every operation engine appends one entry per completed step,
//! enabling undo/reflog-style history without ever rewriting a previous entry.

use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::GitError;

/// One line of `.wit/JOURNAL/log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: u64,
    pub timestamp: i64,
    pub operation: String,
    pub args: Vec<String>,
    pub before_state: Value,
    pub after_state: Value,
    pub payload: Value,
}

/// Append-only log rooted at `<repo>/JOURNAL/log`.
#[derive(Debug, Clone)]
pub struct Journal {
    log_path: PathBuf,
}

impl Journal {
    pub fn new(repo_dir: impl AsRef<Path>) -> Self {
        Journal {
            log_path: repo_dir.as_ref().join("JOURNAL").join("log"),
        }
    }

    fn next_id(&self) -> Result<u64, GitError> {
        let last = self.entries()?.last().map(|e| e.id).unwrap_or(0);
        Ok(last + 1)
    }

    /// Append a new entry, returning its assigned id.
    pub fn append(
        &self,
        operation: &str,
        args: Vec<String>,
        before_state: Value,
        after_state: Value,
        payload: Value,
    ) -> Result<u64, GitError> {
        let dir = self
            .log_path
            .parent()
            .expect("journal path always has a parent");
        fs::create_dir_all(dir)?;

        let id = self.next_id()?;
        let entry = JournalEntry {
            id,
            timestamp: chrono::Utc::now().timestamp(),
            operation: operation.to_string(),
            args,
            before_state,
            after_state,
            payload,
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| GitError::ConversionError(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{line}")?;
        tracing::debug!(operation, id, "journal: appended entry");
        Ok(id)
    }

    /// Read every entry, in append order.
    pub fn entries(&self) -> Result<Vec<JournalEntry>, GitError> {
        if !self.log_path.is_file() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(
                serde_json::from_str(&line)
                    .map_err(|e| GitError::ConversionError(e.to_string()))?,
            );
        }
        Ok(out)
    }

    /// Most recent entry that has no later `"undo"` entry pointing back at it. `None` if there is
    /// nothing left to undo.
    pub fn last_undoable(&self) -> Result<Option<JournalEntry>, GitError> {
        let entries = self.entries()?;
        let undone_ids: HashSet<u64> = entries
            .iter()
            .filter(|e| e.operation == "undo")
            .filter_map(|e| e.payload.get("undone_id").and_then(Value::as_u64))
            .collect();

        Ok(entries
            .into_iter()
            .rev()
            .find(|e| e.operation != "undo" && !undone_ids.contains(&e.id)))
    }

    /// Append an entry recording that `target` has been undone. The journal only records
    /// history — callers apply the actual inverse (ref update, index restore, …) before calling
    /// this, using `target.before_state` as the source of truth to restore.
    pub fn record_undo(&self, target: &JournalEntry) -> Result<u64, GitError> {
        self.append(
            "undo",
            vec![target.operation.clone()],
            target.after_state.clone(),
            target.before_state.clone(),
            serde_json::json!({ "undone_id": target.id }),
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn append_assigns_monotonic_ids() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path());

        let id1 = journal
            .append("commit", vec![], json!({}), json!({"head": "aaa"}), json!({}))
            .unwrap();
        let id2 = journal
            .append("commit", vec![], json!({"head": "aaa"}), json!({"head": "bbb"}), json!({}))
            .unwrap();

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(journal.entries().unwrap().len(), 2);
    }

    #[test]
    fn last_undoable_skips_already_undone_entries() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path());

        journal
            .append("commit", vec![], json!({}), json!({"head": "aaa"}), json!({}))
            .unwrap();
        let second = journal
            .append("commit", vec![], json!({"head": "aaa"}), json!({"head": "bbb"}), json!({}))
            .unwrap();

        let target = journal.last_undoable().unwrap().unwrap();
        assert_eq!(target.id, second);

        journal.record_undo(&target).unwrap();

        let next = journal.last_undoable().unwrap().unwrap();
        assert_eq!(next.id, 1);
    }

    #[test]
    fn no_entries_means_nothing_to_undo() {
        let dir = tempdir().unwrap();
        let journal = Journal::new(dir.path());
        assert!(journal.last_undoable().unwrap().is_none());
    }
}
