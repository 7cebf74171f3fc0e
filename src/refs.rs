//! The refs store: named pointers to object hashes under `.wit/refs/…`, plus `HEAD`. Every write
//! goes through a temp-file + rename so readers never observe a half-written ref.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::GitError;
use crate::hash::ObjectHash;

const HEAD_FILE: &str = "HEAD";
const SYMBOLIC_PREFIX: &str = "ref: ";

/// The three ref namespaces plus a resolved detached hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadState {
    /// `HEAD` points at a branch (e.g. `refs/heads/main`), which may or may not exist yet.
    Symbolic(String),
    /// `HEAD` points directly at an object hash.
    Detached(ObjectHash),
}

/// Refs live under `<root>/refs/{heads,tags,remotes}/…`; `HEAD` lives directly under `<root>`.
#[derive(Debug, Clone)]
pub struct RefStore {
    root: PathBuf,
}

impl RefStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RefStore { root: root.into() }
    }

    fn head_path(&self) -> PathBuf {
        self.root.join(HEAD_FILE)
    }

    fn path_for_full_name(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Read and parse a ref file's contents into either a hash or a symbolic target.
    fn read_ref_file(path: &Path) -> Result<Option<RefValue>, GitError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GitError::IOError(e)),
        };
        let trimmed = raw.trim_end_matches(['\n', '\r']);
        if let Some(target) = trimmed.strip_prefix(SYMBOLIC_PREFIX) {
            Ok(Some(RefValue::Symbolic(target.to_string())))
        } else {
            let hash = ObjectHash::from_str_checked(trimmed)?;
            Ok(Some(RefValue::Direct(hash)))
        }
    }

    fn write_ref_file(path: &Path, contents: &str) -> Result<(), GitError> {
        let dir = path.parent().expect("ref path always has a parent");
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.persist(path).map_err(|e| GitError::IOError(e.error))?;
        Ok(())
    }

    /// Read `HEAD`'s raw state without following it to a commit hash.
    pub fn read_head(&self) -> Result<HeadState, GitError> {
        match Self::read_ref_file(&self.head_path())? {
            Some(RefValue::Symbolic(target)) => Ok(HeadState::Symbolic(target)),
            Some(RefValue::Direct(hash)) => Ok(HeadState::Detached(hash)),
            None => Err(GitError::RefNotFound("HEAD".to_string())),
        }
    }

    /// Point `HEAD` at a branch ref (attached).
    pub fn set_head_symbolic(&self, branch_full_name: &str) -> Result<(), GitError> {
        Self::write_ref_file(
            &self.head_path(),
            &format!("{SYMBOLIC_PREFIX}{branch_full_name}\n"),
        )
    }

    /// Point `HEAD` directly at a commit hash (detached).
    pub fn set_head_detached(&self, hash: ObjectHash) -> Result<(), GitError> {
        Self::write_ref_file(&self.head_path(), &format!("{hash}\n"))
    }

    /// The branch name `HEAD` currently tracks, if attached.
    pub fn current_branch(&self) -> Result<Option<String>, GitError> {
        match self.read_head()? {
            HeadState::Symbolic(target) => Ok(target
                .strip_prefix("refs/heads/")
                .map(|s| s.to_string())),
            HeadState::Detached(_) => Ok(None),
        }
    }

    /// Recursively dereference a ref name (following `HEAD` or any symbolic chain) down to a hash.
    pub fn resolve(&self, name: &str) -> Result<ObjectHash, GitError> {
        if name == "HEAD" {
            return match self.read_head()? {
                HeadState::Detached(hash) => Ok(hash),
                HeadState::Symbolic(target) => self.resolve(&target),
            };
        }

        let full_name = self.lookup_full_name(name)?;
        match Self::read_ref_file(&self.path_for_full_name(&full_name))? {
            Some(RefValue::Direct(hash)) => Ok(hash),
            Some(RefValue::Symbolic(target)) => self.resolve(&target),
            None => Err(GitError::RefNotFound(name.to_string())),
        }
    }

    /// Resolve a short or full ref name to its on-disk path, following the lookup order: exact
    /// path, `refs/heads/`, `refs/tags/`, `refs/remotes/`, then an unambiguous hash prefix.
    fn lookup_full_name(&self, name: &str) -> Result<String, GitError> {
        let candidates = [
            name.to_string(),
            format!("refs/heads/{name}"),
            format!("refs/tags/{name}"),
            format!("refs/remotes/{name}"),
        ];
        for candidate in &candidates {
            if self.path_for_full_name(candidate).is_file() {
                return Ok(candidate.clone());
            }
        }

        if name.len() >= 4 && name.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GitError::RefNotFound(format!(
                "`{name}` looks like a hash prefix; resolve against the object store separately"
            )));
        }

        Err(GitError::RefNotFound(name.to_string()))
    }

    /// Create a new ref; fails if one already exists at that path (use [`Self::update`] to move
    /// an existing ref).
    pub fn create(&self, full_name: &str, hash: ObjectHash) -> Result<(), GitError> {
        let path = self.path_for_full_name(full_name);
        if path.is_file() {
            return Err(GitError::InvalidArgument(format!(
                "ref `{full_name}` already exists"
            )));
        }
        Self::write_ref_file(&path, &format!("{hash}\n"))
    }

    /// Move an existing ref (or create it) to point at `hash`.
    pub fn update(&self, full_name: &str, hash: ObjectHash) -> Result<(), GitError> {
        Self::write_ref_file(&self.path_for_full_name(full_name), &format!("{hash}\n"))
    }

    pub fn delete(&self, full_name: &str) -> Result<(), GitError> {
        let path = self.path_for_full_name(full_name);
        fs::remove_file(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GitError::RefNotFound(full_name.to_string()),
            _ => GitError::IOError(e),
        })
    }

    fn list_namespace(&self, namespace: &str) -> Result<Vec<String>, GitError> {
        let dir = self.root.join(namespace);
        let mut names = Vec::new();
        collect_ref_names(&dir, &dir, &mut names)?;
        names.sort();
        Ok(names)
    }

    pub fn list_branches(&self) -> Result<Vec<String>, GitError> {
        self.list_namespace("refs/heads")
    }

    pub fn list_tags(&self) -> Result<Vec<String>, GitError> {
        self.list_namespace("refs/tags")
    }

    /// Branch names under `refs/remotes/<remote>/…`.
    pub fn list_remote_branches(&self, remote: &str) -> Result<Vec<String>, GitError> {
        self.list_namespace(&format!("refs/remotes/{remote}"))
    }
}

fn collect_ref_names(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), GitError> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(GitError::IOError(e)),
    };
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_ref_names(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .expect("walked path is under root")
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            out.push(rel);
        }
    }
    Ok(())
}

enum RefValue {
    Direct(ObjectHash),
    Symbolic(String),
}

trait FromStrChecked: Sized {
    fn from_str_checked(s: &str) -> Result<Self, GitError>;
}

impl FromStrChecked for ObjectHash {
    fn from_str_checked(s: &str) -> Result<Self, GitError> {
        s.parse::<ObjectHash>().map_err(GitError::InvalidHashValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};

    #[test]
    fn head_defaults_to_symbolic_main_once_set() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        refs.set_head_symbolic("refs/heads/main").unwrap();
        assert_eq!(
            refs.read_head().unwrap(),
            HeadState::Symbolic("refs/heads/main".to_string())
        );
        assert_eq!(refs.current_branch().unwrap(), Some("main".to_string()));
    }

    #[test]
    fn create_then_resolve_through_head() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        let hash = ObjectHash::new(b"commit content");
        refs.create("refs/heads/main", hash).unwrap();
        refs.set_head_symbolic("refs/heads/main").unwrap();

        assert_eq!(refs.resolve("HEAD").unwrap(), hash);
        assert_eq!(refs.resolve("main").unwrap(), hash);
    }

    #[test]
    fn update_moves_an_existing_ref() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        let first = ObjectHash::new(b"one");
        let second = ObjectHash::new(b"two");
        refs.create("refs/heads/main", first).unwrap();
        refs.update("refs/heads/main", second).unwrap();
        assert_eq!(refs.resolve("refs/heads/main").unwrap(), second);
    }

    #[test]
    fn create_rejects_an_existing_ref() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        let hash = ObjectHash::new(b"x");
        refs.create("refs/heads/main", hash).unwrap();
        assert!(refs.create("refs/heads/main", hash).is_err());
    }

    #[test]
    fn list_branches_and_tags_are_sorted() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        let hash = ObjectHash::new(b"x");
        refs.create("refs/heads/zeta", hash).unwrap();
        refs.create("refs/heads/alpha", hash).unwrap();
        refs.create("refs/tags/v1.0.0", hash).unwrap();

        assert_eq!(refs.list_branches().unwrap(), vec!["alpha", "zeta"]);
        assert_eq!(refs.list_tags().unwrap(), vec!["v1.0.0"]);
    }

    #[test]
    fn delete_removes_ref_and_repeat_delete_fails() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        let hash = ObjectHash::new(b"x");
        refs.create("refs/heads/main", hash).unwrap();
        refs.delete("refs/heads/main").unwrap();
        assert!(refs.resolve("refs/heads/main").is_err());
        assert!(refs.delete("refs/heads/main").is_err());
    }
}
