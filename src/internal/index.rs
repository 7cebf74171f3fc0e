//! The index (staging area): an ordered map from repository-relative path to the blob it would be
//! committed with next. Persisted to `.wit/index` as a small binary format, and used to build the
//! tree objects a commit actually points at.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use bincode::{Decode, Encode};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::tree::{Tree, TreeItem, TreeItemMode};
use crate::internal::object::types::ObjectType;
use crate::internal::store::ObjectStore;

const INDEX_MAGIC: &[u8; 4] = b"DIRC";
const INDEX_VERSION: u32 = 1;

/// One staged path: its file mode, the blob it points at, and a stat cache used to short-circuit
/// re-hashing unchanged files on `status()`.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct IndexEntry {
    pub mode: TreeItemMode,
    pub hash: ObjectHash,
    pub size: u64,
    pub mtime_secs: i64,
    pub mtime_nanos: u32,
}

impl IndexEntry {
    pub fn from_metadata(mode: TreeItemMode, hash: ObjectHash, metadata: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        IndexEntry {
            mode,
            hash,
            size: metadata.size(),
            mtime_secs: metadata.mtime(),
            mtime_nanos: metadata.mtime_nsec() as u32,
        }
    }

    /// `true` if `metadata` looks unchanged since this entry was recorded (same size and mtime).
    /// A cheap pre-check before re-hashing file contents.
    pub fn matches_metadata(&self, metadata: &fs::Metadata) -> bool {
        use std::os::unix::fs::MetadataExt;
        self.size == metadata.size()
            && self.mtime_secs == metadata.mtime()
            && self.mtime_nanos == metadata.mtime_nsec() as u32
    }
}

/// How a path compares across working tree, index, and `HEAD^{tree}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Staged relative to HEAD (added, or content differs from the commit).
    Staged,
    /// Working tree content differs from what's staged in the index.
    Modified,
    /// Present in the working tree, absent from the index.
    Untracked,
    /// Present in the index, absent (or unreadable) in the working tree.
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub kind: StatusKind,
}

/// Mode for a file as it sits on disk, using the executable bit to distinguish `100644`/`100755`.
pub fn mode_for_path(path: &Path) -> Result<(TreeItemMode, fs::Metadata), GitError> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok((TreeItemMode::Link, metadata));
    }
    use std::os::unix::fs::PermissionsExt;
    let mode = if metadata.permissions().mode() & 0o111 != 0 {
        TreeItemMode::BlobExecutable
    } else {
        TreeItemMode::Blob
    };
    Ok((mode, metadata))
}

/// Ordered path → staged-entry map, persisted at `.wit/index`.
#[derive(Debug, Clone, Default)]
pub struct Index {
    entries: BTreeMap<String, IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Index::default()
    }

    pub fn load(path: &Path) -> Result<Index, GitError> {
        if !path.exists() {
            return Ok(Index::new());
        }
        let raw = fs::read(path)?;
        if raw.len() < 8 || &raw[0..4] != INDEX_MAGIC {
            return Err(GitError::InvalidIndexHeader(
                "missing DIRC magic".to_string(),
            ));
        }
        let version = u32::from_be_bytes(raw[4..8].try_into().unwrap());
        if version != INDEX_VERSION {
            return Err(GitError::InvalidIndexHeader(format!(
                "unsupported index version {version}"
            )));
        }
        let (list, _): (Vec<(String, IndexEntry)>, usize) =
            bincode::decode_from_slice(&raw[8..], bincode::config::standard())
                .map_err(|e| GitError::InvalidIndexFile(e.to_string()))?;
        Ok(Index {
            entries: list.into_iter().collect(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), GitError> {
        let dir = path.parent().expect("index path always has a parent");
        fs::create_dir_all(dir)?;

        let list: Vec<(&String, &IndexEntry)> = self.entries.iter().collect();
        let body = bincode::encode_to_vec(&list, bincode::config::standard())
            .map_err(|e| GitError::EncodeObjectError(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(INDEX_MAGIC)?;
        tmp.write_all(&INDEX_VERSION.to_be_bytes())?;
        tmp.write_all(&body)?;
        tmp.persist(path).map_err(|e| GitError::IOError(e.error))?;
        Ok(())
    }

    pub fn add(&mut self, path: impl Into<String>, entry: IndexEntry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn remove(&mut self, path: &str) -> Option<IndexEntry> {
        self.entries.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the tree hierarchy for the currently staged paths and write every tree object
    /// through `store`, returning the root tree's hash. The only path that creates `Tree` objects
    /// from index state.
    pub fn build_tree(&self, store: &ObjectStore) -> Result<ObjectHash, GitError> {
        if self.entries.is_empty() {
            return Err(GitError::EmptyTreeItems(
                "cannot build a tree from an empty index".to_string(),
            ));
        }
        let root = build_dir_node(&self.entries, "");
        write_dir_node(&root, store)
    }
}

/// A directory grouping of staged paths, keyed by the path component one level below `prefix`.
enum DirNode<'a> {
    Blob(&'a IndexEntry),
    Dir(BTreeMap<String, DirNode<'a>>),
}

fn build_dir_node<'a>(
    entries: &'a BTreeMap<String, IndexEntry>,
    prefix: &str,
) -> BTreeMap<String, DirNode<'a>> {
    let mut children: BTreeMap<String, DirNode<'a>> = BTreeMap::new();
    for (path, entry) in entries {
        let rest = match prefix.is_empty() {
            true => path.as_str(),
            false => match path.strip_prefix(prefix).and_then(|s| s.strip_prefix('/')) {
                Some(rest) => rest,
                None => continue,
            },
        };
        let mut parts = rest.splitn(2, '/');
        let head = parts.next().unwrap();
        match parts.next() {
            None => {
                children.insert(head.to_string(), DirNode::Blob(entry));
            }
            Some(_) => {
                children.entry(head.to_string()).or_insert_with(|| {
                    let child_prefix = if prefix.is_empty() {
                        head.to_string()
                    } else {
                        format!("{prefix}/{head}")
                    };
                    DirNode::Dir(build_dir_node(entries, &child_prefix))
                });
            }
        }
    }
    children
}

fn write_dir_node(node: &BTreeMap<String, DirNode<'_>>, store: &ObjectStore) -> Result<ObjectHash, GitError> {
    let mut items = Vec::with_capacity(node.len());
    for (name, child) in node {
        match child {
            DirNode::Blob(entry) => {
                items.push(TreeItem::new(entry.mode, entry.hash, name.clone()));
            }
            DirNode::Dir(children) => {
                let hash = write_dir_node(children, store)?;
                items.push(TreeItem::new(TreeItemMode::Tree, hash, name.clone()));
            }
        }
    }
    let tree = Tree::from_tree_items(items)?;
    store.write_object(ObjectType::Tree, &tree.to_data()?)
}

/// Classify paths across the working tree, the index, and `head_tree` (the commit currently
/// pointed to by HEAD, if any). `skip_dir_name` (e.g. `.wit`) is excluded from the walk.
pub fn status(
    index: &Index,
    repo_root: &Path,
    skip_dir_name: &str,
    head_tree: Option<&Tree>,
) -> Result<Vec<StatusEntry>, GitError> {
    let mut results = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (path, entry) in index.entries() {
        seen.insert(path.clone());
        let full = repo_root.join(path);
        match fs::metadata(&full) {
            Err(_) => results.push(StatusEntry {
                path: path.clone(),
                kind: StatusKind::Deleted,
            }),
            Ok(metadata) => {
                let current_hash = if entry.matches_metadata(&metadata) {
                    entry.hash
                } else {
                    ObjectHash::from_type_and_data(ObjectType::Blob, &fs::read(&full)?)
                };
                if current_hash != entry.hash {
                    results.push(StatusEntry {
                        path: path.clone(),
                        kind: StatusKind::Modified,
                    });
                } else if head_tree
                    .and_then(|t| t.get_item(path))
                    .map(|item| item.id != entry.hash)
                    .unwrap_or(true)
                {
                    results.push(StatusEntry {
                        path: path.clone(),
                        kind: StatusKind::Staged,
                    });
                }
            }
        }
    }

    let mut untracked = Vec::new();
    walk_untracked(repo_root, repo_root, skip_dir_name, &seen, &mut untracked)?;
    results.extend(untracked.into_iter().map(|path| StatusEntry {
        path,
        kind: StatusKind::Untracked,
    }));

    Ok(results)
}

fn walk_untracked(
    root: &Path,
    dir: &Path,
    skip_dir_name: &str,
    tracked: &std::collections::HashSet<String>,
    out: &mut Vec<String>,
) -> Result<(), GitError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name == skip_dir_name {
            continue;
        }
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            walk_untracked(root, &path, skip_dir_name, tracked, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .expect("walked path is under root")
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            if !tracked.contains(&rel) {
                out.push(rel);
            }
        }
    }
    Ok(())
}
