//! Materializing a tree object into the working directory and a matching [`Index`].

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::index::{Index, IndexEntry};
use crate::internal::object::ObjectTrait;
use crate::internal::object::tree::{Tree, TreeItemMode};
use crate::internal::object::types::ObjectType;
use crate::internal::store::ObjectStore;

/// Write every blob reachable from `tree_hash` into `repo_root`, replacing whatever is there, and
/// return the [`Index`] that matches the result. Existing untracked files outside the tree are left
/// alone; callers that need a clean switch should diff against the old tree first.
pub fn checkout_tree(
    store: &ObjectStore,
    repo_root: &Path,
    tree_hash: ObjectHash,
) -> Result<Index, GitError> {
    let mut index = Index::new();
    write_subtree(store, repo_root, tree_hash, "", &mut index)?;
    Ok(index)
}

fn write_subtree(
    store: &ObjectStore,
    repo_root: &Path,
    tree_hash: ObjectHash,
    prefix: &str,
    index: &mut Index,
) -> Result<(), GitError> {
    let (object_type, data) = store.read_object(&tree_hash)?;
    if object_type != ObjectType::Tree {
        return Err(GitError::InvalidTreeObject);
    }
    let tree = Tree::from_bytes(&data, tree_hash)?;

    for item in &tree.tree_items {
        let rel_path = if prefix.is_empty() {
            item.name.clone()
        } else {
            format!("{prefix}/{}", item.name)
        };
        let full_path = repo_root.join(&rel_path);

        match item.mode {
            TreeItemMode::Tree => {
                fs::create_dir_all(&full_path)?;
                write_subtree(store, repo_root, item.id, &rel_path, index)?;
            }
            TreeItemMode::Blob | TreeItemMode::BlobExecutable => {
                let (_, content) = store.read_object(&item.id)?;
                if let Some(parent) = full_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = fs::File::create(&full_path)?;
                file.write_all(&content)?;
                set_executable(&full_path, item.mode == TreeItemMode::BlobExecutable)?;
                let metadata = fs::symlink_metadata(&full_path)?;
                index.add(rel_path, IndexEntry::from_metadata(item.mode, item.id, &metadata));
            }
            TreeItemMode::Link => {
                let (_, target) = store.read_object(&item.id)?;
                let target = String::from_utf8(target)
                    .map_err(|e| GitError::ConversionError(e.to_string()))?;
                if let Some(parent) = full_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let _ = fs::remove_file(&full_path);
                std::os::unix::fs::symlink(target, &full_path)?;
                let metadata = fs::symlink_metadata(&full_path)?;
                index.add(rel_path, IndexEntry::from_metadata(item.mode, item.id, &metadata));
            }
            TreeItemMode::Commit => {
                // Submodule gitlink: record the pointer, no working-tree content to write.
                let metadata = fs::metadata(repo_root)?;
                index.add(rel_path, IndexEntry::from_metadata(item.mode, item.id, &metadata));
            }
        }
    }
    Ok(())
}

/// Check out `new_tree_hash` over the working tree, then remove any path `old_index` tracked that
/// the new index no longer does — the working-tree counterpart of replacing one commit's tree
/// with another's (fast-forward, merge, revert), where files the old tree wrote but the new one
/// doesn't must disappear rather than linger as stray untracked files.
pub fn checkout_tree_replacing(
    store: &ObjectStore,
    repo_root: &Path,
    new_tree_hash: ObjectHash,
    old_index: &Index,
) -> Result<Index, GitError> {
    let new_index = checkout_tree(store, repo_root, new_tree_hash)?;
    for (path, _) in old_index.entries() {
        if new_index.get(path).is_none() {
            let _ = fs::remove_file(repo_root.join(path));
        }
    }
    Ok(new_index)
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> Result<(), GitError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    let mode = if executable { 0o755 } else { 0o644 };
    perms.set_mode(mode);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use crate::internal::object::tree::TreeItem;

    fn write_blob(store: &ObjectStore, content: &[u8]) -> ObjectHash {
        store.write_object(ObjectType::Blob, content).unwrap()
    }

    #[test]
    fn checkout_writes_nested_files_and_matching_index() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let objects_dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(objects_dir.path());

        let root_hash = write_blob(&store, b"root\n");
        let nested_hash = write_blob(&store, b"nested\n");
        let sub_tree = Tree::from_tree_items(vec![TreeItem::new(
            TreeItemMode::Blob,
            nested_hash,
            "b.txt".to_string(),
        )])
        .unwrap();
        let sub_tree_hash = store
            .write_object(ObjectType::Tree, &sub_tree.to_data().unwrap())
            .unwrap();
        let tree = Tree::from_tree_items(vec![
            TreeItem::new(TreeItemMode::Blob, root_hash, "a.txt".to_string()),
            TreeItem::new(TreeItemMode::Tree, sub_tree_hash, "dir".to_string()),
        ])
        .unwrap();
        let tree_hash = store
            .write_object(ObjectType::Tree, &tree.to_data().unwrap())
            .unwrap();

        let work_dir = tempfile::tempdir().unwrap();
        let index = checkout_tree(&store, work_dir.path(), tree_hash).unwrap();

        assert_eq!(fs::read(work_dir.path().join("a.txt")).unwrap(), b"root\n");
        assert_eq!(fs::read(work_dir.path().join("dir/b.txt")).unwrap(), b"nested\n");
        assert!(index.get("a.txt").is_some());
        assert!(index.get("dir/b.txt").is_some());
    }

    #[test]
    fn checkout_replacing_removes_stale_files() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let objects_dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(objects_dir.path());
        let work_dir = tempfile::tempdir().unwrap();

        let old_a = write_blob(&store, b"old a\n");
        let old_b = write_blob(&store, b"old b\n");
        let old_tree = Tree::from_tree_items(vec![
            TreeItem::new(TreeItemMode::Blob, old_a, "a.txt".to_string()),
            TreeItem::new(TreeItemMode::Blob, old_b, "b.txt".to_string()),
        ])
        .unwrap();
        let old_tree_hash = store.write_object(ObjectType::Tree, &old_tree.to_data().unwrap()).unwrap();
        let old_index = checkout_tree(&store, work_dir.path(), old_tree_hash).unwrap();
        assert!(work_dir.path().join("b.txt").is_file());

        let new_a = write_blob(&store, b"new a\n");
        let new_tree = Tree::from_tree_items(vec![TreeItem::new(TreeItemMode::Blob, new_a, "a.txt".to_string())])
            .unwrap();
        let new_tree_hash = store.write_object(ObjectType::Tree, &new_tree.to_data().unwrap()).unwrap();

        let new_index = checkout_tree_replacing(&store, work_dir.path(), new_tree_hash, &old_index).unwrap();
        assert_eq!(fs::read(work_dir.path().join("a.txt")).unwrap(), b"new a\n");
        assert!(!work_dir.path().join("b.txt").exists());
        assert!(new_index.get("b.txt").is_none());
    }
}
