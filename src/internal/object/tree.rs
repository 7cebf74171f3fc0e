//! The Tree object represents a directory: a sorted list of `(mode, name, hash)` entries pointing
//! at blobs (files) or other trees (sub-directories). Directory entries sort as if their name ended
//! in `/`, which is required for hash stability with the wider ecosystem.

use std::fmt::Display;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::ObjectType;

/// File mode recorded in a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum TreeItemMode {
    Blob,
    BlobExecutable,
    Link,
    Tree,
    Commit,
}

impl TreeItemMode {
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            TreeItemMode::Blob => b"100644",
            TreeItemMode::BlobExecutable => b"100755",
            TreeItemMode::Link => b"120000",
            TreeItemMode::Tree => b"40000",
            TreeItemMode::Commit => b"160000",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GitError> {
        match bytes {
            b"100644" => Ok(TreeItemMode::Blob),
            b"100755" => Ok(TreeItemMode::BlobExecutable),
            b"120000" => Ok(TreeItemMode::Link),
            b"40000" => Ok(TreeItemMode::Tree),
            b"160000" => Ok(TreeItemMode::Commit),
            other => Err(GitError::InvalidTreeItem(format!(
                "unrecognized mode `{}`",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    pub fn is_tree(self) -> bool {
        matches!(self, TreeItemMode::Tree)
    }
}

/// One entry of a [`Tree`]: a name, its mode, and the hash of the object it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectHash,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectHash, name: String) -> Self {
        TreeItem { mode, id, name }
    }

    /// Sort key that treats directory entries as if their name ended in `/`, matching the
    /// canonical tree ordering used for hash stability.
    fn sort_key(&self) -> String {
        if self.mode.is_tree() {
            format!("{}/", self.name)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub id: ObjectHash,
    pub tree_items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for item in &self.tree_items {
            writeln!(
                f,
                "{} {} {}",
                String::from_utf8_lossy(item.mode.to_bytes()),
                item.id,
                item.name
            )?;
        }
        Ok(())
    }
}

impl Tree {
    /// Build a tree from entries, sorting them canonically and computing the hash.
    pub fn from_tree_items(mut items: Vec<TreeItem>) -> Result<Tree, GitError> {
        if items.is_empty() {
            return Err(GitError::EmptyTreeItems(
                "tree must have at least one entry".to_string(),
            ));
        }
        items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let mut tree = Tree {
            id: ObjectHash::default(),
            tree_items: items,
        };
        let hash = ObjectHash::from_type_and_data(ObjectType::Tree, &tree.to_data()?);
        tree.id = hash;
        Ok(tree)
    }

    pub fn get_item(&self, name: &str) -> Option<&TreeItem> {
        self.tree_items.iter().find(|i| i.name == name)
    }
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        let mut items = Vec::new();
        let mut cursor = data;
        while !cursor.is_empty() {
            let space = cursor
                .iter()
                .position(|&b| b == b' ')
                .ok_or(GitError::InvalidTreeObject)?;
            let mode = TreeItemMode::from_bytes(&cursor[..space])?;

            let nul = cursor[space + 1..]
                .iter()
                .position(|&b| b == 0)
                .ok_or(GitError::InvalidTreeObject)?
                + space
                + 1;
            let name = String::from_utf8(cursor[space + 1..nul].to_vec())
                .map_err(|e| GitError::ConversionError(e.to_string()))?;

            let hash_len = hash.size();
            let hash_start = nul + 1;
            let hash_end = hash_start + hash_len;
            if cursor.len() < hash_end {
                return Err(GitError::InvalidTreeObject);
            }
            let item_hash = ObjectHash::from_bytes(&cursor[hash_start..hash_end])
                .map_err(GitError::InvalidHashValue)?;

            items.push(TreeItem::new(mode, item_hash, name));
            cursor = &cursor[hash_end..];
        }

        Ok(Tree {
            id: hash,
            tree_items: items,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn get_size(&self) -> usize {
        self.tree_items.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        for item in &self.tree_items {
            data.extend(item.mode.to_bytes());
            data.push(b' ');
            data.extend(item.name.as_bytes());
            data.push(0);
            data.extend(item.id.to_data());
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};

    fn blob_hash(content: &[u8]) -> ObjectHash {
        ObjectHash::from_type_and_data(ObjectType::Blob, content)
    }

    #[test]
    fn directories_sort_after_files_with_shared_prefix() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        // "a.txt" sorts before "a/" because the directory entry is compared as "a/"
        let items = vec![
            TreeItem::new(TreeItemMode::Tree, blob_hash(b"x"), "a".to_string()),
            TreeItem::new(TreeItemMode::Blob, blob_hash(b"y"), "a.txt".to_string()),
        ];
        let tree = Tree::from_tree_items(items).unwrap();
        assert_eq!(tree.tree_items[0].name, "a.txt");
        assert_eq!(tree.tree_items[1].name, "a");
    }

    #[test]
    fn round_trips_through_bytes() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let items = vec![
            TreeItem::new(
                TreeItemMode::Blob,
                blob_hash(b"hello\n"),
                "a.txt".to_string(),
            ),
            TreeItem::new(
                TreeItemMode::Blob,
                blob_hash(b"world\n"),
                "b.txt".to_string(),
            ),
        ];
        let tree = Tree::from_tree_items(items).unwrap();
        let data = tree.to_data().unwrap();
        let decoded = Tree::from_bytes(&data, tree.id).unwrap();
        assert_eq!(decoded.tree_items.len(), 2);
        assert_eq!(decoded.get_item("a.txt").unwrap().id, blob_hash(b"hello\n"));
        assert_eq!(decoded.get_item("b.txt").unwrap().id, blob_hash(b"world\n"));
    }

    #[test]
    fn empty_tree_is_rejected() {
        assert!(Tree::from_tree_items(Vec::new()).is_err());
    }
}
