//! Commit-ancestry queries: reachability, fast-forward checks, and merge-base computation.
//!
//! Merge-base is the full common-ancestor-*set* reduced to its minimal elements (discarding any
//! candidate that is itself an ancestor of another candidate), not a first-parent-only walk — two
//! branches that each merged the same third branch in a different order still agree on every base
//! that matters for a three-way merge.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::commit::Commit;
use crate::internal::store::ObjectStore;

fn load_commit(store: &ObjectStore, hash: ObjectHash) -> Result<Commit, GitError> {
    let (object_type, data) = store.read_object(&hash)?;
    if object_type != crate::internal::object::types::ObjectType::Commit {
        return Err(GitError::InvalidCommitObject);
    }
    Commit::from_bytes(&data, hash)
}

/// Every commit reachable from `start` by following parent edges, `start` included.
pub fn ancestors(store: &ObjectStore, start: ObjectHash) -> Result<HashSet<ObjectHash>, GitError> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(hash) = queue.pop_front() {
        if !seen.insert(hash) {
            continue;
        }
        let commit = load_commit(store, hash)?;
        queue.extend(commit.parent_commit_ids.iter().copied());
    }
    Ok(seen)
}

/// `true` if `candidate` is `descendant` itself or one of its ancestors.
pub fn is_ancestor(
    store: &ObjectStore,
    candidate: ObjectHash,
    descendant: ObjectHash,
) -> Result<bool, GitError> {
    if candidate == descendant {
        return Ok(true);
    }
    let mut queue = VecDeque::from([descendant]);
    let mut seen = HashSet::new();
    while let Some(hash) = queue.pop_front() {
        if !seen.insert(hash) {
            continue;
        }
        let commit = load_commit(store, hash)?;
        for parent in commit.parent_commit_ids {
            if parent == candidate {
                return Ok(true);
            }
            queue.push_back(parent);
        }
    }
    Ok(false)
}

/// Every minimal common ancestor of `a` and `b`: elements of `ancestors(a) ∩ ancestors(b)` that are
/// not themselves an ancestor of another element of that intersection. Empty when the two commits
/// share no history.
pub fn merge_bases(
    store: &ObjectStore,
    a: ObjectHash,
    b: ObjectHash,
) -> Result<Vec<ObjectHash>, GitError> {
    let ancestors_a = ancestors(store, a)?;
    let ancestors_b = ancestors(store, b)?;
    let common: HashSet<ObjectHash> = ancestors_a.intersection(&ancestors_b).copied().collect();
    if common.is_empty() {
        return Ok(Vec::new());
    }

    let mut is_redundant: HashMap<ObjectHash, bool> = common.iter().map(|h| (*h, false)).collect();
    for &candidate in &common {
        let commit = load_commit(store, candidate)?;
        let mut queue: VecDeque<ObjectHash> = commit.parent_commit_ids.into_iter().collect();
        let mut seen = HashSet::new();
        while let Some(hash) = queue.pop_front() {
            if !seen.insert(hash) {
                continue;
            }
            if let Some(flag) = is_redundant.get_mut(&hash) {
                *flag = true;
            }
            let parent_commit = load_commit(store, hash)?;
            queue.extend(parent_commit.parent_commit_ids);
        }
    }

    let mut result: Vec<ObjectHash> = is_redundant
        .into_iter()
        .filter(|(_, redundant)| !redundant)
        .map(|(hash, _)| hash)
        .collect();
    result.sort_by_key(|h| h.to_string());
    Ok(result)
}

/// The single merge base a three-way merge should use when more than one minimal base exists: the
/// most recent by committer timestamp, ties broken by hash string for determinism.
pub fn primary_merge_base(
    store: &ObjectStore,
    a: ObjectHash,
    b: ObjectHash,
) -> Result<Option<ObjectHash>, GitError> {
    let bases = merge_bases(store, a, b)?;
    let mut best: Option<(i64, String, ObjectHash)> = None;
    for hash in bases {
        let commit = load_commit(store, hash)?;
        let key = (commit.committer.timestamp, hash.to_string());
        let is_better = match &best {
            None => true,
            Some((ts, s, _)) => (key.0, key.1.as_str()) > (*ts, s.as_str()),
        };
        if is_better {
            best = Some((key.0, key.1, hash));
        }
    }
    Ok(best.map(|(_, _, hash)| hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use crate::internal::object::signature::{Signature, SignatureType};
    use crate::internal::object::tree::{Tree, TreeItem, TreeItemMode};
    use crate::internal::object::types::ObjectType;

    fn commit_on(store: &ObjectStore, content: &[u8], parents: Vec<ObjectHash>, ts: i64) -> ObjectHash {
        let blob_hash = store.write_object(ObjectType::Blob, content).unwrap();
        let tree = Tree::from_tree_items(vec![TreeItem::new(TreeItemMode::Blob, blob_hash, "f".to_string())]).unwrap();
        let tree_hash = store.write_object(ObjectType::Tree, &tree.to_data().unwrap()).unwrap();
        let mut sig = Signature::new(SignatureType::Author, "A".to_string(), "a@x.com".to_string());
        sig.timestamp = ts;
        let mut committer = sig.clone();
        committer.signature_type = SignatureType::Committer;
        let commit = Commit::new(sig, committer, tree_hash, parents, "msg");
        store.write_object(ObjectType::Commit, &commit.to_data().unwrap()).unwrap()
    }

    #[test]
    fn linear_history_merge_base_is_the_common_ancestor() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let base = commit_on(&store, b"base", vec![], 1);
        let left = commit_on(&store, b"left", vec![base], 2);
        let right = commit_on(&store, b"right", vec![base], 3);

        assert_eq!(merge_bases(&store, left, right).unwrap(), vec![base]);
        assert_eq!(primary_merge_base(&store, left, right).unwrap(), Some(base));
    }

    #[test]
    fn is_ancestor_detects_both_directions() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let base = commit_on(&store, b"base", vec![], 1);
        let child = commit_on(&store, b"child", vec![base], 2);

        assert!(is_ancestor(&store, base, child).unwrap());
        assert!(!is_ancestor(&store, child, base).unwrap());
        assert!(is_ancestor(&store, base, base).unwrap());
    }

    #[test]
    fn unrelated_histories_have_no_merge_base() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let a = commit_on(&store, b"a", vec![], 1);
        let b = commit_on(&store, b"b", vec![], 2);

        assert!(merge_bases(&store, a, b).unwrap().is_empty());
    }
}
