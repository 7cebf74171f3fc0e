//! Object-graph reachability, used to compute exactly which objects a push or pack-export needs to
//! ship: everything reachable from the new tips, minus what the other side is assumed to already
//! have reachable from the old tips.

use std::collections::{HashSet, VecDeque};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::commit::Commit;
use crate::internal::object::tree::Tree;
use crate::internal::object::types::ObjectType;
use crate::internal::store::ObjectStore;

/// Walk every object reachable from `roots`, optionally following parent-commit edges.
///
/// With `expand_parents: false`, only the roots themselves (and their own tree/blob closures) are
/// included — their ancestry is not walked. This gives the cheap one-hop boundary used to exclude
/// objects the remote already has, without requiring a full ancestor negotiation.
pub fn reachable(
    store: &ObjectStore,
    roots: &[ObjectHash],
    expand_parents: bool,
) -> Result<HashSet<ObjectHash>, GitError> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<ObjectHash> = roots.iter().copied().collect();

    while let Some(hash) = queue.pop_front() {
        if !seen.insert(hash) {
            continue;
        }
        let (object_type, data) = store.read_object(&hash)?;
        match object_type {
            ObjectType::Commit => {
                let commit = Commit::from_bytes(&data, hash)?;
                queue.push_back(commit.tree_id);
                if expand_parents {
                    queue.extend(commit.parent_commit_ids.iter().copied());
                }
            }
            ObjectType::Tree => {
                let tree = Tree::from_bytes(&data, hash)?;
                for item in &tree.tree_items {
                    queue.push_back(item.id);
                }
            }
            ObjectType::Blob => {}
            ObjectType::Tag => {}
            ObjectType::OffsetDelta | ObjectType::HashDelta => {
                return Err(GitError::InvalidObjectType(
                    "delta objects are not reachable from a store".to_string(),
                ));
            }
        }
    }

    Ok(seen)
}

/// Objects that must travel to bring the remote from `old` up to `new`: everything reachable from
/// `new`, minus the one-hop closure of `old` (its own trees/blobs, not its ancestors).
pub fn objects_to_send(
    store: &ObjectStore,
    new_tips: &[ObjectHash],
    old_tips: &[ObjectHash],
) -> Result<Vec<ObjectHash>, GitError> {
    let have = reachable(store, old_tips, false)?;
    let want = reachable(store, new_tips, true)?;
    Ok(want.difference(&have).copied().collect())
}
