//! Three-way merge: text merge with conflict markers, and recursive tree merge built on top of it.
//!
//! No rename detection — a file deleted on one side and added under a new name on the other is
//! reported as an ordinary delete/add pair, never reconciled. `core.autocrlf` is read from config
//! but defaults to off; when off, bytes are carried through verbatim with no EOL normalization.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use bstr::ByteSlice;
use similar::{Algorithm, ChangeTag, TextDiff};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::{
        object::{
            ObjectTrait,
            tree::{Tree, TreeItem, TreeItemMode},
            types::ObjectType,
        },
        store::ObjectStore,
    },
};

/// Result of merging a file's content three ways.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMerge {
    /// Merged bytes. When `conflicted` is `true` this embeds `<<<<<<<`/`=======`/`>>>>>>>` markers.
    pub content: Vec<u8>,
    pub conflicted: bool,
}

/// Outcome of merging two trees against their common ancestor.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    Clean(ObjectHash),
    /// `tree` is the best-effort result: every non-conflicting path resolved, conflicting paths
    /// left as `ours`. Callers check this out as the working-tree baseline, then overlay marker
    /// content on `paths` via [`write_conflict_markers`].
    Conflicts { tree: Option<ObjectHash>, paths: Vec<PathBuf> },
}

/// Build the map of base indices that a diff against `base` leaves untouched, from base index to
/// the corresponding index in the other sequence.
fn equal_map(tags: impl Iterator<Item = ChangeTag>, base_len: usize) -> Vec<Option<usize>> {
    let mut map = vec![None; base_len];
    let mut old_idx = 0usize;
    let mut new_idx = 0usize;
    for tag in tags {
        match tag {
            ChangeTag::Equal => {
                map[old_idx] = Some(new_idx);
                old_idx += 1;
                new_idx += 1;
            }
            ChangeTag::Delete => old_idx += 1,
            ChangeTag::Insert => new_idx += 1,
        }
    }
    map
}

/// Three-way merge of file content, diff3-style: lines left untouched relative to `base` on both
/// sides anchor the merge; everything between two anchors is taken from whichever side changed it,
/// or flagged as a conflict when both sides changed it differently. `ours_label`/`theirs_label` name
/// the two sides in the conflict markers (conventionally `"HEAD"` and the other side's branch name).
pub fn merge_text(base: &[u8], ours: &[u8], theirs: &[u8], ours_label: &str, theirs_label: &str) -> TextMerge {
    let base_lines: Vec<&[u8]> = base.lines_with_terminator().collect();
    let ours_lines: Vec<&[u8]> = ours.lines_with_terminator().collect();
    let theirs_lines: Vec<&[u8]> = theirs.lines_with_terminator().collect();

    let base_strs: Vec<String> = base_lines.iter().map(|l| l.to_str_lossy().into_owned()).collect();
    let ours_strs: Vec<String> = ours_lines.iter().map(|l| l.to_str_lossy().into_owned()).collect();
    let theirs_strs: Vec<String> = theirs_lines.iter().map(|l| l.to_str_lossy().into_owned()).collect();

    let base_refs: Vec<&str> = base_strs.iter().map(String::as_str).collect();
    let ours_refs: Vec<&str> = ours_strs.iter().map(String::as_str).collect();
    let theirs_refs: Vec<&str> = theirs_strs.iter().map(String::as_str).collect();

    let diff_ours = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_slices(&base_refs, &ours_refs);
    let diff_theirs = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_slices(&base_refs, &theirs_refs);

    let ours_map = equal_map(diff_ours.iter_all_changes().map(|c| c.tag()), base_lines.len());
    let theirs_map = equal_map(diff_theirs.iter_all_changes().map(|c| c.tag()), base_lines.len());

    // Anchors: base lines left untouched by both sides, bracketed by virtual start/end markers.
    let mut anchors: Vec<(isize, isize, isize)> = vec![(-1, -1, -1)];
    for (i, (o, t)) in ours_map.iter().zip(theirs_map.iter()).enumerate() {
        if let (Some(o), Some(t)) = (o, t) {
            anchors.push((i as isize, *o as isize, *t as isize));
        }
    }
    anchors.push((
        base_lines.len() as isize,
        ours_lines.len() as isize,
        theirs_lines.len() as isize,
    ));

    let mut out = Vec::new();
    let mut conflicted = false;

    for pair in anchors.windows(2) {
        let (prev_b, prev_o, prev_t) = pair[0];
        let (next_b, next_o, next_t) = pair[1];

        let base_region = &base_lines[(prev_b + 1) as usize..next_b as usize];
        let ours_region = &ours_lines[(prev_o + 1) as usize..next_o as usize];
        let theirs_region = &theirs_lines[(prev_t + 1) as usize..next_t as usize];

        if ours_region == base_region {
            theirs_region.iter().for_each(|l| out.extend_from_slice(l));
        } else if theirs_region == base_region {
            ours_region.iter().for_each(|l| out.extend_from_slice(l));
        } else if ours_region == theirs_region {
            ours_region.iter().for_each(|l| out.extend_from_slice(l));
        } else {
            conflicted = true;
            out.extend_from_slice(format!("<<<<<<< {ours_label}\n").as_bytes());
            ours_region.iter().for_each(|l| out.extend_from_slice(l));
            out.extend_from_slice(b"=======\n");
            theirs_region.iter().for_each(|l| out.extend_from_slice(l));
            out.extend_from_slice(format!(">>>>>>> {theirs_label}\n").as_bytes());
        }

        if (next_b as usize) < base_lines.len() {
            out.extend_from_slice(base_lines[next_b as usize]);
        }
    }

    TextMerge { content: out, conflicted }
}

/// Flatten a tree's direct entries into a name-keyed map (`None` hash yields an empty tree).
/// Shared with [`crate::ops::revert`], which needs the same per-level flattening to classify
/// add/delete/modify between two commits.
pub(crate) fn tree_entries(store: &ObjectStore, hash: Option<ObjectHash>) -> Result<BTreeMap<String, TreeItem>, GitError> {
    let Some(hash) = hash else {
        return Ok(BTreeMap::new());
    };
    let (object_type, data) = store.read_object(&hash)?;
    if object_type != ObjectType::Tree {
        return Err(GitError::InvalidTreeObject);
    }
    let tree = Tree::from_bytes(&data, hash)?;
    Ok(tree.tree_items.into_iter().map(|item| (item.name.clone(), item)).collect())
}

/// Recursively merge one path level of a tree three ways. Returns the merged subtree's hash (`None`
/// if every entry under it was removed) alongside any conflicted paths found under it, relative to
/// the repository root.
#[allow(clippy::too_many_arguments)]
fn merge_subtree(
    store: &ObjectStore,
    base: Option<ObjectHash>,
    ours: Option<ObjectHash>,
    theirs: Option<ObjectHash>,
    prefix: &Path,
    ours_label: &str,
    theirs_label: &str,
) -> Result<(Option<ObjectHash>, Vec<PathBuf>), GitError> {
    let base_map = tree_entries(store, base)?;
    let ours_map = tree_entries(store, ours)?;
    let theirs_map = tree_entries(store, theirs)?;

    let mut names: BTreeSet<&String> = BTreeSet::new();
    names.extend(base_map.keys());
    names.extend(ours_map.keys());
    names.extend(theirs_map.keys());

    let mut merged_items = Vec::new();
    let mut conflicts = Vec::new();

    for name in names {
        let base_item = base_map.get(name);
        let ours_item = ours_map.get(name);
        let theirs_item = theirs_map.get(name);
        let path = prefix.join(name);

        let resolved: Option<TreeItem> = if ours_item == theirs_item {
            ours_item.cloned()
        } else if ours_item == base_item {
            theirs_item.cloned()
        } else if theirs_item == base_item {
            ours_item.cloned()
        } else {
            match (ours_item, theirs_item) {
                (Some(o), Some(t)) if o.mode.is_tree() && t.mode.is_tree() => {
                    let base_sub = base_item.filter(|b| b.mode.is_tree()).map(|b| b.id);
                    let (sub_hash, mut sub_conflicts) =
                        merge_subtree(store, base_sub, Some(o.id), Some(t.id), &path, ours_label, theirs_label)?;
                    conflicts.append(&mut sub_conflicts);
                    sub_hash.map(|id| TreeItem::new(TreeItemMode::Tree, id, name.clone()))
                }
                (Some(o), Some(t)) if o.mode == t.mode && !o.mode.is_tree() => {
                    let base_bytes = base_item
                        .filter(|b| !b.mode.is_tree())
                        .map(|b| store.read_object(&b.id))
                        .transpose()?
                        .map(|(_, data)| data)
                        .unwrap_or_default();
                    let (_, ours_bytes) = store.read_object(&o.id)?;
                    let (_, theirs_bytes) = store.read_object(&t.id)?;

                    let merged = merge_text(&base_bytes, &ours_bytes, &theirs_bytes, ours_label, theirs_label);
                    if merged.conflicted {
                        conflicts.push(path.clone());
                        Some(o.clone())
                    } else {
                        let hash = store.write_object(ObjectType::Blob, &merged.content)?;
                        Some(TreeItem::new(o.mode, hash, name.clone()))
                    }
                }
                _ => {
                    // add/add type mismatch, mode conflict, or modify/delete.
                    conflicts.push(path.clone());
                    ours_item.or(theirs_item).cloned()
                }
            }
        };

        if let Some(item) = resolved {
            merged_items.push(item);
        }
    }

    if merged_items.is_empty() {
        return Ok((None, conflicts));
    }

    let tree = Tree::from_tree_items(merged_items)?;
    let hash = store.write_object(ObjectType::Tree, &tree.to_data()?)?;
    Ok((Some(hash), conflicts))
}

/// Three-way merge of two tree snapshots against their common ancestor (`None` for an initial
/// commit with no shared history). A clean result writes the merged tree into `store` and returns
/// its hash; a conflicted result leaves the store untouched for the conflicted paths' content but
/// still writes through clean subtrees, matching the "conflicts are first-class state, not errors"
/// convention.
pub fn merge_trees(
    store: &ObjectStore,
    base: Option<ObjectHash>,
    ours: ObjectHash,
    theirs: ObjectHash,
    ours_label: &str,
    theirs_label: &str,
) -> Result<MergeOutcome, GitError> {
    merge_trees_opt(store, base, Some(ours), Some(theirs), ours_label, theirs_label)
}

/// Same as [`merge_trees`] but allows either side to be absent (`None`), for callers reconciling
/// against a commit with no parent tree, e.g. [`crate::ops::revert`] undoing the root commit.
pub(crate) fn merge_trees_opt(
    store: &ObjectStore,
    base: Option<ObjectHash>,
    ours: Option<ObjectHash>,
    theirs: Option<ObjectHash>,
    ours_label: &str,
    theirs_label: &str,
) -> Result<MergeOutcome, GitError> {
    let (hash, conflicts) = merge_subtree(store, base, ours, theirs, Path::new(""), ours_label, theirs_label)?;
    if !conflicts.is_empty() {
        return Ok(MergeOutcome::Conflicts { tree: hash, paths: conflicts });
    }
    let hash = hash.ok_or_else(|| GitError::EmptyTreeItems("merge left no entries".to_string()))?;
    Ok(MergeOutcome::Clean(hash))
}

/// Look up a path inside a tree, descending one component at a time (`None` tree is empty).
pub(crate) fn lookup_path(
    store: &ObjectStore,
    tree: Option<ObjectHash>,
    path: &Path,
) -> Result<Option<TreeItem>, GitError> {
    let mut current = tree;
    let mut item = None;
    for component in path.iter() {
        let name = component.to_string_lossy();
        let entries = tree_entries(store, current)?;
        match entries.get(name.as_ref()) {
            Some(found) => {
                current = found.mode.is_tree().then_some(found.id);
                item = Some(found.clone());
            }
            None => return Ok(None),
        }
    }
    Ok(item)
}

fn read_blob_at(store: &ObjectStore, tree: Option<ObjectHash>, path: &Path) -> Result<Vec<u8>, GitError> {
    match lookup_path(store, tree, path)? {
        Some(item) if !item.mode.is_tree() => Ok(store.read_object(&item.id)?.1),
        _ => Ok(Vec::new()),
    }
}

/// Overwrite each path in `conflicted_paths` on disk under `repo_root` with its three-way text
/// merge against `base`/`ours`/`theirs`, markers included. Used after checking out a conflicted
/// merge's best-effort tree, to materialize the parts that tree can't represent (this index model
/// holds one entry per path, not git's multi-stage index).
pub(crate) fn write_conflict_markers(
    store: &ObjectStore,
    repo_root: &Path,
    conflicted_paths: &[PathBuf],
    base: Option<ObjectHash>,
    ours: Option<ObjectHash>,
    theirs: Option<ObjectHash>,
    ours_label: &str,
    theirs_label: &str,
) -> Result<(), GitError> {
    for path in conflicted_paths {
        let base_bytes = read_blob_at(store, base, path)?;
        let ours_bytes = read_blob_at(store, ours, path)?;
        let theirs_bytes = read_blob_at(store, theirs, path)?;
        let merged = merge_text(&base_bytes, &ours_bytes, &theirs_bytes, ours_label, theirs_label);

        let full_path = repo_root.join(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full_path, &merged.content)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};

    #[test]
    fn merging_a_file_against_itself_is_the_identity() {
        let content = b"alpha\nbeta\ngamma\n";
        let merged = merge_text(content, content, content, "HEAD", "feature");
        assert!(!merged.conflicted);
        assert_eq!(merged.content, content);
    }

    #[test]
    fn unchanged_base_takes_the_other_sides_edit() {
        let base = b"alpha\nbeta\ngamma\n";
        let ours = b"alpha\nbeta\ngamma\n";
        let theirs = b"alpha\nBETA\ngamma\n";
        let merged = merge_text(base, ours, theirs, "HEAD", "feature");
        assert!(!merged.conflicted);
        assert_eq!(merged.content, theirs.to_vec());
    }

    #[test]
    fn conflicting_edits_to_the_same_line_produce_markers() {
        let base = b"alpha\nbeta\ngamma\n";
        let ours = b"alpha\nOURS\ngamma\n";
        let theirs = b"alpha\nTHEIRS\ngamma\n";
        let merged = merge_text(base, ours, theirs, "HEAD", "feature");
        assert!(merged.conflicted);
        let text = String::from_utf8(merged.content).unwrap();
        assert!(text.contains("<<<<<<< HEAD"));
        assert!(text.contains("OURS\n"));
        assert!(text.contains("======="));
        assert!(text.contains("THEIRS\n"));
        assert!(text.contains(">>>>>>> feature"));
    }

    #[test]
    fn identical_edits_on_both_sides_are_not_a_conflict() {
        let base = b"alpha\nbeta\ngamma\n";
        let ours = b"alpha\nBOTH\ngamma\n";
        let theirs = b"alpha\nBOTH\ngamma\n";
        let merged = merge_text(base, ours, theirs, "HEAD", "feature");
        assert!(!merged.conflicted);
        assert_eq!(merged.content, ours.to_vec());
    }

    fn write_blob(store: &ObjectStore, content: &[u8]) -> ObjectHash {
        store.write_object(ObjectType::Blob, content).unwrap()
    }

    fn write_tree(store: &ObjectStore, items: Vec<TreeItem>) -> ObjectHash {
        let tree = Tree::from_tree_items(items).unwrap();
        store.write_object(ObjectType::Tree, &tree.to_data().unwrap()).unwrap()
    }

    #[test]
    fn clean_tree_merge_combines_independent_edits() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let base_a = write_blob(&store, b"a\n");
        let base_b = write_blob(&store, b"b\n");
        let base = write_tree(
            &store,
            vec![
                TreeItem::new(TreeItemMode::Blob, base_a, "a.txt".to_string()),
                TreeItem::new(TreeItemMode::Blob, base_b, "b.txt".to_string()),
            ],
        );

        let ours_a = write_blob(&store, b"a changed by us\n");
        let ours = write_tree(
            &store,
            vec![
                TreeItem::new(TreeItemMode::Blob, ours_a, "a.txt".to_string()),
                TreeItem::new(TreeItemMode::Blob, base_b, "b.txt".to_string()),
            ],
        );

        let theirs_b = write_blob(&store, b"b changed by them\n");
        let theirs = write_tree(
            &store,
            vec![
                TreeItem::new(TreeItemMode::Blob, base_a, "a.txt".to_string()),
                TreeItem::new(TreeItemMode::Blob, theirs_b, "b.txt".to_string()),
            ],
        );

        let outcome = merge_trees(&store, Some(base), ours, theirs, "HEAD", "feature").unwrap();
        let MergeOutcome::Clean(hash) = outcome else {
            panic!("expected a clean merge");
        };

        let (_, data) = store.read_object(&hash).unwrap();
        let merged = Tree::from_bytes(&data, hash).unwrap();
        assert_eq!(merged.get_item("a.txt").unwrap().id, ours_a);
        assert_eq!(merged.get_item("b.txt").unwrap().id, theirs_b);
    }

    #[test]
    fn modify_delete_conflict_is_reported() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let base_a = write_blob(&store, b"a\n");
        let base = write_tree(&store, vec![TreeItem::new(TreeItemMode::Blob, base_a, "a.txt".to_string())]);

        let ours_a = write_blob(&store, b"a changed\n");
        let ours = write_tree(&store, vec![TreeItem::new(TreeItemMode::Blob, ours_a, "a.txt".to_string())]);

        let placeholder = write_blob(&store, b"placeholder\n");
        let theirs = write_tree(&store, vec![TreeItem::new(TreeItemMode::Blob, placeholder, "keep.txt".to_string())]);

        let outcome = merge_trees(&store, Some(base), ours, theirs, "HEAD", "feature").unwrap();
        match outcome {
            MergeOutcome::Conflicts { paths, .. } => assert_eq!(paths, vec![PathBuf::from("a.txt")]),
            MergeOutcome::Clean(_) => panic!("expected a modify/delete conflict"),
        }
    }
}
