//! Merge operation engine: fast-forward detection, the three-way merge in [`crate::merge`], a
//! checkpointed conflict state when it can't resolve cleanly, and materializing conflict markers
//! into the working tree for whatever it couldn't.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::commit::Commit;
use crate::internal::object::types::ObjectType;
use crate::merge::{self, MergeOutcome};
use crate::ops::checkout::checkout_tree_replacing;
use crate::ops::commit::{advance_head, write_commit};
use crate::ops::graph;
use crate::ops::hooks::{self, HookKind};
use crate::ops::state::{self, MERGE_STATE_FILE, REVERT_STATE_FILE};
use crate::refs::HeadState;
use crate::repository::Repository;

/// Options controlling a single `merge` invocation.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub no_verify: bool,
    /// Skip the fast-forward shortcut even when one applies, always producing a merge commit.
    pub no_ff: bool,
}

/// Checkpoint persisted at `.wit/MERGE_STATE.json` while a merge has unresolved conflicts —
/// `commit` auto-detects this and folds `their_commit` in as the merge commit's second parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeState {
    pub our_commit: ObjectHash,
    pub their_commit: ObjectHash,
    pub their_label: String,
    pub unresolved: Vec<PathBuf>,
}

/// Outcome of a single `merge` call.
#[derive(Debug, Clone)]
pub enum MergeReport {
    AlreadyUpToDate,
    FastForwarded(ObjectHash),
    Merged(ObjectHash),
    Conflicts(Vec<PathBuf>),
}

/// Merge `their_ref` into `HEAD`.
pub async fn merge(repo: &Repository, their_ref: &str, options: MergeOptions) -> Result<MergeReport, GitError> {
    let _lock = repo.lock()?;
    state::guard_no_other_operation(repo.wit_dir(), MERGE_STATE_FILE)?;

    if !matches!(repo.refs.read_head()?, HeadState::Symbolic(_)) {
        return Err(GitError::DetachedHead("cannot merge onto a detached HEAD".to_string()));
    }

    let their_commit_id = repo.resolve(their_ref)?;

    let Ok(our_commit_id) = repo.resolve("HEAD") else {
        // Unborn branch: merging is just taking their tip as the first commit.
        let their_commit = load_commit(repo, their_commit_id)?;
        let old_index = repo.load_index()?;
        let index = checkout_tree_replacing(&repo.store, repo.work_dir(), their_commit.tree_id, &old_index)?;
        repo.save_index(&index)?;
        advance_head(&repo.refs, their_commit_id)?;
        repo.journal.append(
            "merge",
            vec![their_ref.to_string()],
            json!({ "head": null }),
            json!({ "head": their_commit_id.to_string() }),
            json!({ "fast_forward": true }),
        )?;
        return Ok(MergeReport::FastForwarded(their_commit_id));
    };

    if our_commit_id == their_commit_id {
        return Ok(MergeReport::AlreadyUpToDate);
    }

    if graph::is_ancestor(&repo.store, their_commit_id, our_commit_id)? {
        return Ok(MergeReport::AlreadyUpToDate);
    }

    if !options.no_ff && graph::is_ancestor(&repo.store, our_commit_id, their_commit_id)? {
        let their_commit = load_commit(repo, their_commit_id)?;
        let old_index = repo.load_index()?;
        let index = checkout_tree_replacing(&repo.store, repo.work_dir(), their_commit.tree_id, &old_index)?;
        repo.save_index(&index)?;
        advance_head(&repo.refs, their_commit_id)?;
        repo.journal.append(
            "merge",
            vec![their_ref.to_string()],
            json!({ "head": our_commit_id.to_string() }),
            json!({ "head": their_commit_id.to_string() }),
            json!({ "fast_forward": true }),
        )?;
        return Ok(MergeReport::FastForwarded(their_commit_id));
    }

    hooks::run_hook(repo.wit_dir(), HookKind::PreCommit, &[], &[], options.no_verify).await?;

    let base = graph::primary_merge_base(&repo.store, our_commit_id, their_commit_id)?;
    let base_tree = base.map(|b| load_commit(repo, b)).transpose()?.map(|c| c.tree_id);
    let our_commit = load_commit(repo, our_commit_id)?;
    let their_commit = load_commit(repo, their_commit_id)?;

    let outcome = merge::merge_trees(
        &repo.store,
        base_tree,
        our_commit.tree_id,
        their_commit.tree_id,
        "HEAD",
        their_ref,
    )?;

    match outcome {
        MergeOutcome::Clean(tree_id) => {
            let old_index = repo.load_index()?;
            let index = checkout_tree_replacing(&repo.store, repo.work_dir(), tree_id, &old_index)?;
            repo.save_index(&index)?;
            let message = format!("Merge {their_ref} into HEAD");
            let commit_id = write_commit(repo, tree_id, vec![our_commit_id, their_commit_id], &message)?;
            state::clear(repo.wit_dir(), REVERT_STATE_FILE)?;
            repo.journal.append(
                "merge",
                vec![their_ref.to_string()],
                json!({ "head": our_commit_id.to_string() }),
                json!({ "head": commit_id.to_string() }),
                json!({ "fast_forward": false }),
            )?;
            Ok(MergeReport::Merged(commit_id))
        }
        MergeOutcome::Conflicts { tree, paths } => {
            let old_index = repo.load_index()?;
            if let Some(tree) = tree {
                let index = checkout_tree_replacing(&repo.store, repo.work_dir(), tree, &old_index)?;
                repo.save_index(&index)?;
            }
            merge::write_conflict_markers(
                &repo.store,
                repo.work_dir(),
                &paths,
                base_tree,
                Some(our_commit.tree_id),
                Some(their_commit.tree_id),
                "HEAD",
                their_ref,
            )?;

            let merge_state = MergeState {
                our_commit: our_commit_id,
                their_commit: their_commit_id,
                their_label: their_ref.to_string(),
                unresolved: paths.clone(),
            };
            state::save(repo.wit_dir(), MERGE_STATE_FILE, &merge_state)?;

            repo.journal.append(
                "merge",
                vec![their_ref.to_string()],
                json!({ "head": our_commit_id.to_string() }),
                json!({ "head": our_commit_id.to_string() }),
                json!({ "conflicts": paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>() }),
            )?;
            Ok(MergeReport::Conflicts(paths))
        }
    }
}

/// Abandon an in-progress merge: drop the checkpoint and restore the working tree/index to `HEAD`.
pub fn abort(repo: &Repository) -> Result<(), GitError> {
    let _lock = repo.lock()?;
    let merge_state: Option<MergeState> = state::load(repo.wit_dir(), MERGE_STATE_FILE)?;
    let Some(merge_state) = merge_state else {
        return Err(GitError::OperationFailed("no merge in progress".to_string()));
    };

    let head_commit = load_commit(repo, merge_state.our_commit)?;
    let old_index = repo.load_index()?;
    let index = checkout_tree_replacing(&repo.store, repo.work_dir(), head_commit.tree_id, &old_index)?;
    repo.save_index(&index)?;
    state::clear(repo.wit_dir(), MERGE_STATE_FILE)?;
    Ok(())
}

fn load_commit(repo: &Repository, hash: ObjectHash) -> Result<Commit, GitError> {
    let (object_type, data) = repo.store.read_object(&hash)?;
    if object_type != ObjectType::Commit {
        return Err(GitError::InvalidCommitObject);
    }
    Commit::from_bytes(&data, hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::index::IndexEntry;
    use crate::internal::object::blob::Blob;
    use crate::internal::object::tree::TreeItemMode;
    use crate::ops::commit::{commit, CommitOptions};
    use tempfile::tempdir;

    fn init_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path(), "main").unwrap();
        let mut config = repo.config.clone();
        config.user_name = Some("Test User".to_string());
        config.user_email = Some("test@example.com".to_string());
        config.save(repo.wit_dir()).unwrap();
        let repo = Repository::open(dir.path()).unwrap();
        (dir, repo)
    }

    fn write_file(repo: &Repository, path: &str, content: &[u8]) {
        let full = repo.work_dir().join(path);
        std::fs::write(&full, content).unwrap();
        let blob = Blob::from_content(std::str::from_utf8(content).unwrap());
        let hash = repo.store.write_object(ObjectType::Blob, &blob.data).unwrap();
        let mut index = repo.load_index().unwrap();
        let metadata = std::fs::symlink_metadata(&full).unwrap();
        index.add(path, IndexEntry::from_metadata(TreeItemMode::Blob, hash, &metadata));
        repo.save_index(&index).unwrap();
    }

    async fn do_commit(repo: &Repository, message: &str) -> ObjectHash {
        commit(repo, CommitOptions { message: message.to_string(), ..Default::default() })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fast_forward_merge_moves_head_without_a_merge_commit() {
        let (_dir, repo) = init_repo();
        write_file(&repo, "a.txt", b"one\n");
        do_commit(&repo, "first").await;

        repo.refs.create("refs/heads/feature", repo.resolve("HEAD").unwrap()).unwrap();
        repo.refs.set_head_symbolic("refs/heads/feature").unwrap();
        write_file(&repo, "a.txt", b"two\n");
        let feature_tip = do_commit(&repo, "second").await;
        repo.refs.set_head_symbolic("refs/heads/main").unwrap();

        let report = merge(&repo, "refs/heads/feature", MergeOptions::default()).await.unwrap();
        assert!(matches!(report, MergeReport::FastForwarded(h) if h == feature_tip));
        assert_eq!(repo.resolve("HEAD").unwrap(), feature_tip);
    }

    #[tokio::test]
    async fn clean_three_way_merge_produces_a_two_parent_commit() {
        let (_dir, repo) = init_repo();
        write_file(&repo, "a.txt", b"base\n");
        write_file(&repo, "b.txt", b"base\n");
        let base_commit = do_commit(&repo, "base").await;

        repo.refs.create("refs/heads/feature", base_commit).unwrap();
        repo.refs.set_head_symbolic("refs/heads/feature").unwrap();
        write_file(&repo, "b.txt", b"changed on feature\n");
        let feature_tip = do_commit(&repo, "feature change").await;

        repo.refs.set_head_symbolic("refs/heads/main").unwrap();
        write_file(&repo, "a.txt", b"changed on main\n");
        do_commit(&repo, "main change").await;

        let report = merge(&repo, "refs/heads/feature", MergeOptions::default()).await.unwrap();
        let MergeReport::Merged(commit_id) = report else {
            panic!("expected a clean merge commit");
        };
        let merged = repo.head_commit().unwrap();
        assert_eq!(merged.id, commit_id);
        assert_eq!(merged.parent_commit_ids.len(), 2);
        assert!(merged.parent_commit_ids.contains(&feature_tip));
        assert_eq!(std::fs::read(repo.work_dir().join("b.txt")).unwrap(), b"changed on feature\n");
    }

    #[tokio::test]
    async fn conflicting_merge_checkpoints_and_writes_markers() {
        let (_dir, repo) = init_repo();
        write_file(&repo, "a.txt", b"base\n");
        let base_commit = do_commit(&repo, "base").await;

        repo.refs.create("refs/heads/feature", base_commit).unwrap();
        repo.refs.set_head_symbolic("refs/heads/feature").unwrap();
        write_file(&repo, "a.txt", b"feature change\n");
        do_commit(&repo, "feature change").await;

        repo.refs.set_head_symbolic("refs/heads/main").unwrap();
        write_file(&repo, "a.txt", b"main change\n");
        do_commit(&repo, "main change").await;

        let report = merge(&repo, "refs/heads/feature", MergeOptions::default()).await.unwrap();
        assert!(matches!(report, MergeReport::Conflicts(ref paths) if paths == &[PathBuf::from("a.txt")]));

        let content = std::fs::read_to_string(repo.work_dir().join("a.txt")).unwrap();
        assert!(content.contains("<<<<<<< HEAD"));
        assert!(content.contains(">>>>>>> refs/heads/feature"));

        let state: MergeState = state::load(repo.wit_dir(), MERGE_STATE_FILE).unwrap().unwrap();
        assert_eq!(state.unresolved, vec![PathBuf::from("a.txt")]);

        let second_merge = merge(&repo, "refs/heads/feature", MergeOptions::default()).await;
        assert!(matches!(second_merge, Err(GitError::MergeInProgress(_))));
    }

    #[tokio::test]
    async fn abort_restores_head_tree_and_clears_checkpoint() {
        let (_dir, repo) = init_repo();
        write_file(&repo, "a.txt", b"base\n");
        let base_commit = do_commit(&repo, "base").await;

        repo.refs.create("refs/heads/feature", base_commit).unwrap();
        repo.refs.set_head_symbolic("refs/heads/feature").unwrap();
        write_file(&repo, "a.txt", b"feature change\n");
        do_commit(&repo, "feature change").await;

        repo.refs.set_head_symbolic("refs/heads/main").unwrap();
        write_file(&repo, "a.txt", b"main change\n");
        do_commit(&repo, "main change").await;

        merge(&repo, "refs/heads/feature", MergeOptions::default()).await.unwrap();
        abort(&repo).unwrap();

        assert_eq!(std::fs::read(repo.work_dir().join("a.txt")).unwrap(), b"main change\n");
        let state: Option<MergeState> = state::load(repo.wit_dir(), MERGE_STATE_FILE).unwrap();
        assert!(state.is_none());
    }
}
