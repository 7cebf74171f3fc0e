//! Revert operation engine: for each target commit, reconciles the inverse of its own change
//! (its tree against the mainline parent's) against the current `HEAD` via the same three-way
//! merge [`crate::ops::merge`] uses, producing one revert commit per target unless `--no-commit`,
//! and checkpointing on conflict so `--continue`/`--abort` can pick the operation back up.

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
use crate::ops::commit::{advance_head, contains_conflict_markers, write_commit};
use crate::ops::hooks::{self, HookKind};
use crate::ops::state::{self, MERGE_STATE_FILE, REVERT_STATE_FILE};
use crate::repository::Repository;

/// Options controlling a single `revert` invocation.
#[derive(Debug, Clone, Default)]
pub struct RevertOptions {
    /// 1-indexed parent selecting "the change" when reverting a merge commit.
    pub mainline: Option<usize>,
    pub no_commit: bool,
    pub no_verify: bool,
}

/// Checkpoint persisted at `.wit/REVERT_STATE.json` while a revert sequence is in progress or
/// paused on a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevertState {
    pub commits: Vec<ObjectHash>,
    pub current_index: usize,
    pub applied: Vec<ObjectHash>,
    pub original_head: ObjectHash,
    pub unresolved: Vec<PathBuf>,
    pub no_commit: bool,
    pub mainline: Option<usize>,
}

/// Outcome of a `revert`/`continue_revert` call.
#[derive(Debug, Clone)]
pub enum RevertReport {
    /// Every target reverted; carries the new revert commits' ids, in order (empty for
    /// `--no-commit`, which stages the result without committing).
    Completed(Vec<ObjectHash>),
    Conflicts(Vec<PathBuf>),
}

/// Revert `targets`, oldest-first, atop the current `HEAD`.
pub async fn revert(repo: &Repository, targets: &[ObjectHash], options: RevertOptions) -> Result<RevertReport, GitError> {
    let _lock = repo.lock()?;
    state::guard_no_other_operation(repo.wit_dir(), REVERT_STATE_FILE)?;

    if options.no_commit && targets.len() > 1 {
        return Err(GitError::InvalidArgument(
            "--no-commit only supports reverting a single commit at a time".to_string(),
        ));
    }

    let original_head = repo.resolve("HEAD")?;
    hooks::run_hook(repo.wit_dir(), HookKind::PreCommit, &[], &[], options.no_verify).await?;

    let mut state = RevertState {
        commits: targets.to_vec(),
        current_index: 0,
        applied: Vec::new(),
        original_head,
        unresolved: Vec::new(),
        no_commit: options.no_commit,
        mainline: options.mainline,
    };

    run_revert_steps(repo, &mut state).await
}

/// Resume an in-progress revert after its conflicted paths have been resolved and staged.
pub async fn continue_revert(repo: &Repository) -> Result<RevertReport, GitError> {
    let _lock = repo.lock()?;
    let mut state: RevertState = state::load(repo.wit_dir(), REVERT_STATE_FILE)?
        .ok_or_else(|| GitError::OperationFailed("no revert in progress".to_string()))?;

    for path in &state.unresolved {
        if contains_conflict_markers(repo.work_dir().join(path))? {
            return Err(GitError::ConflictsPresent(format!(
                "{} still has unresolved conflict markers",
                path.display()
            )));
        }
    }

    let target = state.commits[state.current_index];
    let commit_to_revert = load_commit(repo, target)?;
    let current_head = repo.resolve("HEAD")?;
    let message = revert_message(&commit_to_revert, target);
    let commit_id = write_commit(repo, repo.load_index()?.build_tree(&repo.store)?, vec![current_head], &message)?;
    state.applied.push(commit_id);
    state.unresolved.clear();
    state.current_index += 1;

    repo.journal.append(
        "revert",
        vec![target.to_string()],
        json!({ "head": current_head.to_string() }),
        json!({ "head": commit_id.to_string() }),
        json!({ "resumed": true }),
    )?;

    run_revert_steps(repo, &mut state).await
}

/// Abandon an in-progress revert: drop the checkpoint and restore `HEAD`/the working tree to
/// however they stood before the revert started.
pub fn abort(repo: &Repository) -> Result<(), GitError> {
    let _lock = repo.lock()?;
    let state: RevertState = state::load(repo.wit_dir(), REVERT_STATE_FILE)?
        .ok_or_else(|| GitError::OperationFailed("no revert in progress".to_string()))?;

    let head_commit = load_commit(repo, state.original_head)?;
    let old_index = repo.load_index()?;
    let index = checkout_tree_replacing(&repo.store, repo.work_dir(), head_commit.tree_id, &old_index)?;
    repo.save_index(&index)?;
    advance_head(&repo.refs, state.original_head)?;
    state::clear(repo.wit_dir(), REVERT_STATE_FILE)?;
    Ok(())
}

async fn run_revert_steps(repo: &Repository, state: &mut RevertState) -> Result<RevertReport, GitError> {
    while state.current_index < state.commits.len() {
        let target = state.commits[state.current_index];
        let commit_to_revert = load_commit(repo, target)?;
        let parent_tree = select_mainline_parent(repo, &commit_to_revert, state.mainline)?;

        let current_head = repo.resolve("HEAD")?;
        let head_commit = load_commit(repo, current_head)?;

        let label = format!("revert of {target}");
        let outcome = merge::merge_trees_opt(
            &repo.store,
            Some(commit_to_revert.tree_id),
            Some(head_commit.tree_id),
            parent_tree,
            "HEAD",
            &label,
        )?;

        match outcome {
            MergeOutcome::Clean(tree_id) => {
                let old_index = repo.load_index()?;
                let index = checkout_tree_replacing(&repo.store, repo.work_dir(), tree_id, &old_index)?;
                repo.save_index(&index)?;

                if state.no_commit {
                    state.current_index += 1;
                    break;
                }

                let message = revert_message(&commit_to_revert, target);
                let commit_id = write_commit(repo, tree_id, vec![current_head], &message)?;
                state.applied.push(commit_id);
                state.current_index += 1;

                repo.journal.append(
                    "revert",
                    vec![target.to_string()],
                    json!({ "head": current_head.to_string() }),
                    json!({ "head": commit_id.to_string() }),
                    json!({ "reverted": target.to_string() }),
                )?;
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
                    Some(commit_to_revert.tree_id),
                    Some(head_commit.tree_id),
                    parent_tree,
                    "HEAD",
                    &label,
                )?;

                state.unresolved = paths.clone();
                state::save(repo.wit_dir(), REVERT_STATE_FILE, &state)?;

                repo.journal.append(
                    "revert",
                    vec![target.to_string()],
                    json!({ "head": current_head.to_string() }),
                    json!({ "head": current_head.to_string() }),
                    json!({ "conflicts": paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>() }),
                )?;
                return Ok(RevertReport::Conflicts(paths));
            }
        }
    }

    state::clear(repo.wit_dir(), REVERT_STATE_FILE)?;
    Ok(RevertReport::Completed(state.applied.clone()))
}

fn select_mainline_parent(
    repo: &Repository,
    commit: &Commit,
    mainline: Option<usize>,
) -> Result<Option<ObjectHash>, GitError> {
    if commit.parent_commit_ids.len() > 1 {
        let index = mainline.ok_or_else(|| {
            GitError::InvalidArgument("reverting a merge commit requires --mainline".to_string())
        })?;
        let parent_hash = commit
            .parent_commit_ids
            .get(index.wrapping_sub(1))
            .copied()
            .ok_or_else(|| GitError::InvalidArgument(format!("mainline parent {index} does not exist")))?;
        Ok(Some(load_commit(repo, parent_hash)?.tree_id))
    } else {
        match commit.parent_commit_ids.first() {
            Some(&parent_hash) => Ok(Some(load_commit(repo, parent_hash)?.tree_id)),
            None => Ok(None),
        }
    }
}

fn revert_message(commit: &Commit, hash: ObjectHash) -> String {
    let subject = commit.message.lines().next().unwrap_or("").to_string();
    format!("Revert \"{subject}\"\n\nThis reverts commit {hash}.\n")
}

fn load_commit(repo: &Repository, hash: ObjectHash) -> Result<Commit, GitError> {
    let (object_type, data) = repo.store.read_object(&hash)?;
    if object_type != ObjectType::Commit {
        return Err(GitError::InvalidCommitObject);
    }
    Commit::from_bytes(&data, hash)
}
