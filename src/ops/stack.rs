//! Stacked branches: a named, ordered list of dependent topic branches built atop a shared base.
//! `push`/`pop` grow and shrink the stack from the top; `sync` rebases each branch onto its
//! (possibly just-moved) parent in order, ancestor first, checkpointing on conflict exactly like
//! [`crate::ops::revert`]; `submit` pushes every branch; `goto`/`up`/`down` move the checkout
//! along the stack; `reorder` changes the declared order without touching any commit.

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
use crate::ops::commit::{advance_head, build_signature, contains_conflict_markers};
use crate::ops::push::{self, PushOptions};
use crate::ops::state::{self, REBASE_STATE_FILE};
use crate::internal::object::signature::SignatureType;
use crate::repository::Repository;

const STACK_DIR: &str = "STACK";

fn stack_dir(repo: &Repository) -> PathBuf {
    repo.wit_dir().join(STACK_DIR)
}

fn stack_file_name(name: &str) -> String {
    format!("{name}.json")
}

/// A named, ordered list of dependent branches: `branches[0]` sits directly atop `base_branch`,
/// `branches[1]` atop `branches[0]`, and so on. Persisted at `.wit/STACK/<name>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    pub name: String,
    pub base_branch: String,
    pub branches: Vec<String>,
    /// For each branch, the parent's tip hash this branch was last built or rebased onto — the
    /// reference point [`status`] and [`sync`] compare the parent's *current* tip against.
    pub parent_tips: std::collections::BTreeMap<String, ObjectHash>,
}

impl StackState {
    fn parent_of(&self, branch: &str) -> Option<&str> {
        let idx = self.branches.iter().position(|b| b == branch)?;
        Some(if idx == 0 { self.base_branch.as_str() } else { self.branches[idx - 1].as_str() })
    }

    /// The whole chain from the base branch to the top of the stack, base first.
    fn chain(&self) -> Vec<&str> {
        std::iter::once(self.base_branch.as_str()).chain(self.branches.iter().map(String::as_str)).collect()
    }
}

fn load(repo: &Repository, name: &str) -> Result<StackState, GitError> {
    state::load(&stack_dir(repo), &stack_file_name(name))?
        .ok_or_else(|| GitError::InvalidArgument(format!("no stack named `{name}`")))
}

fn save(repo: &Repository, stack: &StackState) -> Result<(), GitError> {
    state::save(&stack_dir(repo), &stack_file_name(&stack.name), stack)
}

/// Start a new, empty stack atop `base_branch`, which must already exist.
pub fn create(repo: &Repository, name: &str, base_branch: &str) -> Result<StackState, GitError> {
    let _lock = repo.lock()?;
    if stack_dir(repo).join(stack_file_name(name)).is_file() {
        return Err(GitError::InvalidArgument(format!("stack `{name}` already exists")));
    }
    repo.refs.resolve(&format!("refs/heads/{base_branch}"))?;

    let stack = StackState {
        name: name.to_string(),
        base_branch: base_branch.to_string(),
        branches: Vec::new(),
        parent_tips: Default::default(),
    };
    save(repo, &stack)?;
    Ok(stack)
}

/// Create `new_branch` on top of the current top of the stack (or the base branch, if empty) and
/// check it out.
pub fn push(repo: &Repository, name: &str, new_branch: &str) -> Result<StackState, GitError> {
    let _lock = repo.lock()?;
    let mut stack = load(repo, name)?;

    let parent = stack.branches.last().cloned().unwrap_or_else(|| stack.base_branch.clone());
    let parent_tip = repo.refs.resolve(&format!("refs/heads/{parent}"))?;

    let new_ref = format!("refs/heads/{new_branch}");
    if repo.refs.resolve(&new_ref).is_ok() {
        return Err(GitError::InvalidArgument(format!("branch `{new_branch}` already exists")));
    }
    repo.refs.create(&new_ref, parent_tip)?;
    checkout_branch(repo, new_branch, parent_tip)?;

    stack.branches.push(new_branch.to_string());
    stack.parent_tips.insert(new_branch.to_string(), parent_tip);
    save(repo, &stack)?;
    Ok(stack)
}

/// Drop the top branch off the stack, deleting its ref, and check out the new top (or the base
/// branch, if the stack is now empty).
pub fn pop(repo: &Repository, name: &str) -> Result<StackState, GitError> {
    let _lock = repo.lock()?;
    let mut stack = load(repo, name)?;
    let popped = stack.branches.pop().ok_or_else(|| GitError::InvalidArgument("stack is empty".to_string()))?;
    stack.parent_tips.remove(&popped);

    let new_top = stack.branches.last().cloned().unwrap_or_else(|| stack.base_branch.clone());
    let new_top_tip = repo.refs.resolve(&format!("refs/heads/{new_top}"))?;
    checkout_branch(repo, &new_top, new_top_tip)?;
    repo.refs.delete(&format!("refs/heads/{popped}"))?;

    save(repo, &stack)?;
    Ok(stack)
}

/// Check out a named link of the stack (the base branch or one of its topic branches).
pub fn goto(repo: &Repository, name: &str, branch: &str) -> Result<(), GitError> {
    let _lock = repo.lock()?;
    let stack = load(repo, name)?;
    if !stack.chain().contains(&branch) {
        return Err(GitError::InvalidArgument(format!("`{branch}` is not part of stack `{name}`")));
    }
    let tip = repo.refs.resolve(&format!("refs/heads/{branch}"))?;
    checkout_branch(repo, branch, tip)
}

/// Move the checkout one link toward the top of the stack.
pub fn up(repo: &Repository, name: &str) -> Result<(), GitError> {
    step(repo, name, 1)
}

/// Move the checkout one link toward the base.
pub fn down(repo: &Repository, name: &str) -> Result<(), GitError> {
    step(repo, name, -1)
}

fn step(repo: &Repository, name: &str, delta: isize) -> Result<(), GitError> {
    let stack = load(repo, name)?;
    let chain = stack.chain();
    let current = repo
        .refs
        .current_branch()?
        .ok_or_else(|| GitError::DetachedHead("cannot move along a stack with no checked-out branch".to_string()))?;
    let idx = chain
        .iter()
        .position(|b| *b == current)
        .ok_or_else(|| GitError::InvalidArgument(format!("`{current}` is not part of stack `{name}`")))?;
    let next_idx = idx as isize + delta;
    if next_idx < 0 || next_idx as usize >= chain.len() {
        return Err(GitError::InvalidArgument("already at the end of the stack".to_string()));
    }
    let next = chain[next_idx as usize].to_string();
    let tip = repo.refs.resolve(&format!("refs/heads/{next}"))?;
    checkout_branch(repo, &next, tip)
}

/// Replace the declared branch order with `new_order`, a permutation of the existing branches.
/// Does not touch any ref or commit; run [`sync`] afterward to rebase onto the new topology.
pub fn reorder(repo: &Repository, name: &str, new_order: Vec<String>) -> Result<StackState, GitError> {
    let _lock = repo.lock()?;
    let mut stack = load(repo, name)?;

    let mut current_sorted = stack.branches.clone();
    current_sorted.sort();
    let mut new_sorted = new_order.clone();
    new_sorted.sort();
    if current_sorted != new_sorted {
        return Err(GitError::InvalidArgument("reorder must be a permutation of the stack's existing branches".to_string()));
    }

    stack.branches = new_order;
    save(repo, &stack)?;
    Ok(stack)
}

/// How a branch compares to its parent's current tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchStatus {
    /// The branch was last built or rebased directly onto the parent's current tip.
    Synced,
    /// The parent has advanced since this branch last synced to it; run `sync`.
    Behind,
    /// The branch's recorded parent tip is ahead of the parent's current tip (the parent moved
    /// backward, e.g. was reset).
    Ahead,
    /// Neither the branch's recorded parent tip nor the parent's current tip descends from the
    /// other.
    Diverged,
}

pub fn status(repo: &Repository, name: &str) -> Result<Vec<(String, BranchStatus)>, GitError> {
    let stack = load(repo, name)?;
    let mut out = Vec::with_capacity(stack.branches.len());
    for branch in &stack.branches {
        let parent = stack.parent_of(branch).expect("branch is in its own stack");
        let parent_tip = repo.refs.resolve(&format!("refs/heads/{parent}"))?;
        let recorded = stack.parent_tips.get(branch).copied();

        let classification = match recorded {
            Some(r) if r == parent_tip => BranchStatus::Synced,
            Some(r) if crate::ops::graph::is_ancestor(&repo.store, r, parent_tip)? => BranchStatus::Behind,
            Some(r) if crate::ops::graph::is_ancestor(&repo.store, parent_tip, r)? => BranchStatus::Ahead,
            _ => BranchStatus::Diverged,
        };
        out.push((branch.clone(), classification));
    }
    Ok(out)
}

/// Checkpoint persisted at `.wit/REBASE_STATE.json` while `sync` is rebasing a stack, either
/// mid-branch or paused on a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackRebaseState {
    pub stack_name: String,
    /// Branches still to process, in order (the branch currently being rebased is `[0]`).
    pub pending_branches: Vec<String>,
    /// Commits of the branch currently being rebased that still need replaying, oldest first.
    pub pending_commits: Vec<ObjectHash>,
    /// The new tip built so far for the branch currently being rebased.
    pub new_tip: ObjectHash,
    pub unresolved: Vec<PathBuf>,
}

/// Outcome of a `sync`/`continue_sync` call.
#[derive(Debug, Clone)]
pub enum SyncReport {
    Completed,
    Conflicts { branch: String, paths: Vec<PathBuf> },
}

/// Rebase every branch in the stack onto its (possibly just-moved) parent, ancestor first.
pub async fn sync(repo: &Repository, name: &str) -> Result<SyncReport, GitError> {
    let _lock = repo.lock()?;
    state::guard_no_other_operation(repo.wit_dir(), REBASE_STATE_FILE)?;
    let stack = load(repo, name)?;
    run_sync(repo, stack, stack_branches_needing_sync(repo, name)?).await
}

fn stack_branches_needing_sync(repo: &Repository, name: &str) -> Result<Vec<String>, GitError> {
    let stack = load(repo, name)?;
    Ok(stack.branches.clone())
}

async fn run_sync(repo: &Repository, mut stack: StackState, mut remaining: Vec<String>) -> Result<SyncReport, GitError> {
    while !remaining.is_empty() {
        let branch = remaining[0].clone();
        let parent = stack.parent_of(&branch).expect("branch is in its own stack").to_string();
        let parent_tip = repo.refs.resolve(&format!("refs/heads/{parent}"))?;
        let recorded = stack.parent_tips.get(&branch).copied();

        if recorded == Some(parent_tip) {
            remaining.remove(0);
            continue;
        }

        let old_parent_tip = recorded.ok_or_else(|| {
            GitError::OperationFailed(format!("`{branch}` has no recorded parent tip to rebase from"))
        })?;
        let branch_tip = repo.refs.resolve(&format!("refs/heads/{branch}"))?;
        let commits = commits_since(repo, branch_tip, old_parent_tip)?;

        let rebase_state = StackRebaseState {
            stack_name: stack.name.clone(),
            pending_branches: remaining.clone(),
            pending_commits: commits,
            new_tip: parent_tip,
            unresolved: Vec::new(),
        };
        match replay_onto(repo, &mut stack, rebase_state).await? {
            SyncReport::Completed => {
                remaining.remove(0);
            }
            conflict @ SyncReport::Conflicts { .. } => return Ok(conflict),
        }
    }

    state::clear(repo.wit_dir(), REBASE_STATE_FILE)?;
    save(repo, &stack)?;
    Ok(SyncReport::Completed)
}

/// Resume a sync whose rebase of one branch paused on a conflict, once the conflicted paths have
/// been resolved and staged.
pub async fn continue_sync(repo: &Repository) -> Result<SyncReport, GitError> {
    let _lock = repo.lock()?;
    let mut rebase_state: StackRebaseState = state::load(repo.wit_dir(), REBASE_STATE_FILE)?
        .ok_or_else(|| GitError::OperationFailed("no stack sync in progress".to_string()))?;

    for path in &rebase_state.unresolved {
        if contains_conflict_markers(repo.work_dir().join(path))? {
            return Err(GitError::ConflictsPresent(format!(
                "{} still has unresolved conflict markers",
                path.display()
            )));
        }
    }

    let mut stack = load(repo, &rebase_state.stack_name)?;
    let branch = rebase_state.pending_branches[0].clone();
    let commit_to_apply = rebase_state.pending_commits.remove(0);
    let original = load_commit(repo, commit_to_apply)?;
    let tree_id = repo.load_index()?.build_tree(&repo.store)?;
    let new_commit = write_rebased_commit(repo, &original, tree_id, rebase_state.new_tip)?;
    rebase_state.new_tip = new_commit;
    rebase_state.unresolved.clear();

    let remaining = rebase_state.pending_branches.clone();
    match replay_onto(repo, &mut stack, rebase_state).await? {
        SyncReport::Completed => run_sync(repo, stack, remaining[1..].to_vec()).await,
        conflict => Ok(conflict),
    }
}

/// Abandon an in-progress `sync`: drop the checkpoint, leaving every branch's ref exactly where it
/// stood (no ref is ever advanced until its whole commit sequence replays cleanly).
pub fn abort_sync(repo: &Repository) -> Result<(), GitError> {
    let _lock = repo.lock()?;
    state::load::<StackRebaseState>(repo.wit_dir(), REBASE_STATE_FILE)?
        .ok_or_else(|| GitError::OperationFailed("no stack sync in progress".to_string()))?;
    state::clear(repo.wit_dir(), REBASE_STATE_FILE)?;
    Ok(())
}

/// Replay `rebase_state.pending_commits` onto `rebase_state.new_tip`. On success, advances the
/// branch ref (and the working tree, if it's checked out) and records the new parent tip; on
/// conflict, checkpoints and returns without touching the branch ref.
async fn replay_onto(
    repo: &Repository,
    stack: &mut StackState,
    mut rebase_state: StackRebaseState,
) -> Result<SyncReport, GitError> {
    let branch = rebase_state.pending_branches[0].clone();
    let starting_tip = rebase_state.new_tip;
    let mut current_tip = starting_tip;

    while let Some(commit_hash) = rebase_state.pending_commits.first().copied() {
        let commit = load_commit(repo, commit_hash)?;
        // Every commit being replayed here was found by `commits_since` walking back to the
        // branch's recorded parent tip, so it always has a parent in this walk; a branch's very
        // first commit has that parent tip itself as its git parent.
        let parent_tree = match commit.parent_commit_ids.first() {
            Some(&p) => Some(load_commit(repo, p)?.tree_id),
            None => None,
        };
        let current_tree = load_commit(repo, current_tip)?.tree_id;

        let label = format!("{branch} onto {}", stack.parent_of(&branch).unwrap_or(""));
        let outcome = merge::merge_trees_opt(
            &repo.store,
            parent_tree,
            Some(current_tree),
            Some(commit.tree_id),
            "onto",
            &label,
        )?;

        match outcome {
            MergeOutcome::Clean(tree_id) => {
                let new_tip = write_rebased_commit(repo, &commit, tree_id, current_tip)?;
                current_tip = new_tip;
                rebase_state.pending_commits.remove(0);
                rebase_state.new_tip = current_tip;
            }
            MergeOutcome::Conflicts { tree, paths } => {
                if let Some(tree) = tree {
                    let old_index = repo.load_index()?;
                    let index = checkout_tree_replacing(&repo.store, repo.work_dir(), tree, &old_index)?;
                    repo.save_index(&index)?;
                }
                merge::write_conflict_markers(
                    &repo.store,
                    repo.work_dir(),
                    &paths,
                    parent_tree,
                    Some(current_tree),
                    Some(commit.tree_id),
                    "onto",
                    &label,
                )?;
                rebase_state.unresolved = paths.clone();
                state::save(repo.wit_dir(), REBASE_STATE_FILE, &rebase_state)?;
                return Ok(SyncReport::Conflicts { branch, paths });
            }
        }
    }

    repo.refs.update(&format!("refs/heads/{branch}"), current_tip)?;
    if repo.refs.current_branch()?.as_deref() == Some(branch.as_str()) {
        checkout_branch(repo, &branch, current_tip)?;
    }
    stack.parent_tips.insert(branch.clone(), repo.refs.resolve(&format!("refs/heads/{}", stack.parent_of(&branch).unwrap())).unwrap_or(starting_tip));

    repo.journal.append(
        "stack-sync",
        vec![stack.name.clone(), branch.clone()],
        json!({ "head": starting_tip.to_string() }),
        json!({ "head": current_tip.to_string() }),
        json!({}),
    )?;

    Ok(SyncReport::Completed)
}

/// Push every branch in the stack to `remote_name`, base-to-top, stopping at the first failure.
pub async fn submit(repo: &Repository, name: &str, remote_name: &str) -> Result<Vec<push::PushReport>, GitError> {
    let stack = load(repo, name)?;
    let mut reports = Vec::with_capacity(stack.branches.len());
    for branch in &stack.branches {
        let report = push::push(repo, remote_name, branch, PushOptions::default()).await?;
        let ok = report.succeeded();
        reports.push(report);
        if !ok {
            break;
        }
    }
    Ok(reports)
}

/// Commits reachable from `tip` by following only the first parent, stopping at (and excluding)
/// `boundary`, oldest first. Stacked topic branches are expected to be linear; a merge commit
/// partway up one aborts the walk with `OperationFailed` rather than silently picking a side.
fn commits_since(repo: &Repository, tip: ObjectHash, boundary: ObjectHash) -> Result<Vec<ObjectHash>, GitError> {
    let mut commits = Vec::new();
    let mut current = tip;
    while current != boundary {
        let commit = load_commit(repo, current)?;
        if commit.parent_commit_ids.len() > 1 {
            return Err(GitError::OperationFailed(
                "stack sync does not support rebasing a branch containing a merge commit".to_string(),
            ));
        }
        commits.push(current);
        current = match commit.parent_commit_ids.first() {
            Some(&p) => p,
            None => break,
        };
    }
    commits.reverse();
    Ok(commits)
}

fn write_rebased_commit(
    repo: &Repository,
    original: &Commit,
    tree_id: ObjectHash,
    new_parent: ObjectHash,
) -> Result<ObjectHash, GitError> {
    let committer = build_signature(&repo.config, SignatureType::Committer)?;
    let new_commit = Commit::new(original.author.clone(), committer, tree_id, vec![new_parent], &original.message);
    repo.store.write_object(ObjectType::Commit, &new_commit.to_data()?)?;
    Ok(new_commit.id)
}

fn checkout_branch(repo: &Repository, branch: &str, tip: ObjectHash) -> Result<(), GitError> {
    if repo.refs.current_branch()?.as_deref() != Some(branch) {
        repo.refs.set_head_symbolic(&format!("refs/heads/{branch}"))?;
    }
    let commit = load_commit(repo, tip)?;
    let old_index = repo.load_index()?;
    let index = checkout_tree_replacing(&repo.store, repo.work_dir(), commit.tree_id, &old_index)?;
    repo.save_index(&index)?;
    advance_head(&repo.refs, tip).ok();
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
    async fn create_push_and_status_report_synced() {
        let (_dir, repo) = init_repo();
        write_file(&repo, "a.txt", b"base\n");
        do_commit(&repo, "base").await;

        create(&repo, "feature-set", "main").unwrap();
        push(&repo, "feature-set", "part-1").unwrap();
        write_file(&repo, "a.txt", b"one\n");
        do_commit(&repo, "part 1").await;

        push(&repo, "feature-set", "part-2").unwrap();
        write_file(&repo, "b.txt", b"two\n");
        do_commit(&repo, "part 2").await;

        let stack = load(&repo, "feature-set").unwrap();
        assert_eq!(stack.branches, vec!["part-1".to_string(), "part-2".to_string()]);

        let statuses = status(&repo, "feature-set").unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|(_, s)| *s == BranchStatus::Synced));
    }

    #[tokio::test]
    async fn sync_rebases_a_branch_after_its_parent_moves() {
        let (_dir, repo) = init_repo();
        write_file(&repo, "a.txt", b"base\n");
        do_commit(&repo, "base").await;

        create(&repo, "s", "main").unwrap();
        push(&repo, "s", "bottom").unwrap();
        write_file(&repo, "bottom.txt", b"bottom\n");
        do_commit(&repo, "bottom change").await;

        push(&repo, "s", "top").unwrap();
        write_file(&repo, "top.txt", b"top\n");
        do_commit(&repo, "top change").await;

        // Advance `bottom` with a new commit, simulating more work landing on it.
        goto(&repo, "s", "bottom").unwrap();
        write_file(&repo, "bottom.txt", b"bottom v2\n");
        do_commit(&repo, "bottom change 2").await;

        let statuses = status(&repo, "s").unwrap();
        assert_eq!(statuses[1].1, BranchStatus::Behind);

        let report = sync(&repo, "s").await.unwrap();
        assert!(matches!(report, SyncReport::Completed));

        let statuses = status(&repo, "s").unwrap();
        assert!(statuses.iter().all(|(_, s)| *s == BranchStatus::Synced));

        let top_tip = repo.refs.resolve("refs/heads/top").unwrap();
        let top_commit = load_commit(&repo, top_tip).unwrap();
        assert_eq!(top_commit.message, "top change");
    }

    #[tokio::test]
    async fn pop_deletes_the_top_branch_and_checks_out_the_new_top() {
        let (_dir, repo) = init_repo();
        write_file(&repo, "a.txt", b"base\n");
        do_commit(&repo, "base").await;

        create(&repo, "s", "main").unwrap();
        push(&repo, "s", "bottom").unwrap();
        write_file(&repo, "bottom.txt", b"1\n");
        do_commit(&repo, "c1").await;
        push(&repo, "s", "top").unwrap();

        let stack = pop(&repo, "s").unwrap();
        assert_eq!(stack.branches, vec!["bottom".to_string()]);
        assert!(repo.refs.resolve("refs/heads/top").is_err());
        assert_eq!(repo.refs.current_branch().unwrap(), Some("bottom".to_string()));
    }
}
