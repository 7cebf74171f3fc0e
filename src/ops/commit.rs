//! Creates a commit from the current index: build its tree, construct the commit object, advance
//! the checked-out branch (or detached `HEAD`), clear any finished merge/revert checkpoint, and
//! append a journal entry.

use std::fs;

use serde_json::json;

use crate::config::RepoConfig;
use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::commit::Commit;
use crate::internal::object::signature::{Signature, SignatureType};
use crate::internal::object::types::ObjectType;
use crate::ops::hooks::{self, HookKind};
use crate::ops::merge::MergeState;
use crate::ops::state::{self, MERGE_STATE_FILE, REVERT_STATE_FILE};
use crate::refs::{HeadState, RefStore};
use crate::repository::Repository;

/// Options controlling a single `commit` invocation.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub message: String,
    pub allow_empty: bool,
    pub no_verify: bool,
    /// Extra parents beyond the current `HEAD`, for merge commits with more than one parent.
    pub extra_parents: Vec<ObjectHash>,
}

/// Build a tree from the current index and record it as a new commit on top of `HEAD`. If a merge
/// is checkpointed, its recorded `theirs` commit is folded in automatically as an extra parent and
/// the commit is refused while any of the merge's unresolved paths still contain conflict markers.
pub async fn commit(repo: &Repository, mut options: CommitOptions) -> Result<ObjectHash, GitError> {
    let _lock = repo.lock()?;

    let merge_state: Option<MergeState> = state::load(repo.wit_dir(), MERGE_STATE_FILE)?;
    if let Some(merge_state) = &merge_state {
        if !merge_state.unresolved.is_empty() {
            for path in &merge_state.unresolved {
                if contains_conflict_markers(repo.work_dir().join(path))? {
                    return Err(GitError::ConflictsPresent(format!(
                        "{} still has unresolved conflict markers",
                        path.display()
                    )));
                }
            }
        }
        if !options.extra_parents.contains(&merge_state.their_commit) {
            options.extra_parents.push(merge_state.their_commit);
        }
    }

    let index = repo.load_index()?;
    let parent = repo.resolve("HEAD").ok();

    if !options.allow_empty && options.extra_parents.is_empty() && parent.is_none() && index.is_empty() {
        return Err(GitError::OperationFailed(
            "nothing to commit, working tree clean".to_string(),
        ));
    }

    let tree_id = index.build_tree(&repo.store)?;

    if !options.allow_empty && options.extra_parents.is_empty() {
        if let Some(parent_hash) = parent {
            let (object_type, data) = repo.store.read_object(&parent_hash)?;
            if object_type == ObjectType::Commit {
                let parent_commit = Commit::from_bytes(&data, parent_hash)?;
                if parent_commit.tree_id == tree_id {
                    return Err(GitError::OperationFailed(
                        "nothing to commit, working tree clean".to_string(),
                    ));
                }
            }
        }
    }

    hooks::run_hook(repo.wit_dir(), HookKind::PreCommit, &[], &[], options.no_verify).await?;

    let mut parent_ids: Vec<ObjectHash> = parent.into_iter().collect();
    parent_ids.extend(options.extra_parents.iter().copied());

    let before_head = parent.map(|h| h.to_string());
    let commit_id = write_commit(repo, tree_id, parent_ids, &options.message)?;

    state::clear(repo.wit_dir(), MERGE_STATE_FILE)?;
    state::clear(repo.wit_dir(), REVERT_STATE_FILE)?;

    repo.journal.append(
        "commit",
        vec![options.message.clone()],
        json!({ "head": before_head }),
        json!({ "head": commit_id.to_string() }),
        json!({ "commit": commit_id.to_string(), "tree": tree_id.to_string() }),
    )?;

    Ok(commit_id)
}

/// Construct and write a `Commit` object with the given tree and parents, and advance `HEAD` to
/// it. Shared by `commit`, and by the merge/revert engines building their own commits directly
/// from an already-resolved tree rather than the working index.
pub(crate) fn write_commit(
    repo: &Repository,
    tree_id: ObjectHash,
    parent_ids: Vec<ObjectHash>,
    message: &str,
) -> Result<ObjectHash, GitError> {
    let author = build_signature(&repo.config, SignatureType::Author)?;
    let committer = build_signature(&repo.config, SignatureType::Committer)?;
    let new_commit = Commit::new(author, committer, tree_id, parent_ids, message);
    repo.store.write_object(ObjectType::Commit, &new_commit.to_data()?)?;
    advance_head(&repo.refs, new_commit.id)?;
    Ok(new_commit.id)
}

pub(crate) fn contains_conflict_markers(path: std::path::PathBuf) -> Result<bool, GitError> {
    match fs::read(&path) {
        Ok(content) => Ok(content.windows(8).any(|w| w == b"<<<<<<< ")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(GitError::IOError(e)),
    }
}

pub(crate) fn build_signature(config: &RepoConfig, signature_type: SignatureType) -> Result<Signature, GitError> {
    let name = config
        .author_name()
        .ok_or_else(|| GitError::InvalidArgument("no author name configured; set user.name".to_string()))?;
    let email = config
        .author_email()
        .ok_or_else(|| GitError::InvalidArgument("no author email configured; set user.email".to_string()))?;
    Ok(Signature::new(signature_type, name, email))
}

/// Move whatever `HEAD` points at forward to `commit_id`: the branch ref if attached (creating it
/// when this is the branch's first commit), or `HEAD` itself if detached.
pub(crate) fn advance_head(refs: &RefStore, commit_id: ObjectHash) -> Result<(), GitError> {
    match refs.read_head()? {
        HeadState::Symbolic(branch_full_name) => match refs.resolve(&branch_full_name) {
            Ok(_) => refs.update(&branch_full_name, commit_id),
            Err(GitError::RefNotFound(_)) => refs.create(&branch_full_name, commit_id),
            Err(e) => Err(e),
        },
        HeadState::Detached(_) => refs.set_head_detached(commit_id),
    }
}
