//! Push operation engine: classify a ref update against the remote's advertised state, reject
//! non-fast-forwards without `--force`, build the minimal object pack, and POST it through the
//! Smart-HTTP client. Dual-remote pushes reuse [`crate::remote::push_to_remotes`] to run each
//! remote sequentially with no rollback, per §4.9/§4.7.

use std::str::FromStr;

use serde_json::json;

use crate::errors::GitError;
use crate::hash::{ObjectHash, get_hash_kind};
use crate::internal::pack::encode::encode_objects_to_bytes;
use crate::internal::pack::entry::Entry;
use crate::internal::walk;
use crate::ops::graph;
use crate::ops::hooks::{self, HookKind};
use crate::protocol::client::SmartHttpClient;
use crate::protocol::types::{RefCommand, ServiceType};
use crate::remote;
use crate::repository::Repository;

/// Options controlling a single `push` invocation.
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub no_verify: bool,
    /// Override the fast-forward requirement unconditionally.
    pub force: bool,
    /// Override the fast-forward requirement only when the remote's current tip still matches
    /// the caller's cached remote-tracking ref (`refs/remotes/<remote>/<branch>`).
    pub force_with_lease: bool,
}

/// How a single ref update compares against what the remote currently advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefClassification {
    New,
    UpToDate,
    FastForward,
    NonFastForward,
}

/// Per-ref result of one push to one remote.
#[derive(Debug, Clone)]
pub struct PushedRef {
    pub ref_name: String,
    pub classification: RefClassification,
    pub result: Result<(), String>,
}

/// Outcome of pushing `branch` to a single remote.
#[derive(Debug, Clone)]
pub struct PushReport {
    pub remote: String,
    pub refs: Vec<PushedRef>,
}

impl PushReport {
    /// `true` iff every ref in this report succeeded (an up-to-date ref counts as success: there
    /// was nothing to do).
    pub fn succeeded(&self) -> bool {
        self.refs.iter().all(|r| r.result.is_ok())
    }
}

/// Push `refs/heads/<branch>` to `remote_name`.
pub async fn push(repo: &Repository, remote_name: &str, branch: &str, options: PushOptions) -> Result<PushReport, GitError> {
    let _lock = repo.lock()?;

    let remote_config = repo
        .config
        .remote(remote_name)
        .ok_or_else(|| GitError::InvalidArgument(format!("no remote named `{remote_name}`")))?;
    let url = remote_config
        .url
        .clone()
        .ok_or_else(|| GitError::InvalidArgument(format!("remote `{remote_name}` has no url")))?;

    let local_ref = format!("refs/heads/{branch}");
    let new_hash = repo.resolve(&local_ref)?;
    let tracking_ref = format!("refs/remotes/{remote_name}/{branch}");

    let client = SmartHttpClient::new(&url);
    let advertisement = client.list_refs(ServiceType::ReceivePack).await?;
    let remote_hash = advertisement
        .refs
        .iter()
        .find(|r| r.name == local_ref)
        .map(|r| ObjectHash::from_str(&r.hash))
        .transpose()
        .map_err(GitError::InvalidHashValue)?;

    let classification = classify(repo, remote_hash, new_hash)?;
    if classification == RefClassification::NonFastForward && !options.force {
        if !(options.force_with_lease && lease_matches(repo, &tracking_ref, remote_hash)) {
            return Err(GitError::NonFastForward(local_ref));
        }
    }

    let old_hash_str = remote_hash
        .map(|h| h.to_string())
        .unwrap_or_else(|| ObjectHash::zero_str(get_hash_kind()));
    hooks::run_hook(
        repo.wit_dir(),
        HookKind::PrePush,
        &[remote_name.to_string()],
        &[format!("{local_ref} {new_hash} {local_ref} {old_hash_str}")],
        options.no_verify,
    )
    .await?;

    if classification == RefClassification::UpToDate {
        return Ok(PushReport {
            remote: remote_name.to_string(),
            refs: vec![PushedRef { ref_name: local_ref, classification, result: Ok(()) }],
        });
    }

    let old_tips: Vec<ObjectHash> = remote_hash.into_iter().collect();
    let to_send = walk::objects_to_send(&repo.store, &[new_hash], &old_tips)?;
    let entries: Vec<Entry> = to_send
        .iter()
        .map(|hash| {
            let (obj_type, data) = repo.store.read_object(hash)?;
            Ok(Entry { obj_type, data, hash: *hash, chain_len: 0 })
        })
        .collect::<Result<_, GitError>>()?;
    let pack_bytes = encode_objects_to_bytes(&entries)?;

    let command = RefCommand::new(old_hash_str.clone(), new_hash.to_string(), local_ref.clone());
    let results = client.receive_pack(&[command], &pack_bytes).await?;

    let mut refs_out = Vec::with_capacity(results.len());
    for (ref_name, result) in results {
        if result.is_ok() {
            if let Err(e) = repo.refs.update(&tracking_ref, new_hash) {
                tracing::warn!(%tracking_ref, error = %e, "push: tracking ref update failed");
            }
        }
        refs_out.push(PushedRef { ref_name, classification, result });
    }

    repo.journal.append(
        "push",
        vec![remote_name.to_string(), branch.to_string()],
        json!({ "remote_head": remote_hash.map(|h| h.to_string()) }),
        json!({ "remote_head": new_hash.to_string() }),
        json!({ "classification": format!("{classification:?}") }),
    )?;

    Ok(PushReport { remote: remote_name.to_string(), refs: refs_out })
}

/// Push `branch` to every remote in `remote_names`, in declared order, never rolling back an
/// earlier remote's success when a later one fails. Overall success requires every remote to have
/// accepted the push.
pub async fn push_to_remotes(
    repo: &Repository,
    remote_names: &[String],
    branch: &str,
    options: PushOptions,
) -> Result<Vec<PushReport>, Vec<(String, GitError)>> {
    let reports = std::sync::Mutex::new(Vec::new());
    let result = remote::push_to_remotes(remote_names, |name| {
        let options = options.clone();
        async {
            let report = push(repo, &name, branch, options).await?;
            if !report.succeeded() {
                let reason = report
                    .refs
                    .iter()
                    .find_map(|r| r.result.as_ref().err())
                    .cloned()
                    .unwrap_or_else(|| "remote rejected the push".to_string());
                reports.lock().unwrap().push(report);
                return Err(GitError::ServerRejected(reason));
            }
            reports.lock().unwrap().push(report);
            Ok(())
        }
    })
    .await;

    let reports = reports.into_inner().unwrap();
    match result {
        Ok(()) => Ok(reports),
        Err(failures) => Err(failures),
    }
}

fn classify(
    repo: &Repository,
    remote_hash: Option<ObjectHash>,
    new_hash: ObjectHash,
) -> Result<RefClassification, GitError> {
    let Some(remote_hash) = remote_hash else {
        return Ok(RefClassification::New);
    };
    if remote_hash == new_hash {
        return Ok(RefClassification::UpToDate);
    }
    if graph::is_ancestor(&repo.store, remote_hash, new_hash)? {
        Ok(RefClassification::FastForward)
    } else {
        Ok(RefClassification::NonFastForward)
    }
}

/// `--force-with-lease`: only proceed if the remote's current tip still matches the last tip this
/// repository observed for it (its cached tracking ref), meaning nobody else pushed in between.
fn lease_matches(repo: &Repository, tracking_ref: &str, remote_hash: Option<ObjectHash>) -> bool {
    match (repo.refs.resolve(tracking_ref), remote_hash) {
        (Ok(cached), Some(observed)) => cached == observed,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use crate::internal::object::signature::{Signature, SignatureType};
    use crate::internal::object::tree::{Tree, TreeItem, TreeItemMode};
    use crate::internal::object::types::ObjectType;
    use crate::internal::object::ObjectTrait;
    use crate::internal::object::commit::Commit;
    use crate::internal::store::ObjectStore;

    fn commit_with_tree(store: &ObjectStore, content: &[u8], parents: Vec<ObjectHash>) -> ObjectHash {
        let blob_hash = store.write_object(ObjectType::Blob, content).unwrap();
        let tree = Tree::from_tree_items(vec![TreeItem::new(TreeItemMode::Blob, blob_hash, "f.txt".to_string())]).unwrap();
        let tree_hash = store.write_object(ObjectType::Tree, &tree.to_data().unwrap()).unwrap();
        let sig = Signature::new(SignatureType::Author, "Ada".to_string(), "a@x.com".to_string());
        let commit = Commit::new(sig.clone(), sig, tree_hash, parents, "msg");
        store.write_object(ObjectType::Commit, &commit.to_data().unwrap()).unwrap()
    }

    #[test]
    fn classify_detects_new_up_to_date_ff_and_non_ff() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path(), "main").unwrap();

        let old = commit_with_tree(&repo.store, b"v1", vec![]);
        let new = commit_with_tree(&repo.store, b"v2", vec![old]);
        let other = commit_with_tree(&repo.store, b"other", vec![]);

        assert_eq!(classify(&repo, None, old).unwrap(), RefClassification::New);
        assert_eq!(classify(&repo, Some(old), old).unwrap(), RefClassification::UpToDate);
        assert_eq!(classify(&repo, Some(old), new).unwrap(), RefClassification::FastForward);
        assert_eq!(classify(&repo, Some(old), other).unwrap(), RefClassification::NonFastForward);
    }

    #[test]
    fn lease_matches_only_when_tracking_ref_agrees_with_remote() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path(), "main").unwrap();
        let tip = commit_with_tree(&repo.store, b"v1", vec![]);
        let stale = commit_with_tree(&repo.store, b"stale", vec![]);
        repo.refs.create("refs/remotes/origin/main", tip).unwrap();

        assert!(lease_matches(&repo, "refs/remotes/origin/main", Some(tip)));
        assert!(!lease_matches(&repo, "refs/remotes/origin/main", Some(stale)));
        assert!(!lease_matches(&repo, "refs/remotes/does-not-exist", Some(tip)));
    }
}
