use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::core::RepositoryAccess;
use super::types::ProtocolError;
use crate::hash::ObjectHash;
use crate::internal::metadata::{EntryMeta, MetaAttached};
use crate::internal::object::types::ObjectType;
use crate::internal::object::{ObjectTrait, blob::Blob, commit::Commit, tree::Tree};
use crate::internal::pack::{Pack, encode::encode_and_output_to_files, entry::Entry};

/// Pack generation service for Git protocol operations.
///
/// Collects the object closure for a want/have negotiation using only the `RepositoryAccess`
/// trait, then hands the result to [`encode_and_output_to_files`] for the actual pack-format
/// encoding, streaming the resulting file back in chunks.
pub struct PackGenerator<'a, R>
where
    R: RepositoryAccess,
{
    repo_access: &'a R,
}

impl<'a, R> PackGenerator<'a, R>
where
    R: RepositoryAccess,
{
    pub fn new(repo_access: &'a R) -> Self {
        Self { repo_access }
    }

    /// Generate a full pack containing everything reachable from `want`.
    pub async fn generate_full_pack(
        &self,
        want: Vec<String>,
    ) -> Result<ReceiverStream<Vec<u8>>, ProtocolError> {
        let (tx, rx) = mpsc::channel(1024);
        let all_objects = self.collect_all_objects(want).await?;

        tokio::spawn(async move {
            if let Err(e) = Self::generate_pack_stream(all_objects, tx).await {
                tracing::error!("failed to generate pack stream: {e}");
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Generate a pack containing only objects reachable from `want` but not from `have`.
    pub async fn generate_incremental_pack(
        &self,
        want: Vec<String>,
        have: Vec<String>,
    ) -> Result<ReceiverStream<Vec<u8>>, ProtocolError> {
        let (tx, rx) = mpsc::channel(1024);

        let wanted_objects = self.collect_all_objects(want).await?;
        let have_objects = self.collect_all_objects(have).await?;
        let incremental_objects = Self::filter_objects(wanted_objects, have_objects);

        tokio::spawn(async move {
            if let Err(e) = Self::generate_pack_stream(incremental_objects, tx).await {
                tracing::error!("failed to generate incremental pack stream: {e}");
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Decode an incoming pack and return its commits, trees, and blobs.
    pub async fn unpack_stream(
        &self,
        pack_data: Bytes,
    ) -> Result<(Vec<Commit>, Vec<Tree>, Vec<Blob>), ProtocolError> {
        use std::sync::{Arc, Mutex};

        let commits = Arc::new(Mutex::new(Vec::new()));
        let trees = Arc::new(Mutex::new(Vec::new()));
        let blobs = Arc::new(Mutex::new(Vec::new()));

        let commits_clone = commits.clone();
        let trees_clone = trees.clone();
        let blobs_clone = blobs.clone();

        let mut pack = Pack::new(None, None, None, true);
        let mut cursor = Cursor::new(pack_data.to_vec());

        pack.decode(
            &mut cursor,
            move |meta_entry: MetaAttached<Entry, EntryMeta>| {
                let entry = meta_entry.inner;
                match entry.obj_type {
                    ObjectType::Commit => match Commit::from_bytes(&entry.data, entry.hash) {
                        Ok(commit) => commits_clone.lock().unwrap().push(commit),
                        Err(e) => tracing::warn!("failed to parse commit from pack entry: {e}"),
                    },
                    ObjectType::Tree => match Tree::from_bytes(&entry.data, entry.hash) {
                        Ok(tree) => trees_clone.lock().unwrap().push(tree),
                        Err(e) => tracing::warn!("failed to parse tree from pack entry: {e}"),
                    },
                    ObjectType::Blob => match Blob::from_bytes(&entry.data, entry.hash) {
                        Ok(blob) => blobs_clone.lock().unwrap().push(blob),
                        Err(e) => tracing::warn!("failed to parse blob from pack entry: {e}"),
                    },
                    other => tracing::warn!("unexpected object type in pack: {other:?}"),
                }
            },
            None::<fn(ObjectHash)>,
        )
        .map_err(|e| ProtocolError::invalid_request(&format!("failed to decode pack: {e}")))?;

        let commits = Arc::try_unwrap(commits).unwrap().into_inner().unwrap();
        let trees = Arc::try_unwrap(trees).unwrap().into_inner().unwrap();
        let blobs = Arc::try_unwrap(blobs).unwrap().into_inner().unwrap();

        Ok((commits, trees, blobs))
    }

    /// Collect all objects reachable from the given commit hashes.
    async fn collect_all_objects(
        &self,
        commit_hashes: Vec<String>,
    ) -> Result<(Vec<Commit>, Vec<Tree>, Vec<Blob>), ProtocolError> {
        let mut commits = Vec::new();
        let mut trees = Vec::new();
        let mut blobs = Vec::new();

        let mut visited_commits = HashSet::new();
        let mut visited_trees = HashSet::new();
        let mut visited_blobs = HashSet::new();

        let mut commit_queue = VecDeque::from(commit_hashes);

        while let Some(commit_hash) = commit_queue.pop_front() {
            if visited_commits.contains(&commit_hash) {
                continue;
            }
            visited_commits.insert(commit_hash.clone());

            let commit = self.repo_access.get_commit(&commit_hash).await.map_err(|e| {
                ProtocolError::repository_error(format!(
                    "failed to get commit {commit_hash}: {e}"
                ))
            })?;

            for parent in &commit.parent_commit_ids {
                let parent_str = parent.to_string();
                if !visited_commits.contains(&parent_str) {
                    commit_queue.push_back(parent_str);
                }
            }

            Box::pin(self.collect_tree_objects(
                &commit.tree_id.to_string(),
                &mut trees,
                &mut blobs,
                &mut visited_trees,
                &mut visited_blobs,
            ))
            .await?;

            commits.push(commit);
        }

        Ok((commits, trees, blobs))
    }

    /// Recursively collect tree and blob objects.
    async fn collect_tree_objects(
        &self,
        tree_hash: &str,
        trees: &mut Vec<Tree>,
        blobs: &mut Vec<Blob>,
        visited_trees: &mut HashSet<String>,
        visited_blobs: &mut HashSet<String>,
    ) -> Result<(), ProtocolError> {
        if visited_trees.contains(tree_hash) {
            return Ok(());
        }
        visited_trees.insert(tree_hash.to_string());

        let tree = self
            .repo_access
            .get_tree(tree_hash)
            .await
            .map_err(|e| ProtocolError::repository_error(format!("failed to get tree {tree_hash}: {e}")))?;

        for entry in &tree.tree_items {
            let entry_hash = entry.id.to_string();
            match entry.mode {
                crate::internal::object::tree::TreeItemMode::Tree => {
                    Box::pin(self.collect_tree_objects(
                        &entry_hash,
                        trees,
                        blobs,
                        visited_trees,
                        visited_blobs,
                    ))
                    .await?;
                }
                crate::internal::object::tree::TreeItemMode::Blob
                | crate::internal::object::tree::TreeItemMode::BlobExecutable => {
                    if !visited_blobs.contains(&entry_hash) {
                        visited_blobs.insert(entry_hash.clone());
                        let blob = self.repo_access.get_blob(&entry_hash).await.map_err(|e| {
                            ProtocolError::repository_error(format!(
                                "failed to get blob {entry_hash}: {e}"
                            ))
                        })?;
                        blobs.push(blob);
                    }
                }
                _ => {}
            }
        }

        trees.push(tree);
        Ok(())
    }

    /// Filter objects to exclude those already present on the other side.
    fn filter_objects(
        wanted: (Vec<Commit>, Vec<Tree>, Vec<Blob>),
        have: (Vec<Commit>, Vec<Tree>, Vec<Blob>),
    ) -> (Vec<Commit>, Vec<Tree>, Vec<Blob>) {
        let (wanted_commits, wanted_trees, wanted_blobs) = wanted;
        let (have_commits, have_trees, have_blobs) = have;

        let have_commit_hashes: HashSet<ObjectHash> = have_commits.iter().map(|c| c.id).collect();
        let have_tree_hashes: HashSet<ObjectHash> = have_trees.iter().map(|t| t.id).collect();
        let have_blob_hashes: HashSet<ObjectHash> = have_blobs.iter().map(|b| b.id).collect();

        (
            wanted_commits.into_iter().filter(|c| !have_commit_hashes.contains(&c.id)).collect(),
            wanted_trees.into_iter().filter(|t| !have_tree_hashes.contains(&t.id)).collect(),
            wanted_blobs.into_iter().filter(|b| !have_blob_hashes.contains(&b.id)).collect(),
        )
    }

    /// Encode the given objects into a pack file and stream its bytes out over `tx`.
    async fn generate_pack_stream(
        objects: (Vec<Commit>, Vec<Tree>, Vec<Blob>),
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), ProtocolError> {
        let (commits, trees, blobs) = objects;

        let mut entries = Vec::with_capacity(commits.len() + trees.len() + blobs.len());
        entries.extend(commits.into_iter().map(Entry::from));
        entries.extend(trees.into_iter().map(Entry::from));
        entries.extend(blobs.into_iter().map(Entry::from));
        let object_count = entries.len();

        let (entry_tx, entry_rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            for entry in entries {
                let meta_entry = MetaAttached { inner: entry, meta: EntryMeta::new() };
                if entry_tx.send(meta_entry).await.is_err() {
                    break;
                }
            }
        });

        let output_dir = tempfile::tempdir()?;
        let (pack_path, _idx_path) =
            encode_and_output_to_files(entry_rx, object_count, output_dir.path().to_path_buf(), 10)
                .await
                .map_err(|e| ProtocolError::repository_error(format!("pack encode failed: {e}")))?;

        let pack_bytes = tokio::fs::read(&pack_path).await?;
        for chunk in pack_bytes.chunks(64 * 1024) {
            if tx.send(chunk.to_vec()).await.is_err() {
                break;
            }
        }

        Ok(())
    }
}

/// Parse a hex object hash coming off the wire.
fn parse_hash(hash: &str) -> Result<ObjectHash, ProtocolError> {
    ObjectHash::from_str(hash)
        .map_err(|e| ProtocolError::repository_error(format!("invalid hash format: {e}")))
}
