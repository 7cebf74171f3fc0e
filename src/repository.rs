//! [`Repository`]: the value every operation engine is handed, bundling the object store, refs,
//! config, and journal rooted at one `.wit` metadata directory, plus the advisory lock that keeps
//! two concurrent invocations from tearing up each other's state.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;

use crate::config::RepoConfig;
use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::commit::Commit;
use crate::internal::object::types::ObjectType;
use crate::internal::object::ObjectTrait;
use crate::internal::pack::Pack;
use crate::internal::store::ObjectStore;
use crate::internal::walk;
use crate::journal::Journal;
use crate::ops::hooks::{run_hook, HookKind};
use crate::protocol::core::RepositoryAccess;
use crate::protocol::types::ProtocolError;
use crate::refs::RefStore;

/// Name of the metadata directory a repository is rooted at, e.g. `<work_dir>/.wit`.
pub const WIT_DIR: &str = ".wit";

/// Held for the duration of a mutating operation (commit, merge step, push, …). Backed by a
/// create-only lockfile, not an flock: on a busy repository the caller gets `RepositoryBusy`
/// immediately rather than blocking, matching the "never hang" shape of every other write path
/// here (refs, index, and objects are all written via temp-file + atomic rename, never in place).
pub struct RepoLock {
    path: PathBuf,
}

impl RepoLock {
    fn acquire(wit_dir: &Path) -> Result<Self, GitError> {
        let path = wit_dir.join("index.lock");
        match fs::OpenOptions::new().create_new(true).write(true).open(&path) {
            Ok(_) => Ok(RepoLock { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(GitError::RepositoryBusy(
                path.display().to_string(),
            )),
            Err(e) => Err(GitError::IOError(e)),
        }
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// A repository rooted at `work_dir`, with metadata under `work_dir/.wit`.
#[derive(Debug, Clone)]
pub struct Repository {
    work_dir: PathBuf,
    wit_dir: PathBuf,
    pub store: ObjectStore,
    pub refs: RefStore,
    pub config: RepoConfig,
    pub journal: Journal,
}

impl Repository {
    /// Initialize a new repository at `work_dir`: lays out `.wit/{objects,refs/{heads,tags,remotes}}`
    /// and points `HEAD` at `refs/heads/<initial_branch>` (which need not exist yet).
    pub fn init(work_dir: impl Into<PathBuf>, initial_branch: &str) -> Result<Self, GitError> {
        let work_dir = work_dir.into();
        let wit_dir = work_dir.join(WIT_DIR);
        if wit_dir.is_dir() {
            return Err(GitError::InvalidArgument(format!(
                "`{}` already exists",
                wit_dir.display()
            )));
        }

        fs::create_dir_all(wit_dir.join("objects"))?;
        fs::create_dir_all(wit_dir.join("refs").join("heads"))?;
        fs::create_dir_all(wit_dir.join("refs").join("tags"))?;
        fs::create_dir_all(wit_dir.join("refs").join("remotes"))?;

        let refs = RefStore::new(&wit_dir);
        refs.set_head_symbolic(&format!("refs/heads/{initial_branch}"))?;

        let config = RepoConfig::new();
        config.save(&wit_dir)?;

        Ok(Repository {
            store: ObjectStore::new(&wit_dir),
            refs,
            config,
            journal: Journal::new(&wit_dir),
            work_dir,
            wit_dir,
        })
    }

    /// Open a repository rooted at `work_dir`; errors if `work_dir/.wit` doesn't look like one.
    pub fn open(work_dir: impl Into<PathBuf>) -> Result<Self, GitError> {
        let work_dir = work_dir.into();
        let wit_dir = work_dir.join(WIT_DIR);
        if !wit_dir.join("objects").is_dir() {
            return Err(GitError::NotARepository(work_dir.display().to_string()));
        }

        let config = RepoConfig::load(&wit_dir)?;
        Ok(Repository {
            store: ObjectStore::new(&wit_dir),
            refs: RefStore::new(&wit_dir),
            config,
            journal: Journal::new(&wit_dir),
            work_dir,
            wit_dir,
        })
    }

    /// Discover the nearest `.wit`-bearing directory starting at `start` and walking up through
    /// its ancestors, then open it. Mirrors the wider ecosystem's "run from any subdirectory"
    /// behavior.
    pub fn discover(start: impl Into<PathBuf>) -> Result<Self, GitError> {
        let mut dir = start.into();
        loop {
            if dir.join(WIT_DIR).join("objects").is_dir() {
                return Self::open(dir);
            }
            if !dir.pop() {
                return Err(GitError::NotARepository(
                    "no .wit directory in this path or any parent".to_string(),
                ));
            }
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn wit_dir(&self) -> &Path {
        &self.wit_dir
    }

    /// Acquire the repository's advisory lock for the duration of a mutating operation.
    pub fn lock(&self) -> Result<RepoLock, GitError> {
        RepoLock::acquire(&self.wit_dir)
    }

    pub fn load_index(&self) -> Result<crate::internal::index::Index, GitError> {
        crate::internal::index::Index::load(&self.wit_dir.join("index"))
    }

    pub fn save_index(&self, index: &crate::internal::index::Index) -> Result<(), GitError> {
        index.save(&self.wit_dir.join("index"))
    }

    /// Resolve a ref name or hash prefix to an object hash. Tries [`RefStore::resolve`] first;
    /// when that reports the name looks like a bare hash prefix (no ref matched it under any
    /// namespace), falls back to an unambiguous prefix scan over every object on disk — the refs
    /// store alone has no way to do that, since it only knows about named pointers.
    pub fn resolve(&self, name: &str) -> Result<ObjectHash, GitError> {
        match self.refs.resolve(name) {
            Ok(hash) => Ok(hash),
            Err(GitError::RefNotFound(_)) if looks_like_hash_prefix(name) => {
                self.resolve_hash_prefix(name)
            }
            Err(e) => Err(e),
        }
    }

    fn resolve_hash_prefix(&self, prefix: &str) -> Result<ObjectHash, GitError> {
        let matches: Vec<ObjectHash> = self
            .store
            .all_hashes()?
            .into_iter()
            .filter(|hash| hash.to_string().starts_with(prefix))
            .collect();
        match matches.len() {
            0 => Err(GitError::RefNotFound(prefix.to_string())),
            1 => Ok(matches[0]),
            _ => Err(GitError::AmbiguousRef(prefix.to_string())),
        }
    }

    /// Resolve `HEAD` all the way down to the commit it points at.
    pub fn head_commit(&self) -> Result<Commit, GitError> {
        let hash = self.resolve("HEAD")?;
        let (object_type, data) = self.store.read_object(&hash)?;
        if object_type != ObjectType::Commit {
            return Err(GitError::InvalidCommitObject);
        }
        Commit::from_bytes(&data, hash)
    }

    /// `true` if `HEAD` currently resolves to anything (false for a brand-new repository with no
    /// commits yet, where `HEAD` is symbolic but its target branch doesn't exist).
    pub fn has_head_commit(&self) -> bool {
        self.resolve("HEAD").is_ok()
    }
}

fn looks_like_hash_prefix(name: &str) -> bool {
    name.len() >= 4 && name.chars().all(|c| c.is_ascii_hexdigit())
}

fn to_protocol_err(e: GitError) -> ProtocolError {
    ProtocolError::repository_error(e.to_string())
}

/// Storage-level half of the Smart-HTTP protocol, backed directly by this repository's object
/// store and refs.
#[async_trait]
impl RepositoryAccess for Repository {
    async fn get_repository_refs(&self) -> Result<Vec<(String, String)>, ProtocolError> {
        let mut out = Vec::new();
        for name in self.refs.list_branches().map_err(to_protocol_err)? {
            let full = format!("refs/heads/{name}");
            let hash = self.refs.resolve(&full).map_err(to_protocol_err)?;
            out.push((full, hash.to_string()));
        }
        for name in self.refs.list_tags().map_err(to_protocol_err)? {
            let full = format!("refs/tags/{name}");
            let hash = self.refs.resolve(&full).map_err(to_protocol_err)?;
            out.push((full, hash.to_string()));
        }
        Ok(out)
    }

    async fn has_object(&self, object_hash: &str) -> Result<bool, ProtocolError> {
        let hash = ObjectHash::from_str(object_hash)
            .map_err(|e| ProtocolError::repository_error(format!("invalid hash: {e}")))?;
        Ok(self.store.exists(&hash))
    }

    async fn get_object(&self, object_hash: &str) -> Result<Vec<u8>, ProtocolError> {
        let hash = ObjectHash::from_str(object_hash)
            .map_err(|e| ProtocolError::repository_error(format!("invalid hash: {e}")))?;
        let (_, data) = self.store.read_object(&hash).map_err(to_protocol_err)?;
        Ok(data)
    }

    /// Decode `pack_data` as a standalone pack and write every object it contains through the
    /// store. Each pack entry carries its own type tag, so this never has to guess one the way a
    /// single untyped blob of bytes would force it to.
    async fn store_pack_data(&self, pack_data: &[u8]) -> Result<(), ProtocolError> {
        use crate::internal::metadata::{EntryMeta, MetaAttached};
        use crate::internal::pack::entry::Entry;
        use std::io::Cursor;
        use std::sync::{Arc, Mutex};

        let store = self.store.clone();
        let error: Arc<Mutex<Option<GitError>>> = Arc::new(Mutex::new(None));
        let error_clone = error.clone();

        let mut pack = Pack::new(None, None, None, true);
        let mut cursor = Cursor::new(pack_data.to_vec());
        pack.decode(
            &mut cursor,
            move |meta_entry: MetaAttached<Entry, EntryMeta>| {
                let entry = meta_entry.inner;
                if let Err(e) = store.write_object(entry.obj_type, &entry.data) {
                    *error_clone.lock().unwrap() = Some(e);
                }
            },
            None::<fn(ObjectHash)>,
        )
        .map_err(|e| ProtocolError::repository_error(format!("failed to decode pack: {e}")))?;

        if let Some(e) = error.lock().unwrap().take() {
            return Err(to_protocol_err(e));
        }
        Ok(())
    }

    /// Store already-typed objects directly, bypassing `store_pack_data`'s generic decode path —
    /// the caller (the receive-pack flow) already split the incoming pack by type via
    /// `PackGenerator::unpack_stream`, so there is no reason to re-derive it here.
    async fn handle_pack_objects(
        &self,
        commits: Vec<Commit>,
        trees: Vec<crate::internal::object::tree::Tree>,
        blobs: Vec<crate::internal::object::blob::Blob>,
    ) -> Result<(), ProtocolError> {
        for blob in &blobs {
            self.store
                .write_object(ObjectType::Blob, &blob.data)
                .map_err(to_protocol_err)?;
        }
        for tree in &trees {
            let data = tree.to_data().map_err(to_protocol_err)?;
            self.store.write_object(ObjectType::Tree, &data).map_err(to_protocol_err)?;
        }
        for commit in &commits {
            let data = commit.to_data().map_err(to_protocol_err)?;
            self.store.write_object(ObjectType::Commit, &data).map_err(to_protocol_err)?;
        }
        Ok(())
    }

    async fn update_reference(
        &self,
        ref_name: &str,
        old_hash: Option<&str>,
        new_hash: &str,
    ) -> Result<(), ProtocolError> {
        let new_hash = ObjectHash::from_str(new_hash)
            .map_err(|e| ProtocolError::repository_error(format!("invalid hash: {e}")))?;

        if let Some(old_hash) = old_hash {
            let old_hash = ObjectHash::from_str(old_hash)
                .map_err(|e| ProtocolError::repository_error(format!("invalid hash: {e}")))?;
            match self.refs.resolve(ref_name) {
                Ok(current) if current != old_hash => {
                    return Err(ProtocolError::repository_error(format!(
                        "ref `{ref_name}` moved since negotiation"
                    )));
                }
                _ => {}
            }
        }

        self.refs.update(ref_name, new_hash).map_err(to_protocol_err)
    }

    /// Object closure a fetch from `haves` up to `wants` needs. Not on the live receive-pack path
    /// (`PackGenerator::collect_all_objects` walks via `get_commit`/`get_tree`/`get_blob` instead)
    /// but kept genuine for callers that do negotiate this way.
    async fn get_objects_for_pack(
        &self,
        wants: &[String],
        haves: &[String],
    ) -> Result<Vec<String>, ProtocolError> {
        let want_hashes: Result<Vec<ObjectHash>, _> = wants.iter().map(|w| ObjectHash::from_str(w)).collect();
        let have_hashes: Result<Vec<ObjectHash>, _> = haves.iter().map(|h| ObjectHash::from_str(h)).collect();
        let want_hashes = want_hashes.map_err(|e| ProtocolError::repository_error(format!("invalid hash: {e}")))?;
        let have_hashes = have_hashes.map_err(|e| ProtocolError::repository_error(format!("invalid hash: {e}")))?;

        let objects = walk::objects_to_send(&self.store, &want_hashes, &have_hashes).map_err(to_protocol_err)?;
        Ok(objects.into_iter().map(|h| h.to_string()).collect())
    }

    async fn has_default_branch(&self) -> Result<bool, ProtocolError> {
        let branches = self.refs.list_branches().map_err(to_protocol_err)?;
        Ok(!branches.is_empty())
    }

    /// Runs the local `post-receive`-equivalent hook: `pre-push`'s own script, re-used here since
    /// this crate has no separate server-side hook directory — a push landing locally (e.g. over
    /// a `file://` remote) still gets one verification point after the objects and refs land.
    async fn post_receive_hook(&self) -> Result<(), ProtocolError> {
        run_hook(&self.wit_dir, HookKind::PrePush, &[], &[], false)
            .await
            .map_err(to_protocol_err)
    }
}
