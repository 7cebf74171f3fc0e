//! Error types for the Git-Internal crate.
//!
//! This module defines a unified error enumeration used across object parsing,
//! pack encoding/decoding, index handling, caching, and streaming. It integrates
//! with `thiserror` to provide rich `Display` implementations and error source
//! chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - Variants cover parse/validation, I/O, encoding/decoding, network/auth,
//!   and custom errors.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the Git-Internal library.
///
/// - Used across object parsing, pack encode/decode, index, caching and streams.
/// - Implements `std::error::Error` via `thiserror`.
pub enum GitError {
    /// Invalid or unsupported git object type name.
    #[error("The `{0}` is not a valid git object type.")]
    InvalidObjectType(String),

    /// Malformed or unsupported blob object encoding.
    #[error("The `{0}` is not a valid git blob object.")]
    InvalidBlobObject(String),

    /// Malformed tree object.
    #[error("Not a valid git tree object.")]
    InvalidTreeObject,

    /// Invalid tree entry (mode/name/hash).
    #[error("The `{0}` is not a valid git tree item.")]
    InvalidTreeItem(String),

    /// Tree contains no entries.
    #[error("`{0}`.")]
    EmptyTreeItems(String),

    /// Invalid commit signature type.
    #[error("The `{0}` is not a valid git commit signature.")]
    InvalidSignatureType(String),

    /// Malformed commit object.
    #[error("Not a valid git commit object.")]
    InvalidCommitObject,

    /// Commit parse or validation failed.
    #[error("Invalid Commit: {0}")]
    InvalidCommit(String),

    /// Malformed tag object.
    #[error("Not a valid git tag object: {0}")]
    InvalidTagObject(String),

    /// Malformed note object.
    #[error("Not a valid git note object: {0}")]
    InvalidNoteObject(String),

    /// Malformed or unsupported index (.idx) file.
    #[error("The `{0}` is not a valid idx file.")]
    InvalidIdxFile(String),

    /// Malformed or unsupported pack file.
    #[error("The `{0}` is not a valid pack file.")]
    InvalidPackFile(String),

    /// Invalid pack header magic or version.
    #[error("The `{0}` is not a valid pack header.")]
    InvalidPackHeader(String),

    /// Malformed or unsupported git index file.
    #[error("The `{0}` is not a valid index file.")]
    InvalidIndexFile(String),

    /// Invalid git index header.
    #[error("The `{0}` is not a valid index header.")]
    InvalidIndexHeader(String),

    /// Invalid CLI or function argument.
    #[error("Argument parse failed: {0}")]
    InvalidArgument(String),

    /// I/O error from underlying reader or writer.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    /// Invalid SHA1 hash formatting or value.
    #[error("The {0} is not a valid Hash value ")]
    InvalidHashValue(String),

    /// Delta object reconstruction error.
    #[error("Delta Object Error Info:{0}")]
    DeltaObjectError(String),

    /// Object not fully populated for packing.
    #[error("The object to be packed is incomplete ,{0}")]
    UnCompletedPackObject(String),

    /// Invalid decoded object info.
    #[error("Error decode in the Object ,info:{0}")]
    InvalidObjectInfo(String),

    /// Hash not found in current file context.
    #[error("Cannot find Hash value: {0} from current file")]
    NotFoundHashValue(String),

    /// Failed to encode object to bytes.
    #[error("Can't encode the object which id [{0}] to bytes")]
    EncodeObjectError(String),

    /// Text encoding or UTF-8 conversion error.
    #[error("UTF-8 conversion error: {0}")]
    ConversionError(String),

    /// Invalid path when locating parent tree.
    #[error("Can't find parent tree by path: {0}")]
    InvalidPathError(String),

    /// Failed to encode pack entries.
    #[error("Can't encode entries to pack: {0}")]
    PackEncodeError(String),

    /// Object missing from caches or storage.
    #[error("Can't find specific object: {0}")]
    ObjectNotFound(String),

    /// Repository not found.
    #[error("Repository not found")]
    RepoNotFound,

    /// Unauthorized access.
    #[error("UnAuthorized: {0}")]
    UnAuthorized(String),

    /// Network communication error.
    #[error("Network Error: {0}")]
    NetworkError(String),

    /// Generic custom error for miscellaneous failures.
    #[error("{0}")]
    CustomError(String),

    /// Path is not inside a repository (no `.wit` metadata directory found).
    #[error("not a repository: {0}")]
    NotARepository(String),

    /// Another process holds the repository's advisory lock.
    #[error("repository is busy: {0}")]
    RepositoryBusy(String),

    /// A short name matched more than one ref namespace or hash prefix.
    #[error("`{0}` is ambiguous")]
    AmbiguousRef(String),

    /// No ref matched the given name under any lookup-order namespace.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// The working tree or index has changes that would be lost by the requested operation.
    #[error("uncommitted changes present: {0}")]
    UncommittedChanges(String),

    /// A ref update was rejected because it was not a fast-forward.
    #[error("update rejected, not a fast-forward: {0}")]
    NonFastForward(String),

    /// A merge is already in progress; finish or abort it before starting another operation.
    #[error("merge in progress: {0}")]
    MergeInProgress(String),

    /// Some other multi-step operation (revert, rebase/stack sync) already has a state file on
    /// disk; at most one may be in progress per repository at a time.
    #[error("operation in progress: {0}")]
    OperationInProgress(String),

    /// A three-way merge or revert produced unresolved conflicts.
    #[error("conflicts present: {0}")]
    ConflictsPresent(String),

    /// The requested operation requires an attached HEAD but it is detached.
    #[error("HEAD is detached: {0}")]
    DetachedHead(String),

    /// A configured hook exited non-zero.
    #[error("hook failed: {0}")]
    HookFailed(String),

    /// A multi-step operation engine failed outside the above specific categories.
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// An operation exceeded its allotted time budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// An operation was cancelled before completion.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A remote rejected a push outright (hook failure, protected ref, etc.), distinct from a
    /// client-side non-fast-forward rejection.
    #[error("remote rejected the push: {0}")]
    ServerRejected(String),
}

impl GitError {
    /// Remediation hints for the caller, if any are known for this error kind. Empty for errors
    /// with no generally-applicable suggestion.
    pub fn hints(&self) -> Vec<String> {
        match self {
            GitError::NotARepository(_) => {
                vec!["run `wit init` to create a repository here".to_string()]
            }
            GitError::RepositoryBusy(_) => {
                vec!["another wit process is running against this repository; wait for it to finish".to_string()]
            }
            GitError::AmbiguousRef(name) => vec![format!(
                "qualify `{name}` with its full namespace, e.g. `refs/heads/{name}`"
            )],
            GitError::UncommittedChanges(_) => vec![
                "commit or stash your changes first".to_string(),
                "use `--force` to discard them, if that is really intended".to_string(),
            ],
            GitError::NonFastForward(_) => vec![
                "fetch and integrate the remote's changes first".to_string(),
                "use `--force` to overwrite the remote ref, if that is really intended".to_string(),
            ],
            GitError::MergeInProgress(_) => vec![
                "finish the merge with `wit commit`".to_string(),
                "or run `wit merge --abort` to cancel it".to_string(),
            ],
            GitError::ConflictsPresent(_) => vec![
                "resolve the conflict markers in the listed paths, then stage them".to_string(),
            ],
            GitError::DetachedHead(_) => vec![
                "check out a branch first, e.g. `wit checkout main`".to_string(),
            ],
            GitError::HookFailed(_) => {
                vec!["re-run with `--no-verify` to bypass hooks, if that is really intended".to_string()]
            }
            GitError::ServerRejected(_) => {
                vec!["check the remote's ref policy or its server-side hooks for the rejection reason".to_string()]
            }
            _ => Vec::new(),
        }
    }
}
