//! Object type enumeration shared across the object, pack, and zlib modules.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// In Git, each object type is assigned a unique integer value, which is used to identify the
/// type of the object in Git repositories.
///
/// * `Blob`: stores the content of a file.
/// * `Tree`: represents a directory, mapping names to blobs/trees.
/// * `Commit`: a snapshot with tree, parents, author/committer, and message.
/// * `Tag`: an annotated reference to another object.
/// * `OffsetDelta` / `HashDelta`: pack-only delta encodings, resolved against a base object
///   before reaching any other layer — never written to the object store directly.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Commit = 1,
    Tree,
    Blob,
    Tag,
    OffsetDelta,
    HashDelta,
}

const COMMIT_OBJECT_TYPE: &[u8] = b"commit";
const TREE_OBJECT_TYPE: &[u8] = b"tree";
const BLOB_OBJECT_TYPE: &[u8] = b"blob";
const TAG_OBJECT_TYPE: &[u8] = b"tag";

impl Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectType::Blob => write!(f, "blob"),
            ObjectType::Tree => write!(f, "tree"),
            ObjectType::Commit => write!(f, "commit"),
            ObjectType::Tag => write!(f, "tag"),
            ObjectType::OffsetDelta => write!(f, "OffsetDelta"),
            ObjectType::HashDelta => write!(f, "HashDelta"),
        }
    }
}

impl ObjectType {
    /// Convert object type to 3-bit pack header type id.
    ///
    /// Git pack headers only carry 3 type bits (values 0..=7).
    pub fn to_pack_type_u8(&self) -> Result<u8, GitError> {
        match self {
            ObjectType::Commit => Ok(1),
            ObjectType::Tree => Ok(2),
            ObjectType::Blob => Ok(3),
            ObjectType::Tag => Ok(4),
            ObjectType::OffsetDelta => Ok(6),
            ObjectType::HashDelta => Ok(7),
        }
    }

    /// Decode 3-bit pack header type id to object type.
    pub fn from_pack_type_u8(number: u8) -> Result<ObjectType, GitError> {
        match number {
            1 => Ok(ObjectType::Commit),
            2 => Ok(ObjectType::Tree),
            3 => Ok(ObjectType::Blob),
            4 => Ok(ObjectType::Tag),
            6 => Ok(ObjectType::OffsetDelta),
            7 => Ok(ObjectType::HashDelta),
            _ => Err(GitError::InvalidObjectType(format!(
                "Invalid pack object type number: {number}"
            ))),
        }
    }

    /// Object type name as it appears in the `"<type> <len>\0"` header. Delta types have no
    /// header representation; they never reach the content-addressed store directly.
    pub fn to_bytes(&self) -> Result<&'static [u8], GitError> {
        match self {
            ObjectType::Commit => Ok(COMMIT_OBJECT_TYPE),
            ObjectType::Tree => Ok(TREE_OBJECT_TYPE),
            ObjectType::Blob => Ok(BLOB_OBJECT_TYPE),
            ObjectType::Tag => Ok(TAG_OBJECT_TYPE),
            ObjectType::OffsetDelta | ObjectType::HashDelta => Err(GitError::InvalidObjectType(
                format!("delta type `{self}` has no object header"),
            )),
        }
    }

    /// Parses a string representation of a Git object type and returns an ObjectType value.
    pub fn from_string(s: &str) -> Result<ObjectType, GitError> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(GitError::InvalidObjectType(s.to_string())),
        }
    }

    /// Convert an object type to a byte array (alias of [`Self::to_bytes`] returning an owned
    /// vector; kept for call sites that need ownership).
    pub fn to_data(self) -> Result<Vec<u8>, GitError> {
        Ok(self.to_bytes()?.to_vec())
    }
}
