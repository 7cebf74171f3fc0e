//! The Blob object stores the raw, uninterpreted byte contents of a single file. It carries no
//! metadata of its own — path, mode, and file name all live one level up, in the tree entry that
//! points at it.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::ObjectType;

/// A `Blob` is the content-addressed storage unit for file contents.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub id: ObjectHash,
    pub data: Vec<u8>,
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Blob: {}", self.id)
    }
}

impl Blob {
    /// Build a blob from raw content, computing its hash.
    pub fn from_content(content: &str) -> Blob {
        Self::from_bytes_owned(content.as_bytes().to_vec())
    }

    /// Build a blob from owned bytes, computing its hash.
    pub fn from_bytes_owned(data: Vec<u8>) -> Blob {
        let id = ObjectHash::from_type_and_data(ObjectType::Blob, &data);
        Blob { id, data }
    }
}

impl ObjectTrait for Blob {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        Ok(Blob {
            id: hash,
            data: data.to_vec(),
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn get_size(&self) -> usize {
        self.data.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};

    #[test]
    fn from_content_hashes_bytes() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let blob = Blob::from_content("hello\n");
        assert_eq!(blob.data, b"hello\n");
        // Known git blob hash for "hello\n"
        assert_eq!(blob.id.to_string(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn from_bytes_preserves_given_hash() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let data = b"some content";
        let hash = ObjectHash::from_type_and_data(ObjectType::Blob, data);
        let blob = Blob::from_bytes(data, hash).unwrap();
        assert_eq!(blob.to_data().unwrap(), data);
        assert_eq!(blob.get_type(), ObjectType::Blob);
    }
}
