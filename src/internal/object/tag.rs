//! The Tag object is an annotated reference to another object, most often a commit. Unlike a plain
//! ref, an annotated tag is itself a hashed, content-addressed object: it carries a tagger identity,
//! a message, and the hash/type of the object it points at.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::ObjectType;
use crate::internal::object::signature::Signature;

#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: ObjectHash,
    pub object_hash: ObjectHash,
    pub object_type: ObjectType,
    pub tag_name: String,
    pub tagger: Signature,
    pub message: String,
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "object {}", self.object_hash)?;
        writeln!(f, "type {}", self.object_type)?;
        writeln!(f, "tag {}", self.tag_name)?;
        writeln!(f, "{}", self.tagger)?;
        writeln!(f, "{}", self.message)
    }
}

impl Tag {
    pub fn new(
        object_hash: ObjectHash,
        object_type: ObjectType,
        tag_name: String,
        tagger: Signature,
        message: String,
    ) -> Tag {
        let mut tag = Tag {
            id: ObjectHash::default(),
            object_hash,
            object_type,
            tag_name,
            tagger,
            message,
        };
        let hash = ObjectHash::from_type_and_data(ObjectType::Tag, &tag.to_data().unwrap());
        tag.id = hash;
        tag
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        let mut cursor = data;

        let object_end = cursor
            .find_byte(0x0a)
            .ok_or_else(|| GitError::InvalidTagObject("missing object line".to_string()))?;
        let object_hash = ObjectHash::from_str(
            std::str::from_utf8(&cursor[7..object_end]) // "object " is 7 bytes
                .map_err(|e| GitError::ConversionError(e.to_string()))?,
        )
        .map_err(GitError::InvalidHashValue)?;
        cursor = &cursor[object_end + 1..];

        let type_end = cursor
            .find_byte(0x0a)
            .ok_or_else(|| GitError::InvalidTagObject("missing type line".to_string()))?;
        let object_type = ObjectType::from_string(
            std::str::from_utf8(&cursor[5..type_end]) // "type " is 5 bytes
                .map_err(|e| GitError::ConversionError(e.to_string()))?,
        )?;
        cursor = &cursor[type_end + 1..];

        let tag_end = cursor
            .find_byte(0x0a)
            .ok_or_else(|| GitError::InvalidTagObject("missing tag line".to_string()))?;
        let tag_name = String::from_utf8(cursor[4..tag_end].to_vec()) // "tag " is 4 bytes
            .map_err(|e| GitError::ConversionError(e.to_string()))?;
        cursor = &cursor[tag_end + 1..];

        let tagger_end = cursor
            .find_byte(0x0a)
            .ok_or_else(|| GitError::InvalidTagObject("missing tagger line".to_string()))?;
        let tagger = Signature::from_data(cursor[..tagger_end].to_vec())?;
        cursor = &cursor[tagger_end + 1..];

        // Skip the blank line separating the header block from the message.
        let message = if cursor.first() == Some(&0x0a) {
            String::from_utf8_lossy(&cursor[1..]).into_owned()
        } else {
            String::from_utf8_lossy(cursor).into_owned()
        };

        Ok(Tag {
            id: hash,
            object_hash,
            object_type,
            tag_name,
            tagger,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn get_size(&self) -> usize {
        0
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        data.extend(b"object ");
        data.extend(self.object_hash.to_string().as_bytes());
        data.extend(&[0x0a]);

        data.extend(b"type ");
        data.extend(self.object_type.to_string().as_bytes());
        data.extend(&[0x0a]);

        data.extend(b"tag ");
        data.extend(self.tag_name.as_bytes());
        data.extend(&[0x0a]);

        data.extend(self.tagger.to_data()?);
        data.extend(&[0x0a, 0x0a]);

        data.extend(self.message.as_bytes());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use crate::internal::object::signature::SignatureType;

    #[test]
    fn round_trips_through_bytes() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let object_hash = ObjectHash::from_type_and_data(ObjectType::Commit, b"fake commit");
        let tagger = Signature::new(
            SignatureType::Tagger,
            "Ada".to_string(),
            "a@x.com".to_string(),
        );
        let tag = Tag::new(
            object_hash,
            ObjectType::Commit,
            "v1.0.0".to_string(),
            tagger,
            "release notes\n".to_string(),
        );

        let data = tag.to_data().unwrap();
        let decoded = Tag::from_bytes(&data, tag.id).unwrap();
        assert_eq!(decoded.object_hash, object_hash);
        assert_eq!(decoded.object_type, ObjectType::Commit);
        assert_eq!(decoded.tag_name, "v1.0.0");
        assert_eq!(decoded.message, "release notes\n");
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(Tag::from_bytes(b"object deadbeef", ObjectHash::default()).is_err());
    }
}
