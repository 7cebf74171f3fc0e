//! Content-addressed object store: `objects/xx/yyyy…` fanout layout, zlib-compressed on disk,
//! written atomically via a temp file + rename so a crash never leaves a half-written object.

use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::ZlibEncoder;

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::types::ObjectType;
use crate::internal::zlib::stream::inflate::ReadBoxed;

/// A content-addressed object store rooted at `<repo>/objects`.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    objects_dir: PathBuf,
}

impl ObjectStore {
    pub fn new(repo_dir: impl AsRef<Path>) -> Self {
        ObjectStore {
            objects_dir: repo_dir.as_ref().join("objects"),
        }
    }

    fn path_for(&self, hash: &ObjectHash) -> PathBuf {
        let hex = hash.to_string();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    /// `true` if an object with this hash is already on disk.
    pub fn exists(&self, hash: &ObjectHash) -> bool {
        self.path_for(hash).is_file()
    }

    /// Write `data` (the object's raw payload, not including the `"<type> <len>\0"` header) under
    /// its content hash, deduplicating if it already exists. Returns the computed hash.
    pub fn write_object(&self, object_type: ObjectType, data: &[u8]) -> Result<ObjectHash, GitError> {
        let hash = ObjectHash::from_type_and_data(object_type, data);
        if self.exists(&hash) {
            return Ok(hash);
        }

        let path = self.path_for(&hash);
        let dir = path.parent().expect("fanout path always has a parent");
        fs::create_dir_all(dir)?;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(object_type.to_bytes()?)?;
        encoder.write_all(b" ")?;
        encoder.write_all(data.len().to_string().as_bytes())?;
        encoder.write_all(b"\0")?;
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&compressed)?;
        tmp.persist(&path)
            .map_err(|e| GitError::IOError(e.error))?;

        Ok(hash)
    }

    /// Read and inflate an object, returning its type and raw payload.
    pub fn read_object(&self, hash: &ObjectHash) -> Result<(ObjectType, Vec<u8>), GitError> {
        let path = self.path_for(hash);
        let file = fs::File::open(&path)
            .map_err(|_| GitError::ObjectNotFound(hash.to_string()))?;
        let mut reader = BufReader::new(file);

        // Peek the header through a delta-mode reader (no hash verification needed to parse it),
        // then re-open to verify the hash against the declared object type once known.
        let mut header_reader = ReadBoxed::new_for_delta(&mut reader);
        let (object_type, size) = read_header(&mut header_reader)?;
        let mut payload = Vec::with_capacity(size);
        header_reader.read_to_end(&mut payload)?;

        if payload.len() != size {
            return Err(GitError::InvalidObjectInfo(format!(
                "declared size {size} does not match decoded length {}",
                payload.len()
            )));
        }

        let expected = ObjectHash::from_type_and_data(object_type, &payload);
        if &expected != hash {
            return Err(GitError::InvalidHashValue(hash.to_string()));
        }

        Ok((object_type, payload))
    }

    /// Every object hash currently on disk. Used only for ambiguous hash-prefix ref resolution
    /// (≥4 hex chars with no matching ref name) — O(object count), never on a hot path.
    pub fn all_hashes(&self) -> Result<Vec<ObjectHash>, GitError> {
        let mut out = Vec::new();
        let top = match fs::read_dir(&self.objects_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(GitError::IOError(e)),
        };
        for entry in top {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let prefix = entry.file_name().to_string_lossy().into_owned();
            for inner in fs::read_dir(entry.path())? {
                let inner = inner?;
                let suffix = inner.file_name().to_string_lossy().into_owned();
                if let Ok(hash) = format!("{prefix}{suffix}").parse::<ObjectHash>() {
                    out.push(hash);
                }
            }
        }
        Ok(out)
    }
}

/// Parse the `"<type> <len>\0"` header off the front of an inflate stream.
fn read_header<R: std::io::BufRead>(
    reader: &mut ReadBoxed<&mut R>,
) -> Result<(ObjectType, usize), GitError> {
    let mut byte = [0u8; 1];
    let mut type_buf = Vec::new();
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == b' ' {
            break;
        }
        type_buf.push(byte[0]);
    }
    let object_type = ObjectType::from_string(
        std::str::from_utf8(&type_buf).map_err(|e| GitError::ConversionError(e.to_string()))?,
    )?;

    let mut size_buf = Vec::new();
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        size_buf.push(byte[0]);
    }
    let size: usize = std::str::from_utf8(&size_buf)
        .map_err(|e| GitError::ConversionError(e.to_string()))?
        .parse()
        .map_err(|_| GitError::InvalidObjectInfo("non-numeric object size".to_string()))?;

    Ok((object_type, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};

    #[test]
    fn writes_and_reads_back_a_blob() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let hash = store.write_object(ObjectType::Blob, b"hello\n").unwrap();
        assert_eq!(hash.to_string(), "ce013625030ba8dba906f756967f9e9ca394464a");
        assert!(store.exists(&hash));

        let (object_type, data) = store.read_object(&hash).unwrap();
        assert_eq!(object_type, ObjectType::Blob);
        assert_eq!(data, b"hello\n");
    }

    #[test]
    fn writing_the_same_content_twice_is_idempotent() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let first = store.write_object(ObjectType::Blob, b"same").unwrap();
        let second = store.write_object(ObjectType::Blob, b"same").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_object_is_reported_as_not_found() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path());
        let hash = ObjectHash::new(b"nonexistent");
        assert!(store.read_object(&hash).is_err());
    }
}
