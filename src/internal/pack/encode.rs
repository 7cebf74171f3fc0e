//! Streams received [`Entry`] values into a `pack-<hash>.pack` + `pack-<hash>.idx` pair on disk.
//!
//! Delta compression is not implemented here: every object is written as a zlib-compressed base
//! object (`window_size` is accepted for API compatibility with encoders that do delta-compress,
//! but otherwise unused). What this buys back in simplicity it loses in pack size; callers that
//! need compact packs for large histories should compress the resulting file at the transport
//! layer instead.

use std::{fs, io::Write, path::PathBuf};

use flate2::{Compression, write::ZlibEncoder};
use tokio::sync::mpsc;

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::{
        metadata::{EntryMeta, MetaAttached},
        pack::{entry::Entry, pack_index::IdxBuilder, pack_index::IndexEntry, utils::write_obj_header},
    },
    utils::HashAlgorithm,
};

const PACK_SIGNATURE: &[u8; 4] = b"PACK";
const PACK_VERSION: u32 = 2;

/// Consume `object_number` entries from `entry_rx`, write them as a pack file under `output_dir`,
/// build the matching `.idx`, and return both paths.
pub async fn encode_and_output_to_files(
    mut entry_rx: mpsc::Receiver<MetaAttached<Entry, EntryMeta>>,
    object_number: usize,
    output_dir: PathBuf,
    _window_size: usize,
) -> Result<(PathBuf, PathBuf), GitError> {
    fs::create_dir_all(&output_dir)?;

    let mut pack_bytes = Vec::new();
    pack_bytes.extend_from_slice(PACK_SIGNATURE);
    pack_bytes.extend_from_slice(&PACK_VERSION.to_be_bytes());
    pack_bytes.extend_from_slice(&(object_number as u32).to_be_bytes());

    let mut index_entries = Vec::with_capacity(object_number);
    let mut received = 0usize;

    while let Some(meta_entry) = entry_rx.recv().await {
        let offset = pack_bytes.len();
        let entry = &meta_entry.inner;

        let header = write_obj_header(entry.obj_type, entry.data.len())?;
        pack_bytes.extend_from_slice(&header);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&entry.data)?;
        let compressed = encoder.finish()?;
        pack_bytes.extend_from_slice(&compressed);

        index_entries.push(IndexEntry {
            hash: entry.hash,
            crc32: crc32fast::hash(&compressed),
            offset: offset as u64,
        });

        received += 1;
    }

    if received != object_number {
        return Err(GitError::PackEncodeError(format!(
            "received {received} entries over the channel but expected {object_number}"
        )));
    }

    let mut trailer_hasher = HashAlgorithm::new();
    trailer_hasher.update(&pack_bytes);
    let pack_hash_bytes = trailer_hasher.finalize();
    let pack_hash = ObjectHash::from_bytes(&pack_hash_bytes).map_err(GitError::InvalidHashValue)?;
    pack_bytes.extend_from_slice(&pack_hash_bytes);

    let hex = pack_hash.to_string();
    let pack_path = output_dir.join(format!("pack-{hex}.pack"));
    fs::write(&pack_path, &pack_bytes)?;

    let (idx_tx, mut idx_rx) = mpsc::channel::<Vec<u8>>(4096);
    let mut builder = IdxBuilder::new(object_number, idx_tx, pack_hash);
    let write_task = tokio::spawn(async move { builder.write_idx(index_entries).await });

    let mut idx_bytes = Vec::new();
    while let Some(chunk) = idx_rx.recv().await {
        idx_bytes.extend_from_slice(&chunk);
    }
    write_task
        .await
        .map_err(|e| GitError::PackEncodeError(e.to_string()))??;

    let idx_path = output_dir.join(format!("pack-{hex}.idx"));
    fs::write(&idx_path, &idx_bytes)?;

    Ok((pack_path, idx_path))
}

/// Build a complete pack file in memory from a slice of entries, synchronously.
///
/// Used by callers that already hold every object to send (a push's local object closure) and
/// have no use for the channel-based streaming path `encode_and_output_to_files` offers servers.
pub fn encode_objects_to_bytes(entries: &[Entry]) -> Result<Vec<u8>, GitError> {
    let mut pack_bytes = Vec::new();
    pack_bytes.extend_from_slice(PACK_SIGNATURE);
    pack_bytes.extend_from_slice(&PACK_VERSION.to_be_bytes());
    pack_bytes.extend_from_slice(&(entries.len() as u32).to_be_bytes());

    for entry in entries {
        let header = write_obj_header(entry.obj_type, entry.data.len())?;
        pack_bytes.extend_from_slice(&header);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&entry.data)?;
        let compressed = encoder.finish()?;
        pack_bytes.extend_from_slice(&compressed);
    }

    let mut trailer_hasher = HashAlgorithm::new();
    trailer_hasher.update(&pack_bytes);
    let pack_hash_bytes = trailer_hasher.finalize();
    pack_bytes.extend_from_slice(&pack_hash_bytes);

    Ok(pack_bytes)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::{
        hash::{HashKind, set_hash_kind_for_test},
        internal::object::{blob::Blob, types::ObjectType},
    };

    #[tokio::test]
    async fn encodes_a_small_pack_with_valid_header_and_trailer() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempdir().unwrap();
        let (tx, rx) = mpsc::channel(8);

        let contents = ["one", "two", "three"];
        for c in contents {
            let blob = Blob::from_content(c);
            let entry: Entry = blob.into();
            tx.send(MetaAttached {
                inner: entry,
                meta: EntryMeta::new(),
            })
            .await
            .unwrap();
        }
        drop(tx);

        let (pack_path, idx_path) = encode_and_output_to_files(rx, contents.len(), dir.path().to_path_buf(), 10)
            .await
            .unwrap();

        let pack_bytes = fs::read(&pack_path).unwrap();
        assert_eq!(&pack_bytes[0..4], PACK_SIGNATURE);
        assert_eq!(u32::from_be_bytes(pack_bytes[4..8].try_into().unwrap()), 2);
        assert_eq!(
            u32::from_be_bytes(pack_bytes[8..12].try_into().unwrap()),
            contents.len() as u32
        );

        let idx_bytes = fs::read(&idx_path).unwrap();
        assert_eq!(&idx_bytes[0..4], &[0xFF, 0x74, 0x4F, 0x63]);
        let _ = ObjectType::Blob;
    }
}
