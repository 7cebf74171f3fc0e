//! Pack stream decoder: parses the `PACK` header, resolves `OBJ_OFS_DELTA`/`OBJ_REF_DELTA` objects
//! against already-decoded bases (queuing ones that arrive out of order on the pack's
//! [`Waitlist`]), and verifies the trailing pack hash before handing objects to the caller.

use std::io::{BufRead, Cursor, Read};

use crate::{
    delta::decode::delta_decode,
    errors::GitError,
    hash::ObjectHash,
    internal::{
        metadata::{EntryMeta, MetaAttached},
        object::types::ObjectType,
        pack::{
            Pack,
            cache_object::{CacheObject, CacheObjectInfo},
            entry::Entry,
            utils::{read_obj_header, read_offset_delta_distance},
        },
        zlib::stream::inflate::ReadBoxed,
        pack::wrapper::Wrapper,
    },
};

const PACK_SIGNATURE: &[u8; 4] = b"PACK";
const OBJ_OFS_DELTA: u8 = 6;
const OBJ_REF_DELTA: u8 = 7;

impl Pack {
    /// Decode a pack stream, invoking `callback` once per fully resolved object (deltas already
    /// applied against their base), in the order objects were decoded — not necessarily the order
    /// they appeared in the pack, since a delta that arrives before its base is queued until the
    /// base shows up. `hash_callback`, if given, receives the verified trailer hash once at the end.
    pub fn decode<R, F, H>(
        &mut self,
        reader: &mut R,
        mut callback: F,
        mut hash_callback: Option<H>,
    ) -> Result<(), GitError>
    where
        R: BufRead,
        F: FnMut(MetaAttached<Entry, EntryMeta>),
        H: FnMut(ObjectHash),
    {
        let mut wrapper = Wrapper::new(reader);

        let mut magic = [0u8; 4];
        wrapper.read_exact(&mut magic)?;
        if &magic != PACK_SIGNATURE {
            return Err(GitError::InvalidPackHeader(format!("{magic:?}")));
        }

        let mut version_buf = [0u8; 4];
        wrapper.read_exact(&mut version_buf)?;
        let version = u32::from_be_bytes(version_buf);
        if version != 2 {
            return Err(GitError::InvalidPackHeader(format!(
                "unsupported pack version {version}"
            )));
        }

        let mut count_buf = [0u8; 4];
        wrapper.read_exact(&mut count_buf)?;
        let count = u32::from_be_bytes(count_buf) as usize;

        for _ in 0..count {
            let start_offset = wrapper.bytes_read();
            let (type_num, size) = read_obj_header(&mut wrapper)?;

            match type_num {
                OBJ_OFS_DELTA => {
                    let distance = read_offset_delta_distance(&mut wrapper)?;
                    let base_offset = start_offset.checked_sub(distance).ok_or_else(|| {
                        GitError::InvalidPackFile("offset delta points before start of pack".into())
                    })?;

                    let mut delta_reader = ReadBoxed::new_for_delta(&mut wrapper);
                    let mut delta_bytes = Vec::with_capacity(size);
                    delta_reader.read_to_end(&mut delta_bytes)?;

                    match self.caches.get_by_offset(base_offset) {
                        Some(base) => self.resolve_delta(start_offset, &base, delta_bytes, &mut callback)?,
                        None => self.waitlist.insert_offset(
                            base_offset,
                            CacheObject {
                                info: CacheObjectInfo::OffsetDelta(base_offset),
                                offset: start_offset,
                                crc32: 0,
                                data_decompressed: delta_bytes,
                                mem_recorder: Some(self.cache_objs_mem.clone()),
                                is_delta_in_pack: true,
                            },
                        ),
                    }
                }
                OBJ_REF_DELTA => {
                    let base_hash = ObjectHash::from_stream(&mut wrapper)?;

                    let mut delta_reader = ReadBoxed::new_for_delta(&mut wrapper);
                    let mut delta_bytes = Vec::with_capacity(size);
                    delta_reader.read_to_end(&mut delta_bytes)?;

                    match self.caches.get_by_hash(&base_hash) {
                        Some(base) => self.resolve_delta(start_offset, &base, delta_bytes, &mut callback)?,
                        None => self.waitlist.insert_ref(
                            base_hash,
                            CacheObject {
                                info: CacheObjectInfo::RefDelta(base_hash),
                                offset: start_offset,
                                crc32: 0,
                                data_decompressed: delta_bytes,
                                mem_recorder: Some(self.cache_objs_mem.clone()),
                                is_delta_in_pack: true,
                            },
                        ),
                    }
                }
                _ => {
                    let obj_type = ObjectType::from_pack_type_u8(type_num)?;
                    let mut obj_reader = ReadBoxed::new(&mut wrapper, obj_type, size);
                    let mut data = Vec::with_capacity(size);
                    obj_reader.read_to_end(&mut data)?;
                    let hash = ObjectHash::from_bytes(&obj_reader.hash.clone().finalize())
                        .map_err(GitError::InvalidHashValue)?;

                    self.emit_base(start_offset, obj_type, hash, data, &mut callback)?;
                }
            }

            self.number += 1;
        }

        let trailer = ObjectHash::from_stream(&mut wrapper)?;
        let computed = wrapper.final_hash();
        if trailer != computed {
            return Err(GitError::InvalidPackFile(format!(
                "trailer hash {trailer} does not match computed hash {computed}"
            )));
        }
        self.signature = trailer;
        if let Some(cb) = hash_callback.as_mut() {
            cb(trailer);
        }

        Ok(())
    }

    /// Record a decoded base object, hand it to the callback, and resolve any deltas that were
    /// queued waiting on this offset/hash (recursively, for delta-of-delta chains).
    fn emit_base<F>(
        &self,
        offset: usize,
        obj_type: ObjectType,
        hash: ObjectHash,
        data: Vec<u8>,
        callback: &mut F,
    ) -> Result<(), GitError>
    where
        F: FnMut(MetaAttached<Entry, EntryMeta>),
    {
        let crc32 = crc32fast::hash(&data);
        self.caches.insert(CacheObject {
            info: CacheObjectInfo::BaseObject(obj_type, hash),
            offset,
            crc32,
            data_decompressed: data.clone(),
            mem_recorder: Some(self.cache_objs_mem.clone()),
            is_delta_in_pack: false,
        });

        let waiters = self.waitlist.take(offset, hash);

        callback(MetaAttached {
            inner: Entry {
                obj_type,
                data: data.clone(),
                hash,
                chain_len: 0,
            },
            meta: EntryMeta {
                pack_offset: Some(offset),
                crc32: Some(crc32),
                is_delta: Some(false),
                ..EntryMeta::new()
            },
        });

        for waiter in waiters {
            let delta_bytes = waiter.data_decompressed.clone();
            let mut cursor = Cursor::new(&delta_bytes);
            let resolved = delta_decode(&mut cursor, &data)
                .map_err(|e| GitError::DeltaObjectError(e.to_string()))?;
            let resolved_hash = ObjectHash::from_type_and_data(obj_type, &resolved);
            self.emit_base(waiter.offset, obj_type, resolved_hash, resolved, callback)?;
        }

        Ok(())
    }

    /// Apply an already-located base against a freshly decoded delta's raw instruction bytes.
    fn resolve_delta<F>(
        &self,
        offset: usize,
        base: &CacheObject,
        delta_bytes: Vec<u8>,
        callback: &mut F,
    ) -> Result<(), GitError>
    where
        F: FnMut(MetaAttached<Entry, EntryMeta>),
    {
        let obj_type = match base.info {
            CacheObjectInfo::BaseObject(t, _) => t,
            _ => {
                return Err(GitError::DeltaObjectError(
                    "delta base is itself unresolved".into(),
                ));
            }
        };

        let mut cursor = Cursor::new(&delta_bytes);
        let data = delta_decode(&mut cursor, &base.data_decompressed)
            .map_err(|e| GitError::DeltaObjectError(e.to_string()))?;
        let hash = ObjectHash::from_type_and_data(obj_type, &data);

        self.emit_base(offset, obj_type, hash, data, callback)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor as IoCursor;

    use super::*;
    use crate::{
        hash::{HashKind, set_hash_kind_for_test},
        internal::{
            metadata::MetaAttached,
            object::{blob::Blob, types::ObjectType},
            pack::{entry::Entry, utils::write_obj_header},
        },
    };
    use flate2::{Compression, write::ZlibEncoder};
    use std::io::Write;

    fn build_simple_pack(contents: &[&str]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"PACK");
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&(contents.len() as u32).to_be_bytes());

        for c in contents {
            let blob = Blob::from_content(c);
            let header = write_obj_header(ObjectType::Blob, blob.data.len()).unwrap();
            bytes.extend_from_slice(&header);

            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&blob.data).unwrap();
            bytes.extend_from_slice(&encoder.finish().unwrap());
        }

        let mut hasher = crate::utils::HashAlgorithm::new();
        hasher.update(&bytes);
        bytes.extend_from_slice(&hasher.finalize());
        bytes
    }

    #[test]
    fn decodes_a_pack_with_only_base_objects() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let contents = ["alpha", "beta", "gamma"];
        let pack_bytes = build_simple_pack(&contents);

        let mut pack = Pack::new(Some(1), None, None, false);
        let mut decoded: Vec<MetaAttached<Entry, EntryMeta>> = Vec::new();
        let mut reader = IoCursor::new(pack_bytes);

        pack.decode(&mut reader, |entry| decoded.push(entry), None::<fn(ObjectHash)>)
            .unwrap();

        assert_eq!(decoded.len(), contents.len());
        assert_eq!(pack.number, contents.len());
        for (entry, content) in decoded.iter().zip(contents.iter()) {
            assert_eq!(entry.inner.data, content.as_bytes());
            assert_eq!(entry.inner.obj_type, ObjectType::Blob);
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let mut pack = Pack::new(Some(1), None, None, false);
        let mut reader = IoCursor::new(b"NOPE0000".to_vec());
        let err = pack
            .decode(&mut reader, |_| {}, None::<fn(ObjectHash)>)
            .unwrap_err();
        assert!(matches!(err, GitError::InvalidPackHeader(_)));
    }
}
