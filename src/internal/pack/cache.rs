//! In-memory object cache keyed by pack offset and by hash, used while decoding a pack to resolve
//! deltas against already-seen base objects.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use dashmap::DashMap;

use crate::{
    hash::ObjectHash,
    internal::pack::cache_object::{CacheObject, CacheObjectInfo},
};

/// Holds every base object decoded so far during a pack decode, so later objects in the stream
/// can resolve `OBJ_OFS_DELTA`/`OBJ_REF_DELTA` against them without re-reading the pack.
pub struct Caches {
    temp_dir: PathBuf,
    mem_limit: Option<usize>,
    cache_objs_mem: Arc<AtomicUsize>,
    by_offset: DashMap<usize, CacheObject>,
    by_hash: DashMap<ObjectHash, CacheObject>,
}

impl Caches {
    pub fn new(temp_dir: PathBuf, mem_limit: Option<usize>, cache_objs_mem: Arc<AtomicUsize>) -> Self {
        Self {
            temp_dir,
            mem_limit,
            cache_objs_mem,
            by_offset: DashMap::new(),
            by_hash: DashMap::new(),
        }
    }

    /// Directory reserved for spilling oversized caches to disk.
    pub fn temp_dir(&self) -> &PathBuf {
        &self.temp_dir
    }

    /// Record a decoded base object, keyed by both its pack offset and content hash.
    pub fn insert(&self, obj: CacheObject) {
        self.cache_objs_mem
            .fetch_add(obj.data_decompressed.len(), Ordering::Relaxed);
        // TODO: once cache_objs_mem exceeds mem_limit, spill entries to temp_dir and drop
        // data_decompressed instead of growing the in-memory maps unbounded.
        let _ = self.mem_limit;

        if let CacheObjectInfo::BaseObject(_, hash) = obj.info {
            self.by_hash.insert(hash, obj.clone());
        }
        self.by_offset.insert(obj.offset, obj);
    }

    pub fn get_by_offset(&self, offset: usize) -> Option<CacheObject> {
        self.by_offset.get(&offset).map(|r| r.value().clone())
    }

    pub fn get_by_hash(&self, hash: &ObjectHash) -> Option<CacheObject> {
        self.by_hash.get(hash).map(|r| r.value().clone())
    }

    /// Current tracked memory usage of decoded base objects, in bytes.
    pub fn mem_used(&self) -> usize {
        self.cache_objs_mem.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::types::ObjectType;

    #[test]
    fn insert_is_queryable_by_offset_and_hash() {
        let caches = Caches::new(PathBuf::from("./.cache_temp"), None, Arc::new(AtomicUsize::new(0)));
        let hash = ObjectHash::new(b"blob 5\0hello");
        caches.insert(CacheObject {
            info: CacheObjectInfo::BaseObject(ObjectType::Blob, hash),
            offset: 12,
            crc32: 0xdead_beef,
            data_decompressed: b"hello".to_vec(),
            mem_recorder: None,
            is_delta_in_pack: false,
        });

        assert!(caches.get_by_offset(12).is_some());
        assert!(caches.get_by_hash(&hash).is_some());
        assert!(caches.get_by_offset(13).is_none());
        assert_eq!(caches.mem_used(), 5);
    }
}
