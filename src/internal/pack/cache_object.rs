//! In-memory representation of a decoded (or still-pending) pack object, shared by the cache and
//! the waitlist while deltas are being resolved against their bases.

use std::sync::{Arc, atomic::AtomicUsize};

use crate::{hash::ObjectHash, internal::object::types::ObjectType};

/// What a [`CacheObject`] currently holds: a fully resolved base object, or an undecoded delta
/// still waiting on its base, identified either by pack offset (`OBJ_OFS_DELTA`) or by hash
/// (`OBJ_REF_DELTA`).
#[derive(Clone, Copy, Debug)]
pub enum CacheObjectInfo {
    BaseObject(ObjectType, ObjectHash),
    OffsetDelta(usize),
    RefDelta(ObjectHash),
}

/// A decoded pack object, or a pending delta, held by [`super::cache::Caches`] /
/// [`super::waitlist::Waitlist`] during pack decoding.
#[derive(Clone, Debug)]
pub struct CacheObject {
    pub info: CacheObjectInfo,
    /// Offset of this object's header within the pack stream.
    pub offset: usize,
    pub crc32: u32,
    /// Decompressed bytes: the object's content for a base, or the raw delta instruction stream
    /// for a pending delta.
    pub data_decompressed: Vec<u8>,
    /// Shared counter this object's bytes have been charged against, if memory accounting is
    /// active for this decode.
    pub mem_recorder: Option<Arc<AtomicUsize>>,
    pub is_delta_in_pack: bool,
}
