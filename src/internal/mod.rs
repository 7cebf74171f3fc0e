//! Internal building blocks (index, metadata, object model, pack/zlib) that power the public APIs.

pub mod index;
pub mod metadata;
pub mod object;
pub mod pack;
pub mod store;
pub mod walk;
pub mod zlib;
