//! zlib framing around the object store's content streams.

pub mod stream;
