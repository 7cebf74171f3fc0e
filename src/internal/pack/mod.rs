//! Pack file encoder/decoder implementations, caches, waitlists, and stream wrappers that faithfully
//! follow the [pack-format spec](https://git-scm.com/docs/pack-format).

pub mod cache;
pub mod cache_object;
pub mod channel_reader;
pub mod decode;
pub mod encode;
pub mod entry;
mod index_entry;
pub mod pack_index;
pub mod utils;
pub mod waitlist;
pub mod wrapper;
use std::sync::{Arc, atomic::AtomicUsize};

use threadpool::ThreadPool;

use crate::{
    hash::ObjectHash,
    internal::{
        object::ObjectTrait,
        pack::{cache::Caches, waitlist::Waitlist},
    },
};

const DEFAULT_TMP_DIR: &str = "./.cache_temp";

/// Representation of a Git pack file in memory.
pub struct Pack {
    pub number: usize,
    pub signature: ObjectHash,
    pub objects: Vec<Box<dyn ObjectTrait>>,
    pub pool: Arc<ThreadPool>,
    pub waitlist: Arc<Waitlist>,
    pub caches: Arc<Caches>,
    pub mem_limit: Option<usize>,
    pub cache_objs_mem: Arc<AtomicUsize>,
    pub clean_tmp: bool,
}

impl Pack {
    /// Build a new pack decode/encode context.
    ///
    /// * `thread_num` - worker threads for CPU-bound pack work; defaults to the number of cores.
    /// * `mem_limit` - soft cap, in bytes, on decoded objects kept in the cache.
    /// * `temp_path` - scratch directory for spilling oversized caches; defaults to
    ///   `./.cache_temp`.
    /// * `clean_tmp` - whether `temp_path` is removed when this `Pack` is dropped.
    pub fn new(
        thread_num: Option<usize>,
        mem_limit: Option<usize>,
        temp_path: Option<std::path::PathBuf>,
        clean_tmp: bool,
    ) -> Self {
        let pool_size = thread_num.unwrap_or_else(num_cpus::get).max(1);
        let cache_objs_mem = Arc::new(AtomicUsize::new(0));
        let temp_dir = temp_path.unwrap_or_else(|| std::path::PathBuf::from(DEFAULT_TMP_DIR));

        Pack {
            number: 0,
            signature: ObjectHash::default(),
            objects: Vec::new(),
            pool: Arc::new(ThreadPool::new(pool_size)),
            waitlist: Arc::new(Waitlist::new()),
            caches: Arc::new(Caches::new(temp_dir, mem_limit, cache_objs_mem.clone())),
            mem_limit,
            cache_objs_mem,
            clean_tmp,
        }
    }
}

impl Drop for Pack {
    fn drop(&mut self) {
        if self.clean_tmp {
            let _ = std::fs::remove_dir_all(self.caches.temp_dir());
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::util::SubscriberInitExt;

    /// CAUTION: This two is same
    /// 1.
    /// tracing_subscriber::fmt().init();
    ///
    /// 2.
    /// env::set_var("RUST_LOG", "debug"); // must be set if use `fmt::init()`, or no output
    /// tracing_subscriber::fmt::init();
    pub(crate) fn init_logger() {
        let _ = tracing_subscriber::fmt::Subscriber::builder()
            .with_target(false)
            .without_time()
            .with_level(true)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
            .try_init(); // avoid multi-init
    }
}
