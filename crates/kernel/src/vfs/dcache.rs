/// VFS dentry cache
///
/// Caches resolved inodes keyed by `(device index, inode number)` so that
/// repeated lookups of the same on-disk file return one canonical
/// `Arc<Inode>` instead of a fresh inode (and fresh `InodeOps`) built from
/// scratch on every path component. Entries are held as `Weak<Inode>`:
/// once every `Arc<Inode>` handed out for a key is dropped, `Weak::upgrade`
/// starts failing and the entry is effectively gone, matching the rule
/// that a dentry exists in the cache iff its reference count is at least
/// one. A background reaper isn't needed -- a dead `Weak` is simply
/// overwritten the next time that key is looked up.
use super::inode::Inode;
use crate::lib::error::Result;
use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use spin::{Mutex, RwLock};

/// Uniquely identifies a dentry: the owning block device and the
/// filesystem's own inode number within it.
pub type DentryKey = (u64, u64);

const SHARD_COUNT: usize = 16;

struct DentryCache {
    shards: Vec<Mutex<BTreeMap<DentryKey, Weak<Inode>>>>,
}

impl DentryCache {
    fn new(shard_count: usize) -> Self {
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(Mutex::new(BTreeMap::new()));
        }
        Self { shards }
    }

    fn shard(&self, key: DentryKey) -> &Mutex<BTreeMap<DentryKey, Weak<Inode>>> {
        let mut h = key.0 ^ key.1.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        h ^= h >> 33;
        &self.shards[(h as usize) % self.shards.len()]
    }

    fn get(&self, key: DentryKey) -> Option<Arc<Inode>> {
        self.shard(key).lock().get(&key).and_then(Weak::upgrade)
    }

    /// Look up `key`; if absent (or its last strong reference was already
    /// dropped), build it with `ctor` under the shard lock so two
    /// concurrent lookups of the same key can't race to insert two
    /// different `Inode`s for it.
    fn get_or_insert_with<F>(&self, key: DentryKey, ctor: F) -> Result<Arc<Inode>>
    where
        F: FnOnce() -> Result<Arc<Inode>>,
    {
        let shard = self.shard(key);
        let mut guard = shard.lock();
        if let Some(inode) = guard.get(&key).and_then(Weak::upgrade) {
            return Ok(inode);
        }
        let inode = ctor()?;
        guard.insert(key, Arc::downgrade(&inode));
        Ok(inode)
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

static CACHE: RwLock<Option<DentryCache>> = RwLock::new(None);

/// Initialize the dentry cache. Called once from `init_vfs`.
pub fn init() {
    *CACHE.write() = Some(DentryCache::new(SHARD_COUNT));
}

/// Fetch the live cached inode for `key`, if any.
pub fn get(key: DentryKey) -> Option<Arc<Inode>> {
    CACHE.read().as_ref().and_then(|c| c.get(key))
}

/// Fetch or build-and-cache the inode for `key`.
pub fn get_or_insert_with<F>(key: DentryKey, ctor: F) -> Result<Arc<Inode>>
where
    F: FnOnce() -> Result<Arc<Inode>>,
{
    let guard = CACHE.read();
    let cache = guard.as_ref().expect("dentry cache used before init()");
    cache.get_or_insert_with(key, ctor)
}

/// Number of live entries across all shards (diagnostics / tests).
pub fn entry_count() -> usize {
    CACHE.read().as_ref().map(|c| c.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::inode::{InodeOps, InodeType};
    use crate::lib::error::Errno;
    use alloc::vec::Vec as AVec;

    struct NullOps;
    impl InodeOps for NullOps {
        fn lookup(&self, _name: &str) -> Result<Arc<Inode>> { Err(Errno::ENOENT) }
        fn create(&self, _name: &str, _mode: u32) -> Result<Arc<Inode>> { Err(Errno::EROFS) }
        fn read(&self, _offset: u64, _buf: &mut [u8]) -> Result<usize> { Ok(0) }
        fn write(&self, _offset: u64, _buf: &[u8]) -> Result<usize> { Err(Errno::EROFS) }
        fn readdir(&self) -> Result<AVec<super::super::inode::DirEntry>> { Ok(AVec::new()) }
        fn getattr(&self) -> Result<crate::vfs::InodeMeta> {
            Ok(crate::vfs::InodeMeta::with_ino(42, InodeType::Regular, 0o644))
        }
    }

    #[test]
    fn reclaims_when_last_arc_drops() {
        init();
        let key = (1u64, 42u64);
        let built = get_or_insert_with(key, || {
            Ok(Arc::new(Inode::new_with_ino(42, InodeType::Regular, 0o644, Arc::new(NullOps))))
        }).unwrap();
        assert!(get(key).is_some());
        drop(built);
        assert!(get(key).is_none());
    }

    #[test]
    fn same_key_returns_same_inode() {
        init();
        let key = (2u64, 7u64);
        let a = get_or_insert_with(key, || {
            Ok(Arc::new(Inode::new_with_ino(7, InodeType::Regular, 0o644, Arc::new(NullOps))))
        }).unwrap();
        let b = get_or_insert_with(key, || {
            Ok(Arc::new(Inode::new_with_ino(7, InodeType::Regular, 0o644, Arc::new(NullOps))))
        }).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
