/// Block buffer cache
///
/// Caches filesystem-block-sized reads from a `BlockDevice`, one entry per
/// (device, block number) pair. Unlike a raw sector cache, a `BufferHead`
/// holds exactly one filesystem block's worth of bytes regardless of how
/// many disk sectors that spans, so callers above this layer (ext2's inode
/// and indirect-block code) never have to reason about sector granularity
/// themselves. Mirrors the role Linux's `buffer_head` plays over its block
/// devices.
use super::BlockDevice;
use crate::lib::error::Result;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::{Mutex, MutexGuard};

/// One cached filesystem block.
pub struct BufferHead {
    device: Arc<BlockDevice>,
    block: u64,
    block_size: u32,
    data: Mutex<Vec<u8>>,
    dirty: AtomicBool,
}

impl BufferHead {
    /// Borrow the buffer's bytes. Mutating through this guard requires a
    /// follow-up call to `mark_dirty` before `put_buffer`, or the change
    /// is never written back to the device.
    pub fn data(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock()
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn flush(&self) -> Result<()> {
        if self.dirty.swap(false, Ordering::SeqCst) {
            let sectors_per_block = core::cmp::max(1, self.block_size as usize / self.device.sector_size);
            let sector = self.block * sectors_per_block as u64;
            self.device.write_sectors(sector, &self.data.lock())?;
        }
        Ok(())
    }
}

type CacheKey = (u32, u32, u64); // (device major, device minor, block number)

static BUFFER_CACHE: Mutex<BTreeMap<CacheKey, Arc<BufferHead>>> = Mutex::new(BTreeMap::new());

/// Fetch the buffer for `block` (an fs-block index, not a sector index),
/// reading it from `device` on first access. Subsequent calls for the same
/// (device, block) return the same cached `Arc`, so writes made by one
/// caller and not yet flushed are visible to the next.
pub fn get_buffer(device: Arc<BlockDevice>, block: u64, block_size: u32) -> Result<Arc<BufferHead>> {
    let key = (device.major, device.minor, block);

    if let Some(bh) = BUFFER_CACHE.lock().get(&key) {
        return Ok(bh.clone());
    }

    let sectors_per_block = core::cmp::max(1, block_size as usize / device.sector_size);
    let mut data = vec![0u8; sectors_per_block * device.sector_size];
    device.read_sectors(block * sectors_per_block as u64, &mut data)?;

    let bh = Arc::new(BufferHead {
        device,
        block,
        block_size,
        data: Mutex::new(data),
        dirty: AtomicBool::new(false),
    });

    let mut cache = BUFFER_CACHE.lock();
    let bh = cache.entry(key).or_insert(bh).clone();
    Ok(bh)
}

/// Release a buffer reference, flushing it to the device first if dirty.
/// The cache keeps its own `Arc` regardless, so the buffer stays warm for
/// the next lookup.
pub fn put_buffer(buf: Arc<BufferHead>) {
    if let Err(e) = buf.flush() {
        crate::error!("buffer cache: write-back failed for block {}: {:?}", buf.block, e);
    }
}

/// Drop every cached buffer for `device` without flushing. Used on
/// unmount, after an explicit `save_state`-style flush has already run.
pub fn drop_device_buffers(device: &BlockDevice) {
    BUFFER_CACHE.lock().retain(|(maj, min, _), _| *maj != device.major || *min != device.minor);
}
