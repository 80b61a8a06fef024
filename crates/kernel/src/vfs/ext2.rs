/// ext2 Filesystem Driver
///
/// Implements the Second Extended Filesystem (ext2) with support for:
/// - Superblock and block group descriptors
/// - Inode operations (read/write)
/// - Directory operations (lookup, readdir, create, unlink, rmdir)
/// - Direct, indirect, double-indirect and triple-indirect block addressing
/// - Block and inode allocation via the block group bitmaps

use crate::lib::error::{Result, Errno};
use crate::block::{BlockDevice, get_buffer, put_buffer};
use crate::vfs::{Inode, InodeOps, InodeType, DirEntry};
use alloc::sync::Arc;
use alloc::vec::Vec;
use alloc::vec;
use alloc::string::String;
use spin::Mutex;
use core::mem::size_of;

/// ext2 magic number
const EXT2_SUPER_MAGIC: u16 = 0xEF53;

/// Block size constants
const EXT2_MIN_BLOCK_SIZE: u32 = 1024;
const EXT2_MAX_BLOCK_SIZE: u32 = 4096;

/// Inode constants
const EXT2_GOOD_OLD_INODE_SIZE: u16 = 128;
const EXT2_DIRECT_BLOCKS: usize = 12;
const EXT2_IND_BLOCK: usize = 12;
const EXT2_DIND_BLOCK: usize = 13;
const EXT2_TIND_BLOCK: usize = 14;
const EXT2_N_BLOCKS: usize = 15;

/// File type constants (for directory entries)
const EXT2_FT_REG_FILE: u8 = 1;
const EXT2_FT_DIR: u8 = 2;
const EXT2_FT_CHRDEV: u8 = 3;
const EXT2_FT_BLKDEV: u8 = 4;
const EXT2_FT_SYMLINK: u8 = 7;

/// Root inode number
const EXT2_ROOT_INO: u32 = 2;

fn now_secs() -> u32 {
    (crate::time::get_time_since_boot_us() / 1_000_000) as u32
}

/// Superblock structure (located at byte offset 1024)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Ext2Superblock {
    s_inodes_count: u32,
    s_blocks_count: u32,
    s_r_blocks_count: u32,
    s_free_blocks_count: u32,
    s_free_inodes_count: u32,
    s_first_data_block: u32,
    s_log_block_size: u32,
    s_log_frag_size: u32,
    s_blocks_per_group: u32,
    s_frags_per_group: u32,
    s_inodes_per_group: u32,
    s_mtime: u32,
    s_wtime: u32,
    s_mnt_count: u16,
    s_max_mnt_count: u16,
    s_magic: u16,
    s_state: u16,
    s_errors: u16,
    s_minor_rev_level: u16,
    s_lastcheck: u32,
    s_checkinterval: u32,
    s_creator_os: u32,
    s_rev_level: u32,
    s_def_resuid: u16,
    s_def_resgid: u16,
    // Extended fields (rev_level >= 1, unused here since we require rev_level 0)
    s_first_ino: u32,
    s_inode_size: u16,
    s_block_group_nr: u16,
    s_feature_compat: u32,
    s_feature_incompat: u32,
    s_feature_ro_compat: u32,
    s_uuid: [u8; 16],
    s_volume_name: [u8; 16],
    s_last_mounted: [u8; 64],
    s_algo_bitmap: u32,
    s_prealloc_blocks: u8,
    s_prealloc_dir_blocks: u8,
    s_padding1: u16,
    s_journal_uuid: [u8; 16],
    s_journal_inum: u32,
    s_journal_dev: u32,
    s_last_orphan: u32,
}

/// Block group descriptor
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Ext2GroupDesc {
    bg_block_bitmap: u32,
    bg_inode_bitmap: u32,
    bg_inode_table: u32,
    bg_free_blocks_count: u16,
    bg_free_inodes_count: u16,
    bg_used_dirs_count: u16,
    bg_pad: u16,
    bg_reserved: [u32; 3],
}

/// Inode structure
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Ext2Inode {
    i_mode: u16,
    i_uid: u16,
    i_size: u32,
    i_atime: u32,
    i_ctime: u32,
    i_mtime: u32,
    i_dtime: u32,
    i_gid: u16,
    i_links_count: u16,
    i_blocks: u32,
    i_flags: u32,
    i_osd1: u32,
    i_block: [u32; EXT2_N_BLOCKS],
    i_generation: u32,
    i_file_acl: u32,
    i_dir_acl: u32,
    i_faddr: u32,
    i_osd2: [u8; 12],
}

/// Directory entry on disk
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
struct Ext2DirEntry {
    inode: u32,
    rec_len: u16,
    name_len: u8,
    file_type: u8,
    // name follows (variable length)
}

/// Counters and tables that change as the filesystem is written to,
/// kept behind one lock per `Ext2FileSystem::mutable` (the "fslock" that
/// guards the superblock and bitmaps).
struct FsMutable {
    free_blocks_count: u32,
    free_inodes_count: u32,
    block_groups: Vec<Ext2GroupDesc>,
}

/// ext2 filesystem instance
pub struct Ext2FileSystem {
    device: Arc<BlockDevice>,
    superblock_first_data_block: u32,
    block_size: u32,
    inodes_per_group: u32,
    blocks_per_group: u32,
    inodes_count: u32,
    blocks_count: u32,
    inode_size: u16,
    bgd_block: u32,
    mutable: Mutex<FsMutable>,
}

impl Ext2FileSystem {
    /// Mount an ext2 filesystem from a block device
    pub fn mount(device: Arc<BlockDevice>) -> Result<Arc<Self>> {
        let sb_block_size = 1024u32;
        let sb_block_num = 1024 / sb_block_size as u64;
        let sb_buf = get_buffer(device.clone(), sb_block_num, sb_block_size)?;

        let superblock = {
            let data = sb_buf.data();
            let sb_offset = (1024 % sb_block_size) as usize;
            unsafe {
                core::ptr::read_unaligned(data.as_ptr().add(sb_offset) as *const Ext2Superblock)
            }
        };
        put_buffer(sb_buf);

        if superblock.s_magic != EXT2_SUPER_MAGIC {
            crate::warn!("ext2: invalid magic number 0x{:04x}", superblock.s_magic);
            return Err(Errno::EINVAL);
        }

        if superblock.s_rev_level != 0 {
            crate::warn!("ext2: unsupported revision level {}", superblock.s_rev_level);
            return Err(Errno::EINVAL);
        }

        let block_size = EXT2_MIN_BLOCK_SIZE << superblock.s_log_block_size;
        if block_size < EXT2_MIN_BLOCK_SIZE || block_size > EXT2_MAX_BLOCK_SIZE {
            crate::warn!("ext2: invalid block size {}", block_size);
            return Err(Errno::EINVAL);
        }

        let inode_size = EXT2_GOOD_OLD_INODE_SIZE;
        let bg_count = ((superblock.s_blocks_count + superblock.s_blocks_per_group - 1)
            / superblock.s_blocks_per_group) as usize;

        crate::info!(
            "ext2: block_size={} inode_size={} groups={}",
            block_size, inode_size, bg_count
        );

        let bgd_block = if block_size == 1024 { 2 } else { 1 };
        let gd_size = size_of::<Ext2GroupDesc>();
        let gds_per_block = block_size as usize / gd_size;
        let mut block_groups = Vec::with_capacity(bg_count);

        for i in 0..bg_count {
            let block_num = bgd_block as u64 + (i / gds_per_block) as u64;
            let offset = (i % gds_per_block) * gd_size;
            let bgd_buf = get_buffer(device.clone(), block_num, block_size)?;

            let bgd = {
                let data = bgd_buf.data();
                unsafe {
                    core::ptr::read_unaligned(data.as_ptr().add(offset) as *const Ext2GroupDesc)
                }
            };
            put_buffer(bgd_buf);

            block_groups.push(bgd);
        }

        Ok(Arc::new(Self {
            device,
            superblock_first_data_block: superblock.s_first_data_block,
            block_size,
            inodes_per_group: superblock.s_inodes_per_group,
            blocks_per_group: superblock.s_blocks_per_group,
            inodes_count: superblock.s_inodes_count,
            blocks_count: superblock.s_blocks_count,
            inode_size,
            bgd_block,
            mutable: Mutex::new(FsMutable {
                free_blocks_count: superblock.s_free_blocks_count,
                free_inodes_count: superblock.s_free_inodes_count,
                block_groups,
            }),
        }))
    }

    fn group_count(&self) -> usize {
        ((self.blocks_count + self.blocks_per_group - 1) / self.blocks_per_group) as usize
    }

    /// Number of blocks actually belonging to a group (the last group may
    /// be short, so its bitmap scan has to be clamped to its real size
    /// instead of assuming every group is full-sized).
    fn blocks_in_group(&self, group: u32) -> u32 {
        if group as usize == self.group_count() - 1 {
            self.blocks_count - self.superblock_first_data_block - group * self.blocks_per_group
        } else {
            self.blocks_per_group
        }
    }

    fn inodes_in_group(&self, group: u32) -> u32 {
        if group as usize == self.group_count() - 1 {
            self.inodes_count - group * self.inodes_per_group
        } else {
            self.inodes_per_group
        }
    }

    // ---- raw bitmap helpers ----

    fn read_bit(&self, bitmap_block: u32, bit: u32) -> Result<bool> {
        let byte_off = (bit / 8) as u64;
        let block_num = bitmap_block as u64 + byte_off / self.block_size as u64;
        let in_block_off = (byte_off % self.block_size as u64) as usize;
        let buf = get_buffer(self.device.clone(), block_num, self.block_size)?;
        let byte = buf.data()[in_block_off];
        put_buffer(buf);
        Ok((byte & (1 << (bit % 8))) != 0)
    }

    fn set_bit(&self, bitmap_block: u32, bit: u32, value: bool) -> Result<()> {
        let byte_off = (bit / 8) as u64;
        let block_num = bitmap_block as u64 + byte_off / self.block_size as u64;
        let in_block_off = (byte_off % self.block_size as u64) as usize;
        let buf = get_buffer(self.device.clone(), block_num, self.block_size)?;
        {
            let mut data = buf.data();
            if value {
                data[in_block_off] |= 1 << (bit % 8);
            } else {
                data[in_block_off] &= !(1 << (bit % 8));
            }
        }
        buf.mark_dirty();
        put_buffer(buf);
        Ok(())
    }

    /// Scan `bitmap_block` for the first clear bit among `limit` bits,
    /// clamped to the group's real size rather than the nominal
    /// blocks/inodes-per-group so a short last group never reports a free
    /// slot past its own end.
    fn find_free_bit(&self, bitmap_block: u32, limit: u32) -> Result<Option<u32>> {
        for bit in 0..limit {
            if !self.read_bit(bitmap_block, bit)? {
                return Ok(Some(bit));
            }
        }
        Ok(None)
    }

    fn persist_group_desc(&self, group: u32, desc: &Ext2GroupDesc) -> Result<()> {
        let gd_size = size_of::<Ext2GroupDesc>();
        let gds_per_block = self.block_size as usize / gd_size;
        let block_num = self.bgd_block as u64 + (group as usize / gds_per_block) as u64;
        let offset = (group as usize % gds_per_block) * gd_size;

        let buf = get_buffer(self.device.clone(), block_num, self.block_size)?;
        {
            let mut data = buf.data();
            let bytes = unsafe {
                core::slice::from_raw_parts(desc as *const Ext2GroupDesc as *const u8, gd_size)
            };
            data[offset..offset + gd_size].copy_from_slice(bytes);
        }
        buf.mark_dirty();
        put_buffer(buf);
        Ok(())
    }

    /// Allocate a free data block, preferring `pref_group`. Returns the
    /// absolute block number. The fslock (`mutable`) is held for the whole
    /// search-and-mark so two concurrent allocations can't pick the same
    /// bit.
    fn allocate_block(&self, pref_group: u32) -> Result<u32> {
        let groups = self.group_count() as u32;
        let mut mutable = self.mutable.lock();

        for offset in 0..groups {
            let group = (pref_group + offset) % groups;
            let limit = core::cmp::min(8 * self.block_size, self.blocks_in_group(group));
            let bitmap_block = mutable.block_groups[group as usize].bg_block_bitmap;

            if let Some(bit) = self.find_free_bit(bitmap_block, limit)? {
                self.set_bit(bitmap_block, bit, true)?;

                let block_num = self.superblock_first_data_block + group * self.blocks_per_group + bit;

                mutable.block_groups[group as usize].bg_free_blocks_count -= 1;
                mutable.free_blocks_count -= 1;
                let desc = mutable.block_groups[group as usize];
                self.persist_group_desc(group, &desc)?;

                return Ok(block_num);
            }
        }

        Err(Errno::ENOSPC)
    }

    fn free_block(&self, block_num: u32) -> Result<()> {
        let group = (block_num - self.superblock_first_data_block) / self.blocks_per_group;
        let bit = (block_num - self.superblock_first_data_block) % self.blocks_per_group;

        let mut mutable = self.mutable.lock();
        let bitmap_block = mutable.block_groups[group as usize].bg_block_bitmap;
        self.set_bit(bitmap_block, bit, false)?;

        mutable.block_groups[group as usize].bg_free_blocks_count += 1;
        mutable.free_blocks_count += 1;
        let desc = mutable.block_groups[group as usize];
        self.persist_group_desc(group, &desc)?;

        Ok(())
    }

    fn allocate_inode(&self, pref_group: u32) -> Result<u32> {
        let groups = self.group_count() as u32;
        let mut mutable = self.mutable.lock();

        for offset in 0..groups {
            let group = (pref_group + offset) % groups;
            let limit = core::cmp::min(8 * self.block_size, self.inodes_in_group(group));
            let bitmap_block = mutable.block_groups[group as usize].bg_inode_bitmap;

            if let Some(bit) = self.find_free_bit(bitmap_block, limit)? {
                self.set_bit(bitmap_block, bit, true)?;

                let inode_num = group * self.inodes_per_group + bit + 1;

                mutable.block_groups[group as usize].bg_free_inodes_count -= 1;
                mutable.free_inodes_count -= 1;
                let desc = mutable.block_groups[group as usize];
                self.persist_group_desc(group, &desc)?;

                return Ok(inode_num);
            }
        }

        Err(Errno::ENOSPC)
    }

    fn free_inode(&self, inode_num: u32) -> Result<()> {
        let group = (inode_num - 1) / self.inodes_per_group;
        let bit = (inode_num - 1) % self.inodes_per_group;

        let mut mutable = self.mutable.lock();
        let bitmap_block = mutable.block_groups[group as usize].bg_inode_bitmap;
        self.set_bit(bitmap_block, bit, false)?;

        mutable.block_groups[group as usize].bg_free_inodes_count += 1;
        mutable.free_inodes_count += 1;
        let desc = mutable.block_groups[group as usize];
        self.persist_group_desc(group, &desc)?;

        Ok(())
    }

    fn zero_block(&self, block_num: u32) -> Result<()> {
        let buf = get_buffer(self.device.clone(), block_num as u64, self.block_size)?;
        buf.data().fill(0);
        buf.mark_dirty();
        put_buffer(buf);
        Ok(())
    }

    fn group_of_inode(&self, inode_num: u32) -> u32 {
        (inode_num - 1) / self.inodes_per_group
    }

    /// Read an inode from disk
    fn read_inode(&self, inode_num: u32) -> Result<Ext2Inode> {
        if inode_num == 0 || inode_num > self.inodes_count {
            return Err(Errno::EINVAL);
        }

        let group = self.group_of_inode(inode_num);
        let index = (inode_num - 1) % self.inodes_per_group;

        let inode_table_block = {
            let mutable = self.mutable.lock();
            if group as usize >= mutable.block_groups.len() {
                return Err(Errno::EINVAL);
            }
            mutable.block_groups[group as usize].bg_inode_table
        };

        let inode_offset = index * self.inode_size as u32;
        let block_num = inode_table_block as u64 + (inode_offset / self.block_size) as u64;
        let block_offset = (inode_offset % self.block_size) as usize;

        let buf = get_buffer(self.device.clone(), block_num, self.block_size)?;
        let inode = {
            let data = buf.data();
            unsafe {
                core::ptr::read_unaligned(data.as_ptr().add(block_offset) as *const Ext2Inode)
            }
        };
        put_buffer(buf);

        Ok(inode)
    }

    /// Write an inode back to disk
    fn write_inode(&self, inode_num: u32, inode: &Ext2Inode) -> Result<()> {
        let group = self.group_of_inode(inode_num);
        let index = (inode_num - 1) % self.inodes_per_group;

        let inode_table_block = {
            let mutable = self.mutable.lock();
            mutable.block_groups[group as usize].bg_inode_table
        };

        let inode_offset = index * self.inode_size as u32;
        let block_num = inode_table_block as u64 + (inode_offset / self.block_size) as u64;
        let block_offset = (inode_offset % self.block_size) as usize;

        let buf = get_buffer(self.device.clone(), block_num, self.block_size)?;
        {
            let mut data = buf.data();
            let bytes = unsafe {
                core::slice::from_raw_parts(inode as *const Ext2Inode as *const u8, size_of::<Ext2Inode>())
            };
            data[block_offset..block_offset + bytes.len()].copy_from_slice(bytes);
        }
        buf.mark_dirty();
        put_buffer(buf);

        Ok(())
    }

    /// Read data from an inode
    fn read_inode_data(&self, inode: &Ext2Inode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let file_size = inode.i_size as u64;
        if offset >= file_size {
            return Ok(0);
        }

        let read_size = core::cmp::min(buf.len(), (file_size - offset) as usize);
        let mut bytes_read = 0usize;

        while bytes_read < read_size {
            let block_idx = ((offset + bytes_read as u64) / self.block_size as u64) as u32;
            let block_offset = ((offset + bytes_read as u64) % self.block_size as u64) as usize;
            let copy_size = core::cmp::min(read_size - bytes_read, self.block_size as usize - block_offset);

            let phys_block = self.get_block_num(inode, block_idx)?;

            if phys_block == 0 {
                buf[bytes_read..bytes_read + copy_size].fill(0);
            } else {
                let block_buf = get_buffer(self.device.clone(), phys_block as u64, self.block_size)?;
                {
                    let data = block_buf.data();
                    buf[bytes_read..bytes_read + copy_size]
                        .copy_from_slice(&data[block_offset..block_offset + copy_size]);
                }
                put_buffer(block_buf);
            }

            bytes_read += copy_size;
        }

        Ok(bytes_read)
    }

    /// Write data into an inode, allocating blocks as needed and growing
    /// `inode.i_size`/`i_blocks` and stamping `i_mtime` to match.
    fn write_inode_data(
        &self,
        inode_num: u32,
        inode: &mut Ext2Inode,
        offset: u64,
        buf: &[u8],
    ) -> Result<usize> {
        // 12 direct + L single + L^2 double + L^3 triple blocks, where
        // L = block_size / 4.
        let addrs_per_block = (self.block_size / 4) as u64;
        let max_blocks = EXT2_DIRECT_BLOCKS as u64
            + addrs_per_block
            + addrs_per_block * addrs_per_block
            + addrs_per_block * addrs_per_block * addrs_per_block;
        let end_block = (offset + buf.len() as u64 + self.block_size as u64 - 1) / self.block_size as u64;
        if end_block > max_blocks {
            return Err(Errno::EFBIG);
        }

        let mut bytes_written = 0usize;
        let group = self.group_of_inode(inode_num);

        while bytes_written < buf.len() {
            let block_idx = ((offset + bytes_written as u64) / self.block_size as u64) as u32;
            let block_offset = ((offset + bytes_written as u64) % self.block_size as u64) as usize;
            let copy_size = core::cmp::min(buf.len() - bytes_written, self.block_size as usize - block_offset);

            let phys_block = self.get_or_allocate_block(inode, block_idx, group)?;

            let block_buf = get_buffer(self.device.clone(), phys_block as u64, self.block_size)?;
            {
                let mut data = block_buf.data();
                data[block_offset..block_offset + copy_size]
                    .copy_from_slice(&buf[bytes_written..bytes_written + copy_size]);
            }
            block_buf.mark_dirty();
            put_buffer(block_buf);

            bytes_written += copy_size;
        }

        let new_size = offset + bytes_written as u64;
        if new_size > inode.i_size as u64 {
            inode.i_size = new_size as u32;
        }
        inode.i_mtime = now_secs();
        self.write_inode(inode_num, inode)?;

        Ok(bytes_written)
    }

    /// Truncate an inode's data to `new_size`, freeing every block from
    /// `ceil(new_size / block_size)` upward.
    fn truncate_inode_data(&self, inode_num: u32, inode: &mut Ext2Inode, new_size: u64) -> Result<()> {
        let old_blocks = ((inode.i_size as u64 + self.block_size as u64 - 1) / self.block_size as u64) as u32;
        let keep_blocks = ((new_size + self.block_size as u64 - 1) / self.block_size as u64) as u32;
        let sectors_per_block = (self.block_size / 512) as u32;

        for idx in keep_blocks..old_blocks {
            let phys = self.get_block_num(inode, idx)?;
            if phys != 0 {
                self.free_block(phys)?;
                self.clear_block_pointer(inode, idx)?;
                inode.i_blocks = inode.i_blocks.saturating_sub(sectors_per_block);
            }
        }

        inode.i_size = new_size as u32;
        inode.i_mtime = now_secs();
        self.write_inode(inode_num, inode)?;

        Ok(())
    }

    /// Get physical block number for a logical block in an inode. Any
    /// indirection level that reads as 0 means the block is a hole.
    fn get_block_num(&self, inode: &Ext2Inode, block_idx: u32) -> Result<u32> {
        let addrs_per_block = (self.block_size / 4) as u32;

        if block_idx < EXT2_DIRECT_BLOCKS as u32 {
            return Ok(inode.i_block[block_idx as usize]);
        }

        let mut idx = block_idx - EXT2_DIRECT_BLOCKS as u32;
        if idx < addrs_per_block {
            let ind_block = inode.i_block[EXT2_IND_BLOCK];
            if ind_block == 0 {
                return Ok(0);
            }
            return self.read_indirect_block(ind_block, idx);
        }

        idx -= addrs_per_block;
        if idx < addrs_per_block * addrs_per_block {
            let dind_block = inode.i_block[EXT2_DIND_BLOCK];
            if dind_block == 0 {
                return Ok(0);
            }
            let ind_idx = idx / addrs_per_block;
            let blk_idx = idx % addrs_per_block;

            let ind_block = self.read_indirect_block(dind_block, ind_idx)?;
            if ind_block == 0 {
                return Ok(0);
            }
            return self.read_indirect_block(ind_block, blk_idx);
        }

        idx -= addrs_per_block * addrs_per_block;
        let tind_block = inode.i_block[EXT2_TIND_BLOCK];
        if tind_block == 0 {
            return Ok(0);
        }
        let dind_idx = idx / (addrs_per_block * addrs_per_block);
        let rem = idx % (addrs_per_block * addrs_per_block);
        let ind_idx = rem / addrs_per_block;
        let blk_idx = rem % addrs_per_block;

        let dind_block = self.read_indirect_block(tind_block, dind_idx)?;
        if dind_block == 0 {
            return Ok(0);
        }
        let ind_block = self.read_indirect_block(dind_block, ind_idx)?;
        if ind_block == 0 {
            return Ok(0);
        }
        self.read_indirect_block(ind_block, blk_idx)
    }

    /// Resolve the physical block backing logical block `block_idx`,
    /// allocating it (and any intermediate indirect blocks) if it's
    /// currently a hole.
    fn get_or_allocate_block(&self, inode: &mut Ext2Inode, block_idx: u32, pref_group: u32) -> Result<u32> {
        let addrs_per_block = (self.block_size / 4) as u32;

        if block_idx < EXT2_DIRECT_BLOCKS as u32 {
            if inode.i_block[block_idx as usize] == 0 {
                let block = self.allocate_block(pref_group)?;
                inode.i_block[block_idx as usize] = block;
                inode.i_blocks += self.block_size / 512;
            }
            return Ok(inode.i_block[block_idx as usize]);
        }

        let mut idx = block_idx - EXT2_DIRECT_BLOCKS as u32;
        if idx < addrs_per_block {
            if inode.i_block[EXT2_IND_BLOCK] == 0 {
                let block = self.allocate_block(pref_group)?;
                self.zero_block(block)?;
                inode.i_block[EXT2_IND_BLOCK] = block;
                inode.i_blocks += self.block_size / 512;
            }
            return self.allocate_in_indirect_block(inode.i_block[EXT2_IND_BLOCK], idx, pref_group);
        }

        idx -= addrs_per_block;
        if idx < addrs_per_block * addrs_per_block {
            if inode.i_block[EXT2_DIND_BLOCK] == 0 {
                let block = self.allocate_block(pref_group)?;
                self.zero_block(block)?;
                inode.i_block[EXT2_DIND_BLOCK] = block;
                inode.i_blocks += self.block_size / 512;
            }
            let dind_block = inode.i_block[EXT2_DIND_BLOCK];
            let ind_idx = idx / addrs_per_block;
            let blk_idx = idx % addrs_per_block;

            let mut ind_block = self.read_indirect_block(dind_block, ind_idx)?;
            if ind_block == 0 {
                ind_block = self.allocate_block(pref_group)?;
                self.zero_block(ind_block)?;
                self.write_indirect_entry(dind_block, ind_idx, ind_block)?;
                inode.i_blocks += self.block_size / 512;
            }
            return self.allocate_in_indirect_block(ind_block, blk_idx, pref_group);
        }

        idx -= addrs_per_block * addrs_per_block;
        if inode.i_block[EXT2_TIND_BLOCK] == 0 {
            let block = self.allocate_block(pref_group)?;
            self.zero_block(block)?;
            inode.i_block[EXT2_TIND_BLOCK] = block;
            inode.i_blocks += self.block_size / 512;
        }
        let tind_block = inode.i_block[EXT2_TIND_BLOCK];
        let dind_idx = idx / (addrs_per_block * addrs_per_block);
        let rem = idx % (addrs_per_block * addrs_per_block);
        let ind_idx = rem / addrs_per_block;
        let blk_idx = rem % addrs_per_block;

        let mut dind_block = self.read_indirect_block(tind_block, dind_idx)?;
        if dind_block == 0 {
            dind_block = self.allocate_block(pref_group)?;
            self.zero_block(dind_block)?;
            self.write_indirect_entry(tind_block, dind_idx, dind_block)?;
            inode.i_blocks += self.block_size / 512;
        }

        let mut ind_block = self.read_indirect_block(dind_block, ind_idx)?;
        if ind_block == 0 {
            ind_block = self.allocate_block(pref_group)?;
            self.zero_block(ind_block)?;
            self.write_indirect_entry(dind_block, ind_idx, ind_block)?;
            inode.i_blocks += self.block_size / 512;
        }
        self.allocate_in_indirect_block(ind_block, blk_idx, pref_group)
    }

    /// Read or allocate the data block at `index` within indirect block
    /// `ind_block`, returning its physical block number.
    fn allocate_in_indirect_block(&self, ind_block: u32, index: u32, pref_group: u32) -> Result<u32> {
        let existing = self.read_indirect_block(ind_block, index)?;
        if existing != 0 {
            return Ok(existing);
        }
        let block = self.allocate_block(pref_group)?;
        self.write_indirect_entry(ind_block, index, block)?;
        Ok(block)
    }

    /// Clear whatever pointer (direct slot or indirect-block entry) backs
    /// logical block `block_idx`, so a future write doesn't reuse a block
    /// number that's just been freed.
    fn clear_block_pointer(&self, inode: &mut Ext2Inode, block_idx: u32) -> Result<()> {
        let addrs_per_block = (self.block_size / 4) as u32;

        if block_idx < EXT2_DIRECT_BLOCKS as u32 {
            inode.i_block[block_idx as usize] = 0;
            return Ok(());
        }

        let mut idx = block_idx - EXT2_DIRECT_BLOCKS as u32;
        if idx < addrs_per_block {
            let ind = inode.i_block[EXT2_IND_BLOCK];
            if ind != 0 {
                self.write_indirect_entry(ind, idx, 0)?;
            }
            return Ok(());
        }

        idx -= addrs_per_block;
        if idx < addrs_per_block * addrs_per_block {
            let dind = inode.i_block[EXT2_DIND_BLOCK];
            if dind == 0 {
                return Ok(());
            }
            let ind_idx = idx / addrs_per_block;
            let blk_idx = idx % addrs_per_block;
            let ind = self.read_indirect_block(dind, ind_idx)?;
            if ind != 0 {
                self.write_indirect_entry(ind, blk_idx, 0)?;
            }
            return Ok(());
        }

        idx -= addrs_per_block * addrs_per_block;
        let tind = inode.i_block[EXT2_TIND_BLOCK];
        if tind == 0 {
            return Ok(());
        }
        let dind_idx = idx / (addrs_per_block * addrs_per_block);
        let rem = idx % (addrs_per_block * addrs_per_block);
        let ind_idx = rem / addrs_per_block;
        let blk_idx = rem % addrs_per_block;

        let dind = self.read_indirect_block(tind, dind_idx)?;
        if dind == 0 {
            return Ok(());
        }
        let ind = self.read_indirect_block(dind, ind_idx)?;
        if ind != 0 {
            self.write_indirect_entry(ind, blk_idx, 0)?;
        }
        Ok(())
    }

    /// Read a block number from an indirect block
    fn read_indirect_block(&self, block_num: u32, index: u32) -> Result<u32> {
        let buf = get_buffer(self.device.clone(), block_num as u64, self.block_size)?;
        let result = {
            let data = buf.data();
            let offset = (index * 4) as usize;
            u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
        };
        put_buffer(buf);
        Ok(result)
    }

    /// Write a block number into an indirect block
    fn write_indirect_entry(&self, block_num: u32, index: u32, value: u32) -> Result<()> {
        let buf = get_buffer(self.device.clone(), block_num as u64, self.block_size)?;
        {
            let mut data = buf.data();
            let offset = (index * 4) as usize;
            data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
        buf.mark_dirty();
        put_buffer(buf);
        Ok(())
    }

    /// Look up a directory entry by name
    fn lookup_dir(&self, dir_inode: &Ext2Inode, name: &str) -> Result<u32> {
        let dir_size = dir_inode.i_size as usize;
        let mut buf = vec![0u8; dir_size];
        self.read_inode_data(dir_inode, 0, &mut buf)?;

        let mut offset = 0;
        while offset + 8 <= dir_size {
            let entry = unsafe {
                core::ptr::read_unaligned(buf.as_ptr().add(offset) as *const Ext2DirEntry)
            };

            if entry.rec_len == 0 {
                break;
            }

            if entry.inode != 0 && entry.name_len > 0 {
                let entry_name = core::str::from_utf8(
                    &buf[offset + 8..offset + 8 + entry.name_len as usize],
                ).unwrap_or("");

                if entry_name == name {
                    return Ok(entry.inode);
                }
            }

            offset += entry.rec_len as usize;
        }

        Err(Errno::ENOENT)
    }

    /// Read directory entries
    fn readdir(&self, dir_inode: &Ext2Inode) -> Result<Vec<DirEntry>> {
        let dir_size = dir_inode.i_size as usize;
        let mut buf = vec![0u8; dir_size];
        self.read_inode_data(dir_inode, 0, &mut buf)?;

        let mut entries = Vec::new();
        let mut offset = 0;

        while offset + 8 <= dir_size {
            let entry = unsafe {
                core::ptr::read_unaligned(buf.as_ptr().add(offset) as *const Ext2DirEntry)
            };

            if entry.rec_len == 0 {
                break;
            }

            if entry.inode != 0 && entry.name_len > 0 {
                let name_bytes = &buf[offset + 8..offset + 8 + entry.name_len as usize];
                let name = String::from_utf8_lossy(name_bytes).into_owned();

                let itype = match entry.file_type {
                    EXT2_FT_DIR => InodeType::Directory,
                    EXT2_FT_REG_FILE => InodeType::Regular,
                    EXT2_FT_CHRDEV => InodeType::CharDevice,
                    EXT2_FT_BLKDEV => InodeType::BlockDevice,
                    EXT2_FT_SYMLINK => InodeType::Symlink,
                    _ => InodeType::Regular,
                };

                entries.push(DirEntry {
                    ino: entry.inode as u64,
                    name,
                    itype,
                });
            }

            offset += entry.rec_len as usize;
        }

        Ok(entries)
    }

    /// Insert a new directory entry, splitting an existing record's slack
    /// space when there's room, or allocating a fresh block when there
    /// isn't any record with enough slack left.
    fn insert_dir_entry(
        &self,
        dir_inode_num: u32,
        dir_inode: &mut Ext2Inode,
        name: &str,
        inode_num: u32,
        file_type: u8,
    ) -> Result<()> {
        if name.len() > 255 {
            return Err(Errno::ENAMETOOLONG);
        }

        let dir_size = dir_inode.i_size as usize;
        let mut dir_data = vec![0u8; dir_size];
        self.read_inode_data(dir_inode, 0, &mut dir_data)?;

        let name_bytes = name.as_bytes();
        let needed_len = 8 + name_bytes.len();
        let aligned_len = (needed_len + 3) & !3;

        let mut offset = 0usize;
        while offset + 8 <= dir_data.len() {
            let entry = unsafe {
                core::ptr::read_unaligned(dir_data.as_ptr().add(offset) as *const Ext2DirEntry)
            };
            if entry.rec_len == 0 {
                break;
            }

            let used_len = if entry.inode == 0 {
                0
            } else {
                (8 + entry.name_len as usize + 3) & !3
            };
            let free_space = entry.rec_len as usize - used_len;

            if free_space >= aligned_len {
                let mut write_offset = offset;
                if entry.inode != 0 {
                    let new_rec_len = used_len as u16;
                    dir_data[offset + 4..offset + 6].copy_from_slice(&new_rec_len.to_le_bytes());
                    write_offset = offset + used_len;
                }

                let remaining_len = (entry.rec_len as usize) - (write_offset - offset);
                let new_entry = Ext2DirEntry {
                    inode: inode_num,
                    rec_len: remaining_len as u16,
                    name_len: name_bytes.len() as u8,
                    file_type,
                };
                let bytes = unsafe {
                    core::slice::from_raw_parts(&new_entry as *const Ext2DirEntry as *const u8, 8)
                };
                dir_data[write_offset..write_offset + 8].copy_from_slice(bytes);
                dir_data[write_offset + 8..write_offset + 8 + name_bytes.len()]
                    .copy_from_slice(name_bytes);

                self.write_inode_data(dir_inode_num, dir_inode, 0, &dir_data)?;
                return Ok(());
            }

            offset += entry.rec_len as usize;
        }

        // No existing record has room: grow the directory by one block
        // and make the new entry the sole record in it.
        let new_block_offset = dir_data.len();
        dir_data.resize(new_block_offset + self.block_size as usize, 0);

        let new_entry = Ext2DirEntry {
            inode: inode_num,
            rec_len: self.block_size as u16,
            name_len: name_bytes.len() as u8,
            file_type,
        };
        let bytes = unsafe {
            core::slice::from_raw_parts(&new_entry as *const Ext2DirEntry as *const u8, 8)
        };
        dir_data[new_block_offset..new_block_offset + 8].copy_from_slice(bytes);
        dir_data[new_block_offset + 8..new_block_offset + 8 + name_bytes.len()]
            .copy_from_slice(name_bytes);

        self.write_inode_data(dir_inode_num, dir_inode, 0, &dir_data)?;
        Ok(())
    }

    /// Remove the entry named `name`. When a previous live record exists
    /// earlier in the same block, its `rec_len` absorbs the removed
    /// record's space; otherwise the record is left in place as a
    /// tombstone (`inode` zeroed, `rec_len` untouched) so later scans
    /// still step over it correctly.
    fn remove_dir_entry(&self, dir_inode_num: u32, dir_inode: &mut Ext2Inode, name: &str) -> Result<u32> {
        let dir_size = dir_inode.i_size as usize;
        let mut dir_data = vec![0u8; dir_size];
        self.read_inode_data(dir_inode, 0, &mut dir_data)?;

        let mut offset = 0usize;
        let mut prev_offset: Option<usize> = None;
        let mut cur_block = 0usize;

        while offset + 8 <= dir_data.len() {
            let this_block = offset / self.block_size as usize;
            if this_block != cur_block {
                prev_offset = None;
                cur_block = this_block;
            }

            let entry = unsafe {
                core::ptr::read_unaligned(dir_data.as_ptr().add(offset) as *const Ext2DirEntry)
            };
            if entry.rec_len == 0 {
                break;
            }

            if entry.inode != 0 {
                let name_start = offset + 8;
                let name_end = name_start + entry.name_len as usize;
                if name_end <= dir_data.len() {
                    if let Ok(entry_name) = core::str::from_utf8(&dir_data[name_start..name_end]) {
                        if entry_name == name {
                            let removed_inode = entry.inode;

                            if let Some(prev) = prev_offset {
                                let prev_entry = unsafe {
                                    core::ptr::read_unaligned(
                                        dir_data.as_ptr().add(prev) as *const Ext2DirEntry
                                    )
                                };
                                let new_rec_len = prev_entry.rec_len + entry.rec_len;
                                dir_data[prev + 4..prev + 6].copy_from_slice(&new_rec_len.to_le_bytes());
                            } else {
                                dir_data[offset..offset + 4].copy_from_slice(&0u32.to_le_bytes());
                            }

                            self.write_inode_data(dir_inode_num, dir_inode, 0, &dir_data)?;
                            return Ok(removed_inode);
                        }
                    }
                }
                prev_offset = Some(offset);
            }

            offset += entry.rec_len as usize;
        }

        Err(Errno::ENOENT)
    }
}

/// Ext2 inode implementation for VFS
pub struct Ext2InodeOps {
    fs: Arc<Ext2FileSystem>,
    inode_num: u32,
    inode_data: Mutex<Ext2Inode>,
}

impl Ext2InodeOps {
    fn get_inode_type(mode: u16) -> InodeType {
        if (mode & 0o040000) != 0 {
            InodeType::Directory
        } else if (mode & 0o100000) != 0 {
            InodeType::Regular
        } else {
            InodeType::Regular // Default
        }
    }

    /// Build and cache the `Arc<Inode>` for `child_ino`, reusing the live
    /// dentry-cache entry if one already exists for this (device, inode)
    /// pair instead of building fresh `Ext2InodeOps` every time.
    fn child_inode(&self, child_ino: u32) -> Result<Arc<Inode>> {
        let key = (self.fs.device.index(), child_ino as u64);
        let fs = self.fs.clone();
        super::dcache::get_or_insert_with(key, move || {
            let child_data = fs.read_inode(child_ino)?;
            let child_itype = Self::get_inode_type(child_data.i_mode);
            let mode_bits = child_data.i_mode as u32;
            let child_ops: Arc<dyn InodeOps> = Arc::new(Ext2InodeOps {
                fs: fs.clone(),
                inode_num: child_ino,
                inode_data: Mutex::new(child_data),
            });
            Ok(Arc::new(Inode::new_with_ino(child_ino as u64, child_itype, mode_bits, child_ops)))
        })
    }
}

impl InodeOps for Ext2InodeOps {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let inode = self.inode_data.lock();
        self.fs.read_inode_data(&inode, offset, buf)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut inode = self.inode_data.lock();
        self.fs.write_inode_data(self.inode_num, &mut inode, offset, buf)
    }

    fn lookup(&self, name: &str) -> Result<Arc<Inode>> {
        let inode = self.inode_data.lock();
        let child_ino = self.fs.lookup_dir(&inode, name)?;
        drop(inode);

        self.child_inode(child_ino)
    }

    fn readdir(&self) -> Result<Vec<DirEntry>> {
        let inode = self.inode_data.lock();
        self.fs.readdir(&inode)
    }

    fn create(&self, name: &str, mode: u32) -> Result<Arc<Inode>> {
        let mut dir_inode = self.inode_data.lock();

        if self.fs.lookup_dir(&dir_inode, name).is_ok() {
            return Err(Errno::EEXIST);
        }

        let is_dir = (mode & crate::vfs::S_IFDIR) == crate::vfs::S_IFDIR;
        let pref_group = self.fs.group_of_inode(self.inode_num);
        let new_ino = self.fs.allocate_inode(pref_group)?;

        let now = now_secs();
        let mut new_inode = Ext2Inode {
            i_mode: mode as u16,
            i_uid: 0,
            i_size: 0,
            i_atime: now,
            i_ctime: now,
            i_mtime: now,
            i_dtime: 0,
            i_gid: 0,
            i_links_count: if is_dir { 2 } else { 1 },
            i_blocks: 0,
            i_flags: 0,
            i_osd1: 0,
            i_block: [0; EXT2_N_BLOCKS],
            i_generation: 0,
            i_file_acl: 0,
            i_dir_acl: 0,
            i_faddr: 0,
            i_osd2: [0; 12],
        };

        let file_type = if is_dir { EXT2_FT_DIR } else { EXT2_FT_REG_FILE };

        if is_dir {
            self.fs.insert_dir_entry(new_ino, &mut new_inode, ".", new_ino, EXT2_FT_DIR)?;
            self.fs.insert_dir_entry(new_ino, &mut new_inode, "..", self.inode_num, EXT2_FT_DIR)?;
        } else {
            self.fs.write_inode(new_ino, &new_inode)?;
        }

        self.fs.insert_dir_entry(self.inode_num, &mut dir_inode, name, new_ino, file_type)?;

        if is_dir {
            // The child's ".." now references us.
            dir_inode.i_links_count += 1;
            self.fs.write_inode(self.inode_num, &dir_inode)?;
        }

        let itype = Self::get_inode_type(new_inode.i_mode);
        let mode_bits = new_inode.i_mode as u32;
        let child_ops: Arc<dyn InodeOps> = Arc::new(Ext2InodeOps {
            fs: self.fs.clone(),
            inode_num: new_ino,
            inode_data: Mutex::new(new_inode),
        });

        let key = (self.fs.device.index(), new_ino as u64);
        super::dcache::get_or_insert_with(key, move || {
            Ok(Arc::new(Inode::new_with_ino(new_ino as u64, itype, mode_bits, child_ops)))
        })
    }

    fn getattr(&self) -> Result<crate::vfs::InodeMeta> {
        let inode = self.inode_data.lock();
        Ok(crate::vfs::InodeMeta {
            ino: self.inode_num as u64,
            itype: Self::get_inode_type(inode.i_mode),
            mode: inode.i_mode as u32,
            uid: inode.i_uid as u32,
            gid: inode.i_gid as u32,
            nlink: inode.i_links_count as u32,
            size: inode.i_size as u64,
            atime: inode.i_atime as u64,
            mtime: inode.i_mtime as u64,
            ctime: inode.i_ctime as u64,
        })
    }

    fn truncate(&self, size: u64) -> Result<()> {
        let mut inode = self.inode_data.lock();
        self.fs.truncate_inode_data(self.inode_num, &mut inode, size)
    }

    fn unlink(&self, name: &str) -> Result<()> {
        let mut dir_inode = self.inode_data.lock();
        let target_ino = self.fs.lookup_dir(&dir_inode, name)?;
        let mut target = self.fs.read_inode(target_ino)?;

        if Self::get_inode_type(target.i_mode) == InodeType::Directory {
            return Err(Errno::EISDIR);
        }

        self.fs.remove_dir_entry(self.inode_num, &mut dir_inode, name)?;

        target.i_links_count = target.i_links_count.saturating_sub(1);
        if target.i_links_count == 0 {
            target.i_dtime = now_secs();
            self.fs.truncate_inode_data(target_ino, &mut target, 0)?;
            self.fs.free_inode(target_ino)?;
        } else {
            self.fs.write_inode(target_ino, &target)?;
        }

        Ok(())
    }

    fn rmdir(&self, name: &str) -> Result<()> {
        let mut dir_inode = self.inode_data.lock();
        let target_ino = self.fs.lookup_dir(&dir_inode, name)?;
        let target = self.fs.read_inode(target_ino)?;

        if Self::get_inode_type(target.i_mode) != InodeType::Directory {
            return Err(Errno::ENOTDIR);
        }

        let entries = self.fs.readdir(&target)?;
        if entries.iter().any(|e| e.name != "." && e.name != "..") {
            return Err(Errno::ENOTEMPTY);
        }

        self.fs.remove_dir_entry(self.inode_num, &mut dir_inode, name)?;

        let mut target = target;
        target.i_dtime = now_secs();
        self.fs.truncate_inode_data(target_ino, &mut target, 0)?;
        self.fs.free_inode(target_ino)?;

        // The removed child's ".." no longer points back at us.
        dir_inode.i_links_count = dir_inode.i_links_count.saturating_sub(1);
        self.fs.write_inode(self.inode_num, &dir_inode)?;

        Ok(())
    }
}

/// Mount an ext2 filesystem
pub fn mount_ext2(device: Arc<BlockDevice>) -> Result<Arc<Inode>> {
    let fs = Ext2FileSystem::mount(device)?;

    let key = (fs.device.index(), EXT2_ROOT_INO as u64);
    let fs_for_ctor = fs.clone();
    let root = super::dcache::get_or_insert_with(key, move || {
        let root_data = fs_for_ctor.read_inode(EXT2_ROOT_INO)?;
        let root_itype = Ext2InodeOps::get_inode_type(root_data.i_mode);
        let mode_bits = root_data.i_mode as u32;
        let root_ops: Arc<dyn InodeOps> = Arc::new(Ext2InodeOps {
            fs: fs_for_ctor.clone(),
            inode_num: EXT2_ROOT_INO,
            inode_data: Mutex::new(root_data),
        });
        Ok(Arc::new(Inode::new_with_ino(EXT2_ROOT_INO as u64, root_itype, mode_bits, root_ops)))
    })?;

    crate::info!("ext2: mounted successfully (root inode {})", EXT2_ROOT_INO);
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockDeviceOps;
    use alloc::boxed::Box;

    const TEST_BLOCK_SIZE: u32 = 1024;
    const TEST_BLOCKS_COUNT: u32 = 48;
    const TEST_INODES_COUNT: u32 = 32;
    const TEST_INODE_TABLE_BLOCKS: u32 = 4; // 32 inodes * 128 bytes / 1024

    struct RamDisk {
        data: Mutex<Vec<u8>>,
    }

    impl BlockDeviceOps for RamDisk {
        fn read_sectors(&self, dev: &BlockDevice, sector: u64, buf: &mut [u8]) -> Result<()> {
            let data = self.data.lock();
            let start = sector as usize * dev.sector_size;
            buf.copy_from_slice(&data[start..start + buf.len()]);
            Ok(())
        }

        fn write_sectors(&self, dev: &BlockDevice, sector: u64, buf: &[u8]) -> Result<()> {
            let mut data = self.data.lock();
            let start = sector as usize * dev.sector_size;
            data[start..start + buf.len()].copy_from_slice(buf);
            Ok(())
        }

        fn flush(&self, _dev: &BlockDevice) -> Result<()> {
            Ok(())
        }
    }

    fn put_struct<T>(image: &mut [u8], byte_offset: usize, value: &T) {
        let bytes = unsafe {
            core::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>())
        };
        image[byte_offset..byte_offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Hand-format a minimal single-group ext2 image (block size 1 KiB)
    /// with just a root directory, then mount it through the real
    /// `mount_ext2` entry point. Layout: block 1 = superblock, block 2 =
    /// group descriptor table, block 3 = block bitmap, block 4 = inode
    /// bitmap, blocks 5..8 = inode table, block 9 = root directory data.
    fn format_and_mount() -> Arc<Inode> {
        let block_size = TEST_BLOCK_SIZE;
        let total_bytes = (TEST_BLOCKS_COUNT * block_size) as usize;
        let mut image = vec![0u8; total_bytes];

        let block_bitmap = 3u32;
        let inode_bitmap = 4u32;
        let inode_table = 5u32;
        let root_data_block = inode_table + TEST_INODE_TABLE_BLOCKS; // 9

        let superblock = Ext2Superblock {
            s_inodes_count: TEST_INODES_COUNT,
            s_blocks_count: TEST_BLOCKS_COUNT,
            s_r_blocks_count: 0,
            s_free_blocks_count: TEST_BLOCKS_COUNT - 1 - root_data_block,
            s_free_inodes_count: TEST_INODES_COUNT - 2,
            s_first_data_block: 1,
            s_log_block_size: 0, // 1024 << 0
            s_log_frag_size: 0,
            s_blocks_per_group: TEST_BLOCKS_COUNT,
            s_frags_per_group: TEST_BLOCKS_COUNT,
            s_inodes_per_group: TEST_INODES_COUNT,
            s_mtime: 0,
            s_wtime: 0,
            s_mnt_count: 0,
            s_max_mnt_count: 0,
            s_magic: EXT2_SUPER_MAGIC,
            s_state: 1,
            s_errors: 1,
            s_minor_rev_level: 0,
            s_lastcheck: 0,
            s_checkinterval: 0,
            s_creator_os: 0,
            s_rev_level: 0,
            s_def_resuid: 0,
            s_def_resgid: 0,
            s_first_ino: 11,
            s_inode_size: EXT2_GOOD_OLD_INODE_SIZE,
            s_block_group_nr: 0,
            s_feature_compat: 0,
            s_feature_incompat: 0,
            s_feature_ro_compat: 0,
            s_uuid: [0; 16],
            s_volume_name: [0; 16],
            s_last_mounted: [0; 64],
            s_algo_bitmap: 0,
            s_prealloc_blocks: 0,
            s_prealloc_dir_blocks: 0,
            s_padding1: 0,
            s_journal_uuid: [0; 16],
            s_journal_inum: 0,
            s_journal_dev: 0,
            s_last_orphan: 0,
        };
        put_struct(&mut image, 1024, &superblock);

        let group_desc = Ext2GroupDesc {
            bg_block_bitmap: block_bitmap,
            bg_inode_bitmap: inode_bitmap,
            bg_inode_table: inode_table,
            bg_free_blocks_count: (TEST_BLOCKS_COUNT - 1 - root_data_block) as u16,
            bg_free_inodes_count: (TEST_INODES_COUNT - 2) as u16,
            bg_used_dirs_count: 1,
            bg_pad: 0,
            bg_reserved: [0; 3],
        };
        put_struct(&mut image, (2 * block_size) as usize, &group_desc);

        // Block bitmap: blocks 1..=root_data_block are in use.
        let used_blocks = root_data_block; // bit indices 0..used_blocks-1
        for bit in 0..used_blocks {
            let byte = (bit / 8) as usize;
            image[(block_bitmap * block_size) as usize + byte] |= 1 << (bit % 8);
        }

        // Inode bitmap: inodes 1 and 2 (root) are in use.
        image[(inode_bitmap * block_size) as usize] = 0b0000_0011;

        let root_inode = Ext2Inode {
            i_mode: 0o040755,
            i_uid: 0,
            i_size: block_size,
            i_atime: 0,
            i_ctime: 0,
            i_mtime: 0,
            i_dtime: 0,
            i_gid: 0,
            i_links_count: 2,
            i_blocks: block_size / 512,
            i_flags: 0,
            i_osd1: 0,
            i_block: {
                let mut b = [0u32; EXT2_N_BLOCKS];
                b[0] = root_data_block;
                b
            },
            i_generation: 0,
            i_file_acl: 0,
            i_dir_acl: 0,
            i_faddr: 0,
            i_osd2: [0; 12],
        };
        let root_inode_offset = (inode_table * block_size) as usize
            + (EXT2_ROOT_INO as usize - 1) * EXT2_GOOD_OLD_INODE_SIZE as usize;
        put_struct(&mut image, root_inode_offset, &root_inode);

        let dir_block_offset = (root_data_block * block_size) as usize;
        let dot = Ext2DirEntry { inode: EXT2_ROOT_INO, rec_len: 12, name_len: 1, file_type: EXT2_FT_DIR };
        put_struct(&mut image, dir_block_offset, &dot);
        image[dir_block_offset + 8] = b'.';
        let dotdot = Ext2DirEntry {
            inode: EXT2_ROOT_INO,
            rec_len: (block_size - 12) as u16,
            name_len: 2,
            file_type: EXT2_FT_DIR,
        };
        put_struct(&mut image, dir_block_offset + 12, &dotdot);
        image[dir_block_offset + 20] = b'.';
        image[dir_block_offset + 21] = b'.';

        let ops: &'static dyn BlockDeviceOps = Box::leak(Box::new(RamDisk { data: Mutex::new(image) }));
        let sector_size = 512usize;
        let capacity_sectors = (total_bytes / sector_size) as u64;
        let device = Arc::new(BlockDevice::new(
            alloc::string::String::from("ramdisk-test"),
            250,
            0,
            capacity_sectors,
            ops,
        ));

        mount_ext2(device).expect("mount_ext2 should succeed on a well-formed image")
    }

    #[test]
    fn create_write_read_round_trip() {
        let root = format_and_mount();
        let inode = root.create("a", 0o100644).expect("create should succeed");

        let payload = b"hello ext2 world";
        let written = inode.write(0, payload).expect("write should succeed");
        assert_eq!(written, payload.len());

        let mut readback = vec![0u8; payload.len()];
        let read = inode.read(0, &mut readback).expect("read should succeed");
        assert_eq!(read, payload.len());
        assert_eq!(&readback[..], &payload[..]);
        assert_eq!(inode.getattr().unwrap().size, payload.len() as u64);
    }

    #[test]
    fn directory_split_on_second_create() {
        let root = format_and_mount();
        root.create("a", 0o100644).expect("create a");
        root.create("longfilename", 0o100644).expect("create longfilename");

        let entries = root.readdir().expect("readdir");
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"."));
        assert!(names.contains(&".."));
        assert!(names.contains(&"a"));
        assert!(names.contains(&"longfilename"));
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn write_past_direct_blocks_uses_indirect_addressing() {
        let root = format_and_mount();
        let inode = root.create("big", 0o100644).expect("create big");

        // 13 KiB spans all 12 direct blocks plus one single-indirect block.
        let mut payload = vec![0u8; 13 * 1024];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }
        inode.write(0, &payload).expect("write should succeed");

        let mut readback = vec![0u8; payload.len()];
        inode.read(0, &mut readback).expect("read should succeed");
        assert_eq!(readback, payload);
        assert_eq!(inode.getattr().unwrap().size, payload.len() as u64);
    }

    #[test]
    fn truncate_is_idempotent() {
        let root = format_and_mount();
        let inode = root.create("trunc", 0o100644).expect("create trunc");
        inode.write(0, &vec![0xAAu8; 4096]).expect("write");

        inode.ops.truncate(1500).expect("first truncate");
        let meta_after_first = inode.getattr().expect("getattr");
        assert_eq!(meta_after_first.size, 1500);

        inode.ops.truncate(1500).expect("second truncate should be a no-op");
        let meta_after_second = inode.getattr().expect("getattr");
        assert_eq!(meta_after_second.size, 1500);
    }

    #[test]
    fn unlink_removes_entry_and_frees_inode() {
        let root = format_and_mount();
        root.create("doomed", 0o100644).expect("create doomed");
        assert!(root.lookup("doomed").is_ok());

        root.unlink("doomed").expect("unlink should succeed");
        assert!(matches!(root.lookup("doomed"), Err(Errno::ENOENT)));
    }

    #[test]
    fn rmdir_rejects_non_empty_directory() {
        let root = format_and_mount();
        root.create("subdir", 0o040755 | crate::vfs::S_IFDIR).expect("mkdir subdir");
        let subdir = root.lookup("subdir").expect("lookup subdir");
        subdir.create("child", 0o100644).expect("create child");

        assert!(matches!(root.rmdir("subdir"), Err(Errno::ENOTEMPTY)));
    }
}
