//! Phase 3: Core subsystems initialization
//!
//! Brings up the subsystems that process bring-up and the filesystem driver
//! depend on, in dependency order:
//! - Credentials and PRNG (tasks need a uid/gid at creation time)
//! - Process table
//! - Scheduler
//! - VFS core
//! - ext2 root mount, if a block device was registered during platform init

use super::{InitError, InitResult};

/// Initialize all core subsystems in the correct dependency order
///
/// # Safety
/// Must be called after memory management initialization (Phase 2)
pub unsafe fn init_core_subsystems() -> InitResult<()> {
    init_security()?;
    init_process_table()?;
    init_scheduler()?;
    init_vfs()?;
    Ok(())
}

/// Initialize credentials and the kernel PRNG
unsafe fn init_security() -> InitResult<()> {
    crate::security::init_credentials();
    crate::security::random::init();
    Ok(())
}

/// Initialize process table for task management
unsafe fn init_process_table() -> InitResult<()> {
    crate::process::init_process_table();
    Ok(())
}

/// Initialize the scheduler's run queues
unsafe fn init_scheduler() -> InitResult<()> {
    crate::process::scheduler::init();
    Ok(())
}

/// Initialize VFS core and mount the root filesystem.
///
/// Mounts ext2 from the first registered block device, if any. A kernel
/// with no backing storage (e.g. booted without a disk image) still brings
/// up the VFS layer itself, just with no root mount.
unsafe fn init_vfs() -> InitResult<()> {
    crate::vfs::mount::init_vfs();

    #[cfg(feature = "ext2")]
    if let Some(device) = crate::block::list_block_devices().into_iter().next() {
        let root = crate::vfs::ext2::mount_ext2(device).map_err(|_| InitError::MountFailed)?;
        crate::vfs::mount::mount("ext2", root.clone(), "/").map_err(|_| InitError::MountFailed)?;
        crate::vfs::mount::set_root(root);
    }

    Ok(())
}
