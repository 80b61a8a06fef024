//! Phase 2: Memory Management initialization
//!
//! Brings up the kernel heap (for dynamic allocation inside the kernel
//! itself) and the physical frame allocator (for user/kernel page
//! allocation), in that order: the frame allocator's bookkeeping lives in
//! heap-backed collections.

use super::{early_print, InitError, InitResult};

/// Base and length of the RAM region handed to the frame allocator.
///
/// aarch64 reads this from the platform descriptor table; x86_64 and
/// riscv64 don't have a boot-time memory map parser yet, so they fall back
/// to the fixed QEMU machine defaults for their respective `-machine`.
fn default_ram_range() -> (u64, usize) {
    #[cfg(target_arch = "aarch64")]
    {
        let ranges = crate::platform::active().ram_ranges();
        let r = ranges.first().expect("platform has no RAM range");
        (r.start as u64, r.size)
    }
    #[cfg(target_arch = "x86_64")]
    {
        (0x0010_0000, 512 * 1024 * 1024) // qemu -machine pc, RAM above the 1MiB hole
    }
    #[cfg(target_arch = "riscv64")]
    {
        (0x8000_0000, 512 * 1024 * 1024) // qemu -machine virt, RAM base
    }
}

/// Initialize memory management subsystem
///
/// # Safety
/// Must be called after platform initialization
pub unsafe fn init_memory() -> InitResult<()> {
    early_print(b"MM: INIT\n");

    if let Err(e) = crate::heap::init_heap() {
        early_print(b"HEAP: INIT FAILED - ");
        early_print(e.as_bytes());
        early_print(b"\n");
        return Err(InitError::HeapFailed);
    }
    early_print(b"HEAP: READY\n");

    early_print(b"HEAP: TESTING\n");
    if let Err(e) = crate::heap::test_heap() {
        early_print(b"HEAP: TEST FAILED - ");
        early_print(e.as_bytes());
        early_print(b"\n");
        return Err(InitError::HeapFailed);
    }
    early_print(b"HEAP: TESTS PASSED\n");

    early_print(b"MM: FRAME ALLOCATOR\n");
    let (base, len) = default_ram_range();
    crate::mm::init_frame_allocator(base, len);
    early_print(b"MM: FRAME ALLOCATOR READY\n");

    Ok(())
}
