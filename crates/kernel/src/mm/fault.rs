/// Page fault handler with copy-on-write support
///
/// Handles data and instruction aborts from EL0 and EL1.
/// Implements COW (copy-on-write) for fork.

use crate::arch::TrapFrame;
use crate::process::{current_pid, get_process_table};
use crate::lib::error::Errno;
use super::frame::{alloc_page, free_page, refcount};
use super::paging::{get_pte, map_page, copy_page_table_for_fork, flush_tlb_all, PteFlags, PageTable, PAGE_SIZE};

/// Fault Status Code (FSC) from ESR_EL1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// Permission fault (write to read-only page)
    Permission,
    /// Translation fault (page not mapped)
    Translation,
    /// Access flag fault
    AccessFlag,
    /// Other/Unknown
    Other,
}

/// Parse fault type from ESR_EL1
pub fn parse_fault_type(esr: u64) -> FaultType {
    let dfsc = esr & 0x3F; // Data Fault Status Code
    match dfsc {
        // Translation faults (level 0-3)
        0b000100 | 0b000101 | 0b000110 | 0b000111 => FaultType::Translation,
        // Access flag faults (level 0-3)
        0b001000 | 0b001001 | 0b001010 | 0b001011 => FaultType::AccessFlag,
        // Permission faults (level 0-3)
        0b001100 | 0b001101 | 0b001110 | 0b001111 => FaultType::Permission,
        _ => FaultType::Other,
    }
}

/// Check if fault is a write fault
pub fn is_write_fault(esr: u64) -> bool {
    // WnR bit (bit 6) indicates write not read
    (esr & (1 << 6)) != 0
}

/// Handle page fault
///
/// Called from trap handler when a data or instruction abort occurs.
/// Returns Ok(()) if fault was handled, Err otherwise.
pub fn handle_page_fault(frame: &mut TrapFrame, far: u64, esr: u64) -> Result<(), Errno> {
    let fault_type = parse_fault_type(esr);
    let is_write = is_write_fault(esr);

    crate::debug!("Page fault at {:#x}: type={:?}, write={}", far, fault_type, is_write);

    // Get current process
    let pid = current_pid();
    let mut table = get_process_table();
    let table = table.as_mut().ok_or(Errno::ESRCH)?;
    let task = table.get_mut(pid).ok_or(Errno::ESRCH)?;

    // Check if address is in a valid VMA
    let vma = task.mm.find_vma(far).ok_or_else(|| {
        crate::error!("Page fault: no VMA for address {:#x}", far);
        Errno::EFAULT
    })?;

    // Handle based on fault type
    match (fault_type, is_write) {
        (FaultType::Permission, true) => {
            // Write to read-only page - check for COW
            handle_cow_fault(task, far)
        }
        (FaultType::Translation, _) => {
            // Page not mapped - lazy allocation
            handle_lazy_fault(task, far, vma.flags)
        }
        (FaultType::AccessFlag, _) => {
            // Access flag fault - set access flag
            // (For now, treat as translation fault)
            handle_lazy_fault(task, far, vma.flags)
        }
        _ => {
            crate::error!("Unhandled page fault: type={:?}, write={}", fault_type, is_write);
            Err(Errno::EFAULT)
        }
    }
}

/// Handle copy-on-write fault
fn handle_cow_fault(task: &mut crate::process::Task, fault_addr: u64) -> Result<(), Errno> {
    let page_addr = fault_addr & !(PAGE_SIZE as u64 - 1);
    let root = task.mm.page_table;

    let pte = get_pte(root, page_addr).ok_or_else(|| {
        crate::error!("COW fault: no PTE for {:#x}", page_addr);
        Errno::EFAULT
    })?;

    if !pte.flags().is_cow() {
        // Genuine write-protect violation, not a COW page: not our fault to fix.
        crate::error!("Write fault on non-COW page {:#x}", page_addr);
        return Err(Errno::EFAULT);
    }

    let old_phys = pte.phys_addr();

    if refcount(old_phys) <= 1 {
        // Sole owner left: just drop the write-protect/COW bits in place.
        let mut rw = pte.flags();
        rw.clear_cow();
        map_page(root, page_addr, old_phys, rw)?;
        crate::debug!("COW fault at {:#x}: last owner, made writable in place", page_addr);
        return Ok(());
    }

    let new_page = alloc_page().ok_or(Errno::ENOMEM)?;
    unsafe {
        core::ptr::copy_nonoverlapping(
            old_phys as *const u8,
            new_page as *mut u8,
            PAGE_SIZE,
        );
    }

    let mut rw = pte.flags();
    rw.clear_cow();
    map_page(root, page_addr, new_page, rw)?;
    free_page(old_phys); // drops this task's share of the original frame

    crate::info!("COW: copied {:#x} -> {:#x} for fault at {:#x}", old_phys, new_page, fault_addr);
    Ok(())
}

/// Handle lazy allocation fault (translation fault)
fn handle_lazy_fault(
    task: &mut crate::process::Task,
    fault_addr: u64,
    vma_flags: crate::process::VmaFlags,
) -> Result<(), Errno> {
    // Round down to page boundary
    let page_addr = fault_addr & !(PAGE_SIZE as u64 - 1);

    crate::debug!("Lazy fault at {:#x}, flags={:?}", page_addr, vma_flags);

    // Allocate a physical page (frame::alloc_page zero-fills it)
    let phys_page = alloc_page().ok_or(Errno::ENOMEM)?;

    // Convert VMA flags to PTE flags
    let pte_flags = if vma_flags.contains(crate::process::VmaFlags::WRITE) {
        PteFlags::user_rw()
    } else if vma_flags.contains(crate::process::VmaFlags::EXEC) {
        PteFlags::user_rx()
    } else {
        PteFlags::user_ro()
    };

    map_page(task.mm.page_table, page_addr, phys_page, pte_flags)?;

    crate::info!("Lazy: allocated page {:#x} for fault at {:#x}", phys_page, fault_addr);
    Ok(())
}

/// Set up COW for fork
///
/// Walks every VMA in `parent_mm`, sharing each mapped leaf between parent
/// and `child_root` via [`copy_page_table_for_fork`]: writable leaves are
/// marked read-only plus the COW software bit in both page tables and the
/// backing frame's refcount is bumped, so the first write by either side
/// after fork takes a permission fault into [`handle_cow_fault`] instead of
/// corrupting the other side's copy.
pub fn setup_cow_for_fork(parent_mm: &crate::process::MemoryManager, child_root: u64) -> Result<(), Errno> {
    let parent_root = parent_mm.page_table as *mut PageTable;
    let child_root = child_root as *mut PageTable;

    for vma in &parent_mm.vmas {
        let writable = vma.flags.contains(crate::process::VmaFlags::WRITE);
        copy_page_table_for_fork(parent_root, child_root, vma.start, vma.end, writable)
            .map_err(|_| Errno::ENOMEM)?;
    }

    flush_tlb_all();
    Ok(())
}
