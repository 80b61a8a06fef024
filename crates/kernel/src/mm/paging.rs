/// Page table management and PTE flag definitions
///
/// AArch64 page table format with support for NX (Execute-Never),
/// copy-on-write, and user/kernel separation. Walks are always full
/// 4-level (L0-L3, 4KB leaves) -- there is no single-level shortcut.

use crate::lib::error::KernelError;
use super::frame::{alloc_page, free_page};

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

/// Kernel/User address space boundary
pub const KERNEL_BASE: u64 = 0xFFFF_0000_0000_0000;

bitflags::bitflags! {
    /// Page table entry flags (AArch64 format)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        /// Valid entry
        const VALID = 1 << 0;
        /// Table descriptor (vs block/page)
        const TABLE = 1 << 1;
        /// User accessible
        const USER = 1 << 6;
        /// Read-only (when clear, read-write)
        const READONLY = 1 << 7;
        /// Shareable
        const SHARED = 1 << 8 | 1 << 9;
        /// Access flag (must be set)
        const ACCESS = 1 << 10;
        /// Not global
        const NOT_GLOBAL = 1 << 11;
        /// Execute-never for unprivileged (EL0)
        const UXN = 1 << 54;
        /// Privileged execute-never (EL1)
        const PXN = 1 << 53;
        /// Copy-on-write (software bit)
        const COW = 1 << 55;
    }
}

impl PteFlags {
    pub fn user_ro() -> Self {
        Self::VALID | Self::USER | Self::READONLY | Self::ACCESS | Self::NOT_GLOBAL | Self::UXN
    }

    pub fn user_rw() -> Self {
        Self::VALID | Self::USER | Self::ACCESS | Self::NOT_GLOBAL | Self::UXN
    }

    pub fn user_rx() -> Self {
        Self::VALID | Self::USER | Self::READONLY | Self::ACCESS | Self::NOT_GLOBAL
    }

    pub fn user_cow() -> Self {
        Self::VALID | Self::USER | Self::READONLY | Self::ACCESS | Self::NOT_GLOBAL | Self::UXN | Self::COW
    }

    /// Table-descriptor flags for an intermediate (non-leaf) entry.
    fn table_descriptor() -> Self {
        Self::VALID | Self::TABLE
    }

    pub fn is_cow(&self) -> bool {
        self.contains(Self::COW)
    }

    pub fn is_writable(&self) -> bool {
        !self.contains(Self::READONLY)
    }

    pub fn is_executable(&self) -> bool {
        !self.contains(Self::UXN)
    }

    pub fn mark_cow(&mut self) {
        self.insert(Self::READONLY | Self::COW);
    }

    pub fn clear_cow(&mut self) {
        self.remove(Self::COW | Self::READONLY);
    }
}

/// Page table entry
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Pte(u64);

const ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;

impl Pte {
    pub const fn invalid() -> Self {
        Self(0)
    }

    pub fn new(phys_addr: u64, flags: PteFlags) -> Self {
        Self((phys_addr & ADDR_MASK) | flags.bits())
    }

    pub fn is_valid(&self) -> bool {
        (self.0 & PteFlags::VALID.bits()) != 0
    }

    pub fn phys_addr(&self) -> u64 {
        self.0 & ADDR_MASK
    }

    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    pub fn set_flags(&mut self, flags: PteFlags) {
        let addr = self.phys_addr();
        self.0 = addr | flags.bits();
    }
}

impl core::fmt::Debug for Pte {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pte")
            .field("phys", &format_args!("{:#x}", self.phys_addr()))
            .field("flags", &self.flags())
            .finish()
    }
}

/// One level of a 4-level page table (512 entries, 4KB leaves)
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [Pte; 512],
}

impl PageTable {
    pub const fn new() -> Self {
        Self {
            entries: [Pte::invalid(); 512],
        }
    }

    /// Index into a given level (0 = L0/top, 3 = L3/leaf) for a virtual address.
    pub fn index(virt_addr: u64, level: usize) -> usize {
        ((virt_addr >> (12 + 9 * (3 - level))) & 0x1FF) as usize
    }
}

/// Allocate a fresh, zeroed L0 root page table.
pub fn alloc_user_page_table() -> Result<u64, KernelError> {
    alloc_page().ok_or(KernelError::OutOfMemory)
}

unsafe fn table_at(phys: u64) -> *mut PageTable {
    phys as *mut PageTable
}

/// Walk from the L0 root to the L3 entry for `virt_addr`, allocating
/// intermediate tables as needed when `create` is set. Returns a pointer
/// to the L3 PTE slot.
unsafe fn walk(root: u64, virt_addr: u64, create: bool) -> Result<*mut Pte, KernelError> {
    let mut table = table_at(root);
    for level in 0..3 {
        let idx = PageTable::index(virt_addr, level);
        let pte = (*table).entries[idx];
        let next = if pte.is_valid() {
            pte.phys_addr()
        } else {
            if !create {
                return Err(KernelError::NotFound);
            }
            let child = alloc_page().ok_or(KernelError::OutOfMemory)?;
            (*table).entries[idx] = Pte::new(child, PteFlags::table_descriptor());
            child
        };
        table = table_at(next);
    }
    let idx = PageTable::index(virt_addr, 3);
    Ok(&mut (*table).entries[idx] as *mut Pte)
}

/// Map a single 4KB virtual page, allocating any missing intermediate
/// page table levels.
pub fn map_page(root: u64, virt_addr: u64, phys_addr: u64, flags: PteFlags) -> Result<(), KernelError> {
    unsafe {
        let slot = walk(root, virt_addr, true)?;
        *slot = Pte::new(phys_addr, flags);
    }
    flush_tlb(virt_addr);
    Ok(())
}

/// Unmap a single 4KB virtual page. No-op if it was never mapped.
pub fn unmap_page(root: u64, virt_addr: u64) {
    unsafe {
        if let Ok(slot) = walk(root, virt_addr, false) {
            *slot = Pte::invalid();
        }
    }
    flush_tlb(virt_addr);
}

/// Read the leaf PTE mapping `virt_addr`, if any.
pub fn get_pte(root: u64, virt_addr: u64) -> Option<Pte> {
    unsafe {
        let slot = walk(root, virt_addr, false).ok()?;
        let pte = *slot;
        if pte.is_valid() { Some(pte) } else { None }
    }
}

/// Duplicate a range of a user address space for fork. Each mapped leaf
/// is shared between parent and child (both alias the same physical
/// frame, refcounted via [`super::frame::share_page`]); writable leaves
/// are additionally marked read-only + copy-on-write in both tables so
/// the first write after fork triggers [`super::fault::handle_page_fault`].
pub fn copy_page_table_for_fork(
    parent_root: *mut PageTable,
    child_root: *mut PageTable,
    start: u64,
    end: u64,
    writable: bool,
) -> Result<(), KernelError> {
    let root = parent_root as u64;
    let child_root = child_root as u64;
    let mut addr = start & !(PAGE_SIZE as u64 - 1);
    while addr < end {
        if let Some(mut pte) = get_pte(root, addr) {
            let flags = if writable {
                pte.set_flags(PteFlags::user_cow());
                map_page(root, addr, pte.phys_addr(), pte.flags())?;
                pte.flags()
            } else {
                pte.flags()
            };
            map_page(child_root, addr, pte.phys_addr(), flags)?;
            super::frame::share_page(pte.phys_addr());
        }
        addr += PAGE_SIZE as u64;
    }
    Ok(())
}

/// Recursively free a page table hierarchy's intermediate levels. Leaf
/// data pages are not touched -- callers free those via the frame
/// allocator once they know nothing else references them.
pub unsafe fn free_page_table(root: u64, level: usize) {
    if root == 0 {
        return;
    }
    let table = table_at(root);
    if level < 3 {
        for i in 0..512 {
            let pte = (*table).entries[i];
            if pte.is_valid() && pte.flags().contains(PteFlags::TABLE) {
                free_page_table(pte.phys_addr(), level + 1);
            }
        }
    }
    free_page(root);
}

/// Flush TLB for a specific address
#[cfg(target_arch = "aarch64")]
#[inline]
pub fn flush_tlb(virt_addr: u64) {
    unsafe {
        core::arch::asm!(
            "dsb ishst",
            "tlbi vaae1is, {addr}",
            "dsb ish",
            "isb",
            addr = in(reg) virt_addr >> 12,
            options(nostack)
        );
    }
}

#[cfg(not(target_arch = "aarch64"))]
#[inline]
pub fn flush_tlb(_virt_addr: u64) {}

/// Flush entire TLB
#[cfg(target_arch = "aarch64")]
#[inline]
pub fn flush_tlb_all() {
    unsafe {
        core::arch::asm!(
            "dsb ishst",
            "tlbi vmalle1is",
            "dsb ish",
            "isb",
            options(nostack)
        );
    }
}

#[cfg(not(target_arch = "aarch64"))]
#[inline]
pub fn flush_tlb_all() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pte_roundtrips_addr_and_flags() {
        let pte = Pte::new(0x1234_5000, PteFlags::user_rw());
        assert_eq!(pte.phys_addr(), 0x1234_5000);
        assert!(pte.flags().is_writable());
    }

    #[test]
    fn page_table_index_covers_all_levels() {
        let va = 0x0000_1234_5678_9000u64;
        for level in 0..4 {
            assert!(PageTable::index(va, level) < 512);
        }
    }
}
