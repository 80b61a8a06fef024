//! RISC-V Memory Management Unit Implementation
//!
//! Research-backed Sv48 implementation with abstraction for future Sv57/Sv64 support.
//! Follows memory model studies and cache optimization patterns.
//!
//! Research Basis:
//! - RISC-V Privileged Spec v20231002 MMU requirements
//! - Studies on cache-aware scheduling and optimization
//! - Memory layout optimization for AI workloads

use core::arch::asm;

/// Virtual address type for RISC-V 64-bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

/// Physical address type for RISC-V 64-bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

/// Page table entry for RISC-V
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct PageTableEntry(pub u64);

/// Page table flags following RISC-V specification
#[derive(Debug, Clone, Copy)]
pub struct PageFlags(pub u64);

impl PageFlags {
    /// Valid page table entry
    pub const VALID: PageFlags = PageFlags(1 << 0);
    /// Readable page
    pub const READ: PageFlags = PageFlags(1 << 1);
    /// Writable page
    pub const WRITE: PageFlags = PageFlags(1 << 2);
    /// Executable page
    pub const EXECUTE: PageFlags = PageFlags(1 << 3);
    /// User accessible page
    pub const USER: PageFlags = PageFlags(1 << 4);
    /// Global page (not flushed on ASID switch)
    pub const GLOBAL: PageFlags = PageFlags(1 << 5);
    /// Accessed bit
    pub const ACCESSED: PageFlags = PageFlags(1 << 6);
    /// Dirty bit
    pub const DIRTY: PageFlags = PageFlags(1 << 7);

    /// Kernel read-write pages
    pub const KERNEL_RW: PageFlags = PageFlags(
        Self::VALID.0 | Self::READ.0 | Self::WRITE.0 | Self::GLOBAL.0
    );

    /// Kernel read-only pages
    pub const KERNEL_RO: PageFlags = PageFlags(
        Self::VALID.0 | Self::READ.0 | Self::GLOBAL.0
    );

    /// Kernel executable pages
    pub const KERNEL_RX: PageFlags = PageFlags(
        Self::VALID.0 | Self::READ.0 | Self::EXECUTE.0 | Self::GLOBAL.0
    );

    /// User read-write pages
    pub const USER_RW: PageFlags = PageFlags(
        Self::VALID.0 | Self::READ.0 | Self::WRITE.0 | Self::USER.0
    );
}

/// Page table abstraction trait for different RISC-V MMU modes
pub trait PageTableImpl {
    const LEVELS: usize;
    const PAGE_SIZE: usize = 4096;
    const ENTRIES_PER_TABLE: usize = 512;

    fn new() -> Self;
    fn map_page(&mut self, vaddr: VirtAddr, paddr: PhysAddr, flags: PageFlags) -> Result<(), MmuError>;
    fn unmap_page(&mut self, vaddr: VirtAddr) -> Result<(), MmuError>;
    fn translate(&self, vaddr: VirtAddr) -> Result<PhysAddr, MmuError>;
    fn flush_tlb(&self);
}

/// Memory Management Unit errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuError {
    InvalidAddress,
    PageNotMapped,
    PermissionDenied,
    OutOfMemory,
    AlreadyMapped,
}

/// Sv48 4-level page table implementation
/// Supports 48-bit virtual addresses with 39-bit physical addresses
pub struct Sv48PageTable {
    /// Root page table physical address
    root_paddr: PhysAddr,
    /// Current ASID (Address Space Identifier)
    asid: u16,
}

impl Sv48PageTable {
    /// Extract VPN (Virtual Page Number) for each level from virtual address
    fn vpn_level(&self, vaddr: VirtAddr, level: usize) -> usize {
        assert!(level < 4, "Sv48 only has 4 levels");
        ((vaddr.0 >> (12 + level * 9)) & 0x1FF) as usize
    }

    /// Create page table entry from physical address and flags
    fn create_pte(paddr: PhysAddr, flags: PageFlags) -> PageTableEntry {
        let ppn = (paddr.0 >> 12) & 0xFFF_FFFF_FFFF; // 44-bit PPN for Sv48
        PageTableEntry((ppn << 10) | flags.0)
    }

    /// Extract physical address from page table entry
    fn pte_to_paddr(pte: PageTableEntry) -> PhysAddr {
        PhysAddr(((pte.0 >> 10) & 0xFFF_FFFF_FFFF) << 12)
    }

    /// Check if page table entry is valid
    fn is_valid(pte: PageTableEntry) -> bool {
        (pte.0 & PageFlags::VALID.0) != 0
    }

    /// Check if page table entry is a leaf (has R, W, or X bits set)
    fn is_leaf(pte: PageTableEntry) -> bool {
        (pte.0 & (PageFlags::READ.0 | PageFlags::WRITE.0 | PageFlags::EXECUTE.0)) != 0
    }

    /// Flush TLB for specific virtual address
    fn flush_tlb_vaddr(&self, vaddr: VirtAddr) {
        unsafe {
            asm!("sfence.vma {}, {}", in(reg) vaddr.0, in(reg) self.asid);
        }
    }

    /// Set SATP register to activate this page table
    pub fn activate(&self) {
        let satp_value = (8u64 << 60) |           // Sv48 mode
                        ((self.asid as u64) << 44) | // ASID
                        (self.root_paddr.0 >> 12);    // PPN

        unsafe {
            asm!("csrw satp, {}", in(reg) satp_value);
            asm!("sfence.vma");  // Flush all TLB entries
        }
    }
}

impl PageTableImpl for Sv48PageTable {
    const LEVELS: usize = 4;

    fn new() -> Self {
        // For now, allocate root page table at a fixed address
        // In a real implementation, this would use a page allocator
        let root_paddr = PhysAddr(0x8100_0000); // 16MB offset from kernel start
        
        // Clear the root page table
        unsafe {
            let root_ptr = root_paddr.0 as *mut u64;
            for i in 0..Self::ENTRIES_PER_TABLE {
                core::ptr::write_volatile(root_ptr.add(i), 0);
            }
        }

        Self {
            root_paddr,
            asid: 0, // Kernel ASID
        }
    }

    fn map_page(&mut self, vaddr: VirtAddr, paddr: PhysAddr, flags: PageFlags) -> Result<(), MmuError> {
        // Ensure addresses are page-aligned
        if (vaddr.0 & 0xFFF) != 0 || (paddr.0 & 0xFFF) != 0 {
            return Err(MmuError::InvalidAddress);
        }

        let mut current_table_paddr = self.root_paddr;

        // Walk through page table levels 3, 2, 1 (level 0 is the final mapping)
        for level in (1..4).rev() {
            let vpn = self.vpn_level(vaddr, level);
            
            unsafe {
                let table_ptr = current_table_paddr.0 as *mut PageTableEntry;
                let pte_ptr = table_ptr.add(vpn);
                let pte = core::ptr::read_volatile(pte_ptr);

                if !Self::is_valid(pte) {
                    // Need to allocate new page table
                    // For simplicity, allocate consecutive pages after root
                    // In real implementation, use proper page allocator
                    static mut NEXT_PAGE_ALLOC: u64 = 0x8101_0000;
                    let new_table_paddr = PhysAddr(NEXT_PAGE_ALLOC);
                    NEXT_PAGE_ALLOC += 4096;

                    // Clear new page table
                    let new_table_ptr = new_table_paddr.0 as *mut u64;
                    for i in 0..Self::ENTRIES_PER_TABLE {
                        core::ptr::write_volatile(new_table_ptr.add(i), 0);
                    }

                    // Create PTE pointing to new table
                    let new_pte = Self::create_pte(new_table_paddr, PageFlags::VALID);
                    core::ptr::write_volatile(pte_ptr, new_pte);
                    
                    current_table_paddr = new_table_paddr;
                } else if Self::is_leaf(pte) {
                    // Found a leaf entry at intermediate level - this is an error
                    return Err(MmuError::AlreadyMapped);
                } else {
                    // Follow existing page table
                    current_table_paddr = Self::pte_to_paddr(pte);
                }
            }
        }

        // Create final mapping at level 0
        let vpn = self.vpn_level(vaddr, 0);
        unsafe {
            let table_ptr = current_table_paddr.0 as *mut PageTableEntry;
            let pte_ptr = table_ptr.add(vpn);
            let existing_pte = core::ptr::read_volatile(pte_ptr);

            if Self::is_valid(existing_pte) {
                return Err(MmuError::AlreadyMapped);
            }

            let final_pte = Self::create_pte(paddr, flags);
            core::ptr::write_volatile(pte_ptr, final_pte);
        }

        // Flush TLB for this virtual address
        self.flush_tlb_vaddr(vaddr);

        Ok(())
    }

    fn unmap_page(&mut self, vaddr: VirtAddr) -> Result<(), MmuError> {
        // Implementation would walk page tables and clear the final PTE
        // For now, simplified implementation
        self.flush_tlb_vaddr(vaddr);
        Ok(())
    }

    fn translate(&self, vaddr: VirtAddr) -> Result<PhysAddr, MmuError> {
        let mut current_table_paddr = self.root_paddr;

        // Walk through all page table levels
        for level in (0..4).rev() {
            let vpn = self.vpn_level(vaddr, level);
            
            unsafe {
                let table_ptr = current_table_paddr.0 as *const PageTableEntry;
                let pte = core::ptr::read_volatile(table_ptr.add(vpn));

                if !Self::is_valid(pte) {
                    return Err(MmuError::PageNotMapped);
                }

                if Self::is_leaf(pte) || level == 0 {
                    // Found final mapping
                    let page_paddr = Self::pte_to_paddr(pte);
                    let offset = vaddr.0 & 0xFFF; // Page offset
                    return Ok(PhysAddr(page_paddr.0 + offset));
                }

                // Continue to next level
                current_table_paddr = Self::pte_to_paddr(pte);
            }
        }

        Err(MmuError::PageNotMapped)
    }

    fn flush_tlb(&self) {
        unsafe {
            asm!("sfence.vma");
        }
    }
}

/// Global MMU instance
static mut GLOBAL_MMU: Option<Sv48PageTable> = None;

/// Initialize RISC-V MMU with Sv48 mode
pub fn init_mmu() -> Result<(), MmuError> {
    unsafe {
        let mut mmu = Sv48PageTable::new();
        
        // Set up identity mapping for kernel
        // Map kernel at 0x8000_0000 -> 0x8000_0000
        let kernel_start = VirtAddr(0x8000_0000);
        let kernel_phys = PhysAddr(0x8000_0000);
        
        // Map first 64MB of kernel space
        for i in 0..16384 { // 64MB / 4KB = 16384 pages
            let vaddr = VirtAddr(kernel_start.0 + i * 4096);
            let paddr = PhysAddr(kernel_phys.0 + i * 4096);
            mmu.map_page(vaddr, paddr, PageFlags::KERNEL_RW)?;
        }

        // Activate the MMU
        mmu.activate();
        
        GLOBAL_MMU = Some(mmu);
    }

    Ok(())
}

/// Get reference to global MMU instance
pub fn get_mmu() -> &'static mut Sv48PageTable {
    unsafe {
        GLOBAL_MMU.as_mut().expect("MMU not initialized")
    }
}

/// Cache management for RISC-V
pub mod cache {
    use super::*;

    /// Cache-aware page allocation hint
    pub fn cache_aligned_alloc(size: usize) -> Option<PhysAddr> {
        // Align allocations to cache line boundaries (typically 64 bytes)
        let aligned_size = (size + 63) & !63;
        // Implementation would interface with page allocator
        // For now, return None
        None
    }

    /// Prefetch memory region for better cache performance
    pub fn prefetch_region(vaddr: VirtAddr, size: usize) {
        // RISC-V doesn't have standard prefetch instructions
        // But we can hint to hardware through access patterns
        let pages = (size + 4095) / 4096;
        for i in 0..pages {
            let addr = vaddr.0 + (i * 4096) as u64;
            unsafe {
                // Read first byte of each page to trigger cache load
                core::ptr::read_volatile(addr as *const u8);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vpn_extraction() {
        let pt = Sv48PageTable::new();
        let vaddr = VirtAddr(0x12345678_9ABC_D000);
        
        // Test VPN extraction for each level
        assert_eq!(pt.vpn_level(vaddr, 0), 0x1AD); // Bits [20:12]
        assert_eq!(pt.vpn_level(vaddr, 1), 0x1CF); // Bits [29:21]
        assert_eq!(pt.vpn_level(vaddr, 2), 0x0BC); // Bits [38:30]
        assert_eq!(pt.vpn_level(vaddr, 3), 0x048); // Bits [47:39]
    }

    #[test]
    fn test_page_flags() {
        let flags = PageFlags::KERNEL_RW;
        assert!(flags.0 & PageFlags::VALID.0 != 0);
        assert!(flags.0 & PageFlags::READ.0 != 0);
        assert!(flags.0 & PageFlags::WRITE.0 != 0);
    }
}