/// Virtual memory area (VMA) management
///
/// Manages the virtual address space of a process, including
/// memory mappings for text, data, heap, stack, and memory-mapped files.

use crate::process::{Vma, VmaFlags, MemoryManager};
use crate::lib::error::{KernelError, Errno};
use super::paging::{PAGE_SIZE, KERNEL_BASE, PteFlags, get_pte, map_page, unmap_page};
use super::frame::free_page;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// PTE permission bits matching a VMA's READ/WRITE/EXEC flags. Mirrors the
/// flag selection `fault::handle_lazy_fault` uses when first populating a
/// page, so mprotect and the lazy-fault path never disagree on what a given
/// VmaFlags combination means in PTE terms.
fn pte_flags_for(flags: VmaFlags) -> PteFlags {
    if flags.contains(VmaFlags::WRITE) {
        PteFlags::user_rw()
    } else if flags.contains(VmaFlags::EXEC) {
        PteFlags::user_rx()
    } else {
        PteFlags::user_ro()
    }
}

/// User address space layout constants
pub const USER_STACK_TOP: u64 = 0x0000_7FFF_FFFF_F000;
pub const USER_STACK_SIZE: u64 = 8 * 1024 * 1024; // 8MB default
pub const USER_HEAP_START: u64 = 0x0000_5555_5600_0000;
pub const USER_MMAP_BASE: u64 = 0x0000_7000_0000_0000;

/// Whether newly created user address spaces get their heap/mmap/stack
/// bases perturbed. Enabled by default; a kernel command-line switch or
/// debug build can flip this off for reproducible test runs.
static ASLR_ENABLED: AtomicBool = AtomicBool::new(true);

/// xorshift64* state, reseeded from the PID and a running counter since
/// there's no arch-neutral hardware entropy source wired in yet.
static ASLR_STATE: AtomicU64 = AtomicU64::new(0x9E3779B97F4A7C15);

pub fn is_aslr_enabled() -> bool {
    ASLR_ENABLED.load(Ordering::Relaxed)
}

pub fn set_aslr_enabled(enabled: bool) {
    ASLR_ENABLED.store(enabled, Ordering::Relaxed);
}

fn next_rand() -> u64 {
    let mut x = ASLR_STATE.fetch_add(0x9E3779B97F4A7C15, Ordering::Relaxed);
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    x.wrapping_mul(0x2545F4914F6CDD1D)
}

/// Pick randomized stack/heap/mmap bases for a fresh address space,
/// returning `(stack_top, heap_start, mmap_base)`. Each is slid by a
/// random, page-aligned offset off the default layout; there's no
/// arch-neutral hardware entropy source wired in yet, so the generator
/// is a software xorshift64* reseeded every call.
pub fn randomize_address_space() -> (u64, u64, u64) {
    const SLIDE_MASK: u64 = (256 * 1024 * 1024) - 1; // up to 256MB slide
    let page_mask = !(PAGE_SIZE as u64 - 1);

    let stack_slide = (next_rand() & SLIDE_MASK & page_mask) / 16;
    let heap_slide = next_rand() & SLIDE_MASK & page_mask;
    let mmap_slide = next_rand() & SLIDE_MASK & page_mask;

    (
        USER_STACK_TOP.wrapping_sub(stack_slide),
        USER_HEAP_START.wrapping_add(heap_slide),
        USER_MMAP_BASE.wrapping_add(mmap_slide),
    )
}

impl MemoryManager {
    /// Create a new empty address space
    pub fn new() -> Self {
        Self {
            page_table: 0,
            brk: USER_HEAP_START,
            brk_start: USER_HEAP_START,
            stack_top: USER_STACK_TOP,
            mmap_base: USER_MMAP_BASE,
            vmas: Vec::new(),
        }
    }

    /// Find VMA containing the given address
    pub fn find_vma(&self, addr: u64) -> Option<&Vma> {
        self.vmas.iter().find(|vma| addr >= vma.start && addr < vma.end)
    }

    /// Find VMA containing the given address (mutable)
    pub fn find_vma_mut(&mut self, addr: u64) -> Option<&mut Vma> {
        self.vmas.iter_mut().find(|vma| addr >= vma.start && addr < vma.end)
    }

    /// Check if a region overlaps with existing VMAs
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.vmas.iter().any(|vma| {
            !(end <= vma.start || start >= vma.end)
        })
    }

    /// Insert a new VMA (sorted by start address)
    pub fn insert_vma(&mut self, vma: Vma) -> Result<(), KernelError> {
        // Check for overlaps
        if self.overlaps(vma.start, vma.end) {
            return Err(KernelError::InvalidArgument);
        }

        // Find insertion point to keep VMAs sorted
        let pos = self.vmas.iter().position(|v| v.start > vma.start)
            .unwrap_or(self.vmas.len());

        self.vmas.insert(pos, vma);
        Ok(())
    }

    /// Remove a VMA
    pub fn remove_vma(&mut self, start: u64) -> Option<Vma> {
        if let Some(pos) = self.vmas.iter().position(|v| v.start == start) {
            Some(self.vmas.remove(pos))
        } else {
            None
        }
    }

    /// Extend the heap (brk syscall)
    pub fn do_brk(&mut self, new_brk: u64) -> Result<u64, Errno> {
        // Validate new brk
        if new_brk < self.brk_start {
            return Err(Errno::EINVAL);
        }

        // Check if new brk overlaps with other VMAs
        if new_brk > self.brk {
            // Expanding heap
            if self.overlaps(self.brk, new_brk) {
                return Err(Errno::ENOMEM);
            }
        }

        // Update brk
        self.brk = new_brk;
        Ok(self.brk)
    }

    /// Map anonymous memory (mmap syscall)
    pub fn do_mmap(
        &mut self,
        addr: u64,
        length: u64,
        prot: i32,
        flags: i32,
    ) -> Result<u64, Errno> {
        // Round up length to page size
        let length = (length + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);

        // Determine start address
        let start = if addr != 0 {
            // Fixed address requested
            addr
        } else {
            // Find free space
            self.find_free_region(length)?
        };

        // Convert prot flags to VmaFlags
        let mut vma_flags = VmaFlags::ANONYMOUS;
        if (prot & 0x1) != 0 { vma_flags |= VmaFlags::READ; }
        if (prot & 0x2) != 0 { vma_flags |= VmaFlags::WRITE; }
        if (prot & 0x4) != 0 { vma_flags |= VmaFlags::EXEC; }
        if (flags & 0x01) != 0 { vma_flags |= VmaFlags::SHARED; }

        // Create VMA
        let vma = Vma {
            start,
            end: start + length,
            flags: vma_flags,
            offset: 0,
        };

        self.insert_vma(vma).map_err(|_| Errno::ENOMEM)?;
        Ok(start)
    }

    /// Change protection flags on an existing mapping (mprotect syscall)
    ///
    /// The target range must lie entirely within a single existing VMA. If
    /// it doesn't cover that VMA's full extent, the VMA is split into up to
    /// three pieces so only `[addr, addr+length)` carries the new flags.
    /// Every already-mapped page in the range gets its PTE permission bits
    /// updated and its TLB entry invalidated (via `map_page`/`unmap_page`,
    /// which both flush on every call).
    pub fn do_mprotect(&mut self, addr: u64, length: u64, prot: i32) -> Result<(), Errno> {
        let length = (length + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
        let end = addr + length;

        let idx = self.vmas.iter()
            .position(|v| addr >= v.start && addr < v.end)
            .ok_or(Errno::ENOMEM)?;
        if end > self.vmas[idx].end {
            return Err(Errno::ENOMEM);
        }

        let old = self.vmas[idx].clone();
        let mut new_flags = old.flags & !(VmaFlags::READ | VmaFlags::WRITE | VmaFlags::EXEC);
        if (prot & 0x1) != 0 { new_flags |= VmaFlags::READ; }
        if (prot & 0x2) != 0 { new_flags |= VmaFlags::WRITE; }
        if (prot & 0x4) != 0 { new_flags |= VmaFlags::EXEC; }

        self.vmas.remove(idx);
        if old.start < addr {
            self.vmas.push(Vma { start: old.start, end: addr, flags: old.flags, offset: old.offset });
        }
        self.vmas.push(Vma {
            start: addr,
            end,
            flags: new_flags,
            offset: old.offset + (addr - old.start),
        });
        if end < old.end {
            self.vmas.push(Vma {
                start: end,
                end: old.end,
                flags: old.flags,
                offset: old.offset + (end - old.start),
            });
        }
        self.vmas.sort_by_key(|v| v.start);

        let mut target = pte_flags_for(new_flags);
        let mut page = addr;
        while page < end {
            if let Some(pte) = get_pte(self.page_table, page) {
                // A page still mid-COW stays read-only regardless of the
                // requested protection; the fault handler restores real
                // write access once the copy happens.
                if pte.flags().is_cow() {
                    target.insert(PteFlags::READONLY | PteFlags::COW);
                }
                map_page(self.page_table, page, pte.phys_addr(), target)?;
            }
            page += PAGE_SIZE as u64;
        }
        Ok(())
    }

    /// Unmap memory region (munmap syscall). Releases the backing frame of
    /// every mapped page in range (respecting COW refcounts via
    /// `frame::free_page`) and invalidates their TLB entries before
    /// dropping the covering VMAs.
    pub fn do_munmap(&mut self, addr: u64, length: u64) -> Result<(), Errno> {
        // Round up length to page size
        let length = (length + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
        let end = addr + length;

        let mut page = addr;
        while page < end {
            if let Some(pte) = get_pte(self.page_table, page) {
                unmap_page(self.page_table, page);
                free_page(pte.phys_addr());
            }
            page += PAGE_SIZE as u64;
        }

        // Find and remove overlapping VMAs
        self.vmas.retain(|vma| {
            // Keep VMA if it doesn't overlap
            !(addr < vma.end && end > vma.start)
        });

        Ok(())
    }

    /// Find a free region of the given size
    fn find_free_region(&self, size: u64) -> Result<u64, Errno> {
        let mut addr = self.mmap_base;

        for vma in &self.vmas {
            if vma.start >= self.mmap_base {
                if vma.start - addr >= size {
                    return Ok(addr);
                }
                addr = vma.end;
            }
        }

        // Check if we have space after the last VMA
        if KERNEL_BASE - addr >= size {
            Ok(addr)
        } else {
            Err(Errno::ENOMEM)
        }
    }

    /// Set up initial user stack
    pub fn setup_stack(&mut self) -> Result<(), KernelError> {
        let stack_start = self.stack_top - USER_STACK_SIZE;
        let vma = Vma {
            start: stack_start,
            end: self.stack_top,
            flags: VmaFlags::READ | VmaFlags::WRITE | VmaFlags::ANONYMOUS,
            offset: 0,
        };
        self.insert_vma(vma)?;
        Ok(())
    }
}
