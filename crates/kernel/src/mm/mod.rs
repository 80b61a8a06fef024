/// Memory management subsystem
///
/// - Physical frame allocation (bitmap + next-fit, see `frame`)
/// - 4-level page tables and PTE flags (`paging`)
/// - Virtual memory areas and address space layout (`address_space`)
/// - Page fault handling with COW and lazy allocation (`fault`)

pub mod page;
pub mod frame;
pub mod paging;
pub mod address_space;
pub mod fault;

pub use page::{
    PhysAddr, Pfn, Page, PageFlags,
    pa_to_pfn, pfn_to_pa,
    page_align_down, page_align_up,
};

pub use frame::{
    init_frame_allocator, alloc_page, alloc_pages,
    free_page, free_pages, share_page, refcount, get_stats, AllocStats,
};

pub use paging::{
    PAGE_SIZE, PAGE_SHIFT, KERNEL_BASE,
    PteFlags, Pte, PageTable,
    alloc_user_page_table, map_page, unmap_page, get_pte,
    copy_page_table_for_fork, free_page_table,
    flush_tlb, flush_tlb_all,
};

pub use address_space::{
    USER_STACK_TOP, USER_STACK_SIZE,
    USER_HEAP_START, USER_MMAP_BASE,
    is_aslr_enabled, randomize_address_space,
};

pub use fault::{
    handle_page_fault, setup_cow_for_fork,
    FaultType, parse_fault_type, is_write_fault,
};

/// Switch the running CPU's user translation base (TTBR0_EL1 on AArch64,
/// CR3 on x86_64) to `page_table`'s physical address. Called by the
/// scheduler on every context switch that changes address space.
pub fn switch_user_mm(page_table: u64) {
    crate::arch::switch_user_page_table(page_table);
}
