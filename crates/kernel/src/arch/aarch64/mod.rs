// AArch64 architecture-specific code

pub mod trap;
pub mod timer;
pub mod psci;
pub mod gicv3;
pub mod smp;
pub mod serial;

pub use trap::*;
pub use psci::current_cpu_id;

/// Switch TTBR0_EL1 to `page_table` (a physical, page-aligned root table
/// address) and flush the TLB for the outgoing address space.
pub fn switch_user_page_table(page_table: u64) {
    unsafe {
        core::arch::asm!(
            "msr ttbr0_el1, {pt}",
            "isb",
            pt = in(reg) page_table,
            options(nostack)
        );
    }
    crate::mm::paging::flush_tlb_all();
}

/// Program ELR_EL1/SPSR_EL1/SP_EL0 so that the next `eret` out of the
/// current exception handler resumes `frame`'s saved context. Called by
/// the scheduler right before it returns control to the trap entry point.
pub fn restore_trap_frame(frame: &trap::TrapFrame) {
    unsafe {
        core::arch::asm!(
            "msr elr_el1, {pc}",
            "msr spsr_el1, {ps}",
            "msr sp_el0, {sp}",
            pc = in(reg) frame.pc,
            ps = in(reg) frame.pstate,
            sp = in(reg) frame.sp,
            options(nostack)
        );
    }
}
