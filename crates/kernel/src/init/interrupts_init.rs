//! Phase 4: interrupt controller, timer, and SMP bring-up
//!
//! - GICv3 (AArch64 generic interrupt controller) and its timer tick
//! - SMP run-queue and per-CPU state bring-up

use super::InitResult;

/// # Safety
/// Must be called after core subsystems (process table, scheduler, VFS).
pub unsafe fn init_smp_and_security() -> InitResult<()> {
    init_interrupts()?;
    init_smp_subsystem()?;
    Ok(())
}

/// Initialize the interrupt controller and arm the scheduler tick.
///
/// x86_64 and riscv64 bring up their interrupt controllers as part of
/// their own arch `init()` entry points; this phase only has AArch64-
/// specific work left to do.
unsafe fn init_interrupts() -> InitResult<()> {
    #[cfg(target_arch = "aarch64")]
    {
        crate::arch::aarch64::gicv3::init();
        crate::arch::aarch64::timer::init_timer(10);
    }
    Ok(())
}

/// Initialize SMP subsystem (run queues, per-CPU state)
unsafe fn init_smp_subsystem() -> InitResult<()> {
    crate::smp::init();
    Ok(())
}
