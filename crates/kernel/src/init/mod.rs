//! Kernel boot sequence.
//!
//! Each phase lives in its own module and runs exactly once, in order, on
//! the boot CPU. Secondary CPUs join through `smp`/`arch::*::smp` once
//! `run()` returns, not through this sequence.

mod error;
#[cfg(target_arch = "aarch64")]
mod boot;
#[cfg(target_arch = "aarch64")]
mod platform_init;
mod mm_init;
mod subsystems;
mod interrupts_init;
mod userspace_init;

pub use error::{InitError, InitResult};

/// Early-boot console write, before the scheduler or any blocking I/O path
/// exists. aarch64/riscv64 share the platform-described PL011 MMIO write;
/// x86_64 goes through the 16550 serial port already brought up by
/// `arch::x86_64::boot::early_init`.
#[cfg(target_arch = "x86_64")]
pub(super) unsafe fn early_print(msg: &[u8]) {
    crate::arch::serial::serial_write(msg);
}

#[cfg(target_arch = "aarch64")]
pub(super) unsafe fn early_print(msg: &[u8]) {
    let base = crate::platform::active().uart().base as *mut u32;
    for &b in msg {
        core::ptr::write_volatile(base, b as u32);
    }
}

#[cfg(target_arch = "riscv64")]
pub(super) unsafe fn early_print(_msg: &[u8]) {
    // No platform UART descriptor for riscv64 yet; boot proceeds silently.
}

/// Run the full boot sequence.
///
/// # Safety
/// Must be called exactly once, from the boot CPU, before any other
/// kernel code runs.
pub unsafe fn run() -> InitResult<()> {
    #[cfg(target_arch = "aarch64")]
    {
        boot::init_boot_phase()?;
        platform_init::init_platform()?;
    }

    #[cfg(target_arch = "riscv64")]
    crate::arch::riscv64::init().map_err(|_| InitError::BootFailed)?;

    #[cfg(target_arch = "x86_64")]
    crate::arch::x86_64::boot::early_init().map_err(|_| InitError::BootFailed)?;

    mm_init::init_memory()?;
    subsystems::init_core_subsystems()?;
    interrupts_init::init_smp_and_security()?;
    userspace_init::init_userspace()?;

    Ok(())
}
