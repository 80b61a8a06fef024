//! Platform initialization.
//!
//! Platform detection, early UART console bring-up, and boot timestamp
//! recording. Must complete before any multi-threading or SMP init.

use super::{early_print as uart_print, InitResult};

/// Detect the platform.
///
/// Device-tree parsing is out of scope here; the platform descriptor table
/// in `crate::platform` is fixed at build time and this just confirms it's
/// reachable before UART/time init depend on it.
///
/// # Safety
/// Must be called once during early boot.
pub unsafe fn detect_platform() -> InitResult<()> {
    uart_print(b"PLATFORM: DETECTING\n");
    let _ = crate::platform::active();
    uart_print(b"PLATFORM: QEMU VIRT (DEFAULT)\n");
    Ok(())
}

/// # Safety
/// Must be called after platform detection.
pub unsafe fn init_uart() -> InitResult<()> {
    uart_print(b"UART: INIT\n");
    crate::uart::init();
    uart_print(b"UART: READY\n");
    Ok(())
}

/// Record the boot timestamp.
///
/// # Safety
/// Must be called after UART init.
pub unsafe fn init_time() -> InitResult<()> {
    uart_print(b"TIME: INIT\n");
    crate::time::init_boot_timestamp();
    uart_print(b"TIME: READY\n");
    Ok(())
}

/// Run platform init in order: detection, UART, time.
///
/// # Safety
/// Must be called once after the boot phase completes.
pub unsafe fn init_platform() -> InitResult<()> {
    detect_platform()?;
    init_uart()?;
    init_time()?;
    Ok(())
}
