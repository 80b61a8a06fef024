//! Phase 5: userspace hand-off
//!
//! Creates PID 1 and hands it to the scheduler. What PID 1 actually runs
//! is userland's concern, not the kernel's; from here the boot CPU drops
//! into the idle loop and lets the scheduler take over.

use super::{InitError, InitResult};

/// Create and enqueue PID 1.
///
/// # Safety
/// Must be called after core subsystems (Phase 3) and interrupts (Phase 4).
pub unsafe fn init_userspace() -> InitResult<()> {
    create_init_process()?;
    enqueue_init_process()?;
    Ok(())
}

/// Create PID 1 (init process)
unsafe fn create_init_process() -> InitResult<()> {
    let init_task = crate::process::Task::new_init();
    crate::process::insert_task(init_task).map_err(|_| InitError::SchedFailed)?;
    Ok(())
}

/// Enqueue PID 1 to scheduler
unsafe fn enqueue_init_process() -> InitResult<()> {
    crate::process::scheduler::enqueue(1);
    crate::process::scheduler::set_current(1);
    Ok(())
}
