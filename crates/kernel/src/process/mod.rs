//! Process and thread management.
//!
//! Owns the global PID table, the per-CPU scheduler, and the fork/exec/exit
//! machinery that operates on it. Submodules are kept small and composed
//! through this file rather than duplicating the table/lookup logic.

pub mod exec;
pub mod fork;
pub mod pid;
pub mod scheduler;
pub mod signal;
pub mod task;
pub mod wait;

pub use pid::{alloc_pid, get_process_table, init_process_table, insert_task, PidTable};
pub use task::{Credentials, FileTable, MemoryManager, ProcessState, Task, Vma, VmaFlags};

/// Process ID type, shared by every submodule.
pub type Pid = u32;

/// PID of the current task on this CPU, falling back to init (PID 1)
/// before the scheduler has picked anything.
pub fn current_pid() -> Pid {
    scheduler::current_pid().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_current_pid_is_init() {
        assert_eq!(current_pid(), 1);
    }
}
