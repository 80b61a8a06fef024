//! Saved register state for a trap/interrupt on RISC-V64.
//!
//! Mirrors the shape used by the other architectures (pc/sp/pstate plus the
//! return-value register) so arch-neutral code can restore a task's context
//! without caring which backend produced it.

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub pc: u64,
    pub sp: u64,
    pub pstate: u64,
    pub x0: u64,
}

impl TrapFrame {
    pub const fn new(pc: u64, sp: u64, pstate: u64) -> Self {
        Self { pc, sp, pstate, x0: 0 }
    }
}
