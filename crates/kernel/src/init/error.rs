/// Kernel initialization errors with detailed context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// Boot stack/vector/MMU bring-up failed
    BootFailed,
    /// Wrong exception level for the operation attempted
    InvalidExceptionLevel(u8),
    /// Heap allocator init or self-test failed
    HeapFailed,
    /// Physical frame allocator init failed
    FrameAllocFailed,
    /// Process table or scheduler init failed
    SchedFailed,
    /// VFS core init failed
    VfsFailed,
    /// A mount operation failed
    MountFailed,
    /// Interrupt controller (GIC/PLIC) init failed
    InterruptsFailed,
}

impl core::fmt::Display for InitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BootFailed => write!(f, "boot phase failed"),
            Self::InvalidExceptionLevel(el) => write!(f, "invalid exception level: EL{}", el),
            Self::HeapFailed => write!(f, "heap init failed"),
            Self::FrameAllocFailed => write!(f, "frame allocator init failed"),
            Self::SchedFailed => write!(f, "process/scheduler init failed"),
            Self::VfsFailed => write!(f, "VFS init failed"),
            Self::MountFailed => write!(f, "mount failed"),
            Self::InterruptsFailed => write!(f, "interrupt controller init failed"),
        }
    }
}

pub type InitResult<T> = core::result::Result<T, InitError>;
