//! RISC-V 64-bit (RV64GC) architecture support.

pub mod boot;          // Boot assembly and early initialization
pub mod mmu;           // Sv48 page tables
pub mod interrupts;    // PLIC-backed interrupt controller
pub mod context;       // Context switching
pub mod syscall;       // System call entry
pub mod trapframe;

pub mod boards {
    //! Board support packages for specific RISC-V implementations
    pub mod vikram3201;  // Vikram 3201 processor support
}

// Re-export key types for easier access
pub use mmu::{VirtAddr, PhysAddr, PageFlags, MmuError};
pub use interrupts::{InterruptController, InterruptError};
pub use trapframe::TrapFrame;

use core::arch::asm;

/// RISC-V architecture initialization
pub fn init() -> Result<(), ArchError> {
    mmu::init_mmu().map_err(|_| ArchError::MmuInitFailed)?;
    interrupts::init_interrupt_controller().map_err(|_| ArchError::InterruptInitFailed)?;

    if boards::vikram3201::detect_vikram3201() {
        boards::vikram3201::init_global_board().map_err(|_| ArchError::BoardInitFailed)?;
    }

    setup_trap_vector();
    enable_supervisor_features();

    Ok(())
}

/// Architecture-specific errors
#[derive(Debug, Clone, Copy)]
pub enum ArchError {
    MmuInitFailed,
    InterruptInitFailed,
    DtbInitFailed,
    BoardInitFailed,
    InvalidHartId,
    UnsupportedFeature,
}

/// Set up trap vector for exception and interrupt handling
fn setup_trap_vector() {
    extern "C" {
        fn riscv_trap_handler();
    }
    
    unsafe {
        asm!("csrw stvec, {}", in(reg) riscv_trap_handler as usize);
    }
}

/// Enable essential supervisor mode features
fn enable_supervisor_features() {
    unsafe {
        // Enable floating-point unit
        asm!("csrs sstatus, {}", in(reg) (1 << 13)); // FS = Initial
        
        // Vector extension is enabled in vector::init_vector_extension() if available
    }
}

/// Get current hart (hardware thread) ID
pub fn current_hart_id() -> usize {
    let hart_id: usize;
    unsafe {
        asm!("mv {}, tp", out(reg) hart_id);
    }
    hart_id
}

/// Alias for the scheduler's notion of "current CPU id" -- on RISC-V
/// that's the hart id stashed in `tp` at boot.
pub fn current_cpu_id() -> usize {
    current_hart_id()
}

/// Switch satp to point at `page_table` (a physical, page-aligned Sv48
/// root table address) in Sv48 mode, then flush the TLB.
pub fn switch_user_page_table(page_table: u64) {
    const SATP_MODE_SV48: u64 = 9 << 60;
    let ppn = page_table >> 12;
    unsafe {
        asm!(
            "csrw satp, {satp}",
            "sfence.vma",
            satp = in(reg) (SATP_MODE_SV48 | ppn),
            options(nostack)
        );
    }
}

/// Pending register state for the next `sret` back to userspace, staged
/// by the scheduler and consumed by the trap-return trampoline.
static PENDING_RETURN: spin::Mutex<Option<trapframe::TrapFrame>> = spin::Mutex::new(None);

pub fn restore_trap_frame(frame: &trapframe::TrapFrame) {
    *PENDING_RETURN.lock() = Some(*frame);
}

/// Get CPU frequency (to be implemented with board-specific detection)
pub fn cpu_frequency() -> u64 {
    // Default frequency for QEMU virt machine
    // Real implementation would read from device tree or CPUID
    1_000_000_000 // 1 GHz
}

/// Architecture-specific memory barriers
pub mod barriers {
    use core::arch::asm;
    
    /// Full memory barrier
    pub fn mb() {
        unsafe {
            asm!("fence rw,rw");
        }
    }
    
    /// Read memory barrier  
    pub fn rmb() {
        unsafe {
            asm!("fence r,r");
        }
    }
    
    /// Write memory barrier
    pub fn wmb() {
        unsafe {
            asm!("fence w,w");
        }
    }
    
    /// Instruction barrier
    pub fn isb() {
        unsafe {
            asm!("fence.i");
        }
    }
}

/// Architecture-specific atomic operations
pub mod atomics {
    use core::arch::asm;
    
    /// Atomic memory operation result
    pub struct AtomicResult<T> {
        pub value: T,
        pub success: bool,
    }
    
    /// Atomic compare and swap for u64
    pub fn atomic_cas_u64(ptr: *mut u64, expected: u64, desired: u64) -> AtomicResult<u64> {
        let mut result: u64;
        let mut success: u64;
        
        unsafe {
            asm!(
                "lr.d.aq {result}, ({ptr})",
                "bne {result}, {expected}, 1f", 
                "sc.d.rl {success}, {desired}, ({ptr})",
                "j 2f",
                "1: li {success}, 1",
                "2:",
                ptr = in(reg) ptr,
                expected = in(reg) expected,
                desired = in(reg) desired,
                result = out(reg) result,
                success = out(reg) success,
            );
        }
        
        AtomicResult {
            value: result,
            success: success == 0,
        }
    }
    
    /// Atomic fetch and add for u64
    pub fn atomic_fetch_add_u64(ptr: *mut u64, value: u64) -> u64 {
        let result: u64;
        
        unsafe {
            asm!(
                "amoadd.d.aq {result}, {value}, ({ptr})",
                ptr = in(reg) ptr,
                value = in(reg) value,
                result = out(reg) result,
            );
        }
        
        result
    }
}

/// Cache management operations
pub mod cache {
    use super::barriers;
    
    /// Cache line size (typical for RISC-V)
    pub const CACHE_LINE_SIZE: usize = 64;
    
    /// Flush instruction cache
    pub fn flush_icache() {
        barriers::isb();
    }
    
    /// Flush data cache for a memory range
    pub fn flush_dcache_range(_start: usize, _size: usize) {
        // RISC-V doesn't have standard cache management instructions
        // This would be board-specific in a real implementation
        barriers::mb();
    }
    
    /// Invalidate data cache for a memory range  
    pub fn invalidate_dcache_range(_start: usize, _size: usize) {
        // Board-specific implementation required
        barriers::mb();
    }
}

/// Performance monitoring and profiling support
pub mod perf {
    use core::arch::asm;
    
    /// Read cycle counter
    pub fn read_cycle_counter() -> u64 {
        let cycles: u64;
        unsafe {
            asm!("rdcycle {}", out(reg) cycles);
        }
        cycles
    }
    
    /// Read instruction counter
    pub fn read_instruction_counter() -> u64 {
        let instructions: u64;
        unsafe {
            asm!("rdinstret {}", out(reg) instructions);
        }
        instructions
    }
    
    /// Read time counter
    pub fn read_time_counter() -> u64 {
        let time: u64;
        unsafe {
            asm!("rdtime {}", out(reg) time);
        }
        time
    }
    
    /// Calculate instructions per cycle
    pub fn calculate_ipc() -> f64 {
        let instructions = read_instruction_counter() as f64;
        let cycles = read_cycle_counter() as f64;
        
        if cycles > 0.0 {
            instructions / cycles
        } else {
            0.0
        }
    }
}

/// Architecture information and capabilities
pub mod info {
    use core::arch::asm;
    
    /// RISC-V ISA string detection
    pub fn detect_isa_string() -> &'static str {
        // This would be read from device tree in real implementation
        "rv64imafdc" // Base ISA with common extensions
    }
    
    /// Check if specific extension is supported
    pub fn has_extension(ext: char) -> bool {
        let isa = detect_isa_string();
        isa.contains(ext)
    }
    
    /// Get hart count from device tree (simplified)
    pub fn hart_count() -> usize {
        // Would be read from device tree
        4 // Default for QEMU virt
    }
    
    /// Architecture identification for the shell
    pub fn arch_string() -> &'static str {
        "RISC-V RV64GC"
    }
    
    /// Exception level equivalent (RISC-V runs in supervisor mode)
    pub fn privilege_level() -> &'static str {
        "S-Mode (Supervisor)"
    }
}

/// Boot-time constants and addresses
pub mod constants {
    /// Kernel load address (standard RISC-V)
    pub const KERNEL_BASE: usize = 0x8000_0000;
    
    /// Stack size per hart
    pub const STACK_SIZE_PER_HART: usize = 4096;
    
    /// Maximum supported harts
    pub const MAX_HARTS: usize = 8;
    
    /// Page size (4KB standard)
    pub const PAGE_SIZE: usize = 4096;
    
    /// Device tree base address (passed by bootloader)
    pub const DTB_BASE_ADDR: usize = 0x8200_0000;
    
    /// Device tree maximum size
    pub const DTB_MAX_SIZE: usize = 64 * 1024; // 64KB
}

/// Early hardware detection and setup
pub fn early_hardware_init() {
    // This function is called from boot.S
    // Minimal hardware setup goes here
}

/// Main entry point for primary hart
///
/// Arch init (MMU, PLIC, board detection) runs inside `init::run`, not
/// here, so there's exactly one place that calls it.
#[no_mangle]
pub extern "C" fn riscv64_main(hart_id: usize, _dtb_ptr: usize) -> ! {
    // Store hart ID in thread pointer for easy access
    unsafe {
        asm!("mv tp, {}", in(reg) hart_id);
    }

    crate::main();
}

/// Entry point for secondary harts
#[no_mangle] 
pub extern "C" fn riscv64_secondary_main(hart_id: usize, _dtb_ptr: usize) -> ! {
    // Store hart ID
    unsafe {
        asm!("mv tp, {}", in(reg) hart_id);
    }
    
    // Initialize architecture for this hart
    if let Err(_) = init() {
        loop {
            unsafe {
                asm!("wfi");
            }
        }
    }
    
    // Secondary hart initialization complete
    // Enter idle loop or scheduler
    loop {
        unsafe {
            asm!("wfi");
        }
    }
}