//! Platform abstraction layer for hardware-neutral bring-up.
//! Provides device descriptors and memory ranges. Default implementation targets QEMU virt.

#![allow(dead_code)]

/// UART descriptor
#[derive(Copy, Clone)]
pub struct UartDesc {
    pub base: usize,
    pub clock_hz: u32,
}

/// GICv3 descriptor
#[derive(Copy, Clone)]
pub struct GicDesc {
    pub gicd: usize,
    pub gicr: usize,
}

/// Generic timer descriptor
#[derive(Copy, Clone)]
pub struct TimerDesc {
    pub freq_hz: u64,
}

/// MMIO range descriptor
#[derive(Copy, Clone)]
pub struct MmioRange {
    pub start: usize,
    pub size: usize,
    pub device: bool,
}

/// RAM range descriptor
#[derive(Copy, Clone)]
pub struct RamRange {
    pub start: usize,
    pub size: usize,
}

/// Platform trait provides device descriptors and ranges.
pub trait Platform {
    fn uart(&self) -> UartDesc;
    fn gic(&self) -> GicDesc;
    fn timer(&self) -> TimerDesc;
    fn mmio_ranges(&self) -> &'static [MmioRange];
    fn ram_ranges(&self) -> &'static [RamRange];
    fn psci_available(&self) -> bool { false }
    /// Optional hint for VirtIO MMIO layout: (base, per-device size, irq_base)
    fn virtio_mmio_hint(&self) -> Option<(usize, usize, u32)> { None }
}

pub mod qemu_virt;

/// Return the active platform implementation. Device-tree parsing lives
/// outside the kernel (bootloader/firmware concern); this always resolves
/// to the QEMU virt descriptor table baked in at build time.
pub fn active() -> &'static dyn Platform {
    &qemu_virt::INSTANCE
}
