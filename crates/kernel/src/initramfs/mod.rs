//! Initial RAM filesystem unpacking (cpio newc format).

pub mod newc;

pub use newc::unpack_initramfs;
