// Kernel debugging utilities
// Phase A0 - Basic stubs, full implementation later

/// Print stack trace (stub for now - full implementation in later phases)
pub fn print_stack_trace() {
    crate::error!("Stack trace printing not yet implemented in Phase A0");
}

/// Resolve symbol from address (stub)
pub fn resolve_symbol(_addr: u64) -> &'static str {
    "<symbol resolution not implemented>"
}

/// Print CPU state (stub)
pub fn print_cpu_state() {
    crate::error!("CPU state dump not yet implemented in Phase A0");
}
