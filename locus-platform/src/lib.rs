/// Platform-specific descriptors for the locus DWARF expression evaluator
///
/// This crate provides:
/// - DWARF register names and sizes per architecture
/// - The stack pointer register used by call-site and frame-base matching
/// - Architecture descriptors (byte order, address size)
pub mod register_mapping;
pub mod types;

// Re-export key types for convenience
pub use register_mapping::{
    dwarf_reg_size, dwarf_reg_to_name, dwarf_reg_to_name_aarch64, dwarf_reg_to_name_x86_64,
    stack_pointer_register,
};
pub use types::{Arch, PlatformError};
