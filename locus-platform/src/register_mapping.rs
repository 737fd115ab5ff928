/// DWARF register tables per architecture
///
/// Location expressions name registers by their DWARF number. These tables
/// give the human-readable name and the raw size of each register so that
/// diagnostics and register-piece arithmetic agree with the target's layout.
use crate::types::Arch;
use tracing::warn;

/// Convert DWARF register number to register name for x86_64
///
/// Reference: System V AMD64 psABI, "DWARF Register Number Mapping".
pub fn dwarf_reg_to_name_x86_64(dwarf_reg: u16) -> Option<&'static str> {
    const XMM: [&str; 16] = [
        "XMM0", "XMM1", "XMM2", "XMM3", "XMM4", "XMM5", "XMM6", "XMM7", "XMM8", "XMM9", "XMM10",
        "XMM11", "XMM12", "XMM13", "XMM14", "XMM15",
    ];
    const ST: [&str; 8] = ["ST0", "ST1", "ST2", "ST3", "ST4", "ST5", "ST6", "ST7"];
    const MM: [&str; 8] = ["MM0", "MM1", "MM2", "MM3", "MM4", "MM5", "MM6", "MM7"];

    match dwarf_reg {
        0 => Some("RAX"),  // DWARF 0 = RAX
        1 => Some("RDX"),  // DWARF 1 = RDX
        2 => Some("RCX"),  // DWARF 2 = RCX
        3 => Some("RBX"),  // DWARF 3 = RBX
        4 => Some("RSI"),  // DWARF 4 = RSI
        5 => Some("RDI"),  // DWARF 5 = RDI
        6 => Some("RBP"),  // DWARF 6 = RBP
        7 => Some("RSP"),  // DWARF 7 = RSP
        8 => Some("R8"),   // DWARF 8 = R8
        9 => Some("R9"),   // DWARF 9 = R9
        10 => Some("R10"), // DWARF 10 = R10
        11 => Some("R11"), // DWARF 11 = R11
        12 => Some("R12"), // DWARF 12 = R12
        13 => Some("R13"), // DWARF 13 = R13
        14 => Some("R14"), // DWARF 14 = R14
        15 => Some("R15"), // DWARF 15 = R15
        16 => Some("RIP"), // DWARF 16 = return address
        17..=32 => Some(XMM[(dwarf_reg - 17) as usize]),
        33..=40 => Some(ST[(dwarf_reg - 33) as usize]),
        41..=48 => Some(MM[(dwarf_reg - 41) as usize]),
        49 => Some("RFLAGS"),
        _ => None,
    }
}

/// Convert DWARF register number to register name for AArch64
///
/// Reference: "DWARF for the Arm 64-bit Architecture", section 4.1.
pub fn dwarf_reg_to_name_aarch64(dwarf_reg: u16) -> Option<&'static str> {
    const X: [&str; 31] = [
        "X0", "X1", "X2", "X3", "X4", "X5", "X6", "X7", "X8", "X9", "X10", "X11", "X12", "X13",
        "X14", "X15", "X16", "X17", "X18", "X19", "X20", "X21", "X22", "X23", "X24", "X25",
        "X26", "X27", "X28", "X29", "X30",
    ];
    const V: [&str; 32] = [
        "V0", "V1", "V2", "V3", "V4", "V5", "V6", "V7", "V8", "V9", "V10", "V11", "V12", "V13",
        "V14", "V15", "V16", "V17", "V18", "V19", "V20", "V21", "V22", "V23", "V24", "V25",
        "V26", "V27", "V28", "V29", "V30", "V31",
    ];

    match dwarf_reg {
        0..=30 => Some(X[dwarf_reg as usize]),
        31 => Some("SP"),
        32 => Some("PC"),
        64..=95 => Some(V[(dwarf_reg - 64) as usize]),
        _ => None,
    }
}

/// Convert DWARF register number to register name for the given architecture
pub fn dwarf_reg_to_name(arch: Arch, dwarf_reg: u16) -> Option<&'static str> {
    match arch {
        Arch::X86_64 => dwarf_reg_to_name_x86_64(dwarf_reg),
        Arch::Aarch64 | Arch::Aarch64Be => dwarf_reg_to_name_aarch64(dwarf_reg),
    }
}

/// Raw size in bytes of a DWARF register
pub fn dwarf_reg_size(arch: Arch, dwarf_reg: u16) -> Option<usize> {
    let size = match arch {
        Arch::X86_64 => match dwarf_reg {
            0..=16 => 8,
            17..=32 => 16,
            33..=40 => 10,
            41..=48 => 8,
            49 => 8,
            _ => 0,
        },
        Arch::Aarch64 | Arch::Aarch64Be => match dwarf_reg {
            0..=32 => 8,
            64..=95 => 16,
            _ => 0,
        },
    };

    if size == 0 {
        warn!("Unknown DWARF register {} for {}", dwarf_reg, arch);
        None
    } else {
        Some(size)
    }
}

/// DWARF number of the stack pointer register
pub fn stack_pointer_register(arch: Arch) -> u16 {
    match arch {
        Arch::X86_64 => 7,
        Arch::Aarch64 | Arch::Aarch64Be => 31,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x86_64_dwarf_to_name_mapping() {
        // Test core registers
        assert_eq!(dwarf_reg_to_name_x86_64(0), Some("RAX"));
        assert_eq!(dwarf_reg_to_name_x86_64(1), Some("RDX"));
        assert_eq!(dwarf_reg_to_name_x86_64(4), Some("RSI"));
        assert_eq!(dwarf_reg_to_name_x86_64(5), Some("RDI"));
        assert_eq!(dwarf_reg_to_name_x86_64(6), Some("RBP"));
        assert_eq!(dwarf_reg_to_name_x86_64(7), Some("RSP"));

        // Test extended registers
        assert_eq!(dwarf_reg_to_name_x86_64(8), Some("R8"));
        assert_eq!(dwarf_reg_to_name_x86_64(13), Some("R13"));
        assert_eq!(dwarf_reg_to_name_x86_64(15), Some("R15"));

        // Test vector and x87 registers
        assert_eq!(dwarf_reg_to_name_x86_64(17), Some("XMM0"));
        assert_eq!(dwarf_reg_to_name_x86_64(32), Some("XMM15"));
        assert_eq!(dwarf_reg_to_name_x86_64(33), Some("ST0"));

        // Test invalid register
        assert_eq!(dwarf_reg_to_name_x86_64(99), None);
    }

    #[test]
    fn test_aarch64_dwarf_to_name_mapping() {
        assert_eq!(dwarf_reg_to_name_aarch64(0), Some("X0"));
        assert_eq!(dwarf_reg_to_name_aarch64(29), Some("X29"));
        assert_eq!(dwarf_reg_to_name_aarch64(31), Some("SP"));
        assert_eq!(dwarf_reg_to_name_aarch64(64), Some("V0"));
        assert_eq!(dwarf_reg_to_name_aarch64(40), None);
    }

    #[test]
    fn test_dwarf_reg_size() {
        assert_eq!(dwarf_reg_size(Arch::X86_64, 3), Some(8));
        assert_eq!(dwarf_reg_size(Arch::X86_64, 17), Some(16));
        assert_eq!(dwarf_reg_size(Arch::X86_64, 34), Some(10));
        assert_eq!(dwarf_reg_size(Arch::Aarch64, 95), Some(16));
        assert_eq!(dwarf_reg_size(Arch::X86_64, 99), None);
    }

    #[test]
    fn test_stack_pointer_register() {
        assert_eq!(stack_pointer_register(Arch::X86_64), 7);
        assert_eq!(
            dwarf_reg_to_name(Arch::Aarch64, stack_pointer_register(Arch::Aarch64)),
            Some("SP")
        );
    }
}
