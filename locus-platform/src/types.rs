use gimli::RunTimeEndian;

/// Basic error types for platform-specific operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Unsupported architecture name
    UnsupportedArchitecture(String),
    /// Register number has no meaning on this architecture
    UnknownRegister { arch: Arch, dwarf_reg: u16 },
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformError::UnsupportedArchitecture(msg) => {
                write!(f, "Unsupported architecture: {msg}")
            }
            PlatformError::UnknownRegister { arch, dwarf_reg } => {
                write!(f, "Unknown DWARF register {dwarf_reg} for {arch}")
            }
        }
    }
}

impl std::error::Error for PlatformError {}

/// Architectures with built-in register tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Aarch64,
    /// AArch64 running big-endian (aarch64_be)
    Aarch64Be,
}

impl Arch {
    /// Byte order of memory and register contents
    pub fn byte_order(self) -> RunTimeEndian {
        match self {
            Arch::X86_64 | Arch::Aarch64 => RunTimeEndian::Little,
            Arch::Aarch64Be => RunTimeEndian::Big,
        }
    }

    /// Size in bytes of a target address
    pub fn address_size(self) -> u8 {
        8
    }

    /// Parse from a target triple prefix or short name
    pub fn from_name(name: &str) -> Result<Self, PlatformError> {
        match name.to_ascii_lowercase().as_str() {
            "x86_64" | "x86-64" | "amd64" => Ok(Arch::X86_64),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            "aarch64_be" => Ok(Arch::Aarch64Be),
            other => Err(PlatformError::UnsupportedArchitecture(other.to_string())),
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arch::X86_64 => write!(f, "x86_64"),
            Arch::Aarch64 => write!(f, "aarch64"),
            Arch::Aarch64Be => write!(f, "aarch64_be"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_from_name() {
        assert_eq!(Arch::from_name("amd64").unwrap(), Arch::X86_64);
        assert_eq!(Arch::from_name("ARM64").unwrap(), Arch::Aarch64);
        assert!(matches!(
            Arch::from_name("mips"),
            Err(PlatformError::UnsupportedArchitecture(_))
        ));
    }

    #[test]
    fn test_arch_byte_order() {
        assert_eq!(Arch::X86_64.byte_order(), RunTimeEndian::Little);
        assert_eq!(Arch::Aarch64Be.byte_order(), RunTimeEndian::Big);
        assert_eq!(Arch::Aarch64.address_size(), 8);
    }
}
