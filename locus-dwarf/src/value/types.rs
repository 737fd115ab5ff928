//! Minimal type model for values on the expression stack

use crate::core::{ExprError, Result};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Int,
    Char,
    Bool,
    Float,
    Enum,
    Range,
    Ptr,
    Func,
    Method,
    Struct,
    Array,
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type {
    pub code: TypeCode,
    /// Size in bytes
    pub length: usize,
    pub unsigned: bool,
    pub name: Option<String>,
    /// Pointee or element type
    pub target: Option<Arc<Type>>,
    /// Untyped DWARF stack value (the address-sized default type)
    generic: bool,
}

impl Type {
    pub fn new(code: TypeCode, length: usize, unsigned: bool, name: Option<&str>) -> Self {
        Self {
            code,
            length,
            unsigned,
            name: name.map(str::to_string),
            target: None,
            generic: false,
        }
    }

    pub fn int(length: usize, unsigned: bool) -> Arc<Type> {
        let name = match (length, unsigned) {
            (1, false) => "signed char",
            (1, true) => "unsigned char",
            (2, false) => "short",
            (2, true) => "unsigned short",
            (4, false) => "int",
            (4, true) => "unsigned int",
            (8, false) => "long",
            (8, true) => "unsigned long",
            (16, false) => "__int128",
            (16, true) => "unsigned __int128",
            _ => "integer",
        };
        Arc::new(Type::new(TypeCode::Int, length, unsigned, Some(name)))
    }

    pub fn float(length: usize) -> Arc<Type> {
        let name = if length == 4 { "float" } else { "double" };
        Arc::new(Type::new(TypeCode::Float, length, false, Some(name)))
    }

    pub fn pointer(target: Arc<Type>, length: usize) -> Arc<Type> {
        let mut ty = Type::new(TypeCode::Ptr, length, true, None);
        ty.target = Some(target);
        Arc::new(ty)
    }

    pub fn structure(name: &str, length: usize) -> Arc<Type> {
        Arc::new(Type::new(TypeCode::Struct, length, false, Some(name)))
    }

    pub fn function(name: &str) -> Arc<Type> {
        Arc::new(Type::new(TypeCode::Func, 1, false, Some(name)))
    }

    pub fn void() -> Arc<Type> {
        Arc::new(Type::new(TypeCode::Void, 1, false, Some("void")))
    }

    /// Default stack type: a signed integer of the unit's address size
    pub fn address(addr_size: u8) -> Result<Arc<Type>> {
        let name = match addr_size {
            2 => "<signed DWARF address type 16>",
            4 => "<signed DWARF address type 32>",
            8 => "<signed DWARF address type 64>",
            _ => {
                return Err(ExprError::UnsupportedAddressSize {
                    bits: 8 * u32::from(addr_size),
                })
            }
        };
        let mut ty = Type::new(TypeCode::Int, addr_size as usize, false, Some(name));
        ty.generic = true;
        Ok(Arc::new(ty))
    }

    pub fn is_generic(&self) -> bool {
        self.generic
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self.code,
            TypeCode::Int | TypeCode::Char | TypeCode::Bool | TypeCode::Enum | TypeCode::Range
        )
    }

    pub fn is_scalar(&self) -> bool {
        self.is_integral() || matches!(self.code, TypeCode::Float | TypeCode::Ptr)
    }

    pub fn is_code(&self) -> bool {
        matches!(self.code, TypeCode::Func | TypeCode::Method)
    }

    /// Two DWARF base types are interchangeable on the stack
    pub fn base_types_equal(&self, other: &Type) -> bool {
        self.code == other.code && self.unsigned == other.unsigned && self.length == other.length
    }

    /// Same-sized integer type with the opposite signedness when needed
    pub fn unsigned_variant(&self) -> Arc<Type> {
        if self.unsigned {
            return Arc::new(self.clone());
        }
        let mut ty = self.clone();
        ty.unsigned = true;
        ty.generic = false;
        ty.name = Some(match self.length {
            1 => "unsigned char".to_string(),
            2 => "unsigned short".to_string(),
            4 => "unsigned int".to_string(),
            8 => "unsigned long".to_string(),
            n => format!("unsigned integer{}", 8 * n),
        });
        Arc::new(ty)
    }

    pub fn signed_variant(&self) -> Arc<Type> {
        if !self.unsigned {
            return Arc::new(self.clone());
        }
        let mut ty = self.clone();
        ty.unsigned = false;
        ty.generic = false;
        ty.name = Some(match self.length {
            1 => "signed char".to_string(),
            2 => "short".to_string(),
            4 => "int".to_string(),
            8 => "long".to_string(),
            n => format!("integer{}", 8 * n),
        });
        Arc::new(ty)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, self.code, &self.target) {
            (Some(name), _, _) => write!(f, "{name}"),
            (None, TypeCode::Ptr, Some(target)) => write!(f, "{target} *"),
            (None, code, _) => write!(f, "<{:?}:{}>", code, self.length),
        }
    }
}
