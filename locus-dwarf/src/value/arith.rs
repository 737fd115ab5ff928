//! Scalar arithmetic on stack values

use super::bits::{extract_signed, extract_unsigned, store_unsigned};
use super::{Type, TypeCode, Value};
use crate::core::{ExprError, Result};
use std::cmp::Ordering;
use std::sync::Arc;

/// Binary operators of the expression machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy)]
enum Scalar {
    Int(i128),
    Float(f64),
}

fn is_unsigned(ty: &Type) -> bool {
    ty.unsigned || ty.code == TypeCode::Ptr
}

impl Value {
    fn scalar(&self) -> Result<Scalar> {
        let bytes = self.contents()?;
        let ty = self.ty();
        match ty.code {
            TypeCode::Float => {
                let raw = extract_unsigned(bytes, self.byte_order());
                match ty.length {
                    4 => Ok(Scalar::Float(f64::from(f32::from_bits(raw as u32)))),
                    8 => Ok(Scalar::Float(f64::from_bits(raw as u64))),
                    n => Err(ExprError::TypeError(format!(
                        "unsupported floating-point size {n}"
                    ))),
                }
            }
            _ if ty.length > 16 => Err(ExprError::TypeError(
                "That operation is not available on integers of more than 16 bytes.".into(),
            )),
            TypeCode::Ptr => Ok(Scalar::Int(extract_unsigned(bytes, self.byte_order()) as i128)),
            _ if ty.is_integral() => Ok(Scalar::Int(if ty.unsigned {
                extract_unsigned(bytes, self.byte_order()) as i128
            } else {
                extract_signed(bytes, self.byte_order())
            })),
            _ => Err(ExprError::TypeError(
                "Value can't be converted to integer.".into(),
            )),
        }
    }

    fn from_scalar(ty: Arc<Type>, scalar: Scalar, byte_order: gimli::RunTimeEndian) -> Result<Value> {
        let mut value = Value::allocate(ty, byte_order);
        let ty = value.ty().clone();
        match (ty.code, scalar) {
            (TypeCode::Float, s) => {
                let f = match s {
                    Scalar::Float(f) => f,
                    Scalar::Int(i) if is_unsigned(&ty) => i as u128 as f64,
                    Scalar::Int(i) => i as f64,
                };
                let raw = match ty.length {
                    4 => u128::from((f as f32).to_bits()),
                    8 => u128::from(f.to_bits()),
                    n => {
                        return Err(ExprError::TypeError(format!(
                            "unsupported floating-point size {n}"
                        )))
                    }
                };
                store_unsigned(value.contents_raw_mut(), byte_order, raw);
            }
            (code, s) if ty.is_integral() || code == TypeCode::Ptr => {
                let i = match s {
                    Scalar::Int(i) => i,
                    Scalar::Float(f) => f as i128,
                };
                store_unsigned(value.contents_raw_mut(), byte_order, i as u128);
            }
            _ => {
                return Err(ExprError::TypeError(format!(
                    "Invalid cast to {}",
                    ty
                )))
            }
        }
        Ok(value)
    }

    /// Value as a signed integer, truncating floats
    pub fn as_long(&self) -> Result<i64> {
        Ok(match self.scalar()? {
            Scalar::Int(i) => i as i64,
            Scalar::Float(f) => f as i64,
        })
    }

    /// Value as a target address
    pub fn as_address(&self) -> Result<u64> {
        Ok(match self.scalar()? {
            Scalar::Int(i) => i as u64,
            Scalar::Float(f) => f as i64 as u64,
        })
    }

    /// Numeric conversion to `ty`
    pub fn cast(&self, ty: &Arc<Type>) -> Result<Value> {
        if self.ty().as_ref() == ty.as_ref() {
            return Ok(self.clone());
        }
        Value::from_scalar(ty.clone(), self.scalar()?, self.byte_order())
    }

    /// Same bytes viewed as `ty`
    pub fn reinterpret(&self, ty: &Arc<Type>) -> Result<Value> {
        let bytes = self.contents()?;
        Ok(Value::from_bytes(ty.clone(), bytes, self.byte_order()))
    }

    pub fn binop(&self, rhs: &Value, op: BinOp) -> Result<Value> {
        let ty = self.ty().clone();
        let result = match (self.scalar()?, rhs.scalar()?) {
            (Scalar::Int(a), Scalar::Int(b)) => Scalar::Int(int_binop(&ty, a, b, op)?),
            (a, b) => {
                let (a, b) = (as_float(a), as_float(b));
                Scalar::Float(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    _ => {
                        return Err(ExprError::TypeError(format!(
                            "Integer-only operation {op:?}."
                        )))
                    }
                })
            }
        };
        Value::from_scalar(ty, result, self.byte_order())
    }

    pub fn neg(&self) -> Result<Value> {
        let result = match self.scalar()? {
            Scalar::Int(i) => Scalar::Int(i.wrapping_neg()),
            Scalar::Float(f) => Scalar::Float(-f),
        };
        Value::from_scalar(self.ty().clone(), result, self.byte_order())
    }

    pub fn complement(&self) -> Result<Value> {
        match self.scalar()? {
            Scalar::Int(i) => Value::from_scalar(self.ty().clone(), Scalar::Int(!i), self.byte_order()),
            Scalar::Float(_) => Err(ExprError::TypeError(
                "Argument to complement operation not an integer, boolean.".into(),
            )),
        }
    }

    fn compare(&self, rhs: &Value) -> Result<Option<Ordering>> {
        Ok(match (self.scalar()?, rhs.scalar()?) {
            (Scalar::Int(a), Scalar::Int(b)) => {
                if is_unsigned(self.ty()) {
                    Some((a as u128).cmp(&(b as u128)))
                } else {
                    Some(a.cmp(&b))
                }
            }
            (a, b) => as_float(a).partial_cmp(&as_float(b)),
        })
    }

    pub fn less_than(&self, rhs: &Value) -> Result<bool> {
        Ok(self.compare(rhs)? == Some(Ordering::Less))
    }

    pub fn equal(&self, rhs: &Value) -> Result<bool> {
        Ok(self.compare(rhs)? == Some(Ordering::Equal))
    }

    pub fn is_zero(&self) -> Result<bool> {
        Ok(match self.scalar()? {
            Scalar::Int(i) => i == 0,
            Scalar::Float(f) => f == 0.0,
        })
    }
}

fn as_float(s: Scalar) -> f64 {
    match s {
        Scalar::Int(i) => i as f64,
        Scalar::Float(f) => f,
    }
}

fn int_binop(ty: &Type, a: i128, b: i128, op: BinOp) -> Result<i128> {
    let unsigned = is_unsigned(ty);
    let bits = (8 * ty.length).min(128) as u128;
    let count = if b < 0 { u128::MAX } else { b as u128 };

    Ok(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(ExprError::DivisionByZero);
            }
            if unsigned {
                ((a as u128) / (b as u128)) as i128
            } else {
                a.wrapping_div(b)
            }
        }
        // Floor modulo; a zero divisor leaves the dividend
        BinOp::Mod => {
            if b == 0 {
                a
            } else if unsigned {
                ((a as u128) % (b as u128)) as i128
            } else {
                let r = a.wrapping_rem(b);
                if r != 0 && ((r < 0) != (b < 0)) {
                    r + b
                } else {
                    r
                }
            }
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::Shl => {
            if count >= bits {
                0
            } else {
                a.wrapping_shl(count as u32)
            }
        }
        BinOp::Shr => {
            if count >= bits {
                if !unsigned && a < 0 {
                    -1
                } else {
                    0
                }
            } else if unsigned {
                ((a as u128) >> count) as i128
            } else {
                a >> count
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gimli::RunTimeEndian;

    const LE: RunTimeEndian = RunTimeEndian::Little;

    fn int(v: i64, len: usize, unsigned: bool) -> Value {
        Value::from_longest(Type::int(len, unsigned), v, LE)
    }

    #[test]
    fn test_signed_and_unsigned_division() {
        let q = int(-7, 4, false).binop(&int(2, 4, false), BinOp::Div).unwrap();
        assert_eq!(q.as_long().unwrap(), -3);

        let q = int(-7, 4, true).binop(&int(2, 4, true), BinOp::Div).unwrap();
        assert_eq!(q.as_long().unwrap(), 0x7fff_fffc);

        assert!(matches!(
            int(1, 4, false).binop(&int(0, 4, false), BinOp::Div),
            Err(ExprError::DivisionByZero)
        ));
    }

    #[test]
    fn test_floor_modulo() {
        let m = int(-7, 8, false).binop(&int(3, 8, false), BinOp::Mod).unwrap();
        assert_eq!(m.as_long().unwrap(), 2);
        let m = int(7, 8, false).binop(&int(-3, 8, false), BinOp::Mod).unwrap();
        assert_eq!(m.as_long().unwrap(), -2);
        let m = int(9, 8, false).binop(&int(0, 8, false), BinOp::Mod).unwrap();
        assert_eq!(m.as_long().unwrap(), 9);
    }

    #[test]
    fn test_shifts() {
        let v = int(-16, 4, false);
        assert_eq!(v.binop(&int(2, 4, false), BinOp::Shr).unwrap().as_long().unwrap(), -4);
        assert_eq!(v.binop(&int(40, 4, false), BinOp::Shr).unwrap().as_long().unwrap(), -1);
        assert_eq!(int(1, 4, false).binop(&int(32, 4, false), BinOp::Shl).unwrap().as_long().unwrap(), 0);

        let u = int(-16, 4, true);
        assert_eq!(u.binop(&int(28, 4, true), BinOp::Shr).unwrap().as_long().unwrap(), 0xf);
    }

    #[test]
    fn test_wrapping_add_truncates_to_type() {
        let v = int(0xff, 1, true).binop(&int(1, 1, true), BinOp::Add).unwrap();
        assert_eq!(v.as_long().unwrap(), 0);
        let v = int(i64::MAX, 8, false).binop(&int(1, 8, false), BinOp::Add).unwrap();
        assert_eq!(v.as_long().unwrap(), i64::MIN);
    }

    #[test]
    fn test_compare_and_cast() {
        assert!(int(-1, 4, false).less_than(&int(0, 4, false)).unwrap());
        assert!(!int(-1, 4, true).less_than(&int(0, 4, true)).unwrap());
        assert!(int(5, 4, false).equal(&int(5, 4, false)).unwrap());

        let f = int(-3, 4, false).cast(&Type::float(8)).unwrap();
        assert_eq!(f.ty().code, TypeCode::Float);
        assert_eq!(f.as_long().unwrap(), -3);
        let back = f.neg().unwrap().cast(&Type::int(2, false)).unwrap();
        assert_eq!(back.as_long().unwrap(), 3);
    }

    #[test]
    fn test_float_rejects_integer_ops() {
        let f = Value::from_bytes(Type::float(8), &1.5f64.to_bits().to_le_bytes(), LE);
        assert!(f.complement().is_err());
        assert!(f.binop(&f, BinOp::BitAnd).is_err());
        let sum = f.binop(&f, BinOp::Add).unwrap();
        assert_eq!(sum.as_long().unwrap(), 3);
    }
}
