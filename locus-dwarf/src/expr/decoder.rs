//! Cursor over expression byte-code

use crate::core::{ExprError, Result};
use gimli::{EndianSlice, Endianity, RunTimeEndian};

#[derive(Debug, Clone)]
pub struct ExprCursor<'a> {
    data: &'a [u8],
    pos: usize,
    endian: RunTimeEndian,
}

impl<'a> ExprCursor<'a> {
    pub fn new(data: &'a [u8], endian: RunTimeEndian) -> Self {
        Self {
            data,
            pos: 0,
            endian,
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_u8(&mut self, what: &'static str) -> Result<u8> {
        let byte = self.peek_u8().ok_or(ExprError::TruncatedExpression { what })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, len: usize, what: &'static str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(ExprError::TruncatedExpression { what })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Fixed-size unsigned operand in target byte order
    pub fn read_unsigned(&mut self, size: u8, what: &'static str) -> Result<u64> {
        let bytes = self.read_bytes(size as usize, what)?;
        match size {
            1 => Ok(u64::from(bytes[0])),
            2 => Ok(u64::from(self.endian.read_u16(bytes))),
            4 => Ok(u64::from(self.endian.read_u32(bytes))),
            8 => Ok(self.endian.read_u64(bytes)),
            _ => Err(ExprError::MalformedOperand(format!(
                "unsupported operand size {size} for {what}"
            ))),
        }
    }

    pub fn read_signed(&mut self, size: u8, what: &'static str) -> Result<i64> {
        let raw = self.read_unsigned(size, what)?;
        let shift = 64 - 8 * u32::from(size);
        Ok(((raw << shift) as i64) >> shift)
    }

    fn leb128<T>(
        &mut self,
        what: &'static str,
        read: fn(&mut EndianSlice<'a, RunTimeEndian>) -> gimli::Result<T>,
    ) -> Result<T> {
        let mut slice = EndianSlice::new(&self.data[self.pos.min(self.data.len())..], self.endian);
        let before = slice.len();
        match read(&mut slice) {
            Ok(value) => {
                self.pos += before - slice.len();
                Ok(value)
            }
            Err(gimli::Error::UnexpectedEof(_)) => Err(ExprError::TruncatedExpression { what }),
            Err(e) => Err(ExprError::MalformedOperand(format!("{what}: {e}"))),
        }
    }

    pub fn read_uleb128(&mut self, what: &'static str) -> Result<u64> {
        self.leb128(what, gimli::leb128::read::unsigned)
    }

    pub fn read_sleb128(&mut self, what: &'static str) -> Result<i64> {
        self.leb128(what, gimli::leb128::read::signed)
    }

    pub fn skip_leb128(&mut self, what: &'static str) -> Result<()> {
        loop {
            if self.read_u8(what)? & 0x80 == 0 {
                return Ok(());
            }
        }
    }

    /// Move by a signed displacement relative to the current position
    pub fn jump(&mut self, offset: i64) -> Result<()> {
        let target = self.pos as i64 + offset;
        if target < 0 || target > self.data.len() as i64 {
            return Err(ExprError::MalformedOperand(format!(
                "branch target {target} outside expression of {} bytes",
                self.data.len()
            )));
        }
        self.pos = target as usize;
        Ok(())
    }
}
