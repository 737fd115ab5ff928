//! Operand stack of the expression machine

use crate::core::{ExprError, Result};
use crate::value::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct StackEntry {
    pub value: Arc<Value>,
    /// Value is an address into the inferior's stack
    pub in_stack_memory: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EvalStack {
    entries: Vec<StackEntry>,
}

impl EvalStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, value: Arc<Value>, in_stack_memory: bool) {
        self.entries.push(StackEntry {
            value,
            in_stack_memory,
        });
    }

    pub fn pop(&mut self) -> Result<StackEntry> {
        self.entries.pop().ok_or(ExprError::StackUnderflow {
            needed: 1,
            depth: 0,
        })
    }

    /// Entry `n` counting from the top (0 is the top)
    pub fn fetch(&self, n: usize) -> Result<&StackEntry> {
        let depth = self.entries.len();
        if n >= depth {
            return Err(ExprError::StackIndexOutOfRange { index: n, depth });
        }
        Ok(&self.entries[depth - 1 - n])
    }

    fn require(&self, needed: usize) -> Result<usize> {
        let depth = self.entries.len();
        if depth < needed {
            return Err(ExprError::StackUnderflow { needed, depth });
        }
        Ok(depth)
    }

    pub fn swap(&mut self) -> Result<()> {
        let depth = self.require(2)?;
        self.entries.swap(depth - 1, depth - 2);
        Ok(())
    }

    /// Move the top entry below the next two
    pub fn rot(&mut self) -> Result<()> {
        let depth = self.require(3)?;
        self.entries[depth - 3..].rotate_right(1);
        Ok(())
    }

    /// Remove and return every entry, leaving the stack empty
    pub fn take(&mut self) -> EvalStack {
        std::mem::take(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Type;
    use gimli::RunTimeEndian;

    fn push_int(stack: &mut EvalStack, v: i64) {
        stack.push(
            Arc::new(Value::from_longest(Type::int(8, false), v, RunTimeEndian::Little)),
            false,
        );
    }

    fn top(stack: &EvalStack, n: usize) -> i64 {
        stack.fetch(n).unwrap().value.as_long().unwrap()
    }

    #[test]
    fn test_rot_moves_top_below_two() {
        let mut stack = EvalStack::new();
        for v in [1, 2, 3] {
            push_int(&mut stack, v);
        }
        stack.rot().unwrap();
        assert_eq!((top(&stack, 0), top(&stack, 1), top(&stack, 2)), (2, 1, 3));
    }

    #[test]
    fn test_underflow_reports_depth() {
        let mut stack = EvalStack::new();
        push_int(&mut stack, 1);
        assert_eq!(
            stack.swap().unwrap_err(),
            ExprError::StackUnderflow { needed: 2, depth: 1 }
        );
        assert_eq!(
            stack.fetch(1).unwrap_err(),
            ExprError::StackIndexOutOfRange { index: 1, depth: 1 }
        );
        stack.pop().unwrap();
        assert!(stack.pop().is_err());
    }

    #[test]
    fn test_take_parks_entries() {
        let mut stack = EvalStack::new();
        push_int(&mut stack, 7);
        let parked = stack.take();
        assert!(stack.is_empty());
        assert_eq!(parked.len(), 1);
    }
}
