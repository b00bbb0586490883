//! List operation application.

use crate::error::{Result, StoreError};
use crate::types::Value;

/// A single mutation of an ordered list.
///
/// Indices are signed so that negative arguments reach the bounds check and
/// are reported instead of wrapping.
#[derive(Clone, Debug, PartialEq)]
pub enum ListOp {
    /// Add values at the end, in order.
    Append(Vec<Value>),

    /// Insert values starting at `index` (`0..=len`).
    Insert { index: isize, values: Vec<Value> },

    /// Replace the element at `index` (`0..len`).
    Set { index: isize, value: Value },

    /// Remove the element at `index` (`0..len`).
    Remove { index: isize },

    /// Remove the last element; no-op on an empty list.
    RemoveLast,

    /// Remove every element; no-op on an empty list.
    RemoveAll,

    /// Remove the element at `from` and reinsert it at `to`, where `to` is
    /// interpreted after the removal. Both must be in `0..len`.
    Move { from: isize, to: isize },

    /// Exchange two elements. Both must be in `0..len`.
    Swap { a: isize, b: isize },

    /// Replace `start..end` with `values` in one step.
    ReplaceRange {
        start: isize,
        end: isize,
        values: Vec<Value>,
    },
}

impl ListOp {
    /// Values this operation writes into the list.
    pub fn new_values(&self) -> &[Value] {
        match self {
            ListOp::Append(values)
            | ListOp::Insert { values, .. }
            | ListOp::ReplaceRange { values, .. } => values,
            ListOp::Set { value, .. } => std::slice::from_ref(value),
            _ => &[],
        }
    }

    /// Check every index argument against a list of length `len`.
    pub fn validate(&self, len: usize) -> Result<()> {
        match *self {
            ListOp::Append(_) | ListOp::RemoveLast | ListOp::RemoveAll => Ok(()),
            ListOp::Insert { index, .. } => check_position(index, len),
            ListOp::Set { index, .. } | ListOp::Remove { index } => check_element(index, len),
            ListOp::Move { from, to } => {
                check_element(from, len)?;
                check_element(to, len)
            }
            ListOp::Swap { a, b } => {
                check_element(a, len)?;
                check_element(b, len)
            }
            ListOp::ReplaceRange { start, end, .. } => {
                if start < 0 || start > end {
                    return Err(StoreError::IndexOutOfBounds { index: start, len });
                }
                check_position(end, len)
            }
        }
    }
}

/// Index of an existing element.
fn check_element(index: isize, len: usize) -> Result<()> {
    if index < 0 || index as usize >= len {
        Err(StoreError::IndexOutOfBounds { index, len })
    } else {
        Ok(())
    }
}

/// Position between elements, including one past the end.
fn check_position(index: isize, len: usize) -> Result<()> {
    if index < 0 || index as usize > len {
        Err(StoreError::IndexOutOfBounds { index, len })
    } else {
        Ok(())
    }
}

/// Apply an operation to a list.
///
/// All indices are validated before anything is touched, so an error leaves
/// `items` unchanged. Returns whether the list changed.
pub fn apply_list_op(items: &mut Vec<Value>, op: ListOp) -> Result<bool> {
    op.validate(items.len())?;

    let changed = match op {
        ListOp::Append(values) => {
            let changed = !values.is_empty();
            items.extend(values);
            changed
        }
        ListOp::Insert { index, values } => {
            let changed = !values.is_empty();
            let index = index as usize;
            items.splice(index..index, values);
            changed
        }
        ListOp::Set { index, value } => {
            items[index as usize] = value;
            true
        }
        ListOp::Remove { index } => {
            items.remove(index as usize);
            true
        }
        ListOp::RemoveLast => items.pop().is_some(),
        ListOp::RemoveAll => {
            let changed = !items.is_empty();
            items.clear();
            changed
        }
        ListOp::Move { from, to } => {
            if from == to {
                false
            } else {
                let item = items.remove(from as usize);
                items.insert(to as usize, item);
                true
            }
        }
        ListOp::Swap { a, b } => {
            if a == b {
                false
            } else {
                items.swap(a as usize, b as usize);
                true
            }
        }
        ListOp::ReplaceRange { start, end, values } => {
            let changed = start != end || !values.is_empty();
            items.splice(start as usize..end as usize, values);
            changed
        }
    };

    Ok(changed)
}
