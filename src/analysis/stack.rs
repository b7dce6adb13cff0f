//! Slot addressing shared by the type pass and the codegen pass.
//!
//! Both passes simulate the VM stack as a vector of entries, bottom first, where every entry
//! covers one or more 4-byte slots. Stack-pointer relative operands (`CPTOPSP -8, 4`) are
//! translated into a [`Span`] over those entries:
//!
//! ```text
//! slot index (from bottom)   0     1     2     3
//! entries                  [ int ][   vector (3)    ]
//! CPTOPSP -12, 4  ->  k = 3, start = depth - k = 1   -> Inner { entry: 1, start: 0, count: 1 }
//! CPTOPSP -16, 4  ->  k = 4, start = 0               -> Entries { first: 0, last: 0 }
//! CPDOWNSP -20, 4 ->  k = 5, start = -1              -> Below { start: -1, count: 1 }
//! ```

use crate::{Error, Result};

/// A stack entry covering a fixed number of slots.
pub trait Slotted {
    /// Number of 4-byte slots this entry covers.
    fn slots(&self) -> usize;
}

/// The entries addressed by a slot range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    /// Whole entries `first..=last`
    Entries {
        /// Index of the lowest entry
        first: usize,
        /// Index of the highest entry
        last: usize,
    },
    /// Part of a single entry
    Inner {
        /// Index of the entry
        entry: usize,
        /// First slot, relative to the entry
        start: usize,
        /// Number of slots
        count: usize,
    },
    /// Slots below the bottom of the simulated stack (the caller's return area)
    Below {
        /// First slot, negative, relative to the bottom
        start: isize,
        /// Number of slots
        count: usize,
    },
}

/// Total slot depth of a stack.
#[must_use]
pub fn depth<E: Slotted>(stack: &[E]) -> usize {
    stack.iter().map(Slotted::slots).sum()
}

/// Translates a stack-pointer relative byte operand into a [`Span`].
///
/// `at` is the byte offset of the instruction, used for errors.
///
/// # Errors
///
/// Returns a structural error for operands that are not slot aligned, reach above the top
/// of the stack, straddle the bottom, or cut across entry boundaries.
pub fn locate<E: Slotted>(stack: &[E], offset: i32, size: usize, at: usize) -> Result<Span> {
    if offset >= 0 || offset % 4 != 0 || size == 0 || size % 4 != 0 {
        return Err(structural_error!(
            at,
            "stack operand {}, {} is not slot aligned",
            offset,
            size
        ));
    }

    let k = (offset.unsigned_abs() / 4) as isize;
    let start = depth(stack) as isize - k;
    locate_slots(stack, start, size / 4, at)
}

/// Translates an absolute slot range (from the bottom) into a [`Span`].
///
/// # Errors
///
/// See [`locate`].
pub fn locate_slots<E: Slotted>(stack: &[E], start: isize, count: usize, at: usize) -> Result<Span> {
    let total = depth(stack);
    if start < 0 {
        if start + count as isize > 0 {
            return Err(structural_error!(
                at,
                "access straddles the bottom of the stack frame"
            ));
        }
        return Ok(Span::Below { start, count });
    }

    let start = start as usize;
    let end = start + count;
    if count == 0 || end > total {
        return Err(structural_error!(
            at,
            "access of {} slots at {} exceeds stack depth {}",
            count,
            start,
            total
        ));
    }

    let mut first = None;
    let mut slot = 0;
    for (index, entry) in stack.iter().enumerate() {
        let size = entry.slots();
        if size == 0 {
            continue;
        }
        let entry_end = slot + size;
        if first.is_none() && start < entry_end {
            if end <= entry_end && (start != slot || end != entry_end) {
                return Ok(Span::Inner {
                    entry: index,
                    start: start - slot,
                    count,
                });
            }
            if start != slot {
                break;
            }
            first = Some(index);
        }
        if let Some(first) = first {
            if end == entry_end {
                return Ok(Span::Entries { first, last: index });
            }
            if end < entry_end {
                break;
            }
        }
        slot = entry_end;
    }

    Err(structural_error!(
        at,
        "access of {} slots at {} cuts across stack entries",
        count,
        start
    ))
}

/// Translates a base-pointer relative byte operand into a [`Span`] of the global stack.
///
/// `SAVEBP` pushes the previous base pointer on top of the globals, so `-4` addresses that
/// hidden slot and `-8` the last global.
///
/// # Errors
///
/// See [`locate`]; the hidden slot itself is not addressable.
pub fn locate_bp<E: Slotted>(globals: &[E], offset: i32, size: usize, at: usize) -> Result<Span> {
    match offset.checked_add(4) {
        Some(shifted) if shifted < 0 => locate(globals, shifted, size, at),
        _ => Err(structural_error!(
            at,
            "base pointer operand {} does not address a global",
            offset
        )),
    }
}

/// Pops entries covering exactly `count` slots off the top, returned bottom first.
///
/// # Errors
///
/// Returns a structural error on underflow or if the top entries do not end on the
/// requested boundary.
pub fn pop_slots<E: Slotted>(stack: &mut Vec<E>, count: usize, at: usize) -> Result<Vec<E>> {
    let mut remaining = count;
    let mut split = stack.len();
    while remaining > 0 {
        let Some(entry) = split.checked_sub(1).map(|i| &stack[i]) else {
            return Err(stack_underflow(at, count));
        };
        let size = entry.slots();
        if size > remaining {
            return Err(structural_error!(
                at,
                "pop of {} slots splits a stack entry",
                count
            ));
        }
        remaining -= size;
        split -= 1;
    }
    Ok(stack.split_off(split))
}

fn stack_underflow(at: usize, count: usize) -> Error {
    structural_error!(at, "stack underflow popping {} slots", count)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct E(usize);

    impl Slotted for E {
        fn slots(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_locate() {
        let stack = [E(1), E(3), E(1)];
        assert_eq!(
            locate(&stack, -4, 4, 0).unwrap(),
            Span::Entries { first: 2, last: 2 }
        );
        assert_eq!(
            locate(&stack, -16, 12, 0).unwrap(),
            Span::Entries { first: 1, last: 1 }
        );
        assert_eq!(
            locate(&stack, -12, 4, 0).unwrap(),
            Span::Inner {
                entry: 1,
                start: 1,
                count: 1
            }
        );
        assert_eq!(
            locate(&stack, -20, 20, 0).unwrap(),
            Span::Entries { first: 0, last: 2 }
        );
        assert_eq!(
            locate(&stack, -28, 4, 0).unwrap(),
            Span::Below { start: -2, count: 1 }
        );
        assert!(locate(&stack, -12, 12, 0).is_err());
        assert!(locate(&stack, -24, 8, 0).is_err());
        assert!(locate(&stack, -6, 4, 0).is_err());
    }

    #[test]
    fn test_locate_bp() {
        let globals = [E(1), E(1)];
        assert_eq!(
            locate_bp(&globals, -8, 4, 0).unwrap(),
            Span::Entries { first: 1, last: 1 }
        );
        assert_eq!(
            locate_bp(&globals, -12, 4, 0).unwrap(),
            Span::Entries { first: 0, last: 0 }
        );
        assert!(locate_bp(&globals, -4, 4, 0).is_err());
    }

    #[test]
    fn test_pop_slots() {
        let mut stack = vec![E(1), E(3), E(1)];
        let popped = pop_slots(&mut stack, 4, 0).unwrap();
        assert_eq!(popped.len(), 2);
        assert_eq!(stack.len(), 1);

        let mut stack = vec![E(3)];
        assert!(pop_slots(&mut stack, 1, 0).is_err());
        assert!(pop_slots(&mut stack, 4, 0).is_err());
    }
}
