//! Root registry consulted by the collector in addition to the heap's own
//! roots (the nil value and the symbol list).
//!
//! Permanent roots live for the lifetime of the heap. Pins are transient:
//! they protect a value that so far is only held in a native local across a
//! call that may allocate, and therefore may collect. Pins form a stack;
//! `PinMark` records a depth and `release` drops everything above it, which
//! is how scoped helpers guarantee that a pin never outlives its frame even
//! when the frame exits early with an error.

use crate::error::{LispError, LispResult};
use crate::value::Value;

/// Handle to one pin entry. Each `pin` call yields a distinct handle, even
/// for a value that is already pinned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pin {
    index: usize,
    serial: u64,
}

/// Depth of the pin stack at some point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinMark(usize);

#[derive(Debug)]
struct PinEntry {
    serial: u64,
    value: Value,
}

#[derive(Debug, Default)]
pub struct Roots {
    permanent: Vec<Value>,
    /// `None` marks an entry unpinned out of order; trailing `None`s are
    /// popped eagerly so the stack never grows from them.
    pins: Vec<Option<PinEntry>>,
    next_serial: u64,
}

impl Roots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value that stays live until the heap is dropped.
    pub fn add_permanent(&mut self, value: Value) {
        self.permanent.push(value);
    }

    pub fn pin(&mut self, value: Value) -> Pin {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.pins.push(Some(PinEntry { serial, value }));
        Pin {
            index: self.pins.len() - 1,
            serial,
        }
    }

    /// Remove the entry behind `pin`. Unpinning something that is not
    /// currently pinned is a caller bug and reported as `Internal`.
    pub fn unpin(&mut self, pin: Pin) -> LispResult<()> {
        if self.get(pin).is_none() {
            return Err(not_pinned(pin));
        }
        self.pins[pin.index] = None;
        while matches!(self.pins.last(), Some(None)) {
            self.pins.pop();
        }
        Ok(())
    }

    /// Point an existing pin at a different value.
    pub fn repin(&mut self, pin: Pin, value: Value) -> LispResult<()> {
        match self.pins.get_mut(pin.index) {
            Some(Some(entry)) if entry.serial == pin.serial => {
                entry.value = value;
                Ok(())
            }
            _ => Err(not_pinned(pin)),
        }
    }

    /// The value currently protected by `pin`, if it is still pinned.
    pub fn get(&self, pin: Pin) -> Option<Value> {
        match self.pins.get(pin.index) {
            Some(Some(entry)) if entry.serial == pin.serial => Some(entry.value),
            _ => None,
        }
    }

    pub fn mark(&self) -> PinMark {
        PinMark(self.pins.len())
    }

    /// Drop every pin pushed since `mark` was taken.
    pub fn release(&mut self, mark: PinMark) {
        self.pins.truncate(mark.0);
        while matches!(self.pins.last(), Some(None)) {
            self.pins.pop();
        }
    }

    /// Number of live pin entries.
    pub fn pinned_count(&self) -> usize {
        self.pins.iter().filter(|e| e.is_some()).count()
    }

    pub fn permanent_count(&self) -> usize {
        self.permanent.len()
    }

    /// Every root value: permanent ones first, then live pins.
    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.permanent
            .iter()
            .copied()
            .chain(self.pins.iter().flatten().map(|e| e.value))
    }
}

fn not_pinned(pin: Pin) -> LispError {
    LispError::Internal(format!("unpin of a location that is not pinned: {:?}", pin))
}
