//! Keyed letter-shift transform.

use crate::stage::Transform;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Number of distinct non-trivial shifts
const ALPHABET: u8 = 26;

/// Shift amount shared between the Transform stage and whoever rotates it
#[derive(Debug)]
pub struct CipherKey {
    shift: AtomicU8,
}

impl CipherKey {
    /// Create a key; `shift` is reduced into `1..=25`, with multiples of 26
    /// becoming 1
    pub fn new(shift: i32) -> Self {
        Self {
            shift: AtomicU8::new(normalize(shift)),
        }
    }

    /// Current shift
    pub fn get(&self) -> u8 {
        self.shift.load(Ordering::Acquire)
    }

    /// Advance to the next shift, wrapping 25 back to 1, and return it
    pub fn rotate(&self) -> u8 {
        let next = |k: u8| k % (ALPHABET - 1) + 1;
        let previous = self
            .shift
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |k| Some(next(k)))
            .unwrap_or_else(|k| k);
        next(previous)
    }
}

impl Default for CipherKey {
    fn default() -> Self {
        Self::new(1)
    }
}

fn normalize(shift: i32) -> u8 {
    match shift.rem_euclid(i32::from(ALPHABET)) {
        0 => 1,
        // rem_euclid keeps this in 1..=25.
        k => k as u8,
    }
}

/// Shift ASCII letters forward by the key, preserving case; every other
/// byte passes through unchanged
#[derive(Debug, Clone)]
pub struct ShiftCipher {
    key: Arc<CipherKey>,
}

impl ShiftCipher {
    pub fn new(key: Arc<CipherKey>) -> Self {
        Self { key }
    }

    /// Shift a single byte with an explicit key
    pub fn shift_byte(byte: u8, shift: u8) -> u8 {
        let base = match byte {
            b'a'..=b'z' => b'a',
            b'A'..=b'Z' => b'A',
            _ => return byte,
        };
        base + (byte - base + shift % ALPHABET) % ALPHABET
    }
}

impl Transform<u8> for ShiftCipher {
    fn apply(&mut self, unit: u8) -> u8 {
        Self::shift_byte(unit, self.key.get())
    }

    fn name(&self) -> &str {
        "shift-cipher"
    }
}
