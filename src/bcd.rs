//! Packing and unpacking of the binary-coded-decimal fields found in USB
//! descriptors (`bcdUSB`, `bcdDevice`).
//!
//! The digit width and digit count are explicit: callers say how many bits
//! each digit occupies and the functions check that the digits exactly tile a
//! 16-bit register. USB itself always uses 4-bit digits, but keeping the
//! width a parameter makes the tiling assumption visible at the call site.

use std::fmt;

/// Unpacks a 16-bit binary-coded value into its digits, most significant
/// digit first.
///
/// # Panics
///
/// Panics if `bits_per_digit` is zero, exceeds 8 (a digit must fit in a
/// byte), or does not evenly divide 16.
pub fn decode(bits_per_digit: u32, value: u16) -> Vec<u8> {
    assert!(
        bits_per_digit > 0 && bits_per_digit <= 8 && 16 % bits_per_digit == 0,
        "bits_per_digit ({bits_per_digit}) must be a byte-sized divisor of a 16-bit register",
    );

    (0..16 / bits_per_digit)
        .rev()
        .map(|digit| {
            let mask = (1u32 << bits_per_digit) - 1;
            ((value as u32 >> (digit * bits_per_digit)) & mask) as u8
        })
        .collect()
}

/// Packs a sequence of digits, most significant digit first, back into a
/// 16-bit binary-coded value. The inverse of [`decode`].
///
/// # Panics
///
/// Panics if `bits_per_digit` is zero, exceeds 8, or does not evenly divide
/// 16, if the digit count does not fill the register exactly, or if any
/// digit does not fit in `bits_per_digit` bits.
pub fn encode(bits_per_digit: u32, digits: &[u8]) -> u16 {
    assert!(
        bits_per_digit > 0 && bits_per_digit <= 8 && 16 % bits_per_digit == 0,
        "bits_per_digit ({bits_per_digit}) must be a byte-sized divisor of a 16-bit register",
    );
    assert!(
        digits.len() as u32 == 16 / bits_per_digit,
        "expected {} digits of {} bits, got {}",
        16 / bits_per_digit,
        bits_per_digit,
        digits.len(),
    );

    digits.iter().fold(0u16, |acc, &digit| {
        assert!(
            (digit as u32) < (1u32 << bits_per_digit),
            "digit {digit} does not fit in {bits_per_digit} bits",
        );
        (acc << bits_per_digit) | digit as u16
    })
}

/// A USB release number: four 4-bit BCD digits, most significant first.
///
/// `bcdUSB = 0x0210` decodes to `ReleaseNumber(0, 2, 1, 0)`, displayed as
/// `02.10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReleaseNumber(pub u8, pub u8, pub u8, pub u8);

impl ReleaseNumber {
    pub fn from_bcd(value: u16) -> Self {
        let digits = decode(4, value);
        ReleaseNumber(digits[0], digits[1], digits[2], digits[3])
    }
}

impl fmt::Display for ReleaseNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}.{}{}", self.0, self.1, self.2, self.3)
    }
}
