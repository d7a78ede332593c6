// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Word-order helpers for multi-register values
//!
//! IEEE 754 values span two (f32) or four (f64) registers. In the
//! natural layout the most significant word comes first; many PLCs
//! instead exchange the two 16-bit halves within each 32-bit group,
//! selected here with the `swap_words` flag. Both layouts are
//! deterministic bijections.

use std::fmt::Write as _;

use crate::frame::Word;

/// Encode an `f32` into two registers.
#[must_use]
pub fn encode_f32(value: f32, swap_words: bool) -> [Word; 2] {
    let bits = value.to_bits();
    let hi = (bits >> 16) as Word;
    let lo = bits as Word;
    if swap_words {
        [lo, hi]
    } else {
        [hi, lo]
    }
}

/// Decode an `f32` from two registers.
#[must_use]
pub fn decode_f32(words: [Word; 2], swap_words: bool) -> f32 {
    let [a, b] = words;
    let (hi, lo) = if swap_words { (b, a) } else { (a, b) };
    f32::from_bits(u32::from(hi) << 16 | u32::from(lo))
}

/// Encode an `f64` into four registers.
#[must_use]
pub fn encode_f64(value: f64, swap_words: bool) -> [Word; 4] {
    let bits = value.to_bits();
    let w0 = (bits >> 48) as Word;
    let w1 = (bits >> 32) as Word;
    let w2 = (bits >> 16) as Word;
    let w3 = bits as Word;
    if swap_words {
        // Halves exchanged within each 32-bit group
        [w1, w0, w3, w2]
    } else {
        [w0, w1, w2, w3]
    }
}

/// Decode an `f64` from four registers.
#[must_use]
pub fn decode_f64(words: [Word; 4], swap_words: bool) -> f64 {
    let [a, b, c, d] = words;
    let (w0, w1, w2, w3) = if swap_words { (b, a, d, c) } else { (a, b, c, d) };
    f64::from_bits(
        u64::from(w0) << 48 | u64::from(w1) << 32 | u64::from(w2) << 16 | u64::from(w3),
    )
}

/// Render registers as the upper-case hex string the ASCII framing
/// transports, four characters per word.
#[must_use]
pub fn hex_string(words: &[Word]) -> String {
    let mut out = String::with_capacity(words.len() * 4);
    for word in words {
        // Writing to a String cannot fail.
        let _ = write!(out, "{word:04X}");
    }
    out
}
