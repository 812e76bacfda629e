//! G.711 μ-law (PCMU) and A-law (PCMA).
//!
//! Decoding uses the sign/exponent/mantissa formulas directly. Encoding
//! goes through a 65536-entry table per law, built once from the same
//! reference formulas so table and formula agree bit for bit.

use std::sync::OnceLock;

/// μ-law bias added before segment search
const ULAW_BIAS: i32 = 0x84;

/// Largest magnitude μ-law can represent before the bias overflows 15 bits
const ULAW_CLIP: i32 = 32635;

const TABLE_SIZE: usize = 1 << 16;

static ULAW_TABLE: OnceLock<Box<[u8]>> = OnceLock::new();
static ALAW_TABLE: OnceLock<Box<[u8]>> = OnceLock::new();

fn build_table(encode: fn(i16) -> u8) -> Box<[u8]> {
    // ---
    (0..TABLE_SIZE)
        .map(|index| encode(index as u16 as i16))
        .collect::<Vec<_>>()
        .into_boxed_slice()
}

fn ulaw_table() -> &'static [u8] {
    ULAW_TABLE.get_or_init(|| build_table(ulaw_encode_reference))
}

fn alaw_table() -> &'static [u8] {
    ALAW_TABLE.get_or_init(|| build_table(alaw_encode_reference))
}

/// Reference μ-law encoder (ITU-T G.711 / Sun g711.c formulation).
pub fn ulaw_encode_reference(sample: i16) -> u8 {
    // ---
    let value = sample as i32;
    let sign: u8 = if value < 0 { 0x80 } else { 0x00 };
    let biased = value.abs().min(ULAW_CLIP) + ULAW_BIAS;

    // biased >> 7 is in 1..=255, so the exponent is its bit length minus one
    let exponent = 31 - ((biased >> 7) as u32).leading_zeros();
    let mantissa = ((biased >> (exponent + 3)) & 0x0F) as u8;

    !(sign | ((exponent as u8) << 4) | mantissa)
}

/// Reference A-law encoder (ITU-T G.711 / Sun g711.c formulation).
pub fn alaw_encode_reference(sample: i16) -> u8 {
    // ---
    let mut value = (sample as i32) >> 3;
    let mask: u8 = if value >= 0 {
        0xD5
    } else {
        value = -value - 1;
        0x55
    };

    // value is 0..=4095; segment 0 covers 0..=31, each further segment doubles
    let segment = 32 - ((value >> 5) as u32).leading_zeros();
    let shift = segment.max(1);
    let mantissa = ((value >> shift) & 0x0F) as u8;

    (((segment as u8) << 4) | mantissa) ^ mask
}

/// Converts one linear sample to μ-law through the lookup table.
#[inline]
pub fn linear_to_ulaw(sample: i16) -> u8 {
    // ---
    ulaw_table()[sample as u16 as usize]
}

/// Converts one linear sample to A-law through the lookup table.
#[inline]
pub fn linear_to_alaw(sample: i16) -> u8 {
    // ---
    alaw_table()[sample as u16 as usize]
}

/// Converts one μ-law byte to a linear sample.
#[inline]
pub fn ulaw_to_linear(code: u8) -> i16 {
    // ---
    let code = !code;
    let exponent = ((code >> 4) & 0x07) as i32;
    let mantissa = (code & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;

    if code & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Converts one A-law byte to a linear sample.
#[inline]
pub fn alaw_to_linear(code: u8) -> i16 {
    // ---
    let code = code ^ 0x55;
    let segment = ((code & 0x70) >> 4) as i32;
    let mantissa = ((code & 0x0F) as i32) << 4;

    let magnitude = match segment {
        0 => mantissa + 8,
        1 => mantissa + 0x108,
        _ => (mantissa + 0x108) << (segment - 1),
    };

    if code & 0x80 != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}

/// Encodes PCM samples to μ-law, one byte per sample.
pub fn encode_ulaw(pcm: &[i16]) -> Vec<u8> {
    // ---
    let table = ulaw_table();
    pcm.iter().map(|&s| table[s as u16 as usize]).collect()
}

/// Encodes PCM samples to A-law, one byte per sample.
pub fn encode_alaw(pcm: &[i16]) -> Vec<u8> {
    // ---
    let table = alaw_table();
    pcm.iter().map(|&s| table[s as u16 as usize]).collect()
}

/// Decodes a μ-law payload of any length.
pub fn decode_ulaw(payload: &[u8]) -> Vec<i16> {
    // ---
    payload.iter().map(|&b| ulaw_to_linear(b)).collect()
}

/// Decodes an A-law payload of any length.
pub fn decode_alaw(payload: &[u8]) -> Vec<i16> {
    // ---
    payload.iter().map(|&b| alaw_to_linear(b)).collect()
}
