use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Comparator over fixed-width key bytes
pub trait KeyCompare {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Built-in kind to record in the index metadata, if any
    fn kind(&self) -> Option<KeyKind> {
        None
    }
}

impl<F> KeyCompare for F
where
    F: Fn(&[u8], &[u8]) -> Ordering,
{
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self(a, b)
    }
}

/// Built-in key encodings, persisted with the index metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Little-endian `i32`
    Int,
    /// Little-endian `i64`
    BigInt,
    /// Little-endian `f64`, ordered by `total_cmp`
    Float,
    /// Raw bytes compared lexicographically, zero-padded to `width`
    Bytes { width: usize },
}

impl KeyKind {
    /// Encoded key width in bytes
    pub fn width(&self) -> usize {
        match self {
            KeyKind::Int => 4,
            KeyKind::BigInt | KeyKind::Float => 8,
            KeyKind::Bytes { width } => *width,
        }
    }
}

impl KeyCompare for KeyKind {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyKind::Int => decode_i32(a).cmp(&decode_i32(b)),
            KeyKind::BigInt => decode_i64(a).cmp(&decode_i64(b)),
            KeyKind::Float => f64::from_bits(decode_i64(a) as u64)
                .total_cmp(&f64::from_bits(decode_i64(b) as u64)),
            KeyKind::Bytes { .. } => a.cmp(b),
        }
    }

    fn kind(&self) -> Option<KeyKind> {
        Some(*self)
    }
}

fn decode_i32(bytes: &[u8]) -> i32 {
    let mut raw = [0u8; 4];
    let n = bytes.len().min(4);
    raw[..n].copy_from_slice(&bytes[..n]);
    i32::from_le_bytes(raw)
}

fn decode_i64(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    let n = bytes.len().min(8);
    raw[..n].copy_from_slice(&bytes[..n]);
    i64::from_le_bytes(raw)
}
