//! Dense base91 text encoding for binary data
//!
//! Packs 13 or 14 bits into every pair of output symbols, which works out
//! to roughly 8.13 bits of payload per character. The output:
//! - Is drawn only from the 91 symbols in [`ALPHABET`]
//! - Contains no whitespace, backslash, hyphen or apostrophe
//! - Matches the classic basE91 bit packing, so payloads interoperate
//!   with other implementations using the same table

/// Symbol table, indexed by value 0-90.
pub const ALPHABET: &[u8; 91] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!#$%&()*+,./:;<=>?@[]^_`{|}~\"";

const INVALID: u8 = 0xFF;

/// Values whose low 13 bits are at or below this are packed as 14 bits.
const SHORT_CUTOFF: u32 = 88;

const MASK_13: u32 = 8191;
const MASK_14: u32 = 16383;

const DECODE_TABLE: [u8; 256] = build_decode_table();

const fn build_decode_table() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
}

/// Whether `c` is one of the 91 symbols the codec emits.
pub fn is_alphabet_symbol(c: char) -> bool {
    c.is_ascii() && DECODE_TABLE[c as usize] != INVALID
}

/// Upper bound on the encoded length of `byte_len` bytes.
pub fn encoded_len_bound(byte_len: usize) -> usize {
    byte_len.saturating_mul(16) / 13 + 2
}

/// Encode bytes as base91 text. Empty input gives an empty string.
pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(encoded_len_bound(data.len()));
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;

    for &byte in data {
        acc |= u32::from(byte) << bits;
        bits += 8;
        if bits > 13 {
            let mut value = acc & MASK_13;
            if value > SHORT_CUTOFF {
                acc >>= 13;
                bits -= 13;
            } else {
                value = acc & MASK_14;
                acc >>= 14;
                bits -= 14;
            }
            out.push(symbol(value % 91));
            out.push(symbol(value / 91));
        }
    }

    if bits > 0 {
        out.push(symbol(acc % 91));
        if bits > 7 || acc > 90 {
            out.push(symbol(acc / 91));
        }
    }

    out
}

/// Decode base91 text, rejecting any symbol outside the alphabet.
///
/// Returns `None` for foreign symbols, including whitespace.
///
/// An empty string decodes to `Some(vec![])`, not `None`, so that
/// `decode(&encode(&[]))` gives back the empty input. Callers that treat an
/// empty payload as an error must check for it themselves.
pub fn decode(text: &str) -> Option<Vec<u8>> {
    decode_inner(text, false)
}

/// Decode base91 text, silently skipping symbols outside the alphabet.
///
/// Matches the behavior of older decoders. Skipped symbols change the
/// decoded bytes without any signal, so prefer [`decode`] unless a peer is
/// known to wrap or decorate its output. Returns `None` when the input is
/// non-empty but holds no recognised symbol at all.
pub fn decode_lenient(text: &str) -> Option<Vec<u8>> {
    decode_inner(text, true)
}

fn decode_inner(text: &str, skip_unknown: bool) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() * 14 / 16 + 1);
    let mut pending: Option<u32> = None;
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut recognised = false;

    // Operating on bytes is fine: every alphabet symbol is ASCII, and the
    // bytes of a multi-byte character all land on INVALID.
    for &c in text.as_bytes() {
        let index = DECODE_TABLE[usize::from(c)];
        if index == INVALID {
            if skip_unknown {
                continue;
            }
            return None;
        }
        recognised = true;

        let index = u32::from(index);
        match pending.take() {
            None => pending = Some(index),
            Some(first) => {
                let value = first + index * 91;
                acc |= value << bits;
                bits += if value & MASK_13 > SHORT_CUTOFF { 13 } else { 14 };
                loop {
                    out.push((acc & 0xFF) as u8);
                    acc >>= 8;
                    bits -= 8;
                    if bits <= 7 {
                        break;
                    }
                }
            }
        }
    }

    if let Some(last) = pending {
        out.push(((acc | last << bits) & 0xFF) as u8);
    }

    if !text.is_empty() && !recognised {
        return None;
    }

    Some(out)
}

fn symbol(index: u32) -> char {
    char::from(ALPHABET[index as usize])
}
