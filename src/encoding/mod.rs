//! Buffer encodings
//!
//! An [`Encoding`] interprets raw buffer bytes as codepoints. Decoding is
//! incremental over a [`ByteCursor`] and never fails hard: invalid
//! sequences yield U+FFFD with `valid == false` and re-synchronize on the
//! smallest unit of the encoding, so iteration always makes progress.

use crate::buffer::ByteCursor;
use crate::constants::interp::REPLACEMENT_CODEPOINT;


/// Result of decoding one codepoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub codepoint: u32,
    pub valid: bool,
}

impl Decoded {
    fn invalid() -> Decoded {
        Decoded {
            codepoint: REPLACEMENT_CODEPOINT,
            valid: false,
        }
    }
}

/// One object per supported encoding, dispatched dynamically by the
/// interpretation.
pub trait Encoding {
    fn name(&self) -> &'static str;

    /// The maximum number of bytes any codepoint occupies.
    fn max_codepoint_bytes(&self) -> usize;

    /// Decodes the codepoint starting at `cursor`, advancing past the
    /// consumed bytes. Returns `None` at the end of the buffer.
    fn decode_one(&self, cursor: &mut ByteCursor<'_>) -> Option<Decoded>;

    /// Encodes a codepoint. Values that are not Unicode scalars encode the
    /// replacement codepoint instead.
    fn encode(&self, codepoint: u32) -> Vec<u8>;
}

fn is_scalar(cp: u32) -> bool {
    cp <= 0x10FFFF && !(0xD800..=0xDFFF).contains(&cp)
}

/// UTF-8.
pub struct Utf8;

impl Encoding for Utf8 {
    fn name(&self) -> &'static str {
        "UTF-8"
    }

    fn max_codepoint_bytes(&self) -> usize {
        4
    }

    fn decode_one(&self, cursor: &mut ByteCursor<'_>) -> Option<Decoded> {
        let lead = cursor.peek()?;
        let (len, init) = match lead {
            0x00..=0x7F => (1, lead as u32),
            0xC2..=0xDF => (2, (lead & 0x1F) as u32),
            0xE0..=0xEF => (3, (lead & 0x0F) as u32),
            0xF0..=0xF4 => (4, (lead & 0x07) as u32),
            _ => {
                cursor.advance();
                return Some(Decoded::invalid());
            }
        };
        let mut probe = cursor.clone();
        probe.advance();
        let mut cp = init;
        for _ in 1..len {
            match probe.peek() {
                Some(b) if b & 0xC0 == 0x80 => {
                    cp = (cp << 6) | (b & 0x3F) as u32;
                    probe.advance();
                }
                _ => {
                    // resync one byte at a time
                    cursor.advance();
                    return Some(Decoded::invalid());
                }
            }
        }
        let overlong = match len {
            2 => false, // lead range already excludes overlongs
            3 => cp < 0x800,
            4 => cp < 0x10000,
            _ => false,
        };
        if overlong || !is_scalar(cp) {
            cursor.advance();
            return Some(Decoded::invalid());
        }
        *cursor = probe;
        Some(Decoded {
            codepoint: cp,
            valid: true,
        })
    }

    fn encode(&self, codepoint: u32) -> Vec<u8> {
        let cp = if is_scalar(codepoint) {
            codepoint
        } else {
            REPLACEMENT_CODEPOINT
        };
        let c = char::from_u32(cp).expect("scalar value");
        let mut buf = [0u8; 4];
        c.encode_utf8(&mut buf).as_bytes().to_vec()
    }
}

enum ByteOrder {
    Little,
    Big,
}

fn utf16_decode(order: &ByteOrder, cursor: &mut ByteCursor<'_>) -> Option<Decoded> {
    fn read_unit(order: &ByteOrder, cursor: &mut ByteCursor<'_>) -> Option<u16> {
        let mut probe = cursor.clone();
        let a = probe.next_byte()?;
        let b = probe.next_byte()?;
        *cursor = probe;
        Some(match order {
            ByteOrder::Little => u16::from_le_bytes([a, b]),
            ByteOrder::Big => u16::from_be_bytes([a, b]),
        })
    }

    if cursor.is_end() {
        return None;
    }
    let mut probe = cursor.clone();
    let Some(first) = read_unit(order, &mut probe) else {
        // odd trailing byte
        cursor.advance();
        return Some(Decoded::invalid());
    };
    match first {
        0xD800..=0xDBFF => {
            let mut pair = probe.clone();
            match read_unit(order, &mut pair) {
                Some(second @ 0xDC00..=0xDFFF) => {
                    let cp = 0x10000
                        + (((first - 0xD800) as u32) << 10)
                        + (second - 0xDC00) as u32;
                    *cursor = pair;
                    Some(Decoded {
                        codepoint: cp,
                        valid: true,
                    })
                }
                _ => {
                    // unpaired high surrogate: consume the unit only
                    *cursor = probe;
                    Some(Decoded::invalid())
                }
            }
        }
        0xDC00..=0xDFFF => {
            *cursor = probe;
            Some(Decoded::invalid())
        }
        _ => {
            *cursor = probe;
            Some(Decoded {
                codepoint: first as u32,
                valid: true,
            })
        }
    }
}

fn utf16_encode(order: &ByteOrder, codepoint: u32) -> Vec<u8> {
    let cp = if is_scalar(codepoint) {
        codepoint
    } else {
        REPLACEMENT_CODEPOINT
    };
    let push = |out: &mut Vec<u8>, unit: u16| match order {
        ByteOrder::Little => out.extend_from_slice(&unit.to_le_bytes()),
        ByteOrder::Big => out.extend_from_slice(&unit.to_be_bytes()),
    };
    let mut out = Vec::with_capacity(4);
    if cp < 0x10000 {
        push(&mut out, cp as u16);
    } else {
        let v = cp - 0x10000;
        push(&mut out, 0xD800 + (v >> 10) as u16);
        push(&mut out, 0xDC00 + (v & 0x3FF) as u16);
    }
    out
}

/// UTF-16, little endian.
pub struct Utf16Le;

impl Encoding for Utf16Le {
    fn name(&self) -> &'static str {
        "UTF-16LE"
    }

    fn max_codepoint_bytes(&self) -> usize {
        4
    }

    fn decode_one(&self, cursor: &mut ByteCursor<'_>) -> Option<Decoded> {
        utf16_decode(&ByteOrder::Little, cursor)
    }

    fn encode(&self, codepoint: u32) -> Vec<u8> {
        utf16_encode(&ByteOrder::Little, codepoint)
    }
}

/// UTF-16, big endian.
pub struct Utf16Be;

impl Encoding for Utf16Be {
    fn name(&self) -> &'static str {
        "UTF-16BE"
    }

    fn max_codepoint_bytes(&self) -> usize {
        4
    }

    fn decode_one(&self, cursor: &mut ByteCursor<'_>) -> Option<Decoded> {
        utf16_decode(&ByteOrder::Big, cursor)
    }

    fn encode(&self, codepoint: u32) -> Vec<u8> {
        utf16_encode(&ByteOrder::Big, codepoint)
    }
}

pub static UTF8: Utf8 = Utf8;
pub static UTF16LE: Utf16Le = Utf16Le;
pub static UTF16BE: Utf16Be = Utf16Be;

/// Looks up a pre-registered encoding by name (case-insensitive).
pub fn get(name: &str) -> Option<&'static dyn Encoding> {
    if name.eq_ignore_ascii_case(UTF8.name()) {
        Some(&UTF8)
    } else if name.eq_ignore_ascii_case(UTF16LE.name()) {
        Some(&UTF16LE)
    } else if name.eq_ignore_ascii_case(UTF16BE.name()) {
        Some(&UTF16BE)
    } else {
        None
    }
}
