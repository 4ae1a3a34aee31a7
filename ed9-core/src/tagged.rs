//! 32-bit tagged immediates.
//!
//! The top two bits select the kind, the low 30 bits carry the payload:
//!
//! | bits  | kind       | payload                                   |
//! |-------|------------|-------------------------------------------|
//! | `00`  | undefined  | raw 30-bit value (return addresses, ids)  |
//! | `01`  | integer    | sign-extended 30-bit integer              |
//! | `10`  | float      | IEEE-754 bits shifted right by two        |
//! | `11`  | string     | absolute offset into the string pool      |

use std::fmt;

use crate::binary::{BinaryReader, PoolString};
use crate::error::{Ed9Error, Result};

pub const PAYLOAD_MASK: u32 = 0x3FFF_FFFF;
const TAG_MASK: u32 = 0xC000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Undef = 0,
    Int = 1,
    Float = 2,
    Str = 3,
}

/// A raw tagged word as stored in the file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TaggedWord(pub u32);

impl fmt::Debug for TaggedWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaggedWord({:?}, 0x{:08X})", self.tag(), self.0)
    }
}

impl TaggedWord {
    pub fn tag(self) -> Tag {
        match (self.0 & TAG_MASK) >> 30 {
            0 => Tag::Undef,
            1 => Tag::Int,
            2 => Tag::Float,
            _ => Tag::Str,
        }
    }

    pub fn payload(self) -> u32 {
        self.0 & PAYLOAD_MASK
    }

    pub fn undef(v: u32) -> Self {
        Self(encode_undef(v))
    }

    pub fn int(v: i32) -> Self {
        Self(encode_int(v))
    }

    pub fn float(v: f32) -> Self {
        Self(encode_float(v))
    }

    pub fn string(offset: u32) -> Self {
        Self(encode_string(offset))
    }
}

pub fn encode_undef(v: u32) -> u32 {
    v & PAYLOAD_MASK
}

/// Negative values wrap to their 32-bit two's complement before clipping.
pub fn encode_int(v: i32) -> u32 {
    (v as u32 & PAYLOAD_MASK) | 0x4000_0000
}

/// Drops the two lowest mantissa bits; [`decode_float`] shifts them back in
/// as zeros, so decode followed by encode is the identity on float words.
pub fn encode_float(f: f32) -> u32 {
    (f.to_bits() >> 2) | 0x8000_0000
}

pub fn encode_string(offset: u32) -> u32 {
    (offset & PAYLOAD_MASK) | 0xC000_0000
}

pub fn decode_undef(w: u32) -> u32 {
    w & PAYLOAD_MASK
}

pub fn decode_int(w: u32) -> i32 {
    ((w << 2) as i32) >> 2
}

pub fn decode_float(w: u32) -> f32 {
    f32::from_bits((w & PAYLOAD_MASK) << 2)
}

pub fn decode_string_offset(w: u32) -> u32 {
    w & PAYLOAD_MASK
}

/// Dereference a string word through the pool.
pub fn decode_string(reader: &BinaryReader<'_>, w: u32) -> Result<PoolString> {
    reader.read_string_at(decode_string_offset(w) as usize)
}

/// Reject payloads that cannot be represented without clipping.
pub fn check_payload(v: u64) -> Result<u32> {
    if v > PAYLOAD_MASK as u64 {
        return Err(Ed9Error::BadTagWord(v));
    }
    Ok(v as u32)
}

pub fn check_int(v: i64) -> Result<i32> {
    const MIN: i64 = -(1 << 29);
    const MAX: i64 = (1 << 29) - 1;
    if !(MIN..=MAX).contains(&v) {
        return Err(Ed9Error::BadTagWord(v as u64));
    }
    Ok(v as i32)
}

/// A tagged word with its payload decoded.
///
/// Strings hold text, not offsets: offsets only exist in a concrete binary
/// and are reassigned when a script is assembled.
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    Undef(u32),
    Int(i32),
    Float(f32),
    Str(String),
    /// A string pointer that could not be read back; kept raw.
    StrPtr(u32),
}

impl TaggedValue {
    pub fn tag(&self) -> Tag {
        match self {
            TaggedValue::Undef(_) => Tag::Undef,
            TaggedValue::Int(_) => Tag::Int,
            TaggedValue::Float(_) => Tag::Float,
            TaggedValue::Str(_) | TaggedValue::StrPtr(_) => Tag::Str,
        }
    }

    /// Decode `w`, resolving string pointers through `reader`.
    ///
    /// A bad pointer is not fatal: it comes back as [`TaggedValue::StrPtr`]
    /// together with the read error.
    pub fn decode(reader: &BinaryReader<'_>, w: TaggedWord) -> (Self, Option<Ed9Error>) {
        match w.tag() {
            Tag::Undef => (TaggedValue::Undef(decode_undef(w.0)), None),
            Tag::Int => (TaggedValue::Int(decode_int(w.0)), None),
            Tag::Float => (TaggedValue::Float(decode_float(w.0)), None),
            Tag::Str => {
                let off = decode_string_offset(w.0);
                match decode_string(reader, w.0) {
                    Ok(s) if s.lossy => (
                        TaggedValue::Str(s.text),
                        Some(Ed9Error::BadEncoding(off as usize)),
                    ),
                    Ok(s) => (TaggedValue::Str(s.text), None),
                    Err(e) => (TaggedValue::StrPtr(off), Some(e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_follow_top_bits() {
        assert_eq!(TaggedWord(0x0000_0010).tag(), Tag::Undef);
        assert_eq!(TaggedWord(encode_int(-5)).tag(), Tag::Int);
        assert_eq!(TaggedWord(encode_float(1.0)).tag(), Tag::Float);
        assert_eq!(TaggedWord(encode_string(0x40)).tag(), Tag::Str);
    }

    #[test]
    fn int_payload_is_sign_extended() {
        assert_eq!(encode_int(42), 0x4000_002A);
        assert_eq!(decode_int(encode_int(42)), 42);
        assert_eq!(encode_int(-1), 0x7FFF_FFFF);
        assert_eq!(decode_int(encode_int(-1)), -1);
        assert_eq!(decode_int(encode_int(-(1 << 29))), -(1 << 29));
    }

    #[test]
    fn float_words_survive_decode_encode() {
        for w in [0x8FE0_0000u32, 0x8000_0001, 0xBF00_0000, 0x8000_0000] {
            assert_eq!(encode_float(decode_float(w)), w);
        }
        assert_eq!(decode_float(encode_float(1.5)), 1.5);
        // the two low mantissa bits are gone
        let lossy = f32::from_bits(0x3F80_0003);
        assert_eq!(decode_float(encode_float(lossy)).to_bits(), 0x3F80_0000);
    }

    #[test]
    fn string_words_resolve_through_pool() {
        let buf = b"\0\0\0\0Hello\0";
        let reader = BinaryReader::new(buf);
        let (v, err) = TaggedValue::decode(&reader, TaggedWord::string(4));
        assert_eq!(v, TaggedValue::Str("Hello".into()));
        assert!(err.is_none());

        let (v, err) = TaggedValue::decode(&reader, TaggedWord::string(100));
        assert_eq!(v, TaggedValue::StrPtr(100));
        assert!(err.is_some());
    }

    #[test]
    fn payload_checks() {
        assert!(check_payload(0x3FFF_FFFF).is_ok());
        assert!(matches!(check_payload(0x4000_0000), Err(Ed9Error::BadTagWord(_))));
        assert!(check_int(1 << 29).is_err());
        assert_eq!(check_int(-3).unwrap(), -3);
    }
}
