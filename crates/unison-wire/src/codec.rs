//! The tag-prefixed binary codec for [`Value`]s.
//!
//! Every value starts with a one-byte tag. Integers are encoded with the
//! smallest tag that fits the value; strings and collections carry a
//! big-endian `u16` length; floats are big-endian IEEE-754 doubles. Object
//! keys are written in insertion order and decoders accept any order.
//!
//! Truncated input fails with [`WireError::Truncated`] at the offset where
//! more bytes were expected -- consumers treat that as "drop the message",
//! never as partial data.

use byteorder::{BigEndian, ByteOrder};

use crate::value::Value;
use crate::WireError;

// Wire tags.
const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_U8: u8 = 0x03;
const TAG_U16: u8 = 0x04;
const TAG_U32: u8 = 0x05;
const TAG_I32: u8 = 0x06;
const TAG_F64: u8 = 0x07;
const TAG_STR: u8 = 0x08;
const TAG_ARRAY: u8 = 0x09;
const TAG_OBJECT: u8 = 0x0A;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a value to a fresh buffer.
pub fn encode(value: &Value) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    encode_into(value, &mut out)?;
    Ok(out)
}

/// Encode a value, appending to `out`.
pub fn encode_into(value: &Value, out: &mut Vec<u8>) -> Result<(), WireError> {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Int(i) => encode_int(*i, out)?,
        Value::Float(f) => {
            out.push(TAG_F64);
            out.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Value::Str(s) => encode_str(s, out)?,
        Value::Array(items) => {
            if items.len() > usize::from(u16::MAX) {
                return Err(WireError::CollectionTooLong { len: items.len() });
            }
            out.push(TAG_ARRAY);
            out.extend_from_slice(&(items.len() as u16).to_be_bytes());
            for item in items {
                encode_into(item, out)?;
            }
        }
        Value::Object(pairs) => {
            if pairs.len() > usize::from(u16::MAX) {
                return Err(WireError::CollectionTooLong { len: pairs.len() });
            }
            out.push(TAG_OBJECT);
            out.extend_from_slice(&(pairs.len() as u16).to_be_bytes());
            // Keys go out in insertion order -- no canonicalization.
            for (key, item) in pairs {
                encode_str(key, out)?;
                encode_into(item, out)?;
            }
        }
    }
    Ok(())
}

/// Integers use the smallest fitting tag.
fn encode_int(i: i64, out: &mut Vec<u8>) -> Result<(), WireError> {
    if (0..=255).contains(&i) {
        out.push(TAG_U8);
        out.push(i as u8);
    } else if (256..=65_535).contains(&i) {
        out.push(TAG_U16);
        out.extend_from_slice(&(i as u16).to_be_bytes());
    } else if (65_536..=i64::from(u32::MAX)).contains(&i) {
        out.push(TAG_U32);
        out.extend_from_slice(&(i as u32).to_be_bytes());
    } else if (i64::from(i32::MIN)..0).contains(&i) {
        out.push(TAG_I32);
        out.extend_from_slice(&(i as i32).to_be_bytes());
    } else {
        return Err(WireError::IntOutOfRange { value: i });
    }
    Ok(())
}

fn encode_str(s: &str, out: &mut Vec<u8>) -> Result<(), WireError> {
    let bytes = s.as_bytes();
    if bytes.len() > usize::from(u16::MAX) {
        return Err(WireError::StringTooLong { len: bytes.len() });
    }
    out.push(TAG_STR);
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one value from the front of `bytes`, returning it and the number
/// of bytes consumed.
pub fn decode(bytes: &[u8]) -> Result<(Value, usize), WireError> {
    let mut cursor = Cursor { bytes, offset: 0 };
    let value = cursor.read_value()?;
    Ok((value, cursor.offset))
}

/// Decode a value that must occupy the entire input.
pub fn decode_exact(bytes: &[u8]) -> Result<Value, WireError> {
    let (value, consumed) = decode(bytes)?;
    if consumed != bytes.len() {
        return Err(WireError::TrailingBytes {
            len: bytes.len() - consumed,
        });
    }
    Ok(value)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], WireError> {
        if self.offset + n > self.bytes.len() {
            return Err(WireError::Truncated { offset: self.offset });
        }
        let slice = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, WireError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    fn read_value(&mut self) -> Result<Value, WireError> {
        let tag_offset = self.offset;
        let tag = self.read_u8()?;
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_FALSE => Ok(Value::Bool(false)),
            TAG_TRUE => Ok(Value::Bool(true)),
            TAG_U8 => Ok(Value::Int(i64::from(self.read_u8()?))),
            TAG_U16 => Ok(Value::Int(i64::from(self.read_u16()?))),
            TAG_U32 => Ok(Value::Int(i64::from(BigEndian::read_u32(self.take(4)?)))),
            TAG_I32 => Ok(Value::Int(i64::from(BigEndian::read_i32(self.take(4)?)))),
            TAG_F64 => Ok(Value::Float(f64::from_bits(BigEndian::read_u64(
                self.take(8)?,
            )))),
            TAG_STR => self.read_str().map(Value::Str),
            TAG_ARRAY => {
                let count = self.read_u16()?;
                let mut items = Vec::with_capacity(usize::from(count).min(4096));
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Ok(Value::Array(items))
            }
            TAG_OBJECT => {
                let count = self.read_u16()?;
                let mut pairs = Vec::with_capacity(usize::from(count).min(4096));
                for _ in 0..count {
                    let key_tag_offset = self.offset;
                    let key_tag = self.read_u8()?;
                    if key_tag != TAG_STR {
                        return Err(WireError::UnknownTag {
                            tag: key_tag,
                            offset: key_tag_offset,
                        });
                    }
                    let key = self.read_str()?;
                    let value = self.read_value()?;
                    pairs.push((key, value));
                }
                Ok(Value::Object(pairs))
            }
            other => Err(WireError::UnknownTag {
                tag: other,
                offset: tag_offset,
            }),
        }
    }

    /// Read the body of a string (length + bytes); the tag is consumed by
    /// the caller.
    fn read_str(&mut self) -> Result<String, WireError> {
        let len = usize::from(self.read_u16()?);
        let payload_offset = self.offset;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8 {
            offset: payload_offset,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
