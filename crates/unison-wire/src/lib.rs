//! Unison Wire -- binary encoding for inputs, snapshots, and sync messages.
//!
//! The wire layer has three pieces:
//!
//! * [`value`] -- a JSON-like [`Value`](value::Value) that preserves object
//!   key insertion order, the currency of input payloads.
//! * [`codec`] -- the compact, self-describing tag-prefixed binary encoding
//!   of values. Integers use the smallest tag that fits; decoders accept
//!   object keys in any order.
//! * [`framing`] -- the message layouts: input records, tick messages,
//!   snapshot messages, and the sectioned binary snapshot form.
//!
//! Nothing in this crate is part of the deterministic state itself; it is
//! the boundary through which deterministic state travels. Truncated or
//! malformed input is always a decode error, never a panic.

#![deny(unsafe_code)]

pub mod codec;
pub mod framing;
pub mod snapshot;
pub mod value;

pub use codec::{decode, decode_exact, encode, encode_into};
pub use framing::{
    client_hash, ControlKind, ControlRecord, InputData, InputRecord, SnapshotMessage, TickMessage,
};
pub use value::Value;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced while encoding or decoding wire data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Input ended before the value was complete.
    #[error("truncated input at offset {offset}")]
    Truncated {
        /// Byte offset where more data was expected.
        offset: usize,
    },

    /// An unknown type tag was encountered.
    #[error("unknown tag 0x{tag:02x} at offset {offset}")]
    UnknownTag {
        /// The unrecognized tag byte.
        tag: u8,
        /// Byte offset of the tag.
        offset: usize,
    },

    /// A string section was not valid UTF-8.
    #[error("invalid utf-8 in string at offset {offset}")]
    InvalidUtf8 {
        /// Byte offset of the string payload.
        offset: usize,
    },

    /// An integer does not fit any wire tag (outside `i32..=u32` range).
    #[error("integer {value} does not fit any wire tag")]
    IntOutOfRange {
        /// The offending value.
        value: i64,
    },

    /// A string longer than a `u16` length prefix allows.
    #[error("string of {len} bytes exceeds the u16 length prefix")]
    StringTooLong {
        /// Byte length of the string.
        len: usize,
    },

    /// An array or object with more entries than a `u16` count allows.
    #[error("collection of {len} entries exceeds the u16 count prefix")]
    CollectionTooLong {
        /// Entry count.
        len: usize,
    },

    /// Structurally valid encoding that does not match the expected message
    /// shape.
    #[error("malformed message: {details}")]
    Malformed {
        /// What was wrong.
        details: String,
    },

    /// Trailing bytes after a complete value where none were expected.
    #[error("{len} trailing bytes after value")]
    TrailingBytes {
        /// Number of unconsumed bytes.
        len: usize,
    },
}
