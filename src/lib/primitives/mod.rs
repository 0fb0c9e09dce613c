//! Byte and crypto primitives: SHA-256 with a resumable midstate, compact
//! target decoding, and Bitcoin CompactSize encoding.

pub mod sha256;
pub mod target;
pub mod varint;

pub use sha256::{finish_midstate, midstate_after_64, sha256, sha256d};
pub use target::{be32_to_le_words, compact_to_target_le, hash_be_leq_target_le, le_words_to_be32};
pub use varint::{encode_varint, minimal_le_bytes};
