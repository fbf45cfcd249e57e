//! Wire framing.

pub mod codec;

pub use codec::{decode_header, encode_header, join_rep_payload, split_rep_payload, HeaderTag};
