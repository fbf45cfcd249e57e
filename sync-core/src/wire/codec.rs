//! Pure (I/O-free) framing logic: header tokens, fixed-length header
//! encode/decode, and the `REP` payload's `"<json>__<hash>"` split.
//!
//! Kept separate from `Session`'s socket I/O so the framing rules can be
//! unit-tested without a connection (teacher convention: codec logic
//! stays I/O-free, matching `msgid.rs`'s pure parsing functions).

use std::str::FromStr;

use crate::error::SyncError;

/// The `<TYPE>` token of a header record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderTag {
    Pcb,
    Dif,
    Rep,
    ReqPcb,
    ReqDif,
    Dis,
}

impl std::fmt::Display for HeaderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            HeaderTag::Pcb => "PCB",
            HeaderTag::Dif => "DIF",
            HeaderTag::Rep => "REP",
            HeaderTag::ReqPcb => "REQPCB",
            HeaderTag::ReqDif => "REQDIF",
            HeaderTag::Dis => "!DIS",
        };
        f.write_str(token)
    }
}

impl FromStr for HeaderTag {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PCB" => Ok(HeaderTag::Pcb),
            "DIF" => Ok(HeaderTag::Dif),
            "REP" => Ok(HeaderTag::Rep),
            "REQPCB" => Ok(HeaderTag::ReqPcb),
            "REQDIF" => Ok(HeaderTag::ReqDif),
            "!DIS" => Ok(HeaderTag::Dis),
            other => Err(SyncError::BadFrame(format!("unknown header type {other:?}"))),
        }
    }
}

/// Build the fixed-length (`header_len` bytes) header record for a
/// message of type `tag` carrying `payload_len` payload bytes.
pub fn encode_header(tag: HeaderTag, payload_len: usize, header_len: usize) -> Result<Vec<u8>, SyncError> {
    let content = format!("{tag}_{payload_len}");
    if content.len() > header_len {
        return Err(SyncError::BadFrame(format!(
            "header content {content:?} exceeds configured header length {header_len}"
        )));
    }
    let mut bytes = content.into_bytes();
    bytes.resize(header_len, b' ');
    Ok(bytes)
}

/// Parse a fixed-length header record into its `(TYPE, LEN)` pair.
pub fn decode_header(bytes: &[u8]) -> Result<(HeaderTag, usize), SyncError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| SyncError::BadFrame(format!("header is not valid UTF-8: {e}")))?;
    let trimmed = text.trim_end();
    let (type_str, len_str) = trimmed
        .split_once('_')
        .ok_or_else(|| SyncError::BadFrame(format!("header {trimmed:?} missing '_' separator")))?;
    let tag = HeaderTag::from_str(type_str)?;
    let len = len_str
        .parse::<usize>()
        .map_err(|e| SyncError::BadFrame(format!("header length {len_str:?} is not a number: {e}")))?;
    Ok((tag, len))
}

/// The fixed hex width of this crate's content hash (MD5, 16 bytes).
pub const HASH_HEX_LEN: usize = 32;

/// Join a serialized diff and a content hash into a `REP` payload body.
pub fn join_rep_payload(diff_json: &str, hash_hex: &str) -> String {
    format!("{diff_json}__{hash_hex}")
}

/// Split a `REP` payload body at its trailing `__<hash>` marker.
///
/// The hash has a known fixed width, so the split looks at the tail of
/// the string rather than searching for the first `__` — a diff JSON
/// body can legitimately contain two adjacent underscores inside a kiid
/// string (e.g. a provisional kiid), and a naive first-match split would
/// cut the payload in the wrong place.
pub fn split_rep_payload(payload: &str) -> Result<(&str, &str), SyncError> {
    let min_len = HASH_HEX_LEN + 2;
    if payload.len() < min_len {
        return Err(SyncError::BadFrame(format!(
            "REP payload too short to contain a {HASH_HEX_LEN}-byte hash"
        )));
    }
    let split_at = payload.len() - HASH_HEX_LEN;
    let (head, hash) = payload.split_at(split_at);
    let marker_at = head.len() - 2;
    if &head[marker_at..] != "__" {
        return Err(SyncError::BadFrame("REP payload missing '__' separator before hash".to_string()));
    }
    Ok((&head[..marker_at], hash))
}
