//! Compact timeline file (CTF) codec.
//!
//! Binary layout (see spec §4.6 / §6.3):
//!
//! ```text
//! signature (16 bytes) = "crocket\n" . float32_native(1.0) . "\r\n\0\x1a"
//! leb128(num_nonempty_tracks)
//! for each non-empty track:
//!   leb128(name_len) . name_bytes
//!   leb128(nkeys)
//!   for each key:
//!     leb128(row_delta) . float32_native(value) . u8(interp)
//! ```
//!
//! `row_delta` is the absolute row for the first key, and
//! `row[i] - (row[i-1] + 1)` (the count of empty rows skipped) afterwards.
//!
//! The signature's embedded `1.0` is deliberately stored in **native** byte
//! order: a reader on a different-endian host sees a mismatched signature
//! and rejects the file. Don't normalize this to little/big-endian — that
//! would silently defeat the format's only endianness check.

use crate::error::{CtfError, CtfResult};
use crate::interp::Interp;
use crate::leb128;
use crate::table::TrackTable;

const SIG_PART1: &[u8; 8] = b"crocket\n";
const SIG_VERSION: f32 = 1.0;
const SIG_PART3: &[u8; 4] = b"\r\n\0\x1a";
const SIGNATURE_LEN: usize = 16;

fn push_signature(out: &mut Vec<u8>) {
    out.extend_from_slice(SIG_PART1);
    out.extend_from_slice(&SIG_VERSION.to_ne_bytes());
    out.extend_from_slice(SIG_PART3);
}

fn check_signature(buf: &[u8]) -> bool {
    buf.len() >= SIGNATURE_LEN
        && &buf[0..8] == SIG_PART1
        && buf[8..12] == SIG_VERSION.to_ne_bytes()
        && &buf[12..16] == SIG_PART3
}

/// Encode the full track table. Empty tracks are omitted, as spec.md §4.6
/// allows.
pub fn encode(table: &TrackTable) -> Vec<u8> {
    let mut out = Vec::new();
    push_signature(&mut out);

    let nonempty = table.tracks().iter().filter(|t| !t.is_empty()).count() as u32;
    leb128::encode(nonempty, &mut out);

    for track in table.tracks() {
        if track.is_empty() {
            continue;
        }
        leb128::encode(track.name.len() as u32, &mut out);
        out.extend_from_slice(track.name.as_bytes());
        leb128::encode(track.len() as u32, &mut out);

        let mut next_ref = 0u32;
        for key in track.keys() {
            leb128::encode(key.row - next_ref, &mut out);
            out.extend_from_slice(&key.value.to_ne_bytes());
            out.push(key.interp.to_byte());
            next_ref = key.row + 1;
        }
    }

    out
}

/// Decode a CTF payload into `table`, replaying keyframes into every track
/// whose name matches. Unknown track names are parsed (to stay in sync with
/// the stream) and discarded.
///
/// A signature mismatch is reported as `Err` so tests/CLI tooling can
/// observe it directly; the session controller is the layer that turns that
/// into a silent "load is a no-op" per spec.md §7.
pub fn decode(buf: &[u8], table: &mut TrackTable) -> CtfResult<()> {
    if !check_signature(buf) {
        return Err(CtfError::BadSignature);
    }
    let mut offset = SIGNATURE_LEN;

    let track_count = leb128::decode(buf, &mut offset)?;
    for _ in 0..track_count {
        let name_len = leb128::decode(buf, &mut offset)? as usize;
        let name_end = offset
            .checked_add(name_len)
            .filter(|&end| end <= buf.len())
            .ok_or(CtfError::Truncated { expected: name_len, got: buf.len().saturating_sub(offset) })?;
        let name = std::str::from_utf8(&buf[offset..name_end]).map_err(|_| CtfError::BadSignature)?;
        offset = name_end;

        let index = table.index_of(name);
        let nkeys = leb128::decode(buf, &mut offset)?;

        if let Some(index) = index {
            let track = table.track_mut(index).expect("index_of returned a valid index");
            track.clear();
        }

        let mut next_ref = 0u32;
        for _ in 0..nkeys {
            let delta = leb128::decode(buf, &mut offset)?;
            let row = next_ref + delta;
            let value_end = offset
                .checked_add(4)
                .filter(|&end| end <= buf.len())
                .ok_or(CtfError::Truncated { expected: 4, got: buf.len().saturating_sub(offset) })?;
            let value = f32::from_ne_bytes(buf[offset..value_end].try_into().unwrap());
            offset = value_end;
            let interp_byte = *buf.get(offset).ok_or(CtfError::Truncated { expected: 1, got: 0 })?;
            offset += 1;
            next_ref = row + 1;

            if let Some(index) = index {
                // Keys arrive in ascending-row order from the deltas, so
                // pushing directly preserves sort order without going
                // through the binary-search insertion path.
                table
                    .track_mut(index)
                    .expect("index_of returned a valid index")
                    .push_sorted(row, value, Interp::from(interp_byte));
            }
        }
    }

    Ok(())
}

/// Parse a CTF buffer into its raw `(name, keys)` pairs without matching
/// against a pre-declared track table. Used by inspection tooling, which
/// doesn't know the track names ahead of time the way a running session
/// does.
pub fn scan(buf: &[u8]) -> CtfResult<Vec<(String, Vec<crate::track::Key>)>> {
    if !check_signature(buf) {
        return Err(CtfError::BadSignature);
    }
    let mut offset = SIGNATURE_LEN;
    let track_count = leb128::decode(buf, &mut offset)?;
    let mut tracks = Vec::with_capacity(track_count as usize);

    for _ in 0..track_count {
        let name_len = leb128::decode(buf, &mut offset)? as usize;
        let name_end = offset
            .checked_add(name_len)
            .filter(|&end| end <= buf.len())
            .ok_or(CtfError::Truncated { expected: name_len, got: buf.len().saturating_sub(offset) })?;
        let name = std::str::from_utf8(&buf[offset..name_end]).map_err(|_| CtfError::BadSignature)?.to_string();
        offset = name_end;

        let nkeys = leb128::decode(buf, &mut offset)?;
        let mut keys = Vec::with_capacity(nkeys as usize);
        let mut next_ref = 0u32;
        for _ in 0..nkeys {
            let delta = leb128::decode(buf, &mut offset)?;
            let row = next_ref + delta;
            let value_end = offset
                .checked_add(4)
                .filter(|&end| end <= buf.len())
                .ok_or(CtfError::Truncated { expected: 4, got: buf.len().saturating_sub(offset) })?;
            let value = f32::from_ne_bytes(buf[offset..value_end].try_into().unwrap());
            offset = value_end;
            let interp_byte = *buf.get(offset).ok_or(CtfError::Truncated { expected: 1, got: 0 })?;
            offset += 1;
            next_ref = row + 1;
            keys.push(crate::track::Key::new(row, value, Interp::from(interp_byte)));
        }
        tracks.push((name, keys));
    }

    Ok(tracks)
}
