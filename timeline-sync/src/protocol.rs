//! The editor wire protocol: handshake literals, opcode table, and message
//! decoding. See spec §4.4 / §6.2.
//!
//! All multi-byte integers on the wire are big-endian. A transmitted float
//! is the 32-bit IEEE-754 bit pattern carried inside a big-endian `u32`
//! container (byte-swap the container, then reinterpret the bits as
//! `f32` — *not* a native-endian float, unlike the CTF file format).

use crate::interp::Interp;

/// Client-to-server handshake greeting, sent first, with no terminator.
pub const CLIENT_GREETING: &[u8; 19] = b"hello, synctracker!";
/// Expected server handshake reply.
pub const SERVER_GREETING: &[u8; 12] = b"hello, demo!";

pub const OP_SET_KEY: u8 = 0;
pub const OP_DELETE_KEY: u8 = 1;
pub const OP_GET_TRACK: u8 = 2;
pub const OP_SET_ROW: u8 = 3;
pub const OP_PAUSE: u8 = 4;
pub const OP_SAVE_TRACKS: u8 = 5;
pub const OP_ACTION: u8 = 6;

/// Number of payload bytes that follow a given opcode byte, per the fixed
/// table in spec §4.4. Unknown opcodes have a payload length of 0: the
/// spec calls this out as legacy, stream-desyncing behavior if a server
/// ever sends an unrecognized opcode with a nonzero payload (see
/// `decode_message`'s doc comment) — a safer variant would resynchronize
/// instead, but that isn't how this protocol has ever shipped.
pub fn payload_len(opcode: u8) -> usize {
    match opcode {
        OP_SET_KEY => 13,
        OP_DELETE_KEY => 8,
        OP_SET_ROW => 4,
        OP_PAUSE => 1,
        OP_SAVE_TRACKS => 0,
        OP_ACTION => 4,
        _ => 0,
    }
}

/// A fully decoded server-to-client message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServerMessage {
    SetKey { track: u32, row: u32, value: f32, interp: Interp },
    DeleteKey { track: u32, row: u32 },
    SetRow { row: u32 },
    Pause { stop: bool },
    SaveTracks,
    Action { n: u8 },
    /// An opcode the client doesn't recognize. No payload was consumed for
    /// it (`payload_len` returns 0 for unknown opcodes), which is the
    /// legacy, potentially stream-desyncing behavior spec §9 documents.
    Unknown { opcode: u8 },
}

/// Decode one message given its opcode byte and its exact payload (already
/// read from the stream per `payload_len(opcode)` bytes).
///
/// # Panics
///
/// Panics if `payload.len() != payload_len(opcode)` — this is a programmer
/// error in the caller (the transport layer), not a malformed-input
/// condition, since the caller controls how many bytes it read.
pub fn decode_message(opcode: u8, payload: &[u8]) -> ServerMessage {
    assert_eq!(payload.len(), payload_len(opcode), "caller must read the exact payload length for this opcode");
    match opcode {
        OP_SET_KEY => {
            let track = u32::from_be_bytes(payload[0..4].try_into().unwrap());
            let row = u32::from_be_bytes(payload[4..8].try_into().unwrap());
            let value = f32::from_bits(u32::from_be_bytes(payload[8..12].try_into().unwrap()));
            let interp = Interp::from(payload[12]);
            ServerMessage::SetKey { track, row, value, interp }
        }
        OP_DELETE_KEY => {
            let track = u32::from_be_bytes(payload[0..4].try_into().unwrap());
            let row = u32::from_be_bytes(payload[4..8].try_into().unwrap());
            ServerMessage::DeleteKey { track, row }
        }
        OP_SET_ROW => {
            let row = u32::from_be_bytes(payload[0..4].try_into().unwrap());
            ServerMessage::SetRow { row }
        }
        OP_PAUSE => ServerMessage::Pause { stop: payload[0] != 0 },
        OP_SAVE_TRACKS => ServerMessage::SaveTracks,
        OP_ACTION => {
            let n = u32::from_be_bytes(payload[0..4].try_into().unwrap());
            ServerMessage::Action { n: n.min(u8::MAX as u32) as u8 }
        }
        other => ServerMessage::Unknown { opcode: other },
    }
}

/// Encode a client-to-server `GET_TRACK` command (opcode 2, u32 name_len
/// big-endian, then the raw name bytes).
pub fn encode_get_track(name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + name.len());
    buf.push(OP_GET_TRACK);
    buf.extend_from_slice(&(name.len() as u32).to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf
}

/// Encode a client-to-server `SET_ROW` command (opcode 3, u32 row
/// big-endian).
pub fn encode_set_row(row: u32) -> [u8; 5] {
    let mut buf = [0u8; 5];
    buf[0] = OP_SET_ROW;
    buf[1..5].copy_from_slice(&row.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_key_payload_decodes_value_as_bit_pattern() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&7u32.to_be_bytes());
        payload.extend_from_slice(&120u32.to_be_bytes());
        payload.extend_from_slice(&1.5f32.to_bits().to_be_bytes());
        payload.push(1);
        match decode_message(OP_SET_KEY, &payload) {
            ServerMessage::SetKey { track, row, value, interp } => {
                assert_eq!(track, 7);
                assert_eq!(row, 120);
                assert_eq!(value, 1.5);
                assert_eq!(interp, Interp::Linear);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn pause_decodes_nonzero_as_stop() {
        assert_eq!(decode_message(OP_PAUSE, &[1]), ServerMessage::Pause { stop: true });
        assert_eq!(decode_message(OP_PAUSE, &[0]), ServerMessage::Pause { stop: false });
    }

    #[test]
    fn action_bit_decodes_n() {
        let payload = 5u32.to_be_bytes();
        assert_eq!(decode_message(OP_ACTION, &payload), ServerMessage::Action { n: 5 });
    }

    #[test]
    fn unknown_opcode_has_zero_payload_len() {
        assert_eq!(payload_len(200), 0);
        assert_eq!(decode_message(200, &[]), ServerMessage::Unknown { opcode: 200 });
    }

    #[test]
    fn get_track_command_matches_wire_format() {
        let cmd = encode_get_track("abc");
        assert_eq!(cmd, vec![OP_GET_TRACK, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn set_row_command_matches_wire_format() {
        let cmd = encode_set_row(0x01020304);
        assert_eq!(cmd, [OP_SET_ROW, 0x01, 0x02, 0x03, 0x04]);
    }
}
