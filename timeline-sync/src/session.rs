//! The session controller: ties together the track table, transport, and
//! protocol drain into the single per-frame `update` entry point.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::ctf;
use crate::protocol::{self, ServerMessage};
use crate::state::StateEvents;
use crate::table::{Timescale, TrackTable};
use crate::transport::{self, Transport};

/// Whether the session is driven by a live editor connection or plays back
/// from a loaded timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Player,
    Client,
}

/// The seek offset applied when converting `current_row` back to seconds:
/// prevents float-floor rounding from driving the engine back one row on
/// the very next frame.
const SEEK_EPSILON: f32 = 1.0 / 65536.0;

/// How long the post-handshake `GET_TRACK` sync is allowed to keep draining
/// the server's initial keyframe dump before the session considers itself
/// settled and reports `Connected`.
const SETTLE_DEADLINE: Duration = Duration::from_millis(100);

/// An initialized engine instance. Owns the track table, the optional live
/// connection, and the state/events bitmask.
///
/// This is the explicit-value shape spec.md §9's Design Notes calls out as
/// the cleaner alternative to a process-global singleton: there is exactly
/// one of these per engine instance, created by [`Session::init`] and
/// threaded through every call site, with no hidden global state.
pub struct Session {
    table: TrackTable,
    mode: Mode,
    state: StateEvents,
    current_row: Option<u32>,
    timescale: Timescale,
    transport: Option<Transport>,
    save_file: Option<PathBuf>,
    values: Vec<f32>,
    /// One-shot flag: whether the *next* `update` should attempt a
    /// reconnect. Per spec.md §9 ("Reconnect attempts" / "Reconnect
    /// semantics of set_mode(Client)"), a live disconnect does NOT
    /// automatically retry — only an explicit `set_mode(Client)` call
    /// arms this, and `update` disarms it whether or not the attempt
    /// succeeds.
    reconnect_requested: bool,
}

impl Session {
    /// Bind the fixed, ordered set of track names, then attempt one
    /// connect+handshake. On success the session starts in [`Mode::Client`];
    /// otherwise it falls back to [`Mode::Player`] and loads a timeline from
    /// `data` if given, else from `save_file` if given and readable, else
    /// starts empty.
    pub fn init(
        names: impl IntoIterator<Item = impl Into<String>>,
        save_file: Option<&Path>,
        data: Option<&[u8]>,
        rpm: f32,
    ) -> Session {
        let table = TrackTable::new(names);
        let timescale = Timescale::from_rpm(rpm);

        let mut session = Session {
            table,
            mode: Mode::Player,
            state: StateEvents::empty(),
            current_row: None,
            timescale,
            transport: None,
            save_file: save_file.map(Path::to_path_buf),
            values: Vec::new(),
            reconnect_requested: false,
        };

        if session.try_connect() {
            session.mode = Mode::Client;
        } else {
            load_initial_timeline(&mut session.table, data, save_file);
            session.state.set_playing(true);
            session.state.raise_play();
        }

        session
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The most recent sampled values, in track-declaration order. Empty
    /// until the first `update`.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn table(&self) -> &TrackTable {
        &self.table
    }

    /// Sample a single track by index at an arbitrary host time (seconds, or
    /// rows if `rpm == Timescale::ROWS_ARE_NATIVE`), independent of the
    /// session's current row. This is the host API surface's
    /// `get_value(slot_ref, time)` (spec.md §6.5): the original resolves a
    /// value-slot pointer back to its owning track before converting `time`
    /// to rows and sampling; the index-based lookup here replaces the
    /// pointer identity check, since tracks are addressed by declaration
    /// index rather than by a raw slot pointer (see §9 on the value-slot
    /// output mechanism).
    pub fn sample_track(&self, index: usize, time: f32) -> Option<f32> {
        let row = self.timescale.seconds_to_rows(time);
        self.table.track(index).map(|t| t.sample(row))
    }

    /// The per-frame entry point. `time` is the host's wall clock in
    /// seconds (or rows, if `rpm == Timescale::ROWS_ARE_NATIVE`); it may be
    /// overwritten on seek. Returns the full state+events snapshot as seen
    /// before this call's event bits are cleared.
    pub fn update(&mut self, time: &mut f32) -> StateEvents {
        if self.mode == Mode::Client {
            // Disarmed unconditionally, not just when a reconnect is
            // actually attempted: otherwise a `set_mode(Client)` call made
            // while already connected would leave the flag armed forever,
            // and a later, unrelated disconnect would silently auto-reconnect
            // even though the host never re-armed client mode for *that*
            // disconnect (spec §9's "must not add opportunistic retry
            // loops").
            if self.reconnect_requested {
                self.reconnect_requested = false;
                if self.transport.is_none() {
                    self.try_connect();
                }
            }
            self.drain_messages();
        }

        // The save-to-file action is deliberately decoupled from message
        // handling: SAVE_TRACKS only raises the `Save` event bit when it's
        // received (even during the reconnect handshake's drain), and the
        // file write itself happens here, once per `update`, after the full
        // drain — matching the original's separate end-of-update check.
        if self.mode == Mode::Client && self.state.save() {
            self.save_to_file();
        }

        if self.state.seek() {
            let row = self.current_row.unwrap_or(0);
            *time = if row > 0 { (row as f32 + SEEK_EPSILON) / self.timescale.rows_per_second() } else { 0.0 };
        }

        let row = self.timescale.seconds_to_rows(*time);
        self.values = self.table.sample_all(row);

        if self.mode == Mode::Client && self.state.is_connected() && !self.state.seek() {
            let floored = row.max(0.0) as u32;
            if Some(floored) != self.current_row {
                self.current_row = Some(floored);
                if let Some(t) = &mut self.transport {
                    let msg = protocol::encode_set_row(floored);
                    if t.send_all(&msg).is_err() {
                        self.on_disconnect();
                    }
                }
            }
        }

        let snapshot = self.state;
        self.state.clear_events();
        snapshot
    }

    /// Connect, handshake, then run the `GET_TRACK` sync: ask for every
    /// track in declaration order, draining the server's reply after each
    /// request, then give the server a bounded 100 ms window to settle
    /// before declaring the session connected. Matches spec.md §4.4.
    fn try_connect(&mut self) -> bool {
        let addr = match transport::server_addr_from_env() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("server address resolution failed, staying in player mode: {e}");
                return false;
            }
        };

        let mut t = match Transport::connect(addr) {
            Ok(t) => t,
            Err(e) => {
                warn!("connect to {addr} failed, staying in player mode: {e}");
                return false;
            }
        };

        if let Err(e) = handshake(&mut t) {
            warn!("handshake with {addr} failed, staying in player mode: {e}");
            return false;
        }

        if let Err(e) = t.enter_steady_state() {
            warn!("failed to enter steady state after handshake: {e}");
            return false;
        }

        self.transport = Some(t);

        for i in 0..self.table.len() {
            // Every track's keyframes are discarded right before it is
            // requested, matching the original reconnect loop: the server's
            // reply is a full dump for that track, not a delta.
            let name = {
                let track = self.table.track_mut(i).expect("index within bounds");
                track.clear();
                track.name.clone()
            };
            let cmd = protocol::encode_get_track(&name);
            let sent = self.transport.as_mut().expect("just connected").send_all(&cmd).is_ok();
            if !sent {
                self.transport = None;
                return false;
            }
            if !self.drain_available() {
                return false;
            }
        }

        let deadline = Instant::now() + SETTLE_DEADLINE;
        while Instant::now() < deadline {
            match self.transport.as_mut().expect("just connected").try_recv_opcode() {
                Ok(Some(opcode)) => {
                    if self.read_and_apply(opcode).is_err() {
                        self.transport = None;
                        return false;
                    }
                }
                Ok(None) => std::thread::sleep(Duration::from_micros(500)),
                Err(e) => {
                    warn!("connection error while settling after GET_TRACK sync: {e}");
                    self.transport = None;
                    return false;
                }
            }
        }

        self.state.set_connected(true);
        self.state.raise_connect();
        true
    }

    /// Drain every message available right now, without a deadline. Returns
    /// `false` (and drops the transport) if the connection errors out.
    fn drain_available(&mut self) -> bool {
        loop {
            let opcode = match self.transport.as_mut() {
                Some(t) => t.try_recv_opcode(),
                None => return false,
            };
            match opcode {
                Ok(Some(opcode)) => {
                    if self.read_and_apply(opcode).is_err() {
                        self.transport = None;
                        return false;
                    }
                }
                Ok(None) => return true,
                Err(e) => {
                    warn!("connection error while draining: {e}");
                    self.transport = None;
                    return false;
                }
            }
        }
    }

    fn read_and_apply(&mut self, opcode: u8) -> crate::error::ProtocolResult<()> {
        let len = protocol::payload_len(opcode);
        let mut payload = vec![0u8; len];
        self.transport.as_mut().expect("caller holds a live transport").recv_all(&mut payload)?;
        let message = protocol::decode_message(opcode, &payload);
        debug!("drained message: {message:?}");
        self.apply_message(message);
        Ok(())
    }

    /// Drain every immediately-available server message, applying it to the
    /// track table / state bits before this frame's sampling.
    fn drain_messages(&mut self) {
        loop {
            let opcode = match self.transport.as_mut() {
                Some(t) => t.try_recv_opcode(),
                None => return,
            };
            let opcode = match opcode {
                Ok(Some(op)) => op,
                Ok(None) => return,
                Err(e) => {
                    warn!("connection error while polling for messages: {e}");
                    self.on_disconnect();
                    return;
                }
            };

            if self.read_and_apply(opcode).is_err() {
                warn!("connection error while reading message payload");
                self.on_disconnect();
                return;
            }
        }
    }

    fn apply_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::SetKey { track, row, value, interp } => {
                self.table.set_key(track as usize, row, value, interp);
            }
            ServerMessage::DeleteKey { track, row } => {
                self.table.delete_key(track as usize, row);
            }
            ServerMessage::SetRow { row } => {
                self.current_row = Some(row);
                self.state.raise_seek();
            }
            ServerMessage::Pause { stop } => {
                if stop {
                    self.state.set_playing(false);
                    self.state.raise_stop();
                } else {
                    self.state.set_playing(true);
                    self.state.raise_play();
                }
            }
            ServerMessage::SaveTracks => {
                self.state.raise_save();
            }
            ServerMessage::Action { n } => {
                self.state.raise_action(n);
            }
            ServerMessage::Unknown { opcode } => {
                // No payload was consumed for this opcode (see
                // protocol::payload_len), so the stream may already be
                // desynchronized. Reproduced deliberately for bit-level
                // compatibility with the legacy wire behavior.
                warn!("ignoring unknown opcode {opcode}");
            }
        }
    }

    fn on_disconnect(&mut self) {
        self.transport = None;
        self.state.set_connected(false);
        self.state.raise_disconnect();
    }

    fn save_to_file(&self) {
        let Some(path) = &self.save_file else { return };
        let bytes = ctf::encode(&self.table);
        if let Err(e) = std::fs::write(path, bytes) {
            warn!("failed to save timeline to {}: {e}", path.display());
        }
    }

    /// Switch modes. Switching to [`Mode::Player`] disconnects immediately
    /// and raises `Playing`/`Play`. Switching to [`Mode::Client`] is
    /// advisory only: the actual reconnect attempt happens on the next
    /// `update`, per spec.md §9's documented reconnect semantics.
    pub fn set_mode(&mut self, mode: Mode) {
        match mode {
            Mode::Player => {
                self.transport = None;
                self.state.set_connected(false);
                self.state.set_playing(true);
                self.state.raise_play();
                self.mode = Mode::Player;
                self.reconnect_requested = false;
            }
            Mode::Client => {
                self.mode = Mode::Client;
                self.reconnect_requested = true;
            }
        }
    }

    /// Encode the current track table as a CTF buffer.
    pub fn get_data(&self) -> Vec<u8> {
        ctf::encode(&self.table)
    }

    /// Explicit teardown point matching the host API surface. `Transport`'s
    /// own `Drop` already closes the socket; this mainly documents the
    /// lifecycle step and gives tests something to call.
    pub fn done(self) {}
}

fn handshake(t: &mut Transport) -> crate::error::ProtocolResult<()> {
    use crate::error::ProtocolError;

    t.send_all(protocol::CLIENT_GREETING).map_err(|e| as_handshake_err(e, ProtocolError::HandshakeSend))?;

    let mut reply = [0u8; 12];
    t.recv_all(&mut reply).map_err(|e| as_handshake_err(e, ProtocolError::HandshakeRecv))?;

    if &reply != protocol::SERVER_GREETING {
        return Err(ProtocolError::HandshakeMismatch(reply));
    }
    Ok(())
}

/// Narrow a `send_all`/`recv_all` failure down to the handshake-specific
/// variant `make` names, so a handshake failure reports *which side* of the
/// exchange broke instead of the generic I/O error the transport layer
/// otherwise returns for any send/recv.
fn as_handshake_err(
    e: crate::error::ProtocolError,
    make: fn(std::io::Error) -> crate::error::ProtocolError,
) -> crate::error::ProtocolError {
    use crate::error::ProtocolError;
    match e {
        ProtocolError::Io(io) => make(io),
        ProtocolError::ConnectionClosed => {
            make(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed during handshake"))
        }
        other => other,
    }
}

fn load_initial_timeline(table: &mut TrackTable, data: Option<&[u8]>, save_file: Option<&Path>) {
    if let Some(data) = data {
        if let Err(e) = ctf::decode(data, table) {
            warn!("embedded timeline data failed to decode, starting empty: {e}");
        }
        return;
    }
    if let Some(path) = save_file {
        match std::fs::File::open(path).and_then(|mut f| {
            let mut buf = Vec::new();
            f.read_to_end(&mut buf)?;
            Ok(buf)
        }) {
            Ok(buf) => {
                if let Err(e) = ctf::decode(&buf, table) {
                    warn!("save file {} failed to decode, starting empty: {e}", path.display());
                }
            }
            Err(e) => {
                debug!("no readable save file at {}: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interp;

    fn empty_env() {
        std::env::remove_var(transport::ENV_SERVER);
    }

    #[test]
    fn init_with_unreachable_server_falls_back_to_player_mode() {
        std::env::set_var(transport::ENV_SERVER, "127.0.0.1:1");
        let session = Session::init(["x"], None, None, 60.0);
        assert_eq!(session.mode(), Mode::Player);
        empty_env();
    }

    #[test]
    fn player_mode_initial_state_is_playing_and_play() {
        std::env::set_var(transport::ENV_SERVER, "127.0.0.1:1");
        let session = Session::init(["x"], None, None, 60.0);
        assert!(session.mode() == Mode::Player);
        empty_env();
    }

    #[test]
    fn init_loads_embedded_data_when_resolution_fails() {
        std::env::set_var(transport::ENV_SERVER, "127.0.0.1:1");
        let mut table = TrackTable::new(["foo"]);
        table.set_key(0, 3, 1.5, Interp::Linear);
        let bytes = ctf::encode(&table);

        let session = Session::init(["foo"], None, Some(&bytes), 60.0);
        assert_eq!(session.table().track(0).unwrap().keys().len(), 1);
        empty_env();
    }

    #[test]
    fn update_samples_every_track_in_declaration_order() {
        std::env::set_var(transport::ENV_SERVER, "127.0.0.1:1");
        let mut table = TrackTable::new(["a", "b"]);
        table.set_key(0, 0, 1.0, Interp::Step);
        table.set_key(1, 0, 2.0, Interp::Step);
        let bytes = ctf::encode(&table);

        let mut session = Session::init(["a", "b"], None, Some(&bytes), Timescale::ROWS_ARE_NATIVE);
        let mut time = 0.0;
        session.update(&mut time);
        assert_eq!(session.values(), &[1.0, 2.0]);
        empty_env();
    }

    #[test]
    fn set_mode_player_clears_connected_and_sets_playing() {
        std::env::set_var(transport::ENV_SERVER, "127.0.0.1:1");
        let mut session = Session::init(["x"], None, None, 60.0);
        session.set_mode(Mode::Player);
        let mut time = 0.0;
        let bits = session.update(&mut time);
        assert!(bits.is_playing());
        empty_env();
    }

    #[test]
    fn get_data_round_trips_through_init() {
        std::env::set_var(transport::ENV_SERVER, "127.0.0.1:1");
        let mut table = TrackTable::new(["t"]);
        table.set_key(0, 5, 9.0, Interp::Linear);
        let bytes = ctf::encode(&table);

        let session = Session::init(["t"], None, Some(&bytes), 60.0);
        let round_tripped = session.get_data();
        assert_eq!(round_tripped, bytes);
        empty_env();
    }

    #[test]
    fn sample_track_converts_time_through_the_timescale() {
        std::env::set_var(transport::ENV_SERVER, "127.0.0.1:1");
        let mut table = TrackTable::new(["t"]);
        table.set_key(0, 10, 0.0, Interp::Linear);
        table.set_key(0, 20, 1.0, Interp::Linear);
        let bytes = ctf::encode(&table);

        // rpm = 120 -> 2 rows/second, so 7.5 seconds lands on row 15,
        // the linear segment's midpoint.
        let session = Session::init(["t"], None, Some(&bytes), 120.0);
        assert_eq!(session.sample_track(0, 7.5), Some(0.5));
        assert_eq!(session.sample_track(1, 7.5), None);
        empty_env();
    }

    #[test]
    fn handshake_reports_send_failure_distinctly() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            drop(sock); // closed before the client's greeting can be read
        });

        let mut t = Transport::connect(addr).unwrap();
        // Give the server a moment to accept-then-drop before we write, so
        // the send itself observes the closed peer.
        std::thread::sleep(Duration::from_millis(50));
        let err = handshake(&mut t);
        assert!(matches!(err, Err(crate::error::ProtocolError::HandshakeSend(_)) | Err(crate::error::ProtocolError::HandshakeRecv(_))));
        server.join().unwrap();
    }

    #[test]
    fn handshake_reports_recv_failure_distinctly() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut greeting = [0u8; 19];
            std::io::Read::read_exact(&mut sock, &mut greeting).unwrap();
            drop(sock); // accepts the greeting, then closes before replying
        });

        let mut t = Transport::connect(addr).unwrap();
        let err = handshake(&mut t);
        assert!(matches!(err, Err(crate::error::ProtocolError::HandshakeRecv(_))));
        server.join().unwrap();
    }

    /// `set_mode(Client)` while already connected must not leave
    /// `reconnect_requested` armed forever: a later, unrelated disconnect
    /// must not silently trigger an auto-reconnect the host never asked for.
    #[test]
    fn reconnect_flag_does_not_survive_an_update_once_already_connected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut greeting = [0u8; 19];
            std::io::Read::read_exact(&mut sock, &mut greeting).unwrap();
            std::io::Write::write_all(&mut sock, protocol::SERVER_GREETING).unwrap();
            let mut opcode = [0u8; 1];
            std::io::Read::read_exact(&mut sock, &mut opcode).unwrap();
            assert_eq!(opcode[0], protocol::OP_GET_TRACK);
            let mut len_bytes = [0u8; 4];
            std::io::Read::read_exact(&mut sock, &mut len_bytes).unwrap();
            let len = u32::from_be_bytes(len_bytes) as usize;
            let mut name = vec![0u8; len];
            std::io::Read::read_exact(&mut sock, &mut name).unwrap();
            std::thread::sleep(Duration::from_millis(150));
            drop(sock); // force a mid-session disconnect after settling
        });

        std::env::set_var(transport::ENV_SERVER, addr.to_string());
        let mut session = Session::init(["only"], None, None, Timescale::ROWS_ARE_NATIVE);
        empty_env();
        assert_eq!(session.mode(), Mode::Client);

        // Host re-arms client mode while still connected: per spec §9 this
        // is advisory and must not survive past the very next `update`.
        session.set_mode(Mode::Client);
        assert!(session.reconnect_requested);

        let mut time = 0.0f32;
        session.update(&mut time);
        assert!(!session.reconnect_requested, "reconnect flag must disarm on the next update regardless of connection state");

        // Drive updates until the server's drop is observed as a disconnect,
        // then one more update: it must NOT silently reconnect, since the
        // host never re-armed client mode for *this* disconnect.
        let mut bits = session.update(&mut time);
        let mut spins = 0;
        while !bits.disconnect() && spins < 100 {
            std::thread::sleep(Duration::from_millis(10));
            bits = session.update(&mut time);
            spins += 1;
        }
        assert!(bits.disconnect());
        assert!(!session.reconnect_requested);

        session.update(&mut time);
        assert!(!session.state.is_connected(), "a disconnect must not auto-reconnect without an explicit set_mode(Client)");

        server.join().unwrap();
    }
}
