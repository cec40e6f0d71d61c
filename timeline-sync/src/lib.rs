//! Client-side keyframe synchronization engine for demo-scene productions.
//!
//! A production declares a fixed set of named tracks; each frame the
//! session samples every track at the current timeline position. While
//! authoring, the session can speak to an external editor server over TCP,
//! applying live keyframe edits, seeks, and transport commands as they
//! arrive. For distribution, the authored keyframe set is baked into a
//! compact timeline file ([`ctf`]) and played back without a server.
//!
//! The entry point is [`session::Session`]; everything else is building
//! blocks it composes.

pub mod ctf;
pub mod error;
pub mod interp;
pub mod leb128;
pub mod protocol;
pub mod session;
pub mod state;
pub mod table;
pub mod track;
pub mod transport;

pub use error::{CtfError, ProtocolError, TransportError};
pub use interp::Interp;
pub use session::{Mode, Session};
pub use state::StateEvents;
pub use table::{Timescale, TrackTable};
pub use track::{Key, Track};
