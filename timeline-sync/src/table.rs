//! The fixed, ordered track table and the seconds↔rows timescale.

use crate::track::Track;

/// Conversion factor between host seconds and rows, `rows_per_second = rpm /
/// 60`. The sentinel `rpm == 60.0` means "the host already supplies rows, not
/// seconds" (`Timescale::ROWS_ARE_NATIVE`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timescale(f32);

impl Timescale {
    /// Pass this as `rpm` to `Session::init` to work directly in rows.
    pub const ROWS_ARE_NATIVE: f32 = 60.0;

    pub fn from_rpm(rpm: f32) -> Self {
        Timescale(rpm / 60.0)
    }

    pub fn rows_per_second(self) -> f32 {
        self.0
    }

    pub fn seconds_to_rows(self, seconds: f32) -> f32 {
        seconds * self.0
    }

    pub fn rows_to_seconds(self, rows: f32) -> f32 {
        rows / self.0
    }
}

/// The fixed, insertion-ordered list of tracks known at build time.
///
/// The table's length and each track's name binding are immutable for the
/// life of the session; each track's keyframe sequence is mutable.
#[derive(Debug, Clone, Default)]
pub struct TrackTable {
    tracks: Vec<Track>,
}

impl TrackTable {
    /// Build a table from a fixed list of track names, in declaration order.
    /// This is the Rust-native replacement for the build-time
    /// name-to-variable-slot binding described in spec.md §9: instead of a
    /// macro binding raw pointers, the caller supplies names up front and
    /// reads sampled values back out by index after each `update`.
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        TrackTable { tracks: names.into_iter().map(Track::new).collect() }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.name == name)
    }

    /// `set_key` on the track at `track_index`. Out-of-range indices are a
    /// silent no-op, matching spec.md §4.2.
    pub fn set_key(&mut self, track_index: usize, row: u32, value: f32, interp: crate::interp::Interp) {
        if let Some(t) = self.tracks.get_mut(track_index) {
            t.set_key(row, value, interp);
        }
    }

    /// `delete_key` on the track at `track_index`. Out-of-range indices are a
    /// silent no-op, matching spec.md §4.2.
    pub fn delete_key(&mut self, track_index: usize, row: u32) {
        if let Some(t) = self.tracks.get_mut(track_index) {
            t.delete_key(row);
        }
    }

    /// Clear every track's keyframes, as happens on reconnect before the
    /// server repopulates them.
    pub fn clear_all(&mut self) {
        for t in &mut self.tracks {
            t.clear();
        }
    }

    /// Sample every track at `row` in declaration order.
    pub fn sample_all(&self, row: f32) -> Vec<f32> {
        self.tracks.iter().map(|t| t.sample(row)).collect()
    }
}
