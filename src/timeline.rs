//! timeline.rs
//!
//! Cuts the flat event stream into tracks and gives every event an absolute
//! tick.
//!
//! ### Quick primer on tracks and ticks
//! - The contract emits all tracks back to back. Each one is closed by an
//!   END_OF_TRACK message, which belongs to the track it closes.
//! - Event times in the log are deltas: ticks since the previous event of the
//!   same track. Absolute ticks are the running sum, restarting at 0 for every
//!   track.
//! - Ticks become wall-clock time through the header's pulses-per-quarter-note
//!   (PPQ) plus SET_TEMPO events giving microseconds per quarter note.

use clap::ValueEnum;
use tracing::{debug, warn};

use crate::parser::{Message, ParsedEvent};

/// Default tempo: 500,000 µs per quarter note = 120 BPM
pub const DEFAULT_US_PER_BEAT: u64 = 500_000;

/// Default PPQ when the log has no usable header
pub const DEFAULT_TICKS_PER_BEAT: u32 = 480;

/// What to do with events after the last END_OF_TRACK.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TrailingTrack {
    /// Discard them; an unterminated track is treated as incomplete.
    #[default]
    Drop,
    /// Keep them as a final track, closed with a synthetic END_OF_TRACK.
    Close,
}

/// An event tied to an absolute tick from the start of its track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimedEvent {
    pub tick: u64,
    pub event: ParsedEvent,
}

impl TimedEvent {
    pub fn message(&self) -> &Message {
        &self.event.message
    }
}

/// Split events into tracks at every END_OF_TRACK.
pub fn segment(events: Vec<ParsedEvent>, trailing: TrailingTrack) -> Vec<Vec<ParsedEvent>> {
    let mut tracks = Vec::new();
    let mut current = Vec::new();

    for ev in events {
        let closes = ev.is_end_of_track();
        current.push(ev);
        if closes {
            tracks.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        match trailing {
            TrailingTrack::Drop => {
                warn!(events = current.len(), "dropping unterminated trailing track");
            }
            TrailingTrack::Close => {
                debug!(events = current.len(), "closing unterminated trailing track");
                current.push(ParsedEvent { message: Message::EndOfTrack, delta: Some(0) });
                tracks.push(current);
            }
        }
    }

    tracks
}

/// Accumulate delta ticks into absolute ticks.
///
/// A missing delta adds nothing, so the event lands on the previous event's
/// tick.
pub fn resolve(track: &[ParsedEvent]) -> Vec<TimedEvent> {
    let mut tick: u64 = 0;
    track
        .iter()
        .map(|ev| {
            tick = tick.saturating_add(ev.delta.unwrap_or(0));
            TimedEvent { tick, event: *ev }
        })
        .collect()
}

/// File-level information: PPQ plus the tempo and time-signature events
/// seen before the first track boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SongHeader {
    pub ticks_per_beat: u32,
    pub meta: Vec<TimedEvent>,
}

impl SongHeader {
    /// Build the header from the log's first event and the first resolved
    /// track. A first event that is not a HEADER falls back to the default
    /// PPQ.
    pub fn new(first: Option<&ParsedEvent>, first_track: Option<&[TimedEvent]>) -> Self {
        let ticks_per_beat = match first.map(|ev| ev.message) {
            Some(Message::Header { ticks_per_beat }) => ticks_per_beat,
            Some(other) => {
                warn!(kind = other.kind(), "first event is not a header, using {DEFAULT_TICKS_PER_BEAT} PPQ");
                DEFAULT_TICKS_PER_BEAT
            }
            None => DEFAULT_TICKS_PER_BEAT,
        };

        let meta = first_track
            .unwrap_or_default()
            .iter()
            .filter(|t| matches!(t.message(), Message::SetTempo { .. } | Message::TimeSignature { .. }))
            .copied()
            .collect();

        Self { ticks_per_beat, meta }
    }

    /// First tempo of the song (default 120 BPM if none)
    pub fn initial_us_per_beat(&self) -> u64 {
        self.meta
            .iter()
            .find_map(|t| match t.message() {
                Message::SetTempo { us_per_beat } => Some(*us_per_beat),
                _ => None,
            })
            .unwrap_or(DEFAULT_US_PER_BEAT)
    }
}

/// Header plus time-resolved tracks, ready for encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Song {
    pub header: SongHeader,
    pub tracks: Vec<Vec<TimedEvent>>,
}

impl Song {
    pub fn event_count(&self) -> usize {
        self.tracks.iter().map(Vec::len).sum()
    }

    /// Tick of the latest event over all tracks.
    pub fn last_tick(&self) -> u64 {
        self.tracks
            .iter()
            .filter_map(|t| t.last())
            .map(|t| t.tick)
            .max()
            .unwrap_or(0)
    }

    /// Estimated play length in microseconds, following tempo changes from
    /// every track.
    pub fn length_us(&self) -> u64 {
        let ppq = self.header.ticks_per_beat.max(1) as f64;

        let mut tempos: Vec<(u64, u64)> = self
            .tracks
            .iter()
            .flatten()
            .filter_map(|t| match t.message() {
                Message::SetTempo { us_per_beat } => Some((t.tick, *us_per_beat)),
                _ => None,
            })
            .collect();
        tempos.sort_by_key(|&(tick, _)| tick);

        let end = self.last_tick();
        let mut us = 0.0;
        let mut at = 0u64;
        let mut us_per_beat = DEFAULT_US_PER_BEAT;
        for (tick, next) in tempos.into_iter().take_while(|&(tick, _)| tick <= end) {
            us += (tick - at) as f64 / ppq * us_per_beat as f64;
            at = tick;
            us_per_beat = next;
        }
        us += (end - at) as f64 / ppq * us_per_beat as f64;
        us as u64
    }
}

/// Format a microsecond timestamp as MM:SS string for logging/debugging.
pub fn format_duration(us: u64) -> String {
    let total_secs = us / 1_000_000;
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    format!("{:02}:{:02}", mins, secs)
}
