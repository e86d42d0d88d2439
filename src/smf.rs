// smf.rs
use anyhow::Result;
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
    num::{u4, u7, u14, u15, u24, u28},
};

use crate::parser::Message;
use crate::timeline::{Song, TimedEvent};

const MAX_TICKS_PER_BEAT: u32 = 0x7FFF;
const MAX_DELTA: u64 = (1 << 28) - 1;
const MAX_TEMPO: u64 = (1 << 24) - 1;

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("invalid ticks per beat: {0} (must be 1..=32767)")]
    InvalidTicksPerBeat(u32),
    #[error("track {track}: delta of {delta} ticks does not fit a MIDI delta time")]
    DeltaTooLarge { track: usize, delta: u64 },
    #[error("track {track}: tempo of {us_per_beat} µs per beat does not fit 24 bits")]
    TempoTooLarge { track: usize, us_per_beat: u64 },
    #[error("writing MIDI data: {0}")]
    Io(#[from] std::io::Error),
}

/// Build a Format 1 SMF from a resolved song.
pub fn to_smf(song: &Song) -> Result<Smf<'static>, EncodeError> {
    let ppq = song.header.ticks_per_beat;
    if ppq == 0 || ppq > MAX_TICKS_PER_BEAT {
        return Err(EncodeError::InvalidTicksPerBeat(ppq));
    }
    let header = Header {
        format: Format::Parallel,
        timing: Timing::Metrical(u15::from(ppq as u16)),
    };

    let tracks = song
        .tracks
        .iter()
        .enumerate()
        .map(|(n, events)| encode_track(n, events))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Smf { header, tracks })
}

/// Encode a song to Standard MIDI File bytes.
pub fn encode(song: &Song) -> Result<Vec<u8>> {
    let smf = to_smf(song)?;
    let mut buffer = Vec::new();
    smf.write_std(&mut buffer).map_err(EncodeError::from)?;
    Ok(buffer)
}

fn encode_track(n: usize, events: &[TimedEvent]) -> Result<Vec<TrackEvent<'static>>, EncodeError> {
    let mut track: Vec<TrackEvent<'static>> = Vec::with_capacity(events.len());
    // Ticks of events we skip still count toward the next delta.
    let mut last_tick = 0u64;

    for ev in events {
        let Some(kind) = event_kind(n, ev.message())? else {
            continue;
        };
        let delta = ev.tick.saturating_sub(last_tick);
        if delta > MAX_DELTA {
            return Err(EncodeError::DeltaTooLarge { track: n, delta });
        }
        push(&mut track, delta as u32, kind);
        last_tick = ev.tick;
    }

    Ok(track)
}

fn event_kind(n: usize, msg: &Message) -> Result<Option<TrackEventKind<'static>>, EncodeError> {
    let midi = |channel: u32, message: MidiMessage| TrackEventKind::Midi {
        channel: u4::from(channel as u8),
        message,
    };

    Ok(Some(match *msg {
        Message::NoteOn { channel, note, velocity } => midi(channel, MidiMessage::NoteOn {
            key: data(note),
            vel: data(velocity),
        }),
        Message::NoteOff { channel, note, velocity } => midi(channel, MidiMessage::NoteOff {
            key: data(note),
            vel: data(velocity),
        }),
        Message::Controller { channel, control, value } => midi(channel, MidiMessage::Controller {
            controller: data(control),
            value: data(value),
        }),
        Message::PitchWheel { channel, pitch } => midi(channel, MidiMessage::PitchBend {
            bend: midly::PitchBend(u14::from(pitch as u16)),
        }),
        Message::AfterTouch { channel, value } => midi(channel, MidiMessage::ChannelAftertouch {
            vel: data(value),
        }),
        Message::PolyTouch { channel, note, value } => midi(channel, MidiMessage::Aftertouch {
            key: data(note),
            vel: data(value),
        }),
        Message::ProgramChange { channel, program } => midi(channel, MidiMessage::ProgramChange {
            program: data(program),
        }),
        Message::SetTempo { us_per_beat } => {
            if us_per_beat > MAX_TEMPO {
                return Err(EncodeError::TempoTooLarge { track: n, us_per_beat });
            }
            TrackEventKind::Meta(MetaMessage::Tempo(u24::from(us_per_beat as u32)))
        }
        Message::TimeSignature { numerator, denominator, clocks_per_click } => {
            TrackEventKind::Meta(MetaMessage::TimeSignature(
                numerator as u8,
                denominator_to_power(denominator),
                clocks_per_click as u8,
                8,
            ))
        }
        Message::EndOfTrack => TrackEventKind::Meta(MetaMessage::EndOfTrack),
        // The header only feeds the file header.
        Message::Header { .. } => return Ok(None),
    }))
}

/// Narrow a scanned value to a 7-bit data byte; `midly` keeps the low bits.
fn data(v: u32) -> u7 {
    u7::from(v as u8)
}

fn push(track: &mut Vec<TrackEvent<'static>>, delta: u32, kind: TrackEventKind<'static>) {
    track.push(TrackEvent { delta: u28::from(delta), kind });
}

/// Time signature denominators are stored as a power of two: 4 -> 2, 8 -> 3.
fn denominator_to_power(denom: u32) -> u8 {
    match denom {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        16 => 4,
        32 => 5,
        64 => 6,
        _ => 2, // quarter note
    }
}
