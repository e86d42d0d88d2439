//! parser.rs
//!
//! Turns the contract's debug log into typed events.
//!
//! The runtime prints one message per line as a Cairo enum constructor:
//!
//! ```text
//! Message::NOTE_ON(NoteOn { channel: 0, note: 60, velocity: 100, time: FP32x32 { mag: 120, sign: false } })
//! ```
//!
//! Logs are noisy (test runner chatter, gas reports, trailing commas), so the
//! parser is a filter rather than a validator: any line that does not carry a
//! known `Message::TAG(...)` constructor is skipped.
//!
//! This module takes care of:
//!  - Locating the constructor and dispatching on its tag
//!  - Reading the per-tag fields and the event's tick delta
//!  - Normalizing NOTE_ON with velocity=0 into NoteOff

use tracing::{debug, debug_span, trace, warn};

use crate::fixed::{find_fp, find_optional_fp, find_uint, FieldError};

const CONSTRUCTOR: &str = "Message::";

/// One MIDI message from the log, with only the fields its kind uses.
///
/// Integer fields hold the value as scanned; narrowing to MIDI data widths
/// happens in the encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    /// File header: pulses per quarter note
    Header { ticks_per_beat: u32 },
    NoteOn { channel: u32, note: u32, velocity: u32 },
    NoteOff { channel: u32, note: u32, velocity: u32 },
    /// Tempo change in microseconds per quarter note
    SetTempo { us_per_beat: u64 },
    TimeSignature { numerator: u32, denominator: u32, clocks_per_click: u32 },
    /// Control change: (channel, controller number, value)
    Controller { channel: u32, control: u32, value: u32 },
    /// Raw 14-bit bend value
    PitchWheel { channel: u32, pitch: u32 },
    /// Channel-wide pressure
    AfterTouch { channel: u32, value: u32 },
    /// Per-note pressure
    PolyTouch { channel: u32, note: u32, value: u32 },
    ProgramChange { channel: u32, program: u32 },
    EndOfTrack,
}

impl Message {
    /// Event kind name, as used by MIDI-file tooling.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Header { .. } => "header",
            Message::NoteOn { .. } => "noteOn",
            Message::NoteOff { .. } => "noteOff",
            Message::SetTempo { .. } => "setTempo",
            Message::TimeSignature { .. } => "timeSignature",
            Message::Controller { .. } => "controller",
            Message::PitchWheel { .. } => "pitchWheel",
            Message::AfterTouch { .. } => "afterTouch",
            Message::PolyTouch { .. } => "polyTouch",
            Message::ProgramChange { .. } => "programChange",
            Message::EndOfTrack => "endOfTrack",
        }
    }

    /// File/track metadata rather than channel voice data.
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            Message::Header { .. }
                | Message::SetTempo { .. }
                | Message::TimeSignature { .. }
                | Message::EndOfTrack
        )
    }
}

/// A message plus its tick delta from the previous event of the track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParsedEvent {
    pub message: Message,
    /// `None` only for SET_TEMPO records without a `time` field.
    pub delta: Option<u64>,
}

impl ParsedEvent {
    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }

    pub fn is_meta(&self) -> bool {
        self.message.is_meta()
    }

    pub fn is_end_of_track(&self) -> bool {
        self.message == Message::EndOfTrack
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("line {line}: {source}")]
    MalformedField {
        line: usize,
        #[source]
        source: FieldError,
    },
}

/// Line parser. In strict mode a malformed field fails the line instead of
/// being read as zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct Parser {
    pub strict: bool,
}

impl Parser {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Parse one log line. `Ok(None)` for lines that carry no known message.
    pub fn parse_line(&self, line: &str) -> Result<Option<ParsedEvent>, FieldError> {
        let Some((tag, content)) = split_constructor(line) else {
            return Ok(None);
        };
        let f = Fields { content, strict: self.strict };

        let message = match tag {
            "HEADER" => Message::Header { ticks_per_beat: f.int("ticksPerBeat")? },
            "NOTE_ON" | "NOTE_OFF" => {
                let channel = f.int("channel")?;
                let note = f.int("note")?;
                let velocity = f.int("velocity")?;
                // Velocity 0 is a release in MIDI.
                if tag == "NOTE_OFF" || velocity == 0 {
                    Message::NoteOff { channel, note, velocity }
                } else {
                    Message::NoteOn { channel, note, velocity }
                }
            }
            "SET_TEMPO" => Message::SetTempo { us_per_beat: f.fp_ticks("tempo")? },
            "TIME_SIGNATURE" => Message::TimeSignature {
                numerator: f.int("numerator")?,
                denominator: f.int("denominator")?,
                clocks_per_click: f.int("clocks_per_click")?,
            },
            "CONTROL_CHANGE" => Message::Controller {
                channel: f.int("channel")?,
                control: f.int("control")?,
                value: f.int("value")?,
            },
            "PITCH_WHEEL" => Message::PitchWheel {
                channel: f.int("channel")?,
                pitch: f.int("pitch")?,
            },
            "AFTER_TOUCH" => Message::AfterTouch {
                channel: f.int("channel")?,
                value: f.int("value")?,
            },
            "POLY_TOUCH" => Message::PolyTouch {
                channel: f.int("channel")?,
                note: f.int("note")?,
                value: f.int("value")?,
            },
            "PROGRAM_CHANGE" => Message::ProgramChange {
                channel: f.int("channel")?,
                program: f.int("program")?,
            },
            "END_OF_TRACK" => Message::EndOfTrack,
            _ => {
                trace!(tag, "unknown message tag");
                return Ok(None);
            }
        };

        // SET_TEMPO wraps its time in an Option; every other kind uses a
        // plain literal.
        let delta = match message {
            Message::SetTempo { .. } => f.optional_fp_ticks("time")?,
            _ => Some(f.fp_ticks("time")?),
        };

        Ok(Some(ParsedEvent { message, delta }))
    }

    /// Parse a whole log, keeping recognized events in order.
    pub fn parse_log(&self, text: &str) -> Result<Vec<ParsedEvent>, ParseError> {
        let mut events = Vec::new();
        let mut skipped = 0usize;

        for (idx, line) in text.lines().enumerate() {
            let _line = debug_span!("line", n = idx + 1).entered();
            match self.parse_line(line) {
                Ok(Some(ev)) => events.push(ev),
                Ok(None) => skipped += 1,
                Err(source) => {
                    return Err(ParseError::MalformedField { line: idx + 1, source });
                }
            }
        }

        debug!(events = events.len(), skipped, "parsed log");
        Ok(events)
    }
}

/// Lenient single-line parse: unknown lines and bad fields never fail.
pub fn parse_line(line: &str) -> Option<ParsedEvent> {
    Parser::default().parse_line(line).ok().flatten()
}

/// Lenient parse of a whole log.
pub fn parse_log(text: &str) -> Vec<ParsedEvent> {
    Parser::default().parse_log(text).unwrap_or_default()
}

/// Find `Message::TAG(content)` in a line.
///
/// TAG is `[A-Z_]+`; content runs to the last `)` of the line and must not be
/// empty. The first occurrence that fits wins.
fn split_constructor(line: &str) -> Option<(&str, &str)> {
    line.match_indices(CONSTRUCTOR).find_map(|(at, _)| {
        let rest = &line[at + CONSTRUCTOR.len()..];
        let tag_len = rest
            .bytes()
            .take_while(|b| b.is_ascii_uppercase() || *b == b'_')
            .count();
        if tag_len == 0 {
            return None;
        }
        let (tag, rest) = rest.split_at(tag_len);
        let rest = rest.strip_prefix('(')?;
        let close = rest.rfind(')')?;
        let content = &rest[..close];
        (!content.is_empty()).then_some((tag, content))
    })
}

/// Field access over one record body with the lenient/strict policy applied.
struct Fields<'a> {
    content: &'a str,
    strict: bool,
}

impl Fields<'_> {
    fn int(&self, name: &str) -> Result<u32, FieldError> {
        match find_uint(self.content, name) {
            Ok(v) => Ok(v.unwrap_or(0)),
            Err(e) => self.fallback(e),
        }
    }

    fn fp_ticks(&self, name: &str) -> Result<u64, FieldError> {
        match find_fp(self.content, name) {
            Ok(v) => Ok(v.map(|fp| fp.ticks()).unwrap_or(0)),
            Err(e) => self.fallback(e),
        }
    }

    fn optional_fp_ticks(&self, name: &str) -> Result<Option<u64>, FieldError> {
        match find_optional_fp(self.content, name) {
            Ok(v) => Ok(v.map(|fp| fp.ticks())),
            Err(e) => self.fallback(e).map(Some),
        }
    }

    fn fallback<T: Default>(&self, e: FieldError) -> Result<T, FieldError> {
        if self.strict {
            return Err(e);
        }
        warn!("{e}, using 0");
        Ok(T::default())
    }
}
