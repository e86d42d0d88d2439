//! pipeline.rs
//!
//! Log text in, MIDI bytes out:
//!  - parse every line, skipping the ones that carry no message
//!  - take the first event as the file header
//!  - split the rest into tracks and resolve absolute ticks per track
//!  - hand the song to the SMF encoder

use anyhow::{Context, Result};
use std::{fs, path::Path};
use tracing::{debug, info};

use crate::parser::Parser;
use crate::smf;
use crate::timeline::{Song, SongHeader, TrailingTrack, resolve, segment};

/// Knobs for one conversion run.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConvertConfig {
    /// Policy for events after the last END_OF_TRACK
    pub trailing: TrailingTrack,
    /// Fail on malformed fields instead of reading them as zero
    pub strict: bool,
}

/// Parse and time-resolve a log into a song.
pub fn assemble(text: &str, config: &ConvertConfig) -> Result<Song> {
    let mut events = Parser::new(config.strict).parse_log(text)?;

    let first = if events.is_empty() { None } else { Some(events.remove(0)) };

    let tracks: Vec<_> = segment(events, config.trailing)
        .iter()
        .map(|track| resolve(track))
        .collect();

    let header = SongHeader::new(first.as_ref(), tracks.first().map(Vec::as_slice));
    debug!(
        ticks_per_beat = header.ticks_per_beat,
        tracks = tracks.len(),
        "assembled song"
    );

    Ok(Song { header, tracks })
}

/// Convert log text into Standard MIDI File bytes.
pub fn convert(text: &str, config: &ConvertConfig) -> Result<Vec<u8>> {
    let song = assemble(text, config)?;
    smf::encode(&song)
}

/// Convert a log file and write the MIDI file. Nothing is written unless
/// encoding succeeds.
pub fn convert_file(input: &Path, output: &Path, config: &ConvertConfig) -> Result<Song> {
    let text = fs::read_to_string(input).with_context(|| format!("reading {:?}", input))?;

    let song = assemble(&text, config).with_context(|| format!("parsing {:?}", input))?;
    let bytes = smf::encode(&song).context("encoding MIDI")?;

    fs::write(output, &bytes).with_context(|| format!("writing {:?}", output))?;
    info!(bytes = bytes.len(), "wrote {:?}", output);

    Ok(song)
}
