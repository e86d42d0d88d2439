use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::Level;

use cairo_midi::timeline::{TrailingTrack, format_duration};
use cairo_midi::{ConvertConfig, convert_file};

#[derive(Parser, Debug)]
#[command(version, about = "Convert a contract MIDI event log into a Standard MIDI File")]
struct Opt {
    /// Log with one `Message::...` record per line
    input: PathBuf,
    /// Output MIDI file path
    output: PathBuf,
    /// What to do with events after the last END_OF_TRACK
    #[arg(long, value_enum, default_value_t = TrailingTrack::Drop)]
    trailing: TrailingTrack,
    /// Fail on malformed numeric fields instead of reading them as zero
    #[arg(long)]
    strict: bool,
    /// More diagnostics on stderr (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Opt {
    fn config(&self) -> ConvertConfig {
        ConvertConfig { trailing: self.trailing, strict: self.strict }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run(opt: &Opt) -> Result<()> {
    println!("Converting {} ...", opt.input.display());

    let song = convert_file(&opt.input, &opt.output, &opt.config())?;

    let us_per_beat = song.header.initial_us_per_beat();
    println!("PPQ: {}", song.header.ticks_per_beat);
    println!(
        "Initial tempo: {} µs/qn (~{:.1} BPM)",
        us_per_beat,
        60_000_000.0 / us_per_beat.max(1) as f64
    );
    println!("Tracks: {}", song.tracks.len());
    println!("Total events: {}", song.event_count());
    println!("Estimated track length: {}", format_duration(song.length_us()));
    println!("Generated MIDI file: {}", opt.output.display());

    Ok(())
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    init_logging(opt.verbose);
    run(&opt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const LOG: &str = "\
running 1 test
Message::HEADER(Header { ticksPerBeat: 480 }),
Message::SET_TEMPO(SetTempo { tempo: FP32x32 { mag: 500000, sign: false }, time: Option::None }),
Message::NOTE_ON(NoteOn { channel: 0, note: 60, velocity: 100, time: FP32x32 { mag: 0, sign: false } }),
Message::NOTE_OFF(NoteOff { channel: 0, note: 60, velocity: 0, time: FP32x32 { mag: 480, sign: false } }),
Message::END_OF_TRACK(EndOfTrack { time: FP32x32 { mag: 0, sign: false } }),
test result: ok.
";

    fn log_file(text: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn parses_positional_paths_and_flags() {
        let opt = Opt::try_parse_from(["cairo-midi", "in.log", "out.mid"]).unwrap();
        assert_eq!(opt.input, PathBuf::from("in.log"));
        assert_eq!(opt.output, PathBuf::from("out.mid"));
        assert_eq!(opt.trailing, TrailingTrack::Drop);
        assert!(!opt.strict);

        let opt = Opt::try_parse_from([
            "cairo-midi", "in.log", "out.mid", "--trailing", "close", "--strict", "-vv",
        ])
        .unwrap();
        assert_eq!(opt.config().trailing, TrailingTrack::Close);
        assert!(opt.config().strict);
        assert_eq!(opt.verbose, 2);
    }

    #[test]
    fn output_path_is_required() {
        assert!(Opt::try_parse_from(["cairo-midi", "in.log"]).is_err());
    }

    #[test]
    fn run_writes_midi_file() {
        let input = log_file(LOG);
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mid");

        let opt = Opt::try_parse_from([
            OsStr::new("cairo-midi"),
            input.path().as_os_str(),
            output.as_os_str(),
        ])
        .unwrap();
        run(&opt).unwrap();

        let bytes = std::fs::read(&output).unwrap();
        let smf = midly::Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 1);
        assert_eq!(smf.tracks[0].len(), 4);
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let opt = Opt {
            input: dir.path().join("missing.log"),
            output: dir.path().join("out.mid"),
            trailing: TrailingTrack::Drop,
            strict: false,
            verbose: 0,
        };
        let err = run(&opt).unwrap_err();
        assert!(format!("{err}").contains("missing.log"));
        assert!(!opt.output.exists());
    }
}
