//! Convert the MIDI event logs printed by on-chain music contracts into
//! Standard MIDI Files.
//!
//! The log is parsed line by line into [`parser::ParsedEvent`]s, split into
//! tracks, time-resolved ([`timeline`]) and finally encoded with `midly`
//! ([`smf`]).

pub mod fixed;
pub mod parser;
pub mod pipeline;
pub mod smf;
pub mod timeline;

pub use pipeline::{ConvertConfig, assemble, convert, convert_file};
