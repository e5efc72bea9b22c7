use thiserror::Error;

use crate::modifier::ModifierId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("failed to parse MIDI file: {0}")]
    MidiFile(String),

    /// SMPTE timecode files carry no tempo map, only metrical timing is supported.
    #[error("MIDI file uses timecode timing, only metrical timing is supported")]
    UnsupportedTiming,

    #[error("MIDI channel {0} out of range, expected 1-16")]
    InvalidChannel(u8),

    #[error("unsupported output channel count {0}, expected 1-{max}", max = crate::voice::MAX_OUTPUT_CHANNELS)]
    InvalidChannelCount(usize),

    #[error("no MIDI modifier registered with id {0:?}")]
    UnknownModifier(ModifierId),

    #[error("MIDI input error: {0}")]
    MidiInput(String),
}

impl From<midly::Error> for Error {
    fn from(err: midly::Error) -> Self {
        Error::MidiFile(err.to_string())
    }
}
