//! Polyphonic, multi-timbral MIDI synthesizer.
//!
//! A [`Synthesizer`] owns sixteen [`MidiChannel`]s. MIDI enters through
//! [`Synthesizer::process_midi_message`], passes the modifier chain once and
//! is dispatched to its channel, which resolves an instrument and starts
//! oscillator or sample voices. [`Synthesizer::generate_audio`] mixes all
//! channels into one interleaved buffer. A [`Sequencer`] can feed the
//! synthesizer from tick-based MIDI data with sample accuracy.

pub mod channel;
pub mod config;
pub mod error;
pub mod instrument;
pub mod midi;
pub mod modifier;
pub mod pool;
mod rng;
pub mod sequencer;
pub mod synthesizer;
pub mod util;
pub mod voice;

pub use channel::{MidiChannel, VoiceKey, MAX_POLYPHONY};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use instrument::{
    Instrument, InstrumentBank, MultiInstrumentBank, PresetBank, VoiceDefinition, VoiceMapping,
};
pub use midi::MidiMessage;
pub use modifier::{MidiModifier, ModifierId};
pub use sequencer::{MidiDataProvider, MidiSequence, Sequencer, SequencerContext, TempoMap};
pub use synthesizer::{MidiControllable, Synthesizer};
