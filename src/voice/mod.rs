mod envelope;
mod filter;
mod oscillator;
mod oscillator_voice;
mod sample_voice;

pub use envelope::{Adsr, AdsrParams, EnvelopeStage};
pub use filter::{LowPass, LowPassCoefficients};
pub use oscillator::{Oscillator, OscillatorType};
pub use oscillator_voice::OscillatorVoice;
pub use sample_voice::{LoopMode, SampleData, SampleVoice};

use crate::util::note_to_frequency;

/// Upper bound on interleaved output channels a voice can render.
pub const MAX_OUTPUT_CHANNELS: usize = 8;
pub const MAX_UNISON: usize = 8;

/// Range of the combined channel + per-note bend, in semitones.
pub const MAX_PITCH_BEND: f32 = 48.0;

/// Per-note state handed to oscillators on every render call.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct VoiceContext {
    pub note: u8,
    /// 0-1
    pub velocity: f32,
    pub base_frequency: f32,
    pub frequency: f32,
    /// Semitones
    pub channel_pitch_bend: f32,
    pub sample_rate: f32,
}

impl VoiceContext {
    pub fn new(note: u8, velocity: u8, channel_pitch_bend: f32, sample_rate: f32) -> Self {
        let note = note.min(127);
        let base_frequency = note_to_frequency(note as f32);
        Self {
            note,
            velocity: velocity.min(127) as f32 / 127.0,
            base_frequency,
            frequency: base_frequency,
            channel_pitch_bend: channel_pitch_bend.clamp(-MAX_PITCH_BEND, MAX_PITCH_BEND),
            sample_rate,
        }
    }
}

/// Per-zone parameters a mapping applies on top of a voice definition.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct VoiceParams {
    /// Linear gain from the mapping attenuation.
    pub gain: f32,
    /// 0 = left, 1 = right
    pub pan: f32,
    pub root_key: Option<u8>,
    /// Cents
    pub tune: f32,
    pub loop_mode: LoopMode,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            pan: 0.5,
            root_key: None,
            tune: 0.0,
            loop_mode: LoopMode::Continuous,
        }
    }
}

/// One sounding note.
///
/// `render` overwrites `buffer`, which holds whole interleaved frames of
/// `channels` samples each. Nothing in here may block or allocate.
pub trait Voice: Send {
    fn render(&mut self, buffer: &mut [f32], channels: usize);

    /// Enters the release stage.
    fn note_off(&mut self);

    /// Hard stop, the voice is finished immediately.
    fn kill(&mut self);

    fn is_finished(&self) -> bool;
    fn is_releasing(&self) -> bool;

    fn context(&self) -> &VoiceContext;

    fn note(&self) -> u8 {
        self.context().note
    }

    fn process_midi_control(&mut self, controller: u8, value: u8);

    fn set_channel_pitch_bend(&mut self, semitones: f32);

    /// Per-note pitch bend in semitones.
    fn set_pitch_bend(&mut self, semitones: f32);

    /// Per-note pressure, 0-1.
    fn set_pressure(&mut self, pressure: f32);

    /// Per-note timbre (MPE slide), 0-1.
    fn set_timbre(&mut self, timbre: f32);
}

/// The two voice kinds a channel can hold, stored inline in the voice arena.
pub enum ChannelVoice {
    Oscillator(OscillatorVoice),
    Sample(SampleVoice),
}

macro_rules! dispatch {
    ($self:ident, $v:ident => $e:expr) => {
        match $self {
            ChannelVoice::Oscillator($v) => $e,
            ChannelVoice::Sample($v) => $e,
        }
    };
}

impl Voice for ChannelVoice {
    fn render(&mut self, buffer: &mut [f32], channels: usize) {
        dispatch!(self, v => v.render(buffer, channels))
    }

    fn note_off(&mut self) {
        dispatch!(self, v => v.note_off())
    }

    fn kill(&mut self) {
        dispatch!(self, v => v.kill())
    }

    fn is_finished(&self) -> bool {
        dispatch!(self, v => v.is_finished())
    }

    fn is_releasing(&self) -> bool {
        dispatch!(self, v => v.is_releasing())
    }

    fn context(&self) -> &VoiceContext {
        dispatch!(self, v => v.context())
    }

    fn process_midi_control(&mut self, controller: u8, value: u8) {
        dispatch!(self, v => v.process_midi_control(controller, value))
    }

    fn set_channel_pitch_bend(&mut self, semitones: f32) {
        dispatch!(self, v => v.set_channel_pitch_bend(semitones))
    }

    fn set_pitch_bend(&mut self, semitones: f32) {
        dispatch!(self, v => v.set_pitch_bend(semitones))
    }

    fn set_pressure(&mut self, pressure: f32) {
        dispatch!(self, v => v.set_pressure(pressure))
    }

    fn set_timbre(&mut self, timbre: f32) {
        dispatch!(self, v => v.set_timbre(timbre))
    }
}

/// Clamps a bend in semitones to the supported range. NaN means no bend.
#[inline]
pub(crate) fn clamp_bend(semitones: f32) -> f32 {
    if semitones.is_nan() {
        0.0
    } else {
        semitones.clamp(-MAX_PITCH_BEND, MAX_PITCH_BEND)
    }
}

/// Clamps a 0-1 controller value. NaN reads as 0.
#[inline]
pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Combined bend as a frequency ratio, clamped to the supported range.
#[inline]
pub(crate) fn bend_ratio(channel_bend: f32, note_bend: f32) -> f32 {
    let semitones = clamp_bend(clamp_bend(channel_bend) + clamp_bend(note_bend));
    crate::util::semitones_to_ratio(semitones)
}
