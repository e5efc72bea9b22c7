use std::sync::Arc;

use serde::Deserialize;

use super::{
    bend_ratio, clamp_bend, clamp_unit, Adsr, Oscillator, OscillatorType, Voice, VoiceContext,
    VoiceParams, MAX_OUTPUT_CHANNELS,
};
use crate::instrument::VoiceDefinition;
use crate::midi::CC_TIMBRE;
use crate::util::{note_to_frequency, pan_gain};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopMode {
    NoLoop,
    Continuous,
    /// Loops while the key is held, then plays out the tail.
    UntilRelease,
}

impl Default for LoopMode {
    fn default() -> Self {
        LoopMode::Continuous
    }
}

/// Mono PCM data already resampled to a fixed rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleData {
    pub samples: Arc<[f32]>,
    pub sample_rate: f32,
    pub root_key: u8,
    pub loop_start: usize,
    pub loop_end: usize,
}

impl SampleData {
    pub fn new(samples: Vec<f32>, sample_rate: f32, root_key: u8) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            root_key: root_key.min(127),
            loop_start: 0,
            loop_end: 0,
        }
    }

    pub fn with_loop(mut self, start: usize, end: usize) -> Self {
        self.loop_start = start;
        self.loop_end = end;
        self
    }

    /// One period of `kind`, looped over its whole length and tuned to `root_key`.
    pub fn single_cycle(kind: OscillatorType, root_key: u8, length: usize) -> Self {
        let length = length.max(2);
        let sample_rate = note_to_frequency(root_key as f32) * length as f32;
        let mut osc = Oscillator::new(kind, 0.0, 0x5eed);
        let samples = (0..length).map(|_| osc.next(1.0, length as f32)).collect();
        Self::new(samples, sample_rate, root_key).with_loop(0, length)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn has_loop(&self) -> bool {
        self.loop_start < self.loop_end && self.loop_end <= self.samples.len()
    }
}

/// Sample playback with a single amplitude envelope.
pub struct SampleVoice {
    ctx: VoiceContext,
    sample: Arc<SampleData>,
    params: VoiceParams,
    env: Adsr,

    position: f64,
    released: bool,

    note_bend: f32,
    pressure: f32,
    timbre: f32,
}

impl SampleVoice {
    pub fn new(
        ctx: VoiceContext,
        definition: &VoiceDefinition,
        sample: Arc<SampleData>,
        params: VoiceParams,
    ) -> Self {
        let mut env = Adsr::new(definition.envelope, ctx.sample_rate);
        if sample.is_empty() {
            env.kill();
        }
        Self {
            ctx,
            sample,
            params,
            env,
            position: 0.0,
            released: false,
            note_bend: 0.0,
            pressure: 0.0,
            timbre: 0.0,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Last per-note pressure and timbre. Samples carry no filter, so these are
    /// only tracked for inspection.
    pub fn expression(&self) -> (f32, f32) {
        (self.pressure, self.timbre)
    }

    fn is_looping(&self) -> bool {
        let enabled = match self.params.loop_mode {
            LoopMode::NoLoop => false,
            LoopMode::Continuous => true,
            LoopMode::UntilRelease => !self.released,
        };
        enabled && self.sample.has_loop()
    }

    /// Playback speed in source samples per output frame.
    fn increment(&mut self) -> f64 {
        let root = self.params.root_key.unwrap_or(self.sample.root_key);
        let semitones = self.ctx.note as f32 - root as f32 + self.params.tune / 100.0;
        let bend = bend_ratio(self.ctx.channel_pitch_bend, self.note_bend);
        let tune = 2.0f32.powf(self.params.tune / 1200.0);
        self.ctx.frequency = self.ctx.base_frequency * tune * bend;

        let pitch = 2.0f64.powf(semitones as f64 / 12.0) * bend as f64;
        pitch * self.sample.sample_rate as f64 / self.ctx.sample_rate as f64
    }
}

impl Voice for SampleVoice {
    fn render(&mut self, buffer: &mut [f32], channels: usize) {
        buffer.fill(0.0);
        if channels == 0 || channels > MAX_OUTPUT_CHANNELS || self.env.is_finished() {
            return;
        }

        let increment = self.increment();
        let level = self.ctx.velocity * self.params.gain;
        let mut gains = [0.0f32; MAX_OUTPUT_CHANNELS];
        for (c, gain) in gains.iter_mut().take(channels).enumerate() {
            *gain = pan_gain(self.params.pan, c, channels) * level;
        }

        let looping = self.is_looping();
        let samples = &self.sample.samples;
        let len = samples.len();
        let (loop_start, loop_end) = (self.sample.loop_start, self.sample.loop_end);

        for frame in buffer.chunks_exact_mut(channels) {
            let index = self.position as usize;
            if !looping && index + 1 >= len {
                self.env.kill();
                break;
            }

            let frac = (self.position - index as f64) as f32;
            let next = if looping && index + 1 >= loop_end {
                samples[loop_start]
            } else {
                samples[index + 1]
            };
            let s = samples[index] + (next - samples[index]) * frac;
            let amp = self.env.next();

            for (out, gain) in frame.iter_mut().zip(gains.iter()) {
                *out = s * amp * gain;
            }

            self.position += increment;
            if looping {
                let loop_len = (loop_end - loop_start) as f64;
                while self.position >= loop_end as f64 {
                    self.position -= loop_len;
                }
            }

            if self.env.is_finished() {
                break;
            }
        }
    }

    fn note_off(&mut self) {
        self.released = true;
        self.env.release();
    }

    fn kill(&mut self) {
        self.env.kill();
    }

    fn is_finished(&self) -> bool {
        self.env.is_finished()
    }

    fn is_releasing(&self) -> bool {
        self.env.is_releasing()
    }

    fn context(&self) -> &VoiceContext {
        &self.ctx
    }

    fn process_midi_control(&mut self, controller: u8, value: u8) {
        if controller == CC_TIMBRE {
            self.set_timbre(value as f32 / 127.0);
        }
    }

    fn set_channel_pitch_bend(&mut self, semitones: f32) {
        self.ctx.channel_pitch_bend = clamp_bend(semitones);
    }

    fn set_pitch_bend(&mut self, semitones: f32) {
        self.note_bend = clamp_bend(semitones);
    }

    fn set_pressure(&mut self, pressure: f32) {
        self.pressure = clamp_unit(pressure);
    }

    fn set_timbre(&mut self, timbre: f32) {
        self.timbre = clamp_unit(timbre);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::AdsrParams;
    use approx::assert_relative_eq;

    fn definition() -> VoiceDefinition {
        VoiceDefinition::oscillator(OscillatorType::Sine)
            .with_envelope(AdsrParams::new(0.0, 0.0, 1.0, 0.01))
    }

    fn voice(note: u8, sample: SampleData, loop_mode: LoopMode) -> SampleVoice {
        let params = VoiceParams {
            loop_mode,
            ..VoiceParams::default()
        };
        SampleVoice::new(
            VoiceContext::new(note, 127, 0.0, 1000.0),
            &definition(),
            Arc::new(sample),
            params,
        )
    }

    #[test]
    fn one_shot_finishes_at_end_of_data() {
        let sample = SampleData::new(vec![0.5; 100], 1000.0, 60);
        let mut v = voice(60, sample, LoopMode::NoLoop);
        let mut buf = vec![0.0; 64];
        v.render(&mut buf, 1);
        assert!(!v.is_finished());
        assert_relative_eq!(buf[10], 0.5);
        v.render(&mut buf, 1);
        assert!(v.is_finished());
    }

    #[test]
    fn octave_up_plays_twice_as_fast() {
        let sample = SampleData::new(vec![0.0; 1000], 1000.0, 60);
        let mut v = voice(72, sample, LoopMode::NoLoop);
        let mut buf = vec![0.0; 10];
        v.render(&mut buf, 1);
        assert_relative_eq!(v.position(), 20.0, epsilon = 1e-6);
    }

    #[test]
    fn nan_bend_plays_at_root_speed() {
        let sample = SampleData::new(vec![0.5; 1000], 1000.0, 60);
        let mut v = voice(60, sample, LoopMode::NoLoop);
        v.set_pitch_bend(f32::NAN);
        v.set_channel_pitch_bend(f32::NAN);
        let mut buf = vec![0.0; 10];
        v.render(&mut buf, 1);
        assert!(buf.iter().all(|s| s.is_finite()));
        assert_relative_eq!(v.position(), 10.0, epsilon = 1e-6);
    }

    #[test]
    fn continuous_loop_keeps_playing() {
        let sample = SampleData::single_cycle(OscillatorType::Saw, 60, 64);
        let mut v = voice(60, sample, LoopMode::Continuous);
        let mut buf = vec![0.0; 4096];
        for _ in 0..4 {
            v.render(&mut buf, 1);
        }
        assert!(!v.is_finished());
        assert!(v.position() < 64.0);
    }

    #[test]
    fn loop_until_release_plays_out_tail() {
        let sample = SampleData::new(vec![0.25; 200], 1000.0, 60).with_loop(10, 50);
        let mut v = voice(60, sample, LoopMode::UntilRelease);
        let mut buf = vec![0.0; 500];
        v.render(&mut buf, 1);
        assert!(v.position() < 50.0);
        v.note_off();
        v.render(&mut buf, 1);
        assert!(v.is_finished());
    }

    #[test]
    fn expression_is_clamped() {
        let sample = SampleData::single_cycle(OscillatorType::Sine, 60, 32);
        let mut v = voice(60, sample, LoopMode::Continuous);
        v.set_pressure(3.0);
        v.process_midi_control(CC_TIMBRE, 127);
        assert_eq!(v.expression(), (1.0, 1.0));
    }

    #[test]
    fn empty_sample_is_finished() {
        let v = voice(60, SampleData::new(Vec::new(), 1000.0, 60), LoopMode::Continuous);
        assert!(v.is_finished());
    }
}
