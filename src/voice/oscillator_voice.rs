use std::sync::Arc;

use super::{
    bend_ratio, clamp_bend, clamp_unit, Adsr, LowPass, LowPassCoefficients, Oscillator, Voice,
    VoiceContext, VoiceParams, MAX_OUTPUT_CHANNELS, MAX_UNISON,
};
use crate::instrument::VoiceDefinition;
use crate::midi::CC_TIMBRE;
use crate::util::pan_gain;

const BASE_CUTOFF: f32 = 200.0;
const VELOCITY_CUTOFF: f32 = 4000.0;
const PRESSURE_CUTOFF: f32 = 2000.0;
const TIMBRE_CUTOFF: f32 = 3000.0;
const ENVELOPE_CUTOFF: f32 = 8000.0;

/// Unison oscillator voice with an amplitude envelope and an optional
/// envelope-driven low-pass filter.
pub struct OscillatorVoice {
    ctx: VoiceContext,
    definition: Arc<VoiceDefinition>,
    params: VoiceParams,

    amp_env: Adsr,
    filter_env: Option<Adsr>,

    layers: [Oscillator; MAX_UNISON],
    unison: usize,
    filters: [LowPass; MAX_OUTPUT_CHANNELS],

    note_bend: f32,
    pressure: f32,
    timbre: f32,
}

impl OscillatorVoice {
    pub fn new(
        ctx: VoiceContext,
        definition: Arc<VoiceDefinition>,
        params: VoiceParams,
        seed: u64,
    ) -> Self {
        let unison = (definition.unison as usize).clamp(1, MAX_UNISON);
        let layers = std::array::from_fn(|i| {
            let phase = if unison > 1 { i as f32 * 0.381_966 } else { 0.0 };
            Oscillator::new(definition.oscillator, phase, seed.wrapping_add(i as u64))
        });

        let amp_env = Adsr::new(definition.envelope, ctx.sample_rate);
        let filter_env = if definition.use_filter {
            Some(Adsr::new(definition.filter_envelope, ctx.sample_rate))
        } else {
            None
        };

        Self {
            ctx,
            definition,
            params,
            amp_env,
            filter_env,
            layers,
            unison,
            filters: [LowPass::default(); MAX_OUTPUT_CHANNELS],
            note_bend: 0.0,
            pressure: 0.0,
            timbre: 0.0,
        }
    }

    pub fn unison(&self) -> usize {
        self.unison
    }

    pub fn has_filter(&self) -> bool {
        self.filter_env.is_some()
    }

    fn filter_cutoff(&self, envelope: f32) -> f32 {
        BASE_CUTOFF
            + self.ctx.velocity * VELOCITY_CUTOFF
            + self.pressure * PRESSURE_CUTOFF
            + self.timbre * TIMBRE_CUTOFF
            + envelope * ENVELOPE_CUTOFF
    }
}

impl Voice for OscillatorVoice {
    fn render(&mut self, buffer: &mut [f32], channels: usize) {
        buffer.fill(0.0);
        if channels == 0 || channels > MAX_OUTPUT_CHANNELS || self.amp_env.is_finished() {
            return;
        }
        let frames = buffer.len() / channels;
        let sample_rate = self.ctx.sample_rate;
        let nyquist = sample_rate * 0.5;

        let tune = 2.0f32.powf(self.params.tune / 1200.0);
        let bend = bend_ratio(self.ctx.channel_pitch_bend, self.note_bend);
        self.ctx.frequency = (self.ctx.base_frequency * tune * bend).clamp(0.0, nyquist);

        let mut frequencies = [0.0f32; MAX_UNISON];
        let mut gains = [[0.0f32; MAX_OUTPUT_CHANNELS]; MAX_UNISON];
        let center = (self.unison - 1) as f32 / 2.0;
        for i in 0..self.unison {
            let ratio = 1.0 + (i as f32 - center) * self.definition.detune;
            let mut layer = self.ctx;
            layer.frequency = (self.ctx.frequency * ratio).clamp(0.0, nyquist);
            frequencies[i] = layer.frequency;

            let pan = if self.unison > 1 {
                let spread = i as f32 / (self.unison - 1) as f32 - 0.5;
                self.params.pan + spread * self.definition.stereo_spread
            } else {
                self.params.pan
            };
            for (c, gain) in gains[i].iter_mut().take(channels).enumerate() {
                *gain = pan_gain(pan, c, channels);
            }
        }

        let level = self.ctx.velocity * self.params.gain / (self.unison as f32).sqrt();
        let resonance = self.definition.filter_resonance;

        for frame in buffer.chunks_exact_mut(channels).take(frames) {
            let amp = self.amp_env.next();

            for (layer, (osc, layer_gains)) in self
                .layers
                .iter_mut()
                .zip(gains.iter())
                .take(self.unison)
                .enumerate()
            {
                let s = osc.next(frequencies[layer], sample_rate);
                for (out, gain) in frame.iter_mut().zip(layer_gains) {
                    *out += s * gain;
                }
            }

            for out in frame.iter_mut() {
                *out *= level;
            }

            if let Some(filter_env) = &mut self.filter_env {
                let env = filter_env.next();
                let cutoff = self.filter_cutoff(env);
                let coefficients = LowPassCoefficients::new(cutoff, resonance, sample_rate);
                for (out, filter) in frame.iter_mut().zip(self.filters.iter_mut()) {
                    *out = filter.process(&coefficients, *out);
                }
            }

            for out in frame.iter_mut() {
                *out *= amp;
            }
        }
    }

    fn note_off(&mut self) {
        self.amp_env.release();
        if let Some(env) = &mut self.filter_env {
            env.release();
        }
    }

    fn kill(&mut self) {
        self.amp_env.kill();
        if let Some(env) = &mut self.filter_env {
            env.kill();
        }
    }

    fn is_finished(&self) -> bool {
        self.amp_env.is_finished()
    }

    fn is_releasing(&self) -> bool {
        self.amp_env.is_releasing()
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
