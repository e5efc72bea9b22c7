use std::sync::Arc;

use slotmap::{new_key_type, DenseSlotMap};

use crate::instrument::{Instrument, InstrumentBank};
use crate::midi::*;
use crate::util::pan_gain;
use crate::voice::{
    ChannelVoice, OscillatorVoice, SampleVoice, Voice, VoiceContext, MAX_OUTPUT_CHANNELS,
    MAX_PITCH_BEND,
};

pub const MAX_POLYPHONY: usize = 64;

const DEFAULT_VOLUME: f32 = 100.0 / 127.0;
const DEFAULT_PAN: f32 = 0.5;
const DEFAULT_BEND_RANGE: f32 = 2.0;
const RPN_NULL: u8 = 127;

new_key_type! {
    pub struct VoiceKey;
}

struct ActiveVoice {
    voice: ChannelVoice,
    /// Note-off arrived while the damper pedal was down.
    is_sustained: bool,
    id: u64,
}

/// State of one of the 16 MIDI channels, including the voices it owns.
pub struct MidiChannel {
    number: u8,
    sample_rate: f32,

    bank: Arc<dyn InstrumentBank>,
    instrument: Arc<Instrument>,
    program: u8,
    bank_msb: i16,
    bank_lsb: i16,

    volume: f32,
    pan: f32,
    pitch_bend_value: u16,
    pitch_bend_range: f32,
    damper: bool,
    rpn: (u8, u8),

    voices: DenseSlotMap<VoiceKey, ActiveVoice>,
    id_ctr: u64,
}

impl MidiChannel {
    /// `number` is the MIDI channel, 1-16.
    pub fn new(number: u8, bank: Arc<dyn InstrumentBank>, sample_rate: f32) -> Self {
        let instrument = bank.instrument(0, 0);
        Self {
            number,
            sample_rate,
            bank,
            instrument,
            program: 0,
            bank_msb: -1,
            bank_lsb: -1,
            volume: DEFAULT_VOLUME,
            pan: DEFAULT_PAN,
            pitch_bend_value: PITCH_BEND_CENTER,
            pitch_bend_range: DEFAULT_BEND_RANGE,
            damper: false,
            rpn: (RPN_NULL, RPN_NULL),
            voices: DenseSlotMap::with_capacity_and_key(MAX_POLYPHONY + 1),
            id_ctr: 0,
        }
    }

    pub fn process_midi_message(&mut self, message: MidiMessage) {
        match message.command() {
            Command::NoteOn if message.velocity() > 0 => {
                self.note_on(message.note(), message.velocity());
            }
            Command::NoteOn | Command::NoteOff => self.note_off(message.note()),
            Command::ControlChange => self.control_change(message.controller(), message.value()),
            Command::ProgramChange => self.program_change(message.program()),
            Command::PitchBend => self.set_pitch_bend_value(message.pitch_bend_value()),
            Command::ChannelPressure => {
                let pressure = message.pressure() as f32 / 127.0;
                for v in self.voices.values_mut() {
                    v.voice.set_pressure(pressure);
                }
            }
            Command::PolyPressure => {
                let pressure = message.pressure() as f32 / 127.0;
                let note = message.note();
                for v in self.voices.values_mut().filter(|v| v.voice.note() == note) {
                    v.voice.set_pressure(pressure);
                }
            }
            Command::System => {}
        }
    }

    /// Starts a voice, stealing one first if the channel is at full polyphony.
    pub fn note_on(&mut self, note: u8, velocity: u8) -> VoiceKey {
        self.voices.retain(|_, v| !v.voice.is_finished());
        if self.voices.len() >= MAX_POLYPHONY {
            self.steal_voice();
        }

        let voice = self.create_voice(note.min(127), velocity.min(127));
        let id = self.id_ctr;
        self.id_ctr = self.id_ctr.wrapping_add(1);

        self.voices.insert(ActiveVoice {
            voice,
            is_sustained: false,
            id,
        })
    }

    /// Releases every sounding voice playing `note`, or marks them sustained
    /// while the damper pedal is down.
    pub fn note_off(&mut self, note: u8) {
        let damper = self.damper;
        for v in self.voices.values_mut() {
            if v.voice.note() != note || v.voice.is_releasing() || v.is_sustained {
                continue;
            }
            if damper {
                v.is_sustained = true;
            } else {
                v.voice.note_off();
            }
        }
    }

    /// Releases a single voice, honoring the damper pedal like `note_off`.
    pub fn release_voice(&mut self, key: VoiceKey) {
        let damper = self.damper;
        if let Some(v) = self.voices.get_mut(key) {
            if v.voice.is_releasing() || v.is_sustained {
                return;
            }
            if damper {
                v.is_sustained = true;
            } else {
                v.voice.note_off();
            }
        }
    }

    /// Oldest voice that isn't already releasing, otherwise the oldest voice.
    fn steal_voice(&mut self) {
        let victim = self
            .voices
            .iter()
            .filter(|(_, v)| !v.voice.is_releasing())
            .min_by_key(|(_, v)| v.id)
            .or_else(|| self.voices.iter().min_by_key(|(_, v)| v.id))
            .map(|(key, _)| key);

        if let Some(mut stolen) = victim.and_then(|key| self.voices.remove(key)) {
            tracing::trace!(
                "channel {} stealing voice for note {}",
                self.number,
                stolen.voice.note()
            );
            stolen.voice.kill();
        }
    }

    fn create_voice(&self, note: u8, velocity: u8) -> ChannelVoice {
        let (definition, params) = {
            let (definition, params) = self.instrument.resolve(note, velocity);
            (definition.clone(), params)
        };
        let ctx = VoiceContext::new(note, velocity, self.pitch_bend(), self.sample_rate);

        match &definition.sample {
            Some(sample) => {
                ChannelVoice::Sample(SampleVoice::new(ctx, &definition, sample.clone(), params))
            }
            None => {
                let seed = self.id_ctr ^ ((self.number as u64) << 32);
                ChannelVoice::Oscillator(OscillatorVoice::new(ctx, definition, params, seed))
            }
        }
    }

    pub fn control_change(&mut self, controller: u8, value: u8) {
        match controller {
            CC_BANK_SELECT_MSB => self.bank_msb = value as i16,
            CC_BANK_SELECT_LSB => self.bank_lsb = value as i16,
            CC_VOLUME => self.volume = value as f32 / 127.0,
            CC_PAN => self.pan = value as f32 / 127.0,
            CC_DAMPER_PEDAL => self.set_damper(value >= 64),
            CC_RPN_MSB => self.rpn.0 = value,
            CC_RPN_LSB => self.rpn.1 = value,
            CC_DATA_ENTRY_MSB if self.rpn == (0, 0) => {
                let cents = self.pitch_bend_range.fract();
                self.set_pitch_bend_range(value as f32 + cents);
            }
            CC_DATA_ENTRY_LSB if self.rpn == (0, 0) => {
                let semitones = self.pitch_bend_range.trunc();
                self.set_pitch_bend_range(semitones + value.min(99) as f32 / 100.0);
            }
            CC_ALL_SOUND_OFF | CC_ALL_NOTES_OFF => self.kill_all(),
            CC_RESET_ALL_CONTROLLERS => self.reset_controllers(),
            _ => {
                for v in self.voices.values_mut() {
                    v.voice.process_midi_control(controller, value);
                }
            }
        }
    }

    pub fn program_change(&mut self, program: u8) {
        self.program = program & 0x7f;
        let bank = self.bank_number();
        self.instrument = self.bank.instrument(bank, self.program);
        tracing::debug!(
            "channel {} program {} bank {} -> {}{}",
            self.number,
            self.program,
            bank,
            self.instrument.name(),
            if self.instrument.is_fallback() { " (fallback)" } else { "" }
        );
    }

    /// Bank number from the select controllers, unset halves count as 0.
    pub fn bank_number(&self) -> u16 {
        self.bank_msb.max(0) as u16 * 128 + self.bank_lsb.max(0) as u16
    }

    pub fn set_pitch_bend_value(&mut self, value: u16) {
        self.pitch_bend_value = value.min(0x3fff);
        self.update_pitch_bend();
    }

    pub fn set_pitch_bend_range(&mut self, semitones: f32) {
        self.pitch_bend_range = semitones.clamp(0.0, MAX_PITCH_BEND);
        self.update_pitch_bend();
    }

    fn update_pitch_bend(&mut self) {
        let semitones = self.pitch_bend();
        for v in self.voices.values_mut() {
            v.voice.set_channel_pitch_bend(semitones);
        }
    }

    /// Current bend in semitones.
    pub fn pitch_bend(&self) -> f32 {
        let normalized = (self.pitch_bend_value as f32 - PITCH_BEND_CENTER as f32)
            / PITCH_BEND_CENTER as f32;
        (normalized * self.pitch_bend_range).clamp(-MAX_PITCH_BEND, MAX_PITCH_BEND)
    }

    fn set_damper(&mut self, down: bool) {
        self.damper = down;
        if down {
            return;
        }
        for v in self.voices.values_mut().filter(|v| v.is_sustained) {
            v.is_sustained = false;
            v.voice.note_off();
        }
    }

    fn reset_controllers(&mut self) {
        self.set_damper(false);
        self.rpn = (RPN_NULL, RPN_NULL);
        self.set_pitch_bend_value(PITCH_BEND_CENTER);
    }

    /// Hard-stops every voice.
    pub fn kill_all(&mut self) {
        for v in self.voices.values_mut() {
            v.voice.kill();
        }
        self.voices.clear();
    }

    /// Kills all voices and returns every control to its power-on value.
    pub fn reset(&mut self) {
        self.kill_all();
        self.volume = DEFAULT_VOLUME;
        self.pan = DEFAULT_PAN;
        self.pitch_bend_value = PITCH_BEND_CENTER;
        self.pitch_bend_range = DEFAULT_BEND_RANGE;
        self.damper = false;
        self.rpn = (RPN_NULL, RPN_NULL);
        self.bank_msb = -1;
        self.bank_lsb = -1;
        self.program = 0;
        self.instrument = self.bank.instrument(0, 0);
    }

    /// Swaps the bank and re-resolves the current program from it.
    pub fn set_bank(&mut self, bank: Arc<dyn InstrumentBank>) {
        self.bank = bank;
        self.program_change(self.program);
    }

    /// Renders all voices into `buffer`, then applies channel volume and pan.
    /// `scratch` must be at least as long as `buffer`.
    pub fn render(&mut self, buffer: &mut [f32], scratch: &mut [f32], channels: usize) {
        buffer.fill(0.0);
        self.voices.retain(|_, v| !v.voice.is_finished());
        if self.voices.is_empty()
            || channels == 0
            || channels > MAX_OUTPUT_CHANNELS
            || scratch.len() < buffer.len()
        {
            return;
        }
        let scratch = &mut scratch[..buffer.len()];

        for v in self.voices.values_mut() {
            v.voice.render(scratch, channels);
            for (out, s) in buffer.iter_mut().zip(scratch.iter()) {
                *out += s;
            }
        }

        let mut gains = [0.0f32; MAX_OUTPUT_CHANNELS];
        for (c, gain) in gains.iter_mut().take(channels).enumerate() {
            *gain = self.volume * pan_gain(self.pan, c, channels);
        }
        for frame in buffer.chunks_exact_mut(channels) {
            for (s, gain) in frame.iter_mut().zip(gains.iter()) {
                *s *= gain;
            }
        }
    }

    pub fn voice(&self, key: VoiceKey) -> Option<&ChannelVoice> {
        self.voices.get(key).map(|v| &v.voice)
    }

    pub fn voice_mut(&mut self, key: VoiceKey) -> Option<&mut ChannelVoice> {
        self.voices.get_mut(key).map(|v| &mut v.voice)
    }

    pub fn voices(&self) -> impl Iterator<Item = &ChannelVoice> {
        self.voices.values().map(|v| &v.voice)
    }

    pub fn is_sustained(&self, key: VoiceKey) -> bool {
        self.voices.get(key).map_or(false, |v| v.is_sustained)
    }

    /// Voices held in the active list, including ones that finished since the
    /// last render.
    pub fn active_voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Voices still producing sound.
    pub fn sounding_voice_count(&self) -> usize {
        self.voices.values().filter(|v| !v.voice.is_finished()).count()
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn instrument(&self) -> &Arc<Instrument> {
        &self.instrument
    }

    pub fn program(&self) -> u8 {
        self.program
    }

    pub fn bank_select(&self) -> (i16, i16) {
        (self.bank_msb, self.bank_lsb)
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn damper(&self) -> bool {
        self.damper
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{PresetBank, VoiceDefinition, VoiceMapping};
    use crate::voice::{AdsrParams, OscillatorType};
    use approx::assert_relative_eq;

    const SR: f32 = 48_000.0;

    fn bank() -> Arc<dyn InstrumentBank> {
        let definition = Arc::new(
            VoiceDefinition::oscillator(OscillatorType::Saw)
                .with_envelope(AdsrParams::new(0.001, 0.01, 0.8, 0.05)),
        );
        let mut bank = PresetBank::new();
        bank.insert(
            0,
            0,
            crate::instrument::Instrument::new("Saw", definition.clone())
                .with_mapping(VoiceMapping::new(definition)),
        );
        bank.insert(
            130,
            5,
            crate::instrument::Instrument::new("Deep", Arc::new(VoiceDefinition::default())),
        );
        Arc::new(bank)
    }

    fn channel() -> MidiChannel {
        MidiChannel::new(1, bank(), SR)
    }

    #[test]
    fn polyphony_is_bounded() {
        let mut ch = channel();
        for i in 0..300u32 {
            ch.note_on((i % 128) as u8, 100);
            assert!(ch.active_voice_count() <= MAX_POLYPHONY);
        }
        assert_eq!(ch.active_voice_count(), MAX_POLYPHONY);
    }

    #[test]
    fn stealing_prefers_voices_that_are_not_releasing() {
        let mut ch = channel();
        let first = ch.note_on(0, 100);
        let second = ch.note_on(1, 100);
        for note in 2..MAX_POLYPHONY as u8 {
            ch.note_on(note, 100);
        }
        ch.note_off(0);
        assert!(ch.voice(first).unwrap().is_releasing());

        ch.note_on(100, 100);
        assert_eq!(ch.active_voice_count(), MAX_POLYPHONY);
        assert!(ch.voice(first).is_some(), "releasing voice was stolen");
        assert!(ch.voice(second).is_none(), "oldest held voice survived");
    }

    #[test]
    fn stealing_falls_back_to_oldest_releasing_voice() {
        let mut ch = channel();
        let first = ch.note_on(0, 100);
        for note in 1..MAX_POLYPHONY as u8 {
            ch.note_on(note, 100);
        }
        for note in 0..MAX_POLYPHONY as u8 {
            ch.note_off(note);
        }
        ch.note_on(100, 100);
        assert!(ch.voice(first).is_none());
        assert_eq!(ch.active_voice_count(), MAX_POLYPHONY);
    }

    #[test]
    fn note_off_releases_every_matching_voice() {
        let mut ch = channel();
        let a = ch.note_on(60, 100);
        let b = ch.note_on(60, 90);
        let other = ch.note_on(61, 90);
        ch.note_off(60);
        assert!(ch.voice(a).unwrap().is_releasing());
        assert!(ch.voice(b).unwrap().is_releasing());
        assert!(!ch.voice(other).unwrap().is_releasing());
    }

    #[test]
    fn damper_defers_note_off() {
        let mut ch = channel();
        let key = ch.note_on(60, 100);
        ch.control_change(CC_DAMPER_PEDAL, 127);
        ch.process_midi_message(MidiMessage::note_on(1, 60, 0).unwrap());
        assert!(ch.is_sustained(key));
        assert!(!ch.voice(key).unwrap().is_releasing());

        ch.control_change(CC_DAMPER_PEDAL, 0);
        assert!(!ch.is_sustained(key));
        assert!(ch.voice(key).unwrap().is_releasing());
    }

    #[test]
    fn program_change_uses_bank_select() {
        let mut ch = channel();
        assert_eq!(ch.instrument().name(), "Saw");

        ch.control_change(CC_BANK_SELECT_MSB, 1);
        ch.control_change(CC_BANK_SELECT_LSB, 2);
        ch.program_change(5);
        assert_eq!(ch.bank_number(), 130);
        assert_eq!(ch.instrument().name(), "Deep");

        ch.program_change(6);
        assert!(ch.instrument().is_fallback());

        ch.reset();
        assert_eq!(ch.bank_select(), (-1, -1));
        assert_eq!(ch.instrument().name(), "Saw");
    }

    #[test]
    fn pitch_bend_reaches_live_voices() {
        let mut ch = channel();
        let key = ch.note_on(69, 100);
        ch.process_midi_message(MidiMessage::pitch_bend(1, 0x3fff).unwrap());
        let expected = 2.0 * 8191.0 / 8192.0;
        assert_relative_eq!(ch.pitch_bend(), expected, epsilon = 1e-5);
        assert_relative_eq!(
            ch.voice(key).unwrap().context().channel_pitch_bend,
            expected,
            epsilon = 1e-5
        );

        ch.process_midi_message(MidiMessage::pitch_bend(1, 0).unwrap());
        assert_relative_eq!(ch.pitch_bend(), -2.0);
    }

    #[test]
    fn rpn_sets_bend_range() {
        let mut ch = channel();
        ch.control_change(CC_RPN_MSB, 0);
        ch.control_change(CC_RPN_LSB, 0);
        ch.control_change(CC_DATA_ENTRY_MSB, 12);
        ch.set_pitch_bend_value(0);
        assert_relative_eq!(ch.pitch_bend(), -12.0);

        ch.control_change(CC_RESET_ALL_CONTROLLERS, 0);
        assert_relative_eq!(ch.pitch_bend(), 0.0);
    }

    #[test]
    fn all_notes_off_kills_everything() {
        let mut ch = channel();
        for note in 60..70 {
            ch.note_on(note, 100);
        }
        ch.control_change(CC_ALL_NOTES_OFF, 0);
        assert_eq!(ch.active_voice_count(), 0);
    }

    #[test]
    fn hard_left_pan_silences_right_channel() {
        let mut ch = channel();
        ch.note_on(60, 127);
        ch.control_change(CC_PAN, 0);
        let mut buf = vec![0.0; 512 * 2];
        let mut scratch = buf.clone();
        ch.render(&mut buf, &mut scratch, 2);
        assert!(buf.chunks(2).all(|f| f[1] == 0.0));
        assert!(buf.chunks(2).any(|f| f[0].abs() > 0.01));
    }

    #[test]
    fn render_prunes_finished_voices() {
        let mut ch = channel();
        ch.note_on(60, 100);
        ch.note_off(60);
        let mut buf = vec![0.0; 4096 * 2];
        let mut scratch = buf.clone();
        ch.render(&mut buf, &mut scratch, 2);
        ch.render(&mut buf, &mut scratch, 2);
        assert_eq!(ch.active_voice_count(), 0);
        assert_eq!(ch.sounding_voice_count(), 0);
    }

    #[test]
    fn volume_scales_output() {
        let mut loud = channel();
        let mut quiet = channel();
        loud.control_change(CC_VOLUME, 127);
        quiet.control_change(CC_VOLUME, 0);
        loud.note_on(60, 100);
        quiet.note_on(60, 100);
        let mut buf = vec![0.0; 256];
        let mut scratch = buf.clone();
        quiet.render(&mut buf, &mut scratch, 1);
        assert!(buf.iter().all(|&s| s == 0.0));
        loud.render(&mut buf, &mut scratch, 1);
        assert!(buf.iter().any(|&s| s != 0.0));
        assert_relative_eq!(loud.volume(), 1.0);
    }
}
