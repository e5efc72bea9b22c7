use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::util::db_to_gain;
use crate::voice::{AdsrParams, LoopMode, OscillatorType, SampleData, VoiceParams};

/// Immutable recipe for one kind of voice. Sampled definitions play `sample`,
/// everything else runs the unison oscillators.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VoiceDefinition {
    pub name: String,
    pub oscillator: OscillatorType,
    /// 1-8 layers
    pub unison: u8,
    /// Frequency ratio offset between adjacent unison layers.
    pub detune: f32,
    /// How far the outermost layers sit from the mapping pan, 0-1.
    pub stereo_spread: f32,
    pub envelope: AdsrParams,
    pub use_filter: bool,
    pub filter_resonance: f32,
    pub filter_envelope: AdsrParams,
    #[serde(skip)]
    pub sample: Option<Arc<SampleData>>,
}

impl Default for VoiceDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            oscillator: OscillatorType::Sine,
            unison: 1,
            detune: 0.0,
            stereo_spread: 1.0,
            envelope: AdsrParams::default(),
            use_filter: false,
            filter_resonance: 0.2,
            filter_envelope: AdsrParams::new(0.01, 0.3, 0.3, 0.3),
            sample: None,
        }
    }
}

impl VoiceDefinition {
    pub fn oscillator(oscillator: OscillatorType) -> Self {
        Self {
            oscillator,
            ..Self::default()
        }
    }

    pub fn sampled(sample: SampleData) -> Self {
        Self {
            sample: Some(Arc::new(sample)),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    pub fn with_envelope(mut self, envelope: AdsrParams) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn with_unison(mut self, unison: u8, detune: f32) -> Self {
        self.unison = unison.max(1);
        self.detune = detune;
        self
    }

    pub fn with_filter(mut self, resonance: f32) -> Self {
        self.use_filter = true;
        self.filter_resonance = resonance;
        self
    }

    pub fn with_filter_envelope(mut self, envelope: AdsrParams) -> Self {
        self.filter_envelope = envelope;
        self
    }

    pub fn is_sampled(&self) -> bool {
        self.sample.is_some()
    }
}

/// One key/velocity zone of an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceMapping {
    pub definition: Arc<VoiceDefinition>,
    pub min_key: u8,
    pub max_key: u8,
    pub min_velocity: u8,
    pub max_velocity: u8,
    /// Decibels of attenuation, positive values are quieter.
    pub initial_attenuation: f32,
    /// 0 = left, 1 = right
    pub pan: f32,
    pub root_key_override: Option<u8>,
    /// Cents
    pub tune: f32,
    pub loop_mode: LoopMode,
}

impl VoiceMapping {
    /// Covers the full key and velocity range.
    pub fn new(definition: Arc<VoiceDefinition>) -> Self {
        Self {
            definition,
            min_key: 0,
            max_key: 127,
            min_velocity: 0,
            max_velocity: 127,
            initial_attenuation: 0.0,
            pan: 0.5,
            root_key_override: None,
            tune: 0.0,
            loop_mode: LoopMode::Continuous,
        }
    }

    pub fn with_keys(mut self, min: u8, max: u8) -> Self {
        self.min_key = min;
        self.max_key = max;
        self
    }

    pub fn with_velocities(mut self, min: u8, max: u8) -> Self {
        self.min_velocity = min;
        self.max_velocity = max;
        self
    }

    pub fn contains(&self, key: u8, velocity: u8) -> bool {
        (self.min_key..=self.max_key).contains(&key)
            && (self.min_velocity..=self.max_velocity).contains(&velocity)
    }

    pub fn params(&self) -> VoiceParams {
        VoiceParams {
            gain: db_to_gain(-self.initial_attenuation.max(0.0)),
            pan: self.pan.clamp(0.0, 1.0),
            root_key: self.root_key_override,
            tune: self.tune,
            loop_mode: self.loop_mode,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instrument {
    name: String,
    mappings: Vec<VoiceMapping>,
    fallback: Arc<VoiceDefinition>,
    is_fallback: bool,
}

impl Instrument {
    pub fn new(name: &str, fallback: Arc<VoiceDefinition>) -> Self {
        Self {
            name: name.to_owned(),
            mappings: Vec::new(),
            fallback,
            is_fallback: false,
        }
    }

    /// Placeholder that keeps a channel audible when nothing real is mapped.
    pub fn fallback() -> Self {
        let definition = VoiceDefinition::oscillator(OscillatorType::Sine).named("fallback");
        Self {
            name: "fallback".to_owned(),
            mappings: Vec::new(),
            fallback: Arc::new(definition),
            is_fallback: true,
        }
    }

    pub fn with_mapping(mut self, mapping: VoiceMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_fallback(&self) -> bool {
        self.is_fallback
    }

    pub fn mappings(&self) -> &[VoiceMapping] {
        &self.mappings
    }

    /// First mapping, in insertion order, whose key and velocity ranges both
    /// contain the point.
    pub fn mapping(&self, key: u8, velocity: u8) -> Option<&VoiceMapping> {
        self.mappings.iter().find(|m| m.contains(key, velocity))
    }

    pub fn voice_definition(&self, key: u8, velocity: u8) -> &Arc<VoiceDefinition> {
        self.mapping(key, velocity)
            .map(|m| &m.definition)
            .unwrap_or(&self.fallback)
    }

    /// Definition plus the zone parameters to play it with.
    pub fn resolve(&self, key: u8, velocity: u8) -> (&Arc<VoiceDefinition>, VoiceParams) {
        match self.mapping(key, velocity) {
            Some(m) => (&m.definition, m.params()),
            None => (&self.fallback, VoiceParams::default()),
        }
    }
}

/// Resolves (bank, program) to an instrument. Never fails: unknown addresses
/// yield an instrument with `is_fallback() == true`.
pub trait InstrumentBank: Send + Sync {
    fn instrument(&self, bank: u16, program: u8) -> Arc<Instrument>;
}

/// Hand-authored instruments keyed by (bank, program).
pub struct PresetBank {
    instruments: HashMap<(u16, u8), Arc<Instrument>>,
    fallback: Arc<Instrument>,
}

impl Default for PresetBank {
    fn default() -> Self {
        Self::new()
    }
}

impl PresetBank {
    pub fn new() -> Self {
        Self {
            instruments: HashMap::new(),
            fallback: Arc::new(Instrument::fallback()),
        }
    }

    pub fn insert(&mut self, bank: u16, program: u8, instrument: Instrument) {
        self.instruments
            .insert((bank, program & 0x7f), Arc::new(instrument));
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// A handful of general purpose patches on bank 0.
    pub fn builtin() -> Self {
        let mut bank = Self::new();

        let soft_saw = Arc::new(
            VoiceDefinition::oscillator(OscillatorType::Saw)
                .named("soft saw")
                .with_unison(3, 0.006)
                .with_envelope(AdsrParams::new(0.005, 0.3, 0.6, 0.4))
                .with_filter(0.3)
                .with_filter_envelope(AdsrParams::new(0.01, 0.4, 0.2, 0.4)),
        );
        bank.insert(
            0,
            0,
            Instrument::new("Soft Saw", soft_saw.clone()).with_mapping(VoiceMapping::new(soft_saw)),
        );

        let soft = Arc::new(
            VoiceDefinition::oscillator(OscillatorType::Triangle)
                .named("soft keys")
                .with_envelope(AdsrParams::new(0.005, 0.6, 0.4, 0.3)),
        );
        let hard = Arc::new(
            VoiceDefinition::oscillator(OscillatorType::Saw)
                .named("hard keys")
                .with_envelope(AdsrParams::new(0.002, 0.4, 0.5, 0.3))
                .with_filter(0.1),
        );
        bank.insert(
            0,
            1,
            Instrument::new("Velocity Keys", soft.clone())
                .with_mapping(VoiceMapping::new(soft).with_velocities(0, 79))
                .with_mapping(VoiceMapping::new(hard).with_velocities(80, 127)),
        );

        let organ = Arc::new(
            VoiceDefinition::sampled(SampleData::single_cycle(OscillatorType::Triangle, 60, 256))
                .named("organ")
                .with_envelope(AdsrParams::new(0.01, 0.0, 1.0, 0.08)),
        );
        bank.insert(
            0,
            19,
            Instrument::new("Organ", organ.clone()).with_mapping(VoiceMapping::new(organ)),
        );

        let bass = Arc::new(
            VoiceDefinition::oscillator(OscillatorType::Square)
                .named("bass")
                .with_envelope(AdsrParams::new(0.002, 0.2, 0.5, 0.1))
                .with_filter(0.5)
                .with_filter_envelope(AdsrParams::new(0.001, 0.15, 0.0, 0.1)),
        );
        let mut bass_zone = VoiceMapping::new(bass.clone()).with_keys(0, 71);
        bass_zone.initial_attenuation = 3.0;
        bank.insert(
            0,
            38,
            Instrument::new("Synth Bass", bass).with_mapping(bass_zone),
        );

        let lead = Arc::new(
            VoiceDefinition::oscillator(OscillatorType::Square)
                .named("lead")
                .with_unison(2, 0.004)
                .with_envelope(AdsrParams::new(0.01, 0.1, 0.8, 0.15)),
        );
        bank.insert(
            0,
            80,
            Instrument::new("Square Lead", lead.clone()).with_mapping(VoiceMapping::new(lead)),
        );

        let pad = Arc::new(
            VoiceDefinition::oscillator(OscillatorType::Saw)
                .named("pad")
                .with_unison(6, 0.01)
                .with_envelope(AdsrParams::new(0.6, 1.0, 0.7, 1.5))
                .with_filter(0.2)
                .with_filter_envelope(AdsrParams::new(1.2, 1.0, 0.4, 1.5)),
        );
        bank.insert(
            0,
            89,
            Instrument::new("Warm Pad", pad.clone()).with_mapping(VoiceMapping::new(pad)),
        );

        bank
    }
}

impl InstrumentBank for PresetBank {
    fn instrument(&self, bank: u16, program: u8) -> Arc<Instrument> {
        match self.instruments.get(&(bank, program & 0x7f)) {
            Some(instrument) => instrument.clone(),
            None => self.fallback.clone(),
        }
    }
}

/// Stack of banks where later layers shadow earlier ones.
pub struct MultiInstrumentBank {
    layers: Vec<Arc<dyn InstrumentBank>>,
    fallback: Arc<Instrument>,
}

impl Default for MultiInstrumentBank {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiInstrumentBank {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            fallback: Arc::new(Instrument::fallback()),
        }
    }

    pub fn push(&mut self, layer: Arc<dyn InstrumentBank>) {
        self.layers.push(layer);
    }

    pub fn with_layer(mut self, layer: Arc<dyn InstrumentBank>) -> Self {
        self.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl InstrumentBank for MultiInstrumentBank {
    fn instrument(&self, bank: u16, program: u8) -> Arc<Instrument> {
        self.layers
            .iter()
            .rev()
            .map(|layer| layer.instrument(bank, program))
            .find(|instrument| !instrument.is_fallback())
            .unwrap_or_else(|| {
                tracing::debug!("no instrument for bank {} program {}", bank, program);
                self.fallback.clone()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str) -> Arc<VoiceDefinition> {
        Arc::new(VoiceDefinition::oscillator(OscillatorType::Saw).named(name))
    }

    #[test]
    fn first_matching_mapping_wins() {
        let instrument = Instrument::new("split", definition("default"))
            .with_mapping(VoiceMapping::new(definition("low")).with_keys(0, 59))
            .with_mapping(VoiceMapping::new(definition("soft")).with_velocities(0, 63))
            .with_mapping(VoiceMapping::new(definition("any")));

        assert_eq!(instrument.voice_definition(40, 100).name, "low");
        assert_eq!(instrument.voice_definition(40, 10).name, "low");
        assert_eq!(instrument.voice_definition(70, 10).name, "soft");
        assert_eq!(instrument.voice_definition(70, 100).name, "any");
    }

    #[test]
    fn unmatched_point_uses_fallback_definition() {
        let instrument = Instrument::new("narrow", definition("default"))
            .with_mapping(VoiceMapping::new(definition("mid")).with_keys(60, 72));
        assert_eq!(instrument.voice_definition(20, 64).name, "default");
        let (_, params) = instrument.resolve(20, 64);
        assert_eq!(params, VoiceParams::default());
    }

    #[test]
    fn mapping_params_convert_attenuation() {
        let mut mapping = VoiceMapping::new(definition("x"));
        mapping.initial_attenuation = 20.0;
        mapping.pan = 3.0;
        let params = mapping.params();
        assert!((params.gain - 0.1).abs() < 1e-6);
        assert_eq!(params.pan, 1.0);
    }

    #[test]
    fn unknown_program_is_fallback() {
        let bank = PresetBank::builtin();
        assert!(!bank.is_empty());
        assert!(!bank.instrument(0, 0).is_fallback());
        assert!(bank.instrument(0, 127).is_fallback());
        assert!(bank.instrument(5, 0).is_fallback());
    }

    #[test]
    fn later_layers_shadow_earlier_ones() {
        let mut user = PresetBank::new();
        user.insert(0, 0, Instrument::new("User Piano", definition("user")));

        let multi = MultiInstrumentBank::new()
            .with_layer(Arc::new(PresetBank::builtin()))
            .with_layer(Arc::new(user));

        assert_eq!(multi.len(), 2);
        assert_eq!(multi.instrument(0, 0).name(), "User Piano");
        assert_eq!(multi.instrument(0, 80).name(), "Square Lead");

        let missing = multi.instrument(9, 9);
        assert!(missing.is_fallback());
        assert!(Arc::ptr_eq(&missing, &multi.instrument(3, 3)));
    }

    #[test]
    fn empty_multi_bank_still_resolves() {
        let multi = MultiInstrumentBank::new();
        assert!(multi.instrument(0, 0).is_fallback());
    }
}
