use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::Result;
use crate::instrument::{
    Instrument, InstrumentBank, MultiInstrumentBank, PresetBank, VoiceDefinition, VoiceMapping,
};
use crate::modifier::{
    ArpMode, Arpeggiator, ChannelFilter, Harmonizer, MidiModifier, ModifierId, Transpose,
    VelocityCurve, VelocityRandomizer,
};
use crate::synthesizer::{Synthesizer, DEFAULT_BPM};
use crate::voice::LoopMode;

/// Engine settings loaded from TOML.
///
/// ```toml
/// bpm = 100
/// mpe = false
///
/// [[modifiers]]
/// type = "arpeggiator"
/// mode = "up-down"
/// rate = 0.25
///
/// [[presets]]
/// program = 5
/// name = "Bright Saw"
/// [[presets.zones]]
/// max_key = 59
/// voice = { oscillator = "saw", unison = 3, detune = 0.005 }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bpm: f64,
    pub mpe: bool,
    /// Layer user presets over the built-in bank instead of replacing it.
    pub builtin_presets: bool,
    pub modifiers: Vec<ModifierConfig>,
    pub presets: Vec<PresetConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            mpe: false,
            builtin_presets: true,
            modifiers: Vec::new(),
            presets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModifierConfig {
    Transpose {
        semitones: i8,
    },
    VelocityCurve {
        exponent: f32,
    },
    ChannelFilter {
        channels: Vec<u8>,
    },
    Harmonizer {
        intervals: Vec<i8>,
    },
    Randomizer {
        range: u8,
        #[serde(default)]
        seed: u64,
    },
    Arpeggiator {
        #[serde(default)]
        mode: ArpMode,
        #[serde(default = "default_arp_rate")]
        rate: f64,
        #[serde(default = "default_arp_gate")]
        gate: f64,
        #[serde(default = "default_arp_octaves")]
        octaves: u8,
    },
}

fn default_arp_rate() -> f64 {
    0.25
}

fn default_arp_gate() -> f64 {
    0.5
}

fn default_arp_octaves() -> u8 {
    1
}

impl ModifierConfig {
    pub fn build(&self) -> Box<dyn MidiModifier> {
        match self {
            ModifierConfig::Transpose { semitones } => Box::new(Transpose::new(*semitones)),
            ModifierConfig::VelocityCurve { exponent } => Box::new(VelocityCurve::new(*exponent)),
            ModifierConfig::ChannelFilter { channels } => Box::new(ChannelFilter::new(channels)),
            ModifierConfig::Harmonizer { intervals } => {
                Box::new(Harmonizer::new(intervals.clone()))
            }
            ModifierConfig::Randomizer { range, seed } => {
                Box::new(VelocityRandomizer::new(*range, *seed))
            }
            ModifierConfig::Arpeggiator {
                mode,
                rate,
                gate,
                octaves,
            } => Box::new(Arpeggiator::new(*mode, *rate, *gate, *octaves)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresetConfig {
    #[serde(default)]
    pub bank: u16,
    pub program: u8,
    pub name: String,
    /// Played for notes outside every zone.
    #[serde(default)]
    pub voice: VoiceDefinition,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    pub min_key: u8,
    pub max_key: u8,
    pub min_velocity: u8,
    pub max_velocity: u8,
    /// dB
    pub attenuation: f32,
    pub pan: f32,
    pub root_key: Option<u8>,
    /// cents
    pub tune: f32,
    pub loop_mode: LoopMode,
    pub voice: VoiceDefinition,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            min_key: 0,
            max_key: 127,
            min_velocity: 0,
            max_velocity: 127,
            attenuation: 0.0,
            pan: 0.5,
            root_key: None,
            tune: 0.0,
            loop_mode: LoopMode::default(),
            voice: VoiceDefinition::default(),
        }
    }
}

impl ZoneConfig {
    fn mapping(&self) -> VoiceMapping {
        let mut mapping = VoiceMapping::new(Arc::new(self.voice.clone()))
            .with_keys(self.min_key.min(127), self.max_key.min(127))
            .with_velocities(self.min_velocity.min(127), self.max_velocity.min(127));
        mapping.initial_attenuation = self.attenuation;
        mapping.pan = self.pan;
        mapping.root_key_override = self.root_key.map(|k| k.min(127));
        mapping.tune = self.tune;
        mapping.loop_mode = self.loop_mode;
        mapping
    }
}

impl PresetConfig {
    pub fn instrument(&self) -> Instrument {
        let fallback = Arc::new(self.voice.clone());
        self.zones
            .iter()
            .fold(Instrument::new(&self.name, fallback), |instrument, zone| {
                instrument.with_mapping(zone.mapping())
            })
    }
}

impl EngineConfig {
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::parse(&text)?;
        tracing::info!(
            "loaded config {}: {} modifiers, {} presets",
            path.display(),
            config.modifiers.len(),
            config.presets.len()
        );
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn build_modifiers(&self) -> Vec<Box<dyn MidiModifier>> {
        self.modifiers.iter().map(ModifierConfig::build).collect()
    }

    pub fn preset_bank(&self) -> PresetBank {
        let mut bank = PresetBank::new();
        for preset in &self.presets {
            bank.insert(preset.bank, preset.program & 0x7f, preset.instrument());
        }
        bank
    }

    /// User presets shadowing the built-in bank.
    pub fn instrument_bank(&self) -> Arc<dyn InstrumentBank> {
        let mut bank = MultiInstrumentBank::new();
        if self.builtin_presets {
            bank.push(Arc::new(PresetBank::builtin()));
        }
        if !self.presets.is_empty() {
            bank.push(Arc::new(self.preset_bank()));
        }
        Arc::new(bank)
    }

    /// Applies tempo, MPE mode and modifiers to `synth`.
    pub fn apply(&self, synth: &Synthesizer) -> Vec<ModifierId> {
        synth.set_bpm(self.bpm);
        if self.mpe != synth.mpe_enabled() {
            synth.set_mpe_enabled(self.mpe);
        }
        self.build_modifiers()
            .into_iter()
            .map(|modifier| synth.add_midi_modifier(modifier))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::voice::OscillatorType;

    const CONFIG: &str = r#"
        bpm = 96
        mpe = true

        [[modifiers]]
        type = "transpose"
        semitones = -12

        [[modifiers]]
        type = "arpeggiator"
        mode = "up-down"
        octaves = 2

        [[modifiers]]
        type = "channel-filter"
        channels = [1, 2]

        [[presets]]
        bank = 1
        program = 5
        name = "Split"
        voice = { oscillator = "triangle" }

        [[presets.zones]]
        max_key = 59
        attenuation = 6.0
        voice = { oscillator = "square", unison = 2, detune = 0.01 }

        [[presets.zones]]
        min_key = 60
        loop_mode = "no-loop"
        voice = { oscillator = "saw", use_filter = true, envelope = { attack = 0.1, release = 1.0 } }
    "#;

    #[test]
    fn parses_everything() {
        let config = EngineConfig::parse(CONFIG).unwrap();
        assert_eq!(config.bpm, 96.0);
        assert!(config.mpe);
        assert!(config.builtin_presets);
        assert_eq!(config.modifiers.len(), 3);
        assert!(matches!(
            config.modifiers[1],
            ModifierConfig::Arpeggiator {
                mode: ArpMode::UpDown,
                octaves: 2,
                ..
            }
        ));

        let names: Vec<String> = config
            .build_modifiers()
            .iter()
            .map(|m| m.name().to_owned())
            .collect();
        assert_eq!(names, ["transpose", "arpeggiator", "channel filter"]);

        let preset = &config.presets[0];
        assert_eq!(preset.zones.len(), 2);
        assert_eq!(preset.zones[1].voice.envelope.attack, 0.1);
        assert_eq!(preset.zones[1].voice.envelope.sustain, 0.8);
        assert_eq!(preset.zones[1].loop_mode, LoopMode::NoLoop);
    }

    #[test]
    fn presets_shadow_builtin_bank() {
        let config = EngineConfig::parse(CONFIG).unwrap();
        let bank = config.instrument_bank();

        let split = bank.instrument(129, 5);
        assert!(split.is_fallback());
        let split = bank.instrument(1, 5);
        assert_eq!(split.name(), "Split");
        assert_eq!(split.voice_definition(40, 100).oscillator, OscillatorType::Square);
        assert_eq!(split.voice_definition(80, 100).oscillator, OscillatorType::Saw);
        let (_, params) = split.resolve(40, 100);
        assert!(params.gain < 0.6);

        assert_eq!(bank.instrument(0, 0).name(), "Soft Saw");
    }

    #[test]
    fn applies_to_synthesizer() {
        let config = EngineConfig::parse(CONFIG).unwrap();
        let synth = Synthesizer::new(config.instrument_bank(), 48_000.0, 2).unwrap();
        let ids = config.apply(&synth);
        assert_eq!(ids.len(), 3);
        assert_eq!(synth.modifier_count(), 3);
        assert!(synth.mpe_enabled());
        assert_eq!(synth.bpm(), 96.0);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = EngineConfig::parse("").unwrap();
        assert_eq!(config.bpm, DEFAULT_BPM);
        assert!(!config.mpe);
        assert!(config.modifiers.is_empty());
    }

    #[test]
    fn rejects_unknown_modifier() {
        let err = EngineConfig::parse("[[modifiers]]\ntype = \"flanger\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
