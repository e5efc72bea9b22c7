use serde::Deserialize;

/// Below this level a releasing envelope counts as silent.
const SILENCE: f32 = 1e-4;

/// ADSR timings in seconds, sustain as a 0-1 level.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdsrParams {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl AdsrParams {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
        }
    }
}

impl Default for AdsrParams {
    fn default() -> Self {
        Self::new(0.01, 0.1, 0.8, 0.2)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EnvelopeStage {
    Attack,
    Decay,
    Sustain,
    Release,
    Finished,
}

/// Linear ADSR producing one control value per frame.
#[derive(Debug, Clone)]
pub struct Adsr {
    stage: EnvelopeStage,
    level: f32,

    attack_step: f32,
    decay_samples: f32,
    sustain: f32,
    release_samples: f32,

    release_start: f32,
    release_elapsed: f32,
}

impl Adsr {
    /// Creates an envelope that starts its attack right away.
    pub fn new(params: AdsrParams, sample_rate: f32) -> Self {
        let samples = |secs: f32| (secs.max(0.0) * sample_rate).max(0.0);
        let attack_samples = samples(params.attack);

        Self {
            stage: EnvelopeStage::Attack,
            level: 0.0,
            attack_step: if attack_samples < 1.0 {
                1.0
            } else {
                1.0 / attack_samples
            },
            decay_samples: samples(params.decay),
            sustain: params.sustain.clamp(0.0, 1.0),
            release_samples: samples(params.release),
            release_start: 0.0,
            release_elapsed: 0.0,
        }
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_releasing(&self) -> bool {
        self.stage == EnvelopeStage::Release
    }

    pub fn is_finished(&self) -> bool {
        self.stage == EnvelopeStage::Finished
    }

    /// Ramps from the current level to zero over the release time.
    pub fn release(&mut self) {
        if matches!(self.stage, EnvelopeStage::Release | EnvelopeStage::Finished) {
            return;
        }
        self.stage = EnvelopeStage::Release;
        self.release_start = self.level;
        self.release_elapsed = 0.0;
    }

    pub fn kill(&mut self) {
        self.stage = EnvelopeStage::Finished;
        self.level = 0.0;
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        match self.stage {
            EnvelopeStage::Attack => {
                self.level += self.attack_step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                }
            }

            EnvelopeStage::Decay => {
                if self.decay_samples < 1.0 {
                    self.level = self.sustain;
                } else {
                    self.level -= (1.0 - self.sustain) / self.decay_samples;
                }
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.stage = EnvelopeStage::Sustain;
                }
            }

            EnvelopeStage::Sustain => self.level = self.sustain,

            EnvelopeStage::Release => {
                self.release_elapsed += 1.0;
                let progress = if self.release_samples < 1.0 {
                    1.0
                } else {
                    (self.release_elapsed / self.release_samples).min(1.0)
                };
                self.level = self.release_start * (1.0 - progress);
                if progress >= 1.0 || self.level <= SILENCE {
                    self.kill();
                }
            }

            EnvelopeStage::Finished => {}
        }

        self.level
    }
}
