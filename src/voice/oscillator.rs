use serde::Deserialize;

use crate::rng::Xoroshiro;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OscillatorType {
    Sine,
    Saw,
    Square,
    Triangle,
    Noise,
}

impl Default for OscillatorType {
    fn default() -> Self {
        OscillatorType::Sine
    }
}

/// Naive phase-accumulating oscillator, one per unison layer.
#[derive(Debug, Copy, Clone)]
pub struct Oscillator {
    kind: OscillatorType,
    phase: f32,
    rng: Xoroshiro,
}

impl Oscillator {
    pub fn new(kind: OscillatorType, phase: f32, seed: u64) -> Self {
        Self {
            kind,
            phase: phase.rem_euclid(1.0),
            rng: Xoroshiro::new(seed),
        }
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    #[inline]
    pub fn next(&mut self, frequency: f32, sample_rate: f32) -> f32 {
        let t = self.phase;
        let value = match self.kind {
            OscillatorType::Sine => (t * 2.0 * std::f32::consts::PI).sin(),
            OscillatorType::Saw => 2.0 * t - 1.0,
            OscillatorType::Square => {
                if t < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            OscillatorType::Triangle => 1.0 - 4.0 * (t - 0.5).abs(),
            OscillatorType::Noise => 2.0 * self.rng.next_float() - 1.0,
        };

        self.phase += frequency / sample_rate;
        self.phase -= self.phase.floor();
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sine_completes_one_cycle() {
        let mut osc = Oscillator::new(OscillatorType::Sine, 0.0, 1);
        let sr = 4000.0;
        assert_abs_diff_eq!(osc.next(1000.0, sr), 0.0);
        assert_abs_diff_eq!(osc.next(1000.0, sr), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(osc.next(1000.0, sr), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(osc.next(1000.0, sr), -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(osc.phase(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn waveforms_stay_bounded() {
        for kind in [
            OscillatorType::Saw,
            OscillatorType::Square,
            OscillatorType::Triangle,
            OscillatorType::Noise,
        ] {
            let mut osc = Oscillator::new(kind, 0.25, 9);
            for _ in 0..1000 {
                let s = osc.next(441.0, 44_100.0);
                assert!((-1.0..=1.0).contains(&s), "{:?} produced {}", kind, s);
            }
        }
    }
}
