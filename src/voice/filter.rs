// Low-pass state variable filter (trapezoidal SVF).
//
// Coefficients are computed once per frame and shared by every output channel,
// each channel keeps its own `LowPass` state.

pub const MIN_CUTOFF: f32 = 20.0;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LowPassCoefficients {
    k: f32,
    a1: f32,
    a2: f32,
    a3: f32,
}

impl LowPassCoefficients {
    /// Cutoff is clamped to `[20 Hz, 0.49 * sample_rate]`, resonance to `[0, 0.99]`.
    pub fn new(cutoff: f32, resonance: f32, sample_rate: f32) -> Self {
        let nyquist_limit = (sample_rate * 0.49).max(MIN_CUTOFF);
        let cutoff = if cutoff.is_nan() {
            nyquist_limit
        } else {
            cutoff.clamp(MIN_CUTOFF, nyquist_limit)
        };
        let resonance = if resonance.is_nan() {
            0.0
        } else {
            resonance.clamp(0.0, 0.99)
        };

        let g = (std::f32::consts::PI * cutoff / sample_rate).tan();
        let k = 2.0 - 2.0 * resonance;
        let a1 = 1.0 / (1.0 + g * (g + k));
        let a2 = g * a1;
        let a3 = g * a2;
        Self { k, a1, a2, a3 }
    }
}

#[derive(Debug, Copy, Clone, Default)]
pub struct LowPass {
    ic1eq: f32,
    ic2eq: f32,
}

impl LowPass {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn process(&mut self, c: &LowPassCoefficients, input: f32) -> f32 {
        let v3 = input - self.ic2eq;
        let v1 = c.a1 * self.ic1eq + c.a2 * v3;
        let v2 = self.ic2eq + c.a2 * self.ic1eq + c.a3 * v3;

        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;
        v2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rms_through(cutoff: f32, frequency: f32) -> f32 {
        let sr = 48_000.0;
        let c = LowPassCoefficients::new(cutoff, 0.0, sr);
        let mut lp = LowPass::default();
        let mut sum = 0.0;
        let n = 4800;
        for i in 0..(2 * n) {
            let x = (2.0 * std::f32::consts::PI * frequency * i as f32 / sr).sin();
            let y = lp.process(&c, x);
            if i >= n {
                sum += y * y;
            }
        }
        (sum / n as f32).sqrt()
    }

    #[test]
    fn passes_lows_and_cuts_highs() {
        let low = rms_through(2000.0, 100.0);
        let high = rms_through(200.0, 10_000.0);
        assert!(low > 0.6, "low band attenuated to {}", low);
        assert!(high < 0.05, "high band leaked at {}", high);
    }

    #[test]
    fn invalid_inputs_are_clamped() {
        let c = LowPassCoefficients::new(f32::NAN, f32::NAN, 48_000.0);
        let mut lp = LowPass::default();
        for _ in 0..100 {
            assert!(lp.process(&c, 1.0).is_finite());
        }
        assert_eq!(
            LowPassCoefficients::new(-5.0, 0.5, 48_000.0),
            LowPassCoefficients::new(MIN_CUTOFF, 0.5, 48_000.0)
        );
    }
}
