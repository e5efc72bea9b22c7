use std::f32::consts::FRAC_PI_2;
use std::fmt::Display;

pub fn log_if_error<T, E: Display>(msg: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(o) => Some(o),
        Err(e) => {
            tracing::warn!("{}: {}", msg, e);
            None
        }
    }
}

/// Equal temperament, A4 (note 69) = 440 Hz.
#[inline]
pub fn note_to_frequency(note: f32) -> f32 {
    440.0 * 2.0f32.powf((note - 69.0) / 12.0)
}

#[inline]
pub fn semitones_to_ratio(semitones: f32) -> f32 {
    2.0f32.powf(semitones / 12.0)
}

#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Gain of output channel `channel` for a source at `pan` (0 = left/first, 1 = right/last).
///
/// Mono passes through, stereo uses the equal-power law and wider layouts
/// crossfade linearly between the two nearest channels.
#[inline]
pub fn pan_gain(pan: f32, channel: usize, channels: usize) -> f32 {
    let pan = pan.clamp(0.0, 1.0);
    match channels {
        0 | 1 => 1.0,
        2 => {
            let angle = pan * FRAC_PI_2;
            if channel == 0 {
                angle.cos()
            } else {
                angle.sin()
            }
        }
        n => {
            let position = pan * (n - 1) as f32;
            (1.0 - (position - channel as f32).abs()).max(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pitch_of_reference_notes() {
        assert_eq!(note_to_frequency(69.0), 440.0);
        assert_relative_eq!(note_to_frequency(60.0), 261.6256, epsilon = 1e-3);
        assert_relative_eq!(note_to_frequency(81.0), 880.0, epsilon = 1e-3);
    }

    #[test]
    fn stereo_pan_is_equal_power() {
        assert_relative_eq!(pan_gain(0.5, 0, 2), pan_gain(0.5, 1, 2));
        assert_relative_eq!(pan_gain(0.5, 0, 2), std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
        assert_relative_eq!(pan_gain(0.0, 0, 2), 1.0);
        assert_relative_eq!(pan_gain(0.0, 1, 2), 0.0);
        assert_relative_eq!(pan_gain(1.0, 0, 2), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn surround_pan_crossfades_neighbours() {
        // Four channels, halfway between channel 1 and 2.
        let pan = 0.5;
        assert_relative_eq!(pan_gain(pan, 0, 4), 0.0);
        assert_relative_eq!(pan_gain(pan, 1, 4), 0.5);
        assert_relative_eq!(pan_gain(pan, 2, 4), 0.5);
        assert_relative_eq!(pan_gain(pan, 3, 4), 0.0);
        assert_eq!(pan_gain(0.3, 0, 1), 1.0);
    }
}
