use serde::Deserialize;

use super::MidiModifier;
use crate::midi::{Command, MidiMessage};

fn has_note(message: &MidiMessage) -> bool {
    matches!(
        message.command(),
        Command::NoteOn | Command::NoteOff | Command::PolyPressure
    )
}

/// Shifts note numbers. Notes pushed outside 0-127 are dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct Transpose {
    pub semitones: i8,
}

impl Transpose {
    pub fn new(semitones: i8) -> Self {
        Self { semitones }
    }
}

impl MidiModifier for Transpose {
    fn name(&self) -> &str {
        "transpose"
    }

    fn process(&mut self, message: MidiMessage, output: &mut Vec<MidiMessage>) {
        if !has_note(&message) {
            output.push(message);
            return;
        }
        let note = message.note() as i16 + self.semitones as i16;
        if (0..=127).contains(&note) {
            output.push(message.with_note(note as u8));
        }
    }
}

/// Reshapes Note-On velocity as `127 * (v / 127) ^ exponent`.
#[derive(Debug, Clone, Deserialize)]
pub struct VelocityCurve {
    pub exponent: f32,
}

impl VelocityCurve {
    pub fn new(exponent: f32) -> Self {
        Self { exponent }
    }

    fn apply(&self, velocity: u8) -> u8 {
        let exponent = if self.exponent.is_finite() {
            self.exponent.max(0.0)
        } else {
            1.0
        };
        let v = 127.0 * (velocity as f32 / 127.0).powf(exponent);
        // Stays above 0 so a Note-On never turns into a Note-Off.
        (v.round() as u8).clamp(1, 127)
    }
}

impl MidiModifier for VelocityCurve {
    fn name(&self) -> &str {
        "velocity curve"
    }

    fn process(&mut self, message: MidiMessage, output: &mut Vec<MidiMessage>) {
        if message.is_note_on() {
            output.push(message.with_velocity(self.apply(message.velocity())));
        } else {
            output.push(message);
        }
    }
}

/// Passes only channel messages whose channel bit is set. System messages
/// always pass.
#[derive(Debug, Clone)]
pub struct ChannelFilter {
    mask: u16,
}

impl ChannelFilter {
    pub fn new(channels: &[u8]) -> Self {
        let mask = channels
            .iter()
            .filter(|c| (1..=16).contains(*c))
            .fold(0u16, |mask, c| mask | 1 << (c - 1));
        Self { mask }
    }

    pub fn allows(&self, channel: u8) -> bool {
        (1..=16).contains(&channel) && self.mask & (1 << (channel - 1)) != 0
    }
}

impl MidiModifier for ChannelFilter {
    fn name(&self) -> &str {
        "channel filter"
    }

    fn process(&mut self, message: MidiMessage, output: &mut Vec<MidiMessage>) {
        if message.command() == Command::System || self.allows(message.channel()) {
            output.push(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(modifier: &mut dyn MidiModifier, message: MidiMessage) -> Vec<MidiMessage> {
        let mut out = Vec::new();
        modifier.process(message, &mut out);
        out
    }

    #[test]
    fn transpose_shifts_and_drops_out_of_range() {
        let mut t = Transpose::new(12);
        assert_eq!(run(&mut t, MidiMessage::note_on(1, 60, 90).unwrap())[0].note(), 72);
        assert_eq!(run(&mut t, MidiMessage::note_off(1, 60).unwrap())[0].note(), 72);
        assert!(run(&mut t, MidiMessage::note_on(1, 120, 90).unwrap()).is_empty());

        let cc = MidiMessage::control_change(1, 7, 100).unwrap();
        assert_eq!(run(&mut t, cc), vec![cc]);
    }

    #[test]
    fn velocity_curve_keeps_note_on() {
        let mut soft = VelocityCurve::new(3.0);
        let out = run(&mut soft, MidiMessage::note_on(1, 60, 10).unwrap());
        assert!(out[0].is_note_on());
        assert_eq!(out[0].velocity(), 1);

        let mut linear = VelocityCurve::new(1.0);
        assert_eq!(run(&mut linear, MidiMessage::note_on(1, 60, 64).unwrap())[0].velocity(), 64);
        assert_eq!(run(&mut soft, MidiMessage::note_on(1, 60, 127).unwrap())[0].velocity(), 127);
    }

    #[test]
    fn channel_filter_uses_mask() {
        let mut f = ChannelFilter::new(&[1, 10, 0, 17]);
        assert!(f.allows(1) && f.allows(10));
        assert!(!f.allows(2));
        assert_eq!(run(&mut f, MidiMessage::note_on(10, 36, 100).unwrap()).len(), 1);
        assert!(run(&mut f, MidiMessage::note_on(3, 36, 100).unwrap()).is_empty());
        assert_eq!(run(&mut f, MidiMessage::new(0xf8, 0, 0)).len(), 1);
    }
}
