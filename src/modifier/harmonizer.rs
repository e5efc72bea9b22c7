use super::MidiModifier;
use crate::midi::{Command, MidiMessage};

/// Adds a copy of every note at each interval, turning one note into a chord.
#[derive(Debug, Clone)]
pub struct Harmonizer {
    intervals: Vec<i8>,
}

impl Harmonizer {
    pub fn new(intervals: Vec<i8>) -> Self {
        Self { intervals }
    }

    pub fn intervals(&self) -> &[i8] {
        &self.intervals
    }
}

impl MidiModifier for Harmonizer {
    fn name(&self) -> &str {
        "harmonizer"
    }

    fn process(&mut self, message: MidiMessage, output: &mut Vec<MidiMessage>) {
        output.push(message);
        if !matches!(
            message.command(),
            Command::NoteOn | Command::NoteOff | Command::PolyPressure
        ) {
            return;
        }

        for &interval in &self.intervals {
            let note = message.note() as i16 + interval as i16;
            if interval != 0 && (0..=127).contains(&note) {
                output.push(message.with_note(note as u8));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_chord_in_range() {
        let mut h = Harmonizer::new(vec![4, 7, 0]);
        let mut out = Vec::new();
        h.process(MidiMessage::note_on(2, 60, 100).unwrap(), &mut out);
        let notes: Vec<u8> = out.iter().map(|m| m.note()).collect();
        assert_eq!(notes, vec![60, 64, 67]);
        assert!(out.iter().all(|m| m.channel() == 2 && m.velocity() == 100));

        out.clear();
        h.process(MidiMessage::note_off(1, 122).unwrap(), &mut out);
        assert_eq!(out.len(), 2);

        out.clear();
        h.process(MidiMessage::program_change(1, 3).unwrap(), &mut out);
        assert_eq!(out.len(), 1);
    }
}
