use super::MidiModifier;
use crate::midi::MidiMessage;
use crate::rng::Xoroshiro;

/// Humanizes Note-On velocity by a uniform offset in `-range..=range`.
pub struct VelocityRandomizer {
    range: u8,
    rng: Xoroshiro,
}

impl VelocityRandomizer {
    pub fn new(range: u8, seed: u64) -> Self {
        Self {
            range: range.min(127),
            rng: Xoroshiro::new(seed),
        }
    }
}

impl MidiModifier for VelocityRandomizer {
    fn name(&self) -> &str {
        "velocity randomizer"
    }

    fn process(&mut self, message: MidiMessage, output: &mut Vec<MidiMessage>) {
        if !message.is_note_on() {
            output.push(message);
            return;
        }
        let offset = self.rng.next_offset(self.range as i32);
        let velocity = (message.velocity() as i32 + offset).clamp(1, 127) as u8;
        output.push(message.with_velocity(velocity));
    }
}
