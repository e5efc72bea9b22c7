//! MIDI effects applied to incoming messages before they reach a channel.
//!
//! Modifiers run in registration order. Each one sees every message the
//! previous stage produced and may drop, transform or multiply it. Temporal
//! modifiers such as the arpeggiator also generate events from `tick`, which
//! the synthesizer calls once per render quantum.

mod arpeggiator;
mod harmonizer;
mod randomizer;
mod transform;

pub use arpeggiator::{ArpMode, Arpeggiator};
pub use harmonizer::Harmonizer;
pub use randomizer::VelocityRandomizer;
pub use transform::{ChannelFilter, Transpose, VelocityCurve};

use crate::error::{Error, Result};
use crate::midi::MidiMessage;

pub trait MidiModifier: Send {
    fn name(&self) -> &str;

    /// Pushes zero or more messages derived from `message` onto `output`.
    fn process(&mut self, message: MidiMessage, output: &mut Vec<MidiMessage>);

    /// Advances internal time by `delta` seconds at `bpm`.
    fn tick(&mut self, _delta: f64, _bpm: f64, _output: &mut Vec<MidiMessage>) {}

    /// Releases whatever the modifier is sounding on its own. Called before
    /// it is removed or disabled.
    fn flush(&mut self, _output: &mut Vec<MidiMessage>) {}

    fn reset(&mut self) {}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModifierId(u64);

struct Entry {
    id: ModifierId,
    enabled: bool,
    modifier: Box<dyn MidiModifier>,
}

/// Ordered list of modifiers with scratch space for running the pipeline.
#[derive(Default)]
pub struct ModifierChain {
    entries: Vec<Entry>,
    id_ctr: u64,
    current: Vec<MidiMessage>,
    next: Vec<MidiMessage>,
}

impl ModifierChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, modifier: Box<dyn MidiModifier>) -> ModifierId {
        let id = ModifierId(self.id_ctr);
        self.id_ctr += 1;
        tracing::debug!("adding MIDI modifier {} ({:?})", modifier.name(), id);
        self.entries.push(Entry {
            id,
            enabled: true,
            modifier,
        });
        id
    }

    /// Removes modifier `id`, pushing the note-offs it still owes onto `output`.
    pub fn remove(
        &mut self,
        id: ModifierId,
        output: &mut Vec<MidiMessage>,
    ) -> Result<Box<dyn MidiModifier>> {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(Error::UnknownModifier(id))?;
        let mut entry = self.entries.remove(index);
        if entry.enabled {
            entry.modifier.flush(output);
        }
        tracing::debug!("removed MIDI modifier {} ({:?})", entry.modifier.name(), id);
        Ok(entry.modifier)
    }

    /// Enables or disables modifier `id`. Disabling flushes it into `output`.
    pub fn set_enabled(
        &mut self,
        id: ModifierId,
        enabled: bool,
        output: &mut Vec<MidiMessage>,
    ) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(Error::UnknownModifier(id))?;
        if entry.enabled && !enabled {
            entry.modifier.flush(output);
        }
        entry.enabled = enabled;
        Ok(())
    }

    pub fn is_enabled(&self, id: ModifierId) -> Option<bool> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.enabled)
    }

    /// Runs `message` through every enabled modifier and appends the survivors
    /// to `output`.
    pub fn process(&mut self, message: MidiMessage, output: &mut Vec<MidiMessage>) {
        self.current.clear();
        self.current.push(message);

        for entry in self.entries.iter_mut().filter(|e| e.enabled) {
            self.next.clear();
            for m in self.current.drain(..) {
                entry.modifier.process(m, &mut self.next);
            }
            std::mem::swap(&mut self.current, &mut self.next);
            if self.current.is_empty() {
                break;
            }
        }

        output.extend(self.current.drain(..));
    }

    /// Collects events from every enabled temporal modifier.
    pub fn tick(&mut self, delta: f64, bpm: f64, output: &mut Vec<MidiMessage>) {
        for entry in self.entries.iter_mut().filter(|e| e.enabled) {
            entry.modifier.tick(delta, bpm, output);
        }
    }

    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.modifier.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.modifier.name())
    }
}
