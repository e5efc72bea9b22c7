use serde::Deserialize;

use super::MidiModifier;
use crate::midi::MidiMessage;
use crate::rng::Xoroshiro;

/// Steps emitted from one tick before the remainder is dropped.
const MAX_STEPS_PER_TICK: usize = 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArpMode {
    Up,
    Down,
    UpDown,
    Random,
}

impl Default for ArpMode {
    fn default() -> Self {
        ArpMode::Up
    }
}

/// Plays held notes one at a time, on a grid of `rate` beats.
///
/// Incoming notes are swallowed and collected into a sorted set. Every step the
/// previous note is released and the next one in the pattern is played; with a
/// gate below 1 the release happens early, at `gate` of the step.
pub struct Arpeggiator {
    mode: ArpMode,
    rate: f64,
    gate: f64,
    octaves: u8,

    held: Vec<u8>,
    /// Last note-on received; its channel and velocity are used for every step.
    origin: MidiMessage,

    elapsed: f64,
    position: usize,
    ascending: bool,
    sounding: Option<MidiMessage>,
    pending_trigger: bool,
    rng: Xoroshiro,
}

impl Arpeggiator {
    /// `rate` is the step length in beats, `gate` the fraction of a step a
    /// note is held for.
    pub fn new(mode: ArpMode, rate: f64, gate: f64, octaves: u8) -> Self {
        Self {
            mode,
            rate: if rate > 0.0 { rate } else { 0.25 },
            gate: gate.clamp(0.0, 1.0),
            octaves: octaves.clamp(1, 8),
            held: Vec::with_capacity(128),
            origin: MidiMessage::new(0x90, 60, 100),
            elapsed: 0.0,
            position: 0,
            ascending: true,
            sounding: None,
            pending_trigger: false,
            rng: Xoroshiro::new(0xa7e9),
        }
    }

    pub fn mode(&self) -> ArpMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ArpMode) {
        self.mode = mode;
    }

    pub fn held_notes(&self) -> &[u8] {
        &self.held
    }

    pub fn step_duration(&self, bpm: f64) -> f64 {
        60.0 / bpm.max(1.0) * self.rate
    }

    fn pattern_len(&self) -> usize {
        self.held.len() * self.octaves as usize
    }

    fn note_at(&self, position: usize) -> u8 {
        let n = self.held.len();
        let note = self.held[position % n] as usize + 12 * (position / n);
        if note > 127 {
            self.held[position % n]
        } else {
            note as u8
        }
    }

    fn first_position(&mut self) -> usize {
        self.ascending = true;
        match self.mode {
            ArpMode::Up | ArpMode::UpDown => 0,
            ArpMode::Down => self.pattern_len() - 1,
            ArpMode::Random => self.rng.next_below(self.held.len()),
        }
    }

    fn next_position(&mut self) -> usize {
        let len = self.pattern_len();
        let current = self.position.min(len - 1);
        match self.mode {
            ArpMode::Up => (current + 1) % len,
            ArpMode::Down => (current + len - 1) % len,
            ArpMode::UpDown => {
                if len == 1 {
                    return 0;
                }
                if self.ascending && current + 1 >= len {
                    self.ascending = false;
                } else if !self.ascending && current == 0 {
                    self.ascending = true;
                }
                if self.ascending {
                    current + 1
                } else {
                    current - 1
                }
            }
            ArpMode::Random => self.rng.next_below(self.held.len()),
        }
    }

    fn release(&mut self, output: &mut Vec<MidiMessage>) {
        if let Some(note_on) = self.sounding.take() {
            output.push(note_on.as_note_off());
        }
    }

    fn trigger(&mut self, position: usize, output: &mut Vec<MidiMessage>) {
        self.release(output);
        self.position = position;
        let note_on = self.origin.with_note(self.note_at(position));
        output.push(note_on);
        self.sounding = Some(note_on);
    }
}

impl MidiModifier for Arpeggiator {
    fn name(&self) -> &str {
        "arpeggiator"
    }

    fn process(&mut self, message: MidiMessage, output: &mut Vec<MidiMessage>) {
        if message.is_note_on() {
            if self.held.is_empty() {
                self.pending_trigger = true;
            }
            if let Err(i) = self.held.binary_search(&message.note()) {
                self.held.insert(i, message.note());
            }
            self.origin = message.with_timestamp(0);
        } else if message.is_note_off() {
            if let Ok(i) = self.held.binary_search(&message.note()) {
                self.held.remove(i);
            }
            if self.held.is_empty() {
                self.release(output);
                self.pending_trigger = false;
                self.elapsed = 0.0;
            }
        } else {
            output.push(message);
        }
    }

    fn tick(&mut self, delta: f64, bpm: f64, output: &mut Vec<MidiMessage>) {
        if self.held.is_empty() {
            return;
        }
        let step = self.step_duration(bpm);

        if self.pending_trigger {
            self.pending_trigger = false;
            self.elapsed = 0.0;
            let first = self.first_position();
            self.trigger(first, output);
            return;
        }

        self.elapsed += delta.max(0.0);
        let mut steps = 0;
        while self.elapsed >= step {
            self.elapsed -= step;
            let next = self.next_position();
            self.trigger(next, output);
            steps += 1;
            if steps == MAX_STEPS_PER_TICK {
                self.elapsed %= step;
                break;
            }
        }

        if self.elapsed >= step * self.gate {
            self.release(output);
        }
    }

    fn flush(&mut self, output: &mut Vec<MidiMessage>) {
        self.release(output);
        self.held.clear();
        self.pending_trigger = false;
        self.elapsed = 0.0;
    }

    fn reset(&mut self) {
        self.held.clear();
        self.sounding = None;
        self.pending_trigger = false;
        self.elapsed = 0.0;
        self.position = 0;
        self.ascending = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const DT: f64 = 0.001;

    /// Ticks for `seconds` and records (time, message) for every emitted event.
    fn run(arp: &mut Arpeggiator, seconds: f64, bpm: f64) -> Vec<(f64, MidiMessage)> {
        let mut events = Vec::new();
        let mut out = Vec::new();
        let ticks = (seconds / DT).round() as usize;
        for i in 0..ticks {
            arp.tick(DT, bpm, &mut out);
            events.extend(out.drain(..).map(|m| (i as f64 * DT, m)));
        }
        events
    }

    fn hold(arp: &mut Arpeggiator, notes: &[u8]) {
        let mut out = Vec::new();
        for &n in notes {
            arp.process(MidiMessage::note_on(1, n, 100).unwrap(), &mut out);
        }
        assert!(out.is_empty());
    }

    fn played(events: &[(f64, MidiMessage)]) -> Vec<u8> {
        events
            .iter()
            .filter(|(_, m)| m.is_note_on())
            .map(|(_, m)| m.note())
            .collect()
    }

    #[test]
    fn gate_releases_early_and_retriggers_on_step() {
        let mut arp = Arpeggiator::new(ArpMode::Up, 0.25, 0.9, 1);
        let step = arp.step_duration(120.0);
        assert_abs_diff_eq!(step, 0.125);

        hold(&mut arp, &[60]);
        let events = run(&mut arp, 0.2, 120.0);

        assert!(events[0].1.is_note_on());
        assert_abs_diff_eq!(events[0].0, 0.0);
        assert!(events[1].1.is_note_off());
        assert_abs_diff_eq!(events[1].0, 0.9 * step, epsilon = 2.0 * DT);
        assert!(events[2].1.is_note_on());
        assert_abs_diff_eq!(events[2].0, step, epsilon = 2.0 * DT);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|(_, m)| m.note() == 60));
    }

    #[test]
    fn up_wraps_across_octaves() {
        let mut arp = Arpeggiator::new(ArpMode::Up, 0.25, 0.5, 2);
        hold(&mut arp, &[64, 60]);
        let events = run(&mut arp, 0.125 * 5.5, 120.0);
        assert_eq!(played(&events), vec![60, 64, 72, 76, 60, 64]);
    }

    #[test]
    fn down_starts_at_top() {
        let mut arp = Arpeggiator::new(ArpMode::Down, 0.25, 0.5, 1);
        hold(&mut arp, &[60, 64, 67]);
        let events = run(&mut arp, 0.125 * 3.5, 120.0);
        assert_eq!(played(&events), vec![67, 64, 60, 67]);
    }

    #[test]
    fn up_down_does_not_repeat_boundaries() {
        let mut arp = Arpeggiator::new(ArpMode::UpDown, 0.25, 0.5, 1);
        hold(&mut arp, &[60, 64, 67]);
        let events = run(&mut arp, 0.125 * 6.5, 120.0);
        assert_eq!(played(&events), vec![60, 64, 67, 64, 60, 64, 67]);
    }

    #[test]
    fn random_picks_held_notes() {
        let mut arp = Arpeggiator::new(ArpMode::Random, 0.25, 0.5, 1);
        hold(&mut arp, &[48, 55, 62]);
        let events = run(&mut arp, 2.0, 120.0);
        let notes = played(&events);
        assert!(notes.len() >= 15);
        assert!(notes.iter().all(|n| [48, 55, 62].contains(n)));
    }

    #[test]
    fn releasing_all_keys_stops_sound() {
        let mut arp = Arpeggiator::new(ArpMode::Up, 0.25, 1.0, 1);
        hold(&mut arp, &[60]);
        let mut out = Vec::new();
        arp.tick(DT, 120.0, &mut out);
        assert!(out[0].is_note_on());

        out.clear();
        arp.process(MidiMessage::note_off(1, 60).unwrap(), &mut out);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_note_off());

        out.clear();
        arp.tick(1.0, 120.0, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn flush_releases_octave_note() {
        let mut arp = Arpeggiator::new(ArpMode::Up, 0.25, 1.0, 2);
        hold(&mut arp, &[60]);
        let events = run(&mut arp, 0.2, 120.0);
        assert_eq!(played(&events), vec![60, 72]);

        let mut out = Vec::new();
        arp.flush(&mut out);
        assert_eq!(out, vec![MidiMessage::note_off(1, 72).unwrap()]);
        assert!(arp.held_notes().is_empty());

        out.clear();
        arp.tick(1.0, 120.0, &mut out);
        arp.flush(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn passes_non_note_messages() {
        let mut arp = Arpeggiator::new(ArpMode::Up, 0.25, 0.5, 1);
        let mut out = Vec::new();
        let cc = MidiMessage::control_change(1, 64, 127).unwrap();
        arp.process(cc, &mut out);
        assert_eq!(out, vec![cc]);
    }
}
