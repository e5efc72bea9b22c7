use std::path::Path;
use std::time::Duration;

use midly::{MetaMessage, Smf, Timing, TrackEventKind};

use super::{MetaEvent, MidiDataProvider, MidiEvent, TempoMap, TimedEvent};
use crate::error::{Error, Result};
use crate::midi::MidiMessage;

/// In-memory event list, sorted by tick, with its own tempo map.
#[derive(Debug, Clone)]
pub struct MidiSequence {
    ticks_per_quarter: u16,
    events: Vec<TimedEvent>,
    tempo: TempoMap,
    length: u64,
}

impl MidiSequence {
    pub fn new(ticks_per_quarter: u16) -> Self {
        Self {
            ticks_per_quarter: ticks_per_quarter.max(1),
            events: Vec::new(),
            tempo: TempoMap::default(),
            length: 0,
        }
    }

    /// Inserts after any events already at `tick`, so file order is kept.
    pub fn push(&mut self, tick: u64, event: MidiEvent) {
        let i = self.events.partition_point(|e| e.tick <= tick);
        self.events.insert(i, TimedEvent { tick, event });
        self.length = self.length.max(tick + 1);
    }

    /// Appends without keeping order. Callers sort once when done.
    fn append(&mut self, tick: u64, event: MidiEvent) {
        self.events.push(TimedEvent { tick, event });
        self.length = self.length.max(tick + 1);
    }

    pub fn push_message(&mut self, tick: u64, message: MidiMessage) {
        self.push(tick, MidiEvent::Channel(message));
    }

    /// Records a tempo change as a meta event and in the tempo map.
    pub fn set_tempo(&mut self, tick: u64, bpm: f64) {
        let beat = tick as f64 / self.ticks_per_quarter as f64;
        self.tempo.insert(beat, bpm);
        let micros = (60_000_000.0 / self.tempo.bpm_at_beat(beat)).round() as u32;
        self.push(tick, MidiEvent::Meta(MetaEvent::Tempo(micros)));
    }

    /// Extends the sequence to at least `ticks`, leaving trailing silence.
    pub fn with_length(mut self, ticks: u64) -> Self {
        self.length = self.length.max(ticks);
        self
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo
    }

    pub fn all_events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_smf(&bytes)
    }

    /// Parses a Standard MIDI File, merging every track into one list.
    pub fn from_smf(bytes: &[u8]) -> Result<Self> {
        let smf = Smf::parse(bytes)?;
        let ticks_per_quarter = match smf.header.timing {
            Timing::Metrical(t) => t.as_int(),
            Timing::Timecode(..) => return Err(Error::UnsupportedTiming),
        };

        let mut sequence = Self::new(ticks_per_quarter);
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += event.delta.as_int() as u64;
                match event.kind {
                    TrackEventKind::Midi { channel, message } => {
                        let message = MidiMessage::from_midly(channel, message);
                        sequence.append(tick, MidiEvent::Channel(message));
                    }
                    TrackEventKind::Meta(MetaMessage::Tempo(micros)) => {
                        let beat = tick as f64 / sequence.ticks_per_quarter as f64;
                        sequence
                            .tempo
                            .insert(beat, TempoMap::bpm_from_micros(micros.as_int()));
                        sequence.append(tick, MidiEvent::Meta(MetaEvent::Tempo(micros.as_int())));
                    }
                    TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denominator, ..)) => {
                        let denominator = 1u8.checked_shl(denominator as u32).unwrap_or(0);
                        sequence.append(
                            tick,
                            MidiEvent::Meta(MetaEvent::TimeSignature(numerator, denominator)),
                        );
                    }
                    TrackEventKind::Meta(MetaMessage::EndOfTrack) => {
                        sequence.append(tick, MidiEvent::Meta(MetaEvent::EndOfTrack));
                    }
                    TrackEventKind::SysEx(data) => {
                        sequence.append(tick, MidiEvent::SysEx(data.to_vec()));
                    }
                    _ => {}
                }
            }
        }

        // Stable, so events sharing a tick keep track order.
        sequence.events.sort_by_key(|e| e.tick);

        tracing::debug!(
            "loaded MIDI file: {} tracks, {} events, {} ticks at {} ppq",
            smf.tracks.len(),
            sequence.events.len(),
            sequence.length,
            sequence.ticks_per_quarter
        );
        Ok(sequence)
    }
}

impl MidiDataProvider for MidiSequence {
    fn ticks_per_quarter_note(&self) -> u16 {
        self.ticks_per_quarter
    }

    fn length_ticks(&self) -> u64 {
        self.length
    }

    fn events(&self, start: u64, end: u64) -> &[TimedEvent] {
        let lo = self.events.partition_point(|e| e.tick < start);
        let hi = self.events.partition_point(|e| e.tick < end).max(lo);
        &self.events[lo..hi]
    }

    fn time_for_tick(&self, tick: u64) -> Duration {
        Duration::from_secs_f64(self.tempo.seconds_at_tick(tick, self.ticks_per_quarter))
    }

    fn tick_for_time(&self, time: Duration) -> u64 {
        self.tempo
            .tick_at_seconds(time.as_secs_f64(), self.ticks_per_quarter)
    }
}
