//! Sample-accurate playback of tick-based MIDI data.
//!
//! The sequencer is driven by the render loop: before each block it converts
//! the block's time span to a half-open tick range and forwards every channel
//! event in that range to its target. Meta and SysEx events are carried by
//! providers but never dispatched.

mod sequence;
mod tempo;

pub use sequence::MidiSequence;
pub use tempo::{TempoMap, DEFAULT_TEMPO};

use std::sync::Arc;
use std::time::Duration;

use crate::midi::MidiMessage;
use crate::synthesizer::MidiControllable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaEvent {
    /// Microseconds per quarter note.
    Tempo(u32),
    TimeSignature(u8, u8),
    EndOfTrack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiEvent {
    Channel(MidiMessage),
    Meta(MetaEvent),
    SysEx(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEvent {
    pub tick: u64,
    pub event: MidiEvent,
}

pub trait MidiDataProvider: Send + Sync {
    fn ticks_per_quarter_note(&self) -> u16;
    fn length_ticks(&self) -> u64;

    fn duration(&self) -> Duration {
        self.time_for_tick(self.length_ticks())
    }

    /// Events with `start <= tick < end`, in order.
    fn events(&self, start: u64, end: u64) -> &[TimedEvent];

    fn time_for_tick(&self, tick: u64) -> Duration;
    fn tick_for_time(&self, time: Duration) -> u64;
}

/// External master clock. When attached, it replaces the provider's own
/// tempo map for tick conversion.
pub trait SequencerContext: Send + Sync {
    fn tempo_track(&self) -> &TempoMap;
}

type EndOfStreamCallback = Box<dyn FnMut() + Send>;

pub struct Sequencer {
    provider: Arc<dyn MidiDataProvider>,
    target: Arc<dyn MidiControllable>,
    context: Option<Arc<dyn SequencerContext>>,
    sample_rate: f64,

    current_tick: u64,
    /// Kept separately from `current_tick` so blocks shorter than a tick
    /// still advance time.
    position: f64,
    playing: bool,
    looping: bool,

    end_of_stream: Vec<EndOfStreamCallback>,
}

impl Sequencer {
    pub fn new(
        provider: Arc<dyn MidiDataProvider>,
        target: Arc<dyn MidiControllable>,
        sample_rate: f32,
    ) -> Self {
        Self {
            provider,
            target,
            context: None,
            sample_rate: sample_rate.max(1.0) as f64,
            current_tick: 0,
            position: 0.0,
            playing: false,
            looping: false,
            end_of_stream: Vec::new(),
        }
    }

    pub fn set_context(&mut self, context: Option<Arc<dyn SequencerContext>>) {
        self.context = context;
        self.current_tick = self.tick_for_seconds(self.position);
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn current_time(&self) -> Duration {
        Duration::from_secs_f64(self.position)
    }

    pub fn provider(&self) -> &Arc<dyn MidiDataProvider> {
        &self.provider
    }

    /// Called each time playback runs off the end without looping.
    pub fn on_end_of_stream<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.end_of_stream.push(Box::new(callback));
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    /// Stops, rewinds and silences every channel.
    pub fn stop(&mut self) {
        self.playing = false;
        self.current_tick = 0;
        self.position = 0.0;
        self.all_notes_off();
        tracing::debug!("sequencer stopped");
    }

    /// Jumps to `time`, silencing held notes first.
    pub fn seek(&mut self, time: Duration) {
        self.all_notes_off();
        let seconds = time.as_secs_f64().min(self.seconds_for_tick(self.provider.length_ticks()));
        self.position = seconds;
        self.current_tick = self.tick_for_seconds(seconds);
        tracing::debug!("sequencer seek to tick {}", self.current_tick);
    }

    /// Dispatches every event due within the next `frames` frames.
    pub fn process_block(&mut self, frames: usize) {
        if !self.playing {
            return;
        }
        let length = self.provider.length_ticks();
        if length == 0 {
            self.end_reached();
            return;
        }

        let end_time = self.position + frames as f64 / self.sample_rate;
        let end_tick = self.tick_for_seconds(end_time);

        if end_tick < length {
            self.dispatch_range(self.current_tick, end_tick);
            self.current_tick = end_tick;
            self.position = end_time;
            return;
        }

        self.dispatch_range(self.current_tick, length);
        if !self.looping {
            self.end_reached();
            return;
        }

        let overflow = end_time - self.seconds_for_tick(length);
        let loop_duration = self.seconds_for_tick(length);
        self.position = if loop_duration > 0.0 {
            overflow.max(0.0) % loop_duration
        } else {
            0.0
        };
        self.current_tick = self.tick_for_seconds(self.position).min(length - 1);
        self.all_notes_off();
        tracing::debug!("sequencer looped");
        self.dispatch_range(0, self.current_tick);
    }

    fn dispatch_range(&self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        for event in self.provider.events(start, end) {
            if let MidiEvent::Channel(message) = &event.event {
                self.target.process_midi_message(*message);
            }
        }
    }

    fn end_reached(&mut self) {
        self.stop();
        for callback in &mut self.end_of_stream {
            callback();
        }
    }

    fn all_notes_off(&self) {
        for message in MidiMessage::all_notes_off_everywhere() {
            self.target.process_midi_message(message);
        }
    }

    fn tick_for_seconds(&self, seconds: f64) -> u64 {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        match &self.context {
            Some(context) => context
                .tempo_track()
                .tick_at_seconds(seconds, self.provider.ticks_per_quarter_note()),
            None => self.provider.tick_for_time(Duration::from_secs_f64(seconds)),
        }
    }

    fn seconds_for_tick(&self, tick: u64) -> f64 {
        match &self.context {
            Some(context) => context
                .tempo_track()
                .seconds_at_tick(tick, self.provider.ticks_per_quarter_note()),
            None => self.provider.time_for_tick(tick).as_secs_f64(),
        }
    }
}
