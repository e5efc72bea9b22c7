use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::channel::{MidiChannel, VoiceKey};
use crate::error::{Error, Result};
use crate::instrument::InstrumentBank;
use crate::midi::{Command, MidiMessage, CC_TIMBRE, PITCH_BEND_CENTER};
use crate::modifier::{MidiModifier, ModifierChain, ModifierId};
use crate::pool::BufferPool;
use crate::voice::{Voice, MAX_OUTPUT_CHANNELS};

pub const NUM_CHANNELS: usize = 16;
pub const DEFAULT_BPM: f64 = 120.0;

/// MPE lower zone: channel 1 is the master, the rest carry one note each.
pub const MPE_MASTER_CHANNEL: u8 = 1;
const MPE_MEMBER_BEND_RANGE: f32 = 48.0;

const POOL_BUFFERS: usize = 2;
const POOL_BUFFER_LEN: usize = 4096;

/// Anything that accepts MIDI, like the synthesizer or a recorder.
pub trait MidiControllable: Send + Sync {
    fn process_midi_message(&self, message: MidiMessage);
}

type Listener = Arc<dyn Fn(&MidiMessage) + Send + Sync>;

#[derive(Copy, Clone, Default)]
struct MemberChannel {
    note: Option<u8>,
    voice: Option<VoiceKey>,
    bend: f32,
    pressure: f32,
    timbre: f32,
}

#[derive(Default)]
struct MpeRouting {
    members: [MemberChannel; NUM_CHANNELS],
}

/// Sixteen MIDI channels behind a MIDI effect pipeline.
///
/// Every method takes `&self`, so one thread can render while others send
/// MIDI. Each channel has its own lock and the modifier chain is held only
/// while messages pass through it, never while rendering.
pub struct Synthesizer {
    sample_rate: f32,
    channels: usize,

    midi_channels: Vec<Mutex<MidiChannel>>,
    modifiers: Mutex<ModifierChain>,

    mpe_enabled: AtomicBool,
    mpe: Mutex<MpeRouting>,
    bpm: AtomicU64,

    pool: BufferPool,
    tick_events: Mutex<Vec<MidiMessage>>,
    listeners: Mutex<Vec<Listener>>,
}

impl Synthesizer {
    pub fn new(bank: Arc<dyn InstrumentBank>, sample_rate: f32, channels: usize) -> Result<Self> {
        if channels == 0 || channels > MAX_OUTPUT_CHANNELS {
            return Err(Error::InvalidChannelCount(channels));
        }

        let midi_channels = (1..=NUM_CHANNELS as u8)
            .map(|n| Mutex::new(MidiChannel::new(n, bank.clone(), sample_rate)))
            .collect();

        Ok(Self {
            sample_rate,
            channels,
            midi_channels,
            modifiers: Mutex::new(ModifierChain::new()),
            mpe_enabled: AtomicBool::new(false),
            mpe: Mutex::new(MpeRouting::default()),
            bpm: AtomicU64::new(DEFAULT_BPM.to_bits()),
            pool: BufferPool::new(POOL_BUFFERS, POOL_BUFFER_LEN * channels),
            tick_events: Mutex::new(Vec::with_capacity(64)),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Entry point for live and generated MIDI. The message passes through the
    /// modifier chain once and whatever survives goes straight to the channels.
    pub fn process_midi_message(&self, message: MidiMessage) {
        // Listeners may send MIDI back in, so none of our locks are held here.
        let listeners = self.listeners.lock().clone();
        for listener in &listeners {
            listener(&message);
        }

        let mut output = Vec::with_capacity(4);
        self.modifiers.lock().process(message, &mut output);
        for m in output {
            self.dispatch(m);
        }
    }

    /// Renders one interleaved block. The buffer length must be a multiple of
    /// the channel count.
    pub fn generate_audio(&self, buffer: &mut [f32]) {
        let frames = buffer.len() / self.channels;
        let delta = frames as f64 / self.sample_rate as f64;

        {
            let mut events = self.tick_events.lock();
            self.modifiers.lock().tick(delta, self.bpm(), &mut events);
            for m in events.drain(..) {
                self.dispatch(m);
            }
        }

        buffer.fill(0.0);
        let mut block = self.pool.acquire(buffer.len());
        let mut scratch = self.pool.acquire(buffer.len());
        for channel in &self.midi_channels {
            channel.lock().render(&mut block, &mut scratch, self.channels);
            for (out, s) in buffer.iter_mut().zip(block.iter()) {
                *out += s;
            }
        }
    }

    fn dispatch(&self, message: MidiMessage) {
        tracing::trace!("dispatching {:?}", message);
        if message.command() == Command::System {
            return;
        }
        if self.mpe_enabled.load(Ordering::Acquire)
            && message.channel() != MPE_MASTER_CHANNEL
            && self.dispatch_member(message)
        {
            return;
        }
        self.midi_channels[message.channel() as usize - 1]
            .lock()
            .process_midi_message(message);
    }

    /// Routes per-note expression from an MPE member channel to its voice.
    /// Returns false for messages that should be handled by the channel itself.
    fn dispatch_member(&self, message: MidiMessage) -> bool {
        let mut mpe = self.mpe.lock();
        let member = &mut mpe.members[message.channel() as usize - 1];
        let mut master = self.midi_channels[MPE_MASTER_CHANNEL as usize - 1].lock();

        match message.command() {
            Command::NoteOn if message.velocity() > 0 => {
                if let Some(previous) = member.voice.take() {
                    master.release_voice(previous);
                }
                let key = master.note_on(message.note(), message.velocity());
                if let Some(voice) = master.voice_mut(key) {
                    voice.set_pitch_bend(member.bend);
                    voice.set_pressure(member.pressure);
                    voice.set_timbre(member.timbre);
                }
                member.note = Some(message.note());
                member.voice = Some(key);
            }
            Command::NoteOn | Command::NoteOff => {
                if member.note == Some(message.note()) {
                    if let Some(key) = member.voice.take() {
                        master.release_voice(key);
                    }
                    member.note = None;
                }
            }
            Command::PitchBend => {
                let normalized = (message.pitch_bend_value() as f32 - PITCH_BEND_CENTER as f32)
                    / PITCH_BEND_CENTER as f32;
                member.bend = normalized * MPE_MEMBER_BEND_RANGE;
                if let Some(voice) = member.voice.and_then(|key| master.voice_mut(key)) {
                    voice.set_pitch_bend(member.bend);
                }
            }
            Command::ChannelPressure | Command::PolyPressure => {
                member.pressure = message.pressure() as f32 / 127.0;
                if let Some(voice) = member.voice.and_then(|key| master.voice_mut(key)) {
                    voice.set_pressure(member.pressure);
                }
            }
            Command::ControlChange if message.controller() == CC_TIMBRE => {
                member.timbre = message.value() as f32 / 127.0;
                if let Some(voice) = member.voice.and_then(|key| master.voice_mut(key)) {
                    voice.set_timbre(member.timbre);
                }
            }
            _ => return false,
        }
        true
    }

    pub fn add_midi_modifier(&self, modifier: Box<dyn MidiModifier>) -> ModifierId {
        self.modifiers.lock().add(modifier)
    }

    /// Removes a modifier. Notes it was still sounding are released.
    pub fn remove_midi_modifier(&self, id: ModifierId) -> Result<Box<dyn MidiModifier>> {
        let mut flushed = Vec::new();
        let modifier = self.modifiers.lock().remove(id, &mut flushed)?;
        for m in flushed {
            self.dispatch(m);
        }
        Ok(modifier)
    }

    /// Disabling a modifier releases the notes it was sounding.
    pub fn set_modifier_enabled(&self, id: ModifierId, enabled: bool) -> Result<()> {
        let mut flushed = Vec::new();
        self.modifiers.lock().set_enabled(id, enabled, &mut flushed)?;
        for m in flushed {
            self.dispatch(m);
        }
        Ok(())
    }

    pub fn modifier_count(&self) -> usize {
        self.modifiers.lock().len()
    }

    pub fn mpe_enabled(&self) -> bool {
        self.mpe_enabled.load(Ordering::Acquire)
    }

    /// Switches MPE routing. Every channel gets an all-notes-off first so no
    /// note survives the change of dispatch rules.
    pub fn set_mpe_enabled(&self, enabled: bool) {
        let mut mpe = self.mpe.lock();
        for (channel, message) in self
            .midi_channels
            .iter()
            .zip(MidiMessage::all_notes_off_everywhere())
        {
            channel.lock().process_midi_message(message);
        }
        *mpe = MpeRouting::default();
        self.mpe_enabled.store(enabled, Ordering::Release);
        tracing::debug!("MPE {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Kills all voices, resets every channel and every modifier.
    pub fn reset(&self) {
        self.modifiers.lock().reset();
        let mut mpe = self.mpe.lock();
        *mpe = MpeRouting::default();
        for channel in &self.midi_channels {
            channel.lock().reset();
        }
    }

    pub fn set_instrument_bank(&self, bank: Arc<dyn InstrumentBank>) {
        for channel in &self.midi_channels {
            channel.lock().set_bank(bank.clone());
        }
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm.load(Ordering::Relaxed))
    }

    pub fn set_bpm(&self, bpm: f64) {
        if bpm.is_finite() && bpm > 0.0 {
            self.bpm.store(bpm.to_bits(), Ordering::Relaxed);
        }
    }

    /// Registers a callback that sees every incoming message before the
    /// modifier chain. Callbacks run without any synthesizer lock held and
    /// may feed MIDI back into the synthesizer.
    pub fn on_message<F>(&self, listener: F)
    where
        F: Fn(&MidiMessage) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Locks MIDI channel `number` (1-16).
    pub fn channel(&self, number: u8) -> Result<MutexGuard<'_, MidiChannel>> {
        if !(1..=NUM_CHANNELS as u8).contains(&number) {
            return Err(Error::InvalidChannel(number));
        }
        Ok(self.midi_channels[number as usize - 1].lock())
    }

    pub fn active_voice_count(&self) -> usize {
        self.midi_channels
            .iter()
            .map(|c| c.lock().active_voice_count())
            .sum()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl MidiControllable for Synthesizer {
    fn process_midi_message(&self, message: MidiMessage) {
        Synthesizer::process_midi_message(self, message)
    }
}
