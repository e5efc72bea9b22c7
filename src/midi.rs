use std::sync::mpsc;

use midir::MidiInputConnection;
use midly::live::LiveEvent;

use crate::error::{Error, Result};
use crate::util::log_if_error;

pub const CC_BANK_SELECT_MSB: u8 = 0;
pub const CC_DATA_ENTRY_MSB: u8 = 6;
pub const CC_VOLUME: u8 = 7;
pub const CC_PAN: u8 = 10;
pub const CC_BANK_SELECT_LSB: u8 = 32;
pub const CC_DATA_ENTRY_LSB: u8 = 38;
pub const CC_DAMPER_PEDAL: u8 = 64;
pub const CC_TIMBRE: u8 = 74;
pub const CC_RPN_LSB: u8 = 100;
pub const CC_RPN_MSB: u8 = 101;
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CC_RESET_ALL_CONTROLLERS: u8 = 121;
pub const CC_ALL_NOTES_OFF: u8 = 123;

pub const PITCH_BEND_CENTER: u16 = 8192;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    System,
}

/// One short MIDI message. Data bytes are always masked to 7 bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MidiMessage {
    status: u8,
    data1: u8,
    data2: u8,
    timestamp: u64,
}

impl MidiMessage {
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            status,
            data1: data1 & 0x7f,
            data2: data2 & 0x7f,
            timestamp: 0,
        }
    }

    /// Builds a channel message for `channel` (1-16). Anything else is
    /// rejected instead of being folded onto a neighbouring channel.
    fn channel_message(kind: u8, channel: u8, data1: u8, data2: u8) -> Result<Self> {
        if !(1..=16).contains(&channel) {
            return Err(Error::InvalidChannel(channel));
        }
        Ok(Self::new(kind | (channel - 1), data1, data2))
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Result<Self> {
        Self::channel_message(0x90, channel, note, velocity)
    }

    pub fn note_off(channel: u8, note: u8) -> Result<Self> {
        Self::channel_message(0x80, channel, note, 0)
    }

    pub fn poly_pressure(channel: u8, note: u8, pressure: u8) -> Result<Self> {
        Self::channel_message(0xa0, channel, note, pressure)
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Result<Self> {
        Self::channel_message(0xb0, channel, controller, value)
    }

    pub fn program_change(channel: u8, program: u8) -> Result<Self> {
        Self::channel_message(0xc0, channel, program, 0)
    }

    pub fn channel_pressure(channel: u8, pressure: u8) -> Result<Self> {
        Self::channel_message(0xd0, channel, pressure, 0)
    }

    /// `value` is the unsigned 14-bit bend, 8192 is centered.
    pub fn pitch_bend(channel: u8, value: u16) -> Result<Self> {
        let value = value.min(0x3fff);
        Self::channel_message(0xe0, channel, (value & 0x7f) as u8, (value >> 7) as u8)
    }

    pub fn all_notes_off(channel: u8) -> Result<Self> {
        Self::control_change(channel, CC_ALL_NOTES_OFF, 0)
    }

    /// CC 123 for each of the sixteen channels, in order.
    pub fn all_notes_off_everywhere() -> impl Iterator<Item = Self> {
        (0..16u8).map(|index| Self::new(0xb0 | index, CC_ALL_NOTES_OFF, 0))
    }

    /// Note-off for the note and channel of this message.
    pub fn as_note_off(&self) -> Self {
        Self::new(0x80 | (self.status & 0x0f), self.data1, 0)
    }

    /// Parses a raw 1-3 byte message. Running status is not supported.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        if status & 0x80 == 0 {
            return None;
        }
        let data1 = bytes.get(1).copied().unwrap_or(0);
        let data2 = bytes.get(2).copied().unwrap_or(0);
        Some(Self::new(status, data1, data2))
    }

    pub fn from_midly(channel: midly::num::u4, message: midly::MidiMessage) -> Self {
        let index = channel.as_int();
        let (kind, data1, data2) = match message {
            midly::MidiMessage::NoteOff { key, vel } => (0x80, key.as_int(), vel.as_int()),
            midly::MidiMessage::NoteOn { key, vel } => (0x90, key.as_int(), vel.as_int()),
            midly::MidiMessage::Aftertouch { key, vel } => (0xa0, key.as_int(), vel.as_int()),
            midly::MidiMessage::Controller { controller, value } => {
                (0xb0, controller.as_int(), value.as_int())
            }
            midly::MidiMessage::ProgramChange { program } => (0xc0, program.as_int(), 0),
            midly::MidiMessage::ChannelAftertouch { vel } => (0xd0, vel.as_int(), 0),
            midly::MidiMessage::PitchBend { bend } => {
                let value = bend.0.as_int();
                (0xe0, (value & 0x7f) as u8, (value >> 7) as u8)
            }
        };
        Self::new(kind | index, data1, data2)
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Moves a channel message to `channel` (1-16). System messages are
    /// returned unchanged.
    pub fn with_channel(mut self, channel: u8) -> Result<Self> {
        if !(1..=16).contains(&channel) {
            return Err(Error::InvalidChannel(channel));
        }
        if self.command() != Command::System {
            self.status = (self.status & 0xf0) | (channel - 1);
        }
        Ok(self)
    }

    pub fn with_note(mut self, note: u8) -> Self {
        self.data1 = note & 0x7f;
        self
    }

    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.data2 = velocity & 0x7f;
        self
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn data1(&self) -> u8 {
        self.data1
    }

    pub fn data2(&self) -> u8 {
        self.data2
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn command(&self) -> Command {
        match self.status & 0xf0 {
            0x80 => Command::NoteOff,
            0x90 => Command::NoteOn,
            0xa0 => Command::PolyPressure,
            0xb0 => Command::ControlChange,
            0xc0 => Command::ProgramChange,
            0xd0 => Command::ChannelPressure,
            0xe0 => Command::PitchBend,
            _ => Command::System,
        }
    }

    /// Channel in 1-16.
    pub fn channel(&self) -> u8 {
        (self.status & 0x0f) + 1
    }

    pub fn note(&self) -> u8 {
        self.data1
    }

    pub fn velocity(&self) -> u8 {
        self.data2
    }

    pub fn controller(&self) -> u8 {
        self.data1
    }

    pub fn value(&self) -> u8 {
        self.data2
    }

    pub fn program(&self) -> u8 {
        self.data1
    }

    /// Pressure of a channel or poly pressure message.
    pub fn pressure(&self) -> u8 {
        match self.command() {
            Command::PolyPressure => self.data2,
            _ => self.data1,
        }
    }

    pub fn pitch_bend_value(&self) -> u16 {
        (self.data1 as u16) | ((self.data2 as u16) << 7)
    }

    /// Note-On with a non-zero velocity.
    pub fn is_note_on(&self) -> bool {
        self.command() == Command::NoteOn && self.data2 > 0
    }

    /// Note-Off, or Note-On with velocity 0.
    pub fn is_note_off(&self) -> bool {
        match self.command() {
            Command::NoteOff => true,
            Command::NoteOn => self.data2 == 0,
            _ => false,
        }
    }

    pub fn is_note(&self) -> bool {
        matches!(self.command(), Command::NoteOn | Command::NoteOff)
    }
}

pub fn list_devices() -> Result<Vec<String>> {
    let midi_in = midir::MidiInput::new("synth port listing")
        .map_err(|e| Error::MidiInput(e.to_string()))?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect())
}

pub struct Connection(MidiInputConnection<mpsc::SyncSender<MidiMessage>>);

pub fn connect_to_ports(
    midi_ports: Vec<String>,
) -> Result<(mpsc::Receiver<MidiMessage>, Vec<Connection>)> {
    let (sender, receiver) = mpsc::sync_channel(1024);

    let connections: Result<Vec<Connection>> = midi_ports
        .into_iter()
        .map(|port_name| {
            let midi_in = midir::MidiInput::new(&format!("synth to {}", port_name))
                .map_err(|e| Error::MidiInput(e.to_string()))?;

            let selected_port = midi_in
                .ports()
                .into_iter()
                .find(|p| midi_in.port_name(p).ok().as_deref() == Some(port_name.as_str()))
                .ok_or_else(|| Error::MidiInput(format!("could not find MIDI port {}", port_name)))?;

            let conn = midi_in
                .connect(
                    &selected_port,
                    &format!("synth conn to {}", port_name),
                    |timestamp, bytes, sender| match LiveEvent::parse(bytes) {
                        Ok(LiveEvent::Midi { channel, message }) => {
                            let message = MidiMessage::from_midly(channel, message)
                                .with_timestamp(timestamp);
                            log_if_error("failed to queue MIDI message", sender.try_send(message));
                        }

                        Err(err) => {
                            tracing::warn!("midly failed to parse {:?}, error: {:?}", bytes, err);
                        }

                        _ => {}
                    },
                    sender.clone(),
                )
                .map_err(|e| Error::MidiInput(e.to_string()))?;

            tracing::info!("connected to MIDI port {}", port_name);
            Ok(Connection(conn))
        })
        .collect();

    connections.map(|conn| (receiver, conn))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_fields() {
        let m = MidiMessage::note_on(10, 60, 100).unwrap();
        assert_eq!(m.status(), 0x99);
        assert_eq!(m.command(), Command::NoteOn);
        assert_eq!(m.channel(), 10);
        assert_eq!(m.note(), 60);
        assert_eq!(m.velocity(), 100);
        assert!(m.is_note_on());

        let silent = MidiMessage::note_on(1, 60, 0).unwrap();
        assert!(silent.is_note_off());
        assert!(!silent.is_note_on());
    }

    #[test]
    fn pitch_bend_is_fourteen_bit() {
        let m = MidiMessage::pitch_bend(1, 0x3fff).unwrap();
        assert_eq!(m.pitch_bend_value(), 0x3fff);
        let m = MidiMessage::pitch_bend(1, PITCH_BEND_CENTER).unwrap();
        assert_eq!(m.data1(), 0);
        assert_eq!(m.data2(), 64);
        assert_eq!(m.pitch_bend_value(), 8192);
    }

    #[test]
    fn raw_bytes() {
        let m = MidiMessage::from_bytes(&[0xb3, 7, 200]).unwrap();
        assert_eq!(m.command(), Command::ControlChange);
        assert_eq!(m.channel(), 4);
        assert_eq!(m.controller(), 7);
        assert_eq!(m.value(), 200 & 0x7f);

        assert!(MidiMessage::from_bytes(&[0x40, 1]).is_none());
        assert!(MidiMessage::from_bytes(&[]).is_none());
    }

    #[test]
    fn out_of_range_channels_are_rejected() {
        assert!(matches!(
            MidiMessage::note_on(0, 1, 1),
            Err(Error::InvalidChannel(0))
        ));
        assert!(matches!(
            MidiMessage::note_on(17, 1, 1),
            Err(Error::InvalidChannel(17))
        ));
        assert!(MidiMessage::all_notes_off(40).is_err());
        assert_eq!(MidiMessage::note_on(16, 1, 1).unwrap().channel(), 16);

        let m = MidiMessage::note_off(3, 60).unwrap();
        assert_eq!(m.with_channel(5).unwrap().channel(), 5);
        assert!(MidiMessage::note_off(3, 60).unwrap().with_channel(0).is_err());
        assert_eq!(MidiMessage::channel_pressure(2, 90).unwrap().pressure(), 90);
        assert_eq!(MidiMessage::poly_pressure(2, 60, 80).unwrap().pressure(), 80);
    }

    #[test]
    fn converts_midly_messages() {
        let m = MidiMessage::from_midly(
            3.into(),
            midly::MidiMessage::NoteOn {
                key: 64.into(),
                vel: 90.into(),
            },
        );
        assert_eq!(m, MidiMessage::note_on(4, 64, 90).unwrap());
        assert_eq!(m.as_note_off(), MidiMessage::note_off(4, 64).unwrap());

        let panic: Vec<_> = MidiMessage::all_notes_off_everywhere().collect();
        assert_eq!(panic.len(), 16);
        assert_eq!(panic[15], MidiMessage::all_notes_off(16).unwrap());

        let m = MidiMessage::from_midly(
            0.into(),
            midly::MidiMessage::PitchBend {
                bend: midly::PitchBend(1000.into()),
            },
        );
        assert_eq!(m.pitch_bend_value(), 1000);
    }
}
