use serde::{Deserialize, Serialize};
use std::fmt;

/// MIDI channel reserved for percussion in General MIDI (0-based).
pub const PERCUSSION_CHANNEL: u8 = 9;

/// A single timed musical event. Times are absolute milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    NoteOn {
        time: u64,
        channel: u8,
        pitch: u8,
        velocity: u8,
    },
    NoteOff {
        time: u64,
        channel: u8,
        pitch: u8,
    },
    PedalOn {
        time: u64,
        channel: u8,
    },
    PedalOff {
        time: u64,
        channel: u8,
    },
    InstrumentChange {
        time: u64,
        channel: u8,
        program: u8,
    },
    TempoChange {
        time: u64,
        microseconds_per_beat: u32,
    },
    EndOfTrack {
        time: u64,
    },
}

impl Event {
    pub fn time(&self) -> u64 {
        match *self {
            Event::NoteOn { time, .. }
            | Event::NoteOff { time, .. }
            | Event::PedalOn { time, .. }
            | Event::PedalOff { time, .. }
            | Event::InstrumentChange { time, .. }
            | Event::TempoChange { time, .. }
            | Event::EndOfTrack { time } => time,
        }
    }

    /// Copy of this event moved to `time`.
    pub fn at(mut self, new_time: u64) -> Self {
        match &mut self {
            Event::NoteOn { time, .. }
            | Event::NoteOff { time, .. }
            | Event::PedalOn { time, .. }
            | Event::PedalOff { time, .. }
            | Event::InstrumentChange { time, .. }
            | Event::TempoChange { time, .. }
            | Event::EndOfTrack { time } => *time = new_time,
        }
        self
    }

    /// Channel for channel-scoped events; tempo and end-of-track are global.
    pub fn channel(&self) -> Option<u8> {
        match *self {
            Event::NoteOn { channel, .. }
            | Event::NoteOff { channel, .. }
            | Event::PedalOn { channel, .. }
            | Event::PedalOff { channel, .. }
            | Event::InstrumentChange { channel, .. } => Some(channel),
            Event::TempoChange { .. } | Event::EndOfTrack { .. } => None,
        }
    }

    /// Tie-break rank among events sharing a timestamp.
    ///
    /// Control and meta events sort before notes. Note-ons sort before
    /// note-offs so a note whose on and off land on the same instant still
    /// opens before it closes.
    pub fn precedence(&self) -> u8 {
        match self {
            Event::TempoChange { .. } => 0,
            Event::InstrumentChange { .. } => 1,
            Event::PedalOn { .. } | Event::PedalOff { .. } => 2,
            Event::NoteOn { .. } => 3,
            Event::NoteOff { .. } => 4,
            Event::EndOfTrack { .. } => 5,
        }
    }

    /// Timeline ordering key.
    pub fn sort_key(&self) -> (u64, u8) {
        (self.time(), self.precedence())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::NoteOn { .. } => "note-on",
            Event::NoteOff { .. } => "note-off",
            Event::PedalOn { .. } => "pedal-on",
            Event::PedalOff { .. } => "pedal-off",
            Event::InstrumentChange { .. } => "instrument-change",
            Event::TempoChange { .. } => "tempo-change",
            Event::EndOfTrack { .. } => "end-of-track",
        }
    }

    pub fn is_note(&self) -> bool {
        matches!(self, Event::NoteOn { .. } | Event::NoteOff { .. })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}ms", self.kind_name(), self.time())?;
        match *self {
            Event::NoteOn {
                channel,
                pitch,
                velocity,
                ..
            } => write!(f, " ch{channel} pitch={pitch} vel={velocity}"),
            Event::NoteOff { channel, pitch, .. } => write!(f, " ch{channel} pitch={pitch}"),
            Event::PedalOn { channel, .. } | Event::PedalOff { channel, .. } => {
                write!(f, " ch{channel}")
            }
            Event::InstrumentChange {
                channel, program, ..
            } => write!(f, " ch{channel} program={program}"),
            Event::TempoChange {
                microseconds_per_beat,
                ..
            } => write!(f, " {microseconds_per_beat}us/beat"),
            Event::EndOfTrack { .. } => Ok(()),
        }
    }
}

/// A note-on paired with its note-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub start: u64,
    pub end: u64,
    pub channel: u8,
    pub pitch: u8,
    pub velocity: u8,
}

impl Note {
    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// The note-on/note-off events this note expands to.
    pub fn to_events(&self) -> [Event; 2] {
        [
            Event::NoteOn {
                time: self.start,
                channel: self.channel,
                pitch: self.pitch,
                velocity: self.velocity,
            },
            Event::NoteOff {
                time: self.end,
                channel: self.channel,
                pitch: self.pitch,
            },
        ]
    }
}
