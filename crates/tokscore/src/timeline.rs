use crate::event::{Event, Note};
use crate::pending::OpenNotes;
use serde::{Deserialize, Serialize};
use tokconf::OverlapPolicy;

/// An ordered sequence of events for one piece.
///
/// Ordered by `(time, precedence)`; events with equal keys keep their
/// insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeline {
    events: Vec<Event>,
}

impl Timeline {
    /// Build a timeline, sorting events into canonical order.
    pub fn new(mut events: Vec<Event>) -> Self {
        events.sort_by_key(Event::sort_key);
        Self { events }
    }

    /// Wrap events without reordering them. Use `validate_timeline` to
    /// check the order before relying on it.
    pub fn from_sorted(events: Vec<Event>) -> Self {
        Self { events }
    }

    /// Expand notes into note-on/note-off pairs and merge with `others`.
    pub fn from_notes(notes: &[Note], others: impl IntoIterator<Item = Event>) -> Self {
        let mut events: Vec<Event> = notes.iter().flat_map(Note::to_events).collect();
        events.extend(others);
        Self::new(events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time of the last event, or zero for an empty timeline.
    pub fn end_time(&self) -> u64 {
        self.events.iter().map(Event::time).max().unwrap_or(0)
    }

    /// Pair note-ons with note-offs.
    ///
    /// Notes come back in note-on order. Note-offs with nothing open are
    /// ignored; notes never closed run to `end_time()`.
    pub fn notes(&self, policy: OverlapPolicy) -> Vec<Note> {
        let mut open: OpenNotes<usize> = OpenNotes::new(policy);
        let mut slots: Vec<Option<Note>> = Vec::new();

        for event in &self.events {
            match *event {
                Event::NoteOn {
                    time,
                    channel,
                    pitch,
                    velocity,
                } => {
                    open.open(channel, pitch, slots.len());
                    slots.push(Some(Note {
                        start: time,
                        end: time,
                        channel,
                        pitch,
                        velocity,
                    }));
                }
                Event::NoteOff {
                    time,
                    channel,
                    pitch,
                } => {
                    if let Some(slot) = open.close(channel, pitch) {
                        if let Some(note) = slots[slot].as_mut() {
                            note.end = time;
                        }
                    }
                }
                _ => {}
            }
        }

        let end = self.end_time();
        for (_, slot) in open.drain() {
            if let Some(note) = slots[slot].as_mut() {
                note.end = end;
            }
        }

        slots.into_iter().flatten().collect()
    }

    /// Every event that is not a note-on or note-off.
    pub fn controls(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| !e.is_note())
    }

    /// BLAKE3 hash of the event content, truncated to 128 bits (32 hex chars).
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for event in &self.events {
            hasher.update(&canonical_bytes(event));
        }
        hex::encode(&hasher.finalize().as_bytes()[..16])
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<Vec<Event>> for Timeline {
    fn from(events: Vec<Event>) -> Self {
        Self::new(events)
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Fixed-width little-endian encoding: tag, time, then three payload words.
fn canonical_bytes(event: &Event) -> [u8; 21] {
    let (tag, a, b, c): (u8, u32, u32, u32) = match *event {
        Event::NoteOn {
            channel,
            pitch,
            velocity,
            ..
        } => (0, channel.into(), pitch.into(), velocity.into()),
        Event::NoteOff { channel, pitch, .. } => (1, channel.into(), pitch.into(), 0),
        Event::PedalOn { channel, .. } => (2, channel.into(), 0, 0),
        Event::PedalOff { channel, .. } => (3, channel.into(), 0, 0),
        Event::InstrumentChange {
            channel, program, ..
        } => (4, channel.into(), program.into(), 0),
        Event::TempoChange {
            microseconds_per_beat,
            ..
        } => (5, microseconds_per_beat, 0, 0),
        Event::EndOfTrack { .. } => (6, 0, 0, 0),
    };

    let mut buf = [0u8; 21];
    buf[0] = tag;
    buf[1..9].copy_from_slice(&event.time().to_le_bytes());
    buf[9..13].copy_from_slice(&a.to_le_bytes());
    buf[13..17].copy_from_slice(&b.to_le_bytes());
    buf[17..21].copy_from_slice(&c.to_le_bytes());
    buf
}
