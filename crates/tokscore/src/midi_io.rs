//! Standard MIDI File adapter.
//!
//! Reading goes through `midly`; every track is merged onto one
//! millisecond timeline through the file's tempo map. Writing emits a
//! format-0 file carrying the timeline's own tempo changes, with tick
//! positions chosen so that reading the file back gives the same
//! millisecond times.

use crate::event::Event;
use crate::metadata::{
    extract_metadata, MetaText, MetaTextKind, Metadata, MetadataExtractor, PieceSource,
};
use crate::pending::OpenNotes;
use crate::timeline::Timeline;
use crate::{Error, Result};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokconf::OverlapPolicy;
use tracing::debug;

/// Tempo assumed before the first set-tempo event (120 BPM).
pub const DEFAULT_TEMPO: u32 = 500_000;

/// Controller number of the sustain pedal.
const SUSTAIN_PEDAL: u8 = 64;

/// Lowest ticks per beat of written files; with [`DEFAULT_TEMPO`] one
/// tick is 1 ms.
const WRITE_TICKS_PER_BEAT: u16 = 500;

/// Largest tempo a set-tempo meta event can hold (24 bits).
const TEMPO_MAX: u32 = 0x00FF_FFFF;

/// Largest delta a variable-length quantity can hold.
const VLQ_MAX: u64 = 0x0FFF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    tick: u64,
    microseconds_per_beat: u32,
    /// Sum of `ticks * microseconds_per_beat` before this segment.
    offset: u128,
}

/// Piecewise-constant tempo map converting ticks to milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempoMap {
    ticks_per_beat: u32,
    segments: Vec<Segment>,
}

impl TempoMap {
    /// Build from `(tick, microseconds_per_beat)` changes in any order.
    /// A later change at the same tick replaces an earlier one; the span
    /// before the first change plays at [`DEFAULT_TEMPO`].
    pub fn new(ticks_per_beat: u16, changes: impl IntoIterator<Item = (u64, u32)>) -> Result<Self> {
        if ticks_per_beat == 0 {
            return Err(Error::MidiParse("ticks per beat is zero".to_string()));
        }

        let mut changes: Vec<(u64, u32)> = changes.into_iter().collect();
        changes.sort_by_key(|&(tick, _)| tick);

        let mut segments = vec![Segment {
            tick: 0,
            microseconds_per_beat: DEFAULT_TEMPO,
            offset: 0,
        }];
        for (tick, usec) in changes {
            if usec == 0 {
                return Err(Error::MidiParse(format!("zero tempo at tick {tick}")));
            }
            let Some(last) = segments.last_mut() else {
                continue;
            };
            if last.tick == tick {
                last.microseconds_per_beat = usec;
                continue;
            }
            let offset = last.offset
                + u128::from(tick - last.tick) * u128::from(last.microseconds_per_beat);
            segments.push(Segment {
                tick,
                microseconds_per_beat: usec,
                offset,
            });
        }

        Ok(Self {
            ticks_per_beat: ticks_per_beat.into(),
            segments,
        })
    }

    /// SMPTE timing: a fixed number of ticks per second, tempo ignored.
    pub fn timecode(ticks_per_second: u32) -> Result<Self> {
        if ticks_per_second == 0 {
            return Err(Error::MidiParse("ticks per second is zero".to_string()));
        }
        Ok(Self {
            ticks_per_beat: ticks_per_second,
            segments: vec![Segment {
                tick: 0,
                microseconds_per_beat: 1_000_000,
                offset: 0,
            }],
        })
    }

    /// Tempo map of a parsed file.
    pub fn from_smf(smf: &Smf) -> Result<Self> {
        match smf.header.timing {
            Timing::Metrical(ticks) => {
                let mut changes = Vec::new();
                for track in &smf.tracks {
                    let mut tick = 0u64;
                    for event in track {
                        tick += u64::from(event.delta.as_int());
                        if let TrackEventKind::Meta(MetaMessage::Tempo(usec)) = event.kind {
                            changes.push((tick, usec.as_int()));
                        }
                    }
                }
                Self::new(ticks.as_int(), changes)
            }
            Timing::Timecode(fps, subframes) => {
                Self::timecode(u32::from(fps.as_int()) * u32::from(subframes))
            }
        }
    }

    pub fn ticks_per_beat(&self) -> u32 {
        self.ticks_per_beat
    }

    /// Absolute milliseconds at `tick`, rounded to nearest.
    pub fn tick_to_ms(&self, tick: u64) -> u64 {
        let index = self
            .segments
            .partition_point(|s| s.tick <= tick)
            .saturating_sub(1);
        let segment = &self.segments[index];
        let micro_ticks = segment.offset
            + u128::from(tick - segment.tick) * u128::from(segment.microseconds_per_beat);
        let per_ms = u128::from(self.ticks_per_beat) * 1_000;
        u64::try_from((micro_ticks + per_ms / 2) / per_ms).unwrap_or(u64::MAX)
    }
}

/// Parse SMF bytes into a timeline.
pub fn timeline_from_bytes(bytes: &[u8]) -> Result<Timeline> {
    let smf = Smf::parse(bytes).map_err(|e| Error::MidiParse(e.to_string()))?;
    timeline_from_smf(&smf)
}

/// Merge every track of a parsed file into one millisecond timeline.
///
/// Note-on with velocity 0 counts as note-off. Controller 64 becomes a
/// pedal event (on at 64 and above). Note-offs with nothing open are
/// dropped; notes still sounding at the end are closed there, and an
/// end-of-track is placed at the latest event time.
pub fn timeline_from_smf(smf: &Smf) -> Result<Timeline> {
    let tempo = TempoMap::from_smf(smf)?;

    let mut raw: Vec<(u64, Event)> = Vec::new();
    let mut last_tick = 0u64;
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += u64::from(event.delta.as_int());
            let time = tempo.tick_to_ms(tick);
            let converted = match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => Some(Event::NoteOn {
                            time,
                            channel,
                            pitch: key.as_int(),
                            velocity: vel.as_int(),
                        }),
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            Some(Event::NoteOff {
                                time,
                                channel,
                                pitch: key.as_int(),
                            })
                        }
                        MidiMessage::Controller { controller, value }
                            if controller.as_int() == SUSTAIN_PEDAL =>
                        {
                            Some(if value.as_int() >= 64 {
                                Event::PedalOn { time, channel }
                            } else {
                                Event::PedalOff { time, channel }
                            })
                        }
                        MidiMessage::ProgramChange { program } => Some(Event::InstrumentChange {
                            time,
                            channel,
                            program: program.as_int(),
                        }),
                        _ => None,
                    }
                }
                TrackEventKind::Meta(MetaMessage::Tempo(usec)) => Some(Event::TempoChange {
                    time,
                    microseconds_per_beat: usec.as_int(),
                }),
                _ => None,
            };
            if let Some(converted) = converted {
                raw.push((tick, converted));
            }
        }
        last_tick = last_tick.max(tick);
    }

    // Pair notes in file order; precedence ordering happens in Timeline::new.
    raw.sort_by_key(|(tick, event)| (event.time(), *tick));

    let mut events = Vec::with_capacity(raw.len() + 1);
    let mut open: OpenNotes<()> = OpenNotes::new(OverlapPolicy::EarliestFirst);
    let mut dropped = 0usize;
    for (_, event) in raw {
        match event {
            Event::NoteOn { channel, pitch, .. } => open.open(channel, pitch, ()),
            Event::NoteOff { channel, pitch, .. } => {
                if open.close(channel, pitch).is_none() {
                    dropped += 1;
                    continue;
                }
            }
            _ => {}
        }
        events.push(event);
    }

    let end = tempo.tick_to_ms(last_tick);
    for ((channel, pitch), ()) in open.drain() {
        events.push(Event::NoteOff {
            time: end,
            channel,
            pitch,
        });
    }
    events.push(Event::EndOfTrack { time: end });

    debug!(
        tracks = smf.tracks.len(),
        events = events.len(),
        dropped_note_offs = dropped,
        end_ms = end,
        "read MIDI file"
    );
    Ok(Timeline::new(events))
}

/// Text and copyright meta events of every track, in track order.
pub fn meta_texts(smf: &Smf) -> Vec<MetaText> {
    smf.tracks
        .iter()
        .flatten()
        .filter_map(|event| {
            let (kind, bytes) = match event.kind {
                TrackEventKind::Meta(MetaMessage::Text(bytes)) => (MetaTextKind::Text, bytes),
                TrackEventKind::Meta(MetaMessage::Copyright(bytes)) => {
                    (MetaTextKind::Copyright, bytes)
                }
                _ => return None,
            };
            Some(MetaText {
                kind,
                text: String::from_utf8_lossy(bytes).into_owned(),
            })
        })
        .collect()
}

/// A MIDI file's timeline together with its text events and the metadata
/// derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub timeline: Timeline,
    pub meta: Vec<MetaText>,
    pub metadata: Metadata,
}

impl Piece {
    /// Parse SMF bytes and run `extractors`. `path` is what file-name
    /// extractors see.
    pub fn from_bytes(
        bytes: &[u8],
        path: Option<&Path>,
        extractors: &[MetadataExtractor],
    ) -> Result<Self> {
        let smf = Smf::parse(bytes).map_err(|e| Error::MidiParse(e.to_string()))?;
        let timeline = timeline_from_smf(&smf)?;
        let meta = meta_texts(&smf);
        let metadata = extract_metadata(extractors, &PieceSource { path, meta: &meta });
        Ok(Self {
            timeline,
            meta,
            metadata,
        })
    }

    /// Read a MIDI file from disk and run `extractors` on it.
    pub fn read(path: &Path, extractors: &[MetadataExtractor]) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let piece = Self::from_bytes(&bytes, Some(path), extractors)?;
        debug!(
            path = %path.display(),
            meta = piece.meta.len(),
            tags = piece.metadata.len(),
            "read piece"
        );
        Ok(piece)
    }
}

/// Write a timeline as a single-track format-0 SMF.
///
/// Tempo changes are written as set-tempo events. Ticks per beat is the
/// smallest value of at least 500 at which every tick lasts no more than
/// a millisecond under every tempo used, so each millisecond time maps to
/// a tick that [`TempoMap::tick_to_ms`] rounds back to it. Note-ons need a
/// velocity of at least 1 since velocity 0 means note-off.
pub fn timeline_to_smf_bytes(timeline: &Timeline) -> Result<Vec<u8>> {
    let mut slowest = DEFAULT_TEMPO;
    for event in timeline {
        if let Event::TempoChange {
            microseconds_per_beat,
            ..
        } = *event
        {
            if microseconds_per_beat == 0 || microseconds_per_beat > TEMPO_MAX {
                return Err(Error::MidiWrite(format!(
                    "{event} does not fit a set-tempo event"
                )));
            }
            slowest = slowest.max(microseconds_per_beat);
        }
    }
    let ticks_per_beat = WRITE_TICKS_PER_BEAT.max(slowest.div_ceil(1_000) as u16);
    let mut clock = TickClock::new(ticks_per_beat);

    let mut track = Vec::new();
    let mut last_time = 0u64;
    let mut last_tick = 0u64;
    let mut ended = false;
    for event in timeline {
        let data: Vec<u8> = match *event {
            Event::NoteOn {
                channel,
                pitch,
                velocity,
                ..
            } => {
                if velocity == 0 {
                    return Err(Error::MidiWrite(format!(
                        "{event} has velocity 0, which reads back as a note-off"
                    )));
                }
                vec![status(0x90, channel)?, data_byte(pitch)?, data_byte(velocity)?]
            }
            Event::NoteOff { channel, pitch, .. } => {
                vec![status(0x80, channel)?, data_byte(pitch)?, 0]
            }
            Event::PedalOn { channel, .. } => vec![status(0xB0, channel)?, SUSTAIN_PEDAL, 127],
            Event::PedalOff { channel, .. } => vec![status(0xB0, channel)?, SUSTAIN_PEDAL, 0],
            Event::InstrumentChange {
                channel, program, ..
            } => vec![status(0xC0, channel)?, data_byte(program)?],
            Event::TempoChange {
                microseconds_per_beat,
                ..
            } => {
                let [_, hi, mid, lo] = microseconds_per_beat.to_be_bytes();
                vec![0xFF, 0x51, 0x03, hi, mid, lo]
            }
            Event::EndOfTrack { .. } => {
                ended = true;
                vec![0xFF, 0x2F, 0x00]
            }
        };

        let time = event.time();
        if time < last_time {
            return Err(Error::MidiWrite(format!("{event} is out of time order")));
        }
        let tick = clock.tick_at(time);
        write_vlq(&mut track, tick - last_tick)?;
        track.extend_from_slice(&data);
        last_time = time;
        last_tick = tick;

        if let Event::TempoChange {
            microseconds_per_beat,
            ..
        } = *event
        {
            clock.set_tempo(tick, microseconds_per_beat);
        }
        if ended {
            break;
        }
    }
    if !ended {
        write_vlq(&mut track, 0)?;
        track.extend_from_slice(&[0xFF, 0x2F, 0x00]);
    }

    let mut buf = Vec::with_capacity(track.len() + 22);
    buf.extend_from_slice(b"MThd");
    buf.extend_from_slice(&6u32.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // format 0
    buf.extend_from_slice(&1u16.to_be_bytes()); // one track
    buf.extend_from_slice(&ticks_per_beat.to_be_bytes());

    let track_len = u32::try_from(track.len())
        .map_err(|_| Error::MidiWrite("track exceeds 4 GiB".to_string()))?;
    buf.extend_from_slice(b"MTrk");
    buf.extend_from_slice(&track_len.to_be_bytes());
    buf.extend_from_slice(&track);

    debug!(
        events = timeline.len(),
        ticks_per_beat,
        bytes = buf.len(),
        "wrote MIDI file"
    );
    Ok(buf)
}

/// Millisecond to tick conversion for writing; the inverse of
/// [`TempoMap::tick_to_ms`] under the tempos written so far.
///
/// Positions are tracked in the same `tick * microseconds_per_beat` units
/// as the reader, so rounding never accumulates across tempo segments.
struct TickClock {
    /// `ticks_per_beat * 1000`: micro-ticks in one millisecond.
    per_ms: u128,
    tick: u64,
    offset: u128,
    microseconds_per_beat: u32,
}

impl TickClock {
    fn new(ticks_per_beat: u16) -> Self {
        Self {
            per_ms: u128::from(ticks_per_beat) * 1_000,
            tick: 0,
            offset: 0,
            microseconds_per_beat: DEFAULT_TEMPO,
        }
    }

    /// The first tick at or after the segment start that reads back as
    /// `ms`, i.e. whose position lies in `[ms - 0.5, ms + 0.5)`.
    ///
    /// Needs `microseconds_per_beat <= per_ms`, so that window always
    /// holds a tick, and `ms` no earlier than the segment start.
    fn tick_at(&self, ms: u64) -> u64 {
        let low = (u128::from(ms) * self.per_ms).checked_sub(self.offset + self.per_ms / 2);
        let steps = match low {
            Some(low) if low > 0 => low.div_ceil(u128::from(self.microseconds_per_beat)),
            _ => 0,
        };
        self.tick + u64::try_from(steps).unwrap_or(u64::MAX)
    }

    fn set_tempo(&mut self, tick: u64, microseconds_per_beat: u32) {
        self.offset +=
            u128::from(tick - self.tick) * u128::from(self.microseconds_per_beat);
        self.tick = tick;
        self.microseconds_per_beat = microseconds_per_beat;
    }
}

fn status(kind: u8, channel: u8) -> Result<u8> {
    if channel > 15 {
        return Err(Error::MidiWrite(format!("channel {channel} is above 15")));
    }
    Ok(kind | channel)
}

fn data_byte(value: u8) -> Result<u8> {
    if value > 127 {
        return Err(Error::MidiWrite(format!("data byte {value} is above 127")));
    }
    Ok(value)
}

fn write_vlq(buf: &mut Vec<u8>, value: u64) -> Result<()> {
    if value > VLQ_MAX {
        return Err(Error::MidiWrite(format!(
            "gap of {value} ticks does not fit a MIDI delta"
        )));
    }

    let mut bytes = vec![(value & 0x7F) as u8];
    let mut rest = value >> 7;
    while rest > 0 {
        bytes.push((rest & 0x7F) as u8 | 0x80);
        rest >>= 7;
    }
    bytes.reverse();
    buf.extend_from_slice(&bytes);
    Ok(())
}
