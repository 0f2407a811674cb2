//! Dataset preprocessing: clean-up passes applied to a timeline before it
//! is tokenized, and quality checks used to filter a corpus.
//!
//! Note pairing here always uses [`OverlapPolicy::EarliestFirst`], the
//! pairing that re-struck notes read from MIDI files follow.

use crate::event::{Event, Note, PERCUSSION_CHANNEL};
use crate::gm::InstrumentFamily;
use crate::timeline::Timeline;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokconf::OverlapPolicy;
use tracing::debug;

const PAIRING: OverlapPolicy = OverlapPolicy::EarliestFirst;

/// Where notes on the same channel and pitch overlap, cut the earlier
/// note short so it ends where the later one starts.
pub fn resolve_overlaps(timeline: &Timeline) -> Timeline {
    let mut notes = timeline.notes(PAIRING);
    truncate_overlaps(&mut notes);
    Timeline::from_notes(&notes, timeline.controls().copied())
}

fn truncate_overlaps(notes: &mut [Note]) {
    let mut by_key: HashMap<(u8, u8), Vec<usize>> = HashMap::new();
    for (i, note) in notes.iter().enumerate() {
        by_key.entry((note.channel, note.pitch)).or_default().push(i);
    }

    let mut truncated = 0usize;
    for mut indices in by_key.into_values() {
        indices.sort_by_key(|&i| (notes[i].start, notes[i].end));
        let mut previous: Option<(usize, u64)> = None;
        for i in indices {
            let (start, end) = (notes[i].start, notes[i].end);
            if let Some((prev, prev_end)) = previous {
                if prev_end > start {
                    notes[prev].end = start;
                    truncated += 1;
                }
            }
            previous = Some((i, end));
        }
    }
    debug!(truncated, "resolved note overlaps");
}

/// Sustain intervals per channel. A pedal left down runs to `end`.
fn pedal_intervals(timeline: &Timeline, end: u64) -> BTreeMap<u8, Vec<(u64, u64)>> {
    let mut intervals: BTreeMap<u8, Vec<(u64, u64)>> = BTreeMap::new();
    let mut down: BTreeMap<u8, u64> = BTreeMap::new();

    for event in timeline {
        match *event {
            Event::PedalOn { time, channel } => {
                down.entry(channel).or_insert(time);
            }
            Event::PedalOff { time, channel } => {
                if let Some(start) = down.remove(&channel) {
                    intervals.entry(channel).or_default().push((start, time));
                }
            }
            _ => {}
        }
    }
    for (channel, start) in down {
        intervals.entry(channel).or_default().push((start, end));
    }
    intervals
}

/// Apply the sustain pedal to note lengths.
///
/// A note released strictly inside a sustain interval on its channel is
/// extended to the end of that interval. Overlaps this creates are then
/// resolved. Pedal events are kept.
pub fn resolve_pedal(timeline: &Timeline) -> Timeline {
    let mut notes = timeline.notes(PAIRING);
    let end = notes.iter().map(|n| n.end).max().unwrap_or(0);
    let intervals = pedal_intervals(timeline, end);

    let mut extended = 0usize;
    for note in &mut notes {
        let Some(channel_intervals) = intervals.get(&note.channel) else {
            continue;
        };
        if let Some(&(_, pedal_end)) = channel_intervals
            .iter()
            .find(|&&(start, stop)| start < note.end && note.end < stop)
        {
            note.end = pedal_end;
            extended += 1;
        }
    }
    debug!(extended, "resolved sustain pedal");

    truncate_overlaps(&mut notes);
    Timeline::from_notes(&notes, timeline.controls().copied())
}

/// Drop pedal events that change nothing:
///
/// - repeated presses or releases
/// - press/release pairs with no note on the channel released in between
/// - presses that are never released
/// - every pedal event on a channel with no notes
pub fn remove_redundant_pedals(timeline: &Timeline) -> Timeline {
    let notes = timeline.notes(PAIRING);
    let mut note_ends: BTreeMap<u8, Vec<u64>> = BTreeMap::new();
    for note in &notes {
        note_ends.entry(note.channel).or_default().push(note.end);
    }

    let mut remove: BTreeSet<usize> = BTreeSet::new();
    let mut down: BTreeMap<u8, (usize, u64)> = BTreeMap::new();

    for (index, event) in timeline.iter().enumerate() {
        let (time, channel, pressed) = match *event {
            Event::PedalOn { time, channel } => (time, channel, true),
            Event::PedalOff { time, channel } => (time, channel, false),
            _ => continue,
        };
        let Some(ends) = note_ends.get(&channel) else {
            remove.insert(index);
            continue;
        };

        match (down.get(&channel).copied(), pressed) {
            (None, true) => {
                down.insert(channel, (index, time));
            }
            (None, false) | (Some(_), true) => {
                remove.insert(index);
            }
            (Some((press, start)), false) => {
                let useful = ends.iter().any(|&end| start <= end && end <= time);
                if !useful {
                    remove.insert(press);
                    remove.insert(index);
                }
                down.remove(&channel);
            }
        }
    }
    remove.extend(down.into_values().map(|(press, _)| press));

    debug!(removed = remove.len(), "removed redundant pedal events");
    let events = timeline
        .iter()
        .enumerate()
        .filter(|(index, _)| !remove.contains(index))
        .map(|(_, event)| *event)
        .collect();
    Timeline::from_sorted(events)
}

/// Drop every event on channels that select a program from one of
/// `families`. The percussion channel is never removed.
pub fn remove_instruments(timeline: &Timeline, families: &[InstrumentFamily]) -> Timeline {
    let channels: BTreeSet<u8> = timeline
        .iter()
        .filter_map(|event| match *event {
            Event::InstrumentChange {
                channel, program, ..
            } if channel != PERCUSSION_CHANNEL
                && families.contains(&InstrumentFamily::of_program(program)) =>
            {
                Some(channel)
            }
            _ => None,
        })
        .collect();

    debug!(?channels, "removing instrument channels");
    let events = timeline
        .iter()
        .filter(|event| event.channel().map_or(true, |ch| !channels.contains(&ch)))
        .copied()
        .collect();
    Timeline::from_sorted(events)
}

/// Outcome of a quality check: whether it passed, and the measured value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub passed: bool,
    pub value: f64,
}

impl CheckOutcome {
    fn new(passed: bool, value: f64) -> Self {
        Self { passed, value }
    }

    fn fail(value: f64) -> Self {
        Self::new(false, value)
    }
}

/// A corpus filter, deserializable from pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum QualityCheck {
    MaxPrograms { max: usize },
    MaxInstruments { max: usize },
    NoteFrequency { min: f64, max: f64 },
    NoteFrequencyPerInstrument { min: f64, max: f64 },
    MinLength { seconds: f64 },
}

impl QualityCheck {
    pub fn run(&self, timeline: &Timeline) -> CheckOutcome {
        match *self {
            QualityCheck::MaxPrograms { max } => max_programs(timeline, max),
            QualityCheck::MaxInstruments { max } => max_instruments(timeline, max),
            QualityCheck::NoteFrequency { min, max } => note_frequency(timeline, min, max),
            QualityCheck::NoteFrequencyPerInstrument { min, max } => {
                note_frequency_per_instrument(timeline, min, max)
            }
            QualityCheck::MinLength { seconds } => min_length(timeline, seconds),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QualityCheck::MaxPrograms { .. } => "max_programs",
            QualityCheck::MaxInstruments { .. } => "max_instruments",
            QualityCheck::NoteFrequency { .. } => "note_frequency",
            QualityCheck::NoteFrequencyPerInstrument { .. } => "note_frequency_per_instrument",
            QualityCheck::MinLength { .. } => "min_length",
        }
    }
}

fn programs(timeline: &Timeline) -> BTreeSet<u8> {
    timeline
        .iter()
        .filter_map(|event| match *event {
            Event::InstrumentChange { program, .. } => Some(program),
            _ => None,
        })
        .collect()
}

fn families(timeline: &Timeline) -> BTreeSet<InstrumentFamily> {
    programs(timeline)
        .into_iter()
        .map(InstrumentFamily::of_program)
        .collect()
}

/// Milliseconds from the first note-on to the last note release.
fn note_span_ms(notes: &[Note]) -> u64 {
    let start = notes.iter().map(|n| n.start).min().unwrap_or(0);
    let end = notes.iter().map(|n| n.end).max().unwrap_or(0);
    end.saturating_sub(start)
}

/// Passes when at most `max` distinct programs are selected.
pub fn max_programs(timeline: &Timeline, max: usize) -> CheckOutcome {
    let count = programs(timeline).len();
    CheckOutcome::new(count <= max, count as f64)
}

/// Passes when the selected programs span at most `max` instrument families.
pub fn max_instruments(timeline: &Timeline, max: usize) -> CheckOutcome {
    let count = families(timeline).len();
    CheckOutcome::new(count <= max, count as f64)
}

fn notes_per_second(timeline: &Timeline) -> Option<f64> {
    let notes = timeline.notes(PAIRING);
    let span = note_span_ms(&notes);
    if notes.is_empty() || span == 0 {
        return None;
    }
    Some(notes.len() as f64 * 1_000.0 / span as f64)
}

/// Passes when notes per second lies in `[min, max]`. Fails on a piece
/// with no notes or zero duration.
pub fn note_frequency(timeline: &Timeline, min: f64, max: f64) -> CheckOutcome {
    match notes_per_second(timeline) {
        Some(rate) => CheckOutcome::new((min..=max).contains(&rate), rate),
        None => CheckOutcome::fail(0.0),
    }
}

/// Like [`note_frequency`], divided by the number of instrument families.
/// A piece with no program changes counts as one instrument.
pub fn note_frequency_per_instrument(timeline: &Timeline, min: f64, max: f64) -> CheckOutcome {
    let instruments = families(timeline).len().max(1);
    match notes_per_second(timeline) {
        Some(rate) => {
            let per_instrument = rate / instruments as f64;
            CheckOutcome::new((min..=max).contains(&per_instrument), per_instrument)
        }
        None => CheckOutcome::fail(0.0),
    }
}

/// Passes when the notes span at least `seconds`.
pub fn min_length(timeline: &Timeline, seconds: f64) -> CheckOutcome {
    let notes = timeline.notes(PAIRING);
    if notes.is_empty() {
        return CheckOutcome::fail(0.0);
    }
    let length = note_span_ms(&notes) as f64 / 1_000.0;
    CheckOutcome::new(length >= seconds, length)
}
