//! Deterministic training-data augmentation.
//!
//! Every transform takes a timeline and returns a new one; the same inputs
//! (and seed, where there is one) always give the same output.

use crate::event::{Event, PERCUSSION_CHANNEL};
use crate::timeline::Timeline;
use crate::vocab::{Category, Vocabulary};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Shift every pitched note by `semitones`.
///
/// Percussion (channel 9) is left alone since its pitches name drums.
/// Fails with `UnknownSymbol` if any shifted pitch leaves the vocabulary's
/// pitch range.
pub fn transpose(timeline: &Timeline, vocab: &Vocabulary, semitones: i8) -> Result<Timeline> {
    let range = vocab.pitch_range();
    let shift = |index: usize, category: Category, pitch: u8| -> Result<u8> {
        let shifted = i16::from(pitch) + i16::from(semitones);
        u8::try_from(shifted)
            .ok()
            .filter(|p| range.contains(p))
            .ok_or(Error::UnknownSymbol {
                category,
                value: shifted.into(),
                index: Some(index),
            })
    };

    let mut events = Vec::with_capacity(timeline.len());
    for (index, event) in timeline.iter().enumerate() {
        let moved = match *event {
            Event::NoteOn {
                time,
                channel,
                pitch,
                velocity,
            } if channel != PERCUSSION_CHANNEL => Event::NoteOn {
                time,
                channel,
                pitch: shift(index, Category::NoteOn, pitch)?,
                velocity,
            },
            Event::NoteOff {
                time,
                channel,
                pitch,
            } if channel != PERCUSSION_CHANNEL => Event::NoteOff {
                time,
                channel,
                pitch: shift(index, Category::NoteOff, pitch)?,
            },
            other => other,
        };
        events.push(moved);
    }

    debug!(semitones, events = events.len(), "transposed timeline");
    Ok(Timeline::from_sorted(events))
}

/// Perturb each note-on velocity by a pseudo-random delta in
/// `[-max_delta, max_delta]`, clamped to the vocabulary's velocity range.
///
/// Applied to raw velocities, before bucketing.
pub fn jitter_velocity(
    timeline: &Timeline,
    vocab: &Vocabulary,
    max_delta: u8,
    seed: u64,
) -> Timeline {
    let range = vocab.velocity_range();
    let (low, high) = (i16::from(*range.start()), i16::from(*range.end()));
    let mut rng = SplitMix64::new(seed);

    let events = timeline
        .iter()
        .map(|event| match *event {
            Event::NoteOn {
                time,
                channel,
                pitch,
                velocity,
            } => {
                let delta = rng.delta(max_delta);
                let jittered = (i16::from(velocity) + delta).clamp(low, high);
                Event::NoteOn {
                    time,
                    channel,
                    pitch,
                    velocity: jittered as u8,
                }
            }
            other => other,
        })
        .collect();

    Timeline::from_sorted(events)
}

/// A positive rational scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    numerator: u32,
    denominator: u32,
}

impl Ratio {
    pub fn new(numerator: u32, denominator: u32) -> Result<Self> {
        if numerator == 0 || denominator == 0 {
            return Err(Error::Augment(format!(
                "scale ratio {numerator}/{denominator} must have a non-zero numerator and denominator"
            )));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    /// `value * numerator / denominator`, rounded half up.
    fn apply(&self, value: u64) -> u128 {
        let num = u128::from(self.numerator);
        let den = u128::from(self.denominator);
        (u128::from(value) * num + den / 2) / den
    }
}

/// Stretch (ratio > 1) or compress (ratio < 1) every event time.
///
/// Tempo changes scale by the same factor, so a stretched piece is
/// labelled with a correspondingly slower tempo. Tempos are not clamped to
/// the vocabulary here; encoding reports any that fall outside it.
pub fn scale_tempo(timeline: &Timeline, ratio: Ratio) -> Result<Timeline> {
    let events = timeline
        .iter()
        .map(|event| {
            let time = u64::try_from(ratio.apply(event.time())).map_err(|_| {
                Error::Augment(format!("scaled time of {event} overflows"))
            })?;
            let scaled = match *event {
                Event::TempoChange {
                    microseconds_per_beat,
                    ..
                } => {
                    let usec = ratio.apply(microseconds_per_beat.into()).max(1);
                    Event::TempoChange {
                        time,
                        microseconds_per_beat: u32::try_from(usec).map_err(|_| {
                            Error::Augment(format!("scaled tempo of {event} overflows"))
                        })?,
                    }
                }
                other => other.at(time),
            };
            Ok(scaled)
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        numerator = ratio.numerator,
        denominator = ratio.denominator,
        "scaled timeline"
    );
    Ok(Timeline::new(events))
}

/// SplitMix64 (Steele, Lea & Flood). Small, seedable and identical on
/// every platform.
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform integer in `[0, bound)` by rejection sampling.
    fn below(&mut self, bound: u64) -> u64 {
        let threshold = bound.wrapping_neg() % bound;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return r % bound;
            }
        }
    }

    /// Uniform integer in `[-max, max]`.
    fn delta(&mut self, max: u8) -> i16 {
        let span = 2 * u64::from(max) + 1;
        self.below(span) as i16 - i16::from(max)
    }
}
