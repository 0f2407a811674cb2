//! Structural checks on timelines and token sequences.

use crate::detokenize::{decode, DecodeOptions};
use crate::event::Event;
use crate::pending::OpenNotes;
use crate::timeline::Timeline;
use crate::token::TokenSequence;
use crate::vocab::Vocabulary;
use crate::{Error, Result};
use tokconf::OverlapPolicy;

const MIDI_CHANNELS: u8 = 16;
const MIDI_DATA_MAX: u8 = 127;

/// Check that a timeline is well formed:
///
/// - events are ordered by `(time, precedence)`
/// - channel, pitch, velocity and program fit MIDI limits; tempos are non-zero
/// - every note-off closes an open note, and no note is left open
/// - at most one end-of-track, and it is the last event
pub fn validate_timeline(timeline: &Timeline, overlap: OverlapPolicy) -> Result<()> {
    let malformed = |index: usize, reason: String| Error::MalformedTimeline { index, reason };
    let mut open: OpenNotes<usize> = OpenNotes::new(overlap);
    let mut previous: Option<&Event> = None;
    let last = timeline.len().saturating_sub(1);

    for (index, event) in timeline.iter().enumerate() {
        if let Some(prev) = previous {
            if event.sort_key() < prev.sort_key() {
                return Err(malformed(
                    index,
                    format!("{event} is out of order after {prev}"),
                ));
            }
        }
        previous = Some(event);

        if let Some(channel) = event.channel() {
            if channel >= MIDI_CHANNELS {
                return Err(malformed(index, format!("channel {channel} is above 15")));
            }
        }

        match *event {
            Event::NoteOn {
                channel,
                pitch,
                velocity,
                ..
            } => {
                if pitch > MIDI_DATA_MAX || velocity > MIDI_DATA_MAX {
                    return Err(malformed(index, format!("{event} exceeds the MIDI data range")));
                }
                open.open(channel, pitch, index);
            }
            Event::NoteOff { channel, pitch, .. } => {
                if pitch > MIDI_DATA_MAX {
                    return Err(malformed(index, format!("{event} exceeds the MIDI data range")));
                }
                if open.close(channel, pitch).is_none() {
                    return Err(malformed(index, format!("{event} has no open note")));
                }
            }
            Event::InstrumentChange { program, .. } if program > MIDI_DATA_MAX => {
                return Err(malformed(index, format!("program {program} is above 127")));
            }
            Event::TempoChange {
                microseconds_per_beat: 0,
                ..
            } => {
                return Err(malformed(index, "tempo of zero microseconds per beat".to_string()));
            }
            Event::EndOfTrack { .. } if index != last => {
                return Err(malformed(index, "end-of-track is not the last event".to_string()));
            }
            _ => {}
        }
    }

    if let Some(((channel, pitch), opened_at)) = open.drain().into_iter().next() {
        return Err(malformed(
            opened_at,
            format!("note-on for pitch {pitch} on channel {channel} is never closed"),
        ));
    }
    Ok(())
}

/// Check the token grammar of a sequence: framing, note-on/velocity
/// pairing, note matching. Runs a strict decode and discards the events.
pub fn validate_tokens(tokens: &TokenSequence, vocab: &Vocabulary) -> Result<()> {
    let options = DecodeOptions::strict().with_overlap(vocab.overlap_policy());
    let decoded = decode(tokens, vocab, &options)?;
    if decoded.truncated {
        return Err(Error::InvalidToken {
            index: tokens.len(),
            reason: "sequence ends without END".to_string(),
        });
    }
    Ok(())
}
