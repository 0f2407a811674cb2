//! Token sequence back to a timeline.

use crate::event::Event;
use crate::pending::OpenNotes;
use crate::timeline::Timeline;
use crate::token::{Token, TokenSequence};
use crate::vocab::{Special, Symbol, Vocabulary};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tokconf::{DecodePolicy, OverlapPolicy};
use tracing::{debug, warn};

/// Knobs for [`decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecodeOptions {
    pub policy: DecodePolicy,
    pub overlap: OverlapPolicy,
}

impl DecodeOptions {
    /// The defaults carried by the vocabulary document.
    pub fn from_vocab(vocab: &Vocabulary) -> Self {
        Self {
            policy: vocab.decode_policy(),
            overlap: vocab.overlap_policy(),
        }
    }

    pub fn strict() -> Self {
        Self {
            policy: DecodePolicy::Strict,
            ..Self::default()
        }
    }

    pub fn lenient() -> Self {
        Self {
            policy: DecodePolicy::Lenient,
            ..Self::default()
        }
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }
}

/// A grammar violation recovered under [`DecodePolicy::Lenient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeWarning {
    /// Token index the warning refers to.
    pub index: usize,
    pub message: String,
}

/// Result of decoding one sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub timeline: Timeline,
    /// Empty under the strict policy.
    pub warnings: Vec<DecodeWarning>,
    /// The sequence ended without END. Open notes were closed at the
    /// final cursor and no end-of-track was added.
    pub truncated: bool,
}

/// Decode a token sequence into a timeline.
///
/// Under [`DecodePolicy::Strict`] the first grammar violation is returned
/// as an error. Under [`DecodePolicy::Lenient`] the offending token is
/// skipped and a [`DecodeWarning`] is recorded instead. A missing END is
/// not a violation under either policy; see [`Decoded::truncated`].
pub fn decode(
    tokens: &TokenSequence,
    vocab: &Vocabulary,
    options: &DecodeOptions,
) -> Result<Decoded> {
    let mut decoder = Decoder {
        vocab,
        policy: options.policy,
        events: Vec::with_capacity(tokens.len()),
        open: OpenNotes::new(options.overlap),
        warnings: Vec::new(),
        cursor: 0,
        channel: 0,
        ended: false,
    };
    decoder.run(tokens.tokens())?;

    let truncated = !decoder.ended;
    if truncated {
        decoder.close_open_notes();
    }

    debug!(
        tokens = tokens.len(),
        events = decoder.events.len(),
        warnings = decoder.warnings.len(),
        truncated,
        "decoded token sequence"
    );

    Ok(Decoded {
        timeline: Timeline::new(decoder.events),
        warnings: decoder.warnings,
        truncated,
    })
}

struct Decoder<'a> {
    vocab: &'a Vocabulary,
    policy: DecodePolicy,
    events: Vec<Event>,
    /// Open notes, each holding the token index of its NOTE_ON.
    open: OpenNotes<usize>,
    warnings: Vec<DecodeWarning>,
    cursor: u64,
    channel: u8,
    ended: bool,
}

impl Decoder<'_> {
    fn run(&mut self, tokens: &[Token]) -> Result<()> {
        match tokens.first() {
            Some(&first) if first == Special::Start.token() => {}
            _ => self.violation(Error::InvalidToken {
                index: 0,
                reason: "sequence does not begin with START".to_string(),
            })?,
        }

        let mut index = usize::from(tokens.first() == Some(&Special::Start.token()));
        while index < tokens.len() {
            let symbol = match self.vocab.decode_symbol(tokens[index]) {
                Ok(symbol) => symbol,
                Err(err) => {
                    self.violation(Error::InvalidToken {
                        index,
                        reason: err.to_string(),
                    })?;
                    index += 1;
                    continue;
                }
            };

            if self.ended {
                if symbol != Symbol::Special(Special::Pad) {
                    self.violation(Error::InvalidToken {
                        index,
                        reason: format!("{symbol} after END"),
                    })?;
                }
                index += 1;
                continue;
            }

            index += self.step(tokens, index, symbol)?;
        }
        Ok(())
    }

    /// Apply one symbol; returns the number of tokens consumed.
    fn step(&mut self, tokens: &[Token], index: usize, symbol: Symbol) -> Result<usize> {
        let time = self.cursor;
        let channel = self.channel;

        match symbol {
            Symbol::TimeShift(ms) => self.cursor += ms,
            Symbol::Channel(ch) => self.channel = ch,
            Symbol::NoteOn(pitch) => {
                let velocity = tokens
                    .get(index + 1)
                    .and_then(|t| self.vocab.decode_symbol(*t).ok());
                match velocity {
                    Some(Symbol::Velocity(velocity)) => {
                        self.open.open(channel, pitch, index);
                        self.events.push(Event::NoteOn {
                            time,
                            channel,
                            pitch,
                            velocity,
                        });
                        return Ok(2);
                    }
                    _ => self.violation(Error::InvalidToken {
                        index,
                        reason: format!("note_on:{pitch} is not followed by a velocity"),
                    })?,
                }
            }
            Symbol::NoteOff(pitch) => {
                if self.open.close(channel, pitch).is_some() {
                    self.events.push(Event::NoteOff {
                        time,
                        channel,
                        pitch,
                    });
                } else {
                    self.violation(Error::UnmatchedNoteOff {
                        index,
                        channel,
                        pitch,
                    })?;
                }
            }
            Symbol::Velocity(_) => self.violation(Error::InvalidToken {
                index,
                reason: format!("{symbol} without a preceding note_on"),
            })?,
            Symbol::Pedal(true) => self.events.push(Event::PedalOn { time, channel }),
            Symbol::Pedal(false) => self.events.push(Event::PedalOff { time, channel }),
            Symbol::Program(program) => self.events.push(Event::InstrumentChange {
                time,
                channel,
                program,
            }),
            Symbol::Tempo(microseconds_per_beat) => self.events.push(Event::TempoChange {
                time,
                microseconds_per_beat,
            }),
            Symbol::Special(Special::End) => {
                if !self.open.is_empty() {
                    self.violation(Error::InvalidToken {
                        index,
                        reason: format!("{} note(s) still open at END", self.open.len()),
                    })?;
                    self.close_open_notes();
                }
                self.events.push(Event::EndOfTrack { time });
                self.ended = true;
            }
            Symbol::Special(Special::Start) => self.violation(Error::InvalidToken {
                index,
                reason: "START is only allowed as the first token".to_string(),
            })?,
            Symbol::Special(Special::Pad) => self.violation(Error::InvalidToken {
                index,
                reason: "PAD before END".to_string(),
            })?,
        }
        Ok(1)
    }

    /// Fail under the strict policy; otherwise record and carry on.
    fn violation(&mut self, err: Error) -> Result<()> {
        match self.policy {
            DecodePolicy::Strict => Err(err),
            DecodePolicy::Lenient => {
                let index = err.index().unwrap_or_default();
                let message = err.to_string();
                warn!(index, %message, "skipping token");
                self.warnings.push(DecodeWarning { index, message });
                Ok(())
            }
        }
    }

    fn close_open_notes(&mut self) {
        let time = self.cursor;
        for ((channel, pitch), _) in self.open.drain() {
            self.events.push(Event::NoteOff {
                time,
                channel,
                pitch,
            });
        }
    }
}
