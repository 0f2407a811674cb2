//! Timeline to token sequence.

use crate::event::Event;
use crate::timeline::Timeline;
use crate::token::{Token, TokenSequence};
use crate::validate::validate_timeline;
use crate::vocab::{Special, Symbol, Vocabulary};
use crate::Result;
use tracing::debug;

/// Encode a timeline as a START ... END framed token sequence.
///
/// Event times are quantized down to the vocabulary resolution, then
/// re-ordered by `(quantized time, precedence)`. Between events the gap is
/// covered by time-shift tokens; channel-scoped events switch the channel
/// context only when it changes. Velocities and tempos snap to their
/// nearest bucket. End-of-track contributes only its time shift, since the
/// closing END stands for it.
///
/// Fails without partial output if the timeline is malformed or any value
/// has no symbol in `vocab`.
pub fn encode(timeline: &Timeline, vocab: &Vocabulary) -> Result<TokenSequence> {
    validate_timeline(timeline, vocab.overlap_policy())?;

    let mut events: Vec<(usize, Event)> = timeline
        .iter()
        .enumerate()
        .map(|(index, event)| (index, event.at(vocab.quantize_time(event.time()))))
        .collect();
    events.sort_by_key(|(_, event)| event.sort_key());

    let mut encoder = Encoder {
        vocab,
        tokens: vec![Special::Start.token()],
        cursor: 0,
        channel: 0,
    };
    for (index, event) in &events {
        encoder.push_event(event).map_err(|e| e.at_event(*index))?;
    }
    encoder.tokens.push(Special::End.token());

    debug!(
        events = events.len(),
        tokens = encoder.tokens.len(),
        vocab = vocab.name(),
        "encoded timeline"
    );

    Ok(TokenSequence::new(encoder.tokens))
}

struct Encoder<'a> {
    vocab: &'a Vocabulary,
    tokens: Vec<Token>,
    cursor: u64,
    channel: u8,
}

impl Encoder<'_> {
    fn push_event(&mut self, event: &Event) -> Result<()> {
        let time = event.time();
        let shifts = self.vocab.time_shifts(time - self.cursor)?;
        self.tokens.extend(shifts);
        self.cursor = time;

        if let Some(channel) = event.channel() {
            if channel != self.channel {
                self.push(Symbol::Channel(channel))?;
                self.channel = channel;
            }
        }

        match *event {
            Event::NoteOn {
                pitch, velocity, ..
            } => {
                let bucket = self.vocab.velocity_bucket(velocity)?;
                self.push(Symbol::NoteOn(pitch))?;
                self.push(Symbol::Velocity(bucket))
            }
            Event::NoteOff { pitch, .. } => self.push(Symbol::NoteOff(pitch)),
            Event::PedalOn { .. } => self.push(Symbol::Pedal(true)),
            Event::PedalOff { .. } => self.push(Symbol::Pedal(false)),
            Event::InstrumentChange { program, .. } => self.push(Symbol::Program(program)),
            Event::TempoChange {
                microseconds_per_beat,
                ..
            } => {
                let bucket = self.vocab.tempo_bucket(microseconds_per_beat)?;
                self.push(Symbol::Tempo(bucket))
            }
            Event::EndOfTrack { .. } => Ok(()),
        }
    }

    fn push(&mut self, symbol: Symbol) -> Result<()> {
        let token = self.vocab.index_of(symbol)?;
        self.tokens.push(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::Category;
    use crate::Error;
    use pretty_assertions::assert_eq;
    use tokconf::VocabConfig;

    fn vocab(resolution_ms: u64, max_shift_ms: u64) -> Vocabulary {
        let mut config = VocabConfig::bundled().unwrap();
        config.time.resolution_ms = resolution_ms;
        config.time.max_shift_ms = max_shift_ms;
        Vocabulary::load(&config).unwrap()
    }

    fn names(tokens: &TokenSequence, vocab: &Vocabulary) -> Vec<String> {
        tokens
            .iter()
            .map(|t| vocab.symbol_name(*t).unwrap())
            .collect()
    }

    #[test]
    fn single_note() {
        let vocab = vocab(10, 500);
        let timeline = Timeline::new(vec![
            Event::NoteOn {
                time: 0,
                channel: 0,
                pitch: 60,
                velocity: 100,
            },
            Event::NoteOff {
                time: 120,
                channel: 0,
                pitch: 60,
            },
        ]);

        let tokens = encode(&timeline, &vocab).unwrap();
        let velocity = vocab.velocity_bucket(100).unwrap();
        let expected: Vec<Token> = vec![
            Special::Start.token(),
            vocab.index_of(Symbol::NoteOn(60)).unwrap(),
            vocab.index_of(Symbol::Velocity(velocity)).unwrap(),
            vocab.index_of(Symbol::TimeShift(120)).unwrap(),
            vocab.index_of(Symbol::NoteOff(60)).unwrap(),
            Special::End.token(),
        ];
        assert_eq!(tokens.tokens(), expected.as_slice());
    }

    #[test]
    fn times_quantize_down_and_long_gaps_split() {
        let vocab = vocab(10, 500);
        let timeline = Timeline::new(vec![
            Event::NoteOn {
                time: 7,
                channel: 0,
                pitch: 60,
                velocity: 64,
            },
            Event::NoteOff {
                time: 1_239,
                channel: 0,
                pitch: 60,
            },
            Event::EndOfTrack { time: 1_300 },
        ]);

        let tokens = encode(&timeline, &vocab).unwrap();
        assert_eq!(
            names(&tokens, &vocab),
            vec![
                "start",
                "note_on:60",
                "velocity:64",
                "time_shift:500",
                "time_shift:500",
                "time_shift:230",
                "note_off:60",
                "time_shift:70",
                "end",
            ]
        );
    }

    #[test]
    fn channel_token_only_on_change() {
        let vocab = vocab(10, 500);
        let timeline = Timeline::new(vec![
            Event::InstrumentChange {
                time: 0,
                channel: 1,
                program: 40,
            },
            Event::NoteOn {
                time: 0,
                channel: 1,
                pitch: 67,
                velocity: 80,
            },
            Event::NoteOn {
                time: 0,
                channel: 0,
                pitch: 48,
                velocity: 80,
            },
            Event::NoteOff {
                time: 100,
                channel: 1,
                pitch: 67,
            },
            Event::NoteOff {
                time: 100,
                channel: 0,
                pitch: 48,
            },
        ]);

        let tokens = encode(&timeline, &vocab).unwrap();
        let channel_tokens = tokens
            .iter()
            .filter(|t| vocab.category_of(**t).unwrap() == Category::Channel)
            .count();
        // 0 -> 1 (program), 1 -> 0 (second note-on), 0 -> 1, 1 -> 0 (note-offs)
        assert_eq!(channel_tokens, 4);
        assert_eq!(names(&tokens, &vocab)[1..3], ["channel:1", "program:40"]);
    }

    #[test]
    fn pedal_and_tempo_tokens() {
        let vocab = vocab(10, 500);
        let timeline = Timeline::new(vec![
            Event::TempoChange {
                time: 0,
                microseconds_per_beat: 500_000,
            },
            Event::PedalOn {
                time: 0,
                channel: 0,
            },
            Event::PedalOff {
                time: 50,
                channel: 0,
            },
        ]);

        let tokens = encode(&timeline, &vocab).unwrap();
        let tempo = vocab.tempo_bucket(500_000).unwrap();
        assert_eq!(
            names(&tokens, &vocab),
            vec![
                "start".to_string(),
                format!("tempo:{tempo}"),
                "pedal:on".to_string(),
                "time_shift:50".to_string(),
                "pedal:off".to_string(),
                "end".to_string(),
            ]
        );
    }

    #[test]
    fn deterministic() {
        let vocab = vocab(10, 500);
        let timeline = Timeline::new(vec![
            Event::NoteOn {
                time: 0,
                channel: 2,
                pitch: 60,
                velocity: 90,
            },
            Event::NoteOn {
                time: 0,
                channel: 2,
                pitch: 64,
                velocity: 90,
            },
            Event::NoteOff {
                time: 480,
                channel: 2,
                pitch: 60,
            },
            Event::NoteOff {
                time: 480,
                channel: 2,
                pitch: 64,
            },
        ]);
        assert_eq!(encode(&timeline, &vocab).unwrap(), encode(&timeline, &vocab).unwrap());
    }

    #[test]
    fn out_of_range_pitch_reports_event_index() {
        let mut config = VocabConfig::bundled().unwrap();
        config.pitch.min = 21;
        config.pitch.max = 108;
        let vocab = Vocabulary::load(&config).unwrap();

        let timeline = Timeline::new(vec![
            Event::NoteOn {
                time: 0,
                channel: 0,
                pitch: 60,
                velocity: 90,
            },
            Event::NoteOn {
                time: 10,
                channel: 0,
                pitch: 120,
                velocity: 90,
            },
            Event::NoteOff {
                time: 20,
                channel: 0,
                pitch: 60,
            },
            Event::NoteOff {
                time: 20,
                channel: 0,
                pitch: 120,
            },
        ]);

        let err = encode(&timeline, &vocab).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownSymbol {
                category: Category::NoteOn,
                value: 120,
                index: Some(1),
            }
        ));
    }

    #[test]
    fn unlisted_program_rejected() {
        let mut config = VocabConfig::bundled().unwrap();
        config.instrument.programs = vec![0, 24];
        let vocab = Vocabulary::load(&config).unwrap();

        let timeline = Timeline::new(vec![Event::InstrumentChange {
            time: 0,
            channel: 0,
            program: 40,
        }]);
        assert!(matches!(
            encode(&timeline, &vocab),
            Err(Error::UnknownSymbol { category: Category::Program, .. })
        ));
    }

    #[test]
    fn unmatched_note_off_is_malformed() {
        let vocab = vocab(10, 500);
        let timeline = Timeline::new(vec![Event::NoteOff {
            time: 0,
            channel: 0,
            pitch: 60,
        }]);
        assert!(matches!(
            encode(&timeline, &vocab),
            Err(Error::MalformedTimeline { index: 0, .. })
        ));
    }

    #[test]
    fn zero_velocity_note_on_rejected() {
        let vocab = Vocabulary::bundled().unwrap();
        let timeline = Timeline::new(vec![
            Event::NoteOn {
                time: 0,
                channel: 0,
                pitch: 60,
                velocity: 90,
            },
            Event::NoteOn {
                time: 10,
                channel: 0,
                pitch: 64,
                velocity: 0,
            },
            Event::NoteOff {
                time: 20,
                channel: 0,
                pitch: 60,
            },
            Event::NoteOff {
                time: 20,
                channel: 0,
                pitch: 64,
            },
        ]);

        let err = encode(&timeline, &vocab).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownSymbol {
                category: Category::Velocity,
                value: 0,
                index: Some(1),
            }
        ));
    }

    #[test]
    fn tempo_outside_bpm_range_rejected() {
        let vocab = Vocabulary::bundled().unwrap();
        // 30 BPM, below the bundled 40 BPM floor.
        let timeline = Timeline::new(vec![
            Event::TempoChange {
                time: 0,
                microseconds_per_beat: 500_000,
            },
            Event::TempoChange {
                time: 1_000,
                microseconds_per_beat: 2_000_000,
            },
            Event::EndOfTrack { time: 2_000 },
        ]);

        let err = encode(&timeline, &vocab).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownSymbol {
                category: Category::Tempo,
                value: 2_000_000,
                index: Some(1),
            }
        ));
    }

    #[test]
    fn empty_timeline_is_just_framing() {
        let vocab = vocab(10, 500);
        let tokens = encode(&Timeline::default(), &vocab).unwrap();
        assert_eq!(tokens.as_ids(), vec![1, 2]);
    }
}
