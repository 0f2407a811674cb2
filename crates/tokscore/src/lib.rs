//! Deterministic codec between MIDI-style event timelines and token
//! sequences for sequence models.
//!
//! A [`Vocabulary`] is built once from a [`tokconf::VocabConfig`] and passed
//! by reference to both directions:
//!
//! ```
//! use tokscore::{decode, encode, DecodeOptions, Event, Timeline, Vocabulary};
//!
//! let vocab = Vocabulary::bundled().unwrap();
//! let timeline = Timeline::new(vec![
//!     Event::NoteOn { time: 0, channel: 0, pitch: 60, velocity: 100 },
//!     Event::NoteOff { time: 120, channel: 0, pitch: 60 },
//! ]);
//!
//! let tokens = encode(&timeline, &vocab).unwrap();
//! let decoded = decode(&tokens, &vocab, &DecodeOptions::from_vocab(&vocab)).unwrap();
//! assert_eq!(encode(&decoded.timeline, &vocab).unwrap(), tokens);
//! ```

pub mod augment;
pub mod detokenize;
pub mod event;
pub mod gm;
pub mod metadata;
pub mod midi_io;
mod pending;
pub mod preprocess;
pub mod timeline;
pub mod token;
pub mod tokenize;
pub mod validate;
pub mod vocab;

pub use augment::{jitter_velocity, scale_tempo, transpose, Ratio};
pub use detokenize::{decode, DecodeOptions, DecodeWarning, Decoded};
pub use event::{Event, Note, PERCUSSION_CHANNEL};
pub use gm::InstrumentFamily;
pub use metadata::{MetaText, MetaTextKind, Metadata, MetadataExtractor};
pub use midi_io::{timeline_from_bytes, timeline_from_smf, timeline_to_smf_bytes, Piece, TempoMap};
pub use preprocess::{CheckOutcome, QualityCheck};
pub use timeline::Timeline;
pub use token::{Token, TokenSequence};
pub use tokconf::{DecodePolicy, OverlapPolicy, VocabConfig};
pub use tokenize::encode;
pub use validate::{validate_timeline, validate_tokens};
pub use vocab::{Category, Special, Symbol, Vocabulary};

/// Errors from encoding, decoding, and the surrounding utilities.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] tokconf::ConfigError),

    #[error("malformed timeline at event {index}: {reason}")]
    MalformedTimeline {
        index: usize,
        reason: String,
    },

    #[error(
        "no {category} symbol for value {value}{}",
        .index.map(|i| format!(" (event {i})")).unwrap_or_default()
    )]
    UnknownSymbol {
        category: Category,
        value: i64,
        index: Option<usize>,
    },

    #[error("token id {token} is outside the vocabulary ({size} symbols)")]
    OutOfVocabulary {
        token: u32,
        size: usize,
    },

    #[error("note-off at token {index} has no open note for pitch {pitch} on channel {channel}")]
    UnmatchedNoteOff {
        index: usize,
        channel: u8,
        pitch: u8,
    },

    #[error("invalid token at index {index}: {reason}")]
    InvalidToken {
        index: usize,
        reason: String,
    },

    #[error("MIDI parse error: {0}")]
    MidiParse(String),

    #[error("MIDI write error: {0}")]
    MidiWrite(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("augmentation error: {0}")]
    Augment(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Attach an event index to a symbol lookup failure.
    pub(crate) fn at_event(self, event_index: usize) -> Self {
        match self {
            Error::UnknownSymbol {
                category, value, ..
            } => Error::UnknownSymbol {
                category,
                value,
                index: Some(event_index),
            },
            other => other,
        }
    }

    /// Position of the offending event or token, when known.
    pub fn index(&self) -> Option<usize> {
        match *self {
            Error::MalformedTimeline { index, .. }
            | Error::UnmatchedNoteOff { index, .. }
            | Error::InvalidToken { index, .. } => Some(index),
            Error::UnknownSymbol { index, .. } => index,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
