//! The vocabulary: symbol table plus quantizers, built once from a
//! [`VocabConfig`] and shared read-only by encode and decode.
//!
//! Token ids are assigned densely, category by category, in the order of
//! [`Category::ALL`]. Inside a category symbols ascend by value. The same
//! document therefore always yields the same table; [`Vocabulary::fingerprint`]
//! lets two processes confirm they agree before exchanging tokens.

use crate::token::Token;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use tokconf::{DecodePolicy, OverlapPolicy, VocabConfig};
use tracing::debug;

/// Token category, in symbol-table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Special,
    TimeShift,
    NoteOn,
    NoteOff,
    Velocity,
    Pedal,
    Channel,
    Program,
    Tempo,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Special,
        Category::TimeShift,
        Category::NoteOn,
        Category::NoteOff,
        Category::Velocity,
        Category::Pedal,
        Category::Channel,
        Category::Program,
        Category::Tempo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Special => "special",
            Category::TimeShift => "time_shift",
            Category::NoteOn => "note_on",
            Category::NoteOff => "note_off",
            Category::Velocity => "velocity",
            Category::Pedal => "pedal",
            Category::Channel => "channel",
            Category::Program => "program",
            Category::Tempo => "tempo",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Framing symbols. They occupy ids 0, 1, 2 in every vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Special {
    Pad,
    Start,
    End,
}

impl Special {
    pub const ALL: [Special; 3] = [Special::Pad, Special::Start, Special::End];

    pub fn token(self) -> Token {
        match self {
            Special::Pad => Token(0),
            Special::Start => Token(1),
            Special::End => Token(2),
        }
    }
}

/// The decoded meaning of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "category", content = "value", rename_all = "snake_case")]
pub enum Symbol {
    Special(Special),
    /// Cursor advance in milliseconds.
    TimeShift(u64),
    NoteOn(u8),
    NoteOff(u8),
    /// Bucket representative velocity.
    Velocity(u8),
    /// `true` for pedal down.
    Pedal(bool),
    /// Switch the channel context for following channel-scoped tokens.
    Channel(u8),
    Program(u8),
    /// Bucket representative tempo in microseconds per beat.
    Tempo(u32),
}

impl Symbol {
    pub fn category(&self) -> Category {
        match self {
            Symbol::Special(_) => Category::Special,
            Symbol::TimeShift(_) => Category::TimeShift,
            Symbol::NoteOn(_) => Category::NoteOn,
            Symbol::NoteOff(_) => Category::NoteOff,
            Symbol::Velocity(_) => Category::Velocity,
            Symbol::Pedal(_) => Category::Pedal,
            Symbol::Channel(_) => Category::Channel,
            Symbol::Program(_) => Category::Program,
            Symbol::Tempo(_) => Category::Tempo,
        }
    }

    fn raw_value(&self) -> i64 {
        match *self {
            Symbol::Special(s) => s.token().id().into(),
            Symbol::TimeShift(ms) => i64::try_from(ms).unwrap_or(i64::MAX),
            Symbol::NoteOn(v)
            | Symbol::NoteOff(v)
            | Symbol::Velocity(v)
            | Symbol::Channel(v)
            | Symbol::Program(v) => v.into(),
            Symbol::Pedal(down) => down.into(),
            Symbol::Tempo(usec) => usec.into(),
        }
    }

    fn unknown(&self) -> Error {
        Error::UnknownSymbol {
            category: self.category(),
            value: self.raw_value(),
            index: None,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Special(Special::Pad) => f.write_str("pad"),
            Symbol::Special(Special::Start) => f.write_str("start"),
            Symbol::Special(Special::End) => f.write_str("end"),
            Symbol::Pedal(true) => f.write_str("pedal:on"),
            Symbol::Pedal(false) => f.write_str("pedal:off"),
            other => write!(f, "{}:{}", other.category(), other.raw_value()),
        }
    }
}

/// Immutable symbol table and quantization parameters.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    name: String,
    version: u32,
    time_resolution: u64,
    max_shift: u64,
    pitches: RangeInclusive<u8>,
    velocity_range: RangeInclusive<u8>,
    velocities: Vec<u8>,
    tempo_range: RangeInclusive<u32>,
    tempos: Vec<u32>,
    channels: u8,
    programs: Vec<u8>,
    decode_policy: DecodePolicy,
    overlap_policy: OverlapPolicy,
    symbols: Vec<Symbol>,
    index: HashMap<Symbol, Token>,
}

impl Vocabulary {
    /// Build the vocabulary described by `config`.
    pub fn load(config: &VocabConfig) -> Result<Self> {
        config.validate()?;

        let resolution = config.time.resolution_ms;
        let velocities = config.velocity.representatives();
        let tempos: Vec<u32> = config
            .tempo
            .representatives_bpm()
            .into_iter()
            .map(bpm_to_usec)
            .collect();
        let mut programs = config.instrument.programs.clone();
        programs.sort_unstable();

        let mut symbols: Vec<Symbol> = Special::ALL.into_iter().map(Symbol::Special).collect();
        symbols.extend((1..=config.time.shift_steps()).map(|i| Symbol::TimeShift(i * resolution)));
        symbols.extend((config.pitch.min..=config.pitch.max).map(Symbol::NoteOn));
        symbols.extend((config.pitch.min..=config.pitch.max).map(Symbol::NoteOff));
        symbols.extend(velocities.iter().copied().map(Symbol::Velocity));
        symbols.extend([Symbol::Pedal(false), Symbol::Pedal(true)]);
        symbols.extend((0..config.instrument.channels).map(Symbol::Channel));
        symbols.extend(programs.iter().copied().map(Symbol::Program));
        symbols.extend(tempos.iter().copied().map(Symbol::Tempo));

        let index: HashMap<Symbol, Token> = symbols
            .iter()
            .enumerate()
            .map(|(id, symbol)| (*symbol, Token(id as u32)))
            .collect();

        // Slowest tempo has the most microseconds per beat.
        let tempo_range = bpm_to_usec(config.tempo.max_bpm)..=bpm_to_usec(config.tempo.min_bpm);

        debug!(
            name = %config.name,
            symbols = symbols.len(),
            "vocabulary built"
        );

        Ok(Self {
            name: config.name.clone(),
            version: config.version,
            time_resolution: resolution,
            max_shift: config.time.max_shift_ms,
            pitches: config.pitch.min..=config.pitch.max,
            velocity_range: config.velocity.min..=config.velocity.max,
            velocities,
            tempo_range,
            tempos,
            channels: config.instrument.channels,
            programs,
            decode_policy: config.decode.policy,
            overlap_policy: config.decode.overlap,
            symbols,
            index,
        })
    }

    /// Build the vocabulary from the document bundled with `tokconf`.
    pub fn bundled() -> Result<Self> {
        Self::load(&VocabConfig::bundled()?)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Token for a symbol, or `UnknownSymbol` if the value has no representation.
    pub fn index_of(&self, symbol: Symbol) -> Result<Token> {
        self.index.get(&symbol).copied().ok_or_else(|| symbol.unknown())
    }

    /// The symbol a token stands for.
    pub fn decode_symbol(&self, token: Token) -> Result<Symbol> {
        self.symbols
            .get(token.0 as usize)
            .copied()
            .ok_or(Error::OutOfVocabulary {
                token: token.0,
                size: self.symbols.len(),
            })
    }

    pub fn category_of(&self, token: Token) -> Result<Category> {
        self.decode_symbol(token).map(|s| s.category())
    }

    /// Readable form of a token, e.g. `note_on:60`.
    pub fn symbol_name(&self, token: Token) -> Result<String> {
        self.decode_symbol(token).map(|s| s.to_string())
    }

    /// Every symbol in id order.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// BLAKE3 over the version, name, and full symbol table, truncated to
    /// 128 bits (32 hex chars).
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.version.to_le_bytes());
        hasher.update(self.name.as_bytes());
        for symbol in &self.symbols {
            hasher.update(b"\n");
            hasher.update(symbol.to_string().as_bytes());
        }
        hex::encode(&hasher.finalize().as_bytes()[..16])
    }

    // --- quantizers ---

    /// Round a time down to the nearest multiple of the resolution.
    pub fn quantize_time(&self, time: u64) -> u64 {
        time - time % self.time_resolution
    }

    /// Time-shift tokens covering `gap` milliseconds (rounded down to the
    /// resolution): as many maximal shifts as fit, then the remainder.
    pub fn time_shifts(&self, gap: u64) -> Result<Vec<Token>> {
        let gap = self.quantize_time(gap);
        let full = gap / self.max_shift;
        let rest = gap % self.max_shift;

        let mut tokens = Vec::with_capacity(full as usize + 1);
        if full > 0 {
            let max = self.index_of(Symbol::TimeShift(self.max_shift))?;
            tokens.extend(std::iter::repeat(max).take(full as usize));
        }
        if rest > 0 {
            tokens.push(self.index_of(Symbol::TimeShift(rest))?);
        }
        Ok(tokens)
    }

    /// Representative of the bucket nearest to `velocity` (ties go low).
    pub fn velocity_bucket(&self, velocity: u8) -> Result<u8> {
        if !self.velocity_range.contains(&velocity) {
            return Err(Symbol::Velocity(velocity).unknown());
        }
        Ok(nearest(&self.velocities, velocity))
    }

    /// Representative of the tempo bucket nearest to `microseconds_per_beat`.
    pub fn tempo_bucket(&self, microseconds_per_beat: u32) -> Result<u32> {
        if !self.tempo_range.contains(&microseconds_per_beat) {
            return Err(Symbol::Tempo(microseconds_per_beat).unknown());
        }
        Ok(nearest(&self.tempos, microseconds_per_beat))
    }

    // --- parameters ---

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn time_resolution(&self) -> u64 {
        self.time_resolution
    }

    pub fn max_shift(&self) -> u64 {
        self.max_shift
    }

    pub fn pitch_range(&self) -> RangeInclusive<u8> {
        self.pitches.clone()
    }

    pub fn velocity_range(&self) -> RangeInclusive<u8> {
        self.velocity_range.clone()
    }

    pub fn velocities(&self) -> &[u8] {
        &self.velocities
    }

    /// Representative tempos in microseconds per beat, slowest BPM first.
    pub fn tempos(&self) -> &[u32] {
        &self.tempos
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn programs(&self) -> &[u8] {
        &self.programs
    }

    pub fn decode_policy(&self) -> DecodePolicy {
        self.decode_policy
    }

    pub fn overlap_policy(&self) -> OverlapPolicy {
        self.overlap_policy
    }
}

fn bpm_to_usec(bpm: u32) -> u32 {
    60_000_000 / bpm
}

fn nearest<T: Copy + Into<i64>>(representatives: &[T], value: T) -> T {
    let target: i64 = value.into();
    representatives
        .iter()
        .copied()
        .min_by_key(|&rep| {
            let rep: i64 = rep.into();
            (rep - target).abs()
        })
        .unwrap_or(value)
}
