//! General MIDI instrument families.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The sixteen General MIDI program families, eight programs each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentFamily {
    Piano,
    Chromatic,
    Organ,
    Guitar,
    Bass,
    Strings,
    Ensemble,
    Brass,
    Reed,
    Pipe,
    SynthLead,
    SynthPad,
    SynthEffect,
    Ethnic,
    Percussive,
    Sfx,
}

impl InstrumentFamily {
    pub const ALL: [InstrumentFamily; 16] = [
        InstrumentFamily::Piano,
        InstrumentFamily::Chromatic,
        InstrumentFamily::Organ,
        InstrumentFamily::Guitar,
        InstrumentFamily::Bass,
        InstrumentFamily::Strings,
        InstrumentFamily::Ensemble,
        InstrumentFamily::Brass,
        InstrumentFamily::Reed,
        InstrumentFamily::Pipe,
        InstrumentFamily::SynthLead,
        InstrumentFamily::SynthPad,
        InstrumentFamily::SynthEffect,
        InstrumentFamily::Ethnic,
        InstrumentFamily::Percussive,
        InstrumentFamily::Sfx,
    ];

    /// Family of a 0-based program number. Values above 127 wrap into the
    /// 7-bit range first.
    pub fn of_program(program: u8) -> Self {
        Self::ALL[usize::from(program & 0x7F) / 8]
    }

    /// Programs belonging to this family.
    pub fn programs(self) -> std::ops::RangeInclusive<u8> {
        let first = self as u8 * 8;
        first..=first + 7
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstrumentFamily::Piano => "piano",
            InstrumentFamily::Chromatic => "chromatic",
            InstrumentFamily::Organ => "organ",
            InstrumentFamily::Guitar => "guitar",
            InstrumentFamily::Bass => "bass",
            InstrumentFamily::Strings => "strings",
            InstrumentFamily::Ensemble => "ensemble",
            InstrumentFamily::Brass => "brass",
            InstrumentFamily::Reed => "reed",
            InstrumentFamily::Pipe => "pipe",
            InstrumentFamily::SynthLead => "synth_lead",
            InstrumentFamily::SynthPad => "synth_pad",
            InstrumentFamily::SynthEffect => "synth_effect",
            InstrumentFamily::Ethnic => "ethnic",
            InstrumentFamily::Percussive => "percussive",
            InstrumentFamily::Sfx => "sfx",
        }
    }
}

impl fmt::Display for InstrumentFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
