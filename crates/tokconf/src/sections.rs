//! Vocabulary document sections - one struct per TOML table.
//!
//! Quantization tables (`time`, `velocity`, `pitch`) are required. The
//! remaining tables fall back to General MIDI defaults when omitted.

use crate::ConfigError;
use serde::{Deserialize, Serialize};

/// Highest value a MIDI data byte can carry.
pub const MIDI_DATA_MAX: u8 = 127;

/// Time quantization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeConfig {
    /// Smallest representable time delta, in milliseconds.
    pub resolution_ms: u64,

    /// Largest single time-shift token, in milliseconds. Longer gaps are
    /// split into several tokens. Must be a multiple of `resolution_ms`.
    pub max_shift_ms: u64,
}

impl TimeConfig {
    /// Upper bound on the number of time-shift symbols.
    pub const MAX_SHIFT_STEPS: u64 = 65_536;

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution_ms == 0 {
            return Err(ConfigError::invalid("time.resolution_ms", "must be greater than zero"));
        }
        if self.max_shift_ms == 0 {
            return Err(ConfigError::invalid("time.max_shift_ms", "must be greater than zero"));
        }
        if self.max_shift_ms % self.resolution_ms != 0 {
            return Err(ConfigError::invalid(
                "time.max_shift_ms",
                format!(
                    "{} is not a multiple of time.resolution_ms ({})",
                    self.max_shift_ms, self.resolution_ms
                ),
            ));
        }
        if self.shift_steps() > Self::MAX_SHIFT_STEPS {
            return Err(ConfigError::invalid(
                "time.max_shift_ms",
                format!(
                    "yields {} time-shift symbols (limit {})",
                    self.shift_steps(),
                    Self::MAX_SHIFT_STEPS
                ),
            ));
        }
        Ok(())
    }

    /// Number of distinct time-shift symbols.
    pub fn shift_steps(&self) -> u64 {
        self.max_shift_ms / self.resolution_ms
    }
}

/// Velocity bucketing over an inclusive range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityConfig {
    pub min: u8,
    pub max: u8,
    /// Number of evenly spaced representative velocities.
    pub buckets: u32,
}

impl VelocityConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.max > MIDI_DATA_MAX {
            return Err(ConfigError::invalid("velocity.max", "must be at most 127"));
        }
        if self.min == 0 {
            return Err(ConfigError::invalid(
                "velocity.min",
                "must be at least 1; a zero-velocity note-on is a note-off",
            ));
        }
        if self.min > self.max {
            return Err(ConfigError::invalid("velocity.min", "must not exceed velocity.max"));
        }
        let span = u32::from(self.max - self.min) + 1;
        if self.buckets == 0 || self.buckets > span {
            return Err(ConfigError::invalid(
                "velocity.buckets",
                format!("must be between 1 and {span}"),
            ));
        }
        Ok(())
    }

    /// Representative velocity of every bucket, ascending.
    ///
    /// Bucket `i` of `n` sits at `min + round(i * (max - min) / (n - 1))`.
    /// A single bucket sits at the midpoint of the range.
    pub fn representatives(&self) -> Vec<u8> {
        spread(u32::from(self.min), u32::from(self.max), self.buckets)
            .into_iter()
            .map(|v| v as u8)
            .collect()
    }
}

/// Inclusive pitch range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchConfig {
    pub min: u8,
    pub max: u8,
}

impl PitchConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.max > MIDI_DATA_MAX {
            return Err(ConfigError::invalid("pitch.max", "must be at most 127"));
        }
        if self.min > self.max {
            return Err(ConfigError::invalid("pitch.min", "must not exceed pitch.max"));
        }
        Ok(())
    }
}

/// Channel contexts and the program enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Number of channel-context symbols (channels `0..channels`).
    /// Default: 16
    #[serde(default = "InstrumentConfig::default_channels")]
    pub channels: u8,

    /// Program numbers that have a symbol.
    /// Default: all 128 General MIDI programs
    #[serde(default = "InstrumentConfig::default_programs")]
    pub programs: Vec<u8>,
}

impl InstrumentConfig {
    fn default_channels() -> u8 {
        16
    }

    fn default_programs() -> Vec<u8> {
        (0..=MIDI_DATA_MAX).collect()
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.channels == 0 || self.channels > 16 {
            return Err(ConfigError::invalid("instrument.channels", "must be between 1 and 16"));
        }
        if self.programs.is_empty() {
            return Err(ConfigError::invalid(
                "instrument.programs",
                "must list at least one program",
            ));
        }
        let mut seen = [false; 128];
        for &program in &self.programs {
            if program > MIDI_DATA_MAX {
                return Err(ConfigError::invalid(
                    "instrument.programs",
                    format!("program {program} is above 127"),
                ));
            }
            if std::mem::replace(&mut seen[program as usize], true) {
                return Err(ConfigError::invalid(
                    "instrument.programs",
                    format!("program {program} is listed twice"),
                ));
            }
        }
        Ok(())
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            channels: Self::default_channels(),
            programs: Self::default_programs(),
        }
    }
}

/// Tempo bucketing, expressed in beats per minute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoConfig {
    /// Default: 40
    #[serde(default = "TempoConfig::default_min_bpm")]
    pub min_bpm: u32,

    /// Default: 240
    #[serde(default = "TempoConfig::default_max_bpm")]
    pub max_bpm: u32,

    /// Default: 21
    #[serde(default = "TempoConfig::default_buckets")]
    pub buckets: u32,
}

impl TempoConfig {
    /// Above this, neighbouring BPM values collapse onto the same
    /// microseconds-per-beat integer.
    pub const MAX_BPM: u32 = 1000;

    fn default_min_bpm() -> u32 {
        40
    }

    fn default_max_bpm() -> u32 {
        240
    }

    fn default_buckets() -> u32 {
        21
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.min_bpm == 0 {
            return Err(ConfigError::invalid("tempo.min_bpm", "must be greater than zero"));
        }
        if self.max_bpm > Self::MAX_BPM {
            return Err(ConfigError::invalid(
                "tempo.max_bpm",
                format!("must be at most {}", Self::MAX_BPM),
            ));
        }
        if self.min_bpm > self.max_bpm {
            return Err(ConfigError::invalid("tempo.min_bpm", "must not exceed tempo.max_bpm"));
        }
        let span = self.max_bpm - self.min_bpm + 1;
        if self.buckets == 0 || self.buckets > span {
            return Err(ConfigError::invalid(
                "tempo.buckets",
                format!("must be between 1 and {span}"),
            ));
        }
        Ok(())
    }

    /// Representative BPM of every bucket, ascending.
    pub fn representatives_bpm(&self) -> Vec<u32> {
        spread(self.min_bpm, self.max_bpm, self.buckets)
    }
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_bpm: Self::default_min_bpm(),
            max_bpm: Self::default_max_bpm(),
            buckets: Self::default_buckets(),
        }
    }
}

/// What the detokenizer does with structurally broken input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
    /// Fail on the first violation.
    #[default]
    Strict,
    /// Drop the offending token, record a warning, keep going.
    Lenient,
}

/// Which open note a note-off closes when several notes share a
/// (channel, pitch) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    #[default]
    EarliestFirst,
    LatestFirst,
}

/// Detokenizer defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecodeConfig {
    #[serde(default)]
    pub policy: DecodePolicy,

    #[serde(default)]
    pub overlap: OverlapPolicy,
}

/// `n` evenly spaced integers across `[min, max]`, rounded to nearest.
fn spread(min: u32, max: u32, n: u32) -> Vec<u32> {
    if n <= 1 {
        return vec![(min + max) / 2];
    }
    let span = max - min;
    let steps = n - 1;
    (0..n)
        .map(|i| min + (i * span + steps / 2) / steps)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_representatives_cover_range() {
        let velocity = VelocityConfig {
            min: 1,
            max: 127,
            buckets: 13,
        };
        let reps = velocity.representatives();
        assert_eq!(reps.len(), 13);
        assert_eq!(reps.first(), Some(&1));
        assert_eq!(reps.last(), Some(&127));
        assert!(reps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn single_bucket_is_midpoint() {
        let velocity = VelocityConfig {
            min: 20,
            max: 100,
            buckets: 1,
        };
        assert_eq!(velocity.representatives(), vec![60]);
    }

    #[test]
    fn full_resolution_velocity_is_identity() {
        let velocity = VelocityConfig {
            min: 1,
            max: 127,
            buckets: 127,
        };
        assert!(velocity.validate().is_ok());
        let reps = velocity.representatives();
        assert_eq!(reps, (1..=127).collect::<Vec<u8>>());
    }

    #[test]
    fn zero_velocity_floor_rejected() {
        let velocity = VelocityConfig {
            min: 0,
            max: 127,
            buckets: 16,
        };
        match velocity.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "velocity.min"),
            other => panic!("expected invalid velocity.min, got {other:?}"),
        }
    }

    #[test]
    fn max_shift_must_be_multiple_of_resolution() {
        let time = TimeConfig {
            resolution_ms: 10,
            max_shift_ms: 505,
        };
        let err = time.validate().unwrap_err();
        assert!(err.to_string().contains("time.max_shift_ms"));
    }

    #[test]
    fn zero_resolution_rejected() {
        let time = TimeConfig {
            resolution_ms: 0,
            max_shift_ms: 500,
        };
        assert!(time.validate().is_err());
    }

    #[test]
    fn duplicate_program_rejected() {
        let instrument = InstrumentConfig {
            channels: 16,
            programs: vec![0, 24, 0],
        };
        let err = instrument.validate().unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn tempo_buckets_bounded_by_span() {
        let tempo = TempoConfig {
            min_bpm: 100,
            max_bpm: 104,
            buckets: 6,
        };
        assert!(tempo.validate().is_err());

        let tempo = TempoConfig {
            min_bpm: 100,
            max_bpm: 104,
            buckets: 5,
        };
        assert_eq!(tempo.representatives_bpm(), vec![100, 101, 102, 103, 104]);
    }
}
