//! Berlin Clock (Mengenlehreuhr) keystream stage
//!
//! The clock shows a time as five lamp rows: a seconds lamp lit on even
//! seconds, four 5-hour lamps, four 1-hour lamps, eleven 5-minute lamps and
//! four 1-minute lamps. Each hypothesis reads a lamp state as a short numeric
//! keystream and shifts the text by it cyclically, mod 26.

use super::executor::{self, BudgetTracker};
use super::{Budget, CipherStage, StageContext, ValidationContext};
use crate::error::{EngineError, EngineResult};
use crate::types::{AttemptParams, Candidate, ClockTime, KeystreamEncoding, ShiftDirection, StageResult};
use k4_common::text::{from_indices, to_indices, ALPHABET_LEN};
use serde::{Deserialize, Serialize};

/// Lamp state of the clock at one time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LampState {
    pub seconds_lit: bool,
    pub five_hours: u8,
    pub hours: u8,
    pub five_minutes: u8,
    pub minutes: u8,
}

impl LampState {
    pub fn at(time: ClockTime) -> Self {
        Self {
            seconds_lit: time.seconds % 2 == 0,
            five_hours: time.hours / 5,
            hours: time.hours % 5,
            five_minutes: time.minutes / 5,
            minutes: time.minutes % 5,
        }
    }

    /// Numeric keystream for an encoding
    pub fn keystream(&self, encoding: KeystreamEncoding) -> Vec<u8> {
        let seconds = u8::from(self.seconds_lit);
        match encoding {
            KeystreamEncoding::LampCounts => vec![
                seconds,
                self.five_hours,
                self.hours,
                self.five_minutes,
                self.minutes,
            ],
            KeystreamEncoding::RowValues => vec![
                seconds,
                (self.five_hours * 5) % ALPHABET_LEN as u8,
                self.hours,
                (self.five_minutes * 5) % ALPHABET_LEN as u8,
                self.minutes,
            ],
            KeystreamEncoding::LampBits => {
                let row = |lit: u8, total: u8| (0..total).map(move |i| u8::from(i < lit));
                std::iter::once(seconds)
                    .chain(row(self.five_hours, 4))
                    .chain(row(self.hours, 4))
                    .chain(row(self.five_minutes, 11))
                    .chain(row(self.minutes, 4))
                    .collect()
            }
        }
    }
}

/// Shift letters by a repeating keystream
pub fn apply_keystream(letters: &[u8], keystream: &[u8], direction: ShiftDirection) -> Vec<u8> {
    if keystream.is_empty() {
        return letters.to_vec();
    }
    let m = ALPHABET_LEN as u8;
    letters
        .iter()
        .zip(keystream.iter().cycle())
        .map(|(&c, &k)| match direction {
            ShiftDirection::Add => (c + k % m) % m,
            ShiftDirection::Subtract => (c + m - k % m) % m,
        })
        .collect()
}

/// Berlin Clock stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BerlinClockStage {
    #[serde(default = "default_start")]
    pub start: ClockTime,

    #[serde(default = "default_end")]
    pub end: ClockTime,

    /// Seconds between enumerated times
    #[serde(default = "default_step")]
    pub step_seconds: u32,

    #[serde(default = "default_directions")]
    pub directions: Vec<ShiftDirection>,

    #[serde(default = "default_encodings")]
    pub encodings: Vec<KeystreamEncoding>,
}

fn default_start() -> ClockTime {
    ClockTime::from_seconds(0)
}

fn default_end() -> ClockTime {
    ClockTime::from_seconds(ClockTime::SECONDS_PER_DAY - 1)
}

fn default_step() -> u32 {
    60
}

fn default_directions() -> Vec<ShiftDirection> {
    vec![ShiftDirection::Add, ShiftDirection::Subtract]
}

fn default_encodings() -> Vec<KeystreamEncoding> {
    vec![KeystreamEncoding::LampCounts]
}

impl Default for BerlinClockStage {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
            step_seconds: default_step(),
            directions: default_directions(),
            encodings: default_encodings(),
        }
    }
}

impl BerlinClockStage {
    /// Times from start to end inclusive, `step_seconds` apart
    pub fn times(&self) -> impl Iterator<Item = ClockTime> + '_ {
        let step = self.step_seconds.max(1) as usize;
        (self.start.as_seconds()..=self.end.as_seconds())
            .step_by(step)
            .map(ClockTime::from_seconds)
    }
}

impl CipherStage for BerlinClockStage {
    fn kind(&self) -> &'static str {
        "berlin_clock"
    }

    fn validate(&self, _ctx: &ValidationContext<'_>) -> EngineResult<()> {
        if self.start > self.end {
            return Err(EngineError::Configuration(format!(
                "Inverted Berlin Clock time range {}..{}",
                self.start, self.end
            )));
        }
        if self.step_seconds == 0 {
            return Err(EngineError::Configuration(
                "Berlin Clock step_seconds must be positive".to_string(),
            ));
        }
        if self.directions.is_empty() || self.encodings.is_empty() {
            return Err(EngineError::Configuration(
                "Berlin Clock stage needs at least one direction and one encoding".to_string(),
            ));
        }
        Ok(())
    }

    fn search(&self, inputs: &[Candidate], ctx: &StageContext<'_>, budget: &Budget) -> StageResult {
        let tracker = BudgetTracker::start(budget);
        let prepared: Vec<Vec<u8>> = inputs.iter().map(|c| to_indices(&c.text)).collect();

        let trials = (0..inputs.len()).flat_map(|input_index| {
            self.times().flat_map(move |time| {
                self.encodings.iter().flat_map(move |&encoding| {
                    self.directions
                        .iter()
                        .map(move |&direction| (input_index, time, encoding, direction))
                })
            })
        });

        let kept = executor::run_trials(
            ctx,
            &tracker,
            trials,
            |trial, (input_index, time, encoding, direction)| {
                let keystream = LampState::at(time).keystream(encoding);
                let text = from_indices(&apply_keystream(&prepared[input_index], &keystream, direction));
                let params = AttemptParams::BerlinClock {
                    time,
                    direction,
                    encoding,
                };
                executor::evaluate(ctx, input_index, &inputs[input_index], trial, params, text, None)
            },
        );
        executor::finish_stage(ctx, inputs.len(), kept, &tracker)
    }
}
