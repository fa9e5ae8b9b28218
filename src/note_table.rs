//! Note Table
//!
//! Equal-tempered (note name, frequency) tables built from a reference pitch.
//!
//! Octaves follow scientific pitch notation: the octave number increments at C,
//! so the standard piano range `A0..=C8` spans exactly 88 keys.

use log::debug;
use thiserror::Error;

const SEMITONES: i32 = 12;

/// Chromatic naming cycle, starting at the reference pitch class A.
const NOTE_NAMES: [&str; SEMITONES as usize] = [
    "A", "A#", "B", "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#",
];

/// Position of A within an octave counted from C.
const A_OFFSET_FROM_C: i32 = 9;

/// Octaves accepted in note names.
const LOWEST_OCTAVE: i32 = -1;
const HIGHEST_OCTAVE: i32 = 9;

/// A4, A0 and C8 as semitones above C0.
const PIANO_REFERENCE_SEMITONE: i32 = 57;
const PIANO_LOWEST_SEMITONE: i32 = 9;
const PIANO_HIGHEST_SEMITONE: i32 = 96;

/// Reference pitch of the standard piano table.
pub const PIANO_REFERENCE: (&str, f64) = ("A4", 440.0);

/// Lowest key of the standard piano table.
pub const PIANO_LOWEST: &str = "A0";

/// Highest key of the standard piano table.
pub const PIANO_HIGHEST: &str = "C8";

/// Errors when building a note table
#[derive(Debug, Error, PartialEq)]
pub enum NoteTableError {
    /// A note name could not be parsed as pitch class + octave.
    #[error("invalid note name `{0}`")]
    InvalidNote(String),

    /// The start note sorts after the end note.
    #[error("invalid note range: `{start}` is above `{end}`")]
    InvalidRange {
        /// The requested first note.
        start: String,
        /// The requested last note.
        end: String,
    },

    /// The reference frequency is not a positive, finite number, or it is too
    /// low or too high to give every note in the range a distinct frequency.
    #[error("invalid reference frequency {0}")]
    InvalidFrequency(f64),
}

/// A single named note and its frequency in Hz.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteFrequency {
    /// Note name with octave, e.g. `"A4"` or `"C#3"`.
    pub name: String,
    /// Frequency in Hz, rounded to two decimals.
    pub frequency: f64,
}

/// An immutable, ascending table of notes.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteTable {
    notes: Vec<NoteFrequency>,
}

impl NoteTable {
    /// Build the table for every note from `start_note` to `end_note` inclusive,
    /// tuned so that `reference_name` sounds at `reference_frequency`.
    ///
    /// Returns:
    /// - `Err(InvalidNote)` if any of the three names cannot be parsed or has an
    ///   octave outside `-1..=9`.
    /// - `Err(InvalidRange)` if `start_note` is above `end_note`.
    /// - `Err(InvalidFrequency)` if `reference_frequency` is not positive and finite,
    ///   or if rounding leaves two neighbouring notes without distinct, finite
    ///   frequencies.
    pub fn build(
        reference_name: &str,
        reference_frequency: f64,
        start_note: &str,
        end_note: &str,
    ) -> Result<NoteTable, NoteTableError> {
        if !reference_frequency.is_finite() || reference_frequency <= 0.0 {
            return Err(NoteTableError::InvalidFrequency(reference_frequency));
        }
        let reference = parse_note(reference_name)?;
        let start = parse_note(start_note)?;
        let end = parse_note(end_note)?;
        if start > end {
            return Err(NoteTableError::InvalidRange {
                start: start_note.to_string(),
                end: end_note.to_string(),
            });
        }

        let notes = tune(reference, reference_frequency, start, end);
        let ascending = notes.iter().all(|n| n.frequency.is_finite() && n.frequency > 0.0)
            && notes.windows(2).all(|w| w[0].frequency < w[1].frequency);
        if !ascending {
            return Err(NoteTableError::InvalidFrequency(reference_frequency));
        }

        debug!(
            "built note table {start_note}..={end_note} ({} notes, {reference_name} = {reference_frequency} Hz)",
            notes.len()
        );
        Ok(NoteTable { notes })
    }

    /// The 88-key piano table, A0 to C8, tuned to A4 = 440 Hz.
    pub fn piano() -> NoteTable {
        NoteTable {
            notes: tune(
                PIANO_REFERENCE_SEMITONE,
                PIANO_REFERENCE.1,
                PIANO_LOWEST_SEMITONE,
                PIANO_HIGHEST_SEMITONE,
            ),
        }
    }

    /// Number of notes in the table.
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Whether the table holds no notes. Built tables never are.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Iterate the notes in ascending pitch order.
    pub fn iter(&self) -> std::slice::Iter<'_, NoteFrequency> {
        self.notes.iter()
    }

    /// The notes as a slice, ascending.
    pub fn as_slice(&self) -> &[NoteFrequency] {
        &self.notes
    }

    /// Lowest note.
    pub fn first(&self) -> Option<&NoteFrequency> {
        self.notes.first()
    }

    /// Highest note.
    pub fn last(&self) -> Option<&NoteFrequency> {
        self.notes.last()
    }

    /// Look a note up by name. Flats are accepted (`"Bb3"` finds `"A#3"`).
    pub fn get(&self, name: &str) -> Option<&NoteFrequency> {
        let semitone = parse_note(name).ok()?;
        let canonical = note_name(semitone);
        self.notes.iter().find(|n| n.name == canonical)
    }

    /// Frequency of the named note, if it is in the table.
    pub fn frequency_of(&self, name: &str) -> Option<f64> {
        self.get(name).map(|n| n.frequency)
    }

    /// The note closest to `frequency`, with its absolute distance in Hz.
    ///
    /// On an exact tie the lower note wins, since it is encountered first.
    pub fn nearest(&self, frequency: f64) -> Option<(&NoteFrequency, f64)> {
        let mut best: Option<(&NoteFrequency, f64)> = None;
        for note in &self.notes {
            let difference = (frequency - note.frequency).abs();
            match best {
                Some((_, min)) if difference >= min => {}
                _ => best = Some((note, difference)),
            }
        }
        best
    }
}

impl<'a> IntoIterator for &'a NoteTable {
    type Item = &'a NoteFrequency;
    type IntoIter = std::slice::Iter<'a, NoteFrequency>;

    fn into_iter(self) -> Self::IntoIter {
        self.notes.iter()
    }
}

/// Name and tune every semitone in `start..=end` against `reference`.
fn tune(reference: i32, reference_frequency: f64, start: i32, end: i32) -> Vec<NoteFrequency> {
    (start..=end)
        .map(|semitone| NoteFrequency {
            name: note_name(semitone),
            frequency: equal_tempered(reference_frequency, semitone - reference),
        })
        .collect()
}

/// Frequency `steps` semitones away from `reference`, rounded to two decimals
/// (half away from zero).
pub fn equal_tempered(reference: f64, steps: i32) -> f64 {
    let exact = reference * 2f64.powf(steps as f64 / SEMITONES as f64);
    (exact * 100.0).round() / 100.0
}

/// Parse `"C#4"`, `"Bb3"`, `"A0"` or `"C-1"` into an absolute semitone number
/// where 0 is C0. Octaves run from -1 to 9.
fn parse_note(name: &str) -> Result<i32, NoteTableError> {
    let invalid = || NoteTableError::InvalidNote(name.to_string());
    let mut chars = name.chars();

    let natural = match chars.next().ok_or_else(invalid)? {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(invalid()),
    };

    let rest = chars.as_str();
    let (accidental, octave) = if let Some(octave) = rest.strip_prefix('#') {
        (1, octave)
    } else if let Some(octave) = rest.strip_prefix('b') {
        (-1, octave)
    } else {
        (0, rest)
    };

    if octave.is_empty() || octave.starts_with('+') {
        return Err(invalid());
    }
    let octave: i32 = octave.parse().map_err(|_| invalid())?;
    if !(LOWEST_OCTAVE..=HIGHEST_OCTAVE).contains(&octave) {
        return Err(invalid());
    }
    Ok(octave * SEMITONES + natural + accidental)
}

/// Canonical sharp spelling of an absolute semitone number.
fn note_name(semitone: i32) -> String {
    let octave = semitone.div_euclid(SEMITONES);
    let from_a = (semitone.rem_euclid(SEMITONES) - A_OFFSET_FROM_C).rem_euclid(SEMITONES);
    format!("{}{}", NOTE_NAMES[from_a as usize], octave)
}
