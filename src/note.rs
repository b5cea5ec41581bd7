//! Note identity: MIDI note number with scientific pitch names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Frequency of A4 in Hz.
pub const TUNING_PITCH: f64 = 440.0;

const SHARP_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Identity of a physical key. The MIDI number (C4 = 60) doubles as the
/// key index on the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NoteId(u8);

impl NoteId {
    /// `None` above 127.
    pub fn from_midi(midi: u8) -> Option<NoteId> {
        (midi <= 127).then_some(NoteId(midi))
    }

    pub fn midi(self) -> u8 {
        self.0
    }

    /// Equal-tempered frequency relative to A4 = 440 Hz.
    pub fn frequency(self) -> f64 {
        midi_to_frequency(self.0 as i32, TUNING_PITCH)
    }
}

/// Parse a note name (e.g. "C4", "F#3", "Bb5") into a MIDI note number.
pub fn note_to_midi(note: &str) -> Option<i32> {
    let bytes = note.as_bytes();
    let base_semitone = match bytes.first()? {
        b'C' => 0,
        b'D' => 2,
        b'E' => 4,
        b'F' => 5,
        b'G' => 7,
        b'A' => 9,
        b'B' => 11,
        _ => return None,
    };

    let (semitone, idx) = match bytes.get(1) {
        Some(b'#') => (base_semitone + 1, 2),
        Some(b'b') => (base_semitone - 1, 2),
        _ => (base_semitone, 1),
    };

    let octave: i32 = note[idx..].parse().ok()?;
    octave.checked_add(1)?.checked_mul(12)?.checked_add(semitone)
}

/// `tuning_pitch * 2^((midi - 69) / 12)`
pub fn midi_to_frequency(midi: i32, tuning_pitch: f64) -> f64 {
    tuning_pitch * (2.0_f64).powf((midi as f64 - 69.0) / 12.0)
}

impl FromStr for NoteId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        note_to_midi(s.trim())
            .and_then(|m| u8::try_from(m).ok())
            .and_then(NoteId::from_midi)
            .ok_or_else(|| EngineError::InvalidNote(s.to_string()))
    }
}

impl TryFrom<String> for NoteId {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NoteId> for String {
    fn from(n: NoteId) -> Self {
        n.to_string()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let octave = self.0 as i32 / 12 - 1;
        write!(f, "{}{}", SHARP_NAMES[self.0 as usize % 12], octave)
    }
}
