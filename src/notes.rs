//! Frequency table: equal-tempered pitch math and the computer-keyboard
//! layout that binds physical keys to notes.

use std::collections::HashMap;
use std::sync::LazyLock;

use log::warn;
use serde::Serialize;

use crate::error::{LayoutError, SynthError};

/// Reference pitch for A4.
pub const A4_FREQUENCY: f64 = 440.0;

/// Frequency `semitone_offset` equal-tempered semitones away from A4.
///
/// Fractional offsets are accepted as-is (microtonal pitches).
pub fn frequency_of(semitone_offset: f64) -> f64 {
    A4_FREQUENCY * (2.0_f64).powf(semitone_offset / 12.0)
}

/// Parse a scientific pitch name ("C4", "F#3", "Bb5") into its semitone
/// offset from A4.
pub fn semitone_offset(name: &str) -> Option<i32> {
    let mut chars = name.chars();
    let letter = chars.next()?;
    let natural = match letter.to_ascii_uppercase() {
        'C' => -9,
        'D' => -7,
        'E' => -5,
        'F' => -4,
        'G' => -2,
        'A' => 0,
        'B' => 2,
        _ => return None,
    };

    let rest = chars.as_str();
    let (accidental, octave) = if let Some(r) = rest.strip_prefix(['#', '♯']) {
        (1, r)
    } else if let Some(r) = rest.strip_prefix(['b', '♭']) {
        (-1, r)
    } else {
        (0, rest)
    };

    let octave: i32 = octave.parse().ok()?;
    octave
        .checked_sub(4)?
        .checked_mul(12)?
        .checked_add(natural + accidental)
}

/// Frequency of a named note, e.g. `note_frequency("A4") == Some(440.0)`.
pub fn note_frequency(name: &str) -> Option<f64> {
    semitone_offset(name).map(|offset| frequency_of(offset as f64))
}

/// Natural (white key) or accidental (black key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    Natural,
    Accidental,
}

impl NoteKind {
    /// Classify by spelling: a sharp or flat marker after the letter.
    pub fn from_name(name: &str) -> Self {
        let marked = name
            .chars()
            .skip(1)
            .any(|c| matches!(c, '#' | '♯' | 'b' | '♭'));
        if marked {
            NoteKind::Accidental
        } else {
            NoteKind::Natural
        }
    }
}

/// One playable note.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub name: String,
    pub frequency: f64,
    pub keyboard_key: Option<String>,
    pub kind: NoteKind,
}

impl Note {
    pub fn is_accidental(&self) -> bool {
        self.kind == NoteKind::Accidental
    }
}

/// C4 through E5, laid out over the bottom two rows of a QWERTY keyboard.
const STANDARD_LAYOUT: [(&str, i32, &str); 17] = [
    ("C4", -9, "z"),
    ("C#4", -8, "s"),
    ("D4", -7, "x"),
    ("D#4", -6, "d"),
    ("E4", -5, "c"),
    ("F4", -4, "v"),
    ("F#4", -3, "g"),
    ("G4", -2, "b"),
    ("G#4", -1, "h"),
    ("A4", 0, "n"),
    ("A#4", 1, "j"),
    ("B4", 2, "m"),
    ("C5", 3, ","),
    ("C#5", 4, "l"),
    ("D5", 5, "."),
    ("D#5", 6, ";"),
    ("E5", 7, "/"),
];

/// An ordered set of notes with their key bindings.
#[derive(Debug, Clone)]
pub struct Keyboard {
    notes: Vec<Note>,
    offsets: Vec<i32>,
    by_key: HashMap<String, usize>,
}

impl Keyboard {
    /// The built-in layout.
    pub fn standard() -> Self {
        let entries = STANDARD_LAYOUT
            .iter()
            .map(|&(name, offset, key)| (name.to_string(), offset, Some(key.to_string())))
            .collect();
        Keyboard::assemble(entries)
    }

    /// Build a layout from `(note name, optional key)` pairs, in playing order.
    ///
    /// Unparseable names and duplicate keys or pitches are rejected. The
    /// softer checks from [`Keyboard::audit`] are only logged.
    pub fn from_layout<'a, I>(layout: I) -> Result<Self, SynthError>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let mut entries: Vec<(String, i32, Option<String>)> = Vec::new();
        let mut seen_offsets: HashMap<i32, String> = HashMap::new();
        let mut seen_keys: HashMap<String, String> = HashMap::new();

        for (name, key) in layout {
            let offset = semitone_offset(name)
                .ok_or_else(|| LayoutError::UnparseableName(name.to_string()))?;
            if let Some(first) = seen_offsets.insert(offset, name.to_string()) {
                return Err(LayoutError::DuplicateFrequency {
                    first,
                    second: name.to_string(),
                }
                .into());
            }
            let key = key.map(str::to_lowercase);
            if let Some(k) = &key {
                if let Some(first) = seen_keys.insert(k.clone(), name.to_string()) {
                    return Err(LayoutError::DuplicateKey {
                        key: k.clone(),
                        first,
                        second: name.to_string(),
                    }
                    .into());
                }
            }
            entries.push((name.to_string(), offset, key));
        }

        let keyboard = Keyboard::assemble(entries);
        for issue in keyboard.audit() {
            warn!("keyboard layout: {issue}");
        }
        Ok(keyboard)
    }

    fn assemble(entries: Vec<(String, i32, Option<String>)>) -> Self {
        let mut notes = Vec::with_capacity(entries.len());
        let mut offsets = Vec::with_capacity(entries.len());
        let mut by_key = HashMap::new();
        for (i, (name, offset, key)) in entries.into_iter().enumerate() {
            if let Some(k) = &key {
                by_key.insert(k.clone(), i);
            }
            notes.push(Note {
                kind: NoteKind::from_name(&name),
                frequency: frequency_of(offset as f64),
                keyboard_key: key,
                name,
            });
            offsets.push(offset);
        }
        Keyboard {
            notes,
            offsets,
            by_key,
        }
    }

    /// Advisory consistency findings: gaps in the chromatic run, and names
    /// whose sharp/flat spelling disagrees with the key colour of the pitch.
    pub fn audit(&self) -> Vec<LayoutError> {
        let mut issues = Vec::new();

        for pair in self.offsets.windows(2).zip(self.notes.windows(2)) {
            let (offsets, notes) = pair;
            if offsets[1] - offsets[0] != 1 {
                issues.push(LayoutError::NotContiguous {
                    from: notes[0].name.clone(),
                    to: notes[1].name.clone(),
                });
            }
        }

        for (note, &offset) in self.notes.iter().zip(&self.offsets) {
            // Semitones above C, where C#, D#, F#, G#, A# sit on black keys.
            let black = matches!((offset + 9).rem_euclid(12), 1 | 3 | 6 | 8 | 10);
            if black != note.is_accidental() {
                issues.push(LayoutError::MisleadingName(note.name.clone()));
            }
        }

        issues
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Case-insensitive key lookup. Unbound keys give `None`.
    pub fn note_for_key(&self, key: &str) -> Option<&Note> {
        self.by_key
            .get(&key.to_lowercase())
            .map(|&i| &self.notes[i])
    }

    pub fn note_named(&self, name: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.name == name)
    }

    pub fn naturals(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|n| !n.is_accidental())
    }

    pub fn accidentals(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|n| n.is_accidental())
    }
}

static STANDARD_KEYBOARD: LazyLock<Keyboard> = LazyLock::new(Keyboard::standard);

/// The process-wide built-in layout.
pub fn standard_keyboard() -> &'static Keyboard {
    &STANDARD_KEYBOARD
}

/// Look up a key in the built-in layout.
pub fn note_for_key(key: &str) -> Option<&'static Note> {
    STANDARD_KEYBOARD.note_for_key(key)
}
