//! Timbre presets: waveform plus envelope, kept in a registry keyed by id.
//!
//! The built-in registry is what the piano ships with. A registry can also
//! be loaded from JSON, an array of preset objects:
//!
//! ```json
//! [{ "id": "pad", "name": "Pad", "waveform": "triangle",
//!    "attack": 0.4, "decay": 0.3, "sustain": 0.8, "release": 1.0 }]
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::dsp::oscillator::Waveform;
use crate::error::SynthError;

/// A named waveform + ADSR bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    /// Registry key (e.g. "synth").
    pub id: String,
    /// Display name (e.g. "Synth").
    pub name: String,
    pub waveform: Waveform,
    /// Attack time in seconds.
    pub attack: f64,
    /// Decay time in seconds.
    pub decay: f64,
    /// Sustain level as a fraction of peak [0, 1].
    pub sustain: f64,
    /// Release time in seconds.
    pub release: f64,
    /// Detune in cents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detune: Option<f64>,
}

impl Preset {
    fn builtin(
        id: &str,
        name: &str,
        waveform: Waveform,
        (attack, decay, sustain, release): (f64, f64, f64, f64),
        detune: Option<f64>,
    ) -> Self {
        Preset {
            id: id.to_string(),
            name: name.to_string(),
            waveform,
            attack,
            decay,
            sustain,
            release,
            detune,
        }
    }

    pub fn validate(&self) -> Result<(), SynthError> {
        let bad = |what: &str| -> Result<(), SynthError> {
            Err(SynthError::InvalidPreset(format!("{}: {what}", self.id)))
        };
        if self.id.is_empty() {
            return Err(SynthError::InvalidPreset("empty preset id".to_string()));
        }
        for (label, t) in [
            ("attack", self.attack),
            ("decay", self.decay),
            ("release", self.release),
        ] {
            if !(t.is_finite() && t >= 0.0) {
                return bad(&format!("{label} must be a non-negative time, got {t}"));
            }
        }
        if !(0.0..=1.0).contains(&self.sustain) {
            return bad(&format!("sustain must be in [0, 1], got {}", self.sustain));
        }
        if let Some(d) = self.detune {
            if !d.is_finite() {
                return bad("detune must be finite");
            }
        }
        Ok(())
    }
}

/// Ordered preset collection. Never empty; the first entry is the default.
#[derive(Debug, Clone)]
pub struct PresetRegistry {
    presets: Vec<Preset>,
}

impl PresetRegistry {
    /// The presets the piano ships with. "piano" comes first.
    pub fn builtin() -> Self {
        PresetRegistry {
            presets: vec![
                Preset::builtin("piano", "Piano", Waveform::Triangle, (0.01, 0.3, 0.4, 0.8), None),
                Preset::builtin("synth", "Synth", Waveform::Sawtooth, (0.02, 0.2, 0.6, 0.3), Some(4.0)),
                Preset::builtin("organ", "Organ", Waveform::Sine, (0.05, 0.1, 0.9, 0.2), None),
                Preset::builtin("bell", "Bell", Waveform::Sine, (0.005, 0.6, 0.15, 1.2), Some(-3.0)),
                Preset::builtin("chiptune", "Chiptune", Waveform::Square, (0.005, 0.1, 0.5, 0.1), None),
            ],
        }
    }

    pub fn new(presets: Vec<Preset>) -> Result<Self, SynthError> {
        if presets.is_empty() {
            return Err(SynthError::InvalidPreset("registry has no presets".to_string()));
        }
        let mut ids = HashSet::new();
        for preset in &presets {
            preset.validate()?;
            if !ids.insert(preset.id.as_str()) {
                return Err(SynthError::InvalidPreset(format!("duplicate id '{}'", preset.id)));
            }
        }
        Ok(PresetRegistry { presets })
    }

    pub fn from_json(json: &str) -> Result<Self, SynthError> {
        let presets: Vec<Preset> = serde_json::from_str(json)?;
        PresetRegistry::new(presets)
    }

    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == id)
    }

    pub(crate) fn index_of(&self, id: &str) -> Option<usize> {
        self.presets.iter().position(|p| p.id == id)
    }

    pub(crate) fn at(&self, index: usize) -> &Preset {
        &self.presets[index]
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.presets.iter().map(|p| p.id.as_str())
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl Default for PresetRegistry {
    fn default() -> Self {
        PresetRegistry::builtin()
    }
}
