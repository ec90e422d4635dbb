//! Voice — one sounding note: an oscillator routed through its envelope gain.

use crate::error::SynthError;

use super::context::{GainId, OscillatorId};
use super::oscillator::Waveform;

/// Voices are keyed by the exact frequency they sound.
///
/// Only finite positive frequencies are keys, so ordering the raw bits
/// orders by pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrequencyKey(u64);

impl FrequencyKey {
    pub fn new(frequency: f64) -> Result<Self, SynthError> {
        if frequency.is_finite() && frequency > 0.0 {
            Ok(FrequencyKey(frequency.to_bits()))
        } else {
            Err(SynthError::InvalidFrequency(frequency))
        }
    }

    pub fn frequency(self) -> f64 {
        f64::from_bits(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Following its note envelope towards the scheduled stop.
    Sounding,
    /// Ramping down after a note-off, stop-all or retrigger.
    Fading,
}

/// A note that is currently sounding or fading out.
#[derive(Debug, Clone)]
pub struct Voice {
    pub key: FrequencyKey,
    pub oscillator: OscillatorId,
    pub gain: GainId,
    pub waveform: Waveform,
    /// Id of the preset the note was triggered with.
    pub preset: String,
    pub started_at: f64,
    /// Absolute clock time the oscillator is scheduled to stop.
    pub stop_time: f64,
    pub state: VoiceState,
}

impl Voice {
    pub fn frequency(&self) -> f64 {
        self.key.frequency()
    }

    pub fn is_fading(&self) -> bool {
        self.state == VoiceState::Fading
    }
}
