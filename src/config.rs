//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::SynthError;

/// Highest sample rate a context will run at.
pub const MAX_SAMPLE_RATE: f64 = 768_000.0;

/// Tunables shared by the engine and the render context.
///
/// Deserializes from camelCase JSON; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SynthConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f64,
    /// Envelope peak (full amplitude of a single voice).
    pub peak_gain: f64,
    /// Gain applied to the summed voices before soft clipping.
    pub master_gain: f64,
    /// Length of the note-off fade in seconds.
    pub fade_out: f64,
    /// Near-zero level exponential ramps aim for. Must stay above zero.
    pub silence_floor: f64,
    /// Duration used by `play_note` when the caller gives none.
    pub default_duration: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            sample_rate: 44100.0,
            peak_gain: 0.3,
            master_gain: 0.8,
            fade_out: 0.03,
            silence_floor: 0.001,
            default_duration: 0.5,
        }
    }
}

impl SynthConfig {
    /// Default config at the given sample rate.
    pub fn with_sample_rate(sample_rate: f64) -> Self {
        SynthConfig {
            sample_rate,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, SynthError> {
        let config: SynthConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SynthError> {
        if !(self.sample_rate > 0.0 && self.sample_rate <= MAX_SAMPLE_RATE) {
            return Err(SynthError::Config(format!(
                "sample rate must be in (0, {MAX_SAMPLE_RATE}], got {}",
                self.sample_rate
            )));
        }
        if !(self.peak_gain > 0.0 && self.peak_gain <= 1.0) {
            return Err(SynthError::Config(format!(
                "peak gain must be in (0, 1], got {}",
                self.peak_gain
            )));
        }
        if !(self.silence_floor > 0.0 && self.silence_floor < self.peak_gain) {
            return Err(SynthError::Config(format!(
                "silence floor must be in (0, peak gain), got {}",
                self.silence_floor
            )));
        }
        if !(self.master_gain.is_finite() && self.master_gain >= 0.0) {
            return Err(SynthError::Config(format!(
                "master gain must be non-negative, got {}",
                self.master_gain
            )));
        }
        if !(self.fade_out.is_finite() && self.fade_out > 0.0) {
            return Err(SynthError::Config(format!(
                "fade out must be positive, got {}",
                self.fade_out
            )));
        }
        if !(self.default_duration.is_finite() && self.default_duration > 0.0) {
            return Err(SynthError::Config(format!(
                "default duration must be positive, got {}",
                self.default_duration
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SynthConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = SynthConfig::from_json(r#"{ "sampleRate": 48000, "fadeOut": 0.05 }"#).unwrap();
        assert_eq!(config.sample_rate, 48000.0);
        assert_eq!(config.fade_out, 0.05);
        assert_eq!(config.peak_gain, 0.3);
        assert_eq!(config.default_duration, 0.5);
    }

    #[test]
    fn rejects_zero_floor() {
        let err = SynthConfig::from_json(r#"{ "silenceFloor": 0 }"#).unwrap_err();
        assert!(matches!(err, SynthError::Config(_)), "got {err}");
    }

    #[test]
    fn rejects_unusable_sample_rates() {
        for rate in [0.0, -44100.0, f64::NAN, f64::INFINITY, MAX_SAMPLE_RATE * 2.0] {
            let err = SynthConfig::with_sample_rate(rate).validate().unwrap_err();
            assert!(matches!(err, SynthError::Config(_)), "{rate}: {err}");
        }
        assert!(SynthConfig::with_sample_rate(MAX_SAMPLE_RATE).validate().is_ok());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = SynthConfig::from_json("{ sampleRate: ").unwrap_err();
        assert!(matches!(err, SynthError::Json(_)), "got {err}");
    }
}
