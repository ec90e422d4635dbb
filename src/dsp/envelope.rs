//! Gain automation and the envelope shapes scheduled on it.
//!
//! [`AudioParam`] is a timeline of value changes in the style of the Web
//! Audio API: instantaneous sets, and linear or exponential ramps that run
//! from the previous event to the ramp's end time. Voices get their
//! attack/decay/sustain/release shape by scheduling onto one of these at
//! note-on, and their click-free cutoff by rescheduling at note-off.

use crate::config::SynthConfig;
use crate::error::SynthError;
use crate::preset::Preset;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RampKind {
    Set,
    Linear,
    Exponential,
}

/// One scheduled change: at `time` the parameter is at `value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamEvent {
    pub kind: RampKind,
    pub time: f64,
    pub value: f64,
}

/// An automatable parameter.
#[derive(Debug, Clone)]
pub struct AudioParam {
    default_value: f64,
    /// Sorted by time; events at equal times keep insertion order.
    events: Vec<ParamEvent>,
}

impl AudioParam {
    pub fn new(default_value: f64) -> Self {
        AudioParam {
            default_value,
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[ParamEvent] {
        &self.events
    }

    fn schedule(&mut self, kind: RampKind, value: f64, time: f64) -> Result<(), SynthError> {
        if !value.is_finite() {
            return Err(SynthError::InvalidParameter(format!("non-finite value {value}")));
        }
        if !(time.is_finite() && time >= 0.0) {
            return Err(SynthError::InvalidParameter(format!("invalid time {time}")));
        }
        let at = self.events.partition_point(|e| e.time <= time);
        self.events.insert(at, ParamEvent { kind, time, value });
        Ok(())
    }

    pub fn set_value_at_time(&mut self, value: f64, time: f64) -> Result<(), SynthError> {
        self.schedule(RampKind::Set, value, time)
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f64, end_time: f64) -> Result<(), SynthError> {
        self.schedule(RampKind::Linear, value, end_time)
    }

    /// Exponential curves never reach zero, so `value` must be positive.
    pub fn exponential_ramp_to_value_at_time(
        &mut self,
        value: f64,
        end_time: f64,
    ) -> Result<(), SynthError> {
        if value <= 0.0 {
            return Err(SynthError::InvalidParameter(format!(
                "exponential ramp target must be positive, got {value}"
            )));
        }
        self.schedule(RampKind::Exponential, value, end_time)
    }

    /// Drop every event at or after `cancel_time`.
    pub fn cancel_scheduled_values(&mut self, cancel_time: f64) {
        self.events.retain(|e| e.time < cancel_time);
    }

    /// The parameter's value at time `t`.
    pub fn value_at(&self, t: f64) -> f64 {
        let idx = self.events.partition_point(|e| e.time <= t);
        let (start_time, start_value) = match idx {
            0 => (0.0, self.default_value),
            _ => (self.events[idx - 1].time, self.events[idx - 1].value),
        };

        let Some(next) = self.events.get(idx) else {
            return start_value;
        };
        let span = next.time - start_time;
        if span <= 0.0 {
            return start_value;
        }
        let progress = ((t - start_time) / span).clamp(0.0, 1.0);

        match next.kind {
            RampKind::Set => start_value,
            RampKind::Linear => start_value + (next.value - start_value) * progress,
            RampKind::Exponential => {
                // Undefined from zero or across a sign change: hold.
                if start_value <= 0.0 {
                    start_value
                } else {
                    start_value * (next.value / start_value).powf(progress)
                }
            }
        }
    }
}

/// The concrete envelope of one triggered note, times relative to the trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEnvelope {
    pub peak: f64,
    pub attack: f64,
    pub decay: f64,
    /// Absolute sustain level (peak × preset sustain fraction).
    pub sustain_level: f64,
    pub release: f64,
    /// Trigger to silence.
    pub duration: f64,
    pub floor: f64,
}

impl NoteEnvelope {
    /// Combine a preset with a requested duration.
    ///
    /// `duration` is trigger-to-silence. It is stretched to at least
    /// attack + decay + the fade-out length so the sustain level is always
    /// reached and the tail is never shorter than a note-off fade.
    pub fn new(preset: &Preset, config: &SynthConfig, duration: f64) -> Self {
        let minimum = preset.attack + preset.decay + config.fade_out;
        NoteEnvelope {
            peak: config.peak_gain,
            attack: preset.attack,
            decay: preset.decay,
            sustain_level: (config.peak_gain * preset.sustain).max(config.silence_floor),
            release: preset.release,
            duration: duration.max(minimum),
            floor: config.silence_floor,
        }
    }

    /// Offset from the trigger at which the exponential tail begins.
    pub fn release_start(&self) -> f64 {
        (self.duration - self.release).max(self.attack + self.decay)
    }
}

/// Schedule a full note shape starting at `now`.
///
/// Zero, linear up to peak over the attack, linear down to the sustain
/// level over the decay, hold, then exponential down to the floor so that
/// the floor is reached exactly at `now + duration`.
pub fn schedule_note_envelope(
    param: &mut AudioParam,
    envelope: &NoteEnvelope,
    now: f64,
) -> Result<(), SynthError> {
    let decay_end = now + envelope.attack + envelope.decay;
    let release_start = now + envelope.release_start();

    param.set_value_at_time(0.0, now)?;
    param.linear_ramp_to_value_at_time(envelope.peak, now + envelope.attack)?;
    param.linear_ramp_to_value_at_time(envelope.sustain_level, decay_end)?;
    if release_start > decay_end {
        param.set_value_at_time(envelope.sustain_level, release_start)?;
    }
    param.exponential_ramp_to_value_at_time(envelope.floor, now + envelope.duration)
}

/// Replace whatever is scheduled from `now` on with a short exponential
/// fade from the current level down to `floor`, ending at `now + fade`.
pub fn schedule_fade_out(
    param: &mut AudioParam,
    now: f64,
    fade: f64,
    floor: f64,
) -> Result<(), SynthError> {
    let current = param.value_at(now).max(floor);
    param.cancel_scheduled_values(now);
    param.set_value_at_time(current, now)?;
    param.exponential_ramp_to_value_at_time(floor, now + fade)
}
