//! Synthesis engine — owns the audio context and the set of active voices.
//!
//! The input layer drives it with four calls: [`SynthEngine::note_on`],
//! [`SynthEngine::note_off`], [`SynthEngine::stop_all_notes`] and
//! [`SynthEngine::set_preset`]. None of them fail from the caller's point
//! of view: sound is best-effort, so problems are logged and the call
//! degrades to silence.
//!
//! Everything time-based (envelope ramps, oscillator stops, removing a
//! voice once it has ended or finished fading) is scheduled on the audio
//! context's clock. The engine fires its own continuations from
//! [`SynthEngine::poll`], which the render loop calls as the clock moves.

use std::collections::BTreeMap;

use log::{debug, trace, warn};

use crate::config::SynthConfig;
use crate::error::SynthError;
use crate::preset::{Preset, PresetRegistry};

use super::context::{AudioContext, ContextState, GainId, OscillatorId, RenderContext};
use super::envelope::{NoteEnvelope, schedule_fade_out, schedule_note_envelope};
use super::timeline::Timeline;
use super::voice::{FrequencyKey, Voice, VoiceState};

/// Outcome of [`SynthEngine::ensure_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The context is running; notes can start now.
    Ready,
    /// A resume is in flight; notes are queued until it completes.
    Pending,
}

#[derive(Debug, Clone, Copy)]
enum Continuation {
    /// The oscillator reached its scheduled stop time.
    Ended {
        key: FrequencyKey,
        oscillator: OscillatorId,
    },
    /// A fade-out has run its course: stop the oscillator and drop the voice.
    FadeComplete {
        key: FrequencyKey,
        oscillator: OscillatorId,
    },
}

impl Continuation {
    fn oscillator(&self) -> OscillatorId {
        match *self {
            Continuation::Ended { oscillator, .. } | Continuation::FadeComplete { oscillator, .. } => {
                oscillator
            }
        }
    }
}

/// A note-on that arrived while the context was still resuming.
#[derive(Debug, Clone, Copy)]
struct PendingNote {
    key: FrequencyKey,
    duration: f64,
    preset: usize,
}

type Opener<C> = Box<dyn FnMut() -> Result<C, SynthError>>;

pub struct SynthEngine<C: AudioContext> {
    config: SynthConfig,
    opener: Opener<C>,
    /// Opened on the first sound request and kept for the engine's lifetime.
    context: Option<C>,
    presets: PresetRegistry,
    current: usize,
    voices: BTreeMap<FrequencyKey, Voice>,
    /// Retriggered or stop-all'd voices that are still fading but no
    /// longer registered under their frequency.
    released: Vec<Voice>,
    pending: Vec<PendingNote>,
    timeline: Timeline<Continuation>,
}

impl<C: AudioContext> SynthEngine<C> {
    /// An engine with the built-in presets. `opener` acquires the audio
    /// context the first time a note needs it.
    pub fn new<F>(config: SynthConfig, opener: F) -> Self
    where
        F: FnMut() -> Result<C, SynthError> + 'static,
    {
        SynthEngine::with_presets(config, PresetRegistry::builtin(), opener)
    }

    pub fn with_presets<F>(config: SynthConfig, presets: PresetRegistry, opener: F) -> Self
    where
        F: FnMut() -> Result<C, SynthError> + 'static,
    {
        SynthEngine {
            config,
            opener: Box::new(opener),
            context: None,
            presets,
            current: 0,
            voices: BTreeMap::new(),
            released: Vec::new(),
            pending: Vec::new(),
            timeline: Timeline::new(),
        }
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    pub fn context(&self) -> Option<&C> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut C> {
        self.context.as_mut()
    }

    /// Open the context if needed and make sure it is running or resuming.
    ///
    /// At most one resume is requested: while one is in flight, further
    /// calls just report `Pending`.
    pub fn ensure_ready(&mut self) -> Result<Readiness, SynthError> {
        if self.context.is_none() {
            let ctx = (self.opener)()?;
            debug!("audio context opened");
            self.context = Some(ctx);
        }
        let Some(ctx) = self.context.as_mut() else {
            return Err(SynthError::OutputUnavailable("no audio context".to_string()));
        };

        match ctx.state() {
            ContextState::Running => Ok(Readiness::Ready),
            ContextState::Resuming => Ok(Readiness::Pending),
            ContextState::Suspended => match ctx.resume()? {
                ContextState::Running => Ok(Readiness::Ready),
                _ => {
                    debug!("audio context resume requested");
                    Ok(Readiness::Pending)
                }
            },
            ContextState::Closed => Err(SynthError::ContextClosed),
        }
    }

    /// Play `frequency` for `duration` seconds, trigger to silence.
    ///
    /// A note already sounding at this frequency is faded out first.
    pub fn note_on(&mut self, frequency: f64, duration: f64) {
        if let Err(e) = self.try_note_on(frequency, duration) {
            warn!("note on at {frequency} Hz failed: {e}");
        }
    }

    /// `note_on` with the configured default duration.
    pub fn play_note(&mut self, frequency: f64) {
        self.note_on(frequency, self.config.default_duration);
    }

    fn try_note_on(&mut self, frequency: f64, duration: f64) -> Result<(), SynthError> {
        let key = FrequencyKey::new(frequency)?;
        if !(duration.is_finite() && duration > 0.0) {
            return Err(SynthError::InvalidParameter(format!(
                "duration must be positive, got {duration}"
            )));
        }

        match self.ensure_ready()? {
            Readiness::Ready => {
                self.flush_pending();
                self.start_voice(key, duration, self.current)
            }
            Readiness::Pending => {
                self.pending.retain(|p| p.key != key);
                self.pending.push(PendingNote {
                    key,
                    duration,
                    preset: self.current,
                });
                debug!("queued {frequency} Hz until the audio context resumes");
                Ok(())
            }
        }
    }

    fn flush_pending(&mut self) {
        for note in std::mem::take(&mut self.pending) {
            if let Err(e) = self.start_voice(note.key, note.duration, note.preset) {
                warn!("queued note at {} Hz failed: {e}", note.key.frequency());
            }
        }
    }

    fn start_voice(&mut self, key: FrequencyKey, duration: f64, preset: usize) -> Result<(), SynthError> {
        let Some(ctx) = self.context.as_mut() else {
            return Err(SynthError::OutputUnavailable("no audio context".to_string()));
        };

        if let Some(mut previous) = self.voices.remove(&key) {
            if !previous.is_fading() {
                Self::fade_out(ctx, &mut self.timeline, &self.config, &mut previous);
            }
            self.released.push(previous);
        }

        let preset = self.presets.at(preset);
        let envelope = NoteEnvelope::new(preset, &self.config, duration);
        let frequency = key.frequency();
        let now = ctx.current_time();

        let oscillator =
            ctx.create_oscillator(preset.waveform, frequency, preset.detune.unwrap_or(0.0))?;
        let gain = match ctx.create_gain() {
            Ok(gain) => gain,
            Err(e) => {
                ctx.discard(oscillator, None);
                return Err(e);
            }
        };
        let stop_time = now + envelope.duration;
        if let Err(e) = wire_voice(ctx, oscillator, gain, &envelope, now) {
            ctx.discard(oscillator, Some(gain));
            return Err(e);
        }

        debug!(
            "note on {frequency} Hz ({}, {}) until {stop_time:.3}s",
            preset.id, preset.waveform
        );
        self.voices.insert(
            key,
            Voice {
                key,
                oscillator,
                gain,
                waveform: preset.waveform,
                preset: preset.id.clone(),
                started_at: now,
                stop_time,
                state: VoiceState::Sounding,
            },
        );
        self.timeline
            .schedule(stop_time, Continuation::Ended { key, oscillator });
        Ok(())
    }

    /// Cancel the voice's scheduled envelope, ramp it down to the floor, and
    /// queue the stop for when the ramp is done.
    fn fade_out(
        ctx: &mut C,
        timeline: &mut Timeline<Continuation>,
        config: &SynthConfig,
        voice: &mut Voice,
    ) {
        let now = ctx.current_time();
        match ctx.gain_param(voice.gain) {
            Ok(param) => {
                if let Err(e) = schedule_fade_out(param, now, config.fade_out, config.silence_floor) {
                    warn!("fade out at {} Hz failed: {e}", voice.frequency());
                }
            }
            // Ended on its own already; nothing left to ramp.
            Err(e) => trace!("no gain to fade at {} Hz: {e}", voice.frequency()),
        }
        voice.state = VoiceState::Fading;
        timeline.schedule(
            now + config.fade_out,
            Continuation::FadeComplete {
                key: voice.key,
                oscillator: voice.oscillator,
            },
        );
    }

    /// Release the note at `frequency` with a short fade. No-op if nothing
    /// is sounding there.
    pub fn stop_note(&mut self, frequency: f64) {
        let Ok(key) = FrequencyKey::new(frequency) else {
            trace!("stop for invalid frequency {frequency} ignored");
            return;
        };
        self.pending.retain(|p| p.key != key);

        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        let Some(voice) = self.voices.get_mut(&key) else {
            trace!("no voice at {frequency} Hz to stop");
            return;
        };
        if voice.is_fading() {
            return;
        }
        Self::fade_out(ctx, &mut self.timeline, &self.config, voice);
        debug!("note off {frequency} Hz");
    }

    pub fn note_off(&mut self, frequency: f64) {
        self.stop_note(frequency);
    }

    /// Fade out everything and forget it. Nothing queued survives either.
    pub fn stop_all_notes(&mut self) {
        self.pending.clear();
        let voices = std::mem::take(&mut self.voices);
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if !voices.is_empty() {
            debug!("stopping {} voices", voices.len());
        }
        for (_, mut voice) in voices {
            if !voice.is_fading() {
                Self::fade_out(ctx, &mut self.timeline, &self.config, &mut voice);
            }
            self.released.push(voice);
        }
    }

    /// Switch the preset used by notes triggered from now on.
    ///
    /// Unknown ids keep the current preset and are reported back.
    pub fn set_preset(&mut self, id: &str) -> Result<&Preset, SynthError> {
        match self.presets.index_of(id) {
            Some(index) => {
                self.current = index;
                debug!("preset set to '{id}'");
                Ok(self.presets.at(index))
            }
            None => {
                warn!(
                    "unknown preset '{id}', keeping '{}'",
                    self.presets.at(self.current).id
                );
                Err(SynthError::UnknownPreset(id.to_string()))
            }
        }
    }

    pub fn current_preset(&self) -> &Preset {
        self.presets.at(self.current)
    }

    /// Preset ids in registry order.
    pub fn available_presets(&self) -> Vec<&str> {
        self.presets.ids().collect()
    }

    pub fn presets(&self) -> &PresetRegistry {
        &self.presets
    }

    /// Flush queued note-ons if the context is now running, and fire every
    /// continuation that has come due on its clock.
    pub fn poll(&mut self) {
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let now = ctx.current_time();
        let running = ctx.state() == ContextState::Running;

        while let Some(continuation) = self.timeline.pop_due(now) {
            self.fire(continuation);
        }
        if running && !self.pending.is_empty() {
            self.flush_pending();
        }
    }

    fn fire(&mut self, continuation: Continuation) {
        match continuation {
            Continuation::Ended { key, oscillator } => {
                trace!("oscillator at {} Hz ended", key.frequency());
                self.forget(key, oscillator);
            }
            Continuation::FadeComplete { key, oscillator } => {
                if let Some(ctx) = self.context.as_mut() {
                    let now = ctx.current_time();
                    if let Err(e) = ctx.stop(oscillator, now) {
                        trace!("oscillator at {} Hz already stopped: {e}", key.frequency());
                    }
                }
                self.forget(key, oscillator);
            }
        }
    }

    /// Drop the voice that owns `oscillator`. A newer voice registered at
    /// the same frequency is left alone.
    fn forget(&mut self, key: FrequencyKey, oscillator: OscillatorId) {
        if self
            .voices
            .get(&key)
            .is_some_and(|v| v.oscillator == oscillator)
        {
            self.voices.remove(&key);
        }
        self.released.retain(|v| v.oscillator != oscillator);
        // A retriggered voice's end is still queued; it has nothing left to do.
        self.timeline.retain(|c| c.oscillator() != oscillator);
    }

    /// Registered voices (sounding or fading after a note-off).
    pub fn active_voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Retriggered or stopped voices still fading out.
    pub fn released_voice_count(&self) -> usize {
        self.released.len()
    }

    pub fn pending_note_count(&self) -> usize {
        self.pending.len()
    }

    /// Continuations still waiting on the clock.
    pub fn scheduled_count(&self) -> usize {
        self.timeline.len()
    }

    pub fn voice(&self, frequency: f64) -> Option<&Voice> {
        let key = FrequencyKey::new(frequency).ok()?;
        self.voices.get(&key)
    }

    pub fn is_sounding(&self, frequency: f64) -> bool {
        self.voice(frequency).is_some_and(|v| !v.is_fading())
    }

    pub fn voices(&self) -> impl Iterator<Item = &Voice> {
        self.voices.values()
    }
}

/// Connect, shape and schedule a freshly created node pair.
fn wire_voice<C: AudioContext>(
    ctx: &mut C,
    oscillator: OscillatorId,
    gain: GainId,
    envelope: &NoteEnvelope,
    now: f64,
) -> Result<(), SynthError> {
    ctx.connect(oscillator, gain)?;
    schedule_note_envelope(ctx.gain_param(gain)?, envelope, now)?;
    ctx.start(oscillator, now)?;
    ctx.stop(oscillator, now + envelope.duration)
}

impl SynthEngine<RenderContext> {
    /// Engine whose context starts suspended until [`unlock`](Self::unlock),
    /// as a browser's does.
    pub fn with_render_context(config: SynthConfig) -> Self {
        SynthEngine::locked_with_presets(config, PresetRegistry::builtin())
    }

    /// [`with_render_context`](Self::with_render_context) with a custom registry.
    pub fn locked_with_presets(config: SynthConfig, presets: PresetRegistry) -> Self {
        let ctx_config = config.clone();
        SynthEngine::with_presets(config, presets, move || {
            ctx_config.validate()?;
            Ok(RenderContext::new(&ctx_config))
        })
    }

    /// Engine whose context runs from the start, for offline rendering.
    pub fn offline(config: SynthConfig) -> Self {
        let ctx_config = config.clone();
        SynthEngine::new(config, move || {
            ctx_config.validate()?;
            Ok(RenderContext::running(&ctx_config))
        })
    }

    /// The user gesture: opens the context if needed and lets it run.
    pub fn unlock(&mut self) {
        if self.context.is_none() {
            match (self.opener)() {
                Ok(ctx) => self.context = Some(ctx),
                Err(e) => {
                    warn!("audio context unavailable: {e}");
                    return;
                }
            }
        }
        if let Some(ctx) = self.context.as_mut() {
            ctx.unlock();
            if ctx.state() == ContextState::Suspended {
                if let Err(e) = ctx.resume() {
                    warn!("audio context resume failed: {e}");
                }
            }
        }
        self.poll();
    }

    /// Render the next block, firing continuations at their exact sample.
    pub fn render(&mut self, out: &mut [f32]) {
        self.poll();
        let mut offset = 0;
        while offset < out.len() {
            let Some(ctx) = self.context.as_mut() else {
                out[offset..].fill(0.0);
                return;
            };
            let remaining = out.len() - offset;
            let chunk = match self.timeline.next_time() {
                Some(t) if ctx.state() == ContextState::Running => {
                    ctx.samples_until(t).clamp(1, remaining)
                }
                _ => remaining,
            };
            ctx.render(&mut out[offset..offset + chunk]);
            offset += chunk;
            self.poll();
        }
    }

    /// Run the clock forward by `seconds`, discarding the audio.
    pub fn advance(&mut self, seconds: f64) {
        const BLOCK: usize = 128;
        let mut frames = (seconds * self.config.sample_rate).round().max(0.0) as usize;
        let mut scratch = [0.0f32; BLOCK];
        while frames > 0 {
            let n = frames.min(BLOCK);
            self.render(&mut scratch[..n]);
            frames -= n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::oscillator::Waveform;
    use float_cmp::approx_eq;
    use more_asserts::{assert_gt, assert_lt};
    use std::cell::Cell;
    use std::rc::Rc;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn engine() -> SynthEngine<RenderContext> {
        init_logger();
        SynthEngine::offline(SynthConfig::default())
    }

    fn locked_engine() -> SynthEngine<RenderContext> {
        init_logger();
        SynthEngine::with_render_context(SynthConfig::default())
    }

    fn waveform_at(engine: &SynthEngine<RenderContext>, frequency: f64) -> Option<Waveform> {
        let voice = engine.voice(frequency)?;
        engine.context()?.oscillator_waveform(voice.oscillator)
    }

    fn live_oscillators(engine: &SynthEngine<RenderContext>) -> usize {
        engine.context().map_or(0, |c| c.oscillator_count())
    }

    #[test]
    fn starts_with_first_preset_and_no_context() {
        let engine = engine();
        assert_eq!(engine.current_preset().name, "Piano");
        assert_eq!(engine.active_voice_count(), 0);
        assert!(engine.context().is_none());
    }

    #[test]
    fn available_presets_in_registry_order() {
        let engine = engine();
        let ids = engine.available_presets();
        assert_eq!(ids[0], "piano");
        assert!(ids.contains(&"synth"));
        assert!(ids.contains(&"organ"));
        assert_eq!(ids.len(), engine.presets().len());
    }

    #[test]
    fn note_on_creates_voice_that_ends_on_its_own() {
        let mut engine = engine();
        engine.note_on(261.63, 0.5);

        assert_eq!(engine.active_voice_count(), 1);
        assert!(engine.is_sounding(261.63));
        assert_eq!(waveform_at(&engine, 261.63), Some(engine.current_preset().waveform));

        engine.advance(0.49);
        assert_eq!(engine.active_voice_count(), 1);

        engine.advance(0.02);
        assert_eq!(engine.active_voice_count(), 0);
        assert_eq!(live_oscillators(&engine), 0);
    }

    #[test]
    fn play_note_uses_default_duration() {
        let mut engine = engine();
        engine.play_note(440.0);
        let voice = engine.voice(440.0).unwrap();
        assert_eq!(voice.stop_time, engine.config().default_duration);
        assert_eq!(
            engine.context().unwrap().oscillator_stop_time(voice.oscillator),
            Some(voice.stop_time)
        );
    }

    #[test]
    fn retrigger_keeps_a_single_voice() {
        let mut engine = engine();
        engine.note_on(440.0, 1.0);
        let first = engine.voice(440.0).unwrap().oscillator;
        engine.note_on(440.0, 1.0);

        assert_eq!(engine.active_voice_count(), 1);
        assert_ne!(engine.voice(440.0).unwrap().oscillator, first);
        // The old one fades rather than being cut.
        assert_eq!(engine.released_voice_count(), 1);
        assert_eq!(live_oscillators(&engine), 2);

        engine.advance(0.04);
        assert_eq!(engine.released_voice_count(), 0);
        assert_eq!(live_oscillators(&engine), 1);
        assert_eq!(engine.active_voice_count(), 1);
    }

    #[test]
    fn retrigger_restarts_the_clock_for_the_voice() {
        let mut engine = engine();
        engine.note_on(440.0, 1.0);
        assert_eq!(engine.voice(440.0).unwrap().started_at, 0.0);
        engine.advance(0.1);
        engine.note_on(440.0, 1.0);
        let voice = engine.voice(440.0).unwrap();
        assert!(approx_eq!(f64, voice.started_at, 0.1, epsilon = 1e-9));
        assert!(approx_eq!(f64, voice.stop_time, 1.1, epsilon = 1e-9));
    }

    #[test]
    fn retriggers_do_not_pile_up_continuations() {
        let mut engine = engine();
        for _ in 0..100 {
            engine.note_on(440.0, 3600.0);
        }
        assert_eq!(engine.active_voice_count(), 1);

        engine.advance(0.05);
        assert_eq!(engine.released_voice_count(), 0);
        // Only the live voice's end is left.
        assert_eq!(engine.scheduled_count(), 1);
    }

    #[test]
    fn stop_all_leaves_no_voices() {
        let mut engine = engine();
        for f in [261.63, 329.63, 392.0, 440.0] {
            engine.note_on(f, 2.0);
        }
        assert_eq!(engine.active_voice_count(), 4);

        engine.stop_all_notes();
        assert_eq!(engine.active_voice_count(), 0);

        engine.advance(0.05);
        assert_eq!(engine.released_voice_count(), 0);
        assert_eq!(live_oscillators(&engine), 0);
    }

    #[test]
    fn stop_all_with_nothing_playing() {
        let mut engine = engine();
        engine.stop_all_notes();
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn synth_preset_plays_sawtooth() {
        let mut engine = engine();
        engine.set_preset("synth").unwrap();
        engine.note_on(440.0, 1.0);

        assert_eq!(waveform_at(&engine, 440.0), Some(Waveform::Sawtooth));
        let voice = engine.voice(440.0).unwrap();
        assert_eq!(voice.preset, "synth");
        assert_eq!(engine.context().unwrap().oscillator_detune(voice.oscillator), Some(4.0));
    }

    #[test]
    fn unknown_preset_keeps_current() {
        let mut engine = engine();
        engine.set_preset("synth").unwrap();
        let err = engine.set_preset("nonexistent").unwrap_err();
        assert!(matches!(err, SynthError::UnknownPreset(ref id) if id == "nonexistent"));
        assert_eq!(engine.current_preset().name, "Synth");

        engine.set_preset("piano").unwrap();
        assert!(engine.set_preset("invalid_preset").is_err());
        assert_eq!(engine.current_preset().name, "Piano");
    }

    #[test]
    fn preset_change_only_affects_new_notes() {
        let mut engine = engine();
        engine.note_on(440.0, 1.0);
        engine.set_preset("organ").unwrap();
        engine.note_on(880.0, 1.0);

        assert_eq!(waveform_at(&engine, 440.0), Some(Waveform::Triangle));
        assert_eq!(waveform_at(&engine, 880.0), Some(Waveform::Sine));
    }

    #[test]
    fn note_off_fades_before_removing() {
        let mut engine = engine();
        engine.note_on(440.0, 1.0);
        engine.advance(0.1);
        let gain = engine.voice(440.0).unwrap().gain;
        let before = engine.context().unwrap().gain_value(gain).unwrap();

        engine.note_off(440.0);
        assert_eq!(engine.active_voice_count(), 1);
        assert!(engine.voice(440.0).unwrap().is_fading());
        assert!(!engine.is_sounding(440.0));

        engine.advance(0.02);
        assert_eq!(engine.active_voice_count(), 1);
        let during = engine.context().unwrap().gain_value(gain).unwrap();
        assert_lt!(during, before / 4.0);

        engine.advance(0.015);
        assert_eq!(engine.active_voice_count(), 0);
        assert_eq!(live_oscillators(&engine), 0);
    }

    #[test]
    fn note_on_during_fade_preempts() {
        let mut engine = engine();
        engine.note_on(440.0, 1.0);
        engine.advance(0.1);
        engine.note_off(440.0);
        engine.note_on(440.0, 1.0);

        assert_eq!(engine.active_voice_count(), 1);
        assert!(engine.is_sounding(440.0));
        assert_eq!(engine.released_voice_count(), 1);

        // The old fade completing must not take the new voice with it.
        engine.advance(0.05);
        assert!(engine.is_sounding(440.0));
        assert_eq!(engine.released_voice_count(), 0);
    }

    #[test]
    fn old_voice_ending_leaves_retrigger_alone() {
        let mut engine = engine();
        engine.note_on(440.0, 0.5);
        engine.advance(0.4);
        engine.note_on(440.0, 1.0);

        engine.advance(0.2);
        assert!(engine.is_sounding(440.0));
        assert_eq!(live_oscillators(&engine), 1);
    }

    #[test]
    fn note_off_racing_natural_end_is_tolerated() {
        let mut engine = engine();
        engine.note_on(440.0, 0.5);
        engine.advance(0.49);
        engine.note_off(440.0);
        engine.advance(0.1);
        assert_eq!(engine.active_voice_count(), 0);
        assert_eq!(live_oscillators(&engine), 0);
    }

    #[test]
    fn stop_note_without_voice_is_noop() {
        let mut engine = engine();
        engine.stop_note(999.0);
        assert_eq!(engine.active_voice_count(), 0);

        engine.note_on(440.0, 1.0);
        engine.stop_note(999.0);
        engine.stop_note(-1.0);
        assert_eq!(engine.active_voice_count(), 1);
        assert!(engine.is_sounding(440.0));
    }

    #[test]
    fn invalid_requests_are_ignored() {
        let mut engine = engine();
        engine.note_on(0.0, 1.0);
        engine.note_on(f64::NAN, 1.0);
        engine.note_on(440.0, -1.0);
        engine.note_on(440.0, f64::INFINITY);
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn short_durations_reach_sustain() {
        let mut engine = engine();
        engine.note_on(440.0, 0.01);
        let piano = engine.current_preset();
        let expected = piano.attack + piano.decay + engine.config().fade_out;
        let voice = engine.voice(440.0).unwrap();
        assert!(approx_eq!(f64, voice.stop_time, expected, epsilon = 1e-12));
    }

    #[test]
    fn renders_sound_then_silence() {
        let mut engine = engine();
        engine.note_on(440.0, 0.5);

        let mut out = vec![0.0f32; 8820];
        engine.render(&mut out);
        let peak = out.iter().map(|s| s.abs()).fold(0.0, f32::max);
        assert_gt!(peak, 0.05);
        assert!(out.iter().all(|s| s.abs() <= 1.0));

        engine.advance(0.4);
        engine.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn locked_context_queues_until_unlocked() {
        let mut engine = locked_engine();
        engine.note_on(440.0, 1.0);
        engine.note_on(880.0, 1.0);
        engine.note_on(440.0, 1.0);

        let ctx = engine.context().unwrap();
        assert_eq!(ctx.state(), ContextState::Resuming);
        assert_eq!(ctx.resume_requests(), 1);
        assert_eq!(engine.active_voice_count(), 0);
        assert_eq!(engine.pending_note_count(), 2);

        // Nothing renders and the clock stands still while locked.
        let mut out = vec![0.0f32; 256];
        engine.render(&mut out);
        assert_eq!(engine.context().unwrap().current_time(), 0.0);

        engine.unlock();
        assert_eq!(engine.pending_note_count(), 0);
        assert_eq!(engine.active_voice_count(), 2);

        engine.render(&mut out);
        assert!(out.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn queued_note_keeps_the_preset_it_was_played_with() {
        let mut engine = locked_engine();
        engine.set_preset("chiptune").unwrap();
        engine.note_on(440.0, 1.0);
        engine.set_preset("organ").unwrap();
        engine.unlock();
        assert_eq!(waveform_at(&engine, 440.0), Some(Waveform::Square));
    }

    #[test]
    fn note_off_drops_queued_note() {
        let mut engine = locked_engine();
        engine.note_on(440.0, 1.0);
        engine.note_off(440.0);
        assert_eq!(engine.pending_note_count(), 0);

        engine.note_on(880.0, 1.0);
        engine.stop_all_notes();
        assert_eq!(engine.pending_note_count(), 0);

        engine.unlock();
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn unlock_before_any_note() {
        let mut engine = locked_engine();
        engine.unlock();
        assert_eq!(engine.context().unwrap().state(), ContextState::Running);
        engine.note_on(440.0, 1.0);
        assert_eq!(engine.active_voice_count(), 1);
    }

    #[test]
    fn missing_output_degrades_to_silence() {
        init_logger();
        let attempts = Rc::new(Cell::new(0));
        let counter = Rc::clone(&attempts);
        let mut engine: SynthEngine<RenderContext> =
            SynthEngine::new(SynthConfig::default(), move || {
                counter.set(counter.get() + 1);
                Err(SynthError::OutputUnavailable("no device".to_string()))
            });

        engine.note_on(440.0, 1.0);
        engine.note_off(440.0);
        engine.stop_all_notes();
        engine.note_on(880.0, 1.0);
        engine.poll();

        assert_eq!(engine.active_voice_count(), 0);
        assert!(engine.context().is_none());
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn context_is_opened_once() {
        init_logger();
        let opened = Rc::new(Cell::new(0));
        let counter = Rc::clone(&opened);
        let config = SynthConfig::default();
        let ctx_config = config.clone();
        let mut engine = SynthEngine::new(config, move || {
            counter.set(counter.get() + 1);
            Ok(RenderContext::running(&ctx_config))
        });

        engine.note_on(440.0, 0.1);
        engine.advance(0.2);
        engine.note_on(440.0, 0.1);
        engine.note_on(220.0, 0.1);
        assert_eq!(opened.get(), 1);
    }

    #[test]
    fn invalid_config_never_opens_a_context() {
        init_logger();
        let mut engine = SynthEngine::offline(SynthConfig::with_sample_rate(0.0));
        engine.note_on(440.0, 1.0);
        engine.unlock();
        assert!(engine.context().is_none());
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn failed_note_releases_its_nodes() {
        init_logger();
        // A context with no usable clock: every envelope fails to schedule.
        let broken = SynthConfig::with_sample_rate(0.0);
        let mut engine = SynthEngine::new(SynthConfig::default(), move || {
            Ok(RenderContext::running(&broken))
        });
        for _ in 0..3 {
            engine.note_on(440.0, 1.0);
        }
        assert_eq!(engine.active_voice_count(), 0);
        assert_eq!(live_oscillators(&engine), 0);
        assert_eq!(engine.scheduled_count(), 0);
    }

    #[test]
    fn closed_context_plays_nothing() {
        let mut engine = engine();
        engine.note_on(440.0, 1.0);
        engine.context_mut().unwrap().close();
        engine.note_on(880.0, 1.0);
        assert!(engine.voice(880.0).is_none());
    }
}
