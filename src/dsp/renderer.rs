//! Offline renderer — plays a timed list of key events through the engine
//! and captures the output, as raw samples or a WAV file.

use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::config::SynthConfig;
use crate::error::SynthError;

use super::context::RenderContext;
use super::engine::SynthEngine;

/// Latest time an event may be scheduled at.
pub const MAX_PERFORMANCE_SECONDS: f64 = 3600.0;
/// Upper bound on how long the tail after the last event may ring.
const MAX_TAIL_SECONDS: f64 = 30.0;
const BLOCK: usize = 128;

/// Something the input layer did, at an absolute time in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PerformanceEvent {
    #[serde(rename_all = "camelCase")]
    NoteOn {
        time: f64,
        frequency: f64,
        /// Falls back to the configured default duration.
        #[serde(default)]
        duration: Option<f64>,
    },
    NoteOff { time: f64, frequency: f64 },
    SetPreset { time: f64, preset: String },
    StopAll { time: f64 },
}

impl PerformanceEvent {
    pub fn time(&self) -> f64 {
        match self {
            PerformanceEvent::NoteOn { time, .. }
            | PerformanceEvent::NoteOff { time, .. }
            | PerformanceEvent::SetPreset { time, .. }
            | PerformanceEvent::StopAll { time } => *time,
        }
    }
}

/// Render `events` to mono samples, continuing until every voice is silent.
pub fn render_performance(
    events: &[PerformanceEvent],
    config: &SynthConfig,
) -> Result<Vec<f32>, SynthError> {
    config.validate()?;
    if let Some(bad) = events
        .iter()
        .find(|e| !(0.0..=MAX_PERFORMANCE_SECONDS).contains(&e.time()))
    {
        return Err(SynthError::InvalidParameter(format!(
            "event time must be within 0..={MAX_PERFORMANCE_SECONDS} s, got {}",
            bad.time()
        )));
    }

    let mut ordered: Vec<&PerformanceEvent> = events.iter().collect();
    ordered.sort_by(|a, b| a.time().total_cmp(&b.time()));

    let mut engine = SynthEngine::offline(config.clone());
    let mut samples: Vec<f32> = Vec::new();

    for event in ordered {
        let target = (event.time() * config.sample_rate).round() as usize;
        if target > samples.len() {
            let start = samples.len();
            samples.resize(target, 0.0);
            engine.render(&mut samples[start..]);
        }
        apply(&mut engine, event);
    }

    let max_tail = (MAX_TAIL_SECONDS * config.sample_rate) as usize;
    let mut tail = 0;
    while !is_idle(&engine) && tail < max_tail {
        let start = samples.len();
        samples.resize(start + BLOCK, 0.0);
        engine.render(&mut samples[start..]);
        tail += BLOCK;
    }

    Ok(samples)
}

/// Render `events` to a 16-bit mono WAV file.
pub fn render_wav(events: &[PerformanceEvent], config: &SynthConfig) -> Result<Vec<u8>, SynthError> {
    let samples = render_performance(events, config)?;
    encode_wav(&samples, config.sample_rate as u32)
}

/// Parse a JSON event list and render it to WAV.
pub fn render_wav_from_json(json: &str, config: &SynthConfig) -> Result<Vec<u8>, SynthError> {
    let events: Vec<PerformanceEvent> = serde_json::from_str(json)?;
    render_wav(&events, config)
}

fn apply(engine: &mut SynthEngine<RenderContext>, event: &PerformanceEvent) {
    match event {
        PerformanceEvent::NoteOn {
            frequency,
            duration: Some(duration),
            ..
        } => engine.note_on(*frequency, *duration),
        PerformanceEvent::NoteOn { frequency, .. } => engine.play_note(*frequency),
        PerformanceEvent::NoteOff { frequency, .. } => engine.note_off(*frequency),
        PerformanceEvent::SetPreset { preset, .. } => {
            // Already logged by the engine; the performance carries on.
            let _ = engine.set_preset(preset);
        }
        PerformanceEvent::StopAll { .. } => engine.stop_all_notes(),
    }
}

fn is_idle(engine: &SynthEngine<RenderContext>) -> bool {
    engine.active_voice_count() == 0 && engine.released_voice_count() == 0
}

fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, SynthError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
