pub mod config;
pub mod dsp;
pub mod error;
pub mod notes;
pub mod preset;

use crate::config::SynthConfig;
use crate::dsp::context::RenderContext;
use crate::dsp::engine::SynthEngine;
use crate::error::SynthError;
use crate::preset::PresetRegistry;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{e}"))
}

/// WASM-exposed: return the keyboard-synth-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: equal-tempered frequency of a note name such as "C#4".
#[wasm_bindgen]
pub fn note_frequency(name: &str) -> Option<f64> {
    notes::note_frequency(name)
}

/// WASM-exposed: render a JSON list of performance events to a WAV byte array.
#[wasm_bindgen]
pub fn render_performance_wav(events_json: &str, sample_rate: u32) -> Result<Vec<u8>, JsValue> {
    let config = SynthConfig::with_sample_rate(sample_rate as f64);
    dsp::renderer::render_wav_from_json(events_json, &config).map_err(js_error)
}

/// The synthesis engine as seen from the page.
///
/// The context starts locked, like a browser's: note-ons before
/// [`WebSynth::unlock`] are queued and play once it is called from a user
/// gesture. The page's AudioWorklet pulls audio through [`WebSynth::render`].
#[wasm_bindgen]
pub struct WebSynth {
    engine: SynthEngine<RenderContext>,
}

#[wasm_bindgen]
impl WebSynth {
    /// Fails for a sample rate no context can run at.
    #[wasm_bindgen(constructor)]
    pub fn new(sample_rate: f64) -> Result<WebSynth, JsValue> {
        WebSynth::from_config(SynthConfig::with_sample_rate(sample_rate)).map_err(js_error)
    }

    /// Build from a camelCase JSON `SynthConfig`; missing fields take defaults.
    pub fn with_config(config_json: &str) -> Result<WebSynth, JsValue> {
        WebSynth::from_config_json(config_json).map_err(js_error)
    }

    /// Build with a custom preset list (a JSON array of presets) in place of
    /// the built-in one. The first preset is current.
    pub fn with_presets(config_json: &str, presets_json: &str) -> Result<WebSynth, JsValue> {
        WebSynth::from_json(config_json, presets_json).map_err(js_error)
    }

    pub fn unlock(&mut self) {
        self.engine.unlock();
    }

    pub fn note_on(&mut self, frequency: f64, duration: f64) {
        self.engine.note_on(frequency, duration);
    }

    pub fn play_note(&mut self, frequency: f64) {
        self.engine.play_note(frequency);
    }

    pub fn note_off(&mut self, frequency: f64) {
        self.engine.note_off(frequency);
    }

    pub fn stop_all_notes(&mut self) {
        self.engine.stop_all_notes();
    }

    /// Returns false (and keeps the current preset) for an unknown id.
    pub fn set_preset(&mut self, id: &str) -> bool {
        self.engine.set_preset(id).is_ok()
    }

    pub fn current_preset(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(self.engine.current_preset()).map_err(js_error)
    }

    pub fn available_presets(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(self.engine.presets().presets()).map_err(js_error)
    }

    /// The note bound to a keyboard key, or `undefined`.
    pub fn note_for_key(&self, key: &str) -> Result<JsValue, JsValue> {
        match notes::note_for_key(key) {
            Some(note) => serde_wasm_bindgen::to_value(note).map_err(js_error),
            None => Ok(JsValue::UNDEFINED),
        }
    }

    pub fn active_voice_count(&self) -> usize {
        self.engine.active_voice_count()
    }

    pub fn render(&mut self, out: &mut [f32]) {
        self.engine.render(out);
    }
}

impl WebSynth {
    pub fn from_config(config: SynthConfig) -> Result<WebSynth, SynthError> {
        config.validate()?;
        Ok(WebSynth {
            engine: SynthEngine::with_render_context(config),
        })
    }

    pub fn from_config_json(config_json: &str) -> Result<WebSynth, SynthError> {
        WebSynth::from_config(SynthConfig::from_json(config_json)?)
    }

    pub fn from_json(config_json: &str, presets_json: &str) -> Result<WebSynth, SynthError> {
        let config = SynthConfig::from_json(config_json)?;
        let presets = PresetRegistry::from_json(presets_json)?;
        Ok(WebSynth {
            engine: SynthEngine::locked_with_presets(config, presets),
        })
    }

    pub fn engine(&self) -> &SynthEngine<RenderContext> {
        &self.engine
    }
}
