//! DSP Engine — voice management and synthesis for the virtual keyboard.
//!
//! The engine talks to an [`context::AudioContext`] the way a browser page
//! talks to Web Audio: it creates oscillator and gain nodes, schedules gain
//! automation against the context clock, and stops nodes at absolute times.
//! [`context::RenderContext`] is the in-crate implementation; it renders
//! those nodes sample by sample, so the same code drives live playback via
//! WASM and offline WAV export.

pub mod context;
pub mod engine;
pub mod envelope;
pub mod oscillator;
pub mod renderer;
pub mod timeline;
pub mod voice;
