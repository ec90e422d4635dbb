//! The audio output context the engine plays through.
//!
//! [`AudioContext`] is the engine's view of the platform's audio output: a
//! monotonic clock, a suspend/resume state, and oscillator and gain nodes
//! whose starts, stops and gain automation are scheduled against that
//! clock. [`RenderContext`] implements it in Rust, producing the samples an
//! AudioWorklet (or an offline renderer) pulls block by block.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::config::SynthConfig;
use crate::error::SynthError;

use super::envelope::AudioParam;
use super::oscillator::{Oscillator, Waveform};

/// Handle to an oscillator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OscillatorId(u64);

/// Handle to a gain node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GainId(u64);

/// Output contexts start suspended until a user gesture unlocks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    /// A resume was requested and has not completed yet.
    Resuming,
    Running,
    Closed,
}

pub trait AudioContext {
    /// Seconds on the context clock.
    fn current_time(&self) -> f64;

    fn state(&self) -> ContextState;

    /// Request a resume; returns the state right after the request.
    fn resume(&mut self) -> Result<ContextState, SynthError>;

    fn create_oscillator(
        &mut self,
        waveform: Waveform,
        frequency: f64,
        detune: f64,
    ) -> Result<OscillatorId, SynthError>;

    fn create_gain(&mut self) -> Result<GainId, SynthError>;

    /// Route an oscillator through a gain node to the output.
    fn connect(&mut self, oscillator: OscillatorId, gain: GainId) -> Result<(), SynthError>;

    fn gain_param(&mut self, gain: GainId) -> Result<&mut AudioParam, SynthError>;

    fn start(&mut self, oscillator: OscillatorId, when: f64) -> Result<(), SynthError>;

    /// Schedule (or reschedule) the oscillator's end. Fails with
    /// `InvalidState` if it has already ended.
    fn stop(&mut self, oscillator: OscillatorId, when: f64) -> Result<(), SynthError>;

    /// Throw away nodes that never got started, e.g. when scheduling the
    /// envelope failed. Unknown ids are ignored.
    fn discard(&mut self, oscillator: OscillatorId, gain: Option<GainId>);
}

#[derive(Debug)]
struct OscillatorNode {
    osc: Oscillator,
    output: Option<GainId>,
    start: Option<f64>,
    stop: Option<f64>,
}

impl OscillatorNode {
    fn sounding_at(&self, t: f64) -> bool {
        matches!(self.start, Some(s) if t >= s) && self.stop.is_none_or(|s| t < s)
    }
}

/// Sample-clock audio context that renders in Rust.
#[derive(Debug)]
pub struct RenderContext {
    sample_rate: f64,
    frame: u64,
    state: ContextState,
    unlocked: bool,
    resume_requests: usize,
    next_id: u64,
    oscillators: BTreeMap<OscillatorId, OscillatorNode>,
    gains: HashMap<GainId, AudioParam>,
    master_gain: f64,
    /// Per-block sum of every sounding node, before master gain.
    mix: Vec<f64>,
}

impl RenderContext {
    /// A suspended, locked context: nothing plays until [`unlock`](Self::unlock).
    pub fn new(config: &SynthConfig) -> Self {
        RenderContext {
            sample_rate: config.sample_rate,
            frame: 0,
            state: ContextState::Suspended,
            unlocked: false,
            resume_requests: 0,
            next_id: 0,
            oscillators: BTreeMap::new(),
            gains: HashMap::new(),
            master_gain: config.master_gain,
            mix: Vec::new(),
        }
    }

    /// A context that is already unlocked and running (offline rendering).
    pub fn running(config: &SynthConfig) -> Self {
        let mut ctx = RenderContext::new(config);
        ctx.unlocked = true;
        ctx.state = ContextState::Running;
        ctx
    }

    /// The user gesture: completes a pending resume.
    pub fn unlock(&mut self) {
        self.unlocked = true;
        if self.state == ContextState::Resuming {
            debug!("audio context resumed at {:.3}s", self.current_time());
            self.state = ContextState::Running;
        }
    }

    pub fn close(&mut self) {
        self.state = ContextState::Closed;
        self.oscillators.clear();
        self.gains.clear();
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn resume_requests(&self) -> usize {
        self.resume_requests
    }

    /// Live oscillator nodes (started or not, not yet ended).
    pub fn oscillator_count(&self) -> usize {
        self.oscillators.len()
    }

    pub fn oscillator_waveform(&self, id: OscillatorId) -> Option<Waveform> {
        self.oscillators.get(&id).map(|n| n.osc.waveform())
    }

    pub fn oscillator_detune(&self, id: OscillatorId) -> Option<f64> {
        self.oscillators.get(&id).map(|n| n.osc.detune())
    }

    pub fn oscillator_stop_time(&self, id: OscillatorId) -> Option<f64> {
        self.oscillators.get(&id).and_then(|n| n.stop)
    }

    /// Current value of a gain node.
    pub fn gain_value(&self, id: GainId) -> Option<f64> {
        self.gains.get(&id).map(|p| p.value_at(self.current_time()))
    }

    /// Whole samples from now until `time` is reached (zero if already past).
    pub fn samples_until(&self, time: f64) -> usize {
        let remaining = (time - self.current_time()) * self.sample_rate;
        if remaining <= 0.0 {
            0
        } else {
            remaining.ceil() as usize
        }
    }

    /// Render the next block. The clock only moves while running.
    pub fn render(&mut self, out: &mut [f32]) {
        if self.state != ContextState::Running {
            out.fill(0.0);
            return;
        }

        self.mix.clear();
        self.mix.resize(out.len(), 0.0);
        for node in self.oscillators.values_mut() {
            let Some(gain) = node.output.and_then(|g| self.gains.get(&g)) else {
                continue;
            };
            for (i, slot) in self.mix.iter_mut().enumerate() {
                let t = (self.frame + i as u64) as f64 / self.sample_rate;
                if node.sounding_at(t) {
                    *slot += node.osc.next_sample() * gain.value_at(t);
                }
            }
        }
        // tanh keeps any pile-up of voices inside [-1, 1].
        for (dst, &sum) in out.iter_mut().zip(&self.mix) {
            *dst = (sum * self.master_gain).tanh() as f32;
        }
        self.frame += out.len() as u64;

        self.drop_ended();
    }

    /// Discard nodes whose oscillator has passed its stop time.
    fn drop_ended(&mut self) {
        let now = self.current_time();
        let gains = &mut self.gains;
        self.oscillators.retain(|_, node| {
            let ended = node.stop.is_some_and(|s| s <= now);
            if ended {
                if let Some(g) = node.output {
                    gains.remove(&g);
                }
            }
            !ended
        });
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_open(&self) -> Result<(), SynthError> {
        if self.state == ContextState::Closed {
            Err(SynthError::ContextClosed)
        } else {
            Ok(())
        }
    }
}

impl AudioContext for RenderContext {
    fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate
    }

    fn state(&self) -> ContextState {
        self.state
    }

    fn resume(&mut self) -> Result<ContextState, SynthError> {
        self.check_open()?;
        if self.state != ContextState::Running {
            self.resume_requests += 1;
            self.state = if self.unlocked {
                ContextState::Running
            } else {
                ContextState::Resuming
            };
        }
        Ok(self.state)
    }

    fn create_oscillator(
        &mut self,
        waveform: Waveform,
        frequency: f64,
        detune: f64,
    ) -> Result<OscillatorId, SynthError> {
        self.check_open()?;
        let id = OscillatorId(self.next_id());
        let osc = Oscillator::new(waveform, frequency, detune, self.sample_rate);
        self.oscillators.insert(
            id,
            OscillatorNode {
                osc,
                output: None,
                start: None,
                stop: None,
            },
        );
        Ok(id)
    }

    fn create_gain(&mut self) -> Result<GainId, SynthError> {
        self.check_open()?;
        let id = GainId(self.next_id());
        self.gains.insert(id, AudioParam::new(1.0));
        Ok(id)
    }

    fn connect(&mut self, oscillator: OscillatorId, gain: GainId) -> Result<(), SynthError> {
        if !self.gains.contains_key(&gain) {
            return Err(SynthError::UnknownNode(gain.0));
        }
        let node = self
            .oscillators
            .get_mut(&oscillator)
            .ok_or(SynthError::UnknownNode(oscillator.0))?;
        node.output = Some(gain);
        Ok(())
    }

    fn gain_param(&mut self, gain: GainId) -> Result<&mut AudioParam, SynthError> {
        self.gains.get_mut(&gain).ok_or(SynthError::UnknownNode(gain.0))
    }

    fn start(&mut self, oscillator: OscillatorId, when: f64) -> Result<(), SynthError> {
        let node = self
            .oscillators
            .get_mut(&oscillator)
            .ok_or(SynthError::UnknownNode(oscillator.0))?;
        if node.start.is_some() {
            return Err(SynthError::InvalidState("oscillator already started".to_string()));
        }
        node.start = Some(when);
        Ok(())
    }

    fn stop(&mut self, oscillator: OscillatorId, when: f64) -> Result<(), SynthError> {
        let now = self.current_time();
        let Some(node) = self.oscillators.get_mut(&oscillator) else {
            return Err(SynthError::InvalidState("oscillator already ended".to_string()));
        };
        if node.start.is_none() {
            return Err(SynthError::InvalidState("oscillator never started".to_string()));
        }
        node.stop = Some(when.max(now));
        if when <= now {
            self.drop_ended();
        }
        Ok(())
    }

    fn discard(&mut self, oscillator: OscillatorId, gain: Option<GainId>) {
        self.oscillators.remove(&oscillator);
        if let Some(gain) = gain {
            self.gains.remove(&gain);
        }
    }
}
