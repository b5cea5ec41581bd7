//! ADSR envelope generator with linear segments.
//!
//! Every segment ramps from whatever level the envelope is at when the
//! segment starts, so a retrigger or a note-off mid-attack never jumps.

use crate::params::EnvelopeParams;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone)]
pub struct Envelope {
    params: EnvelopeParams,
    sample_rate: f64,
    stage: Stage,
    level: f64,
    /// Per-sample increment of the current segment.
    slope: f64,
    /// Samples left in the current segment.
    remaining: usize,
}

impl Envelope {
    pub fn new(params: EnvelopeParams, sample_rate: f64) -> Self {
        Envelope {
            params,
            sample_rate,
            stage: Stage::Idle,
            level: 0.0,
            slope: 0.0,
            remaining: 0,
        }
    }

    /// Shape used from the next gate on. A running segment is not altered.
    pub fn set_params(&mut self, params: EnvelopeParams) {
        self.params = params;
    }

    pub fn params(&self) -> &EnvelopeParams {
        &self.params
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    /// Note on. Retriggers from the current level.
    pub fn gate_on(&mut self) {
        self.enter(Stage::Attack, 1.0, self.params.attack);
    }

    /// Note off. Releases from the current level, whatever the stage.
    pub fn gate_off(&mut self) {
        if self.stage == Stage::Idle {
            return;
        }
        self.enter(Stage::Release, 0.0, self.params.release);
    }

    /// Silence immediately.
    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.level = 0.0;
        self.slope = 0.0;
        self.remaining = 0;
    }

    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Idle
    }

    fn enter(&mut self, stage: Stage, target: f64, seconds: f64) {
        self.stage = stage;
        self.remaining = (seconds * self.sample_rate) as usize;
        self.slope = if self.remaining == 0 {
            0.0
        } else {
            (target - self.level) / self.remaining as f64
        };
        if self.remaining == 0 {
            self.level = target;
            self.advance();
        }
    }

    /// Move to the stage after the one that just completed.
    fn advance(&mut self) {
        match self.stage {
            Stage::Attack => {
                self.level = 1.0;
                self.enter(Stage::Decay, self.params.sustain, self.params.decay);
            }
            Stage::Decay => {
                self.level = self.params.sustain;
                self.stage = Stage::Sustain;
            }
            Stage::Release => self.reset(),
            Stage::Idle | Stage::Sustain => {}
        }
    }

    /// Next envelope value in `[0, 1]`.
    pub fn next_sample(&mut self) -> f64 {
        match self.stage {
            Stage::Idle | Stage::Sustain => {}
            Stage::Attack | Stage::Decay | Stage::Release => {
                self.level = (self.level + self.slope).clamp(0.0, 1.0);
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.advance();
                }
            }
        }
        self.level
    }
}
