//! Gain stage and per-voice output channel.

use super::limiter::db_to_gain;
use super::smooth::{RAMP_SECONDS, SmoothedValue};

/// Linear gain multiplier applied right after the oscillator.
#[derive(Debug, Clone)]
pub struct GainStage {
    gain: SmoothedValue,
}

impl GainStage {
    pub fn new(gain: f64, sample_rate: f64) -> Self {
        GainStage {
            gain: SmoothedValue::new(gain as f32, RAMP_SECONDS, sample_rate as f32),
        }
    }

    pub fn gain(&self) -> f64 {
        self.gain.target() as f64
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.gain.set_target(gain as f32);
    }

    pub fn set_gain_immediate(&mut self, gain: f64) {
        self.gain.set_immediate(gain as f32);
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        input * self.gain.next_sample() as f64
    }
}

/// Per-voice volume trim in dB. Never boosts above unity.
#[derive(Debug, Clone)]
pub struct Channel {
    trim_db: f64,
    gain: SmoothedValue,
}

impl Channel {
    pub fn new(trim_db: f64, sample_rate: f64) -> Self {
        let trim_db = sanitize_trim(trim_db);
        Channel {
            trim_db,
            gain: SmoothedValue::new(db_to_gain(trim_db) as f32, RAMP_SECONDS, sample_rate as f32),
        }
    }

    pub fn trim_db(&self) -> f64 {
        self.trim_db
    }

    pub fn set_trim_db(&mut self, db: f64) {
        self.trim_db = sanitize_trim(db);
        self.gain.set_target(db_to_gain(self.trim_db) as f32);
    }

    pub fn set_trim_db_immediate(&mut self, db: f64) {
        self.trim_db = sanitize_trim(db);
        self.gain.set_immediate(db_to_gain(self.trim_db) as f32);
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let g = self.gain.next_sample();
        (left * g, right * g)
    }
}

/// Clamp to at most 0 dB; NaN is treated as unity.
fn sanitize_trim(db: f64) -> f64 {
    if db.is_nan() { 0.0 } else { db.min(0.0) }
}
