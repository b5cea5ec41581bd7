//! Limiter: peak limiter at the end of each voice's effect chain.
//!
//! A feed-forward hard-knee compressor with a fixed high ratio and fast
//! attack. Only the threshold is a user parameter.

const RATIO: f64 = 20.0;
const ATTACK_SECONDS: f64 = 0.001;
const RELEASE_SECONDS: f64 = 0.05;

/// A stereo peak limiter.
#[derive(Debug, Clone)]
pub struct Limiter {
    /// Threshold in dB (0 or below).
    threshold: f64,
    attack_coef: f64,
    release_coef: f64,
    /// Peak envelope, linear.
    envelope: f64,
}

impl Limiter {
    pub fn new(sample_rate: f64, threshold: f64) -> Self {
        Limiter {
            threshold,
            attack_coef: (-1.0 / (ATTACK_SECONDS * sample_rate)).exp(),
            release_coef: (-1.0 / (RELEASE_SECONDS * sample_rate)).exp(),
            envelope: 0.0,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    #[inline]
    fn linear_to_db(linear: f64) -> f64 {
        if linear <= 0.0 {
            -120.0
        } else {
            20.0 * linear.log10()
        }
    }

    /// Gain reduction in dB (0 or negative) for an input level in dB.
    #[inline]
    fn gain_reduction(&self, input_db: f64) -> f64 {
        if input_db <= self.threshold {
            0.0
        } else {
            (self.threshold - input_db) * (1.0 - 1.0 / RATIO)
        }
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input_level = left.abs().max(right.abs()) as f64;
        let coef = if input_level > self.envelope {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.envelope = coef * self.envelope + (1.0 - coef) * input_level;

        let reduction_db = self.gain_reduction(Self::linear_to_db(self.envelope));
        let gain = db_to_gain(reduction_db) as f32;
        (left * gain, right * gain)
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

/// Convert dB to linear amplitude.
#[inline]
pub fn db_to_gain(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}
