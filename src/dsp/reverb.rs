//! Reverb: Schroeder/Freeverb-style algorithmic reverb with pre-delay.
//!
//! Parallel damped comb filters feed series allpass filters. Comb feedback
//! is derived from the requested decay (RT60): each comb loses 60 dB over
//! `decay` seconds regardless of its length.

use super::smooth::{RAMP_SECONDS, SmoothedValue};

/// A comb filter delay line with damped feedback.
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
    damp: f32,
    filterstore: f32,
}

impl CombFilter {
    fn new(size: usize) -> Self {
        CombFilter {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.0,
            damp: DAMPING,
            filterstore: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.index];
        self.filterstore = output * (1.0 - self.damp) + self.filterstore * self.damp;
        self.buffer[self.index] = input + self.filterstore * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    /// Feedback gain for a 60 dB decay over `decay_seconds`.
    fn tune(&mut self, decay_seconds: f64, sample_rate: f64) {
        let loop_seconds = self.buffer.len() as f64 / sample_rate;
        self.feedback = 10.0_f64.powf(-3.0 * loop_seconds / decay_seconds.max(1e-3)) as f32;
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filterstore = 0.0;
    }
}

#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    index: usize,
}

impl AllpassFilter {
    fn new(size: usize) -> Self {
        AllpassFilter {
            buffer: vec![0.0; size.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let bufout = self.buffer[self.index];
        let output = bufout - input;
        self.buffer[self.index] = input + bufout * ALLPASS_FEEDBACK;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

// Tuning constants (scaled for 44100 Hz sample rate)
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
const DAMPING: f32 = 0.2;
const ALLPASS_FEEDBACK: f32 = 0.5;
const INPUT_GAIN: f32 = 0.015;

/// Longest pre-delay the line is sized for.
pub const MAX_PRE_DELAY_SECONDS: f64 = 0.5;

/// Mono-in, stereo-out reverb.
#[derive(Debug, Clone)]
pub struct Reverb {
    comb_l: Vec<CombFilter>,
    comb_r: Vec<CombFilter>,
    allpass_l: Vec<AllpassFilter>,
    allpass_r: Vec<AllpassFilter>,
    pre_delay_line: Vec<f32>,
    pre_delay_pos: usize,
    pre_delay_samples: usize,
    sample_rate: f64,

    decay: f64,
    pre_delay: f64,
    wet: SmoothedValue,
}

impl Reverb {
    pub fn new(sample_rate: f64) -> Self {
        let scale = sample_rate / 44100.0;
        let sized = |t: usize, spread: usize| ((t as f64) * scale) as usize + spread;

        let mut reverb = Reverb {
            comb_l: COMB_TUNING.iter().map(|&t| CombFilter::new(sized(t, 0))).collect(),
            comb_r: COMB_TUNING
                .iter()
                .map(|&t| CombFilter::new(sized(t, STEREO_SPREAD)))
                .collect(),
            allpass_l: ALLPASS_TUNING.iter().map(|&t| AllpassFilter::new(sized(t, 0))).collect(),
            allpass_r: ALLPASS_TUNING
                .iter()
                .map(|&t| AllpassFilter::new(sized(t, STEREO_SPREAD)))
                .collect(),
            pre_delay_line: vec![0.0; (MAX_PRE_DELAY_SECONDS * sample_rate) as usize + 1],
            pre_delay_pos: 0,
            pre_delay_samples: 0,
            sample_rate,
            decay: 0.0,
            pre_delay: 0.0,
            wet: SmoothedValue::new(0.0, RAMP_SECONDS, sample_rate as f32),
        };
        reverb.set_params_immediate(1.5, 0.0, 0.0);
        reverb
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    pub fn pre_delay(&self) -> f64 {
        self.pre_delay
    }

    pub fn wet(&self) -> f64 {
        self.wet.target() as f64
    }

    /// Decay (s), pre-delay (s) and wet mix; values are assumed sanitized.
    pub fn set_params(&mut self, decay: f64, pre_delay: f64, wet: f64) {
        self.tune(decay, pre_delay);
        self.wet.set_target(wet.clamp(0.0, 1.0) as f32);
    }

    pub fn set_params_immediate(&mut self, decay: f64, pre_delay: f64, wet: f64) {
        self.tune(decay, pre_delay);
        self.wet.set_immediate(wet.clamp(0.0, 1.0) as f32);
    }

    fn tune(&mut self, decay: f64, pre_delay: f64) {
        self.decay = decay;
        self.pre_delay = pre_delay.clamp(0.0, MAX_PRE_DELAY_SECONDS);
        let max = self.pre_delay_line.len().saturating_sub(1);
        self.pre_delay_samples = ((self.pre_delay * self.sample_rate) as usize).min(max);
        for comb in self.comb_l.iter_mut().chain(self.comb_r.iter_mut()) {
            comb.tune(decay, self.sample_rate);
        }
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> (f32, f32) {
        let wet = self.wet.next_sample();
        if self.pre_delay_line.is_empty() {
            return (input, input);
        }

        let len = self.pre_delay_line.len();
        self.pre_delay_line[self.pre_delay_pos] = input;
        let read = (self.pre_delay_pos + len - self.pre_delay_samples) % len;
        let delayed = self.pre_delay_line[read] * INPUT_GAIN;
        self.pre_delay_pos = (self.pre_delay_pos + 1) % len;

        let mut out_l: f32 = self.comb_l.iter_mut().map(|c| c.process(delayed)).sum();
        let mut out_r: f32 = self.comb_r.iter_mut().map(|c| c.process(delayed)).sum();
        for allpass in &mut self.allpass_l {
            out_l = allpass.process(out_l);
        }
        for allpass in &mut self.allpass_r {
            out_r = allpass.process(out_r);
        }

        let dry = input * (1.0 - wet);
        (dry + out_l * wet, dry + out_r * wet)
    }

    pub fn clear(&mut self) {
        for comb in self.comb_l.iter_mut().chain(self.comb_r.iter_mut()) {
            comb.clear();
        }
        for allpass in self.allpass_l.iter_mut().chain(self.allpass_r.iter_mut()) {
            allpass.clear();
        }
        self.pre_delay_line.fill(0.0);
        self.pre_delay_pos = 0;
    }

    /// Free all delay lines. Processing afterwards is a dry pass-through.
    pub fn release_buffers(&mut self) {
        self.comb_l = Vec::new();
        self.comb_r = Vec::new();
        self.allpass_l = Vec::new();
        self.allpass_r = Vec::new();
        self.pre_delay_line = Vec::new();
    }

    pub fn is_released(&self) -> bool {
        self.pre_delay_line.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reverb(decay: f64, pre_delay: f64, wet: f64) -> Reverb {
        let mut r = Reverb::new(44100.0);
        r.set_params_immediate(decay, pre_delay, wet);
        r
    }

    #[test]
    fn passthrough_when_dry() {
        let mut r = reverb(1.5, 0.0, 0.0);
        let (l, rr) = r.process(0.5);
        assert!((l - 0.5).abs() < 1e-6);
        assert!((rr - 0.5).abs() < 1e-6);
    }

    #[test]
    fn produces_tail_after_impulse() {
        let mut r = reverb(1.5, 0.0, 1.0);
        r.process(1.0);
        let found = (0..5000).any(|_| {
            let (l, rr) = r.process(0.0);
            l.abs() > 1e-4 || rr.abs() > 1e-4
        });
        assert!(found, "Reverb should produce output after impulse");
    }

    #[test]
    fn pre_delay_holds_back_the_tail() {
        let mut r = reverb(1.5, 0.1, 1.0);
        r.process(1.0);
        // Earliest comb output is pre-delay + shortest comb (~25 ms).
        for _ in 0..4410 {
            let (l, rr) = r.process(0.0);
            assert!(l.abs() < 1e-9 && rr.abs() < 1e-9);
        }
    }

    #[test]
    fn longer_decay_rings_longer() {
        let energy_after = |decay: f64| {
            let mut r = reverb(decay, 0.0, 1.0);
            r.process(1.0);
            for _ in 0..22050 {
                r.process(0.0);
            }
            (0..4410)
                .map(|_| {
                    let (l, rr) = r.process(0.0);
                    l * l + rr * rr
                })
                .sum::<f32>()
        };
        assert!(energy_after(4.0) > energy_after(0.3) * 10.0);
    }

    #[test]
    fn short_decay_dies_out() {
        let mut r = reverb(0.2, 0.0, 1.0);
        r.process(1.0);
        for _ in 0..44100 {
            r.process(0.0);
        }
        let (l, rr) = r.process(0.0);
        assert!(l.abs() < 1e-4 && rr.abs() < 1e-4);
    }

    #[test]
    fn released_reverb_is_dry() {
        let mut r = reverb(1.5, 0.01, 1.0);
        r.release_buffers();
        r.release_buffers();
        assert!(r.is_released());
        assert_eq!(r.process(0.3), (0.3, 0.3));
    }
}
