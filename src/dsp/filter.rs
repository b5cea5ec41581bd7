//! Cascaded lowpass filter.
//!
//! Each section is a 2nd-order RBJ lowpass (12 dB/oct); steeper rolloffs
//! cascade 2, 4 or 8 identical sections. Coefficients are shared by all
//! sections, state is per section.

use std::f64::consts::PI;

use crate::params::{CUTOFF, Rolloff};

/// Fixed resonance of every section.
pub const FILTER_Q: f64 = 1.0;

const MAX_SECTIONS: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
struct Coefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Coefficients {
    /// Audio EQ Cookbook lowpass, normalized by a0.
    fn lowpass(frequency: f64, q: f64, sample_rate: f64) -> Self {
        let w0 = 2.0 * PI * frequency / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let b1 = 1.0 - cos_w0;
        let b0 = b1 / 2.0;
        let a0 = 1.0 + alpha;
        Coefficients {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Direct Form II Transposed state.
#[derive(Debug, Clone, Copy, Default)]
struct Section {
    z1: f64,
    z2: f64,
}

impl Section {
    #[inline]
    fn process(&mut self, c: &Coefficients, input: f64) -> f64 {
        let output = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * output + self.z2;
        self.z2 = c.b2 * input - c.a2 * output;
        output
    }
}

#[derive(Debug, Clone)]
pub struct LowpassFilter {
    coefficients: Coefficients,
    sections: [Section; MAX_SECTIONS],
    rolloff: Rolloff,
    frequency: f64,
    sample_rate: f64,
}

impl LowpassFilter {
    pub fn new(frequency: f64, rolloff: Rolloff, sample_rate: f64) -> Self {
        let mut f = LowpassFilter {
            coefficients: Coefficients::default(),
            sections: [Section::default(); MAX_SECTIONS],
            rolloff,
            frequency: 0.0,
            sample_rate,
        };
        f.set_frequency(frequency);
        f
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn rolloff(&self) -> Rolloff {
        self.rolloff
    }

    /// Cutoff in Hz. Kept below Nyquist for stability.
    pub fn set_frequency(&mut self, frequency: f64) {
        let nyquist_guard = self.sample_rate * 0.45;
        self.frequency = CUTOFF.clamp(frequency).min(nyquist_guard);
        self.coefficients = Coefficients::lowpass(self.frequency, FILTER_Q, self.sample_rate);
    }

    pub fn set_rolloff(&mut self, rolloff: Rolloff) {
        if rolloff.sections() > self.rolloff.sections() {
            // Newly engaged sections start from rest.
            for s in &mut self.sections[self.rolloff.sections()..rolloff.sections()] {
                *s = Section::default();
            }
        }
        self.rolloff = rolloff;
    }

    pub fn process(&mut self, input: f64) -> f64 {
        let c = self.coefficients;
        self.sections[..self.rolloff.sections()]
            .iter_mut()
            .fold(input, |x, s| s.process(&c, x))
    }

    pub fn reset(&mut self) {
        self.sections = [Section::default(); MAX_SECTIONS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_amplitude(filter: &mut LowpassFilter, freq: f64, sample_rate: f64) -> f64 {
        let mut peak = 0.0_f64;
        for i in 0..8820 {
            let t = i as f64 / sample_rate;
            let out = filter.process((2.0 * PI * freq * t).sin());
            if i > 4410 {
                peak = peak.max(out.abs());
            }
        }
        peak
    }

    #[test]
    fn passes_dc() {
        let mut f = LowpassFilter::new(5000.0, Rolloff::Db24, 44100.0);
        let mut output = 0.0;
        for _ in 0..2000 {
            output = f.process(1.0);
        }
        assert!((output - 1.0).abs() < 0.001, "Lowpass should pass DC, got {output}");
    }

    #[test]
    fn steeper_rolloff_attenuates_more() {
        let mut shallow = LowpassFilter::new(500.0, Rolloff::Db12, 44100.0);
        let mut steep = LowpassFilter::new(500.0, Rolloff::Db48, 44100.0);
        let a = sine_amplitude(&mut shallow, 4000.0, 44100.0);
        let b = sine_amplitude(&mut steep, 4000.0, 44100.0);
        assert!(a < 0.05, "12 dB/oct at 3 octaves up: {a}");
        assert!(b < a / 10.0, "48 dB/oct should be far lower: {b} vs {a}");
    }

    #[test]
    fn cutoff_is_sanitized() {
        let mut f = LowpassFilter::new(8000.0, Rolloff::Db12, 44100.0);
        f.set_frequency(f64::NAN);
        assert_eq!(f.frequency(), CUTOFF.default);
        f.set_frequency(1.0);
        assert_eq!(f.frequency(), 20.0);
        f.set_frequency(1e9);
        assert!(f.frequency() < 22050.0);
    }

    #[test]
    fn output_finite_across_rolloffs() {
        for rolloff in Rolloff::ALL {
            let mut f = LowpassFilter::new(20_000.0, rolloff, 44100.0);
            for i in 0..10000 {
                let input = if i % 100 == 0 { 1.0 } else { 0.0 };
                let out = f.process(input);
                assert!(out.is_finite(), "{rolloff:?} not finite at {i}");
            }
        }
    }
}
