//! Unison sawtooth oscillator, anti-aliased with PolyBLEP.
//!
//! The chain uses a single waveform family: up to eight detuned sawtooth
//! voices spread symmetrically across the detune spread.

/// Upper bound on unison voices.
pub const MAX_UNISON: usize = 8;

/// One band-limited sawtooth.
#[derive(Debug, Clone)]
pub struct SawOscillator {
    pub frequency: f64,
    /// Detune in cents.
    pub detune: f64,
    phase: f64,
    sample_rate: f64,
}

impl SawOscillator {
    pub fn new(sample_rate: f64) -> Self {
        SawOscillator {
            frequency: 440.0,
            detune: 0.0,
            phase: 0.0,
            sample_rate,
        }
    }

    fn phase_inc(&self) -> f64 {
        self.frequency * (2.0_f64).powf(self.detune / 1200.0) / self.sample_rate
    }

    pub fn next_sample(&mut self) -> f64 {
        let inc = self.phase_inc();
        let sample = 2.0 * self.phase - 1.0 - poly_blep(self.phase, inc);

        self.phase += inc;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        sample
    }

    /// Restart at `phase` in `[0, 1)`.
    pub fn reset(&mut self, phase: f64) {
        self.phase = phase.rem_euclid(1.0);
    }
}

/// PolyBLEP correction for the discontinuity at the phase wrap.
///
/// `t` is the phase in `[0, 1)`, `dt` the phase increment per sample.
fn poly_blep(t: f64, dt: f64) -> f64 {
    if t < dt {
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

/// A stack of detuned sawtooths.
#[derive(Debug, Clone)]
pub struct UnisonOscillator {
    voices: Vec<SawOscillator>,
    count: usize,
    spread: f64,
    amplitude: f64,
}

impl UnisonOscillator {
    pub fn new(sample_rate: f64, count: u8, spread: f64) -> Self {
        let mut osc = UnisonOscillator {
            voices: (0..MAX_UNISON).map(|_| SawOscillator::new(sample_rate)).collect(),
            count: 1,
            spread: 0.0,
            amplitude: 1.0,
        };
        osc.set_unison(count, spread);
        osc
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn spread(&self) -> f64 {
        self.spread
    }

    /// `count` in `1..=8`, `spread` in cents; callers pass sanitized values.
    pub fn set_unison(&mut self, count: u8, spread: f64) {
        self.count = (count as usize).clamp(1, MAX_UNISON);
        self.spread = spread;
        // Equal-power sum of uncorrelated voices.
        self.amplitude = 1.0 / (self.count as f64).sqrt();

        for (i, voice) in self.voices.iter_mut().take(self.count).enumerate() {
            let position = if self.count == 1 {
                0.0
            } else {
                (i as f64 / (self.count - 1) as f64) * 2.0 - 1.0
            };
            voice.detune = position * spread / 2.0;
        }
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        for voice in &mut self.voices {
            voice.frequency = frequency;
        }
    }

    /// Restart all voices with staggered phases so the stack does not start
    /// as one coherent spike.
    pub fn reset(&mut self) {
        for (i, voice) in self.voices.iter_mut().enumerate() {
            voice.reset(i as f64 / MAX_UNISON as f64);
        }
    }

    pub fn next_sample(&mut self) -> f64 {
        let sum: f64 = self.voices[..self.count]
            .iter_mut()
            .map(|v| v.next_sample())
            .sum();
        sum * self.amplitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saw_range() {
        let mut osc = SawOscillator::new(44100.0);
        osc.frequency = 440.0;
        for _ in 0..44100 {
            let s = osc.next_sample();
            assert!((-1.5..=1.5).contains(&s), "Saw out of range: {s}");
        }
    }

    #[test]
    fn detune_shifts_frequency() {
        let mut a = SawOscillator::new(44100.0);
        let mut b = SawOscillator::new(44100.0);
        a.frequency = 440.0;
        b.frequency = 440.0;
        b.detune = 1200.0;
        assert!((b.phase_inc() - 2.0 * a.phase_inc()).abs() < 1e-12);
    }

    #[test]
    fn unison_detunes_symmetrically() {
        let osc = UnisonOscillator::new(44100.0, 3, 20.0);
        let detunes: Vec<f64> = osc.voices[..3].iter().map(|v| v.detune).collect();
        assert_eq!(detunes, vec![-10.0, 0.0, 10.0]);
    }

    #[test]
    fn single_voice_is_centered() {
        let osc = UnisonOscillator::new(44100.0, 1, 50.0);
        assert_eq!(osc.count(), 1);
        assert_eq!(osc.voices[0].detune, 0.0);
    }

    #[test]
    fn count_is_bounded() {
        let mut osc = UnisonOscillator::new(44100.0, 0, 0.0);
        assert_eq!(osc.count(), 1);
        osc.set_unison(200, 10.0);
        assert_eq!(osc.count(), MAX_UNISON);
    }

    #[test]
    fn unison_output_stays_bounded() {
        let mut osc = UnisonOscillator::new(44100.0, 8, 50.0);
        osc.set_frequency(220.0);
        osc.reset();
        let bound = 1.5 * (MAX_UNISON as f64).sqrt();
        for _ in 0..44100 {
            let s = osc.next_sample();
            assert!(s.is_finite() && s.abs() <= bound, "unison sample {s}");
        }
    }
}
