//! Linear parameter ramps for zipper-free live edits.

/// Default ramp length for live parameter changes.
pub const RAMP_SECONDS: f32 = 0.005;

#[derive(Debug, Clone)]
pub struct SmoothedValue {
    current: f32,
    target: f32,
    step: f32,
    samples_remaining: u32,
    ramp_samples: u32,
}

impl SmoothedValue {
    pub fn new(initial: f32, ramp_seconds: f32, sample_rate: f32) -> Self {
        SmoothedValue {
            current: initial,
            target: initial,
            step: 0.0,
            samples_remaining: 0,
            ramp_samples: (ramp_seconds * sample_rate).max(1.0) as u32,
        }
    }

    #[inline]
    pub fn set_target(&mut self, target: f32) {
        if target == self.target {
            return;
        }
        self.target = target;
        self.samples_remaining = self.ramp_samples;
        self.step = (self.target - self.current) / self.samples_remaining as f32;
    }

    /// Jump without a ramp, e.g. when a voice is (re)configured while silent.
    #[inline]
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.step = 0.0;
        self.samples_remaining = 0;
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if self.samples_remaining > 0 {
            self.current += self.step;
            self.samples_remaining -= 1;
            if self.samples_remaining == 0 {
                self.current = self.target;
            }
        }
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }
}
