//! Feedback delay: mono delay line with feedback and wet mix.

use super::smooth::{RAMP_SECONDS, SmoothedValue};

/// A feedback delay whose time, feedback and mix can change while running.
///
/// The buffer holds up to `max_delay_seconds`; reads interpolate linearly so
/// live delay-time edits do not click.
#[derive(Debug, Clone)]
pub struct Delay {
    buffer: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,

    /// Delay time in seconds.
    delay_time: f64,
    feedback: SmoothedValue,
    wet: SmoothedValue,
    time_samples: SmoothedValue,
}

impl Delay {
    pub fn new(sample_rate: f64, max_delay_seconds: f64) -> Self {
        let buffer_size = (sample_rate * max_delay_seconds) as usize + 2;
        let sr = sample_rate as f32;
        Delay {
            buffer: vec![0.0; buffer_size],
            write_pos: 0,
            sample_rate,
            delay_time: 0.0,
            feedback: SmoothedValue::new(0.0, RAMP_SECONDS, sr),
            wet: SmoothedValue::new(0.0, RAMP_SECONDS, sr),
            // Time changes glide a little slower to avoid pitch chirps.
            time_samples: SmoothedValue::new(1.0, RAMP_SECONDS * 4.0, sr),
        }
    }

    pub fn delay_time(&self) -> f64 {
        self.delay_time
    }

    pub fn wet(&self) -> f64 {
        self.wet.target() as f64
    }

    pub fn feedback(&self) -> f64 {
        self.feedback.target() as f64
    }

    /// Set time (s), feedback and wet mix. Values are assumed sanitized;
    /// the time is additionally bounded by the buffer length.
    pub fn set_params(&mut self, delay_time: f64, feedback: f64, wet: f64) {
        self.delay_time = delay_time;
        self.time_samples.set_target(self.time_in_samples(delay_time));
        self.feedback.set_target(feedback.clamp(0.0, 0.99) as f32);
        self.wet.set_target(wet.clamp(0.0, 1.0) as f32);
    }

    /// Same as [`set_params`](Self::set_params) without ramps, for a silent voice.
    pub fn set_params_immediate(&mut self, delay_time: f64, feedback: f64, wet: f64) {
        self.delay_time = delay_time;
        self.time_samples.set_immediate(self.time_in_samples(delay_time));
        self.feedback.set_immediate(feedback.clamp(0.0, 0.99) as f32);
        self.wet.set_immediate(wet.clamp(0.0, 1.0) as f32);
    }

    fn time_in_samples(&self, seconds: f64) -> f32 {
        let max = (self.buffer.len() - 2) as f64;
        (seconds * self.sample_rate).clamp(1.0, max.max(1.0)) as f32
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let len = self.buffer.len();
        if len == 0 {
            return input;
        }
        let delay = self.time_samples.next_sample();
        let feedback = self.feedback.next_sample();
        let wet = self.wet.next_sample();

        let read = self.write_pos as f32 - delay;
        let read = if read < 0.0 { read + len as f32 } else { read };
        let i0 = read as usize % len;
        let i1 = (i0 + 1) % len;
        let frac = read - read.floor();
        let delayed = self.buffer[i0] + (self.buffer[i1] - self.buffer[i0]) * frac;

        self.buffer[self.write_pos] = input + delayed * feedback;
        self.write_pos = (self.write_pos + 1) % len;

        input * (1.0 - wet) + delayed * wet
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }

    /// Free the delay line. Processing afterwards is a pass-through.
    pub fn release_buffer(&mut self) {
        self.buffer = Vec::new();
    }

    pub fn is_released(&self) -> bool {
        self.buffer.is_empty()
    }
}
