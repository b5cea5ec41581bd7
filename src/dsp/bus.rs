//! Master bus: the shared terminal output every voice chain feeds.

use super::limiter::db_to_gain;

/// Stereo summing bus with the destination volume and a soft clipper.
#[derive(Debug, Clone, Default)]
pub struct MasterBus {
    left: Vec<f32>,
    right: Vec<f32>,
}

impl MasterBus {
    pub fn new() -> Self {
        MasterBus::default()
    }

    /// Start a block of `frames` silent frames.
    pub fn begin(&mut self, frames: usize) {
        self.left.clear();
        self.left.resize(frames, 0.0);
        self.right.clear();
        self.right.resize(frames, 0.0);
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    /// Accumulate a stereo frame.
    #[inline]
    pub fn add(&mut self, index: usize, left: f32, right: f32) {
        if index < self.left.len() {
            self.left[index] += left;
            self.right[index] += right;
        }
    }

    /// Write the block to the outputs with the master level in dB applied,
    /// then soft clipped.
    pub fn finish(&self, master_db: f64, out_left: &mut [f32], out_right: &mut [f32]) {
        let gain = db_to_gain(master_db.min(0.0)) as f32;
        for (out, &s) in out_left.iter_mut().zip(&self.left) {
            *out = soft_clip(s * gain);
        }
        for (out, &s) in out_right.iter_mut().zip(&self.right) {
            *out = soft_clip(s * gain);
        }
    }
}

/// Soft clipper using tanh to prevent harsh digital clipping.
#[inline]
fn soft_clip(x: f32) -> f32 {
    x.tanh()
}
