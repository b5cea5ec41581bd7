//! DSP stages: the building blocks of a voice's signal chain.
//!
//! Everything here is plain per-sample processing with no knowledge of notes
//! or parameter routing. The same code runs in the AudioWorklet (via WASM)
//! and in the offline renderer.

pub mod bus;
pub mod chain;
pub mod channel;
pub mod delay;
pub mod envelope;
pub mod filter;
pub mod limiter;
pub mod oscillator;
pub mod reverb;
pub mod smooth;
