//! Offline renderer: plays a timed performance through an engine and
//! encodes the result as a WAV byte buffer.

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, EngineConfig};
use crate::error::Result;
use crate::note::NoteId;
use crate::preset::PresetRecord;

/// Something that happens at a point in a performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Press { note: NoteId },
    Release { note: NoteId },
    Param {
        category: String,
        field: String,
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    /// Seconds from the start.
    pub time: f64,
    #[serde(flatten)]
    pub action: Action,
}

/// A preset plus a list of timed events, rendered for `duration` seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<PresetRecord>,
    #[serde(default)]
    pub events: Vec<TimedEvent>,
    pub duration: f64,
}

impl Performance {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::error::EngineError::preset_json("performance", e))
    }
}

/// Render `performance` to planar stereo f32.
pub fn render(performance: &Performance, config: EngineConfig) -> Result<(Vec<f32>, Vec<f32>)> {
    let mut engine = Engine::new(config);
    if let Some(preset) = &performance.preset {
        engine.load_preset(preset)?;
    }

    let sample_rate = engine.sample_rate();
    let total = (performance.duration.max(0.0) * sample_rate) as usize;
    let mut left = vec![0.0_f32; total];
    let mut right = vec![0.0_f32; total];

    let mut events: Vec<&TimedEvent> = performance.events.iter().collect();
    events.sort_by(|a, b| a.time.total_cmp(&b.time));

    let mut cursor = 0;
    for event in events {
        let at = ((event.time.max(0.0) * sample_rate) as usize).min(total);
        if at > cursor {
            engine.render(&mut left[cursor..at], &mut right[cursor..at]);
            cursor = at;
        }
        match &event.action {
            Action::Press { note } => {
                engine.note_on(*note);
            }
            Action::Release { note } => {
                engine.note_off(*note);
            }
            Action::Param {
                category,
                field,
                value,
            } => {
                engine.set_param(category, field, *value)?;
            }
        }
    }
    engine.render(&mut left[cursor..], &mut right[cursor..]);
    Ok((left, right))
}

/// Render `performance` to a WAV file as bytes (16-bit stereo PCM).
pub fn render_wav(performance: &Performance, config: EngineConfig) -> Result<Vec<u8>> {
    let (left, right) = render(performance, config)?;
    let pcm: Vec<i16> = left
        .iter()
        .zip(&right)
        .flat_map(|(&l, &r)| [to_i16(l), to_i16(r)])
        .collect();
    Ok(encode_wav(&pcm, config.effective_sample_rate() as u32, 2))
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Encode interleaved i16 PCM samples to a WAV byte buffer.
fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_size = (samples.len() * 2) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}
