//! Engine: owns the context, router, pool, dispatcher and master bus.
//!
//! Everything the host does goes through here: key events, parameter edits,
//! preset load/save and block rendering. The engine keeps a sample clock that
//! advances with every rendered frame; reclaim deadlines are measured on it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::EngineContext;
use crate::dispatcher::{InputSource, KeyEventDispatcher};
use crate::dsp::bus::MasterBus;
use crate::error::{EngineError, Result};
use crate::note::NoteId;
use crate::params::{Category, ParamKey, ParameterModel};
use crate::preset::{self, PresetRecord};
use crate::router::{ParameterRouter, ParamsCallback};
use crate::voice_pool::{DEFAULT_TAIL_GRACE, PoolConfig, VoicePool};

/// Largest block rendered in one pass; longer buffers are split.
pub const BLOCK_SIZE: usize = 128;

/// Host-supplied engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub sample_rate: f64,
    /// Polyphony cap; `None` for unbounded.
    pub max_voices: Option<usize>,
    /// Seconds after the release segment before a voice is force-reclaimed.
    pub tail_grace: f64,
    /// Destination level in dB, never above 0.
    pub master_volume_db: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 44100.0,
            max_voices: None,
            tail_grace: DEFAULT_TAIL_GRACE,
            master_volume_db: 0.0,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(EngineError::Config)
    }

    /// The configured rate, or the default if it is not a positive number.
    pub fn effective_sample_rate(&self) -> f64 {
        if self.sample_rate.is_finite() && self.sample_rate > 0.0 {
            self.sample_rate
        } else {
            EngineConfig::default().sample_rate
        }
    }

    fn pool(&self) -> PoolConfig {
        PoolConfig {
            max_voices: self.max_voices,
            tail_grace: self.tail_grace,
        }
    }
}

pub struct Engine {
    context: Arc<EngineContext>,
    router: ParameterRouter,
    pool: VoicePool,
    dispatcher: KeyEventDispatcher,
    bus: MasterBus,
    /// Frames rendered so far.
    clock: u64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine::with_model(config, &ParameterModel::default())
    }

    pub fn with_model(config: EngineConfig, model: &ParameterModel) -> Self {
        let model = model.clamp();
        let sample_rate = config.effective_sample_rate();
        let context = EngineContext::new(sample_rate, &model, config.master_volume_db);
        tracing::debug!("Engine started at {} Hz", sample_rate);
        Engine {
            router: ParameterRouter::new(Arc::clone(&context), &model),
            pool: VoicePool::new(Arc::clone(&context), config.pool()),
            dispatcher: KeyEventDispatcher::new(),
            bus: MasterBus::new(),
            clock: 0,
            context,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.context.sample_rate()
    }

    /// Frames rendered since the engine was created.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    // ── Keys ────────────────────────────────────────────────

    /// Press `note` with the current parameters as its snapshot. Returns
    /// false if the key was already held.
    pub fn note_on(&mut self, note: NoteId) -> bool {
        self.press(note, InputSource::default())
    }

    pub fn note_off(&mut self, note: NoteId) -> bool {
        self.release(note, InputSource::default())
    }

    pub fn press(&mut self, note: NoteId, source: InputSource) -> bool {
        let params = *self.router.model();
        self.dispatcher
            .press(note, source, &mut self.pool, &params)
            .is_some()
    }

    pub fn release(&mut self, note: NoteId, source: InputSource) -> bool {
        self.dispatcher
            .release(note, source, &mut self.pool, self.clock)
    }

    /// [`note_on`](Self::note_on) by note name, e.g. "C#4".
    pub fn note_on_named(&mut self, note: &str) -> Result<bool> {
        Ok(self.note_on(note.parse()?))
    }

    pub fn note_off_named(&mut self, note: &str) -> Result<bool> {
        Ok(self.note_off(note.parse()?))
    }

    /// Release every held key. Returns the notes that were held.
    pub fn release_all(&mut self) -> Vec<NoteId> {
        self.dispatcher.release_all(&mut self.pool, self.clock)
    }

    pub fn pressed_notes(&self) -> Vec<NoteId> {
        self.dispatcher.pressed_notes().collect()
    }

    /// Voices still producing sound, held or releasing.
    pub fn active_voices(&self) -> usize {
        self.pool.live_count()
    }

    pub fn pool(&self) -> &VoicePool {
        &self.pool
    }

    // ── Parameters ──────────────────────────────────────────

    pub fn params(&self) -> &ParameterModel {
        self.router.model()
    }

    /// Set one parameter by category and field name. Returns the stored value.
    pub fn set_param(&mut self, category: &str, field: &str, value: f64) -> Result<f64> {
        self.router.apply_named(category, field, value)
    }

    pub fn set(&mut self, key: ParamKey, value: f64) -> f64 {
        self.router.apply_key(key, value)
    }

    pub fn set_in(&mut self, category: Category, field: &str, value: f64) -> Result<f64> {
        self.router.apply(category, field, value)
    }

    pub fn on_params_change(&mut self, callback: ParamsCallback) {
        self.router.subscribe(callback);
    }

    pub fn master_volume(&self) -> f64 {
        self.context.master_volume_db()
    }

    pub fn set_master_volume(&self, db: f64) {
        self.context.set_master_volume_db(db);
    }

    // ── Presets ─────────────────────────────────────────────

    /// Replace the model from a stored record. On failure the current model
    /// is kept.
    pub fn load_preset(&mut self, record: &PresetRecord) -> Result<()> {
        let model = preset::load_model(record).inspect_err(|e| {
            tracing::warn!("Rejected preset '{}': {}", record.name, e);
        })?;
        self.router.replace_model(&model);
        tracing::debug!("Loaded preset '{}'", record.name);
        Ok(())
    }

    pub fn load_preset_json(&mut self, json: &str) -> Result<()> {
        let record = PresetRecord::from_json(json)
            .inspect_err(|e| tracing::warn!("Rejected preset: {}", e))?;
        self.load_preset(&record)
    }

    pub fn save_preset(&self, name: &str) -> Result<PresetRecord> {
        preset::save_model(self.router.model(), name)
    }

    // ── Audio ───────────────────────────────────────────────

    /// Render `min(left.len(), right.len())` frames, then reclaim voices
    /// whose tails have finished.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let mut offset = 0;
        while offset < frames {
            let n = (frames - offset).min(BLOCK_SIZE);
            self.bus.begin(n);
            self.pool.render(&mut self.bus);
            self.bus.finish(
                self.context.master_volume_db(),
                &mut left[offset..offset + n],
                &mut right[offset..offset + n],
            );
            self.clock += n as u64;
            self.pool.reclaim(self.clock);
            offset += n;
        }
    }

    /// Dispose idle voices to free their delay lines.
    pub fn shrink_idle(&mut self) -> usize {
        self.pool.shrink_idle()
    }

    /// Stop all sound at once and drop every voice.
    pub fn panic(&mut self) {
        self.dispatcher.release_all(&mut self.pool, self.clock);
        self.pool.clear();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sample_rate", &self.context.sample_rate())
            .field("clock", &self.clock)
            .field("pool", &self.pool)
            .finish()
    }
}
