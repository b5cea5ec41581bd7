//! Parameter router: the single writer of the parameter model.
//!
//! Every edit is clamped, stored, and (for categories that shape sounding
//! notes) published into the engine context's live control cells. Chains pick
//! published values up at the start of their next block. Envelope edits are
//! stored only; they reach a voice through the snapshot taken at note-on.

use std::sync::Arc;

use crate::context::EngineContext;
use crate::error::Result;
use crate::params::{Category, ParamKey, ParameterModel};

/// Observer fired after each edit with the updated model.
pub type ParamsCallback = Box<dyn FnMut(&ParameterModel) + Send>;

pub struct ParameterRouter {
    context: Arc<EngineContext>,
    model: ParameterModel,
    subscribers: Vec<ParamsCallback>,
}

impl ParameterRouter {
    /// `context` is expected to be seeded from the same model.
    pub fn new(context: Arc<EngineContext>, model: &ParameterModel) -> Self {
        ParameterRouter {
            context,
            model: model.clamp(),
            subscribers: Vec::new(),
        }
    }

    pub fn model(&self) -> &ParameterModel {
        &self.model
    }

    /// Set `category.field` to `value`. Returns the value actually stored.
    pub fn apply(&mut self, category: Category, field: &str, value: f64) -> Result<f64> {
        let key = ParamKey::parse(category, field).inspect_err(|e| tracing::warn!("{}", e))?;
        Ok(self.apply_key(key, value))
    }

    /// Same as [`apply`](Self::apply) with the category given by name.
    pub fn apply_named(&mut self, category: &str, field: &str, value: f64) -> Result<f64> {
        let category = category
            .parse::<Category>()
            .inspect_err(|e| tracing::warn!("{}", e))?;
        self.apply(category, field, value)
    }

    pub fn apply_key(&mut self, key: ParamKey, value: f64) -> f64 {
        self.model = self.model.with(key, value);
        let category = key.category();
        if category.affects_sounding_notes() {
            self.context.controls().publish(category, &self.model);
        }
        self.notify();
        self.model.get(key)
    }

    /// Swap in a whole model, e.g. from a preset. Live categories are
    /// published at once; the envelope applies from the next note-on.
    pub fn replace_model(&mut self, model: &ParameterModel) {
        self.model = model.clamp();
        for category in Category::ALL {
            if category.affects_sounding_notes() {
                self.context.controls().publish(category, &self.model);
            }
        }
        self.notify();
    }

    pub fn subscribe(&mut self, callback: ParamsCallback) {
        self.subscribers.push(callback);
    }

    fn notify(&mut self) {
        let model = self.model;
        for callback in &mut self.subscribers {
            callback(&model);
        }
    }
}

impl std::fmt::Debug for ParameterRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterRouter")
            .field("model", &self.model)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
