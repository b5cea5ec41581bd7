pub mod context;
pub mod dispatcher;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod lockfree;
pub mod note;
pub mod params;
pub mod preset;
pub mod renderer;
pub mod router;
pub mod voice_pool;

pub use engine::{Engine, EngineConfig};
pub use error::EngineError;
pub use note::NoteId;
pub use params::{Category, ParamKey, ParameterModel};

use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the polysynth-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{e}"))
}

/// WASM-exposed engine, driven from the AudioWorklet and the page.
#[wasm_bindgen]
pub struct WebSynth {
    engine: Engine,
}

#[wasm_bindgen]
impl WebSynth {
    #[wasm_bindgen(constructor)]
    pub fn new(sample_rate: f64) -> WebSynth {
        WebSynth {
            engine: Engine::new(EngineConfig {
                sample_rate,
                ..EngineConfig::default()
            }),
        }
    }

    /// Build from a config object (`{ sampleRate, maxVoices, tailGrace, masterVolumeDb }`).
    #[wasm_bindgen(js_name = withConfig)]
    pub fn with_config(config: JsValue) -> Result<WebSynth, JsValue> {
        let config: EngineConfig = serde_wasm_bindgen::from_value(config).map_err(js_error)?;
        Ok(WebSynth {
            engine: Engine::new(config),
        })
    }

    #[wasm_bindgen(js_name = noteOn)]
    pub fn note_on(&mut self, note: &str) -> Result<bool, JsValue> {
        self.engine.note_on_named(note).map_err(js_error)
    }

    #[wasm_bindgen(js_name = noteOff)]
    pub fn note_off(&mut self, note: &str) -> Result<bool, JsValue> {
        self.engine.note_off_named(note).map_err(js_error)
    }

    /// Release every held key; returns the note names that were held.
    #[wasm_bindgen(js_name = releaseAll)]
    pub fn release_all(&mut self) -> Vec<String> {
        self.engine
            .release_all()
            .into_iter()
            .map(|n| n.to_string())
            .collect()
    }

    #[wasm_bindgen(js_name = setParam)]
    pub fn set_param(&mut self, category: &str, field: &str, value: f64) -> Result<f64, JsValue> {
        self.engine.set_param(category, field, value).map_err(js_error)
    }

    /// Load a stored preset record given as JSON. The current parameters are
    /// kept if it cannot be read.
    #[wasm_bindgen(js_name = loadPreset)]
    pub fn load_preset(&mut self, json: &str) -> Result<(), JsValue> {
        self.engine.load_preset_json(json).map_err(js_error)
    }

    /// Current parameters as a preset record JSON string.
    #[wasm_bindgen(js_name = savePreset)]
    pub fn save_preset(&self, name: &str) -> Result<String, JsValue> {
        self.engine
            .save_preset(name)
            .and_then(|record| record.to_json())
            .map_err(js_error)
    }

    /// Current parameter model as a JS object.
    pub fn params(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(self.engine.params()).map_err(js_error)
    }

    #[wasm_bindgen(js_name = pressedNotes)]
    pub fn pressed_notes(&self) -> Vec<String> {
        self.engine
            .pressed_notes()
            .into_iter()
            .map(|n| n.to_string())
            .collect()
    }

    #[wasm_bindgen(js_name = activeVoices)]
    pub fn active_voices(&self) -> usize {
        self.engine.active_voices()
    }

    #[wasm_bindgen(js_name = setMasterVolume)]
    pub fn set_master_volume(&self, db: f64) {
        self.engine.set_master_volume(db);
    }

    /// Fill one AudioWorklet quantum.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.engine.render(left, right);
    }

    #[wasm_bindgen(js_name = shrinkIdle)]
    pub fn shrink_idle(&mut self) -> usize {
        self.engine.shrink_idle()
    }
}

/// WASM-exposed: render a performance JSON document to WAV bytes.
#[wasm_bindgen]
pub fn render_performance_wav(json: &str, sample_rate: f64) -> Result<Vec<u8>, JsValue> {
    let performance = renderer::Performance::from_json(json).map_err(js_error)?;
    let config = EngineConfig {
        sample_rate,
        ..EngineConfig::default()
    };
    renderer::render_wav(&performance, config).map_err(js_error)
}
