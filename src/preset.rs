//! Preset records as kept by the preset store.
//!
//! The store holds one flat JSON object per preset. Each parameter group is
//! itself a JSON document stored as a string, e.g.
//! `"envelope": "{\"attack\":0.01,\"decay\":0.1,\"sustain\":0.7,\"release\":0.3}"`.
//! The engine never owns `id`, timestamps or the deletion password; it only
//! carries them through.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::params::ParameterModel;

/// Flat preset record with string-encoded parameter groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oscillator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain_limiter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Deletion credential, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl PresetRecord {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::preset_json("record", e))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| EngineError::preset_json("record", e))
    }
}

/// Decode a record into a clamped model. Missing groups and missing fields
/// take their defaults; any group that is not valid JSON fails the load.
pub fn load_model(record: &PresetRecord) -> Result<ParameterModel> {
    let model = ParameterModel {
        envelope: decode_group("envelope", record.envelope.as_deref())?,
        oscillator: decode_group("oscillator", record.oscillator.as_deref())?,
        filter: decode_group("filter", record.filter.as_deref())?,
        delay: decode_group("delay", record.delay.as_deref())?,
        reverb: decode_group("reverb", record.reverb.as_deref())?,
        gain_limiter: decode_group("gainLimiter", record.gain_limiter.as_deref())?,
        volume: decode_group("volume", record.volume.as_deref())?,
    };
    Ok(model.clamp())
}

/// Encode `model` as a new record named `name`.
pub fn save_model(model: &ParameterModel, name: &str) -> Result<PresetRecord> {
    let model = model.clamp();
    Ok(PresetRecord {
        name: name.to_string(),
        envelope: Some(encode_group("envelope", &model.envelope)?),
        oscillator: Some(encode_group("oscillator", &model.oscillator)?),
        filter: Some(encode_group("filter", &model.filter)?),
        delay: Some(encode_group("delay", &model.delay)?),
        reverb: Some(encode_group("reverb", &model.reverb)?),
        gain_limiter: Some(encode_group("gainLimiter", &model.gain_limiter)?),
        volume: Some(encode_group("volume", &model.volume)?),
        ..PresetRecord::default()
    })
}

fn decode_group<T: DeserializeOwned + Default>(
    group: &'static str,
    json: Option<&str>,
) -> Result<T> {
    match json {
        Some(s) if !s.trim().is_empty() => {
            serde_json::from_str(s).map_err(|e| EngineError::preset_json(group, e))
        }
        _ => Ok(T::default()),
    }
}

fn encode_group<T: Serialize>(group: &'static str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| EngineError::preset_json(group, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamKey, Rolloff};

    const STORED: &str = r#"{
        "id": "p-17",
        "name": "Glass Pad",
        "envelope": "{\"attack\":0.8,\"decay\":0.4,\"sustain\":0.6,\"release\":2.5}",
        "oscillator": "{\"count\":5,\"spread\":30}",
        "filter": "{\"frequency\":2400,\"rolloff\":-48}",
        "delay": "{\"wet\":0.25,\"delayTime\":0.375,\"feedback\":0.4}",
        "reverb": "{\"wet\":0.5,\"decay\":4,\"preDelay\":0.03}",
        "gainLimiter": "{\"gain\":1.5,\"threshold\":-6}",
        "volume": "{\"level\":-9}",
        "createdAt": "2024-03-01T10:00:00Z",
        "updatedAt": "2024-03-02T10:00:00Z",
        "password": "hunter2"
    }"#;

    #[test]
    fn loads_stored_record() {
        let record = PresetRecord::from_json(STORED).unwrap();
        assert_eq!(record.id.as_deref(), Some("p-17"));
        assert_eq!(record.password.as_deref(), Some("hunter2"));

        let m = load_model(&record).unwrap();
        assert_eq!(m.envelope.attack, 0.8);
        assert_eq!(m.oscillator.count, 5);
        assert_eq!(m.filter.rolloff, Rolloff::Db48);
        assert_eq!(m.delay.delay_time, 0.375);
        assert_eq!(m.reverb.pre_delay, 0.03);
        assert_eq!(m.gain_limiter.threshold, -6.0);
        assert_eq!(m.volume.level, -9.0);
    }

    #[test]
    fn missing_groups_and_fields_take_defaults() {
        let record = PresetRecord {
            name: "Sparse".into(),
            filter: Some(r#"{"frequency":500}"#.into()),
            ..PresetRecord::default()
        };
        let m = load_model(&record).unwrap();
        assert_eq!(m.filter.frequency, 500.0);
        assert_eq!(m.filter.rolloff, Rolloff::Db12);
        assert_eq!(m.envelope, ParameterModel::default().envelope);
    }

    #[test]
    fn out_of_range_values_are_clamped_on_load() {
        let record = PresetRecord {
            oscillator: Some(r#"{"count":12,"spread":80}"#.into()),
            volume: Some(r#"{"level":10}"#.into()),
            filter: Some(r#"{"rolloff":-90}"#.into()),
            ..PresetRecord::default()
        };
        let m = load_model(&record).unwrap();
        assert_eq!(m.oscillator.count, 8);
        assert_eq!(m.oscillator.spread, 50.0);
        assert_eq!(m.volume.level, 0.0);
        assert_eq!(m.filter.rolloff, Rolloff::Db96);
    }

    #[test]
    fn malformed_group_names_the_group() {
        let record = PresetRecord {
            reverb: Some("{wet: 0.5".into()),
            ..PresetRecord::default()
        };
        match load_model(&record) {
            Err(EngineError::PresetJson { group, .. }) => assert_eq!(group, "reverb"),
            other => panic!("expected PresetJson, got {other:?}"),
        }
    }

    #[test]
    fn save_then_load_restores_model() {
        let model = ParameterModel::default()
            .with(ParamKey::Sustain, 0.25)
            .with(ParamKey::FilterRolloff, -24.0)
            .with(ParamKey::ReverbWet, 0.4);
        let record = save_model(&model, "Saved").unwrap();
        assert_eq!(record.name, "Saved");
        assert!(record.id.is_none() && record.password.is_none());

        let json = record.to_json().unwrap();
        assert!(json.contains("\"gainLimiter\""));
        let reloaded = load_model(&PresetRecord::from_json(&json).unwrap()).unwrap();
        assert_eq!(reloaded, model);
    }
}
