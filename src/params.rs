//! Parameter model: every synthesis and effect parameter with its declared range.
//!
//! The model is a plain value: edits produce a new model (`with`) and
//! `clamp()` forces every field back into its declared range. Nothing here
//! touches audio state; the router and the chains consume these values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EngineError, Result};

/// Declared range of a numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    /// UI step size. Values are not snapped to it.
    pub step: f64,
    pub default: f64,
}

impl ParamRange {
    pub const fn new(min: f64, max: f64, step: f64, default: f64) -> Self {
        ParamRange { min, max, step, default }
    }

    /// Force `value` into range. NaN resolves to the default.
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            self.default
        } else {
            value.clamp(self.min, self.max)
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

pub const ATTACK: ParamRange = ParamRange::new(0.001, 2.0, 0.001, 0.01);
pub const DECAY: ParamRange = ParamRange::new(0.001, 2.0, 0.001, 0.1);
pub const SUSTAIN: ParamRange = ParamRange::new(0.0, 1.0, 0.01, 0.7);
pub const RELEASE: ParamRange = ParamRange::new(0.001, 5.0, 0.001, 0.3);
pub const OSC_COUNT: ParamRange = ParamRange::new(1.0, 8.0, 1.0, 3.0);
pub const OSC_SPREAD: ParamRange = ParamRange::new(0.0, 50.0, 1.0, 20.0);
pub const CUTOFF: ParamRange = ParamRange::new(20.0, 20_000.0, 1.0, 8_000.0);
pub const ROLLOFF: ParamRange = ParamRange::new(-96.0, -12.0, 12.0, -12.0);
pub const DELAY_WET: ParamRange = ParamRange::new(0.0, 1.0, 0.01, 0.0);
pub const DELAY_TIME: ParamRange = ParamRange::new(0.0, 1.0, 0.01, 0.25);
pub const DELAY_FEEDBACK: ParamRange = ParamRange::new(0.0, 0.95, 0.01, 0.3);
pub const REVERB_WET: ParamRange = ParamRange::new(0.0, 1.0, 0.01, 0.0);
pub const REVERB_DECAY: ParamRange = ParamRange::new(0.1, 10.0, 0.1, 1.5);
pub const REVERB_PRE_DELAY: ParamRange = ParamRange::new(0.0, 0.5, 0.01, 0.01);
pub const GAIN: ParamRange = ParamRange::new(0.0, 4.0, 0.01, 1.0);
pub const LIMITER_THRESHOLD: ParamRange = ParamRange::new(-60.0, 0.0, 1.0, -3.0);
pub const VOLUME: ParamRange = ParamRange::new(-60.0, 0.0, 1.0, -6.0);

// ── Filter cutoff log scale ─────────────────────────────────

/// Map a linear control position in `[0, 1]` to a cutoff in Hz on
/// `[20, 20000]`, exponentially, so equal control steps are equal ratios.
pub fn cutoff_from_control(position: f64) -> f64 {
    let position = if position.is_nan() {
        control_from_cutoff(CUTOFF.default)
    } else {
        position.clamp(0.0, 1.0)
    };
    CUTOFF.min * (CUTOFF.max / CUTOFF.min).powf(position)
}

/// Inverse of [`cutoff_from_control`].
pub fn control_from_cutoff(hz: f64) -> f64 {
    let hz = CUTOFF.clamp(hz);
    (hz / CUTOFF.min).ln() / (CUTOFF.max / CUTOFF.min).ln()
}

// ── Rolloff ─────────────────────────────────────────────────

/// Lowpass steepness in dB/octave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub enum Rolloff {
    #[default]
    Db12,
    Db24,
    Db48,
    Db96,
}

impl Rolloff {
    /// Legal values in ascending-magnitude order.
    pub const ALL: [Rolloff; 4] = [Rolloff::Db12, Rolloff::Db24, Rolloff::Db48, Rolloff::Db96];

    pub fn db_per_octave(self) -> f64 {
        match self {
            Rolloff::Db12 => -12.0,
            Rolloff::Db24 => -24.0,
            Rolloff::Db48 => -48.0,
            Rolloff::Db96 => -96.0,
        }
    }

    /// Number of cascaded 12 dB/oct biquad sections.
    pub fn sections(self) -> usize {
        match self {
            Rolloff::Db12 => 1,
            Rolloff::Db24 => 2,
            Rolloff::Db48 => 4,
            Rolloff::Db96 => 8,
        }
    }

    /// Nearest legal rolloff by absolute difference. Ties keep the
    /// shallower candidate.
    pub fn snap(db: f64) -> Rolloff {
        if db.is_nan() {
            return Rolloff::default();
        }
        if db.is_infinite() {
            return if db < 0.0 { Rolloff::Db96 } else { Rolloff::Db12 };
        }
        let mut best = Rolloff::ALL[0];
        let mut best_diff = (db - best.db_per_octave()).abs();
        for candidate in &Rolloff::ALL[1..] {
            let diff = (db - candidate.db_per_octave()).abs();
            if diff < best_diff {
                best = *candidate;
                best_diff = diff;
            }
        }
        best
    }
}

impl From<f64> for Rolloff {
    fn from(db: f64) -> Self {
        Rolloff::snap(db)
    }
}

impl From<Rolloff> for f64 {
    fn from(r: Rolloff) -> Self {
        r.db_per_octave()
    }
}

// ── Parameter groups ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeParams {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        EnvelopeParams {
            attack: ATTACK.default,
            decay: DECAY.default,
            sustain: SUSTAIN.default,
            release: RELEASE.default,
        }
    }
}

impl EnvelopeParams {
    pub fn clamp(&self) -> Self {
        EnvelopeParams {
            attack: ATTACK.clamp(self.attack),
            decay: DECAY.clamp(self.decay),
            sustain: SUSTAIN.clamp(self.sustain),
            release: RELEASE.clamp(self.release),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscillatorParams {
    /// Number of unison voices, 1..=8.
    #[serde(deserialize_with = "voice_count_from_number")]
    pub count: u8,
    /// Detune spread across the unison voices, in cents.
    pub spread: f64,
}

impl Default for OscillatorParams {
    fn default() -> Self {
        OscillatorParams {
            count: OSC_COUNT.default as u8,
            spread: OSC_SPREAD.default,
        }
    }
}

impl OscillatorParams {
    pub fn clamp(&self) -> Self {
        OscillatorParams {
            count: voice_count(self.count as f64),
            spread: OSC_SPREAD.clamp(self.spread),
        }
    }
}

/// Round to the nearest integer, then clamp to the declared count range.
pub fn voice_count(value: f64) -> u8 {
    OSC_COUNT.clamp(value.round()) as u8
}

fn voice_count_from_number<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let v = f64::deserialize(deserializer)?;
    Ok(voice_count(v))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Cutoff in Hz.
    pub frequency: f64,
    pub rolloff: Rolloff,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            frequency: CUTOFF.default,
            rolloff: Rolloff::default(),
        }
    }
}

impl FilterParams {
    pub fn clamp(&self) -> Self {
        FilterParams {
            frequency: CUTOFF.clamp(self.frequency),
            rolloff: self.rolloff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelayParams {
    pub wet: f64,
    pub delay_time: f64,
    pub feedback: f64,
}

impl Default for DelayParams {
    fn default() -> Self {
        DelayParams {
            wet: DELAY_WET.default,
            delay_time: DELAY_TIME.default,
            feedback: DELAY_FEEDBACK.default,
        }
    }
}

impl DelayParams {
    pub fn clamp(&self) -> Self {
        DelayParams {
            wet: DELAY_WET.clamp(self.wet),
            delay_time: DELAY_TIME.clamp(self.delay_time),
            feedback: DELAY_FEEDBACK.clamp(self.feedback),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReverbParams {
    pub wet: f64,
    /// Decay (RT60) in seconds.
    pub decay: f64,
    pub pre_delay: f64,
}

impl Default for ReverbParams {
    fn default() -> Self {
        ReverbParams {
            wet: REVERB_WET.default,
            decay: REVERB_DECAY.default,
            pre_delay: REVERB_PRE_DELAY.default,
        }
    }
}

impl ReverbParams {
    pub fn clamp(&self) -> Self {
        ReverbParams {
            wet: REVERB_WET.clamp(self.wet),
            decay: REVERB_DECAY.clamp(self.decay),
            pre_delay: REVERB_PRE_DELAY.clamp(self.pre_delay),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainLimiterParams {
    /// Linear gain multiplier.
    pub gain: f64,
    /// Limiter threshold in dB.
    pub threshold: f64,
}

impl Default for GainLimiterParams {
    fn default() -> Self {
        GainLimiterParams {
            gain: GAIN.default,
            threshold: LIMITER_THRESHOLD.default,
        }
    }
}

impl GainLimiterParams {
    pub fn clamp(&self) -> Self {
        GainLimiterParams {
            gain: GAIN.clamp(self.gain),
            threshold: LIMITER_THRESHOLD.clamp(self.threshold),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeParams {
    /// Per-voice level in dB, never above 0.
    pub level: f64,
}

impl Default for VolumeParams {
    fn default() -> Self {
        VolumeParams { level: VOLUME.default }
    }
}

impl VolumeParams {
    pub fn clamp(&self) -> Self {
        VolumeParams {
            level: VOLUME.clamp(self.level),
        }
    }
}

/// The complete parameter record.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParameterModel {
    pub envelope: EnvelopeParams,
    pub oscillator: OscillatorParams,
    pub filter: FilterParams,
    pub delay: DelayParams,
    pub reverb: ReverbParams,
    pub gain_limiter: GainLimiterParams,
    pub volume: VolumeParams,
}

impl ParameterModel {
    /// A copy with every field forced into its declared range.
    pub fn clamp(&self) -> Self {
        ParameterModel {
            envelope: self.envelope.clamp(),
            oscillator: self.oscillator.clamp(),
            filter: self.filter.clamp(),
            delay: self.delay.clamp(),
            reverb: self.reverb.clamp(),
            gain_limiter: self.gain_limiter.clamp(),
            volume: self.volume.clamp(),
        }
    }

    pub fn get(&self, key: ParamKey) -> f64 {
        match key {
            ParamKey::Attack => self.envelope.attack,
            ParamKey::Decay => self.envelope.decay,
            ParamKey::Sustain => self.envelope.sustain,
            ParamKey::Release => self.envelope.release,
            ParamKey::OscillatorCount => self.oscillator.count as f64,
            ParamKey::OscillatorSpread => self.oscillator.spread,
            ParamKey::FilterFrequency => self.filter.frequency,
            ParamKey::FilterRolloff => self.filter.rolloff.db_per_octave(),
            ParamKey::DelayWet => self.delay.wet,
            ParamKey::DelayTime => self.delay.delay_time,
            ParamKey::DelayFeedback => self.delay.feedback,
            ParamKey::ReverbWet => self.reverb.wet,
            ParamKey::ReverbDecay => self.reverb.decay,
            ParamKey::ReverbPreDelay => self.reverb.pre_delay,
            ParamKey::Gain => self.gain_limiter.gain,
            ParamKey::LimiterThreshold => self.gain_limiter.threshold,
            ParamKey::VolumeLevel => self.volume.level,
        }
    }

    /// A copy with `key` set to `value`, sanitized for that field.
    pub fn with(&self, key: ParamKey, value: f64) -> Self {
        let mut next = *self;
        match key {
            ParamKey::Attack => next.envelope.attack = ATTACK.clamp(value),
            ParamKey::Decay => next.envelope.decay = DECAY.clamp(value),
            ParamKey::Sustain => next.envelope.sustain = SUSTAIN.clamp(value),
            ParamKey::Release => next.envelope.release = RELEASE.clamp(value),
            ParamKey::OscillatorCount => next.oscillator.count = voice_count(value),
            ParamKey::OscillatorSpread => next.oscillator.spread = OSC_SPREAD.clamp(value),
            ParamKey::FilterFrequency => next.filter.frequency = CUTOFF.clamp(value),
            ParamKey::FilterRolloff => next.filter.rolloff = Rolloff::snap(value),
            ParamKey::DelayWet => next.delay.wet = DELAY_WET.clamp(value),
            ParamKey::DelayTime => next.delay.delay_time = DELAY_TIME.clamp(value),
            ParamKey::DelayFeedback => next.delay.feedback = DELAY_FEEDBACK.clamp(value),
            ParamKey::ReverbWet => next.reverb.wet = REVERB_WET.clamp(value),
            ParamKey::ReverbDecay => next.reverb.decay = REVERB_DECAY.clamp(value),
            ParamKey::ReverbPreDelay => next.reverb.pre_delay = REVERB_PRE_DELAY.clamp(value),
            ParamKey::Gain => next.gain_limiter.gain = GAIN.clamp(value),
            ParamKey::LimiterThreshold => {
                next.gain_limiter.threshold = LIMITER_THRESHOLD.clamp(value)
            }
            ParamKey::VolumeLevel => next.volume.level = VOLUME.clamp(value),
        }
        next
    }
}

// ── Categories and field keys ───────────────────────────────

/// Parameter group, named as in the preset record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Envelope,
    Oscillator,
    Filter,
    Delay,
    Reverb,
    GainLimiter,
    Volume,
}

impl Category {
    pub const COUNT: usize = 7;

    pub const ALL: [Category; Category::COUNT] = [
        Category::Envelope,
        Category::Oscillator,
        Category::Filter,
        Category::Delay,
        Category::Reverb,
        Category::GainLimiter,
        Category::Volume,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Envelope => "envelope",
            Category::Oscillator => "oscillator",
            Category::Filter => "filter",
            Category::Delay => "delay",
            Category::Reverb => "reverb",
            Category::GainLimiter => "gainLimiter",
            Category::Volume => "volume",
        }
    }

    /// Position in [`Category::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Envelope edits only apply to future note-ons; every other group is
    /// pushed into sounding voices.
    pub fn affects_sounding_notes(self) -> bool {
        self != Category::Envelope
    }

    pub fn keys(self) -> &'static [ParamKey] {
        use ParamKey::*;
        match self {
            Category::Envelope => &[Attack, Decay, Sustain, Release],
            Category::Oscillator => &[OscillatorCount, OscillatorSpread],
            Category::Filter => &[FilterFrequency, FilterRolloff],
            Category::Delay => &[DelayWet, DelayTime, DelayFeedback],
            Category::Reverb => &[ReverbWet, ReverbDecay, ReverbPreDelay],
            Category::GainLimiter => &[Gain, LimiterThreshold],
            Category::Volume => &[VolumeLevel],
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| EngineError::UnknownCategory(s.to_string()))
    }
}

/// A single parameter field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKey {
    Attack,
    Decay,
    Sustain,
    Release,
    OscillatorCount,
    OscillatorSpread,
    FilterFrequency,
    FilterRolloff,
    DelayWet,
    DelayTime,
    DelayFeedback,
    ReverbWet,
    ReverbDecay,
    ReverbPreDelay,
    Gain,
    LimiterThreshold,
    VolumeLevel,
}

impl ParamKey {
    /// Resolve a field name within a category, e.g. `(Delay, "delayTime")`.
    pub fn parse(category: Category, field: &str) -> Result<ParamKey> {
        category
            .keys()
            .iter()
            .copied()
            .find(|k| k.field_name() == field)
            .ok_or_else(|| EngineError::UnknownField {
                category: category.name(),
                field: field.to_string(),
            })
    }

    pub fn category(self) -> Category {
        use ParamKey::*;
        match self {
            Attack | Decay | Sustain | Release => Category::Envelope,
            OscillatorCount | OscillatorSpread => Category::Oscillator,
            FilterFrequency | FilterRolloff => Category::Filter,
            DelayWet | DelayTime | DelayFeedback => Category::Delay,
            ReverbWet | ReverbDecay | ReverbPreDelay => Category::Reverb,
            Gain | LimiterThreshold => Category::GainLimiter,
            VolumeLevel => Category::Volume,
        }
    }

    /// Field name as it appears in the preset record.
    pub fn field_name(self) -> &'static str {
        use ParamKey::*;
        match self {
            Attack => "attack",
            Decay => "decay",
            Sustain => "sustain",
            Release => "release",
            OscillatorCount => "count",
            OscillatorSpread => "spread",
            FilterFrequency => "frequency",
            FilterRolloff => "rolloff",
            DelayWet | ReverbWet => "wet",
            DelayTime => "delayTime",
            DelayFeedback => "feedback",
            ReverbDecay => "decay",
            ReverbPreDelay => "preDelay",
            Gain => "gain",
            LimiterThreshold => "threshold",
            VolumeLevel => "level",
        }
    }

    pub fn range(self) -> ParamRange {
        use ParamKey::*;
        match self {
            Attack => ATTACK,
            Decay => DECAY,
            Sustain => SUSTAIN,
            Release => RELEASE,
            OscillatorCount => OSC_COUNT,
            OscillatorSpread => OSC_SPREAD,
            FilterFrequency => CUTOFF,
            FilterRolloff => ROLLOFF,
            DelayWet => DELAY_WET,
            DelayTime => DELAY_TIME,
            DelayFeedback => DELAY_FEEDBACK,
            ReverbWet => REVERB_WET,
            ReverbDecay => REVERB_DECAY,
            ReverbPreDelay => REVERB_PRE_DELAY,
            Gain => GAIN,
            LimiterThreshold => LIMITER_THRESHOLD,
            VolumeLevel => VOLUME,
        }
    }
}
