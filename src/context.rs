//! Engine context: the one audio context every chain is built against.
//!
//! Holds the sample rate, the master (destination) level and the live
//! control cells the router publishes into.
//! Shared as `Arc<EngineContext>`; nothing in it needs a lock.

use std::sync::Arc;

use crate::lockfree::{AtomicDouble, Revision};
use crate::params::{Category, ParameterModel, VOLUME};

/// Widest live categories (delay, reverb) have three fields.
const MAX_FIELDS: usize = 3;

/// Every category except the envelope, which only reaches voices through
/// the note-on snapshot.
const LIVE_GROUPS: usize = Category::COUNT - 1;

/// Published values of one parameter category, in `Category::keys()` order.
#[derive(Debug, Default)]
struct ControlGroup {
    revision: Revision,
    values: [AtomicDouble; MAX_FIELDS],
}

/// Last-value-wins cells for every live parameter.
#[derive(Debug, Default)]
pub struct LiveControls {
    groups: [ControlGroup; LIVE_GROUPS],
}

impl LiveControls {
    /// Seed every live group from `model` without bumping revisions.
    pub fn seeded(model: &ParameterModel) -> Self {
        let controls = LiveControls::default();
        for category in Category::ALL {
            controls.store(category, model);
        }
        controls
    }

    fn group(&self, category: Category) -> Option<&ControlGroup> {
        let slot = match category {
            Category::Envelope => return None,
            Category::Oscillator => 0,
            Category::Filter => 1,
            Category::Delay => 2,
            Category::Reverb => 3,
            Category::GainLimiter => 4,
            Category::Volume => 5,
        };
        self.groups.get(slot)
    }

    fn store(&self, category: Category, model: &ParameterModel) {
        if let Some(group) = self.group(category) {
            for (cell, key) in group.values.iter().zip(category.keys()) {
                cell.set(model.get(*key));
            }
        }
    }

    /// Publish `category` from `model`. Never blocks. Envelope publishes are
    /// ignored and report revision 0.
    pub fn publish(&self, category: Category, model: &ParameterModel) -> u64 {
        self.store(category, model);
        self.group(category).map_or(0, |g| g.revision.bump())
    }

    pub fn revision(&self, category: Category) -> u64 {
        self.group(category).map_or(0, |g| g.revision.current())
    }

    /// Current revisions of all categories, indexed by `Category::index()`.
    pub fn revisions(&self) -> [u64; Category::COUNT] {
        let mut out = [0; Category::COUNT];
        for category in Category::ALL {
            out[category.index()] = self.revision(category);
        }
        out
    }

    /// Overlay the published values of `category` onto `model`.
    pub fn read_into(&self, category: Category, model: &ParameterModel) -> ParameterModel {
        let Some(group) = self.group(category) else {
            return *model;
        };
        group
            .values
            .iter()
            .zip(category.keys())
            .fold(*model, |m, (cell, key)| m.with(*key, cell.get()))
    }
}

#[derive(Debug)]
pub struct EngineContext {
    sample_rate: f64,
    controls: LiveControls,
    master_volume_db: AtomicDouble,
}

impl EngineContext {
    pub fn new(sample_rate: f64, model: &ParameterModel, master_volume_db: f64) -> Arc<Self> {
        Arc::new(EngineContext {
            sample_rate,
            controls: LiveControls::seeded(model),
            master_volume_db: AtomicDouble::new(VOLUME.clamp(master_volume_db)),
        })
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn controls(&self) -> &LiveControls {
        &self.controls
    }

    /// Destination level in dB, never above 0.
    pub fn master_volume_db(&self) -> f64 {
        self.master_volume_db.get()
    }

    pub fn set_master_volume_db(&self, db: f64) {
        self.master_volume_db.set(VOLUME.clamp(db));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamKey;

    #[test]
    fn publish_bumps_only_its_category() {
        let ctx = EngineContext::new(48_000.0, &ParameterModel::default(), -3.0);
        let before = ctx.controls().revisions();

        let model = ParameterModel::default().with(ParamKey::FilterFrequency, 500.0);
        ctx.controls().publish(Category::Filter, &model);

        let after = ctx.controls().revisions();
        for c in Category::ALL {
            let bumped = after[c.index()] != before[c.index()];
            assert_eq!(bumped, c == Category::Filter, "{c}");
        }
    }

    #[test]
    fn read_into_overlays_published_values() {
        let ctx = EngineContext::new(48_000.0, &ParameterModel::default(), 0.0);
        let edited = ParameterModel::default()
            .with(ParamKey::DelayWet, 0.8)
            .with(ParamKey::DelayTime, 0.5)
            .with(ParamKey::Attack, 1.0);
        ctx.controls().publish(Category::Delay, &edited);

        let seen = ctx
            .controls()
            .read_into(Category::Delay, &ParameterModel::default());
        assert_eq!(seen.delay, edited.delay);
        // Other categories are not touched by a delay read.
        assert_eq!(seen.envelope, ParameterModel::default().envelope);
    }

    #[test]
    fn envelope_has_no_live_cells() {
        let ctx = EngineContext::new(48_000.0, &ParameterModel::default(), 0.0);
        let slow = ParameterModel::default().with(ParamKey::Attack, 1.5);

        assert_eq!(ctx.controls().publish(Category::Envelope, &slow), 0);
        assert_eq!(ctx.controls().revision(Category::Envelope), 0);
        let seen = ctx.controls().read_into(Category::Envelope, &ParameterModel::default());
        assert_eq!(seen.envelope, ParameterModel::default().envelope);
    }

    #[test]
    fn master_volume_never_boosts() {
        let ctx = EngineContext::new(44_100.0, &ParameterModel::default(), 6.0);
        assert_eq!(ctx.master_volume_db(), 0.0);
        ctx.set_master_volume_db(-12.0);
        assert_eq!(ctx.master_volume_db(), -12.0);
        ctx.set_master_volume_db(f64::NAN);
        assert_eq!(ctx.master_volume_db(), VOLUME.default);
    }
}
