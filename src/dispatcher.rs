//! Key event dispatcher: turns press/release events into pool calls.
//!
//! The pressed set is what the UI shows as held keys. It is kept apart from
//! voice state: a key can be up while its voice is still releasing.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::note::NoteId;
use crate::params::ParameterModel;
use crate::voice_pool::{NoteOnOutcome, VoicePool};

/// Where a key event came from. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputSource {
    #[default]
    Mouse,
    Touch,
    Keyboard,
    Midi,
}

#[derive(Debug, Default)]
pub struct KeyEventDispatcher {
    pressed: BTreeSet<NoteId>,
}

impl KeyEventDispatcher {
    pub fn new() -> Self {
        KeyEventDispatcher::default()
    }

    /// Press `note`. A key already held does not attack again; otherwise the
    /// note starts with `params` as its snapshot.
    pub fn press(
        &mut self,
        note: NoteId,
        source: InputSource,
        pool: &mut VoicePool,
        params: &ParameterModel,
    ) -> Option<NoteOnOutcome> {
        if !self.pressed.insert(note) {
            return None;
        }
        tracing::debug!("{:?} press {}", source, note);
        Some(pool.note_on(note, params))
    }

    /// Release `note`. Ignored unless it was pressed.
    pub fn release(
        &mut self,
        note: NoteId,
        source: InputSource,
        pool: &mut VoicePool,
        now: u64,
    ) -> bool {
        if !self.pressed.remove(&note) {
            return false;
        }
        tracing::debug!("{:?} release {}", source, note);
        pool.note_off(note, now);
        true
    }

    /// Release every held key, e.g. when the page loses focus.
    pub fn release_all(&mut self, pool: &mut VoicePool, now: u64) -> Vec<NoteId> {
        let held = std::mem::take(&mut self.pressed);
        for &note in &held {
            pool.note_off(note, now);
        }
        held.into_iter().collect()
    }

    pub fn is_pressed(&self, note: NoteId) -> bool {
        self.pressed.contains(&note)
    }

    /// Held keys, lowest first.
    pub fn pressed_notes(&self) -> impl Iterator<Item = NoteId> + '_ {
        self.pressed.iter().copied()
    }
}
