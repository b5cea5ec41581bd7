//! Voice pool: polyphonic allocator keyed by note.
//!
//! Slots live in an arena and are reused. A `NoteId → slot` map guarantees at
//! most one live chain per note. Each slot walks `Idle → Sounding →
//! Releasing → Idle`; the last step happens when the chain reports its tail
//! complete or when the scheduled reclaim deadline passes, whichever is first.
//!
//! Every (re)trigger bumps the slot's generation. Reclaim entries carry the
//! generation they were scheduled for, so a pending reclaim never hits a note
//! that was triggered again in the meantime.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::EngineContext;
use crate::dsp::bus::MasterBus;
use crate::dsp::chain::SignalChain;
use crate::note::NoteId;
use crate::params::ParameterModel;

/// Seconds added after the envelope release before a voice is force-reclaimed.
pub const DEFAULT_TAIL_GRACE: f64 = 1.0;

/// Longest grace accepted from config.
pub const MAX_TAIL_GRACE: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Sounding,
    Releasing,
}

/// Pool sizing and reclaim timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Polyphony cap. `None` grows the pool on demand.
    pub max_voices: Option<usize>,
    pub tail_grace: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_voices: None,
            tail_grace: DEFAULT_TAIL_GRACE,
        }
    }
}

impl PoolConfig {
    /// Replace a non-finite grace with the default and bound the rest.
    pub fn sanitized(self) -> Self {
        let tail_grace = if self.tail_grace.is_finite() {
            self.tail_grace.clamp(0.0, MAX_TAIL_GRACE)
        } else {
            DEFAULT_TAIL_GRACE
        };
        PoolConfig { tail_grace, ..self }
    }
}

/// What `note_on` did to satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteOnOutcome {
    /// A new slot was added to the pool.
    Allocated,
    /// An idle slot was reused.
    Reused,
    /// The note already had a live voice; it was restarted in place.
    Retriggered,
    /// The pool was full and the voice of this note was taken over.
    Stolen(NoteId),
}

/// One slot of the pool.
#[derive(Debug)]
pub struct Voice {
    chain: SignalChain,
    note: Option<NoteId>,
    state: VoiceState,
    snapshot: ParameterModel,
    generation: u64,
    /// Trigger order, used to pick the oldest voice when stealing.
    serial: u64,
}

impl Voice {
    pub fn note(&self) -> Option<NoteId> {
        self.note
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// Parameters captured when the note was last triggered.
    pub fn snapshot(&self) -> &ParameterModel {
        &self.snapshot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn chain(&self) -> &SignalChain {
        &self.chain
    }

    pub fn is_live(&self) -> bool {
        self.state != VoiceState::Idle
    }
}

pub struct VoicePool {
    context: Arc<EngineContext>,
    config: PoolConfig,
    slots: Vec<Voice>,
    by_note: HashMap<NoteId, usize>,
    free: Vec<usize>,
    /// (due sample, slot, generation), earliest first.
    reclaim_queue: BinaryHeap<Reverse<(u64, usize, u64)>>,
    next_serial: u64,
}

impl VoicePool {
    pub fn new(context: Arc<EngineContext>, config: PoolConfig) -> Self {
        VoicePool {
            context,
            config: config.sanitized(),
            slots: Vec::new(),
            by_note: HashMap::new(),
            free: Vec::new(),
            reclaim_queue: BinaryHeap::new(),
            next_serial: 0,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Start `note` with `snapshot`, reusing its voice if it is still live.
    pub fn note_on(&mut self, note: NoteId, snapshot: &ParameterModel) -> NoteOnOutcome {
        let snapshot = snapshot.clamp();
        let serial = self.bump_serial();

        if let Some(&slot) = self.by_note.get(&note) {
            let voice = &mut self.slots[slot];
            voice.generation += 1;
            voice.serial = serial;
            voice.snapshot = snapshot;
            voice.state = VoiceState::Sounding;
            voice.chain.start(note.frequency(), &snapshot);
            tracing::debug!("Retriggered {} in slot {}", note, slot);
            return NoteOnOutcome::Retriggered;
        }

        let (slot, outcome) = self.acquire_slot();
        let context = Arc::clone(&self.context);
        let voice = &mut self.slots[slot];
        if voice.chain.is_disposed() {
            voice.chain = SignalChain::new(context, &snapshot);
        } else {
            voice.chain.configure(&snapshot);
        }
        voice.note = Some(note);
        voice.state = VoiceState::Sounding;
        voice.snapshot = snapshot;
        voice.generation += 1;
        voice.serial = serial;
        voice.chain.start(note.frequency(), &snapshot);
        self.by_note.insert(note, slot);

        tracing::debug!("Note {} on slot {} ({:?})", note, slot, outcome);
        outcome
    }

    /// Begin the release of `note`. Returns false if it was not sounding.
    pub fn note_off(&mut self, note: NoteId, now: u64) -> bool {
        let Some(&slot) = self.by_note.get(&note) else {
            return false;
        };
        let voice = &mut self.slots[slot];
        if voice.state != VoiceState::Sounding {
            return false;
        }
        voice.state = VoiceState::Releasing;
        voice.chain.release();

        // Ring-out of wet effects plus grace, measured from the end of release.
        let tail = voice.snapshot.envelope.release
            + voice.chain.effects_tail_seconds()
            + self.config.tail_grace;
        let due = now.saturating_add((tail * self.context.sample_rate()).ceil() as u64);
        self.reclaim_queue
            .push(Reverse((due, slot, voice.generation)));
        true
    }

    /// Release every sounding voice. Returns how many were released.
    pub fn release_all(&mut self, now: u64) -> usize {
        let sounding: Vec<NoteId> = self
            .voices()
            .filter(|v| v.state == VoiceState::Sounding)
            .filter_map(|v| v.note)
            .collect();
        sounding
            .into_iter()
            .filter(|&note| self.note_off(note, now))
            .count()
    }

    /// Return finished voices to the free list: any Releasing voice whose
    /// tail is complete, and any whose reclaim deadline is at or before `now`.
    pub fn reclaim(&mut self, now: u64) -> usize {
        let mut reclaimed = 0;
        for slot in 0..self.slots.len() {
            let voice = &self.slots[slot];
            if voice.state == VoiceState::Releasing && voice.chain.tail_complete() {
                self.retire(slot);
                reclaimed += 1;
            }
        }

        while let Some(&Reverse((due, slot, generation))) = self.reclaim_queue.peek() {
            if due > now {
                break;
            }
            self.reclaim_queue.pop();
            let voice = &self.slots[slot];
            if voice.generation == generation && voice.state == VoiceState::Releasing {
                self.retire(slot);
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Render every live voice into `bus`.
    pub fn render(&mut self, bus: &mut MasterBus) {
        for voice in self.slots.iter_mut().filter(|v| v.is_live()) {
            voice.chain.render(bus);
        }
    }

    /// The live voice playing `note`, if any.
    pub fn voice(&self, note: NoteId) -> Option<&Voice> {
        self.by_note.get(&note).map(|&slot| &self.slots[slot])
    }

    /// Live (Sounding or Releasing) voices.
    pub fn voices(&self) -> impl Iterator<Item = &Voice> {
        self.slots.iter().filter(|v| v.is_live())
    }

    pub fn live_count(&self) -> usize {
        self.by_note.len()
    }

    /// Total slots, live and idle.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn idle_count(&self) -> usize {
        self.free.len()
    }

    /// Dispose idle chains and drop idle slots from the end of the arena.
    pub fn shrink_idle(&mut self) -> usize {
        let disposed = self.free.len();
        for &slot in &self.free {
            self.slots[slot].chain.dispose();
        }
        while self.slots.last().is_some_and(|v| !v.is_live()) {
            let last = self.slots.len() - 1;
            self.slots.pop();
            self.free.retain(|&slot| slot != last);
        }
        self.reclaim_queue
            .retain(|&Reverse((_, slot, _))| slot < self.slots.len());
        if disposed > 0 {
            tracing::debug!("Disposed {} idle voices", disposed);
        }
        disposed
    }

    /// Dispose every chain and empty the pool.
    pub fn clear(&mut self) {
        for voice in &mut self.slots {
            voice.chain.dispose();
        }
        self.slots.clear();
        self.by_note.clear();
        self.free.clear();
        self.reclaim_queue.clear();
    }

    fn bump_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    fn at_capacity(&self) -> bool {
        self.config
            .max_voices
            .is_some_and(|max| self.by_note.len() >= max.max(1))
    }

    fn acquire_slot(&mut self) -> (usize, NoteOnOutcome) {
        if self.at_capacity() {
            if let Some(slot) = self.steal_candidate() {
                let victim = self.slots[slot].note;
                self.retire(slot);
                self.free.retain(|&s| s != slot);
                if let Some(victim) = victim {
                    tracing::debug!("Voice limit reached, stealing {}", victim);
                    return (slot, NoteOnOutcome::Stolen(victim));
                }
                return (slot, NoteOnOutcome::Reused);
            }
        }
        if let Some(slot) = self.free.pop() {
            return (slot, NoteOnOutcome::Reused);
        }
        let chain = SignalChain::new(Arc::clone(&self.context), &ParameterModel::default());
        self.slots.push(Voice {
            chain,
            note: None,
            state: VoiceState::Idle,
            snapshot: ParameterModel::default(),
            generation: 0,
            serial: 0,
        });
        (self.slots.len() - 1, NoteOnOutcome::Allocated)
    }

    /// Oldest Releasing voice, else oldest Sounding voice.
    fn steal_candidate(&self) -> Option<usize> {
        let oldest = |state: VoiceState| {
            self.slots
                .iter()
                .enumerate()
                .filter(|(_, v)| v.state == state)
                .min_by_key(|(_, v)| v.serial)
                .map(|(slot, _)| slot)
        };
        oldest(VoiceState::Releasing).or_else(|| oldest(VoiceState::Sounding))
    }

    fn retire(&mut self, slot: usize) {
        let voice = &mut self.slots[slot];
        if let Some(note) = voice.note.take() {
            self.by_note.remove(&note);
            tracing::debug!("Reclaimed {} from slot {}", note, slot);
        }
        voice.state = VoiceState::Idle;
        voice.generation += 1;
        voice.chain.reset();
        self.free.push(slot);
    }
}

impl std::fmt::Debug for VoicePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePool")
            .field("live", &self.by_note.len())
            .field("slots", &self.slots.len())
            .field("free", &self.free.len())
            .field("pending_reclaims", &self.reclaim_queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamKey;

    const SR: f64 = 48000.0;

    fn note(name: &str) -> NoteId {
        name.parse().unwrap()
    }

    fn pool(config: PoolConfig) -> VoicePool {
        let ctx = EngineContext::new(SR, &ParameterModel::default(), 0.0);
        VoicePool::new(ctx, config)
    }

    fn render(pool: &mut VoicePool, blocks: usize) {
        let mut bus = MasterBus::new();
        for _ in 0..blocks {
            bus.begin(128);
            pool.render(&mut bus);
        }
    }

    #[test]
    fn repeated_note_on_keeps_one_voice() {
        let mut p = pool(PoolConfig::default());
        let model = ParameterModel::default();
        assert_eq!(p.note_on(note("C4"), &model), NoteOnOutcome::Allocated);
        assert_eq!(p.note_on(note("C4"), &model), NoteOnOutcome::Retriggered);
        assert_eq!(p.live_count(), 1);
        assert_eq!(p.capacity(), 1);
        assert_eq!(p.voices().count(), 1);
    }

    #[test]
    fn retrigger_during_release_cancels_pending_reclaim() {
        let mut p = pool(PoolConfig::default());
        let model = ParameterModel::default();
        p.note_on(note("C4"), &model);
        assert!(p.note_off(note("C4"), 0));
        assert_eq!(p.voice(note("C4")).unwrap().state(), VoiceState::Releasing);

        assert_eq!(p.note_on(note("C4"), &model), NoteOnOutcome::Retriggered);
        assert_eq!(p.reclaim(u64::MAX / 2), 0);
        let voice = p.voice(note("C4")).unwrap();
        assert_eq!(voice.state(), VoiceState::Sounding);
        assert_eq!(p.live_count(), 1);
    }

    #[test]
    fn deadline_reclaims_released_voice() {
        let mut p = pool(PoolConfig::default());
        p.note_on(note("E4"), &ParameterModel::default());
        p.note_off(note("E4"), 1000);

        // release 0.3 s + grace 1.0 s at 48 kHz.
        let due = 1000 + (1.3 * SR).ceil() as u64;
        assert_eq!(p.reclaim(due - 1), 0);
        assert_eq!(p.reclaim(due), 1);
        assert!(p.voice(note("E4")).is_none());
        assert_eq!(p.idle_count(), 1);

        assert_eq!(
            p.note_on(note("G4"), &ParameterModel::default()),
            NoteOnOutcome::Reused
        );
        assert_eq!(p.capacity(), 1);
    }

    #[test]
    fn wet_reverb_pushes_deadline_out() {
        let mut p = pool(PoolConfig::default());
        let model = ParameterModel::default()
            .with(ParamKey::ReverbWet, 0.6)
            .with(ParamKey::ReverbDecay, 3.0)
            .with(ParamKey::ReverbPreDelay, 0.0);
        p.note_on(note("E4"), &model);
        p.note_off(note("E4"), 0);

        // release 0.3 s + reverb 3.0 s + grace 1.0 s.
        let due = ((0.3 + 3.0 + 1.0) * SR).ceil() as u64;
        assert_eq!(p.reclaim((1.3 * SR) as u64), 0);
        assert_eq!(p.reclaim(due - 1), 0);
        assert_eq!(p.reclaim(due), 1);
    }

    #[test]
    fn absurd_tail_grace_is_sanitized() {
        let huge = pool(PoolConfig {
            max_voices: None,
            tail_grace: 1e30,
        });
        assert_eq!(huge.config().tail_grace, MAX_TAIL_GRACE);

        let nan = pool(PoolConfig {
            max_voices: None,
            tail_grace: f64::NAN,
        });
        assert_eq!(nan.config().tail_grace, DEFAULT_TAIL_GRACE);

        let negative = PoolConfig {
            max_voices: None,
            tail_grace: -5.0,
        };
        assert_eq!(negative.sanitized().tail_grace, 0.0);
    }

    #[test]
    fn note_off_late_in_the_clock_does_not_overflow() {
        let mut p = pool(PoolConfig {
            max_voices: None,
            tail_grace: 1e30,
        });
        p.note_on(note("C4"), &ParameterModel::default());
        assert!(p.note_off(note("C4"), u64::MAX - 10));
        assert_eq!(p.reclaim(u64::MAX - 11), 0);
        assert_eq!(p.reclaim(u64::MAX), 1);
    }

    #[test]
    fn finished_tail_reclaims_before_deadline() {
        let mut p = pool(PoolConfig::default());
        let model = ParameterModel::default()
            .with(ParamKey::Attack, 0.001)
            .with(ParamKey::Release, 0.001);
        p.note_on(note("A4"), &model);
        render(&mut p, 4);
        p.note_off(note("A4"), 512);
        render(&mut p, 300);
        assert_eq!(p.reclaim(512), 1);
        assert_eq!(p.live_count(), 0);
    }

    #[test]
    fn note_off_is_ignored_unless_sounding() {
        let mut p = pool(PoolConfig::default());
        assert!(!p.note_off(note("C4"), 0));
        p.note_on(note("C4"), &ParameterModel::default());
        assert!(p.note_off(note("C4"), 0));
        assert!(!p.note_off(note("C4"), 0));
    }

    #[test]
    fn cap_steals_oldest_releasing_then_oldest_sounding() {
        let mut p = pool(PoolConfig {
            max_voices: Some(2),
            ..PoolConfig::default()
        });
        let model = ParameterModel::default();
        p.note_on(note("C4"), &model);
        p.note_on(note("D4"), &model);
        p.note_off(note("D4"), 0);

        assert_eq!(p.note_on(note("E4"), &model), NoteOnOutcome::Stolen(note("D4")));
        assert_eq!(p.note_on(note("F4"), &model), NoteOnOutcome::Stolen(note("C4")));
        assert_eq!(p.live_count(), 2);
        assert_eq!(p.capacity(), 2);
        assert!(p.voice(note("C4")).is_none());
    }

    #[test]
    fn snapshot_is_captured_at_trigger() {
        let mut p = pool(PoolConfig::default());
        let slow = ParameterModel::default().with(ParamKey::Attack, 1.5);
        p.note_on(note("C4"), &slow);
        assert_eq!(p.voice(note("C4")).unwrap().snapshot().envelope.attack, 1.5);

        let fast = slow.with(ParamKey::Attack, 0.01);
        p.note_on(note("D4"), &fast);
        assert_eq!(p.voice(note("C4")).unwrap().snapshot().envelope.attack, 1.5);
        assert_eq!(p.voice(note("D4")).unwrap().snapshot().envelope.attack, 0.01);
    }

    #[test]
    fn release_all_releases_only_sounding() {
        let mut p = pool(PoolConfig::default());
        let model = ParameterModel::default();
        for n in ["C4", "E4", "G4"] {
            p.note_on(note(n), &model);
        }
        p.note_off(note("E4"), 0);
        assert_eq!(p.release_all(0), 2);
        assert!(p
            .voices()
            .all(|v| v.state() == VoiceState::Releasing));
    }

    #[test]
    fn shrink_idle_disposes_and_reuse_rebuilds() {
        let mut p = pool(PoolConfig::default());
        let model = ParameterModel::default();
        p.note_on(note("C4"), &model);
        p.note_on(note("D4"), &model);
        p.note_off(note("D4"), 0);
        p.reclaim(u64::MAX / 2);

        assert_eq!(p.shrink_idle(), 1);
        assert_eq!(p.capacity(), 1);
        assert_eq!(p.idle_count(), 0);

        p.note_off(note("C4"), 0);
        p.reclaim(u64::MAX / 2);
        assert_eq!(p.shrink_idle(), 1);
        assert_eq!(p.capacity(), 0);

        p.note_on(note("C4"), &model);
        assert!(!p.voice(note("C4")).unwrap().chain().is_disposed());
    }

    #[test]
    fn clear_empties_everything() {
        let mut p = pool(PoolConfig::default());
        p.note_on(note("C4"), &ParameterModel::default());
        p.clear();
        assert_eq!(p.live_count(), 0);
        assert_eq!(p.capacity(), 0);
        assert!(p.voice(note("C4")).is_none());
    }
}
