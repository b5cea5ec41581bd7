//! Signal chain: one note's fixed effect path.
//!
//! oscillator → gain (× envelope) → lowpass → delay → reverb → limiter →
//! channel → master bus. Every stage is owned by the chain; only the master
//! bus is shared. Parameter updates never fail: bad values are clamped.

use std::sync::Arc;

use crate::context::EngineContext;
use crate::params::{
    self, Category, DelayParams, ParameterModel, ReverbParams, Rolloff, DELAY_TIME, GAIN,
    LIMITER_THRESHOLD, OSC_SPREAD, VOLUME,
};

use super::bus::MasterBus;
use super::channel::{Channel, GainStage};
use super::delay::Delay;
use super::envelope::Envelope;
use super::filter::LowpassFilter;
use super::limiter::Limiter;
use super::oscillator::UnisonOscillator;
use super::reverb::Reverb;

/// Scale applied to delay and reverb wet mix. Keeps summed feedback from
/// many simultaneous voices in check. Tunable.
pub const WET_ATTENUATION: f64 = 0.7;

/// -90 dBFS.
pub const SILENCE_THRESHOLD: f32 = 3.162_277_7e-5;

/// Extra quiet time required beyond the longest echo gap.
const TAIL_HOLD_SECONDS: f64 = 0.05;

/// Upper bound on how long delay and reverb may ring after a note ends.
pub const MAX_EFFECT_TAIL_SECONDS: f64 = 30.0;

const UNSYNCED: u64 = u64::MAX;

pub struct SignalChain {
    context: Arc<EngineContext>,
    envelope: Envelope,
    oscillator: UnisonOscillator,
    gain: GainStage,
    filter: LowpassFilter,
    delay: Delay,
    reverb: Reverb,
    limiter: Limiter,
    channel: Channel,

    /// Live values last applied to the stages.
    live: ParameterModel,
    /// Control revisions last applied, by `Category::index()`.
    seen: [u64; Category::COUNT],
    /// Consecutive frames below the silence threshold.
    quiet_frames: usize,
    disposed: bool,
}

impl SignalChain {
    pub fn new(context: Arc<EngineContext>, snapshot: &ParameterModel) -> Self {
        let sr = context.sample_rate();
        let s = snapshot.clamp();
        let mut chain = SignalChain {
            envelope: Envelope::new(s.envelope, sr),
            oscillator: UnisonOscillator::new(sr, s.oscillator.count, s.oscillator.spread),
            gain: GainStage::new(s.gain_limiter.gain, sr),
            filter: LowpassFilter::new(s.filter.frequency, s.filter.rolloff, sr),
            delay: Delay::new(sr, DELAY_TIME.max),
            reverb: Reverb::new(sr),
            limiter: Limiter::new(sr, s.gain_limiter.threshold),
            channel: Channel::new(s.volume.level, sr),
            live: s,
            seen: [UNSYNCED; Category::COUNT],
            quiet_frames: 0,
            disposed: false,
            context,
        };
        chain.configure(&s);
        chain
    }

    /// Apply a full snapshot without ramps. For a voice that is silent,
    /// i.e. freshly allocated or reclaimed.
    pub fn configure(&mut self, snapshot: &ParameterModel) {
        let s = snapshot.clamp();
        self.envelope.set_params(s.envelope);
        self.oscillator.set_unison(s.oscillator.count, s.oscillator.spread);
        self.gain.set_gain_immediate(s.gain_limiter.gain);
        self.filter.set_frequency(s.filter.frequency);
        self.filter.set_rolloff(s.filter.rolloff);
        self.delay.set_params_immediate(
            s.delay.delay_time,
            s.delay.feedback,
            s.delay.wet * WET_ATTENUATION,
        );
        self.reverb.set_params_immediate(
            s.reverb.decay,
            s.reverb.pre_delay,
            s.reverb.wet * WET_ATTENUATION,
        );
        self.limiter.set_threshold(s.gain_limiter.threshold);
        self.channel.set_trim_db_immediate(s.volume.level);
        self.live = s;
        // Pick up whatever the router has published since on the next block.
        self.seen = [UNSYNCED; Category::COUNT];
    }

    /// Gate on at `frequency` with the snapshot's envelope. Retriggers run
    /// the attack from the current level.
    pub fn start(&mut self, frequency: f64, snapshot: &ParameterModel) {
        self.envelope.set_params(snapshot.envelope.clamp());
        self.oscillator.set_frequency(frequency);
        if self.envelope.is_finished() {
            self.oscillator.reset();
        }
        self.envelope.gate_on();
        self.quiet_frames = 0;
    }

    /// Gate off; the release curve runs from the current level.
    pub fn release(&mut self) {
        self.envelope.gate_off();
    }

    /// Delay and reverb, wet mix scaled by [`WET_ATTENUATION`].
    pub fn update_effects(&mut self, delay: &DelayParams, reverb: &ReverbParams) {
        let (d, r) = (delay.clamp(), reverb.clamp());
        self.delay
            .set_params(d.delay_time, d.feedback, d.wet * WET_ATTENUATION);
        self.reverb
            .set_params(r.decay, r.pre_delay, r.wet * WET_ATTENUATION);
        self.live.delay = d;
        self.live.reverb = r;
    }

    /// Per-voice trim in dB, clamped to at most 0 dB.
    pub fn update_volume(&mut self, level: f64) {
        let level = VOLUME.clamp(level);
        self.channel.set_trim_db(level);
        self.live.volume.level = level;
    }

    /// `count` is rounded and clamped to 1..=8, `spread` to 0..=50 cents.
    pub fn update_oscillator(&mut self, count: f64, spread: f64) {
        let count = params::voice_count(count);
        let spread = OSC_SPREAD.clamp(spread);
        self.oscillator.set_unison(count, spread);
        self.live.oscillator.count = count;
        self.live.oscillator.spread = spread;
    }

    /// `frequency` in Hz goes through the log control mapping; `rolloff`
    /// snaps to the nearest legal value.
    pub fn update_filter(&mut self, frequency: f64, rolloff: f64) {
        let frequency = params::cutoff_from_control(params::control_from_cutoff(frequency));
        let rolloff = Rolloff::snap(rolloff);
        self.filter.set_frequency(frequency);
        self.filter.set_rolloff(rolloff);
        self.live.filter.frequency = frequency;
        self.live.filter.rolloff = rolloff;
    }

    pub fn update_gain_and_limiter(&mut self, gain: f64, threshold: f64) {
        let gain = GAIN.clamp(gain);
        let threshold = LIMITER_THRESHOLD.clamp(threshold);
        self.gain.set_gain(gain);
        self.limiter.set_threshold(threshold);
        self.live.gain_limiter.gain = gain;
        self.live.gain_limiter.threshold = threshold;
    }

    /// Apply the latest values the router published for every live category.
    pub fn sync(&mut self) {
        let context = Arc::clone(&self.context);
        let controls = context.controls();
        for category in Category::ALL {
            if !category.affects_sounding_notes() {
                continue;
            }
            let revision = controls.revision(category);
            if revision == self.seen[category.index()] {
                continue;
            }
            self.seen[category.index()] = revision;

            let m = controls.read_into(category, &self.live);
            match category {
                Category::Oscillator => {
                    self.update_oscillator(m.oscillator.count as f64, m.oscillator.spread)
                }
                Category::Filter => {
                    self.update_filter(m.filter.frequency, m.filter.rolloff.db_per_octave())
                }
                Category::Delay | Category::Reverb => self.update_effects(&m.delay, &m.reverb),
                Category::GainLimiter => {
                    self.update_gain_and_limiter(m.gain_limiter.gain, m.gain_limiter.threshold)
                }
                Category::Volume => self.update_volume(m.volume.level),
                Category::Envelope => {}
            }
        }
    }

    /// Render one block into `bus`, after picking up live control changes.
    pub fn render(&mut self, bus: &mut MasterBus) {
        if self.disposed {
            return;
        }
        self.sync();

        let frames = bus.frames();
        let mut peak = 0.0_f32;
        for i in 0..frames {
            let source = if self.envelope.is_finished() {
                0.0
            } else {
                let env = self.envelope.next_sample();
                self.oscillator.next_sample() * env
            };
            let x = self.gain.process(source);
            let x = self.filter.process(x) as f32;
            let x = self.delay.process(x);
            let (l, r) = self.reverb.process(x);
            let (l, r) = self.limiter.process(l, r);
            let (l, r) = self.channel.process(l, r);
            peak = peak.max(l.abs()).max(r.abs());
            bus.add(i, l, r);
        }

        if peak < SILENCE_THRESHOLD {
            self.quiet_frames += frames;
        } else {
            self.quiet_frames = 0;
        }
    }

    /// True once the envelope has finished and the output has stayed below
    /// -90 dBFS for longer than the widest echo gap.
    pub fn tail_complete(&self) -> bool {
        if self.disposed {
            return true;
        }
        let hold = self.live.delay.delay_time + self.live.reverb.pre_delay + TAIL_HOLD_SECONDS;
        let hold_frames = (hold * self.context.sample_rate()) as usize;
        self.envelope.is_finished() && self.quiet_frames >= hold_frames
    }

    /// Seconds the delay and reverb keep ringing after the input stops, down
    /// to -60 dB. Zero when both are dry.
    pub fn effects_tail_seconds(&self) -> f64 {
        let d = &self.live.delay;
        let r = &self.live.reverb;
        let echoes = if d.wet > 0.0 && d.feedback > 0.0 {
            d.delay_time * (1.0 - 3.0 / d.feedback.log10())
        } else {
            0.0
        };
        let reverb = if r.wet > 0.0 { r.pre_delay + r.decay } else { 0.0 };
        echoes.max(reverb).clamp(0.0, MAX_EFFECT_TAIL_SECONDS)
    }

    /// Silence all state so the chain can be reused for another note.
    pub fn reset(&mut self) {
        self.envelope.reset();
        self.filter.reset();
        self.delay.clear();
        self.reverb.clear();
        self.limiter.reset();
        self.quiet_frames = 0;
    }

    /// Release the delay lines. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.envelope.reset();
        self.delay.release_buffer();
        self.reverb.release_buffers();
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_sounding(&self) -> bool {
        !self.envelope.is_finished()
    }

    /// Values currently applied to the stages (envelope: the note's shape).
    pub fn live(&self) -> &ParameterModel {
        &self.live
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn trim_db(&self) -> f64 {
        self.channel.trim_db()
    }

    pub fn unison(&self) -> (usize, f64) {
        (self.oscillator.count(), self.oscillator.spread())
    }

    pub fn cutoff(&self) -> (f64, Rolloff) {
        (self.filter.frequency(), self.filter.rolloff())
    }

    /// Effective (attenuated) delay and reverb wet mix.
    pub fn wet_mix(&self) -> (f64, f64) {
        (self.delay.wet(), self.reverb.wet())
    }

    pub fn gain_and_threshold(&self) -> (f64, f64) {
        (self.gain.gain(), self.limiter.threshold())
    }
}

impl std::fmt::Debug for SignalChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalChain")
            .field("stage", &self.envelope.stage())
            .field("level", &self.envelope.level())
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamKey;
    use approx::assert_relative_eq;

    const SR: f64 = 44100.0;

    fn chain_with(model: &ParameterModel) -> (Arc<EngineContext>, SignalChain) {
        let ctx = EngineContext::new(SR, model, 0.0);
        let chain = SignalChain::new(Arc::clone(&ctx), model);
        (ctx, chain)
    }

    fn render_blocks(chain: &mut SignalChain, blocks: usize) -> f32 {
        let mut bus = MasterBus::new();
        let mut peak = 0.0_f32;
        for _ in 0..blocks {
            bus.begin(128);
            chain.render(&mut bus);
            let (mut l, mut r) = (vec![0.0; 128], vec![0.0; 128]);
            bus.finish(0.0, &mut l, &mut r);
            peak = l.iter().chain(&r).fold(peak, |p, s| p.max(s.abs()));
        }
        peak
    }

    #[test]
    fn note_produces_sound_then_tail_completes() {
        let model = ParameterModel::default()
            .with(ParamKey::Attack, 0.001)
            .with(ParamKey::Release, 0.01);
        let (_ctx, mut chain) = chain_with(&model);
        chain.start(440.0, &model);
        assert!(render_blocks(&mut chain, 20) > 0.01);
        assert!(!chain.tail_complete());

        chain.release();
        render_blocks(&mut chain, 200);
        assert!(chain.tail_complete());
    }

    #[test]
    fn volume_never_exceeds_unity() {
        let (_ctx, mut chain) = chain_with(&ParameterModel::default());
        chain.update_volume(10.0);
        assert_eq!(chain.trim_db(), 0.0);
        chain.update_volume(-12.0);
        assert_eq!(chain.trim_db(), -12.0);
        chain.update_volume(f64::NAN);
        assert!(chain.trim_db() <= 0.0);
    }

    #[test]
    fn oscillator_update_rounds_and_clamps() {
        let (_ctx, mut chain) = chain_with(&ParameterModel::default());
        chain.update_oscillator(12.0, 80.0);
        assert_eq!(chain.unison(), (8, 50.0));
        chain.update_oscillator(0.0, -5.0);
        assert_eq!(chain.unison(), (1, 0.0));
        chain.update_oscillator(3.4, 12.0);
        assert_eq!(chain.unison(), (3, 12.0));
    }

    #[test]
    fn filter_update_maps_and_snaps() {
        let (_ctx, mut chain) = chain_with(&ParameterModel::default());
        chain.update_filter(1000.0, -30.0);
        let (hz, rolloff) = chain.cutoff();
        assert_relative_eq!(hz, 1000.0, max_relative = 1e-9);
        assert_eq!(rolloff, Rolloff::Db24);

        chain.update_filter(f64::NAN, -90.0);
        let (hz, rolloff) = chain.cutoff();
        assert_relative_eq!(hz, crate::params::CUTOFF.default, max_relative = 1e-9);
        assert_eq!(rolloff, Rolloff::Db96);

        chain.update_filter(5.0, 0.0);
        assert_relative_eq!(chain.cutoff().0, 20.0, max_relative = 1e-9);
    }

    #[test]
    fn effects_wet_is_attenuated() {
        let (_ctx, mut chain) = chain_with(&ParameterModel::default());
        let delay = DelayParams {
            wet: 1.0,
            delay_time: 0.3,
            feedback: 0.5,
        };
        let reverb = ReverbParams {
            wet: 0.5,
            decay: 2.0,
            pre_delay: 0.02,
        };
        chain.update_effects(&delay, &reverb);
        let (d, r) = chain.wet_mix();
        assert_relative_eq!(d, 0.7, epsilon = 1e-6);
        assert_relative_eq!(r, 0.35, epsilon = 1e-6);
        assert_eq!(chain.live().delay, delay);
    }

    #[test]
    fn effects_tail_follows_wet_effects() {
        let (_ctx, mut c) = chain_with(&ParameterModel::default());
        assert_eq!(c.effects_tail_seconds(), 0.0);

        c.update_effects(
            &DelayParams::default(),
            &ReverbParams {
                wet: 0.5,
                decay: 4.0,
                pre_delay: 0.1,
            },
        );
        assert_relative_eq!(c.effects_tail_seconds(), 4.1, epsilon = 1e-9);

        // 0.5 feedback needs about ten repeats to fall 60 dB.
        c.update_effects(
            &DelayParams {
                wet: 0.5,
                delay_time: 1.0,
                feedback: 0.5,
            },
            &ReverbParams::default(),
        );
        let t = c.effects_tail_seconds();
        assert!(t > 10.0 && t < 12.0, "{t}");

        c.update_effects(
            &DelayParams {
                wet: 1.0,
                delay_time: 1.0,
                feedback: 0.95,
            },
            &ReverbParams::default(),
        );
        assert_eq!(c.effects_tail_seconds(), MAX_EFFECT_TAIL_SECONDS);
    }

    #[test]
    fn gain_and_threshold_apply_directly() {
        let (_ctx, mut chain) = chain_with(&ParameterModel::default());
        chain.update_gain_and_limiter(2.5, -18.0);
        let (gain, threshold) = chain.gain_and_threshold();
        assert_relative_eq!(gain, 2.5, epsilon = 1e-6);
        assert_eq!(threshold, -18.0);
    }

    #[test]
    fn sync_pulls_published_controls() {
        let model = ParameterModel::default();
        let (ctx, mut chain) = chain_with(&model);
        chain.start(220.0, &model);
        render_blocks(&mut chain, 1);

        let edited = model
            .with(ParamKey::VolumeLevel, 20.0)
            .with(ParamKey::OscillatorCount, 5.0)
            .with(ParamKey::Attack, 1.5);
        ctx.controls().publish(Category::Volume, &edited);
        ctx.controls().publish(Category::Oscillator, &edited);
        ctx.controls().publish(Category::Envelope, &edited);
        render_blocks(&mut chain, 1);

        assert_eq!(chain.trim_db(), 0.0);
        assert_eq!(chain.unison().0, 5);
        // Envelope is never taken from live controls.
        assert_eq!(chain.envelope().params().attack, model.envelope.attack);
    }

    #[test]
    fn dispose_is_idempotent() {
        let (_ctx, mut chain) = chain_with(&ParameterModel::default());
        chain.dispose();
        chain.dispose();
        assert!(chain.is_disposed());
        assert!(chain.tail_complete());
        assert_eq!(render_blocks(&mut chain, 1), 0.0);
    }

    #[test]
    fn release_mid_attack_fades_instead_of_cutting() {
        let model = ParameterModel::default()
            .with(ParamKey::Attack, 1.0)
            .with(ParamKey::Release, 0.5);
        let (_ctx, mut chain) = chain_with(&model);
        chain.start(440.0, &model);
        render_blocks(&mut chain, 10);
        chain.release();
        render_blocks(&mut chain, 10);
        assert!(chain.is_sounding(), "release tail still running");
        assert!(!chain.tail_complete());
    }
}
