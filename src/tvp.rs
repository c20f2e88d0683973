//! TVP: Time-Variant Pitch
//!
//! Emits the 16-bit logarithmic pitch driver (4096 units per octave). The
//! per-note base folds the key-to-pitch table through the keyfollow
//! multiplier, the patch's coarse/fine/key-shift/fine-tune offsets, the PCM
//! sample's absolute pitch when one is playing, and master tune. On top of
//! the base run a five-level pitch envelope on a jittered phase timer and a
//! triangle LFO whose amplitude follows the modulation wheel.
//!
//! Unlike the TVA/TVF ramps, phase timing here counts a divisor-shaped
//! duration: envelope times map through an 8-entry geometric divisor table,
//! and every tick adds a small uniform jitter to the counter, so two notes
//! never track perfectly.

use crate::params::PartialParam;
use crate::rng::Rng;
use crate::tables::{Tables, MAX_PITCH};

/// Pitch units per semitone (4096 per octave).
pub const SEMITONE: i32 = 341;

/// Base pitch of the synth waveform playing middle C at nominal settings.
pub const REFERENCE_PITCH: i32 = 37132;

/// Envelope phases. `Lfo` is the resting state of a settled note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TvpPhase {
    Stage1 = 0,
    Stage2 = 1,
    Stage3 = 2,
    Sustain = 3,
    Release = 4,
    Released = 5,
    Lfo = 6,
}

/// Per-note pitch context assembled by the part.
#[derive(Debug, Clone, Copy)]
pub struct TvpContext {
    /// Internal key, 12..108.
    pub key: u8,
    pub velocity: u8,
    /// Patch key shift in semitones, -24..24.
    pub key_shift: i32,
    /// Patch fine tune, -50..50 cents.
    pub fine_tune: i32,
    /// Master tune offset in pitch units.
    pub master_tune_delta: i32,
    /// Absolute pitch of the PCM sample when this partial plays one.
    pub pcm_pitch: Option<u16>,
    /// Rhythm notes skip master tune.
    pub rhythm: bool,
    /// Base pitch wraps modulo 2^16 instead of clamping.
    pub base_pitch_overflow_quirk: bool,
    /// The envelope sum wraps modulo 2^16.
    pub pitch_env_overflow_quirk: bool,
    /// Newer firmware jumps to bent pitches; older units slew.
    pub fast_pitch_change: bool,
}

/// The pitch envelope and LFO.
#[derive(Debug, Clone)]
pub struct Tvp {
    phase: TvpPhase,
    param: PartialParam,
    ctx: TvpContext,
    base_pitch: i32,
    /// Envelope offset interpolation state, in pitch units.
    offset_start: i32,
    offset_target: i32,
    timer: u32,
    duration: u32,
    /// Live controller state pushed by the part.
    bend_offset: i32,
    modulation: u8,
    lfo_phase: u32,
    last_pitch: Option<u16>,
}

impl Tvp {
    pub fn new() -> Self {
        Tvp {
            phase: TvpPhase::Lfo,
            param: PartialParam::default(),
            ctx: TvpContext {
                key: 60,
                velocity: 64,
                key_shift: 0,
                fine_tune: 0,
                master_tune_delta: 0,
                pcm_pitch: None,
                rhythm: false,
                base_pitch_overflow_quirk: false,
                pitch_env_overflow_quirk: false,
                fast_pitch_change: true,
            },
            base_pitch: REFERENCE_PITCH,
            offset_start: 0,
            offset_target: 0,
            timer: 0,
            duration: 0,
            bend_offset: 0,
            modulation: 0,
            lfo_phase: 0,
            last_pitch: None,
        }
    }

    pub fn phase(&self) -> TvpPhase {
        self.phase
    }

    pub fn reset(&mut self, tables: &Tables, param: &PartialParam, ctx: TvpContext) {
        self.param = *param;
        self.ctx = ctx;
        self.base_pitch = self.calc_base_pitch(tables);
        self.offset_start = self.level_offset(0);
        self.offset_target = self.level_offset(1);
        self.timer = 0;
        self.duration = self.stage_duration(tables, 0);
        self.phase = TvpPhase::Stage1;
        self.lfo_phase = 0;
        self.last_pitch = None;
    }

    /// Pitch bend contribution in pitch units, pushed by the part.
    pub fn set_bend_offset(&mut self, offset: i32) {
        self.bend_offset = offset;
    }

    /// Modulation wheel value, 0..127.
    pub fn set_modulation(&mut self, modulation: u8) {
        self.modulation = modulation;
    }

    fn calc_base_pitch(&self, tables: &Tables) -> i32 {
        let distance = (self.ctx.key as i32 - 60).unsigned_abs() as usize;
        let key_pitch = tables.key_to_pitch[distance.min(67)] as i32;
        let key_pitch = if self.ctx.key < 60 { -key_pitch } else { key_pitch };
        let keyfollow =
            tables.pitch_keyfollow[self.param.wg.pitch_keyfollow.min(16) as usize];
        let followed = (key_pitch * keyfollow) / 4096;

        let mut pitch = match self.ctx.pcm_pitch {
            Some(pcm) => pcm as i32 + followed,
            None => REFERENCE_PITCH + followed,
        };
        pitch += (self.param.wg.pitch_coarse as i32 - 36) * SEMITONE;
        pitch += (self.param.wg.pitch_fine as i32 - 50) * 4096 / 1200;
        pitch += self.ctx.key_shift * SEMITONE;
        pitch += self.ctx.fine_tune * 4096 / 1200;
        if self.ctx.pcm_pitch.is_some() && !self.ctx.rhythm {
            pitch += self.ctx.master_tune_delta;
        }

        if self.ctx.base_pitch_overflow_quirk {
            pitch as u16 as i32
        } else {
            pitch.clamp(0, MAX_PITCH as i32)
        }
    }

    /// Envelope level 0..100 (centred at 50) to a pitch offset scaled by the
    /// envelope depth.
    fn level_offset(&self, index: usize) -> i32 {
        let level = self.param.pitch_env.level[index].min(100) as i32 - 50;
        let depth = self.param.pitch_env.depth.min(10) as i32;
        level * 82 * depth / 10
    }

    /// Duration of one envelope stage in timer units. Envelope times map
    /// through the geometric divisor table; the timer gains 4 plus jitter
    /// per sample.
    fn stage_duration(&self, tables: &Tables, stage: usize) -> u32 {
        let t = &self.param.pitch_env;
        let mut time = t.time[stage] as i32;
        time += t.time_keyfollow as i32 * (self.ctx.key as i32 - 60) / 16;
        time += t.velo_sensitivity as i32 * (self.ctx.velocity as i32 - 64) / 128;
        let time = time.clamp(0, 112) as u32;
        let divisor = tables.lower_duration_to_divisor[(time & 7) as usize] as u32;
        let shift = 13i32 - (time >> 3) as i32;
        if shift >= 0 {
            (divisor >> shift).max(1)
        } else {
            divisor << -shift
        }
    }

    fn interpolated_offset(&self) -> i32 {
        if self.duration == 0 || self.timer >= self.duration {
            return self.offset_target;
        }
        self.offset_start
            + ((self.offset_target - self.offset_start) * self.timer as i32)
                / self.duration as i32
    }

    fn enter_stage(&mut self, tables: &Tables, phase: TvpPhase, target_level: usize, stage: usize) {
        self.offset_start = self.interpolated_offset();
        self.offset_target = self.level_offset(target_level);
        self.timer = 0;
        self.duration = self.stage_duration(tables, stage);
        self.phase = phase;
    }

    /// Begin the release segment towards the final envelope level.
    pub fn start_decay(&mut self, tables: &Tables) {
        if self.phase >= TvpPhase::Release {
            return;
        }
        self.enter_stage(tables, TvpPhase::Release, 4, 3);
    }

    fn advance_timer(&mut self, tables: &Tables, rng: &mut Rng) {
        match self.phase {
            TvpPhase::Sustain | TvpPhase::Released | TvpPhase::Lfo => return,
            _ => {}
        }
        self.timer += 4 + rng.next_jitter();
        if self.timer < self.duration {
            return;
        }
        match self.phase {
            TvpPhase::Stage1 => self.enter_stage(tables, TvpPhase::Stage2, 2, 1),
            TvpPhase::Stage2 => self.enter_stage(tables, TvpPhase::Stage3, 3, 2),
            TvpPhase::Stage3 => {
                self.offset_start = self.offset_target;
                self.phase = TvpPhase::Sustain;
            }
            TvpPhase::Release => {
                self.offset_start = self.offset_target;
                self.phase = TvpPhase::Lfo;
            }
            _ => {}
        }
    }

    /// Triangle LFO in pitch units.
    fn lfo_offset(&mut self) -> i32 {
        let lfo = &self.param.pitch_lfo;
        let amplitude =
            lfo.depth.min(100) as i32 * 8 + (self.modulation as i32 * lfo.mod_sensitivity.min(100) as i32 * 8) / 127;
        if amplitude == 0 {
            return 0;
        }
        // Rate 0..100 spans roughly 0.1..3.2 Hz at the synth rate.
        let step = 13422 + (lfo.rate.min(100) as u32) * 4295;
        self.lfo_phase = self.lfo_phase.wrapping_add(step);
        let tri = self.lfo_phase >> 16;
        let tri = if tri < 0x8000 {
            tri as i32 - 0x4000
        } else {
            0xC000 - tri as i32
        };
        amplitude * tri / 0x4000
    }

    /// Maximum per-sample pitch movement on slewing firmware.
    const SLEW_STEP: i32 = 32;

    /// Advance one tick and return the 16-bit pitch driver.
    pub fn next_pitch(&mut self, tables: &Tables, rng: &mut Rng) -> u16 {
        self.advance_timer(tables, rng);
        let env = self.interpolated_offset();
        let lfo = self.lfo_offset();

        let sum = self.base_pitch + env + lfo + self.bend_offset;
        let target = if self.ctx.pitch_env_overflow_quirk {
            sum as u16
        } else {
            sum.clamp(0, MAX_PITCH as i32) as u16
        };
        let pitch = match self.last_pitch {
            Some(last) if !self.ctx.fast_pitch_change => {
                let delta = (target as i32 - last as i32).clamp(-Self::SLEW_STEP, Self::SLEW_STEP);
                (last as i32 + delta) as u16
            }
            _ => target,
        };
        self.last_pitch = Some(pitch);
        pitch
    }
}

impl Default for Tvp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> Tables {
        Tables::new()
    }

    fn context() -> TvpContext {
        TvpContext {
            key: 60,
            velocity: 64,
            key_shift: 0,
            fine_tune: 0,
            master_tune_delta: 0,
            pcm_pitch: None,
            rhythm: false,
            base_pitch_overflow_quirk: false,
            pitch_env_overflow_quirk: false,
            fast_pitch_change: true,
        }
    }

    fn flat_param() -> PartialParam {
        let mut p = PartialParam::default();
        p.wg.pitch_coarse = 36;
        p.wg.pitch_fine = 50;
        p.wg.pitch_keyfollow = 11; // 1.0
        p.pitch_env.level = [50, 50, 50, 50, 50];
        p
    }

    #[test]
    fn test_reference_pitch_at_middle_c() {
        let t = tables();
        let mut rng = Rng::from_seed(1);
        let mut tvp = Tvp::new();
        tvp.reset(&t, &flat_param(), context());
        assert_eq!(tvp.next_pitch(&t, &mut rng), REFERENCE_PITCH as u16);
    }

    #[test]
    fn test_keyfollow_tracks_octaves() {
        let t = tables();
        let mut rng = Rng::from_seed(1);
        let mut up = Tvp::new();
        up.reset(
            &t,
            &flat_param(),
            TvpContext {
                key: 72,
                ..context()
            },
        );
        assert_eq!(
            up.next_pitch(&t, &mut rng) as i32,
            REFERENCE_PITCH + 4096
        );

        let mut down = Tvp::new();
        down.reset(
            &t,
            &flat_param(),
            TvpContext {
                key: 48,
                ..context()
            },
        );
        assert_eq!(
            down.next_pitch(&t, &mut rng) as i32,
            REFERENCE_PITCH - 4096
        );
    }

    #[test]
    fn test_half_keyfollow() {
        let t = tables();
        let mut rng = Rng::from_seed(1);
        let mut p = flat_param();
        p.wg.pitch_keyfollow = 7; // 0.5
        let mut tvp = Tvp::new();
        tvp.reset(
            &t,
            &p,
            TvpContext {
                key: 72,
                ..context()
            },
        );
        assert_eq!(tvp.next_pitch(&t, &mut rng) as i32, REFERENCE_PITCH + 2048);
    }

    #[test]
    fn test_coarse_and_key_shift() {
        let t = tables();
        let mut rng = Rng::from_seed(1);
        let mut p = flat_param();
        p.wg.pitch_coarse = 48; // +12 semitones
        let mut tvp = Tvp::new();
        tvp.reset(
            &t,
            &p,
            TvpContext {
                key_shift: -12,
                ..context()
            },
        );
        // Coarse up an octave, key shift down an octave: net zero.
        assert_eq!(tvp.next_pitch(&t, &mut rng) as i32, REFERENCE_PITCH);
    }

    #[test]
    fn test_pcm_pitch_is_absolute() {
        let t = tables();
        let mut rng = Rng::from_seed(1);
        let mut tvp = Tvp::new();
        tvp.reset(
            &t,
            &flat_param(),
            TvpContext {
                pcm_pitch: Some(16384),
                master_tune_delta: 100,
                ..context()
            },
        );
        assert_eq!(tvp.next_pitch(&t, &mut rng), 16484);
    }

    #[test]
    fn test_rhythm_skips_master_tune() {
        let t = tables();
        let mut rng = Rng::from_seed(1);
        let mut tvp = Tvp::new();
        tvp.reset(
            &t,
            &flat_param(),
            TvpContext {
                pcm_pitch: Some(16384),
                master_tune_delta: 100,
                rhythm: true,
                ..context()
            },
        );
        assert_eq!(tvp.next_pitch(&t, &mut rng), 16384);
    }

    #[test]
    fn test_clamp_and_overflow_quirk() {
        let t = tables();
        let mut rng = Rng::from_seed(1);
        let mut p = flat_param();
        p.wg.pitch_coarse = 96;

        let mut clamped = Tvp::new();
        clamped.reset(
            &t,
            &p,
            TvpContext {
                key: 108,
                key_shift: 24,
                ..context()
            },
        );
        assert_eq!(clamped.next_pitch(&t, &mut rng), MAX_PITCH);

        let mut wrapped = Tvp::new();
        wrapped.reset(
            &t,
            &p,
            TvpContext {
                key: 108,
                key_shift: 24,
                base_pitch_overflow_quirk: true,
                pitch_env_overflow_quirk: true,
                ..context()
            },
        );
        // The wrapped value differs from the clamp and stays 16-bit.
        assert_ne!(wrapped.next_pitch(&t, &mut rng), MAX_PITCH);
    }

    #[test]
    fn test_envelope_bends_then_settles() {
        let t = tables();
        let mut rng = Rng::from_seed(7);
        let mut p = flat_param();
        p.pitch_env.depth = 10;
        p.pitch_env.level = [0, 50, 50, 50, 50];
        p.pitch_env.time = [40, 10, 10, 10];

        let mut tvp = Tvp::new();
        tvp.reset(&t, &p, context());

        // Starts below base (level 0 = -50 centred), returns to base.
        let first = tvp.next_pitch(&t, &mut rng) as i32;
        assert!(first < REFERENCE_PITCH - 2000);
        let mut last = first;
        for _ in 0..200_000 {
            last = tvp.next_pitch(&t, &mut rng) as i32;
        }
        assert_eq!(tvp.phase(), TvpPhase::Sustain);
        assert_eq!(last, REFERENCE_PITCH);
    }

    #[test]
    fn test_release_moves_to_final_level() {
        let t = tables();
        let mut rng = Rng::from_seed(7);
        let mut p = flat_param();
        p.pitch_env.depth = 10;
        p.pitch_env.level = [50, 50, 50, 50, 100];
        p.pitch_env.time = [0, 0, 0, 20];

        let mut tvp = Tvp::new();
        tvp.reset(&t, &p, context());
        for _ in 0..100_000 {
            tvp.next_pitch(&t, &mut rng);
        }
        tvp.start_decay(&t);
        let mut last = 0i32;
        for _ in 0..100_000 {
            last = tvp.next_pitch(&t, &mut rng) as i32;
        }
        assert_eq!(tvp.phase(), TvpPhase::Lfo);
        // Final level 100 = +50 centred at depth 10.
        assert_eq!(last, REFERENCE_PITCH + 50 * 82);
    }

    #[test]
    fn test_modulation_drives_vibrato() {
        let t = tables();
        let mut rng = Rng::from_seed(7);
        let mut p = flat_param();
        p.pitch_lfo.rate = 80;
        p.pitch_lfo.mod_sensitivity = 100;

        let mut tvp = Tvp::new();
        tvp.reset(&t, &p, context());
        tvp.set_modulation(127);

        let mut min = i32::MAX;
        let mut max = i32::MIN;
        for _ in 0..64000 {
            let v = tvp.next_pitch(&t, &mut rng) as i32;
            min = min.min(v);
            max = max.max(v);
        }
        assert!(max - min > 500, "vibrato span {}", max - min);
        assert!(max > REFERENCE_PITCH && min < REFERENCE_PITCH);
    }

    #[test]
    fn test_bend_offset_applies() {
        let t = tables();
        let mut rng = Rng::from_seed(7);
        let mut tvp = Tvp::new();
        tvp.reset(&t, &flat_param(), context());
        tvp.set_bend_offset(2 * SEMITONE);
        assert_eq!(
            tvp.next_pitch(&t, &mut rng) as i32,
            REFERENCE_PITCH + 2 * SEMITONE
        );
    }

    #[test]
    fn test_slow_firmware_slews_bends() {
        let t = tables();
        let mut rng = Rng::from_seed(1);
        let mut tvp = Tvp::new();
        tvp.reset(
            &t,
            &flat_param(),
            TvpContext {
                fast_pitch_change: false,
                ..context()
            },
        );
        tvp.next_pitch(&t, &mut rng);

        // A sudden two-semitone bend arrives over several samples.
        tvp.set_bend_offset(2 * SEMITONE);
        let first = tvp.next_pitch(&t, &mut rng) as i32;
        assert_eq!(first, REFERENCE_PITCH + 32);
        let mut last = first;
        for _ in 0..100 {
            last = tvp.next_pitch(&t, &mut rng) as i32;
        }
        assert_eq!(last, REFERENCE_PITCH + 2 * SEMITONE);
    }

    #[test]
    fn test_jitter_makes_runs_differ_by_seed() {
        let t = tables();
        let mut p = flat_param();
        p.pitch_env.depth = 10;
        p.pitch_env.level = [0, 100, 0, 100, 50];
        p.pitch_env.time = [30, 30, 30, 30];

        let render = |seed: u64| -> Vec<u16> {
            let mut rng = Rng::from_seed(seed);
            let mut tvp = Tvp::new();
            tvp.reset(&t, &p, context());
            (0..4000).map(|_| tvp.next_pitch(&t, &mut rng)).collect()
        };
        assert_eq!(render(3), render(3));
        assert_ne!(render(3), render(4));
    }
}
