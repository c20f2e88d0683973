//! TVF: Time-Variant Filter
//!
//! Computes an 8-bit base cutoff once per note (key follow, one-sided bias
//! and the timbre's raw cutoff), then drives a cutoff-modifier ramp through
//! a five-stage envelope. The partial adds the modifier to the base and
//! clamps into the LA32's linear cutoff range.

use crate::params::PartialParam;
use crate::ramp::{Ramp, DESCENDING, TARGET_SHIFT};
use crate::tables::Tables;

/// Envelope phases; `Dead` is the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TvfPhase {
    Attack = 0,
    Decay2 = 1,
    Decay3 = 2,
    Decay4 = 3,
    Sustain = 4,
    Release = 5,
    Abort = 6,
    Dead = 7,
}

#[derive(Debug, Clone, Copy)]
pub struct TvfContext {
    /// Internal key, 12..108.
    pub key: u8,
    pub velocity: u8,
    /// Old firmware saturates the base cutoff below the later ceiling.
    pub base_cutoff_limit_quirk: bool,
}

/// The filter envelope.
#[derive(Debug, Clone)]
pub struct Tvf {
    phase: TvfPhase,
    ramp: Ramp,
    base_cutoff: u8,
    param: PartialParam,
    ctx: TvfContext,
}

impl Tvf {
    pub fn new() -> Self {
        Tvf {
            phase: TvfPhase::Dead,
            ramp: Ramp::new(),
            base_cutoff: 0,
            param: PartialParam::default(),
            ctx: TvfContext {
                key: 60,
                velocity: 64,
                base_cutoff_limit_quirk: false,
            },
        }
    }

    pub fn phase(&self) -> TvfPhase {
        self.phase
    }

    /// The per-note base cutoff, 0..255.
    pub fn base_cutoff(&self) -> u8 {
        self.base_cutoff
    }

    pub fn reset(&mut self, tables: &Tables, param: &PartialParam, ctx: TvfContext) {
        self.param = *param;
        self.ctx = ctx;
        self.base_cutoff = self.calc_base_cutoff(tables);
        self.ramp.reset();
        self.phase = TvfPhase::Attack;
        self.start_phase_ramp(tables, TvfPhase::Attack);
    }

    fn calc_base_cutoff(&self, tables: &Tables) -> u8 {
        let t = &self.param.tvf;
        let keyfollow = tables.tvf_keyfollow[t.keyfollow.min(16) as usize] as i32;
        let mut base = t.cutoff.min(100) as i32 * 2;
        base += keyfollow * (self.ctx.key as i32 - 60) / 12;

        let upward = t.bias_point & 0x40 != 0;
        let point = (t.bias_point & 0x3f) as i32 + 33;
        let distance = if upward {
            (self.ctx.key as i32 - point).max(0)
        } else {
            (point - self.ctx.key as i32).max(0)
        };
        let mult = tables.bias_level_to_bias_mult[t.bias_level.min(14) as usize] as i32;
        base += mult * distance / 32;

        let ceiling = if self.ctx.base_cutoff_limit_quirk { 200 } else { 255 };
        base.clamp(0, ceiling) as u8
    }

    /// Envelope depth after velocity and key follow.
    fn effective_depth(&self) -> i32 {
        let t = &self.param.tvf;
        let mut depth = t.env_depth.min(100) as i32;
        depth += t.env_velo_sensitivity as i32 * (self.ctx.velocity as i32 - 64) / 64;
        depth -= t.env_depth_keyfollow as i32 * (self.ctx.key as i32 - 60) / 32;
        depth.clamp(0, 100)
    }

    fn target_for(&self, stage: usize) -> u8 {
        let level = self.param.tvf.env_level.get(stage).copied().unwrap_or(0).min(100) as i32;
        (level * self.effective_depth() / 50).min(255) as u8
    }

    fn env_time(&self, stage: usize) -> i32 {
        let t = &self.param.tvf;
        let mut time = t.env_time[stage] as i32;
        time -= t.env_time_keyfollow as i32 * (self.ctx.key as i32 - 60) / 16;
        time.clamp(0, 100)
    }

    fn increment_for_time(&self, tables: &Tables, time: i32) -> u8 {
        if time <= 0 {
            return 127;
        }
        127u8
            .saturating_sub(tables.env_logarithmic_time[time.min(100) as usize])
            .max(1)
    }

    fn start_phase_ramp(&mut self, tables: &Tables, phase: TvfPhase) {
        let stage = phase as usize;
        let target = self.target_for(stage);
        let increment = self.increment_for_time(tables, self.env_time(stage));
        let descending = (target as u32) < self.ramp.current() >> TARGET_SHIFT;
        self.ramp.start_ramp(
            tables,
            target,
            if descending {
                DESCENDING | increment
            } else {
                increment
            },
        );
    }

    pub fn start_decay(&mut self, tables: &Tables) {
        if self.phase >= TvfPhase::Release {
            return;
        }
        self.phase = TvfPhase::Release;
        let increment = self.increment_for_time(tables, self.env_time(4));
        self.ramp.start_ramp(tables, 0, DESCENDING | increment);
    }

    pub fn start_abort(&mut self, tables: &Tables) {
        if self.phase == TvfPhase::Dead {
            return;
        }
        self.phase = TvfPhase::Abort;
        self.ramp.start_ramp(tables, 0, DESCENDING | 127);
    }

    /// Advance one tick; returns the cutoff modifier as a linear 32-bit
    /// value in the LA32 cutoff domain.
    pub fn next_cutoff_modifier(&mut self, tables: &Tables) -> u32 {
        let current = self.ramp.next_value();
        if self.ramp.check_interrupt() {
            self.handle_interrupt(tables);
        }
        current
    }

    pub fn handle_interrupt(&mut self, tables: &Tables) {
        match self.phase {
            TvfPhase::Attack => {
                self.phase = TvfPhase::Decay2;
                self.start_phase_ramp(tables, TvfPhase::Decay2);
            }
            TvfPhase::Decay2 => {
                self.phase = TvfPhase::Decay3;
                self.start_phase_ramp(tables, TvfPhase::Decay3);
            }
            TvfPhase::Decay3 => {
                self.phase = TvfPhase::Decay4;
                self.start_phase_ramp(tables, TvfPhase::Decay4);
            }
            TvfPhase::Decay4 => {
                self.phase = TvfPhase::Sustain;
            }
            TvfPhase::Sustain => {}
            TvfPhase::Release | TvfPhase::Abort => {
                self.phase = TvfPhase::Dead;
            }
            TvfPhase::Dead => {}
        }
    }
}

impl Default for Tvf {
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

    fn context() -> TvfContext {
        TvfContext {
            key: 60,
            velocity: 64,
            base_cutoff_limit_quirk: false,
        }
    }

    fn param_with_depth(depth: u8) -> PartialParam {
        let mut p = PartialParam::default();
        p.tvf.cutoff = 50;
        p.tvf.keyfollow = 3;
        p.tvf.bias_point = 27; // point 60, no bias at middle C
        p.tvf.bias_level = 7; // multiplier 0
        p.tvf.env_depth = depth;
        p.tvf.env_time = [10, 50, 50, 50, 50];
        p.tvf.env_level = [100, 80, 60, 40];
        p
    }

    #[test]
    fn test_base_cutoff_from_raw_cutoff() {
        let t = tables();
        let mut tvf = Tvf::new();
        tvf.reset(&t, &param_with_depth(0), context());
        assert_eq!(tvf.base_cutoff(), 100);
    }

    #[test]
    fn test_base_cutoff_keyfollow() {
        let t = tables();
        let mut p = param_with_depth(0);
        p.tvf.keyfollow = 11; // +21 per octave

        let mut low = Tvf::new();
        low.reset(
            &t,
            &p,
            TvfContext {
                key: 36,
                ..context()
            },
        );
        let mut high = Tvf::new();
        high.reset(
            &t,
            &p,
            TvfContext {
                key: 96,
                ..context()
            },
        );
        assert!(high.base_cutoff() > low.base_cutoff());
        assert_eq!(high.base_cutoff() as i32 - 100, 21 * 3);
    }

    #[test]
    fn test_base_cutoff_limit_quirk() {
        let t = tables();
        let mut p = param_with_depth(0);
        p.tvf.cutoff = 100;
        p.tvf.keyfollow = 14; // +42 per octave

        let mut tvf = Tvf::new();
        tvf.reset(
            &t,
            &p,
            TvfContext {
                key: 96,
                base_cutoff_limit_quirk: true,
                ..context()
            },
        );
        assert_eq!(tvf.base_cutoff(), 200);
    }

    #[test]
    fn test_zero_depth_keeps_modifier_zero() {
        let t = tables();
        let mut tvf = Tvf::new();
        tvf.reset(&t, &param_with_depth(0), context());
        for _ in 0..1000 {
            assert_eq!(tvf.next_cutoff_modifier(&t), 0);
        }
    }

    #[test]
    fn test_envelope_raises_modifier() {
        let t = tables();
        let mut tvf = Tvf::new();
        tvf.reset(&t, &param_with_depth(100), context());

        let mut peak = 0;
        for _ in 0..20000 {
            peak = peak.max(tvf.next_cutoff_modifier(&t));
        }
        // Level 100 at depth 100 targets 200 in the 8-bit domain.
        assert_eq!(peak >> TARGET_SHIFT, 200);
    }

    #[test]
    fn test_release_decays_modifier() {
        let t = tables();
        let mut tvf = Tvf::new();
        let mut p = param_with_depth(100);
        p.tvf.env_time = [0, 0, 0, 0, 10];
        tvf.reset(&t, &p, context());
        for _ in 0..100 {
            tvf.next_cutoff_modifier(&t);
        }
        tvf.start_decay(&t);

        let mut ticks = 0u32;
        while tvf.phase() != TvfPhase::Dead {
            tvf.next_cutoff_modifier(&t);
            ticks += 1;
            assert!(ticks < 200_000);
        }
        assert_eq!(tvf.next_cutoff_modifier(&t), 0);
    }

    #[test]
    fn test_velocity_deepens_envelope() {
        let t = tables();
        let mut p = param_with_depth(50);
        p.tvf.env_velo_sensitivity = 100;
        p.tvf.env_time = [0, 0, 0, 0, 50];

        let mut hard = Tvf::new();
        hard.reset(
            &t,
            &p,
            TvfContext {
                velocity: 127,
                ..context()
            },
        );
        let mut soft = Tvf::new();
        soft.reset(
            &t,
            &p,
            TvfContext {
                velocity: 1,
                ..context()
            },
        );

        let mut hard_peak = 0;
        let mut soft_peak = 0;
        for _ in 0..100 {
            hard_peak = hard_peak.max(hard.next_cutoff_modifier(&t));
            soft_peak = soft_peak.max(soft.next_cutoff_modifier(&t));
        }
        assert!(hard_peak > soft_peak);
    }
}
