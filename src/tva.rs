//! TVA: Time-Variant Amplifier
//!
//! Produces the per-sample logarithmic amplitude driver for one partial.
//! The base amp folds together timbre level, velocity, key bias, expression,
//! part volume, master volume and (for rhythm) the drum entry level, all as
//! subtractions in the log domain. An eight-state phase machine then walks
//! the four envelope stages into sustain, release and the abort ramp used
//! by voice stealing.

use crate::params::PartialParam;
use crate::ramp::{Ramp, DESCENDING, TARGET_SHIFT};
use crate::tables::Tables;

/// Envelope phases; `Dead` is the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TvaPhase {
    Attack = 0,
    Decay2 = 1,
    Decay3 = 2,
    Decay4 = 3,
    Sustain = 4,
    Release = 5,
    Abort = 6,
    Dead = 7,
}

/// Everything outside the partial parameters that shapes the amp.
#[derive(Debug, Clone, Copy)]
pub struct TvaContext {
    /// Internal key, 12..108.
    pub key: u8,
    pub velocity: u8,
    /// Expression controller, 0..100.
    pub expression: u8,
    /// Part output level from the patch temp, 0..100.
    pub part_volume: u8,
    pub master_vol: u8,
    /// Drum entry output level for rhythm notes.
    pub rhythm_level: Option<u8>,
    /// Timbre common no-sustain flag: the envelope releases by itself.
    pub no_sustain: bool,
    /// Smooth ramp increments (off reproduces the stair-stepped originals).
    pub nice_amp_ramp: bool,
    /// Zero envelope levels pin their targets to silence.
    pub zero_env_levels_quirk: bool,
}

/// The amplifier envelope.
#[derive(Debug, Clone)]
pub struct Tva {
    phase: TvaPhase,
    ramp: Ramp,
    basic_amp: u8,
    param: PartialParam,
    ctx: TvaContext,
}

/// One-sided key bias in log-amp units.
fn bias_amp_subtraction(bias_point: u8, bias_level: u8, key: u8) -> u32 {
    let upward = bias_point & 0x40 != 0;
    let point = (bias_point & 0x3f) + 33;
    let distance = if upward {
        (key as i32 - point as i32).max(0)
    } else {
        (point as i32 - key as i32).max(0)
    } as u32;
    (distance * bias_level as u32) / 8
}

fn velocity_amp_subtraction(sensitivity: u8, velocity: u8) -> u32 {
    sensitivity as u32 * (127 - velocity as u32) / 127
}

impl Tva {
    pub fn new() -> Self {
        Tva {
            phase: TvaPhase::Dead,
            ramp: Ramp::new(),
            basic_amp: 0,
            param: PartialParam::default(),
            ctx: TvaContext {
                key: 60,
                velocity: 64,
                expression: 100,
                part_volume: 100,
                master_vol: 100,
                rhythm_level: None,
                no_sustain: false,
                nice_amp_ramp: true,
                zero_env_levels_quirk: false,
            },
        }
    }

    pub fn phase(&self) -> TvaPhase {
        self.phase
    }

    pub fn is_playing(&self) -> bool {
        self.phase != TvaPhase::Dead
    }

    /// Start the envelope for a new note.
    pub fn reset(&mut self, tables: &Tables, param: &PartialParam, ctx: TvaContext) {
        self.param = *param;
        self.ctx = ctx;
        self.basic_amp = self.calc_basic_amp(tables);
        self.ramp.reset();
        self.phase = TvaPhase::Attack;
        self.start_phase_ramp(tables, TvaPhase::Attack);
    }

    fn calc_basic_amp(&self, tables: &Tables) -> u8 {
        let t = &self.param.tva;
        let mut subtraction = tables.level_to_amp_subtraction[t.level.min(100) as usize] as u32;
        subtraction += tables.level_to_amp_subtraction[self.ctx.expression.min(100) as usize] as u32;
        subtraction +=
            tables.level_to_amp_subtraction[self.ctx.part_volume.min(100) as usize] as u32;
        subtraction +=
            tables.master_vol_to_amp_subtraction[self.ctx.master_vol.min(100) as usize] as u32;
        if let Some(level) = self.ctx.rhythm_level {
            subtraction += tables.level_to_amp_subtraction[level.min(100) as usize] as u32;
        }
        subtraction += bias_amp_subtraction(t.bias_point1, t.bias_level1, self.ctx.key);
        subtraction += bias_amp_subtraction(t.bias_point2, t.bias_level2, self.ctx.key);
        subtraction += velocity_amp_subtraction(t.velo_sensitivity, self.ctx.velocity);
        255u32.saturating_sub(subtraction) as u8
    }

    fn target_for(&self, tables: &Tables, stage: usize) -> u8 {
        let level = self.param.tva.env_level[stage].min(100);
        if level == 0 && self.ctx.zero_env_levels_quirk {
            return 0;
        }
        (self.basic_amp as u32)
            .saturating_sub(tables.level_to_amp_subtraction[level as usize] as u32) as u8
    }

    fn increment_for_time(&self, tables: &Tables, time: i32) -> u8 {
        if time <= 0 {
            return 127;
        }
        let code = 127u8.saturating_sub(tables.env_logarithmic_time[time.min(100) as usize]);
        let code = code.max(1);
        if self.ctx.nice_amp_ramp {
            code
        } else {
            (code & !3).max(4)
        }
    }

    fn env_time(&self, stage: usize) -> i32 {
        let t = &self.param.tva;
        let mut time = t.env_time[stage] as i32;
        // Key follow shortens times up the keyboard.
        time -= (t.env_time_keyfollow as i32 * (self.ctx.key as i32 - 60)) / 16;
        if stage == 0 {
            // Velocity follow acts on the attack only.
            time -= (t.env_time_velo_sensitivity as i32 * (self.ctx.velocity as i32 - 64)) / 128;
        }
        time.clamp(0, 100)
    }

    fn start_phase_ramp(&mut self, tables: &Tables, phase: TvaPhase) {
        let stage = phase as usize;
        let target = self.target_for(tables, stage);
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

    /// Begin the release stage.
    pub fn start_decay(&mut self, tables: &Tables) {
        if self.phase >= TvaPhase::Release {
            return;
        }
        self.phase = TvaPhase::Release;
        let increment = self.increment_for_time(tables, self.env_time(4));
        self.ramp.start_ramp(tables, 0, DESCENDING | increment);
    }

    /// Fastest possible decay, used when the allocator steals the partial.
    pub fn start_abort(&mut self, tables: &Tables) {
        if self.phase == TvaPhase::Dead {
            return;
        }
        self.phase = TvaPhase::Abort;
        self.ramp.start_ramp(tables, 0, DESCENDING | 127);
    }

    /// Advance one tick; returns the LA32 log-domain attenuation.
    pub fn next_amp(&mut self, tables: &Tables) -> u32 {
        let current = self.ramp.next_value();
        if self.ramp.check_interrupt() {
            self.handle_interrupt(tables);
        }
        ((255u32 << TARGET_SHIFT) - current) >> 10
    }

    /// Phase transition when the current ramp lands on its target.
    pub fn handle_interrupt(&mut self, tables: &Tables) {
        match self.phase {
            TvaPhase::Attack => {
                self.phase = TvaPhase::Decay2;
                self.start_phase_ramp(tables, TvaPhase::Decay2);
            }
            TvaPhase::Decay2 => {
                self.phase = TvaPhase::Decay3;
                self.start_phase_ramp(tables, TvaPhase::Decay3);
            }
            TvaPhase::Decay3 => {
                self.phase = TvaPhase::Decay4;
                self.start_phase_ramp(tables, TvaPhase::Decay4);
            }
            TvaPhase::Decay4 => {
                if self.ctx.no_sustain {
                    self.start_decay(tables);
                } else {
                    self.phase = TvaPhase::Sustain;
                }
            }
            TvaPhase::Sustain => {}
            TvaPhase::Release | TvaPhase::Abort => {
                self.phase = TvaPhase::Dead;
            }
            TvaPhase::Dead => {}
        }
    }

    /// Re-apply live controllers (expression, volumes) to a held note.
    pub fn update_context(&mut self, tables: &Tables, ctx: TvaContext) {
        self.ctx = ctx;
        self.basic_amp = self.calc_basic_amp(tables);
        if self.phase == TvaPhase::Sustain {
            // Glide to the re-derived sustain target.
            let target = self.target_for(tables, 3);
            let descending = (target as u32) < self.ramp.current() >> TARGET_SHIFT;
            let increment = if descending { DESCENDING | 64 } else { 64 };
            self.ramp.start_ramp(tables, target, increment);
            self.phase = TvaPhase::Decay4;
        }
    }
}

impl Default for Tva {
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

    fn context() -> TvaContext {
        TvaContext {
            key: 60,
            velocity: 127,
            expression: 100,
            part_volume: 100,
            master_vol: 100,
            rhythm_level: None,
            no_sustain: false,
            nice_amp_ramp: true,
            zero_env_levels_quirk: false,
        }
    }

    fn full_param() -> PartialParam {
        let mut p = PartialParam::default();
        p.tva.level = 100;
        p.tva.env_time = [0, 50, 50, 50, 50];
        p.tva.env_level = [100, 100, 100, 100];
        p
    }

    #[test]
    fn test_attack_reaches_sustain_at_full_scale() {
        let t = tables();
        let mut tva = Tva::new();
        tva.reset(&t, &full_param(), context());

        let mut amp = u32::MAX;
        for _ in 0..2000 {
            amp = tva.next_amp(&t);
            if tva.phase() == TvaPhase::Sustain {
                break;
            }
        }
        assert_eq!(tva.phase(), TvaPhase::Sustain);
        // Full level, full velocity, full volumes: no attenuation left.
        assert_eq!(amp, 0);
    }

    #[test]
    fn test_attenuation_decreases_through_attack() {
        let t = tables();
        let mut tva = Tva::new();
        let mut p = full_param();
        p.tva.env_time = [40, 50, 50, 50, 50];
        tva.reset(&t, &p, context());

        let first = tva.next_amp(&t);
        let mut last = first;
        for _ in 0..500 {
            last = tva.next_amp(&t);
        }
        assert!(last < first);
    }

    #[test]
    fn test_velocity_reduces_amp() {
        let t = tables();
        let mut p = full_param();
        p.tva.velo_sensitivity = 100;

        let mut strong = Tva::new();
        strong.reset(&t, &p, context());
        let mut weak = Tva::new();
        weak.reset(
            &t,
            &p,
            TvaContext {
                velocity: 1,
                ..context()
            },
        );

        let mut strong_amp = 0;
        let mut weak_amp = 0;
        for _ in 0..2000 {
            strong_amp = strong.next_amp(&t);
            weak_amp = weak.next_amp(&t);
        }
        assert!(weak_amp > strong_amp);
    }

    #[test]
    fn test_expression_adds_attenuation() {
        let t = tables();
        let mut loud = Tva::new();
        loud.reset(&t, &full_param(), context());
        let mut soft = Tva::new();
        soft.reset(
            &t,
            &full_param(),
            TvaContext {
                expression: 20,
                ..context()
            },
        );

        let mut loud_amp = 0;
        let mut soft_amp = 0;
        for _ in 0..2000 {
            loud_amp = loud.next_amp(&t);
            soft_amp = soft.next_amp(&t);
        }
        assert!(soft_amp > loud_amp);
    }

    #[test]
    fn test_release_runs_to_dead() {
        let t = tables();
        let mut tva = Tva::new();
        let mut p = full_param();
        p.tva.env_time[4] = 20;
        tva.reset(&t, &p, context());
        for _ in 0..200 {
            tva.next_amp(&t);
        }
        tva.start_decay(&t);
        assert_eq!(tva.phase(), TvaPhase::Release);

        let mut ticks = 0u32;
        while tva.phase() != TvaPhase::Dead {
            tva.next_amp(&t);
            ticks += 1;
            assert!(ticks < 200_000);
        }
        assert!(!tva.is_playing());
    }

    #[test]
    fn test_abort_is_fast() {
        let t = tables();
        let mut tva = Tva::new();
        tva.reset(&t, &full_param(), context());
        for _ in 0..200 {
            tva.next_amp(&t);
        }
        tva.start_abort(&t);

        let mut ticks = 0u32;
        while tva.phase() != TvaPhase::Dead {
            tva.next_amp(&t);
            ticks += 1;
        }
        assert!(ticks <= 8, "abort took {} ticks", ticks);
    }

    #[test]
    fn test_no_sustain_releases_by_itself() {
        let t = tables();
        let mut tva = Tva::new();
        let mut p = full_param();
        p.tva.env_time = [0, 0, 0, 0, 10];
        tva.reset(
            &t,
            &p,
            TvaContext {
                no_sustain: true,
                ..context()
            },
        );

        let mut ticks = 0u32;
        while tva.phase() != TvaPhase::Dead {
            tva.next_amp(&t);
            ticks += 1;
            assert!(ticks < 200_000);
        }
    }

    #[test]
    fn test_zero_env_level_quirk() {
        let t = tables();
        let mut p = full_param();
        p.tva.env_time = [0, 0, 0, 0, 50];
        p.tva.env_level = [0, 0, 0, 0];

        let mut quirky = Tva::new();
        quirky.reset(
            &t,
            &p,
            TvaContext {
                zero_env_levels_quirk: true,
                ..context()
            },
        );
        for _ in 0..100 {
            // Targets pin to silence: full attenuation throughout.
            assert!(quirky.next_amp(&t) >= 65000);
        }
    }

    #[test]
    fn test_start_decay_is_idempotent() {
        let t = tables();
        let mut tva = Tva::new();
        tva.reset(&t, &full_param(), context());
        tva.start_decay(&t);
        let phase = tva.phase();
        tva.start_decay(&t);
        assert_eq!(tva.phase(), phase);
    }
}
