//! Fixed Lookup Tables
//!
//! Every table the wave generator and envelope engines read lives here,
//! computed once when a synth instance opens. The LA32 works in a 16-bit
//! logarithmic space with a 12-bit fraction (4096 steps per octave), where
//! addition substitutes for multiplication; `exp9`/`logsin9` plus the
//! interpolating accessors below are the only bridges between the log and
//! linear domains.
//!
//! Table shapes follow the original firmware: 9-bit indexed sine/exp tables,
//! 101-entry level maps, the 17-entry keyfollow sets, and the 8-entry
//! duration divisors used by the pitch envelope.

use libm::{ceil, exp2, log10, log2, round, sin};

/// The synth's internal sample rate. Fixed by the hardware; conversion to
/// an arbitrary host rate happens outside the core.
pub const SAMPLE_RATE: u32 = 32_000;

/// One quarter of the LA32 sine, in wave-position units.
pub const SINE_SEGMENT_LEN: u32 = 1 << 18;

/// Cutoff value at which the wave corners are at their nominal length.
pub const MIDDLE_CUTOFF: u32 = 128 << 18;

/// Cutoff value above which the resonance is no longer attenuated.
pub const RESONANCE_DECAY_THRESHOLD_CUTOFF: u32 = 144 << 18;

/// Hard ceiling of the linear cutoff driver.
pub const MAX_CUTOFF: u32 = 240 << 18;

/// Highest pitch the TVP may emit on models without the overflow quirk.
pub const MAX_PITCH: u16 = 59392;

/// Log-domain value treated as complete silence by the unlogger.
pub const SILENT_LOG: u16 = u16::MAX;

/// All fixed tables, built once per synth instance at `open()`.
#[derive(Debug)]
pub struct Tables {
    /// `exp9[i] = round(8192 * (1 - 2^(-i / 512)))`, ascending 0..4095.
    pub exp9: [u16; 512],
    /// `logsin9[i] = round(-1024 * log2(sin((i + 0.5) / 1024 * PI)))`,
    /// entry 0 clamped to the 13-bit maximum.
    pub logsin9: [u16; 512],
    /// Semitone distances from middle C in pitch units (4096 per octave).
    pub key_to_pitch: [u16; 68],
    /// Pitch keyfollow multipliers, 4096 = 1.0. The last two entries are the
    /// stretched-tuning variants of unity.
    pub pitch_keyfollow: [i32; 17],
    /// TVF keyfollow offsets per keyfollow setting.
    pub tvf_keyfollow: [i8; 17],
    /// Bias level to one-sided bias multiplier (shared by TVF and TVA).
    pub bias_level_to_bias_mult: [i8; 15],
    /// Level 0..100 to logarithmic amp subtraction.
    pub level_to_amp_subtraction: [u8; 101],
    /// Master volume 0..100 to logarithmic amp subtraction.
    pub master_vol_to_amp_subtraction: [u8; 101],
    /// Envelope time 0..100 to logarithmic time code.
    pub env_logarithmic_time: [u8; 101],
    /// Divisors for the TVP phase timer, geometric in steps of 2^(1/8).
    pub lower_duration_to_divisor: [u16; 8],
    /// Resonance decay factors indexed by `resonance >> 2`.
    pub res_amp_decay_factor: [u8; 8],
    /// Pan position 0..14 to Q13 channel factor.
    pub pan_factors: [i32; 15],
    /// Ramp increment codes 0..127 to per-tick accumulator steps.
    pub ramp_increment: [u32; 128],
}

impl Tables {
    pub fn new() -> Self {
        let mut exp9 = [0u16; 512];
        for (i, entry) in exp9.iter_mut().enumerate() {
            *entry = round(8192.0 * (1.0 - exp2(-(i as f64) / 512.0))) as u16;
        }

        let mut logsin9 = [0u16; 512];
        for (i, entry) in logsin9.iter_mut().enumerate() {
            let s = sin((i as f64 + 0.5) / 1024.0 * core::f64::consts::PI);
            *entry = round(-1024.0 * log2(s)).min(8191.0) as u16;
        }

        let mut key_to_pitch = [0u16; 68];
        for (d, entry) in key_to_pitch.iter_mut().enumerate() {
            *entry = round(d as f64 * 4096.0 / 12.0) as u16;
        }

        let pitch_keyfollow: [i32; 17] = [
            -4096, -2048, -1024, 0, 512, 1024, 1536, 2048, 2560, 3072, 3584, 4096, 5120, 6144,
            8192, 4160, 4256,
        ];

        let tvf_keyfollow: [i8; 17] = [
            -21, -10, -5, 0, 2, 5, 8, 10, 13, 16, 18, 21, 26, 32, 42, 21, 21,
        ];

        let bias_level_to_bias_mult: [i8; 15] = [
            85, 42, 21, 16, 10, 5, 2, 0, -2, -5, -10, -16, -21, -74, -85,
        ];

        let mut level_to_amp_subtraction = [0u8; 101];
        for (n, entry) in level_to_amp_subtraction.iter_mut().enumerate() {
            let v = round(128.0 * (2.0 - log10(n as f64 + 1.0)));
            *entry = v.clamp(0.0, 255.0) as u8;
        }

        let mut master_vol_to_amp_subtraction = [0u8; 101];
        master_vol_to_amp_subtraction[0] = 255;
        for n in 1..101 {
            let v = 106.31 - 16.0 * log2(n as f64);
            master_vol_to_amp_subtraction[n] = v.clamp(0.0, 255.0) as u8;
        }

        let mut env_logarithmic_time = [0u8; 101];
        for n in 1..101 {
            env_logarithmic_time[n] = ceil(64.0 + 8.0 * log2(n as f64)) as u8;
        }

        let mut lower_duration_to_divisor = [0u16; 8];
        for (i, entry) in lower_duration_to_divisor.iter_mut().enumerate() {
            *entry = round(62500.0 / exp2((7 - i) as f64 / 8.0)) as u16;
        }

        let res_amp_decay_factor: [u8; 8] = [31, 16, 12, 8, 5, 3, 2, 1];

        let mut pan_factors = [0i32; 15];
        for (i, entry) in pan_factors.iter_mut().enumerate() {
            *entry = round(i as f64 * 8192.0 / 14.0) as i32;
        }

        let mut ramp_increment = [0u32; 128];
        for i in 1..128 {
            ramp_increment[i] = (round(exp2(i as f64 / 8.0)) as u32) << 9;
        }

        Tables {
            exp9,
            logsin9,
            key_to_pitch,
            pitch_keyfollow,
            tvf_keyfollow,
            bias_level_to_bias_mult,
            level_to_amp_subtraction,
            master_vol_to_amp_subtraction,
            env_logarithmic_time,
            lower_duration_to_divisor,
            res_amp_decay_factor,
            pan_factors,
            ramp_increment,
        }
    }

    /// `round(8192 * 2^(-fract / 4096))` for a 12-bit `fract`, via the
    /// 512-entry exp table with 3-bit linear interpolation.
    #[inline]
    pub fn interp_exp(&self, fract: u16) -> u32 {
        let idx = (fract >> 3) as usize;
        let extra = (fract & 7) as u32;
        let a = 8192 - self.exp9[idx] as u32;
        let b = if idx < 511 {
            8192 - self.exp9[idx + 1] as u32
        } else {
            4096
        };
        a - (((a - b) * extra) >> 3)
    }

    /// Converts a 16-bit log value (12-bit fraction) to a linear 14-bit
    /// magnitude. Values whose integer part shifts everything out are
    /// silence.
    #[inline]
    pub fn unlog(&self, log_value: u16) -> i32 {
        let int_part = (log_value >> 12) as u32;
        if int_part >= 14 {
            return 0;
        }
        let linear = self.interp_exp(log_value & 4095) >> int_part;
        linear.min(8191) as i32
    }

    /// Converts a signed log sample to a signed linear 14-bit sample.
    #[inline]
    pub fn unlog_signed(&self, log_value: u16, positive: bool) -> i32 {
        let sample = self.unlog(log_value);
        if positive {
            sample
        } else {
            -sample
        }
    }

    /// Wave-position step for the given 16-bit pitch: octave in the top
    /// nibble, fraction below, bottom bit of the result cleared.
    #[inline]
    pub fn pitch_to_step(&self, pitch: u16) -> u32 {
        (self.interp_exp(!pitch & 4095) << (pitch >> 12) >> 8) & !1
    }
}

impl Default for Tables {
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

    #[test]
    fn test_exp9_shape() {
        let t = tables();
        assert_eq!(t.exp9[0], 0);
        for i in 1..512 {
            assert!(t.exp9[i] > t.exp9[i - 1]);
        }
        assert!(t.exp9[511] < 4096);
    }

    #[test]
    fn test_logsin9_shape() {
        let t = tables();
        assert_eq!(t.logsin9[0], 8191);
        // Monotonically decreasing towards the sine peak.
        for i in 1..512 {
            assert!(t.logsin9[i] <= t.logsin9[i - 1]);
        }
        assert_eq!(t.logsin9[511], 0);
    }

    #[test]
    fn test_interp_exp_endpoints() {
        let t = tables();
        assert_eq!(t.interp_exp(0), 8192);
        // Half way: 8192 * 2^-0.5.
        let mid = t.interp_exp(2048);
        assert!((mid as i32 - 5793).abs() <= 2);
        assert!(t.interp_exp(4095) >= 4096);
        assert!(t.interp_exp(4095) <= 4100);
    }

    #[test]
    fn test_unlog_octaves() {
        let t = tables();
        // Each octave in the log domain halves the linear output.
        let full = t.unlog(0);
        let half = t.unlog(1 << 12);
        let quarter = t.unlog(2 << 12);
        assert!((full / 2 - half).abs() <= 2);
        assert!((half / 2 - quarter).abs() <= 2);
        // Deep attenuation is silence.
        assert_eq!(t.unlog(14 << 12), 0);
        assert_eq!(t.unlog(SILENT_LOG), 0);
    }

    #[test]
    fn test_unlog_signed() {
        let t = tables();
        assert_eq!(t.unlog_signed(0, true), -t.unlog_signed(0, false));
    }

    #[test]
    fn test_pitch_to_step_doubles_per_octave() {
        let t = tables();
        let s1 = t.pitch_to_step(4096);
        let s2 = t.pitch_to_step(8192);
        // Bottom bit is cleared, so allow off-by-two.
        assert!((s2 as i64 - 2 * s1 as i64).abs() <= 2);
        assert_eq!(t.pitch_to_step(0), 16);
        assert_eq!(t.pitch_to_step(1) & 1, 0);
    }

    #[test]
    fn test_level_to_amp_subtraction() {
        let t = tables();
        assert_eq!(t.level_to_amp_subtraction[0], 255);
        assert_eq!(t.level_to_amp_subtraction[100], 0);
        for n in 1..101 {
            assert!(t.level_to_amp_subtraction[n] <= t.level_to_amp_subtraction[n - 1]);
        }
    }

    #[test]
    fn test_master_vol_to_amp_subtraction() {
        let t = tables();
        assert_eq!(t.master_vol_to_amp_subtraction[0], 255);
        assert_eq!(t.master_vol_to_amp_subtraction[1], 106);
        assert_eq!(t.master_vol_to_amp_subtraction[100], 0);
    }

    #[test]
    fn test_env_logarithmic_time() {
        let t = tables();
        assert_eq!(t.env_logarithmic_time[0], 0);
        assert_eq!(t.env_logarithmic_time[1], 64);
        assert_eq!(t.env_logarithmic_time[2], 72);
        assert!(t.env_logarithmic_time[100] <= 118);
    }

    #[test]
    fn test_lower_duration_to_divisor() {
        let t = tables();
        assert_eq!(t.lower_duration_to_divisor[7], 62500);
        for i in 1..8 {
            assert!(t.lower_duration_to_divisor[i] > t.lower_duration_to_divisor[i - 1]);
        }
    }

    #[test]
    fn test_pan_factors() {
        let t = tables();
        assert_eq!(t.pan_factors[0], 0);
        assert_eq!(t.pan_factors[7], 4096);
        assert_eq!(t.pan_factors[14], 8192);
    }

    #[test]
    fn test_ramp_increment() {
        let t = tables();
        assert_eq!(t.ramp_increment[0], 0);
        assert_eq!(t.ramp_increment[8], 2 << 9);
        for i in 1..128 {
            assert!(t.ramp_increment[i] >= t.ramp_increment[i - 1]);
        }
    }

    #[test]
    fn test_key_to_pitch_octave() {
        let t = tables();
        assert_eq!(t.key_to_pitch[0], 0);
        assert_eq!(t.key_to_pitch[12], 4096);
        assert_eq!(t.key_to_pitch[24], 8192);
    }
}
