//! LA32 Wave Generator, Integer Path
//!
//! One generator emits one signed sample per tick from three drivers: a
//! logarithmic amplitude (attenuation), a 16-bit logarithmic pitch and a
//! linear 32-bit cutoff. Synth mode builds a square/saw hybrid out of
//! log-sine corner segments and flat linear segments, with a parallel
//! resonance sine ringing at the corner frequency. PCM mode replays
//! log-domain samples from the PCM ROM with linear interpolation.
//!
//! All arithmetic is additions and shifts in the log domain; the unlogger
//! in `tables` produces the 14-bit linear samples at the very end.

use crate::rom::PcmWave;
use crate::tables::{Tables, MIDDLE_CUTOFF, SINE_SEGMENT_LEN};

/// Wave period of the synth waveform in position units.
pub const WAVE_PERIOD: u32 = 4 * SINE_SEGMENT_LEN;

/// Fractional bits of the PCM wave position.
pub const PCM_FRAC_BITS: u32 = 7;

/// Shortest corner segment the cutoff may shrink a sine corner to.
const MIN_CORNER_LEN: u32 = 4096;

/// Borrowed table and sample data a generator reads while rendering.
#[derive(Clone, Copy)]
pub struct WaveSource<'a> {
    pub tables: &'a Tables,
    pub pcm: &'a [u16],
}

/// A log-domain sample with an explicit sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSample {
    pub log: u16,
    pub positive: bool,
}

impl LogSample {
    pub const SILENCE: LogSample = LogSample {
        log: u16::MAX,
        positive: true,
    };
}

/// Saturating add in the 16-bit log domain.
#[inline]
fn log_add(base: u32, attenuation: u32) -> u16 {
    (base + attenuation).min(u16::MAX as u32) as u16
}

/// Wrap a mixing value back into the 14-bit signed range, the fold the ring
/// modulator applies before multiplying.
#[inline]
pub fn fold_14bit(sample: i32) -> i32 {
    let wrapped = sample & 0x3fff;
    if wrapped & 0x2000 != 0 {
        wrapped | !0x3fff
    } else {
        wrapped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WavePhase {
    PositiveRisingSine,
    PositiveLinear,
    PositiveFallingSine,
    NegativeFallingSine,
    NegativeLinear,
    NegativeRisingSine,
}

impl WavePhase {
    fn positive(self) -> bool {
        matches!(
            self,
            WavePhase::PositiveRisingSine | WavePhase::PositiveLinear | WavePhase::PositiveFallingSine
        )
    }
}

/// One physical wave generator.
#[derive(Debug, Clone)]
pub struct WaveGenerator {
    active: bool,
    sawtooth: bool,
    pulse_width: u8,
    resonance: u8,
    pcm: Option<PcmWave>,
    interpolated: bool,
    wave_pos: u32,
    square_log: LogSample,
    resonance_log: LogSample,
    pcm_first: LogSample,
    pcm_second: LogSample,
    pcm_frac: u32,
}

impl WaveGenerator {
    pub fn new() -> Self {
        WaveGenerator {
            active: false,
            sawtooth: false,
            pulse_width: 0,
            resonance: 0,
            pcm: None,
            interpolated: false,
            wave_pos: 0,
            square_log: LogSample::SILENCE,
            resonance_log: LogSample::SILENCE,
            pcm_first: LogSample::SILENCE,
            pcm_second: LogSample::SILENCE,
            pcm_frac: 0,
        }
    }

    /// Start a synth-mode wave.
    pub fn init_synth(&mut self, sawtooth: bool, pulse_width: u8, resonance: u8) {
        self.active = true;
        self.sawtooth = sawtooth;
        self.pulse_width = pulse_width;
        self.resonance = resonance.min(30);
        self.pcm = None;
        self.wave_pos = 0;
        self.square_log = LogSample::SILENCE;
        self.resonance_log = LogSample::SILENCE;
    }

    /// Start a PCM-mode wave.
    pub fn init_pcm(&mut self, wave: PcmWave, interpolated: bool) {
        self.active = true;
        self.sawtooth = false;
        self.pcm = Some(wave);
        self.interpolated = interpolated;
        self.wave_pos = 0;
        self.pcm_first = LogSample::SILENCE;
        self.pcm_second = LogSample::SILENCE;
        self.pcm_frac = 0;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.square_log = LogSample::SILENCE;
        self.resonance_log = LogSample::SILENCE;
        self.pcm_first = LogSample::SILENCE;
        self.pcm_second = LogSample::SILENCE;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn is_pcm(&self) -> bool {
        self.pcm.is_some()
    }

    /// Advance one tick. `amp` is a log-domain attenuation (0 is full
    /// scale), `cutoff` a linear value clamped by the caller.
    pub fn generate(&mut self, src: &WaveSource, amp: u32, pitch: u16, cutoff: u32) {
        if !self.active {
            return;
        }
        if self.pcm.is_some() {
            self.generate_pcm(src, amp, pitch);
        } else {
            self.generate_synth(src, amp, pitch, cutoff);
        }
    }

    /// Linear output for the samples computed by the last `generate`.
    pub fn output(&self, src: &WaveSource) -> i32 {
        if !self.active {
            return 0;
        }
        let tables = src.tables;
        if self.pcm.is_some() {
            let first = tables.unlog_signed(self.pcm_first.log, self.pcm_first.positive);
            if !self.interpolated {
                return first;
            }
            let second = tables.unlog_signed(self.pcm_second.log, self.pcm_second.positive);
            first + (((second - first) * self.pcm_frac as i32) >> PCM_FRAC_BITS)
        } else {
            tables.unlog_signed(self.square_log.log, self.square_log.positive)
                + tables.unlog_signed(self.resonance_log.log, self.resonance_log.positive)
        }
    }

    fn generate_synth(&mut self, src: &WaveSource, amp: u32, pitch: u16, cutoff: u32) {
        let tables = src.tables;

        // Corner length shrinks as the cutoff rises past the middle value.
        let eff_cutoff = cutoff.saturating_sub(MIDDLE_CUTOFF) >> 10;
        let corner_len = (SINE_SEGMENT_LEN.saturating_sub(eff_cutoff << 3)).max(MIN_CORNER_LEN);

        // Pulse width shifts length from the low linear segment to the high
        // one, bounded so neither goes negative.
        let max_linear = 2 * (SINE_SEGMENT_LEN - corner_len) as i64;
        let pw_offset = (((self.pulse_width as i64) - 128) << 11).clamp(-max_linear, max_linear);
        let high_linear = (max_linear + pw_offset) as u32;
        let low_linear = (max_linear - pw_offset) as u32;

        let b0 = corner_len;
        let b1 = b0 + high_linear;
        let b2 = b1 + corner_len;
        let b3 = b2 + corner_len;
        let b4 = b3 + low_linear;
        let pos = self.wave_pos;

        let (phase, seg_pos) = if pos < b0 {
            (WavePhase::PositiveRisingSine, pos)
        } else if pos < b1 {
            (WavePhase::PositiveLinear, pos - b0)
        } else if pos < b2 {
            (WavePhase::PositiveFallingSine, pos - b1)
        } else if pos < b3 {
            (WavePhase::NegativeFallingSine, pos - b2)
        } else if pos < b4 {
            (WavePhase::NegativeLinear, pos - b3)
        } else {
            (WavePhase::NegativeRisingSine, pos - b4)
        };

        // Attenuation shared by the square and resonance samples: the amp
        // driver plus exponential rolloff below the middle cutoff.
        let low_cutoff_attn = MIDDLE_CUTOFF.saturating_sub(cutoff) >> 9;
        let base_attn = amp + low_cutoff_attn;

        let sine_index = |seg_pos: u32, len: u32| ((seg_pos as u64 * 512 / len as u64) as usize).min(511);

        let corner_log = |rising: bool, seg_pos: u32| -> u32 {
            let idx = sine_index(seg_pos, corner_len);
            let idx = if rising { idx } else { 511 - idx };
            (tables.logsin9[idx] as u32) << 2
        };

        let mut square_value = match phase {
            WavePhase::PositiveRisingSine | WavePhase::NegativeFallingSine => {
                corner_log(true, seg_pos)
            }
            WavePhase::PositiveLinear | WavePhase::NegativeLinear => 0,
            WavePhase::PositiveFallingSine | WavePhase::NegativeRisingSine => {
                corner_log(false, seg_pos)
            }
        };
        square_value += base_attn;
        let mut square_positive = phase.positive();

        // Resonance: a sine ringing at the corner frequency, restarted at
        // each half-period boundary.
        let (half_pos, half_len) = if pos < b2 {
            (pos, b2)
        } else {
            (pos - b2, WAVE_PERIOD - b2)
        };
        let quarter = half_pos / corner_len;
        let quarter_pos = half_pos % corner_len;
        let res_sine_idx = {
            let idx = sine_index(quarter_pos, corner_len);
            if quarter & 1 == 0 {
                idx
            } else {
                511 - idx
            }
        };
        let mut res_positive = quarter & 2 == 0;

        let mut res_value = (tables.logsin9[res_sine_idx] as u32) << 2;
        res_value += base_attn;
        // Base resonance attenuation plus progressive decay over the half
        // period.
        res_value += ((32 - self.resonance as u32) << 10).min(65535);
        let decay_factor = tables.res_amp_decay_factor[(self.resonance >> 2) as usize] as u32;
        res_value += decay_factor * (half_pos >> 8);
        // Sinusoidal fade of the resonance between the middle cutoff and the
        // decay threshold.
        if cutoff < MIDDLE_CUTOFF + (16 << 18) {
            let idx = (cutoff.saturating_sub(MIDDLE_CUTOFF) >> 13).min(511) as usize;
            res_value += (tables.logsin9[idx] as u32) << 2;
        }
        // Windowing sine keeps the half-period boundaries continuous.
        if half_pos < corner_len {
            res_value += (tables.logsin9[sine_index(half_pos, corner_len)] as u32) << 2;
        } else if half_len - half_pos <= corner_len {
            res_value +=
                (tables.logsin9[sine_index(half_len - half_pos - 1, corner_len)] as u32) << 2;
        }

        // The sawtooth flag multiplies both waves by a synchronous cosine.
        if self.sawtooth {
            let quarter = pos / SINE_SEGMENT_LEN;
            let idx = sine_index(pos % SINE_SEGMENT_LEN, SINE_SEGMENT_LEN);
            let cos_log = match quarter {
                0 | 2 => tables.logsin9[511 - idx],
                _ => tables.logsin9[idx],
            } as u32;
            let cos_positive = quarter == 0 || quarter == 3;
            square_value += cos_log << 2;
            res_value += cos_log << 2;
            square_positive ^= !cos_positive;
            res_positive ^= !cos_positive;
        }

        self.square_log = LogSample {
            log: log_add(square_value, 0),
            positive: square_positive,
        };
        self.resonance_log = LogSample {
            log: log_add(res_value, 0),
            positive: res_positive,
        };

        self.wave_pos = (self.wave_pos + tables.pitch_to_step(pitch)) % WAVE_PERIOD;
    }

    fn generate_pcm(&mut self, src: &WaveSource, amp: u32, pitch: u16) {
        let wave = self.pcm.unwrap();
        let tables = src.tables;
        let len = wave.len as u32;
        if len == 0 {
            self.deactivate();
            return;
        }

        let mut index = self.wave_pos >> PCM_FRAC_BITS;
        if index >= len {
            if wave.looped {
                self.wave_pos %= len << PCM_FRAC_BITS;
                index = self.wave_pos >> PCM_FRAC_BITS;
            } else {
                self.deactivate();
                return;
            }
        }
        self.pcm_frac = self.wave_pos & ((1 << PCM_FRAC_BITS) - 1);

        let fetch = |offset: u32| -> LogSample {
            let raw = src.pcm.get(wave.addr + offset as usize).copied().unwrap_or(0x7fff);
            LogSample {
                log: log_add(((raw & 0x7fff) as u32) << 1, amp),
                positive: raw & 0x8000 == 0,
            }
        };

        self.pcm_first = fetch(index);
        self.pcm_second = if index + 1 < len {
            fetch(index + 1)
        } else if wave.looped {
            fetch(0)
        } else {
            LogSample::SILENCE
        };

        // PCM position advances at half the synth-mode rate per the pitch.
        self.wave_pos += tables.pitch_to_step(pitch) >> 1;
    }
}

impl Default for WaveGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Which half of a pair a generator occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSlot {
    Master,
    Slave,
}

/// The capability set both pair implementations provide. Everything above
/// the wave generators is generic over this, so the integer and float
/// pipelines monomorphise instead of dispatching at run time.
pub trait PartialPairOps: Default + Send + 'static {
    type Sample: crate::render::RenderSample;

    fn init(&mut self, ring_modulated: bool, mixed: bool);
    fn init_synth(&mut self, slot: PairSlot, sawtooth: bool, pulse_width: u8, resonance: u8);
    fn init_pcm(&mut self, slot: PairSlot, wave: PcmWave, interpolated: bool);
    fn deactivate(&mut self, slot: PairSlot);
    fn is_active(&self, slot: PairSlot) -> bool;
    fn generate(&mut self, slot: PairSlot, src: &WaveSource, amp: u32, pitch: u16, cutoff: u32);
    fn next_out_sample(&self, src: &WaveSource) -> Self::Sample;
}

/// Two coupled wave generators with the pair's mix and ring flags.
#[derive(Debug, Clone)]
pub struct IntPartialPair {
    master: WaveGenerator,
    slave: WaveGenerator,
    ring_modulated: bool,
    mixed: bool,
}

impl IntPartialPair {
    pub fn new() -> Self {
        IntPartialPair {
            master: WaveGenerator::new(),
            slave: WaveGenerator::new(),
            ring_modulated: false,
            mixed: true,
        }
    }

    pub fn init(&mut self, ring_modulated: bool, mixed: bool) {
        self.ring_modulated = ring_modulated;
        self.mixed = mixed;
    }

    fn slot(&mut self, slot: PairSlot) -> &mut WaveGenerator {
        match slot {
            PairSlot::Master => &mut self.master,
            PairSlot::Slave => &mut self.slave,
        }
    }

    pub fn init_synth(&mut self, slot: PairSlot, sawtooth: bool, pulse_width: u8, resonance: u8) {
        self.slot(slot).init_synth(sawtooth, pulse_width, resonance);
    }

    pub fn init_pcm(&mut self, slot: PairSlot, wave: PcmWave, interpolated: bool) {
        self.slot(slot).init_pcm(wave, interpolated);
    }

    pub fn deactivate(&mut self, slot: PairSlot) {
        self.slot(slot).deactivate();
    }

    pub fn is_active(&self, slot: PairSlot) -> bool {
        match slot {
            PairSlot::Master => self.master.is_active(),
            PairSlot::Slave => self.slave.is_active(),
        }
    }

    pub fn generate(&mut self, slot: PairSlot, src: &WaveSource, amp: u32, pitch: u16, cutoff: u32) {
        self.slot(slot).generate(src, amp, pitch, cutoff);
    }

    /// Combine the pair into one 16-bit sample according to the mix flags.
    pub fn next_out_sample(&self, src: &WaveSource) -> i16 {
        let master = self.master.output(src);
        if !self.ring_modulated {
            return master.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }
        let ring = (fold_14bit(master) * fold_14bit(self.slave.output(src))) >> 13;
        let combined = if self.mixed { master + ring } else { ring };
        combined.clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }
}

impl Default for IntPartialPair {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialPairOps for IntPartialPair {
    type Sample = i16;

    fn init(&mut self, ring_modulated: bool, mixed: bool) {
        IntPartialPair::init(self, ring_modulated, mixed);
    }

    fn init_synth(&mut self, slot: PairSlot, sawtooth: bool, pulse_width: u8, resonance: u8) {
        IntPartialPair::init_synth(self, slot, sawtooth, pulse_width, resonance);
    }

    fn init_pcm(&mut self, slot: PairSlot, wave: PcmWave, interpolated: bool) {
        IntPartialPair::init_pcm(self, slot, wave, interpolated);
    }

    fn deactivate(&mut self, slot: PairSlot) {
        IntPartialPair::deactivate(self, slot);
    }

    fn is_active(&self, slot: PairSlot) -> bool {
        IntPartialPair::is_active(self, slot)
    }

    fn generate(&mut self, slot: PairSlot, src: &WaveSource, amp: u32, pitch: u16, cutoff: u32) {
        IntPartialPair::generate(self, slot, src, amp, pitch, cutoff);
    }

    fn next_out_sample(&self, src: &WaveSource) -> i16 {
        IntPartialPair::next_out_sample(self, src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> Tables {
        Tables::new()
    }

    fn src<'a>(tables: &'a Tables, pcm: &'a [u16]) -> WaveSource<'a> {
        WaveSource { tables, pcm }
    }

    const TEST_PITCH: u16 = 37132;
    const TEST_CUTOFF: u32 = MIDDLE_CUTOFF;

    fn render_synth(
        gen: &mut WaveGenerator,
        src: &WaveSource,
        amp: u32,
        pitch: u16,
        cutoff: u32,
        count: usize,
    ) -> Vec<i32> {
        (0..count)
            .map(|_| {
                gen.generate(src, amp, pitch, cutoff);
                gen.output(src)
            })
            .collect()
    }

    #[test]
    fn test_square_wave_alternates_sign() {
        let t = tables();
        let s = src(&t, &[]);
        let mut gen = WaveGenerator::new();
        gen.init_synth(false, 128, 0);

        let samples = render_synth(&mut gen, &s, 0, TEST_PITCH, TEST_CUTOFF, 400);
        assert!(samples.iter().any(|&v| v > 4000));
        assert!(samples.iter().any(|&v| v < -4000));
    }

    #[test]
    fn test_square_wave_period_tracks_pitch() {
        let t = tables();
        let s = src(&t, &[]);
        let mut gen = WaveGenerator::new();
        gen.init_synth(false, 128, 0);

        // One octave up halves the period (count sign flips over a fixed
        // window).
        let flips = |samples: &[i32]| {
            samples
                .windows(2)
                .filter(|w| (w[0] >= 0) != (w[1] >= 0))
                .count()
        };
        let low = render_synth(&mut gen, &s, 0, 4 << 12, TEST_CUTOFF, 8192);
        gen.init_synth(false, 128, 0);
        let high = render_synth(&mut gen, &s, 0, 5 << 12, TEST_CUTOFF, 8192);
        let (low_flips, high_flips) = (flips(&low) as i64, flips(&high) as i64);
        assert!(
            (high_flips - 2 * low_flips).abs() <= 2,
            "flips {} vs {}",
            low_flips,
            high_flips
        );
    }

    #[test]
    fn test_amp_attenuation_reduces_output() {
        let t = tables();
        let s = src(&t, &[]);
        let mut gen = WaveGenerator::new();

        gen.init_synth(false, 128, 0);
        let loud: i32 = render_synth(&mut gen, &s, 0, TEST_PITCH, TEST_CUTOFF, 512)
            .iter()
            .map(|v| v.abs())
            .max()
            .unwrap();
        gen.init_synth(false, 128, 0);
        // One octave of attenuation halves the peak.
        let soft: i32 = render_synth(&mut gen, &s, 4096, TEST_PITCH, TEST_CUTOFF, 512)
            .iter()
            .map(|v| v.abs())
            .max()
            .unwrap();
        assert!((soft - loud / 2).abs() <= loud / 16, "{} vs {}", loud, soft);
    }

    #[test]
    fn test_deep_attenuation_is_silent() {
        let t = tables();
        let s = src(&t, &[]);
        let mut gen = WaveGenerator::new();
        gen.init_synth(false, 128, 0);
        let samples = render_synth(&mut gen, &s, 60000, TEST_PITCH, TEST_CUTOFF, 256);
        assert!(samples.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_pulse_width_shifts_duty() {
        let t = tables();
        let s = src(&t, &[]);
        let mut gen = WaveGenerator::new();

        // Corners only shrink above the middle cutoff; pulse width acts on
        // the linear segments that opens up.
        let cutoff = MIDDLE_CUTOFF + (100 << 18);
        gen.init_synth(false, 128, 0);
        let centered = render_synth(&mut gen, &s, 0, TEST_PITCH, cutoff, 4096);
        gen.init_synth(false, 220, 0);
        let wide = render_synth(&mut gen, &s, 0, TEST_PITCH, cutoff, 4096);

        let positive = |samples: &[i32]| samples.iter().filter(|&&v| v > 0).count();
        assert!(positive(&wide) > positive(&centered) + 200);
    }

    #[test]
    fn test_sawtooth_differs_from_square() {
        let t = tables();
        let s = src(&t, &[]);
        let mut square = WaveGenerator::new();
        let mut saw = WaveGenerator::new();
        square.init_synth(false, 128, 0);
        saw.init_synth(true, 128, 0);

        let sq = render_synth(&mut square, &s, 0, TEST_PITCH, TEST_CUTOFF, 512);
        let sw = render_synth(&mut saw, &s, 0, TEST_PITCH, TEST_CUTOFF, 512);
        assert_ne!(sq, sw);
    }

    #[test]
    fn test_resonance_adds_ringing() {
        let t = tables();
        let s = src(&t, &[]);
        let mut flat = WaveGenerator::new();
        let mut resonant = WaveGenerator::new();
        flat.init_synth(false, 128, 0);
        resonant.init_synth(false, 128, 30);

        let cutoff = MIDDLE_CUTOFF + (60 << 18);
        let base = render_synth(&mut flat, &s, 0, TEST_PITCH, cutoff, 1024);
        let ringing = render_synth(&mut resonant, &s, 0, TEST_PITCH, cutoff, 1024);
        let energy = |samples: &[i32]| samples.iter().map(|&v| (v as i64).abs()).sum::<i64>();
        assert!(energy(&ringing) > energy(&base));
    }

    #[test]
    fn test_pcm_loop_repeats() {
        let t = tables();
        // A two-level looped wave: full scale then one octave down.
        let pcm = vec![0u16, 2048];
        let s = src(&t, &pcm);
        let mut gen = WaveGenerator::new();
        gen.init_pcm(
            PcmWave {
                addr: 0,
                len: 2,
                looped: true,
                pitch: 0,
            },
            false,
        );

        // Unity playback rate: one source sample per tick.
        let samples = render_synth(&mut gen, &s, 0, 16384, 0, 64);
        assert!(gen.is_active());
        assert!(samples.iter().any(|&v| v >= 8000));
        assert!(samples.iter().any(|&v| (3500..4500).contains(&v)));
    }

    #[test]
    fn test_pcm_non_loop_deactivates() {
        let t = tables();
        let pcm = vec![0u16; 16];
        let s = src(&t, &pcm);
        let mut gen = WaveGenerator::new();
        gen.init_pcm(
            PcmWave {
                addr: 0,
                len: 16,
                looped: false,
                pitch: 0,
            },
            true,
        );

        for _ in 0..64 {
            gen.generate(&s, 0, 16384, 0);
        }
        assert!(!gen.is_active());
        assert_eq!(gen.output(&s), 0);
    }

    #[test]
    fn test_pcm_interpolation_smooths() {
        let t = tables();
        // Alternate full-scale positive and silence.
        let pcm = vec![0u16, 0x7fff, 0, 0x7fff, 0, 0x7fff, 0, 0x7fff];
        let s = src(&t, &pcm);
        let wave = PcmWave {
            addr: 0,
            len: 8,
            looped: true,
            pitch: 0,
        };

        let mut nearest = WaveGenerator::new();
        nearest.init_pcm(wave, false);
        let mut interp = WaveGenerator::new();
        interp.init_pcm(wave, true);

        // Quarter-rate playback exposes the interpolation.
        let pitch = 16384 - 2 * 4096;
        let coarse = render_synth(&mut nearest, &s, 0, pitch, 0, 32);
        let smooth = render_synth(&mut interp, &s, 0, pitch, 0, 32);
        let distinct = |samples: &[i32]| {
            let mut v: Vec<i32> = samples.to_vec();
            v.sort_unstable();
            v.dedup();
            v.len()
        };
        assert!(distinct(&smooth) > distinct(&coarse));
    }

    #[test]
    fn test_fold_wraps_overflow() {
        assert_eq!(fold_14bit(0), 0);
        assert_eq!(fold_14bit(8191), 8191);
        assert_eq!(fold_14bit(-8192), -8192);
        // One past the positive edge folds to the negative edge.
        assert_eq!(fold_14bit(8192), -8192);
        assert_eq!(fold_14bit(16384), 0);
    }

    #[test]
    fn test_ring_pair_silent_slave_mutes_ring_output() {
        let t = tables();
        let s = src(&t, &[]);
        let mut pair = IntPartialPair::new();
        pair.init(true, false);
        pair.init_synth(PairSlot::Master, false, 128, 0);
        pair.init_synth(PairSlot::Slave, false, 128, 0);

        for _ in 0..64 {
            pair.generate(PairSlot::Master, &s, 0, TEST_PITCH, TEST_CUTOFF);
            // Slave fully attenuated: the ring product must be silent.
            pair.generate(PairSlot::Slave, &s, 60000, TEST_PITCH, TEST_CUTOFF);
            assert_eq!(pair.next_out_sample(&s), 0);
        }
    }

    #[test]
    fn test_mixed_ring_includes_master() {
        let t = tables();
        let s = src(&t, &[]);
        let mut pair = IntPartialPair::new();
        pair.init(true, true);
        pair.init_synth(PairSlot::Master, false, 128, 0);
        pair.init_synth(PairSlot::Slave, false, 128, 0);

        let mut any_nonzero = false;
        for _ in 0..64 {
            pair.generate(PairSlot::Master, &s, 0, TEST_PITCH, TEST_CUTOFF);
            pair.generate(PairSlot::Slave, &s, 60000, TEST_PITCH, TEST_CUTOFF);
            if pair.next_out_sample(&s) != 0 {
                any_nonzero = true;
            }
        }
        assert!(any_nonzero);
    }
}
