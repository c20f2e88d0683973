//! LA32 Wave Generator, Float Path
//!
//! Semantically the integer generator with natural floating-point
//! arithmetic: the same segment walk, resonance model and PCM stepping, but
//! amplitudes as linear factors instead of log-domain attenuations. Samples
//! are unity scale (|s| <= 1) and the pair applies a fixed 0.25 factor on
//! emission so the two pipelines stay proportionally equivalent.

use crate::la32::{PairSlot, PartialPairOps, WaveSource, PCM_FRAC_BITS};
use crate::rom::PcmWave;
use crate::tables::{MIDDLE_CUTOFF, SINE_SEGMENT_LEN};
use libm::{cosf, exp2f, sinf};

const PI: f32 = core::f32::consts::PI;
const TAU: f32 = core::f32::consts::TAU;

/// Shortest corner fraction, mirroring the integer generator's floor.
const MIN_CORNER_FRAC: f32 = 4096.0 / (4.0 * SINE_SEGMENT_LEN as f32);

/// Wrap a sample into [-1, 1), the float ring-modulator fold.
#[inline]
pub fn fold_unity(sample: f32) -> f32 {
    let mut s = sample;
    while s >= 1.0 {
        s -= 2.0;
    }
    while s < -1.0 {
        s += 2.0;
    }
    s
}

#[derive(Debug, Clone)]
pub struct FloatWaveGenerator {
    active: bool,
    sawtooth: bool,
    pulse_width: u8,
    resonance: u8,
    pcm: Option<PcmWave>,
    interpolated: bool,
    /// Synth mode: phase within one period, 0..1.
    wave_pos: f32,
    /// PCM mode: fixed-point sample position shared with the int path.
    pcm_pos: u32,
    current: f32,
}

impl FloatWaveGenerator {
    pub fn new() -> Self {
        FloatWaveGenerator {
            active: false,
            sawtooth: false,
            pulse_width: 0,
            resonance: 0,
            pcm: None,
            interpolated: false,
            wave_pos: 0.0,
            pcm_pos: 0,
            current: 0.0,
        }
    }

    pub fn init_synth(&mut self, sawtooth: bool, pulse_width: u8, resonance: u8) {
        self.active = true;
        self.sawtooth = sawtooth;
        self.pulse_width = pulse_width;
        self.resonance = resonance.min(30);
        self.pcm = None;
        self.wave_pos = 0.0;
        self.current = 0.0;
    }

    pub fn init_pcm(&mut self, wave: PcmWave, interpolated: bool) {
        self.active = true;
        self.sawtooth = false;
        self.pcm = Some(wave);
        self.interpolated = interpolated;
        self.pcm_pos = 0;
        self.current = 0.0;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.current = 0.0;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

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

    #[inline]
    pub fn output(&self) -> f32 {
        if self.active {
            self.current
        } else {
            0.0
        }
    }

    fn generate_synth(&mut self, src: &WaveSource, amp: u32, pitch: u16, cutoff: u32) {
        let amp_linear = exp2f(-(amp as f32) / 4096.0);

        // Same geometry as the integer path, in period units.
        let cutoff_units = cutoff.saturating_sub(MIDDLE_CUTOFF) as f32 / (1 << 18) as f32;
        let corner = (0.25 * (1.0 - cutoff_units / 128.0)).max(MIN_CORNER_FRAC);
        let max_linear = 2.0 * (0.25 - corner);
        let pw_offset =
            ((self.pulse_width as f32 - 128.0) / 512.0).clamp(-max_linear, max_linear);
        let high_linear = max_linear + pw_offset;
        let low_linear = max_linear - pw_offset;

        let b0 = corner;
        let b1 = b0 + high_linear;
        let b2 = b1 + corner;
        let b3 = b2 + corner;
        let b4 = b3 + low_linear;
        let pos = self.wave_pos;

        let mut square = if pos < b0 {
            sinf(0.5 * PI * pos / corner)
        } else if pos < b1 {
            1.0
        } else if pos < b2 {
            sinf(0.5 * PI * (b2 - pos) / corner)
        } else if pos < b3 {
            -sinf(0.5 * PI * (pos - b2) / corner)
        } else if pos < b4 {
            -1.0
        } else {
            -sinf(0.5 * PI * (1.0 - pos) / corner)
        };

        let low_cutoff_attn = exp2f(-(MIDDLE_CUTOFF.saturating_sub(cutoff) as f32) / (1 << 21) as f32);
        square *= amp_linear * low_cutoff_attn;

        // Resonance sine at the corner frequency, restarted per half period.
        let (half_pos, half_len) = if pos < b2 {
            (pos, b2)
        } else {
            (pos - b2, 1.0 - b2)
        };
        let mut resonance = sinf(TAU * half_pos / (4.0 * corner));
        resonance *= exp2f(-((32 - self.resonance as u32) as f32) / 4.0);
        let decay_factor =
            src.tables.res_amp_decay_factor[(self.resonance >> 2) as usize] as f32;
        resonance *= exp2f(-decay_factor * half_pos);
        if cutoff_units < 16.0 {
            resonance *= sinf(0.5 * PI * cutoff_units / 16.0);
        }
        if half_pos < corner {
            resonance *= sinf(0.5 * PI * half_pos / corner);
        } else if half_len - half_pos <= corner {
            resonance *= sinf(0.5 * PI * (half_len - half_pos) / corner);
        }
        resonance *= amp_linear * low_cutoff_attn;

        let mut sample = square + resonance;
        if self.sawtooth {
            sample = (square + resonance) * cosf(TAU * pos);
        }
        self.current = sample;

        let step = exp2f(pitch as f32 / 4096.0) / 65536.0;
        self.wave_pos += step;
        while self.wave_pos >= 1.0 {
            self.wave_pos -= 1.0;
        }
    }

    fn generate_pcm(&mut self, src: &WaveSource, amp: u32, pitch: u16) {
        let wave = self.pcm.unwrap();
        let len = wave.len as u32;
        if len == 0 {
            self.deactivate();
            return;
        }

        let mut index = self.pcm_pos >> PCM_FRAC_BITS;
        if index >= len {
            if wave.looped {
                self.pcm_pos %= len << PCM_FRAC_BITS;
                index = self.pcm_pos >> PCM_FRAC_BITS;
            } else {
                self.deactivate();
                return;
            }
        }
        let frac = (self.pcm_pos & ((1 << PCM_FRAC_BITS) - 1)) as f32
            / (1 << PCM_FRAC_BITS) as f32;

        let amp_linear = exp2f(-(amp as f32) / 4096.0);
        let fetch = |offset: u32| -> f32 {
            let raw = src
                .pcm
                .get(wave.addr + offset as usize)
                .copied()
                .unwrap_or(0x7fff);
            let magnitude = exp2f(-((((raw & 0x7fff) as u32) << 1) as f32) / 4096.0);
            if raw & 0x8000 == 0 {
                magnitude
            } else {
                -magnitude
            }
        };

        let first = fetch(index);
        let sample = if self.interpolated {
            let second = if index + 1 < len {
                fetch(index + 1)
            } else if wave.looped {
                fetch(0)
            } else {
                0.0
            };
            first + (second - first) * frac
        } else {
            first
        };
        self.current = sample * amp_linear;

        self.pcm_pos += src.tables.pitch_to_step(pitch) >> 1;
    }
}

impl Default for FloatWaveGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Two coupled float wave generators.
#[derive(Debug, Clone)]
pub struct FloatPartialPair {
    master: FloatWaveGenerator,
    slave: FloatWaveGenerator,
    ring_modulated: bool,
    mixed: bool,
}

impl FloatPartialPair {
    pub fn new() -> Self {
        FloatPartialPair {
            master: FloatWaveGenerator::new(),
            slave: FloatWaveGenerator::new(),
            ring_modulated: false,
            mixed: true,
        }
    }

    fn slot(&mut self, slot: PairSlot) -> &mut FloatWaveGenerator {
        match slot {
            PairSlot::Master => &mut self.master,
            PairSlot::Slave => &mut self.slave,
        }
    }
}

impl Default for FloatPartialPair {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialPairOps for FloatPartialPair {
    type Sample = f32;

    fn init(&mut self, ring_modulated: bool, mixed: bool) {
        self.ring_modulated = ring_modulated;
        self.mixed = mixed;
    }

    fn init_synth(&mut self, slot: PairSlot, sawtooth: bool, pulse_width: u8, resonance: u8) {
        self.slot(slot).init_synth(sawtooth, pulse_width, resonance);
    }

    fn init_pcm(&mut self, slot: PairSlot, wave: PcmWave, interpolated: bool) {
        self.slot(slot).init_pcm(wave, interpolated);
    }

    fn deactivate(&mut self, slot: PairSlot) {
        self.slot(slot).deactivate();
    }

    fn is_active(&self, slot: PairSlot) -> bool {
        match slot {
            PairSlot::Master => self.master.is_active(),
            PairSlot::Slave => self.slave.is_active(),
        }
    }

    fn generate(&mut self, slot: PairSlot, src: &WaveSource, amp: u32, pitch: u16, cutoff: u32) {
        self.slot(slot).generate(src, amp, pitch, cutoff);
    }

    fn next_out_sample(&self, _src: &WaveSource) -> f32 {
        let master = self.master.output();
        let combined = if !self.ring_modulated {
            master
        } else {
            let ring = fold_unity(master) * fold_unity(self.slave.output());
            if self.mixed {
                master + ring
            } else {
                ring
            }
        };
        combined * 0.25
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::Tables;

    fn tables() -> Tables {
        Tables::new()
    }

    fn src<'a>(tables: &'a Tables, pcm: &'a [u16]) -> WaveSource<'a> {
        WaveSource { tables, pcm }
    }

    fn render(
        gen: &mut FloatWaveGenerator,
        src: &WaveSource,
        amp: u32,
        pitch: u16,
        cutoff: u32,
        count: usize,
    ) -> Vec<f32> {
        (0..count)
            .map(|_| {
                gen.generate(src, amp, pitch, cutoff);
                gen.output()
            })
            .collect()
    }

    #[test]
    fn test_unity_scale() {
        let t = tables();
        let s = src(&t, &[]);
        let mut gen = FloatWaveGenerator::new();
        gen.init_synth(false, 128, 30);
        let samples = render(&mut gen, &s, 0, 37132, MIDDLE_CUTOFF + (80 << 18), 4096);
        assert!(samples.iter().all(|v| v.abs() <= 2.0));
        assert!(samples.iter().any(|v| v.abs() > 0.5));
    }

    #[test]
    fn test_amp_attenuation_halves() {
        let t = tables();
        let s = src(&t, &[]);
        let mut gen = FloatWaveGenerator::new();

        gen.init_synth(false, 128, 0);
        let loud = render(&mut gen, &s, 0, 37132, MIDDLE_CUTOFF, 512);
        gen.init_synth(false, 128, 0);
        let soft = render(&mut gen, &s, 4096, 37132, MIDDLE_CUTOFF, 512);
        let peak = |v: &[f32]| v.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        approx::assert_relative_eq!(peak(&soft), peak(&loud) / 2.0, max_relative = 0.05);
    }

    #[test]
    fn test_fold_unity() {
        approx::assert_relative_eq!(fold_unity(0.5), 0.5);
        approx::assert_relative_eq!(fold_unity(1.25), -0.75);
        approx::assert_relative_eq!(fold_unity(-1.25), 0.75);
        approx::assert_relative_eq!(fold_unity(-1.0), -1.0);
    }

    #[test]
    fn test_pair_emits_quarter_scale() {
        let t = tables();
        let s = src(&t, &[]);
        let mut pair = FloatPartialPair::new();
        pair.init(false, true);
        pair.init_synth(PairSlot::Master, false, 128, 0);

        let mut peak = 0.0f32;
        for _ in 0..512 {
            pair.generate(PairSlot::Master, &s, 0, 37132, MIDDLE_CUTOFF);
            peak = peak.max(pair.next_out_sample(&s).abs());
        }
        assert!(peak <= 0.26);
        assert!(peak > 0.2);
    }

    #[test]
    fn test_int_float_paths_are_proportional() {
        use crate::la32::IntPartialPair;

        let t = tables();
        let s = src(&t, &[]);
        let mut int_pair = IntPartialPair::new();
        int_pair.init(false, true);
        int_pair.init_synth(PairSlot::Master, false, 128, 0);
        let mut float_pair = FloatPartialPair::new();
        PartialPairOps::init(&mut float_pair, false, true);
        float_pair.init_synth(PairSlot::Master, false, 128, 0);

        // A plain sine (cutoff at middle): the two paths agree to within a
        // couple of percent of full scale.
        let mut worst = 0.0f32;
        for _ in 0..2048 {
            int_pair.generate(PairSlot::Master, &s, 0, 30000, MIDDLE_CUTOFF);
            float_pair.generate(PairSlot::Master, &s, 0, 30000, MIDDLE_CUTOFF);
            let int_out = int_pair.next_out_sample(&s) as f32 / 8192.0;
            let float_out = float_pair.next_out_sample(&s) / 0.25;
            worst = worst.max((int_out - float_out).abs());
        }
        assert!(worst < 0.05, "paths diverged by {}", worst);
    }

    #[test]
    fn test_pcm_non_loop_deactivates() {
        let t = tables();
        let pcm = vec![0u16; 8];
        let s = src(&t, &pcm);
        let mut gen = FloatWaveGenerator::new();
        gen.init_pcm(
            PcmWave {
                addr: 0,
                len: 8,
                looped: false,
                pitch: 0,
            },
            true,
        );
        for _ in 0..32 {
            gen.generate(&s, 0, 16384, 0);
        }
        assert!(!gen.is_active());
    }
}
