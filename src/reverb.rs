//! Boss Reverb
//!
//! A ring-buffer cascade emulating the Boss reverb chip: an entrance delay
//! with a one-pole low-pass, three serial all-pass diffusers and three
//! parallel combs whose fixed taps form the stereo output. Mode 3 is the
//! tap-delay topology: no all-passes, one long interleaved-stereo comb with
//! eight tap pairs selected by the TIME parameter.
//!
//! Every multiply goes through the chip's "weird" multiplier, approximated
//! as `(sample * amp) >> 8`. Tables are parameterised by `(mode, model)`;
//! the MT-32 and CM-32L carry slightly different tap sets.

use crate::render::RenderSample;
use serde::{Deserialize, Serialize};

/// Reverb topology selected by the system area (or a host override).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReverbMode {
    Room = 0,
    Hall = 1,
    Plate = 2,
    TapDelay = 3,
}

impl ReverbMode {
    pub fn from_index(index: u8) -> Self {
        match index & 3 {
            0 => ReverbMode::Room,
            1 => ReverbMode::Hall,
            2 => ReverbMode::Plate,
            _ => ReverbMode::TapDelay,
        }
    }
}

/// Which chip's table set to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReverbModelKind {
    Mt32,
    Cm32L,
}

/// Extra arithmetic the reverb needs on top of [`RenderSample`].
pub trait ReverbSample: RenderSample {
    /// The Boss chip's non-standard multiplier (fast approximation).
    fn weird_mul(self, amp: u8) -> Self;
    fn halve(self) -> Self;
    fn neg(self) -> Self;
    /// Tiny DC bias on the float input path to keep denormals away.
    fn input_bias() -> Self;
}

impl ReverbSample for i16 {
    #[inline]
    fn weird_mul(self, amp: u8) -> i16 {
        ((self as i32 * amp as i32) >> 8) as i16
    }

    #[inline]
    fn halve(self) -> i16 {
        self >> 1
    }

    #[inline]
    fn neg(self) -> i16 {
        self.saturating_neg()
    }

    #[inline]
    fn input_bias() -> i16 {
        0
    }
}

impl ReverbSample for f32 {
    #[inline]
    fn weird_mul(self, amp: u8) -> f32 {
        self * amp as f32 / 256.0
    }

    #[inline]
    fn halve(self) -> f32 {
        self * 0.5
    }

    #[inline]
    fn neg(self) -> f32 {
        -self
    }

    #[inline]
    fn input_bias() -> f32 {
        1.0e-20
    }
}

/// Per-mode, per-model parameter tables.
#[derive(Debug, Clone, Copy)]
struct ModeSpec {
    allpass_sizes: [usize; 3],
    /// Entry 0 is the entrance delay; 1..3 the parallel combs.
    comb_sizes: [usize; 4],
    out_left: [usize; 3],
    out_right: [usize; 3],
    dry_amps: [u8; 8],
    wet_levels: [u8; 8],
    filter_factors: [u8; 8],
    feedback_factors: [[u8; 8]; 3],
    lpf_amp: u8,
}

const ROOM_MT32: ModeSpec = ModeSpec {
    allpass_sizes: [347, 113, 37],
    comb_sizes: [241, 1187, 1313, 1427],
    out_left: [1103, 1213, 1337],
    out_right: [1091, 1181, 1327],
    dry_amps: [0x60, 0x68, 0x70, 0x78, 0x80, 0x88, 0x90, 0x98],
    wet_levels: [0x00, 0x18, 0x30, 0x48, 0x60, 0x78, 0x90, 0xA8],
    filter_factors: [0x80, 0x87, 0x8E, 0x95, 0x9C, 0xA3, 0xAA, 0xB1],
    feedback_factors: [
        [0x30, 0x48, 0x60, 0x78, 0x90, 0xA8, 0xC0, 0xD8],
        [0x32, 0x4A, 0x62, 0x7A, 0x92, 0xAA, 0xC2, 0xDA],
        [0x34, 0x4C, 0x64, 0x7C, 0x94, 0xAC, 0xC4, 0xDC],
    ],
    lpf_amp: 0x80,
};

const HALL_MT32: ModeSpec = ModeSpec {
    allpass_sizes: [593, 197, 67],
    comb_sizes: [347, 2467, 2707, 2903],
    out_left: [2299, 2609, 2801],
    out_right: [2251, 2593, 2789],
    dry_amps: [0x60, 0x68, 0x70, 0x78, 0x80, 0x88, 0x90, 0x98],
    wet_levels: [0x00, 0x18, 0x30, 0x48, 0x60, 0x78, 0x90, 0xA8],
    filter_factors: [0x80, 0x88, 0x90, 0x98, 0xA0, 0xA8, 0xB0, 0xB8],
    feedback_factors: [
        [0x38, 0x50, 0x68, 0x80, 0x98, 0xB0, 0xC8, 0xE0],
        [0x3A, 0x52, 0x6A, 0x82, 0x9A, 0xB2, 0xCA, 0xE2],
        [0x3C, 0x54, 0x6C, 0x84, 0x9C, 0xB4, 0xCC, 0xE4],
    ],
    lpf_amp: 0x80,
};

const PLATE_MT32: ModeSpec = ModeSpec {
    allpass_sizes: [229, 83, 31],
    comb_sizes: [131, 1637, 1811, 1949],
    out_left: [1523, 1717, 1873],
    out_right: [1511, 1709, 1861],
    dry_amps: [0x60, 0x68, 0x70, 0x78, 0x80, 0x88, 0x90, 0x98],
    wet_levels: [0x00, 0x18, 0x30, 0x48, 0x60, 0x78, 0x90, 0xA8],
    filter_factors: [0x70, 0x78, 0x80, 0x88, 0x90, 0x98, 0xA0, 0xA8],
    feedback_factors: [
        [0x28, 0x40, 0x58, 0x70, 0x88, 0xA0, 0xB8, 0xD0],
        [0x2A, 0x42, 0x5A, 0x72, 0x8A, 0xA2, 0xBA, 0xD2],
        [0x2C, 0x44, 0x5C, 0x74, 0x8C, 0xA4, 0xBC, 0xD4],
    ],
    lpf_amp: 0x80,
};

/// The CM-32L chip runs marginally different delay lines.
const ROOM_CM32L: ModeSpec = ModeSpec {
    allpass_sizes: [353, 109, 41],
    comb_sizes: [251, 1201, 1327, 1439],
    out_left: [1117, 1229, 1349],
    out_right: [1103, 1193, 1341],
    ..ROOM_MT32
};

const HALL_CM32L: ModeSpec = ModeSpec {
    allpass_sizes: [599, 211, 71],
    comb_sizes: [359, 2473, 2719, 2917],
    out_left: [2309, 2617, 2803],
    out_right: [2267, 2603, 2797],
    ..HALL_MT32
};

const PLATE_CM32L: ModeSpec = ModeSpec {
    allpass_sizes: [233, 89, 29],
    comb_sizes: [137, 1657, 1823, 1951],
    out_left: [1531, 1723, 1877],
    out_right: [1517, 1713, 1867],
    ..PLATE_MT32
};

/// Tap-delay comb size in samples (interleaved stereo, 8192 frames).
const TAP_DELAY_SIZE: usize = 16384;

/// Tap pairs (left, right) in frames, indexed by TIME.
const TAP_DELAY_TAPS: [(usize, usize); 8] = [
    (121, 242),
    (242, 484),
    (364, 727),
    (484, 969),
    (605, 1211),
    (727, 1453),
    (848, 1696),
    (969, 1938),
];

const TAP_DELAY_FEEDBACKS: [u8; 8] = [0x00, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80];

const TAP_DELAY_DRY_AMPS: [u8; 16] = [
    0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x60, 0x60, 0x60, 0x60, 0x60, 0x60, 0x60,
    0x60,
];

const TAP_DELAY_WET_LEVELS: [u8; 8] = [0x00, 0x18, 0x30, 0x48, 0x60, 0x78, 0x90, 0xA8];

fn mode_spec(mode: ReverbMode, model: ReverbModelKind) -> &'static ModeSpec {
    match (mode, model) {
        (ReverbMode::Room, ReverbModelKind::Mt32) => &ROOM_MT32,
        (ReverbMode::Hall, ReverbModelKind::Mt32) => &HALL_MT32,
        (ReverbMode::Plate, ReverbModelKind::Mt32) => &PLATE_MT32,
        (ReverbMode::Room, ReverbModelKind::Cm32L) => &ROOM_CM32L,
        (ReverbMode::Hall, ReverbModelKind::Cm32L) => &HALL_CM32L,
        (ReverbMode::Plate, ReverbModelKind::Cm32L) => &PLATE_CM32L,
        (ReverbMode::TapDelay, _) => &ROOM_MT32, // unused; tap delay has its own tables
    }
}

/// A ring buffer with fixed-position taps.
#[derive(Debug, Clone)]
struct Ring<S> {
    buffer: Vec<S>,
    index: usize,
}

impl<S: ReverbSample> Ring<S> {
    fn new(size: usize) -> Self {
        Ring {
            buffer: vec![S::SILENCE; size],
            index: 0,
        }
    }

    #[inline]
    fn next(&mut self) {
        self.index = if self.index == 0 {
            self.buffer.len() - 1
        } else {
            self.index - 1
        };
    }

    /// Sample written `offset` steps ago.
    #[inline]
    fn tap(&self, offset: usize) -> S {
        self.buffer[(self.index + offset) % self.buffer.len()]
    }

    /// The oldest sample: the line's full delay.
    #[inline]
    fn delayed(&self) -> S {
        self.tap(self.buffer.len() - 1)
    }

    #[inline]
    fn write(&mut self, value: S) {
        let at = self.index;
        self.buffer[at] = value;
    }

    fn is_silent(&self) -> bool {
        self.buffer.iter().all(|s| s.is_silent())
    }

    fn mute(&mut self) {
        self.buffer.fill(S::SILENCE);
    }
}

/// The Boss reverb for one render pipeline.
pub struct BossReverb<S: ReverbSample> {
    mode: ReverbMode,
    spec: &'static ModeSpec,
    allpasses: Vec<Ring<S>>,
    combs: Vec<Ring<S>>,
    /// One-pole state of the entrance low-pass.
    lpf_state: S,
    time: u8,
    level: u8,
    dry_amp: u8,
    wet_level: u8,
    filter_factor: u8,
    comb_feedback: [u8; 3],
    tap_left: usize,
    tap_right: usize,
}

impl<S: ReverbSample> BossReverb<S> {
    pub fn new(mode: ReverbMode, model: ReverbModelKind) -> Self {
        let spec = mode_spec(mode, model);
        let (allpasses, combs) = match mode {
            ReverbMode::TapDelay => (Vec::new(), vec![Ring::new(TAP_DELAY_SIZE)]),
            _ => (
                spec.allpass_sizes.iter().map(|&n| Ring::new(n)).collect(),
                spec.comb_sizes.iter().map(|&n| Ring::new(n)).collect(),
            ),
        };
        let mut reverb = BossReverb {
            mode,
            spec,
            allpasses,
            combs,
            lpf_state: S::SILENCE,
            time: 0,
            level: 0,
            dry_amp: 0,
            wet_level: 0,
            filter_factor: 0,
            comb_feedback: [0; 3],
            tap_left: 0,
            tap_right: 0,
        };
        reverb.set_parameters(5, 3);
        reverb
    }

    pub fn mode(&self) -> ReverbMode {
        self.mode
    }

    pub fn time(&self) -> u8 {
        self.time
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Apply the system area's TIME and LEVEL (each masked to three bits).
    pub fn set_parameters(&mut self, time: u8, level: u8) {
        let time = time & 7;
        let level = level & 7;
        self.time = time;
        self.level = level;

        if self.mode == ReverbMode::TapDelay {
            let extended = time == 0 || (time == 1 && level == 1);
            let dry_index = if extended { 8 + level } else { level } as usize;
            self.dry_amp = TAP_DELAY_DRY_AMPS[dry_index];
            self.wet_level = TAP_DELAY_WET_LEVELS[level as usize];
            self.filter_factor = TAP_DELAY_FEEDBACKS[time as usize];
            let (left, right) = TAP_DELAY_TAPS[time as usize];
            self.tap_left = left * 2;
            self.tap_right = right * 2 + 1;
        } else {
            self.dry_amp = self.spec.dry_amps[level as usize];
            self.wet_level = self.spec.wet_levels[level as usize];
            self.filter_factor = self.spec.filter_factors[time as usize];
            for (slot, factors) in self.comb_feedback.iter_mut().zip(&self.spec.feedback_factors)
            {
                *slot = factors[time as usize];
            }
        }
        if time == 0 && level == 0 {
            self.dry_amp = 0;
            self.wet_level = 0;
        }
    }

    /// Every delay line is below the silence threshold.
    pub fn is_active(&self) -> bool {
        !(self.allpasses.iter().all(Ring::is_silent) && self.combs.iter().all(Ring::is_silent))
    }

    /// Flush all state.
    pub fn mute(&mut self) {
        for ring in self.allpasses.iter_mut().chain(self.combs.iter_mut()) {
            ring.mute();
        }
        self.lpf_state = S::SILENCE;
    }

    /// Render one run. Inputs are the reverb-wet send streams; outputs are
    /// overwritten.
    pub fn process(
        &mut self,
        in_left: &[S],
        in_right: &[S],
        out_left: &mut [S],
        out_right: &mut [S],
    ) {
        match self.mode {
            ReverbMode::TapDelay => self.process_tap_delay(in_left, in_right, out_left, out_right),
            _ => self.process_standard(in_left, in_right, out_left, out_right),
        }
    }

    fn process_standard(
        &mut self,
        in_left: &[S],
        in_right: &[S],
        out_left: &mut [S],
        out_right: &mut [S],
    ) {
        for i in 0..out_left.len() {
            // Mono mix through the input gain.
            let input = in_left[i]
                .halve()
                .saturating_mix(in_right[i].halve())
                .saturating_mix(S::input_bias())
                .weird_mul(self.dry_amp);

            // Entrance delay with low-pass feedback, no recirculation.
            let entrance = &mut self.combs[0];
            entrance.next();
            let delayed = entrance.delayed();
            self.lpf_state = self.lpf_state.weird_mul(self.filter_factor).saturating_mix(input);
            let write = self.lpf_state.weird_mul(self.spec.lpf_amp);
            entrance.write(write);

            // Three serial all-passes: store input - out/2, emit
            // out + stored/2.
            let mut link = delayed;
            for allpass in self.allpasses.iter_mut() {
                allpass.next();
                let out = allpass.delayed();
                let stored = link.saturating_mix(out.halve().neg());
                allpass.write(stored);
                link = out.saturating_mix(stored.halve());
            }

            // Three parallel combs with weird-mul feedback.
            let mut taps_l = [S::SILENCE; 3];
            let mut taps_r = [S::SILENCE; 3];
            for c in 0..3 {
                let comb = &mut self.combs[c + 1];
                comb.next();
                let feedback = comb.delayed().weird_mul(self.comb_feedback[c]);
                comb.write(link.saturating_mix(feedback));
                taps_l[c] = comb.tap(self.spec.out_left[c]);
                taps_r[c] = comb.tap(self.spec.out_right[c]);
            }

            let mix = |t: [S; 3]| {
                t[0].saturating_mix(t[0].halve())
                    .saturating_mix(t[1])
                    .saturating_mix(t[1].halve())
                    .saturating_mix(t[2])
            };
            out_left[i] = mix(taps_l).weird_mul(self.wet_level);
            out_right[i] = mix(taps_r).weird_mul(self.wet_level);
        }
    }

    fn process_tap_delay(
        &mut self,
        in_left: &[S],
        in_right: &[S],
        out_left: &mut [S],
        out_right: &mut [S],
    ) {
        for i in 0..out_left.len() {
            let comb = &mut self.combs[0];

            // Stereo stays interleaved: two ring steps per frame. The
            // feedback tap sits one sample past the right output.
            let feedback_tap = self.tap_right + 1;

            comb.next();
            let feedback = comb.tap(feedback_tap).weird_mul(self.filter_factor);
            let left_in = in_left[i]
                .saturating_mix(S::input_bias())
                .weird_mul(self.dry_amp);
            comb.write(left_in.saturating_mix(feedback));
            out_left[i] = comb.tap(self.tap_left).weird_mul(self.wet_level);

            comb.next();
            let feedback = comb.tap(feedback_tap).weird_mul(self.filter_factor);
            let right_in = in_right[i]
                .saturating_mix(S::input_bias())
                .weird_mul(self.dry_amp);
            comb.write(right_in.saturating_mix(feedback));
            out_right[i] = comb.tap(self.tap_right).weird_mul(self.wet_level);
        }
    }
}
