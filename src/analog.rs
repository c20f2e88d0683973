//! Analogue Output Stage
//!
//! Emulates the path between the DAC and the line output: the sample-and
//! hold plus the analogue low-pass filter. Three fidelities are offered:
//! a 9-tap FIR at the synth rate (coarse), and a 48-tap 3-phase polyphase
//! FIR running the virtual 96 kHz circuit, decimated by two for the 48 kHz
//! accurate mode or not at all for the 96 kHz oversampled mode.
//!
//! The stage also owns the final mix: the six DAC streams are combined as
//! `(nonReverb + reverbDry) * synthGain + reverbWet * reverbGain` before
//! filtering, with 8-bit fractional gains on the integer pipeline.

use crate::render::{clip_sample_ex, DacStreams, RenderSample};
use crate::tables::SAMPLE_RATE;
use libm::{cos, sin};
use serde::{Deserialize, Serialize};

/// Output-stage fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalogOutputMode {
    /// Bypass: the mixed streams go straight out at 32 kHz.
    Disabled,
    /// 9-tap FIR at 32 kHz.
    Coarse,
    /// 48-tap polyphase at an effective 48 kHz.
    Accurate,
    /// Same taps without decimation: 96 kHz.
    Oversampled,
}

/// Gain attenuating the reverb return on non-MT-32 compatibility modes,
/// compensating the CM-32L reverb-channel LPF's DC loss.
pub const CM32L_REVERB_COMPENSATION: f32 = 0.68;

/// Coarse-mode taps of the MT-32's output filter.
const COARSE_TAPS_MT32: [f64; 9] = [
    -0.003, 0.013, -0.042, 0.134, 0.796, 0.134, -0.042, 0.013, -0.003,
];

/// Coarse-mode taps of the earlier, darker analogue LPF.
const COARSE_TAPS_OLD_MT32: [f64; 9] = [
    -0.002, 0.008, -0.026, 0.157, 0.726, 0.157, -0.026, 0.008, -0.002,
];

const POLYPHASE_TAP_COUNT: usize = 48;
const PHASE_COUNT: usize = 3;

/// Blackman-windowed sinc for the virtual 96 kHz circuit, normalised for
/// the 3x zero-stuffed upsampling.
fn polyphase_taps() -> [f64; POLYPHASE_TAP_COUNT] {
    let cutoff = 15500.0 / 96000.0;
    let mut taps = [0.0f64; POLYPHASE_TAP_COUNT];
    let centre = (POLYPHASE_TAP_COUNT - 1) as f64 / 2.0;
    let mut sum = 0.0;
    for (i, tap) in taps.iter_mut().enumerate() {
        let n = i as f64 - centre;
        let sinc = if n == 0.0 {
            2.0 * cutoff
        } else {
            sin(2.0 * core::f64::consts::PI * cutoff * n) / (core::f64::consts::PI * n)
        };
        let x = i as f64 / (POLYPHASE_TAP_COUNT - 1) as f64;
        let window = 0.42 - 0.5 * cos(2.0 * core::f64::consts::PI * x)
            + 0.08 * cos(4.0 * core::f64::consts::PI * x);
        *tap = sinc * window;
        sum += *tap;
    }
    for tap in taps.iter_mut() {
        *tap *= PHASE_COUNT as f64 / sum;
    }
    taps
}

/// Per-pipeline arithmetic of the output stage.
pub trait AnalogSample: RenderSample {
    type Tap: Copy + Send + Sync + core::fmt::Debug;
    type Gain: Copy + Send + Sync + core::fmt::Debug;
    type Acc: Copy + Default;

    fn tap_from_f64(value: f64) -> Self::Tap;
    fn gain_from_f32(value: f32) -> Self::Gain;
    fn scale(self, gain: Self::Gain) -> Self;
    fn acc_add(acc: Self::Acc, sample: Self, tap: Self::Tap) -> Self::Acc;
    fn acc_finish(acc: Self::Acc) -> Self;
}

impl AnalogSample for i16 {
    /// Q14 coefficients.
    type Tap = i32;
    /// 8-bit fractional gain.
    type Gain = i32;
    type Acc = i32;

    fn tap_from_f64(value: f64) -> i32 {
        (value * 16384.0).round() as i32
    }

    fn gain_from_f32(value: f32) -> i32 {
        (value * 256.0).round() as i32
    }

    #[inline]
    fn scale(self, gain: i32) -> i16 {
        clip_sample_ex((self as i32 * gain) >> 8)
    }

    #[inline]
    fn acc_add(acc: i32, sample: i16, tap: i32) -> i32 {
        acc + ((sample as i32 * tap) >> 14)
    }

    #[inline]
    fn acc_finish(acc: i32) -> i16 {
        clip_sample_ex(acc)
    }
}

impl AnalogSample for f32 {
    type Tap = f32;
    type Gain = f32;
    type Acc = f32;

    fn tap_from_f64(value: f64) -> f32 {
        value as f32
    }

    fn gain_from_f32(value: f32) -> f32 {
        value
    }

    #[inline]
    fn scale(self, gain: f32) -> f32 {
        self * gain
    }

    #[inline]
    fn acc_add(acc: f32, sample: f32, tap: f32) -> f32 {
        acc + sample * tap
    }

    #[inline]
    fn acc_finish(acc: f32) -> f32 {
        acc
    }
}

/// One channel's FIR delay line.
#[derive(Debug, Clone)]
struct FirChannel<S: AnalogSample> {
    history: Vec<S>,
    pos: usize,
}

impl<S: AnalogSample> FirChannel<S> {
    fn new(len: usize) -> Self {
        FirChannel {
            history: vec![S::SILENCE; len.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn push(&mut self, sample: S) {
        self.pos = (self.pos + 1) % self.history.len();
        let at = self.pos;
        self.history[at] = sample;
    }

    /// Convolve every `stride`-th tap starting at `offset` against the most
    /// recent history.
    #[inline]
    fn convolve(&self, taps: &[S::Tap], offset: usize, stride: usize) -> S {
        let len = self.history.len();
        let mut acc = S::Acc::default();
        let mut k = 0;
        let mut tap_index = offset;
        while tap_index < taps.len() {
            let sample = self.history[(self.pos + len - k) % len];
            acc = S::acc_add(acc, sample, taps[tap_index]);
            k += 1;
            tap_index += stride;
        }
        S::acc_finish(acc)
    }
}

/// The full output stage for one pipeline.
pub struct AnalogStage<S: AnalogSample> {
    mode: AnalogOutputMode,
    taps: Vec<S::Tap>,
    left: FirChannel<S>,
    right: FirChannel<S>,
    /// Polyphase phase, 0..3.
    phase: usize,
    phase_increment: usize,
    synth_gain: S::Gain,
    reverb_gain: S::Gain,
    reverb_compensated: bool,
}

impl<S: AnalogSample> AnalogStage<S> {
    /// `old_lpf` selects the earliest analogue filter for coarse mode;
    /// `compensate_reverb` applies the CM-32L reverb-return correction.
    pub fn new(mode: AnalogOutputMode, old_lpf: bool, compensate_reverb: bool) -> Self {
        let taps: Vec<S::Tap> = match mode {
            AnalogOutputMode::Disabled => Vec::new(),
            AnalogOutputMode::Coarse => {
                let set = if old_lpf {
                    &COARSE_TAPS_OLD_MT32
                } else {
                    &COARSE_TAPS_MT32
                };
                set.iter().map(|&v| S::tap_from_f64(v)).collect()
            }
            AnalogOutputMode::Accurate | AnalogOutputMode::Oversampled => {
                polyphase_taps().iter().map(|&v| S::tap_from_f64(v)).collect()
            }
        };
        let history_len = match mode {
            AnalogOutputMode::Disabled => 1,
            AnalogOutputMode::Coarse => COARSE_TAPS_MT32.len(),
            _ => POLYPHASE_TAP_COUNT / PHASE_COUNT,
        };
        let mut stage = AnalogStage {
            mode,
            taps,
            left: FirChannel::new(history_len),
            right: FirChannel::new(history_len),
            phase: 0,
            phase_increment: match mode {
                AnalogOutputMode::Oversampled => 1,
                _ => 2,
            },
            synth_gain: S::gain_from_f32(1.0),
            reverb_gain: S::gain_from_f32(1.0),
            reverb_compensated: compensate_reverb,
        };
        stage.set_reverb_gain(1.0);
        stage
    }

    pub fn mode(&self) -> AnalogOutputMode {
        self.mode
    }

    /// The stage's output rate.
    pub fn output_sample_rate(&self) -> u32 {
        match self.mode {
            AnalogOutputMode::Disabled | AnalogOutputMode::Coarse => SAMPLE_RATE,
            AnalogOutputMode::Accurate => SAMPLE_RATE * 3 / 2,
            AnalogOutputMode::Oversampled => SAMPLE_RATE * 3,
        }
    }

    pub fn set_synth_gain(&mut self, gain: f32) {
        self.synth_gain = S::gain_from_f32(gain);
    }

    pub fn set_reverb_gain(&mut self, gain: f32) {
        let gain = if self.reverb_compensated {
            gain * CM32L_REVERB_COMPENSATION
        } else {
            gain
        };
        self.reverb_gain = S::gain_from_f32(gain);
    }

    /// Input frames needed to produce `out_frames` output frames from the
    /// current phase.
    pub fn dac_streams_length(&self, out_frames: usize) -> usize {
        match self.mode {
            AnalogOutputMode::Disabled | AnalogOutputMode::Coarse => out_frames,
            _ => {
                let mut phase = self.phase;
                let mut inputs = 0;
                for _ in 0..out_frames {
                    phase += self.phase_increment;
                    while phase >= PHASE_COUNT {
                        phase -= PHASE_COUNT;
                        inputs += 1;
                    }
                }
                inputs
            }
        }
    }

    #[inline]
    fn mix_frame(&self, streams: &DacStreams<S>, i: usize) -> (S, S) {
        let left = streams.non_reverb_left[i]
            .saturating_mix(streams.reverb_dry_left[i])
            .scale(self.synth_gain)
            .saturating_mix(streams.reverb_wet_left[i].scale(self.reverb_gain));
        let right = streams.non_reverb_right[i]
            .saturating_mix(streams.reverb_dry_right[i])
            .scale(self.synth_gain)
            .saturating_mix(streams.reverb_wet_right[i].scale(self.reverb_gain));
        (left, right)
    }

    /// Consume `in_frames` stream frames and write interleaved stereo. The
    /// caller sizes `in_frames` with [`Self::dac_streams_length`]; returns
    /// the frames written.
    pub fn process(
        &mut self,
        streams: &DacStreams<S>,
        in_frames: usize,
        out: &mut [S],
    ) -> usize {
        match self.mode {
            AnalogOutputMode::Disabled => {
                for i in 0..in_frames {
                    let (l, r) = self.mix_frame(streams, i);
                    out[i * 2] = l;
                    out[i * 2 + 1] = r;
                }
                in_frames
            }
            AnalogOutputMode::Coarse => {
                for i in 0..in_frames {
                    let (l, r) = self.mix_frame(streams, i);
                    self.left.push(l);
                    self.right.push(r);
                    out[i * 2] = self.left.convolve(&self.taps, 0, 1);
                    out[i * 2 + 1] = self.right.convolve(&self.taps, 0, 1);
                }
                in_frames
            }
            AnalogOutputMode::Accurate | AnalogOutputMode::Oversampled => {
                let mut consumed = 0;
                let mut written = 0;
                while written * 2 + 1 < out.len() {
                    let mut next_phase = self.phase + self.phase_increment;
                    let mut need = 0;
                    while next_phase >= PHASE_COUNT {
                        next_phase -= PHASE_COUNT;
                        need += 1;
                    }
                    if consumed + need > in_frames {
                        break;
                    }
                    for _ in 0..need {
                        let (l, r) = self.mix_frame(streams, consumed);
                        self.left.push(l);
                        self.right.push(r);
                        consumed += 1;
                    }
                    self.phase = next_phase;
                    out[written * 2] = self.left.convolve(&self.taps, self.phase, PHASE_COUNT);
                    out[written * 2 + 1] =
                        self.right.convolve(&self.taps, self.phase, PHASE_COUNT);
                    written += 1;
                }
                written
            }
        }
    }
}
