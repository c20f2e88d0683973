//! Partials
//!
//! A partial is one of the pool's physical voice generators: three envelope
//! engines driving one slot of an LA32 pair, plus panning and the pair
//! bookkeeping that couples two partials into a ring-modulated structure.
//! Partials are created once at open and recycled by the allocator; the
//! owner-part index doubles as the free/active flag.

use crate::la32::{PairSlot, PartialPairOps, WaveSource};
use crate::params::PartialParam;
use crate::render::RenderSample;
use crate::rng::Rng;
use crate::rom::{PcmWave, Quirks};
use crate::tables::{Tables, MAX_CUTOFF};
use crate::tva::{Tva, TvaContext, TvaPhase};
use crate::tvf::{Tvf, TvfContext};
use crate::tvp::{Tvp, TvpContext};

/// Numerators (over 7) of the master partial's pan in structure 3.
const MASTER_PAN_NUMERATOR: [u8; 15] = [0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7];

/// Numerators (over 7) of the slave partial's pan in structure 3.
const SLAVE_PAN_NUMERATOR: [u8; 15] = [0, 1, 2, 3, 4, 5, 6, 7, 7, 7, 7, 7, 7, 7, 7];

/// Preprocessed combination of one timbre partial with its patch flags,
/// rebuilt lazily when the timbre RAM underneath goes dirty.
#[derive(Debug, Clone, Default)]
pub struct PatchCache {
    /// This slot produces sound (not muted, generator present).
    pub playable: bool,
    pub pcm_partial: bool,
    pub pcm_wave: Option<PcmWave>,
    pub param: PartialParam,
    /// Mix type 0..3 of the structure this slot belongs to.
    pub structure_mix: u8,
    /// 0 = master, 1 = slave.
    pub structure_position: u8,
    /// The sibling slot index within the timbre.
    pub structure_peer: usize,
    pub no_sustain: bool,
    pub reverb: bool,
    pub key_shift: i32,
    pub fine_tune: i32,
    pub bender_range: u8,
}

/// Everything a part hands down at note-on.
#[derive(Debug, Clone, Copy)]
pub struct NoteOnContext<'a> {
    pub tables: &'a Tables,
    pub quirks: Quirks,
    /// Internal key, 12..108 (key shift already applied).
    pub key: u8,
    pub velocity: u8,
    /// Pan position 0..14 merged from patch temp and rhythm setup.
    pub pan_setting: u8,
    pub expression: u8,
    pub part_volume: u8,
    pub master_vol: u8,
    pub rhythm_level: Option<u8>,
    pub master_tune_delta: i32,
    pub bend_offset: i32,
    pub modulation: u8,
    pub nice_amp_ramp: bool,
    pub nice_panning: bool,
    pub nice_partial_mixing: bool,
    pub reversed_stereo: bool,
    pub rhythm: bool,
}

/// One pool voice.
#[derive(Debug)]
pub struct Partial<P: PartialPairOps> {
    index: usize,
    owner_part: Option<usize>,
    poly: Option<usize>,
    pair_peer: Option<usize>,
    cache: PatchCache,
    tva: Tva,
    tvf: Tvf,
    tvp: Tvp,
    pair: P,
    left_pan: i32,
    right_pan: i32,
    already_output: bool,
}

impl<P: PartialPairOps> Partial<P> {
    pub fn new(index: usize) -> Self {
        Partial {
            index,
            owner_part: None,
            poly: None,
            pair_peer: None,
            cache: PatchCache::default(),
            tva: Tva::new(),
            tvf: Tvf::new(),
            tvp: Tvp::new(),
            pair: P::default(),
            left_pan: 0,
            right_pan: 0,
            already_output: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_active(&self) -> bool {
        self.owner_part.is_some()
    }

    pub fn owner_part(&self) -> Option<usize> {
        self.owner_part
    }

    pub fn poly(&self) -> Option<usize> {
        self.poly
    }

    pub fn pair_peer(&self) -> Option<usize> {
        self.pair_peer
    }

    pub fn cache(&self) -> &PatchCache {
        &self.cache
    }

    /// The pair hosted by this partial (masters host their ring slaves).
    pub fn pair_mut(&mut self) -> &mut P {
        &mut self.pair
    }

    /// A ring-modulated slave renders only through its master. Without a
    /// live master (the sibling slot muted) the partial plays standalone.
    pub fn is_ring_slave(&self) -> bool {
        matches!(self.cache.structure_mix, 1 | 2)
            && self.cache.structure_position == 1
            && self.pair_peer.is_some()
    }

    pub fn already_output(&self) -> bool {
        self.already_output
    }

    pub fn clear_output_flag(&mut self) {
        self.already_output = false;
    }

    /// Wire the sibling back-reference; `None` for unpaired structures.
    pub fn set_pair_peer(&mut self, peer: Option<usize>) {
        self.pair_peer = peer;
    }

    /// Activate this partial for a note. For ring-modulated slaves the
    /// caller passes the master partial's pair so the slave wave lands in
    /// the master's slave slot.
    pub fn start(
        &mut self,
        ctx: &NoteOnContext<'_>,
        cache: &PatchCache,
        part: usize,
        poly: usize,
        master_pair: Option<&mut P>,
    ) {
        self.owner_part = Some(part);
        self.poly = Some(poly);
        self.cache = cache.clone();
        self.already_output = false;

        self.compute_pan(ctx);
        self.reset_envelopes(ctx);

        let ring = matches!(cache.structure_mix, 1 | 2);
        let mixed = cache.structure_mix != 2 && !ctx.quirks.ring_mod_no_mix;
        let slot = if master_pair.is_some() {
            PairSlot::Slave
        } else {
            PairSlot::Master
        };
        let pair = match master_pair {
            Some(pair) => pair,
            None => &mut self.pair,
        };
        if slot == PairSlot::Master {
            pair.init(ring, mixed);
        }
        if cache.pcm_partial {
            if let Some(wave) = cache.pcm_wave {
                // Ring-mod slaves replay without interpolation.
                pair.init_pcm(slot, wave, slot == PairSlot::Master);
            } else {
                pair.deactivate(slot);
            }
        } else {
            let pulse_width = pulse_width_value(
                cache.param.wg.pulse_width,
                cache.param.wg.pulse_width_velo_sensitivity,
                ctx.velocity,
            );
            pair.init_synth(
                slot,
                cache.param.wg.waveform & 1 != 0,
                pulse_width,
                (cache.param.tvf.resonance.min(30)) as u8,
            );
        }
    }

    fn reset_envelopes(&mut self, ctx: &NoteOnContext<'_>) {
        let param = self.cache.param;
        self.tva.reset(
            ctx.tables,
            &param,
            TvaContext {
                key: ctx.key,
                velocity: ctx.velocity,
                expression: ctx.expression,
                part_volume: ctx.part_volume,
                master_vol: ctx.master_vol,
                rhythm_level: ctx.rhythm_level,
                no_sustain: self.cache.no_sustain,
                nice_amp_ramp: ctx.nice_amp_ramp,
                zero_env_levels_quirk: ctx.quirks.tva_zero_env_levels,
            },
        );
        self.tvf.reset(
            ctx.tables,
            &param,
            TvfContext {
                key: ctx.key,
                velocity: ctx.velocity,
                base_cutoff_limit_quirk: ctx.quirks.tvf_base_cutoff_limit,
            },
        );
        self.tvp.reset(
            ctx.tables,
            &param,
            TvpContext {
                key: ctx.key,
                velocity: ctx.velocity,
                key_shift: self.cache.key_shift,
                fine_tune: self.cache.fine_tune,
                master_tune_delta: ctx.master_tune_delta,
                pcm_pitch: self.cache.pcm_wave.filter(|_| self.cache.pcm_partial).map(|w| w.pitch),
                rhythm: ctx.rhythm,
                base_pitch_overflow_quirk: ctx.quirks.base_pitch_overflow,
                pitch_env_overflow_quirk: ctx.quirks.pitch_env_overflow,
                fast_pitch_change: ctx.quirks.fast_pitch_change,
            },
        );
        self.tvp.set_bend_offset(ctx.bend_offset);
        self.tvp.set_modulation(ctx.modulation);
    }

    fn compute_pan(&mut self, ctx: &NoteOnContext<'_>) {
        let mut pan = ctx.pan_setting.min(14);
        if !ctx.nice_panning || ctx.quirks.pan_mult {
            // Only eight coarse positions on the original allocator.
            pan &= !1;
        }
        if self.cache.structure_mix == 3 {
            let numerator = if self.cache.structure_position == 0 {
                MASTER_PAN_NUMERATOR[pan as usize]
            } else {
                SLAVE_PAN_NUMERATOR[pan as usize]
            };
            pan = numerator * 2;
        }

        let tables = ctx.tables;
        let (mut left, mut right) = (
            tables.pan_factors[pan as usize],
            tables.pan_factors[(14 - pan) as usize],
        );
        if ctx.reversed_stereo {
            core::mem::swap(&mut left, &mut right);
        }
        if !ctx.nice_partial_mixing && self.index & 4 != 0 {
            // The original allocator phase-inverts these pool quarters.
            left = -left;
            right = -right;
        }
        self.left_pan = left;
        self.right_pan = right;
    }

    /// Release the envelopes towards silence.
    pub fn start_decay_all(&mut self, tables: &Tables) {
        self.tva.start_decay(tables);
        self.tvf.start_decay(tables);
        self.tvp.start_decay(tables);
    }

    /// Fastest possible decay; the partial deactivates within a few ticks.
    pub fn start_abort(&mut self, tables: &Tables) {
        self.tva.start_abort(tables);
        self.tvf.start_abort(tables);
    }

    pub fn is_releasing(&self) -> bool {
        self.tva.phase() >= TvaPhase::Release
    }

    /// Push live controller state into the pitch envelope.
    pub fn set_bend_offset(&mut self, offset: i32) {
        self.tvp.set_bend_offset(offset);
    }

    pub fn set_modulation(&mut self, modulation: u8) {
        self.tvp.set_modulation(modulation);
    }

    pub fn update_amp_context(&mut self, tables: &Tables, ctx: TvaContext) {
        self.tva.update_context(tables, ctx);
    }

    /// Return the pool slot to the free list.
    pub fn deactivate(&mut self) {
        self.owner_part = None;
        self.poly = None;
        self.pair_peer = None;
        self.pair.deactivate(PairSlot::Master);
        self.pair.deactivate(PairSlot::Slave);
    }

    fn envelope_drivers(&mut self, tables: &Tables, rng: &mut Rng) -> (u32, u16, u32) {
        let amp = self.tva.next_amp(tables);
        let pitch = self.tvp.next_pitch(tables, rng);
        let cutoff = ((self.tvf.base_cutoff() as u32) << 18)
            .saturating_add(self.tvf.next_cutoff_modifier(tables))
            .min(MAX_CUTOFF);
        (amp, pitch, cutoff)
    }

    /// Render `left.len()` samples into the stream pair, advancing the
    /// envelopes of this partial and, for ring-modulated structures, of the
    /// slave partial too. Returns false once the partial has died and been
    /// deactivated.
    pub fn produce_output(
        &mut self,
        mut slave: Option<&mut Partial<P>>,
        src: &WaveSource<'_>,
        rng: &mut Rng,
        left: &mut [P::Sample],
        right: &mut [P::Sample],
    ) -> bool {
        debug_assert!(!self.is_ring_slave());
        if !self.is_active() {
            return false;
        }
        self.already_output = true;
        if let Some(slave) = slave.as_deref_mut() {
            slave.already_output = true;
        }

        let tables = src.tables;
        for i in 0..left.len() {
            if self.tva.phase() == TvaPhase::Dead || !self.pair.is_active(PairSlot::Master) {
                self.deactivate();
                if let Some(slave) = slave.take() {
                    slave.deactivate();
                }
                return false;
            }

            let (amp, pitch, cutoff) = self.envelope_drivers(tables, rng);
            self.pair.generate(PairSlot::Master, src, amp, pitch, cutoff);

            if let Some(slave) = slave.as_deref_mut() {
                if slave.is_active() && slave.tva.phase() == TvaPhase::Dead {
                    self.pair.deactivate(PairSlot::Slave);
                    slave.deactivate();
                } else if self.pair.is_active(PairSlot::Slave) {
                    let (amp, pitch, cutoff) = slave.envelope_drivers(tables, rng);
                    self.pair.generate(PairSlot::Slave, src, amp, pitch, cutoff);
                }
            }

            let sample = self.pair.next_out_sample(src);
            left[i] = left[i].saturating_mix(sample.scale_pan(self.left_pan));
            right[i] = right[i].saturating_mix(sample.scale_pan(self.right_pan));
        }
        true
    }
}

/// LA32 pulse-width input from the timbre value and velocity follow.
fn pulse_width_value(pulse_width: u8, velo_sensitivity: u8, velocity: u8) -> u8 {
    let base = pulse_width.min(100) as i32 * 255 / 100;
    let follow = velo_sensitivity.min(14) as i32 * (velocity as i32 - 64) / 64;
    (base + follow * 8).clamp(0, 255) as u8
}
