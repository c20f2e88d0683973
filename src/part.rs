//! Parts
//!
//! A part is one of the nine logical MIDI channels inside the synth: the
//! patch temp it plays, its working timbre, the four lazily rebuilt patch
//! caches, and the live controller state (modulation, expression, bender,
//! hold pedal, RPN). Parts hold no partials themselves; the allocator owns
//! the pools and the part supplies the caches and note context.

use crate::params::{PatchTemp, TimbreParam, PARTIALS_PER_TIMBRE};
use crate::partial::PatchCache;
use crate::rom::PcmWave;
use crate::tvp::SEMITONE;

/// Decode table for the 13 partial-structure codes: whether each half of
/// the pair is a PCM partial, and the pair's mix type.
pub const STRUCTURES: [(bool, bool, u8); 13] = [
    (false, false, 0),
    (false, false, 1),
    (false, false, 2),
    (true, false, 0),
    (true, false, 1),
    (true, false, 2),
    (false, true, 0),
    (false, true, 1),
    (false, true, 2),
    (true, true, 0),
    (true, true, 1),
    (false, false, 3),
    (true, true, 3),
];

/// Build the four partial caches for a timbre played with the given patch
/// settings. Rhythm notes use this too, against the drum entry's timbre.
pub fn build_patch_caches(
    timbre: &TimbreParam,
    key_shift: i32,
    fine_tune: i32,
    bender_range: u8,
    reverb_enabled: bool,
    pcm_waves: &[PcmWave],
) -> [PatchCache; PARTIALS_PER_TIMBRE] {
    let structure12 = STRUCTURES[timbre.partial_structure12.min(12) as usize];
    let structure34 = STRUCTURES[timbre.partial_structure34.min(12) as usize];

    core::array::from_fn(|slot| {
        let (pcm_first, pcm_second, mix) = if slot < 2 { structure12 } else { structure34 };
        let position = (slot & 1) as u8;
        let pcm_partial = if position == 0 { pcm_first } else { pcm_second };
        let param = timbre.partial[slot];
        let pcm_wave = pcm_waves.get(param.wg.pcm_wave as usize & 127).copied();
        let muted = timbre.partial_mute & (1 << slot) != 0;

        PatchCache {
            playable: !muted && (!pcm_partial || pcm_wave.is_some()),
            pcm_partial,
            pcm_wave: if pcm_partial { pcm_wave } else { None },
            param,
            structure_mix: mix,
            structure_position: position,
            structure_peer: slot ^ 1,
            no_sustain: timbre.no_sustain != 0,
            reverb: reverb_enabled,
            key_shift,
            fine_tune,
            bender_range,
        }
    })
}

/// One logical part.
#[derive(Debug, Clone)]
pub struct Part {
    index: usize,
    patch_temp: PatchTemp,
    timbre: TimbreParam,
    caches: [PatchCache; PARTIALS_PER_TIMBRE],
    cache_dirty: bool,
    expression: u8,
    modulation: u8,
    pitch_bend: i16,
    hold_pedal: bool,
    /// Registered parameter selected by RPN MSB/LSB; only 0 does anything.
    rpn: Option<u16>,
    bender_range: u8,
}

impl Part {
    pub fn new(index: usize) -> Self {
        Part {
            index,
            patch_temp: PatchTemp::default(),
            timbre: TimbreParam::default(),
            caches: core::array::from_fn(|_| PatchCache::default()),
            cache_dirty: true,
            expression: 100,
            modulation: 0,
            pitch_bend: 0,
            hold_pedal: false,
            rpn: None,
            bender_range: 2,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_rhythm(&self) -> bool {
        self.index == crate::params::RHYTHM_PART
    }

    pub fn patch_temp(&self) -> &PatchTemp {
        &self.patch_temp
    }

    pub fn timbre(&self) -> &TimbreParam {
        &self.timbre
    }

    /// Install a new patch temp (program change or SysEx write).
    pub fn set_patch_temp(&mut self, patch_temp: PatchTemp) {
        self.bender_range = patch_temp.patch.bender_range.min(24);
        self.patch_temp = patch_temp;
        self.cache_dirty = true;
    }

    /// Install a new working timbre.
    pub fn set_timbre(&mut self, timbre: TimbreParam) {
        self.timbre = timbre;
        self.cache_dirty = true;
    }

    pub fn mark_cache_dirty(&mut self) {
        self.cache_dirty = true;
    }

    pub fn cache_dirty(&self) -> bool {
        self.cache_dirty
    }

    /// Rebuild the patch caches if the RAM underneath changed since the
    /// last note-on.
    pub fn refresh_caches(&mut self, pcm_waves: &[PcmWave]) -> &[PatchCache; PARTIALS_PER_TIMBRE] {
        if self.cache_dirty {
            self.caches = build_patch_caches(
                &self.timbre,
                self.key_shift(),
                self.fine_tune(),
                self.bender_range,
                self.patch_temp.patch.reverb_switch != 0,
                pcm_waves,
            );
            self.cache_dirty = false;
        }
        &self.caches
    }

    /// Patch key shift in semitones, -24..24.
    pub fn key_shift(&self) -> i32 {
        self.patch_temp.patch.key_shift.min(48) as i32 - 24
    }

    /// Patch fine tune in cents, -50..50.
    pub fn fine_tune(&self) -> i32 {
        self.patch_temp.patch.fine_tune.min(100) as i32 - 50
    }

    pub fn assign_mode(&self) -> u8 {
        self.patch_temp.patch.assign_mode & 3
    }

    /// MIDI key to the internal 12..108 range after key shift.
    pub fn midi_key_to_internal(&self, key: u8, apply_key_shift: bool) -> u8 {
        let shift = if apply_key_shift { self.key_shift() } else { 0 };
        (key as i32 + shift).clamp(12, 108) as u8
    }

    // -- controllers -------------------------------------------------------

    pub fn expression(&self) -> u8 {
        self.expression
    }

    /// CC11, scaled from MIDI 0..127 to the internal 0..100.
    pub fn set_expression(&mut self, value: u8) {
        self.expression = (value.min(127) as u32 * 100 / 127) as u8;
    }

    pub fn volume(&self) -> u8 {
        self.patch_temp.output_level
    }

    /// CC7, scaled to 0..100 and written through to the patch temp.
    pub fn set_volume(&mut self, value: u8) {
        self.patch_temp.output_level = (value.min(127) as u32 * 100 / 127) as u8;
    }

    pub fn pan_setting(&self) -> u8 {
        self.patch_temp.panpot.min(14)
    }

    /// CC10, scaled to the 15-position pan.
    pub fn set_pan(&mut self, value: u8) {
        self.patch_temp.panpot = (value.min(127) as u32 * 14 / 127) as u8;
    }

    pub fn modulation(&self) -> u8 {
        self.modulation
    }

    pub fn set_modulation(&mut self, value: u8) {
        self.modulation = value.min(127);
    }

    pub fn hold_pedal(&self) -> bool {
        self.hold_pedal
    }

    /// CC64. Returns true on a pedal-up edge (held polys must be released).
    pub fn set_hold_pedal(&mut self, down: bool) -> bool {
        let released = self.hold_pedal && !down;
        self.hold_pedal = down;
        released
    }

    pub fn set_pitch_bend(&mut self, value: i16) {
        self.pitch_bend = value.clamp(-8192, 8191);
    }

    /// Current bend contribution in pitch units.
    pub fn bend_offset(&self) -> i32 {
        self.pitch_bend as i32 * self.bender_range as i32 * SEMITONE / 8192
    }

    pub fn bender_range(&self) -> u8 {
        self.bender_range
    }

    /// CC100/101 select a registered parameter; anything but 0 is ignored.
    pub fn set_rpn_lsb(&mut self, value: u8) {
        self.rpn = Some((self.rpn.unwrap_or(0) & 0x3F80) | value as u16);
    }

    pub fn set_rpn_msb(&mut self, value: u8) {
        self.rpn = Some((self.rpn.unwrap_or(0) & 0x7F) | ((value as u16) << 7));
    }

    /// CC6. Applies data entry to the selected RPN. Returns true when the
    /// bender range changed.
    pub fn data_entry(&mut self, value: u8) -> bool {
        if self.rpn == Some(0) {
            self.bender_range = value.min(24);
            self.cache_dirty = true;
            return true;
        }
        false
    }

    /// CC121: reset all controllers to power-on state.
    pub fn reset_all_controllers(&mut self) {
        self.expression = 100;
        self.modulation = 0;
        self.pitch_bend = 0;
        self.hold_pedal = false;
        self.rpn = None;
    }
}
