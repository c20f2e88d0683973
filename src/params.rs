//! SysEx-Addressable Parameter Memory
//!
//! The synth's tone and system parameters live in a small set of
//! byte-addressed regions that external SysEx traffic reads and writes.
//! This module owns the raw region storage, the 21-bit address codec, the
//! per-byte maximum clamping applied on every write, and the typed views
//! (`PatchParam`, `TimbreParam`, `SystemParam`, ...) the rest of the core
//! parses out of the raw bytes.
//!
//! Addresses on the wire are "sysex padded": three 7-bit bytes packed
//! big-endian into a 21-bit linear offset.

/// Number of logical parts (eight melodic plus rhythm).
pub const PART_COUNT: usize = 9;

/// Rhythm part index.
pub const RHYTHM_PART: usize = 8;

/// Bytes per patch-bank entry.
pub const PATCH_PARAM_SIZE: usize = 8;

/// Bytes per patch-temp slot (patch plus output level, panpot, padding).
pub const PATCH_TEMP_SIZE: usize = 16;

/// Bytes per timbre parameter block.
pub const TIMBRE_PARAM_SIZE: usize = 246;

/// Bytes per timbre-bank slot (parameters plus ten bytes of padding).
pub const TIMBRE_SLOT_SIZE: usize = 256;

/// Entries in the timbre bank (groups A, B, Memory, Rhythm).
pub const TIMBRE_COUNT: usize = 256;

/// Entries in the rhythm setup table.
pub const RHYTHM_TEMP_COUNT: usize = 85;

/// Bytes per rhythm setup entry.
pub const RHYTHM_TEMP_SIZE: usize = 4;

/// Bytes in the system area.
pub const SYSTEM_SIZE: usize = 23;

/// Number of partials per timbre.
pub const PARTIALS_PER_TIMBRE: usize = 4;

/// Pack a 21-bit linear offset into three 7-bit sysex address bytes.
#[inline]
pub fn linear_to_sysex_addr(linear: u32) -> u32 {
    ((linear & 0x1FC000) << 2) | ((linear & 0x3F80) << 1) | (linear & 0x7F)
}

/// Unpack three 7-bit sysex address bytes into a 21-bit linear offset.
#[inline]
pub fn sysex_addr_to_linear(addr: u32) -> u32 {
    ((addr >> 2) & 0x1FC000) | ((addr >> 1) & 0x3F80) | (addr & 0x7F)
}

/// Sysex base addresses of the writable regions.
pub mod addr {
    pub const PATCH_TEMP: u32 = 0x030000;
    pub const RHYTHM_TEMP: u32 = 0x030110;
    pub const TIMBRE_TEMP: u32 = 0x040000;
    pub const PATCHES: u32 = 0x050000;
    pub const TIMBRES: u32 = 0x080000;
    pub const SYSTEM: u32 = 0x100000;
    pub const DISPLAY: u32 = 0x200000;
    pub const RESET: u32 = 0x7F0000;
}

/// One writable memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    PatchTemp,
    RhythmTemp,
    TimbreTemp,
    Patches,
    Timbres,
    System,
    Display,
    Reset,
}

impl Region {
    /// Locate the region containing a linear address. Returns the region and
    /// the offset inside it.
    pub fn locate(linear: u32) -> Option<(Region, usize)> {
        let regions = [
            (Region::PatchTemp, addr::PATCH_TEMP, PART_COUNT * PATCH_TEMP_SIZE),
            (
                Region::RhythmTemp,
                addr::RHYTHM_TEMP,
                RHYTHM_TEMP_COUNT * RHYTHM_TEMP_SIZE,
            ),
            (Region::TimbreTemp, addr::TIMBRE_TEMP, 8 * TIMBRE_PARAM_SIZE),
            (Region::Patches, addr::PATCHES, 128 * PATCH_PARAM_SIZE),
            (Region::Timbres, addr::TIMBRES, TIMBRE_COUNT * TIMBRE_SLOT_SIZE),
            (Region::System, addr::SYSTEM, SYSTEM_SIZE),
            (Region::Display, addr::DISPLAY, 0x4014),
            (Region::Reset, addr::RESET, 1),
        ];
        for (region, base, len) in regions {
            let base = sysex_addr_to_linear(base);
            if linear >= base && linear < base + len as u32 {
                return Some((region, (linear - base) as usize));
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Typed parameter views
// ---------------------------------------------------------------------------

/// One patch-bank entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchParam {
    pub timbre_group: u8,
    pub timbre_num: u8,
    /// 0..48, centred at 24 (+/- two octaves).
    pub key_shift: u8,
    /// 0..100, centred at 50 (+/- 50 cents).
    pub fine_tune: u8,
    pub bender_range: u8,
    pub assign_mode: u8,
    pub reverb_switch: u8,
    pub dummy: u8,
}

impl PatchParam {
    pub fn from_bytes(b: &[u8]) -> Self {
        PatchParam {
            timbre_group: b[0],
            timbre_num: b[1],
            key_shift: b[2],
            fine_tune: b[3],
            bender_range: b[4],
            assign_mode: b[5],
            reverb_switch: b[6],
            dummy: b[7],
        }
    }

    pub fn to_bytes(self) -> [u8; PATCH_PARAM_SIZE] {
        [
            self.timbre_group,
            self.timbre_num,
            self.key_shift,
            self.fine_tune,
            self.bender_range,
            self.assign_mode,
            self.reverb_switch,
            self.dummy,
        ]
    }

    /// Absolute timbre index in the 256-entry bank.
    pub fn absolute_timbre(self) -> usize {
        (self.timbre_group as usize & 3) * 64 + (self.timbre_num as usize & 63)
    }
}

/// Per-part patch temp: the patch plus part-level output level and panpot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchTemp {
    pub patch: PatchParam,
    pub output_level: u8,
    pub panpot: u8,
}

impl PatchTemp {
    pub fn from_bytes(b: &[u8]) -> Self {
        PatchTemp {
            patch: PatchParam::from_bytes(&b[0..8]),
            output_level: b[8],
            panpot: b[9],
        }
    }

    pub fn to_bytes(self) -> [u8; PATCH_TEMP_SIZE] {
        let mut out = [0u8; PATCH_TEMP_SIZE];
        out[0..8].copy_from_slice(&self.patch.to_bytes());
        out[8] = self.output_level;
        out[9] = self.panpot;
        out
    }
}

/// Wave-generator section of a partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WgParam {
    pub pitch_coarse: u8,
    pub pitch_fine: u8,
    pub pitch_keyfollow: u8,
    pub pitch_bender_enabled: u8,
    /// 0 = square, 1 = sawtooth.
    pub waveform: u8,
    pub pcm_wave: u8,
    pub pulse_width: u8,
    pub pulse_width_velo_sensitivity: u8,
}

/// Pitch envelope section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PitchEnvParam {
    pub depth: u8,
    pub velo_sensitivity: u8,
    pub time_keyfollow: u8,
    pub time: [u8; 4],
    pub level: [u8; 5],
}

/// Pitch LFO section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PitchLfoParam {
    pub rate: u8,
    pub depth: u8,
    pub mod_sensitivity: u8,
}

/// Filter section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TvfParam {
    pub cutoff: u8,
    pub resonance: u8,
    pub keyfollow: u8,
    pub bias_point: u8,
    pub bias_level: u8,
    pub env_depth: u8,
    pub env_velo_sensitivity: u8,
    pub env_depth_keyfollow: u8,
    pub env_time_keyfollow: u8,
    pub env_time: [u8; 5],
    pub env_level: [u8; 4],
}

/// Amplifier section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TvaParam {
    pub level: u8,
    pub velo_sensitivity: u8,
    pub bias_point1: u8,
    pub bias_level1: u8,
    pub bias_point2: u8,
    pub bias_level2: u8,
    pub env_time_keyfollow: u8,
    pub env_time_velo_sensitivity: u8,
    pub env_time: [u8; 5],
    pub env_level: [u8; 4],
}

/// All 58 bytes of one partial's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartialParam {
    pub wg: WgParam,
    pub pitch_env: PitchEnvParam,
    pub pitch_lfo: PitchLfoParam,
    pub tvf: TvfParam,
    pub tva: TvaParam,
}

/// Bytes per partial parameter block.
pub const PARTIAL_PARAM_SIZE: usize = 58;

impl PartialParam {
    pub fn from_bytes(b: &[u8]) -> Self {
        PartialParam {
            wg: WgParam {
                pitch_coarse: b[0],
                pitch_fine: b[1],
                pitch_keyfollow: b[2],
                pitch_bender_enabled: b[3],
                waveform: b[4],
                pcm_wave: b[5],
                pulse_width: b[6],
                pulse_width_velo_sensitivity: b[7],
            },
            pitch_env: PitchEnvParam {
                depth: b[8],
                velo_sensitivity: b[9],
                time_keyfollow: b[10],
                time: [b[11], b[12], b[13], b[14]],
                level: [b[15], b[16], b[17], b[18], b[19]],
            },
            pitch_lfo: PitchLfoParam {
                rate: b[20],
                depth: b[21],
                mod_sensitivity: b[22],
            },
            tvf: TvfParam {
                cutoff: b[23],
                resonance: b[24],
                keyfollow: b[25],
                bias_point: b[26],
                bias_level: b[27],
                env_depth: b[28],
                env_velo_sensitivity: b[29],
                env_depth_keyfollow: b[30],
                env_time_keyfollow: b[31],
                env_time: [b[32], b[33], b[34], b[35], b[36]],
                env_level: [b[37], b[38], b[39], b[40]],
            },
            tva: TvaParam {
                level: b[41],
                velo_sensitivity: b[42],
                bias_point1: b[43],
                bias_level1: b[44],
                bias_point2: b[45],
                bias_level2: b[46],
                env_time_keyfollow: b[47],
                env_time_velo_sensitivity: b[48],
                env_time: [b[49], b[50], b[51], b[52], b[53]],
                env_level: [b[54], b[55], b[56], b[57]],
            },
        }
    }

    pub fn to_bytes(&self) -> [u8; PARTIAL_PARAM_SIZE] {
        let mut b = [0u8; PARTIAL_PARAM_SIZE];
        b[0] = self.wg.pitch_coarse;
        b[1] = self.wg.pitch_fine;
        b[2] = self.wg.pitch_keyfollow;
        b[3] = self.wg.pitch_bender_enabled;
        b[4] = self.wg.waveform;
        b[5] = self.wg.pcm_wave;
        b[6] = self.wg.pulse_width;
        b[7] = self.wg.pulse_width_velo_sensitivity;
        b[8] = self.pitch_env.depth;
        b[9] = self.pitch_env.velo_sensitivity;
        b[10] = self.pitch_env.time_keyfollow;
        b[11..15].copy_from_slice(&self.pitch_env.time);
        b[15..20].copy_from_slice(&self.pitch_env.level);
        b[20] = self.pitch_lfo.rate;
        b[21] = self.pitch_lfo.depth;
        b[22] = self.pitch_lfo.mod_sensitivity;
        b[23] = self.tvf.cutoff;
        b[24] = self.tvf.resonance;
        b[25] = self.tvf.keyfollow;
        b[26] = self.tvf.bias_point;
        b[27] = self.tvf.bias_level;
        b[28] = self.tvf.env_depth;
        b[29] = self.tvf.env_velo_sensitivity;
        b[30] = self.tvf.env_depth_keyfollow;
        b[31] = self.tvf.env_time_keyfollow;
        b[32..37].copy_from_slice(&self.tvf.env_time);
        b[37..41].copy_from_slice(&self.tvf.env_level);
        b[41] = self.tva.level;
        b[42] = self.tva.velo_sensitivity;
        b[43] = self.tva.bias_point1;
        b[44] = self.tva.bias_level1;
        b[45] = self.tva.bias_point2;
        b[46] = self.tva.bias_level2;
        b[47] = self.tva.env_time_keyfollow;
        b[48] = self.tva.env_time_velo_sensitivity;
        b[49..54].copy_from_slice(&self.tva.env_time);
        b[54..58].copy_from_slice(&self.tva.env_level);
        b
    }
}

/// Timbre common section plus four partials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimbreParam {
    pub name: [u8; 10],
    /// Structure code 1..13 for partials 1 and 2 (stored 0-based).
    pub partial_structure12: u8,
    /// Structure code 1..13 for partials 3 and 4 (stored 0-based).
    pub partial_structure34: u8,
    /// Bit n set mutes partial n.
    pub partial_mute: u8,
    pub no_sustain: u8,
    pub partial: [PartialParam; PARTIALS_PER_TIMBRE],
}

impl Default for TimbreParam {
    fn default() -> Self {
        TimbreParam {
            name: *b"          ",
            partial_structure12: 0,
            partial_structure34: 0,
            partial_mute: 0x0E,
            no_sustain: 0,
            partial: [PartialParam::default(); PARTIALS_PER_TIMBRE],
        }
    }
}

impl TimbreParam {
    pub fn from_bytes(b: &[u8]) -> Self {
        let mut name = [0u8; 10];
        name.copy_from_slice(&b[0..10]);
        let mut partial = [PartialParam::default(); PARTIALS_PER_TIMBRE];
        for (i, p) in partial.iter_mut().enumerate() {
            let base = 14 + i * PARTIAL_PARAM_SIZE;
            *p = PartialParam::from_bytes(&b[base..base + PARTIAL_PARAM_SIZE]);
        }
        TimbreParam {
            name,
            partial_structure12: b[10],
            partial_structure34: b[11],
            partial_mute: b[12],
            no_sustain: b[13],
            partial,
        }
    }

    pub fn to_bytes(&self) -> [u8; TIMBRE_PARAM_SIZE] {
        let mut b = [0u8; TIMBRE_PARAM_SIZE];
        b[0..10].copy_from_slice(&self.name);
        b[10] = self.partial_structure12;
        b[11] = self.partial_structure34;
        b[12] = self.partial_mute;
        b[13] = self.no_sustain;
        for (i, p) in self.partial.iter().enumerate() {
            let base = 14 + i * PARTIAL_PARAM_SIZE;
            b[base..base + PARTIAL_PARAM_SIZE].copy_from_slice(&p.to_bytes());
        }
        b
    }

    /// Partials that are neither muted nor lacking a generator.
    pub fn playable_partials(&self) -> u32 {
        let mut count = 0;
        for i in 0..PARTIALS_PER_TIMBRE {
            if self.partial_mute & (1 << i) == 0 {
                count += 1;
            }
        }
        count
    }
}

/// The system area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemParam {
    pub master_tune: u8,
    pub reverb_mode: u8,
    pub reverb_time: u8,
    pub reverb_level: u8,
    pub reserve_settings: [u8; PART_COUNT],
    pub chan_assign: [u8; PART_COUNT],
    pub master_vol: u8,
}

impl Default for SystemParam {
    fn default() -> Self {
        SystemParam {
            master_tune: 64,
            reverb_mode: 0,
            reverb_time: 5,
            reverb_level: 3,
            reserve_settings: [3, 10, 6, 4, 3, 0, 0, 0, 6],
            chan_assign: [1, 2, 3, 4, 5, 6, 7, 8, 9],
            master_vol: 100,
        }
    }
}

impl SystemParam {
    pub fn from_bytes(b: &[u8]) -> Self {
        let mut reserve_settings = [0u8; PART_COUNT];
        reserve_settings.copy_from_slice(&b[4..13]);
        let mut chan_assign = [0u8; PART_COUNT];
        chan_assign.copy_from_slice(&b[13..22]);
        SystemParam {
            master_tune: b[0],
            reverb_mode: b[1],
            reverb_time: b[2],
            reverb_level: b[3],
            reserve_settings,
            chan_assign,
            master_vol: b[22],
        }
    }

    pub fn to_bytes(&self) -> [u8; SYSTEM_SIZE] {
        let mut b = [0u8; SYSTEM_SIZE];
        b[0] = self.master_tune;
        b[1] = self.reverb_mode;
        b[2] = self.reverb_time;
        b[3] = self.reverb_level;
        b[4..13].copy_from_slice(&self.reserve_settings);
        b[13..22].copy_from_slice(&self.chan_assign);
        b[22] = self.master_vol;
        b
    }
}

/// One rhythm setup entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RhythmTemp {
    pub timbre: u8,
    pub output_level: u8,
    pub panpot: u8,
    pub reverb_switch: u8,
}

impl RhythmTemp {
    pub fn from_bytes(b: &[u8]) -> Self {
        RhythmTemp {
            timbre: b[0],
            output_level: b[1],
            panpot: b[2],
            reverb_switch: b[3],
        }
    }

    pub fn to_bytes(self) -> [u8; RHYTHM_TEMP_SIZE] {
        [self.timbre, self.output_level, self.panpot, self.reverb_switch]
    }
}

// ---------------------------------------------------------------------------
// Raw region storage with clamped writes
// ---------------------------------------------------------------------------

/// Raw bytes of every writable region, stored flat.
pub struct MemParams {
    patch_temp: [u8; PART_COUNT * PATCH_TEMP_SIZE],
    rhythm_temp: [u8; RHYTHM_TEMP_COUNT * RHYTHM_TEMP_SIZE],
    timbre_temp: [u8; 8 * TIMBRE_PARAM_SIZE],
    patches: [u8; 128 * PATCH_PARAM_SIZE],
    timbres: Box<[u8]>,
    system: [u8; SYSTEM_SIZE],
}

impl MemParams {
    pub fn new() -> Self {
        MemParams {
            patch_temp: [0; PART_COUNT * PATCH_TEMP_SIZE],
            rhythm_temp: [0; RHYTHM_TEMP_COUNT * RHYTHM_TEMP_SIZE],
            timbre_temp: [0; 8 * TIMBRE_PARAM_SIZE],
            patches: [0; 128 * PATCH_PARAM_SIZE],
            timbres: vec![0; TIMBRE_COUNT * TIMBRE_SLOT_SIZE].into_boxed_slice(),
            system: SystemParam::default().to_bytes(),
        }
    }

    fn region_slice_mut(&mut self, region: Region) -> Option<&mut [u8]> {
        match region {
            Region::PatchTemp => Some(&mut self.patch_temp),
            Region::RhythmTemp => Some(&mut self.rhythm_temp),
            Region::TimbreTemp => Some(&mut self.timbre_temp),
            Region::Patches => Some(&mut self.patches),
            Region::Timbres => Some(&mut self.timbres),
            Region::System => Some(&mut self.system),
            Region::Display | Region::Reset => None,
        }
    }

    fn region_slice(&self, region: Region) -> Option<&[u8]> {
        match region {
            Region::PatchTemp => Some(&self.patch_temp),
            Region::RhythmTemp => Some(&self.rhythm_temp),
            Region::TimbreTemp => Some(&self.timbre_temp),
            Region::Patches => Some(&self.patches),
            Region::Timbres => Some(&self.timbres),
            Region::System => Some(&self.system),
            Region::Display | Region::Reset => None,
        }
    }

    /// Write `data` into a region, clamping each byte to the region's
    /// per-offset maximum. Bytes past the region end are dropped. Returns
    /// how many bytes were stored.
    pub fn write(&mut self, region: Region, offset: usize, data: &[u8]) -> usize {
        let Some(slice) = self.region_slice_mut(region) else {
            return 0;
        };
        let mut written = 0;
        for (i, &value) in data.iter().enumerate() {
            let at = offset + i;
            if at >= slice.len() {
                break;
            }
            slice[at] = value.min(max_value(region, at));
            written += 1;
        }
        written
    }

    /// Read bytes back out of a region. Returns how many bytes were copied.
    pub fn read(&self, region: Region, offset: usize, out: &mut [u8]) -> usize {
        let Some(slice) = self.region_slice(region) else {
            return 0;
        };
        let mut copied = 0;
        for (i, out_byte) in out.iter_mut().enumerate() {
            let at = offset + i;
            if at >= slice.len() {
                break;
            }
            *out_byte = slice[at];
            copied += 1;
        }
        copied
    }

    pub fn patch_temp(&self, part: usize) -> PatchTemp {
        let at = part * PATCH_TEMP_SIZE;
        PatchTemp::from_bytes(&self.patch_temp[at..at + PATCH_TEMP_SIZE])
    }

    pub fn set_patch_temp(&mut self, part: usize, temp: PatchTemp) {
        let at = part * PATCH_TEMP_SIZE;
        self.patch_temp[at..at + PATCH_TEMP_SIZE].copy_from_slice(&temp.to_bytes());
    }

    pub fn timbre_temp(&self, part: usize) -> TimbreParam {
        let at = part * TIMBRE_PARAM_SIZE;
        TimbreParam::from_bytes(&self.timbre_temp[at..at + TIMBRE_PARAM_SIZE])
    }

    pub fn set_timbre_temp(&mut self, part: usize, timbre: &TimbreParam) {
        let at = part * TIMBRE_PARAM_SIZE;
        self.timbre_temp[at..at + TIMBRE_PARAM_SIZE].copy_from_slice(&timbre.to_bytes());
    }

    pub fn patch(&self, index: usize) -> PatchParam {
        let at = index * PATCH_PARAM_SIZE;
        PatchParam::from_bytes(&self.patches[at..at + PATCH_PARAM_SIZE])
    }

    pub fn timbre(&self, index: usize) -> TimbreParam {
        let at = index * TIMBRE_SLOT_SIZE;
        TimbreParam::from_bytes(&self.timbres[at..at + TIMBRE_PARAM_SIZE])
    }

    pub fn set_timbre(&mut self, index: usize, timbre: &TimbreParam) {
        let at = index * TIMBRE_SLOT_SIZE;
        self.timbres[at..at + TIMBRE_PARAM_SIZE].copy_from_slice(&timbre.to_bytes());
    }

    pub fn system(&self) -> SystemParam {
        SystemParam::from_bytes(&self.system)
    }

    pub fn set_system(&mut self, system: SystemParam) {
        self.system = system.to_bytes();
    }

    pub fn rhythm(&self, index: usize) -> RhythmTemp {
        let at = index * RHYTHM_TEMP_SIZE;
        RhythmTemp::from_bytes(&self.rhythm_temp[at..at + RHYTHM_TEMP_SIZE])
    }

    pub fn set_rhythm(&mut self, index: usize, entry: RhythmTemp) {
        let at = index * RHYTHM_TEMP_SIZE;
        self.rhythm_temp[at..at + RHYTHM_TEMP_SIZE].copy_from_slice(&entry.to_bytes());
    }
}

impl Default for MemParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-byte maximum for writes into a region.
fn max_value(region: Region, offset: usize) -> u8 {
    match region {
        Region::PatchTemp => {
            let field = offset % PATCH_TEMP_SIZE;
            match field {
                0..=7 => patch_max(field),
                8 => 100,
                9 => 14,
                _ => 0,
            }
        }
        Region::RhythmTemp => match offset % RHYTHM_TEMP_SIZE {
            0 => 94,
            1 => 100,
            2 => 14,
            _ => 1,
        },
        Region::TimbreTemp => timbre_max(offset % TIMBRE_PARAM_SIZE),
        Region::Patches => patch_max(offset % PATCH_PARAM_SIZE),
        Region::Timbres => {
            let field = offset % TIMBRE_SLOT_SIZE;
            if field < TIMBRE_PARAM_SIZE {
                timbre_max(field)
            } else {
                0
            }
        }
        Region::System => match offset {
            0 => 127,
            1 => 3,
            2 | 3 => 7,
            4..=12 => 32,
            13..=21 => 16,
            _ => 100,
        },
        Region::Display | Region::Reset => 0x7f,
    }
}

fn patch_max(field: usize) -> u8 {
    match field {
        0 => 3,
        1 => 63,
        2 => 48,
        3 => 100,
        4 => 24,
        5 => 3,
        6 => 1,
        _ => 0,
    }
}

fn timbre_max(field: usize) -> u8 {
    match field {
        0..=9 => 0x7f,
        10 | 11 => 12,
        12 => 15,
        13 => 1,
        _ => partial_max((field - 14) % PARTIAL_PARAM_SIZE),
    }
}

fn partial_max(field: usize) -> u8 {
    match field {
        0 => 96,         // pitch coarse
        1 => 100,        // pitch fine
        2 => 16,         // pitch keyfollow
        3 => 1,          // bender enabled
        4 => 1,          // waveform
        5 => 127,        // pcm wave
        6 => 100,        // pulse width
        7 => 14,         // pulse width velo sensitivity
        8 => 10,         // pitch env depth
        10 => 4,         // pitch env time keyfollow
        9 | 11..=19 => 100, // pitch env velo sensitivity, times, levels
        20..=22 => 100,  // lfo
        23 => 100,       // cutoff
        24 => 30,        // resonance
        25 => 16,        // tvf keyfollow
        26 => 127,       // tvf bias point
        27 => 14,        // tvf bias level
        28..=29 => 100,  // tvf env depth, velo sensitivity
        30 | 31 => 4,    // tvf env keyfollows
        32..=40 => 100,  // tvf env times and levels
        41 | 42 => 100,  // tva level, velo sensitivity
        43 | 45 => 127,  // tva bias points
        44 | 46 => 12,   // tva bias levels
        47 => 4,         // tva env time keyfollow
        _ => 100,
    }
}
