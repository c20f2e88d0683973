//! ROM Images and Machine Identity
//!
//! The core consumes two binary blobs: the control ROM (firmware tables,
//! factory timbres, default patches and system settings) and the PCM ROM
//! (logarithmic sample data). Images are identified by size plus SHA-1
//! digest against a database of known dumps; identity resolves the machine
//! model, which in turn fixes the behavioural quirk flags threaded through
//! the envelope, pair and reverb code.
//!
//! Hosts with unlisted dumps can bypass identification with
//! [`ControlRomImage::with_info`] / [`PcmRomImage::with_info`].

use crate::params::{
    PatchParam, RhythmTemp, SystemParam, TimbreParam, PATCH_PARAM_SIZE, RHYTHM_TEMP_COUNT,
    RHYTHM_TEMP_SIZE, SYSTEM_SIZE, TIMBRE_PARAM_SIZE,
};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Machine model resolved from ROM identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Machine {
    /// First-generation MT-32 (old firmware).
    Mt32Gen1,
    /// Second-generation MT-32 (new firmware).
    Mt32Gen2,
    /// CM-32L / LAPC-I family.
    Cm32L,
}

impl Machine {
    /// Highest rhythm key accepted by this model.
    pub fn max_rhythm_key(self) -> u8 {
        match self {
            Machine::Mt32Gen1 | Machine::Mt32Gen2 => 87,
            Machine::Cm32L => 108,
        }
    }

    /// Behavioural quirks implied by the model's firmware.
    pub fn quirks(self) -> Quirks {
        match self {
            Machine::Mt32Gen1 => Quirks {
                base_pitch_overflow: true,
                pitch_env_overflow: true,
                ring_mod_no_mix: true,
                tva_zero_env_levels: true,
                pan_mult: true,
                key_shift_applied_to_rhythm: true,
                tvf_base_cutoff_limit: true,
                fast_pitch_change: false,
                mt32_compatible_reverb: true,
                old_analog_lpf: true,
            },
            Machine::Mt32Gen2 => Quirks {
                base_pitch_overflow: false,
                pitch_env_overflow: false,
                ring_mod_no_mix: false,
                tva_zero_env_levels: false,
                pan_mult: true,
                key_shift_applied_to_rhythm: false,
                tvf_base_cutoff_limit: true,
                fast_pitch_change: true,
                mt32_compatible_reverb: true,
                old_analog_lpf: false,
            },
            Machine::Cm32L => Quirks {
                base_pitch_overflow: false,
                pitch_env_overflow: false,
                ring_mod_no_mix: false,
                tva_zero_env_levels: false,
                pan_mult: false,
                key_shift_applied_to_rhythm: false,
                tvf_base_cutoff_limit: false,
                fast_pitch_change: true,
                mt32_compatible_reverb: false,
                old_analog_lpf: false,
            },
        }
    }
}

/// Historical firmware behaviours selected by ROM identity, never by the
/// host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quirks {
    /// Base pitch wraps modulo 2^16 instead of clamping.
    pub base_pitch_overflow: bool,
    /// Pitch envelope sum wraps modulo 2^16.
    pub pitch_env_overflow: bool,
    /// Ring-modulated pairs drop the master mix (mix type 1 acts as 2).
    pub ring_mod_no_mix: bool,
    /// Zero envelope levels pin the TVA target to silence.
    pub tva_zero_env_levels: bool,
    /// Pan factors double up on the coarse grid.
    pub pan_mult: bool,
    /// Patch key shift also transposes the rhythm part.
    pub key_shift_applied_to_rhythm: bool,
    /// Base cutoff saturates below the later models' ceiling.
    pub tvf_base_cutoff_limit: bool,
    /// Pitch changes slew immediately instead of gliding.
    pub fast_pitch_change: bool,
    /// Default reverb tap tables match the MT-32 Boss chip.
    pub mt32_compatible_reverb: bool,
    /// Output stage models the earliest analogue LPF.
    pub old_analog_lpf: bool,
}

/// Identifier of a known ROM dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomId {
    pub name: &'static str,
    pub sha1: &'static str,
}

/// Database entry for a control ROM.
#[derive(Debug, Clone, Copy)]
pub struct ControlRomInfo {
    pub id: RomId,
    pub machine: Machine,
    pub size: usize,
    pub layout: ControlRomLayout,
}

/// Database entry for a PCM ROM.
#[derive(Debug, Clone, Copy)]
pub struct PcmRomInfo {
    pub id: RomId,
    pub machine: Machine,
    pub size: usize,
}

/// Offsets of the tables the core reads out of a control ROM image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRomLayout {
    pub system_defaults: usize,
    pub pcm_table: usize,
    pub pcm_table_entries: usize,
    pub patches: usize,
    pub rhythm_defaults: usize,
    pub timbres_a: usize,
    pub timbres_b: usize,
    pub timbres_rhythm: usize,
    pub rhythm_timbre_count: usize,
}

/// Layout shared by the first-generation 64 KiB images.
pub const GEN1_LAYOUT: ControlRomLayout = ControlRomLayout {
    system_defaults: 0x1000,
    pcm_table: 0x1100,
    pcm_table_entries: 128,
    patches: 0x1400,
    rhythm_defaults: 0x1800,
    timbres_a: 0x2000,
    timbres_b: 0x6000,
    timbres_rhythm: 0xA000,
    rhythm_timbre_count: 30,
};

/// Second-generation 128 KiB images keep the same table block.
pub const GEN2_LAYOUT: ControlRomLayout = GEN1_LAYOUT;

/// Control ROM size for first-generation models.
pub const CONTROL_ROM_SIZE_GEN1: usize = 64 * 1024;

/// Control ROM size for second-generation models.
pub const CONTROL_ROM_SIZE_GEN2: usize = 128 * 1024;

/// PCM ROM size of the MT-32.
pub const PCM_ROM_SIZE_MT32: usize = 512 * 1024;

/// PCM ROM size of the CM-32L family.
pub const PCM_ROM_SIZE_CM32L: usize = 1024 * 1024;

/// Known control ROM dumps. The database is abbreviated to the commonly
/// circulated images.
pub const KNOWN_CONTROL_ROMS: &[ControlRomInfo] = &[
    ControlRomInfo {
        id: RomId {
            name: "MT-32 Control v1.07",
            sha1: "b083518fffb7f66b03c23b7eb4f868e62dc5a987",
        },
        machine: Machine::Mt32Gen1,
        size: CONTROL_ROM_SIZE_GEN1,
        layout: GEN1_LAYOUT,
    },
    ControlRomInfo {
        id: RomId {
            name: "MT-32 Control v2.04",
            sha1: "5a5cb5a77d7d55ee69657c2f870416daed52dea7",
        },
        machine: Machine::Mt32Gen2,
        size: CONTROL_ROM_SIZE_GEN2,
        layout: GEN2_LAYOUT,
    },
    ControlRomInfo {
        id: RomId {
            name: "CM-32L Control v1.02",
            sha1: "a439fbb390da38cada95a7cbb1d6ca199cd66ef8",
        },
        machine: Machine::Cm32L,
        size: CONTROL_ROM_SIZE_GEN1,
        layout: GEN1_LAYOUT,
    },
];

/// Known PCM ROM dumps.
pub const KNOWN_PCM_ROMS: &[PcmRomInfo] = &[
    PcmRomInfo {
        id: RomId {
            name: "MT-32 PCM",
            sha1: "f6b1eebc4b2d200ec6d3d21d51325d5b48c60252",
        },
        machine: Machine::Mt32Gen1,
        size: PCM_ROM_SIZE_MT32,
    },
    PcmRomInfo {
        id: RomId {
            name: "CM-32L PCM",
            sha1: "289cc298ad532b702461bfc738009d9ebe8025ea",
        },
        machine: Machine::Cm32L,
        size: PCM_ROM_SIZE_CM32L,
    },
];

/// ROM identification and pairing failures. The only fatal error class:
/// raised at `open()` and nowhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RomError {
    /// Image size does not match any supported ROM.
    BadSize { size: usize },
    /// Size is plausible but the digest is not in the database.
    UnknownDigest { sha1: String },
    /// Control and PCM images belong to incompatible machines.
    MachineMismatch { control: Machine, pcm: Machine },
    /// Image is too short for its declared layout.
    Truncated,
}

impl core::fmt::Display for RomError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RomError::BadSize { size } => write!(f, "unsupported ROM size: {} bytes", size),
            RomError::UnknownDigest { sha1 } => write!(f, "unknown ROM digest: {}", sha1),
            RomError::MachineMismatch { control, pcm } => write!(
                f,
                "control ROM is for {:?} but PCM ROM is for {:?}",
                control, pcm
            ),
            RomError::Truncated => write!(f, "ROM image is shorter than its layout"),
        }
    }
}

impl std::error::Error for RomError {}

fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finalize();
    use core::fmt::Write;
    let mut out = String::with_capacity(40);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// A validated control ROM image.
#[derive(Debug)]
pub struct ControlRomImage {
    data: Vec<u8>,
    info: ControlRomInfo,
}

impl ControlRomImage {
    /// Identify an image against the ROM database.
    pub fn identify(data: Vec<u8>) -> Result<Self, RomError> {
        if data.len() != CONTROL_ROM_SIZE_GEN1 && data.len() != CONTROL_ROM_SIZE_GEN2 {
            return Err(RomError::BadSize { size: data.len() });
        }
        let digest = sha1_hex(&data);
        let info = KNOWN_CONTROL_ROMS
            .iter()
            .find(|info| info.size == data.len() && info.id.sha1 == digest)
            .copied()
            .ok_or(RomError::UnknownDigest { sha1: digest })?;
        Self::with_info(data, info)
    }

    /// Wrap an image with explicit identity, checking only the size.
    pub fn with_info(data: Vec<u8>, info: ControlRomInfo) -> Result<Self, RomError> {
        if data.len() < info.size {
            return Err(RomError::Truncated);
        }
        let layout = info.layout;
        let end = layout
            .timbres_rhythm
            .max(layout.timbres_b)
            .max(layout.patches)
            + layout.rhythm_timbre_count * TIMBRE_PARAM_SIZE;
        if end > data.len() {
            return Err(RomError::Truncated);
        }
        Ok(ControlRomImage { data, info })
    }

    pub fn info(&self) -> &ControlRomInfo {
        &self.info
    }

    pub fn machine(&self) -> Machine {
        self.info.machine
    }

    /// Factory system settings.
    pub fn system_defaults(&self) -> SystemParam {
        let at = self.info.layout.system_defaults;
        SystemParam::from_bytes(&self.data[at..at + SYSTEM_SIZE])
    }

    /// One of the 128 factory patches.
    pub fn patch(&self, index: usize) -> PatchParam {
        let at = self.info.layout.patches + (index & 127) * PATCH_PARAM_SIZE;
        PatchParam::from_bytes(&self.data[at..at + PATCH_PARAM_SIZE])
    }

    /// Factory rhythm setup entry.
    pub fn rhythm_default(&self, index: usize) -> RhythmTemp {
        let at = self.info.layout.rhythm_defaults + (index % RHYTHM_TEMP_COUNT) * RHYTHM_TEMP_SIZE;
        RhythmTemp::from_bytes(&self.data[at..at + RHYTHM_TEMP_SIZE])
    }

    /// Factory timbre by absolute bank index (0..63 group A, 64..127 group
    /// B, 192.. rhythm bank). Memory-group slots have no factory content
    /// and read as the default timbre.
    pub fn timbre(&self, index: usize) -> TimbreParam {
        let layout = self.info.layout;
        let at = match index {
            0..=63 => Some(layout.timbres_a + index * TIMBRE_PARAM_SIZE),
            64..=127 => Some(layout.timbres_b + (index - 64) * TIMBRE_PARAM_SIZE),
            192..=255 if index - 192 < layout.rhythm_timbre_count => {
                Some(layout.timbres_rhythm + (index - 192) * TIMBRE_PARAM_SIZE)
            }
            _ => None,
        };
        match at {
            Some(at) => TimbreParam::from_bytes(&self.data[at..at + TIMBRE_PARAM_SIZE]),
            None => TimbreParam::default(),
        }
    }

    /// Raw PCM wave table entry (4 bytes).
    fn pcm_table_entry(&self, index: usize) -> [u8; 4] {
        let at = self.info.layout.pcm_table + index * 4;
        [
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ]
    }

    pub fn pcm_table_entries(&self) -> usize {
        self.info.layout.pcm_table_entries
    }
}

/// One entry of the decoded PCM wave directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmWave {
    /// First sample index in the decoded PCM data.
    pub addr: usize,
    /// Length in samples.
    pub len: usize,
    pub looped: bool,
    /// Absolute 16-bit pitch at which the sample plays at recorded rate.
    pub pitch: u16,
}

/// Bit order of the PCM ROM scrambling: decoded bit `i` is raw bit
/// `PCM_BIT_ORDER[i]`.
pub const PCM_BIT_ORDER: [u32; 16] = [0, 9, 1, 2, 3, 4, 5, 6, 7, 10, 11, 12, 13, 14, 15, 8];

/// Unscramble one raw PCM ROM word into sign-magnitude log form.
#[inline]
pub fn unscramble_pcm_word(raw: u16) -> u16 {
    let mut out = 0u16;
    for (i, &from) in PCM_BIT_ORDER.iter().enumerate() {
        out |= ((raw >> from) & 1) << i;
    }
    out
}

/// Scramble a sign-magnitude log word into raw ROM order (test builders).
#[inline]
pub fn scramble_pcm_word(value: u16) -> u16 {
    let mut out = 0u16;
    for (i, &to) in PCM_BIT_ORDER.iter().enumerate() {
        out |= ((value >> i) & 1) << to;
    }
    out
}

/// A validated, unscrambled PCM ROM image. Samples are stored as 16-bit
/// sign-magnitude log values (sign in bit 15, 15-bit log magnitude with an
/// 11-bit fraction).
pub struct PcmRomImage {
    samples: Vec<u16>,
    info: PcmRomInfo,
}

impl PcmRomImage {
    /// Identify an image against the ROM database.
    pub fn identify(data: Vec<u8>) -> Result<Self, RomError> {
        if data.len() != PCM_ROM_SIZE_MT32 && data.len() != PCM_ROM_SIZE_CM32L {
            return Err(RomError::BadSize { size: data.len() });
        }
        let digest = sha1_hex(&data);
        let info = KNOWN_PCM_ROMS
            .iter()
            .find(|info| info.size == data.len() && info.id.sha1 == digest)
            .copied()
            .ok_or(RomError::UnknownDigest { sha1: digest })?;
        Self::with_info(data, info)
    }

    /// Wrap an image with explicit identity, checking only the size.
    pub fn with_info(data: Vec<u8>, info: PcmRomInfo) -> Result<Self, RomError> {
        if data.len() < info.size {
            return Err(RomError::Truncated);
        }
        let samples = data
            .chunks_exact(2)
            .map(|pair| unscramble_pcm_word(u16::from_le_bytes([pair[0], pair[1]])))
            .collect();
        Ok(PcmRomImage { samples, info })
    }

    pub fn info(&self) -> &PcmRomInfo {
        &self.info
    }

    pub fn machine(&self) -> Machine {
        self.info.machine
    }

    /// The unscrambled log-domain sample data.
    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// Build the wave directory from the control ROM's PCM table. Address
    /// granularity scales with the ROM so the 4-byte entries cover the whole
    /// image on both sizes.
    pub fn wave_directory(&self, control: &ControlRomImage) -> Vec<PcmWave> {
        let granule = self.samples.len() / 256;
        (0..control.pcm_table_entries())
            .map(|i| {
                let entry = control.pcm_table_entry(i);
                let addr = entry[0] as usize * granule;
                let len = 0x400usize << (entry[1] & 7) as usize;
                let len = len.min(self.samples.len().saturating_sub(addr));
                PcmWave {
                    addr,
                    len,
                    looped: entry[1] & 0x80 != 0,
                    pitch: u16::from_le_bytes([entry[2], entry[3]]),
                }
            })
            .collect()
    }
}

/// Check that a control and a PCM image belong to the same family.
pub fn check_pair(control: &ControlRomImage, pcm: &PcmRomImage) -> Result<(), RomError> {
    let compatible = match control.machine() {
        Machine::Mt32Gen1 | Machine::Mt32Gen2 => {
            matches!(pcm.machine(), Machine::Mt32Gen1 | Machine::Mt32Gen2)
        }
        Machine::Cm32L => pcm.machine() == Machine::Cm32L,
    };
    if compatible {
        Ok(())
    } else {
        Err(RomError::MachineMismatch {
            control: control.machine(),
            pcm: pcm.machine(),
        })
    }
}

// ---------------------------------------------------------------------------
// Synthetic images for the test suite
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_word_scramble_roundtrip() {
        for &v in &[0u16, 1, 0x8000, 0x7fff, 0x1234, 0xabcd, 0xffff] {
            assert_eq!(unscramble_pcm_word(scramble_pcm_word(v)), v);
            assert_eq!(scramble_pcm_word(unscramble_pcm_word(v)), v);
        }
    }

    #[test]
    fn test_bit_order_is_a_permutation() {
        let mut seen = [false; 16];
        for &bit in &PCM_BIT_ORDER {
            assert!(!seen[bit as usize]);
            seen[bit as usize] = true;
        }
    }

    #[test]
    fn test_identify_rejects_bad_size() {
        let err = ControlRomImage::identify(vec![0u8; 1000]).unwrap_err();
        assert_eq!(err, RomError::BadSize { size: 1000 });
    }

    #[test]
    fn test_identify_rejects_unknown_digest() {
        let err = ControlRomImage::identify(vec![0u8; CONTROL_ROM_SIZE_GEN1]).unwrap_err();
        assert!(matches!(err, RomError::UnknownDigest { .. }));
    }

    #[test]
    fn test_synthetic_control_rom_views() {
        let rom = testrom::control_rom();
        assert_eq!(rom.machine(), Machine::Mt32Gen1);
        assert_eq!(rom.system_defaults().master_vol, 100);
        assert_eq!(rom.patch(5).timbre_num, 5);
        let timbre = rom.timbre(0);
        assert_eq!(&timbre.name[..6], b"SQUARE");
        assert_eq!(timbre.playable_partials(), 1);
        // Rhythm bank resolves through the 192.. range.
        assert_eq!(&rom.timbre(192).name[..6], b"SQUARE");
    }

    #[test]
    fn test_wave_directory() {
        let control = testrom::control_rom();
        let pcm = testrom::pcm_rom();
        let waves = pcm.wave_directory(&control);
        assert_eq!(waves.len(), 128);
        assert_eq!(waves[0].addr, 0);
        assert_eq!(waves[0].len, 0x400);
        assert!(waves[0].looped);
        assert_eq!(waves[0].pitch, 0x4000);
    }

    #[test]
    fn test_pcm_encode_decode_amplitude() {
        let pcm = testrom::pcm_rom();
        // Peak of the sine sits a quarter period in.
        let peak = pcm.samples()[256];
        assert_eq!(peak & 0x8000, 0);
        assert!(peak & 0x7fff < 64, "peak log magnitude {}", peak);
        // The trough carries a sign bit.
        let trough = pcm.samples()[768];
        assert_ne!(trough & 0x8000, 0);
    }

    #[test]
    fn test_pair_check() {
        let control = testrom::control_rom();
        let pcm = testrom::pcm_rom();
        assert!(check_pair(&control, &pcm).is_ok());

        let mismatched = PcmRomInfo {
            machine: Machine::Cm32L,
            ..testrom::pcm_info()
        };
        let bad =
            PcmRomImage::with_info(vec![0u8; PCM_ROM_SIZE_MT32], mismatched).unwrap();
        assert!(check_pair(&control, &bad).is_err());
    }

    #[test]
    fn test_machine_quirks() {
        assert!(Machine::Mt32Gen1.quirks().base_pitch_overflow);
        assert!(!Machine::Cm32L.quirks().base_pitch_overflow);
        assert_eq!(Machine::Mt32Gen1.max_rhythm_key(), 87);
        assert_eq!(Machine::Cm32L.max_rhythm_key(), 108);
    }
}
