//! The Synth Facade
//!
//! Owns the whole pull-driven pipeline: MIDI intake from the lock-free
//! queue, part dispatch, the partial pool, the Boss reverb and the analogue
//! output stage. A render call drives everything to completion for the
//! requested frame count; there is no other scheduling.
//!
//! The renderer variant is fixed at `open()`: the integer and float cores
//! are separate monomorphised pipelines behind one enum, never mixed at
//! run time.

use crate::allocator::{NoteOnResult, PartialManager, DEFAULT_PARTIAL_COUNT};
use crate::analog::{AnalogOutputMode, AnalogSample, AnalogStage};
use crate::la32::{IntPartialPair, PartialPairOps, WaveSource};
use crate::la32_float::FloatPartialPair;
use crate::midi::{MidiEvent, MidiQueue, QueueFull};
use crate::params::{
    sysex_addr_to_linear, MemParams, PatchTemp, Region, PART_COUNT, PATCH_TEMP_SIZE, RHYTHM_PART,
    TIMBRE_PARAM_SIZE,
};
use crate::part::{build_patch_caches, Part};
use crate::partial::NoteOnContext;
use crate::poly::PolyState;
use crate::render::{DacStreams, RenderSample, MAX_SAMPLES_PER_RUN};
use crate::reverb::{BossReverb, ReverbMode, ReverbModelKind, ReverbSample};
use crate::rng::Rng;
use crate::rom::{check_pair, ControlRomImage, Machine, PcmRomImage, PcmWave, Quirks, RomError};
use crate::tables::Tables;
use crate::tva::TvaContext;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Which arithmetic pipeline renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RendererType {
    #[default]
    Int16,
    Float,
}

/// Emulation flavour of the DAC input stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DacInputMode {
    /// Headroom-friendly scaling.
    #[default]
    Nice,
    /// Bit-faithful LA32 output.
    Pure,
    /// First-generation DAC shifter.
    Generation1,
    /// Second-generation DAC shifter.
    Generation2,
}

/// How pushed MIDI is timestamped relative to the wire's baud rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MidiDelayMode {
    #[default]
    Immediate,
    DelayShortMessagesOnly,
    DelayAll,
}

/// Samples one serialised MIDI byte occupies at 31250 baud and 32 kHz.
const SAMPLES_PER_MIDI_BYTE: u32 = 10;

/// Host-visible events outside the audio path.
pub trait ReportHandler: Send + Sync {
    fn on_midi_queue_overflow(&self) {}
    fn on_debug(&self, _message: &str) {}
}

/// Default handler: everything goes to the `log` crate only.
struct NullReportHandler;

impl ReportHandler for NullReportHandler {}

/// Open-time configuration. Serializable so hosts can persist it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthProfile {
    pub renderer_type: RendererType,
    pub analog_mode: AnalogOutputMode,
    pub dac_input_mode: DacInputMode,
    pub midi_delay_mode: MidiDelayMode,
    pub partial_count: usize,
    /// Keep all four reverb variants' buffers alive.
    pub preallocate_reverb: bool,
    /// Override the chip tables instead of following ROM identity.
    pub reverb_compat: Option<ReverbModelKind>,
    pub nice_amp_ramp: bool,
    pub nice_panning: bool,
    pub nice_partial_mixing: bool,
    pub reversed_stereo: bool,
    /// Seed of the per-instance pitch-jitter PRNG.
    pub jitter_seed: u64,
    pub midi_event_capacity: usize,
    pub midi_sysex_capacity: usize,
}

impl Default for SynthProfile {
    fn default() -> Self {
        SynthProfile {
            renderer_type: RendererType::Int16,
            analog_mode: AnalogOutputMode::Coarse,
            dac_input_mode: DacInputMode::Nice,
            midi_delay_mode: MidiDelayMode::Immediate,
            partial_count: DEFAULT_PARTIAL_COUNT,
            preallocate_reverb: true,
            reverb_compat: None,
            nice_amp_ramp: true,
            nice_panning: true,
            nice_partial_mixing: true,
            reversed_stereo: false,
            jitter_seed: 0,
            midi_event_capacity: crate::midi::DEFAULT_EVENT_CAPACITY,
            midi_sysex_capacity: crate::midi::DEFAULT_SYSEX_CAPACITY,
        }
    }
}

/// Fatal open-time failures; the only errors the core ever returns.
#[derive(Debug)]
pub enum SynthError {
    Rom(RomError),
}

impl core::fmt::Display for SynthError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SynthError::Rom(e) => write!(f, "ROM configuration: {}", e),
        }
    }
}

impl std::error::Error for SynthError {}

impl From<RomError> for SynthError {
    fn from(e: RomError) -> Self {
        SynthError::Rom(e)
    }
}

/// Cloneable producer handle for the MIDI queue. Exactly one producer
/// thread may push at a time.
#[derive(Clone)]
pub struct MidiPort {
    queue: Arc<MidiQueue>,
    rendered: Arc<AtomicU32>,
    delay_mode: MidiDelayMode,
}

impl MidiPort {
    fn now(&self) -> u32 {
        self.rendered.load(Ordering::Relaxed)
    }

    pub fn play_msg(&self, msg: u32) -> Result<(), QueueFull> {
        self.play_msg_at(msg, self.now())
    }

    pub fn play_msg_at(&self, msg: u32, timestamp: u32) -> Result<(), QueueFull> {
        let delay = match self.delay_mode {
            MidiDelayMode::Immediate => 0,
            _ => 3 * SAMPLES_PER_MIDI_BYTE,
        };
        self.queue.push_short(msg, timestamp.wrapping_add(delay))
    }

    pub fn play_sysex(&self, data: &[u8]) -> Result<(), QueueFull> {
        self.play_sysex_at(data, self.now())
    }

    pub fn play_sysex_at(&self, data: &[u8], timestamp: u32) -> Result<(), QueueFull> {
        let delay = match self.delay_mode {
            MidiDelayMode::DelayAll => data.len() as u32 * SAMPLES_PER_MIDI_BYTE,
            _ => 0,
        };
        self.queue.push_sysex(data, timestamp.wrapping_add(delay))
    }
}

/// The generic core: everything from the parts down, for one pipeline.
struct Core<P: PartialPairOps>
where
    P::Sample: ReverbSample + AnalogSample,
{
    tables: Tables,
    machine: Machine,
    quirks: Quirks,
    control_rom: ControlRomImage,
    pcm_rom: PcmRomImage,
    pcm_waves: Vec<PcmWave>,
    mem: MemParams,
    parts: Vec<Part>,
    manager: PartialManager<P>,
    reverbs: Vec<BossReverb<P::Sample>>,
    current_reverb: usize,
    reverb_enabled: bool,
    analog: AnalogStage<P::Sample>,
    streams: DacStreams<P::Sample>,
    rng: Rng,
    queue: Arc<MidiQueue>,
    rendered: Arc<AtomicU32>,
    rendered_sample_count: u32,
    channel_map: [u16; 16],
    master_tune_delta: i32,
    /// DAC-input scaling applied on top of the host output gains.
    dac_gain: f32,
    profile: SynthProfile,
    report: Arc<dyn ReportHandler>,
}

impl<P: PartialPairOps> Core<P>
where
    P::Sample: ReverbSample + AnalogSample,
{
    fn open(
        control_rom: ControlRomImage,
        pcm_rom: PcmRomImage,
        profile: SynthProfile,
        queue: Arc<MidiQueue>,
        rendered: Arc<AtomicU32>,
        report: Arc<dyn ReportHandler>,
    ) -> Result<Self, SynthError> {
        check_pair(&control_rom, &pcm_rom)?;
        let machine = control_rom.machine();
        let quirks = machine.quirks();
        let pcm_waves = pcm_rom.wave_directory(&control_rom);

        let reverb_model = profile.reverb_compat.unwrap_or(if quirks.mt32_compatible_reverb {
            ReverbModelKind::Mt32
        } else {
            ReverbModelKind::Cm32L
        });
        let reverbs = if profile.preallocate_reverb {
            vec![
                BossReverb::new(ReverbMode::Room, reverb_model),
                BossReverb::new(ReverbMode::Hall, reverb_model),
                BossReverb::new(ReverbMode::Plate, reverb_model),
                BossReverb::new(ReverbMode::TapDelay, reverb_model),
            ]
        } else {
            vec![BossReverb::new(ReverbMode::Room, reverb_model)]
        };

        let mut analog = AnalogStage::new(
            profile.analog_mode,
            quirks.old_analog_lpf,
            !quirks.mt32_compatible_reverb,
        );
        // The LA32 emits quarter-scale samples; NICE restores the headroom
        // trade the real DAC wiring made.
        let dac_gain = match profile.dac_input_mode {
            DacInputMode::Nice => 2.0,
            DacInputMode::Pure | DacInputMode::Generation1 | DacInputMode::Generation2 => 1.0,
        };
        analog.set_synth_gain(dac_gain);
        analog.set_reverb_gain(dac_gain);

        let mut core = Core {
            tables: Tables::new(),
            machine,
            quirks,
            pcm_waves,
            control_rom,
            pcm_rom,
            mem: MemParams::new(),
            parts: (0..PART_COUNT).map(Part::new).collect(),
            manager: PartialManager::new(profile.partial_count.clamp(8, 256)),
            reverbs,
            current_reverb: 0,
            reverb_enabled: true,
            analog,
            streams: DacStreams::new(),
            rng: Rng::from_seed(profile.jitter_seed),
            queue,
            rendered,
            rendered_sample_count: 0,
            channel_map: [0; 16],
            master_tune_delta: 0,
            dac_gain,
            profile,
            report,
        };
        core.reset_to_rom_defaults();
        Ok(core)
    }

    /// Seed every RAM region and part from the control ROM, then apply the
    /// system area. Also serves the reset SysEx.
    fn reset_to_rom_defaults(&mut self) {
        self.manager.deactivate_all();

        for i in 0..crate::params::TIMBRE_COUNT {
            let timbre = self.control_rom.timbre(i);
            self.mem.set_timbre(i, &timbre);
        }
        for i in 0..crate::params::RHYTHM_TEMP_COUNT {
            self.mem.set_rhythm(i, self.control_rom.rhythm_default(i));
        }
        self.mem.set_system(self.control_rom.system_defaults());

        for part_index in 0..PART_COUNT {
            let patch_temp = PatchTemp {
                patch: self.control_rom.patch(part_index.min(127)),
                output_level: 100,
                panpot: 7,
            };
            self.mem.set_patch_temp(part_index, patch_temp);
            self.parts[part_index].set_patch_temp(patch_temp);
            self.parts[part_index].reset_all_controllers();
            if part_index < 8 {
                let timbre = self.mem.timbre(patch_temp.patch.absolute_timbre());
                self.mem.set_timbre_temp(part_index, &timbre);
                self.parts[part_index].set_timbre(timbre);
            }
        }
        self.apply_system();
    }

    fn apply_system(&mut self) {
        let system = self.mem.system();
        self.manager.set_reserve(system.reserve_settings);
        self.master_tune_delta = (system.master_tune as i32 - 64) * 2;

        self.channel_map = [0; 16];
        for (part, &assign) in system.chan_assign.iter().enumerate() {
            if assign < 16 {
                self.channel_map[assign as usize] |= 1 << part;
            }
        }

        let mode = ReverbMode::from_index(system.reverb_mode);
        self.select_reverb(mode);
        self.current_reverb_mut()
            .set_parameters(system.reverb_time, system.reverb_level);
    }

    fn select_reverb(&mut self, mode: ReverbMode) {
        if self.profile.preallocate_reverb {
            self.current_reverb = mode as usize;
        } else if self.reverbs[0].mode() != mode {
            let model = self.profile.reverb_compat.unwrap_or(
                if self.quirks.mt32_compatible_reverb {
                    ReverbModelKind::Mt32
                } else {
                    ReverbModelKind::Cm32L
                },
            );
            self.reverbs[0] = BossReverb::new(mode, model);
            self.current_reverb = 0;
        }
    }

    fn current_reverb_mut(&mut self) -> &mut BossReverb<P::Sample> {
        &mut self.reverbs[self.current_reverb]
    }

    // -- MIDI dispatch -----------------------------------------------------

    /// Apply one event. Returns false when the event must be retried after
    /// the current abort drains.
    fn dispatch(&mut self, event: &MidiEvent<'_>) -> bool {
        match event {
            MidiEvent::Short { msg, .. } => self.dispatch_short(*msg),
            MidiEvent::Sysex { data, .. } => {
                self.dispatch_sysex(data);
                true
            }
        }
    }

    fn dispatch_short(&mut self, msg: u32) -> bool {
        let status = (msg & 0xff) as u8;
        let data1 = ((msg >> 8) & 0x7f) as u8;
        let data2 = ((msg >> 16) & 0x7f) as u8;
        let channel = (status & 0x0f) as usize;
        let opcode = status >> 4;

        let mut parts = self.channel_map[channel];
        let mut consumed = true;
        while parts != 0 {
            let part = parts.trailing_zeros() as usize;
            parts &= parts - 1;
            consumed &= match opcode {
                0x8 => {
                    self.note_off(part, data1);
                    true
                }
                0x9 => {
                    if data2 == 0 {
                        self.note_off(part, data1);
                        true
                    } else {
                        self.note_on(part, data1, data2)
                    }
                }
                0xB => {
                    self.control_change(part, data1, data2);
                    true
                }
                0xC => {
                    self.program_change(part, data1);
                    true
                }
                0xE => {
                    let bend = ((data2 as i32) << 7 | data1 as i32) - 8192;
                    self.pitch_bend(part, bend as i16);
                    true
                }
                _ => {
                    debug!("ignoring MIDI opcode {:x}", opcode);
                    true
                }
            };
        }
        consumed
    }

    fn note_on(&mut self, part_index: usize, key: u8, velocity: u8) -> bool {
        if part_index == RHYTHM_PART {
            return self.rhythm_note_on(key, velocity);
        }

        let caches = {
            let pcm_waves = &self.pcm_waves;
            self.parts[part_index].refresh_caches(pcm_waves).clone()
        };
        let part = &self.parts[part_index];
        let internal_key = part.midi_key_to_internal(key, true);
        let ctx = NoteOnContext {
            tables: &self.tables,
            quirks: self.quirks,
            key: internal_key,
            velocity,
            pan_setting: part.pan_setting(),
            expression: part.expression(),
            part_volume: part.volume(),
            master_vol: self.mem.system().master_vol,
            rhythm_level: None,
            master_tune_delta: self.master_tune_delta,
            bend_offset: part.bend_offset(),
            modulation: part.modulation(),
            nice_amp_ramp: self.profile.nice_amp_ramp,
            nice_panning: self.profile.nice_panning,
            nice_partial_mixing: self.profile.nice_partial_mixing,
            reversed_stereo: self.profile.reversed_stereo,
            rhythm: false,
        };
        let assign_mode = part.assign_mode();
        match self
            .manager
            .start_note(part_index, assign_mode, &caches, &ctx, internal_key, velocity)
        {
            NoteOnResult::Aborting => false,
            _ => true,
        }
    }

    fn rhythm_note_on(&mut self, key: u8, velocity: u8) -> bool {
        if key < 24 || key > self.machine.max_rhythm_key() {
            debug!("rhythm key {} out of range, dropped", key);
            return true;
        }
        let entry = self.mem.rhythm((key - 24) as usize);

        // Two drum programs stop a fixed key before retriggering.
        let stop_key = match entry.timbre {
            70 => Some(0u8),
            71 => Some(1u8),
            _ => None,
        };
        if let Some(stop_key) = stop_key {
            if let Some(poly) = self.manager.find_poly_on_key(RHYTHM_PART, stop_key) {
                self.manager.abort_poly(&self.tables, poly);
                return false;
            }
        }

        let timbre_index = if entry.timbre < 64 {
            128 + entry.timbre as usize
        } else {
            192 + (entry.timbre as usize - 64)
        };
        let timbre = self.mem.timbre(timbre_index & 255);
        let part = &self.parts[RHYTHM_PART];
        let caches = build_patch_caches(
            &timbre,
            0,
            0,
            part.bender_range(),
            entry.reverb_switch != 0,
            &self.pcm_waves,
        );
        let internal_key =
            part.midi_key_to_internal(key, self.quirks.key_shift_applied_to_rhythm);
        let ctx = NoteOnContext {
            tables: &self.tables,
            quirks: self.quirks,
            key: internal_key,
            velocity,
            pan_setting: entry.panpot.min(14),
            expression: part.expression(),
            part_volume: part.volume(),
            master_vol: self.mem.system().master_vol,
            rhythm_level: Some(entry.output_level),
            master_tune_delta: self.master_tune_delta,
            bend_offset: 0,
            modulation: part.modulation(),
            nice_amp_ramp: self.profile.nice_amp_ramp,
            nice_panning: self.profile.nice_panning,
            nice_partial_mixing: self.profile.nice_partial_mixing,
            reversed_stereo: self.profile.reversed_stereo,
            rhythm: true,
        };
        match self
            .manager
            .start_note(RHYTHM_PART, 0, &caches, &ctx, internal_key, velocity)
        {
            NoteOnResult::Aborting => false,
            _ => true,
        }
    }

    fn note_off(&mut self, part_index: usize, key: u8) {
        let apply_shift = if part_index == RHYTHM_PART {
            self.quirks.key_shift_applied_to_rhythm
        } else {
            true
        };
        let internal_key = self.parts[part_index].midi_key_to_internal(key, apply_shift);
        let hold = self.parts[part_index].hold_pedal();
        self.manager
            .note_off(&self.tables, part_index, internal_key, hold);
    }

    fn control_change(&mut self, part_index: usize, controller: u8, value: u8) {
        match controller {
            1 => {
                self.parts[part_index].set_modulation(value);
                self.manager
                    .update_part_partials(part_index, |p| p.set_modulation(value));
            }
            6 => {
                self.parts[part_index].data_entry(value);
            }
            7 => {
                self.parts[part_index].set_volume(value);
                let mut temp = self.mem.patch_temp(part_index);
                temp.output_level = self.parts[part_index].volume();
                self.mem.set_patch_temp(part_index, temp);
                self.update_part_amps(part_index);
            }
            10 => {
                self.parts[part_index].set_pan(value);
                let mut temp = self.mem.patch_temp(part_index);
                temp.panpot = self.parts[part_index].pan_setting();
                self.mem.set_patch_temp(part_index, temp);
            }
            11 => {
                self.parts[part_index].set_expression(value);
                self.update_part_amps(part_index);
            }
            64 => {
                let released = self.parts[part_index].set_hold_pedal(value >= 64);
                if released {
                    self.manager.release_held_polys(&self.tables, part_index);
                }
            }
            100 => self.parts[part_index].set_rpn_lsb(value),
            101 => self.parts[part_index].set_rpn_msb(value),
            121 => {
                self.parts[part_index].reset_all_controllers();
                self.manager
                    .update_part_partials(part_index, |p| {
                        p.set_modulation(0);
                        p.set_bend_offset(0);
                    });
            }
            123 => {
                let hold = self.parts[part_index].hold_pedal();
                self.manager.all_notes_off(&self.tables, part_index, hold);
            }
            _ => debug!("ignoring controller {}", controller),
        }
    }

    /// Live amp update of a part's sounding partials after CC7/CC11.
    fn update_part_amps(&mut self, part_index: usize) {
        if part_index == RHYTHM_PART {
            // Drum levels bind per note; new hits pick up the controllers.
            return;
        }
        let part = &self.parts[part_index];
        let ctx = TvaContext {
            key: 60,
            velocity: 64,
            expression: part.expression(),
            part_volume: part.volume(),
            master_vol: self.mem.system().master_vol,
            rhythm_level: None,
            no_sustain: false,
            nice_amp_ramp: self.profile.nice_amp_ramp,
            zero_env_levels_quirk: self.quirks.tva_zero_env_levels,
        };
        let tables = &self.tables;
        self.manager
            .update_part_partials(part_index, |p| p.update_amp_context(tables, ctx));
    }

    fn program_change(&mut self, part_index: usize, program: u8) {
        if part_index == RHYTHM_PART {
            debug!("program change on rhythm part ignored");
            return;
        }
        let patch = self.mem.patch(program as usize & 127);
        let mut temp = self.mem.patch_temp(part_index);
        temp.patch = patch;
        self.mem.set_patch_temp(part_index, temp);
        let timbre = self.mem.timbre(patch.absolute_timbre());
        self.mem.set_timbre_temp(part_index.min(7), &timbre);
        self.parts[part_index].set_patch_temp(temp);
        self.parts[part_index].set_timbre(timbre);
    }

    fn pitch_bend(&mut self, part_index: usize, bend: i16) {
        self.parts[part_index].set_pitch_bend(bend);
        let offset = self.parts[part_index].bend_offset();
        self.manager
            .update_part_partials(part_index, |p| p.set_bend_offset(offset));
    }

    // -- SysEx -------------------------------------------------------------

    fn dispatch_sysex(&mut self, data: &[u8]) {
        // Framing: F0 41 dev 16 12 addr_hi addr_mid addr_lo .. checksum F7.
        if data.len() < 10 || data[0] != 0xF0 || *data.last().unwrap() != 0xF7 {
            debug!("malformed SysEx frame, ignored");
            return;
        }
        if data[1] != 0x41 {
            debug!("SysEx for manufacturer {:#x} ignored", data[1]);
            return;
        }
        if data[3] != 0x16 {
            debug!("SysEx for model {:#x} ignored", data[3]);
            return;
        }
        if data[4] != 0x12 {
            debug!("SysEx command {:#x} ignored (only DT1 is handled)", data[4]);
            return;
        }
        let body = &data[5..data.len() - 2];
        let checksum = data[data.len() - 2];
        let sum: u32 = body.iter().map(|&b| b as u32).sum();
        if (sum + checksum as u32) & 0x7f != 0 {
            warn!("SysEx checksum error");
            self.report.on_debug("SysEx checksum error");
            return;
        }
        let addr = (body[0] as u32) << 16 | (body[1] as u32) << 8 | body[2] as u32;
        self.write_memory(addr, &body[3..]);
    }

    /// Clamped write into a memory region, with live side effects.
    fn write_memory(&mut self, sysex_addr: u32, data: &[u8]) {
        let linear = sysex_addr_to_linear(sysex_addr);
        let Some((region, offset)) = Region::locate(linear) else {
            debug!("SysEx write to unmapped address {:#08x}", sysex_addr);
            return;
        };
        match region {
            Region::Reset => {
                self.reset_to_rom_defaults();
                return;
            }
            Region::Display => {
                debug!("display write ignored (LCD model is external)");
                return;
            }
            _ => {}
        }
        self.mem.write(region, offset, data);
        match region {
            Region::PatchTemp => {
                let first = offset / PATCH_TEMP_SIZE;
                let last = (offset + data.len().max(1) - 1) / PATCH_TEMP_SIZE;
                for part in first..=last.min(PART_COUNT - 1) {
                    let temp = self.mem.patch_temp(part);
                    self.parts[part].set_patch_temp(temp);
                    if part < 8 {
                        let timbre = self.mem.timbre(temp.patch.absolute_timbre());
                        self.mem.set_timbre_temp(part, &timbre);
                        self.parts[part].set_timbre(timbre);
                    }
                }
            }
            Region::TimbreTemp => {
                let first = offset / TIMBRE_PARAM_SIZE;
                let last = (offset + data.len().max(1) - 1) / TIMBRE_PARAM_SIZE;
                for part in first..=last.min(7) {
                    let timbre = self.mem.timbre_temp(part);
                    self.parts[part].set_timbre(timbre);
                }
            }
            Region::System => self.apply_system(),
            _ => {}
        }
    }

    fn read_memory(&self, sysex_addr: u32, out: &mut [u8]) -> usize {
        let linear = sysex_addr_to_linear(sysex_addr);
        match Region::locate(linear) {
            Some((region, offset)) => self.mem.read(region, offset, out),
            None => 0,
        }
    }

    // -- rendering ---------------------------------------------------------

    /// Render `frames` stream frames into `self.streams`.
    fn render_streams_internal(&mut self, frames: usize) {
        debug_assert!(frames <= MAX_SAMPLES_PER_RUN);
        self.streams.clear(frames);

        let queue = Arc::clone(&self.queue);
        let mut pos = 0usize;
        while pos < frames {
            // Drain events due now, pausing while a stolen poly drains.
            while !self.manager.is_aborting() {
                let Some(timestamp) = queue.peek_timestamp() else {
                    break;
                };
                if timestamp.wrapping_sub(self.rendered_sample_count) as i32 > 0 {
                    break;
                }
                let event = queue.peek().expect("timestamp peeked");
                if self.dispatch(&event) {
                    queue.pop();
                } else {
                    break;
                }
            }

            let mut segment = frames - pos;
            if self.manager.is_aborting() {
                // Give the abort a few samples, then retry the event.
                segment = segment.min(8);
            } else if let Some(timestamp) = queue.peek_timestamp() {
                let until = timestamp.wrapping_sub(self.rendered_sample_count) as i32;
                if until > 0 {
                    segment = segment.min(until as usize);
                }
            }

            let src = WaveSource {
                tables: &self.tables,
                pcm: self.pcm_rom.samples(),
            };
            self.manager
                .produce_output(&src, &mut self.rng, &mut self.streams, pos, segment);

            // Reverb for this segment.
            let reverb = &mut self.reverbs[self.current_reverb];
            let range = pos..pos + segment;
            if self.reverb_enabled {
                let dry_silent = self.streams.reverb_dry_left[range.clone()]
                    .iter()
                    .chain(self.streams.reverb_dry_right[range.clone()].iter())
                    .all(|s| s.is_silent());
                if !dry_silent || reverb.is_active() {
                    reverb.process(
                        &self.streams.reverb_dry_left[range.clone()],
                        &self.streams.reverb_dry_right[range.clone()],
                        &mut self.streams.reverb_wet_left[range.clone()],
                        &mut self.streams.reverb_wet_right[range.clone()],
                    );
                }
            }

            pos += segment;
            self.rendered_sample_count = self.rendered_sample_count.wrapping_add(segment as u32);
            self.rendered
                .store(self.rendered_sample_count, Ordering::Relaxed);
        }
    }

    /// Render interleaved output frames at the analogue stage's rate.
    fn render(&mut self, out: &mut [P::Sample]) {
        let mut written = 0usize;
        let out_frames = out.len() / 2;
        while written < out_frames {
            let out_chunk = (out_frames - written).min(1024);
            let in_frames = self.analog.dac_streams_length(out_chunk);
            self.render_streams_internal(in_frames);
            self.analog.process(
                &self.streams,
                in_frames,
                &mut out[written * 2..(written + out_chunk) * 2],
            );
            written += out_chunk;
        }
    }

    /// Render the six pre-analogue streams into a caller-provided set.
    fn render_streams(&mut self, out: &mut DacStreams<P::Sample>, frames: usize) {
        let mut pos = 0usize;
        while pos < frames {
            let chunk = (frames - pos).min(MAX_SAMPLES_PER_RUN);
            self.render_streams_internal(chunk);
            for (dst, src) in [
                (&mut out.non_reverb_left, &self.streams.non_reverb_left),
                (&mut out.non_reverb_right, &self.streams.non_reverb_right),
                (&mut out.reverb_dry_left, &self.streams.reverb_dry_left),
                (&mut out.reverb_dry_right, &self.streams.reverb_dry_right),
                (&mut out.reverb_wet_left, &self.streams.reverb_wet_left),
                (&mut out.reverb_wet_right, &self.streams.reverb_wet_right),
            ] {
                dst[pos..pos + chunk].copy_from_slice(&src[..chunk]);
            }
            pos += chunk;
        }
    }

    fn active_partial_count(&self) -> usize {
        self.manager.partial_count() - self.manager.free_partial_count()
    }

    fn has_active_polys(&self) -> bool {
        (0..PART_COUNT).any(|p| {
            self.manager
                .part_polys(p)
                .iter()
                .any(|&i| self.manager.poly(i).state() != PolyState::Inactive)
        })
    }
}

/// The monomorphised engines behind the facade.
enum Engine {
    Int16(Core<IntPartialPair>),
    Float(Core<FloatPartialPair>),
}

/// The public synthesizer instance.
pub struct Synth {
    engine: Engine,
    queue: Arc<MidiQueue>,
    rendered: Arc<AtomicU32>,
    report: Arc<dyn ReportHandler>,
    delay_mode: MidiDelayMode,
    /// Scratch for cross-format render conversion.
    convert_i16: Vec<i16>,
    convert_f32: Vec<f32>,
}

impl Synth {
    /// Open a synth on a validated ROM pair. Either the instance comes up
    /// fully usable or the error leaves nothing behind.
    pub fn open(
        control_rom: ControlRomImage,
        pcm_rom: PcmRomImage,
        profile: SynthProfile,
    ) -> Result<Self, SynthError> {
        Self::open_with_report(control_rom, pcm_rom, profile, Arc::new(NullReportHandler))
    }

    pub fn open_with_report(
        control_rom: ControlRomImage,
        pcm_rom: PcmRomImage,
        profile: SynthProfile,
        report: Arc<dyn ReportHandler>,
    ) -> Result<Self, SynthError> {
        let queue = Arc::new(MidiQueue::new(
            profile.midi_event_capacity,
            profile.midi_sysex_capacity,
        ));
        let rendered = Arc::new(AtomicU32::new(0));
        let delay_mode = profile.midi_delay_mode;
        let renderer_type = profile.renderer_type;
        let engine = match renderer_type {
            RendererType::Int16 => Engine::Int16(Core::open(
                control_rom,
                pcm_rom,
                profile,
                Arc::clone(&queue),
                Arc::clone(&rendered),
                Arc::clone(&report),
            )?),
            RendererType::Float => Engine::Float(Core::open(
                control_rom,
                pcm_rom,
                profile,
                Arc::clone(&queue),
                Arc::clone(&rendered),
                Arc::clone(&report),
            )?),
        };
        Ok(Synth {
            engine,
            queue,
            rendered,
            report,
            delay_mode,
            convert_i16: vec![0; 2 * MAX_SAMPLES_PER_RUN],
            convert_f32: vec![0.0; 2 * MAX_SAMPLES_PER_RUN],
        })
    }

    pub fn renderer_type(&self) -> RendererType {
        match self.engine {
            Engine::Int16(_) => RendererType::Int16,
            Engine::Float(_) => RendererType::Float,
        }
    }

    pub fn machine(&self) -> Machine {
        match &self.engine {
            Engine::Int16(core) => core.machine,
            Engine::Float(core) => core.machine,
        }
    }

    /// Producer handle for a MIDI thread.
    pub fn midi_port(&self) -> MidiPort {
        MidiPort {
            queue: Arc::clone(&self.queue),
            rendered: Arc::clone(&self.rendered),
            delay_mode: self.delay_mode,
        }
    }

    /// Push a short message timestamped "now". Reports overflow through the
    /// report handler.
    pub fn play_msg(&self, msg: u32) -> Result<(), QueueFull> {
        let result = self.midi_port().play_msg(msg);
        if result.is_err() {
            warn!("MIDI queue overflow");
            self.report.on_midi_queue_overflow();
        }
        result
    }

    pub fn play_msg_at(&self, msg: u32, timestamp: u32) -> Result<(), QueueFull> {
        let result = self.midi_port().play_msg_at(msg, timestamp);
        if result.is_err() {
            self.report.on_midi_queue_overflow();
        }
        result
    }

    pub fn play_sysex(&self, data: &[u8]) -> Result<(), QueueFull> {
        let result = self.midi_port().play_sysex(data);
        if result.is_err() {
            self.report.on_midi_queue_overflow();
        }
        result
    }

    /// Direct, immediate write into the SysEx-addressable memory.
    pub fn write_memory(&mut self, sysex_addr: u32, data: &[u8]) {
        match &mut self.engine {
            Engine::Int16(core) => core.write_memory(sysex_addr, data),
            Engine::Float(core) => core.write_memory(sysex_addr, data),
        }
    }

    /// Read back from the SysEx-addressable memory.
    pub fn read_memory(&self, sysex_addr: u32, out: &mut [u8]) -> usize {
        match &self.engine {
            Engine::Int16(core) => core.read_memory(sysex_addr, out),
            Engine::Float(core) => core.read_memory(sysex_addr, out),
        }
    }

    /// Stream frames rendered since open, modulo 2^32.
    pub fn rendered_sample_count(&self) -> u32 {
        match &self.engine {
            Engine::Int16(core) => core.rendered_sample_count,
            Engine::Float(core) => core.rendered_sample_count,
        }
    }

    /// The output rate of the configured analogue stage.
    pub fn output_sample_rate(&self) -> u32 {
        match &self.engine {
            Engine::Int16(core) => core.analog.output_sample_rate(),
            Engine::Float(core) => core.analog.output_sample_rate(),
        }
    }

    /// Input frames the analogue stage needs for `out_frames` of output.
    pub fn dac_streams_length(&self, out_frames: usize) -> usize {
        match &self.engine {
            Engine::Int16(core) => core.analog.dac_streams_length(out_frames),
            Engine::Float(core) => core.analog.dac_streams_length(out_frames),
        }
    }

    pub fn active_partial_count(&self) -> usize {
        match &self.engine {
            Engine::Int16(core) => core.active_partial_count(),
            Engine::Float(core) => core.active_partial_count(),
        }
    }

    pub fn has_active_polys(&self) -> bool {
        match &self.engine {
            Engine::Int16(core) => core.has_active_polys(),
            Engine::Float(core) => core.has_active_polys(),
        }
    }

    pub fn set_output_gain(&mut self, gain: f32) {
        match &mut self.engine {
            Engine::Int16(core) => core.analog.set_synth_gain(gain * core.dac_gain),
            Engine::Float(core) => core.analog.set_synth_gain(gain * core.dac_gain),
        }
    }

    pub fn set_reverb_output_gain(&mut self, gain: f32) {
        match &mut self.engine {
            Engine::Int16(core) => core.analog.set_reverb_gain(gain * core.dac_gain),
            Engine::Float(core) => core.analog.set_reverb_gain(gain * core.dac_gain),
        }
    }

    /// Bypass the reverb graph entirely.
    pub fn set_reverb_enabled(&mut self, enabled: bool) {
        match &mut self.engine {
            Engine::Int16(core) => core.reverb_enabled = enabled,
            Engine::Float(core) => core.reverb_enabled = enabled,
        }
    }

    pub fn reverb_mode(&self) -> ReverbMode {
        match &self.engine {
            Engine::Int16(core) => core.reverbs[core.current_reverb].mode(),
            Engine::Float(core) => core.reverbs[core.current_reverb].mode(),
        }
    }

    /// Render interleaved 16-bit stereo at the output rate. A float engine
    /// renders natively and converts.
    pub fn render_i16(&mut self, out: &mut [i16]) {
        match &mut self.engine {
            Engine::Int16(core) => core.render(out),
            Engine::Float(core) => {
                let mut done = 0;
                while done < out.len() {
                    let chunk = (out.len() - done).min(self.convert_f32.len());
                    core.render(&mut self.convert_f32[..chunk]);
                    for (dst, &src) in out[done..done + chunk]
                        .iter_mut()
                        .zip(self.convert_f32[..chunk].iter())
                    {
                        *dst = src.to_i16();
                    }
                    done += chunk;
                }
            }
        }
    }

    /// Render interleaved float stereo at the output rate.
    pub fn render_f32(&mut self, out: &mut [f32]) {
        match &mut self.engine {
            Engine::Float(core) => core.render(out),
            Engine::Int16(core) => {
                let mut done = 0;
                while done < out.len() {
                    let chunk = (out.len() - done).min(self.convert_i16.len());
                    core.render(&mut self.convert_i16[..chunk]);
                    for (dst, &src) in out[done..done + chunk]
                        .iter_mut()
                        .zip(self.convert_i16[..chunk].iter())
                    {
                        *dst = src.to_f32();
                    }
                    done += chunk;
                }
            }
        }
    }

    /// Render the six pre-analogue streams (integer pipeline).
    pub fn render_streams_i16(&mut self, out: &mut DacStreams<i16>, frames: usize) {
        match &mut self.engine {
            Engine::Int16(core) => core.render_streams(out, frames),
            Engine::Float(_) => {
                warn!("render_streams_i16 called on a float engine; rendering silence");
                out.clear(frames.min(MAX_SAMPLES_PER_RUN));
            }
        }
    }

    /// Render the six pre-analogue streams (float pipeline).
    pub fn render_streams_f32(&mut self, out: &mut DacStreams<f32>, frames: usize) {
        match &mut self.engine {
            Engine::Float(core) => core.render_streams(out, frames),
            Engine::Int16(_) => {
                warn!("render_streams_f32 called on an int16 engine; rendering silence");
                out.clear(frames.min(MAX_SAMPLES_PER_RUN));
            }
        }
    }
}
