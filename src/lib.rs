//! # lasynth: Roland MT-32 Family Emulation Core
//!
//! `lasynth` reproduces the audio behaviour of the Roland MT-32 family of
//! sample-and-synthesis tone modules (MT-32, CM-32L, LAPC-I and close
//! relatives). Feed it a MIDI byte stream plus the machine's two ROM images
//! and it produces the two-channel PCM stream the original hardware would
//! have put on its line output.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ MIDI intake                                  │  lock-free SPSC queue,
//! │ - timestamped short messages and SysEx       │  channel map, part
//! │ - patch/timbre RAM writes with clamping      │  dispatch
//! ├──────────────────────────────────────────────┤
//! │ Partial rendering                            │  32-voice pool,
//! │ - TVP/TVF/TVA envelopes per partial          │  allocator with
//! │ - LA32 wave generator pairs (synth & PCM)    │  reservation/steal
//! ├──────────────────────────────────────────────┤
//! │ Boss reverb                                  │  all-pass + comb
//! │ - ROOM / HALL / PLATE / TAP-DELAY            │  cascade, "weird mul"
//! ├──────────────────────────────────────────────┤
//! │ Analogue output stage                        │  coarse / accurate /
//! │ - six-stream mix, polyphase FIR              │  oversampled FIR
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The internal rate is the hardware's 32 000 Hz; the analogue stage can
//! emit at 32, 48 or 96 kHz. Resampling to arbitrary host rates is out of
//! scope, as are the LCD model and file I/O.
//!
//! ## Two pipelines
//!
//! Everything below the parts exists twice: a 16-bit integer pipeline with
//! the chip's log-domain arithmetic (saturating mixes, 14-bit fractional
//! multiplies) and a single-precision float pipeline with the same control
//! flow. The variant is fixed at [`Synth::open`] via
//! [`SynthProfile::renderer_type`] and never changes at run time.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use lasynth::prelude::*;
//!
//! let control = ControlRomImage::identify(std::fs::read("MT32_CONTROL.ROM")?)?;
//! let pcm = PcmRomImage::identify(std::fs::read("MT32_PCM.ROM")?)?;
//! let mut synth = Synth::open(control, pcm, SynthProfile::default())?;
//!
//! // Note on, middle C, channel 2 (part 1 by the default assignment).
//! synth.play_msg(short_message(0x91, 60, 100))?;
//!
//! let mut frames = vec![0i16; 2 * 32000];
//! synth.render_i16(&mut frames);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Module map
//!
//! - [`synth`] - the facade: open/close, MIDI dispatch, render drivers
//! - [`la32`] / [`la32_float`] - the wave generator pairs
//! - [`tva`], [`tvf`], [`tvp`], [`ramp`] - the envelope engines
//! - [`partial`], [`poly`], [`part`], [`allocator`] - the voice plumbing
//! - [`reverb`] - the Boss reverb graph
//! - [`analog`] - the output-stage FIRs
//! - [`rom`], [`params`], [`tables`] - ROM decode, parameter RAM, LUTs
//! - [`midi`] - the single-producer single-consumer event queue

pub mod allocator;
pub mod analog;
pub mod la32;
pub mod la32_float;
pub mod midi;
pub mod params;
pub mod part;
pub mod partial;
pub mod poly;
pub mod ramp;
pub mod render;
pub mod reverb;
pub mod rng;
pub mod rom;
pub mod synth;
pub mod tables;
pub mod tva;
pub mod tvf;
pub mod tvp;

pub use analog::{AnalogOutputMode, AnalogStage};
pub use midi::{short_message, MidiEvent, MidiQueue, QueueFull};
pub use render::{DacStreams, RenderSample, MAX_SAMPLES_PER_RUN};
pub use reverb::{BossReverb, ReverbMode, ReverbModelKind};
pub use rom::{ControlRomImage, Machine, PcmRomImage, RomError};
pub use synth::{
    DacInputMode, MidiDelayMode, MidiPort, RendererType, ReportHandler, Synth, SynthError,
    SynthProfile,
};
pub use tables::SAMPLE_RATE;

/// The commonly needed types in one import.
pub mod prelude {
    pub use crate::analog::AnalogOutputMode;
    pub use crate::midi::short_message;
    pub use crate::render::DacStreams;
    pub use crate::reverb::ReverbMode;
    pub use crate::rom::{ControlRomImage, Machine, PcmRomImage};
    pub use crate::synth::{
        DacInputMode, MidiDelayMode, RendererType, Synth, SynthError, SynthProfile,
    };
    pub use crate::tables::SAMPLE_RATE;
}
