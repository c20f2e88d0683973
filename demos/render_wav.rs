//! Render a short chord progression to a WAV file.
//!
//! Usage:
//!
//! ```text
//! cargo run --example render_wav -- MT32_CONTROL.ROM MT32_PCM.ROM out.wav
//! ```
//!
//! The ROM images are identified against the built-in database; unlisted
//! dumps are rejected the same way the synth itself rejects them.

use lasynth::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(control_path), Some(pcm_path), Some(out_path)) =
        (args.next(), args.next(), args.next())
    else {
        eprintln!("usage: render_wav <control.rom> <pcm.rom> <out.wav>");
        std::process::exit(2);
    };

    let control = ControlRomImage::identify(std::fs::read(control_path)?)?;
    let pcm = PcmRomImage::identify(std::fs::read(pcm_path)?)?;
    let mut synth = Synth::open(
        control,
        pcm,
        SynthProfile {
            analog_mode: AnalogOutputMode::Accurate,
            ..SynthProfile::default()
        },
    )?;

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: synth.output_sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(out_path, spec)?;

    // One bar each of three triads on part 1, then a drum hit.
    let chords: [&[u8]; 3] = [&[60, 64, 67], &[57, 60, 64], &[65, 69, 72]];
    let mut buffer = vec![0i16; 2 * 4800];
    for chord in chords {
        for &key in chord {
            synth.play_msg(short_message(0x91, key, 100))?;
        }
        for _ in 0..10 {
            synth.render_i16(&mut buffer);
            for &sample in &buffer {
                writer.write_sample(sample)?;
            }
        }
        for &key in chord {
            synth.play_msg(short_message(0x81, key, 0))?;
        }
    }
    synth.play_msg(short_message(0x99, 40, 110))?;

    // Let the releases and the reverb tail ring out.
    for _ in 0..20 {
        synth.render_i16(&mut buffer);
        for &sample in &buffer {
            writer.write_sample(sample)?;
        }
    }

    writer.finalize()?;
    Ok(())
}
