//! famicore front end: window, audio device, recorders, CLI.

mod audio;
mod keymap;
mod palette;
mod recorder;
mod video;

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use log::warn;

use famicore::sink::{AudioRecorder, AudioSink, FrameRecorder, NullAudio};
use famicore::{Nes, Options, Region};

use audio::AudioOutput;
use recorder::{PngRecorder, WavRecorder};
use video::{HeadlessVideo, WinitVideo};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum RecorderChoice {
    #[default]
    None,
    Png,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum AudioRecorderChoice {
    #[default]
    None,
    Wav,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum RegionChoice {
    #[default]
    Auto,
    Ntsc,
    Pal,
}

/// NES emulator.
#[derive(Debug, Parser)]
#[command(name = "famicore", version, about)]
struct Args {
    /// iNES ROM file (.nes).
    rom: PathBuf,

    /// Frame recorder backend.
    #[arg(long, value_enum, default_value = "none")]
    recorder: RecorderChoice,

    /// Directory for recorded frames.
    #[arg(long, default_value = ".")]
    recorder_dir: PathBuf,

    /// Audio recorder backend.
    #[arg(long, value_enum, default_value = "none")]
    audio_recorder: AudioRecorderChoice,

    /// Trace instruction decode (requires RUST_LOG=trace).
    #[arg(long)]
    cpu_decode: bool,

    /// Region override.
    #[arg(long, value_enum, default_value = "auto")]
    region: RegionChoice,

    /// Run without a window.
    #[arg(long)]
    headless: bool,

    /// Frames to run in headless mode.
    #[arg(long, default_value_t = 200)]
    frames: u32,

    /// Save a PNG of the last headless frame.
    #[arg(long)]
    screenshot: Option<PathBuf>,

    /// Window integer scale factor.
    #[arg(long, default_value_t = 3)]
    scale: u32,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let options = Options {
        cpu_decode: args.cpu_decode,
        region: match args.region {
            RegionChoice::Auto => None,
            RegionChoice::Ntsc => Some(Region::Ntsc),
            RegionChoice::Pal => Some(Region::Pal),
        },
    };

    let nes = match Nes::from_file(&args.rom, &options) {
        Ok(nes) => nes,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };
    let game_name = nes.game_name().to_string();

    let recorder: Option<Box<dyn FrameRecorder>> = match args.recorder {
        RecorderChoice::None => None,
        RecorderChoice::Png => match PngRecorder::new(&args.recorder_dir) {
            Ok(rec) => Some(Box::new(rec)),
            Err(e) => {
                eprintln!("error creating recorder: {e}");
                process::exit(1);
            }
        },
    };
    let audio_recorder: Option<Box<dyn AudioRecorder>> = match args.audio_recorder {
        AudioRecorderChoice::None => None,
        AudioRecorderChoice::Wav => Some(Box::new(WavRecorder::new(
            PathBuf::from(format!("{game_name}.wav")),
            44_100,
        ))),
    };

    // The cpal stream must outlive the run; its Send half goes to the
    // event consumer.
    let mut audio_output = None;
    let audio: Box<dyn AudioSink> = if args.headless {
        Box::new(NullAudio)
    } else {
        match AudioOutput::new() {
            Some((output, queue)) => {
                audio_output = Some(output);
                Box::new(queue)
            }
            None => {
                warn!("no audio device available, sound disabled");
                Box::new(NullAudio)
            }
        }
    };

    let result = if args.headless {
        let mut sink = HeadlessVideo::new(args.frames, args.screenshot.clone());
        nes.run(&mut sink, audio, recorder, audio_recorder)
    } else {
        let mut sink = WinitVideo::new(game_name, args.scale);
        nes.run(&mut sink, audio, recorder, audio_recorder)
    };
    drop(audio_output);

    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1);
    }
}
