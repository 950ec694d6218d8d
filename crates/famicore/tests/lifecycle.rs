//! Full-engine tests through the public API: threads, event bus, sinks.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use famicore::sink::{AudioSink, NullAudio, VideoSink};
use famicore::{
    Event, EventSender, FB_HEIGHT, FB_WIDTH, FrameBuffer, Nes, Options, PauseCommand,
    PauseRequest, RomImage, Shutdown,
};

/// Build an NROM image whose PRG starts with `program`, padded with NOPs.
fn rom_with_program(name: &str, program: &[u8]) -> RomImage {
    let mut data = vec![0u8; 16 + 0x4000 + 0x2000];
    data[0..4].copy_from_slice(b"NES\x1a");
    data[4] = 1; // one 16K PRG bank
    data[5] = 1; // one 8K CHR bank
    for byte in &mut data[16..16 + 0x4000] {
        *byte = 0xEA;
    }
    data[16..16 + program.len()].copy_from_slice(program);
    data[16 + 0x3FFC] = 0x00; // reset vector -> $8000
    data[16 + 0x3FFD] = 0x80;
    RomImage::from_bytes(name, &data).unwrap()
}

/// Video sink that counts frames, runs a scripted exchange, then quits.
struct ScriptedVideo {
    frames_wanted: u32,
    frames_seen: u32,
    exercise_pause: bool,
}

impl ScriptedVideo {
    fn new(frames_wanted: u32) -> Self {
        Self {
            frames_wanted,
            frames_seen: 0,
            exercise_pause: false,
        }
    }
}

impl VideoSink for ScriptedVideo {
    fn run(
        &mut self,
        frames: Receiver<FrameBuffer>,
        events: EventSender,
        shutdown: Arc<Shutdown>,
    ) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while self.frames_seen < self.frames_wanted
            && !shutdown.is_quitting()
            && std::time::Instant::now() < deadline
        {
            match frames.recv_timeout(Duration::from_millis(200)) {
                Ok(frame) => {
                    assert_eq!(frame.len(), FB_WIDTH * FB_HEIGHT);
                    self.frames_seen += 1;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {} // re-check shutdown
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        if self.exercise_pause {
            // Pause with an ack, confirm the transition, then resume.
            let (ack_tx, ack_rx) = mpsc::channel();
            events
                .send(Event::Pause(PauseCommand::with_ack(
                    PauseRequest::Pause,
                    ack_tx,
                )))
                .unwrap();
            assert!(ack_rx.recv_timeout(Duration::from_secs(5)).unwrap());

            let (ack_tx, ack_rx) = mpsc::channel();
            events
                .send(Event::Pause(PauseCommand::with_ack(
                    PauseRequest::Unpause,
                    ack_tx,
                )))
                .unwrap();
            assert!(ack_rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }

        let _ = events.send(Event::Quit);
    }
}

#[test]
fn runs_frames_and_quits_cleanly() {
    let rom = rom_with_program("lifecycle", &[0xEA]);
    let nes = Nes::from_image(rom, &Options::default()).unwrap();

    let mut video = ScriptedVideo::new(3);
    nes.run(&mut video, Box::new(NullAudio), None, None).unwrap();
    assert_eq!(video.frames_seen, 3);
}

#[test]
fn pause_round_trip_through_the_event_bus() {
    let rom = rom_with_program("pause", &[0xEA]);
    let nes = Nes::from_image(rom, &Options::default()).unwrap();

    let mut video = ScriptedVideo::new(1);
    video.exercise_pause = true;
    nes.run(&mut video, Box::new(NullAudio), None, None).unwrap();
}

#[test]
fn fatal_cpu_error_stops_the_run() {
    // $02 jams the CPU; the scheduler must surface it and unblock the
    // video sink via the shutdown flag.
    let rom = rom_with_program("jam", &[0x02]);
    let nes = Nes::from_image(rom, &Options::default()).unwrap();

    let mut video = ScriptedVideo::new(u32::MAX);
    let err = nes
        .run(&mut video, Box::new(NullAudio), None, None)
        .unwrap_err();
    assert!(matches!(err, famicore::EngineError::Cpu(_)));
}

#[test]
fn samples_reach_the_audio_sink() {
    struct CountingAudio(Arc<std::sync::atomic::AtomicUsize>);
    impl AudioSink for CountingAudio {
        fn push_sample(&mut self, _sample: i16) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    let rom = rom_with_program("audio", &[0xEA]);
    let nes = Nes::from_image(rom, &Options::default()).unwrap();

    let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut video = ScriptedVideo::new(2);
    nes.run(
        &mut video,
        Box::new(CountingAudio(count.clone())),
        None,
        None,
    )
    .unwrap();

    // Two NTSC frames of CPU time is ~1470 samples at 44.1 kHz.
    let samples = count.load(std::sync::atomic::Ordering::Relaxed);
    assert!(samples > 500, "only {samples} samples arrived");
}

#[test]
fn region_override_wins_over_detection() {
    let rom = rom_with_program("ntsc-name", &[0xEA]);
    let nes = Nes::from_image(
        rom,
        &Options {
            region: Some(famicore::Region::Pal),
            ..Options::default()
        },
    )
    .unwrap();
    assert_eq!(nes.region(), famicore::Region::Pal);
}
