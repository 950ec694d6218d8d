//! Audio output: cpal stream fed through a ring buffer.
//!
//! The cpal stream is not `Send`, so it stays on the main thread inside
//! [`AudioOutput`]; the event consumer gets the [`AudioQueue`] half,
//! which only holds the ring-buffer producer. Underruns play the rest
//! level instead of clicking.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Producer, Split},
};

use famicore::sink::AudioSink;

const SAMPLE_RATE: u32 = 44_100;
/// Ring capacity: ~8 frames of audio at 60 Hz.
const RING_CAPACITY: usize = (SAMPLE_RATE as usize / 60) * 8;

/// Owns the cpal stream. Keep alive for the duration of the run.
pub struct AudioOutput {
    _stream: Stream,
}

/// `Send` half handed to the engine as the audio sink.
pub struct AudioQueue {
    producer: ringbuf::HeapProd<f32>,
}

impl AudioOutput {
    /// Open the default output device at 44.1 kHz mono.
    ///
    /// Returns `None` when no audio device is available; the caller
    /// falls back to a null sink.
    pub fn new() -> Option<(Self, AudioQueue)> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;

        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring = HeapRb::<f32>::new(RING_CAPACITY);
        let (mut producer, mut consumer) = ring.split();

        // Pre-fill half the ring with silence against startup underrun.
        for _ in 0..RING_CAPACITY / 2 {
            let _ = producer.try_push(0.0);
        }

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        *sample = consumer.try_pop().unwrap_or(0.0);
                    }
                },
                |err| log::warn!("audio stream error: {err}"),
                None,
            )
            .ok()?;
        stream.play().ok()?;

        Some((Self { _stream: stream }, AudioQueue { producer }))
    }
}

impl AudioSink for AudioQueue {
    fn push_sample(&mut self, sample: i16) {
        // A full ring means the device is behind; dropping the sample is
        // better than blocking the event consumer.
        let _ = self.producer.try_push(f32::from(sample) / 32768.0);
    }
}
