//! Recorders: numbered PNG frames and a WAV audio capture.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use famicore::sink::{AudioRecorder, FrameRecorder};
use famicore::{FB_HEIGHT, FB_WIDTH, FrameBuffer};

use crate::palette;

/// Write one frame of color indices as an RGBA PNG.
///
/// # Errors
///
/// I/O or encoding failure.
pub fn write_png(path: &Path, frame: &[u8]) -> std::io::Result<()> {
    let file = fs::File::create(path)?;
    let writer = std::io::BufWriter::new(file);
    let mut encoder = png::Encoder::new(writer, FB_WIDTH as u32, FB_HEIGHT as u32);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder
        .write_header()
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    let mut rgba = vec![0u8; frame.len() * 4];
    palette::fill_rgba(frame, &mut rgba);
    writer
        .write_image_data(&rgba)
        .map_err(|e| std::io::Error::other(e.to_string()))
}

/// Frame recorder: dumps `frames/000001.png`, `000002.png`, ... under
/// the target directory.
pub struct PngRecorder {
    dir: PathBuf,
    index: u32,
}

impl PngRecorder {
    /// # Errors
    ///
    /// Fails when the frames directory cannot be created.
    pub fn new(dir: &Path) -> std::io::Result<Self> {
        let dir = dir.join("frames");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, index: 0 })
    }
}

impl FrameRecorder for PngRecorder {
    fn record_frame(&mut self, frame: &FrameBuffer) -> std::io::Result<()> {
        self.index += 1;
        let path = self.dir.join(format!("{:06}.png", self.index));
        write_png(&path, frame)
    }

    fn finish(&mut self) -> std::io::Result<()> {
        log::info!("recorded {} frames to {}", self.index, self.dir.display());
        Ok(())
    }
}

/// Audio recorder: buffers samples and writes a 16-bit mono WAV at
/// shutdown.
pub struct WavRecorder {
    path: PathBuf,
    samples: Vec<i16>,
    sample_rate: u32,
}

impl WavRecorder {
    #[must_use]
    pub fn new(path: PathBuf, sample_rate: u32) -> Self {
        Self {
            path,
            samples: Vec::new(),
            sample_rate,
        }
    }
}

impl AudioRecorder for WavRecorder {
    fn record_sample(&mut self, sample: i16) {
        self.samples.push(sample);
    }

    fn finish(&mut self) -> std::io::Result<()> {
        let file = fs::File::create(&self.path)?;
        let mut w = std::io::BufWriter::new(file);

        let data_len = (self.samples.len() * 2) as u32;
        let byte_rate = self.sample_rate * 2;

        // Canonical 44-byte RIFF/WAVE header, PCM16 mono.
        w.write_all(b"RIFF")?;
        w.write_all(&(36 + data_len).to_le_bytes())?;
        w.write_all(b"WAVEfmt ")?;
        w.write_all(&16u32.to_le_bytes())?;
        w.write_all(&1u16.to_le_bytes())?; // PCM
        w.write_all(&1u16.to_le_bytes())?; // mono
        w.write_all(&self.sample_rate.to_le_bytes())?;
        w.write_all(&byte_rate.to_le_bytes())?;
        w.write_all(&2u16.to_le_bytes())?; // block align
        w.write_all(&16u16.to_le_bytes())?; // bits per sample
        w.write_all(b"data")?;
        w.write_all(&data_len.to_le_bytes())?;
        for sample in &self.samples {
            w.write_all(&sample.to_le_bytes())?;
        }
        w.flush()?;

        log::info!(
            "wrote {} samples to {}",
            self.samples.len(),
            self.path.display()
        );
        Ok(())
    }
}
