//! Session recording.
//!
//! The recorder keeps one downscaled frame per interesting moment of a run
//! (after navigation, after each step) and encodes them as an animated GIF
//! when the recording is saved. Frames are stored as raw RGBA so nothing is
//! encoded unless a run actually needs its video.

use crate::driver::{BrowserSession, Capture};
use crate::result::{ComprobarError, ComprobarResult};
use gif::{Encoder, Frame, Repeat};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Configuration for session recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecordingConfig {
    /// Frames wider than this are scaled down, keeping the aspect ratio
    pub max_width: u32,
    /// Display time of each frame in centiseconds
    pub frame_delay_cs: u16,
    /// Quality level (1-100, affects palette quantization)
    pub quality: u8,
    /// Frames held at most; the oldest is evicted to make room
    pub max_frames: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_width: 640,
            frame_delay_cs: 50,
            quality: 70,
            max_frames: 300,
        }
    }
}

impl RecordingConfig {
    /// Set the maximum frame width
    #[must_use]
    pub const fn with_max_width(mut self, width: u32) -> Self {
        self.max_width = width;
        self
    }

    /// Set the per-frame delay
    #[must_use]
    pub const fn with_frame_delay_cs(mut self, delay: u16) -> Self {
        self.frame_delay_cs = delay;
        self
    }

    /// Convert quality (1-100) to GIF encoder speed (1-30)
    fn encoder_speed(&self) -> i32 {
        let normalized = i32::from(100 - self.quality.clamp(1, 100));
        (normalized * 29 / 100 + 1).clamp(1, 30)
    }
}

#[derive(Debug, Clone)]
struct RecordedFrame {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
    label: String,
    elapsed_ms: u64,
}

/// Collects frames for one run
#[derive(Debug)]
pub struct SessionRecorder {
    config: RecordingConfig,
    frames: VecDeque<RecordedFrame>,
    started: Instant,
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(RecordingConfig::default())
    }
}

impl SessionRecorder {
    /// Create a recorder
    #[must_use]
    pub fn new(config: RecordingConfig) -> Self {
        Self {
            config,
            frames: VecDeque::new(),
            started: Instant::now(),
        }
    }

    /// Number of frames held
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Labels of the frames held, in capture order
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.frames.iter().map(|f| f.label.as_str()).collect()
    }

    /// Capture the viewport of `session` as a frame
    pub async fn capture(
        &mut self,
        session: &mut dyn BrowserSession,
        label: impl Into<String>,
    ) -> ComprobarResult<()> {
        let png = session.screenshot(&Capture::Viewport).await?;
        self.push_png(&png, label)
    }

    /// Add a PNG-encoded frame
    pub fn push_png(&mut self, png: &[u8], label: impl Into<String>) -> ComprobarResult<()> {
        let img = image::load_from_memory(png).map_err(|e| ComprobarError::Recording {
            message: format!("Failed to decode frame: {e}"),
        })?;
        let img = self.fit(img);
        let (width, height) = img.dimensions();
        while self.frames.len() >= self.config.max_frames.max(1) {
            self.frames.pop_front();
            debug!(max = self.config.max_frames, "recording full, oldest frame evicted");
        }
        self.frames.push_back(RecordedFrame {
            rgba: img.to_rgba8().into_raw(),
            width,
            height,
            label: label.into(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
        Ok(())
    }

    fn fit(&self, img: DynamicImage) -> DynamicImage {
        let (width, height) = img.dimensions();
        if width <= self.config.max_width || width == 0 {
            return img;
        }
        let scaled_height = (u64::from(height) * u64::from(self.config.max_width) / u64::from(width))
            .max(1) as u32;
        img.resize_exact(self.config.max_width, scaled_height, FilterType::Triangle)
    }

    /// Encode all frames as an animated GIF. Every frame is scaled to the
    /// size of the first.
    pub fn encode(&self) -> ComprobarResult<Vec<u8>> {
        let first = self.frames.front().ok_or_else(|| ComprobarError::Recording {
            message: "No frames captured".to_string(),
        })?;
        let (width, height) = (first.width, first.height);
        let too_large = || ComprobarError::Recording {
            message: format!("Frame {width}x{height} exceeds GIF limits"),
        };
        let gif_width = u16::try_from(width).map_err(|_| too_large())?;
        let gif_height = u16::try_from(height).map_err(|_| too_large())?;

        let mut output = Vec::new();
        {
            let mut encoder = Encoder::new(&mut output, gif_width, gif_height, &[]).map_err(|e| {
                ComprobarError::Recording {
                    message: format!("Failed to create GIF encoder: {e}"),
                }
            })?;
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(|e| ComprobarError::Recording {
                    message: format!("Failed to set GIF repeat: {e}"),
                })?;

            for recorded in &self.frames {
                let mut rgba = conform(recorded, width, height)?;
                let mut frame = Frame::from_rgba_speed(
                    gif_width,
                    gif_height,
                    &mut rgba,
                    self.config.encoder_speed(),
                );
                frame.delay = self.config.frame_delay_cs;
                encoder
                    .write_frame(&frame)
                    .map_err(|e| ComprobarError::Recording {
                        message: format!("Failed to write GIF frame: {e}"),
                    })?;
            }
        }
        Ok(output)
    }

    /// Encode and write the recording
    pub fn save(&self, path: &Path) -> ComprobarResult<()> {
        let data = self.encode()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)?;
        debug!(
            frames = self.frames.len(),
            duration_ms = self.frames.back().map_or(0, |f| f.elapsed_ms),
            path = %path.display(),
            "recording saved"
        );
        Ok(())
    }
}

fn conform(frame: &RecordedFrame, width: u32, height: u32) -> ComprobarResult<Vec<u8>> {
    if frame.width == width && frame.height == height {
        return Ok(frame.rgba.clone());
    }
    let img = image::RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(|| ComprobarError::Recording {
            message: "Invalid frame data dimensions".to_string(),
        })?;
    Ok(DynamicImage::ImageRgba8(img)
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgba8()
        .into_raw())
}
