//! Decoder Abstraction
//!
//! Opaque image decoding: given bytes or a file, produce decoded frame(s)
//! with size, orientation, and duration. The coordinator is decoder-agnostic;
//! only the service facade touches this after final bytes are delivered.

use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Input to the decoder.
#[derive(Debug, Clone)]
pub enum DecodeSource {
    Bytes(Bytes),
    File(PathBuf),
}

/// Container type identifier, sniffed from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
    Other,
}

impl ContainerType {
    /// Detect the container from leading magic bytes.
    pub fn sniff(data: &[u8]) -> Self {
        if data.len() < 12 {
            return ContainerType::Other;
        }
        match &data[0..4] {
            // JPEG: FF D8 FF
            [0xFF, 0xD8, 0xFF, _] => ContainerType::Jpeg,
            // PNG: 89 50 4E 47
            [0x89, 0x50, 0x4E, 0x47] => ContainerType::Png,
            // GIF: 47 49 46 38
            [0x47, 0x49, 0x46, 0x38] => ContainerType::Gif,
            // WEBP: 52 49 46 46 ... 57 45 42 50
            [0x52, 0x49, 0x46, 0x46] if &data[8..12] == b"WEBP" => ContainerType::Webp,
            // BMP: 42 4D
            [0x42, 0x4D, _, _] => ContainerType::Bmp,
            _ => ContainerType::Other,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerType::Png => "image/png",
            ContainerType::Jpeg => "image/jpeg",
            ContainerType::Gif => "image/gif",
            ContainerType::Webp => "image/webp",
            ContainerType::Bmp => "image/bmp",
            ContainerType::Other => "application/octet-stream",
        }
    }
}

/// EXIF-style frame orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameOrientation {
    #[default]
    Up,
    Down,
    Left,
    Right,
    UpMirrored,
    DownMirrored,
    LeftMirrored,
    RightMirrored,
}

/// Pixel dimensions of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn max_dimension(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// A rendered frame: RGBA8 pixels, row-major.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

/// A successfully opened resource. Frame access is index-based; static images
/// report a single frame with zero duration.
pub trait DecodedResource: Send + Sync {
    fn frame_count(&self) -> usize;

    fn frame_size(&self, index: usize) -> Option<FrameSize>;

    fn frame_orientation(&self, index: usize) -> FrameOrientation;

    /// Display duration of the frame. Zero for static images.
    fn frame_duration(&self, index: usize) -> Duration;

    /// Render a frame, optionally downscaled so that neither dimension
    /// exceeds `max_pixel_size`.
    fn render_frame(&self, index: usize, max_pixel_size: Option<u32>) -> Result<RawImage>;

    fn container_type(&self) -> ContainerType;
}

/// Decoder capability: open bytes or a file into a [`DecodedResource`].
pub trait Decoder: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the payload cannot be interpreted as a supported
    /// resource type. Decoding is deterministic, so callers must not retry.
    fn open(&self, source: DecodeSource) -> Result<Box<dyn DecodedResource>>;
}
