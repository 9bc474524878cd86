//! Decoder Implementation using the `image` crate
//!
//! Static formats decode to a single zero-duration frame. GIF payloads
//! decode every frame up front with their delays, so render calls never
//! touch the compressed data again.

use bridge_traits::{
    error::{BridgeError, Result},
    decoder::{
        ContainerType, DecodeSource, DecodedResource, Decoder, FrameOrientation, FrameSize,
        RawImage,
    },
};
use bytes::Bytes;
use image::codecs::gif::GifDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, RgbaImage};
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

/// Image decoder backed by the `image` crate.
pub struct ImageCodecDecoder;

impl ImageCodecDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageCodecDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ImageCodecDecoder {
    fn open(&self, source: DecodeSource) -> Result<Box<dyn DecodedResource>> {
        let bytes = match source {
            DecodeSource::Bytes(bytes) => bytes,
            DecodeSource::File(path) => Bytes::from(std::fs::read(&path)?),
        };

        let container = ContainerType::sniff(&bytes);
        debug!(container = ?container, bytes = bytes.len(), "Decoding payload");

        let frames = match container {
            ContainerType::Gif => decode_gif_frames(&bytes)?,
            _ => {
                let image = image::load_from_memory(&bytes)
                    .map_err(|e| BridgeError::Decode(e.to_string()))?;
                vec![FrameData {
                    image: image.to_rgba8(),
                    duration: Duration::ZERO,
                }]
            }
        };

        if frames.is_empty() {
            return Err(BridgeError::Decode("payload contains no frames".to_string()));
        }

        Ok(Box::new(DecodedImage { frames, container }))
    }
}

fn decode_gif_frames(bytes: &[u8]) -> Result<Vec<FrameData>> {
    let decoder =
        GifDecoder::new(Cursor::new(bytes)).map_err(|e| BridgeError::Decode(e.to_string()))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| BridgeError::Decode(e.to_string()))?;

    Ok(frames
        .into_iter()
        .map(|frame| {
            let duration = Duration::from(frame.delay());
            FrameData {
                image: frame.into_buffer(),
                duration,
            }
        })
        .collect())
}

struct FrameData {
    image: RgbaImage,
    duration: Duration,
}

struct DecodedImage {
    frames: Vec<FrameData>,
    container: ContainerType,
}

impl DecodedResource for DecodedImage {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn frame_size(&self, index: usize) -> Option<FrameSize> {
        self.frames.get(index).map(|f| FrameSize {
            width: f.image.width(),
            height: f.image.height(),
        })
    }

    fn frame_orientation(&self, _index: usize) -> FrameOrientation {
        FrameOrientation::Up
    }

    fn frame_duration(&self, index: usize) -> Duration {
        self.frames
            .get(index)
            .map(|f| f.duration)
            .unwrap_or(Duration::ZERO)
    }

    fn render_frame(&self, index: usize, max_pixel_size: Option<u32>) -> Result<RawImage> {
        let frame = self
            .frames
            .get(index)
            .ok_or_else(|| BridgeError::Decode(format!("no frame at index {index}")))?;

        let (width, height) = (frame.image.width(), frame.image.height());
        let max_dim = width.max(height);

        let scaled = match max_pixel_size {
            Some(max) if max > 0 && max_dim > max => {
                let new_width = (width * max / max_dim).max(1);
                let new_height = (height * max / max_dim).max(1);
                image::imageops::resize(&frame.image, new_width, new_height, FilterType::Triangle)
            }
            _ => frame.image.clone(),
        };

        Ok(RawImage {
            width: scaled.width(),
            height: scaled.height(),
            pixels: Bytes::from(scaled.into_raw()),
        })
    }

    fn container_type(&self) -> ContainerType {
        self.container
    }
}
