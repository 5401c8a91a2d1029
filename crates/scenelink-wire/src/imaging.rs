//! Decoding of rendered images pushed back by the render server
//!
//! Every payload ends up as a normalized f32 RGBA buffer. The current frame
//! lives behind a mutex that is only held for the final swap or bucket
//! paste; consumers get deep copies.

use std::sync::{Mutex, MutexGuard};

use image::ImageFormat;
use thiserror::Error;
use tracing::{debug, warn};

use crate::messages::{ImageEncoding, ImageMessage};

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("JPEG decode failed: {0}")]
    Jpeg(#[from] image::ImageError),
    #[error("Raw payload is {actual} bytes, expected {expected}")]
    RawLength { expected: usize, actual: usize },
    #[error("Image has zero size")]
    Empty,
}

/// Decoded RGBA image, 4 floats per pixel, rows top to bottom
#[derive(Debug, Clone, PartialEq)]
pub struct RenderImage {
    width: u32,
    height: u32,
    pixels: Vec<f32>,
}

impl RenderImage {
    /// Transparent black image
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0.0; width as usize * height as usize * 4],
        }
    }

    pub fn from_pixels(width: u32, height: u32, pixels: Vec<f32>) -> Result<Self, ImageError> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(ImageError::RawLength {
                expected: expected * 4,
                actual: pixels.len() * 4,
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    /// Copy `src` into this image at `(x, y)`, clipped to the bounds
    ///
    /// Returns whether any pixel was written.
    pub fn paste(&mut self, x: u32, y: u32, src: &RenderImage) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let cols = src.width.min(self.width - x) as usize;
        let rows = src.height.min(self.height - y) as usize;
        if cols == 0 || rows == 0 {
            return false;
        }

        let dst_stride = self.width as usize * 4;
        let src_stride = src.width as usize * 4;
        for row in 0..rows {
            let dst_start = (y as usize + row) * dst_stride + x as usize * 4;
            let src_start = row * src_stride;
            self.pixels[dst_start..dst_start + cols * 4]
                .copy_from_slice(&src.pixels[src_start..src_start + cols * 4]);
        }
        true
    }
}

/// Decode an image payload into a float buffer
pub fn decode(msg: &ImageMessage) -> Result<RenderImage, ImageError> {
    match msg.encoding {
        ImageEncoding::Jpeg => {
            let rgba = image::load_from_memory_with_format(&msg.data, ImageFormat::Jpeg)?.to_rgba8();
            let (width, height) = rgba.dimensions();
            if width == 0 || height == 0 {
                return Err(ImageError::Empty);
            }
            if (width, height) != (msg.width, msg.height) {
                debug!(width, height, "JPEG size differs from message header");
            }
            let pixels = rgba.as_raw().iter().map(|&c| c as f32 / 255.0).collect();
            RenderImage::from_pixels(width, height, pixels)
        }
        ImageEncoding::RgbaReal => {
            if msg.width == 0 || msg.height == 0 {
                return Err(ImageError::Empty);
            }
            let expected = msg.width as usize * msg.height as usize * 16;
            if msg.data.len() != expected {
                return Err(ImageError::RawLength {
                    expected,
                    actual: msg.data.len(),
                });
            }
            let pixels = msg
                .data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            RenderImage::from_pixels(msg.width, msg.height, pixels)
        }
    }
}

struct Frame {
    image: Option<RenderImage>,
    width: u32,
    height: u32,
    generation: u64,
}

/// Holder of the most recent rendered frame
pub struct ImagePipeline {
    frame: Mutex<Frame>,
}

impl ImagePipeline {
    /// Pipeline whose buckets land in a `width` x `height` frame
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: Mutex::new(Frame {
                image: None,
                width,
                height,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Frame> {
        self.frame.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply an inbound image; failures are logged and the previous image kept
    ///
    /// Returns whether the current image changed.
    pub fn on_image(&self, msg: &ImageMessage) -> bool {
        let decoded = match decode(msg) {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, encoding = ?msg.encoding, "Failed to decode image");
                return false;
            }
        };

        let mut frame = self.lock();
        if msg.bucket {
            let (width, height) = (frame.width, frame.height);
            let target = frame
                .image
                .get_or_insert_with(|| RenderImage::new(width, height));
            if !target.paste(msg.x, msg.y, &decoded) {
                debug!(x = msg.x, y = msg.y, "Bucket outside the frame");
                return false;
            }
        } else {
            frame.image = Some(decoded);
        }
        frame.generation += 1;
        true
    }

    /// Deep copy of the current image
    pub fn latest_image(&self) -> Option<RenderImage> {
        self.lock().image.clone()
    }

    /// Change the frame size; an image of a different size is dropped
    pub fn set_frame_size(&self, width: u32, height: u32) {
        let mut frame = self.lock();
        frame.width = width;
        frame.height = height;
        let stale = frame
            .image
            .as_ref()
            .is_some_and(|image| (image.width, image.height) != (width, height));
        if stale {
            frame.image = None;
            frame.generation += 1;
        }
    }

    pub fn frame_size(&self) -> (u32, u32) {
        let frame = self.lock();
        (frame.width, frame.height)
    }

    /// Counter bumped on every image change
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn clear(&self) {
        let mut frame = self.lock();
        if frame.image.take().is_some() {
            frame.generation += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let raw: Vec<u8> = (0..width * height).flat_map(|_| rgb).collect();
        let mut bytes = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut bytes);
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, 100);
        encoder
            .encode(&raw, width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        bytes
    }

    #[test]
    fn test_raw_roundtrip_is_bit_exact() {
        let pixels = vec![
            0.0, -0.0, 1.5, f32::MAX, //
            0.1, 0.2, 0.3, 1.0, //
            f32::MIN_POSITIVE, 7.25, -3.0, 0.5, //
            1e-20, 2.0, 4.0, 8.0,
        ];
        let pipeline = ImagePipeline::new(2, 2);
        assert!(pipeline.on_image(&ImageMessage::rgba_real(2, 2, &pixels)));

        let image = pipeline.latest_image().unwrap();
        assert_eq!((image.width(), image.height()), (2, 2));
        let got: Vec<u32> = image.pixels().iter().map(|p| p.to_bits()).collect();
        let want: Vec<u32> = pixels.iter().map(|p| p.to_bits()).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn test_disjoint_buckets_composite() {
        let pipeline = ImagePipeline::new(4, 2);
        let left = [1.0f32; 2 * 2 * 4];
        let right = [0.5f32; 2 * 2 * 4];
        assert!(pipeline.on_image(&ImageMessage::rgba_bucket(0, 0, 2, 2, &left)));
        assert!(pipeline.on_image(&ImageMessage::rgba_bucket(2, 0, 2, 2, &right)));

        let image = pipeline.latest_image().unwrap();
        assert_eq!((image.width(), image.height()), (4, 2));
        for y in 0..2 {
            assert_eq!(image.pixel(0, y), Some([1.0; 4]));
            assert_eq!(image.pixel(1, y), Some([1.0; 4]));
            assert_eq!(image.pixel(2, y), Some([0.5; 4]));
            assert_eq!(image.pixel(3, y), Some([0.5; 4]));
        }
        assert_eq!(pipeline.generation(), 2);
    }

    #[test]
    fn test_bucket_clipped_to_frame() {
        let pipeline = ImagePipeline::new(3, 3);
        let bucket = [2.0f32; 2 * 2 * 4];
        assert!(pipeline.on_image(&ImageMessage::rgba_bucket(2, 2, 2, 2, &bucket)));
        let image = pipeline.latest_image().unwrap();
        assert_eq!(image.pixel(2, 2), Some([2.0; 4]));
        assert_eq!(image.pixel(1, 1), Some([0.0; 4]));

        assert!(!pipeline.on_image(&ImageMessage::rgba_bucket(5, 0, 2, 2, &bucket)));
        assert_eq!(pipeline.generation(), 1);
    }

    #[test]
    fn test_malformed_payload_keeps_previous_image() {
        let pipeline = ImagePipeline::new(1, 1);
        assert!(pipeline.on_image(&ImageMessage::rgba_real(1, 1, &[0.25; 4])));
        let before = pipeline.latest_image();

        assert!(!pipeline.on_image(&ImageMessage::jpeg(1, 1, vec![0xff, 0xd8, 0x00, 0x01])));
        let mut short = ImageMessage::rgba_real(1, 1, &[0.25; 4]);
        short.data.truncate(10);
        assert!(!pipeline.on_image(&short));

        assert_eq!(pipeline.latest_image(), before);
        assert_eq!(pipeline.generation(), 1);
    }

    #[test]
    fn test_jpeg_decodes_to_normalized_floats() {
        let pipeline = ImagePipeline::new(8, 8);
        assert!(pipeline.on_image(&ImageMessage::jpeg(8, 8, jpeg_bytes(8, 8, [255, 255, 255]))));

        let image = pipeline.latest_image().unwrap();
        assert_eq!((image.width(), image.height()), (8, 8));
        let [r, g, b, a] = image.pixel(4, 4).unwrap();
        for c in [r, g, b] {
            assert!((c - 1.0).abs() < 0.02, "channel {c}");
        }
        assert_eq!(a, 1.0);
    }

    #[test]
    fn test_resize_and_clear() {
        let pipeline = ImagePipeline::new(1, 1);
        pipeline.on_image(&ImageMessage::rgba_real(1, 1, &[1.0; 4]));

        pipeline.set_frame_size(1, 1);
        assert!(pipeline.latest_image().is_some());

        pipeline.set_frame_size(2, 2);
        assert_eq!(pipeline.frame_size(), (2, 2));
        assert!(pipeline.latest_image().is_none());

        pipeline.on_image(&ImageMessage::rgba_real(2, 2, &[1.0; 16]));
        let generation = pipeline.generation();
        pipeline.clear();
        assert!(pipeline.latest_image().is_none());
        assert_eq!(pipeline.generation(), generation + 1);
    }
}
