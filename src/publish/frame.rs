//! Raw image frames and their compressed encodings

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::path::Path;
use thiserror::Error;

/// Errors raised before an image publish reaches the transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("Frame has no pixels")]
    EmptyFrame,
    #[error("Pixel buffer has {actual} bytes, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },
    #[error("JPEG quality must be within 1..=100, got {0}")]
    InvalidQuality(u8),
    #[error("Encoder rejected frame: {0}")]
    Encoder(String),
    #[error("Could not read image: {0}")]
    Decode(String),
}

/// Memory layout of a frame's pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Gray8,
    Rgb8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::Rgb8 => 3,
        }
    }

    fn color_type(self) -> ExtendedColorType {
        match self {
            PixelLayout::Gray8 => ExtendedColorType::L8,
            PixelLayout::Rgb8 => ExtendedColorType::Rgb8,
        }
    }
}

/// Uncompressed, row-major image frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            layout,
            data,
        }
    }

    /// Load and decode an image file into an RGB frame
    pub fn load(path: &Path) -> Result<Self, EncodingError> {
        let rgb = image::open(path)
            .map_err(|e| EncodingError::Decode(e.to_string()))?
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Self::new(width, height, PixelLayout::Rgb8, rgb.into_raw()))
    }

    /// Check dimensions against the pixel buffer
    pub fn validate(&self) -> Result<(), EncodingError> {
        if self.width == 0 || self.height == 0 || self.data.is_empty() {
            return Err(EncodingError::EmptyFrame);
        }
        let expected = self.width as usize * self.height as usize * self.layout.channels();
        if self.data.len() != expected {
            return Err(EncodingError::BufferSizeMismatch {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

/// Compressed format used for image payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg { quality: u8 },
    Png,
}

impl Default for ImageFormat {
    fn default() -> Self {
        ImageFormat::Jpeg { quality: 90 }
    }
}

/// Encode `frame` into `format`, rejecting invalid frames before the codec runs
pub fn encode_frame(format: ImageFormat, frame: &Frame) -> Result<Vec<u8>, EncodingError> {
    frame.validate()?;

    let mut out = Vec::new();
    let encoded = match format {
        ImageFormat::Jpeg { quality } => {
            if !(1..=100).contains(&quality) {
                return Err(EncodingError::InvalidQuality(quality));
            }
            JpegEncoder::new_with_quality(&mut out, quality).write_image(
                &frame.data,
                frame.width,
                frame.height,
                frame.layout.color_type(),
            )
        }
        ImageFormat::Png => PngEncoder::new(&mut out).write_image(
            &frame.data,
            frame.width,
            frame.height,
            frame.layout.color_type(),
        ),
    };
    encoded.map_err(|e| EncodingError::Encoder(e.to_string()))?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let data = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
        Frame::new(width, height, PixelLayout::Rgb8, data)
    }

    #[test]
    fn test_empty_frame_rejected() {
        let frame = Frame::new(0, 0, PixelLayout::Rgb8, Vec::new());
        assert_eq!(frame.validate(), Err(EncodingError::EmptyFrame));
        assert_eq!(
            encode_frame(ImageFormat::default(), &frame),
            Err(EncodingError::EmptyFrame)
        );
    }

    #[test]
    fn test_zero_width_with_data_rejected() {
        let frame = Frame::new(0, 4, PixelLayout::Gray8, vec![0; 4]);
        assert_eq!(frame.validate(), Err(EncodingError::EmptyFrame));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let frame = Frame::new(4, 4, PixelLayout::Rgb8, vec![0; 47]);
        assert_eq!(
            frame.validate(),
            Err(EncodingError::BufferSizeMismatch {
                expected: 48,
                actual: 47
            })
        );
    }

    #[test]
    fn test_jpeg_encoding_produces_jpeg_magic() {
        let bytes = encode_frame(ImageFormat::Jpeg { quality: 80 }, &gradient(16, 8)).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_png_encoding_of_gray_frame() {
        let frame = Frame::new(8, 8, PixelLayout::Gray8, vec![128; 64]);
        let bytes = encode_frame(ImageFormat::Png, &frame).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn test_invalid_quality_rejected() {
        assert_eq!(
            encode_frame(ImageFormat::Jpeg { quality: 0 }, &gradient(2, 2)),
            Err(EncodingError::InvalidQuality(0))
        );
    }

    #[test]
    fn test_load_missing_file() {
        let result = Frame::load(Path::new("/nonexistent/frame.png"));
        assert!(matches!(result, Err(EncodingError::Decode(_))));
    }

    #[test]
    fn test_channels() {
        assert_eq!(PixelLayout::Gray8.channels(), 1);
        assert_eq!(PixelLayout::Rgb8.channels(), 3);
    }
}
