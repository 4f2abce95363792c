//! Raw RGBA pixel buffers and their data URL encoding

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

/// Prefix of every data URL produced by [`RawImageData::to_data_url`]
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Errors converting between pixel buffers and encoded images
#[derive(Debug, Error)]
pub enum ImageDataError {
    #[error("pixel buffer has {actual} bytes, expected {expected} for {width}x{height}")]
    LengthMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported channel count {0}")]
    UnsupportedChannels(usize),

    #[error("not a base64 PNG data URL")]
    InvalidDataUrl,

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PNG encode failed: {0}")]
    Encode(#[from] png::EncodingError),

    #[error("PNG decode failed: {0}")]
    Decode(#[from] png::DecodingError),
}

/// An RGBA8 image held in memory
#[derive(Clone, PartialEq, Eq)]
pub struct RawImageData {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for RawImageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawImageData")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl RawImageData {
    /// Wrap an RGBA8 buffer, checking its length against the dimensions
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ImageDataError> {
        Self::from_channels(width, height, 4, data)
    }

    /// Build from a buffer with 1 to 4 interleaved channels
    ///
    /// Gray becomes RGB, a missing alpha channel is filled with 255 and two
    /// channels are read as red/green.
    pub fn from_channels(
        width: u32,
        height: u32,
        channels: usize,
        data: Vec<u8>,
    ) -> Result<Self, ImageDataError> {
        if !(1..=4).contains(&channels) {
            return Err(ImageDataError::UnsupportedChannels(channels));
        }

        let pixels = width as usize * height as usize;
        let expected = pixels * channels;
        if data.len() != expected {
            return Err(ImageDataError::LengthMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }

        let data = match channels {
            4 => data,
            1 => data.iter().flat_map(|&v| [v, v, v, 255]).collect(),
            2 => data
                .chunks_exact(2)
                .flat_map(|px| [px[0], px[1], 0, 255])
                .collect(),
            _ => data
                .chunks_exact(3)
                .flat_map(|px| [px[0], px[1], px[2], 255])
                .collect(),
        };

        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Encode as PNG
    pub fn to_png(&self) -> Result<Vec<u8>, ImageDataError> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.data)?;
            writer.finish()?;
        }
        Ok(out)
    }

    /// Encode as a self-contained `data:image/png;base64,...` string
    pub fn to_data_url(&self) -> Result<String, ImageDataError> {
        let png = self.to_png()?;
        Ok(format!("{}{}", PNG_DATA_URL_PREFIX, BASE64.encode(png)))
    }

    /// Decode PNG bytes of any color type into RGBA8
    pub fn from_png(bytes: &[u8]) -> Result<Self, ImageDataError> {
        let mut decoder = png::Decoder::new(Cursor::new(bytes));
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder.read_info()?;

        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf)?;
        buf.truncate(info.buffer_size());

        let channels = match info.color_type {
            png::ColorType::Grayscale => 1,
            png::ColorType::GrayscaleAlpha => {
                // Gray+alpha would otherwise be read as red/green
                let rgba = buf
                    .chunks_exact(2)
                    .flat_map(|px| [px[0], px[0], px[0], px[1]])
                    .collect();
                return Self::new(info.width, info.height, rgba);
            }
            png::ColorType::Rgb => 3,
            png::ColorType::Rgba => 4,
            png::ColorType::Indexed => return Err(ImageDataError::UnsupportedChannels(1)),
        };

        Self::from_channels(info.width, info.height, channels, buf)
    }

    /// Decode a `data:image/png;base64,...` string
    pub fn from_data_url(url: &str) -> Result<Self, ImageDataError> {
        let payload = url
            .strip_prefix(PNG_DATA_URL_PREFIX)
            .ok_or(ImageDataError::InvalidDataUrl)?;
        let bytes = BASE64.decode(payload.trim())?;
        Self::from_png(&bytes)
    }
}
