//! Upload validation. Nothing about an upload is trusted until it has been
//! fully decoded.

use crate::error::ValidationError;
use bytes::Bytes;
use image::{ImageError, ImageReader, Limits};
use serde::Serialize;
use std::io::Cursor;
use techblog_core::{ImageFormat, UploadLimits};
use tracing::debug;

/// Worst case bytes per pixel a decoder allocates (16 bit RGBA).
const BYTES_PER_PIXEL: u64 = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DecodedImage {
    /// The upload exactly as received.
    #[serde(skip)]
    pub bytes: Bytes,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

fn core_format(format: image::ImageFormat) -> ImageFormat {
    match format {
        image::ImageFormat::Jpeg => ImageFormat::Jpeg,
        image::ImageFormat::Png => ImageFormat::Png,
        image::ImageFormat::Gif => ImageFormat::Gif,
        image::ImageFormat::WebP => ImageFormat::Webp,
        image::ImageFormat::Bmp => ImageFormat::Bmp,
        image::ImageFormat::Tiff => ImageFormat::Tiff,
        image::ImageFormat::Ico => ImageFormat::Ico,
        image::ImageFormat::Avif => ImageFormat::Avif,
        _ => ImageFormat::Other,
    }
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, ValidationError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|_| ValidationError::NotAnImage)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageValidator {
    limits: UploadLimits,
}

impl ImageValidator {
    pub fn new(limits: UploadLimits) -> Self {
        ImageValidator { limits }
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    fn decode_limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_alloc = Some(self.limits.max_pixels.saturating_mul(BYTES_PER_PIXEL));
        limits
    }

    fn unsupported(&self, format: ImageFormat) -> ValidationError {
        ValidationError::UnsupportedFormat {
            format,
            allowed: self.limits.allowed_formats_display(),
        }
    }

    /// Decodes every pixel under `limits`. An allocation refused by the
    /// decoder counts as too many pixels, anything else as a broken file.
    fn full_decode(&self, bytes: &[u8], width: u32, height: u32, limits: Limits) -> Result<(), ValidationError> {
        let mut full = reader(bytes)?;
        full.limits(limits);
        match full.decode() {
            Ok(_) => Ok(()),
            Err(ImageError::Limits(why)) => {
                debug!(%why, "decoder hit allocation limit");
                Err(ValidationError::OversizedPixels {
                    width,
                    height,
                    max: self.limits.max_pixels,
                })
            }
            Err(why) => {
                debug!(%why, "upload failed to decode");
                Err(ValidationError::NotAnImage)
            }
        }
    }

    pub fn validate(&self, bytes: impl Into<Bytes>) -> Result<DecodedImage, ValidationError> {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        if size > self.limits.max_bytes {
            debug!(size, max = self.limits.max_bytes, "upload over byte limit");
            return Err(ValidationError::OversizedBytes {
                size,
                max: self.limits.max_bytes,
            });
        }

        let mut header = reader(&bytes)?;
        // the header read allocates nothing; limits apply to the full decode
        header.no_limits();
        let format = header
            .format()
            .map(core_format)
            .ok_or(ValidationError::NotAnImage)?;
        let allowed = self.limits.allowed_formats.contains(&format);
        let (width, height) = match header.into_dimensions() {
            Ok(dimensions) => dimensions,
            // recognised, but no decoder for it in this build
            Err(ImageError::Unsupported(_)) if !allowed => return Err(self.unsupported(format)),
            Err(_) => return Err(ValidationError::NotAnImage),
        };

        if !allowed {
            debug!(%format, "upload format not allowed");
            return Err(self.unsupported(format));
        }
        let pixels = u64::from(width) * u64::from(height);
        if pixels > self.limits.max_pixels {
            debug!(width, height, "upload over pixel limit");
            return Err(ValidationError::OversizedPixels {
                width,
                height,
                max: self.limits.max_pixels,
            });
        }

        self.full_decode(&bytes, width, height, self.decode_limits())?;

        Ok(DecodedImage {
            bytes,
            format,
            width,
            height,
        })
    }
}

pub fn validate(bytes: impl Into<Bytes>, limits: &UploadLimits) -> Result<DecodedImage, ValidationError> {
    ImageValidator::new(limits.clone()).validate(bytes)
}
