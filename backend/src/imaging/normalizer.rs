use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, Limits, RgbImage};
use sha2::{Digest, Sha256};
use std::io::Cursor;

/// Largest edge the decoder will allocate for. Anything bigger is rejected
/// before pixel data is read.
const DECODE_EDGE_LIMIT: u32 = 16_384;

#[derive(Debug, Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl RawImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Image is empty")]
    Empty,
    #[error("Image is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
    #[error("Unsupported MIME type: {0}")]
    UnsupportedMime(String),
    #[error("Image format {0} is not allowed")]
    UnsupportedFormat(String),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Image has degenerate dimensions {width}x{height}")]
    Degenerate { width: u32, height: u32 },
    #[error("Image {width}x{height} is smaller than {min}px")]
    TooSmall { width: u32, height: u32, min: u32 },
}

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    pub max_bytes: usize,
    pub allowed_formats: Vec<String>,
    pub max_width: u32,
    pub max_height: u32,
    pub min_dimension: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            allowed_formats: ["jpg", "jpeg", "png", "bmp", "webp"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            max_width: 1024,
            max_height: 1024,
            min_dimension: 32,
        }
    }
}

/// Decoded RGB8 image bounded by the configured maximum dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    image: RgbImage,
}

impl NormalizedImage {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width().to_le_bytes());
        hasher.update(self.height().to_le_bytes());
        hasher.update(self.pixels());
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    config: NormalizerConfig,
}

impl ImageNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn format_from_mime(mime_type: &str) -> Option<ImageFormat> {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/bmp" => Some(ImageFormat::Bmp),
            "image/webp" => Some(ImageFormat::WebP),
            "image/tiff" => Some(ImageFormat::Tiff),
            _ => None,
        }
    }

    fn is_allowed(&self, format: ImageFormat) -> bool {
        format
            .extensions_str()
            .iter()
            .any(|ext| self.config.allowed_formats.iter().any(|a| a == ext))
    }

    pub fn normalize(&self, raw: &RawImage) -> Result<NormalizedImage, ImageError> {
        if raw.bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        if raw.bytes.len() > self.config.max_bytes {
            return Err(ImageError::TooLarge {
                size: raw.bytes.len(),
                max: self.config.max_bytes,
            });
        }

        let declared = Self::format_from_mime(&raw.mime_type)
            .ok_or_else(|| ImageError::UnsupportedMime(raw.mime_type.clone()))?;
        if !self.is_allowed(declared) {
            return Err(ImageError::UnsupportedFormat(format!("{:?}", declared)));
        }

        let sniffed = image::guess_format(&raw.bytes)
            .map_err(|_| ImageError::Decode("unrecognized image data".to_string()))?;
        if !self.is_allowed(sniffed) {
            return Err(ImageError::UnsupportedFormat(format!("{:?}", sniffed)));
        }
        if sniffed != declared {
            log::debug!(
                "Declared {:?} but content is {:?}; decoding as content",
                declared,
                sniffed
            );
        }

        let mut limits = Limits::default();
        limits.max_image_width = Some(DECODE_EDGE_LIMIT);
        limits.max_image_height = Some(DECODE_EDGE_LIMIT);

        let mut reader = ImageReader::with_format(Cursor::new(raw.bytes.as_slice()), sniffed);
        reader.limits(limits);

        let mut decoder = reader
            .into_decoder()
            .map_err(|e| ImageError::Decode(e.to_string()))?;
        let (width, height) = decoder.dimensions();
        if width == 0 || height == 0 {
            return Err(ImageError::Degenerate { width, height });
        }
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

        let mut image =
            DynamicImage::from_decoder(decoder).map_err(|e| ImageError::Decode(e.to_string()))?;
        image.apply_orientation(orientation);

        let (width, height) = (image.width(), image.height());
        let min = self.config.min_dimension;
        if width < min || height < min {
            return Err(ImageError::TooSmall { width, height, min });
        }

        if width > self.config.max_width || height > self.config.max_height {
            image = image.resize(
                self.config.max_width,
                self.config.max_height,
                FilterType::Triangle,
            );
            log::debug!(
                "Resized {}x{} -> {}x{}",
                width,
                height,
                image.width(),
                image.height()
            );
        }

        Ok(NormalizedImage::from_rgb(image.to_rgb8()))
    }
}
