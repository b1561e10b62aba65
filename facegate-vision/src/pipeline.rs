use std::io;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageError};
use thiserror::Error;

use crate::face::Embedding;

/// Grid side used when nothing else is configured (32x32 = 1024 values).
pub const DEFAULT_GRID_SIZE: u32 = 32;

/// Rec. 601 luma weights for R, G, B. Enrollment and login must share them.
pub const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("image could not be decoded: {source}")]
    Decode {
        #[source]
        source: ImageError,
    },

    #[error("image has zero area ({width}x{height})")]
    ZeroArea { width: u32, height: u32 },

    #[error("failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    /// True for the outcomes that mean the input itself is not a usable image.
    pub fn is_invalid_image(&self) -> bool {
        matches!(self, ExtractError::Decode { .. } | ExtractError::ZeroArea { .. })
    }
}

/// Luminance of one RGB pixel scaled to `[0, 1]`.
pub fn luminance(rgb: [u8; 3]) -> f32 {
    let [r, g, b] = rgb;
    (LUMA_WEIGHTS[0] * r as f32 + LUMA_WEIGHTS[1] * g as f32 + LUMA_WEIGHTS[2] * b as f32) / 255.0
}

/// Grid-luminance extractor: resample → luma → flatten → L2 normalize.
#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
    grid_size: u32,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_SIZE)
    }
}

impl Pipeline {
    /// Pipeline producing `grid_size`² values per image.
    ///
    /// A `grid_size` of 0 is raised to 1, so a pipeline always yields at least
    /// one value. Configuration loading rejects 0 before it gets here.
    pub fn new(grid_size: u32) -> Self {
        Self {
            grid_size: grid_size.max(1),
        }
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Length of every vector this pipeline produces.
    pub fn dimension(&self) -> usize {
        let side = self.grid_size as usize;
        side * side
    }

    /// Process an image into a unit-norm embedding (zero vector for an all-black input).
    pub fn process_image(&self, img: &DynamicImage) -> Result<Embedding, ExtractError> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(ExtractError::ZeroArea { width, height });
        }

        let size = self.grid_size;
        let grid = img.resize_exact(size, size, FilterType::Triangle).to_rgb8();

        // ImageBuffer stores pixels row-major, which is the flattening order we want.
        let values: Vec<f32> = grid.pixels().map(|p| luminance(p.0)).collect();
        log::trace!(
            "extracted {} luminance values from {}x{} image",
            values.len(),
            width,
            height
        );

        Ok(Embedding::normalized(values))
    }

    /// Decode an encoded image buffer (PNG, JPEG, ...) and process it.
    pub fn extract_bytes(&self, bytes: &[u8]) -> Result<Embedding, ExtractError> {
        let img = image::load_from_memory(bytes).map_err(|source| ExtractError::Decode { source })?;
        self.process_image(&img)
    }

    pub fn extract_path(&self, path: &Path) -> Result<Embedding, ExtractError> {
        let bytes = std::fs::read(path).map_err(|source| ExtractError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.extract_bytes(&bytes)
    }
}
