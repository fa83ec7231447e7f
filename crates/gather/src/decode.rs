//! Image decoding seam.
//!
//! The engine never decodes pixels itself; it hands a path to an
//! [`ImageDecoder`]. The default decoder uses the `image` crate.

use image::{DynamicImage, ImageReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a single gather attempt produced no pixels.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Path does not exist or is not a regular file.
    #[error("file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    /// Filesystem metadata could not be read (e.g. permission denied).
    #[error("failed to read metadata for {}: {source}", .path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file could not be opened or read.
    #[error("failed to open {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was read but is not a decodable image.
    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl LoadError {
    /// Short human-readable text stored in the record's `error` slot.
    pub fn message(&self) -> String {
        match self {
            LoadError::NotFound { .. } => "file not found".to_string(),
            LoadError::Metadata { source, .. } => format!("failed to read metadata: {}", source),
            LoadError::Io { source, .. } => format!("failed to open image: {}", source),
            LoadError::Decode { source, .. } => format!("failed to decode image: {}", source),
        }
    }

    /// Path the failure relates to.
    pub fn path(&self) -> &Path {
        match self {
            LoadError::NotFound { path }
            | LoadError::Metadata { path, .. }
            | LoadError::Io { path, .. }
            | LoadError::Decode { path, .. } => path,
        }
    }
}

/// Turns a path into a decoded pixel buffer.
///
/// Implementations must release file handles before returning.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<DynamicImage, LoadError>;
}

/// Decoder backed by the `image` crate.
///
/// The format is sniffed from the file contents, falling back to the extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageDecoder;

impl ImageDecoder for FsImageDecoder {
    fn decode(&self, path: &Path) -> Result<DynamicImage, LoadError> {
        let io_err = |source: std::io::Error| LoadError::Io {
            path: path.to_path_buf(),
            source,
        };

        let reader = ImageReader::open(path)
            .map_err(io_err)?
            .with_guessed_format()
            .map_err(io_err)?;

        reader.decode().map_err(|source| LoadError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }
}
