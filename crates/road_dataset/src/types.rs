//! Core types and error definitions for road_dataset.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, RoadDatasetError>;

/// Ground-truth pixels of exactly this colour are background (class 0);
/// everything else is road (class 1).
pub const BACKGROUND_COLOR: [u8; 3] = [255, 0, 0];

/// Number of label classes produced by the KITTI road encoding.
pub const NUM_CLASSES: usize = 2;

/// Sample counts of the published KITTI road release.
pub const KITTI_TRAINING_IMAGES: usize = 289;
pub const KITTI_TESTING_IMAGES: usize = 290;

#[derive(Debug, Error)]
pub enum RoadDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no road label for {image} (expected {expected})")]
    MissingLabel { image: PathBuf, expected: PathBuf },
    #[error("dataset not found at {path}; download the KITTI road dataset into it")]
    MissingDataset { path: PathBuf },
    #[error("no images found under {path}")]
    Empty { path: PathBuf },
    #[error("{0}")]
    Other(String),
}

/// Target `(height, width)` every image and label is resized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: u32,
    pub width: u32,
}

impl ImageShape {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    pub fn pixels(&self) -> usize {
        self.height as usize * self.width as usize
    }
}

impl Default for ImageShape {
    fn default() -> Self {
        Self::new(160, 576)
    }
}

/// One training pair: camera image and its `*_road_*` ground truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoadSample {
    pub image: PathBuf,
    pub label: PathBuf,
}
