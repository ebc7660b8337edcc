//! Runs the segmenter over the KITTI testing split and writes road overlays.

use crate::overlay::{overlay_mask, road_mask, ROAD_OVERLAY};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use image::imageops::FilterType;
use image::RgbImage;
use models::Fcn8s;
use road_dataset::{list_pngs, rgb_to_chw, testing_dir, ImageShape, RoadDatasetError, IMAGE_SUBDIR};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Softmax probability above which a pixel is drawn as road.
pub const ROAD_THRESHOLD: f32 = 0.5;

/// Channel of the score map holding the road class.
const ROAD_CLASS: usize = 1;

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Dataset(#[from] RoadDatasetError),
    #[error("score map has {0} classes; a road channel needs at least 2")]
    NoRoadClass(usize),
    #[error("failed to read road probabilities: {0}")]
    Readback(String),
}

/// Per-pixel road probabilities (row-major, `H * W`) for one resized image.
pub fn road_probabilities<B: Backend>(
    model: &Fcn8s<B>,
    image: &RgbImage,
    device: &B::Device,
) -> ExportResult<Vec<f32>> {
    let (w, h) = image.dimensions();
    let (w, h) = (w as usize, h as usize);
    let input = Tensor::<B, 4>::from_data(TensorData::new(rgb_to_chw(image), [1, 3, h, w]), device);
    let scores = model.forward(input, 1.0);
    let classes = scores.dims()[1];
    if classes <= ROAD_CLASS {
        return Err(ExportError::NoRoadClass(classes));
    }
    softmax(scores, 1)
        .slice([0..1, ROAD_CLASS..ROAD_CLASS + 1, 0..h, 0..w])
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| ExportError::Readback(format!("{e:?}")))
}

/// Writes one overlay PNG per image in `images_dir` into `out_dir`, replacing
/// whatever `out_dir` held before. Returns the number of images written.
pub fn export_to_dir<B: Backend>(
    out_dir: &Path,
    images_dir: &Path,
    model: &Fcn8s<B>,
    shape: ImageShape,
    device: &B::Device,
) -> ExportResult<usize> {
    if out_dir.exists() {
        fs::remove_dir_all(out_dir).map_err(|source| ExportError::Io {
            path: out_dir.to_path_buf(),
            source,
        })?;
    }
    fs::create_dir_all(out_dir).map_err(|source| ExportError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let mut written = 0;
    for path in list_pngs(images_dir)? {
        let Some(name) = path.file_name() else { continue };
        let img = image::open(&path)
            .map_err(|source| ExportError::Image {
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        let img = image::imageops::resize(&img, shape.width, shape.height, FilterType::Triangle);
        let probs = road_probabilities(model, &img, device)?;
        let overlay = overlay_mask(&img, &road_mask(&probs, ROAD_THRESHOLD), ROAD_OVERLAY);
        let target = out_dir.join(name);
        overlay.save(&target).map_err(|source| ExportError::Image {
            path: target.clone(),
            source,
        })?;
        written += 1;
    }
    Ok(written)
}

/// Exports overlays for `data_dir/data_road/testing/image_2` into
/// `runs_dir/<unix seconds>/` and returns that directory.
pub fn save_inference_samples<B: Backend>(
    runs_dir: &Path,
    data_dir: &Path,
    model: &Fcn8s<B>,
    shape: ImageShape,
    device: &B::Device,
) -> ExportResult<PathBuf> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let out_dir = runs_dir.join(stamp.to_string());
    tracing::info!("Training Finished. Saving test images to: {}", out_dir.display());
    let images_dir = testing_dir(data_dir).join(IMAGE_SUBDIR);
    let written = export_to_dir(&out_dir, &images_dir, model, shape, device)?;
    tracing::info!("wrote {written} inference samples");
    Ok(out_dir)
}
