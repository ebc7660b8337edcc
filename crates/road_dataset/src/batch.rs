//! Lazy, per-epoch batch iteration over road samples.

use crate::index::index_training_dir;
use crate::types::{
    DatasetResult, ImageShape, RoadDatasetError, RoadSample, BACKGROUND_COLOR, NUM_CLASSES,
};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use image::imageops::FilterType;
use image::RgbImage;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};

/// One mini-batch. Images are `[batch, 3, H, W]` in `[0, 1]`; labels are one-hot
/// `[batch, 2, H, W]` (background, road).
#[derive(Debug, Clone)]
pub struct RoadBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 4>,
}

impl<B: Backend> RoadBatch<B> {
    /// Assembles a batch from CHW buffers laid out sample after sample.
    pub fn from_buffers(
        images: Vec<f32>,
        labels: Vec<f32>,
        batch: usize,
        shape: ImageShape,
        device: &B::Device,
    ) -> DatasetResult<Self> {
        let (h, w) = (shape.height as usize, shape.width as usize);
        if images.len() != batch * 3 * h * w {
            return Err(RoadDatasetError::Other(format!(
                "image buffer holds {} values, expected {}",
                images.len(),
                batch * 3 * h * w
            )));
        }
        if labels.len() != batch * NUM_CLASSES * h * w {
            return Err(RoadDatasetError::Other(format!(
                "label buffer holds {} values, expected {}",
                labels.len(),
                batch * NUM_CLASSES * h * w
            )));
        }
        let images = Tensor::<B, 4>::from_data(TensorData::new(images, [batch, 3, h, w]), device);
        let labels = Tensor::<B, 4>::from_data(
            TensorData::new(labels, [batch, NUM_CLASSES, h, w]),
            device,
        );
        Ok(Self { images, labels })
    }

    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub image_shape: ImageShape,
    /// Reshuffle sample order at the start of every epoch.
    pub shuffle: bool,
    /// Seed for reproducible shuffling; each epoch derives its own stream.
    pub seed: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            image_shape: ImageShape::default(),
            shuffle: true,
            seed: None,
        }
    }
}

/// Produces one [`BatchIter`] per epoch over a fixed sample list.
#[derive(Debug, Clone)]
pub struct BatchGenerator {
    samples: Vec<RoadSample>,
    cfg: BatchConfig,
}

impl BatchGenerator {
    pub fn new(samples: Vec<RoadSample>, cfg: BatchConfig) -> Self {
        Self { samples, cfg }
    }

    /// Indexes a KITTI `training` directory (`image_2` + `gt_image_2`).
    pub fn from_dir(dir: &Path, cfg: BatchConfig) -> DatasetResult<Self> {
        let samples = index_training_dir(dir)?;
        if samples.is_empty() {
            return Err(RoadDatasetError::Empty {
                path: dir.to_path_buf(),
            });
        }
        tracing::info!("indexed {} road samples under {}", samples.len(), dir.display());
        Ok(Self::new(samples, cfg))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn image_shape(&self) -> ImageShape {
        self.cfg.image_shape
    }

    pub fn batches_per_epoch(&self, batch_size: usize) -> usize {
        self.samples.len().div_ceil(batch_size.max(1))
    }

    /// Starts a fresh pass over the samples. Nothing is decoded until
    /// [`BatchIter::next_batch`] is called.
    pub fn epoch(&self, epoch: usize) -> BatchIter {
        let mut samples = self.samples.clone();
        if self.cfg.shuffle {
            let mut rng = match self.cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(epoch as u64)),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            samples.shuffle(&mut rng);
        }
        BatchIter {
            samples,
            cursor: 0,
            shape: self.cfg.image_shape,
            processed_batches: 0,
            total_load_time: Duration::ZERO,
        }
    }
}

pub struct BatchIter {
    samples: Vec<RoadSample>,
    cursor: usize,
    shape: ImageShape,
    processed_batches: usize,
    total_load_time: Duration,
}

impl BatchIter {
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.cursor
    }

    /// Decodes the next `batch_size` samples (fewer for the final batch) in
    /// parallel. Returns `Ok(None)` once the epoch is exhausted.
    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<RoadBatch<B>>> {
        if self.cursor >= self.samples.len() {
            if self.processed_batches > 0 {
                tracing::debug!(
                    "[dataset] epoch done: batches={} avg_load_ms={:.2}",
                    self.processed_batches,
                    self.total_load_time.as_secs_f64() * 1000.0 / self.processed_batches as f64
                );
            }
            return Ok(None);
        }
        let end = (self.cursor + batch_size.max(1)).min(self.samples.len());
        let slice = &self.samples[self.cursor..end];
        self.cursor = end;

        let t_load = Instant::now();
        let shape = self.shape;
        let loaded: Vec<(Vec<f32>, Vec<f32>)> = slice
            .par_iter()
            .map(|s| -> DatasetResult<(Vec<f32>, Vec<f32>)> {
                Ok((
                    load_image_chw(&s.image, shape)?,
                    load_label_onehot(&s.label, shape)?,
                ))
            })
            .collect::<DatasetResult<_>>()?;
        self.total_load_time += t_load.elapsed();
        self.processed_batches += 1;

        let batch = loaded.len();
        let mut images = Vec::with_capacity(batch * 3 * shape.pixels());
        let mut labels = Vec::with_capacity(batch * NUM_CLASSES * shape.pixels());
        for (img, lbl) in loaded {
            images.extend_from_slice(&img);
            labels.extend_from_slice(&lbl);
        }
        RoadBatch::from_buffers(images, labels, batch, shape, device).map(Some)
    }
}

fn open_rgb(path: &Path) -> DatasetResult<RgbImage> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| RoadDatasetError::Image {
            path: path.to_path_buf(),
            source,
        })
}

fn resize_to(img: RgbImage, shape: ImageShape, filter: FilterType) -> RgbImage {
    if img.dimensions() == (shape.width, shape.height) {
        img
    } else {
        image::imageops::resize(&img, shape.width, shape.height, filter)
    }
}

/// Reads an RGB image, resizes it to `shape`, and returns CHW floats in `[0, 1]`.
pub fn load_image_chw(path: &Path, shape: ImageShape) -> DatasetResult<Vec<f32>> {
    let img = resize_to(open_rgb(path)?, shape, FilterType::Triangle);
    Ok(rgb_to_chw(&img))
}

pub fn rgb_to_chw(img: &RgbImage) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let mut out = Vec::with_capacity(3 * (w * h) as usize);
    for c in 0..3 {
        for y in 0..h {
            for x in 0..w {
                out.push(img.get_pixel(x, y)[c] as f32 / 255.0);
            }
        }
    }
    out
}

/// Reads a ground-truth image, resizes it with nearest-neighbour so colours stay
/// exact, and returns the one-hot `[2, H, W]` encoding.
pub fn load_label_onehot(path: &Path, shape: ImageShape) -> DatasetResult<Vec<f32>> {
    let img = resize_to(open_rgb(path)?, shape, FilterType::Nearest);
    Ok(encode_label(&img))
}

/// Channel 0 marks background pixels, channel 1 marks everything else.
pub fn encode_label(img: &RgbImage) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut out = vec![0.0f32; NUM_CLASSES * plane];
    for (i, p) in img.pixels().enumerate() {
        let background = p.0 == BACKGROUND_COLOR;
        out[i] = if background { 1.0 } else { 0.0 };
        out[plane + i] = if background { 0.0 } else { 1.0 };
    }
    out
}
