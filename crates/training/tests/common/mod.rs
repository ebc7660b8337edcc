#![allow(dead_code)]

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use image::{Rgb, RgbImage};
use models::{save_vgg, Fcn8sConfig, Vgg16Config};
use road_dataset::{
    testing_dir, training_dir, ImageShape, RoadBatch, BACKGROUND_COLOR, IMAGE_SUBDIR,
    LABEL_SUBDIR,
};
use std::fs;
use std::path::Path;

pub type B = Autodiff<NdArray<f32>>;

pub fn slim_vgg() -> Vgg16Config {
    Vgg16Config::new()
        .with_block_channels([4, 4, 8, 8, 8])
        .with_fc_channels(16)
}

pub fn slim_cfg() -> Fcn8sConfig {
    Fcn8sConfig::new(slim_vgg())
}

fn scene(w: u32, h: u32, tint: u8) -> RgbImage {
    RgbImage::from_fn(w, h, |_, y| {
        if y >= h / 2 {
            Rgb([90, 90, 90])
        } else {
            Rgb([30, 120, 200u8.saturating_sub(tint)])
        }
    })
}

fn road_label(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |_, y| {
        if y >= h / 2 {
            Rgb([255, 0, 255])
        } else {
            Rgb(BACKGROUND_COLOR)
        }
    })
}

/// Lays out `data_road/{training,testing}` with images whose lower half is road.
pub fn synthetic_kitti(data_dir: &Path, train: usize, test: usize, w: u32, h: u32) {
    let train_dir = training_dir(data_dir);
    fs::create_dir_all(train_dir.join(IMAGE_SUBDIR)).unwrap();
    fs::create_dir_all(train_dir.join(LABEL_SUBDIR)).unwrap();
    for i in 0..train {
        scene(w, h, i as u8 * 10)
            .save(train_dir.join(IMAGE_SUBDIR).join(format!("um_{i:06}.png")))
            .unwrap();
        road_label(w, h)
            .save(train_dir.join(LABEL_SUBDIR).join(format!("um_road_{i:06}.png")))
            .unwrap();
    }
    let test_dir = testing_dir(data_dir).join(IMAGE_SUBDIR);
    fs::create_dir_all(&test_dir).unwrap();
    for i in 0..test {
        scene(w, h, 5)
            .save(test_dir.join(format!("uu_{i:06}.png")))
            .unwrap();
    }
}

/// Saves a freshly initialized slim backbone where the pipeline looks for it.
pub fn install_backbone(data_dir: &Path) {
    let vgg = slim_vgg();
    save_vgg(vgg.init::<NdArray<f32>>(&Default::default()), &vgg, &data_dir.join("vgg")).unwrap();
}

/// In-memory batch of `n` road scenes at `shape`.
pub fn road_batch(n: usize, shape: ImageShape) -> RoadBatch<B> {
    let (w, h) = (shape.width, shape.height);
    let mut images = Vec::new();
    let mut labels = Vec::new();
    for i in 0..n {
        images.extend(road_dataset::rgb_to_chw(&scene(w, h, i as u8 * 10)));
        labels.extend(road_dataset::encode_label(&road_label(w, h)));
    }
    RoadBatch::from_buffers(images, labels, n, shape, &Default::default()).unwrap()
}
