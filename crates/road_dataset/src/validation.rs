//! Presence checks run before any model is built.

use crate::index::{list_pngs, IMAGE_SUBDIR};
use crate::types::{
    DatasetResult, RoadDatasetError, KITTI_TESTING_IMAGES, KITTI_TRAINING_IMAGES,
};
use std::path::{Path, PathBuf};

pub const ROAD_SUBDIR: &str = "data_road";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KittiSummary {
    pub training_dir: PathBuf,
    pub testing_dir: PathBuf,
    pub training_images: usize,
    pub testing_images: usize,
}

pub fn training_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(ROAD_SUBDIR).join("training")
}

pub fn testing_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(ROAD_SUBDIR).join("testing")
}

/// Verifies `data_dir/data_road` holds a usable training split.
///
/// A missing dataset or an empty `training/image_2` is an error. A missing
/// testing split only disables inference export, so it is reported as zero
/// images. Counts that differ from the published release are logged.
pub fn check_kitti_dataset(data_dir: &Path) -> DatasetResult<KittiSummary> {
    let road = data_dir.join(ROAD_SUBDIR);
    if !road.is_dir() {
        return Err(RoadDatasetError::MissingDataset { path: road });
    }
    let training_dir = training_dir(data_dir);
    let train_images = training_dir.join(IMAGE_SUBDIR);
    if !train_images.is_dir() {
        return Err(RoadDatasetError::MissingDataset { path: train_images });
    }
    let training_images = list_pngs(&train_images)?.len();
    if training_images == 0 {
        return Err(RoadDatasetError::Empty { path: train_images });
    }

    let testing_dir = testing_dir(data_dir);
    let test_images = testing_dir.join(IMAGE_SUBDIR);
    let testing_images = if test_images.is_dir() {
        list_pngs(&test_images)?.len()
    } else {
        tracing::warn!("no testing images at {}", test_images.display());
        0
    };

    if training_images != KITTI_TRAINING_IMAGES || testing_images != KITTI_TESTING_IMAGES {
        tracing::warn!(
            "dataset has {training_images} training / {testing_images} testing images; \
             the KITTI road release has {KITTI_TRAINING_IMAGES} / {KITTI_TESTING_IMAGES}"
        );
    }

    Ok(KittiSummary {
        training_dir,
        testing_dir,
        training_images,
        testing_images,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_dataset_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = check_kitti_dataset(tmp.path()).unwrap_err();
        assert!(matches!(err, RoadDatasetError::MissingDataset { .. }));
    }

    #[test]
    fn empty_training_split_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(training_dir(tmp.path()).join(IMAGE_SUBDIR)).unwrap();
        let err = check_kitti_dataset(tmp.path()).unwrap_err();
        assert!(matches!(err, RoadDatasetError::Empty { .. }));
    }

    #[test]
    fn counts_training_and_testing_images() {
        let tmp = tempfile::tempdir().unwrap();
        let train = training_dir(tmp.path()).join(IMAGE_SUBDIR);
        let test = testing_dir(tmp.path()).join(IMAGE_SUBDIR);
        fs::create_dir_all(&train).unwrap();
        fs::create_dir_all(&test).unwrap();
        fs::write(train.join("um_000000.png"), b"").unwrap();
        fs::write(test.join("um_000000.png"), b"").unwrap();
        fs::write(test.join("um_000001.png"), b"").unwrap();
        let summary = check_kitti_dataset(tmp.path()).unwrap();
        assert_eq!(summary.training_images, 1);
        assert_eq!(summary.testing_images, 2);
    }
}
