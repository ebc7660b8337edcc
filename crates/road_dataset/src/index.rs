//! Indexing of KITTI road directories.

use crate::types::{DatasetResult, RoadDatasetError, RoadSample};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const IMAGE_SUBDIR: &str = "image_2";
pub const LABEL_SUBDIR: &str = "gt_image_2";

/// Lists `*.png` files directly under `dir`, sorted by file name.
pub fn list_pngs(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| RoadDatasetError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut out = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("png") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Maps a road label file name back to its image name:
/// `um_road_000000.png` -> `um_000000.png`. Lane labels are not road labels.
pub fn image_name_for_label(label_name: &str) -> Option<String> {
    if !label_name.contains("_road_") {
        return None;
    }
    Some(label_name.replacen("_road_", "_", 1))
}

/// Expected road label name for an image: `um_000000.png` -> `um_road_000000.png`.
pub fn label_name_for_image(image_name: &str) -> String {
    match image_name.split_once('_') {
        Some((category, rest)) => format!("{category}_road_{rest}"),
        None => format!("road_{image_name}"),
    }
}

/// Pairs every `image_2/*.png` under `dir` with its `gt_image_2/*_road_*.png`.
/// An image without a road label is an error.
pub fn index_training_dir(dir: &Path) -> DatasetResult<Vec<RoadSample>> {
    let images = list_pngs(&dir.join(IMAGE_SUBDIR))?;
    let label_dir = dir.join(LABEL_SUBDIR);
    let labels: HashMap<String, PathBuf> = list_pngs(&label_dir)?
        .into_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            Some((image_name_for_label(name)?, path))
        })
        .collect();

    let mut samples = Vec::with_capacity(images.len());
    for image in images {
        let Some(name) = image.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        match labels.get(name) {
            Some(label) => samples.push(RoadSample {
                image: image.clone(),
                label: label.clone(),
            }),
            None => {
                return Err(RoadDatasetError::MissingLabel {
                    expected: label_dir.join(label_name_for_image(name)),
                    image,
                })
            }
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_names_map_both_ways() {
        assert_eq!(
            image_name_for_label("um_road_000000.png").as_deref(),
            Some("um_000000.png")
        );
        assert_eq!(image_name_for_label("um_lane_000000.png"), None);
        assert_eq!(label_name_for_image("uu_000042.png"), "uu_road_000042.png");
    }

    #[test]
    fn index_pairs_images_with_road_labels() {
        let tmp = tempfile::tempdir().unwrap();
        let images = tmp.path().join(IMAGE_SUBDIR);
        let labels = tmp.path().join(LABEL_SUBDIR);
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();
        for name in ["um_000001.png", "umm_000000.png"] {
            fs::write(images.join(name), b"").unwrap();
        }
        for name in [
            "um_road_000001.png",
            "um_lane_000001.png",
            "umm_road_000000.png",
        ] {
            fs::write(labels.join(name), b"").unwrap();
        }
        let samples = index_training_dir(tmp.path()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].label, labels.join("um_road_000001.png"));
        assert_eq!(samples[1].label, labels.join("umm_road_000000.png"));
    }

    #[test]
    fn index_fails_on_missing_label() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join(IMAGE_SUBDIR)).unwrap();
        fs::create_dir_all(tmp.path().join(LABEL_SUBDIR)).unwrap();
        fs::write(tmp.path().join(IMAGE_SUBDIR).join("uu_000000.png"), b"").unwrap();
        let err = index_training_dir(tmp.path()).unwrap_err();
        assert!(matches!(err, RoadDatasetError::MissingLabel { .. }));
    }
}
