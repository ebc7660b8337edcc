//! KITTI road dataset utilities: directory indexing, presence checks, and
//! lazy burn batch generation for FCN training.

pub mod batch;
pub mod index;
pub mod types;
pub mod validation;

pub use batch::{
    encode_label, load_image_chw, load_label_onehot, rgb_to_chw, BatchConfig, BatchGenerator,
    BatchIter, RoadBatch,
};
pub use index::{index_training_dir, list_pngs, IMAGE_SUBDIR, LABEL_SUBDIR};
pub use types::*;
pub use validation::{check_kitti_dataset, testing_dir, training_dir, KittiSummary};
