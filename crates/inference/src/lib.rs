//! Inference helpers for the road segmenter: per-pixel road probabilities,
//! mask overlays, and export of annotated test images.

pub mod export;
pub mod overlay;

pub use export::{
    export_to_dir, road_probabilities, save_inference_samples, ExportError, ExportResult,
    ROAD_THRESHOLD,
};
pub use overlay::{blend_pixel, overlay_mask, road_mask, ROAD_OVERLAY};
