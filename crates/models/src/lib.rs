//! Burn modules for FCN-8s road segmentation.
//!
//! - `Vgg16`: pretrained feature extractor exposing the layer3/layer4/layer7 taps,
//!   plus the saved-backbone loader.
//! - `Fcn8sDecoder`: 1x1 score layers and transposed-conv upsampling with skip
//!   connections back to input resolution.
//! - `Fcn8s`: backbone and decoder bundled as one trainable module.
//!
//! These are pure modules; loss, optimizer and checkpoint wiring live in the
//! `training` crate.

pub mod fcn;
pub mod vgg;

pub use fcn::{Fcn8s, Fcn8sConfig, Fcn8sDecoder, Fcn8sDecoderConfig, InputShapeError, TOTAL_STRIDE};
pub use vgg::{
    dropout, load_vgg, save_vgg, BackboneError, BackboneResult, Vgg16, Vgg16Config, VggEndpoints,
    VGG_CONFIG_FILE, VGG_WEIGHTS_FILE,
};
