//! VGG16 feature extractor exposing the three activations FCN-8s taps.
//!
//! A saved backbone is a directory with two files:
//! - `vgg16.json`: the [`Vgg16Config`] used to build the module.
//! - `vgg16.bin`: the full-precision parameter record.

use std::path::{Path, PathBuf};

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};
use thiserror::Error;

pub const VGG_CONFIG_FILE: &str = "vgg16.json";
pub const VGG_WEIGHTS_FILE: &str = "vgg16.bin";

/// Number of 3x3 convolutions in each of the five VGG16 blocks.
const CONVS_PER_BLOCK: [usize; 5] = [2, 2, 3, 3, 3];

pub type BackboneResult<T> = Result<T, BackboneError>;

#[derive(Debug, Error)]
pub enum BackboneError {
    #[error("no saved backbone at {path} (expected {file})")]
    NotFound { path: PathBuf, file: &'static str },
    #[error("invalid backbone config at {path}: {msg}")]
    Config { path: PathBuf, msg: String },
    #[error("backbone record at {path} could not be used: {source}")]
    Record {
        path: PathBuf,
        #[source]
        source: RecorderError,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Config, Debug, PartialEq)]
pub struct Vgg16Config {
    /// Output channels of conv blocks 1..=5.
    #[config(default = "[64, 128, 256, 512, 512]")]
    pub block_channels: [usize; 5],
    /// Width of the fc6/fc7 layers (expressed as convolutions).
    #[config(default = 4096)]
    pub fc_channels: usize,
    #[config(default = 7)]
    pub fc6_kernel: usize,
    #[config(default = 3)]
    pub in_channels: usize,
}

impl Vgg16Config {
    /// Channel depth of `(layer3, layer4, layer7)`.
    pub fn endpoint_channels(&self) -> [usize; 3] {
        [
            self.block_channels[2],
            self.block_channels[3],
            self.fc_channels,
        ]
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg16<B> {
        let mut blocks = Vec::with_capacity(CONVS_PER_BLOCK.len());
        let mut in_ch = self.in_channels;
        for (convs, &out_ch) in CONVS_PER_BLOCK.iter().zip(self.block_channels.iter()) {
            blocks.push(VggBlock::new(in_ch, out_ch, *convs, device));
            in_ch = out_ch;
        }
        let fc6 = Conv2dConfig::new([in_ch, self.fc_channels], [self.fc6_kernel; 2])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let fc7 = Conv2dConfig::new([self.fc_channels, self.fc_channels], [1, 1])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        Vgg16 { blocks, fc6, fc7 }
    }
}

#[derive(Module, Debug)]
pub struct VggBlock<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> VggBlock<B> {
    fn new(in_ch: usize, out_ch: usize, depth: usize, device: &B::Device) -> Self {
        let mut convs = Vec::with_capacity(depth);
        let mut c = in_ch;
        for _ in 0..depth {
            convs.push(
                Conv2dConfig::new([c, out_ch], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device),
            );
            c = out_ch;
        }
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        Self { convs, pool }
    }

    fn forward(&self, mut x: Tensor<B, 4>) -> Tensor<B, 4> {
        for conv in &self.convs {
            x = relu(conv.forward(x));
        }
        self.pool.forward(x)
    }
}

/// The intermediate activations the decoder consumes.
#[derive(Debug, Clone)]
pub struct VggEndpoints<B: Backend> {
    /// Output of pool3 (stride 8).
    pub layer3: Tensor<B, 4>,
    /// Output of pool4 (stride 16).
    pub layer4: Tensor<B, 4>,
    /// Output of fc7 after dropout (stride 32).
    pub layer7: Tensor<B, 4>,
}

#[derive(Module, Debug)]
pub struct Vgg16<B: Backend> {
    blocks: Vec<VggBlock<B>>,
    fc6: Conv2d<B>,
    fc7: Conv2d<B>,
}

impl<B: Backend> Vgg16<B> {
    /// Runs the backbone on `[batch, 3, H, W]` images. `keep_prob` drives the
    /// fc6/fc7 dropout; pass `1.0` for inference.
    pub fn forward(&self, image: Tensor<B, 4>, keep_prob: f64) -> VggEndpoints<B> {
        let mut x = image;
        for block in &self.blocks[..3] {
            x = block.forward(x);
        }
        let layer3 = x.clone();
        let x = self.blocks[3].forward(x);
        let layer4 = x.clone();
        let x = self.blocks[4].forward(x);
        let x = dropout(relu(self.fc6.forward(x)), keep_prob);
        let layer7 = dropout(relu(self.fc7.forward(x)), keep_prob);
        VggEndpoints {
            layer3,
            layer4,
            layer7,
        }
    }
}

/// Inverted dropout: keeps each activation with probability `keep_prob` and
/// rescales survivors by `1 / keep_prob`.
pub fn dropout<B: Backend>(x: Tensor<B, 4>, keep_prob: f64) -> Tensor<B, 4> {
    if keep_prob >= 1.0 {
        return x;
    }
    if keep_prob <= 0.0 {
        return x.zeros_like();
    }
    let mask = Tensor::<B, 4>::random(x.shape(), Distribution::Bernoulli(keep_prob), &x.device());
    x.mul(mask).div_scalar(keep_prob)
}

/// Loads a saved backbone from `dir`.
pub fn load_vgg<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> BackboneResult<(Vgg16<B>, Vgg16Config)> {
    let config_path = dir.join(VGG_CONFIG_FILE);
    let weights_path = dir.join(VGG_WEIGHTS_FILE);
    if !config_path.is_file() {
        return Err(BackboneError::NotFound {
            path: dir.to_path_buf(),
            file: VGG_CONFIG_FILE,
        });
    }
    if !weights_path.is_file() {
        return Err(BackboneError::NotFound {
            path: dir.to_path_buf(),
            file: VGG_WEIGHTS_FILE,
        });
    }
    let config = Vgg16Config::load(&config_path).map_err(|e| BackboneError::Config {
        path: config_path.clone(),
        msg: e.to_string(),
    })?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = config
        .init::<B>(device)
        .load_file(weights_path.clone(), &recorder, device)
        .map_err(|source| BackboneError::Record {
            path: weights_path,
            source,
        })?;
    tracing::info!(
        "loaded VGG16 backbone from {} (endpoints {:?})",
        dir.display(),
        config.endpoint_channels()
    );
    Ok((model, config))
}

/// Writes `model` and `config` in the layout [`load_vgg`] expects.
pub fn save_vgg<B: Backend>(
    model: Vgg16<B>,
    config: &Vgg16Config,
    dir: &Path,
) -> BackboneResult<()> {
    std::fs::create_dir_all(dir).map_err(|source| BackboneError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let config_path = dir.join(VGG_CONFIG_FILE);
    config
        .save(&config_path)
        .map_err(|source| BackboneError::Io {
            path: config_path,
            source,
        })?;
    let weights_path = dir.join(VGG_WEIGHTS_FILE);
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .save_file(weights_path.clone(), &recorder)
        .map_err(|source| BackboneError::Record {
            path: weights_path,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn slim() -> Vgg16Config {
        Vgg16Config::new()
            .with_block_channels([4, 4, 8, 8, 8])
            .with_fc_channels(16)
    }

    #[test]
    fn endpoints_have_expected_strides() {
        let device = Default::default();
        let cfg = slim();
        let vgg = cfg.init::<B>(&device);
        let image = Tensor::<B, 4>::zeros([1, 3, 64, 96], &device);
        let ep = vgg.forward(image, 1.0);
        assert_eq!(ep.layer3.dims(), [1, 8, 8, 12]);
        assert_eq!(ep.layer4.dims(), [1, 8, 4, 6]);
        assert_eq!(ep.layer7.dims(), [1, 16, 2, 3]);
        assert_eq!(cfg.endpoint_channels(), [8, 8, 16]);
    }

    #[test]
    fn dropout_is_identity_at_keep_one() {
        let device = Default::default();
        let x = Tensor::<B, 4>::ones([1, 2, 3, 3], &device);
        let y = dropout(x.clone(), 1.0);
        assert_eq!(
            x.into_data().to_vec::<f32>().unwrap(),
            y.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn dropout_rescales_survivors() {
        let device = Default::default();
        let x = Tensor::<B, 4>::ones([1, 4, 8, 8], &device);
        let y = dropout(x, 0.5).into_data().to_vec::<f32>().unwrap();
        assert!(y.iter().all(|v| *v == 0.0 || (*v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn load_fails_without_saved_model() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_vgg::<B>(tmp.path(), &Default::default()).unwrap_err();
        assert!(matches!(err, BackboneError::NotFound { .. }));
    }

    #[test]
    fn save_then_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let cfg = slim();
        save_vgg(cfg.init::<B>(&device), &cfg, tmp.path()).unwrap();
        let (_model, loaded) = load_vgg::<B>(tmp.path(), &device).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn load_rejects_mismatched_record() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let cfg = slim();
        save_vgg(cfg.init::<B>(&device), &cfg, tmp.path()).unwrap();
        std::fs::write(tmp.path().join(VGG_WEIGHTS_FILE), b"not a record").unwrap();
        let err = load_vgg::<B>(tmp.path(), &device).unwrap_err();
        assert!(matches!(err, BackboneError::Record { .. }));
    }
}
