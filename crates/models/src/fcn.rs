//! FCN-8s skip-connection decoder and the full segmentation network.

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use thiserror::Error;

use crate::vgg::{Vgg16, Vgg16Config, VggEndpoints};

/// Total downsampling of the backbone; the decoder upsamples by 2 * 2 * 8.
pub const TOTAL_STRIDE: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputShapeError {
    #[error("expected {expected} input channels, got {actual}")]
    Channels { expected: usize, actual: usize },
    #[error("input {height}x{width} is not a multiple of 32")]
    NotAligned { height: usize, width: usize },
}

#[derive(Config, Debug, PartialEq)]
pub struct Fcn8sDecoderConfig {
    pub num_classes: usize,
    pub layer3_channels: usize,
    pub layer4_channels: usize,
    pub layer7_channels: usize,
}

impl Fcn8sDecoderConfig {
    pub fn for_backbone(backbone: &Vgg16Config, num_classes: usize) -> Self {
        let [l3, l4, l7] = backbone.endpoint_channels();
        Self::new(num_classes, l3, l4, l7)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Fcn8sDecoder<B> {
        let n = self.num_classes;
        Fcn8sDecoder {
            score_l3: score_layer(self.layer3_channels, n, device),
            score_l4: score_layer(self.layer4_channels, n, device),
            score_l7: score_layer(self.layer7_channels, n, device),
            up_l7: upsample(n, 4, 2, device),
            up_l4: upsample(n, 4, 2, device),
            up_out: upsample(n, 16, 8, device),
        }
    }
}

fn score_layer<B: Backend>(in_ch: usize, num_classes: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_ch, num_classes], [1, 1])
        .with_padding(PaddingConfig2d::Same)
        .init(device)
}

/// Transposed conv with "same" output: `out = in * stride`.
fn upsample<B: Backend>(
    channels: usize,
    kernel: usize,
    stride: usize,
    device: &B::Device,
) -> ConvTranspose2d<B> {
    let pad = (kernel - stride) / 2;
    ConvTranspose2dConfig::new([channels, channels], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding([pad, pad])
        .with_padding_out([0, 0])
        .init(device)
}

#[derive(Module, Debug)]
pub struct Fcn8sDecoder<B: Backend> {
    score_l3: Conv2d<B>,
    score_l4: Conv2d<B>,
    score_l7: Conv2d<B>,
    up_l7: ConvTranspose2d<B>,
    up_l4: ConvTranspose2d<B>,
    up_out: ConvTranspose2d<B>,
}

impl<B: Backend> Fcn8sDecoder<B> {
    pub fn forward(&self, endpoints: &VggEndpoints<B>) -> Tensor<B, 4> {
        let l3 = self.score_l3.forward(endpoints.layer3.clone());
        let l4 = self.score_l4.forward(endpoints.layer4.clone());
        let l7 = self.score_l7.forward(endpoints.layer7.clone());

        let x = self.up_l7.forward(l7) + l4;
        let x = self.up_l4.forward(x) + l3;
        self.up_out.forward(x)
    }

    /// `scale * sum(w^2) / 2` over every decoder kernel (biases excluded).
    pub fn l2_penalty(&self, scale: f64) -> Tensor<B, 1> {
        let sq = |w: Tensor<B, 4>| w.powf_scalar(2.0).sum();
        let total = sq(self.score_l3.weight.val())
            + sq(self.score_l4.weight.val())
            + sq(self.score_l7.weight.val())
            + sq(self.up_l7.weight.val())
            + sq(self.up_l4.weight.val())
            + sq(self.up_out.weight.val());
        total.mul_scalar(scale / 2.0)
    }
}

#[derive(Config, Debug, PartialEq)]
pub struct Fcn8sConfig {
    pub backbone: Vgg16Config,
    #[config(default = 2)]
    pub num_classes: usize,
    /// L2 coefficient attached to every decoder kernel.
    #[config(default = 1e-3)]
    pub l2_scale: f64,
}

impl Fcn8sConfig {
    pub fn decoder(&self) -> Fcn8sDecoderConfig {
        Fcn8sDecoderConfig::for_backbone(&self.backbone, self.num_classes)
    }

    /// Builds a network with a freshly initialized backbone.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Fcn8s<B> {
        Fcn8s::from_backbone(self.backbone.init(device), self, device)
    }
}

#[derive(Module, Debug)]
pub struct Fcn8s<B: Backend> {
    backbone: Vgg16<B>,
    decoder: Fcn8sDecoder<B>,
}

impl<B: Backend> Fcn8s<B> {
    pub fn from_backbone(backbone: Vgg16<B>, cfg: &Fcn8sConfig, device: &B::Device) -> Self {
        let decoder = cfg.decoder().init(device);
        Self { backbone, decoder }
    }

    /// Per-pixel class scores `[batch, num_classes, H, W]` for `[batch, 3, H, W]` images.
    pub fn forward(&self, images: Tensor<B, 4>, keep_prob: f64) -> Tensor<B, 4> {
        let endpoints = self.backbone.forward(images, keep_prob);
        self.decoder.forward(&endpoints)
    }

    pub fn decoder(&self) -> &Fcn8sDecoder<B> {
        &self.decoder
    }

    pub fn check_input(dims: [usize; 4], in_channels: usize) -> Result<(), InputShapeError> {
        let [_, channels, height, width] = dims;
        if channels != in_channels {
            return Err(InputShapeError::Channels {
                expected: in_channels,
                actual: channels,
            });
        }
        if height == 0 || width == 0 || height % TOTAL_STRIDE != 0 || width % TOTAL_STRIDE != 0 {
            return Err(InputShapeError::NotAligned { height, width });
        }
        Ok(())
    }
}
