//! Run configuration: defaults, TOML loading and validation.

use crate::train::Hyperparams;
use anyhow::{anyhow, bail};
use models::Fcn8s;
use road_dataset::{ImageShape, NUM_CLASSES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_NAME: &str = "road-seg.toml";
pub const CONFIG_ENV: &str = "ROADSEG_CONFIG";

/// Everything a training or evaluation run needs. Fields missing from the
/// TOML file keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub save_model: bool,
    pub restore_model: bool,
    /// Skip training; only restore, evaluate and export.
    pub inference_only: bool,
    pub compute_iou: bool,
    pub export_samples: bool,
    pub num_classes: usize,
    pub image_shape: ImageShape,
    pub data_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub ckpt_dir: PathBuf,
    pub keep_prob: f64,
    pub learning_rate: f64,
    /// Add the decoder L2 penalty to the optimized loss.
    pub l2_in_loss: bool,
    /// Base URL serving `vgg16.json` and `vgg16.bin`.
    pub vgg_url: Option<String>,
    pub shuffle_seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let hyper = Hyperparams::default();
        Self {
            epochs: 80,
            batch_size: 2,
            save_model: true,
            restore_model: true,
            inference_only: false,
            compute_iou: true,
            export_samples: true,
            num_classes: NUM_CLASSES,
            image_shape: ImageShape::default(),
            data_dir: PathBuf::from("./data"),
            runs_dir: PathBuf::from("./runs"),
            ckpt_dir: PathBuf::from("./ckpts"),
            keep_prob: hyper.keep_prob,
            learning_rate: hyper.learning_rate,
            l2_in_loss: false,
            vgg_url: None,
            shuffle_seed: None,
        }
    }
}

impl RunConfig {
    /// Reads `$ROADSEG_CONFIG` if set, else `road-seg.toml` when present, else
    /// the defaults. An explicitly named file must exist.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = expand_path(&path);
            if !path.is_file() {
                bail!("{CONFIG_ENV} points at {}, which does not exist", path.display());
            }
            return Self::from_path(&path);
        }
        let default = Path::new(DEFAULT_CONFIG_NAME);
        if default.is_file() {
            return Self::from_path(default);
        }
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config {}: {e}", path.display()))?;
        let mut cfg: RunConfig = toml::from_str(&raw)
            .map_err(|e| anyhow!("failed to parse config {}: {e}", path.display()))?;
        cfg.expand_paths();
        tracing::info!("loaded run config from {}", path.display());
        Ok(cfg)
    }

    fn expand_paths(&mut self) {
        for p in [&mut self.data_dir, &mut self.runs_dir, &mut self.ckpt_dir] {
            if let Some(expanded) = p.to_str().map(expand_path) {
                *p = expanded;
            }
        }
    }

    pub fn hyper(&self) -> Hyperparams {
        Hyperparams {
            keep_prob: self.keep_prob,
            learning_rate: self.learning_rate,
        }
    }

    pub fn vgg_dir(&self) -> PathBuf {
        self.data_dir.join("vgg")
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            bail!("keep_prob must be in (0, 1], got {}", self.keep_prob);
        }
        if !(self.learning_rate > 0.0) {
            bail!("learning_rate must be positive, got {}", self.learning_rate);
        }
        if self.num_classes != NUM_CLASSES {
            bail!(
                "labels are encoded with {NUM_CLASSES} classes; num_classes = {} is unsupported",
                self.num_classes
            );
        }
        let ImageShape { height, width } = self.image_shape;
        Fcn8s::<crate::TrainBackend>::check_input(
            [1, 3, height as usize, width as usize],
            3,
        )
        .map_err(|e| anyhow!("image_shape {height}x{width}: {e}"))?;
        if self.epochs == 0 && !self.inference_only {
            tracing::warn!("epochs = 0; the model will not be trained");
        }
        Ok(())
    }
}

fn expand_path(raw: &str) -> PathBuf {
    if let Some(stripped) = raw.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(format!("{home}{stripped}"));
        }
    }
    PathBuf::from(raw)
}
