//! End-to-end pipeline and the CLI surface of the `train` / `eval` binaries.

use crate::checkpoint::{CheckpointIndex, CheckpointStore};
use crate::config::RunConfig;
use crate::eval::{compute_mean_iou, IouReport};
use crate::fetch::maybe_download_pretrained_vgg;
use crate::loss::{adam, Trainer};
use crate::train::{train_nn, TrainSummary};
use crate::ADBackend;
use anyhow::{anyhow, bail};
use burn::tensor::backend::AutodiffBackend;
use clap::{Parser, ValueEnum};
use models::{load_vgg, Fcn8s, Fcn8sConfig};
use road_dataset::{check_kitti_dataset, BatchConfig, BatchGenerator};
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

/// The backend this build runs on when none is requested.
pub fn default_backend() -> BackendKind {
    if cfg!(feature = "backend-wgpu") {
        BackendKind::Wgpu
    } else {
        BackendKind::NdArray
    }
}

/// Requesting WGPU from a CPU-only build is an error. A CPU-only build on its
/// own only warns.
pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::info!("built with backend-wgpu; the WGPU backend is used despite --backend ndarray");
        }
        (BackendKind::NdArray, false) => {
            tracing::warn!("No GPU found. Please use a GPU to train your neural network.");
        }
        (BackendKind::Wgpu, true) => {}
    }
    Ok(())
}

#[derive(Parser, Debug, Default)]
#[command(name = "train", about = "Train the FCN-8s road segmenter on KITTI road")]
pub struct TrainArgs {
    /// TOML run config (defaults to $ROADSEG_CONFIG, then ./road-seg.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub lr: Option<f64>,
    /// Dropout keep probability during training.
    #[arg(long)]
    pub keep_prob: Option<f64>,
    /// Directory holding `data_road/` and `vgg/`.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Inference samples are written under `<runs-dir>/<unix seconds>/`.
    #[arg(long)]
    pub runs_dir: Option<PathBuf>,
    #[arg(long)]
    pub ckpt_dir: Option<PathBuf>,
    /// Base URL for `vgg16.json` / `vgg16.bin` when they are not on disk.
    #[arg(long)]
    pub vgg_url: Option<String>,
    /// Seed for the per-epoch shuffle.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Start from fresh decoder weights even if a checkpoint exists.
    #[arg(long)]
    pub no_restore: bool,
    #[arg(long)]
    pub no_save: bool,
    #[arg(long)]
    pub skip_iou: bool,
    #[arg(long)]
    pub no_export: bool,
    /// Add the decoder L2 penalty to the loss.
    #[arg(long)]
    pub l2_in_loss: bool,
}

impl TrainArgs {
    /// Config file values overridden by any flag given on the command line.
    pub fn resolve(&self) -> anyhow::Result<RunConfig> {
        let mut cfg = match &self.config {
            Some(path) => RunConfig::from_path(path)?,
            None => RunConfig::load()?,
        };
        if let Some(v) = self.epochs {
            cfg.epochs = v;
        }
        if let Some(v) = self.batch_size {
            cfg.batch_size = v;
        }
        if let Some(v) = self.lr {
            cfg.learning_rate = v;
        }
        if let Some(v) = self.keep_prob {
            cfg.keep_prob = v;
        }
        if let Some(v) = &self.data_dir {
            cfg.data_dir = v.clone();
        }
        if let Some(v) = &self.runs_dir {
            cfg.runs_dir = v.clone();
        }
        if let Some(v) = &self.ckpt_dir {
            cfg.ckpt_dir = v.clone();
        }
        if let Some(v) = &self.vgg_url {
            cfg.vgg_url = Some(v.clone());
        }
        if let Some(v) = self.seed {
            cfg.shuffle_seed = Some(v);
        }
        cfg.restore_model &= !self.no_restore;
        cfg.save_model &= !self.no_save;
        cfg.compute_iou &= !self.skip_iou;
        cfg.export_samples &= !self.no_export;
        cfg.l2_in_loss |= self.l2_in_loss;
        Ok(cfg)
    }

}

#[derive(Parser, Debug, Default)]
#[command(
    name = "eval",
    about = "Restore a trained FCN-8s checkpoint, report mean IoU and export road overlays"
)]
pub struct EvalArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[arg(long)]
    pub runs_dir: Option<PathBuf>,
    #[arg(long)]
    pub ckpt_dir: Option<PathBuf>,
    #[arg(long)]
    pub skip_iou: bool,
    #[arg(long)]
    pub no_export: bool,
}

impl EvalArgs {
    pub fn resolve(&self) -> anyhow::Result<RunConfig> {
        let mut cfg = TrainArgs {
            config: self.config.clone(),
            batch_size: self.batch_size,
            data_dir: self.data_dir.clone(),
            runs_dir: self.runs_dir.clone(),
            ckpt_dir: self.ckpt_dir.clone(),
            skip_iou: self.skip_iou,
            no_export: self.no_export,
            ..Default::default()
        }
        .resolve()?;
        cfg.inference_only = true;
        cfg.restore_model = true;
        cfg.save_model = false;
        Ok(cfg)
    }
}

/// What a run produced; fields are `None` for skipped stages.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Backend the build runs on, checked before anything else.
    pub backend: Option<BackendKind>,
    pub restored: Option<CheckpointIndex>,
    pub train: Option<TrainSummary>,
    pub iou: Option<IouReport>,
    pub checkpoint: Option<PathBuf>,
    pub samples_dir: Option<PathBuf>,
}

/// Backend check, dataset check, backbone fetch and load, restore, train,
/// evaluate, save, export. Any failing stage aborts the run.
pub fn run<B: AutodiffBackend>(cfg: &RunConfig, device: &B::Device) -> anyhow::Result<RunReport> {
    let backend = default_backend();
    validate_backend_choice(backend)?;
    cfg.validate()?;
    let mut report = RunReport {
        backend: Some(backend),
        ..Default::default()
    };

    let kitti = check_kitti_dataset(&cfg.data_dir)?;
    tracing::info!(
        "KITTI road: {} training / {} testing images",
        kitti.training_images,
        kitti.testing_images
    );
    let vgg_dir = maybe_download_pretrained_vgg(&cfg.data_dir, cfg.vgg_url.as_deref())?;

    let batches = BatchGenerator::from_dir(
        &kitti.training_dir,
        BatchConfig {
            image_shape: cfg.image_shape,
            shuffle: true,
            seed: cfg.shuffle_seed,
        },
    )?;

    let (backbone, vgg_cfg) = load_vgg::<B>(&vgg_dir, device)?;
    let model_cfg = Fcn8sConfig::new(vgg_cfg).with_num_classes(cfg.num_classes);
    let model = Fcn8s::from_backbone(backbone, &model_cfg, device);
    let mut trainer = Trainer::new(model, adam::<B>(), model_cfg, cfg.l2_in_loss);

    let store = CheckpointStore::new(&cfg.ckpt_dir);
    if cfg.restore_model {
        let (restored, index) = store.restore(trainer, device)?;
        trainer = restored;
        match &index {
            Some(index) => tracing::info!(
                "Restoring model from: {} ({} steps)",
                index.model_checkpoint_path,
                index.steps
            ),
            None => tracing::info!("no checkpoint in {}; starting fresh", store.dir().display()),
        }
        report.restored = index;
    }

    if !cfg.inference_only {
        let summary = train_nn(
            &mut trainer,
            cfg.epochs,
            cfg.batch_size,
            &batches,
            cfg.hyper(),
            device,
        )?;
        report.train = Some(summary);
    }

    if cfg.compute_iou {
        let iou = compute_mean_iou(
            &trainer.valid_model(),
            &batches,
            cfg.batch_size,
            cfg.num_classes,
            device,
        )?;
        tracing::info!("Mean IOU: {:.3}", iou.mean_of_batches);
        tracing::debug!("cumulative IoU {:.4}, per class {:?}", iou.cumulative, iou.class_iou);
        report.iou = Some(iou);
    }

    if cfg.save_model {
        let path = store.save(&trainer)?;
        tracing::info!("Model saved in path: {}", path.display());
        report.checkpoint = Some(path);
    }

    if cfg.export_samples {
        if kitti.testing_images == 0 {
            tracing::warn!("no testing images; skipping inference export");
        } else {
            let dir = inference::save_inference_samples(
                &cfg.runs_dir,
                &cfg.data_dir,
                &trainer.valid_model(),
                cfg.image_shape,
                device,
            )
            .map_err(|e| anyhow!("inference export failed: {e}"))?;
            report.samples_dir = Some(dir);
        }
    }

    Ok(report)
}

/// An explicit `--backend` other than the build's own is checked up front;
/// `run` checks the build's backend itself.
fn check_requested_backend(requested: Option<BackendKind>) -> anyhow::Result<()> {
    match requested {
        Some(kind) if kind != default_backend() => validate_backend_choice(kind),
        _ => Ok(()),
    }
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    check_requested_backend(args.backend)?;
    let cfg = args.resolve()?;
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    run::<ADBackend>(&cfg, &device)?;
    Ok(())
}

pub fn run_eval(args: EvalArgs) -> anyhow::Result<()> {
    check_requested_backend(args.backend)?;
    let cfg = args.resolve()?;
    if CheckpointStore::new(&cfg.ckpt_dir).latest()?.is_none() {
        bail!(
            "no checkpoint in {}; train first or pass --ckpt-dir",
            cfg.ckpt_dir.display()
        );
    }
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    run::<ADBackend>(&cfg, &device)?;
    Ok(())
}
