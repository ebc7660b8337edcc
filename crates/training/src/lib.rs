#![recursion_limit = "256"]

//! Training, evaluation and checkpointing for the FCN-8s road segmenter.

pub mod checkpoint;
pub mod config;
pub mod eval;
pub mod fetch;
pub mod loss;
pub mod run;
pub mod train;

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

pub type ADBackend = burn::backend::Autodiff<TrainBackend>;

pub use checkpoint::{CheckpointIndex, CheckpointStore};
pub use config::RunConfig;
pub use eval::{compute_mean_iou, IouReport, MeanIou};
pub use fetch::maybe_download_pretrained_vgg;
pub use loss::{adam, cross_entropy, flatten_classes, optimize, LossOutput, Trainer};
pub use run::{
    default_backend, run, run_eval, run_train, validate_backend_choice, BackendKind, EvalArgs,
    RunReport, TrainArgs,
};
pub use train::{train_nn, Hyperparams, StepLoss, TrainSummary};
