//! On-disk checkpoints: model record, optimizer state and a JSON index.

use crate::loss::Trainer;
use anyhow::{anyhow, bail, Context};
use burn::module::Module;
use burn::optim::Optimizer;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::AutodiffBackend;
use models::{Fcn8s, Fcn8sConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CHECKPOINT_NAME: &str = "model.ckpt";
pub const CHECKPOINT_INDEX: &str = "checkpoint.json";

/// Written next to the records; tells a restore which files to read and which
/// network shape they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointIndex {
    pub model_checkpoint_path: String,
    pub config: Fcn8sConfig,
    pub steps: usize,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // The recorder forces a `.bin` extension, so keep it in the name.
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(format!("{CHECKPOINT_NAME}.bin"))
    }

    pub fn optim_path(&self) -> PathBuf {
        self.dir.join(format!("{CHECKPOINT_NAME}.optim.bin"))
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_INDEX)
    }

    /// The current index, or `None` when nothing has been saved here.
    pub fn latest(&self) -> anyhow::Result<Option<CheckpointIndex>> {
        let path = self.index_path();
        if !path.is_file() {
            return Ok(None);
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let index: CheckpointIndex = serde_json::from_str(&text)
            .map_err(|e| anyhow!("checkpoint index {} is corrupt: {e}", path.display()))?;
        Ok(Some(index))
    }

    /// Writes model and optimizer records, then the index. Returns the model
    /// record path.
    pub fn save<B, O>(&self, trainer: &Trainer<B, O>) -> anyhow::Result<PathBuf>
    where
        B: AutodiffBackend,
        O: Optimizer<Fcn8s<B>, B>,
    {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating checkpoint dir {}", self.dir.display()))?;
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let model_path = self.model_path();
        trainer
            .model()
            .clone()
            .save_file(model_path.clone(), &recorder)
            .map_err(|e| anyhow!("failed to save model checkpoint: {e:?}"))?;
        Recorder::<B>::record(&recorder, trainer.optim().to_record(), self.optim_path())
            .map_err(|e| anyhow!("failed to save optimizer checkpoint: {e:?}"))?;

        let index = CheckpointIndex {
            model_checkpoint_path: model_path.display().to_string(),
            config: trainer.config().clone(),
            steps: trainer.steps(),
        };
        fs::write(self.index_path(), serde_json::to_string_pretty(&index)?)
            .with_context(|| format!("writing {}", self.index_path().display()))?;
        Ok(model_path)
    }

    /// Loads the saved state into `trainer`. Without a checkpoint the trainer
    /// comes back untouched with `None`.
    pub fn restore<B, O>(
        &self,
        trainer: Trainer<B, O>,
        device: &B::Device,
    ) -> anyhow::Result<(Trainer<B, O>, Option<CheckpointIndex>)>
    where
        B: AutodiffBackend,
        O: Optimizer<Fcn8s<B>, B>,
    {
        let Some(index) = self.latest()? else {
            return Ok((trainer, None));
        };
        if &index.config != trainer.config() {
            bail!(
                "checkpoint in {} was saved for a different network ({:?}); \
                 remove it or point ckpt_dir elsewhere",
                self.dir.display(),
                index.config
            );
        }
        let model_path = self.model_path();
        if !model_path.is_file() {
            bail!(
                "checkpoint index present but {} is missing",
                model_path.display()
            );
        }

        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let model = trainer
            .model()
            .clone()
            .load_file(model_path.clone(), &recorder, device)
            .map_err(|e| anyhow!("failed to load {}: {e:?}", model_path.display()))?;

        let optim_path = self.optim_path();
        let optim_record = if optim_path.is_file() {
            let record: O::Record = Recorder::<B>::load(&recorder, optim_path.clone(), device)
                .map_err(|e| anyhow!("failed to load {}: {e:?}", optim_path.display()))?;
            Some(record)
        } else {
            tracing::warn!(
                "no optimizer state at {}; continuing with fresh moments",
                optim_path.display()
            );
            None
        };

        let steps = index.steps;
        Ok((trainer.with_state(model, optim_record, steps), Some(index)))
    }
}
