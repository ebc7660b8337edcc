//! Epoch loop over the batch generator with per-batch loss logging.

use crate::loss::Trainer;
use anyhow::Context;
use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use models::Fcn8s;
use road_dataset::BatchGenerator;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyperparams {
    /// Dropout keep probability while training.
    pub keep_prob: f64,
    pub learning_rate: f64,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Self {
            keep_prob: 0.5,
            learning_rate: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLoss {
    /// 1-based.
    pub epoch: usize,
    /// 1-based within the epoch.
    pub batch: usize,
    pub loss: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainSummary {
    pub steps: Vec<StepLoss>,
    pub epoch_means: Vec<f32>,
}

impl TrainSummary {
    pub fn first_loss(&self) -> Option<f32> {
        self.steps.first().map(|s| s.loss)
    }

    pub fn last_loss(&self) -> Option<f32> {
        self.steps.last().map(|s| s.loss)
    }
}

/// Runs `epochs` full passes over `batches`, one optimizer step per batch.
pub fn train_nn<B, O>(
    trainer: &mut Trainer<B, O>,
    epochs: usize,
    batch_size: usize,
    batches: &BatchGenerator,
    hyper: Hyperparams,
    device: &B::Device,
) -> anyhow::Result<TrainSummary>
where
    B: AutodiffBackend,
    O: Optimizer<Fcn8s<B>, B>,
{
    let mut summary = TrainSummary::default();
    for epoch in 0..epochs {
        let mut iter = batches.epoch(epoch);
        let mut epoch_loss = 0.0f32;
        let mut n = 0usize;
        while let Some(batch) = iter.next_batch::<B>(batch_size, device)? {
            n += 1;
            let loss = trainer
                .step(&batch, hyper.keep_prob, hyper.learning_rate)
                .with_context(|| format!("epoch {} batch {n}", epoch + 1))?;
            tracing::info!("Epoch: {} batch: {} loss: {:.3}", epoch + 1, n, loss);
            summary.steps.push(StepLoss {
                epoch: epoch + 1,
                batch: n,
                loss,
            });
            epoch_loss += loss;
        }
        let avg = if n > 0 { epoch_loss / n as f32 } else { 0.0 };
        tracing::info!("epoch {} complete: avg loss {:.4} over {} batches", epoch + 1, avg, n);
        summary.epoch_means.push(avg);
    }
    Ok(summary)
}
