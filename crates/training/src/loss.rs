//! Cross-entropy over flattened score maps and the Adam update step.

use anyhow::bail;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use models::{Fcn8s, Fcn8sConfig};
use road_dataset::RoadBatch;

/// Flattened logits `[pixels, num_classes]` and the scalar loss.
#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    pub logits: Tensor<B, 2>,
    pub loss: Tensor<B, 1>,
}

/// `[b, c, h, w]` to `[b * h * w, c]`, pixel-major.
pub fn flatten_classes<B: Backend>(t: Tensor<B, 4>) -> Tensor<B, 2> {
    let [b, c, h, w] = t.dims();
    t.permute([0, 2, 3, 1]).reshape([b * h * w, c])
}

/// Mean over rows of `-sum(labels * log_softmax(logits))`.
pub fn cross_entropy<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    (labels * log_softmax(logits, 1)).sum_dim(1).neg().mean()
}

/// Builds the training objective for one batch. `l2`, when given, is added
/// to the cross-entropy.
pub fn optimize<B: Backend>(
    score_map: Tensor<B, 4>,
    labels: Tensor<B, 4>,
    num_classes: usize,
    l2: Option<Tensor<B, 1>>,
) -> LossOutput<B> {
    debug_assert_eq!(score_map.dims()[1], num_classes);
    debug_assert_eq!(labels.dims()[1], num_classes);
    let logits = flatten_classes(score_map);
    let labels = flatten_classes(labels);
    let mut loss = cross_entropy(logits.clone(), labels);
    if let Some(l2) = l2 {
        loss = loss + l2;
    }
    LossOutput { logits, loss }
}

/// Adam with the Keras/TF epsilon.
pub fn adam<B: AutodiffBackend>() -> impl Optimizer<Fcn8s<B>, B> {
    AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-8)
        .init()
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_scalar().elem::<f32>()
}

/// A model, its optimizer state and the config it was built from.
pub struct Trainer<B: AutodiffBackend, O: Optimizer<Fcn8s<B>, B>> {
    model: Fcn8s<B>,
    optim: O,
    config: Fcn8sConfig,
    l2_in_loss: bool,
    steps: usize,
}

impl<B: AutodiffBackend, O: Optimizer<Fcn8s<B>, B>> Trainer<B, O> {
    pub fn new(model: Fcn8s<B>, optim: O, config: Fcn8sConfig, l2_in_loss: bool) -> Self {
        Self {
            model,
            optim,
            config,
            l2_in_loss,
            steps: 0,
        }
    }

    pub fn model(&self) -> &Fcn8s<B> {
        &self.model
    }

    /// Inference copy of the model on the inner backend.
    pub fn valid_model(&self) -> Fcn8s<B::InnerBackend> {
        self.model.valid()
    }

    pub fn optim(&self) -> &O {
        &self.optim
    }

    pub fn config(&self) -> &Fcn8sConfig {
        &self.config
    }

    /// Optimizer updates applied so far, including restored ones.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Swaps in restored state. Used by [`crate::CheckpointStore::restore`].
    pub(crate) fn with_state(
        self,
        model: Fcn8s<B>,
        optim_record: Option<O::Record>,
        steps: usize,
    ) -> Self {
        let optim = match optim_record {
            Some(record) => self.optim.load_record(record),
            None => self.optim,
        };
        Self {
            model,
            optim,
            config: self.config,
            l2_in_loss: self.l2_in_loss,
            steps,
        }
    }

    fn objective(&self, batch: &RoadBatch<B>, keep_prob: f64) -> LossOutput<B> {
        let scores = self.model.forward(batch.images.clone(), keep_prob);
        let l2 = self
            .l2_in_loss
            .then(|| self.model.decoder().l2_penalty(self.config.l2_scale));
        optimize(scores, batch.labels.clone(), self.config.num_classes, l2)
    }

    /// Loss on `batch` without touching parameters.
    pub fn loss(&self, batch: &RoadBatch<B>, keep_prob: f64) -> f32 {
        scalar(self.objective(batch, keep_prob).loss)
    }

    /// One forward/backward pass and Adam update. Returns the pre-update loss.
    /// A NaN or infinite loss is an error and leaves the model and step count
    /// untouched.
    pub fn step(
        &mut self,
        batch: &RoadBatch<B>,
        keep_prob: f64,
        learning_rate: f64,
    ) -> anyhow::Result<f32> {
        let out = self.objective(batch, keep_prob);
        let loss = scalar(out.loss.clone().detach());
        if !loss.is_finite() {
            bail!("loss became {loss}; parameters were not updated");
        }
        let grads = GradientsParams::from_grads(out.loss.backward(), &self.model);
        self.model = self.optim.step(learning_rate, self.model.clone(), grads);
        self.steps += 1;
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn t2(values: Vec<f32>, rows: usize, cols: usize) -> Tensor<B, 2> {
        Tensor::from_data(TensorData::new(values, [rows, cols]), &Default::default())
    }

    #[test]
    fn flatten_moves_classes_last() {
        // [1, 2, 1, 2]: class planes [a, b] and [c, d].
        let t = Tensor::<B, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 2, 1, 2]),
            &Default::default(),
        );
        let flat = flatten_classes(t);
        assert_eq!(flat.dims(), [2, 2]);
        assert_eq!(
            flat.into_data().to_vec::<f32>().unwrap(),
            vec![1.0, 3.0, 2.0, 4.0]
        );
    }

    #[test]
    fn cross_entropy_is_non_negative_and_vanishes_on_confident_match() {
        let labels = || t2(vec![1.0, 0.0, 0.0, 1.0], 2, 2);
        let confident = scalar(cross_entropy(t2(vec![30.0, -30.0, -30.0, 30.0], 2, 2), labels()));
        let uniform = scalar(cross_entropy(t2(vec![0.0; 4], 2, 2), labels()));
        let wrong = scalar(cross_entropy(t2(vec![-5.0, 5.0, 5.0, -5.0], 2, 2), labels()));
        assert!(confident >= 0.0 && confident < 1e-6);
        assert!((uniform - std::f32::consts::LN_2).abs() < 1e-5);
        assert!(wrong > uniform);
    }

    #[test]
    fn l2_term_is_added_when_present() {
        let device = Default::default();
        let scores = Tensor::<B, 4>::zeros([1, 2, 2, 2], &device);
        let labels = Tensor::<B, 4>::ones([1, 2, 2, 2], &device).div_scalar(2.0);
        let base = scalar(optimize(scores.clone(), labels.clone(), 2, None).loss);
        let with_l2 = optimize(
            scores,
            labels,
            2,
            Some(Tensor::<B, 1>::from_floats([0.25], &device)),
        );
        assert_eq!(with_l2.logits.dims(), [8, 2]);
        assert!((scalar(with_l2.loss) - base - 0.25).abs() < 1e-6);
    }
}
