//! Streaming mean intersection-over-union.

use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Int;
use burn::tensor::Tensor;
use models::Fcn8s;
use road_dataset::BatchGenerator;

/// Confusion matrix accumulated over batches. Rows are labels, columns are
/// predictions.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanIou {
    num_classes: usize,
    confusion: Vec<u64>,
}

impl MeanIou {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            confusion: vec![0; num_classes * num_classes],
        }
    }

    pub fn reset(&mut self) {
        self.confusion.iter_mut().for_each(|c| *c = 0);
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn confusion(&self) -> &[u64] {
        &self.confusion
    }

    /// Adds one `(label, prediction)` pair per pixel. Pairs with a class
    /// outside `0..num_classes` are skipped.
    pub fn update(&mut self, labels: &[usize], predictions: &[usize]) {
        let n = self.num_classes;
        for (&l, &p) in labels.iter().zip(predictions) {
            if l < n && p < n {
                self.confusion[l * n + p] += 1;
            }
        }
    }

    /// IoU per class; `None` for classes absent from both labels and predictions.
    pub fn class_iou(&self) -> Vec<Option<f64>> {
        let n = self.num_classes;
        (0..n)
            .map(|c| {
                let diag = self.confusion[c * n + c];
                let row: u64 = self.confusion[c * n..(c + 1) * n].iter().sum();
                let col: u64 = (0..n).map(|r| self.confusion[r * n + c]).sum();
                let denom = row + col - diag;
                (denom > 0).then(|| diag as f64 / denom as f64)
            })
            .collect()
    }

    /// Mean IoU over classes with a positive denominator; 0 if there are none.
    pub fn value(&self) -> f64 {
        let valid: Vec<f64> = self.class_iou().into_iter().flatten().collect();
        if valid.is_empty() {
            0.0
        } else {
            valid.iter().sum::<f64>() / valid.len() as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IouReport {
    /// Mean of the cumulative reading taken after every batch.
    pub mean_of_batches: f64,
    /// Reading after the final batch.
    pub cumulative: f64,
    pub per_batch: Vec<f64>,
    pub class_iou: Vec<Option<f64>>,
}

fn argmax_classes<B: Backend>(t: Tensor<B, 4>) -> Vec<usize> {
    let idx: Tensor<B, 4, Int> = t.argmax(1);
    idx.into_data().iter::<i64>().map(|v| v.max(0) as usize).collect()
}

/// One pass over `batches` with dropout disabled.
pub fn compute_mean_iou<B: Backend>(
    model: &Fcn8s<B>,
    batches: &BatchGenerator,
    batch_size: usize,
    num_classes: usize,
    device: &B::Device,
) -> anyhow::Result<IouReport> {
    let mut metric = MeanIou::new(num_classes);
    let mut per_batch = Vec::with_capacity(batches.batches_per_epoch(batch_size));
    let mut iter = batches.epoch(0);
    while let Some(batch) = iter.next_batch::<B>(batch_size, device)? {
        let scores = model.forward(batch.images, 1.0);
        let predictions = argmax_classes(softmax(scores, 1));
        let labels = argmax_classes(batch.labels);
        metric.update(&labels, &predictions);
        let reading = metric.value();
        tracing::debug!("batch {}: cumulative IoU {:.4}", per_batch.len() + 1, reading);
        per_batch.push(reading);
    }
    if per_batch.is_empty() {
        anyhow::bail!("no batches to evaluate");
    }
    let mean_of_batches = per_batch.iter().sum::<f64>() / per_batch.len() as f64;
    Ok(IouReport {
        mean_of_batches,
        cumulative: metric.value(),
        per_batch,
        class_iou: metric.class_iou(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_score_one() {
        let mut m = MeanIou::new(2);
        m.update(&[0, 1, 1, 0], &[0, 1, 1, 0]);
        assert_eq!(m.value(), 1.0);
    }

    #[test]
    fn matches_hand_computed_confusion() {
        let mut m = MeanIou::new(2);
        // labels/preds: (0,0) (0,1) (1,1) (1,1)
        m.update(&[0, 0, 1, 1], &[0, 1, 1, 1]);
        assert_eq!(m.confusion(), &[1, 1, 0, 2]);
        // class 0: 1 / (2 + 1 - 1) = 0.5; class 1: 2 / (2 + 3 - 2) = 2/3
        assert!((m.value() - (0.5 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn absent_classes_are_ignored_and_empty_is_zero() {
        let mut m = MeanIou::new(3);
        assert_eq!(m.value(), 0.0);
        m.update(&[1, 1], &[1, 1]);
        assert_eq!(m.class_iou(), vec![None, Some(1.0), None]);
        assert_eq!(m.value(), 1.0);
        m.reset();
        assert_eq!(m.value(), 0.0);
    }

    #[test]
    fn value_stays_in_unit_interval() {
        let mut m = MeanIou::new(2);
        m.update(&[0, 0, 0, 1], &[1, 1, 1, 0]);
        let v = m.value();
        assert!((0.0..=1.0).contains(&v));
        assert_eq!(v, 0.0);
    }
}
