use std::path::{Path, PathBuf};

use image::{GrayImage, Luma, imageops::FilterType};
use log::{info, warn};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::{
    MaskMetrics,
    error::{ForensicsError, Result},
    image_utils::gray_to_array,
};

const F1_EPSILON: f64 = 1e-6;

/// Pixel-level agreement between a binarized prediction and ground truth.
pub fn mask_metric(predicted: &Array2<bool>, ground_truth: &Array2<bool>) -> Result<MaskMetrics> {
    if predicted.dim() != ground_truth.dim() {
        return Err(ForensicsError::ShapeMismatch(format!(
            "predicted mask is {:?} but ground truth is {:?}",
            predicted.dim(),
            ground_truth.dim()
        )));
    }

    let (mut tp, mut tn, mut fp, mut fn_) = (0u64, 0u64, 0u64, 0u64);
    Zip::from(predicted)
        .and(ground_truth)
        .for_each(|&p, &g| match (p, g) {
            (true, true) => tp += 1,
            (false, false) => tn += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
        });

    let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };

    let cross = tp;
    let union = tp + fp + fn_;
    let iou = if cross + union == 0 {
        1.0
    } else {
        ratio(cross, union)
    };

    Ok(MaskMetrics {
        true_positives: tp,
        true_negatives: tn,
        false_positives: fp,
        false_negatives: fn_,
        accuracy: ratio(tp + tn, tp + tn + fp + fn_),
        precision: ratio(tp, tp + fp),
        recall: ratio(tp, tp + fn_),
        f1: 2.0 * tp as f64 / (2.0 * tp as f64 + fp as f64 + fn_ as f64 + F1_EPSILON),
        iou,
    })
}

pub fn binarize(mask: &Array2<f32>, threshold: f32) -> Array2<bool> {
    mask.mapv(|v| v > threshold)
}

pub fn binarize_gray(mask: &GrayImage, threshold: u8) -> Array2<bool> {
    let (width, height) = mask.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        mask.get_pixel(x as u32, y as u32)[0] > threshold
    })
}

/// Brings a ground-truth mask to `width x height`. A resized mask is
/// re-binarized to 0/255 since interpolation blurs its edges.
pub fn align_ground_truth(
    ground_truth: &GrayImage,
    width: u32,
    height: u32,
    threshold: u8,
) -> GrayImage {
    if ground_truth.dimensions() == (width, height) {
        return ground_truth.clone();
    }

    let mut resized = image::imageops::resize(ground_truth, width, height, FilterType::Triangle);
    for pixel in resized.pixels_mut() {
        *pixel = Luma([if pixel[0] > threshold { 255 } else { 0 }]);
    }
    resized
}

/// Area under the ROC curve of `scores` against `labels`, by rank sum with
/// tied scores sharing their average rank. `None` when either class is absent.
pub fn roc_auc(labels: &Array2<bool>, scores: &Array2<f32>) -> Result<Option<f64>> {
    if labels.dim() != scores.dim() {
        return Err(ForensicsError::ShapeMismatch(format!(
            "labels are {:?} but scores are {:?}",
            labels.dim(),
            scores.dim()
        )));
    }

    let mut pairs: Vec<(f32, bool)> = scores.iter().copied().zip(labels.iter().copied()).collect();
    let positives = pairs.iter().filter(|(_, l)| *l).count();
    let negatives = pairs.len() - positives;
    if positives == 0 || negatives == 0 {
        return Ok(None);
    }

    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut positive_rank_sum = 0.0f64;
    let mut start = 0;
    while start < pairs.len() {
        let mut end = start + 1;
        while end < pairs.len() && pairs[end].0 == pairs[start].0 {
            end += 1;
        }
        // Ranks are 1-based; the tie group spans ranks start+1 ..= end.
        let average_rank = (start + 1 + end) as f64 / 2.0;
        let group_positives = pairs[start..end].iter().filter(|(_, l)| *l).count();
        positive_rank_sum += average_rank * group_positives as f64;
        start = end;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Ok(Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub binarize_threshold: u8,
    pub ground_truth_suffix: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            binarize_threshold: 127,
            ground_truth_suffix: "_gt.png".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEvaluation {
    pub name: String,
    pub metrics: MaskMetrics,
    pub auc: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub images: usize,
    pub auc: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
}

impl EvaluationSummary {
    /// Means over all images; AUC only over images whose ground truth has
    /// both classes. Empty inputs give NaN.
    pub fn from_evaluations(evaluations: &[ImageEvaluation]) -> Self {
        let mean_of = |f: fn(&MaskMetrics) -> f64| -> f64 {
            evaluations.iter().map(|e| f(&e.metrics)).collect::<Vec<_>>().mean()
        };
        let aucs: Vec<f64> = evaluations.iter().filter_map(|e| e.auc).collect();

        Self {
            images: evaluations.len(),
            auc: aucs.mean(),
            f1: mean_of(|m| m.f1),
            accuracy: mean_of(|m| m.accuracy),
            precision: mean_of(|m| m.precision),
            recall: mean_of(|m| m.recall),
        }
    }
}

pub struct MaskEvaluator {
    config: EvaluationConfig,
}

impl MaskEvaluator {
    pub fn new() -> Self {
        Self {
            config: EvaluationConfig::default(),
        }
    }

    pub fn with_config(config: EvaluationConfig) -> Self {
        Self { config }
    }

    pub fn evaluate_pair(
        &self,
        name: &str,
        predicted: &GrayImage,
        ground_truth: &GrayImage,
    ) -> Result<ImageEvaluation> {
        let threshold = self.config.binarize_threshold;
        let (width, height) = predicted.dimensions();
        let ground_truth = align_ground_truth(ground_truth, width, height, threshold);
        let truth = binarize_gray(&ground_truth, threshold);

        let scores = gray_to_array(predicted).mapv(|v| v / 255.0);
        let auc = roc_auc(&truth, &scores)?;

        let metrics = mask_metric(&binarize_gray(predicted, threshold), &truth)?;

        Ok(ImageEvaluation {
            name: name.to_string(),
            metrics,
            auc,
        })
    }

    /// Pairs every `<name>.png` in `predicted_dir` with
    /// `<name><suffix>` in `ground_truth_dir`, in file name order.
    pub fn evaluate_directory<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        predicted_dir: P,
        ground_truth_dir: Q,
    ) -> Result<(Vec<ImageEvaluation>, EvaluationSummary)> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(predicted_dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("png"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        let mut evaluations = Vec::with_capacity(files.len());
        for path in files {
            let stem = match path.file_stem() {
                Some(stem) => stem.to_string_lossy().to_string(),
                None => continue,
            };
            let truth_path = ground_truth_dir
                .as_ref()
                .join(format!("{}{}", stem, self.config.ground_truth_suffix));

            if !truth_path.exists() {
                warn!("No ground truth for {}, skipping", path.display());
                continue;
            }

            let predicted = image::open(&path)?.to_luma8();
            let ground_truth = image::open(&truth_path)?.to_luma8();
            evaluations.push(self.evaluate_pair(&stem, &predicted, &ground_truth)?);
        }

        let summary = EvaluationSummary::from_evaluations(&evaluations);
        info!(
            "Evaluation over {} images: AUC {:.4}, F1 {:.4}, ACC {:.4}, PRECISION {:.4}, RECALL {:.4}",
            summary.images,
            summary.auc,
            summary.f1,
            summary.accuracy,
            summary.precision,
            summary.recall
        );

        Ok((evaluations, summary))
    }
}

impl Default for MaskEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_metric_on_two_by_two() {
        let predicted = array![[true, false], [false, true]];
        let truth = array![[true, false], [false, false]];
        let m = mask_metric(&predicted, &truth).unwrap();

        assert_eq!(
            (m.true_positives, m.true_negatives, m.false_positives, m.false_negatives),
            (1, 2, 1, 0)
        );
        assert_eq!(m.accuracy, 0.75);
        assert_eq!(m.precision, 0.5);
        assert_eq!(m.recall, 1.0);
        assert_eq!(m.iou, 0.5);
        assert!((m.f1 - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_metric_with_roles_swapped() {
        let predicted = array![[true, false], [false, false]];
        let truth = array![[true, false], [false, true]];
        let m = mask_metric(&predicted, &truth).unwrap();

        assert_eq!(m.false_negatives, 1);
        assert_eq!(m.accuracy, 0.75);
        assert_eq!(m.precision, 1.0);
        assert_eq!(m.recall, 0.5);
        assert_eq!(m.iou, 0.5);
    }

    #[test]
    fn test_all_background_is_perfect_iou() {
        let empty = Array2::from_elem((3, 3), false);
        let m = mask_metric(&empty, &empty).unwrap();
        assert_eq!(m.iou, 1.0);
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.f1, 0.0);
    }

    #[test]
    fn test_metric_shape_mismatch() {
        let a = Array2::from_elem((2, 2), true);
        let b = Array2::from_elem((2, 3), true);
        assert!(matches!(
            mask_metric(&a, &b),
            Err(ForensicsError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_binarize_is_strictly_greater() {
        let mask = array![[127.0f32, 127.5, 255.0]];
        assert_eq!(binarize(&mask, 127.0), array![[false, true, true]]);
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let labels = array![[false, false, true, true]];
        let scores = array![[0.1f32, 0.2, 0.8, 0.9]];
        assert_eq!(roc_auc(&labels, &scores).unwrap(), Some(1.0));

        let inverted = scores.mapv(|v| 1.0 - v);
        assert_eq!(roc_auc(&labels, &inverted).unwrap(), Some(0.0));
    }

    #[test]
    fn test_auc_ties_count_half() {
        let labels = array![[false, true]];
        let scores = array![[0.5f32, 0.5]];
        assert_eq!(roc_auc(&labels, &scores).unwrap(), Some(0.5));
    }

    #[test]
    fn test_auc_undefined_for_single_class() {
        let labels = Array2::from_elem((2, 2), true);
        let scores = Array2::from_elem((2, 2), 0.3f32);
        assert_eq!(roc_auc(&labels, &scores).unwrap(), None);
    }

    #[test]
    fn test_align_ground_truth_rebinarizes() {
        let truth = GrayImage::from_fn(4, 4, |x, _| Luma([if x < 2 { 0 } else { 255 }]));
        let aligned = align_ground_truth(&truth, 8, 8, 127);
        assert_eq!(aligned.dimensions(), (8, 8));
        assert!(aligned.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert_eq!(aligned.get_pixel(0, 0)[0], 0);
        assert_eq!(aligned.get_pixel(7, 7)[0], 255);
    }

    #[test]
    fn test_evaluate_pair_perfect_prediction() {
        let truth = GrayImage::from_fn(6, 6, |x, y| Luma([if x + y > 5 { 255 } else { 0 }]));
        let eval = MaskEvaluator::new().evaluate_pair("a", &truth, &truth).unwrap();
        assert_eq!(eval.metrics.accuracy, 1.0);
        assert_eq!(eval.metrics.iou, 1.0);
        assert_eq!(eval.auc, Some(1.0));
    }

    #[test]
    fn test_summary_means_skip_missing_auc() {
        let metrics = |f1: f64| MaskMetrics {
            true_positives: 0,
            true_negatives: 0,
            false_positives: 0,
            false_negatives: 0,
            accuracy: 1.0,
            precision: 0.5,
            recall: 0.5,
            f1,
            iou: 1.0,
        };
        let evaluations = vec![
            ImageEvaluation {
                name: "a".into(),
                metrics: metrics(0.2),
                auc: Some(0.9),
            },
            ImageEvaluation {
                name: "b".into(),
                metrics: metrics(0.4),
                auc: None,
            },
        ];

        let summary = EvaluationSummary::from_evaluations(&evaluations);
        assert_eq!(summary.images, 2);
        assert!((summary.f1 - 0.3).abs() < 1e-12);
        assert!((summary.auc - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_directory_pairs_by_suffix() {
        let predicted_dir = tempfile::tempdir().unwrap();
        let truth_dir = tempfile::tempdir().unwrap();

        let mask = GrayImage::from_fn(4, 4, |x, _| Luma([if x < 2 { 0 } else { 255 }]));
        mask.save(predicted_dir.path().join("one.png")).unwrap();
        mask.save(truth_dir.path().join("one_gt.png")).unwrap();
        mask.save(predicted_dir.path().join("orphan.png")).unwrap();

        let (evaluations, summary) = MaskEvaluator::new()
            .evaluate_directory(predicted_dir.path(), truth_dir.path())
            .unwrap();
        assert_eq!(evaluations.len(), 1);
        assert_eq!(evaluations[0].name, "one");
        assert_eq!(summary.accuracy, 1.0);
    }
}
