//! Threshold-sweep evaluation
//!
//! Scores a probability output against binary ground truth over a grid of
//! decision thresholds and picks the operating point with the highest F1.
//! A score equal to the threshold counts as a positive prediction.

use crate::error::PanelError;
use serde::{Deserialize, Serialize};

/// Threshold grid `start, start + step, ..., stop` (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdGrid {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl Default for ThresholdGrid {
    fn default() -> Self {
        Self {
            start: 0.10,
            stop: 0.90,
            step: 0.05,
        }
    }
}

impl ThresholdGrid {
    pub fn validate(&self) -> Result<(), PanelError> {
        let finite = self.start.is_finite() && self.stop.is_finite() && self.step.is_finite();
        if !finite || self.step <= 0.0 || self.start > self.stop {
            return Err(PanelError::InvalidConfig(format!(
                "threshold grid must satisfy start <= stop and step > 0, got {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Grid points generated by integer steps and rounded to 1e-9, so the
    /// default grid contains exactly 0.5
    pub fn thresholds(&self) -> Vec<f64> {
        if self.validate().is_err() {
            return Vec::new();
        }
        let steps = ((self.stop - self.start) / self.step + 1e-9).floor() as usize;
        (0..=steps)
            .map(|i| {
                let t = self.start + i as f64 * self.step;
                (t * 1e9).round() / 1e9
            })
            .collect()
    }
}

/// Confusion counts and positive-class metrics at one threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdMetrics {
    pub threshold: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// precision + recall was 0, so F1 was defined as 0
    pub degenerate: bool,
}

/// Full sweep result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub metrics: Vec<ThresholdMetrics>,
    pub best: Option<ThresholdMetrics>,
    pub positives: usize,
    pub negatives: usize,
    pub prevalence: f64,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn validate_inputs(scores: &[f64], labels: &[u8]) -> Result<(), PanelError> {
    if scores.len() != labels.len() {
        return Err(PanelError::LengthMismatch {
            scores: scores.len(),
            labels: labels.len(),
        });
    }
    if let Some((index, value)) = scores
        .iter()
        .enumerate()
        .find(|(_, s)| !s.is_finite() || **s < 0.0 || **s > 1.0)
    {
        return Err(PanelError::InvalidScore {
            index,
            value: *value,
        });
    }
    if let Some(bad) = labels.iter().find(|l| **l > 1) {
        return Err(PanelError::InvalidConfig(format!(
            "labels must be 0 or 1, found {}",
            bad
        )));
    }
    Ok(())
}

/// Metrics at a single threshold
pub fn metrics_at(scores: &[f64], labels: &[u8], threshold: f64) -> ThresholdMetrics {
    let (mut tp, mut fp, mut fn_, mut tn) = (0, 0, 0, 0);
    for (score, label) in scores.iter().zip(labels) {
        match (*score >= threshold, *label == 1) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => tn += 1,
        }
    }

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let degenerate = precision + recall == 0.0;
    let f1 = if degenerate {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };

    ThresholdMetrics {
        threshold,
        true_positives: tp,
        false_positives: fp,
        false_negatives: fn_,
        true_negatives: tn,
        precision,
        recall,
        f1,
        degenerate,
    }
}

/// Metrics for every threshold, in ascending threshold order
pub fn sweep(
    scores: &[f64],
    labels: &[u8],
    thresholds: &[f64],
) -> Result<Vec<ThresholdMetrics>, PanelError> {
    validate_inputs(scores, labels)?;
    let mut ordered = thresholds.to_vec();
    ordered.sort_by(f64::total_cmp);
    Ok(ordered
        .into_iter()
        .map(|t| metrics_at(scores, labels, t))
        .collect())
}

/// Highest-F1 row; ties go to the first (lowest) threshold
pub fn best(table: &[ThresholdMetrics]) -> Option<ThresholdMetrics> {
    table.iter().fold(None, |best: Option<ThresholdMetrics>, row| match best {
        Some(current) if current.f1 >= row.f1 => Some(current),
        _ => Some(*row),
    })
}

/// Sweeps a threshold grid and summarises the operating point
#[derive(Debug, Clone, Default)]
pub struct ThresholdSweepEvaluator {
    grid: ThresholdGrid,
}

impl ThresholdSweepEvaluator {
    pub fn new(grid: ThresholdGrid) -> Result<Self, PanelError> {
        grid.validate()?;
        Ok(Self { grid })
    }

    pub fn grid(&self) -> &ThresholdGrid {
        &self.grid
    }

    pub fn evaluate(&self, scores: &[f64], labels: &[u8]) -> Result<EvaluationReport, PanelError> {
        let metrics = sweep(scores, labels, &self.grid.thresholds())?;
        let best = best(&metrics);
        let positives = labels.iter().filter(|l| **l == 1).count();
        let negatives = labels.len() - positives;

        let degenerate = metrics.iter().filter(|m| m.degenerate).count();
        if degenerate > 0 {
            log::debug!("{} threshold(s) had precision + recall = 0", degenerate);
        }
        if let Some(b) = &best {
            log::info!(
                "Best threshold {:.2}: precision {:.3}, recall {:.3}, F1 {:.3}",
                b.threshold,
                b.precision,
                b.recall,
                b.f1
            );
        }

        Ok(EvaluationReport {
            metrics,
            best,
            positives,
            negatives,
            prevalence: ratio(positives, labels.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grid() {
        let thresholds = ThresholdGrid::default().thresholds();
        assert_eq!(thresholds.len(), 17);
        assert_eq!(thresholds[0], 0.1);
        assert_eq!(thresholds[8], 0.5);
        assert_eq!(thresholds[16], 0.9);
    }

    #[test]
    fn test_invalid_grid() {
        let grid = ThresholdGrid {
            start: 0.5,
            stop: 0.1,
            step: 0.05,
        };
        assert!(grid.validate().is_err());
        assert!(grid.thresholds().is_empty());
        assert!(ThresholdSweepEvaluator::new(ThresholdGrid {
            step: 0.0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_perfect_at_half() {
        let scores = [0.05, 0.5, 0.95];
        let labels = [0, 1, 1];
        let m = metrics_at(&scores, &labels, 0.5);

        assert_eq!(
            (m.true_positives, m.false_positives, m.false_negatives, m.true_negatives),
            (2, 0, 0, 1)
        );
        assert_eq!(m.precision, 1.0);
        assert_eq!(m.recall, 1.0);
        assert_eq!(m.f1, 1.0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let m = metrics_at(&[0.3], &[1], 0.3);
        assert_eq!(m.true_positives, 1);
    }

    #[test]
    fn test_all_negative_predictions() {
        let m = metrics_at(&[0.1, 0.2, 0.3], &[1, 0, 1], 0.9);
        assert_eq!(m.true_positives, 0);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert!(m.degenerate);
        assert!(!m.f1.is_nan());
    }

    #[test]
    fn test_no_positive_labels() {
        let m = metrics_at(&[0.6, 0.7], &[0, 0], 0.5);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert!(m.degenerate);
    }

    #[test]
    fn test_recall_non_increasing() {
        let scores = [0.12, 0.33, 0.47, 0.5, 0.58, 0.61, 0.74, 0.88, 0.91, 0.2, 0.05, 0.66];
        let labels = [0, 1, 0, 1, 1, 0, 1, 0, 1, 1, 0, 0];
        let table = sweep(&scores, &labels, &ThresholdGrid::default().thresholds()).unwrap();
        for pair in table.windows(2) {
            assert!(pair[1].recall <= pair[0].recall);
        }
    }

    #[test]
    fn test_best_ties_go_to_lowest_threshold() {
        // every threshold in (0.2, 0.8] separates perfectly
        let scores = [0.1, 0.2, 0.8, 0.9];
        let labels = [0, 0, 1, 1];
        let table = sweep(&scores, &labels, &[0.7, 0.3, 0.5]).unwrap();
        let chosen = best(&table).unwrap();
        assert_eq!(chosen.threshold, 0.3);
        assert_eq!(chosen.f1, 1.0);
        assert!(best(&[]).is_none());
    }

    #[test]
    fn test_input_validation() {
        assert!(matches!(
            sweep(&[0.5], &[1, 0], &[0.5]),
            Err(PanelError::LengthMismatch { scores: 1, labels: 2 })
        ));
        assert!(matches!(
            sweep(&[0.5, f64::NAN], &[1, 0], &[0.5]),
            Err(PanelError::InvalidScore { index: 1, .. })
        ));
        assert!(sweep(&[1.5], &[1], &[0.5]).is_err());
        assert!(sweep(&[0.5], &[2], &[0.5]).is_err());
    }

    #[test]
    fn test_evaluator_report() {
        let evaluator = ThresholdSweepEvaluator::default();
        let report = evaluator.evaluate(&[0.05, 0.5, 0.95], &[0, 1, 1]).unwrap();

        assert_eq!(report.metrics.len(), 17);
        assert_eq!(report.positives, 2);
        assert_eq!(report.negatives, 1);
        assert!((report.prevalence - 2.0 / 3.0).abs() < 1e-12);

        let best = report.best.unwrap();
        assert_eq!(best.f1, 1.0);
        // first threshold in the grid that separates the classes
        assert_eq!(best.threshold, 0.1);
    }
}
