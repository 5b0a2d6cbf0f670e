//! Evaluation metrics recorded with every published model.

use std::collections::BTreeSet;

use depot_artifact_store::Metrics;
use ndarray::Array2;

/// Accuracy, weighted precision/recall/F1, and `roc_auc` when it is defined.
///
/// `roc_auc` needs scores from a model fitted on exactly two classes and an
/// evaluation set that contains both; otherwise it is left out rather than
/// reported as zero. The positive class is the second of the sorted `classes`.
#[must_use]
pub fn evaluate(
    y_true: &[String],
    y_pred: &[String],
    classes: &[String],
    scores: Option<&Array2<f64>>,
) -> Metrics {
    let weighted = weighted_scores(y_true, y_pred);
    let mut metrics = Metrics::new();
    metrics.insert("accuracy".into(), accuracy(y_true, y_pred));
    metrics.insert("precision".into(), weighted.precision);
    metrics.insert("recall".into(), weighted.recall);
    metrics.insert("f1_score".into(), weighted.f1);
    if let (Some(scores), [_, positive]) = (scores, classes) {
        let is_positive: Vec<bool> = y_true.iter().map(|label| label == positive).collect();
        let positive_scores: Vec<f64> = scores.column(1).to_vec();
        if let Some(auc) = roc_auc(&is_positive, &positive_scores) {
            metrics.insert("roc_auc".into(), auc);
        }
    }
    metrics
}

/// Share of exact matches; `0.0` for empty input.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn accuracy(y_true: &[String], y_pred: &[String]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let hits = y_true.iter().zip(y_pred).filter(|(truth, pred)| truth == pred).count();
    hits as f64 / y_true.len() as f64
}

/// Support-weighted averages over classes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedScores {
    /// Weighted precision.
    pub precision: f64,
    /// Weighted recall.
    pub recall: f64,
    /// Weighted F1.
    pub f1: f64,
}

/// Per-class precision, recall and F1 averaged with true-class support as weight.
/// A ratio with a zero denominator counts as `0.0`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn weighted_scores(y_true: &[String], y_pred: &[String]) -> WeightedScores {
    let labels: BTreeSet<&String> = y_true.iter().chain(y_pred).collect();
    let mut totals = WeightedScores {
        precision: 0.0,
        recall: 0.0,
        f1: 0.0,
    };
    let mut support_total = 0_usize;
    for label in labels {
        let mut true_positive = 0_usize;
        let mut predicted = 0_usize;
        let mut support = 0_usize;
        for (truth, pred) in y_true.iter().zip(y_pred) {
            let is_true = truth == label;
            let is_pred = pred == label;
            support += usize::from(is_true);
            predicted += usize::from(is_pred);
            true_positive += usize::from(is_true && is_pred);
        }
        let precision = ratio(true_positive, predicted);
        let recall = ratio(true_positive, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        let weight = support as f64;
        totals.precision += weight * precision;
        totals.recall += weight * recall;
        totals.f1 += weight * f1;
        support_total += support;
    }
    if support_total == 0 {
        return totals;
    }
    let support_total = support_total as f64;
    WeightedScores {
        precision: totals.precision / support_total,
        recall: totals.recall / support_total,
        f1: totals.f1 / support_total,
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Area under the ROC curve via the Mann-Whitney U statistic, averaging the
/// ranks of tied scores. `None` unless both outcomes are present.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn roc_auc(is_positive: &[bool], scores: &[f64]) -> Option<f64> {
    let positives = is_positive.iter().filter(|flag| **flag).count();
    let negatives = is_positive.len().saturating_sub(positives);
    if positives == 0 || negatives == 0 || scores.len() != is_positive.len() {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]].total_cmp(&scores[order[start]]).is_eq() {
            end += 1;
        }
        // Ranks are 1-based; a tie group shares the mean of its ranks.
        let mean_rank = (start + 1 + end) as f64 / 2.0;
        let tied_positives = order[start..end].iter().filter(|idx| is_positive[**idx]).count();
        positive_rank_sum += mean_rank * tied_positives as f64;
        start = end;
    }
    let positives_f = positives as f64;
    let u = positive_rank_sum - positives_f * (positives_f + 1.0) / 2.0;
    Some(u / (positives_f * negatives as f64))
}
