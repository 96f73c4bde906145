//! Precision and recall of reported issues against ground-truth labels.
//!
//! Both sides are reduced to sets of `(element, issue_type)` pairs, so
//! repeated issues of the same kind count once.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::classify::ChangeClass;
use crate::detect::ElementType;
use crate::issue::Issue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroundTruthLabel {
    pub element: ElementType,
    pub issue_type: ChangeClass,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub precision: f64,
    pub recall: f64,
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
}

/// Only the `issues` array of a results file is read.
#[derive(Deserialize)]
struct ResultsFile {
    issues: Vec<Issue>,
}

pub fn evaluate(issues: &[Issue], labels: &[GroundTruthLabel]) -> EvaluationMetrics {
    let truth: BTreeSet<GroundTruthLabel> = labels.iter().copied().collect();
    let predicted: BTreeSet<GroundTruthLabel> = issues
        .iter()
        .map(|i| GroundTruthLabel {
            element: i.element,
            issue_type: i.issue_type,
        })
        .collect();
    let tp = truth.intersection(&predicted).count();
    let fp = predicted.difference(&truth).count();
    let fn_ = truth.difference(&predicted).count();
    let ratio = |num: usize, den: usize| if den > 0 { round3(num as f64 / den as f64) } else { 0.0 };
    EvaluationMetrics {
        precision: ratio(tp, tp + fp),
        recall: ratio(tp, tp + fn_),
        tp,
        fp,
        fn_,
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

pub fn load_labels(path: &Path) -> Result<Vec<GroundTruthLabel>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse labels {}", path.display()))
}

/// Issues from a results file written by the `roadcompare` binary.
pub fn load_issues(path: &Path) -> Result<Vec<Issue>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read results {}", path.display()))?;
    let results: ResultsFile =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse results {}", path.display()))?;
    Ok(results.issues)
}
