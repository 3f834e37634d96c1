pub mod config_ops;
pub mod replay_ops;
#[cfg(feature = "neural")]
pub mod score_ops;

use serde::Serialize;

use gptrank_core::scorer::rank_order;
use gptrank_core::{ScoreTrajectory, Sequence};

/// One scored sequence as printed by `score` and `replay`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceReport {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub tokens: Vec<u32>,
    pub probabilities: Vec<f32>,
    pub log_prob: f64,
    pub skipped_prefix: usize,
}

impl SequenceReport {
    pub fn new(index: usize, sequence: &Sequence, trajectory: &ScoreTrajectory) -> Self {
        Self {
            index,
            text: sequence.text().map(str::to_string),
            tokens: sequence.tokens().to_vec(),
            probabilities: trajectory.probabilities().to_vec(),
            log_prob: trajectory.log_prob(),
            skipped_prefix: trajectory.skipped_prefix(),
        }
    }
}

#[derive(Serialize)]
struct BatchReport<'a> {
    sequences: &'a [SequenceReport],
    ranking: Vec<usize>,
}

/// Report indices from most to least plausible; ties keep input order and
/// NaN scores go last.
pub fn ranking(reports: &[SequenceReport]) -> Vec<usize> {
    let mut order: Vec<&SequenceReport> = reports.iter().collect();
    order.sort_by(|a, b| rank_order(a.log_prob, b.log_prob));
    order.iter().map(|r| r.index).collect()
}

pub fn print_reports(reports: &[SequenceReport], json: bool) {
    let ranking = ranking(reports);
    if json {
        let report = BatchReport {
            sequences: reports,
            ranking,
        };
        let out = die!(serde_json::to_string_pretty(&report), "Error serializing report: {}");
        println!("{out}");
        return;
    }

    for r in reports {
        match &r.text {
            Some(text) => println!("[{}] {text}", r.index),
            None => println!("[{}]", r.index),
        }
        println!("  tokens:        {:?}", r.tokens);
        let probs: Vec<String> = r.probabilities.iter().map(|p| format!("{p:.4}")).collect();
        println!("  probabilities: [{}]", probs.join(", "));
        if r.skipped_prefix > 0 {
            println!("  shared prefix: {} position(s) fixed at 1.0", r.skipped_prefix);
        }
        println!("  log_prob:      {:.4}", r.log_prob);
    }
    println!();
    println!("Ranking:");
    for (rank, &index) in ranking.iter().enumerate() {
        let r = &reports[index];
        let label = r.text.as_deref().unwrap_or("");
        println!("#{:>2}: [{index}] {:>10.4}  {label}", rank + 1, r.log_prob);
    }
}
