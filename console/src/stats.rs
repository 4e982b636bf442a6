use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use scombat::data_structs::{BatchLabel, ExpressionMatrix};
use scombat::tools::metrics::{
    batch_ttests, count_significant, BatchDivergence,
};
use serde::Serialize;

use crate::utils::{read_matrix, read_metadata};

#[derive(Args, Debug, Clone)]
pub(crate) struct StatsArgs {
    #[arg(help = "Path of the uncorrected expression CSV.")]
    before: PathBuf,
    #[arg(help = "Path of the corrected expression CSV.")]
    after: PathBuf,
    #[arg(
        short,
        long,
        required = true,
        help = "Path of the sample metadata CSV."
    )]
    metadata: PathBuf,
    #[arg(
        long,
        default_value = "batch",
        help = "Categorical variable that defines the batches."
    )]
    batch: String,
    #[arg(
        long,
        default_value_t = 0.05,
        help = "Significance threshold for adjusted p-values."
    )]
    alpha: f64,
    #[arg(
        long,
        help = "Include a within/between-batch summary of the corrected \
                matrix's sample correlation."
    )]
    correlation: bool,
    #[arg(short, long, help = "Optional path for the JSON report.")]
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct CorrelationSummary {
    within_batch:  f64,
    between_batch: f64,
}

#[derive(Debug, Serialize)]
struct Report {
    before:             BatchDivergence,
    after:              BatchDivergence,
    significant_before: usize,
    significant_after:  usize,
    alpha:              f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation:        Option<CorrelationSummary>,
}

impl StatsArgs {
    pub fn run(&self) -> Result<()> {
        let before = read_matrix(&self.before)?;
        let after = read_matrix(&self.after)?;
        let metadata = read_metadata(&self.metadata)?;
        before.align(&metadata)?;
        after.align(&metadata)?;
        let batch = metadata.categorical(&self.batch)?;

        let report = Report {
            before: BatchDivergence::compute(&before, &batch)?,
            after: BatchDivergence::compute(&after, &batch)?,
            significant_before: count_significant(
                &batch_ttests(&before, &batch)?,
                self.alpha,
            ),
            significant_after: count_significant(
                &batch_ttests(&after, &batch)?,
                self.alpha,
            ),
            alpha: self.alpha,
            correlation: self
                .correlation
                .then(|| correlation_summary(&after, &batch)),
        };

        println!(
            "{} mean |batch1 - batch2| {:.4} -> {:.4}",
            style("Divergence:").green().bold(),
            report.before.mean,
            report.after.mean
        );
        println!(
            "{} {} -> {} genes at alpha = {}",
            style("Significant:").green().bold(),
            report.significant_before,
            report.significant_after,
            report.alpha
        );
        if let Some(correlation) = &report.correlation {
            println!(
                "{} within {:.4}, between {:.4}",
                style("Sample correlation:").green().bold(),
                correlation.within_batch,
                correlation.between_batch
            );
        }

        if let Some(path) = &self.output {
            let json = serde_json::to_string_pretty(&report)?;
            let mut file = File::create(path).with_context(|| {
                format!("could not create '{}'", path.display())
            })?;
            file.write_all(json.as_bytes())?;
        }
        Ok(())
    }
}

/// Mean pairwise sample correlation, split into pairs that share a batch
/// and pairs that do not. Residual batch structure shows up as a gap
/// between the two.
fn correlation_summary(
    matrix: &ExpressionMatrix,
    batch: &BatchLabel,
) -> CorrelationSummary {
    let correlation = matrix.sample_correlation();
    let codes = batch.codes();

    let mut within = (0.0, 0usize);
    let mut between = (0.0, 0usize);
    for i in 0..matrix.n_samples() {
        for j in (i + 1)..matrix.n_samples() {
            if codes[i] == codes[j] {
                within.0 += correlation[[i, j]];
                within.1 += 1;
            }
            else {
                between.0 += correlation[[i, j]];
                between.1 += 1;
            }
        }
    }

    CorrelationSummary {
        within_batch:  within.0 / within.1.max(1) as f64,
        between_batch: between.0 / between.1.max(1) as f64,
    }
}
