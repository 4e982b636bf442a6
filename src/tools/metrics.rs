//! Summary statistics that quantify correction quality.
//!
//! The central measure is the per-gene absolute difference between batch
//! means: a successful correction shifts its distribution towards zero.
//! The module also scores covariate models by explained variance and runs
//! per-gene Welch tests with Benjamini-Hochberg adjustment to count genes
//! that still differ significantly between batches.

use adjustp::{adjust, Procedure};
use anyhow::{ensure, Context, Result};
use itertools::izip;
use log::debug;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::data_structs::{BatchLabel, ExpressionMatrix};
use crate::tools::correct::LinearFit;
use crate::utils;

/// The distribution of per-gene absolute differences between the two batch
/// means of a matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDivergence {
    genes:    Vec<String>,
    per_gene: Vec<f64>,
    pub mean:   f64,
    pub median: f64,
    pub max:    f64,
}

impl BatchDivergence {
    /// Computes per-gene `|mean(batch1) - mean(batch2)|`.
    ///
    /// Defined for exactly two batches; more levels are a configuration
    /// error, not a silent reduction.
    pub fn compute(
        matrix: &ExpressionMatrix,
        batch: &BatchLabel,
    ) -> Result<Self> {
        ensure!(
            batch.len() == matrix.n_samples(),
            "batch label covers {} samples, matrix has {}",
            batch.len(),
            matrix.n_samples()
        );
        ensure!(
            batch.n_levels() == 2,
            "between-batch divergence is defined for exactly two batches, \
             '{}' has {}",
            batch.name(),
            batch.n_levels()
        );

        let first = batch.level_indices(0);
        let second = batch.level_indices(1);
        let per_gene: Vec<f64> = (0..matrix.n_genes())
            .map(|gene| {
                let column = matrix.gene(gene);
                let mean_first = first
                    .iter()
                    .map(|sample| column[*sample])
                    .sum::<f64>()
                    / first.len() as f64;
                let mean_second = second
                    .iter()
                    .map(|sample| column[*sample])
                    .sum::<f64>()
                    / second.len() as f64;
                (mean_first - mean_second).abs()
            })
            .collect();

        debug!(
            "Batch divergence across {} genes: mean {:.4}",
            per_gene.len(),
            utils::mean(&per_gene)
        );
        Ok(Self {
            genes: matrix.genes().to_vec(),
            mean: utils::mean(&per_gene),
            median: utils::median(&per_gene),
            max: per_gene
                .iter()
                .fold(0.0f64, |acc, x| acc.max(*x)),
            per_gene,
        })
    }

    pub fn genes(&self) -> &[String] { &self.genes }

    pub fn per_gene(&self) -> &[f64] { &self.per_gene }
}

/// Per-gene coefficients of determination of a single-covariate model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainedVariance {
    per_gene: Vec<f64>,
    pub mean: f64,
}

impl ExplainedVariance {
    pub fn per_gene(&self) -> &[f64] { &self.per_gene }
}

/// Fits `expression ~ intercept + covariate` per gene and reports how much
/// variance the covariate accounts for.
pub fn explained_variance(
    matrix: &ExpressionMatrix,
    covariate: &[f64],
) -> Result<ExplainedVariance> {
    let per_gene: Vec<f64> = (0..matrix.n_genes())
        .map(|gene| {
            let column = matrix.gene(gene);
            let fit = LinearFit::fit(covariate, column)?;
            Ok(fit.r_squared(covariate, column))
        })
        .collect::<Result<_>>()?;
    Ok(ExplainedVariance {
        mean: utils::mean(&per_gene),
        per_gene,
    })
}

/// A per-gene Welch test of the two batch means.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneBatchTest {
    pub gene:      String,
    pub statistic: f64,
    pub p_value:   f64,
    pub q_value:   f64,
}

/// Welch two-sample t-tests per gene with Benjamini-Hochberg adjustment.
///
/// Requires two batches with at least two samples each so that both group
/// variances are defined.
pub fn batch_ttests(
    matrix: &ExpressionMatrix,
    batch: &BatchLabel,
) -> Result<Vec<GeneBatchTest>> {
    ensure!(
        batch.len() == matrix.n_samples(),
        "batch label covers {} samples, matrix has {}",
        batch.len(),
        matrix.n_samples()
    );
    ensure!(
        batch.n_levels() == 2,
        "batch t-tests are defined for exactly two batches, '{}' has {}",
        batch.name(),
        batch.n_levels()
    );
    let first = batch.level_indices(0);
    let second = batch.level_indices(1);
    ensure!(
        first.len() >= 2 && second.len() >= 2,
        "both batches need at least two samples for a t-test"
    );

    let mut statistics = Vec::with_capacity(matrix.n_genes());
    let mut p_values = Vec::with_capacity(matrix.n_genes());
    for gene in 0..matrix.n_genes() {
        let column = matrix.gene(gene);
        let group_first: Vec<f64> =
            first.iter().map(|i| column[*i]).collect();
        let group_second: Vec<f64> =
            second.iter().map(|i| column[*i]).collect();
        let (statistic, p_value) =
            welch_test(&group_first, &group_second)?;
        statistics.push(statistic);
        p_values.push(p_value);
    }

    let q_values = adjust(&p_values, Procedure::BenjaminiHochberg);
    Ok(izip!(matrix.genes(), statistics, p_values, q_values)
        .map(|(gene, statistic, p_value, q_value)| {
            GeneBatchTest {
                gene: gene.clone(),
                statistic,
                p_value,
                q_value,
            }
        })
        .collect())
}

/// Number of genes whose adjusted p-value falls below `alpha`.
pub fn count_significant(
    tests: &[GeneBatchTest],
    alpha: f64,
) -> usize {
    tests
        .iter()
        .filter(|test| test.q_value < alpha)
        .count()
}

fn welch_test(
    first: &[f64],
    second: &[f64],
) -> Result<(f64, f64)> {
    let n1 = first.len() as f64;
    let n2 = second.len() as f64;
    let var1 = utils::variance(first);
    let var2 = utils::variance(second);
    let standard_error_sq = var1 / n1 + var2 / n2;

    // Two constant groups carry no evidence either way
    if standard_error_sq == 0.0 {
        return Ok((0.0, 1.0));
    }

    let statistic = (utils::mean(first) - utils::mean(second))
        / standard_error_sq.sqrt();
    let degrees = standard_error_sq.powi(2)
        / ((var1 / n1).powi(2) / (n1 - 1.0)
            + (var2 / n2).powi(2) / (n2 - 1.0));

    let distribution = StudentsT::new(0.0, 1.0, degrees)
        .context("invalid Welch degrees of freedom")?;
    let p_value = 2.0 * (1.0 - distribution.cdf(statistic.abs()));
    Ok((statistic, p_value.clamp(0.0, 1.0)))
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use ndarray::Array2;

    use super::*;
    use crate::data_structs::SampleMetadata;
    use crate::tools::simulate::{simulate, SimulationConfig, BATCH, RIN};

    fn two_batch_label(n: usize) -> BatchLabel {
        let values: Vec<String> = (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    "Batch_01".to_string()
                }
                else {
                    "Batch_02".to_string()
                }
            })
            .collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        BatchLabel::from_values("batch", &refs)
    }

    #[test]
    fn test_divergence_on_known_shift() {
        // Batch 1 rows at 0, batch 2 rows at 3 in both genes
        let values = Array2::from_shape_fn((4, 2), |(i, _)| {
            if i % 2 == 0 {
                0.0
            }
            else {
                3.0
            }
        });
        let matrix = ExpressionMatrix::new(
            (0..4).map(|i| format!("S{}", i)).collect(),
            vec!["G1".to_string(), "G2".to_string()],
            values,
        )
        .unwrap();
        let divergence =
            BatchDivergence::compute(&matrix, &two_batch_label(4)).unwrap();
        assert_approx_eq!(divergence.mean, 3.0);
        assert_approx_eq!(divergence.median, 3.0);
        assert_approx_eq!(divergence.max, 3.0);
        assert_eq!(divergence.per_gene().len(), 2);
    }

    #[test]
    fn test_divergence_rejects_more_than_two_batches() {
        let matrix = ExpressionMatrix::new(
            (0..3).map(|i| format!("S{}", i)).collect(),
            vec!["G1".to_string()],
            Array2::zeros((3, 1)),
        )
        .unwrap();
        let batch =
            BatchLabel::from_values("batch", &["a", "b", "c"]);
        let err = BatchDivergence::compute(&matrix, &batch).unwrap_err();
        assert!(err.to_string().contains("exactly two"));
    }

    #[test]
    fn test_control_genes_have_equal_divergence_before_and_after_noise() {
        let dataset = simulate(&SimulationConfig::default()).unwrap();
        let batch = dataset.metadata.categorical(BATCH).unwrap();
        let clean =
            BatchDivergence::compute(&dataset.clean, &batch).unwrap();
        let noisy =
            BatchDivergence::compute(&dataset.batch_noisy, &batch).unwrap();

        let n_genes = dataset.clean.n_genes();
        for gene in [n_genes - 2, n_genes - 1] {
            assert_approx_eq!(
                clean.per_gene()[gene],
                noisy.per_gene()[gene],
                1e-12
            );
        }
        // Affected genes picked up the injected shift
        assert!(noisy.mean > clean.mean);
    }

    #[test]
    fn test_explained_variance_on_injected_covariate() {
        let dataset = simulate(&SimulationConfig::default()).unwrap();
        let rin = dataset.metadata.continuous(RIN).unwrap();
        let clean =
            explained_variance(&dataset.clean, &rin).unwrap();
        let noisy =
            explained_variance(&dataset.covariate_noisy, &rin).unwrap();
        assert!(
            noisy.mean > clean.mean,
            "injected covariate should raise explained variance ({} vs {})",
            noisy.mean,
            clean.mean
        );
    }

    #[test]
    fn test_explained_variance_perfect_fit() {
        let covariate = vec![0.5, 1.5, 2.5, 3.5];
        let values =
            Array2::from_shape_fn((4, 1), |(i, _)| 2.0 * covariate[i]);
        let matrix = ExpressionMatrix::new(
            (0..4).map(|i| format!("S{}", i)).collect(),
            vec!["G1".to_string()],
            values,
        )
        .unwrap();
        let score = explained_variance(&matrix, &covariate).unwrap();
        assert_approx_eq!(score.mean, 1.0, 1e-12);
    }

    #[test]
    fn test_ttests_flag_shifted_genes() {
        let dataset = simulate(
            &SimulationConfig::default()
                .with_shape(40, 20)
                .with_seed(99),
        )
        .unwrap();
        let batch = dataset.metadata.categorical(BATCH).unwrap();
        let tests = batch_ttests(&dataset.batch_noisy, &batch).unwrap();
        assert_eq!(tests.len(), 20);
        for test in &tests {
            assert!(test.p_value >= 0.0 && test.p_value <= 1.0);
            assert!(test.q_value >= test.p_value - 1e-12);
        }
    }

    #[test]
    fn test_ttests_on_pure_noise_stay_insignificant() {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let values =
            Array2::from_shape_fn((20, 50), |_| rng.gen::<f64>() - 0.5);
        let matrix = ExpressionMatrix::new(
            (0..20).map(|i| format!("S{}", i)).collect(),
            (0..50).map(|j| format!("G{}", j)).collect(),
            values,
        )
        .unwrap();

        let tests = batch_ttests(&matrix, &two_batch_label(20)).unwrap();
        // No real batch structure: the BH-adjusted counts stay near zero
        assert!(count_significant(&tests, 0.05) <= 5);
    }

    #[test]
    fn test_metadata_roundtrip_for_batch_label() {
        let metadata = SampleMetadata::new(vec![
            "S1".to_string(),
            "S2".to_string(),
        ])
        .unwrap()
        .with_categorical("batch", vec![
            "a".to_string(),
            "b".to_string(),
        ])
        .unwrap();
        let batch = metadata.categorical("batch").unwrap();
        assert_eq!(batch.n_levels(), 2);
    }
}
