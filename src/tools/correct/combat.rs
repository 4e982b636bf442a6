use anyhow::{bail, ensure, Result};
use log::{debug, trace};
use ndarray::{s, Array1, Array2};

use crate::data_structs::{
    BatchLabel, DesignMatrix, DesignModel, ExpressionMatrix, SampleMetadata,
};
use crate::tools::correct::BatchCorrector;
use crate::utils;

const MAX_ITERATIONS: usize = 1000;

/// Empirical-Bayes location/scale batch correction.
///
/// For every gene the corrector estimates a per-batch additive shift and a
/// per-batch variance inflation, shrinks both towards priors fitted across
/// all genes (normal prior for the shift, inverse-gamma for the scale), and
/// rescales each sample to remove the shrunken batch effect. Signal
/// explained by covariates named in the design model is folded into the
/// standardized mean and restored untouched.
#[derive(Debug, Clone)]
pub struct CombatCorrector {
    convergence: f64,
}

impl CombatCorrector {
    pub fn new() -> Self { Self::default() }

    /// Relative-change threshold that stops the shrinkage iteration.
    pub fn with_convergence(
        mut self,
        convergence: f64,
    ) -> Self {
        self.convergence = convergence;
        self
    }
}

impl Default for CombatCorrector {
    fn default() -> Self {
        Self {
            convergence: 1e-4,
        }
    }
}

impl BatchCorrector for CombatCorrector {
    fn correct(
        &self,
        matrix: &ExpressionMatrix,
        metadata: &SampleMetadata,
        batch: &str,
        design: &DesignModel,
    ) -> Result<ExpressionMatrix> {
        matrix.align(metadata)?;
        let batch = metadata.categorical(batch)?;
        for (level, size) in batch
            .levels()
            .iter()
            .zip(batch.level_sizes())
        {
            ensure!(
                size >= 2,
                "batch '{}' has {} sample(s); at least two are required to \
                 estimate a scale",
                level,
                size
            );
        }
        ensure!(
            matrix.n_genes() >= 2,
            "empirical-Bayes shrinkage requires at least two genes"
        );

        let design = DesignMatrix::new(&batch, metadata, design)?;
        let n = matrix.n_samples();
        let n_genes = matrix.n_genes();
        let values = matrix.values();

        let coefs = design.solve(values)?;
        debug!(
            "Fitted {} design coefficients for {} genes",
            coefs.nrows(),
            n_genes
        );

        // Batch-size weighted grand mean per gene
        let sizes = batch.level_sizes();
        let mut grand_mean = Array1::<f64>::zeros(n_genes);
        for (level, size) in sizes.iter().enumerate() {
            grand_mean
                .scaled_add(*size as f64 / n as f64, &coefs.row(level));
        }

        // Standardized mean: grand mean plus the preserved covariate
        // contribution, replicated across samples
        let mut stand_mean =
            Array2::from_shape_fn((n, n_genes), |(_, gene)| grand_mean[gene]);
        if design.covariate_cols() > 0 {
            let cov_design = design
                .matrix()
                .slice_move(s![.., design.n_batches()..]);
            let cov_coefs = coefs.slice(s![design.n_batches().., ..]);
            stand_mean += &cov_design.dot(&cov_coefs);
        }

        // Pooled residual variance per gene
        let fitted = design.matrix().dot(&coefs);
        let residuals = values - &fitted;
        let var_pooled: Vec<f64> = (0..n_genes)
            .map(|gene| {
                residuals
                    .column(gene)
                    .iter()
                    .map(|r| r * r)
                    .sum::<f64>()
                    / n as f64
            })
            .collect();
        for (gene, var) in var_pooled.iter().enumerate() {
            ensure!(
                *var > 0.0,
                "gene '{}' has zero residual variance",
                matrix.genes()[gene]
            );
        }

        // Standardize
        let mut adjusted = values - &stand_mean;
        for (gene, mut column) in adjusted
            .columns_mut()
            .into_iter()
            .enumerate()
        {
            let sd = var_pooled[gene].sqrt();
            column.mapv_inplace(|v| v / sd);
        }

        // Per-batch shrinkage and adjustment, applied in place
        for level in 0..batch.n_levels() {
            self.adjust_batch(&mut adjusted, &batch, level)?;
        }

        // Restore pooled scale and the standardized mean
        for (gene, mut column) in adjusted
            .columns_mut()
            .into_iter()
            .enumerate()
        {
            let sd = var_pooled[gene].sqrt();
            column.mapv_inplace(|v| v * sd);
        }
        adjusted += &stand_mean;

        matrix.with_values(adjusted)
    }
}

impl CombatCorrector {
    fn adjust_batch(
        &self,
        standardized: &mut Array2<f64>,
        batch: &BatchLabel,
        level: usize,
    ) -> Result<()> {
        let indices = batch.level_indices(level);
        let n_genes = standardized.ncols();
        let batch_values = Array2::from_shape_fn(
            (indices.len(), n_genes),
            |(row, gene)| standardized[[indices[row], gene]],
        );

        let mut gamma_hat = Vec::with_capacity(n_genes);
        let mut delta_hat = Vec::with_capacity(n_genes);
        for gene in 0..n_genes {
            let column = batch_values.column(gene).to_vec();
            gamma_hat.push(utils::mean(&column));
            delta_hat.push(utils::variance(&column));
        }

        let gamma_bar = utils::mean(&gamma_hat);
        let tau_sq = utils::variance(&gamma_hat);
        let (a_prior, b_prior) = inverse_gamma_priors(&delta_hat)?;
        trace!(
            "Batch '{}': gamma_bar = {:.4}, tau_sq = {:.4}, priors = \
             ({:.4}, {:.4})",
            batch.levels()[level],
            gamma_bar,
            tau_sq,
            a_prior,
            b_prior
        );

        let (gamma_star, delta_star) = shrink(
            &batch_values,
            &gamma_hat,
            &delta_hat,
            gamma_bar,
            tau_sq,
            a_prior,
            b_prior,
            self.convergence,
        )?;

        for gene in 0..n_genes {
            let scale = delta_star[gene].sqrt();
            for sample in &indices {
                standardized[[*sample, gene]] =
                    (standardized[[*sample, gene]] - gamma_star[gene]) / scale;
            }
        }
        Ok(())
    }
}

/// Method-of-moments hyperparameters of the inverse-gamma prior on the
/// per-gene batch variances.
fn inverse_gamma_priors(delta_hat: &[f64]) -> Result<(f64, f64)> {
    let m = utils::mean(delta_hat);
    let s2 = utils::variance(delta_hat);
    ensure!(
        s2 > 0.0,
        "per-gene scale estimates have no spread; cannot fit the \
         inverse-gamma prior"
    );
    let a_prior = (2.0 * s2 + m * m) / s2;
    let b_prior = (m * s2 + m * m * m) / s2;
    Ok((a_prior, b_prior))
}

/// Fixed-point iteration towards the posterior batch location and scale.
///
/// Locations shrink towards `gamma_bar` proportionally to `tau_sq`; scales
/// towards the inverse-gamma prior mode. Stops when the largest relative
/// change across genes falls below `convergence`.
#[allow(clippy::too_many_arguments)]
fn shrink(
    batch_values: &Array2<f64>,
    gamma_hat: &[f64],
    delta_hat: &[f64],
    gamma_bar: f64,
    tau_sq: f64,
    a_prior: f64,
    b_prior: f64,
    convergence: f64,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let n_batch = batch_values.nrows() as f64;
    let n_genes = batch_values.ncols();
    let mut gamma_old = gamma_hat.to_vec();
    let mut delta_old = delta_hat.to_vec();

    for iteration in 0..MAX_ITERATIONS {
        let mut gamma_new = Vec::with_capacity(n_genes);
        let mut delta_new = Vec::with_capacity(n_genes);
        let mut change: f64 = 0.0;

        for gene in 0..n_genes {
            let gamma = (tau_sq * n_batch * gamma_hat[gene]
                + delta_old[gene] * gamma_bar)
                / (tau_sq * n_batch + delta_old[gene]);
            let sum_sq: f64 = batch_values
                .column(gene)
                .iter()
                .map(|v| (v - gamma).powi(2))
                .sum();
            let delta =
                (0.5 * sum_sq + b_prior) / (n_batch / 2.0 + a_prior - 1.0);

            change = change.max(
                (gamma - gamma_old[gene]).abs()
                    / gamma_old[gene].abs().max(f64::EPSILON),
            );
            change = change.max(
                (delta - delta_old[gene]).abs()
                    / delta_old[gene].abs().max(f64::EPSILON),
            );
            gamma_new.push(gamma);
            delta_new.push(delta);
        }

        gamma_old = gamma_new;
        delta_old = delta_new;
        if change < convergence {
            trace!("Shrinkage converged after {} iterations", iteration + 1);
            return Ok((gamma_old, delta_old));
        }
    }

    bail!(
        "empirical-Bayes shrinkage did not converge after {} iterations",
        MAX_ITERATIONS
    )
}
