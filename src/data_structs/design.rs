use anyhow::{bail, ensure, Context, Result};
use log::{debug, trace};
use nalgebra::{Cholesky, DMatrix, Dyn};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::data_structs::metadata::{BatchLabel, SampleMetadata};
use crate::utils;

const PIVOT_LIMIT: f64 = 1e-8;

/// Names the covariates whose signal must be preserved during batch
/// correction. An empty model means "remove the batch effect, preserve
/// nothing else explicitly".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignModel {
    preserve: Vec<String>,
}

impl DesignModel {
    /// A model that preserves no covariates.
    pub fn none() -> Self { Self::default() }

    /// A model preserving the named covariates.
    pub fn preserving<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>, {
        Self {
            preserve: names
                .into_iter()
                .map(Into::into)
                .collect(),
        }
    }

    pub fn preserve(&self) -> &[String] { &self.preserve }

    pub fn is_empty(&self) -> bool { self.preserve.is_empty() }
}

/// The numeric design used by the empirical-Bayes corrector: a full one-hot
/// batch block followed by the encoded preserved covariates.
///
/// All configuration errors surface here, before any expression values are
/// touched: unknown covariate names, covariates without variation, and
/// covariates collinear with the batch label all fail construction with a
/// descriptive message. The normal-equations factorization is computed once
/// and reused for every per-gene fit.
#[derive(Debug)]
pub struct DesignMatrix {
    matrix:    Array2<f64>,
    n_batches: usize,
    chol:      Cholesky<f64, Dyn>,
}

impl DesignMatrix {
    pub fn new(
        batch: &BatchLabel,
        metadata: &SampleMetadata,
        model: &DesignModel,
    ) -> Result<Self> {
        let n = batch.len();
        ensure!(n > 0, "design matrix requires at least one sample");
        ensure!(
            batch.n_levels() >= 2,
            "batch covariate '{}' is constant across all samples",
            batch.name()
        );

        let mut columns: Vec<Vec<f64>> = Vec::new();
        for level in 0..batch.n_levels() {
            columns.push(
                batch
                    .codes()
                    .iter()
                    .map(|code| if *code == level { 1.0 } else { 0.0 })
                    .collect(),
            );
        }
        let n_batches = batch.n_levels();

        for name in model.preserve() {
            append_covariate_columns(name, metadata, &mut columns)
                .with_context(|| {
                    format!("invalid design covariate '{}'", name)
                })?;
        }

        let p = columns.len();
        let matrix = Array2::from_shape_fn((n, p), |(row, col)| {
            columns[col][row]
        });
        debug!(
            "Built design matrix with {} batch and {} covariate columns",
            n_batches,
            p - n_batches
        );

        let chol = factorize(&matrix).with_context(|| {
            format!(
                "design matrix is singular: covariates {:?} are collinear \
                 with batch '{}'",
                model.preserve(),
                batch.name()
            )
        })?;

        Ok(Self {
            matrix,
            n_batches,
            chol,
        })
    }

    pub fn matrix(&self) -> ArrayView2<f64> { self.matrix.view() }

    pub fn n_batches(&self) -> usize { self.n_batches }

    pub fn covariate_cols(&self) -> usize {
        self.matrix.ncols() - self.n_batches
    }

    /// Solves the normal equations `X'X B = X'Y` for the coefficient matrix
    /// `B` (design columns by genes).
    pub fn solve(
        &self,
        response: &Array2<f64>,
    ) -> Result<Array2<f64>> {
        ensure!(
            response.nrows() == self.matrix.nrows(),
            "response has {} rows, design has {}",
            response.nrows(),
            self.matrix.nrows()
        );
        let xty = self.matrix.t().dot(response);
        let xty_na = DMatrix::from_fn(xty.nrows(), xty.ncols(), |i, j| {
            xty[[i, j]]
        });
        let solution = self.chol.solve(&xty_na);
        trace!(
            "Solved normal equations for {} response columns",
            response.ncols()
        );
        Ok(Array2::from_shape_fn(
            (xty.nrows(), xty.ncols()),
            |(i, j)| solution[(i, j)],
        ))
    }
}

fn append_covariate_columns(
    name: &str,
    metadata: &SampleMetadata,
    columns: &mut Vec<Vec<f64>>,
) -> Result<()> {
    if !metadata.has_column(name) {
        bail!(
            "metadata has no covariate named '{}' (available: {})",
            name,
            metadata.column_names().join(", ")
        );
    }
    // Try the continuous reading first; fall back to dummy encoding.
    if let Ok(values) = metadata.continuous(name) {
        ensure!(
            utils::variance(&values) > f64::EPSILON,
            "continuous covariate '{}' is constant across all samples",
            name
        );
        columns.push(values);
        return Ok(());
    }

    let label = metadata.categorical(name)?;
    ensure!(
        label.n_levels() >= 2,
        "categorical covariate '{}' is constant across all samples",
        name
    );
    // Reference level (first appearance) is dropped; batch columns carry
    // the baseline.
    for level in 1..label.n_levels() {
        columns.push(
            label
                .codes()
                .iter()
                .map(|code| if *code == level { 1.0 } else { 0.0 })
                .collect(),
        );
    }
    Ok(())
}

fn factorize(matrix: &Array2<f64>) -> Result<Cholesky<f64, Dyn>> {
    let xtx = matrix.t().dot(matrix);
    let xtx_na =
        DMatrix::from_fn(xtx.nrows(), xtx.ncols(), |i, j| xtx[[i, j]]);
    let chol = match Cholesky::new(xtx_na) {
        Some(chol) => chol,
        None => bail!("normal-equations matrix is not positive definite"),
    };
    let min_pivot = chol
        .l_dirty()
        .diagonal()
        .iter()
        .fold(f64::INFINITY, |acc, x| acc.min(*x));
    ensure!(
        min_pivot > PIVOT_LIMIT,
        "normal-equations matrix is rank deficient (pivot {:.3e})",
        min_pivot
    );
    Ok(chol)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> SampleMetadata {
        SampleMetadata::new(
            (0..6)
                .map(|i| format!("Sample_{:02}", i + 1))
                .collect(),
        )
        .unwrap()
        .with_categorical("batch", vec![
            "Batch_01".to_string(),
            "Batch_02".to_string(),
            "Batch_01".to_string(),
            "Batch_02".to_string(),
            "Batch_01".to_string(),
            "Batch_02".to_string(),
        ])
        .unwrap()
        .with_categorical("mouse", vec![
            "Mouse_01".to_string(),
            "Mouse_01".to_string(),
            "Mouse_01".to_string(),
            "Mouse_02".to_string(),
            "Mouse_02".to_string(),
            "Mouse_02".to_string(),
        ])
        .unwrap()
        .with_continuous("rin", vec![0.5, 1.5, 2.5, 3.5, 4.5, 5.5])
        .unwrap()
        .with_continuous("flat", vec![1.0; 6])
        .unwrap()
    }

    #[test]
    fn test_batch_only_design() {
        let meta = metadata();
        let batch = meta.categorical("batch").unwrap();
        let design =
            DesignMatrix::new(&batch, &meta, &DesignModel::none()).unwrap();
        assert_eq!(design.matrix().dim(), (6, 2));
        assert_eq!(design.n_batches(), 2);
        assert_eq!(design.covariate_cols(), 0);
    }

    #[test]
    fn test_design_with_covariates() {
        let meta = metadata();
        let batch = meta.categorical("batch").unwrap();
        let model = DesignModel::preserving(["mouse", "rin"]);
        let design = DesignMatrix::new(&batch, &meta, &model).unwrap();
        // 2 batch columns + 1 mouse dummy + 1 continuous column
        assert_eq!(design.matrix().dim(), (6, 4));
        assert_eq!(design.covariate_cols(), 2);
    }

    #[test]
    fn test_unknown_covariate_fails() {
        let meta = metadata();
        let batch = meta.categorical("batch").unwrap();
        let model = DesignModel::preserving(["tissue"]);
        let err = DesignMatrix::new(&batch, &meta, &model).unwrap_err();
        assert!(format!("{:#}", err).contains("no covariate named 'tissue'"));
    }

    #[test]
    fn test_constant_covariate_fails() {
        let meta = metadata();
        let batch = meta.categorical("batch").unwrap();
        let model = DesignModel::preserving(["flat"]);
        let err = DesignMatrix::new(&batch, &meta, &model).unwrap_err();
        assert!(format!("{:#}", err).contains("constant across all samples"));
    }

    #[test]
    fn test_collinear_covariate_fails() {
        let meta = metadata();
        let batch = meta.categorical("batch").unwrap();
        // Preserving the batch variable itself duplicates its indicator
        // columns, which must be reported instead of silently dropped.
        let model = DesignModel::preserving(["batch"]);
        let err = DesignMatrix::new(&batch, &meta, &model).unwrap_err();
        assert!(format!("{:#}", err).contains("collinear"));
    }

    #[test]
    fn test_constant_batch_fails() {
        let meta = SampleMetadata::new(vec![
            "S1".to_string(),
            "S2".to_string(),
        ])
        .unwrap()
        .with_categorical("batch", vec![
            "Batch_01".to_string(),
            "Batch_01".to_string(),
        ])
        .unwrap();
        let batch = meta.categorical("batch").unwrap();
        let err = DesignMatrix::new(&batch, &meta, &DesignModel::none())
            .unwrap_err();
        assert!(err.to_string().contains("constant across all samples"));
    }

    #[test]
    fn test_solve_recovers_group_means() {
        let meta = metadata();
        let batch = meta.categorical("batch").unwrap();
        let design =
            DesignMatrix::new(&batch, &meta, &DesignModel::none()).unwrap();
        // One response column: batch 1 samples at 2.0, batch 2 at 5.0.
        let response = Array2::from_shape_fn((6, 1), |(row, _)| {
            if row % 2 == 0 {
                2.0
            }
            else {
                5.0
            }
        });
        let coefs = design.solve(&response).unwrap();
        assert!((coefs[[0, 0]] - 2.0).abs() < 1e-10);
        assert!((coefs[[1, 0]] - 5.0).abs() < 1e-10);
    }
}
