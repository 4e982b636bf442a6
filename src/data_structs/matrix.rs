use anyhow::{bail, ensure, Result};
use hashbrown::HashSet;
use log::debug;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::data_structs::metadata::SampleMetadata;
use crate::utils;

/// A dense expression matrix with samples as rows and genes as columns.
///
/// Row and column labels are unique and the shape is fixed for the lifetime
/// of an instance. Transformations never mutate a matrix in place; they
/// return a new owned value (see [`ExpressionMatrix::with_values`]), so every
/// stage of a pipeline keeps its own output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionMatrix {
    samples: Vec<String>,
    genes:   Vec<String>,
    values:  Array2<f64>,
}

impl ExpressionMatrix {
    /// Creates a matrix from labels and values.
    ///
    /// Fails if label counts do not match the value dimensions or if either
    /// label set contains duplicates.
    pub fn new(
        samples: Vec<String>,
        genes: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self> {
        ensure!(
            samples.len() == values.nrows(),
            "sample label count ({}) does not match row count ({})",
            samples.len(),
            values.nrows()
        );
        ensure!(
            genes.len() == values.ncols(),
            "gene label count ({}) does not match column count ({})",
            genes.len(),
            values.ncols()
        );
        check_unique(&samples, "sample")?;
        check_unique(&genes, "gene")?;

        debug!(
            "Created expression matrix with {} samples and {} genes",
            samples.len(),
            genes.len()
        );
        Ok(Self {
            samples,
            genes,
            values,
        })
    }

    pub fn n_samples(&self) -> usize { self.values.nrows() }

    pub fn n_genes(&self) -> usize { self.values.ncols() }

    pub fn samples(&self) -> &[String] { &self.samples }

    pub fn genes(&self) -> &[String] { &self.genes }

    pub fn values(&self) -> &Array2<f64> { &self.values }

    /// Expression of a single gene across all samples.
    pub fn gene(
        &self,
        index: usize,
    ) -> ArrayView1<f64> {
        self.values.column(index)
    }

    /// Derives a new matrix that shares this matrix's labels but owns new
    /// values. Used by correction and noise-injection stages so that the
    /// input matrix stays untouched.
    pub fn with_values(
        &self,
        values: Array2<f64>,
    ) -> Result<Self> {
        ensure!(
            values.dim() == self.values.dim(),
            "derived matrix shape {:?} differs from source shape {:?}",
            values.dim(),
            self.values.dim()
        );
        Ok(Self {
            samples: self.samples.clone(),
            genes: self.genes.clone(),
            values,
        })
    }

    /// Fails fast when this matrix and the metadata describe different
    /// sample sets or a different sample ordering.
    pub fn align(
        &self,
        metadata: &SampleMetadata,
    ) -> Result<()> {
        ensure!(
            self.n_samples() == metadata.len(),
            "matrix has {} samples but metadata describes {}",
            self.n_samples(),
            metadata.len()
        );
        for (row, (matrix_id, meta_id)) in self
            .samples
            .iter()
            .zip(metadata.sample_ids())
            .enumerate()
        {
            ensure!(
                matrix_id == meta_id,
                "sample mismatch at row {}: matrix has '{}', metadata has \
                 '{}'",
                row,
                matrix_id,
                meta_id
            );
        }
        Ok(())
    }

    /// Returns a new matrix with every gene centered to zero mean and
    /// scaled to unit standard deviation (population denominator).
    ///
    /// Fails when a gene has no variation, since its scale is undefined.
    pub fn standardize_genes(&self) -> Result<Self> {
        let mut values = self.values.clone();
        for (index, mut column) in values.columns_mut().into_iter().enumerate()
        {
            let n = column.len() as f64;
            let mean = column.sum() / n;
            let sd = (column
                .iter()
                .map(|x| (x - mean).powi(2))
                .sum::<f64>()
                / n)
                .sqrt();
            if sd == 0.0 {
                bail!(
                    "gene '{}' has zero variance and cannot be standardized",
                    self.genes[index]
                );
            }
            column.mapv_inplace(|x| (x - mean) / sd);
        }
        self.with_values(values)
    }

    /// Pairwise Pearson correlation between samples.
    ///
    /// This is the raw input for correlation-based sample clustering, which
    /// groups samples by expression profile shape instead of absolute
    /// values.
    pub fn sample_correlation(&self) -> Array2<f64> {
        let n = self.n_samples();
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| self.values.row(i).to_vec())
            .collect();
        Array2::from_shape_fn((n, n), |(i, j)| {
            utils::pearson(&rows[i], &rows[j])
        })
    }
}

fn check_unique(
    labels: &[String],
    kind: &str,
) -> Result<()> {
    let mut seen = HashSet::with_capacity(labels.len());
    for label in labels {
        if !seen.insert(label.as_str()) {
            bail!("duplicate {} label '{}'", kind, label);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use ndarray::array;

    use super::*;

    fn labels(
        prefix: &str,
        n: usize,
    ) -> Vec<String> {
        (0..n)
            .map(|i| format!("{}_{:02}", prefix, i + 1))
            .collect()
    }

    #[test]
    fn test_rejects_duplicate_labels() {
        let values = Array2::zeros((2, 2));
        let result = ExpressionMatrix::new(
            vec!["S1".to_string(), "S1".to_string()],
            labels("Gene", 2),
            values,
        );
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("duplicate sample label"));
    }

    #[test]
    fn test_rejects_shape_mismatch() {
        let values = Array2::zeros((2, 3));
        let result =
            ExpressionMatrix::new(labels("Sample", 2), labels("Gene", 2), values);
        assert!(result.is_err());
    }

    #[test]
    fn test_standardize_genes() {
        let values = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]];
        let matrix =
            ExpressionMatrix::new(labels("Sample", 3), labels("Gene", 2), values)
                .unwrap();
        let standardized = matrix.standardize_genes().unwrap();

        for gene in 0..2 {
            let column = standardized.gene(gene);
            let mean = column.sum() / 3.0;
            let var = column
                .iter()
                .map(|x| (x - mean).powi(2))
                .sum::<f64>()
                / 3.0;
            assert_approx_eq!(mean, 0.0, 1e-12);
            assert_approx_eq!(var, 1.0, 1e-12);
        }
        // Source matrix must stay untouched
        assert_approx_eq!(matrix.values()[[0, 0]], 1.0);
    }

    #[test]
    fn test_standardize_rejects_constant_gene() {
        let values = array![[1.0, 5.0], [2.0, 5.0]];
        let matrix =
            ExpressionMatrix::new(labels("Sample", 2), labels("Gene", 2), values)
                .unwrap();
        let err = matrix.standardize_genes().unwrap_err();
        assert!(err.to_string().contains("zero variance"));
    }

    #[test]
    fn test_align_detects_reordered_metadata() {
        let matrix = ExpressionMatrix::new(
            labels("Sample", 2),
            labels("Gene", 2),
            Array2::zeros((2, 2)),
        )
        .unwrap();
        let metadata = SampleMetadata::new(vec![
            "Sample_02".to_string(),
            "Sample_01".to_string(),
        ])
        .unwrap();
        let err = matrix.align(&metadata).unwrap_err();
        assert!(err.to_string().contains("sample mismatch at row 0"));
    }

    #[test]
    fn test_sample_correlation_diagonal() {
        let values = array![[1.0, 2.0, 3.0], [3.0, 2.0, 1.0]];
        let matrix =
            ExpressionMatrix::new(labels("Sample", 2), labels("Gene", 3), values)
                .unwrap();
        let corr = matrix.sample_correlation();
        assert_approx_eq!(corr[[0, 0]], 1.0);
        assert_approx_eq!(corr[[1, 1]], 1.0);
        assert_approx_eq!(corr[[0, 1]], -1.0);
    }
}
