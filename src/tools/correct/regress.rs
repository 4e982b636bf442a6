use anyhow::{ensure, Result};
use log::debug;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::data_structs::{ExpressionMatrix, SampleMetadata};
use crate::utils;

/// An ordinary-least-squares fit of one gene against a single continuous
/// covariate plus an intercept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope:     f64,
    pub intercept: f64,
}

impl LinearFit {
    /// Fits `response ~ intercept + covariate` in closed form.
    pub fn fit(
        covariate: &[f64],
        response: ArrayView1<f64>,
    ) -> Result<Self> {
        ensure!(
            covariate.len() == response.len(),
            "covariate has {} values, response has {}",
            covariate.len(),
            response.len()
        );
        ensure!(
            covariate.len() >= 2,
            "regression requires at least two observations"
        );

        let mean_x = utils::mean(covariate);
        let mean_y = response.sum() / response.len() as f64;

        let mut ss_xx = 0.0;
        let mut ss_xy = 0.0;
        for (x, y) in covariate.iter().zip(response.iter()) {
            let dx = x - mean_x;
            ss_xx += dx * dx;
            ss_xy += dx * (y - mean_y);
        }
        ensure!(
            ss_xx > 0.0,
            "covariate is constant; the regression slope is undefined"
        );

        let slope = ss_xy / ss_xx;
        Ok(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    pub fn predict(
        &self,
        x: f64,
    ) -> f64 {
        self.intercept + self.slope * x
    }

    /// Coefficient of determination of this fit on the given data.
    ///
    /// Returns zero when the response has no variation.
    pub fn r_squared(
        &self,
        covariate: &[f64],
        response: ArrayView1<f64>,
    ) -> f64 {
        let mean_y = response.sum() / response.len() as f64;
        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        for (x, y) in covariate.iter().zip(response.iter()) {
            ss_res += (y - self.predict(*x)).powi(2);
            ss_tot += (y - mean_y).powi(2);
        }
        if ss_tot == 0.0 {
            0.0
        }
        else {
            1.0 - ss_res / ss_tot
        }
    }
}

/// Removes the component of every gene that a single continuous covariate
/// explains: per gene, fit `expression ~ intercept + covariate` and keep
/// the residuals.
///
/// The fit has no second regressor, so there is no way to shelter
/// biological signal here. Anything correlated with the covariate is
/// removed together with it; that over-correction is the documented
/// behavior of this strategy, not a defect.
#[derive(Debug, Clone)]
pub struct RegressionCorrector {
    covariate: String,
}

impl RegressionCorrector {
    pub fn new<S: Into<String>>(covariate: S) -> Self {
        Self {
            covariate: covariate.into(),
        }
    }

    pub fn covariate(&self) -> &str { &self.covariate }

    pub fn correct(
        &self,
        matrix: &ExpressionMatrix,
        metadata: &SampleMetadata,
    ) -> Result<ExpressionMatrix> {
        matrix.align(metadata)?;
        let covariate = metadata.continuous(&self.covariate)?;

        let mut values = matrix.values().clone();
        for gene in 0..matrix.n_genes() {
            let fit = LinearFit::fit(&covariate, matrix.gene(gene))?;
            for (sample, x) in covariate.iter().enumerate() {
                values[[sample, gene]] -= fit.predict(*x);
            }
        }
        debug!(
            "Removed covariate '{}' from {} genes",
            self.covariate,
            matrix.n_genes()
        );
        matrix.with_values(values)
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use ndarray::{array, Array1, Array2};

    use super::*;
    use crate::tools::simulate::{simulate, SimulationConfig, RIN};

    #[test]
    fn test_fit_recovers_known_line() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = Array1::from_vec(vec![1.0, 3.0, 5.0, 7.0]);
        let fit = LinearFit::fit(&x, y.view()).unwrap();
        assert_approx_eq!(fit.slope, 2.0);
        assert_approx_eq!(fit.intercept, 1.0);
        assert_approx_eq!(fit.r_squared(&x, y.view()), 1.0);
    }

    #[test]
    fn test_fit_rejects_constant_covariate() {
        let x = [2.0, 2.0, 2.0];
        let y = Array1::from_vec(vec![1.0, 2.0, 3.0]);
        let err = LinearFit::fit(&x, y.view()).unwrap_err();
        assert!(err.to_string().contains("constant"));
    }

    #[test]
    fn test_residuals_are_orthogonal_to_covariate() {
        let x = [0.5, 1.5, 2.5, 3.5, 4.5];
        let y = Array1::from_vec(vec![2.1, 2.9, 4.2, 4.8, 6.1]);
        let fit = LinearFit::fit(&x, y.view()).unwrap();
        let residuals: Vec<f64> = x
            .iter()
            .zip(y.iter())
            .map(|(x, y)| y - fit.predict(*x))
            .collect();
        let dot: f64 = residuals
            .iter()
            .zip(x.iter())
            .map(|(r, x)| r * x)
            .sum();
        assert_approx_eq!(dot, 0.0, 1e-10);
    }

    #[test]
    fn test_correction_removes_exact_covariate_signal() {
        // Expression that is exactly 3x + 1 in each of two genes
        let x = vec![0.5, 1.5, 2.5, 3.5];
        let values = Array2::from_shape_fn((4, 2), |(i, _)| {
            3.0 * x[i] + 1.0
        });
        let matrix = ExpressionMatrix::new(
            (0..4).map(|i| format!("Sample_{:02}", i + 1)).collect(),
            vec!["Gene_01".to_string(), "Gene_02".to_string()],
            values,
        )
        .unwrap();
        let metadata = SampleMetadata::new(matrix.samples().to_vec())
            .unwrap()
            .with_continuous("rin", x)
            .unwrap();

        let corrected = RegressionCorrector::new("rin")
            .correct(&matrix, &metadata)
            .unwrap();
        for value in corrected.values() {
            assert_approx_eq!(*value, 0.0, 1e-10);
        }
    }

    #[test]
    fn test_refit_after_correction_has_no_signal() {
        let dataset = simulate(&SimulationConfig::default()).unwrap();
        let corrected = RegressionCorrector::new(RIN)
            .correct(&dataset.covariate_noisy, &dataset.metadata)
            .unwrap();

        let rin = dataset.metadata.continuous(RIN).unwrap();
        for gene in 0..corrected.n_genes() {
            let fit = LinearFit::fit(&rin, corrected.gene(gene)).unwrap();
            let r2 = fit.r_squared(&rin, corrected.gene(gene));
            assert_approx_eq!(r2, 0.0, 1e-10);
        }
    }

    #[test]
    fn test_unknown_covariate_fails() {
        let matrix = ExpressionMatrix::new(
            vec!["S1".to_string(), "S2".to_string()],
            vec!["G1".to_string(), "G2".to_string()],
            array![[1.0, 2.0], [3.0, 4.0]],
        )
        .unwrap();
        let metadata =
            SampleMetadata::new(matrix.samples().to_vec()).unwrap();
        let err = RegressionCorrector::new("rin")
            .correct(&matrix, &metadata)
            .unwrap_err();
        assert!(err.to_string().contains("no covariate named 'rin'"));
    }
}
