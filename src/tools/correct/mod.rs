//! Batch and covariate correction strategies.
//!
//! Batch correction is an injectable capability behind the
//! [`BatchCorrector`] trait; [`CombatCorrector`] is the default
//! implementation shipped with the crate. Covariate removal by linear
//! regression is a separate, simpler strategy with its own contract (see
//! [`RegressionCorrector`]).

mod combat;
mod regress;

pub use combat::CombatCorrector;
pub use regress::{LinearFit, RegressionCorrector};

use anyhow::Result;

use crate::data_structs::{DesignModel, ExpressionMatrix, SampleMetadata};

/// The batch-correction seam: given an expression matrix, aligned sample
/// metadata, the name of the categorical variable to correct for, and a
/// design model naming covariates to preserve, produce a corrected matrix
/// of identical shape.
pub trait BatchCorrector {
    fn correct(
        &self,
        matrix: &ExpressionMatrix,
        metadata: &SampleMetadata,
        batch: &str,
        design: &DesignModel,
    ) -> Result<ExpressionMatrix>;
}
