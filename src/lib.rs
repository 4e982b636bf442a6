//! scombat is a library for studying batch effects in single-cell
//! expression data. It provides three building blocks that operate on a
//! shared in-memory expression matrix:
//!
//! - [`tools::simulate`] builds synthetic expression matrices with a known
//!   crossed biological signal and separately injected technical noise
//!   (a categorical batch shift and a continuous quality covariate).
//! - [`tools::correct`] removes technical signal again, either with an
//!   empirical-Bayes location/scale adjustment per batch or with per-gene
//!   linear regression on a continuous covariate.
//! - [`tools::metrics`] quantifies how much batch signal a matrix carries
//!   before and after correction.
extern crate core;

pub mod data_structs;
pub mod exports;
pub mod tools;
pub mod utils;
