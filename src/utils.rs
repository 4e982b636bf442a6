//! Small numeric helpers shared across the crate.
//!
//! Everything here is generic over [`num::Float`] so the same code serves
//! `f32` and `f64` callers. These are deliberately plain slice functions:
//! matrix columns are strided views, so callers collect a column once and
//! reuse the buffer.

use num::{Float, NumCast};

/// Lossy numeric cast used throughout the statistical code.
pub fn to_num<F, T>(x: F) -> T
where
    T: NumCast,
    F: num::ToPrimitive, {
    T::from(x).unwrap()
}

/// Arithmetic mean. Returns zero for an empty slice.
pub fn mean<N: Float>(values: &[N]) -> N {
    if values.is_empty() {
        return N::zero();
    }
    values
        .iter()
        .fold(N::zero(), |acc, x| acc + *x)
        / to_num(values.len())
}

/// Unbiased sample variance (n - 1 denominator).
///
/// Returns zero when fewer than two values are supplied.
pub fn variance<N: Float>(values: &[N]) -> N {
    if values.len() < 2 {
        return N::zero();
    }
    let m = mean(values);
    values
        .iter()
        .map(|x| (*x - m).powi(2))
        .fold(N::zero(), |acc, x| acc + x)
        / to_num(values.len() - 1)
}

/// Median of a slice. Returns zero for an empty slice.
pub fn median<N: Float>(values: &[N]) -> N {
    if values.is_empty() {
        return N::zero();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| {
        a.partial_cmp(b)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / to_num(2)
    }
    else {
        sorted[mid]
    }
}

/// Pearson correlation coefficient between two equally sized slices.
///
/// Returns zero when either side has no variation, so constant vectors
/// compare as uncorrelated rather than NaN.
pub fn pearson<N: Float>(
    left: &[N],
    right: &[N],
) -> N {
    assert_eq!(left.len(), right.len(), "input lengths differ");
    let mean_l = mean(left);
    let mean_r = mean(right);

    let mut cov = N::zero();
    let mut var_l = N::zero();
    let mut var_r = N::zero();
    for (l, r) in left.iter().zip(right.iter()) {
        let dl = *l - mean_l;
        let dr = *r - mean_r;
        cov = cov + dl * dr;
        var_l = var_l + dl * dl;
        var_r = var_r + dr * dr;
    }

    let denom = (var_l * var_r).sqrt();
    if denom == N::zero() {
        N::zero()
    }
    else {
        cov / denom
    }
}
