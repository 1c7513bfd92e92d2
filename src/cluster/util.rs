use std::cmp::Ordering;

use ndarray::ArrayView1;

use crate::points::Real;

#[inline]
pub(crate) fn squared_euclidean<T: Real>(a: ArrayView1<'_, T>, b: ArrayView1<'_, T>) -> T {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).fold(T::zero(), |acc, (x, y)| {
        let d = *x - *y;
        acc + d * d
    })
}

/// Orders comparable values; NaN compares equal to everything.
#[inline]
pub(crate) fn cmp_or_equal<T: Real>(a: &T, b: &T) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// `k` evenly strided row indices out of `n` (all of them when `n <= k`).
pub(crate) fn strided_indices(n: usize, k: usize) -> Vec<usize> {
    if n <= k {
        return (0..n).collect();
    }
    (0..k).map(|i| i * n / k).collect()
}

/// Smallest value `v` such that the weight of values strictly below `v`
/// reaches `target`. `None` when the total weight never reaches it.
pub(crate) fn weighted_quantile<T: Real>(mut values: Vec<(T, f64)>, target: f64) -> Option<T> {
    values.sort_by(|a, b| cmp_or_equal(&a.0, &b.0));
    let mut below = 0.0;
    for (value, weight) in values {
        if below >= target {
            return Some(value);
        }
        below += weight;
    }
    None
}
