use citeres_core::error::EvalError;
use std::ops::Range;

/// One cross-validation split over borrowed items.
#[derive(Debug, Clone)]
pub struct Fold<'a, T> {
    pub index: usize,
    pub train: Vec<&'a T>,
    pub test: Vec<&'a T>,
}

/// Contiguous, unshuffled partition of `0..n` into `k` ranges. The first
/// `n % k` ranges hold one extra item.
pub fn fold_ranges(n: usize, k: usize) -> Result<Vec<Range<usize>>, EvalError> {
    if k < 2 {
        return Err(EvalError::invalid_input(format!(
            "cross-validation needs at least 2 folds, got {k}"
        )));
    }
    if k > n {
        return Err(EvalError::invalid_input(format!(
            "cannot split {n} item(s) into {k} folds"
        )));
    }
    let base = n / k;
    let extra = n % k;
    let mut ranges = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let len = base + usize::from(fold < extra);
        ranges.push(start..start + len);
        start += len;
    }
    Ok(ranges)
}

/// Each item lands in exactly one test fold and in the other `k - 1` train folds.
pub fn k_fold<T>(items: &[T], k: usize) -> Result<Vec<Fold<'_, T>>, EvalError> {
    let ranges = fold_ranges(items.len(), k)?;
    Ok(ranges
        .iter()
        .enumerate()
        .map(|(index, range)| Fold {
            index,
            test: items[range.clone()].iter().collect(),
            train: items[..range.start]
                .iter()
                .chain(&items[range.end..])
                .collect(),
        })
        .collect())
}

/// First (`split = 1`) or second (`split = 2`) half of `items`; the first half
/// takes the middle item when the length is odd.
pub fn half_split<T>(items: &[T], split: u8) -> Result<&[T], EvalError> {
    let mid = items.len().div_ceil(2);
    match split {
        1 => Ok(&items[..mid]),
        2 => Ok(&items[mid..]),
        other => Err(EvalError::invalid_input(format!(
            "split set must be 1 or 2, got {other}"
        ))),
    }
}
