//! Exhaustive weight-space enumeration.
//!
//! The grid is a mixed-radix odometer: one digit per field, each digit an
//! index into the shared value set. Digit 0 (the first field) is the
//! lowest-order digit. The space grows as `values ^ fields`, so callers bound
//! it with [`WeightGrid::total_combinations`] before enumerating.

use citeres_core::error::EvalError;
use citeres_core::types::WeightVector;

#[derive(Debug, Clone)]
pub struct WeightGrid {
    fields: Vec<String>,
    values: Vec<f64>,
    digits: Vec<usize>,
}

impl WeightGrid {
    pub fn new(
        fields: impl IntoIterator<Item = impl Into<String>>,
        values: &[f64],
    ) -> Result<Self, EvalError> {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            return Err(EvalError::invalid_input("weight grid needs at least one field"));
        }
        if values.is_empty() {
            return Err(EvalError::invalid_input("weight grid needs at least one value"));
        }
        let digits = vec![0; fields.len()];
        Ok(Self {
            fields,
            values: values.to_vec(),
            digits,
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// `len(values) ^ len(fields)`, saturating at `u64::MAX`.
    pub fn total_combinations(&self) -> u64 {
        u32::try_from(self.fields.len())
            .ok()
            .and_then(|exp| (self.values.len() as u64).checked_pow(exp))
            .unwrap_or(u64::MAX)
    }

    pub fn current(&self) -> WeightVector {
        WeightVector::from_pairs(
            self.fields
                .iter()
                .zip(&self.digits)
                .map(|(field, &digit)| (field.as_str(), self.values[digit])),
        )
    }

    /// Increments the lowest-order digit, carrying on overflow. Advancing from
    /// the all-maximum state wraps to the all-minimum state.
    pub fn advance(&mut self) {
        let max = self.values.len() - 1;
        for digit in &mut self.digits {
            if *digit < max {
                *digit += 1;
                return;
            }
            *digit = 0;
        }
    }

    /// True once every digit holds the largest value index.
    pub fn is_exhausted(&self) -> bool {
        let max = self.values.len() - 1;
        self.digits.iter().all(|&digit| digit == max)
    }

    pub fn reset(&mut self) {
        self.digits.iter_mut().for_each(|digit| *digit = 0);
    }

    pub fn all_ones(&self) -> WeightVector {
        WeightVector::all_ones(self.fields.iter().map(String::as_str))
    }

    /// Every combination exactly once, starting from the all-minimum state
    /// and ending with the all-maximum one.
    pub fn combinations(&self) -> Combinations {
        let mut grid = self.clone();
        grid.reset();
        Combinations {
            grid,
            finished: false,
        }
    }
}

pub struct Combinations {
    grid: WeightGrid,
    finished: bool,
}

impl Iterator for Combinations {
    type Item = WeightVector;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let weights = self.grid.current();
        if self.grid.is_exhausted() {
            self.finished = true;
        } else {
            self.grid.advance();
        }
        Some(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn odometer_carries_into_next_digit() {
        let mut grid = WeightGrid::new(["AIM", "OWN"], &[1.0, 3.0, 5.0]).unwrap();
        assert_eq!(grid.total_combinations(), 9);
        assert_eq!(grid.current().get("AIM"), Some(1.0));
        grid.advance();
        grid.advance();
        assert_eq!(grid.current().get("AIM"), Some(5.0));
        grid.advance();
        let weights = grid.current();
        assert_eq!(weights.get("AIM"), Some(1.0));
        assert_eq!(weights.get("OWN"), Some(3.0));
        assert!(!grid.is_exhausted());
    }

    #[test]
    fn combinations_cover_the_space_once() {
        let grid = WeightGrid::new(["AIM", "BAS", "OWN"], &[1.0, 3.0, 5.0]).unwrap();
        let all: Vec<WeightVector> = grid.combinations().collect();
        assert_eq!(all.len() as u64, grid.total_combinations());

        let distinct: BTreeSet<String> = all
            .iter()
            .map(|weights| serde_json::to_string(weights).unwrap())
            .collect();
        assert_eq!(distinct.len(), 27);
        let last = all.last().unwrap();
        assert!(last.iter().all(|(_, value)| value == 5.0));
    }

    #[test]
    fn single_value_grid_is_immediately_exhausted() {
        let grid = WeightGrid::new(["AIM"], &[1.0]).unwrap();
        assert!(grid.is_exhausted());
        assert_eq!(grid.combinations().count(), 1);
        assert_eq!(grid.all_ones(), WeightVector::all_ones(["AIM"]));
    }

    #[test]
    fn large_spaces_saturate_instead_of_overflowing() {
        let fields: Vec<String> = (0..80).map(|i| format!("f{i}")).collect();
        let grid = WeightGrid::new(fields, &[1.0, 3.0, 5.0]).unwrap();
        assert_eq!(grid.total_combinations(), u64::MAX);
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(WeightGrid::new(Vec::<String>::new(), &[1.0]).is_err());
        assert!(WeightGrid::new(["AIM"], &[]).is_err());
    }
}
