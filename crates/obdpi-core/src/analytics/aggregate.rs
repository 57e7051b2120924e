//! Scalar aggregates over optional fields

use crate::reading::Reading;
use crate::unit_conversion::round_to;

/// Running count/sum/min/max over the present values of one field
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Aggregate {
    count: usize,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Aggregate {
    /// Empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate `field` over every reading where it is present
    pub fn of<F>(readings: &[Reading], field: F) -> Self
    where
        F: Fn(&Reading) -> Option<f64>,
    {
        readings.iter().map(field).collect()
    }

    /// Add one value; non-finite values are ignored
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    /// Number of values seen
    pub fn count(&self) -> usize {
        self.count
    }

    /// No value was present
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mean, absent when no value was present
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Smallest present value
    pub fn min(&self) -> Option<f64> {
        self.min
    }

    /// Largest present value
    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Sum of the present values; 0 when empty
    pub fn sum(&self) -> f64 {
        self.sum
    }
}

impl FromIterator<Option<f64>> for Aggregate {
    fn from_iter<I: IntoIterator<Item = Option<f64>>>(iter: I) -> Self {
        let mut aggregate = Aggregate::new();
        for value in iter.into_iter().flatten() {
            aggregate.push(value);
        }
        aggregate
    }
}

/// Round an optional statistic for display
pub(crate) fn rounded(value: Option<f64>, decimals: u32) -> Option<f64> {
    value.map(|v| round_to(v, decimals))
}
