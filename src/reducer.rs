//! Reduction of an exported window into one summary value.

use crate::executor::ExportedSample;
use serde::Serialize;

/// Summary of an exported window. Undefined samples are counted out of the
/// average and reported through `any_undefined`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SummaryResult {
    pub count: usize,
    pub sum: f64,
    pub any_undefined: bool,
}

impl SummaryResult {
    /// Mean of the defined samples, `None` when there were none
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Average rounded to the nearest integer, half away from zero
    pub fn rounded_average(&self) -> Option<f64> {
        self.average().map(f64::round)
    }
}

/// Reduce exported samples to a [`SummaryResult`].
///
/// The first sample is the bucket at the start of the window and is left
/// out; the summary covers `start + step ..= end`.
pub fn reduce(samples: &[ExportedSample]) -> SummaryResult {
    let mut result = SummaryResult {
        count: 0,
        sum: 0.0,
        any_undefined: false,
    };
    for sample in samples.iter().skip(1) {
        match sample.value {
            Some(v) => {
                result.sum += v;
                result.count += 1;
            }
            None => result.any_undefined = true,
        }
    }
    result
}
