//! Plan execution: chart rendering and numeric export.
//!
//! [`PlanExecutor`] is the boundary between plan construction and whatever
//! evaluates series. [`NativeExecutor`] evaluates plans in-process against
//! the JSON Lines series files of each node and renders with plotters.

mod eval;
mod render;

use crate::config::{ImageSize, TimeWindow};
use crate::plan::Plan;
use crate::store::{SeriesCache, StoreError, Timeline};
use serde::Serialize;
use thiserror::Error;

pub use eval::evaluate;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("plan has nothing to render")]
    Empty,
    #[error("drawing failed: {0}")]
    Draw(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("plan has no series marked for export")]
    NothingToExport,
    #[error("plan marks {0} series for export, expected one")]
    Ambiguous(usize),
    #[error("export step must be at least one second")]
    InvalidStep,
}

/// One exported bucket; `None` when the bucket had no data
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportedSample {
    pub timestamp: i64,
    pub value: Option<f64>,
}

/// Exported values of the plan's export series over a window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Export {
    pub label: String,
    pub step: i64,
    /// Samples at `start, start + step, ..., end`
    pub samples: Vec<ExportedSample>,
}

/// Evaluates plans. Neither operation mutates the plan.
pub trait PlanExecutor {
    /// Draw every render item of `plan` over `window`, returning the encoded
    /// image.
    fn render(&self, plan: &Plan, window: &TimeWindow, size: ImageSize) -> Result<Vec<u8>, RenderError>;

    /// Sample the single export series of `plan` every `step` seconds from
    /// the start of `window` through its end.
    fn export(&self, plan: &Plan, window: &TimeWindow, step: u64) -> Result<Export, ExportError>;
}

/// Export rows allowed before the step is coarsened, about 28 hours at 1 s
pub const DEFAULT_MAX_EXPORT_ROWS: usize = 100_000;

/// In-process executor over per-node series files; renders SVG
#[derive(Debug, Clone, Copy)]
pub struct NativeExecutor {
    max_export_rows: usize,
}

impl Default for NativeExecutor {
    fn default() -> Self {
        Self {
            max_export_rows: DEFAULT_MAX_EXPORT_ROWS,
        }
    }
}

impl NativeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit export rows like `rrdtool xport --maxrows`: a longer window is
    /// exported at a coarser step instead
    pub fn with_max_export_rows(mut self, rows: usize) -> Self {
        self.max_export_rows = rows.max(2);
        self
    }

    /// Smallest step not below `requested` that keeps the export within the
    /// row limit
    fn export_step(&self, window: &TimeWindow, requested: i64) -> i64 {
        let intervals = (self.max_export_rows - 1) as i64;
        let duration = window.duration_secs().max(0);
        requested.max((duration + intervals - 1) / intervals)
    }

    /// Evaluation step for rendering: about one point per horizontal pixel
    fn render_step(window: &TimeWindow, size: ImageSize) -> i64 {
        (window.duration_secs() / size.width.max(1) as i64).max(1)
    }
}

impl PlanExecutor for NativeExecutor {
    fn render(&self, plan: &Plan, window: &TimeWindow, size: ImageSize) -> Result<Vec<u8>, RenderError> {
        if plan.render.is_empty() {
            return Err(RenderError::Empty);
        }
        let step = Self::render_step(window, size);
        let timeline = Timeline::covering(window.start_secs(), window.end_secs(), step);
        let targets = plan.render.iter().map(|r| r.series.as_str());

        let mut cache = SeriesCache::default();
        let values = evaluate(plan, targets, &timeline, &mut cache)?;
        tracing::debug!(step, points = timeline.len, series = values.len(), "evaluated render series");

        render::draw_svg(plan, &timeline, &values, size).map(String::into_bytes)
    }

    fn export(&self, plan: &Plan, window: &TimeWindow, step: u64) -> Result<Export, ExportError> {
        let item = match plan.export.as_slice() {
            [] => return Err(ExportError::NothingToExport),
            [item] => item,
            items => return Err(ExportError::Ambiguous(items.len())),
        };
        if step == 0 {
            return Err(ExportError::InvalidStep);
        }
        let requested = step.min(i64::MAX as u64) as i64;
        let step = self.export_step(window, requested);
        if step != requested {
            tracing::warn!(
                requested,
                step,
                max_rows = self.max_export_rows,
                "export window exceeds row limit, coarsening step"
            );
        }
        let timeline = Timeline::covering(window.start_secs(), window.end_secs(), step);

        let mut cache = SeriesCache::default();
        let mut values = evaluate(plan, [item.series.as_str()], &timeline, &mut cache)?;
        let series = values.remove(&item.series).unwrap_or_else(|| vec![None; timeline.len]);

        let samples = timeline
            .points()
            .zip(series)
            .map(|(timestamp, value)| ExportedSample { timestamp, value })
            .collect();
        Ok(Export {
            label: item.label.clone(),
            step,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::build_plan;
    use crate::reducer::reduce;
    use crate::registry::Registry;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use std::path::Path;

    fn window(start: i64, end: i64) -> TimeWindow {
        TimeWindow {
            start: Utc.timestamp_opt(start, 0).unwrap(),
            end: Utc.timestamp_opt(end, 0).unwrap(),
        }
    }

    fn write_series(dir: &Path, node: &str, field: &str, values: &[(i64, Option<f64>)]) {
        let lines: Vec<String> = values
            .iter()
            .map(|(ts, v)| match v {
                Some(v) => format!(r#"{{"timestamp": {}, "{}": {}}}"#, ts, field, v),
                None => format!(r#"{{"timestamp": {}, "{}": null}}"#, ts, field),
            })
            .collect();
        fs::write(dir.join(format!("{}.jsonl", node)), lines.join("\n")).unwrap();
    }

    #[test]
    fn test_export_confirm_average_across_nodes() {
        let dir = tempfile::tempdir().unwrap();
        write_series(
            dir.path(),
            "A",
            "txblk_cfm_mean",
            &[(100, Some(50.0)), (101, Some(4.0)), (102, None), (103, Some(6.0))],
        );
        write_series(
            dir.path(),
            "B",
            "txblk_cfm_mean",
            &[(100, Some(50.0)), (101, Some(6.0)), (102, None), (103, Some(8.0))],
        );
        let registry = Registry::parse("A\nB\n", dir.path());
        let plan = build_plan("confirm", &registry, "A", 1).unwrap();

        let export = NativeExecutor::new().export(&plan, &window(100, 103), 1).unwrap();
        assert_eq!(export.label, "avg");
        let values: Vec<Option<f64>> = export.samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![Some(50.0), Some(5.0), None, Some(7.0)]);
        assert_eq!(export.samples[0].timestamp, 100);

        let summary = reduce(&export.samples);
        assert_eq!(summary.count, 2);
        assert_eq!(summary.rounded_average(), Some(6.0));
        assert!(summary.any_undefined);
    }

    #[test]
    fn test_export_requires_export_series() {
        let registry: Registry = ["A"].into_iter().collect();
        let plan = build_plan("queue", &registry, "A", 1).unwrap();
        let err = NativeExecutor::new().export(&plan, &window(0, 10), 1).unwrap_err();
        assert!(matches!(err, ExportError::NothingToExport));
    }

    #[test]
    fn test_export_missing_series_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::parse("A\n", dir.path());
        let plan = build_plan("txrate", &registry, "A", 1).unwrap();
        let err = NativeExecutor::new().export(&plan, &window(0, 10), 1).unwrap_err();
        assert!(matches!(err, ExportError::Store(StoreError::Open { .. })));
    }

    #[test]
    fn test_render_produces_svg() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<(i64, Option<f64>)> = (0..60).map(|t| (1000 + t, Some((t % 7) as f64))).collect();
        for node in ["A", "B", "C"] {
            write_series(dir.path(), node, "confirmed_tx", &samples);
        }
        let registry = Registry::parse("A\nB\nC\n", dir.path());
        let plan = build_plan("txrate", &registry, "B", 5).unwrap();

        let image = NativeExecutor::new()
            .render(&plan, &window(1000, 1059), ImageSize::default())
            .unwrap();
        let svg = String::from_utf8(image).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("EVM Throughput"));
        assert!(svg.contains("Avg Confirmed"));
    }

    #[test]
    fn test_export_coarsens_step_past_row_limit() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<(i64, Option<f64>)> = (0..1000).map(|t| (t, Some(2.0))).collect();
        write_series(dir.path(), "A", "confirmed_tx", &samples);
        let registry = Registry::parse("A\n", dir.path());
        let plan = build_plan("txrate", &registry, "A", 1).unwrap();

        let executor = NativeExecutor::new().with_max_export_rows(100);
        let export = executor.export(&plan, &window(0, 999), 1).unwrap();
        assert_eq!(export.step, 11);
        assert!(export.samples.len() <= 100);
        assert_eq!(reduce(&export.samples).rounded_average(), Some(2.0));

        // Short windows keep the requested step
        let export = executor.export(&plan, &window(0, 50), 1).unwrap();
        assert_eq!(export.step, 1);
        assert_eq!(export.samples.len(), 51);
    }

    #[test]
    fn test_render_step_tracks_width() {
        let size = ImageSize {
            width: 100,
            height: 50,
        };
        assert_eq!(NativeExecutor::render_step(&window(0, 1000), size), 10);
        assert_eq!(NativeExecutor::render_step(&window(0, 50), size), 1);
    }
}
