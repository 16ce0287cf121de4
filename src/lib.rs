//! Diagnostic charts for consensus testbed telemetry.
//!
//! Every testbed node records its counters (generated and confirmed
//! transactions, block delays, confirmation latency, queue length, mining
//! rate) into a per-node series file. This crate turns those series into
//! charts and summary statistics:
//!
//! 1. **Registry** (`registry`) - which nodes exist and where their series
//!    files live.
//! 2. **Plans** (`plan`) - for a chart content type, the ordered set of raw
//!    and derived series (cross-node sums, min/max/average, windowed trends)
//!    plus what to draw and what to export.
//! 3. **Execution** (`executor`) - evaluates a plan against the series files,
//!    drawing an SVG chart and exporting one series as numeric samples.
//!    `rpn` flattens the same plan into rrdtool arguments instead.
//! 4. **Reduction** (`reducer`) - folds an exported window into a single
//!    average, tracking buckets that had no data.

pub mod config;
pub mod executor;
pub mod plan;
pub mod reducer;
pub mod registry;
pub mod rpn;
pub mod store;
