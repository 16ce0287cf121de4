//! Per-node series files and bucket consolidation.
//!
//! Each node writes its telemetry as JSON Lines, one record per line:
//!
//! ```text
//! {"timestamp": 1700000000, "generated_tx": 120.0, "confirmed_tx": 118.5}
//! ```
//!
//! `timestamp` is either Unix seconds or an RFC 3339 string. Every other
//! numeric member is a field; `null` marks a field with no data for that
//! record.

use crate::plan::Consolidation;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open series file for node '{node}' ({path}): {source}")]
    Open {
        node: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read line {line} of {path}: {source}")]
    Read {
        path: PathBuf,
        line: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} doesn't appear to be a JSON Lines series file: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Epoch(f64),
    Rfc3339(DateTime<Utc>),
}

impl Timestamp {
    fn as_secs(&self) -> i64 {
        match self {
            Timestamp::Epoch(secs) => secs.floor() as i64,
            Timestamp::Rfc3339(dt) => dt.timestamp(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Record {
    timestamp: Timestamp,
    #[serde(flatten)]
    fields: HashMap<String, serde_json::Value>,
}

/// Evenly spaced points `start, start + step, ...`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    pub start: i64,
    pub step: i64,
    pub len: usize,
}

impl Timeline {
    /// Points from `start` through `end` inclusive. `start` is aligned down to
    /// a multiple of `step`.
    pub fn covering(start: i64, end: i64, step: i64) -> Self {
        let step = step.max(1);
        let start = start - start.rem_euclid(step);
        let len = if end < start {
            1
        } else {
            ((end - start) / step) as usize + 1
        };
        Self { start, step, len }
    }

    pub fn at(&self, index: usize) -> i64 {
        self.start + index as i64 * self.step
    }

    pub fn end(&self) -> i64 {
        self.at(self.len.saturating_sub(1))
    }

    pub fn points(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len).map(move |i| self.at(i))
    }

    /// The same timeline with `points` extra points before the start
    pub fn extended_back(&self, points: usize) -> Self {
        Self {
            start: self.start - points as i64 * self.step,
            step: self.step,
            len: self.len + points,
        }
    }
}

/// All fields of one node, each sorted by timestamp
#[derive(Debug, Clone, Default)]
pub struct NodeSeries {
    fields: HashMap<String, Vec<(i64, f64)>>,
}

impl NodeSeries {
    /// Load a node's series file
    pub fn load(node: &str, path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path).map_err(|source| StoreError::Open {
            node: node.to_string(),
            path: path.to_path_buf(),
            source,
        })?;

        let reader = BufReader::new(file);
        let mut series = Self::default();
        let mut skipped = 0usize;
        let mut seen_record = false;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| StoreError::Read {
                path: path.to_path_buf(),
                line: line_num + 1,
                source,
            })?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(record) => {
                    series.push(record);
                    seen_record = true;
                }
                // A bad first record means this is not a series file at all
                Err(source) if !seen_record => {
                    return Err(StoreError::Format {
                        path: path.to_path_buf(),
                        source,
                    })
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), line = line_num + 1, error = %e, "skipping malformed record");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            tracing::warn!(node, skipped, "skipped malformed series records");
        }
        series.sort();
        Ok(series)
    }

    fn push(&mut self, record: Record) {
        let ts = record.timestamp.as_secs();
        for (field, value) in record.fields {
            if let Some(v) = value.as_f64().filter(|v| v.is_finite()) {
                self.fields.entry(field).or_default().push((ts, v));
            }
        }
    }

    fn sort(&mut self) {
        for samples in self.fields.values_mut() {
            samples.sort_by_key(|(ts, _)| *ts);
        }
    }

    /// Build directly from samples, sorted on insertion
    pub fn from_samples<'a>(fields: impl IntoIterator<Item = (&'a str, Vec<(i64, f64)>)>) -> Self {
        let mut series = Self {
            fields: fields
                .into_iter()
                .map(|(name, samples)| (name.to_string(), samples))
                .collect(),
        };
        series.sort();
        series
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Consolidate `field` into buckets of `bucket` seconds and sample it at
    /// every point of `timeline`.
    ///
    /// Bucket `t` covers `(t - bucket, t]`; a point reads the bucket that
    /// contains it. Buckets without samples are undefined, as is every
    /// point when the field is absent.
    pub fn fetch(&self, field: &str, function: Consolidation, bucket: i64, timeline: &Timeline) -> Vec<Option<f64>> {
        let Some(samples) = self.fields.get(field) else {
            return vec![None; timeline.len];
        };
        let bucket = bucket.max(1);
        let first = bucket_end(timeline.start, bucket) - bucket;
        let last = bucket_end(timeline.end(), bucket);

        let lo = samples.partition_point(|(ts, _)| *ts <= first);
        let hi = samples.partition_point(|(ts, _)| *ts <= last);

        let mut buckets: BTreeMap<i64, Accumulator> = BTreeMap::new();
        for &(ts, v) in &samples[lo..hi] {
            buckets
                .entry(bucket_end(ts, bucket))
                .or_insert_with(|| Accumulator::new(function))
                .add(v);
        }

        timeline
            .points()
            .map(|t| buckets.get(&bucket_end(t, bucket)).map(Accumulator::value))
            .collect()
    }
}

/// End of the bucket containing `ts`
fn bucket_end(ts: i64, bucket: i64) -> i64 {
    -(-ts).div_euclid(bucket) * bucket
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    function: Consolidation,
    sum: f64,
    count: usize,
    min: f64,
    max: f64,
    last: f64,
}

impl Accumulator {
    fn new(function: Consolidation) -> Self {
        Self {
            function,
            sum: 0.0,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            last: f64::NAN,
        }
    }

    fn add(&mut self, v: f64) {
        self.sum += v;
        self.count += 1;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.last = v;
    }

    fn value(&self) -> f64 {
        match self.function {
            Consolidation::Average => self.sum / self.count as f64,
            Consolidation::Min => self.min,
            Consolidation::Max => self.max,
            Consolidation::Last => self.last,
        }
    }
}

/// Series files loaded so far, keyed by location
#[derive(Debug, Default)]
pub struct SeriesCache {
    loaded: HashMap<PathBuf, NodeSeries>,
}

impl SeriesCache {
    pub fn get_or_load(&mut self, node: &str, path: &Path) -> Result<&NodeSeries, StoreError> {
        if !self.loaded.contains_key(path) {
            let series = NodeSeries::load(node, path)?;
            tracing::debug!(node, path = %path.display(), fields = series.fields.len(), "loaded series file");
            self.loaded.insert(path.to_path_buf(), series);
        }
        Ok(&self.loaded[path])
    }

    pub fn insert(&mut self, path: PathBuf, series: NodeSeries) {
        self.loaded.insert(path, series);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_timeline_covering() {
        let t = Timeline::covering(100, 110, 5);
        assert_eq!(t.points().collect::<Vec<_>>(), vec![100, 105, 110]);

        let t = Timeline::covering(103, 110, 5);
        assert_eq!(t.start, 100);
        assert_eq!(t.end(), 110);

        let t = Timeline::covering(10, 12, 1).extended_back(2);
        assert_eq!(t.points().collect::<Vec<_>>(), vec![8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_bucket_end() {
        assert_eq!(bucket_end(10, 5), 10);
        assert_eq!(bucket_end(11, 5), 15);
        assert_eq!(bucket_end(-3, 5), 0);
        assert_eq!(bucket_end(7, 1), 7);
    }

    #[test]
    fn test_fetch_consolidates_buckets() {
        let series = NodeSeries::from_samples([(
            "queue_length",
            vec![(101, 2.0), (103, 4.0), (105, 9.0), (106, 1.0), (110, 3.0)],
        )]);
        let timeline = Timeline::covering(100, 110, 5);

        let avg = series.fetch("queue_length", Consolidation::Average, 5, &timeline);
        assert_eq!(avg, vec![None, Some(5.0), Some(2.0)]);

        let max = series.fetch("queue_length", Consolidation::Max, 5, &timeline);
        assert_eq!(max, vec![None, Some(9.0), Some(3.0)]);

        let last = series.fetch("queue_length", Consolidation::Last, 5, &timeline);
        assert_eq!(last, vec![None, Some(9.0), Some(3.0)]);
    }

    #[test]
    fn test_fetch_coarse_bucket_holds_value() {
        let series = NodeSeries::from_samples([("x", vec![(9, 1.0), (10, 3.0), (12, 8.0)])]);
        let timeline = Timeline::covering(9, 12, 1);

        let values = series.fetch("x", Consolidation::Average, 5, &timeline);
        assert_eq!(values, vec![Some(2.0), Some(2.0), Some(8.0), Some(8.0)]);
    }

    #[test]
    fn test_fetch_missing_field_is_undefined() {
        let series = NodeSeries::default();
        let timeline = Timeline::covering(0, 3, 1);
        assert_eq!(series.fetch("x", Consolidation::Average, 1, &timeline), vec![None; 4]);
    }

    #[test]
    fn test_load_jsonl() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# node A").unwrap();
        writeln!(file, r#"{{"timestamp": 12, "confirmed_tx": 4.0, "queue_length": null}}"#).unwrap();
        writeln!(file, r#"{{"timestamp": 11, "confirmed_tx": 2.0}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, r#"{{"timestamp": "1970-01-01T00:00:13Z", "confirmed_tx": 6.0}}"#).unwrap();

        let series = NodeSeries::load("A", file.path()).unwrap();
        assert!(series.has_field("confirmed_tx"));
        assert!(!series.has_field("queue_length"));

        let timeline = Timeline::covering(11, 13, 1);
        let values = series.fetch("confirmed_tx", Consolidation::Average, 1, &timeline);
        assert_eq!(values, vec![Some(2.0), Some(4.0), Some(6.0)]);
    }

    #[test]
    fn test_load_rejects_non_series_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,confirmed_tx").unwrap();
        let err = NodeSeries::load("A", file.path()).unwrap_err();
        assert!(matches!(err, StoreError::Format { .. }));
    }

    #[test]
    fn test_load_missing_file_names_node() {
        let dir = tempfile::tempdir().unwrap();
        let err = NodeSeries::load("ghost", &dir.path().join("ghost.jsonl")).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
