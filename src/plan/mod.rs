//! Plans: ordered series definitions plus what to draw and what to export.
//!
//! A [`Plan`] is a DAG evaluated in definition order. Raw definitions pull a
//! field out of one node's series; derived definitions combine earlier
//! definitions with one of the [`Combine`] operators. Expressions stay
//! structured here and are only flattened to a query language by the
//! executor that consumes the plan (see `crate::rpn`).

mod builder;

pub use builder::{build_plan, MetricKind};

use crate::registry::Node;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("unknown plot content '{0}' (options: {options})", options = MetricKind::NAMES.join(", "))]
    UnknownMetric(String),
    #[error("node '{0}' does not exist")]
    NodeNotFound(String),
    #[error("smoothing window must be at least 1")]
    InvalidWindow,
    #[error("series '{series}' references undefined series '{operand}'")]
    UndefinedReference { series: String, operand: String },
    #[error("series '{0}' is defined more than once")]
    DuplicateSeries(String),
}

/// How raw samples are folded into one value per time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consolidation {
    Average,
    Min,
    Max,
    Last,
}

impl Consolidation {
    pub fn as_str(self) -> &'static str {
        match self {
            Consolidation::Average => "AVERAGE",
            Consolidation::Min => "MIN",
            Consolidation::Max => "MAX",
            Consolidation::Last => "LAST",
        }
    }
}

impl fmt::Display for Consolidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored series: a field of one node, consolidated with `function`
#[derive(Debug, Clone, PartialEq)]
pub struct RawSeriesRef {
    pub node: String,
    pub location: PathBuf,
    pub field: String,
    pub function: Consolidation,
    /// Fetch granularity in seconds, when coarser than the evaluation step
    pub step: Option<u64>,
}

/// Operator of a derived series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combine {
    /// Sum of all operands
    SumAcrossNodes,
    /// Mean of the defined values among the last `width` samples
    WindowedTrend { width: u32 },
    CrossNodeMin,
    CrossNodeMax,
    CrossNodeAverage,
    /// First operand minus second operand
    Difference,
}

impl Combine {
    /// Set reductions take their operand count as an explicit argument
    pub fn is_set_reduction(self) -> bool {
        matches!(
            self,
            Combine::CrossNodeMin | Combine::CrossNodeMax | Combine::CrossNodeAverage
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedSeries {
    pub combine: Combine,
    pub operands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Raw(RawSeriesRef),
    Derived(DerivedSeries),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub name: String,
    pub source: Source,
}

/// RGBA color, written as `RRGGBB` or `RRGGBBAA` hex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xFF }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn opacity(&self) -> f64 {
        self.a as f64 / 255.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}", self.r, self.g, self.b)?;
        if self.a != 0xFF {
            write!(f, "{:02X}", self.a)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Style {
    Line,
    /// Filled area; a stacked area sits on top of the previously drawn item
    Area { stack: bool },
    /// Vertical marker wherever the series is defined and non-zero,
    /// spanning `fraction` of the vertical axis
    Tick { fraction: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderItem {
    pub series: String,
    pub style: Style,
    /// `None` draws nothing but still provides a base for stacking
    pub color: Option<Color>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportItem {
    pub series: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Plan {
    pub title: String,
    pub vertical_label: String,
    pub definitions: Vec<Definition>,
    pub render: Vec<RenderItem>,
    pub export: Vec<ExportItem>,
}

impl Plan {
    pub fn new(title: impl Into<String>, vertical_label: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            vertical_label: vertical_label.into(),
            ..Default::default()
        }
    }

    /// Define a raw series of `node` and return its name
    pub fn raw(
        &mut self,
        node: &Node,
        suffix: &str,
        field: &str,
        function: Consolidation,
        step: Option<u64>,
    ) -> String {
        let name = series_name(&node.id, suffix);
        self.definitions.push(Definition {
            name: name.clone(),
            source: Source::Raw(RawSeriesRef {
                node: node.id.clone(),
                location: node.location.clone(),
                field: field.to_string(),
                function,
                step,
            }),
        });
        name
    }

    /// Define a derived series and return its name
    pub fn derive(&mut self, name: impl Into<String>, combine: Combine, operands: Vec<String>) -> String {
        let name = name.into();
        self.definitions.push(Definition {
            name: name.clone(),
            source: Source::Derived(DerivedSeries { combine, operands }),
        });
        name
    }

    pub fn line(&mut self, series: &str, color: Option<Color>, label: Option<String>) {
        self.render.push(RenderItem {
            series: series.to_string(),
            style: Style::Line,
            color,
            label,
        });
    }

    pub fn area(&mut self, series: &str, color: Color, stack: bool) {
        self.render.push(RenderItem {
            series: series.to_string(),
            style: Style::Area { stack },
            color: Some(color),
            label: None,
        });
    }

    pub fn tick(&mut self, series: &str, color: Color, fraction: f64, label: &str) {
        self.render.push(RenderItem {
            series: series.to_string(),
            style: Style::Tick { fraction },
            color: Some(color),
            label: Some(label.to_string()),
        });
    }

    pub fn export(&mut self, series: &str, label: &str) {
        self.export.push(ExportItem {
            series: series.to_string(),
            label: label.to_string(),
        });
    }

    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn raw_refs(&self) -> impl Iterator<Item = (&str, &RawSeriesRef)> {
        self.definitions.iter().filter_map(|d| match &d.source {
            Source::Raw(raw) => Some((d.name.as_str(), raw)),
            Source::Derived(_) => None,
        })
    }

    pub fn derived(&self) -> impl Iterator<Item = (&str, &DerivedSeries)> {
        self.definitions.iter().filter_map(|d| match &d.source {
            Source::Derived(derived) => Some((d.name.as_str(), derived)),
            Source::Raw(_) => None,
        })
    }

    /// Check that every operand, render item and export item refers to a
    /// series defined earlier, and that names are unique.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut defined: HashSet<&str> = HashSet::new();
        for def in &self.definitions {
            if let Source::Derived(derived) = &def.source {
                for operand in &derived.operands {
                    if !defined.contains(operand.as_str()) {
                        return Err(PlanError::UndefinedReference {
                            series: def.name.clone(),
                            operand: operand.clone(),
                        });
                    }
                }
            }
            if !defined.insert(def.name.as_str()) {
                return Err(PlanError::DuplicateSeries(def.name.clone()));
            }
        }

        let used = self
            .render
            .iter()
            .map(|r| (r.style_name(), &r.series))
            .chain(self.export.iter().map(|e| ("XPORT", &e.series)));
        for (kind, series) in used {
            if !defined.contains(series.as_str()) {
                return Err(PlanError::UndefinedReference {
                    series: kind.to_string(),
                    operand: series.clone(),
                });
            }
        }
        Ok(())
    }

    /// Names of `targets` and everything they depend on, in definition order
    pub fn dependencies<'a>(&'a self, targets: impl IntoIterator<Item = &'a str>) -> Vec<&'a Definition> {
        let mut needed: HashSet<&str> = targets.into_iter().collect();
        // Walking backwards visits every dependent before its operands
        for def in self.definitions.iter().rev() {
            if !needed.contains(def.name.as_str()) {
                continue;
            }
            if let Source::Derived(derived) = &def.source {
                needed.extend(derived.operands.iter().map(String::as_str));
            }
        }
        self.definitions
            .iter()
            .filter(|d| needed.contains(d.name.as_str()))
            .collect()
    }
}

impl RenderItem {
    fn style_name(&self) -> &'static str {
        match self.style {
            Style::Line => "LINE",
            Style::Area { .. } => "AREA",
            Style::Tick { .. } => "TICK",
        }
    }
}

/// Series name for a per-node definition. Characters outside
/// `[A-Za-z0-9_-]` are not valid in query variable names.
pub fn series_name(node: &str, suffix: &str) -> String {
    let node: String = node
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}_{}", node, suffix)
}
