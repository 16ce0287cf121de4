//! Pointwise evaluation of plan definitions.

use crate::plan::{Combine, Definition, Plan, Source};
use crate::store::{SeriesCache, StoreError, Timeline};
use std::collections::HashMap;

pub type Values = Vec<Option<f64>>;

/// Evaluate `targets` and everything they depend on over `timeline`.
///
/// Windowed trends need samples from before the timeline starts, so the
/// evaluation runs over a timeline extended back by the deepest trend chain
/// and the lead-in is cut off afterwards. The result holds every evaluated
/// definition, not just the targets.
///
/// Trend widths are in seconds and cover the same span at any step.
pub fn evaluate<'a>(
    plan: &'a Plan,
    targets: impl IntoIterator<Item = &'a str>,
    timeline: &Timeline,
    cache: &mut SeriesCache,
) -> Result<HashMap<String, Values>, StoreError> {
    let definitions = plan.dependencies(targets);
    let lead = lead_in(&definitions, timeline.step);
    let extended = timeline.extended_back(lead);

    let mut values: HashMap<String, Values> = HashMap::with_capacity(definitions.len());
    for def in definitions {
        let series = match &def.source {
            Source::Raw(raw) => {
                let bucket = raw.step.map_or(extended.step, |s| (s.min(i64::MAX as u64) as i64).max(extended.step));
                cache
                    .get_or_load(&raw.node, &raw.location)?
                    .fetch(&raw.field, raw.function, bucket, &extended)
            }
            Source::Derived(derived) => {
                let operands: Vec<&[Option<f64>]> = derived
                    .operands
                    .iter()
                    .map(|name| values.get(name).map(Vec::as_slice).unwrap_or(&[]))
                    .collect();
                combine(derived.combine, &operands, extended.len, extended.step)
            }
        };
        values.insert(def.name.clone(), series);
    }

    for series in values.values_mut() {
        series.drain(..lead.min(series.len()));
    }
    Ok(values)
}

/// Points of `step` seconds spanned by a trend `width` seconds wide
fn trend_points(width: u32, step: i64) -> usize {
    let step = step.max(1) as u64;
    (width as u64).div_ceil(step).max(1) as usize
}

/// Number of extra points needed before the start so every trend is primed
fn lead_in(definitions: &[&Definition], step: i64) -> usize {
    let mut depth: HashMap<&str, usize> = HashMap::new();
    let mut deepest = 0;
    for def in definitions {
        let d = match &def.source {
            Source::Raw(_) => 0,
            Source::Derived(derived) => {
                let below = derived
                    .operands
                    .iter()
                    .filter_map(|o| depth.get(o.as_str()))
                    .copied()
                    .max()
                    .unwrap_or(0);
                match derived.combine {
                    Combine::WindowedTrend { width } => below + trend_points(width, step) - 1,
                    _ => below,
                }
            }
        };
        deepest = deepest.max(d);
        depth.insert(def.name.as_str(), d);
    }
    deepest
}

/// Apply `op` pointwise over points `step` seconds apart. Missing operands
/// read as undefined.
pub fn combine(op: Combine, operands: &[&[Option<f64>]], len: usize, step: i64) -> Values {
    match op {
        Combine::WindowedTrend { width } => {
            let source = operands.first().copied().unwrap_or(&[]);
            let points = trend_points(width, step);
            trend(&(0..len).map(|i| at(source, i)).collect::<Vec<_>>(), points)
        }
        Combine::SumAcrossNodes => (0..len)
            .map(|i| operands.iter().map(|s| at(s, i)).sum::<Option<f64>>())
            .collect(),
        Combine::Difference => (0..len)
            .map(|i| {
                let a = operands.first().and_then(|s| at(s, i));
                let b = operands.get(1).and_then(|s| at(s, i));
                Some(a? - b?)
            })
            .collect(),
        Combine::CrossNodeMin => reduce_defined(operands, len, |vs| vs.iter().copied().reduce(f64::min)),
        Combine::CrossNodeMax => reduce_defined(operands, len, |vs| vs.iter().copied().reduce(f64::max)),
        Combine::CrossNodeAverage => reduce_defined(operands, len, |vs| {
            (!vs.is_empty()).then(|| vs.iter().sum::<f64>() / vs.len() as f64)
        }),
    }
}

fn at(series: &[Option<f64>], i: usize) -> Option<f64> {
    series.get(i).copied().flatten()
}

/// Set reduction over the defined operands at each point
fn reduce_defined(operands: &[&[Option<f64>]], len: usize, f: impl Fn(&[f64]) -> Option<f64>) -> Values {
    let mut defined = Vec::with_capacity(operands.len());
    (0..len)
        .map(|i| {
            defined.clear();
            defined.extend(operands.iter().filter_map(|s| at(s, i)));
            f(defined.as_slice())
        })
        .collect()
}

/// Running sum with Neumaier compensation, so values leaving the window
/// do not take the small ones still inside it with them
#[derive(Debug, Default, Clone, Copy)]
struct RunningSum {
    sum: f64,
    compensation: f64,
}

impl RunningSum {
    fn add(&mut self, v: f64) {
        let t = self.sum + v;
        if self.sum.abs() >= v.abs() {
            self.compensation += (self.sum - t) + v;
        } else {
            self.compensation += (v - t) + self.sum;
        }
        self.sum = t;
    }

    fn value(&self) -> f64 {
        self.sum + self.compensation
    }
}

/// Mean of the defined values among the last `width` points
fn trend(values: &[Option<f64>], width: usize) -> Values {
    let width = width.max(1);
    let mut sum = RunningSum::default();
    let mut count = 0usize;
    let mut out = Vec::with_capacity(values.len());
    for (i, v) in values.iter().enumerate() {
        if let Some(v) = v {
            sum.add(*v);
            count += 1;
        }
        if i >= width {
            if let Some(old) = values[i - width] {
                sum.add(-old);
                count -= 1;
            }
        }
        if count == 0 {
            sum = RunningSum::default();
        }
        out.push((count > 0).then(|| sum.value() / count as f64));
    }
    out
}
