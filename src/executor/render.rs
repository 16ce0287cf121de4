//! SVG chart drawing for evaluated plans.

use super::eval::Values;
use super::RenderError;
use crate::config::ImageSize;
use crate::plan::{Color as SeriesColor, Plan, RenderItem, Style};
use crate::store::Timeline;
use plotters::prelude::*;
use std::collections::HashMap;

/// A render item resolved to plot coordinates
struct Layer<'a> {
    item: &'a RenderItem,
    /// Lower edge for areas: the previous layer for stacked areas, else zero
    base: Option<Values>,
    top: Values,
}

/// Resolve stacking. A stacked area sits on the last line or area drawn
/// before it; ticks never take part in stacking.
fn layers<'a>(plan: &'a Plan, values: &HashMap<String, Values>, len: usize) -> Vec<Layer<'a>> {
    let mut previous: Option<Values> = None;
    let mut out = Vec::with_capacity(plan.render.len());
    for item in &plan.render {
        let own = values.get(&item.series).cloned().unwrap_or_else(|| vec![None; len]);
        let layer = match item.style {
            Style::Area { stack: true } => {
                let base = previous.clone().unwrap_or_else(|| vec![Some(0.0); len]);
                let top = own
                    .iter()
                    .zip(&base)
                    .map(|(v, b)| v.map(|v| v + b.unwrap_or(0.0)))
                    .collect();
                Layer {
                    item,
                    base: Some(base),
                    top,
                }
            }
            Style::Area { stack: false } => Layer {
                item,
                base: Some(vec![Some(0.0); len]),
                top: own,
            },
            Style::Line | Style::Tick { .. } => Layer {
                item,
                base: None,
                top: own,
            },
        };
        if !matches!(item.style, Style::Tick { .. }) {
            previous = Some(layer.top.clone());
        }
        out.push(layer);
    }
    out
}

/// Vertical range over every line and area, always including zero
fn y_range(layers: &[Layer<'_>]) -> (f64, f64) {
    let (lo, hi) = layers
        .iter()
        .filter(|l| !matches!(l.item.style, Style::Tick { .. }))
        .flat_map(|l| l.top.iter().chain(l.base.iter().flatten()))
        .flatten()
        .fold((0.0_f64, 0.0_f64), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let span = (hi - lo).max(1.0);
    let lo = if lo < 0.0 { lo - span * 0.1 } else { lo };
    (lo, hi + span * 0.1)
}

/// Contiguous runs of defined points
fn segments(xs: &[f64], values: &[Option<f64>]) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for (x, v) in xs.iter().zip(values) {
        match v {
            Some(v) => current.push((*x, *v)),
            None if !current.is_empty() => runs.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

fn to_rgba(color: SeriesColor) -> RGBAColor {
    RGBColor(color.r, color.g, color.b).mix(color.opacity())
}

fn draw_err<E: std::fmt::Display>(e: E) -> RenderError {
    RenderError::Draw(e.to_string())
}

/// Draw `plan` into an SVG document
pub(super) fn draw_svg(
    plan: &Plan,
    timeline: &Timeline,
    values: &HashMap<String, Values>,
    size: ImageSize,
) -> Result<String, RenderError> {
    let layers = layers(plan, values, timeline.len);
    let xs: Vec<f64> = timeline.points().map(|t| (t - timeline.start) as f64).collect();
    let max_x = xs.last().copied().unwrap_or(0.0).max(1.0);
    let (min_y, max_y) = y_range(&layers);
    let half_step = timeline.step as f64 / 2.0;

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (size.width, size.height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(&plan.title, ("sans-serif", 20))
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(0f64..max_x, min_y..max_y)
            .map_err(draw_err)?;

        chart
            .configure_mesh()
            .x_desc("Time (seconds)")
            .y_desc(plan.vertical_label.as_str())
            .draw()
            .map_err(draw_err)?;

        for layer in &layers {
            // Uncolored items only serve as a stacking base
            let Some(color) = layer.item.color.map(to_rgba) else {
                continue;
            };

            let annotation = match layer.item.style {
                Style::Line => chart
                    .draw_series(
                        segments(&xs, &layer.top)
                            .into_iter()
                            .map(|run| PathElement::new(run, color.stroke_width(1))),
                    )
                    .map_err(draw_err)?,
                Style::Area { .. } => {
                    let base = layer.base.as_deref().unwrap_or(&[]);
                    let polygons = segments(&xs, &layer.top).into_iter().map(|run| {
                        let mut points = run.clone();
                        for (x, _) in run.iter().rev() {
                            let i = ((x / timeline.step as f64).round() as usize).min(base.len().saturating_sub(1));
                            points.push((*x, base.get(i).copied().flatten().unwrap_or(0.0)));
                        }
                        Polygon::new(points, color.filled())
                    });
                    chart.draw_series(polygons).map_err(draw_err)?
                }
                Style::Tick { fraction } => {
                    let height = min_y + (max_y - min_y) * fraction.clamp(0.0, 1.0);
                    let ticks = xs
                        .iter()
                        .zip(&layer.top)
                        .filter(|(_, v)| matches!(v, Some(v) if *v != 0.0))
                        .map(|(x, _)| {
                            Rectangle::new([(x - half_step, min_y), (x + half_step, height)], color.filled())
                        });
                    chart.draw_series(ticks).map_err(draw_err)?
                }
            };

            if let Some(label) = &layer.item.label {
                match layer.item.style {
                    Style::Line => annotation
                        .label(label.as_str())
                        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color)),
                    Style::Area { .. } | Style::Tick { .. } => annotation
                        .label(label.as_str())
                        .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 20, y + 5)], color.filled())),
                };
            }
        }

        if layers.iter().any(|l| l.item.label.is_some() && l.item.color.is_some()) {
            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .position(SeriesLabelPosition::UpperLeft)
                .draw()
                .map_err(draw_err)?;
        }

        root.present().map_err(draw_err)?;
    }
    Ok(svg)
}
