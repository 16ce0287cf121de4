//! Plan serialization to rrdtool `graph` and `xport` arguments.
//!
//! Derived series become `CDEF` expressions in reverse polish notation. Set
//! reductions (`SMIN`, `SMAX`, `AVG`) pop an operand count pushed right
//! before the operator, so the count always equals the operand list length.

use crate::config::{ImageSize, TimeWindow};
use crate::plan::{Combine, Definition, Plan, RenderItem, Source, Style};
use std::path::{Path, PathBuf};

/// RPN expression of a derived series
pub fn expression(combine: Combine, operands: &[String]) -> String {
    let mut tokens: Vec<String> = Vec::with_capacity(operands.len() * 2 + 2);
    match combine {
        Combine::SumAcrossNodes | Combine::Difference => {
            let op = if combine == Combine::Difference { "-" } else { "+" };
            for (i, operand) in operands.iter().enumerate() {
                tokens.push(operand.clone());
                if i > 0 {
                    tokens.push(op.to_string());
                }
            }
        }
        Combine::WindowedTrend { width } => {
            tokens.extend(operands.iter().cloned());
            tokens.push(width.to_string());
            tokens.push("TRENDNAN".to_string());
        }
        Combine::CrossNodeMin | Combine::CrossNodeMax | Combine::CrossNodeAverage => {
            tokens.extend(operands.iter().cloned());
            tokens.push(operands.len().to_string());
            tokens.push(
                match combine {
                    Combine::CrossNodeMin => "SMIN",
                    Combine::CrossNodeMax => "SMAX",
                    _ => "AVG",
                }
                .to_string(),
            );
        }
    }
    tokens.join(",")
}

/// Round robin database holding the series of a node; it sits next to the
/// node's series file
pub fn rrd_path(location: &Path) -> PathBuf {
    location.with_extension("rrd")
}

/// `DEF` or `CDEF` statement for one definition
pub fn definition(def: &Definition) -> String {
    match &def.source {
        Source::Raw(raw) => {
            let mut statement = format!(
                "DEF:{}={}:{}:{}",
                def.name,
                escape(&rrd_path(&raw.location).display().to_string()),
                raw.field,
                raw.function
            );
            if let Some(step) = raw.step {
                statement.push_str(&format!(":step={}", step));
            }
            statement
        }
        Source::Derived(derived) => {
            format!("CDEF:{}={}", def.name, expression(derived.combine, &derived.operands))
        }
    }
}

/// Graph element for one render item
pub fn element(item: &RenderItem) -> String {
    let color = item.color.map(|c| format!("#{}", c)).unwrap_or_default();
    let label = item.label.as_deref().map(escape);
    match item.style {
        Style::Line => match label {
            Some(label) => format!("LINE1:{}{}:{}", item.series, color, label),
            None => format!("LINE1:{}{}", item.series, color),
        },
        Style::Area { stack } => {
            let mut element = format!("AREA:{}{}", item.series, color);
            if label.is_some() || stack {
                element.push(':');
                element.push_str(label.as_deref().unwrap_or(""));
            }
            if stack {
                element.push_str(":STACK");
            }
            element
        }
        Style::Tick { fraction } => match label {
            Some(label) => format!("TICK:{}{}:{}:{}", item.series, color, fraction, label),
            None => format!("TICK:{}{}:{}", item.series, color, fraction),
        },
    }
}

/// Arguments of `rrdtool graph` drawing `plan` into `output`
pub fn graph_args(plan: &Plan, window: &TimeWindow, size: ImageSize, output: &Path) -> Vec<String> {
    let mut args = vec![
        "graph".to_string(),
        output.display().to_string(),
        "--start".to_string(),
        window.start_secs().to_string(),
        "--end".to_string(),
        window.end_secs().to_string(),
        "--width".to_string(),
        size.width.to_string(),
        "--height".to_string(),
        size.height.to_string(),
        "--title".to_string(),
        plan.title.clone(),
        "--vertical-label".to_string(),
        plan.vertical_label.clone(),
    ];
    args.extend(plan.definitions.iter().map(definition));
    args.extend(plan.render.iter().map(element));
    args
}

/// Arguments of `rrdtool xport` for the export series of `plan`. Only the
/// definitions the exported series depend on are included.
pub fn xport_args(plan: &Plan, window: &TimeWindow, step: u64, max_rows: usize) -> Vec<String> {
    let mut args = vec![
        "xport".to_string(),
        "--start".to_string(),
        window.start_secs().to_string(),
        "--end".to_string(),
        window.end_secs().to_string(),
        "--step".to_string(),
        step.to_string(),
        "--maxrows".to_string(),
        max_rows.to_string(),
    ];
    let targets = plan.export.iter().map(|e| e.series.as_str());
    args.extend(plan.dependencies(targets).into_iter().map(definition));
    args.extend(
        plan.export
            .iter()
            .map(|e| format!("XPORT:{}:{}", e.series, escape(&e.label))),
    );
    args
}

/// Render arguments as one shell command line
pub fn command_line(args: &[String]) -> String {
    std::iter::once("rrdtool".to_string())
        .chain(args.iter().map(|a| shell_quote(a)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape(text: &str) -> String {
    text.replace(':', "\\:")
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=:,./#+".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}
