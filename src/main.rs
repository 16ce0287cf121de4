//! testbed-plot - draw a testbed telemetry chart and print its summary.
//!
//! Reads the node list, builds the plan for the requested content, renders
//! it to an SVG file and, for `txrate` and `confirm`, prints the average of
//! the exported window.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use testbed_plot::config::{ImageSize, TimeWindow};
use testbed_plot::executor::{Export, NativeExecutor, PlanExecutor, DEFAULT_MAX_EXPORT_ROWS};
use testbed_plot::plan::{MetricKind, Plan};
use testbed_plot::reducer::reduce;
use testbed_plot::registry::Registry;
use testbed_plot::rpn;

/// Chart testbed telemetry and summarize throughput and latency
#[derive(Parser, Debug)]
#[command(name = "testbed-plot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Node list file; the first comma separated field of each line is a node name
    #[arg(short, long, env = "TESTBED_NODES")]
    nodes: PathBuf,

    /// Directory holding one <node>.jsonl series file per node
    #[arg(short, long, env = "TESTBED_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Chart content: txrate, blockdelay, confirm, queue or mining
    #[arg(short, long)]
    content: String,

    /// Node the chart focuses on
    #[arg(long)]
    node: String,

    /// Output image path
    #[arg(short, long, default_value = "plot.svg")]
    output: PathBuf,

    /// Image size as WIDTHxHEIGHT
    #[arg(long, default_value_t = ImageSize::default())]
    size: ImageSize,

    /// Length of the charted window in seconds
    #[arg(long, default_value = "600")]
    duration: u64,

    /// End of the window as Unix seconds (default: now)
    #[arg(long)]
    end: Option<String>,

    /// Smoothing window in samples for txrate/confirm (1 disables),
    /// fetch step in seconds for blockdelay/queue
    #[arg(short, long, default_value = "1")]
    window: u32,

    /// Export step in seconds for the summary statistic
    #[arg(long, default_value = "1")]
    export_step: u64,

    /// Most rows the export may hold; longer windows are exported at a coarser step
    #[arg(long, default_value_t = DEFAULT_MAX_EXPORT_ROWS)]
    export_max_rows: usize,

    /// Write the exported samples to this file as JSON Lines
    #[arg(long)]
    dump_export: Option<PathBuf>,

    /// Print the equivalent rrdtool commands instead of executing the plan
    #[arg(long)]
    dry_run: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG takes precedence; stdout is kept for the report
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    let Ok(kind) = args.content.parse::<MetricKind>() else {
        eprintln!("Plot content options: {}", MetricKind::NAMES.join(", "));
        return Ok(ExitCode::FAILURE);
    };

    let registry = Registry::load(&args.nodes, &args.data_dir).context("Error opening node list")?;
    tracing::info!(
        nodes = registry.len(),
        data_dir = %args.data_dir.display(),
        "loaded node list"
    );
    if registry.is_empty() {
        tracing::warn!(path = %args.nodes.display(), "node list is empty");
    }

    let plan = kind.build(&registry, &args.node, args.window)?;
    let window = TimeWindow::resolve(args.end.as_deref(), args.duration);
    tracing::info!(
        content = %kind,
        node = %args.node,
        window = %window,
        definitions = plan.definitions.len(),
        "built plan"
    );

    if args.dry_run {
        print_commands(&plan, kind, &window, args);
        return Ok(ExitCode::SUCCESS);
    }

    let executor = NativeExecutor::new().with_max_export_rows(args.export_max_rows);

    // Rendering and export fail independently; neither stops the other
    match executor.render(&plan, &window, args.size) {
        Ok(image) => {
            if let Err(e) = std::fs::write(&args.output, image) {
                tracing::error!(path = %args.output.display(), error = %e, "Error writing chart");
            } else {
                tracing::info!(path = %args.output.display(), "wrote chart");
            }
        }
        Err(e) => tracing::error!(error = %e, "Error plotting data"),
    }

    if kind.has_summary() {
        match executor.export(&plan, &window, args.export_step) {
            Ok(export) => {
                if let Some(path) = &args.dump_export {
                    if let Err(e) = dump_export(&export, path) {
                        tracing::error!(error = ?e, "Error dumping export");
                    }
                }
                report(&export, kind, args.duration);
            }
            Err(e) => tracing::error!(error = %e, "Error exporting data"),
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn report(export: &Export, kind: MetricKind, duration: u64) {
    let summary = reduce(&export.samples);
    tracing::debug!(
        count = summary.count,
        sum = summary.sum,
        any_undefined = summary.any_undefined,
        "reduced export"
    );
    if summary.any_undefined {
        println!("Ignore: data has NaN");
    }
    match summary.rounded_average() {
        Some(avg) => println!("XportResult: Avg {} in {} seconds: {}", kind, duration, avg),
        None => {
            tracing::warn!(label = %export.label, "no defined samples in export window");
            println!("XportResult: Avg {} in {} seconds: NaN", kind, duration);
        }
    }
}

fn dump_export(export: &Export, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for sample in &export.samples {
        writeln!(writer, "{}", serde_json::to_string(sample)?)?;
    }
    writer.flush()?;
    Ok(())
}

fn print_commands(plan: &Plan, kind: MetricKind, window: &TimeWindow, args: &Args) {
    println!(
        "{}",
        rpn::command_line(&rpn::graph_args(plan, window, args.size, &args.output))
    );
    if kind.has_summary() {
        println!(
            "{}",
            rpn::command_line(&rpn::xport_args(plan, window, args.export_step, args.export_max_rows))
        );
    }
}
