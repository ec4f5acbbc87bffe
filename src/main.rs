//! Strata CLI - demand-driven image pipelines
//!
//! A demonstration CLI for the Strata library.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use strata::prelude::*;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = run(&args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    let program = args.first().map(String::as_str).unwrap_or("strata");
    let Some(command) = args.get(1) else {
        print_usage(program);
        return Ok(());
    };

    match command.as_str() {
        "list" => {
            list_filters();
            Ok(())
        }
        "plan" => plan(&args[2..]),
        "stream" => stream(&args[2..]),
        "help" | "--help" | "-h" => {
            print_usage(program);
            Ok(())
        }
        other => {
            print_usage(program);
            bail!("unknown command: {}", other)
        }
    }
}

fn print_usage(program: &str) {
    println!("Strata v{}", strata::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  list                          List all available filters");
    println!("  plan <size> <divisions>       Print the stream divisions of a region");
    println!("  stream <size> [divisions]     Stream a slice-and-join demo pipeline");
    println!("  help                          Show this help message");
    println!();
    println!("Sizes are written as 64x64x16 (fastest axis first).");
    println!();
    println!("Plan options:");
    println!("  --json              Print the divisions as JSON");
    println!();
    println!("Stream options:");
    println!("  --config <file>     Read threads, memory limit and release flag from TOML");
    println!("  --output <file>     Write raw pixels to a file instead of memory");
    println!();
    println!("Set RUST_LOG=debug to trace every node execution.");
}

fn list_filters() {
    let registry: FilterRegistry<f32> = FilterRegistry::with_builtins();
    let grouped = registry.grouped_by_category();

    println!("Available filters ({} total):", registry.len());
    println!();

    for (category, filters) in grouped {
        println!("  {}", category.display_name());
        for metadata in filters {
            println!("      {} - {}", metadata.id, metadata.description);
            if !metadata.parameters.is_empty() {
                println!("          parameters: {}", metadata.parameter_names().join(", "));
            }
        }
        println!();
    }
}

fn plan(args: &[String]) -> Result<()> {
    let (Some(size), Some(divisions)) = (args.first(), args.get(1)) else {
        bail!("usage: plan <size> <divisions> [--json]");
    };
    let region = Region::from_size(parse_size(size)?);
    let divisions: usize = divisions
        .parse()
        .with_context(|| format!("invalid division count: {}", divisions))?;
    let json = args[2..].iter().any(|a| a == "--json");

    let plan = StreamSplitter::plan(&region, divisions);
    if json {
        let regions: Vec<Region> = plan.collect();
        println!("{}", serde_json::to_string_pretty(&regions)?);
    } else {
        println!(
            "{} in {} divisions along axis {}:",
            region,
            plan.number_of_divisions(),
            plan.axis()
        );
        for (index, division) in plan.enumerate() {
            println!("  {:>4}  {}", index, division);
        }
    }
    Ok(())
}

fn stream(args: &[String]) -> Result<()> {
    let Some(size) = args.first() else {
        bail!("usage: stream <size> [divisions] [--config <file>] [--output <file>]");
    };
    let size = parse_size(size)?;
    if size.len() < 2 {
        bail!("the demo pipeline needs at least two axes");
    }

    let mut divisions: Option<usize> = None;
    let mut config = PipelineConfig::default();
    let mut output: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                config = PipelineConfig::from_file(&args[i + 1])
                    .with_context(|| format!("failed to load {}", args[i + 1]))?;
                i += 2;
            }
            "--output" if i + 1 < args.len() => {
                output = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            value if divisions.is_none() && !value.starts_with("--") => {
                divisions = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid division count: {}", value))?,
                );
                i += 1;
            }
            other => bail!("unknown option: {}", other),
        }
    }
    let divisions = divisions.unwrap_or(config.divisions);

    let mut graph: ProcessingGraph<f32> = ProcessingGraph::new();
    let (terminal, monitor) = build_demo(&mut graph, &size, config.release_data)?;

    let options = config.execution_options().with_progress(|update| {
        if let ProgressUpdate::DivisionCompleted { index, total } = update {
            log::info!("Division {}/{} written", index + 1, total);
        }
    });
    let orchestrator = UpdateOrchestrator::new(options);
    let writer = StreamingWriter::new(divisions);

    let summary = match &output {
        Some(path) => {
            let mut sink = RawFileSink::new(path);
            writer.write(&orchestrator, &mut graph, terminal, &mut sink)?
        }
        None => {
            let mut sink = MemoryImageSink::new();
            writer.write(&orchestrator, &mut graph, terminal, &mut sink)?
        }
    };

    println!("Streamed {} divisions in {:?}", summary.divisions, summary.duration);
    println!("  node executions:  {}", summary.nodes_executed);
    println!("  monitor updates:  {}", monitor.number_of_updates());
    println!("  peak memory:      {} bytes", summary.peak_memory);
    if let Some(path) = output {
        println!("  output:           {}", path.display());
    }
    Ok(())
}

/// Source -> monitor -> one extractor per slice of the last axis -> join.
fn build_demo(
    graph: &mut ProcessingGraph<f32>,
    size: &[usize],
    release_data: bool,
) -> Result<(NodeId, MonitorHandle)> {
    let last = size.len() - 1;
    let region = Region::from_size(size.to_vec());
    let info = ImageInformation::new(region.clone());
    let source = graph.add(SourceNode::new(FunctionSource::new(info, |index: &[i64]| {
        index.iter().sum::<i64>() as f32
    })));
    graph.set_label(source, "Reader")?;

    let monitor = PipelineMonitor::new();
    let handle = monitor.handle();
    let monitor = graph.add(monitor);
    graph.connect(source, monitor, 0)?;

    let join = graph.add(JoinSeriesFilter::new());
    for slice in 0..size[last] {
        let extraction = region.with_index_at(last, slice as i64).with_size_at(last, 0);
        let extract = graph.add(ExtractFilter::new(extraction));
        graph.connect(monitor, extract, 0)?;
        graph.connect(extract, join, slice)?;
        graph.set_release_data_flag(extract, release_data)?;
    }

    Ok((join, handle))
}

fn parse_size(s: &str) -> Result<Vec<usize>> {
    let size = s
        .split('x')
        .map(|part| part.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid size: {}", s))?;
    if size.is_empty() || size.contains(&0) {
        bail!("invalid size: {}", s);
    }
    Ok(size)
}
