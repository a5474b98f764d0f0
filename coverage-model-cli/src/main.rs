use anyhow::{Context, Result};
use clap::Parser;
use coverage_model::parser::load_model;
use coverage_model::{CoverageModel, Descriptor};
use rayon::ThreadPoolBuilder;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model document (XML)
    #[arg(value_name = "MODEL")]
    model: PathBuf,

    /// Descriptor value for a single evaluation, as NAME=VALUE (repeatable)
    #[arg(long = "value", value_name = "NAME=VALUE")]
    values: Vec<String>,

    /// File of samples: one line per sample, values in descriptor order
    #[arg(short, long, value_name = "FILE")]
    samples: Option<PathBuf>,

    /// Where to write sample results (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Normalize values before evaluating
    #[arg(long)]
    normalize: bool,

    /// List descriptors and terms
    #[arg(long)]
    terms: bool,

    /// Number of worker threads (default: number of CPU cores)
    #[arg(short, long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let start_time = std::time::Instant::now();

    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build thread pool")?;
    }

    let model = load_model(&args.model)
        .with_context(|| format!("Failed to load model {:?}", args.model))?;
    println!("{}", model);

    if args.terms {
        print!("{}", describe(&model));
    }

    if !args.values.is_empty() {
        let mut values = named_values(&model, &args.values)?;
        if args.normalize {
            model.normalize(&mut values);
        }
        println!("{}", model.evaluate(&values));
    }

    if let Some(samples) = &args.samples {
        info!("Processing samples: {:?}", samples);
        process_samples(&model, samples, &args)?;
    }

    info!("Total processing time: {:?}", start_time.elapsed());

    Ok(())
}

fn describe(model: &CoverageModel) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "descriptors:");
    for (i, descriptor) in model.descriptors().iter().enumerate() {
        let _ = writeln!(
            out,
            "  [{}] {} (layer {}, band {}, dt {}, {})",
            i,
            descriptor.name(),
            descriptor.layer,
            descriptor.band,
            descriptor.time_offset,
            descriptor.distribution
        );
    }
    let _ = writeln!(out, "terms:");
    for term in model.terms() {
        let _ = writeln!(out, "  {}", term);
    }
    out
}

fn parse_assignment(assignment: &str) -> Result<(&str, f64)> {
    let (name, value) = assignment
        .split_once('=')
        .with_context(|| format!("Expected NAME=VALUE, got `{}`", assignment))?;
    let value = value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for `{}`: `{}`", name, value))?;
    Ok((name.trim(), value))
}

/// Orders `NAME=VALUE` assignments like the model's descriptors.
fn named_values(model: &CoverageModel, assignments: &[String]) -> Result<Vec<f64>> {
    let descriptors = model.descriptors();
    let mut values = vec![None; descriptors.len()];
    for assignment in assignments {
        let (name, value) = parse_assignment(assignment)?;
        let position = descriptors
            .iter()
            .position(|d| d.name() == name)
            .with_context(|| format!("The model has no descriptor `{}`", name))?;
        values[position] = Some(value);
    }
    values
        .into_iter()
        .zip(descriptors)
        .map(|(value, descriptor)| {
            value.with_context(|| format!("No value given for `{}`", descriptor.name()))
        })
        .collect()
}

fn parse_samples(content: &str, width: usize) -> Result<Vec<Vec<f64>>> {
    let mut samples = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let sample = line
            .split_whitespace()
            .map(|token| token.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Line {}: invalid number", i + 1))?;
        if sample.len() != width {
            anyhow::bail!(
                "Line {}: expected {} values, got {}",
                i + 1,
                width,
                sample.len()
            );
        }
        samples.push(sample);
    }
    Ok(samples)
}

fn evaluate_samples(model: &CoverageModel, samples: Vec<Vec<f64>>, normalize: bool) -> Vec<f64> {
    use rayon::prelude::*;

    samples
        .into_par_iter()
        .map(|mut values| {
            if normalize {
                model.normalize(&mut values);
            }
            model.evaluate(&values)
        })
        .collect()
}

fn process_samples(model: &CoverageModel, path: &Path, args: &Args) -> Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let samples = match parse_samples(&content, model.descriptors().len()) {
        Ok(samples) => samples,
        Err(e) => {
            error!("Invalid sample file {:?}: {}", path, e);
            return Err(e);
        }
    };
    info!("Evaluating {} samples", samples.len());

    let results = evaluate_samples(model, samples, args.normalize);
    let mut out = String::new();
    for result in &results {
        let _ = writeln!(out, "{}", result);
    }

    match &args.output {
        Some(output) => {
            fs::write(output, out).with_context(|| format!("Failed to write {:?}", output))?;
            info!("Written {} results: {:?}", results.len(), output);
        }
        None => print!("{}", out),
    }

    Ok(())
}
