use crate::config::config::EvalboxConfig;
use crate::config::properties::Properties;
use crate::config::types::MemoryLimit;
use crate::config::validator::validate_config;
use crate::exec::boundary::{evaluate_candidate, ExperimentSpec, IsolationBoundary};
use crate::kernel::signal;
use crate::observability::metrics::get_metrics;
use crate::pipeline::run::{run_evaluation, EvaluationRequest};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to evalbox.json (defaults to ./evalbox.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print counters in Prometheus text format when done
    #[arg(long, global = true)]
    print_metrics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one candidate in an isolated child process
    Evaluate {
        /// Dataset string, e.g. type=dummy:size=100 or type=trainTestCsv:train=a.csv:test=b.csv
        #[arg(long)]
        dataset: String,
        /// Training timeout in seconds
        #[arg(long)]
        timeout: f64,
        /// Heap ceiling for the child, e.g. 512m or 2g
        #[arg(long)]
        memory: Option<String>,
        /// Experiment seed passed through EXPERIMENT_SEED
        #[arg(long, default_value = "0")]
        seed: String,
        /// Wrapper executable (defaults to evalbox-wrapper next to this binary)
        #[arg(long)]
        wrapper: Option<PathBuf>,
        /// Result metric, e.g. errorRate, mae or rmse
        #[arg(long)]
        metric: Option<String>,
        /// Extra wrapper properties (key=value:key2=value2)
        #[arg(long = "prop", value_name = "PROPS")]
        props: Vec<String>,
        /// Candidate arguments
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Evaluate one candidate in this process under supervisors only
    Run {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        timeout: f64,
        #[arg(long, default_value = "0")]
        seed: String,
        /// Directories searched for relative dataset paths
        #[arg(long = "search-path", value_name = "DIR")]
        search_path: Vec<PathBuf>,
        #[arg(long = "prop", value_name = "PROPS")]
        props: Vec<String>,
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Validate a configuration file
    CheckConfig {
        path: PathBuf,
        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<EvalboxConfig> {
    Ok(match path {
        Some(path) => EvalboxConfig::load_from_file(path)?,
        None => EvalboxConfig::load_default()?,
    })
}

fn merged_props(props: &[String]) -> Result<Properties> {
    let mut merged = Properties::new();
    for text in props {
        merged.merge_str(text)?;
    }
    Ok(merged)
}

pub fn run() -> Result<()> {
    env_logger::init();
    signal::install_teardown_hooks()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate {
            dataset,
            timeout,
            memory,
            seed,
            wrapper,
            metric,
            props,
            args,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(wrapper) = wrapper {
                config.isolation.wrapper_executable = Some(wrapper);
            }
            if let Some(metric) = metric {
                config.evaluation.result_metric = metric;
            }
            let mut experiment = ExperimentSpec::from_config(&config, dataset, timeout)?;
            if let Some(memory) = memory {
                experiment.memory_limit = MemoryLimit::parse(&memory)?;
            }
            experiment.extra_props = merged_props(&props)?;

            let boundary = IsolationBoundary::from_config(&config);
            let outcome = evaluate_candidate(&boundary, &experiment, &args, &seed)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Run {
            dataset,
            timeout,
            seed,
            search_path,
            props,
            args,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let search_path = if search_path.is_empty() {
                config.isolation.search_path.clone()
            } else {
                search_path
            };
            let request = EvaluationRequest {
                instance: dataset,
                seed,
                search_path,
                properties: merged_props(&props)?,
                timeout_secs: timeout,
                candidate_args: args,
            };
            let result = run_evaluation(request, &config);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::CheckConfig { path, strict } => {
            let config = EvalboxConfig::load_from_file(&path)?;
            let report = validate_config(&config, strict)?;
            for warning in &report.warnings {
                eprintln!("warning: {}", warning);
            }
            for error in &report.errors {
                eprintln!("error: {}", error);
            }
            if !report.is_valid() {
                std::process::exit(1);
            }
            println!("{}: ok", path.display());
        }
    }

    if cli.print_metrics {
        eprint!("{}", get_metrics().export_prometheus());
    }
    Ok(())
}
