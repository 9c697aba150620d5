//! Child-side entry point.
//!
//! Parses the fixed single-dash command line built by
//! [`crate::exec::command::IsolationCommand`], applies the memory ceiling,
//! runs one evaluation and prints the result line the parent waits for.

use crate::config::config::EvalboxConfig;
use crate::config::properties::Properties;
use crate::config::types::{EvalError, EvaluationResult, MemoryLimit, Result};
use crate::exec::command::{SEED_ENV_VAR, WRAPPER_ENTRY_POINT};
use crate::kernel::rlimit;
use crate::pipeline::run::{run_evaluation, EvaluationRequest};
use crate::utils::output::{format_detail_line, format_result_line};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::path::PathBuf;

/// Address space granted beyond the heap ceiling for code, stacks and
/// allocator arenas
pub const ADDRESS_SPACE_HEADROOM: u64 = 256 * 1024 * 1024;

const DEFAULT_SEED: &str = "0";

/// Parsed wrapper command line
#[derive(Clone, Debug, PartialEq)]
pub struct WrapperArgs {
    pub memory_limit: Option<MemoryLimit>,
    pub search_path: Vec<PathBuf>,
    pub properties: Properties,
    pub timeout_secs: f64,
    pub experiment_seed: Option<String>,
    pub instance: String,
    pub candidate_args: Vec<String>,
}

impl WrapperArgs {
    /// Consume arguments front to back; everything after `-wrapper <instance>`
    /// belongs to the candidate.
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut queue: VecDeque<String> = args.into_iter().collect();
        let mut memory_limit = None;
        let mut search_path = vec![PathBuf::from(".")];
        let mut properties = Properties::new();
        let mut timeout_secs = None;
        let mut experiment_seed = None;
        let mut instance = None;

        while let Some(arg) = queue.pop_front() {
            if let Some(size) = arg.strip_prefix("-Xmx") {
                memory_limit = Some(MemoryLimit::parse(size)?);
                continue;
            }
            match arg.as_str() {
                "-cp" => {
                    search_path = value_for(&mut queue, &arg)?
                        .split(':')
                        .filter(|p| !p.is_empty())
                        .map(PathBuf::from)
                        .collect();
                }
                WRAPPER_ENTRY_POINT => {}
                "-prop" => properties.merge_str(&value_for(&mut queue, &arg)?)?,
                "-propsfile" => {
                    let path = value_for(&mut queue, &arg)?;
                    let text = std::fs::read_to_string(&path).map_err(|e| {
                        EvalError::Config(format!("failed to read properties file {}: {}", path, e))
                    })?;
                    for line in text.lines().map(str::trim) {
                        if !line.is_empty() && !line.starts_with('#') {
                            properties.merge_str(line)?;
                        }
                    }
                }
                "-timeout" => {
                    let raw = value_for(&mut queue, &arg)?;
                    let secs: f64 = raw
                        .parse()
                        .map_err(|_| EvalError::Config(format!("invalid -timeout '{}'", raw)))?;
                    timeout_secs = Some(secs);
                }
                "-seed" => {
                    let ignored = value_for(&mut queue, &arg)?;
                    warn!("ignoring -seed {}; use -experimentseed", ignored);
                }
                "-experimentseed" => experiment_seed = Some(value_for(&mut queue, &arg)?),
                "-wrapper" => {
                    instance = Some(value_for(&mut queue, &arg)?);
                    break;
                }
                other => {
                    return Err(EvalError::Config(format!("unknown wrapper argument '{}'", other)));
                }
            }
        }

        let instance = instance.ok_or_else(|| EvalError::Config("missing -wrapper <instance>".to_string()))?;
        let timeout_secs = timeout_secs.ok_or_else(|| EvalError::Config("missing -timeout".to_string()))?;
        let candidate_args = queue.into_iter().map(|a| a.replace('\'', "")).collect();

        Ok(Self {
            memory_limit,
            search_path,
            properties,
            timeout_secs,
            experiment_seed,
            instance,
            candidate_args,
        })
    }

    /// `-experimentseed`, then `EXPERIMENT_SEED`, then `"0"`
    pub fn resolve_seed(&self) -> String {
        if let Some(seed) = &self.experiment_seed {
            return seed.clone();
        }
        match std::env::var(SEED_ENV_VAR) {
            Ok(seed) if !seed.is_empty() => seed,
            _ => {
                warn!("no experiment seed given; using {}", DEFAULT_SEED);
                DEFAULT_SEED.to_string()
            }
        }
    }

    /// The instance string, or the `datasetString` property when it is empty
    fn dataset(&self) -> String {
        if self.instance.is_empty() {
            self.properties.get_or("datasetString", "").to_string()
        } else {
            self.instance.clone()
        }
    }

    pub fn into_request(self) -> EvaluationRequest {
        let seed = self.resolve_seed();
        let instance = self.dataset();
        EvaluationRequest {
            instance,
            seed,
            search_path: self.search_path,
            properties: self.properties,
            timeout_secs: self.timeout_secs,
            candidate_args: self.candidate_args,
        }
    }
}

fn value_for(queue: &mut VecDeque<String>, flag: &str) -> Result<String> {
    queue
        .pop_front()
        .ok_or_else(|| EvalError::Config(format!("{} requires a value", flag)))
}

/// Cap the address space at the heap ceiling plus headroom
pub fn apply_memory_limit(limit: &MemoryLimit) -> Result<()> {
    let bytes = limit.bytes().saturating_add(ADDRESS_SPACE_HEADROOM);
    rlimit::limit_address_space(bytes)?;
    match rlimit::address_space_limit()? {
        Some(effective) => debug!("address space limited to {} bytes", effective),
        None => warn!("address space is still unlimited after requesting {} bytes", bytes),
    }
    Ok(())
}

/// Apply limits and run the evaluation described by `args`
pub fn run_wrapper(args: WrapperArgs, config: &EvalboxConfig) -> Result<EvaluationResult> {
    if let Some(limit) = &args.memory_limit {
        apply_memory_limit(limit)?;
    }
    info!(
        "wrapper: instance '{}' with timeout {}s and {} candidate arguments",
        args.instance,
        args.timeout_secs,
        args.candidate_args.len()
    );
    Ok(run_evaluation(args.into_request(), config))
}

/// Process entry point of `evalbox-wrapper`
pub fn main_entry() -> anyhow::Result<()> {
    env_logger::init();
    let args = WrapperArgs::parse(std::env::args().skip(1))?;
    let config = EvalboxConfig::load_default()?;
    let result = run_wrapper(args, &config)?;

    println!("{}", format_detail_line(&result)?);
    println!("{}", format_result_line(result.total_time, result.score));
    Ok(())
}
