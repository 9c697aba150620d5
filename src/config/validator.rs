// Config validation
// Startup validation of evalbox.json; strict callers fail fast with actionable errors

use crate::config::config::EvalboxConfig;
use crate::config::types::{EvalError, Result};
use crate::pipeline::metric::Metric;

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a loaded config; with `strict`, any error becomes `EvalError::Config`
pub fn validate_config(config: &EvalboxConfig, strict: bool) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_supervisor(config, &mut result);
    validate_isolation(config, &mut result);
    validate_evaluation(config, &mut result);

    if strict && !result.is_valid() {
        let error_msg = format!(
            "Config validation failed in strict mode:\n{}",
            result.errors.join("\n")
        );
        return Err(EvalError::Config(error_msg));
    }

    Ok(result)
}

fn validate_supervisor(config: &EvalboxConfig, result: &mut ValidationResult) {
    let sup = &config.supervisor;

    if sup.poll_interval_ms == 0 {
        result.add_error("supervisor.poll_interval_ms cannot be zero".to_string());
    } else if sup.poll_interval_ms > 1000 {
        result.add_warning(format!(
            "supervisor.poll_interval_ms {} is coarse; termination may lag the hard limit",
            sup.poll_interval_ms
        ));
    }

    if !sup.hard_multiplier.is_finite() || sup.hard_multiplier < 1.0 {
        result.add_error(format!(
            "supervisor.hard_multiplier must be >= 1.0, got {}",
            sup.hard_multiplier
        ));
    }

    // The outer run must outlast every inner hard limit
    if !sup.outer_multiplier.is_finite() || sup.outer_multiplier < sup.hard_multiplier {
        result.add_error(format!(
            "supervisor.outer_multiplier ({}) must be >= hard_multiplier ({})",
            sup.outer_multiplier, sup.hard_multiplier
        ));
    }
}

fn validate_isolation(config: &EvalboxConfig, result: &mut ValidationResult) {
    let iso = &config.isolation;

    if iso.memory_limit.bytes() < 64 * 1024 * 1024 {
        result.add_warning(format!(
            "isolation.memory_limit {} is very low (< 64m), the wrapper may fail to start",
            iso.memory_limit
        ));
    }

    if !iso.wait_cap_multiplier.is_finite()
        || iso.wait_cap_multiplier < config.supervisor.outer_multiplier
    {
        result.add_error(format!(
            "isolation.wait_cap_multiplier ({}) must be >= supervisor.outer_multiplier ({})",
            iso.wait_cap_multiplier, config.supervisor.outer_multiplier
        ));
    }

    if let Some(ref wrapper) = iso.wrapper_executable {
        if !wrapper.exists() {
            result.add_warning(format!("wrapper_executable does not exist: {:?}", wrapper));
        }
    }

    for dir in &iso.search_path {
        if !dir.is_dir() {
            result.add_warning(format!("search_path entry is not a directory: {:?}", dir));
        }
    }
}

fn validate_evaluation(config: &EvalboxConfig, result: &mut ValidationResult) {
    if let Err(e) = Metric::parse(&config.evaluation.result_metric) {
        result.add_error(e.to_string());
    }
}
