use crate::config::properties::Properties;
use crate::config::types::MemoryLimit;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Entry point the wrapper binary accepts after `-cp`
pub const WRAPPER_ENTRY_POINT: &str = "evalbox.wrapper";

/// Environment variable carrying the experiment seed to the child
pub const SEED_ENV_VAR: &str = "EXPERIMENT_SEED";

/// Command line for one isolated evaluation:
/// `<exe> -Xmx<mem> -cp <path> <entry> -prop <props> -timeout <t> -wrapper <instance> <args...>`
#[derive(Clone, Debug, PartialEq)]
pub struct IsolationCommand {
    executable: PathBuf,
    search_path: Vec<PathBuf>,
    properties: Properties,
    timeout_secs: f64,
    instance: String,
    candidate_args: Vec<String>,
}

impl IsolationCommand {
    pub fn new(executable: impl Into<PathBuf>, instance: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            search_path: vec![PathBuf::from(".")],
            properties: Properties::new(),
            timeout_secs: 0.0,
            instance: instance.into(),
            candidate_args: Vec::new(),
        }
    }

    pub fn search_path<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_path = dirs.into_iter().map(Into::into).collect();
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.set(key, value);
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn timeout_secs(mut self, timeout: f64) -> Self {
        self.timeout_secs = if timeout.is_finite() { timeout.max(0.0) } else { 0.0 };
        self
    }

    pub fn candidate_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidate_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn timeout(&self) -> f64 {
        self.timeout_secs
    }

    fn joined_search_path(&self) -> String {
        self.search_path
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Arguments after the executable
    pub fn argv(&self, memory_limit: &MemoryLimit) -> Vec<String> {
        let mut args = vec![
            memory_limit.as_flag(),
            "-cp".to_string(),
            self.joined_search_path(),
            WRAPPER_ENTRY_POINT.to_string(),
            "-prop".to_string(),
            self.properties.to_string(),
            "-timeout".to_string(),
            self.timeout_secs.to_string(),
            "-wrapper".to_string(),
            self.instance.clone(),
        ];
        args.extend(self.candidate_args.iter().cloned());
        args
    }

    /// SHA-256 of the full command line; equal fingerprints mean identical invocations
    pub fn fingerprint(&self, memory_limit: &MemoryLimit) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.executable.to_string_lossy().as_bytes());
        for arg in self.argv(memory_limit) {
            hasher.update([0u8]);
            hasher.update(arg.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Shell-ish rendering for logs
    pub fn display(&self, memory_limit: &MemoryLimit) -> String {
        let mut parts = vec![self.executable.to_string_lossy().into_owned()];
        for arg in self.argv(memory_limit) {
            if arg.contains(' ') {
                parts.push(format!("\"{}\"", arg));
            } else {
                parts.push(arg);
            }
        }
        parts.join(" ")
    }
}
