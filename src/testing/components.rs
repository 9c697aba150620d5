/// Misbehaving components for exercising timeouts and memory handling.
///
/// Each `testing.*` learner misbehaves during training and then predicts the
/// majority class. The same behaviours are available as attribute evaluators
/// so the selection phase can be driven into every outcome too.
use crate::components::adapter::{AttributeEvaluator, Learner};
use crate::components::builtins::majority::MajorityLearner;
use crate::components::builtins::ranking::VarianceEvaluator;
use crate::components::registry::ComponentRegistry;
use crate::config::types::{EvalError, Result};
use crate::core::types::CancelToken;
use crate::pipeline::candidate::{option_value, parse_option};
use crate::pipeline::dataset::Instances;
use anyhow::Context;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const MIB: usize = 1024 * 1024;
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// What a testing component does before behaving normally
#[derive(Clone, Debug, PartialEq)]
pub enum Misbehavior {
    /// Sleep, checking for interruption every few milliseconds
    Sleep(Duration),
    /// Burn CPU without ever checking for interruption, up to a cap
    Spin(Duration),
    /// Allocate and touch memory in chunks until allocation fails. With a
    /// limit, fail with `MemoryExhausted` once it would be exceeded.
    Hog {
        chunk_bytes: usize,
        limit_bytes: Option<usize>,
    },
    Fail(String),
    Nothing,
}

impl Misbehavior {
    pub fn act(&self, cancel: &CancelToken) -> anyhow::Result<()> {
        match self {
            Misbehavior::Sleep(total) => {
                let start = Instant::now();
                while start.elapsed() < *total {
                    cancel.check()?;
                    std::thread::sleep(SLEEP_SLICE.min(total.saturating_sub(start.elapsed())));
                }
                Ok(())
            }
            Misbehavior::Spin(cap) => {
                let start = Instant::now();
                let mut acc = 0u64;
                while start.elapsed() < *cap {
                    for i in 0..10_000u64 {
                        acc = std::hint::black_box(acc.wrapping_mul(31).wrapping_add(i));
                    }
                }
                std::hint::black_box(acc);
                Ok(())
            }
            Misbehavior::Hog {
                chunk_bytes,
                limit_bytes,
            } => hog(*chunk_bytes, *limit_bytes, cancel),
            Misbehavior::Fail(message) => Err(EvalError::Component(message.clone()).into()),
            Misbehavior::Nothing => Ok(()),
        }
    }
}

fn hog(chunk: usize, limit: Option<usize>, cancel: &CancelToken) -> anyhow::Result<()> {
    let chunk = chunk.max(1);
    let mut held: Vec<Vec<u8>> = Vec::new();
    let mut total = 0usize;
    loop {
        if let Some(limit) = limit {
            if total.saturating_add(chunk) > limit {
                return Err(EvalError::MemoryExhausted(format!(
                    "heap limit of {} bytes reached",
                    limit
                ))
                .into());
            }
        }
        held.try_reserve(1)
            .context("growing allocation list")?;
        let mut block: Vec<u8> = Vec::new();
        block
            .try_reserve_exact(chunk)
            .with_context(|| format!("allocating {} bytes with {} already held", chunk, total))?;
        block.resize(chunk, 1);
        held.push(block);
        total += chunk;
        cancel.check()?;
    }
}

/// Delay applied to every prediction
fn predict_delay(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

/// A majority learner wrapped in a misbehaviour
pub struct TestingLearner {
    name: String,
    misbehavior: Misbehavior,
    inner: MajorityLearner,
    /// Fraction of predictions to abstain on
    abstain: f64,
    predict_delay: Duration,
    predicted: AtomicUsize,
}

impl TestingLearner {
    pub fn new(name: &str, misbehavior: Misbehavior) -> Self {
        Self {
            name: name.to_string(),
            misbehavior,
            inner: MajorityLearner::new(),
            abstain: 0.0,
            predict_delay: Duration::ZERO,
            predicted: AtomicUsize::new(0),
        }
    }

    pub fn abstaining(mut self, fraction: f64) -> Self {
        self.abstain = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_predict_delay(mut self, delay: Duration) -> Self {
        self.predict_delay = delay;
        self
    }

    /// Abstains on an evenly spread `abstain` share of calls
    fn should_abstain(&self, call: usize) -> bool {
        let before = (call as f64 * self.abstain).floor();
        let after = ((call + 1) as f64 * self.abstain).floor();
        after > before
    }
}

impl Learner for TestingLearner {
    fn name(&self) -> &str {
        &self.name
    }

    fn train(&mut self, data: &Instances, cancel: &CancelToken) -> anyhow::Result<()> {
        self.misbehavior.act(cancel)?;
        self.inner.train(data, cancel)
    }

    fn predict(&self, row: &[f64]) -> Option<f64> {
        predict_delay(self.predict_delay);
        let call = self.predicted.fetch_add(1, Ordering::SeqCst);
        if self.should_abstain(call) {
            return None;
        }
        self.inner.predict(row)
    }
}

/// Variance ranking preceded by a misbehaviour
pub struct TestingEvaluator {
    name: String,
    misbehavior: Misbehavior,
}

impl AttributeEvaluator for TestingEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&mut self, data: &Instances, cancel: &CancelToken) -> anyhow::Result<Vec<(usize, f64)>> {
        self.misbehavior.act(cancel)?;
        VarianceEvaluator.evaluate(data, cancel)
    }
}

fn seconds(args: &[String], flag: &str, default: f64) -> Result<Duration> {
    let secs: f64 = parse_option(args, flag, default)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| EvalError::Component(format!("invalid duration {} for {}", secs, flag)))
}

/// Build the misbehaviour a `testing.*` name stands for.
///
/// Options: `-S` seconds for sleep and spin, `-M` chunk MiB and `-L` limit
/// MiB for hog, `-E` message for fail.
pub fn misbehavior_for(kind: &str, args: &[String]) -> Result<Misbehavior> {
    match kind {
        "sleep" => Ok(Misbehavior::Sleep(seconds(args, "-S", 1.0)?)),
        "spin" => Ok(Misbehavior::Spin(seconds(args, "-S", 30.0)?)),
        "hog" => {
            let chunk_mb: usize = parse_option(args, "-M", 8)?;
            let limit_bytes = match option_value(args, "-L") {
                Some(_) => Some(parse_option::<usize>(args, "-L", 0)?.saturating_mul(MIB)),
                None => None,
            };
            Ok(Misbehavior::Hog {
                chunk_bytes: chunk_mb.saturating_mul(MIB),
                limit_bytes,
            })
        }
        "fail" => Ok(Misbehavior::Fail(
            option_value(args, "-E").unwrap_or("deliberate failure").to_string(),
        )),
        "partial" => Ok(Misbehavior::Nothing),
        other => Err(EvalError::Candidate(format!("unknown testing component '{}'", other))),
    }
}

const KINDS: [&str; 5] = ["sleep", "spin", "hog", "fail", "partial"];

/// Register every `testing.*` learner and evaluator
pub fn register(registry: &mut ComponentRegistry) {
    for kind in KINDS {
        let name = format!("testing.{}", kind);

        let learner_name = name.clone();
        registry.register_learner(&name, move |args| {
            let mut learner = TestingLearner::new(&learner_name, misbehavior_for(kind, args)?)
                .with_predict_delay(Duration::from_millis(parse_option(args, "-P", 0u64)?));
            if kind == "partial" {
                learner = learner.abstaining(parse_option(args, "-F", 0.2f64)?);
            }
            Ok(Box::new(learner))
        });

        let evaluator_name = name.clone();
        registry.register_evaluator(&name, move |args| {
            Ok(Box::new(TestingEvaluator {
                name: evaluator_name.clone(),
                misbehavior: misbehavior_for(kind, args)?,
            }))
        });
    }
}
