use crate::core::types::CancelToken;
use crate::pipeline::dataset::Instances;

/// A trainable model.
///
/// Components are built on the controlling thread and moved onto a worker
/// for each phase, so they must be `Send`. Long loops should call
/// `cancel.check()` so an interrupt ends them before the hard limit.
pub trait Learner: Send {
    fn name(&self) -> &str;
    fn train(&mut self, data: &Instances, cancel: &CancelToken) -> anyhow::Result<()>;
    /// Predicted class value for a full row, or `None` to abstain
    fn predict(&self, row: &[f64]) -> Option<f64>;
}

/// Ranks attributes by merit
pub trait AttributeEvaluator: Send {
    fn name(&self) -> &str;
    /// `(attribute index, merit)` for every non-class attribute
    fn evaluate(&mut self, data: &Instances, cancel: &CancelToken) -> anyhow::Result<Vec<(usize, f64)>>;
}

/// Picks attributes from ranked merits
pub trait AttributeSearch: Send {
    fn name(&self) -> &str;
    fn search(&mut self, merits: &[(usize, f64)], cancel: &CancelToken) -> anyhow::Result<Vec<usize>>;
}

/// Chooses the attribute subset to train on
pub trait AttributeSelector: Send {
    fn describe(&self) -> String;
    /// Selected non-class attribute indices, ascending
    fn select(&mut self, data: &Instances, cancel: &CancelToken) -> anyhow::Result<Vec<usize>>;
}

/// An evaluator paired with a search method
pub struct RankedSelection {
    evaluator: Box<dyn AttributeEvaluator>,
    search: Box<dyn AttributeSearch>,
}

impl RankedSelection {
    pub fn new(evaluator: Box<dyn AttributeEvaluator>, search: Box<dyn AttributeSearch>) -> Self {
        Self { evaluator, search }
    }
}

impl AttributeSelector for RankedSelection {
    fn describe(&self) -> String {
        format!("{} + {}", self.evaluator.name(), self.search.name())
    }

    fn select(&mut self, data: &Instances, cancel: &CancelToken) -> anyhow::Result<Vec<usize>> {
        let merits = self.evaluator.evaluate(data, cancel)?;
        cancel.check()?;
        let mut selected = self.search.search(&merits, cancel)?;
        selected.sort_unstable();
        selected.dedup();
        Ok(selected)
    }
}
