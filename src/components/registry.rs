use crate::components::adapter::{
    AttributeEvaluator, AttributeSearch, AttributeSelector, Learner, RankedSelection,
};
use crate::components::builtins::{centroid::NearestCentroid, majority::MajorityLearner, ranking};
use crate::config::types::{EvalError, Result};
use crate::pipeline::candidate::{option_value, parse_option, AttributeSelectionSpec};
use std::collections::BTreeMap;

pub type LearnerFactory = Box<dyn Fn(&[String]) -> Result<Box<dyn Learner>> + Send + Sync>;
pub type EvaluatorFactory = Box<dyn Fn(&[String]) -> Result<Box<dyn AttributeEvaluator>> + Send + Sync>;
pub type SearchFactory = Box<dyn Fn(&[String]) -> Result<Box<dyn AttributeSearch>> + Send + Sync>;

/// Name to factory maps for every pluggable component kind
#[derive(Default)]
pub struct ComponentRegistry {
    learners: BTreeMap<String, LearnerFactory>,
    evaluators: BTreeMap<String, EvaluatorFactory>,
    searches: BTreeMap<String, SearchFactory>,
}

impl ComponentRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in components plus the `testing.*` family
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register_learner("majority", |_| Ok(Box::new(MajorityLearner::new())));
        registry.register_learner("nearest-centroid", |args| {
            let radius = match option_value(args, "-R") {
                Some(_) => Some(parse_option(args, "-R", 0.0f64)?),
                None => None,
            };
            Ok(Box::new(NearestCentroid::new(radius)))
        });
        registry.register_evaluator("variance", |_| Ok(Box::new(ranking::VarianceEvaluator)));
        registry.register_search("top-k", |args| {
            Ok(Box::new(ranking::TopKSearch::new(parse_option(args, "-N", 1usize)?)))
        });
        crate::testing::components::register(&mut registry);
        registry
    }

    pub fn register_learner<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&[String]) -> Result<Box<dyn Learner>> + Send + Sync + 'static,
    {
        self.learners.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_evaluator<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&[String]) -> Result<Box<dyn AttributeEvaluator>> + Send + Sync + 'static,
    {
        self.evaluators.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_search<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&[String]) -> Result<Box<dyn AttributeSearch>> + Send + Sync + 'static,
    {
        self.searches.insert(name.to_string(), Box::new(factory));
    }

    pub fn learner(&self, name: &str, args: &[String]) -> Result<Box<dyn Learner>> {
        let factory = self
            .learners
            .get(name)
            .ok_or_else(|| EvalError::Candidate(format!("unknown learner '{}'", name)))?;
        factory(args)
    }

    pub fn selector(&self, spec: &AttributeSelectionSpec) -> Result<Box<dyn AttributeSelector>> {
        let evaluator = self.evaluators.get(&spec.evaluator).ok_or_else(|| {
            EvalError::Candidate(format!("unknown attribute evaluator '{}'", spec.evaluator))
        })?;
        let search = self.searches.get(&spec.search).ok_or_else(|| {
            EvalError::Candidate(format!("unknown attribute search '{}'", spec.search))
        })?;
        Ok(Box::new(RankedSelection::new(
            evaluator(&spec.evaluator_args)?,
            search(&spec.search_args)?,
        )))
    }

    pub fn learner_names(&self) -> impl Iterator<Item = &str> {
        self.learners.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("learners", &self.learners.keys().collect::<Vec<_>>())
            .field("evaluators", &self.evaluators.keys().collect::<Vec<_>>())
            .field("searches", &self.searches.keys().collect::<Vec<_>>())
            .finish()
    }
}
