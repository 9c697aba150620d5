use crate::components::adapter::{AttributeEvaluator, AttributeSearch};
use crate::core::types::CancelToken;
use crate::pipeline::dataset::Instances;

/// Merit of an attribute is its sample variance, missing values skipped
#[derive(Debug, Default)]
pub struct VarianceEvaluator;

impl AttributeEvaluator for VarianceEvaluator {
    fn name(&self) -> &str {
        "variance"
    }

    fn evaluate(&mut self, data: &Instances, cancel: &CancelToken) -> anyhow::Result<Vec<(usize, f64)>> {
        let mut merits = Vec::new();
        for col in data.feature_indices() {
            cancel.check()?;
            let values: Vec<f64> = data
                .rows()
                .iter()
                .map(|r| r[col])
                .filter(|v| !v.is_nan())
                .collect();
            merits.push((col, variance(&values)));
        }
        Ok(merits)
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0)
}

/// Keeps the `k` attributes with the highest merit
#[derive(Debug)]
pub struct TopKSearch {
    k: usize,
}

impl TopKSearch {
    pub fn new(k: usize) -> Self {
        Self { k: k.max(1) }
    }
}

impl AttributeSearch for TopKSearch {
    fn name(&self) -> &str {
        "top-k"
    }

    fn search(&mut self, merits: &[(usize, f64)], _cancel: &CancelToken) -> anyhow::Result<Vec<usize>> {
        let mut ranked = merits.to_vec();
        // Highest merit first; lower index first on ties
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(ranked.into_iter().take(self.k).map(|(i, _)| i).collect())
    }
}
