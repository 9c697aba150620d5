use crate::components::adapter::Learner;
use crate::config::types::EvalError;
use crate::core::types::CancelToken;
use crate::pipeline::dataset::Instances;

/// Nearest class centroid by Euclidean distance over the non-class
/// attributes. With a radius, rows farther than it from every centroid get
/// no prediction.
#[derive(Debug)]
pub struct NearestCentroid {
    radius: Option<f64>,
    class_index: usize,
    centroids: Vec<Option<Vec<f64>>>,
}

impl NearestCentroid {
    pub fn new(radius: Option<f64>) -> Self {
        Self {
            radius,
            class_index: 0,
            centroids: Vec::new(),
        }
    }

    fn distance(&self, centroid: &[f64], row: &[f64]) -> f64 {
        centroid
            .iter()
            .zip(row)
            .enumerate()
            .filter(|(i, (c, v))| *i != self.class_index && !c.is_nan() && !v.is_nan())
            .map(|(_, (c, v))| (c - v) * (c - v))
            .sum::<f64>()
            .sqrt()
    }
}

impl Learner for NearestCentroid {
    fn name(&self) -> &str {
        "nearest-centroid"
    }

    fn train(&mut self, data: &Instances, cancel: &CancelToken) -> anyhow::Result<()> {
        if !data.is_nominal() {
            return Err(EvalError::Component("nearest-centroid needs a nominal class".to_string()).into());
        }
        let width = data.num_attributes();
        let mut sums = vec![vec![0.0; width]; data.num_classes()];
        let mut counts = vec![vec![0usize; width]; data.num_classes()];

        for (i, row) in data.rows().iter().enumerate() {
            if i % 256 == 0 {
                cancel.check()?;
            }
            let class = row[data.class_index()];
            let label = class as usize;
            if class.is_nan() || label >= sums.len() {
                continue;
            }
            for (col, value) in row.iter().enumerate() {
                if !value.is_nan() {
                    sums[label][col] += value;
                    counts[label][col] += 1;
                }
            }
        }

        self.class_index = data.class_index();
        self.centroids = sums
            .into_iter()
            .zip(counts)
            .map(|(sum, count)| {
                if count.iter().all(|&n| n == 0) {
                    return None;
                }
                Some(
                    sum.iter()
                        .zip(&count)
                        .map(|(s, &n)| if n == 0 { f64::NAN } else { s / n as f64 })
                        .collect(),
                )
            })
            .collect();
        Ok(())
    }

    fn predict(&self, row: &[f64]) -> Option<f64> {
        let (label, distance) = self
            .centroids
            .iter()
            .enumerate()
            .filter_map(|(label, c)| c.as_ref().map(|c| (label, self.distance(c, row))))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        match self.radius {
            Some(radius) if distance > radius => None,
            _ => Some(label as f64),
        }
    }
}
