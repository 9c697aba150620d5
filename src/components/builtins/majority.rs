use crate::components::adapter::Learner;
use crate::core::types::CancelToken;
use crate::pipeline::dataset::Instances;

const CHECK_EVERY: usize = 1024;

/// Predicts the most frequent class, or the mean of a numeric class
#[derive(Debug, Default)]
pub struct MajorityLearner {
    prediction: Option<f64>,
}

impl MajorityLearner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Learner for MajorityLearner {
    fn name(&self) -> &str {
        "majority"
    }

    fn train(&mut self, data: &Instances, cancel: &CancelToken) -> anyhow::Result<()> {
        let values = (0..data.len())
            .map(|i| data.class_value(i))
            .filter(|v| !v.is_nan());

        if data.is_nominal() {
            let mut counts = vec![0usize; data.num_classes()];
            for (i, v) in values.enumerate() {
                if i % CHECK_EVERY == 0 {
                    cancel.check()?;
                }
                if let Some(slot) = counts.get_mut(v as usize) {
                    *slot += 1;
                }
            }
            // First label wins ties
            self.prediction = counts
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
                .filter(|&(_, &n)| n > 0)
                .map(|(label, _)| label as f64);
        } else {
            let (mut sum, mut n) = (0.0, 0usize);
            for (i, v) in values.enumerate() {
                if i % CHECK_EVERY == 0 {
                    cancel.check()?;
                }
                sum += v;
                n += 1;
            }
            self.prediction = (n > 0).then(|| sum / n as f64);
        }
        Ok(())
    }

    fn predict(&self, _row: &[f64]) -> Option<f64> {
        self.prediction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dataset::ClassKind;

    fn nominal(classes: &[f64]) -> Instances {
        Instances::new(
            "t",
            vec!["x".into(), "c".into()],
            1,
            ClassKind::Nominal(vec!["a".into(), "b".into(), "c".into()]),
            classes.iter().map(|&c| vec![0.0, c]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_majority_label() {
        let mut learner = MajorityLearner::new();
        learner
            .train(&nominal(&[1.0, 2.0, 1.0, 0.0]), &CancelToken::new())
            .unwrap();
        assert_eq!(learner.predict(&[5.0, 0.0]), Some(1.0));
    }

    #[test]
    fn test_tie_prefers_first_label() {
        let mut learner = MajorityLearner::new();
        learner
            .train(&nominal(&[2.0, 0.0]), &CancelToken::new())
            .unwrap();
        assert_eq!(learner.predict(&[]), Some(0.0));
    }

    #[test]
    fn test_numeric_mean_and_empty() {
        let data = Instances::new(
            "n",
            vec!["y".into()],
            0,
            ClassKind::Numeric,
            vec![vec![1.0], vec![f64::NAN], vec![3.0]],
        )
        .unwrap();
        let mut learner = MajorityLearner::new();
        learner.train(&data, &CancelToken::new()).unwrap();
        assert_eq!(learner.predict(&[0.0]), Some(2.0));

        let mut empty = MajorityLearner::new();
        empty.train(&nominal(&[]), &CancelToken::new()).unwrap();
        assert_eq!(empty.predict(&[0.0]), None);
    }

    #[test]
    fn test_cancelled_training_stops() {
        let token = CancelToken::new();
        token.cancel();
        let mut learner = MajorityLearner::new();
        assert!(learner.train(&nominal(&[1.0]), &token).is_err());
    }
}
