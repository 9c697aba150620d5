use crate::config::types::{EvalError, Result, WORST_SCORE};
use std::fmt;

/// One scored test instance; `predicted` is `None` when the learner abstained
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    pub actual: f64,
    pub predicted: Option<f64>,
}

/// Loss reported back to the search driver; lower is better
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    /// 100 minus the percentage of correctly classified instances
    ErrorRate,
    MeanAbsoluteError,
    RootMeanSquaredError,
}

impl Metric {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "errorRate" => Ok(Metric::ErrorRate),
            "meanAbsoluteErrorMetric" | "mae" => Ok(Metric::MeanAbsoluteError),
            "rmse" | "rootMeanSquaredErrorMetric" => Ok(Metric::RootMeanSquaredError),
            other => Err(EvalError::Config(format!("unknown result metric '{}'", other))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Metric::ErrorRate => "errorRate",
            Metric::MeanAbsoluteError => "meanAbsoluteErrorMetric",
            Metric::RootMeanSquaredError => "rmse",
        }
    }

    /// Raw metric value. Abstentions count as misclassified for the error
    /// rate and are left out of the error averages. Nominal targets use 0/1
    /// loss for the averages.
    pub fn compute(self, predictions: &[Prediction], nominal: bool) -> Result<f64> {
        match self {
            Metric::ErrorRate => {
                if !nominal {
                    return Err(EvalError::Data(
                        "errorRate requires a nominal class attribute".to_string(),
                    ));
                }
                if predictions.is_empty() {
                    return Ok(f64::NAN);
                }
                let correct = predictions
                    .iter()
                    .filter(|p| p.predicted == Some(p.actual))
                    .count();
                Ok(100.0 - 100.0 * correct as f64 / predictions.len() as f64)
            }
            Metric::MeanAbsoluteError => Ok(mean(errors(predictions, nominal))),
            Metric::RootMeanSquaredError => {
                Ok(mean(errors(predictions, nominal).map(|e| e * e)).sqrt())
            }
        }
    }

    /// `compute` followed by `sanitize_score`
    pub fn score(self, predictions: &[Prediction], nominal: bool) -> Result<f64> {
        Ok(sanitize_score(self.compute(predictions, nominal)?))
    }
}

impl Default for Metric {
    fn default() -> Self {
        Metric::ErrorRate
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn errors(predictions: &[Prediction], nominal: bool) -> impl Iterator<Item = f64> + '_ {
    predictions.iter().filter_map(move |p| {
        p.predicted.map(|predicted| {
            if nominal {
                if predicted == p.actual {
                    0.0
                } else {
                    1.0
                }
            } else {
                (predicted - p.actual).abs()
            }
        })
    })
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Map a raw metric value into the range the search driver accepts.
///
/// NaN and infinities become `WORST_SCORE`; anything larger is capped just
/// below it.
pub fn sanitize_score(score: f64) -> f64 {
    if score.is_nan() || score.is_infinite() {
        WORST_SCORE
    } else if score > WORST_SCORE {
        WORST_SCORE - 1.0
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(actual: f64, predicted: Option<f64>) -> Prediction {
        Prediction { actual, predicted }
    }

    #[test]
    fn test_parse_names_and_aliases() {
        assert_eq!(Metric::parse("errorRate").unwrap(), Metric::ErrorRate);
        assert_eq!(Metric::parse("mae").unwrap(), Metric::MeanAbsoluteError);
        assert_eq!(
            Metric::parse("meanAbsoluteErrorMetric").unwrap(),
            Metric::MeanAbsoluteError
        );
        assert_eq!(Metric::parse("rmse").unwrap(), Metric::RootMeanSquaredError);
        let err = Metric::parse("accuracy").unwrap_err();
        assert!(err.to_string().contains("accuracy"));
    }

    #[test]
    fn test_error_rate_counts_abstentions_as_wrong() {
        let preds = [p(0.0, Some(0.0)), p(1.0, Some(0.0)), p(1.0, None), p(1.0, Some(1.0))];
        assert_eq!(Metric::ErrorRate.compute(&preds, true).unwrap(), 50.0);
    }

    #[test]
    fn test_error_rate_rejects_numeric_target() {
        assert!(Metric::ErrorRate.compute(&[p(1.0, Some(1.0))], false).is_err());
    }

    #[test]
    fn test_regression_errors_skip_abstentions() {
        let preds = [p(1.0, Some(2.0)), p(3.0, Some(0.0)), p(5.0, None)];
        assert_eq!(Metric::MeanAbsoluteError.compute(&preds, false).unwrap(), 2.0);
        let rmse = Metric::RootMeanSquaredError.compute(&preds, false).unwrap();
        assert!((rmse - 5.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_empty_predictions_score_worst() {
        assert_eq!(Metric::ErrorRate.score(&[], true).unwrap(), WORST_SCORE);
        assert_eq!(Metric::MeanAbsoluteError.score(&[p(1.0, None)], false).unwrap(), WORST_SCORE);
    }

    #[test]
    fn test_sanitize_score() {
        assert_eq!(sanitize_score(f64::NAN), WORST_SCORE);
        assert_eq!(sanitize_score(f64::INFINITY), WORST_SCORE);
        assert_eq!(sanitize_score(f64::NEG_INFINITY), WORST_SCORE);
        assert!(sanitize_score(1e200) <= WORST_SCORE);
        assert_eq!(sanitize_score(12.5), 12.5);
    }
}
