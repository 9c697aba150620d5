use crate::config::properties::Properties;
use crate::config::types::{EvalError, Result};
use log::warn;

/// Search value meaning "no attribute search"
pub const NO_SEARCH: &str = "NONE";

const TARGET_CLASS: &str = "-targetclass";
const ATTRIBUTE_EVAL: &str = "-attributeeval";
const ATTRIBUTE_SEARCH: &str = "-attributesearch";
const ATTRIBUTE_TIME: &str = "-attributetime";

const SEARCH_PREFIX: &str = "assearch_";
const EVAL_PREFIX: &str = "aseval_";

const REMOVED: &str = "REMOVED";
const REMOVE_PREV: &str = "REMOVE_PREV";
const HIDDEN: &str = "HIDDEN";
const LOG_MARKER: &str = "LOG_";
const INT_MARKER: &str = "INT_";
const QUOTE_START: &str = "QUOTE_START";
const QUOTE_END: &str = "QUOTE_END";
const DASHDASH: &str = "DASHDASH";

/// Attribute selection requested by a candidate
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeSelectionSpec {
    pub evaluator: String,
    pub evaluator_args: Vec<String>,
    pub search: String,
    pub search_args: Vec<String>,
    pub time_budget_secs: f64,
}

/// A decoded candidate configuration
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub learner: String,
    pub learner_args: Vec<String>,
    pub attribute_selection: Option<AttributeSelectionSpec>,
    /// The flat pairs the candidate was decoded from
    pub raw: Vec<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Destination {
    Learner,
    Search,
    Evaluator,
}

impl Candidate {
    /// Decode flat `name value` pairs emitted by the search driver.
    ///
    /// Pairs are processed in name order. Meta-arguments (`-targetclass`,
    /// `-attributeeval`, `-attributesearch`, `-attributetime`) name the
    /// components; the rest are routed by prefix into the learner, search or
    /// evaluator argument lists.
    pub fn decode(args: &[String]) -> Result<Self> {
        if args.len() % 2 != 0 {
            warn!(
                "candidate has an odd number of arguments; ignoring trailing '{}'",
                args[args.len() - 1]
            );
        }

        let mut pairs: Vec<(&str, &str)> = args
            .chunks_exact(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let mut meta = Properties::new();
        let mut learner_args = Vec::new();
        let mut search_args = Vec::new();
        let mut evaluator_args = Vec::new();
        let mut quoted: Option<String> = None;
        let mut quote_depth = 0usize;

        for (name, value) in pairs {
            if name == REMOVED || name.contains(HIDDEN) || value == REMOVE_PREV {
                continue;
            }
            if matches!(name, TARGET_CLASS | ATTRIBUTE_EVAL | ATTRIBUTE_SEARCH | ATTRIBUTE_TIME) {
                meta.set(name, value);
                continue;
            }

            let dest = destination(name);
            let value = transform_value(name, value)?;
            let flag = sanitize_name(name);

            let list = match dest {
                Destination::Learner => &mut learner_args,
                Destination::Search => &mut search_args,
                Destination::Evaluator => &mut evaluator_args,
            };

            let Some(mut text) = quoted.take() else {
                if name.ends_with(QUOTE_START) {
                    quoted = Some(String::new());
                    quote_depth += 1;
                } else if name.contains(QUOTE_START) {
                    list.push(flag);
                    quote_depth += 1;
                    let mut text = String::new();
                    push_word(&mut text, &value);
                    quoted = Some(text);
                } else if name.contains(DASHDASH) {
                    list.push("--".to_string());
                } else {
                    list.push(flag);
                    if value != REMOVED {
                        list.push(value);
                    }
                }
                continue;
            };

            // Inside a quoted option string
            if name.ends_with(QUOTE_END) {
                let mut closed = text.trim().to_string();
                if quote_depth > 1 {
                    closed.push_str("\" ");
                }
                quote_depth -= 1;
                if quote_depth == 0 {
                    list.push(closed);
                } else {
                    quoted = Some(closed);
                }
                continue;
            }
            if name.ends_with(QUOTE_START) {
                text.push('"');
                quote_depth += 1;
            } else {
                if name.contains(QUOTE_START) {
                    text.push_str(&flag);
                    text.push_str(" \"");
                    quote_depth += 1;
                } else {
                    text.push_str(&flag);
                    text.push(' ');
                }
                push_word(&mut text, &value);
            }
            quoted = Some(text);
        }

        if quoted.is_some() {
            return Err(EvalError::Candidate(format!(
                "unbalanced QUOTE markers in arguments (depth {})",
                quote_depth
            )));
        }

        let learner = meta
            .get(TARGET_CLASS)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EvalError::Candidate(format!("missing {}", TARGET_CLASS)))?
            .to_string();

        let search = meta.get(ATTRIBUTE_SEARCH).filter(|s| !s.is_empty());
        let evaluator = meta.get(ATTRIBUTE_EVAL).filter(|s| !s.is_empty());
        let wants_selection = search.map_or(false, |s| s != NO_SEARCH) || evaluator.is_some();

        let attribute_selection = if wants_selection {
            let evaluator = evaluator.ok_or_else(|| {
                EvalError::Candidate(format!("{} set without {}", ATTRIBUTE_SEARCH, ATTRIBUTE_EVAL))
            })?;
            let search = search
                .filter(|s| *s != NO_SEARCH)
                .ok_or_else(|| {
                    EvalError::Candidate(format!("{} set without {}", ATTRIBUTE_EVAL, ATTRIBUTE_SEARCH))
                })?;
            let time = meta.get(ATTRIBUTE_TIME).ok_or_else(|| {
                EvalError::Candidate(format!("attribute selection requires {}", ATTRIBUTE_TIME))
            })?;
            let time_budget_secs: f64 = time.parse().map_err(|_| {
                EvalError::Candidate(format!("invalid {} '{}'", ATTRIBUTE_TIME, time))
            })?;
            Some(AttributeSelectionSpec {
                evaluator: evaluator.to_string(),
                evaluator_args,
                search: search.to_string(),
                search_args,
                time_budget_secs,
            })
        } else {
            None
        };

        Ok(Self {
            learner,
            learner_args,
            attribute_selection,
            raw: args.to_vec(),
        })
    }
}

fn destination(name: &str) -> Destination {
    // Names may or may not carry their leading dash
    let has_prefix = |prefix: &str| name.starts_with(prefix) || name.get(1..).map_or(false, |n| n.starts_with(prefix));
    if has_prefix(SEARCH_PREFIX) {
        Destination::Search
    } else if has_prefix(EVAL_PREFIX) {
        Destination::Evaluator
    } else {
        Destination::Learner
    }
}

fn transform_value(name: &str, value: &str) -> Result<String> {
    if name.contains(LOG_MARKER) {
        let exponent: f64 = value
            .parse()
            .map_err(|_| EvalError::Candidate(format!("non-numeric value '{}' for {}", value, name)))?;
        Ok(format!("{:.6}", 10f64.powf(exponent)))
    } else if name.contains(INT_MARKER) {
        let number: f64 = value
            .parse()
            .map_err(|_| EvalError::Candidate(format!("non-numeric value '{}' for {}", value, name)))?;
        Ok(format!("{}", number.round() as i64))
    } else {
        Ok(value.to_string())
    }
}

/// Append `value` and a separating space unless it is the REMOVED marker
fn push_word(text: &mut String, value: &str) {
    if value != REMOVED {
        text.push_str(value);
        text.push(' ');
    }
}

/// `-` plus everything after the last `_`; names without `_` pass through
fn sanitize_name(name: &str) -> String {
    match name.rfind('_') {
        Some(idx) => format!("-{}", &name[idx + 1..]),
        None => name.to_string(),
    }
}

/// Value following `flag` in an option list
pub fn option_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// Parse the value after `flag`, or return `default` when absent
pub fn parse_option<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> Result<T> {
    match option_value(args, flag) {
        Some(raw) => raw
            .parse()
            .map_err(|_| EvalError::Component(format!("invalid value '{}' for {}", raw, flag))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_decode_learner_only() {
        let c = Candidate::decode(&strings(&[
            "-targetclass",
            "nearest-centroid",
            "-1_R",
            "2.5",
        ]))
        .unwrap();
        assert_eq!(c.learner, "nearest-centroid");
        assert_eq!(c.learner_args, strings(&["-R", "2.5"]));
        assert!(c.attribute_selection.is_none());
    }

    #[test]
    fn test_quoted_option_string() {
        let c = Candidate::decode(&strings(&[
            "-targetclass",
            "majority",
            "-1_W",
            "x",
            "-2_QUOTE_START_P",
            "REMOVED",
            "-3_K",
            "5",
            "-4_QUOTE_END",
            "REMOVED",
            "-5_DASHDASH",
            "REMOVED",
        ]))
        .unwrap();
        assert_eq!(c.learner_args, strings(&["-W", "x", "-P", "-K 5", "--"]));
    }

    #[test]
    fn test_nested_quotes() {
        let c = Candidate::decode(&strings(&[
            "-targetclass",
            "majority",
            "-1_QUOTE_START",
            "REMOVED",
            "-2_A",
            "1",
            "-3_QUOTE_START_B",
            "REMOVED",
            "-4_C",
            "2",
            "-5_QUOTE_END",
            "REMOVED",
            "-6_QUOTE_END",
            "REMOVED",
        ]))
        .unwrap();
        assert_eq!(c.learner_args, strings(&["-A 1 -B \"-C 2\""]));
    }

    #[test]
    fn test_unbalanced_quotes_rejected() {
        let err = Candidate::decode(&strings(&[
            "-targetclass",
            "majority",
            "-1_QUOTE_START_P",
            "REMOVED",
            "-2_K",
            "5",
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("unbalanced QUOTE markers"));
    }

    #[test]
    fn test_missing_target_class() {
        let err = Candidate::decode(&strings(&["-1_R", "2"])).unwrap_err();
        assert!(matches!(err, EvalError::Candidate(_)));
        assert!(err.to_string().contains("-targetclass"));
    }

    #[test]
    fn test_log_and_int_transforms() {
        let c = Candidate::decode(&strings(&[
            "-targetclass",
            "majority",
            "-LOG_C",
            "2",
            "-INT_K",
            "3.6",
        ]))
        .unwrap();
        // Sorted by name: -INT_K before -LOG_C
        assert_eq!(c.learner_args, strings(&["-K", "4", "-C", "100.000000"]));
    }

    #[test]
    fn test_removed_hidden_and_remove_prev_skipped() {
        let c = Candidate::decode(&strings(&[
            "-targetclass",
            "majority",
            "REMOVED",
            "x",
            "-HIDDEN_a",
            "1",
            "-b",
            "REMOVE_PREV",
            "-flag",
            "REMOVED",
        ]))
        .unwrap();
        // `-flag REMOVED` keeps the flag without a value
        assert_eq!(c.learner_args, strings(&["-flag"]));
    }

    #[test]
    fn test_attribute_selection_routing() {
        let c = Candidate::decode(&strings(&[
            "-targetclass",
            "majority",
            "-attributesearch",
            "top-k",
            "-attributeeval",
            "variance",
            "-attributetime",
            "2.5",
            "-assearch_INT_N",
            "3",
            "-aseval_x",
            "y",
        ]))
        .unwrap();
        let sel = c.attribute_selection.unwrap();
        assert_eq!(sel.search, "top-k");
        assert_eq!(sel.search_args, strings(&["-N", "3"]));
        assert_eq!(sel.evaluator, "variance");
        assert_eq!(sel.evaluator_args, strings(&["-x", "y"]));
        assert_eq!(sel.time_budget_secs, 2.5);
        assert!(c.learner_args.is_empty());
    }

    #[test]
    fn test_search_none_disables_selection() {
        let c = Candidate::decode(&strings(&[
            "-targetclass",
            "majority",
            "-attributesearch",
            "NONE",
        ]))
        .unwrap();
        assert!(c.attribute_selection.is_none());
    }

    #[test]
    fn test_selection_requires_time() {
        let err = Candidate::decode(&strings(&[
            "-targetclass",
            "majority",
            "-attributesearch",
            "top-k",
            "-attributeeval",
            "variance",
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("-attributetime"));
    }

    #[test]
    fn test_odd_trailing_argument_ignored() {
        let c = Candidate::decode(&strings(&["-targetclass", "majority", "-dangling"])).unwrap();
        assert_eq!(c.learner, "majority");
        assert!(c.learner_args.is_empty());
    }

    #[test]
    fn test_parse_option() {
        let args = strings(&["-N", "5", "-R", "abc"]);
        assert_eq!(parse_option(&args, "-N", 1usize).unwrap(), 5);
        assert_eq!(parse_option(&args, "-K", 7usize).unwrap(), 7);
        assert!(parse_option(&args, "-R", 1.0f64).is_err());
    }
}
