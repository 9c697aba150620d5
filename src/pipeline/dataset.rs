//! Datasets addressed by a property string.
//!
//! `type=trainTestCsv:train=<path>:test=<path>[:classIndex=last|N]` loads two
//! CSV files with a header row. `type=dummy[:size=N][:testSize=N][:seed=S][:target=nominal|numeric]`
//! generates a deterministic synthetic split.

use crate::config::properties::Properties;
use crate::config::types::{EvalError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};

/// Placeholder replaced by the experiment seed in instance strings
pub const SEED_PLACEHOLDER: &str = "{SEED}";

const MISSING: &str = "?";
const DEFAULT_DUMMY_SIZE: usize = 100;

/// Class attribute type
#[derive(Clone, Debug, PartialEq)]
pub enum ClassKind {
    /// Class values are indices into these labels
    Nominal(Vec<String>),
    Numeric,
}

/// A table of numeric rows with one designated class column
#[derive(Clone, Debug, PartialEq)]
pub struct Instances {
    name: String,
    attributes: Vec<String>,
    class_index: usize,
    class_kind: ClassKind,
    rows: Vec<Vec<f64>>,
}

impl Instances {
    pub fn new(
        name: impl Into<String>,
        attributes: Vec<String>,
        class_index: usize,
        class_kind: ClassKind,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let name = name.into();
        if class_index >= attributes.len() {
            return Err(EvalError::Data(format!(
                "{}: class index {} out of range for {} attributes",
                name,
                class_index,
                attributes.len()
            )));
        }
        if let Some(i) = rows.iter().position(|r| r.len() != attributes.len()) {
            return Err(EvalError::Data(format!(
                "{}: row {} has {} values, expected {}",
                name,
                i,
                rows[i].len(),
                attributes.len()
            )));
        }
        Ok(Self {
            name,
            attributes,
            class_index,
            class_kind,
            rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn num_attributes(&self) -> usize {
        self.attributes.len()
    }

    pub fn class_index(&self) -> usize {
        self.class_index
    }

    pub fn class_kind(&self) -> &ClassKind {
        &self.class_kind
    }

    pub fn is_nominal(&self) -> bool {
        matches!(self.class_kind, ClassKind::Nominal(_))
    }

    /// Number of class labels; zero for a numeric class
    pub fn num_classes(&self) -> usize {
        match &self.class_kind {
            ClassKind::Nominal(labels) => labels.len(),
            ClassKind::Numeric => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn class_value(&self, row: usize) -> f64 {
        self.rows[row][self.class_index]
    }

    /// Indices of every non-class attribute
    pub fn feature_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.attributes.len()).filter(move |&i| i != self.class_index)
    }

    /// Human-readable class value
    pub fn class_label(&self, value: f64) -> String {
        match &self.class_kind {
            ClassKind::Nominal(labels) if value >= 0.0 => labels
                .get(value as usize)
                .cloned()
                .unwrap_or_else(|| value.to_string()),
            _ => value.to_string(),
        }
    }

    /// Keep only the attributes in `keep` plus the class, in original order
    pub fn project(&self, keep: &[usize]) -> Result<Instances> {
        if let Some(bad) = keep.iter().find(|&&i| i >= self.attributes.len()) {
            return Err(EvalError::Data(format!(
                "{}: selected attribute {} does not exist",
                self.name, bad
            )));
        }
        let columns: Vec<usize> = (0..self.attributes.len())
            .filter(|i| *i == self.class_index || keep.contains(i))
            .collect();
        let class_index = columns
            .iter()
            .position(|&c| c == self.class_index)
            .unwrap_or(0);

        Instances::new(
            self.name.clone(),
            columns.iter().map(|&c| self.attributes[c].clone()).collect(),
            class_index,
            self.class_kind.clone(),
            self.rows
                .iter()
                .map(|row| columns.iter().map(|&c| row[c]).collect())
                .collect(),
        )
    }
}

/// Which CSV column holds the class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassIndex {
    Last,
    /// Zero-based column
    At(usize),
}

impl ClassIndex {
    fn parse(text: &str) -> Result<Self> {
        match text {
            "last" => Ok(ClassIndex::Last),
            "first" => Ok(ClassIndex::At(0)),
            n => n
                .parse()
                .map(ClassIndex::At)
                .map_err(|_| EvalError::Data(format!("invalid classIndex '{}'", n))),
        }
    }

    fn resolve(self, columns: usize) -> usize {
        match self {
            ClassIndex::Last => columns.saturating_sub(1),
            ClassIndex::At(i) => i,
        }
    }
}

/// A train/test split source
#[derive(Clone, Debug, PartialEq)]
pub enum DatasetSpec {
    TrainTestCsv {
        train: PathBuf,
        test: PathBuf,
        class_index: ClassIndex,
    },
    Dummy {
        size: usize,
        test_size: usize,
        seed: u64,
        numeric: bool,
    },
}

impl DatasetSpec {
    pub fn parse(text: &str) -> Result<Self> {
        let props = Properties::parse(text)?;
        match props.get("type") {
            Some("trainTestCsv") => {
                let required = |key: &str| {
                    props
                        .get(key)
                        .map(PathBuf::from)
                        .ok_or_else(|| EvalError::Data(format!("trainTestCsv dataset requires '{}'", key)))
                };
                Ok(DatasetSpec::TrainTestCsv {
                    train: required("train")?,
                    test: required("test")?,
                    class_index: ClassIndex::parse(props.get_or("classIndex", "last"))?,
                })
            }
            Some("dummy") => {
                let number = |key: &str, default: usize| -> Result<usize> {
                    match props.get(key) {
                        Some(v) => v
                            .parse()
                            .map_err(|_| EvalError::Data(format!("invalid {} '{}'", key, v))),
                        None => Ok(default),
                    }
                };
                let size = number("size", DEFAULT_DUMMY_SIZE)?;
                let numeric = match props.get_or("target", "nominal") {
                    "nominal" => false,
                    "numeric" => true,
                    other => return Err(EvalError::Data(format!("invalid target '{}'", other))),
                };
                Ok(DatasetSpec::Dummy {
                    size,
                    test_size: number("testSize", size)?,
                    seed: seed_value(props.get_or("seed", "0")),
                    numeric,
                })
            }
            Some(other) => Err(EvalError::Data(format!("unknown dataset type '{}'", other))),
            None => Err(EvalError::Data(format!("dataset string '{}' has no type", text))),
        }
    }

    /// Load the training and testing instances. An empty test split is an
    /// error since nothing could ever be scored.
    pub fn load(&self, search_path: &[PathBuf]) -> Result<(Instances, Instances)> {
        let (train, test) = self.load_split(search_path)?;
        if test.is_empty() {
            return Err(EvalError::Data("dataset has an empty test split".to_string()));
        }
        Ok((train, test))
    }

    fn load_split(&self, search_path: &[PathBuf]) -> Result<(Instances, Instances)> {
        match self {
            DatasetSpec::TrainTestCsv {
                train,
                test,
                class_index,
            } => {
                let train = resolve_path(train, search_path)?;
                let test = resolve_path(test, search_path)?;
                load_csv_pair(&train, &test, *class_index)
            }
            DatasetSpec::Dummy {
                size,
                test_size,
                seed,
                numeric,
            } => Ok(generate_dummy(*size, *test_size, *seed, *numeric)),
        }
    }
}

/// Replace every `{SEED}` in an instance string
pub fn substitute_seed(instance: &str, seed: &str) -> String {
    instance.replace(SEED_PLACEHOLDER, seed)
}

/// Seed-substitute, parse and load an instance string
pub fn load_instance(instance: &str, seed: &str, search_path: &[PathBuf]) -> Result<(Instances, Instances)> {
    DatasetSpec::parse(&substitute_seed(instance, seed))?.load(search_path)
}

/// Numeric seeds are used as-is; anything else is hashed
fn seed_value(seed: &str) -> u64 {
    seed.parse().unwrap_or_else(|_| {
        seed.bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100_0000_01b3))
    })
}

/// Absolute paths are used directly; relative ones are tried against each
/// search directory in order.
pub fn resolve_path(path: &Path, search_path: &[PathBuf]) -> Result<PathBuf> {
    if path.is_absolute() {
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(EvalError::Data(format!("{} does not exist", path.display())))
        };
    }
    search_path
        .iter()
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.exists())
        .ok_or_else(|| {
            EvalError::Data(format!(
                "{} not found in search path [{}]",
                path.display(),
                search_path
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(":")
            ))
        })
}

struct RawTable {
    header: Vec<String>,
    records: Vec<Vec<String>>,
}

fn read_csv(path: &Path) -> Result<RawTable> {
    let data_err = |e: csv::Error| EvalError::Data(format!("{}: {}", path.display(), e));
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(data_err)?;

    let header = reader
        .headers()
        .map_err(data_err)?
        .iter()
        .map(str::to_string)
        .collect();
    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record.map_err(data_err)?.iter().map(str::to_string).collect());
    }
    Ok(RawTable { header, records })
}

fn is_missing(cell: &str) -> bool {
    cell.is_empty() || cell == MISSING
}

fn load_csv_pair(train_path: &Path, test_path: &Path, class_index: ClassIndex) -> Result<(Instances, Instances)> {
    let train = read_csv(train_path)?;
    let test = read_csv(test_path)?;
    if train.header != test.header {
        return Err(EvalError::Data(format!(
            "{} and {} have different headers",
            train_path.display(),
            test_path.display()
        )));
    }

    let class_col = class_index.resolve(train.header.len());
    if class_col >= train.header.len() {
        return Err(EvalError::Data(format!(
            "class index {} out of range for {} columns",
            class_col,
            train.header.len()
        )));
    }

    let class_cells = || {
        train
            .records
            .iter()
            .chain(test.records.iter())
            .map(move |r| r[class_col].as_str())
            .filter(|c| !is_missing(c))
    };
    let class_kind = if class_cells().all(|c| c.parse::<f64>().is_ok()) {
        ClassKind::Numeric
    } else {
        let mut labels: Vec<String> = Vec::new();
        for cell in class_cells() {
            if !labels.iter().any(|l| l == cell) {
                labels.push(cell.to_string());
            }
        }
        ClassKind::Nominal(labels)
    };

    let convert = |path: &Path, table: &RawTable| -> Result<Instances> {
        let mut rows = Vec::with_capacity(table.records.len());
        for (line, record) in table.records.iter().enumerate() {
            let mut row = Vec::with_capacity(record.len());
            for (col, cell) in record.iter().enumerate() {
                let value = if is_missing(cell) {
                    f64::NAN
                } else if col == class_col {
                    match &class_kind {
                        ClassKind::Nominal(labels) => {
                            labels.iter().position(|l| l == cell).unwrap_or(0) as f64
                        }
                        ClassKind::Numeric => cell.parse().unwrap_or(f64::NAN),
                    }
                } else {
                    cell.parse().map_err(|_| {
                        EvalError::Data(format!(
                            "{}: record {} column '{}' is not numeric: '{}'",
                            path.display(),
                            line + 1,
                            table.header[col],
                            cell
                        ))
                    })?
                };
                row.push(value);
            }
            rows.push(row);
        }
        Instances::new(
            path.display().to_string(),
            table.header.clone(),
            class_col,
            class_kind.clone(),
            rows,
        )
    };

    Ok((convert(train_path, &train)?, convert(test_path, &test)?))
}

/// Two informative attributes and two noise attributes. The nominal target
/// has classes `a` and `b`; the numeric target is linear in the informative
/// attributes.
fn generate_dummy(size: usize, test_size: usize, seed: u64, numeric: bool) -> (Instances, Instances) {
    let mut rng = StdRng::seed_from_u64(seed);
    let attributes: Vec<String> = ["signal", "shifted", "noise1", "noise2", "class"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let class_kind = if numeric {
        ClassKind::Numeric
    } else {
        ClassKind::Nominal(vec!["a".to_string(), "b".to_string()])
    };

    let mut draw = |n: usize| -> Vec<Vec<f64>> {
        (0..n)
            .map(|_| {
                let label = if rng.gen_bool(0.5) { 1.0 } else { 0.0 };
                let signal = label * 3.0 + rng.gen_range(-1.0..1.0);
                let shifted = -label * 2.0 + rng.gen_range(-1.0..1.0);
                let noise1 = rng.gen_range(0.0..1.0);
                let noise2 = rng.gen_range(-0.5..0.5);
                let class = if numeric {
                    2.0 * signal - shifted + rng.gen_range(-0.1..0.1)
                } else {
                    label
                };
                vec![signal, shifted, noise1, noise2, class]
            })
            .collect()
    };
    let train_rows = draw(size);
    let test_rows = draw(test_size);

    // Widths match and the class index is in range by construction
    let train = Instances {
        name: "dummy-train".to_string(),
        attributes: attributes.clone(),
        class_index: 4,
        class_kind: class_kind.clone(),
        rows: train_rows,
    };
    let test = Instances {
        name: "dummy-test".to_string(),
        attributes,
        class_index: 4,
        class_kind,
        rows: test_rows,
    };
    (train, test)
}
