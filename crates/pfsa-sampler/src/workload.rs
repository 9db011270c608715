//! Workload metadata: the binary catalog, the dynamic-instruction table and batch files.
//!
//! All three are JSON. The catalog is keyed `binary-<bench>-<size>-input-<input>`; the instruction
//! table and batch files are nested `{size: {bench: ...}}` maps. Instruction counts and input ids
//! may be written either as numbers or as strings.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SamplerError};

/// (benchmark, size, input id) triple identifying one workload run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadKey {
    pub benchmark: String,
    pub size: String,
    pub input_id: String,
}

impl WorkloadKey {
    pub fn new(
        benchmark: impl Into<String>,
        size: impl Into<String>,
        input_id: impl Into<String>,
    ) -> Self {
        Self {
            benchmark: benchmark.into(),
            size: size.into(),
            input_id: input_id.into(),
        }
    }

    pub fn catalog_key(&self) -> String {
        format!(
            "binary-{}-{}-input-{}",
            self.benchmark, self.size, self.input_id
        )
    }
}

/// `<bench>-<size>-<input>`; also the run's output directory name.
impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.benchmark, self.size, self.input_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub binary: PathBuf,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub stdin: Option<PathBuf>,
    #[serde(default)]
    pub stdout: Option<PathBuf>,
    #[serde(default)]
    pub stderr: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(u64),
    Text(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Int(v) => v.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(SamplerError::fs(path))?;
    serde_json::from_slice(&bytes).map_err(|source| SamplerError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Binary catalog. Relative paths resolve against the package root: binaries under
/// `<root>/<bench>/exe/`, stdin files under `<root>/<bench>/input/<size>/`.
#[derive(Debug, Clone)]
pub struct WorkloadCatalog {
    package_root: PathBuf,
    entries: BTreeMap<String, WorkloadSpec>,
}

impl WorkloadCatalog {
    /// Loads a catalog file; the package root defaults to the file's directory.
    pub fn load(path: &Path, package_root: Option<&Path>) -> Result<Self> {
        let entries = load_json(path)?;
        let package_root = match package_root {
            Some(root) => root.to_path_buf(),
            None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        Ok(Self::from_entries(package_root, entries))
    }

    pub fn from_entries(
        package_root: impl Into<PathBuf>,
        entries: BTreeMap<String, WorkloadSpec>,
    ) -> Self {
        Self {
            package_root: package_root.into(),
            entries,
        }
    }

    /// Looks up `key` and returns its spec with paths resolved against the package root.
    pub fn resolve(&self, key: &WorkloadKey) -> Result<WorkloadSpec> {
        let name = key.catalog_key();
        let spec = self
            .entries
            .get(&name)
            .ok_or(SamplerError::UnknownWorkload(name))?;
        let bench_dir = self.package_root.join(&key.benchmark);
        Ok(WorkloadSpec {
            binary: bench_dir.join("exe").join(&spec.binary),
            arguments: spec.arguments.clone(),
            stdin: spec
                .stdin
                .as_ref()
                .map(|p| bench_dir.join("input").join(&key.size).join(p)),
            stdout: spec.stdout.clone(),
            stderr: spec.stderr.clone(),
        })
    }
}

/// Dynamic instruction counts, `{size: {bench: {input: count}}}`.
#[derive(Debug, Clone, Default)]
pub struct InstructionTable {
    counts: BTreeMap<String, BTreeMap<String, BTreeMap<String, u64>>>,
}

impl InstructionTable {
    pub fn load(path: &Path) -> Result<Self> {
        let raw: BTreeMap<String, BTreeMap<String, BTreeMap<String, Scalar>>> = load_json(path)?;
        let mut table = Self::default();
        for (size, benches) in raw {
            for (bench, inputs) in benches {
                for (input, count) in inputs {
                    let count = match count {
                        Scalar::Int(v) => v,
                        Scalar::Text(s) => s.trim().parse().map_err(|_| SamplerError::Json {
                            path: path.to_path_buf(),
                            source: serde::de::Error::custom(format!(
                                "instruction count {s:?} for {bench}/{size}/{input} is not an integer"
                            )),
                        })?,
                    };
                    table.insert(&WorkloadKey::new(&bench, &size, input), count);
                }
            }
        }
        Ok(table)
    }

    pub fn insert(&mut self, key: &WorkloadKey, count: u64) {
        self.counts
            .entry(key.size.clone())
            .or_default()
            .entry(key.benchmark.clone())
            .or_default()
            .insert(key.input_id.clone(), count);
    }

    pub fn lookup(&self, key: &WorkloadKey) -> Result<u64> {
        self.counts
            .get(&key.size)
            .and_then(|b| b.get(&key.benchmark))
            .and_then(|i| i.get(&key.input_id))
            .copied()
            .ok_or_else(|| SamplerError::UnknownInstructionCount(key.to_string()))
    }
}

/// Workloads to run, `{size: {bench: [input, ...]}}`.
pub fn load_batch(path: &Path) -> Result<Vec<WorkloadKey>> {
    let raw: BTreeMap<String, BTreeMap<String, Vec<Scalar>>> = load_json(path)?;
    let mut keys = Vec::new();
    for (size, benches) in raw {
        for (bench, inputs) in benches {
            for input in inputs {
                keys.push(WorkloadKey::new(&bench, &size, input.into_string()));
            }
        }
    }
    Ok(keys)
}
