use std::collections::HashMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::EnrichError;

/// Durable per-dataset cache of looked-up allele frequencies. Its existence
/// for a dataset gates whether the dbSNP client is invoked at all, making
/// re-runs free of network calls.
#[derive(Debug, Clone)]
pub struct AfStore {
    root: Utf8PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct AfRow {
    variant_and_allele: String,
    af: f64,
}

impl AfStore {
    pub fn new() -> Result<Self, EnrichError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir().join(".cache").join("gwas-enricher").join("af"),
                )
                .ok()
            })
            .ok_or_else(|| {
                EnrichError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn dataset_path(&self, dataset: &str) -> Utf8PathBuf {
        self.root.join(format!("{}.csv", dataset.replace(' ', "_")))
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.dataset_path(dataset).as_std_path().exists()
    }

    /// Loads the cached composite-key -> frequency table for a dataset, or
    /// `None` when nothing has been cached yet.
    pub fn load(&self, dataset: &str) -> Result<Option<HashMap<String, f64>>, EnrichError> {
        let path = self.dataset_path(dataset);
        if !path.as_std_path().exists() {
            return Ok(None);
        }

        let mut reader = csv::Reader::from_path(path.as_std_path())
            .map_err(|err| EnrichError::Filesystem(err.to_string()))?;
        let mut table = HashMap::new();
        for row in reader.deserialize() {
            let row: AfRow = row.map_err(|err| EnrichError::Table(err.to_string()))?;
            table.insert(row.variant_and_allele, row.af);
        }
        Ok(Some(table))
    }

    /// Persists the frequency table for a dataset with atomic whole-file
    /// replace (temp file then rename), so a crashed run never leaves a
    /// truncated cache behind.
    pub fn save<'a, I>(&self, dataset: &str, entries: I) -> Result<(), EnrichError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for (variant_and_allele, af) in entries {
            writer
                .serialize(AfRow {
                    variant_and_allele: variant_and_allele.to_string(),
                    af,
                })
                .map_err(|err| EnrichError::Table(err.to_string()))?;
        }
        let content = writer
            .into_inner()
            .map_err(|err| EnrichError::Table(err.to_string()))?;

        write_bytes_atomic(&self.dataset_path(dataset), &content)
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), EnrichError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| EnrichError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| EnrichError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| EnrichError::Filesystem(err.to_string()))?;
    Ok(())
}
