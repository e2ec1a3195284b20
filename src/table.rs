use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::EnrichError;
use crate::store::write_bytes_atomic;

/// One cleaned association record, as handed over by the upstream
/// record-cleaning step. `location` is in `"<chr>:<pos>"` format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitRecord {
    pub variant_and_allele: String,
    pub p_value: f64,
    #[serde(rename = "trait")]
    pub trait_name: String,
    pub gene: String,
    pub location: String,
}

/// An input record plus the two enrichment columns.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedRecord {
    pub variant_and_allele: String,
    pub p_value: f64,
    #[serde(rename = "trait")]
    pub trait_name: String,
    pub gene: String,
    pub location: String,
    pub af: f64,
    pub tissues: String,
}

impl EnrichedRecord {
    pub fn new(record: TraitRecord, af: f64, tissues: String) -> Self {
        Self {
            variant_and_allele: record.variant_and_allele,
            p_value: record.p_value,
            trait_name: record.trait_name,
            gene: record.gene,
            location: record.location,
            af,
            tissues,
        }
    }
}

pub fn read_trait_table(path: &Utf8Path) -> Result<Vec<TraitRecord>, EnrichError> {
    let mut reader = csv::Reader::from_path(path.as_std_path())
        .map_err(|err| EnrichError::Filesystem(format!("open {path}: {err}")))?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: TraitRecord = row.map_err(|err| EnrichError::Table(err.to_string()))?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_enriched_table(
    path: &Utf8Path,
    records: &[EnrichedRecord],
) -> Result<(), EnrichError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer
            .serialize(record)
            .map_err(|err| EnrichError::Table(err.to_string()))?;
    }
    let content = writer
        .into_inner()
        .map_err(|err| EnrichError::Table(err.to_string()))?;
    write_bytes_atomic(path, &content)
}

/// Derives the dataset (trait) name from a cleaned-table path:
/// `data/clean/rheumatoid_arthritis.csv` -> `rheumatoid arthritis`.
pub fn dataset_name(path: &Utf8Path) -> Result<String, EnrichError> {
    let stem = path
        .file_stem()
        .ok_or_else(|| EnrichError::InvalidInput(path.to_string()))?;
    Ok(stem.replace('_', " "))
}
