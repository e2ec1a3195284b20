use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::af::{self, EnrichOptions};
use crate::dbsnp::{DbSnpTransport, RefSnpClient};
use crate::error::EnrichError;
use crate::store::AfStore;
use crate::table::{self, EnrichedRecord};
use crate::tissue;

/// Outcome of enriching one cleaned per-trait table.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichReport {
    pub dataset: String,
    pub rows: usize,
    pub af_from_cache: bool,
    pub looked_up_ids: usize,
    pub failed_ids: usize,
    pub output_path: String,
}

/// Drives the two enrichment stages for cleaned GWAS tables: AF join against
/// dbSNP (cache-gated) followed by the tissue-association projection, then
/// persists the enriched table.
pub struct App<T: DbSnpTransport> {
    store: AfStore,
    client: RefSnpClient<T>,
}

impl<T: DbSnpTransport> App<T> {
    pub fn new(store: AfStore, client: RefSnpClient<T>) -> Self {
        Self { store, client }
    }

    pub fn client(&self) -> &RefSnpClient<T> {
        &self.client
    }

    pub fn enrich_file(
        &self,
        input: &Utf8Path,
        tissue_dir: Option<&Utf8Path>,
        output_dir: &Utf8Path,
        options: EnrichOptions,
    ) -> Result<EnrichReport, EnrichError> {
        let dataset = table::dataset_name(input)?;
        info!("processing '{dataset}' from {input}");

        let records = table::read_trait_table(input)?;

        let (afs, af_summary) =
            af::enrich_af(&records, &dataset, &self.store, &self.client, options)?;

        let tissues = match tissue_dir {
            Some(dir) => tissue::enrich_tissue(&records, dir)?,
            None => vec![String::new(); records.len()],
        };

        let enriched: Vec<EnrichedRecord> = records
            .into_iter()
            .zip(afs)
            .zip(tissues)
            .map(|((record, af), tissues)| EnrichedRecord::new(record, af, tissues))
            .collect();

        let output_path = output_dir.join(format!("{}.csv", dataset.replace(' ', "_")));
        table::write_enriched_table(&output_path, &enriched)?;
        info!("wrote {output_path}");

        Ok(EnrichReport {
            dataset,
            rows: enriched.len(),
            af_from_cache: af_summary.from_cache,
            looked_up_ids: af_summary.looked_up,
            failed_ids: af_summary.failed_ids,
            output_path: output_path.into_string(),
        })
    }

    /// Enriches every `.csv` table under `input_dir`, in sorted order,
    /// mirroring one run over a directory of cleaned per-trait files.
    pub fn enrich_dir(
        &self,
        input_dir: &Utf8Path,
        tissue_dir: Option<&Utf8Path>,
        output_dir: &Utf8Path,
        options: EnrichOptions,
    ) -> Result<Vec<EnrichReport>, EnrichError> {
        let mut inputs: Vec<Utf8PathBuf> = Vec::new();
        let entries = std::fs::read_dir(input_dir.as_std_path())
            .map_err(|err| EnrichError::Filesystem(format!("read {input_dir}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| EnrichError::Filesystem(err.to_string()))?;
            let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(|path| {
                EnrichError::Filesystem(format!("non-UTF8 path {}", path.display()))
            })?;
            if path.as_std_path().is_file() && path.extension() == Some("csv") {
                inputs.push(path);
            }
        }
        inputs.sort();

        let mut reports = Vec::new();
        for input in &inputs {
            reports.push(self.enrich_file(input, tissue_dir, output_dir, options)?);
        }
        Ok(reports)
    }
}
