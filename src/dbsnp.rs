use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::EnrichError;

/// dbSNP efetch caps the number of refSNP results per request.
pub const MAX_BATCH: usize = 15;

/// dbSNP API minimum time between requests.
pub const MIN_INTERVAL: Duration = Duration::from_secs(3);

/// The single study used for reporting population allele frequency; SNPs
/// without data from this study contribute no alleles.
pub const PREFERRED_AF_STUDY: &str = "dbGaP_PopFreq";

const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

pub type AlleleFrequencies = HashMap<String, f64>;

/// refSNP id (`rs`-prefixed) -> allele -> population allele frequency.
pub type FrequencyTable = HashMap<String, AlleleFrequencies>;

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub frequencies: FrequencyTable,
    /// Ids whose response still failed to parse after individual retry.
    pub failed_ids: Vec<String>,
}

/// Raw-transport seam: one efetch call for a set of ids, body returned as-is.
/// The batching, pacing, and repair logic lives above this trait so it can be
/// exercised without a live network dependency.
pub trait DbSnpTransport: Send + Sync {
    fn fetch_raw(&self, ids: &[String]) -> Result<String, EnrichError>;
}

#[derive(Clone)]
pub struct DbSnpHttpTransport {
    client: Client,
    base_url: String,
}

impl DbSnpHttpTransport {
    pub fn new() -> Result<Self, EnrichError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gwas-enrich/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EnrichError::DbSnpHttp(err.to_string()))?,
        );

        if let Ok(api_key) = std::env::var("NCBI_API_KEY") {
            if !api_key.trim().is_empty() {
                headers.insert(
                    "api-key",
                    HeaderValue::from_str(api_key.trim())
                        .map_err(|err| EnrichError::DbSnpHttp(err.to_string()))?,
                );
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| EnrichError::DbSnpHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: EFETCH_URL.to_string(),
        })
    }
}

impl DbSnpTransport for DbSnpHttpTransport {
    fn fetch_raw(&self, ids: &[String]) -> Result<String, EnrichError> {
        let id_list = ids.join(",");
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("db", "snp"),
                ("id", id_list.as_str()),
                ("rettype", "json"),
                ("retmode", "text"),
            ])
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    EnrichError::DbSnpTimeout(err.to_string())
                } else {
                    EnrichError::DbSnpHttp(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "dbSNP request failed".to_string());
            return Err(EnrichError::DbSnpStatus { status, message });
        }

        response.text().map_err(|err| {
            if err.is_timeout() {
                EnrichError::DbSnpTimeout(err.to_string())
            } else {
                EnrichError::DbSnpHttp(err.to_string())
            }
        })
    }
}

/// Batched, rate-limited frequency lookup against dbSNP.
pub struct RefSnpClient<T: DbSnpTransport> {
    transport: T,
    min_interval: Duration,
}

impl<T: DbSnpTransport> RefSnpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            min_interval: MIN_INTERVAL,
        }
    }

    /// Overrides the inter-request pause. Tests pass `Duration::ZERO`.
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetches the per-allele frequency map for every id, in batches of
    /// [`MAX_BATCH`] with [`MIN_INTERVAL`] pacing. A batch whose response
    /// cannot be repaired into valid JSON (or that times out) is queued and
    /// its ids re-requested one by one after the main loop; ids that fail
    /// again are dropped and reported in [`FetchOutcome::failed_ids`].
    /// Transport and HTTP-status errors are fatal and propagate.
    pub fn fetch_frequencies(&self, ids: &[String]) -> Result<FetchOutcome, EnrichError> {
        let mut outcome = FetchOutcome::default();
        let mut retry_ids: Vec<String> = Vec::new();

        debug!("retrieving {} refSNP ids from dbSNP", ids.len());
        let bar = ProgressBar::new(ids.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap(),
        );
        bar.set_message("dbSNP lookup");

        for batch in ids.chunks(MAX_BATCH) {
            thread::sleep(self.min_interval);
            match self.fetch_batch(batch) {
                Ok(table) => outcome.frequencies.extend(table),
                Err(err) if err.is_retryable() => {
                    debug!("batch of {} failed to parse, queueing retry: {err}", batch.len());
                    retry_ids.extend(batch.iter().cloned());
                }
                Err(err) => return Err(err),
            }
            bar.inc(batch.len() as u64);
        }
        bar.finish_and_clear();

        if !retry_ids.is_empty() {
            warn!("retrying {} refSNP ids individually", retry_ids.len());
        }

        for retry_id in retry_ids {
            thread::sleep(self.min_interval);
            match self.fetch_batch(std::slice::from_ref(&retry_id)) {
                Ok(table) => outcome.frequencies.extend(table),
                Err(err) if err.is_retryable() => outcome.failed_ids.push(retry_id),
                Err(err) => return Err(err),
            }
        }

        if !outcome.failed_ids.is_empty() {
            warn!(
                "unable to parse response for {} refSNP ids",
                outcome.failed_ids.len()
            );
        }

        Ok(outcome)
    }

    fn fetch_batch(&self, ids: &[String]) -> Result<FrequencyTable, EnrichError> {
        let raw = self.transport.fetch_raw(ids)?;
        let repaired = repair_response(&raw)?;
        let responses: Vec<RefSnpResponse> = serde_json::from_str(&repaired)
            .map_err(|err| EnrichError::ResponseShape(err.to_string()))?;
        Ok(build_frequency_table(responses))
    }
}

/// Repairs the efetch response framing. The service returns a juxtaposition of
/// individually valid JSON objects with no separating comma and no enclosing
/// array, so the raw text is wrapped in `[{`/`]` and a comma is inserted
/// before every subsequent object boundary.
pub fn repair_response(raw: &str) -> Result<String, EnrichError> {
    let Some(rest) = raw.strip_prefix('{') else {
        return Err(EnrichError::ResponseShape(format!(
            "response does not start with an object: {:.40}",
            raw
        )));
    };
    Ok(format!(
        "[{{{}]",
        rest.replace("{\"refsnp_id\":", ",{\"refsnp_id\":")
    ))
}

fn build_frequency_table(responses: Vec<RefSnpResponse>) -> FrequencyTable {
    let mut table = FrequencyTable::new();
    for snp in responses {
        // Merged/withdrawn SNPs come back without a snapshot; no data, not an error.
        let Some(snapshot) = snp.primary_snapshot_data else {
            continue;
        };

        let mut allele_to_af = AlleleFrequencies::new();
        for annotation in snapshot.allele_annotations {
            let Some(entry) = annotation
                .frequency
                .iter()
                .find(|entry| entry.study_name == PREFERRED_AF_STUDY)
            else {
                continue;
            };
            if entry.total_count == 0 {
                continue;
            }
            let af = entry.allele_count as f64 / entry.total_count as f64;
            // dbSNP sometimes reports every allele, non-observed ones at 0.0;
            // those are dropped so downstream sees "not present" instead.
            if af > 0.0 {
                allele_to_af.insert(entry.observation.inserted_sequence.clone(), af);
            }
        }
        table.insert(format!("rs{}", snp.refsnp_id), allele_to_af);
    }
    table
}

#[derive(Debug, Deserialize)]
struct RefSnpResponse {
    refsnp_id: String,
    #[serde(default)]
    primary_snapshot_data: Option<PrimarySnapshotData>,
}

#[derive(Debug, Deserialize)]
struct PrimarySnapshotData {
    #[serde(default)]
    allele_annotations: Vec<AlleleAnnotation>,
}

#[derive(Debug, Deserialize)]
struct AlleleAnnotation {
    #[serde(default)]
    frequency: Vec<FrequencyEntry>,
}

#[derive(Debug, Deserialize)]
struct FrequencyEntry {
    #[serde(default)]
    study_name: String,
    #[serde(default)]
    allele_count: u64,
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    observation: Observation,
}

#[derive(Debug, Deserialize, Default)]
struct Observation {
    #[serde(default)]
    inserted_sequence: String,
}
