use std::collections::HashSet;

use tracing::info;

use crate::dbsnp::{DbSnpTransport, FrequencyTable, RefSnpClient};
use crate::error::EnrichError;
use crate::store::AfStore;
use crate::table::TraitRecord;
use crate::variant::VariantAllele;

/// Reserved sentinel for "no frequency known"; outside `[0, 1]` so it can
/// never collide with a real value.
pub const UNKNOWN_AF: f64 = -1.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichOptions {
    /// Ignore an existing cache entry and re-query dbSNP.
    pub refresh: bool,
}

#[derive(Debug, Clone)]
pub struct AfSummary {
    pub from_cache: bool,
    /// Distinct refSNP ids sent to dbSNP (zero on a cache hit).
    pub looked_up: usize,
    pub failed_ids: usize,
}

/// Attaches an allele frequency to every record, index aligned with the
/// input. Each record independently resolves to a real frequency or
/// [`UNKNOWN_AF`]; rows are never dropped. On a cache hit no remote call is
/// made; on a miss the looked-up table is persisted before returning.
pub fn enrich_af<T: DbSnpTransport>(
    records: &[TraitRecord],
    dataset: &str,
    store: &AfStore,
    client: &RefSnpClient<T>,
    options: EnrichOptions,
) -> Result<(Vec<f64>, AfSummary), EnrichError> {
    if !options.refresh {
        if let Some(cached) = store.load(dataset)? {
            info!("AF data for '{dataset}' cached, loading from {}", store.dataset_path(dataset));
            let afs = records
                .iter()
                .map(|record| {
                    cached
                        .get(&record.variant_and_allele)
                        .copied()
                        .unwrap_or(UNKNOWN_AF)
                })
                .collect();
            return Ok((
                afs,
                AfSummary {
                    from_cache: true,
                    looked_up: 0,
                    failed_ids: 0,
                },
            ));
        }
    }

    info!("AF data for '{dataset}' not cached, loading from dbSNP");
    let ids = distinct_refsnp_ids(records);
    let outcome = client.fetch_frequencies(&ids)?;

    let afs: Vec<f64> = records
        .iter()
        .map(|record| lookup_af(&outcome.frequencies, &record.variant_and_allele))
        .collect();

    store.save(
        dataset,
        records
            .iter()
            .map(|record| record.variant_and_allele.as_str())
            .zip(afs.iter().copied()),
    )?;
    info!("wrote AF cache {}", store.dataset_path(dataset));

    Ok((
        afs,
        AfSummary {
            from_cache: false,
            looked_up: ids.len(),
            failed_ids: outcome.failed_ids.len(),
        },
    ))
}

/// Distinct refSNP ids among records whose composite key carries an
/// `rs`-style id, input order preserved. Keys without one are excluded from
/// the lookup set and resolve to the sentinel downstream.
fn distinct_refsnp_ids(records: &[TraitRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for record in records {
        if !record.variant_and_allele.contains("rs") {
            continue;
        }
        let id = VariantAllele::parse(&record.variant_and_allele).refsnp_id;
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }
    ids
}

fn lookup_af(frequencies: &FrequencyTable, variant_and_allele: &str) -> f64 {
    let parsed = VariantAllele::parse(variant_and_allele);
    let Some(alleles) = frequencies.get(&parsed.refsnp_id) else {
        return UNKNOWN_AF;
    };
    if !parsed.allele_is_known() {
        return UNKNOWN_AF;
    }
    alleles.get(&parsed.allele).copied().unwrap_or(UNKNOWN_AF)
}
