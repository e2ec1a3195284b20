use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io::{BufRead, BufReader, Read};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::error::EnrichError;
use crate::table::TraitRecord;

/// Joins multiple tissue names into one output cell.
pub const TISSUE_DELIMITER: &str = "&";

/// Dataset coordinate -> tissue names with a significant eQTL at that locus.
/// `BTreeMap`/`BTreeSet` keep the projection order stable across runs.
pub type TissueIndex = BTreeMap<String, BTreeSet<String>>;

/// Converts a foreign-format locus like `chr1_64764_C_T_b38` into the
/// dataset's `"1:64764"` format. Returns `None` for lines that do not follow
/// the `chr<N>_<pos>_...` shape.
pub fn convert_coordinate(foreign: &str) -> Option<String> {
    let mut parts = foreign.split('_');
    let chromosome = parts.next()?.strip_prefix("chr")?;
    let position = parts.next()?;
    if chromosome.is_empty() || position.is_empty() {
        return None;
    }
    Some(format!("{chromosome}:{position}"))
}

/// Attaches the joined tissue-association string to every record, index
/// aligned with the input; records whose coordinate matches no tissue file
/// get an empty string.
pub fn enrich_tissue(
    records: &[TraitRecord],
    tissue_dir: &Utf8Path,
) -> Result<Vec<String>, EnrichError> {
    let coordinates: HashSet<String> = records
        .iter()
        .map(|record| record.location.clone())
        .collect();
    let index = build_tissue_index(&coordinates, tissue_dir)?;

    Ok(records
        .iter()
        .map(|record| {
            index
                .get(&record.location)
                .map(|tissues| {
                    tissues
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(TISSUE_DELIMITER)
                })
                .unwrap_or_default()
        })
        .collect())
}

/// Scans every per-tissue significant-variant file under `tissue_dir` and
/// records, for each dataset coordinate, which tissues list it. One file per
/// tissue, one foreign-format coordinate per line, plain text or gzip.
pub fn build_tissue_index(
    coordinates: &HashSet<String>,
    tissue_dir: &Utf8Path,
) -> Result<TissueIndex, EnrichError> {
    let mut index = TissueIndex::new();

    let mut paths: Vec<Utf8PathBuf> = Vec::new();
    let entries = fs::read_dir(tissue_dir.as_std_path())
        .map_err(|err| EnrichError::Filesystem(format!("read {tissue_dir}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| EnrichError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|path| EnrichError::Filesystem(format!("non-UTF8 path {}", path.display())))?;
        if path.as_std_path().is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let tissue = tissue_name(&path);
        debug!("scanning tissue file {path}");
        let mut matched = 0usize;
        for line in read_lines(&path)? {
            let Some(coordinate) = convert_coordinate(line.trim()) else {
                continue;
            };
            if coordinates.contains(&coordinate) {
                index
                    .entry(coordinate)
                    .or_default()
                    .insert(tissue.clone());
                matched += 1;
            }
        }
        if matched == 0 {
            warn!("tissue file {path} matched no dataset coordinates");
        }
    }

    Ok(index)
}

fn read_lines(path: &Utf8Path) -> Result<Vec<String>, EnrichError> {
    let file = fs::File::open(path.as_std_path())
        .map_err(|err| EnrichError::Filesystem(format!("open {path}: {err}")))?;
    let reader: Box<dyn Read> = if path.extension() == Some("gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    BufReader::new(reader)
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| EnrichError::Filesystem(format!("read {path}: {err}")))
}

/// `Whole_Blood.txt` and `Whole_Blood.txt.gz` both name the tissue `Whole_Blood`.
fn tissue_name(path: &Utf8Path) -> String {
    let stem = path.file_stem().unwrap_or(path.as_str());
    stem.strip_suffix(".txt").unwrap_or(stem).to_string()
}
