use std::fs;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Deserialize;

use gwas_enricher::af::EnrichOptions;
use gwas_enricher::app::App;
use gwas_enricher::dbsnp::{DbSnpTransport, RefSnpClient};
use gwas_enricher::error::EnrichError;
use gwas_enricher::store::AfStore;

/// Serves one allele (`G`) per requested SNP at a fixed frequency and counts
/// how many requests were issued.
struct FixedDbSnp {
    allele_count: u64,
    calls: Mutex<usize>,
}

impl FixedDbSnp {
    fn new(allele_count: u64) -> Self {
        Self {
            allele_count,
            calls: Mutex::new(0),
        }
    }

    fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl DbSnpTransport for FixedDbSnp {
    fn fetch_raw(&self, ids: &[String]) -> Result<String, EnrichError> {
        *self.calls.lock().unwrap() += 1;
        Ok(ids
            .iter()
            .map(|id| {
                let digits = id.strip_prefix("rs").unwrap_or(id);
                format!(
                    "{{\"refsnp_id\":\"{digits}\",\"primary_snapshot_data\":\
                     {{\"allele_annotations\":[{{\"frequency\":[{{\"study_name\":\"dbGaP_PopFreq\",\
                     \"allele_count\":{},\"total_count\":100,\
                     \"observation\":{{\"inserted_sequence\":\"G\"}}}}]}}]}}}}",
                    self.allele_count
                )
            })
            .collect::<String>())
    }
}

/// Any request is a test failure; used to prove cache hits stay offline.
struct OfflineDbSnp;

impl DbSnpTransport for OfflineDbSnp {
    fn fetch_raw(&self, _ids: &[String]) -> Result<String, EnrichError> {
        Err(EnrichError::DbSnpHttp(
            "network access not expected".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct OutputRow {
    variant_and_allele: String,
    af: f64,
    tissues: String,
}

struct Workspace {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        Self { _temp: temp, root }
    }

    fn write_input(&self, file_name: &str, rows: &[&str]) -> Utf8PathBuf {
        let dir = self.root.join("clean");
        fs::create_dir_all(dir.as_std_path()).unwrap();
        let path = dir.join(file_name);
        let mut content = String::from("variant_and_allele,p_value,trait,gene,location\n");
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        fs::write(path.as_std_path(), content).unwrap();
        path
    }

    fn write_tissue_file(&self, file_name: &str, lines: &[&str]) -> Utf8PathBuf {
        let dir = self.root.join("gtex");
        fs::create_dir_all(dir.as_std_path()).unwrap();
        let path = dir.join(file_name);
        let body = lines.join("\n");
        if file_name.ends_with(".gz") {
            let file = fs::File::create(path.as_std_path()).unwrap();
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(body.as_bytes()).unwrap();
            encoder.finish().unwrap();
        } else {
            fs::write(path.as_std_path(), body).unwrap();
        }
        dir
    }

    fn store(&self) -> AfStore {
        AfStore::new_with_root(self.root.join("af"))
    }

    fn output_dir(&self) -> Utf8PathBuf {
        self.root.join("joined")
    }

    fn read_output(&self, file_name: &str) -> Vec<OutputRow> {
        let path = self.output_dir().join(file_name);
        let mut reader = csv::Reader::from_path(path.as_std_path()).unwrap();
        reader.deserialize().map(|row| row.unwrap()).collect()
    }
}

fn app<T: DbSnpTransport>(workspace: &Workspace, transport: T) -> App<T> {
    App::new(
        workspace.store(),
        RefSnpClient::new(transport).with_min_interval(Duration::ZERO),
    )
}

#[test]
fn enrich_file_attaches_af_and_tissues_to_every_row() {
    let workspace = Workspace::new();
    let input = workspace.write_input(
        "asthma.csv",
        &[
            "rs1-<b>G</b>,2e-10,asthma,IL33,9:6255967",
            "rs1-<b>T</b>,3e-9,asthma,IL33,9:6255967",
            "rs2-<b>G</b>,4e-8,asthma,GSDMB,17:39905964",
            "chr6:55564517-<b>?</b>,5e-8,asthma,UNKNOWN,6:55564517",
        ],
    );
    let tissue_dir = workspace.write_tissue_file(
        "Whole_Blood.txt",
        &["chr9_6255967_C_T_b38", "chr1_64764_C_T_b38"],
    );

    let app = app(&workspace, FixedDbSnp::new(25));
    let report = app
        .enrich_file(
            &input,
            Some(&tissue_dir),
            &workspace.output_dir(),
            EnrichOptions::default(),
        )
        .unwrap();

    assert_eq!(report.dataset, "asthma");
    assert_eq!(report.rows, 4);
    assert!(!report.af_from_cache);
    assert_eq!(report.looked_up_ids, 2);
    assert_eq!(report.failed_ids, 0);

    let rows = workspace.read_output("asthma.csv");
    assert_eq!(rows.len(), 4);

    assert_eq!(rows[0].variant_and_allele, "rs1-<b>G</b>");
    assert_eq!(rows[0].af, 0.25);
    assert_eq!(rows[0].tissues, "Whole_Blood");

    // Allele absent from the frequency map, unknown allele: sentinel.
    assert_eq!(rows[1].af, -1.0);
    assert_eq!(rows[3].af, -1.0);

    assert_eq!(rows[2].af, 0.25);
    assert_eq!(rows[2].tissues, "");
    assert_eq!(rows[3].tissues, "");
}

#[test]
fn second_run_is_served_from_cache_without_network() {
    let workspace = Workspace::new();
    let rows = &[
        "rs1-<b>G</b>,2e-10,asthma,IL33,9:6255967",
        "chr6:55564517-<b>?</b>,5e-8,asthma,UNKNOWN,6:55564517",
    ];
    let input = workspace.write_input("asthma.csv", rows);

    let transport = FixedDbSnp::new(25);
    let first = app(&workspace, transport);
    first
        .enrich_file(&input, None, &workspace.output_dir(), EnrichOptions::default())
        .unwrap();
    let first_output = workspace.read_output("asthma.csv");

    // A transport that refuses all requests proves the cache gate holds.
    let second = app(&workspace, OfflineDbSnp);
    let report = second
        .enrich_file(&input, None, &workspace.output_dir(), EnrichOptions::default())
        .unwrap();
    assert!(report.af_from_cache);
    assert_eq!(report.looked_up_ids, 0);

    let second_output = workspace.read_output("asthma.csv");
    assert_eq!(first_output.len(), second_output.len());
    for (first_row, second_row) in first_output.iter().zip(&second_output) {
        assert_eq!(first_row.variant_and_allele, second_row.variant_and_allele);
        assert_eq!(first_row.af, second_row.af);
    }
}

#[test]
fn refresh_bypasses_the_cache() {
    let workspace = Workspace::new();
    let input = workspace.write_input("asthma.csv", &["rs1-<b>G</b>,2e-10,asthma,IL33,9:6255967"]);

    app(&workspace, FixedDbSnp::new(25))
        .enrich_file(&input, None, &workspace.output_dir(), EnrichOptions::default())
        .unwrap();
    assert_eq!(workspace.read_output("asthma.csv")[0].af, 0.25);

    let transport = FixedDbSnp::new(50);
    let refreshed = app(&workspace, transport);
    refreshed
        .enrich_file(
            &input,
            None,
            &workspace.output_dir(),
            EnrichOptions { refresh: true },
        )
        .unwrap();
    assert_eq!(workspace.read_output("asthma.csv")[0].af, 0.5);
    assert!(refreshed.client().transport().call_count() > 0);
}

#[test]
fn coordinate_in_two_tissue_files_joins_both_names() {
    let workspace = Workspace::new();
    let input = workspace.write_input(
        "height.csv",
        &["rs3-<b>G</b>,1e-12,height,HMGA2,12:65824460"],
    );
    workspace.write_tissue_file("Whole_Blood.txt", &["chr12_65824460_A_G_b38"]);
    let tissue_dir =
        workspace.write_tissue_file("Adipose_Subcutaneous.txt", &["chr12_65824460_A_G_b38"]);

    let app = app(&workspace, FixedDbSnp::new(25));
    app.enrich_file(
        &input,
        Some(&tissue_dir),
        &workspace.output_dir(),
        EnrichOptions::default(),
    )
    .unwrap();

    let rows = workspace.read_output("height.csv");
    assert_eq!(rows[0].tissues, "Adipose_Subcutaneous&Whole_Blood");
}

#[test]
fn gzip_tissue_files_match_like_plain_text() {
    let workspace = Workspace::new();
    let input = workspace.write_input(
        "height.csv",
        &["rs3-<b>G</b>,1e-12,height,HMGA2,12:65824460"],
    );
    let tissue_dir =
        workspace.write_tissue_file("Muscle_Skeletal.txt.gz", &["chr12_65824460_A_G_b38"]);

    let app = app(&workspace, FixedDbSnp::new(25));
    app.enrich_file(
        &input,
        Some(&tissue_dir),
        &workspace.output_dir(),
        EnrichOptions::default(),
    )
    .unwrap();

    let rows = workspace.read_output("height.csv");
    assert_eq!(rows[0].tissues, "Muscle_Skeletal");
}

#[test]
fn enrich_dir_processes_every_csv_and_nothing_else() {
    let workspace = Workspace::new();
    workspace.write_input("asthma.csv", &["rs1-<b>G</b>,2e-10,asthma,IL33,9:6255967"]);
    workspace.write_input(
        "rheumatoid_arthritis.csv",
        &["rs2-<b>G</b>,1e-20,rheumatoid arthritis,PTPN22,1:113834946"],
    );
    let input_dir = workspace.root.join("clean");
    fs::write(input_dir.join("notes.txt").as_std_path(), "not a table").unwrap();

    let app = app(&workspace, FixedDbSnp::new(25));
    let reports = app
        .enrich_dir(
            &input_dir,
            None,
            &workspace.output_dir(),
            EnrichOptions::default(),
        )
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].dataset, "asthma");
    assert_eq!(reports[1].dataset, "rheumatoid arthritis");
    assert!(
        workspace
            .output_dir()
            .join("rheumatoid_arthritis.csv")
            .as_std_path()
            .exists()
    );
}

#[test]
fn cache_file_is_a_two_column_table() {
    let workspace = Workspace::new();
    let input = workspace.write_input("asthma.csv", &["rs1-<b>G</b>,2e-10,asthma,IL33,9:6255967"]);

    app(&workspace, FixedDbSnp::new(25))
        .enrich_file(&input, None, &workspace.output_dir(), EnrichOptions::default())
        .unwrap();

    let cache_path = workspace.store().dataset_path("asthma");
    let content = fs::read_to_string(cache_path.as_std_path()).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next().unwrap(), "variant_and_allele,af");
    assert_eq!(lines.next().unwrap(), "rs1-<b>G</b>,0.25");
}
