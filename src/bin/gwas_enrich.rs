use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use gwas_enricher::af::EnrichOptions;
use gwas_enricher::app::{App, EnrichReport};
use gwas_enricher::dbsnp::{DbSnpHttpTransport, RefSnpClient};
use gwas_enricher::error::EnrichError;
use gwas_enricher::store::AfStore;

#[derive(Parser)]
#[command(name = "gwas-enrich")]
#[command(about = "Enrich cleaned GWAS tables with dbSNP allele frequencies and tissue associations")]
#[command(version, author)]
struct Cli {
    /// One cleaned per-trait CSV file.
    #[arg(long, conflicts_with = "input_dir")]
    input: Option<Utf8PathBuf>,

    /// A directory of cleaned per-trait CSV files; every .csv is processed.
    #[arg(long)]
    input_dir: Option<Utf8PathBuf>,

    /// Where enriched tables are written.
    #[arg(long, default_value = "data/joined")]
    output_dir: Utf8PathBuf,

    /// Directory of per-tissue significant-variant files (one coordinate per
    /// line). Omit to skip tissue enrichment.
    #[arg(long)]
    tissue_dir: Option<Utf8PathBuf>,

    /// AF cache directory; defaults to ~/.cache/gwas-enricher/af.
    #[arg(long)]
    af_dir: Option<Utf8PathBuf>,

    /// Ignore cached AF tables and re-query dbSNP.
    #[arg(long)]
    refresh: bool,

    /// Print machine-readable JSON reports instead of the summary.
    #[arg(long)]
    non_interactive: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(enrich) = report.downcast_ref::<EnrichError>() {
            return ExitCode::from(map_exit_code(enrich));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EnrichError) -> u8 {
    match error {
        EnrichError::DbSnpHttp(_)
        | EnrichError::DbSnpStatus { .. }
        | EnrichError::DbSnpTimeout(_) => 3,
        EnrichError::InvalidInput(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let store = match &cli.af_dir {
        Some(root) => AfStore::new_with_root(root.clone()),
        None => AfStore::new().into_diagnostic()?,
    };
    let transport = DbSnpHttpTransport::new().into_diagnostic()?;
    let app = App::new(store, RefSnpClient::new(transport));

    let options = EnrichOptions {
        refresh: cli.refresh,
    };

    let reports = match (&cli.input, &cli.input_dir) {
        (Some(input), None) => vec![
            app.enrich_file(
                input,
                cli.tissue_dir.as_deref(),
                &cli.output_dir,
                options,
            )
            .into_diagnostic()?,
        ],
        (None, Some(input_dir)) => app
            .enrich_dir(
                input_dir,
                cli.tissue_dir.as_deref(),
                &cli.output_dir,
                options,
            )
            .into_diagnostic()?,
        _ => {
            return Err(miette::Report::msg(
                "exactly one of --input or --input-dir is required",
            ));
        }
    };

    if cli.non_interactive {
        let json = serde_json::to_string_pretty(&reports).into_diagnostic()?;
        println!("{json}");
    } else {
        print_summary(&reports);
    }

    Ok(())
}

fn print_summary(reports: &[EnrichReport]) {
    for report in reports {
        let source = if report.af_from_cache {
            "cache".to_string()
        } else {
            format!("dbSNP ({} ids)", report.looked_up_ids)
        };
        println!(
            "{}: {} rows enriched, AF from {} -> {}",
            report.dataset, report.rows, source, report.output_path
        );
        if report.failed_ids > 0 {
            println!(
                "  warning: unable to parse response for {} SNPs",
                report.failed_ids
            );
        }
    }
    println!("Done");
}
