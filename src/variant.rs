use std::sync::LazyLock;

use regex::Regex;

/// GWAS Catalog reports `?` for an unknown risk allele.
pub const UNKNOWN_ALLELE: &str = "?";

static ALLELE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<b>(.*)</b>").unwrap());

/// A variant identifier and risk allele decoded from the composite
/// `"<refsnp_id>-<b><allele></b>"` key shared by every join in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantAllele {
    pub refsnp_id: String,
    pub allele: String,
}

impl VariantAllele {
    /// Decodes a composite key like `rs1001780-<b>G</b>` into
    /// (`rs1001780`, `G`). Inputs without a `-` separator or without a
    /// `<b>…</b>` segment keep the whole id / fall back to [`UNKNOWN_ALLELE`];
    /// parsing never fails.
    pub fn parse(composite: &str) -> Self {
        let Some((refsnp_id, rest)) = composite.split_once('-') else {
            return Self {
                refsnp_id: composite.to_string(),
                allele: UNKNOWN_ALLELE.to_string(),
            };
        };

        let allele = ALLELE_PATTERN
            .captures(rest)
            .map(|captures| captures[1].to_string())
            .unwrap_or_else(|| UNKNOWN_ALLELE.to_string());

        Self {
            refsnp_id: refsnp_id.to_string(),
            allele,
        }
    }

    pub fn allele_is_known(&self) -> bool {
        self.allele != UNKNOWN_ALLELE
    }
}
