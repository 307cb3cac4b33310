use camino::Utf8Path;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{GenomeRecord, GroupedCatalog, TaxonGroup};
use crate::error::RefsketchError;
use crate::taxonomy::{Classifier, UNCLASSIFIED};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub rows: usize,
    pub unclassified: usize,
    pub malformed: usize,
    pub duplicates: usize,
}

/// Classifies the catalog at `path` and groups its records.
///
/// Returns the grouped catalog and the raw classified text, which callers may
/// keep for inspection.
pub fn load_catalog(
    path: &Utf8Path,
    classifier: &dyn Classifier,
) -> Result<(GroupedCatalog, CatalogStats, String), RefsketchError> {
    if !path.as_std_path().is_file() {
        return Err(RefsketchError::CatalogRead(path.as_std_path().to_path_buf()));
    }
    let classified = classifier.classify(path)?;
    let (catalog, stats) = parse_classified(&classified);
    info!(
        groups = catalog.group_count(),
        records = catalog.len(),
        unclassified = stats.unclassified,
        malformed = stats.malformed,
        "catalog loaded"
    );
    Ok((catalog, stats, classified))
}

/// Parses classified rows: `accession \t assembly name \t taxid \t group`.
pub fn parse_classified(text: &str) -> (GroupedCatalog, CatalogStats) {
    let mut catalog = GroupedCatalog::new();
    let mut stats = CatalogStats::default();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        stats.rows += 1;

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            warn!(line = index + 1, "skipping catalog row with {} columns", fields.len());
            stats.malformed += 1;
            continue;
        }
        let accession = fields[0].trim();
        let taxid = fields[2].trim();
        let label = fields[3].trim();
        if accession.is_empty() || taxid.is_empty() {
            warn!(line = index + 1, "skipping catalog row without accession or taxid");
            stats.malformed += 1;
            continue;
        }
        if label == UNCLASSIFIED || label.is_empty() {
            stats.unclassified += 1;
            continue;
        }
        let group: TaxonGroup = match label.parse() {
            Ok(group) => group,
            Err(err) => {
                warn!(line = index + 1, %accession, "skipping catalog row: {err}");
                stats.malformed += 1;
                continue;
            }
        };

        let inserted = catalog.insert(GenomeRecord {
            accession: accession.to_string(),
            taxid: taxid.to_string(),
            group,
        });
        if !inserted {
            warn!(line = index + 1, %accession, "duplicate accession in catalog");
            stats.duplicates += 1;
        }
    }

    (catalog, stats)
}
