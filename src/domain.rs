use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RefsketchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessionPrefix {
    Gca,
    Gcf,
}

impl AccessionPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessionPrefix::Gca => "GCA",
            AccessionPrefix::Gcf => "GCF",
        }
    }
}

/// Assembly accession of the form `GCA_000001405.29` or `GCF_000005845.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> AccessionPrefix {
        if self.0.starts_with("GCF_") {
            AccessionPrefix::Gcf
        } else {
            AccessionPrefix::Gca
        }
    }

    /// The nine digits split into the three groups used by the archive's
    /// directory partitioning.
    pub fn digit_groups(&self) -> [&str; 3] {
        let digits = &self.0[4..13];
        [&digits[0..3], &digits[3..6], &digits[6..9]]
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = RefsketchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let Some(rest) = normalized
            .strip_prefix("GCA_")
            .or_else(|| normalized.strip_prefix("GCF_"))
        else {
            return Err(RefsketchError::InvalidAccession(value.to_string()));
        };
        let (digits, version) = match rest.split_once('.') {
            Some((digits, version)) => (digits, Some(version)),
            None => (rest, None),
        };
        let digits_ok = digits.len() == 9 && digits.chars().all(|ch| ch.is_ascii_digit());
        let version_ok = version
            .map(|v| !v.is_empty() && v.chars().all(|ch| ch.is_ascii_digit()))
            .unwrap_or(true);
        if !digits_ok || !version_ok {
            return Err(RefsketchError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for Accession {
    type Error = RefsketchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Taxonomic group label, normalized to be usable as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct TaxonGroup(String);

impl TaxonGroup {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaxonGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonGroup {
    type Err = RefsketchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .chars()
            .map(|ch| if ch.is_whitespace() { '_' } else { ch })
            .collect();
        let is_valid = !normalized.is_empty()
            && normalized != "."
            && normalized != ".."
            && !normalized.contains(['/', '\\']);
        if !is_valid {
            return Err(RefsketchError::InvalidGroup(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for TaxonGroup {
    type Error = RefsketchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One catalog row after classification. The accession is kept as raw text so
/// malformed identifiers can still be ledgered by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomeRecord {
    pub accession: String,
    pub taxid: String,
    pub group: TaxonGroup,
}

/// A record whose download location is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGenome {
    pub accession: Accession,
    pub taxid: String,
    pub group: TaxonGroup,
    pub url: String,
}

impl ResolvedGenome {
    /// Identifier embedded in the sketch, `accession:taxid`.
    pub fn sketch_id(&self) -> String {
        format!("{}:{}", self.accession, self.taxid)
    }

    /// Stem shared by the working files and the per-genome sketch.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.accession, self.taxid)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupedCatalog {
    groups: BTreeMap<TaxonGroup, Vec<GenomeRecord>>,
    seen: HashSet<String>,
}

impl GroupedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record; returns `false` if the accession was already present.
    pub fn insert(&mut self, record: GenomeRecord) -> bool {
        if !self.seen.insert(record.accession.clone()) {
            return false;
        }
        self.groups
            .entry(record.group.clone())
            .or_default()
            .push(record);
        true
    }

    pub fn groups(&self) -> impl Iterator<Item = (&TaxonGroup, &[GenomeRecord])> {
        self.groups
            .iter()
            .map(|(group, records)| (group, records.as_slice()))
    }

    pub fn records(&self) -> impl Iterator<Item = &GenomeRecord> {
        self.groups.values().flatten()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
