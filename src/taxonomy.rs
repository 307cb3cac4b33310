//! Taxonomy dump acquisition and the `taxonkit` group classifier.

use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::error::RefsketchError;
use crate::remote::RemoteArchive;
use crate::tools::run_checked;

/// Group value `taxonkit` prints when a taxid has no phylum.
pub const UNCLASSIFIED: &str = "no_returned_phylum";

/// Column (1-based) of the taxid in the catalog.
pub const TAXID_COLUMN: usize = 3;

/// Appends a taxonomic group column to every row of a catalog.
pub trait Classifier {
    /// Returns the classified catalog text: the input rows with the group
    /// appended as an extra tab-separated column.
    fn classify(&self, catalog: &Utf8Path) -> Result<String, RefsketchError>;
}

#[derive(Debug, Clone)]
pub struct TaxonkitClassifier {
    program: PathBuf,
    data_dir: Utf8PathBuf,
}

impl TaxonkitClassifier {
    pub fn new(program: PathBuf, data_dir: Utf8PathBuf) -> Self {
        Self { program, data_dir }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "reformat".to_string(),
            "--data-dir".to_string(),
            self.data_dir.to_string(),
            "-I".to_string(),
            TAXID_COLUMN.to_string(),
            "--format".to_string(),
            "{p}".to_string(),
            "-r".to_string(),
            UNCLASSIFIED.to_string(),
        ]
    }
}

impl Classifier for TaxonkitClassifier {
    fn classify(&self, catalog: &Utf8Path) -> Result<String, RefsketchError> {
        let input = File::open(catalog.as_std_path())
            .map_err(|_| RefsketchError::CatalogRead(catalog.as_std_path().to_path_buf()))?;
        info!(catalog = %catalog, "classifying catalog");

        let mut cmd = Command::new(&self.program);
        cmd.args(self.args())
            // scoped to this child only
            .env("TAXONKIT_DB", self.data_dir.as_std_path())
            .stdin(Stdio::from(input));
        let output = run_checked("taxonkit", &mut cmd).map_err(|err| match err {
            RefsketchError::ToolFailed { message, .. } => RefsketchError::Classification(message),
            other => other,
        })?;
        String::from_utf8(output.stdout)
            .map_err(|err| RefsketchError::Classification(format!("non-utf8 output: {err}")))
    }
}

/// Downloads and unpacks the NCBI taxonomy dump `taxonkit` reads.
pub struct TaxdumpFetcher<'a, R: RemoteArchive> {
    archive: &'a R,
    tar: PathBuf,
}

impl<'a, R: RemoteArchive> TaxdumpFetcher<'a, R> {
    pub fn new(archive: &'a R, tar: PathBuf) -> Self {
        Self { archive, tar }
    }

    pub fn fetch(&self, url: &str, dest_dir: &Utf8Path) -> Result<(), RefsketchError> {
        fs::create_dir_all(dest_dir.as_std_path())
            .map_err(|err| RefsketchError::Filesystem(format!("create {dest_dir}: {err}")))?;
        let tarball = dest_dir.join("taxdump.tar.gz");

        info!(%url, "downloading taxonomy dump");
        self.archive.download(url, &tarball)?;

        let mut cmd = Command::new(&self.tar);
        cmd.arg("-xzf")
            .arg(tarball.as_std_path())
            .arg("-C")
            .arg(dest_dir.as_std_path());
        run_checked("tar", &mut cmd)?;

        fs::remove_file(tarball.as_std_path())
            .map_err(|err| RefsketchError::Filesystem(format!("remove {tarball}: {err}")))?;
        Ok(())
    }
}
