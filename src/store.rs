use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{ResolvedGenome, TaxonGroup};
use crate::error::RefsketchError;

/// Directory layout of one output directory.
///
/// ```text
/// <root>/downloads/<group>/<accession>_<taxid>.fna.gz   transient
/// <root>/downloads/already_downloaded.txt
/// <root>/downloads/no_url.txt
/// <root>/mash/tmp/<group>/<accession>_<taxid>.fna.msh   transient
/// <root>/mash/tmp/<group>.msh                           transient
/// <root>/mash/<group>.msh                               global index
/// <root>/mash/<group>.fofn, .folding.msh, .fold-done     merge in progress
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn from_path(root: PathBuf) -> Result<Self, RefsketchError> {
        let root = Utf8PathBuf::from_path_buf(root)
            .map_err(|_| RefsketchError::Filesystem("non-utf8 output directory".to_string()))?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn downloads_dir(&self) -> Utf8PathBuf {
        self.root.join("downloads")
    }

    pub fn group_download_dir(&self, group: &TaxonGroup) -> Utf8PathBuf {
        self.downloads_dir().join(group.as_str())
    }

    pub fn compressed_path(&self, genome: &ResolvedGenome) -> Utf8PathBuf {
        self.group_download_dir(&genome.group)
            .join(format!("{}.fna.gz", genome.file_stem()))
    }

    pub fn downloaded_ledger_path(&self) -> Utf8PathBuf {
        self.downloads_dir().join("already_downloaded.txt")
    }

    pub fn no_url_ledger_path(&self) -> Utf8PathBuf {
        self.downloads_dir().join("no_url.txt")
    }

    pub fn mash_dir(&self) -> Utf8PathBuf {
        self.root.join("mash")
    }

    pub fn mash_tmp_dir(&self) -> Utf8PathBuf {
        self.mash_dir().join("tmp")
    }

    pub fn group_sketch_dir(&self, group: &TaxonGroup) -> Utf8PathBuf {
        self.mash_tmp_dir().join(group.as_str())
    }

    /// Output prefix handed to `mash sketch`; mash appends `.msh`.
    pub fn genome_sketch_prefix(&self, genome: &ResolvedGenome) -> Utf8PathBuf {
        self.group_sketch_dir(&genome.group)
            .join(format!("{}.fna", genome.file_stem()))
    }

    /// Output prefix of the per-run group sketch.
    pub fn group_sketch_prefix(&self, group: &TaxonGroup) -> Utf8PathBuf {
        self.mash_tmp_dir().join(group.as_str())
    }

    pub fn group_sketch_path(&self, group: &TaxonGroup) -> Utf8PathBuf {
        self.mash_tmp_dir().join(format!("{group}.msh"))
    }

    pub fn global_sketch_path(&self, group: &TaxonGroup) -> Utf8PathBuf {
        self.mash_dir().join(format!("{group}.msh"))
    }

    /// Output prefix of the combined file that replaces the global index.
    pub fn merging_prefix(&self, group: &TaxonGroup) -> Utf8PathBuf {
        self.mash_dir().join(format!("{group}.merging"))
    }

    /// Group sketch being folded into the global index. Present from the
    /// paste until the contributing sketches are cleaned up.
    pub fn folding_path(&self, group: &TaxonGroup) -> Utf8PathBuf {
        self.mash_dir().join(format!("{group}.folding.msh"))
    }

    /// Written once the combined index is complete and only the rename over
    /// the global index and the cleanup are left.
    pub fn fold_marker_path(&self, group: &TaxonGroup) -> Utf8PathBuf {
        self.mash_dir().join(format!("{group}.fold-done"))
    }

    pub fn manifest_path(&self, group: &TaxonGroup) -> Utf8PathBuf {
        self.mash_dir().join(format!("{group}.fofn"))
    }

    pub fn taxdump_dir(&self) -> Utf8PathBuf {
        self.root.join("taxdump")
    }

    pub fn classified_catalog_path(&self) -> Utf8PathBuf {
        self.root.join("final_list.txt")
    }

    pub fn ensure_layout(&self) -> Result<(), RefsketchError> {
        for dir in [self.downloads_dir(), self.mash_tmp_dir()] {
            fs::create_dir_all(dir.as_std_path()).map_err(|err| {
                RefsketchError::Filesystem(format!("create {dir}: {err}"))
            })?;
        }
        Ok(())
    }
}
