//! Download → decompress → sketch → delete, one genome at a time.

use std::fs;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::cancel::CancelFlag;
use crate::domain::ResolvedGenome;
use crate::error::RefsketchError;
use crate::fs_util;
use crate::ledger::Ledger;
use crate::mash::SketchTool;
use crate::remote::RemoteArchive;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AcquireOutcome {
    Sketched(String),
    AlreadyDownloaded,
    DownloadFailed(String),
    DecompressFailed(String),
    SketchFailed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct AcquireEntry {
    pub accession: String,
    pub outcome: AcquireOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AcquireReport {
    pub entries: Vec<AcquireEntry>,
    pub cancelled: bool,
}

impl AcquireReport {
    pub fn sketched(&self) -> usize {
        self.count(|outcome| matches!(outcome, AcquireOutcome::Sketched(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| {
            matches!(
                outcome,
                AcquireOutcome::DownloadFailed(_)
                    | AcquireOutcome::DecompressFailed(_)
                    | AcquireOutcome::SketchFailed(_)
            )
        })
    }

    fn count(&self, pred: impl Fn(&AcquireOutcome) -> bool) -> usize {
        self.entries.iter().filter(|entry| pred(&entry.outcome)).count()
    }
}

pub struct Acquirer<'a, R: RemoteArchive, S: SketchTool> {
    archive: &'a R,
    sketcher: &'a S,
    store: &'a Store,
    downloaded: &'a Ledger,
    cancel: CancelFlag,
}

impl<'a, R: RemoteArchive, S: SketchTool> Acquirer<'a, R, S> {
    pub fn new(archive: &'a R, sketcher: &'a S, store: &'a Store, downloaded: &'a Ledger) -> Self {
        Self {
            archive,
            sketcher,
            store,
            downloaded,
            cancel: CancelFlag::new(),
        }
    }

    pub fn cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Processes genomes strictly in order. Each one is fully cleaned up
    /// before the next begins, so at most one decompressed genome is on disk.
    pub fn run(&self, genomes: &[ResolvedGenome]) -> Result<AcquireReport, RefsketchError> {
        let mut report = AcquireReport::default();
        for (index, genome) in genomes.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(remaining = genomes.len() - index, "acquisition cancelled");
                report.cancelled = true;
                break;
            }
            let outcome = self.process(genome)?;
            report.entries.push(AcquireEntry {
                accession: genome.accession.to_string(),
                outcome,
            });
        }
        Ok(report)
    }

    /// Per-genome failures come back as an outcome; only a failure to write
    /// the ledger is returned as an error.
    pub fn process(&self, genome: &ResolvedGenome) -> Result<AcquireOutcome, RefsketchError> {
        let accession = genome.accession.as_str();
        if self.downloaded.contains(accession) {
            return Ok(AcquireOutcome::AlreadyDownloaded);
        }

        let compressed = self.store.compressed_path(genome);
        if let Err(reason) = self.download(genome, &compressed) {
            warn!(%accession, %reason, "download failed");
            return Ok(AcquireOutcome::DownloadFailed(reason));
        }
        self.downloaded.record(accession)?;

        info!(%accession, "decompressing");
        let decompressed = match fs_util::gunzip_in_place(&compressed) {
            Ok(path) => path,
            Err(err) => {
                warn!(%accession, error = %err, "decompression failed, keeping {compressed}");
                return Ok(AcquireOutcome::DecompressFailed(err.to_string()));
            }
        };

        let sketch_dir = self.store.group_sketch_dir(&genome.group);
        let sketched = fs::create_dir_all(sketch_dir.as_std_path())
            .map_err(|err| RefsketchError::Filesystem(format!("create {sketch_dir}: {err}")))
            .and_then(|_| {
                info!(%accession, "sketching");
                self.sketcher.sketch(
                    &decompressed,
                    &genome.sketch_id(),
                    &self.store.genome_sketch_prefix(genome),
                )
            });

        if let Err(err) = fs_util::remove_file_if_exists(&decompressed) {
            warn!(%accession, error = %err, "could not remove decompressed genome");
        }

        match sketched {
            Ok(path) => Ok(AcquireOutcome::Sketched(path.to_string())),
            Err(err) => {
                warn!(%accession, error = %err, "sketching failed");
                Ok(AcquireOutcome::SketchFailed(err.to_string()))
            }
        }
    }

    /// Streams into a `.part` file and only renames it to `compressed` once
    /// the transfer is complete.
    fn download(&self, genome: &ResolvedGenome, compressed: &Utf8PathBuf) -> Result<(), String> {
        let dir = self.store.group_download_dir(&genome.group);
        fs::create_dir_all(dir.as_std_path()).map_err(|err| format!("create {dir}: {err}"))?;
        let partial = Utf8PathBuf::from(format!("{compressed}.part"));

        info!(accession = %genome.accession, url = %genome.url, "downloading");
        let result = self
            .archive
            .download(&genome.url, &partial)
            .map_err(|err| err.to_string())
            .and_then(|_| fs_util::replace_file(&partial, compressed).map_err(|err| err.to_string()));
        if result.is_err() {
            let _ = fs_util::remove_file_if_exists(&partial);
        }
        result
    }
}
