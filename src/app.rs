use std::fs;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;
use tracing::info;

use crate::acquire::{AcquireEntry, AcquireOutcome, AcquireReport, Acquirer};
use crate::cancel::CancelFlag;
use crate::catalog::{CatalogStats, load_catalog};
use crate::config::Settings;
use crate::domain::GroupedCatalog;
use crate::error::RefsketchError;
use crate::ledger::Ledger;
use crate::mash::SketchTool;
use crate::merge::{IndexMerger, MergeReport};
use crate::remote::ArchiveFactory;
use crate::resolver::{ResolveStats, Resolver};
use crate::store::Store;
use crate::taxonomy::Classifier;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub output_dir: String,
    pub started_at: String,
    pub finished_at: String,
    pub catalog: CatalogStats,
    pub groups: usize,
    pub resolve: ResolveStats,
    pub sketched: usize,
    pub already_downloaded: usize,
    pub cancelled: bool,
    pub failures: Vec<AcquireEntry>,
    pub merge: MergeReport,
}

/// Sequences classification, resolution, acquisition and merging over one
/// output directory.
pub struct App<F: ArchiveFactory, S: SketchTool> {
    store: Store,
    settings: Settings,
    factory: F,
    sketcher: S,
    cancel: CancelFlag,
}

impl<F: ArchiveFactory, S: SketchTool> App<F, S> {
    pub fn new(store: Store, settings: Settings, factory: F, sketcher: S) -> Self {
        Self {
            store,
            settings,
            factory,
            sketcher,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Classifies the catalog and keeps the classified rows next to the
    /// outputs.
    pub fn classify(
        &self,
        catalog: &Utf8Path,
        classifier: &dyn Classifier,
        sink: &dyn ProgressSink,
    ) -> Result<(GroupedCatalog, CatalogStats), RefsketchError> {
        self.store.ensure_layout()?;
        sink.event(ProgressEvent {
            message: format!("phase=Classify; catalog {catalog}"),
            elapsed: None,
        });
        let start = Instant::now();
        let (grouped, stats, classified) = load_catalog(catalog, classifier)?;
        let classified_path = self.store.classified_catalog_path();
        fs::write(classified_path.as_std_path(), classified)
            .map_err(|err| RefsketchError::Filesystem(format!("write {classified_path}: {err}")))?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Classify; {} records in {} groups",
                grouped.len(),
                grouped.group_count()
            ),
            elapsed: Some(start.elapsed()),
        });
        Ok((grouped, stats))
    }

    /// Resolves, downloads, sketches and merges a classified catalog.
    pub fn index(
        &self,
        catalog: &GroupedCatalog,
        catalog_stats: CatalogStats,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, RefsketchError> {
        let started_at = iso_timestamp();
        self.store.ensure_layout()?;
        let no_url = Ledger::open(&self.store.no_url_ledger_path())?;
        let downloaded = Ledger::open(&self.store.downloaded_ledger_path())?;

        sink.event(ProgressEvent {
            message: "phase=Resolve; walking remote archive".to_string(),
            elapsed: None,
        });
        let start = Instant::now();
        let resolved = Resolver::new(&self.factory, &no_url, &downloaded)
            .request_delay(self.settings.request_delay)
            .max_attempts(self.settings.max_resolve_attempts)
            .retry_base_delay(self.settings.retry_base_delay)
            .cancel_flag(self.cancel.clone())
            .resolve_all(catalog)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; {} resolved, {} without URL",
                resolved.stats.resolved, resolved.stats.unresolvable
            ),
            elapsed: Some(start.elapsed()),
        });

        sink.event(ProgressEvent {
            message: format!("phase=Acquire; {} genomes", resolved.genomes.len()),
            elapsed: None,
        });
        let start = Instant::now();
        let archive = self.factory.connect()?;
        let mut acquired = Acquirer::new(&archive, &self.sketcher, &self.store, &downloaded)
            .cancel_flag(self.cancel.clone())
            .run(&resolved.genomes)?;
        // resolution may have stopped early with nothing left to acquire
        acquired.cancelled |= self.cancel.is_cancelled();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Acquire; {} sketched, {} failed",
                acquired.sketched(),
                acquired.failed()
            ),
            elapsed: Some(start.elapsed()),
        });

        let merge = self.merge(sink)?;

        Ok(build_report(
            &self.store,
            started_at,
            catalog,
            catalog_stats,
            resolved.stats,
            acquired,
            merge,
        ))
    }

    /// Folds whatever sketches are waiting in `mash/tmp` into the global
    /// index.
    pub fn merge(&self, sink: &dyn ProgressSink) -> Result<MergeReport, RefsketchError> {
        sink.event(ProgressEvent {
            message: "phase=Merge; updating global index".to_string(),
            elapsed: None,
        });
        let start = Instant::now();
        let report = IndexMerger::new(&self.store, &self.sketcher).merge_all()?;
        info!(groups = report.groups.len(), "merge finished");
        sink.event(ProgressEvent {
            message: format!("phase=Merge; {} groups updated", report.groups.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(report)
    }
}

fn build_report(
    store: &Store,
    started_at: String,
    catalog: &GroupedCatalog,
    catalog_stats: CatalogStats,
    resolve: ResolveStats,
    acquired: AcquireReport,
    merge: MergeReport,
) -> RunReport {
    let sketched = acquired.sketched();
    let already_downloaded = resolve.already_downloaded
        + acquired
            .entries
            .iter()
            .filter(|entry| entry.outcome == AcquireOutcome::AlreadyDownloaded)
            .count();
    let failures = acquired
        .entries
        .into_iter()
        .filter(|entry| {
            !matches!(
                entry.outcome,
                AcquireOutcome::Sketched(_) | AcquireOutcome::AlreadyDownloaded
            )
        })
        .collect();

    RunReport {
        output_dir: store.root().to_string(),
        started_at,
        finished_at: iso_timestamp(),
        catalog: catalog_stats,
        groups: catalog.group_count(),
        resolve,
        sketched,
        already_downloaded,
        cancelled: acquired.cancelled,
        failures,
        merge,
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
