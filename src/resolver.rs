//! Resolution of catalog records to download URLs on the partitioned archive.

use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;
use crate::domain::{Accession, GenomeRecord, GroupedCatalog, ResolvedGenome};
use crate::error::{RefsketchError, RemoteError};
use crate::ledger::Ledger;
use crate::remote::{ArchiveFactory, RemoteArchive};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(ResolvedGenome),
    Unresolvable(String),
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedCatalog {
    /// Resolved genomes in catalog order.
    pub genomes: Vec<ResolvedGenome>,
    pub stats: ResolveStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveStats {
    pub resolved: usize,
    pub unresolvable: usize,
    pub previously_excluded: usize,
    pub already_downloaded: usize,
    pub attempts: u32,
}

/// `/genomes/all/GCA/000/001/405` for `GCA_000001405.29`.
pub fn partition_path(accession: &Accession) -> String {
    let [a, b, c] = accession.digit_groups();
    format!("/genomes/all/{}/{a}/{b}/{c}", accession.prefix().as_str())
}

/// First listing entry named after the accession. The prefix must end at a
/// `_` so `GCA_000001405.2` does not pick up `GCA_000001405.29_...`.
pub fn match_listing<'a>(accession: &Accession, entries: &'a [String]) -> Option<&'a str> {
    entries.iter().map(String::as_str).find(|entry| {
        entry
            .strip_prefix(accession.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('_'))
    })
}

/// Why a pass stopped early.
enum PassError {
    /// The session is unusable; reconnect and start over.
    Remote(RemoteError),
    /// Anything else aborts the run.
    Fatal(RefsketchError),
}

pub struct Resolver<'a, F: ArchiveFactory> {
    factory: &'a F,
    no_url: &'a Ledger,
    downloaded: &'a Ledger,
    request_delay: Duration,
    max_attempts: u32,
    retry_base_delay: Duration,
    cancel: CancelFlag,
}

impl<'a, F: ArchiveFactory> Resolver<'a, F> {
    pub fn new(factory: &'a F, no_url: &'a Ledger, downloaded: &'a Ledger) -> Self {
        Self {
            factory,
            no_url,
            downloaded,
            request_delay: Duration::from_millis(500),
            max_attempts: 5,
            retry_base_delay: Duration::from_secs(1),
            cancel: CancelFlag::new(),
        }
    }

    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolves every record, reconnecting and restarting the pass when the
    /// remote session fails. Gives up after the configured number of passes.
    pub fn resolve_all(&self, catalog: &GroupedCatalog) -> Result<ResolvedCatalog, RefsketchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            info!(attempt, max = self.max_attempts, "resolving download locations");
            match self.resolve_pass(catalog) {
                Ok(mut resolved) => {
                    resolved.stats.attempts = attempt;
                    return Ok(resolved);
                }
                Err(PassError::Fatal(err)) => return Err(err),
                Err(PassError::Remote(err)) if attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "remote session failed, restarting pass");
                    thread::sleep(delay);
                }
                Err(PassError::Remote(err)) => {
                    return Err(RefsketchError::ResolutionExhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.retry_base_delay
            .checked_mul(factor)
            .map(|delay| delay.min(MAX_BACKOFF))
            .unwrap_or(MAX_BACKOFF)
    }

    fn resolve_pass(&self, catalog: &GroupedCatalog) -> Result<ResolvedCatalog, PassError> {
        let archive = self.factory.connect().map_err(PassError::Remote)?;
        let mut resolved = ResolvedCatalog::default();

        for record in catalog.records() {
            if self.cancel.is_cancelled() {
                info!("resolution cancelled");
                break;
            }
            if self.downloaded.contains(&record.accession) {
                resolved.stats.already_downloaded += 1;
                continue;
            }
            if self.no_url.contains(&record.accession) {
                resolved.stats.previously_excluded += 1;
                continue;
            }

            match self.resolve_record(&archive, record)? {
                ResolveOutcome::Resolved(genome) => {
                    debug!(accession = %genome.accession, url = %genome.url, "resolved");
                    resolved.stats.resolved += 1;
                    resolved.genomes.push(genome);
                }
                ResolveOutcome::Unresolvable(reason) => {
                    warn!(accession = %record.accession, %reason, "no download URL");
                    self.no_url.record(&record.accession).map_err(PassError::Fatal)?;
                    resolved.stats.unresolvable += 1;
                }
            }
        }

        Ok(resolved)
    }

    fn resolve_record<R: RemoteArchive>(
        &self,
        archive: &R,
        record: &GenomeRecord,
    ) -> Result<ResolveOutcome, PassError> {
        let accession: Accession = match record.accession.parse() {
            Ok(accession) => accession,
            Err(_) => {
                return Ok(ResolveOutcome::Unresolvable(
                    "invalid accession format".to_string(),
                ));
            }
        };

        let partition = partition_path(&accession);
        let listing = archive.list_dir(&partition);
        thread::sleep(self.request_delay);
        let entries = match listing {
            Ok(entries) => entries,
            Err(err) if err.is_transient() => return Err(PassError::Remote(err)),
            Err(RemoteError::NotFound(_)) => {
                return Ok(ResolveOutcome::Unresolvable(format!(
                    "partition {partition} not found"
                )));
            }
            Err(err) => return Ok(ResolveOutcome::Unresolvable(err.to_string())),
        };
        if entries.is_empty() {
            return Ok(ResolveOutcome::Unresolvable(format!(
                "partition {partition} is empty"
            )));
        }

        let Some(folder) = match_listing(&accession, &entries) else {
            return Ok(ResolveOutcome::Unresolvable(format!(
                "no entry for accession in {partition}"
            )));
        };
        let url = archive.url_for(&format!("{partition}/{folder}/{folder}_genomic.fna.gz"));

        Ok(ResolveOutcome::Resolved(ResolvedGenome {
            accession,
            taxid: record.taxid.clone(),
            group: record.group.clone(),
            url,
        }))
    }
}
