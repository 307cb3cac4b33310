#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;

use refsketch::domain::{GenomeRecord, ResolvedGenome};
use refsketch::error::{RefsketchError, RemoteError};
use refsketch::mash::{SketchTool, sketch_path};
use refsketch::remote::{ArchiveFactory, RemoteArchive};
use refsketch::store::Store;
use refsketch::taxonomy::{Classifier, UNCLASSIFIED};

pub const BASE_URL: &str = "https://archive.test";

pub fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
    let store = Store::new(root);
    store.ensure_layout().unwrap();
    (temp, store)
}

pub fn gz(content: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

pub fn record(accession: &str, taxid: &str, group: &str) -> GenomeRecord {
    GenomeRecord {
        accession: accession.to_string(),
        taxid: taxid.to_string(),
        group: group.parse().unwrap(),
    }
}

pub fn genome(accession: &str, taxid: &str, group: &str) -> ResolvedGenome {
    ResolvedGenome {
        accession: accession.parse().unwrap(),
        taxid: taxid.to_string(),
        group: group.parse().unwrap(),
        url: format!("{BASE_URL}/files/{accession}_genomic.fna.gz"),
    }
}

/// Non-empty lines of a file, sorted.
pub fn sorted_lines(path: &Utf8Path) -> Vec<String> {
    let mut lines: Vec<String> = fs::read_to_string(path.as_std_path())
        .unwrap()
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    lines.sort();
    lines
}

pub fn count_files_with_suffix(dir: &Utf8Path, suffix: &str) -> usize {
    let Ok(entries) = fs::read_dir(dir.as_std_path()) else {
        return 0;
    };
    let mut count = 0;
    for entry in entries.flatten() {
        let path = Utf8PathBuf::from_path_buf(entry.path()).unwrap();
        if path.is_dir() {
            count += count_files_with_suffix(&path, suffix);
        } else if path.as_str().ends_with(suffix) {
            count += 1;
        }
    }
    count
}

/// In-memory archive. Directory listings and file bodies are keyed by path
/// and URL; anything else is reported as not found.
#[derive(Default)]
pub struct MockRemote {
    listings: Mutex<HashMap<String, Vec<String>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    truncated: Mutex<HashSet<String>>,
    transient_failures: Mutex<usize>,
    list_calls: Mutex<usize>,
    download_calls: Mutex<usize>,
    connects: Mutex<usize>,
}

impl MockRemote {
    pub fn with_listing(self, path: &str, entries: &[&str]) -> Self {
        self.listings.lock().unwrap().insert(
            path.to_string(),
            entries.iter().map(|entry| entry.to_string()).collect(),
        );
        self
    }

    pub fn with_file(self, url: &str, body: Vec<u8>) -> Self {
        self.files.lock().unwrap().insert(url.to_string(), body);
        self
    }

    /// Writes part of the body and then fails, like a dropped connection.
    pub fn with_truncated_file(self, url: &str) -> Self {
        self.truncated.lock().unwrap().insert(url.to_string());
        self
    }

    /// The next `count` listings fail as if the session dropped.
    pub fn failing_listings(self, count: usize) -> Self {
        *self.transient_failures.lock().unwrap() = count;
        self
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    pub fn download_calls(&self) -> usize {
        *self.download_calls.lock().unwrap()
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock().unwrap()
    }
}

impl RemoteArchive for MockRemote {
    fn list_dir(&self, path: &str) -> Result<Vec<String>, RemoteError> {
        *self.list_calls.lock().unwrap() += 1;
        let mut failures = self.transient_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(RemoteError::Transient("connection reset".to_string()));
        }
        self.listings
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))
    }

    fn download(&self, url: &str, destination: &Utf8Path) -> Result<u64, RemoteError> {
        *self.download_calls.lock().unwrap() += 1;
        if self.truncated.lock().unwrap().contains(url) {
            fs::write(destination.as_std_path(), b"\x1f\x8b partial").unwrap();
            return Err(RemoteError::Transient(format!("body of {url} cut short")));
        }
        let files = self.files.lock().unwrap();
        let body = files
            .get(url)
            .ok_or_else(|| RemoteError::NotFound(url.to_string()))?;
        fs::write(destination.as_std_path(), body)
            .map_err(|err| RemoteError::Local(err.to_string()))?;
        Ok(body.len() as u64)
    }

    fn url_for(&self, path: &str) -> String {
        format!("{BASE_URL}{path}")
    }
}

pub struct MockSession(Arc<MockRemote>);

impl RemoteArchive for MockSession {
    fn list_dir(&self, path: &str) -> Result<Vec<String>, RemoteError> {
        self.0.list_dir(path)
    }

    fn download(&self, url: &str, destination: &Utf8Path) -> Result<u64, RemoteError> {
        self.0.download(url, destination)
    }

    fn url_for(&self, path: &str) -> String {
        self.0.url_for(path)
    }
}

pub struct MockFactory {
    pub remote: Arc<MockRemote>,
}

impl MockFactory {
    pub fn new(remote: MockRemote) -> Self {
        Self {
            remote: Arc::new(remote),
        }
    }
}

impl ArchiveFactory for MockFactory {
    type Archive = MockSession;

    fn connect(&self) -> Result<MockSession, RemoteError> {
        *self.remote.connects.lock().unwrap() += 1;
        Ok(MockSession(self.remote.clone()))
    }
}

/// Stands in for `mash`. A sketch holds its identifier on one line and a
/// paste concatenates its inputs, so merged indexes can be compared by lines.
#[derive(Default)]
pub struct FakeMash {
    failing_ids: HashSet<String>,
    fail_paste: bool,
    watch_dir: Option<Utf8PathBuf>,
    ledger: Option<Utf8PathBuf>,
    sketched: Mutex<Vec<String>>,
    max_decompressed: Mutex<usize>,
    ledgered_at_sketch: Mutex<Vec<bool>>,
}

impl FakeMash {
    pub fn failing_sketch(mut self, id: &str) -> Self {
        self.failing_ids.insert(id.to_string());
        self
    }

    pub fn failing_paste(mut self) -> Self {
        self.fail_paste = true;
        self
    }

    /// Counts decompressed genomes under `dir` on every sketch call.
    pub fn watching(mut self, dir: Utf8PathBuf) -> Self {
        self.watch_dir = Some(dir);
        self
    }

    /// Checks the downloaded ledger for the accession on every sketch call.
    pub fn checking_ledger(mut self, ledger: Utf8PathBuf) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn sketched(&self) -> Vec<String> {
        self.sketched.lock().unwrap().clone()
    }

    pub fn max_decompressed(&self) -> usize {
        *self.max_decompressed.lock().unwrap()
    }

    pub fn ledgered_at_sketch(&self) -> Vec<bool> {
        self.ledgered_at_sketch.lock().unwrap().clone()
    }

    fn concat(&self, output_prefix: &Utf8Path, inputs: &[Utf8PathBuf]) -> Result<Utf8PathBuf, RefsketchError> {
        if self.fail_paste {
            return Err(RefsketchError::ToolFailed {
                tool: "mash".to_string(),
                message: "paste failed".to_string(),
            });
        }
        let mut combined = String::new();
        for input in inputs {
            combined.push_str(&fs::read_to_string(input.as_std_path()).map_err(|err| {
                RefsketchError::ToolFailed {
                    tool: "mash".to_string(),
                    message: format!("{input}: {err}"),
                }
            })?);
        }
        let output = sketch_path(output_prefix);
        fs::write(output.as_std_path(), combined).unwrap();
        Ok(output)
    }
}

impl SketchTool for FakeMash {
    fn sketch(
        &self,
        input: &Utf8Path,
        id: &str,
        output_prefix: &Utf8Path,
    ) -> Result<Utf8PathBuf, RefsketchError> {
        self.sketched.lock().unwrap().push(id.to_string());
        if let Some(dir) = &self.watch_dir {
            let count = count_files_with_suffix(dir, ".fna");
            let mut max = self.max_decompressed.lock().unwrap();
            *max = (*max).max(count);
        }
        if let Some(ledger) = &self.ledger {
            let accession = id.split(':').next().unwrap();
            let content = fs::read_to_string(ledger.as_std_path()).unwrap_or_default();
            self.ledgered_at_sketch
                .lock()
                .unwrap()
                .push(content.lines().any(|line| line == accession));
        }
        if !input.as_std_path().is_file() {
            return Err(RefsketchError::ToolFailed {
                tool: "mash".to_string(),
                message: format!("missing input {input}"),
            });
        }
        if self.failing_ids.contains(id) {
            return Err(RefsketchError::ToolFailed {
                tool: "mash".to_string(),
                message: "sketch failed".to_string(),
            });
        }
        let output = sketch_path(output_prefix);
        fs::write(output.as_std_path(), format!("{id}\n")).unwrap();
        Ok(output)
    }

    fn paste_list(
        &self,
        output_prefix: &Utf8Path,
        manifest: &Utf8Path,
    ) -> Result<Utf8PathBuf, RefsketchError> {
        let inputs: Vec<Utf8PathBuf> = fs::read_to_string(manifest.as_std_path())
            .unwrap()
            .lines()
            .map(Utf8PathBuf::from)
            .collect();
        self.concat(output_prefix, &inputs)
    }

    fn paste(
        &self,
        output_prefix: &Utf8Path,
        inputs: &[&Utf8Path],
    ) -> Result<Utf8PathBuf, RefsketchError> {
        let inputs: Vec<Utf8PathBuf> = inputs.iter().map(|path| path.to_path_buf()).collect();
        self.concat(output_prefix, &inputs)
    }
}

/// Appends the group mapped from the taxid column, or the unclassified
/// marker when the taxid is unknown.
#[derive(Default)]
pub struct TableClassifier {
    groups: HashMap<String, String>,
}

impl TableClassifier {
    pub fn with(mut self, taxid: &str, group: &str) -> Self {
        self.groups.insert(taxid.to_string(), group.to_string());
        self
    }
}

impl Classifier for TableClassifier {
    fn classify(&self, catalog: &Utf8Path) -> Result<String, RefsketchError> {
        let text = fs::read_to_string(catalog.as_std_path())
            .map_err(|_| RefsketchError::CatalogRead(catalog.as_std_path().to_path_buf()))?;
        let mut out = String::new();
        for line in text.lines() {
            let taxid = line.split('\t').nth(2).unwrap_or_default();
            let group = self
                .groups
                .get(taxid)
                .map(String::as_str)
                .unwrap_or(UNCLASSIFIED);
            out.push_str(&format!("{line}\t{group}\n"));
        }
        Ok(out)
    }
}
