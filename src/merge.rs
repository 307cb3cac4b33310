//! Folding freshly built per-genome sketches into the persistent per-group
//! index.
//!
//! A group is merged in steps that each leave a recognisable state in
//! `mash/`, so a run killed at any point is finished by the next one without
//! adding a sketch twice:
//!
//! 1. list the per-genome sketches in `<group>.fofn` and paste them into
//!    `tmp/<group>.msh`
//! 2. rename that to `<group>.folding.msh`
//! 3. build `<group>.merging.msh` from the global index and the folding sketch
//! 4. write `<group>.fold-done`, then rename the merging file over the global
//! 5. delete the sketches named in the manifest, the folding sketch, the
//!    manifest and finally the marker

use std::fs;
use std::io::Write;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::TaxonGroup;
use crate::error::RefsketchError;
use crate::fs_util;
use crate::mash::{SKETCH_SUFFIX, SketchTool, sketch_path};
use crate::store::Store;

const MANIFEST_SUFFIX: &str = ".fofn";
const FOLDING_SUFFIX: &str = ".folding.msh";
const MARKER_SUFFIX: &str = ".fold-done";

static GENOME_SKETCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^GC[AF]_\d{9}(\.\d+)?_\d+\.fna\.msh$").expect("valid sketch name pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalAction {
    Created,
    Extended,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMerge {
    pub group: String,
    pub sketches: usize,
    pub action: GlobalAction,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub groups: Vec<GroupMerge>,
}

pub struct IndexMerger<'a, S: SketchTool> {
    store: &'a Store,
    sketcher: &'a S,
}

impl<'a, S: SketchTool> IndexMerger<'a, S> {
    pub fn new(store: &'a Store, sketcher: &'a S) -> Self {
        Self { store, sketcher }
    }

    pub fn merge_all(&self) -> Result<MergeReport, RefsketchError> {
        let mash_dir = self.store.mash_dir();
        for manifest in fs_util::files_with_suffix(&mash_dir, MANIFEST_SUFFIX)? {
            let in_flight = manifest
                .file_name()
                .and_then(|name| name.strip_suffix(MANIFEST_SUFFIX))
                .and_then(|label| label.parse::<TaxonGroup>().ok())
                .is_some_and(|group| self.fold_in_flight(&group));
            if !in_flight {
                warn!(%manifest, "removing stale manifest");
                fs_util::remove_file_if_exists(&manifest)?;
            }
        }

        let mut report = MergeReport::default();
        for group in self.pending_groups()? {
            if let Some(merge) = self.merge_group(&group)? {
                report.groups.push(merge);
            }
        }
        Ok(report)
    }

    fn fold_in_flight(&self, group: &TaxonGroup) -> bool {
        self.store.folding_path(group).as_std_path().is_file()
            || self.store.fold_marker_path(group).as_std_path().is_file()
    }

    /// Groups with a sketch directory or a leftover group sketch in
    /// `mash/tmp`, or an unfinished fold in `mash`.
    fn pending_groups(&self) -> Result<Vec<TaxonGroup>, RefsketchError> {
        let mut groups = Vec::new();
        self.collect_groups(&self.store.mash_tmp_dir(), &[SKETCH_SUFFIX], true, &mut groups)?;
        self.collect_groups(
            &self.store.mash_dir(),
            &[FOLDING_SUFFIX, MARKER_SUFFIX],
            false,
            &mut groups,
        )?;
        groups.sort();
        Ok(groups)
    }

    fn collect_groups(
        &self,
        dir: &Utf8Path,
        suffixes: &[&str],
        with_dirs: bool,
        groups: &mut Vec<TaxonGroup>,
    ) -> Result<(), RefsketchError> {
        if !dir.as_std_path().exists() {
            return Ok(());
        }
        let entries = dir
            .read_dir_utf8()
            .map_err(|err| RefsketchError::Filesystem(format!("read {dir}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| RefsketchError::Filesystem(err.to_string()))?;
            let name = entry.file_name();
            let label = if entry.path().is_dir() {
                if !with_dirs {
                    continue;
                }
                name
            } else if let Some(stem) = suffixes.iter().find_map(|suffix| name.strip_suffix(suffix))
            {
                stem
            } else {
                continue;
            };
            match label.parse::<TaxonGroup>() {
                Ok(group) if !groups.contains(&group) => groups.push(group),
                Ok(_) => {}
                Err(err) => warn!(entry = %entry.path(), "ignoring: {err}"),
            }
        }
        Ok(())
    }

    /// Finishes any interrupted fold for `group`, then pastes this run's
    /// sketches and folds them into the global index. Returns `None` when
    /// there was nothing to merge.
    pub fn merge_group(&self, group: &TaxonGroup) -> Result<Option<GroupMerge>, RefsketchError> {
        let recovered = self.recover(group)?;

        let sketch_dir = self.store.group_sketch_dir(group);
        let sketches = self.genome_sketches(&sketch_dir)?;
        let merged = if sketches.is_empty() {
            recovered
        } else {
            info!(%group, sketches = sketches.len(), "pasting group sketch");
            let manifest = self.store.manifest_path(group);
            write_manifest(&manifest, &sketches)?;
            let pasted = match self
                .sketcher
                .paste_list(&self.store.group_sketch_prefix(group), &manifest)
            {
                Ok(pasted) => pasted,
                Err(err) => {
                    fs_util::remove_file_if_exists(&manifest)?;
                    return Err(err);
                }
            };
            fs_util::replace_file(&pasted, &self.store.folding_path(group))?;

            let action = self.fold_into_global(group)?;
            let count = self.finish_fold(group)?;
            Some(match recovered {
                Some(previous) => GroupMerge {
                    group: group.to_string(),
                    sketches: previous.sketches + count,
                    action: GlobalAction::Extended,
                },
                None => GroupMerge {
                    group: group.to_string(),
                    sketches: count,
                    action,
                },
            })
        };

        if sketch_dir.as_std_path().is_dir() {
            // non-sketch files stay behind for inspection
            let _ = fs::remove_dir(sketch_dir.as_std_path());
        }

        Ok(merged)
    }

    /// Brings a group left mid-merge by an earlier run back to a clean state.
    fn recover(&self, group: &TaxonGroup) -> Result<Option<GroupMerge>, RefsketchError> {
        // pasted but never renamed: every sketch in it is still in tmp/<group>/
        let leftover = self.store.group_sketch_path(group);
        if leftover.as_std_path().is_file() {
            warn!(%group, "discarding group sketch of an interrupted paste");
            fs_util::remove_file_if_exists(&leftover)?;
        }

        let marker = self.store.fold_marker_path(group);
        let action = if marker.as_std_path().is_file() {
            let merging = sketch_path(&self.store.merging_prefix(group));
            if merging.as_std_path().is_file() {
                warn!(%group, "completing interrupted index replacement");
                fs_util::replace_file(&merging, &self.store.global_sketch_path(group))?;
            }
            GlobalAction::Extended
        } else if self.store.folding_path(group).as_std_path().is_file() {
            warn!(%group, "redoing interrupted fold into global index");
            self.fold_into_global(group)?
        } else {
            return Ok(None);
        };

        let sketches = self.finish_fold(group)?;
        Ok(Some(GroupMerge {
            group: group.to_string(),
            sketches,
            action,
        }))
    }

    /// Builds `global + folding` (or a copy of `folding` when there is no
    /// global index yet) beside the global index, marks it complete and
    /// renames it over the global index.
    fn fold_into_global(&self, group: &TaxonGroup) -> Result<GlobalAction, RefsketchError> {
        let global = self.store.global_sketch_path(group);
        let folding = self.store.folding_path(group);
        let merging_prefix = self.store.merging_prefix(group);
        let merging = sketch_path(&merging_prefix);
        fs_util::remove_file_if_exists(&merging)?;

        let action = if global.as_std_path().is_file() {
            info!(%group, "extending global index");
            self.sketcher
                .paste(&merging_prefix, &[global.as_path(), folding.as_path()])?;
            GlobalAction::Extended
        } else {
            info!(%group, "creating global index");
            fs_util::copy_file_atomic(&folding, &merging)?;
            GlobalAction::Created
        };

        let marker = self.store.fold_marker_path(group);
        fs::File::create(marker.as_std_path())
            .and_then(|file| file.sync_all())
            .map_err(|err| RefsketchError::Filesystem(format!("create {marker}: {err}")))?;
        fs_util::replace_file(&merging, &global)?;
        Ok(action)
    }

    /// Removes the sketches a completed fold consumed. The marker goes last
    /// so an interrupted cleanup is picked up again. Returns how many
    /// per-genome sketches the fold covered.
    fn finish_fold(&self, group: &TaxonGroup) -> Result<usize, RefsketchError> {
        let manifest = self.store.manifest_path(group);
        let consumed = read_manifest(&manifest)?;
        for sketch in &consumed {
            fs_util::remove_file_if_exists(sketch)?;
        }
        fs_util::remove_file_if_exists(&self.store.folding_path(group))?;
        fs_util::remove_file_if_exists(&manifest)?;
        fs_util::remove_file_if_exists(&self.store.fold_marker_path(group))?;
        Ok(consumed.len())
    }

    fn genome_sketches(&self, dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, RefsketchError> {
        let candidates = fs_util::files_with_suffix(dir, SKETCH_SUFFIX)?;
        let mut sketches = Vec::with_capacity(candidates.len());
        for path in candidates {
            let matches = path
                .file_name()
                .map(|name| GENOME_SKETCH.is_match(name))
                .unwrap_or(false);
            if matches {
                sketches.push(path);
            } else {
                warn!(sketch = %path, "not a per-genome sketch name, ignoring");
            }
        }
        Ok(sketches)
    }
}

fn write_manifest(path: &Utf8Path, sketches: &[Utf8PathBuf]) -> Result<(), RefsketchError> {
    let mut file = fs::File::create(path.as_std_path())
        .map_err(|err| RefsketchError::Filesystem(format!("create {path}: {err}")))?;
    for sketch in sketches {
        writeln!(file, "{sketch}")
            .map_err(|err| RefsketchError::Filesystem(format!("write {path}: {err}")))?;
    }
    file.sync_all()
        .map_err(|err| RefsketchError::Filesystem(format!("write {path}: {err}")))
}

fn read_manifest(path: &Utf8Path) -> Result<Vec<Utf8PathBuf>, RefsketchError> {
    if !path.as_std_path().is_file() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| RefsketchError::Filesystem(format!("read {path}: {err}")))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Utf8PathBuf::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genome_sketch_names() {
        assert!(GENOME_SKETCH.is_match("GCA_000001405.29_9606.fna.msh"));
        assert!(!GENOME_SKETCH.is_match("Chordata.msh"));
        assert!(GENOME_SKETCH.is_match("GCF_000001405_9606.fna.msh"));
        assert!(!GENOME_SKETCH.is_match("GCA_00001405.1_9606.fna.msh"));
        assert!(!GENOME_SKETCH.is_match("GCA_000001405.1_9606.fna"));
    }

    #[test]
    fn manifest_round_trip_skips_blank_lines() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("G.fofn")).unwrap();
        let sketches = vec![Utf8PathBuf::from("/a/x.msh"), Utf8PathBuf::from("/a/y.msh")];
        write_manifest(&path, &sketches).unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(path.as_std_path())
            .unwrap()
            .write_all(b"\n")
            .unwrap();
        assert_eq!(read_manifest(&path).unwrap(), sketches);
        assert!(read_manifest(Utf8Path::new("/missing/G.fofn")).unwrap().is_empty());
    }
}
