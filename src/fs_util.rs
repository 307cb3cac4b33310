use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;

use crate::error::RefsketchError;

const DECOMPRESS_BLOCK: usize = 10 * 1024 * 1024;

/// `foo.fna.gz` -> `foo.fna`. Returns `None` when there is no `.gz` suffix.
pub fn strip_gz_suffix(path: &Utf8Path) -> Option<Utf8PathBuf> {
    let name = path.file_name()?.strip_suffix(".gz")?;
    if name.is_empty() {
        return None;
    }
    Some(path.with_file_name(name))
}

/// Decompresses `compressed` next to itself in fixed-size blocks and removes
/// the compressed file once the output is complete. On failure the compressed
/// file is left in place and the output is removed, also when only the
/// removal of the compressed file failed.
pub fn gunzip_in_place(compressed: &Utf8Path) -> Result<Utf8PathBuf, RefsketchError> {
    let output = strip_gz_suffix(compressed).ok_or_else(|| {
        RefsketchError::Decompress(format!("{compressed} does not end in .gz"))
    })?;

    gunzip_then_remove(compressed, output, |path| {
        fs::remove_file(path.as_std_path())
            .map_err(|err| RefsketchError::Filesystem(format!("remove {path}: {err}")))
    })
}

fn gunzip_then_remove<F>(
    compressed: &Utf8Path,
    output: Utf8PathBuf,
    remove_source: F,
) -> Result<Utf8PathBuf, RefsketchError>
where
    F: FnOnce(&Utf8Path) -> Result<(), RefsketchError>,
{
    let finished =
        decompress_blocks(compressed, &output).and_then(|_| remove_source(compressed));
    if let Err(err) = finished {
        // never leave a full genome next to its archive
        let _ = remove_file_if_exists(&output);
        return Err(err);
    }
    Ok(output)
}

fn decompress_blocks(compressed: &Utf8Path, output: &Utf8Path) -> Result<(), RefsketchError> {
    let input = File::open(compressed.as_std_path())
        .map_err(|err| RefsketchError::Decompress(format!("open {compressed}: {err}")))?;
    let mut decoder = MultiGzDecoder::new(input);
    let out_file = File::create(output.as_std_path())
        .map_err(|err| RefsketchError::Filesystem(format!("create {output}: {err}")))?;
    let mut writer = BufWriter::new(out_file);

    let mut block = vec![0u8; DECOMPRESS_BLOCK];
    loop {
        let read = match decoder.read(&mut block) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(RefsketchError::Decompress(format!("{compressed}: {err}")));
            }
        };
        writer
            .write_all(&block[..read])
            .map_err(|err| RefsketchError::Filesystem(format!("write {output}: {err}")))?;
    }
    writer
        .flush()
        .map_err(|err| RefsketchError::Filesystem(format!("write {output}: {err}")))
}

/// Copies `source` to a temporary file beside `dest`, then renames it over
/// `dest`.
pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), RefsketchError> {
    let parent = dest
        .parent()
        .ok_or_else(|| RefsketchError::Filesystem(format!("invalid destination {dest}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| RefsketchError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".refsketch-copy")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| RefsketchError::Filesystem(err.to_string()))?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| RefsketchError::Filesystem(format!("copy {source}: {err}")))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| RefsketchError::Filesystem(format!("persist {dest}: {err}")))?;
    Ok(())
}

/// Renames `from` over `to`; readers see either the old or the new file.
pub fn replace_file(from: &Utf8Path, to: &Utf8Path) -> Result<(), RefsketchError> {
    fs::rename(from.as_std_path(), to.as_std_path())
        .map_err(|err| RefsketchError::Filesystem(format!("rename {from} -> {to}: {err}")))
}

pub fn remove_file_if_exists(path: &Utf8Path) -> Result<(), RefsketchError> {
    match fs::remove_file(path.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(RefsketchError::Filesystem(format!("remove {path}: {err}"))),
    }
}

/// Files directly inside `dir` whose name ends with `suffix`, sorted.
pub fn files_with_suffix(dir: &Utf8Path, suffix: &str) -> Result<Vec<Utf8PathBuf>, RefsketchError> {
    let mut out = Vec::new();
    if !dir.as_std_path().exists() {
        return Ok(out);
    }
    let entries = dir
        .read_dir_utf8()
        .map_err(|err| RefsketchError::Filesystem(format!("read {dir}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| RefsketchError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_file() && entry.file_name().ends_with(suffix) {
            out.push(path.to_path_buf());
        }
    }
    out.sort();
    Ok(out)
}
