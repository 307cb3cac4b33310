use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::Serialize;
use tracing::debug;

use crate::config::ToolPaths;
use crate::error::RefsketchError;

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub path: Option<String>,
    pub version: Option<String>,
}

/// External programs the pipeline shells out to.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub mash: Option<PathBuf>,
    pub taxonkit: Option<PathBuf>,
    pub tar: Option<PathBuf>,
}

impl Toolchain {
    /// Configured paths first, then a `PATH` lookup.
    pub fn discover(paths: &ToolPaths) -> Self {
        Self {
            mash: paths.mash.clone().or_else(|| find_in_path("mash")),
            taxonkit: paths.taxonkit.clone().or_else(|| find_in_path("taxonkit")),
            tar: paths.tar.clone().or_else(|| find_in_path("tar")),
        }
    }

    pub fn require_mash(&self) -> Result<&Path, RefsketchError> {
        require(&self.mash, "mash")
    }

    pub fn require_taxonkit(&self) -> Result<&Path, RefsketchError> {
        require(&self.taxonkit, "taxonkit")
    }

    pub fn require_tar(&self) -> Result<&Path, RefsketchError> {
        require(&self.tar, "tar")
    }

    pub fn info(&self) -> Vec<ToolInfo> {
        [
            ("mash", &self.mash, "--version"),
            ("taxonkit", &self.taxonkit, "version"),
            ("tar", &self.tar, "--version"),
        ]
        .into_iter()
        .map(|(name, path, flag)| ToolInfo {
            name: name.to_string(),
            path: path.as_ref().map(|p| p.display().to_string()),
            version: path.as_ref().and_then(|p| tool_version(p, &[flag])),
        })
        .collect()
    }
}

fn require<'a>(path: &'a Option<PathBuf>, name: &str) -> Result<&'a Path, RefsketchError> {
    path.as_deref()
        .ok_or_else(|| RefsketchError::MissingTool(name.to_string()))
}

/// Runs `cmd` to completion and turns a non-zero exit into `ToolFailed`
/// carrying the tool's stderr.
pub fn run_checked(tool: &str, cmd: &mut Command) -> Result<Output, RefsketchError> {
    debug!(command = ?cmd, "running external tool");
    let output = cmd.output().map_err(|err| RefsketchError::ToolFailed {
        tool: tool.to_string(),
        message: format!("could not start: {err}"),
    })?;
    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    };
    Err(RefsketchError::ToolFailed {
        tool: tool.to_string(),
        message,
    })
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next().unwrap_or("").trim().to_string();
    if first.is_empty() { None } else { Some(first) }
}
