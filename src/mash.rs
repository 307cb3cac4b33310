//! Invocation of the external `mash` sketching tool.

use std::path::PathBuf;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::RefsketchError;
use crate::fs_util;
use crate::tools::run_checked;

pub const SKETCH_SUFFIX: &str = ".msh";

/// Named `mash` options; each renders to its own flag and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MashOption {
    SketchSize(u32),
    Identifier(String),
    Output(Utf8PathBuf),
    ListFile(Utf8PathBuf),
}

impl MashOption {
    fn push_args(&self, args: &mut Vec<String>) {
        match self {
            MashOption::SketchSize(size) => {
                args.push("-s".to_string());
                args.push(size.to_string());
            }
            MashOption::Identifier(id) => {
                args.push("-I".to_string());
                args.push(id.clone());
            }
            MashOption::Output(path) => {
                args.push("-o".to_string());
                args.push(path.to_string());
            }
            MashOption::ListFile(path) => {
                args.push("-l".to_string());
                args.push(path.to_string());
            }
        }
    }
}

/// Argument list for one `mash` call: subcommand, options, then positionals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MashCommand {
    subcommand: &'static str,
    options: Vec<MashOption>,
    positional: Vec<Utf8PathBuf>,
}

impl MashCommand {
    /// `mash sketch -o <output_prefix> ...`
    pub fn sketch(output_prefix: &Utf8Path) -> Self {
        Self {
            subcommand: "sketch",
            options: vec![MashOption::Output(output_prefix.to_path_buf())],
            positional: Vec::new(),
        }
    }

    /// `mash paste ... <output_prefix> ...`
    pub fn paste(output_prefix: &Utf8Path) -> Self {
        Self {
            subcommand: "paste",
            options: Vec::new(),
            positional: vec![output_prefix.to_path_buf()],
        }
    }

    pub fn option(mut self, option: MashOption) -> Self {
        self.options.retain(|existing| {
            std::mem::discriminant(existing) != std::mem::discriminant(&option)
        });
        self.options.push(option);
        self
    }

    pub fn input(mut self, path: &Utf8Path) -> Self {
        self.positional.push(path.to_path_buf());
        self
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.subcommand.to_string()];
        for option in &self.options {
            option.push_args(&mut args);
        }
        args.extend(self.positional.iter().map(|path| path.to_string()));
        args
    }
}

/// Path mash writes for an output prefix.
pub fn sketch_path(output_prefix: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{output_prefix}{SKETCH_SUFFIX}"))
}

pub trait SketchTool {
    /// Sketches one sequence file; returns the written sketch path.
    fn sketch(
        &self,
        input: &Utf8Path,
        id: &str,
        output_prefix: &Utf8Path,
    ) -> Result<Utf8PathBuf, RefsketchError>;

    /// Pastes every sketch listed in `manifest` into one file.
    fn paste_list(
        &self,
        output_prefix: &Utf8Path,
        manifest: &Utf8Path,
    ) -> Result<Utf8PathBuf, RefsketchError>;

    /// Pastes the given sketch files into one file.
    fn paste(
        &self,
        output_prefix: &Utf8Path,
        inputs: &[&Utf8Path],
    ) -> Result<Utf8PathBuf, RefsketchError>;
}

#[derive(Debug, Clone)]
pub struct MashTool {
    program: PathBuf,
    sketch_size: u32,
}

impl MashTool {
    pub fn new(program: PathBuf, sketch_size: u32) -> Self {
        Self {
            program,
            sketch_size,
        }
    }

    fn run(&self, command: MashCommand, output_prefix: &Utf8Path) -> Result<Utf8PathBuf, RefsketchError> {
        let output = sketch_path(output_prefix);
        // mash refuses to overwrite; anything here is left over from an aborted run
        fs_util::remove_file_if_exists(&output)?;
        run_checked("mash", Command::new(&self.program).args(command.args()))?;
        if !output.as_std_path().is_file() {
            return Err(RefsketchError::ToolFailed {
                tool: "mash".to_string(),
                message: format!("expected output {output} was not written"),
            });
        }
        Ok(output)
    }
}

impl SketchTool for MashTool {
    fn sketch(
        &self,
        input: &Utf8Path,
        id: &str,
        output_prefix: &Utf8Path,
    ) -> Result<Utf8PathBuf, RefsketchError> {
        let command = MashCommand::sketch(output_prefix)
            .option(MashOption::SketchSize(self.sketch_size))
            .option(MashOption::Identifier(id.to_string()))
            .input(input);
        self.run(command, output_prefix)
    }

    fn paste_list(
        &self,
        output_prefix: &Utf8Path,
        manifest: &Utf8Path,
    ) -> Result<Utf8PathBuf, RefsketchError> {
        let command =
            MashCommand::paste(output_prefix).option(MashOption::ListFile(manifest.to_path_buf()));
        self.run(command, output_prefix)
    }

    fn paste(
        &self,
        output_prefix: &Utf8Path,
        inputs: &[&Utf8Path],
    ) -> Result<Utf8PathBuf, RefsketchError> {
        let command = inputs
            .iter()
            .fold(MashCommand::paste(output_prefix), |cmd, input| cmd.input(input));
        self.run(command, output_prefix)
    }
}
