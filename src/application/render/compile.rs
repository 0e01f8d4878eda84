//! Compilation stage: diagram source to PDF via pdflatex.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use super::{
    artifacts::ArtifactPaths,
    error::{RenderError, Stage},
    process::{self, ToolCommand},
};

const TIKZ_LIBRARIES: &str = "arrows,shapes,positioning,calc";

/// Wrap a diagram body in a standalone document that loads TikZ.
pub fn document(source: &str) -> String {
    format!(
        "\\documentclass[border=2pt]{{standalone}}\n\
         \\usepackage{{tikz}}\n\
         \\usetikzlibrary{{{TIKZ_LIBRARIES}}}\n\
         \\begin{{document}}\n\
         {source}\n\
         \\end{{document}}\n"
    )
}

#[derive(Debug, Clone)]
pub struct LatexCompiler {
    program: PathBuf,
    timeout: Duration,
}

impl LatexCompiler {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn command(&self, tex: &Path, output_dir: &Path) -> ToolCommand {
        let mut output_dir_arg = std::ffi::OsString::from("-output-directory=");
        output_dir_arg.push(output_dir);
        ToolCommand::new(&self.program)
            .arg("-interaction=nonstopmode")
            .arg("-no-shell-escape")
            .arg(output_dir_arg)
            .arg(tex)
    }

    /// Write `<base>.tex` and compile it, returning the path of `<base>.pdf`.
    pub async fn compile(&self, source: &str, paths: &ArtifactPaths) -> Result<PathBuf, RenderError> {
        let tex = paths.tex();
        tokio::fs::write(&tex, document(source))
            .await
            .map_err(|err| RenderError::io(Stage::Compile, err))?;

        let output_dir = paths.base().parent().unwrap_or_else(|| Path::new("."));
        process::run(&self.command(&tex, output_dir), self.timeout)
            .await
            .map_err(|err| RenderError::from_process(Stage::Compile, err))?;

        let pdf = paths.pdf();
        match tokio::fs::try_exists(&pdf).await {
            Ok(true) => Ok(pdf),
            Ok(false) => Err(RenderError::MissingOutput {
                stage: Stage::Compile,
                path: pdf.display().to_string(),
            }),
            Err(err) => Err(RenderError::io(Stage::Compile, err)),
        }
    }
}
