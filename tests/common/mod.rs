#![allow(dead_code)]

use std::{
    fs,
    num::NonZeroUsize,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tempfile::TempDir;
use tikzrender::{
    application::render::{
        ArtifactWorkspace, ImageConverter, LatexCompiler, RenderPipeline, RenderService,
    },
    cache::{CacheConfig, ResultCache},
    domain::validation::{DEFAULT_MAX_SOURCE_BYTES, SourceValidator},
};

pub const FAKE_SVG: &str = "<svg xmlns=\"http://www.w3.org/2000/svg\"/>";
pub const FAKE_PNG: &[u8] = b"\x89PNG-fake";

#[derive(Debug, Clone, Copy)]
pub enum Latex {
    /// Writes pdf, aux and log next to the tex file.
    Ok,
    /// Like `Ok` but sleeps first so jobs overlap.
    Delayed,
    /// Writes a log then exits 1 with a LaTeX error on stdout.
    Fails,
    /// Never finishes on its own.
    Hangs,
    /// Exits 0 without producing a pdf.
    NoPdf,
}

#[derive(Debug, Clone, Copy)]
pub enum Convert {
    Ok,
    Fails,
}

/// Shell scripts standing in for pdflatex, pdf2svg and pdftoppm. Every
/// invocation appends the tool name to `calls.log`.
pub struct FakeToolchain {
    dir: TempDir,
    pub pdflatex: PathBuf,
    pub pdf2svg: PathBuf,
    pub pdftoppm: PathBuf,
}

impl FakeToolchain {
    pub fn new(latex: Latex, convert: Convert) -> Self {
        let dir = TempDir::new().expect("toolchain dir");
        let calls = dir.path().join("calls.log");
        let log = |tool: &str| format!("echo {tool} >> '{}'", calls.display());

        let latex_body = match latex {
            Latex::Ok | Latex::Delayed => format!(
                "{}\n{}for arg in \"$@\"; do tex=\"$arg\"; done\nbase=\"${{tex%.tex}}\"\nprintf '%%PDF-fake' > \"$base.pdf\"\nprintf 'aux' > \"$base.aux\"\nprintf 'log' > \"$base.log\"",
                log("pdflatex"),
                if matches!(latex, Latex::Delayed) {
                    "sleep 0.2\n"
                } else {
                    ""
                },
            ),
            Latex::Fails => format!(
                "{}\nfor arg in \"$@\"; do tex=\"$arg\"; done\nbase=\"${{tex%.tex}}\"\nprintf 'log' > \"$base.log\"\necho '! Undefined control sequence.'\nexit 1",
                log("pdflatex")
            ),
            Latex::Hangs => format!("{}\nexec sleep 30", log("pdflatex")),
            Latex::NoPdf => format!(
                "{}\nfor arg in \"$@\"; do tex=\"$arg\"; done\nbase=\"${{tex%.tex}}\"\nprintf 'aux' > \"$base.aux\"",
                log("pdflatex")
            ),
        };

        let (svg_body, png_body) = match convert {
            Convert::Ok => (
                format!("{}\nprintf '{FAKE_SVG}' > \"$2\"", log("pdf2svg")),
                format!("{}\nprintf '\\211PNG-fake' > \"$2.png\"", log("pdftoppm")),
            ),
            Convert::Fails => (
                format!(
                    "{}\nprintf 'partial' > \"$2\"\necho 'Syntax Error: broken pdf' >&2\nexit 2",
                    log("pdf2svg")
                ),
                format!(
                    "{}\necho 'Syntax Error: broken pdf' >&2\nexit 99",
                    log("pdftoppm")
                ),
            ),
        };

        let pdflatex = script(dir.path(), "pdflatex", &latex_body);
        let pdf2svg = script(dir.path(), "pdf2svg", &svg_body);
        let pdftoppm = script(dir.path(), "pdftoppm", &png_body);

        Self {
            dir,
            pdflatex,
            pdf2svg,
            pdftoppm,
        }
    }

    /// Tool names in invocation order.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("calls.log"))
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn pipeline(&self, temp_dir: &Path, timeout: Duration) -> RenderPipeline {
        RenderPipeline::new(
            ArtifactWorkspace::new(temp_dir),
            LatexCompiler::new(&self.pdflatex, timeout),
            ImageConverter::new(&self.pdf2svg, &self.pdftoppm, 300, timeout),
        )
    }

    pub fn service(
        &self,
        temp_dir: &Path,
        concurrency: usize,
        coalesce_identical: bool,
    ) -> RenderService {
        self.service_with_timeout(
            temp_dir,
            concurrency,
            coalesce_identical,
            Duration::from_secs(10),
        )
    }

    pub fn service_with_timeout(
        &self,
        temp_dir: &Path,
        concurrency: usize,
        coalesce_identical: bool,
        timeout: Duration,
    ) -> RenderService {
        RenderService::new(
            SourceValidator::with_default_patterns(DEFAULT_MAX_SOURCE_BYTES)
                .expect("default patterns compile"),
            cache(),
            self.pipeline(temp_dir, timeout),
            NonZeroUsize::new(concurrency).expect("non-zero concurrency"),
            coalesce_identical,
        )
    }
}

pub fn cache() -> Arc<ResultCache> {
    Arc::new(ResultCache::new(CacheConfig {
        ttl: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(60),
        capacity: 64,
    }))
}

/// Files left under `dir`, sorted.
pub fn leftover_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("set perms");
    path
}
