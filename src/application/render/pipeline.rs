//! One end-to-end render: compile, convert, clean up.

use std::time::Instant;

use bytes::Bytes;
use metrics::histogram;
use tracing::{info, warn};

use crate::{
    config::RenderSettings,
    domain::{key::ArtifactKey, types::OutputFormat},
};

use super::{
    artifacts::{ArtifactWorkspace, CleanupGuard},
    compile::LatexCompiler,
    convert::ImageConverter,
    error::RenderError,
};

pub(crate) const METRIC_PIPELINE_MS: &str = "tikzrender_pipeline_ms";

#[derive(Debug, Clone)]
pub struct RenderPipeline {
    workspace: ArtifactWorkspace,
    compiler: LatexCompiler,
    converter: ImageConverter,
}

impl RenderPipeline {
    pub fn new(
        workspace: ArtifactWorkspace,
        compiler: LatexCompiler,
        converter: ImageConverter,
    ) -> Self {
        Self {
            workspace,
            compiler,
            converter,
        }
    }

    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self::new(
            ArtifactWorkspace::new(&settings.temp_dir),
            LatexCompiler::new(&settings.pdflatex_path, settings.compile_timeout),
            ImageConverter::new(
                &settings.pdf2svg_path,
                &settings.pdftoppm_path,
                settings.raster_dpi.get(),
                settings.convert_timeout,
            ),
        )
    }

    pub fn workspace(&self) -> &ArtifactWorkspace {
        &self.workspace
    }

    /// Run both stages for `source`. Artifacts under the key's base path are
    /// removed before this returns, whatever the outcome.
    pub async fn run(
        &self,
        key: &ArtifactKey,
        source: &str,
        format: OutputFormat,
    ) -> Result<Bytes, RenderError> {
        let started_at = Instant::now();
        let guard = CleanupGuard::new(self.workspace.paths(key));

        let result = async {
            let pdf = self.compiler.compile(source, guard.paths()).await?;
            self.converter.convert(&pdf, guard.paths(), format).await
        }
        .await;
        drop(guard);

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!(METRIC_PIPELINE_MS, "format" => format.as_str()).record(elapsed_ms as f64);

        match &result {
            Ok(bytes) => info!(
                target = "tikzrender::render::pipeline",
                op = "pipeline::run",
                result = "ok",
                key = %key,
                format = format.as_str(),
                output_bytes = bytes.len(),
                elapsed_ms,
                "Rendered diagram"
            ),
            Err(err) => warn!(
                target = "tikzrender::render::pipeline",
                op = "pipeline::run",
                result = "error",
                key = %key,
                format = format.as_str(),
                error_code = err.code(),
                error = %err,
                elapsed_ms,
                "Diagram render failed"
            ),
        }

        result
    }
}
