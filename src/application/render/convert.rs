//! Conversion stage: PDF to SVG (pdf2svg) or PNG (pdftoppm).

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use bytes::Bytes;

use crate::domain::types::OutputFormat;

use super::{
    artifacts::ArtifactPaths,
    error::{RenderError, Stage},
    process::{self, ToolCommand},
};

pub const DEFAULT_RASTER_DPI: u32 = 300;

#[derive(Debug, Clone)]
pub struct ImageConverter {
    pdf2svg: PathBuf,
    pdftoppm: PathBuf,
    dpi: u32,
    timeout: Duration,
}

impl ImageConverter {
    pub fn new(
        pdf2svg: impl Into<PathBuf>,
        pdftoppm: impl Into<PathBuf>,
        dpi: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            pdf2svg: pdf2svg.into(),
            pdftoppm: pdftoppm.into(),
            dpi,
            timeout,
        }
    }

    pub fn command(&self, format: OutputFormat, pdf: &Path, paths: &ArtifactPaths) -> ToolCommand {
        match format {
            OutputFormat::Svg => ToolCommand::new(&self.pdf2svg)
                .arg(pdf)
                .arg(paths.output(OutputFormat::Svg)),
            // pdftoppm appends the extension to the output root itself.
            OutputFormat::Png => ToolCommand::new(&self.pdftoppm)
                .arg(pdf)
                .arg(paths.base())
                .arg("-png")
                .arg("-singlefile")
                .arg("-r")
                .arg(self.dpi.to_string()),
        }
    }

    /// Convert `pdf` and read back the produced image.
    pub async fn convert(
        &self,
        pdf: &Path,
        paths: &ArtifactPaths,
        format: OutputFormat,
    ) -> Result<Bytes, RenderError> {
        process::run(&self.command(format, pdf, paths), self.timeout)
            .await
            .map_err(|err| RenderError::from_process(Stage::Convert, err))?;

        let output = paths.output(format);
        match tokio::fs::read(&output).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(RenderError::MissingOutput {
                    stage: Stage::Convert,
                    path: output.display().to_string(),
                })
            }
            Err(err) => Err(RenderError::io(Stage::Convert, err)),
        }
    }
}
