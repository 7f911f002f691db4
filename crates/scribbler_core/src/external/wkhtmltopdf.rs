//! wkhtmltopdf subprocess converter.

use super::{check_status, PdfConverter, PdfOptions, ToolError, ToolResult};
use log::{debug, error};
use std::path::Path;
use std::process::Command;
use std::time::Instant;

const DEFAULT_PROGRAM: &str = "wkhtmltopdf";

/// Runs `wkhtmltopdf [flags] <source> <dest>`.
#[derive(Debug, Clone)]
pub struct WkhtmltopdfConverter {
    program: String,
}

impl WkhtmltopdfConverter {
    pub fn new() -> Self {
        Self::with_program(DEFAULT_PROGRAM)
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, source: &Path, dest: &Path, options: &PdfOptions) -> Command {
        let mut command = Command::new(&self.program);
        command.args(options.to_args()).arg(source).arg(dest);
        command
    }
}

impl Default for WkhtmltopdfConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfConverter for WkhtmltopdfConverter {
    fn convert(&self, source: &Path, dest: &Path, options: &PdfOptions) -> ToolResult<()> {
        let started_at = Instant::now();
        let output = self
            .command(source, dest, options)
            .output()
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Err(err) = check_status(&self.program, &output) {
            error!(
                "event=convert module=external status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }
        if !dest.is_file() {
            return Err(ToolError::MissingOutput {
                program: self.program.clone(),
                path: dest.to_path_buf(),
            });
        }

        debug!(
            "event=convert module=external status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::WkhtmltopdfConverter;
    use crate::external::PdfOptions;
    use std::path::Path;

    #[test]
    fn flags_precede_source_and_destination() {
        let mut options = PdfOptions::new();
        options.set("page-size", Some("Letter".to_string()));
        let command =
            WkhtmltopdfConverter::new().command(Path::new("in.html"), Path::new("out.pdf"), &options);
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["--page-size", "Letter", "in.html", "out.pdf"]);
    }
}
