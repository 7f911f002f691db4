//! Pelican subprocess renderer.

use super::{check_status, RenderRequest, SiteRenderer, ToolError, ToolResult};
use log::{error, info};
use std::process::Command;
use std::time::Instant;

const DEFAULT_PROGRAM: &str = "pelican";

/// Runs `pelican <content_root> -s <config> [--debug]`.
#[derive(Debug, Clone)]
pub struct PelicanRenderer {
    program: String,
}

impl PelicanRenderer {
    pub fn new() -> Self {
        Self::with_program(DEFAULT_PROGRAM)
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, request: &RenderRequest<'_>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(request.content_root)
            .arg("-s")
            .arg(request.config_path);
        if request.debug {
            command.arg("--debug");
        }
        command
    }
}

impl Default for PelicanRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteRenderer for PelicanRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> ToolResult<()> {
        let started_at = Instant::now();
        info!(
            "event=render module=external status=start program={} debug={}",
            self.program, request.debug
        );
        let output = self
            .command(request)
            .output()
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        match check_status(&self.program, &output) {
            Ok(()) => {
                info!(
                    "event=render module=external status=ok duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=render module=external status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }
}
