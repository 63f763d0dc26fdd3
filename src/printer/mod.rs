//! Printers: render execution results and session status to the terminal.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use crate::artifact::Artifact;
use crate::execution::{ExecutionResult, FailureKind};

pub struct TextPrinter {
    pub color: Option<String>,
}

impl TextPrinter {
    pub fn print(&self, text: &str) {
        if let Some(c) = self.color.as_deref() {
            match c {
                "green" => println!("{}", text.green()),
                "cyan" => println!("{}", text.cyan()),
                "magenta" => println!("{}", text.magenta()),
                "yellow" => println!("{}", text.yellow()),
                _ => println!("{}", text),
            }
        } else {
            println!("{}", text);
        }
    }
}

/// Progress line on stderr ("Loading...", "Running...").
pub fn status(message: &str) {
    eprintln!("{}", message.dimmed());
}

pub fn failure_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::PackageStaging => "package staging failed",
        FailureKind::GuestExecution => "last run failed",
        FailureKind::Timeout => "last run timed out",
    }
}

pub struct ResultPrinter<'a> {
    pub text: TextPrinter,
    /// Write decoded images here instead of printing a data URI.
    pub output: Option<&'a Path>,
    pub json: bool,
}

impl ResultPrinter<'_> {
    /// Render `result`; returns whether it was a success.
    pub fn print(&self, result: &ExecutionResult) -> Result<bool> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(result)?);
            return Ok(result.is_success());
        }
        match result {
            ExecutionResult::Success { artifact } => {
                self.print_artifact(artifact)?;
                Ok(true)
            }
            ExecutionResult::Failure { kind, description } => {
                eprintln!("{}: {}", failure_label(*kind).red().bold(), description);
                Ok(false)
            }
        }
    }

    fn print_artifact(&self, artifact: &Artifact) -> Result<()> {
        match (artifact, self.output) {
            (Artifact::Text { text }, _) => self.text.print(text),
            (Artifact::BinaryImage { .. }, Some(path)) => {
                let bytes = artifact
                    .decode_image()
                    .context("artifact is not an image")?
                    .context("image payload is not valid base64")?;
                fs::write(path, &bytes)
                    .with_context(|| format!("writing image to {}", path.display()))?;
                status(&format!("wrote {} bytes to {}", bytes.len(), path.display()));
            }
            (Artifact::BinaryImage { .. }, None) => {
                if let Some(uri) = artifact.data_uri() {
                    println!("{}", uri);
                }
            }
        }
        Ok(())
    }
}
