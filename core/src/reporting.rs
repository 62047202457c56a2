use crate::orchestrator::{RunSummary, StopCause};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportingError {
    #[error("io error for {}: {source}", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Human-readable end-of-run summary. Names are listed only for posts with
/// more than one image.
pub fn format_summary(summary: &RunSummary) -> String {
    let verb = if summary.dry_run { "prepared" } else { "published" };
    let mode = if summary.test_mode { " (test mode)" } else { "" };
    let mut lines = vec![format!(
        "{} posts were {}{}. Number of images in each post:",
        summary.posts, verb, mode
    )];
    for (images, names) in &summary.images_per_post {
        if *images > 1 {
            lines.push(format!("{}: {} posts ({})", images, names.len(), names.join(", ")));
        } else {
            lines.push(format!("{}: {} posts", images, names.len()));
        }
    }
    if summary.skipped > 0 {
        lines.push(format!("{} records skipped", summary.skipped));
    }
    if summary.failures > 0 {
        lines.push(format!("{} publish attempts failed", summary.failures));
    }
    match summary.stopped {
        Some(StopCause::Interrupted) => lines.push("Stopped early on request".to_string()),
        Some(StopCause::CircuitBreaker) => {
            lines.push("Stopped early after repeated failures".to_string())
        }
        None => {}
    }
    lines.join("\n")
}

pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", format_summary(summary));
}

pub fn write_json(summary: &RunSummary, output_path: &Path) -> Result<(), ReportingError> {
    let file = File::create(output_path).map_err(|source| ReportingError::Io {
        source,
        path: output_path.to_path_buf(),
    })?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, summary)?;
    Ok(())
}
