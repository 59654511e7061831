use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tempfile::TempPath;
use tokio::process::Command;

/// Paths that never ship to a target: VCS state, dependency caches, build
/// output, local secrets, runtime data.
pub const ARCHIVE_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "data",
    ".env",
    "*.log",
    "*.tar.gz",
    ".idea",
    ".vscode",
];

/// A packaged source tree. The underlying tar.gz is a temp file deleted on
/// drop, so it is cleaned up on every exit path, including failures
/// mid-upload.
pub struct SourceArchive {
    path: TempPath,
}

impl SourceArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Package `source_dir` as a tar.gz for upload.
pub async fn build_archive(source_dir: &Path) -> Result<SourceArchive> {
    if !source_dir.is_dir() {
        return Err(anyhow!("Source directory {:?} does not exist", source_dir));
    }

    let file = tempfile::Builder::new()
        .prefix("meshforge-")
        .suffix(".tar.gz")
        .tempfile()
        .context("Failed to create archive temp file")?;
    let path = file.into_temp_path();

    let mut cmd = Command::new("tar");
    cmd.arg("-czf").arg(path.as_os_str());
    for exclude in ARCHIVE_EXCLUDES {
        cmd.arg(format!("--exclude={}", exclude));
    }
    cmd.arg("-C").arg(source_dir).arg(".");

    let output = cmd.output().await.context("Failed to run tar")?;
    if !output.status.success() {
        return Err(anyhow!(
            "Archive build failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(SourceArchive { path })
}
