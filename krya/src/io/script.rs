//! Persists generated source to the shared script path.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Replace the script at `path` with `code`.
///
/// Writes a sibling temp file and renames it over the target, so a launcher
/// never observes a partially written script.
pub fn write_script(path: &Path, code: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("script path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;

    let mut contents = code.to_string();
    if !contents.ends_with('\n') {
        contents.push('\n');
    }
    let tmp_path = path.with_extension("py.tmp");
    fs::write(&tmp_path, &contents)
        .with_context(|| format!("write temp script {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace script {}", path.display()))?;
    debug!(path = %path.display(), bytes = contents.len(), "script written");
    Ok(())
}
