use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Replace `path` with `contents` via a sibling temp file and a rename, so a
/// crash mid-write never leaves a truncated file behind.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Invalid file path {:?}", path))?;
    let tmp = path.with_file_name(format!("{}.tmp", file_name));

    fs::write(&tmp, contents).with_context(|| format!("Failed to write {:?}", tmp))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to replace {:?}", path));
    }
    Ok(())
}
