use anyhow::{Result, Context};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Collect files under `root` whose extension is one of `extensions`.
///
/// Paths are relative to `root`. Matches are grouped by extension in the order
/// given, and sorted by path within each group. Extension matching ignores ASCII case.
pub fn enumerate_signable(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative_path = entry.path()
            .strip_prefix(root)
            .with_context(|| "Failed to strip prefix")?
            .to_path_buf();
        candidates.push(relative_path);
    }

    let mut files = Vec::new();
    for ext in extensions {
        files.extend(
            candidates.iter()
                .filter(|path| has_extension(path, ext))
                .cloned(),
        );
    }

    Ok(files)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}
