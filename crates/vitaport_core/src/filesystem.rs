use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

const MIB: f64 = 1024.0 * 1024.0;

/// Case-insensitive extension check; `extensions` are given without the dot.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|wanted| ext.eq_ignore_ascii_case(wanted))
        })
}

/// Every regular file under `dir` with one of `extensions`, in path order.
pub fn collect_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if has_extension(entry.path(), extensions) {
            out.push(entry.into_path());
        }
    }
    out.sort();
    Ok(out)
}

pub fn file_size(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len())
}

pub fn to_mib(bytes: u64) -> f64 {
    bytes as f64 / MIB
}

pub fn format_mib(bytes: u64) -> String {
    format!("{:.2} MB", to_mib(bytes))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RemovalReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<String>,
}

/// Delete each file, collecting failures instead of stopping at the first one.
pub fn remove_files(files: &[PathBuf]) -> RemovalReport {
    let mut report = RemovalReport::default();
    for file in files {
        let shown = file.to_string_lossy().replace('\\', "/");
        match fs::remove_file(file) {
            Ok(()) => {
                debug!("deleted {shown}");
                report.deleted.push(file.clone());
            }
            Err(error) => {
                warn!("failed to delete {shown}: {error}");
                report.failed.push(format!("{shown}: {error}"));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{collect_files, format_mib, has_extension, remove_files};

    #[test]
    fn has_extension_ignores_case() {
        assert!(has_extension(Path::new("a/B.RPA"), &["rpa"]));
        assert!(!has_extension(Path::new("a/b.rpy"), &["rpyc"]));
        assert!(!has_extension(Path::new("a/rpa"), &["rpa"]));
    }

    #[test]
    fn collect_files_walks_nested_dirs_sorted() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("b/c")).expect("mkdir");
        fs::write(temp.path().join("b/c/two.rpyc"), "").expect("write");
        fs::write(temp.path().join("a.rpyc"), "").expect("write");
        fs::write(temp.path().join("a.rpy"), "").expect("write");

        let found = collect_files(temp.path(), &["rpyc"]).expect("collect");
        assert_eq!(
            found,
            vec![temp.path().join("a.rpyc"), temp.path().join("b/c/two.rpyc")]
        );
        assert!(
            collect_files(&temp.path().join("missing"), &["rpyc"])
                .expect("missing dir")
                .is_empty()
        );
    }

    #[test]
    fn remove_files_reports_each_outcome() {
        let temp = tempdir().expect("tempdir");
        let present = temp.path().join("x.rpa");
        fs::write(&present, "").expect("write");
        let report = remove_files(&[present.clone(), temp.path().join("gone.rpa")]);
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(!present.exists());
        assert_eq!(format_mib(1024 * 1024 * 3 / 2), "1.50 MB");
    }
}
