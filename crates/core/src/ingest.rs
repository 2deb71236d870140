use crate::extractor::{load_file, FileType};
use crate::models::Document;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every supported file under `folder`, recursively, in path order.
pub fn discover_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if FileType::from_path(entry.path()).is_some() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub files_loaded: usize,
    pub skipped: Vec<SkippedFile>,
}

/// Loads every supported file under `folder`. A file that fails to load is
/// recorded in `skipped` and the rest of the folder is still read.
pub fn load_folder_best_effort(folder: &Path) -> LoadReport {
    let files = discover_files(folder);
    if files.is_empty() {
        tracing::warn!(folder = %folder.display(), "no supported files found");
    }

    let mut report = LoadReport::default();
    for path in files {
        match load_file(&path) {
            Ok(documents) => {
                tracing::debug!(
                    path = %path.display(),
                    documents = documents.len(),
                    "loaded file"
                );
                report.files_loaded += 1;
                report.documents.extend(documents);
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "skipping file");
                report.skipped.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    tracing::info!(
        files = report.files_loaded,
        documents = report.documents.len(),
        skipped = report.skipped.len(),
        "loaded folder"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discovers_supported_files_recursively() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("nested/deeper"))?;
        fs::write(dir.path().join("b.TXT"), "b")?;
        fs::write(dir.path().join("nested/a.csv"), "h\nv")?;
        fs::write(dir.path().join("nested/deeper/c.pdf"), "x")?;
        fs::write(dir.path().join("nested/skip.md"), "x")?;

        let files = discover_files(dir.path());
        let names: Vec<_> = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect();
        assert_eq!(names, vec!["b.TXT", "a.csv", "c.pdf"]);
        Ok(())
    }

    #[test]
    fn broken_file_is_skipped_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("broken.pdf"), b"%PDF-1.4\n%broken")?;
        fs::write(dir.path().join("notes.txt"), "The cat sat on the mat.")?;
        fs::write(dir.path().join("table.csv"), "name,role\nada,engineer\n")?;

        let report = load_folder_best_effort(dir.path());
        assert_eq!(report.files_loaded, 2);
        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("broken.pdf"));
        assert!(!report.skipped[0].reason.is_empty());
        Ok(())
    }

    #[test]
    fn empty_folder_yields_empty_report() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let report = load_folder_best_effort(dir.path());
        assert!(report.documents.is_empty());
        assert!(report.skipped.is_empty());
        Ok(())
    }
}
