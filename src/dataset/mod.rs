//! Folder dataset scanner
//!
//! Expects the InsightFace folder layout: one subdirectory per identity,
//! images inside. Class labels are assigned densely over the sorted
//! directory names so repeated scans of the same tree are deterministic.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// One image of the dataset: path on disk, name recorded in the output
/// archive, and the integer identity label.
#[derive(Debug, Clone)]
pub struct DatasetRecord {
    pub path: PathBuf,
    pub name: String,
    pub label: i64,
}

/// An ordered view over a folder-per-class image dataset
#[derive(Debug)]
pub struct FolderDataset {
    records: Vec<DatasetRecord>,
    num_classes: usize,
    source: String,
}

impl FolderDataset {
    /// Scan a dataset directory into ordered records
    pub fn scan(root: &Path) -> Result<Self> {
        anyhow::ensure!(root.is_dir(), "dataset path {:?} is not a directory", root);

        let class_dirs: Vec<PathBuf> = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.into_path())
            .collect();

        let mut records = Vec::new();
        let mut num_classes = 0usize;

        for class_dir in &class_dirs {
            let images: Vec<PathBuf> = WalkDir::new(class_dir)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
                .map(|e| e.into_path())
                .collect();

            if images.is_empty() {
                debug!("Skipping class dir without images: {:?}", class_dir);
                continue;
            }

            let label = num_classes as i64;
            num_classes += 1;
            for path in images {
                let name = path.display().to_string();
                records.push(DatasetRecord { path, name, label });
            }
        }

        let source = root
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
            .with_context(|| format!("cannot derive a dataset name from {:?}", root))?;

        Ok(Self {
            records,
            num_classes,
            source,
        })
    }

    /// Keep only the first `limit` records; `limit <= 0` means unlimited
    pub fn truncate(&mut self, limit: i64) {
        if limit > 0 && (limit as usize) < self.records.len() {
            self.records.truncate(limit as usize);
        }
    }

    pub fn records(&self) -> &[DatasetRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of identity classes seen at scan time
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Source identifier of the dataset (directory basename), used to derive
    /// the default output filename
    pub fn source(&self) -> &str {
        &self.source
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.iter().any(|known| *known == lower)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_dataset(classes: &[(&str, &[&str])]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (class, files) in classes {
            let class_dir = dir.path().join(class);
            fs::create_dir(&class_dir).unwrap();
            for file in *files {
                fs::write(class_dir.join(file), b"stub").unwrap();
            }
        }
        dir
    }

    #[test]
    fn test_scan_assigns_sorted_dense_labels() {
        let dir = make_dataset(&[
            ("carol", &["1.jpg"][..]),
            ("alice", &["2.jpg", "1.jpg"][..]),
            ("bob", &["1.png"][..]),
        ]);

        let dataset = FolderDataset::scan(dir.path()).unwrap();
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.num_classes(), 3);

        // alice=0, bob=1, carol=2; files sorted within each class
        let labels: Vec<i64> = dataset.records().iter().map(|r| r.label).collect();
        assert_eq!(labels, vec![0, 0, 1, 2]);
        assert!(dataset.records()[0].name.ends_with("1.jpg"));
        assert!(dataset.records()[1].name.ends_with("2.jpg"));
    }

    #[test]
    fn test_scan_ignores_non_images_and_empty_classes() {
        let dir = make_dataset(&[
            ("a", &["face.jpg", "notes.txt", "face.JPEG"][..]),
            ("b", &["readme.md"][..]),
            ("c", &["x.bmp"][..]),
        ]);

        let dataset = FolderDataset::scan(dir.path()).unwrap();
        // class "b" contributes nothing and gets no label
        assert_eq!(dataset.num_classes(), 2);
        assert_eq!(dataset.len(), 3);
        let labels: Vec<i64> = dataset.records().iter().map(|r| r.label).collect();
        assert_eq!(labels, vec![0, 0, 1]);
    }

    #[test]
    fn test_truncate_limits_records() {
        let dir = make_dataset(&[("a", &["1.jpg", "2.jpg", "3.jpg"][..])]);

        let mut dataset = FolderDataset::scan(dir.path()).unwrap();
        dataset.truncate(2);
        assert_eq!(dataset.len(), 2);

        // -1 and 0 leave the dataset untouched
        dataset.truncate(-1);
        dataset.truncate(0);
        assert_eq!(dataset.len(), 2);

        // a limit beyond the length is a no-op
        dataset.truncate(100);
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn test_scan_is_deterministic() {
        let dir = make_dataset(&[
            ("z", &["2.jpg", "1.jpg"][..]),
            ("a", &["b.jpg", "a.jpg"][..]),
        ]);

        let first = FolderDataset::scan(dir.path()).unwrap();
        let second = FolderDataset::scan(dir.path()).unwrap();
        let names_first: Vec<&str> = first.records().iter().map(|r| r.name.as_str()).collect();
        let names_second: Vec<&str> = second.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names_first, names_second);
    }

    #[test]
    fn test_source_is_directory_basename() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("faces_casia_112x112_folders");
        fs::create_dir(&root).unwrap();
        fs::create_dir(root.join("id0")).unwrap();
        fs::write(root.join("id0/1.jpg"), b"stub").unwrap();

        let dataset = FolderDataset::scan(&root).unwrap();
        assert_eq!(dataset.source(), "faces_casia_112x112_folders");
    }

    #[test]
    fn test_scan_rejects_missing_dir() {
        assert!(FolderDataset::scan(Path::new("/nonexistent/dataset")).is_err());
    }
}
