//! Compressed NPZ archive of extraction results
//!
//! Three parallel arrays, written once: `image_names` (zero-padded u8 rows,
//! byte-compatible with NumPy fixed-width `|S` strings), `image_classes`
//! (i64) and `embeddings` (f32 rows).

use std::fs::File;
use std::path::Path;

use anyhow::Result;
use ndarray::{Array1, Array2};
use ndarray_npy::{NpzReader, NpzWriter};

/// Extraction result: one name, class and embedding row per image,
/// consistently ordered
#[derive(Debug, Clone)]
pub struct EmbeddingSet {
    pub image_names: Vec<String>,
    pub image_classes: Vec<i64>,
    pub embeddings: Array2<f32>,
}

impl EmbeddingSet {
    pub fn len(&self) -> usize {
        self.image_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_names.is_empty()
    }

    pub fn embedding_dim(&self) -> usize {
        self.embeddings.ncols()
    }

    fn check_lengths(&self) -> Result<()> {
        anyhow::ensure!(
            self.image_names.len() == self.image_classes.len()
                && self.image_names.len() == self.embeddings.nrows(),
            "parallel arrays disagree: {} names, {} classes, {} embedding rows",
            self.image_names.len(),
            self.image_classes.len(),
            self.embeddings.nrows()
        );
        Ok(())
    }

    /// Write the archive (compressed NPZ)
    pub fn save(&self, path: &Path) -> Result<()> {
        self.check_lengths()?;

        let file = File::create(path)?;
        let mut npz = NpzWriter::new_compressed(file);
        npz.add_array("image_names", &names_to_bytes(&self.image_names))?;
        npz.add_array("image_classes", &Array1::from(self.image_classes.clone()))?;
        npz.add_array("embeddings", &self.embeddings)?;
        npz.finish()?;

        Ok(())
    }

    /// Read an archive back, re-validating the equal-length invariant
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut npz = NpzReader::new(file)?;

        let names_raw: Array2<u8> = npz.by_name("image_names")?;
        let classes: Array1<i64> = npz.by_name("image_classes")?;
        let embeddings: Array2<f32> = npz.by_name("embeddings")?;

        let set = Self {
            image_names: bytes_to_names(&names_raw),
            image_classes: classes.to_vec(),
            embeddings,
        };
        set.check_lengths()?;
        Ok(set)
    }
}

/// Pick the output path: a user-supplied destination gains the `.npz`
/// suffix if missing, otherwise the name is derived from the dataset source
/// identifier and the embedding dimensionality.
pub fn resolve_dest_file(dest: Option<&str>, source: &str, dim: usize) -> String {
    match dest {
        Some(d) if d.ends_with(".npz") => d.to_string(),
        Some(d) => format!("{}.npz", d),
        None => format!("{}_label_embs_{}.npz", source, dim),
    }
}

fn names_to_bytes(names: &[String]) -> Array2<u8> {
    let max_len = names.iter().map(|n| n.len()).max().unwrap_or(0).max(1);
    let mut arr = Array2::<u8>::zeros((names.len(), max_len));
    for (i, name) in names.iter().enumerate() {
        for (j, b) in name.as_bytes().iter().enumerate() {
            arr[[i, j]] = *b;
        }
    }
    arr
}

fn bytes_to_names(arr: &Array2<u8>) -> Vec<String> {
    arr.rows()
        .into_iter()
        .map(|row| {
            let bytes: Vec<u8> = row.iter().copied().take_while(|b| *b != 0).collect();
            String::from_utf8_lossy(&bytes).into_owned()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    fn sample_set() -> EmbeddingSet {
        EmbeddingSet {
            image_names: vec![
                "faces/alice/1.jpg".to_string(),
                "faces/bob/1.jpg".to_string(),
                "faces/bob/2.jpg".to_string(),
            ],
            image_classes: vec![0, 1, 1],
            embeddings: array![[0.1f32, 0.2, 0.3], [0.4, 0.5, 0.6], [0.7, 0.8, 0.9]],
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.npz");

        let set = sample_set();
        set.save(&path).unwrap();

        let loaded = EmbeddingSet::load(&path).unwrap();
        assert_eq!(loaded.image_names, set.image_names);
        assert_eq!(loaded.image_classes, set.image_classes);
        assert_eq!(loaded.embeddings, set.embeddings);
        assert_eq!(loaded.embedding_dim(), 3);

        // Bit-identical rows keep their geometry intact
        let sim = crate::utils::math::cosine_similarity(
            loaded.embeddings.row(0).as_slice().unwrap(),
            set.embeddings.row(0).as_slice().unwrap(),
        );
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_save_rejects_mismatched_lengths() {
        let mut set = sample_set();
        set.image_classes.pop();
        let dir = TempDir::new().unwrap();
        assert!(set.save(&dir.path().join("bad.npz")).is_err());
    }

    #[test]
    fn test_load_rejects_mismatched_arrays() {
        use ndarray::Array1;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.npz");

        // Hand-write an archive whose arrays disagree in length.
        let file = std::fs::File::create(&path).unwrap();
        let mut npz = NpzWriter::new_compressed(file);
        npz.add_array("image_names", &names_to_bytes(&["a.jpg".to_string()]))
            .unwrap();
        npz.add_array("image_classes", &Array1::from(vec![0i64, 1]))
            .unwrap();
        npz.add_array("embeddings", &array![[0.0f32, 1.0]]).unwrap();
        npz.finish().unwrap();

        assert!(EmbeddingSet::load(&path).is_err());
    }

    #[test]
    fn test_name_padding_round_trip() {
        let names = vec!["short.jpg".to_string(), "a/much/longer/path/img.jpeg".to_string()];
        let bytes = names_to_bytes(&names);
        assert_eq!(bytes.ncols(), names[1].len());
        assert_eq!(bytes_to_names(&bytes), names);
    }

    #[test]
    fn test_resolve_dest_file() {
        assert_eq!(
            resolve_dest_file(None, "faces_casia_112x112_folders", 512),
            "faces_casia_112x112_folders_label_embs_512.npz"
        );
        assert_eq!(resolve_dest_file(Some("out"), "ignored", 512), "out.npz");
        assert_eq!(resolve_dest_file(Some("out.npz"), "ignored", 512), "out.npz");
    }
}
