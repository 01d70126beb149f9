use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::raster::FileFormat;

/// Raster files (`.npy`, `.tif`, `.tiff`) under `directory`, sorted by path.
pub fn discover_rasters(directory: &Path) -> Vec<PathBuf> {
    let mut rasters: Vec<PathBuf> = WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .and_then(FileFormat::from_extension)
                .is_some()
        })
        .collect();

    // Sort by path for consistent ordering
    rasters.sort();
    rasters
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    #[test]
    fn test_discover_rasters() {
        let dir = tempdir().unwrap();

        File::create(dir.path().join("b.tif")).unwrap();
        File::create(dir.path().join("a.npy")).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();

        fs::create_dir(dir.path().join("2024")).unwrap();
        File::create(dir.path().join("2024/scene.TIFF")).unwrap();

        let rasters = discover_rasters(dir.path());
        let names: Vec<_> = rasters
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![PathBuf::from("2024/scene.TIFF"), PathBuf::from("a.npy"), PathBuf::from("b.tif")]
        );
    }
}
