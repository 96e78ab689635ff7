//! Output directory layout: `<root>/Batch_<n>/Layer_<m>/image_<k>.jpg`.
//!
//! Batch numbers are the lowest unused integer starting at 1, layer folders
//! are numbered 1-based from the 0-based wire index, and the image counter
//! is monotonic across the whole session. Folders are only ever created,
//! never removed or renamed, while a session is running.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

/// Filesystem layout of one capture session (one batch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLayout {
    batch_dir: PathBuf,
    layer_dirs: Vec<PathBuf>,
}

impl BatchLayout {
    /// Scans `root` for the lowest unused `Batch_<n>` name and creates it.
    ///
    /// Race-free for a single process; concurrent processes sharing a root
    /// are out of scope.
    pub fn allocate(root: &Path) -> io::Result<Self> {
        let mut batch_number = 1u32;
        loop {
            let candidate = root.join(format!("Batch_{batch_number}"));
            if !candidate.exists() {
                fs::create_dir_all(&candidate)?;
                info!(batch_dir = %candidate.display(), "allocated batch directory");
                return Ok(Self {
                    batch_dir: candidate,
                    layer_dirs: Vec::new(),
                });
            }
            batch_number += 1;
        }
    }

    pub fn batch_dir(&self) -> &Path {
        &self.batch_dir
    }

    /// Number of layer folders created so far.
    pub fn layer_count(&self) -> usize {
        self.layer_dirs.len()
    }

    /// Creates `Layer_<m>` folders lazily up to and including the 0-based
    /// `layer` index, and returns the folder for that layer.
    ///
    /// Idempotent: re-creating an existing folder is a no-op. Gaps are
    /// filled so a PLC that skips indices still gets a dense tree.
    pub fn ensure_layer(&mut self, layer: usize) -> io::Result<&Path> {
        while self.layer_dirs.len() <= layer {
            let dir = self
                .batch_dir
                .join(format!("Layer_{}", self.layer_dirs.len() + 1));
            fs::create_dir_all(&dir)?;
            self.layer_dirs.push(dir);
        }
        Ok(&self.layer_dirs[layer])
    }

    /// Deterministic destination for one capture: the layer folder plus the
    /// monotonic image counter. The layer folder must already exist.
    pub fn image_path(&self, layer: usize, image_counter: u32) -> Option<PathBuf> {
        self.layer_dirs
            .get(layer)
            .map(|dir| dir.join(format!("image_{image_counter}.jpg")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocates_lowest_unused_batch_number() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("Batch_1")).unwrap();
        fs::create_dir(root.path().join("Batch_3")).unwrap();

        let layout = BatchLayout::allocate(root.path()).unwrap();
        assert_eq!(layout.batch_dir(), root.path().join("Batch_2"));
        assert!(root.path().join("Batch_2").is_dir());
    }

    #[test]
    fn batches_from_separate_sessions_do_not_collide() {
        let root = tempdir().unwrap();
        let first = BatchLayout::allocate(root.path()).unwrap();
        let second = BatchLayout::allocate(root.path()).unwrap();
        assert_ne!(first.batch_dir(), second.batch_dir());
    }

    #[test]
    fn ensure_layer_is_idempotent_and_fills_gaps() {
        let root = tempdir().unwrap();
        let mut layout = BatchLayout::allocate(root.path()).unwrap();

        let dir = layout.ensure_layer(0).unwrap().to_path_buf();
        assert_eq!(dir, layout.batch_dir().join("Layer_1"));
        assert_eq!(layout.ensure_layer(0).unwrap(), dir);
        assert_eq!(layout.layer_count(), 1);

        // Jumping to layer index 3 creates the skipped folders too.
        layout.ensure_layer(3).unwrap();
        assert_eq!(layout.layer_count(), 4);
        for m in 1..=4 {
            assert!(layout.batch_dir().join(format!("Layer_{m}")).is_dir());
        }
    }

    #[test]
    fn image_paths_use_the_monotonic_counter() {
        let root = tempdir().unwrap();
        let mut layout = BatchLayout::allocate(root.path()).unwrap();
        layout.ensure_layer(1).unwrap();

        assert_eq!(
            layout.image_path(1, 7),
            Some(layout.batch_dir().join("Layer_2").join("image_7.jpg"))
        );
        assert_eq!(layout.image_path(5, 1), None);
    }
}
