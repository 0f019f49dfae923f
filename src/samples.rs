//! On-disk store for (image, label) samples collected from live sessions.
//!
//! Layout is one directory per class label, `<root>/<LABEL>/<name>.png`,
//! which is what dataset loaders for image classification expect.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use image::{ImageFormat, RgbImage};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{RecognitionError, Result};
use crate::model::{CLASSES, class_index};

pub struct SampleStore {
    root: PathBuf,
    sequence: AtomicU64,
}

impl SampleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), sequence: AtomicU64::new(0) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write one sample and return its path.
    ///
    /// # Errors
    /// Returns [`RecognitionError::UnknownClass`] for labels outside the 36
    /// classes, or [`RecognitionError::SampleStore`] if the file can't be written.
    pub fn collect(&self, image: &RgbImage, label: &str) -> Result<PathBuf> {
        let label = parse_label(label)?;
        let dir = self.root.join(label.to_string());
        std::fs::create_dir_all(&dir).map_err(|e| RecognitionError::SampleStore(format!("{}: {}", dir.display(), e)))?;

        let stamp = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{}_{}_{}.png", label, stamp, seq));

        image.save_with_format(&path, ImageFormat::Png).map_err(|e| RecognitionError::SampleStore(format!("{}: {}", path.display(), e)))?;
        debug!("Stored sample {}", path.display());
        Ok(path)
    }

    /// Number of stored samples per label. Labels without a directory count zero.
    pub fn counts(&self) -> Result<BTreeMap<char, usize>> {
        let mut counts = BTreeMap::new();
        for label in CLASSES {
            let dir = self.root.join(label.to_string());
            let count = match std::fs::read_dir(&dir) {
                Ok(entries) => entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "png"))
                    .count(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                Err(e) => return Err(RecognitionError::SampleStore(format!("{}: {}", dir.display(), e))),
            };
            counts.insert(label, count);
        }
        Ok(counts)
    }
}

/// A single class label, case-insensitive.
fn parse_label(label: &str) -> Result<char> {
    let mut chars = label.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if class_index(c).is_some() => Ok(c.to_ascii_uppercase()),
        _ => Err(RecognitionError::UnknownClass(label.to_string())),
    }
}
