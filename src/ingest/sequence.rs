use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

use super::source::FrameStream;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// A directory of still images decoded in file-name order.
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    next: usize,
    fps: f64,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("read image directory {}", dir.display()))?
        {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
                .unwrap_or(false);
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            anyhow::bail!("directory {} contains no png/jpg images", dir.display());
        }
        files.sort();
        Ok(Self {
            files,
            next: 0,
            fps,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameStream for ImageSequenceSource {
    fn native_fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let img = image::open(path).with_context(|| format!("decode {}", path.display()))?;
        Ok(Some(img.to_rgb8()))
    }
}
