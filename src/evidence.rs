//! Evidence crops and the blob sink they are written through.
//!
//! The pipeline only ever calls `BlobSink::put`; where the bytes end up is
//! the caller's business. Blobs are content-addressed by SHA-256, so writing
//! the same crop twice yields the same reference.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

use crate::config::EvidenceSettings;
use crate::error::EvidenceError;
use crate::geometry::BBox;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Outline colour of annotated crops.
const OUTLINE: Rgb<u8> = Rgb([255, 0, 0]);
const OUTLINE_WIDTH: u32 = 2;

pub trait BlobSink: Send + Sync {
    /// Persist `bytes` and return a reference the caller can resolve later.
    fn put(&self, bytes: &[u8], content_type: &str) -> Result<String, EvidenceError>;
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        JPEG_CONTENT_TYPE => "jpg",
        "image/png" => "png",
        "application/json" => "json",
        _ => "bin",
    }
}

// ----------------------------------------------------------------------------
// Filesystem sink
// ----------------------------------------------------------------------------

/// Writes blobs as `<sha256>.<ext>` under a root directory.
pub struct FilesystemBlobSink {
    root: PathBuf,
}

impl FilesystemBlobSink {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, EvidenceError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            EvidenceError::PersistFailed(format!("create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobSink for FilesystemBlobSink {
    fn put(&self, bytes: &[u8], content_type: &str) -> Result<String, EvidenceError> {
        let name = format!("{}.{}", content_hash(bytes), extension_for(content_type));
        let path = self.root.join(name);
        if !path.exists() {
            write_atomic(&path, bytes)
                .map_err(|e| EvidenceError::PersistFailed(format!("write {}: {}", path.display(), e)))?;
        }
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Write through a uniquely named temp file in the target directory, then
/// rename over `path`. Concurrent writers of the same blob never share a temp
/// file; the last rename wins with identical bytes.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ----------------------------------------------------------------------------
// In-memory sink
// ----------------------------------------------------------------------------

/// Keeps blobs in memory under `mem://<sha256>` references.
#[derive(Default)]
pub struct MemoryBlobSink {
    blobs: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryBlobSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type and bytes stored under `reference`.
    pub fn get(&self, reference: &str) -> Option<(String, Vec<u8>)> {
        self.blobs.lock().ok()?.get(reference).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobSink for MemoryBlobSink {
    fn put(&self, bytes: &[u8], content_type: &str) -> Result<String, EvidenceError> {
        let reference = format!("mem://{}", content_hash(bytes));
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| EvidenceError::PersistFailed("memory sink poisoned".into()))?;
        blobs
            .entry(reference.clone())
            .or_insert_with(|| (content_type.to_string(), bytes.to_vec()));
        Ok(reference)
    }
}

// ----------------------------------------------------------------------------
// Crop rendering
// ----------------------------------------------------------------------------

/// Plain crop of `bbox` out of `image`. `None` when the box misses the image.
pub fn crop_region(image: &RgbImage, bbox: &BBox) -> Option<RgbImage> {
    let (x, y, w, h) = bbox.pixel_rect(image.width(), image.height())?;
    Some(imageops::crop_imm(image, x, y, w, h).to_image())
}

/// Crop the region around `bbox`, expanded by `crop_expand`, optionally with
/// the box outlined.
pub fn render_evidence(image: &RgbImage, bbox: &BBox, settings: &EvidenceSettings) -> Option<RgbImage> {
    let region = bbox.expand(settings.crop_expand);
    let (x, y, w, h) = region.pixel_rect(image.width(), image.height())?;
    let mut crop = imageops::crop_imm(image, x, y, w, h).to_image();
    if settings.annotate {
        let local = BBox::new(bbox.x1 - x as f32, bbox.y1 - y as f32, bbox.x2 - x as f32, bbox.y2 - y as f32);
        draw_outline(&mut crop, &local);
    }
    Some(crop)
}

fn draw_outline(image: &mut RgbImage, bbox: &BBox) {
    let Some((x, y, w, h)) = bbox.pixel_rect(image.width(), image.height()) else {
        return;
    };
    let (x2, y2) = (x + w - 1, y + h - 1);
    for t in 0..OUTLINE_WIDTH.min(w).min(h) {
        for px in x..=x2 {
            image.put_pixel(px, y + t, OUTLINE);
            image.put_pixel(px, y2 - t, OUTLINE);
        }
        for py in y..=y2 {
            image.put_pixel(x + t, py, OUTLINE);
            image.put_pixel(x2 - t, py, OUTLINE);
        }
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, EvidenceError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| EvidenceError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Render, encode and persist one evidence crop.
pub fn persist_evidence(
    sink: &dyn BlobSink,
    image: &RgbImage,
    bbox: &BBox,
    settings: &EvidenceSettings,
) -> Result<String, EvidenceError> {
    let crop = render_evidence(image, bbox, settings)
        .ok_or_else(|| EvidenceError::Encode("evidence region lies outside the frame".into()))?;
    let bytes = encode_jpeg(&crop, settings.jpeg_quality)?;
    sink.put(&bytes, JPEG_CONTENT_TYPE)
}
