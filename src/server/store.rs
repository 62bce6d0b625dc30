//! # Persistence Store
//!
//! Filesystem-backed storage for captures, thumbnails and overlays.
//!
//! ## Naming
//!
//! Captures are stored as `capture_<ms>.<ext>`. The millisecond stamp comes
//! from a process-wide monotonic clock, so two saves in the same process never
//! share a name even when they land in the same millisecond. A name that
//! already exists on disk (another process, a restored backup) is skipped.
//!
//! ## Durability
//!
//! Bytes are written to a hidden temporary file in the destination directory,
//! synced, then renamed into place. Readers either see the complete file or
//! nothing. Temporary files start with `.` and are therefore never listed.

use log::{debug, info};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::config::StorageConfig;
use crate::processing::sniff::ImageFormat;

const CAPTURE_PREFIX: &str = "capture_";
const THUMB_SUFFIX: &str = "_thumb.jpg";
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

pub struct PersistenceStore {
    upload_dir: PathBuf,
    thumbnail_dir: PathBuf,
    overlay_dir: PathBuf,
    /// Last stamp handed out, in milliseconds since epoch
    last_stamp: AtomicI64,
}

impl PersistenceStore {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            upload_dir: storage.upload_dir.clone(),
            thumbnail_dir: storage.thumbnail_dir.clone(),
            overlay_dir: storage.overlay_dir.clone(),
            last_stamp: AtomicI64::new(0),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn thumbnail_dir(&self) -> &Path {
        &self.thumbnail_dir
    }

    pub fn overlay_dir(&self) -> &Path {
        &self.overlay_dir
    }

    /// Create the upload, thumbnail and overlay directories if absent.
    ///
    /// Idempotent: existing directories and their contents are left alone.
    pub async fn provision(&self) -> io::Result<()> {
        for dir in [&self.upload_dir, &self.thumbnail_dir, &self.overlay_dir] {
            fs::create_dir_all(dir).await?;
            debug!("📁 Storage directory ready: {}", dir.display());
        }
        Ok(())
    }

    /// Persist a full image and return its filename.
    ///
    /// The extension is derived from the sniffed `format`, never from the
    /// client's declaration. An unrecognised format is refused with
    /// [`io::ErrorKind::InvalidInput`] and nothing is written.
    pub async fn save(&self, bytes: &[u8], format: ImageFormat) -> io::Result<String> {
        let extension = format.extension().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "refusing to store unrecognised image")
        })?;
        loop {
            let name = format!("{}{}.{}", CAPTURE_PREFIX, self.next_stamp(), extension);
            if fs::try_exists(self.upload_dir.join(&name)).await? {
                debug!("Name {} already taken, bumping stamp", name);
                continue;
            }
            write_atomic(&self.upload_dir, &name, bytes).await?;
            return Ok(name);
        }
    }

    /// Persist a thumbnail for the capture named `base_filename`.
    ///
    /// Independent of [`save`](Self::save): a failure here leaves the main
    /// image untouched.
    pub async fn save_thumbnail(&self, bytes: &[u8], base_filename: &str) -> io::Result<String> {
        let name = thumbnail_name_for(base_filename);
        write_atomic(&self.thumbnail_dir, &name, bytes).await?;
        Ok(name)
    }

    /// Stored capture filenames, unordered.
    pub async fn list(&self) -> io::Result<Vec<String>> {
        list_images_in(&self.upload_dir).await
    }

    /// Stored capture filenames, oldest capture first.
    pub async fn list_oldest_first(&self) -> io::Result<Vec<String>> {
        let mut names = self.list().await?;
        names.sort_by(|a, b| (capture_stamp(a), a.as_str()).cmp(&(capture_stamp(b), b.as_str())));
        Ok(names)
    }

    /// Overlay filenames, unordered.
    pub async fn list_overlays(&self) -> io::Result<Vec<String>> {
        list_images_in(&self.overlay_dir).await
    }

    fn next_stamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }
}

/// `capture_123.png` -> `capture_123_thumb.jpg`
pub fn thumbnail_name_for(filename: &str) -> String {
    let stem = match filename.rfind('.') {
        Some(idx) if idx > 0 => &filename[..idx],
        _ => filename,
    };
    format!("{}{}", stem, THUMB_SUFFIX)
}

/// Visible file with a recognised image extension.
pub fn is_image_name(name: &str) -> bool {
    if name.starts_with('.') {
        return false;
    }
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn capture_stamp(name: &str) -> Option<i64> {
    let rest = name.strip_prefix(CAPTURE_PREFIX)?;
    let digits: &str = &rest[..rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len())];
    digits.parse().ok()
}

async fn list_images_in(dir: &Path) -> io::Result<Vec<String>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut names = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !is_image_name(&name) {
            continue;
        }
        // Follows symlinks so a linked overlay still counts as a file
        match fs::metadata(entry.path()).await {
            Ok(meta) if meta.is_file() => names.push(name),
            _ => {}
        }
    }

    Ok(names)
}

async fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<()> {
    let tmp = dir.join(format!(".{}.{:08x}.tmp", name, rand::random::<u32>()));

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, dir.join(name)).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp).await;
    } else {
        info!("💾 Wrote {} ({} bytes) to {}", name, bytes.len(), dir.display());
    }
    result
}
