pub mod date;
pub mod error;
pub mod extract;
pub mod media;
pub mod metadata;
pub mod watermark;
pub mod writer;

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

pub use date::TimeZoneMode;
pub use error::{Error, Result};
pub use extract::{BackupMatcher, PrefixMatcher};
pub use watermark::WatermarkOptions;

/// Name of the output directory, relative to the working directory.
pub const DEFAULT_OUTPUT_DIR: &str = "images";

fn default_output() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_backup_prefix() -> String {
    extract::DEFAULT_BACKUP_PREFIX.to_string()
}

fn default_quality() -> u8 {
    writer::DEFAULT_JPEG_QUALITY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Instagram export archive (tar, optionally compressed)
    #[serde(default)]
    pub archive: PathBuf,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Name prefix of the backup folder inside the archive
    #[serde(default = "default_backup_prefix")]
    pub backup_prefix: String,
    #[serde(default)]
    pub timezone: TimeZoneMode,
    #[serde(default)]
    pub watermark: WatermarkOptions,
    #[serde(default = "default_quality")]
    pub jpeg_quality: u8,
}

impl ProcessOptions {
    pub fn new(archive: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
            output: default_output(),
            backup_prefix: default_backup_prefix(),
            timezone: TimeZoneMode::default(),
            watermark: WatermarkOptions::default(),
            jpeg_quality: default_quality(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Archive members skipped as unsafe
    pub members_rejected: u64,
    pub timestamps_loaded: u64,
    /// False when the backup has no `media/` folder
    pub media_root_found: bool,
    pub images_found: u64,
    pub images_written: u64,
    pub images_failed: u64,
}

/// Type alias for progress callback
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Throttled progress reporter: emits at most every 200ms, plus every stage completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: std::cell::Cell<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        Self {
            inner,
            last_emit: std::cell::Cell::new(Instant::now() - std::time::Duration::from_secs(1)),
        }
    }

    /// `total == 0` means the total is not known yet; such reports are throttled too.
    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = total > 0 && current >= total;
        if !is_done {
            if self.last_emit.get().elapsed().as_millis() < 200 {
                return;
            }
            self.last_emit.set(Instant::now());
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Run the full pipeline, locating the backup folder by `options.backup_prefix`.
pub fn process(options: &ProcessOptions, progress_callback: &ProgressCallback) -> Result<ProcessResult> {
    let matcher = PrefixMatcher(options.backup_prefix.clone());
    process_with_matcher(options, &matcher, progress_callback)
}

/// Run the full pipeline with a custom backup folder predicate.
///
/// The extraction directory lives until this function returns and is removed
/// on every path out of it.
pub fn process_with_matcher(
    options: &ProcessOptions,
    matcher: &dyn BackupMatcher,
    progress_callback: &ProgressCallback,
) -> Result<ProcessResult> {
    let tp = ThrottledProgress::new(progress_callback);

    if !options.archive.exists() {
        return Err(Error::MissingFile(options.archive.clone()));
    }

    // Stage 1: Extract
    tp.report("extract", 0, 1, "Extracting archive");
    let extracted = extract::extract_backup(&options.archive, matcher)?;
    tp.report("extract", 1, 1, "Archive extracted");
    tracing::info!("Extracted backup to {}", extracted.backup_dir().display());

    let mut result = ProcessResult {
        members_rejected: extracted.rejected.len() as u64,
        ..ProcessResult::default()
    };

    writer::reset_output_dir(&options.output)?;

    // Stage 2: Metadata
    let timestamps = metadata::load_timestamps(extracted.backup_dir());
    result.timestamps_loaded = timestamps.len() as u64;
    tracing::info!("Loaded {} timestamps from metadata", timestamps.len());

    let media_root = media::media_root(extracted.backup_dir());
    if !media_root.is_dir() {
        tracing::warn!("{}", Error::MediaRootMissing(extracted.backup_dir().to_path_buf()));
        return Ok(result);
    }
    result.media_root_found = true;

    // Stage 3: Walk + watermark
    let watermarker = watermark::Watermarker::new(options.watermark.clone());
    for item in media::walk_media(extracted.backup_dir()) {
        result.images_found += 1;
        tp.report("watermark", result.images_found, 0, &item.filename);

        match writer::write_item(
            &item,
            &timestamps,
            &options.output,
            options.timezone,
            &watermarker,
            options.jpeg_quality,
        ) {
            Ok(written) => {
                result.images_written += 1;
                let name = written
                    .dest
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                tracing::info!("Successfully processed: {} -> {}", item.filename, name);
            }
            Err(e) => {
                result.images_failed += 1;
                tracing::warn!("{e}");
            }
        }
    }
    tp.report("watermark", result.images_found, result.images_found, "Done");

    if let Err(e) = extracted.close() {
        tracing::debug!("Could not remove extraction directory: {e}");
    }

    Ok(result)
}
