use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::ImageReader;

use crate::date::{self, TimeZoneMode};
use crate::error::{Error, Result};
use crate::media::MediaItem;
use crate::metadata::TimestampMap;
use crate::watermark::Watermarker;

pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Create `dir`, or empty it if it already exists.
pub fn reset_output_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        return fs::create_dir_all(dir);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// First free name among `<stem>.jpg`, `<stem>_1.jpg`, `<stem>_2.jpg`, ... in `dir`.
pub fn unique_output_path(dir: &Path, stem: &str) -> PathBuf {
    let base = dir.join(format!("{}.jpg", stem));
    if !base.exists() {
        return base;
    }
    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{}_{}.jpg", stem, counter));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Decode `source`, draw the watermark and write it to `dest` as JPEG.
///
/// The image is flattened to 8-bit RGB first, so any alpha is dropped onto the
/// color values it already has. Nothing is written unless encoding succeeds.
pub fn render_watermarked(
    source: &Path,
    dest: &Path,
    watermarker: &Watermarker,
    quality: u8,
) -> Result<()> {
    let decoded = ImageReader::open(source)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| Error::image(source, e))?
        .decode()
        .map_err(|e| Error::image(source, e))?;

    let mut rgb = decoded.to_rgb8();
    watermarker.apply(&mut rgb);

    let mut bytes = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality))
        .map_err(|e| Error::image(source, e))?;
    fs::write(dest, bytes).map_err(|e| Error::image(source, e))?;
    Ok(())
}

/// Result of writing one media item.
#[derive(Debug, Clone)]
pub struct Written {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub epoch: f64,
}

/// Resolve the capture time of `item`, pick its output name and render it.
pub fn write_item(
    item: &MediaItem,
    timestamps: &TimestampMap,
    output_dir: &Path,
    tz: TimeZoneMode,
    watermarker: &Watermarker,
    quality: u8,
) -> Result<Written> {
    let captured = date::resolve_capture_time(&item.path, &item.filename, timestamps)
        .map_err(|e| Error::image(&item.path, e))?;
    let stem = date::format_stem(captured.epoch, tz).ok_or_else(|| {
        Error::image(&item.path, format!("timestamp {} out of range", captured.epoch))
    })?;

    let dest = unique_output_path(output_dir, &stem);
    render_watermarked(&item.path, &dest, watermarker, quality)?;

    // Stamp the file with its capture time; cosmetic, failures are ignored.
    let ft = filetime::FileTime::from_unix_time(captured.epoch.floor() as i64, 0);
    filetime::set_file_mtime(&dest, ft).ok();

    Ok(Written {
        source: item.path.clone(),
        dest,
        epoch: captured.epoch,
    })
}
