use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::TimestampMap;

/// Format of the output file stem.
pub const NAME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Timezone used to render capture times into file names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeZoneMode {
    #[default]
    Local,
    Utc,
}

/// Where a capture time came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    Metadata,
    FileCreated,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureTime {
    /// Seconds since the Unix epoch
    pub epoch: f64,
    pub source: TimestampSource,
}

fn system_time_to_epoch(t: SystemTime) -> f64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// Filesystem creation time, or modification time where creation is not recorded.
pub fn file_created(path: &Path) -> io::Result<f64> {
    let meta = fs::metadata(path)?;
    let t = meta.created().or_else(|_| meta.modified())?;
    Ok(system_time_to_epoch(t))
}

/// Look `filename` up in the metadata map, falling back to the file's creation time.
pub fn resolve_capture_time(
    path: &Path,
    filename: &str,
    timestamps: &TimestampMap,
) -> io::Result<CaptureTime> {
    if let Some(&epoch) = timestamps.get(filename) {
        return Ok(CaptureTime {
            epoch,
            source: TimestampSource::Metadata,
        });
    }
    Ok(CaptureTime {
        epoch: file_created(path)?,
        source: TimestampSource::FileCreated,
    })
}

/// Convert epoch seconds (fraction floored) to a UTC datetime.
pub fn to_datetime(epoch: f64) -> Option<DateTime<Utc>> {
    if !epoch.is_finite() {
        return None;
    }
    let floored = epoch.floor();
    if floored < i64::MIN as f64 || floored > i64::MAX as f64 {
        return None;
    }
    let nanos = ((epoch - floored) * 1e9) as u32;
    DateTime::from_timestamp(floored as i64, nanos.min(999_999_999))
}

/// Render the `YYYYMMDD_HHMMSS` stem for a capture time.
pub fn format_stem(epoch: f64, tz: TimeZoneMode) -> Option<String> {
    let utc = to_datetime(epoch)?;
    Some(match tz {
        TimeZoneMode::Utc => utc.format(NAME_FORMAT).to_string(),
        TimeZoneMode::Local => utc.with_timezone(&Local).format(NAME_FORMAT).to_string(),
    })
}
