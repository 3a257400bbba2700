use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::Error;

/// Metadata documents inside the backup folder, in processing order.
pub const METADATA_DOCUMENTS: &[&str] = &[
    "your_instagram_activity/media/posts_1.json",
    "your_instagram_activity/media/stories.json",
    "your_instagram_activity/media/profile_photos.json",
];

/// Media file name (last path component of its uri) -> capture time in epoch seconds.
///
/// Keys carry no directory, so two exported files sharing a name in different
/// folders collapse into one entry and the later document wins.
pub type TimestampMap = HashMap<String, f64>;

#[derive(Debug, Deserialize)]
struct PostRecord {
    #[serde(default)]
    media: Vec<MediaRecord>,
}

#[derive(Debug, Deserialize)]
struct MediaRecord {
    uri: Option<String>,
    creation_timestamp: Option<serde_json::Number>,
}

fn uri_basename(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

/// Parse one metadata document and merge its entries into `map`.
/// Returns the number of entries contributed.
pub fn parse_document(bytes: &[u8], map: &mut TimestampMap) -> serde_json::Result<usize> {
    let posts: Vec<PostRecord> = serde_json::from_slice(bytes)?;
    let mut added = 0;

    for media in posts.into_iter().flat_map(|p| p.media) {
        let (Some(uri), Some(ts)) = (media.uri, media.creation_timestamp) else {
            continue;
        };
        let Some(ts) = ts.as_f64() else {
            continue;
        };
        let name = uri_basename(&uri);
        if name.is_empty() {
            continue;
        }
        if let Some(previous) = map.insert(name.to_string(), ts) {
            tracing::debug!(name, previous, replacement = ts, "duplicate media file name in metadata");
        }
        added += 1;
    }

    Ok(added)
}

/// Build the timestamp map from the known metadata documents under `backup_dir`.
///
/// Missing documents are skipped. A document that cannot be read or parsed is
/// logged and skipped; the others still load.
pub fn load_timestamps(backup_dir: &Path) -> TimestampMap {
    let mut map = TimestampMap::new();

    for rel in METADATA_DOCUMENTS {
        let path = backup_dir.join(rel);
        if !path.exists() {
            continue;
        }

        let result = fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| parse_document(&bytes, &mut map).map_err(|e| e.to_string()));

        match result {
            Ok(added) => tracing::debug!(document = rel, added, "loaded metadata"),
            Err(message) => {
                let err = Error::MetadataRead {
                    path: path.clone(),
                    message,
                };
                tracing::warn!("{err}");
            }
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_doc(backup: &Path, rel: &str, body: &str) {
        let path = backup.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_parse_posts_document() {
        let body = r#"[
            {"media": [
                {"uri": "media/posts/202311/a.jpg", "creation_timestamp": 1700000000, "title": ""},
                {"uri": "media/posts/202311/b.jpg", "creation_timestamp": 1700000001.5}
            ], "title": "trip"},
            {"title": "no media here"},
            {"media": [{"uri": "media/posts/202311/c.jpg"}, {"creation_timestamp": 5}]}
        ]"#;
        let mut map = TimestampMap::new();
        let added = parse_document(body.as_bytes(), &mut map).unwrap();

        assert_eq!(added, 2);
        assert_eq!(map.get("a.jpg"), Some(&1_700_000_000.0));
        assert_eq!(map.get("b.jpg"), Some(&1_700_000_001.5));
        assert!(!map.contains_key("c.jpg"));
    }

    #[test]
    fn test_parse_rejects_non_array() {
        let mut map = TimestampMap::new();
        assert!(parse_document(br#"{"ig_stories": []}"#, &mut map).is_err());
        assert!(parse_document(b"[{\"media\": [", &mut map).is_err());
        assert!(map.is_empty());
    }

    #[test]
    fn test_missing_documents_are_skipped() {
        let dir = tempdir().unwrap();
        assert!(load_timestamps(dir.path()).is_empty());
    }

    #[test]
    fn test_malformed_document_does_not_abort_load() {
        let dir = tempdir().unwrap();
        write_doc(dir.path(), METADATA_DOCUMENTS[0], "not json at all");
        write_doc(
            dir.path(),
            METADATA_DOCUMENTS[1],
            r#"[{"media": [{"uri": "media/stories/s.jpg", "creation_timestamp": 42}]}]"#,
        );

        let map = load_timestamps(dir.path());
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("s.jpg"), Some(&42.0));
    }

    #[test]
    fn test_later_document_wins_on_same_basename() {
        let dir = tempdir().unwrap();
        write_doc(
            dir.path(),
            METADATA_DOCUMENTS[0],
            r#"[{"media": [{"uri": "media/posts/x/dup.jpg", "creation_timestamp": 100}]}]"#,
        );
        write_doc(
            dir.path(),
            METADATA_DOCUMENTS[2],
            r#"[{"media": [{"uri": "media/profile/y/dup.jpg", "creation_timestamp": 200}]}]"#,
        );

        let map = load_timestamps(dir.path());
        assert_eq!(map.get("dup.jpg"), Some(&200.0));
    }
}
