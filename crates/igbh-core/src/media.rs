use std::fs;
use std::path::{Path, PathBuf};

/// Subfolders of `media/` that hold exported images, in visiting order.
pub const MEDIA_SUBFOLDERS: &[&str] = &["posts", "stories", "profile"];

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".heic"];

/// Check the file name suffix against the known image extensions (case-insensitive).
pub fn is_image_file(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[derive(Debug, Clone)]
pub struct MediaItem {
    /// Full path on disk
    pub path: PathBuf,
    /// Just the filename
    pub filename: String,
}

/// Depth-first walk over the media subfolders, yielding image files lazily.
///
/// Directory entries are visited in name order so repeated runs see the same
/// sequence. Unreadable directories are logged and skipped.
pub struct MediaWalker {
    roots: std::vec::IntoIter<PathBuf>,
    /// Pending entries, last element is visited next
    stack: Vec<PathBuf>,
}

impl MediaWalker {
    fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: roots.into_iter(),
            stack: Vec::new(),
        }
    }

    fn push_dir(&mut self, dir: &Path) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot read {}: {}", dir.display(), e);
                return;
            }
        };
        let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        paths.sort();
        self.stack.extend(paths.into_iter().rev());
    }
}

impl Iterator for MediaWalker {
    type Item = MediaItem;

    fn next(&mut self) -> Option<MediaItem> {
        loop {
            let Some(path) = self.stack.pop() else {
                let root = self.roots.next()?;
                self.push_dir(&root);
                continue;
            };

            let Ok(file_type) = fs::symlink_metadata(&path).map(|m| m.file_type()) else {
                continue;
            };
            if file_type.is_dir() {
                self.push_dir(&path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string();
            if is_image_file(&filename) {
                return Some(MediaItem { path, filename });
            }
        }
    }
}

/// The `media/` folder of a backup.
pub fn media_root(backup_dir: &Path) -> PathBuf {
    backup_dir.join("media")
}

/// Walk `media/posts`, `media/stories` and `media/profile` under `backup_dir`.
/// Subfolders that do not exist are skipped.
pub fn walk_media(backup_dir: &Path) -> MediaWalker {
    let root = media_root(backup_dir);
    let roots = MEDIA_SUBFOLDERS
        .iter()
        .map(|sub| root.join(sub))
        .filter(|p| p.is_dir())
        .collect();
    MediaWalker::new(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file("a.jpg"));
        assert!(is_image_file("A.JPEG"));
        assert!(is_image_file("photo.HeIc"));
        assert!(is_image_file("anim.gif"));
        assert!(is_image_file("x.webp"));
        assert!(!is_image_file("clip.mp4"));
        assert!(!is_image_file("notes.json"));
        assert!(!is_image_file("jpg"));
    }

    #[test]
    fn test_walk_known_subfolders_recursively() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        touch(&media.join("posts/202301/deep/a.jpg"));
        touch(&media.join("posts/202301/b.PNG"));
        touch(&media.join("posts/202301/clip.mp4"));
        touch(&media.join("stories/s.webp"));
        touch(&media.join("profile/p.jpeg"));
        touch(&media.join("reels/r.jpg"));
        touch(&dir.path().join("outside.jpg"));

        let names: Vec<String> = walk_media(dir.path()).map(|m| m.filename).collect();
        assert_eq!(names, vec!["b.PNG", "a.jpg", "s.webp", "p.jpeg"]);
    }

    #[test]
    fn test_walk_missing_subfolders() {
        let dir = tempdir().unwrap();
        assert_eq!(walk_media(dir.path()).count(), 0);

        touch(&dir.path().join("media/stories/only.gif"));
        let items: Vec<MediaItem> = walk_media(dir.path()).collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].path.ends_with("media/stories/only.gif"));
    }
}
