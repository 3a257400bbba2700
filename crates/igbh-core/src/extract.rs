use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, Result};

/// Name prefix of the top-level folder in an Instagram export.
pub const DEFAULT_BACKUP_PREFIX: &str = "instagram-";

/// Decides which top-level folder of an extracted archive is the backup.
pub trait BackupMatcher {
    fn matches(&self, name: &str) -> bool;
}

impl<F> BackupMatcher for F
where
    F: Fn(&str) -> bool,
{
    fn matches(&self, name: &str) -> bool {
        self(name)
    }
}

/// Matches folders whose name starts with a fixed prefix.
#[derive(Debug, Clone)]
pub struct PrefixMatcher(pub String);

impl Default for PrefixMatcher {
    fn default() -> Self {
        Self(DEFAULT_BACKUP_PREFIX.to_string())
    }
}

impl BackupMatcher for PrefixMatcher {
    fn matches(&self, name: &str) -> bool {
        name.starts_with(&self.0)
    }
}

/// Compression wrapped around the tar stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

/// Guess the compression codec from the first bytes of the file.
/// Anything unrecognised is handed to the tar reader as-is.
pub fn detect_compression(header: &[u8]) -> Compression {
    match header {
        [0x1F, 0x8B, ..] => Compression::Gzip,
        [b'B', b'Z', b'h', ..] => Compression::Bzip2,
        [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, ..] => Compression::Xz,
        [0x28, 0xB5, 0x2F, 0xFD, ..] => Compression::Zstd,
        _ => Compression::None,
    }
}

fn sniff_compression(path: &Path) -> io::Result<Compression> {
    let mut header = Vec::with_capacity(6);
    File::open(path)?.take(6).read_to_end(&mut header)?;
    Ok(detect_compression(&header))
}

fn open_stream(path: &Path, compression: Compression) -> io::Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    Ok(match compression {
        Compression::None => Box::new(file),
        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
        Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(file)),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new(file)),
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(file)?),
    })
}

/// A member path is safe when it is relative and never steps up a directory.
pub fn is_safe_member_path(path: &Path) -> bool {
    !path.has_root()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Which members of the archive (by stream position) may be written.
struct MemberPlan {
    accepted: Vec<bool>,
    rejected: Vec<PathBuf>,
}

fn plan_members(archive_path: &Path, compression: Compression) -> io::Result<MemberPlan> {
    let mut archive = tar::Archive::new(open_stream(archive_path, compression)?);
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for entry in archive.entries()? {
        let entry = entry?;
        let path = entry.path()?.into_owned();
        let kind = entry.header().entry_type();

        let link_ok = if kind.is_symlink() || kind.is_hard_link() {
            match entry.link_name()? {
                Some(target) => is_safe_member_path(&target),
                None => false,
            }
        } else {
            true
        };

        let ok = is_safe_member_path(&path) && link_ok;
        if !ok {
            rejected.push(path);
        }
        accepted.push(ok);
    }

    Ok(MemberPlan { accepted, rejected })
}

fn unpack_members(
    archive_path: &Path,
    compression: Compression,
    plan: &MemberPlan,
    root: &Path,
) -> io::Result<u64> {
    let mut archive = tar::Archive::new(open_stream(archive_path, compression)?);
    archive.set_preserve_permissions(false);
    let mut extracted = 0u64;

    for (index, entry) in archive.entries()?.enumerate() {
        let mut entry = entry?;
        if !plan.accepted.get(index).copied().unwrap_or(false) {
            continue;
        }
        if entry.unpack_in(root)? {
            extracted += 1;
        }
    }

    Ok(extracted)
}

/// Return the first child directory of `root` (in name order) accepted by `matcher`.
pub fn find_backup_dir(root: &Path, matcher: &dyn BackupMatcher) -> io::Result<Option<PathBuf>> {
    let mut names: Vec<_> = fs::read_dir(root)?
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name())
        .collect();
    names.sort();

    Ok(names
        .into_iter()
        .find(|name| name.to_str().map_or(false, |s| matcher.matches(s)))
        .map(|name| root.join(name)))
}

/// An extracted archive. Dropping it deletes the extraction directory.
#[derive(Debug)]
pub struct ExtractedBackup {
    dir: TempDir,
    backup_dir: PathBuf,
    /// Number of members written to disk
    pub extracted: u64,
    /// Members skipped because their path (or link target) escapes the root
    pub rejected: Vec<PathBuf>,
}

impl ExtractedBackup {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Remove the extraction directory now, reporting any failure.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// Extract `archive_path` into a fresh temporary directory and locate the backup folder.
///
/// Every member is checked before anything is written; members with an absolute
/// path, a `..` component, or a link target of that kind are skipped. On any
/// error the temporary directory is removed before returning.
pub fn extract_backup(archive_path: &Path, matcher: &dyn BackupMatcher) -> Result<ExtractedBackup> {
    extract_backup_in(archive_path, matcher, &std::env::temp_dir())
}

/// Same as [`extract_backup`], creating the extraction directory under `parent`.
pub fn extract_backup_in(
    archive_path: &Path,
    matcher: &dyn BackupMatcher,
    parent: &Path,
) -> Result<ExtractedBackup> {
    let extraction = |source: io::Error| Error::Extraction {
        path: archive_path.to_path_buf(),
        source,
    };

    let dir = tempfile::Builder::new()
        .prefix("igbh-")
        .tempdir_in(parent)
        .map_err(extraction)?;

    let compression = sniff_compression(archive_path).map_err(extraction)?;
    tracing::debug!(?compression, archive = %archive_path.display(), "opening archive");

    let plan = plan_members(archive_path, compression).map_err(extraction)?;
    for path in &plan.rejected {
        tracing::warn!("Skipping unsafe archive member: {}", path.display());
    }

    let extracted = unpack_members(archive_path, compression, &plan, dir.path()).map_err(extraction)?;
    tracing::debug!(extracted, root = %dir.path().display(), "archive extracted");

    let backup_dir = find_backup_dir(dir.path(), matcher)
        .map_err(extraction)?
        .ok_or_else(|| Error::BackupNotFound(archive_path.to_path_buf()))?;

    Ok(ExtractedBackup {
        dir,
        backup_dir,
        extracted,
        rejected: plan.rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Append a regular file whose header name is written verbatim, bypassing
    /// the builder's own path validation.
    fn append_raw<W: io::Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        let raw = &mut header.as_old_mut().name;
        raw[..name.len()].copy_from_slice(name.as_bytes());
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, data).unwrap();
    }

    fn write_tar(path: &Path, members: &[(&str, &[u8])]) {
        let mut builder = tar::Builder::new(File::create(path).unwrap());
        for (name, data) in members {
            append_raw(&mut builder, name, data);
        }
        builder.finish().unwrap();
    }

    #[test]
    fn test_detect_compression() {
        assert_eq!(detect_compression(&[0x1F, 0x8B, 0x08]), Compression::Gzip);
        assert_eq!(detect_compression(b"BZh91AY"), Compression::Bzip2);
        assert_eq!(
            detect_compression(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]),
            Compression::Xz
        );
        assert_eq!(detect_compression(&[0x28, 0xB5, 0x2F, 0xFD]), Compression::Zstd);
        assert_eq!(detect_compression(b"instagram-"), Compression::None);
        assert_eq!(detect_compression(&[]), Compression::None);
    }

    #[test]
    fn test_safe_member_paths() {
        assert!(is_safe_member_path(Path::new("instagram-x/media/posts/a.jpg")));
        assert!(is_safe_member_path(Path::new("./instagram-x/a.jpg")));
        assert!(!is_safe_member_path(Path::new("/etc/passwd")));
        assert!(!is_safe_member_path(Path::new("../../etc/passwd")));
        assert!(!is_safe_member_path(Path::new("instagram-x/../../evil.jpg")));
    }

    #[test]
    fn test_prefix_matcher_and_closure() {
        let m = PrefixMatcher::default();
        assert!(m.matches("instagram-someone-2024"));
        assert!(!m.matches("facebook-someone"));

        let custom = |name: &str| name.ends_with("-export");
        assert!(custom.matches("synthetic-export"));
    }

    #[test]
    fn test_extract_skips_traversal_members() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("backup.tar");
        write_tar(
            &archive,
            &[
                ("instagram-export/media/posts/a.jpg", b"jpeg"),
                ("../../etc/passwd", b"root:x:0:0"),
                ("/tmp/igbh-absolute-member", b"nope"),
            ],
        );

        let scratch = dir.path().join("a").join("b");
        fs::create_dir_all(&scratch).unwrap();

        let extracted = extract_backup_in(&archive, &PrefixMatcher::default(), &scratch).unwrap();
        assert_eq!(extracted.extracted, 1);
        assert_eq!(extracted.rejected.len(), 2);
        assert!(extracted.backup_dir().join("media/posts/a.jpg").is_file());
        assert!(extracted.backup_dir().starts_with(extracted.root()));

        assert!(!dir.path().join("a/etc/passwd").exists());
        assert!(!dir.path().join("etc/passwd").exists());
        assert!(!Path::new("/tmp/igbh-absolute-member").exists());
    }

    #[test]
    fn test_extract_gzip_archive() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("backup.tar.gz");
        let encoder = flate2::write::GzEncoder::new(
            File::create(&archive).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        append_raw(&mut builder, "instagram-gz/media/stories/s.png", b"png");
        builder.into_inner().unwrap().finish().unwrap();

        let extracted = extract_backup(&archive, &PrefixMatcher::default()).unwrap();
        assert!(extracted.backup_dir().ends_with("instagram-gz"));
        assert!(extracted.backup_dir().join("media/stories/s.png").is_file());
    }

    #[test]
    fn test_missing_backup_folder_removes_temp_dir() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("other.tar");
        write_tar(&archive, &[("facebook-export/a.jpg", b"jpeg")]);
        let scratch = dir.path().join("scratch");
        fs::create_dir(&scratch).unwrap();

        let err = extract_backup_in(&archive, &PrefixMatcher::default(), &scratch).unwrap_err();
        assert!(matches!(err, Error::BackupNotFound(_)));
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[test]
    fn test_corrupt_archive_removes_temp_dir() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("broken.tar.gz");
        fs::write(&archive, [0x1F, 0x8B, 0x08, 0x00, 0xDE, 0xAD]).unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir(&scratch).unwrap();

        let err = extract_backup_in(&archive, &PrefixMatcher::default(), &scratch).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[test]
    fn test_injected_matcher_selects_folder() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("synthetic.tar");
        write_tar(
            &archive,
            &[("b-export/media/posts/x.jpg", b"1"), ("a-export/media/posts/y.jpg", b"2")],
        );

        let matcher = |name: &str| name.ends_with("-export");
        let extracted = extract_backup(&archive, &matcher).unwrap();
        assert!(extracted.backup_dir().ends_with("a-export"));
    }

    #[test]
    fn test_drop_removes_extraction_root() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("backup.tar");
        write_tar(&archive, &[("instagram-export/media/posts/a.jpg", b"jpeg")]);

        let extracted = extract_backup(&archive, &PrefixMatcher::default()).unwrap();
        let root = extracted.root().to_path_buf();
        assert!(root.exists());
        drop(extracted);
        assert!(!root.exists());
    }
}
