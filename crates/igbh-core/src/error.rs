use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("File not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("failed to extract '{}': {source}", path.display())]
    Extraction { path: PathBuf, source: io::Error },

    #[error("Instagram backup directory not found in {}", .0.display())]
    BackupNotFound(PathBuf),

    #[error("Error reading {}: {message}", path.display())]
    MetadataRead { path: PathBuf, message: String },

    #[error("Media folder not found in {}", .0.display())]
    MediaRootMissing(PathBuf),

    #[error("Error processing {}: {message}", path.display())]
    ImageProcessing { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn image(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::ImageProcessing {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
