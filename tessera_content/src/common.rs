use std::{
    io,
    path::{Path, PathBuf},
    result,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tessera_shared::thiserror;

use crate::path_table::PathError;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),
    #[error("IoError: {0}")]
    IoError(#[from] io::Error),
    #[error("Path error: {0}")]
    Path(#[from] PathError),
    #[error("Load error: {0}")]
    Load(#[from] LoadError),
    #[error("Invalid cache file: {0}")]
    InvalidCacheFile(PathBuf),
    #[error("Failed to serialize: {0}")]
    FailedSerialization(bincode::Error),
    #[error("Failed to deserialize: {0}")]
    FailedDeserialization(bincode::Error),
    #[error("Yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Failed to start thread pool")]
    FailedToStartThreadPool,
    #[error("Invalid mount '{0}': {1}")]
    InvalidMount(String, String),
    #[error("Timed out after {0:?} while loading '{1}'")]
    Timeout(Duration, String),
    #[error("Other: {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Reason why a single load request failed.
///
/// Stored in the request, so it is `Clone` and only carries strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("No package loader is mounted for '{0}'")]
    MissingPackageLoader(String),
    #[error("Object '{0}' doesn't exist")]
    NotFound(String),
    #[error("Failed to deserialize '{path}': {message}")]
    Deserialization { path: String, message: String },
    #[error("Type '{type_name}' of '{path}' is not registered")]
    UnknownType { path: String, type_name: String },
    #[error("Failed to precache '{path}': {message}")]
    Precache { path: String, message: String },
    #[error("IoError while loading '{path}': {message}")]
    Io { path: String, message: String },
    #[error("Cache error while loading '{path}': {message}")]
    Cache { path: String, message: String },
    #[error("Field '{field}' of '{path}' expects '{expected}' but '{actual}' was found")]
    TypeMismatch {
        path: String,
        field: String,
        expected: String,
        actual: String,
    },
    #[error("Load job panicked: {0}")]
    Panicked(String),
    #[error("Request for '{0}' was discarded")]
    Discarded(String),
}

/// Milliseconds since the UNIX epoch.
pub fn timestamp_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

/// Modification time of the file in milliseconds since the UNIX epoch or `None` if the file
/// doesn't exist.
pub fn modified_timestamp(path: &Path) -> Option<u64> {
    path.metadata()
        .ok()
        .and_then(|metadata| metadata.modified().ok())
        .map(timestamp_millis)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempdir::TempDir;

    use super::*;

    #[test]
    fn modified_timestamp_of_missing_file() {
        let directory = TempDir::new("common").unwrap();
        assert_eq!(modified_timestamp(&directory.path().join("missing.yaml")), None);
    }

    #[test]
    fn modified_timestamp_of_existing_file() {
        let directory = TempDir::new("common").unwrap();
        let path = directory.path().join("file.yaml");
        fs::write(&path, "type: A").unwrap();
        let timestamp = modified_timestamp(&path).unwrap();
        assert!(timestamp > 0);
        assert!(timestamp <= timestamp_millis(SystemTime::now()));
    }
}
