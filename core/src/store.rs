use crate::record::CasualtyRecord;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reads the record batch. A file that does not exist yet is an empty batch.
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<CasualtyRecord>, StoreError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|source| StoreError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|source| StoreError::Serialization {
        source,
        path: path.to_path_buf(),
    })
}

/// Writes the batch as pretty JSON through a sibling temporary file, so an
/// interrupted write never truncates the previous batch.
pub fn save_records<P: AsRef<Path>>(records: &[CasualtyRecord], path: P) -> Result<(), StoreError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            source,
            path: parent.to_path_buf(),
        })?;
    }
    let temporary = temporary_path(path);
    let file = File::create(&temporary).map_err(|source| StoreError::Io {
        source,
        path: temporary.clone(),
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records).map_err(|source| {
        StoreError::Serialization {
            source,
            path: temporary.clone(),
        }
    })?;
    writer
        .flush()
        .and_then(|_| fs::rename(&temporary, path))
        .map_err(|source| StoreError::Io {
            source,
            path: path.to_path_buf(),
        })
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error for {}: {source}", path.display())]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid record data in {}: {source}", path.display())]
    Serialization {
        source: serde_json::Error,
        path: PathBuf,
    },
}
