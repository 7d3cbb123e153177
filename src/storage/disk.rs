// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{block_range, check_map_output, ShuffleBlockId, ShuffleIndex, ShuffleStorage};
use crate::config::ShuffleConfig;
use crate::dependency::ShuffleId;
use crate::error::{Result, ShuffleError};

/// Stores map output as a data file and an index file per producer:
///
/// ```text
/// <work_dir>/ballista-shuffle-<uuid>/shuffle_<id>/<map_id>.data
/// <work_dir>/ballista-shuffle-<uuid>/shuffle_<id>/<map_id>.index
/// ```
///
/// The per-application directory is created by `initialize`, so purging
/// never touches files of other processes sharing the work dir.
#[derive(Debug, Default)]
pub struct LocalDiskStorage {
    work_dir: Option<PathBuf>,
    app_dir: RwLock<Option<PathBuf>>,
}

impl LocalDiskStorage {
    /// Uses `ballista.shuffle.work_dir`, or the system temp dir if unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `work_dir` regardless of configuration.
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: Some(work_dir.into()),
            app_dir: RwLock::new(None),
        }
    }

    /// The directory holding this storage's output, once initialized.
    pub fn app_dir(&self) -> Option<PathBuf> {
        self.app_dir.read().clone()
    }

    fn require_app_dir(&self) -> Result<PathBuf> {
        self.app_dir().ok_or_else(|| {
            ShuffleError::Internal(
                "LocalDiskStorage used before initialize".to_string(),
            )
        })
    }

    fn shuffle_dir(app_dir: &Path, shuffle_id: ShuffleId) -> PathBuf {
        app_dir.join(format!("shuffle_{shuffle_id}"))
    }

    fn data_path(app_dir: &Path, shuffle_id: ShuffleId, map_id: usize) -> PathBuf {
        Self::shuffle_dir(app_dir, shuffle_id).join(format!("{map_id}.data"))
    }

    fn index_path(app_dir: &Path, shuffle_id: ShuffleId, map_id: usize) -> PathBuf {
        Self::shuffle_dir(app_dir, shuffle_id).join(format!("{map_id}.index"))
    }
}

// Check whether the path is the subdirectory of the base directory
fn is_subdirectory(path: &Path, base_path: &Path) -> bool {
    let path = match path.canonicalize() {
        Ok(p) => p,
        Err(_) => return false,
    };
    let base = match base_path.canonicalize() {
        Ok(b) => b,
        Err(_) => return false,
    };

    path.parent().is_some_and(|p| p.starts_with(&base))
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Writes `path` through a temporary sibling and a rename, so a concurrent
/// reader never observes a partially written file.
fn write_atomically(
    path: &Path,
    write: impl FnOnce(&Path) -> Result<()>,
) -> Result<()> {
    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
    if let Err(e) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        error!("Failed to move shuffle file into place at {path:?}: {e:?}");
        ShuffleError::IoError(e)
    })
}

impl ShuffleStorage for LocalDiskStorage {
    fn initialize(&self, config: &ShuffleConfig) -> Result<()> {
        let mut app_dir = self.app_dir.write();
        if let Some(dir) = app_dir.as_ref() {
            warn!("LocalDiskStorage already initialized at {dir:?}");
            return Ok(());
        }

        let work_dir = self
            .work_dir
            .clone()
            .or_else(|| config.work_dir().map(PathBuf::from))
            .unwrap_or_else(std::env::temp_dir);
        let dir = work_dir.join(format!("ballista-shuffle-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).map_err(|e| {
            error!("Failed to create shuffle directory at {dir:?}: {e:?}");
            ShuffleError::IoError(e)
        })?;

        info!("Shuffle output will be written to {dir:?}");
        *app_dir = Some(dir);
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        if let Some(dir) = self.app_dir.write().take() {
            // keeps output that was not purged
            match fs::remove_dir(&dir) {
                Ok(()) => debug!("Removed empty shuffle directory {dir:?}"),
                Err(_) => info!("Shuffle directory {dir:?} is left in place"),
            }
        }
        Ok(())
    }

    fn write_map_output(
        &self,
        shuffle_id: ShuffleId,
        map_id: usize,
        data: &[u8],
        index: &ShuffleIndex,
    ) -> Result<()> {
        check_map_output(shuffle_id, map_id, data, index)?;
        let app_dir = self.require_app_dir()?;
        fs::create_dir_all(Self::shuffle_dir(&app_dir, shuffle_id))?;

        let data_path = Self::data_path(&app_dir, shuffle_id, map_id);
        write_atomically(&data_path, |tmp| {
            let mut writer = BufWriter::new(File::create(tmp)?);
            writer.write_all(data)?;
            writer.flush()?;
            Ok(())
        })?;

        // the index is published last, readers treat a missing index as no output
        let index_path = Self::index_path(&app_dir, shuffle_id, map_id);
        write_atomically(&index_path, |tmp| index.write_to_file(tmp))?;

        debug!(
            "Wrote {} bytes for shuffle {shuffle_id} map {map_id} to {data_path:?}",
            data.len()
        );
        Ok(())
    }

    fn read_block(&self, block_id: ShuffleBlockId) -> Result<Option<Vec<u8>>> {
        let app_dir = self.require_app_dir()?;
        let index_path = Self::index_path(&app_dir, block_id.shuffle_id, block_id.map_id);
        if !index_path.exists() {
            return Ok(None);
        }

        let index = ShuffleIndex::read_from_file(&index_path)?;
        let Some((start, end)) = block_range(block_id, &index)? else {
            return Ok(Some(Vec::new()));
        };

        let data_path = Self::data_path(&app_dir, block_id.shuffle_id, block_id.map_id);
        let mut file = File::open(&data_path).map_err(|e| {
            ShuffleError::General(format!(
                "Failed to open shuffle data file at {data_path:?}: {e:?}"
            ))
        })?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    fn delete_map_output(&self, shuffle_id: ShuffleId, map_id: usize) -> Result<()> {
        let app_dir = self.require_app_dir()?;
        for path in [
            Self::index_path(&app_dir, shuffle_id, map_id),
            Self::data_path(&app_dir, shuffle_id, map_id),
        ] {
            remove_file_if_exists(&path).map_err(|e| {
                error!("Failed to delete shuffle file at {path:?}: {e:?}");
                ShuffleError::IoError(e)
            })?;
        }

        // succeeds only once the last producer's output is gone
        let _ = fs::remove_dir(Self::shuffle_dir(&app_dir, shuffle_id));
        Ok(())
    }

    fn purge_all(&self) -> Result<()> {
        let app_dir = self.require_app_dir()?;
        let mut to_delete = Vec::new();
        for child in fs::read_dir(&app_dir)? {
            let child = child?;
            let path = child.path();
            if !child.file_type()?.is_dir() {
                warn!("{path:?} under the shuffle directory is not a directory and will be ignored when purging");
            } else if !is_subdirectory(&path, &app_dir) {
                warn!("{path:?} is not a subdirectory of {app_dir:?} and will not be purged");
            } else {
                to_delete.push(path);
            }
        }

        info!("Purging shuffle directories {to_delete:?}");
        let mut failed = 0;
        for del in to_delete {
            if let Err(e) = fs::remove_dir_all(&del) {
                error!("Fail to remove the directory {del:?} due to {e}");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(ShuffleError::General(format!(
                "Failed to purge {failed} shuffle directories under {app_dir:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> Result<LocalDiskStorage> {
        let storage = LocalDiskStorage::with_work_dir(dir.path());
        storage.initialize(&ShuffleConfig::default())?;
        Ok(storage)
    }

    #[test]
    fn write_then_read_blocks() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir)?;

        let index = ShuffleIndex::from_partition_lengths(&[3, 0, 2]);
        storage.write_map_output(1, 0, b"abcde", &index)?;

        assert_eq!(
            storage.read_block(ShuffleBlockId::new(1, 0, 0))?,
            Some(b"abc".to_vec())
        );
        assert_eq!(
            storage.read_block(ShuffleBlockId::new(1, 0, 1))?,
            Some(vec![])
        );
        assert_eq!(
            storage.read_block(ShuffleBlockId::new(1, 0, 2))?,
            Some(b"de".to_vec())
        );
        assert_eq!(storage.read_block(ShuffleBlockId::new(1, 1, 0))?, None);
        assert!(storage.read_block(ShuffleBlockId::new(1, 0, 3)).is_err());
        Ok(())
    }

    #[test]
    fn delete_is_idempotent() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir)?;

        let index = ShuffleIndex::from_partition_lengths(&[1]);
        storage.write_map_output(2, 0, b"x", &index)?;
        storage.delete_map_output(2, 0)?;
        storage.delete_map_output(2, 0)?;

        assert_eq!(storage.read_block(ShuffleBlockId::new(2, 0, 0))?, None);
        let app_dir = storage.app_dir().unwrap();
        assert!(!app_dir.join("shuffle_2").exists());
        Ok(())
    }

    #[test]
    fn purge_removes_all_shuffles() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir)?;

        let index = ShuffleIndex::from_partition_lengths(&[1]);
        storage.write_map_output(1, 0, b"x", &index)?;
        storage.write_map_output(2, 0, b"y", &index)?;
        storage.purge_all()?;

        let app_dir = storage.app_dir().unwrap();
        assert_eq!(fs::read_dir(&app_dir)?.count(), 0);

        storage.shutdown()?;
        assert!(!app_dir.exists());
        assert!(storage.app_dir().is_none());
        Ok(())
    }

    #[test]
    fn use_before_initialize_fails() {
        let storage = LocalDiskStorage::new();
        let err = storage.delete_map_output(1, 0).unwrap_err();
        assert!(matches!(err, ShuffleError::Internal(_)));
    }

    #[test]
    fn rewriting_map_output_replaces_it() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir)?;

        storage.write_map_output(1, 0, b"old", &ShuffleIndex::from_partition_lengths(&[3]))?;
        storage.write_map_output(1, 0, b"new!", &ShuffleIndex::from_partition_lengths(&[4]))?;
        assert_eq!(
            storage.read_block(ShuffleBlockId::new(1, 0, 0))?,
            Some(b"new!".to_vec())
        );
        Ok(())
    }
}
