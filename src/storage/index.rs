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

//! Index of a producer's consolidated map output. Format:
//!
//! ```text
//! [i64: offset_0][i64: offset_1]...[i64: offset_n-1][i64: total_length]
//! ```
//!
//! - All values are little-endian i64
//! - Partition `i` data spans `[offset_i, offset_{i+1})`

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Result, ShuffleError};

/// Maps partition ids to byte ranges of a consolidated data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleIndex {
    /// Length is partition_count + 1; the last entry is the total length.
    offsets: Vec<i64>,
}

impl ShuffleIndex {
    /// Builds an index from the byte length of each partition, laid out
    /// back to back starting at offset 0.
    pub fn from_partition_lengths(lengths: &[u64]) -> Self {
        let mut offsets = Vec::with_capacity(lengths.len() + 1);
        let mut offset = 0i64;
        offsets.push(offset);
        for len in lengths {
            offset += *len as i64;
            offsets.push(offset);
        }
        Self { offsets }
    }

    pub fn partition_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Total length in bytes of the data block.
    pub fn total_length(&self) -> u64 {
        self.offsets.last().copied().unwrap_or(0) as u64
    }

    /// Returns the byte range `(start, end)` of `partition_id`.
    ///
    /// # Panics
    /// Panics if `partition_id >= partition_count`.
    pub fn get_partition_range(&self, partition_id: usize) -> (i64, i64) {
        (self.offsets[partition_id], self.offsets[partition_id + 1])
    }

    pub fn partition_has_data(&self, partition_id: usize) -> bool {
        let (start, end) = self.get_partition_range(partition_id);
        end > start
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(ShuffleError::IoError)?;
        let mut writer = BufWriter::new(file);

        for &offset in &self.offsets {
            writer
                .write_all(&offset.to_le_bytes())
                .map_err(ShuffleError::IoError)?;
        }

        writer.flush().map_err(ShuffleError::IoError)?;
        Ok(())
    }

    pub fn read_from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(ShuffleError::IoError)?;
        let file_size = file.metadata().map_err(ShuffleError::IoError)?.len() as usize;

        // Each offset is 8 bytes (i64)
        if !file_size.is_multiple_of(8) {
            return Err(ShuffleError::General(format!(
                "Invalid index file size: {file_size} (must be multiple of 8)"
            )));
        }

        let entry_count = file_size / 8;
        if entry_count < 1 {
            return Err(ShuffleError::General(
                "Index file is empty".to_string(),
            ));
        }

        let mut reader = BufReader::new(file);
        let mut offsets = Vec::with_capacity(entry_count);
        let mut buf = [0u8; 8];

        for _ in 0..entry_count {
            reader.read_exact(&mut buf).map_err(ShuffleError::IoError)?;
            offsets.push(i64::from_le_bytes(buf));
        }

        if offsets[0] != 0 {
            return Err(ShuffleError::General(format!(
                "Index file {path:?} starts at offset {}, expected 0",
                offsets[0]
            )));
        }
        if offsets.windows(2).any(|w| w[1] < w[0]) {
            return Err(ShuffleError::General(format!(
                "Index file {path:?} has decreasing offsets"
            )));
        }

        Ok(Self { offsets })
    }
}
