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

//! Storage of shuffle map output.
//!
//! Every producer (map task) persists one consolidated data block holding
//! all of its output partitions back to back, plus a [`ShuffleIndex`] with
//! the byte offset of each partition. Consumers fetch one partition of one
//! producer at a time as a [`ShuffleBlockId`].

use std::fmt::{Debug, Display, Formatter};

use crate::config::ShuffleConfig;
use crate::dependency::ShuffleId;
use crate::error::{Result, ShuffleError};

mod disk;
mod index;
mod memory;

pub use disk::LocalDiskStorage;
pub use index::ShuffleIndex;
pub use memory::InMemoryStorage;

/// One output partition of one producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShuffleBlockId {
    pub shuffle_id: ShuffleId,
    pub map_id: usize,
    pub reduce_id: usize,
}

impl ShuffleBlockId {
    pub fn new(shuffle_id: ShuffleId, map_id: usize, reduce_id: usize) -> Self {
        Self {
            shuffle_id,
            map_id,
            reduce_id,
        }
    }
}

impl Display for ShuffleBlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "shuffle_{}_{}_{}",
            self.shuffle_id, self.map_id, self.reduce_id
        )
    }
}

/// Backing store for shuffle output, owned by the shuffle manager.
///
/// Implementations must be safe for concurrent calls, including concurrent
/// deletes of different producers' output.
pub trait ShuffleStorage: Debug + Send + Sync {
    /// Acquires the storage's resources. Called once by
    /// [`ShuffleManager::start`](crate::manager::ShuffleManager::start).
    fn initialize(&self, config: &ShuffleConfig) -> Result<()>;

    /// Releases the storage's resources. Called once by
    /// [`ShuffleManager::stop`](crate::manager::ShuffleManager::stop).
    fn shutdown(&self) -> Result<()>;

    /// Persists the output of one producer, replacing any earlier output of
    /// the same producer.
    fn write_map_output(
        &self,
        shuffle_id: ShuffleId,
        map_id: usize,
        data: &[u8],
        index: &ShuffleIndex,
    ) -> Result<()>;

    /// Returns the bytes of one block, or `None` if the producer wrote no
    /// output.
    fn read_block(&self, block_id: ShuffleBlockId) -> Result<Option<Vec<u8>>>;

    /// Deletes the output of one producer. Deleting output that does not
    /// exist is not an error.
    fn delete_map_output(&self, shuffle_id: ShuffleId, map_id: usize) -> Result<()>;

    /// Deletes all shuffle output held by this storage.
    fn purge_all(&self) -> Result<()>;
}

/// Rejects an index that does not describe `data`.
pub(crate) fn check_map_output(
    shuffle_id: ShuffleId,
    map_id: usize,
    data: &[u8],
    index: &ShuffleIndex,
) -> Result<()> {
    if index.total_length() != data.len() as u64 {
        return Err(ShuffleError::Internal(format!(
            "Index of shuffle {shuffle_id} map {map_id} covers {} bytes, data has {}",
            index.total_length(),
            data.len()
        )));
    }
    Ok(())
}

/// Byte range of `block_id` within its producer's data block, or `None`
/// when the partition is empty.
pub(crate) fn block_range(
    block_id: ShuffleBlockId,
    index: &ShuffleIndex,
) -> Result<Option<(u64, u64)>> {
    if block_id.reduce_id >= index.partition_count() {
        return Err(ShuffleError::General(format!(
            "Block {block_id} is out of range, map output has {} partitions",
            index.partition_count()
        )));
    }
    if !index.partition_has_data(block_id.reduce_id) {
        return Ok(None);
    }
    let (start, end) = index.get_partition_range(block_id.reduce_id);
    Ok(Some((start as u64, end as u64)))
}

/// Extracts the bytes of partition `reduce_id` from a consolidated block.
pub(crate) fn slice_block(
    block_id: ShuffleBlockId,
    data: &[u8],
    index: &ShuffleIndex,
) -> Result<Vec<u8>> {
    let Some((start, end)) = block_range(block_id, index)? else {
        return Ok(Vec::new());
    };
    data.get(start as usize..end as usize)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            ShuffleError::General(format!(
                "Block {block_id} spans [{start}, {end}) beyond data of {} bytes",
                data.len()
            ))
        })
}
