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

//! Shuffle writers.
//!
//! A writer buffers one producer's records and, on `close`, persists them
//! as a single consolidated block ordered by output partition, along with
//! its [`ShuffleIndex`]. Nothing reaches storage before `close`.

use std::fmt::Debug;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::dependency::{Partitioner, Record, ShuffleId};
use crate::error::{Result, ShuffleError};
use crate::storage::{ShuffleIndex, ShuffleStorage};

mod general;
mod pointer;
mod serialized;

pub use general::GeneralShuffleWriter;
pub use pointer::{
    PackedRecordPointer, MAXIMUM_OFFSET, MAXIMUM_PARTITION_ID,
    MAX_SERIALIZED_MODE_PARTITIONS,
};
pub use serialized::SerializedShuffleWriter;

/// Outcome of a successful producer, reported back to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapStatus {
    pub shuffle_id: ShuffleId,
    pub map_id: usize,
    /// Byte length of each output partition.
    pub partition_lengths: Vec<u64>,
    pub records_written: u64,
    pub bytes_written: u64,
}

/// Writes the output of one producer task.
pub trait ShuffleWriter: Debug + Send {
    /// Buffers one record.
    fn write(&mut self, record: Record) -> Result<()>;

    /// Buffers every record of `records`.
    fn write_all(&mut self, records: &mut dyn Iterator<Item = Record>) -> Result<()> {
        for record in records {
            self.write(record)?;
        }
        Ok(())
    }

    /// Persists the buffered output and reports it.
    fn close(&mut self) -> Result<MapStatus>;

    /// Discards the buffered output. The task failed or was cancelled.
    fn abort(&mut self);
}

/// Output partition of `key`, checked against the partition count.
pub(crate) fn partition_for(
    partitioner: &Arc<dyn Partitioner>,
    key: &[u8],
) -> Result<usize> {
    let partition = partitioner.partition(key);
    let num_partitions = partitioner.num_partitions();
    if partition >= num_partitions {
        return Err(ShuffleError::Internal(format!(
            "Partitioner returned partition {partition} for {num_partitions} partitions"
        )));
    }
    Ok(partition)
}

pub(crate) fn ensure_open(closed: bool, shuffle_id: ShuffleId, map_id: usize) -> Result<()> {
    if closed {
        return Err(ShuffleError::Internal(format!(
            "Writer for shuffle {shuffle_id} map {map_id} is already closed"
        )));
    }
    Ok(())
}

/// Publishes a consolidated block to storage and builds its [`MapStatus`].
pub(crate) fn commit_map_output(
    storage: &dyn ShuffleStorage,
    shuffle_id: ShuffleId,
    map_id: usize,
    data: &[u8],
    partition_lengths: Vec<u64>,
    records_written: u64,
) -> Result<MapStatus> {
    let index = ShuffleIndex::from_partition_lengths(&partition_lengths);
    storage.write_map_output(shuffle_id, map_id, data, &index)?;
    debug!(
        "Shuffle {shuffle_id} map {map_id} wrote {records_written} records in {} bytes",
        data.len()
    );
    Ok(MapStatus {
        shuffle_id,
        map_id,
        partition_lengths,
        records_written,
        bytes_written: data.len() as u64,
    })
}
