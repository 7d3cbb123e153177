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

//! Writer for the serialized shuffle path.
//!
//! Each record is serialized exactly once into an append-only buffer as
//! `[u32 length][bytes]`, and only a [`PackedRecordPointer`] is kept per
//! record. On close the pointers are sorted, which groups records by
//! partition, and the serialized bytes are copied out as opaque ranges.
//! Records are never deserialized.

use std::sync::Arc;

use super::{
    commit_map_output, ensure_open, partition_for, MapStatus, PackedRecordPointer,
    ShuffleWriter,
};
use crate::dependency::{Partitioner, Record, ShuffleId};
use crate::error::{Result, ShuffleError};
use crate::handle::SerializedShuffleHandle;
use crate::storage::ShuffleStorage;

const LENGTH_PREFIX: usize = 4;

#[derive(Debug)]
pub struct SerializedShuffleWriter {
    shuffle_id: ShuffleId,
    map_id: usize,
    handle: SerializedShuffleHandle,
    storage: Arc<dyn ShuffleStorage>,
    /// Length-prefixed serialized records in arrival order
    buffer: Vec<u8>,
    pointers: Vec<PackedRecordPointer>,
    /// Reused serialization output for a single record
    scratch: Vec<u8>,
    records_written: u64,
    closed: bool,
}

impl SerializedShuffleWriter {
    pub fn new(
        handle: SerializedShuffleHandle,
        map_id: usize,
        storage: Arc<dyn ShuffleStorage>,
        initial_buffer_size: usize,
    ) -> Self {
        Self {
            shuffle_id: handle.dependency().shuffle_id(),
            map_id,
            handle,
            storage,
            buffer: Vec::with_capacity(initial_buffer_size),
            pointers: Vec::new(),
            scratch: Vec::new(),
            records_written: 0,
            closed: false,
        }
    }

    fn partitioner(&self) -> &Arc<dyn Partitioner> {
        self.handle.dependency().partitioner()
    }

    fn read_record_at(&self, offset: usize) -> Result<&[u8]> {
        let header = self
            .buffer
            .get(offset..offset + LENGTH_PREFIX)
            .ok_or_else(|| {
                ShuffleError::Internal(format!("No record header at offset {offset}"))
            })?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]])
            as usize;
        let start = offset + LENGTH_PREFIX;
        self.buffer.get(start..start + len).ok_or_else(|| {
            ShuffleError::Internal(format!("Record at offset {offset} overruns buffer"))
        })
    }
}

impl ShuffleWriter for SerializedShuffleWriter {
    fn write(&mut self, record: Record) -> Result<()> {
        ensure_open(self.closed, self.shuffle_id, self.map_id)?;
        let partition = partition_for(self.partitioner(), &record.key)?;

        self.scratch.clear();
        self.handle
            .serializer()
            .inner()
            .serialize(&record, &mut self.scratch)?;
        let len = u32::try_from(self.scratch.len()).map_err(|_| {
            ShuffleError::Serialization(format!(
                "Serialized record of {} bytes is too large",
                self.scratch.len()
            ))
        })?;

        let pointer = PackedRecordPointer::try_new(partition, self.buffer.len() as u64)?;
        self.buffer.extend_from_slice(&len.to_le_bytes());
        self.buffer.extend_from_slice(&self.scratch);
        self.pointers.push(pointer);
        self.records_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<MapStatus> {
        ensure_open(self.closed, self.shuffle_id, self.map_id)?;
        self.closed = true;

        let num_partitions = self.partitioner().num_partitions();
        self.pointers.sort_unstable();

        let payload = self.buffer.len() - self.pointers.len() * LENGTH_PREFIX;
        let mut data = Vec::with_capacity(payload);
        let mut partition_lengths = vec![0u64; num_partitions];
        for pointer in &self.pointers {
            let bytes = self.read_record_at(pointer.offset() as usize)?;
            data.extend_from_slice(bytes);
            partition_lengths[pointer.partition_id()] += bytes.len() as u64;
        }

        self.buffer = Vec::new();
        self.pointers = Vec::new();
        commit_map_output(
            self.storage.as_ref(),
            self.shuffle_id,
            self.map_id,
            &data,
            partition_lengths,
            self.records_written,
        )
    }

    fn abort(&mut self) {
        self.closed = true;
        self.buffer = Vec::new();
        self.pointers = Vec::new();
    }
}
