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

//! Writer for the general shuffle path.
//!
//! Records stay deserialized in a per-partition buffer until close. When the
//! shuffle carries an aggregator, values are combined per key as they
//! arrive (map-side combine), so each partition holds one record per key.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{commit_map_output, ensure_open, partition_for, MapStatus, ShuffleWriter};
use crate::dependency::{Aggregator, Record, ShuffleId};
use crate::error::Result;
use crate::handle::GeneralShuffleHandle;
use crate::storage::ShuffleStorage;

/// Buffered records of a single output partition.
#[derive(Debug)]
enum PartitionBuffer {
    Records(Vec<Record>),
    Combined(BTreeMap<Vec<u8>, Vec<u8>>),
}

impl PartitionBuffer {
    fn insert(&mut self, record: Record, aggregator: Option<&Arc<dyn Aggregator>>) {
        match (self, aggregator) {
            (PartitionBuffer::Combined(combined), Some(aggregator)) => {
                match combined.entry(record.key) {
                    Entry::Occupied(mut e) => {
                        let current = std::mem::take(e.get_mut());
                        let merged = aggregator.merge(e.key(), current, &record.value);
                        *e.get_mut() = merged;
                    }
                    Entry::Vacant(e) => {
                        e.insert(record.value);
                    }
                }
            }
            (PartitionBuffer::Records(records), _) => records.push(record),
            (PartitionBuffer::Combined(combined), None) => {
                combined.insert(record.key, record.value);
            }
        }
    }

    fn drain(&mut self) -> Vec<Record> {
        match self {
            PartitionBuffer::Records(records) => std::mem::take(records),
            PartitionBuffer::Combined(combined) => std::mem::take(combined)
                .into_iter()
                .map(|(key, value)| Record { key, value })
                .collect(),
        }
    }
}

#[derive(Debug)]
pub struct GeneralShuffleWriter {
    shuffle_id: ShuffleId,
    map_id: usize,
    handle: GeneralShuffleHandle,
    storage: Arc<dyn ShuffleStorage>,
    partitions: Vec<PartitionBuffer>,
    initial_buffer_size: usize,
    records_written: u64,
    closed: bool,
}

impl GeneralShuffleWriter {
    pub fn new(
        handle: GeneralShuffleHandle,
        map_id: usize,
        storage: Arc<dyn ShuffleStorage>,
        initial_buffer_size: usize,
    ) -> Self {
        let dependency = handle.dependency();
        let partitions = (0..dependency.num_partitions())
            .map(|_| match dependency.aggregator() {
                Some(_) => PartitionBuffer::Combined(BTreeMap::new()),
                None => PartitionBuffer::Records(Vec::new()),
            })
            .collect();
        Self {
            shuffle_id: dependency.shuffle_id(),
            map_id,
            handle,
            storage,
            partitions,
            initial_buffer_size,
            records_written: 0,
            closed: false,
        }
    }
}

impl ShuffleWriter for GeneralShuffleWriter {
    fn write(&mut self, record: Record) -> Result<()> {
        ensure_open(self.closed, self.shuffle_id, self.map_id)?;
        let dependency = self.handle.dependency();
        let partition = partition_for(dependency.partitioner(), &record.key)?;
        self.partitions[partition].insert(record, dependency.aggregator());
        self.records_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<MapStatus> {
        ensure_open(self.closed, self.shuffle_id, self.map_id)?;
        self.closed = true;

        let serializer = self.handle.dependency().serializer();
        let mut data = Vec::with_capacity(self.initial_buffer_size);
        let mut partition_lengths = Vec::with_capacity(self.partitions.len());
        for partition in &mut self.partitions {
            let start = data.len();
            // each partition is encoded on its own so its bytes stand alone
            for record in partition.drain() {
                serializer.serialize(&record, &mut data)?;
            }
            partition_lengths.push((data.len() - start) as u64);
        }

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
        for partition in &mut self.partitions {
            partition.drain();
        }
    }
}
