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

//! Reader for a range of shuffle partitions.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use log::debug;

use crate::dependency::{Aggregator, Record};
use crate::error::Result;
use crate::handle::ShuffleHandle;
use crate::serializer::Serializer;
use crate::dependency::ShuffleId;
use crate::storage::{ShuffleBlockId, ShuffleStorage};

/// Walks the blocks of `maps` x `partitions` producer by producer, without
/// materializing them.
#[derive(Debug)]
struct BlockCursor {
    shuffle_id: ShuffleId,
    maps: Range<usize>,
    partitions: Range<usize>,
    map_id: usize,
    reduce_id: usize,
}

impl BlockCursor {
    fn new(shuffle_id: ShuffleId, maps: Range<usize>, partitions: Range<usize>) -> Self {
        Self {
            shuffle_id,
            map_id: maps.start,
            reduce_id: partitions.start,
            maps,
            partitions,
        }
    }

    fn exhaust(&mut self) {
        self.map_id = self.maps.end;
    }
}

impl Iterator for BlockCursor {
    type Item = ShuffleBlockId;

    fn next(&mut self) -> Option<ShuffleBlockId> {
        if self.partitions.is_empty() || self.map_id >= self.maps.end {
            return None;
        }
        let block_id = ShuffleBlockId::new(self.shuffle_id, self.map_id, self.reduce_id);
        self.reduce_id += 1;
        if self.reduce_id >= self.partitions.end {
            self.reduce_id = self.partitions.start;
            self.map_id += 1;
        }
        Some(block_id)
    }
}

/// Yields every record whose output partition falls in the requested range,
/// across the requested producers.
///
/// Blocks are fetched lazily, one at a time, producer by producer. There is
/// no ordering guarantee across producers. For a general shuffle with an
/// aggregator, all blocks are fetched on the first call to `next` and values
/// are combined per key before anything is yielded.
#[derive(Debug)]
pub struct BlockStoreShuffleReader {
    storage: Arc<dyn ShuffleStorage>,
    serializer: Arc<dyn Serializer>,
    aggregator: Option<Arc<dyn Aggregator>>,
    pending: BlockCursor,
    current: std::vec::IntoIter<Record>,
    bytes_read: u64,
    records_read: u64,
    done: bool,
}

impl BlockStoreShuffleReader {
    pub fn new(
        handle: &ShuffleHandle,
        storage: Arc<dyn ShuffleStorage>,
        maps: Range<usize>,
        partitions: Range<usize>,
    ) -> Self {
        let (serializer, aggregator) = match handle {
            ShuffleHandle::SerializedSort(h) => (h.serializer().inner().clone(), None),
            ShuffleHandle::General(h) => (
                h.dependency().serializer().clone(),
                h.dependency().aggregator().cloned(),
            ),
        };

        Self {
            storage,
            serializer,
            aggregator,
            pending: BlockCursor::new(handle.shuffle_id(), maps, partitions),
            current: Vec::new().into_iter(),
            bytes_read: 0,
            records_read: 0,
            done: false,
        }
    }

    /// Total bytes fetched from storage so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Records decoded from storage so far, before any aggregation.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Releases the reader. Blocks not yet fetched are skipped.
    pub fn close(&mut self) {
        self.done = true;
        self.pending.exhaust();
        self.current = Vec::new().into_iter();
    }

    /// Fetches the next non-empty block, returning false once every block
    /// has been fetched.
    fn fetch_next_block(&mut self) -> Result<bool> {
        while let Some(block_id) = self.pending.next() {
            let Some(bytes) = self.storage.read_block(block_id)? else {
                debug!("No output for {block_id}, skipping");
                continue;
            };
            if bytes.is_empty() {
                continue;
            }

            self.bytes_read += bytes.len() as u64;
            let records = self.serializer.deserialize(&bytes)?;
            self.records_read += records.len() as u64;
            self.current = records.into_iter();
            return Ok(true);
        }
        Ok(false)
    }

    fn combine_all(&mut self, aggregator: &Arc<dyn Aggregator>) -> Result<()> {
        let mut combined: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        while self.fetch_next_block()? {
            for record in std::mem::take(&mut self.current) {
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
        }
        self.current = combined
            .into_iter()
            .map(|(key, value)| Record { key, value })
            .collect::<Vec<_>>()
            .into_iter();
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        if let Some(aggregator) = self.aggregator.take() {
            self.combine_all(&aggregator)?;
        }
        loop {
            if let Some(record) = self.current.next() {
                return Ok(Some(record));
            }
            if !self.fetch_next_block()? {
                return Ok(None);
            }
        }
    }
}

impl Iterator for BlockStoreShuffleReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.close();
                Some(Err(e))
            }
        }
    }
}
