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

//! Shuffle dependencies: the description of one shuffle boundary as handed
//! to the shuffle manager by the job driver.

use std::fmt::Debug;
use std::sync::Arc;

use md5::{Digest, Md5};

use crate::serializer::Serializer;

/// Identifier of a shuffle, unique within a job.
pub type ShuffleId = usize;

/// A key/value record moving through a shuffle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Maps record keys to output partitions.
pub trait Partitioner: Debug + Send + Sync {
    /// Number of output partitions.
    fn num_partitions(&self) -> usize;

    /// Output partition for `key`, in `0..num_partitions()`.
    fn partition(&self, key: &[u8]) -> usize;
}

/// Partitions keys by hash modulo the partition count.
///
/// Keys are hashed with MD5, so the partition of a key is the same across
/// processes and builds.
#[derive(Debug, Clone)]
pub struct HashPartitioner {
    num_partitions: usize,
}

impl HashPartitioner {
    pub fn new(num_partitions: usize) -> Self {
        Self { num_partitions }
    }
}

impl Partitioner for HashPartitioner {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn partition(&self, key: &[u8]) -> usize {
        if self.num_partitions <= 1 {
            return 0;
        }
        let mut digest = Md5::default();
        digest.update(key);
        let hash = digest.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash[..8]);
        (u64::from_le_bytes(prefix) % self.num_partitions as u64) as usize
    }
}

/// Combines values sharing a key while they are shuffled.
///
/// An aggregator requires access to deserialized values, so a shuffle that
/// carries one always runs on the general path.
pub trait Aggregator: Debug + Send + Sync {
    /// Merges `value` into the running combined value for `key`.
    fn merge(&self, key: &[u8], combined: Vec<u8>, value: &[u8]) -> Vec<u8>;
}

/// One shuffle boundary between two stages.
///
/// Immutable for the lifetime of the shuffle; registered once with the
/// [`ShuffleManager`](crate::manager::ShuffleManager).
#[derive(Debug, Clone)]
pub struct ShuffleDependency {
    shuffle_id: ShuffleId,
    partitioner: Arc<dyn Partitioner>,
    serializer: Arc<dyn Serializer>,
    aggregator: Option<Arc<dyn Aggregator>>,
}

impl ShuffleDependency {
    pub fn new(
        shuffle_id: ShuffleId,
        partitioner: Arc<dyn Partitioner>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            shuffle_id,
            partitioner,
            serializer,
            aggregator: None,
        }
    }

    /// Attaches an aggregator that combines values per key.
    pub fn with_aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn shuffle_id(&self) -> ShuffleId {
        self.shuffle_id
    }

    pub fn num_partitions(&self) -> usize {
        self.partitioner.num_partitions()
    }

    pub fn partitioner(&self) -> &Arc<dyn Partitioner> {
        &self.partitioner
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    pub fn aggregator(&self) -> Option<&Arc<dyn Aggregator>> {
        self.aggregator.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_partitioner_is_stable_and_in_range() {
        let partitioner = HashPartitioner::new(7);
        for i in 0..100u32 {
            let key = i.to_le_bytes();
            let p = partitioner.partition(&key);
            assert!(p < 7);
            assert_eq!(p, partitioner.partition(&key));
        }
    }

    #[test]
    fn hash_partitioner_matches_md5_prefix() {
        let partitioner = HashPartitioner::new(7);
        assert_eq!(partitioner.partition(b"apple"), 4);
        assert_eq!(partitioner.partition(b"pear"), 1);
        assert_eq!(HashPartitioner::new(1000).partition(b"key-0"), 252);
    }

    #[test]
    fn single_partition_takes_every_key() {
        let partitioner = HashPartitioner::new(1);
        assert_eq!(partitioner.partition(b"a"), 0);
        assert_eq!(partitioner.partition(b"zzz"), 0);
    }
}
