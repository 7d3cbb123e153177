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

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::{check_map_output, slice_block, ShuffleBlockId, ShuffleIndex, ShuffleStorage};
use crate::config::ShuffleConfig;
use crate::dependency::ShuffleId;
use crate::error::Result;

#[derive(Debug)]
struct MapOutput {
    data: Arc<Vec<u8>>,
    index: ShuffleIndex,
}

/// Keeps all map output in process memory. Suited to tests and standalone
/// execution where producers and consumers share one process.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    store: Mutex<HashMap<(ShuffleId, usize), MapOutput>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of producers with stored output.
    pub fn map_output_count(&self) -> usize {
        self.store.lock().len()
    }
}

impl ShuffleStorage for InMemoryStorage {
    fn initialize(&self, _config: &ShuffleConfig) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let remaining = self.map_output_count();
        if remaining > 0 {
            debug!("Dropping {remaining} in-memory map outputs on shutdown");
        }
        self.store.lock().clear();
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
        let output = MapOutput {
            data: Arc::new(data.to_vec()),
            index: index.clone(),
        };
        self.store.lock().insert((shuffle_id, map_id), output);
        Ok(())
    }

    fn read_block(&self, block_id: ShuffleBlockId) -> Result<Option<Vec<u8>>> {
        let (data, index) = {
            let store = self.store.lock();
            match store.get(&(block_id.shuffle_id, block_id.map_id)) {
                Some(output) => (output.data.clone(), output.index.clone()),
                None => return Ok(None),
            }
        };
        slice_block(block_id, &data, &index).map(Some)
    }

    fn delete_map_output(&self, shuffle_id: ShuffleId, map_id: usize) -> Result<()> {
        self.store.lock().remove(&(shuffle_id, map_id));
        Ok(())
    }

    fn purge_all(&self) -> Result<()> {
        self.store.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShuffleError;

    #[test]
    fn stores_and_slices_blocks() -> Result<()> {
        let storage = InMemoryStorage::new();
        let index = ShuffleIndex::from_partition_lengths(&[2, 1]);
        storage.write_map_output(4, 1, b"abc", &index)?;

        assert_eq!(
            storage.read_block(ShuffleBlockId::new(4, 1, 0))?,
            Some(b"ab".to_vec())
        );
        assert_eq!(
            storage.read_block(ShuffleBlockId::new(4, 1, 1))?,
            Some(b"c".to_vec())
        );
        assert_eq!(storage.read_block(ShuffleBlockId::new(4, 0, 0))?, None);
        Ok(())
    }

    #[test]
    fn rejects_index_not_matching_data() {
        let storage = InMemoryStorage::new();
        let index = ShuffleIndex::from_partition_lengths(&[2, 2]);
        let err = storage.write_map_output(4, 0, b"abc", &index).unwrap_err();
        assert!(matches!(err, ShuffleError::Internal(_)));
        assert_eq!(storage.map_output_count(), 0);
    }

    #[test]
    fn delete_and_purge() -> Result<()> {
        let storage = InMemoryStorage::new();
        let index = ShuffleIndex::from_partition_lengths(&[1]);
        storage.write_map_output(1, 0, b"a", &index)?;
        storage.write_map_output(1, 1, b"b", &index)?;
        storage.write_map_output(2, 0, b"c", &index)?;

        storage.delete_map_output(1, 0)?;
        storage.delete_map_output(1, 0)?;
        assert_eq!(storage.map_output_count(), 2);

        storage.purge_all()?;
        assert_eq!(storage.map_output_count(), 0);
        Ok(())
    }
}
