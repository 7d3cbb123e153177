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

//! The shuffle manager: registers shuffles, hands out writers and readers,
//! and tears shuffles down.
//!
//! Lifecycle of the manager:
//!
//! ```text
//! Created --start--> Running --stop--> Stopped
//! ```
//!
//! Lifecycle of a shuffle id while the manager is running:
//!
//! ```text
//! register_shuffle --> get_writer / get_reader ... --> unregister_shuffle
//! ```
//!
//! `register_shuffle` only selects the strategy and returns a handle. The
//! registry entry holding the producer count is created by the first
//! `get_writer`, so a shuffle whose producers never run leaves no entry.

use std::fmt::{Display, Formatter};
use std::ops::Range;
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::RwLock;

use crate::config::ShuffleConfig;
use crate::dependency::{ShuffleDependency, ShuffleId};
use crate::error::{Result, ShuffleError};
use crate::handle::ShuffleHandle;
use crate::reader::BlockStoreShuffleReader;
use crate::registry::ShuffleRegistry;
use crate::storage::ShuffleStorage;
use crate::strategy::select_strategy;
use crate::writer::{GeneralShuffleWriter, SerializedShuffleWriter, ShuffleWriter};

/// Process-wide state of a [`ShuffleManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Created,
    Running,
    Stopped,
}

impl Display for ManagerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerState::Created => write!(f, "created"),
            ManagerState::Running => write!(f, "running"),
            ManagerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Coordinates shuffle execution for one process.
///
/// Owns the [`ShuffleStorage`] it is built with: the storage is initialized
/// by [`start`](Self::start) and shut down by [`stop`](Self::stop).
#[derive(Debug)]
pub struct ShuffleManager {
    config: ShuffleConfig,
    registry: ShuffleRegistry,
    storage: Arc<dyn ShuffleStorage>,
    state: RwLock<ManagerState>,
}

impl ShuffleManager {
    pub fn new(config: ShuffleConfig, storage: Arc<dyn ShuffleStorage>) -> Self {
        Self {
            config,
            registry: ShuffleRegistry::new(),
            storage,
            state: RwLock::new(ManagerState::Created),
        }
    }

    pub fn config(&self) -> &ShuffleConfig {
        &self.config
    }

    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            ManagerState::Running => Ok(()),
            state => Err(ShuffleError::NotRunning(state)),
        }
    }

    /// Initializes the storage. Must run before any shuffle is registered.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.write();
        match *state {
            ManagerState::Created => {
                self.storage.initialize(&self.config)?;
                *state = ManagerState::Running;
                info!("Shuffle manager started");
                Ok(())
            }
            ManagerState::Running => {
                warn!("Shuffle manager already started");
                Ok(())
            }
            ManagerState::Stopped => Err(ShuffleError::NotRunning(ManagerState::Stopped)),
        }
    }

    /// Selects the execution strategy for `dependency` and freezes it into a
    /// handle for the shuffle's `num_maps` producer tasks.
    pub fn register_shuffle(
        &self,
        dependency: ShuffleDependency,
        num_maps: usize,
    ) -> Result<ShuffleHandle> {
        self.ensure_running()?;
        self.registry.reinstate(dependency.shuffle_id());
        let strategy = select_strategy(&dependency, &self.config);
        info!(
            "Registered shuffle {} with {num_maps} maps and {} partitions using {strategy} shuffle",
            dependency.shuffle_id(),
            dependency.num_partitions()
        );
        Ok(ShuffleHandle::new(dependency, num_maps, strategy))
    }

    /// Creates the writer for producer `map_id` of the shuffle.
    ///
    /// Records the shuffle's producer count on first use. Repeated calls for
    /// the same shuffle, including speculative attempts of the same
    /// producer, are safe.
    pub fn get_writer(
        &self,
        handle: &ShuffleHandle,
        map_id: usize,
    ) -> Result<Box<dyn ShuffleWriter>> {
        self.ensure_running()?;
        let shuffle_id = handle.shuffle_id();
        if self.registry.is_retired(shuffle_id) {
            return Err(ShuffleError::UnknownShuffle(shuffle_id));
        }
        if map_id >= handle.num_maps() {
            return Err(ShuffleError::InvalidMapIndex {
                shuffle_id,
                map_id,
                num_maps: handle.num_maps(),
            });
        }

        self.registry.register(shuffle_id, handle.num_maps());

        let initial_buffer_size = self.config.initial_buffer_size();
        let storage = self.storage.clone();
        let writer: Box<dyn ShuffleWriter> = match handle {
            ShuffleHandle::SerializedSort(h) => Box::new(SerializedShuffleWriter::new(
                h.clone(),
                map_id,
                storage,
                initial_buffer_size,
            )),
            ShuffleHandle::General(h) => Box::new(GeneralShuffleWriter::new(
                h.clone(),
                map_id,
                storage,
                initial_buffer_size,
            )),
        };
        debug!(
            "Created {} writer for shuffle {shuffle_id} map {map_id}",
            handle.strategy()
        );
        Ok(writer)
    }

    /// Creates a reader over output partitions `[partitions.start,
    /// partitions.end)` of every recorded producer.
    pub fn get_reader(
        &self,
        handle: &ShuffleHandle,
        partitions: Range<usize>,
    ) -> Result<BlockStoreShuffleReader> {
        let num_maps = self.live_num_maps(handle.shuffle_id())?;
        self.get_reader_for_maps(handle, 0..num_maps, partitions)
    }

    /// Like [`get_reader`](Self::get_reader), restricted to producers
    /// `[maps.start, maps.end)`.
    pub fn get_reader_for_maps(
        &self,
        handle: &ShuffleHandle,
        maps: Range<usize>,
        partitions: Range<usize>,
    ) -> Result<BlockStoreShuffleReader> {
        self.ensure_running()?;
        let shuffle_id = handle.shuffle_id();
        let num_maps = self.live_num_maps(shuffle_id)?;

        let num_partitions = handle.num_partitions();
        if partitions.start > partitions.end || partitions.end > num_partitions {
            return Err(ShuffleError::InvalidPartitionRange {
                shuffle_id,
                start: partitions.start,
                end: partitions.end,
                num_partitions,
            });
        }
        if maps.start > maps.end || maps.end > num_maps {
            return Err(ShuffleError::InvalidMapIndex {
                shuffle_id,
                map_id: maps.end,
                num_maps,
            });
        }

        debug!(
            "Created reader for shuffle {shuffle_id} maps {maps:?} partitions {partitions:?}"
        );
        Ok(BlockStoreShuffleReader::new(
            handle,
            self.storage.clone(),
            maps,
            partitions,
        ))
    }

    fn live_num_maps(&self, shuffle_id: ShuffleId) -> Result<usize> {
        self.registry
            .get(shuffle_id)
            .ok_or(ShuffleError::UnknownShuffle(shuffle_id))
    }

    /// Tears down `shuffle_id`, purging its output if
    /// `ballista.shuffle.purge_output` is set.
    pub fn unregister_shuffle(&self, shuffle_id: ShuffleId) -> Result<bool> {
        self.unregister_shuffle_with(shuffle_id, self.config.purge_output())
    }

    /// Tears down `shuffle_id`. With `purge_output`, deletes the output of
    /// every recorded producer; a failed delete is logged and the remaining
    /// producers are still purged.
    ///
    /// Unregistering an unknown or already unregistered id is a no-op.
    /// Returns true once the registry entry has been handled.
    pub fn unregister_shuffle_with(
        &self,
        shuffle_id: ShuffleId,
        purge_output: bool,
    ) -> Result<bool> {
        self.ensure_running()?;
        match self.registry.remove(shuffle_id) {
            Some(num_maps) if purge_output => {
                self.purge_map_outputs(shuffle_id, num_maps);
            }
            Some(num_maps) => {
                info!("Unregistered shuffle {shuffle_id} with {num_maps} maps, output kept");
            }
            None => {
                debug!("Shuffle {shuffle_id} has no recorded producers, nothing to clean");
            }
        }
        Ok(true)
    }

    fn purge_map_outputs(&self, shuffle_id: ShuffleId, num_maps: usize) {
        let mut failed = 0;
        for map_id in 0..num_maps {
            if let Err(e) = self.storage.delete_map_output(shuffle_id, map_id) {
                warn!("Failed to delete output of shuffle {shuffle_id} map {map_id}: {e}");
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(
                "Unregistered shuffle {shuffle_id}, {failed} of {num_maps} map outputs could not be deleted"
            );
        } else {
            info!("Unregistered shuffle {shuffle_id}, deleted {num_maps} map outputs");
        }
    }

    /// Stops the manager: purges all output if `ballista.shuffle.purge_output`
    /// is set, then shuts the storage down. Calling it again is a no-op.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.write();
        match *state {
            ManagerState::Stopped => {
                debug!("Shuffle manager already stopped");
                return Ok(());
            }
            ManagerState::Created => {
                // storage was never initialized
                *state = ManagerState::Stopped;
                return Ok(());
            }
            ManagerState::Running => {}
        }
        *state = ManagerState::Stopped;

        let live = self.registry.shuffle_ids();
        if !live.is_empty() {
            warn!("Stopping shuffle manager with shuffles still registered: {live:?}");
        }

        if self.config.purge_output() {
            if let Err(e) = self.storage.purge_all() {
                error!("Failed to purge shuffle output on stop: {e}");
            }
        }
        if let Err(e) = self.storage.shutdown() {
            error!("Failed to shut down shuffle storage: {e}");
        }
        info!("Shuffle manager stopped");
        Ok(())
    }

    /// Ids of shuffles with a recorded producer count.
    pub fn registered_shuffles(&self) -> Vec<ShuffleId> {
        self.registry.shuffle_ids()
    }

    /// Producer count recorded for `shuffle_id`, if it is live.
    pub fn producer_count(&self, shuffle_id: ShuffleId) -> Option<usize> {
        self.registry.get(shuffle_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS, BALLISTA_SHUFFLE_PURGE_OUTPUT,
    };
    use crate::dependency::{HashPartitioner, Record};
    use crate::serializer::LengthPrefixedSerializer;
    use crate::storage::InMemoryStorage;
    use crate::strategy::ShuffleStrategy;

    fn dependency(shuffle_id: ShuffleId, partitions: usize) -> ShuffleDependency {
        ShuffleDependency::new(
            shuffle_id,
            Arc::new(HashPartitioner::new(partitions)),
            Arc::new(LengthPrefixedSerializer),
        )
    }

    fn running_manager(storage: Arc<InMemoryStorage>) -> ShuffleManager {
        let config = ShuffleConfig::default()
            .with_setting(BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS, "5")
            .unwrap();
        let manager = ShuffleManager::new(config, storage);
        manager.start().unwrap();
        manager
    }

    #[test]
    fn registration_selects_strategy_without_recording_producers() -> Result<()> {
        let manager = running_manager(Arc::new(InMemoryStorage::new()));

        let handle = manager.register_shuffle(dependency(7, 3), 4)?;
        assert_eq!(handle.strategy(), ShuffleStrategy::SerializedSort);
        assert_eq!(manager.producer_count(7), None);

        let handle = manager.register_shuffle(dependency(8, 10), 4)?;
        assert_eq!(handle.strategy(), ShuffleStrategy::General);
        Ok(())
    }

    #[test]
    fn first_writer_records_producer_count() -> Result<()> {
        let manager = running_manager(Arc::new(InMemoryStorage::new()));
        let handle = manager.register_shuffle(dependency(7, 3), 4)?;

        let _w0 = manager.get_writer(&handle, 0)?;
        let _w0_again = manager.get_writer(&handle, 0)?;
        let _w3 = manager.get_writer(&handle, 3)?;
        assert_eq!(manager.producer_count(7), Some(4));
        assert_eq!(manager.registered_shuffles(), vec![7]);
        Ok(())
    }

    #[test]
    fn writer_rejects_out_of_range_map() -> Result<()> {
        let manager = running_manager(Arc::new(InMemoryStorage::new()));
        let handle = manager.register_shuffle(dependency(7, 3), 2)?;
        let err = manager.get_writer(&handle, 2).unwrap_err();
        assert!(matches!(err, ShuffleError::InvalidMapIndex { map_id: 2, .. }));
        assert!(err.is_contract_violation());
        Ok(())
    }

    #[test]
    fn round_trip_through_manager() -> Result<()> {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = running_manager(storage.clone());
        let handle = manager.register_shuffle(dependency(1, 3), 2)?;

        for map_id in 0..2 {
            let mut writer = manager.get_writer(&handle, map_id)?;
            for i in 0..10 {
                writer.write(Record::new(format!("k{i}"), format!("m{map_id}")))?;
            }
            writer.close()?;
        }

        let records = manager
            .get_reader(&handle, 0..3)?
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(records.len(), 20);

        let partitioner = handle.dependency().partitioner().clone();
        for record in manager.get_reader(&handle, 1..2)? {
            assert_eq!(partitioner.partition(&record?.key), 1);
        }
        Ok(())
    }

    #[test]
    fn reader_requires_live_shuffle() -> Result<()> {
        let manager = running_manager(Arc::new(InMemoryStorage::new()));
        let handle = manager.register_shuffle(dependency(2, 3), 1)?;

        let err = manager.get_reader(&handle, 0..3).unwrap_err();
        assert!(matches!(err, ShuffleError::UnknownShuffle(2)));

        manager.get_writer(&handle, 0)?.close()?;
        let err = manager.get_reader(&handle, 2..4).unwrap_err();
        assert!(matches!(err, ShuffleError::InvalidPartitionRange { .. }));
        let err = manager.get_reader_for_maps(&handle, 0..2, 0..3).unwrap_err();
        assert!(matches!(err, ShuffleError::InvalidMapIndex { .. }));
        Ok(())
    }

    #[test]
    fn unregister_without_purge_keeps_output() -> Result<()> {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = running_manager(storage.clone());
        let handle = manager.register_shuffle(dependency(7, 3), 4)?;
        manager.get_writer(&handle, 0)?.close()?;

        assert!(manager.unregister_shuffle_with(7, false)?);
        assert_eq!(manager.producer_count(7), None);
        assert_eq!(storage.map_output_count(), 1);
        Ok(())
    }

    #[test]
    fn unregister_with_purge_deletes_output() -> Result<()> {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = running_manager(storage.clone());
        let handle = manager.register_shuffle(dependency(7, 3), 2)?;
        for map_id in 0..2 {
            manager.get_writer(&handle, map_id)?.close()?;
        }

        assert!(manager.unregister_shuffle(7)?);
        assert_eq!(storage.map_output_count(), 0);
        Ok(())
    }

    #[test]
    fn unregistered_shuffle_rejects_writers_and_readers() -> Result<()> {
        let manager = running_manager(Arc::new(InMemoryStorage::new()));
        let handle = manager.register_shuffle(dependency(7, 3), 1)?;
        manager.get_writer(&handle, 0)?.close()?;

        assert!(manager.unregister_shuffle(7)?);
        assert!(manager.unregister_shuffle(7)?);
        assert!(matches!(
            manager.get_writer(&handle, 0).unwrap_err(),
            ShuffleError::UnknownShuffle(7)
        ));
        assert!(matches!(
            manager.get_reader(&handle, 0..1).unwrap_err(),
            ShuffleError::UnknownShuffle(7)
        ));
        Ok(())
    }

    #[test]
    fn unregister_unknown_id_is_noop() -> Result<()> {
        let manager = running_manager(Arc::new(InMemoryStorage::new()));
        assert!(manager.unregister_shuffle(42)?);

        let handle = manager.register_shuffle(dependency(42, 3), 1)?;
        let mut writer = manager.get_writer(&handle, 0)?;
        writer.write(Record::new("k", "v"))?;
        writer.close()?;
        assert_eq!(manager.producer_count(42), Some(1));
        Ok(())
    }

    #[test]
    fn registering_again_after_teardown_allows_writers() -> Result<()> {
        let manager = running_manager(Arc::new(InMemoryStorage::new()));
        let handle = manager.register_shuffle(dependency(7, 3), 1)?;
        manager.get_writer(&handle, 0)?.close()?;
        assert!(manager.unregister_shuffle(7)?);
        assert!(manager.get_writer(&handle, 0).is_err());

        let handle = manager.register_shuffle(dependency(7, 3), 2)?;
        manager.get_writer(&handle, 1)?.close()?;
        assert_eq!(manager.producer_count(7), Some(2));
        Ok(())
    }

    #[test]
    fn operations_fail_outside_running_state() -> Result<()> {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = ShuffleManager::new(ShuffleConfig::default(), storage);
        assert!(matches!(
            manager.register_shuffle(dependency(1, 2), 1).unwrap_err(),
            ShuffleError::NotRunning(ManagerState::Created)
        ));

        manager.start()?;
        let handle = manager.register_shuffle(dependency(1, 2), 1)?;
        manager.stop()?;
        manager.stop()?;
        assert_eq!(manager.state(), ManagerState::Stopped);

        assert!(matches!(
            manager.get_writer(&handle, 0).unwrap_err(),
            ShuffleError::NotRunning(ManagerState::Stopped)
        ));
        assert!(manager.unregister_shuffle(1).is_err());
        assert!(manager.start().is_err());
        Ok(())
    }

    #[test]
    fn stop_purges_when_configured() -> Result<()> {
        let storage = Arc::new(InMemoryStorage::new());
        let manager = running_manager(storage.clone());
        let handle = manager.register_shuffle(dependency(3, 2), 1)?;
        manager.get_writer(&handle, 0)?.close()?;

        manager.stop()?;
        assert_eq!(storage.map_output_count(), 0);
        Ok(())
    }

    #[test]
    fn stop_keeps_output_when_purge_disabled() -> Result<()> {
        let storage = Arc::new(InMemoryStorage::new());
        let config = ShuffleConfig::default()
            .with_setting(BALLISTA_SHUFFLE_PURGE_OUTPUT, "false")?;
        let manager = ShuffleManager::new(config, storage.clone());
        manager.start()?;
        let handle = manager.register_shuffle(dependency(3, 2), 1)?;
        manager.get_writer(&handle, 0)?.close()?;

        assert!(manager.unregister_shuffle(3)?);
        assert_eq!(storage.map_output_count(), 1);
        Ok(())
    }
}
