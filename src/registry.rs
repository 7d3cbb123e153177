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

//! Concurrent table of live shuffles and their producer counts.

use dashmap::{DashMap, DashSet};
use log::debug;

use crate::dependency::ShuffleId;

/// Maps each live shuffle id to the number of producer tasks recorded when
/// it was first registered.
///
/// Operations on distinct ids touch distinct shards and do not contend.
/// `register` and `remove` on the same id are linearizable, so exactly one
/// caller of `remove` observes the recorded count.
#[derive(Debug, Default)]
pub struct ShuffleRegistry {
    num_maps: DashMap<ShuffleId, usize>,
    /// Ids torn down since their last registration. Writers for them are
    /// refused until the id is registered again.
    retired: DashSet<ShuffleId>,
}

impl ShuffleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `num_maps` for `shuffle_id` unless an entry already exists.
    /// The first registration wins.
    pub fn register(&self, shuffle_id: ShuffleId, num_maps: usize) {
        let entry = self.num_maps.entry(shuffle_id).or_insert(num_maps);
        if *entry != num_maps {
            debug!(
                "Shuffle {shuffle_id} already registered with {} maps, ignoring {num_maps}",
                *entry
            );
        }
    }

    pub fn get(&self, shuffle_id: ShuffleId) -> Option<usize> {
        self.num_maps.get(&shuffle_id).map(|entry| *entry)
    }

    /// Removes the entry for `shuffle_id` and returns its producer count.
    /// An id is retired only when an entry was removed.
    pub fn remove(&self, shuffle_id: ShuffleId) -> Option<usize> {
        let (_, num_maps) = self.num_maps.remove(&shuffle_id)?;
        self.retired.insert(shuffle_id);
        Some(num_maps)
    }

    /// Clears a retired `shuffle_id` so a fresh registration can produce.
    pub fn reinstate(&self, shuffle_id: ShuffleId) {
        if self.retired.remove(&shuffle_id).is_some() {
            debug!("Shuffle {shuffle_id} registered again after teardown");
        }
    }

    /// Returns true if `shuffle_id` has been torn down.
    pub fn is_retired(&self, shuffle_id: ShuffleId) -> bool {
        self.retired.contains(&shuffle_id)
    }

    /// Ids of all live shuffles, in no particular order.
    pub fn shuffle_ids(&self) -> Vec<ShuffleId> {
        self.num_maps.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.num_maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_maps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_registration_wins() {
        let registry = ShuffleRegistry::new();
        registry.register(7, 4);
        registry.register(7, 9);
        assert_eq!(registry.get(7), Some(4));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_is_observed_once() {
        let registry = ShuffleRegistry::new();
        registry.register(7, 4);
        assert_eq!(registry.remove(7), Some(4));
        assert_eq!(registry.remove(7), None);
        assert_eq!(registry.get(7), None);
        assert!(registry.is_retired(7));
        assert!(registry.is_empty());
    }

    #[test]
    fn removing_unknown_id_leaves_it_usable() {
        let registry = ShuffleRegistry::new();
        assert_eq!(registry.remove(3), None);
        assert!(!registry.is_retired(3));
    }

    #[test]
    fn reinstate_clears_retired_id() {
        let registry = ShuffleRegistry::new();
        registry.register(3, 2);
        assert_eq!(registry.remove(3), Some(2));
        assert!(registry.is_retired(3));

        registry.reinstate(3);
        assert!(!registry.is_retired(3));
        registry.register(3, 5);
        assert_eq!(registry.get(3), Some(5));
    }

    #[test]
    fn concurrent_registration_keeps_one_entry() {
        let registry = Arc::new(ShuffleRegistry::new());
        std::thread::scope(|s| {
            for _ in 0..16 {
                let registry = registry.clone();
                s.spawn(move || {
                    for id in 0..64 {
                        registry.register(id, 3);
                    }
                });
            }
        });

        assert_eq!(registry.len(), 64);
        let mut ids = registry.shuffle_ids();
        ids.sort_unstable();
        assert_eq!(ids, (0..64).collect::<Vec<_>>());
        assert!(ids.iter().all(|id| registry.get(*id) == Some(3)));
    }

    #[test]
    fn concurrent_removal_has_single_winner() {
        let registry = Arc::new(ShuffleRegistry::new());
        registry.register(1, 5);

        let winners = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let registry = registry.clone();
                    s.spawn(move || registry.remove(1))
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        assert_eq!(winners, vec![5]);
    }
}
