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

//! Shuffle handles: the frozen outcome of registering a shuffle.

use log::warn;

use crate::dependency::{ShuffleDependency, ShuffleId};
use crate::serializer::RelocatableSerializer;
use crate::strategy::ShuffleStrategy;

/// Handle for a shuffle running on the serialized path.
///
/// Carries a [`RelocatableSerializer`], so writers built from it never
/// re-check the serializer.
#[derive(Debug, Clone)]
pub struct SerializedShuffleHandle {
    num_maps: usize,
    dependency: ShuffleDependency,
    serializer: RelocatableSerializer,
}

impl SerializedShuffleHandle {
    pub fn dependency(&self) -> &ShuffleDependency {
        &self.dependency
    }

    pub fn num_maps(&self) -> usize {
        self.num_maps
    }

    pub fn serializer(&self) -> &RelocatableSerializer {
        &self.serializer
    }
}

/// Handle for a shuffle running on the general path.
#[derive(Debug, Clone)]
pub struct GeneralShuffleHandle {
    num_maps: usize,
    dependency: ShuffleDependency,
}

impl GeneralShuffleHandle {
    pub fn dependency(&self) -> &ShuffleDependency {
        &self.dependency
    }

    pub fn num_maps(&self) -> usize {
        self.num_maps
    }
}

/// Immutable result of registering a shuffle, handed to every task of it.
///
/// Only the [`ShuffleManager`](crate::manager::ShuffleManager) creates
/// handles.
#[derive(Debug, Clone)]
pub enum ShuffleHandle {
    SerializedSort(SerializedShuffleHandle),
    General(GeneralShuffleHandle),
}

impl ShuffleHandle {
    pub(crate) fn new(
        dependency: ShuffleDependency,
        num_maps: usize,
        strategy: ShuffleStrategy,
    ) -> Self {
        match strategy {
            ShuffleStrategy::SerializedSort => {
                match RelocatableSerializer::try_new(dependency.serializer().clone()) {
                    Some(serializer) => {
                        ShuffleHandle::SerializedSort(SerializedShuffleHandle {
                            num_maps,
                            dependency,
                            serializer,
                        })
                    }
                    None => {
                        warn!(
                            "Serializer of shuffle {} does not support relocation, using general shuffle",
                            dependency.shuffle_id()
                        );
                        ShuffleHandle::General(GeneralShuffleHandle {
                            num_maps,
                            dependency,
                        })
                    }
                }
            }
            ShuffleStrategy::General => ShuffleHandle::General(GeneralShuffleHandle {
                num_maps,
                dependency,
            }),
        }
    }

    pub fn shuffle_id(&self) -> ShuffleId {
        self.dependency().shuffle_id()
    }

    /// Number of producer tasks declared at registration.
    pub fn num_maps(&self) -> usize {
        match self {
            ShuffleHandle::SerializedSort(h) => h.num_maps(),
            ShuffleHandle::General(h) => h.num_maps(),
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.dependency().num_partitions()
    }

    pub fn dependency(&self) -> &ShuffleDependency {
        match self {
            ShuffleHandle::SerializedSort(h) => h.dependency(),
            ShuffleHandle::General(h) => h.dependency(),
        }
    }

    pub fn strategy(&self) -> ShuffleStrategy {
        match self {
            ShuffleHandle::SerializedSort(_) => ShuffleStrategy::SerializedSort,
            ShuffleHandle::General(_) => ShuffleStrategy::General,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::HashPartitioner;
    use crate::serializer::LengthPrefixedSerializer;
    use std::sync::Arc;

    fn dependency() -> ShuffleDependency {
        ShuffleDependency::new(
            3,
            Arc::new(HashPartitioner::new(4)),
            Arc::new(LengthPrefixedSerializer),
        )
    }

    #[test]
    fn handle_records_registration() {
        let handle = ShuffleHandle::new(dependency(), 2, ShuffleStrategy::SerializedSort);
        assert_eq!(handle.shuffle_id(), 3);
        assert_eq!(handle.num_maps(), 2);
        assert_eq!(handle.num_partitions(), 4);
        assert_eq!(handle.strategy(), ShuffleStrategy::SerializedSort);
        assert!(matches!(handle, ShuffleHandle::SerializedSort(_)));

        let handle = ShuffleHandle::new(dependency(), 2, ShuffleStrategy::General);
        assert_eq!(handle.strategy(), ShuffleStrategy::General);
    }
}
