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

//! Selection of the execution strategy for a shuffle.
//!
//! A shuffle runs on the serialized path unless one of a fixed, ordered list
//! of conditions disqualifies it. The first matching condition wins.

use std::fmt::{Display, Formatter};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::ShuffleConfig;
use crate::dependency::ShuffleDependency;

/// How a shuffle's writers and readers execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShuffleStrategy {
    /// Records are serialized once and moved as opaque byte ranges.
    SerializedSort,
    /// Records are kept deserialized; supports aggregation.
    General,
}

impl Display for ShuffleStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ShuffleStrategy::SerializedSort => write!(f, "fast-serialized"),
            ShuffleStrategy::General => write!(f, "general"),
        }
    }
}

/// A reason a shuffle can not use the serialized path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disqualification {
    /// The configuration forces the general path.
    ForcedGeneral,
    /// The serializer does not support relocation of serialized records.
    SerializerNotRelocatable,
    /// An aggregator needs deserialized values.
    HasAggregator,
    /// More output partitions than the serialized path can address.
    TooManyPartitions {
        num_partitions: usize,
        max_partitions: usize,
    },
}

impl Display for Disqualification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Disqualification::ForcedGeneral => {
                write!(f, "the general path is forced by configuration")
            }
            Disqualification::SerializerNotRelocatable => {
                write!(f, "the serializer does not support relocation")
            }
            Disqualification::HasAggregator => {
                write!(f, "an aggregator is attached")
            }
            Disqualification::TooManyPartitions {
                num_partitions,
                max_partitions,
            } => write!(
                f,
                "it has {num_partitions} partitions, more than the maximum of {max_partitions}"
            ),
        }
    }
}

type Check = fn(&ShuffleDependency, &ShuffleConfig) -> Option<Disqualification>;

/// Disqualifying conditions in evaluation order.
const CHECKS: [Check; 4] = [
    forced_general,
    serializer_not_relocatable,
    has_aggregator,
    too_many_partitions,
];

pub fn forced_general(
    _dependency: &ShuffleDependency,
    config: &ShuffleConfig,
) -> Option<Disqualification> {
    config
        .force_general()
        .then_some(Disqualification::ForcedGeneral)
}

pub fn serializer_not_relocatable(
    dependency: &ShuffleDependency,
    _config: &ShuffleConfig,
) -> Option<Disqualification> {
    (!dependency.serializer().supports_relocation())
        .then_some(Disqualification::SerializerNotRelocatable)
}

pub fn has_aggregator(
    dependency: &ShuffleDependency,
    _config: &ShuffleConfig,
) -> Option<Disqualification> {
    dependency
        .aggregator()
        .map(|_| Disqualification::HasAggregator)
}

pub fn too_many_partitions(
    dependency: &ShuffleDependency,
    config: &ShuffleConfig,
) -> Option<Disqualification> {
    let num_partitions = dependency.num_partitions();
    let max_partitions = config.max_serialized_partitions();
    (num_partitions > max_partitions).then_some(Disqualification::TooManyPartitions {
        num_partitions,
        max_partitions,
    })
}

/// Returns the first condition that rules out the serialized path, if any.
pub fn disqualification(
    dependency: &ShuffleDependency,
    config: &ShuffleConfig,
) -> Option<Disqualification> {
    CHECKS.iter().find_map(|check| check(dependency, config))
}

/// Chooses the strategy for `dependency`. Pure apart from debug logging.
pub fn select_strategy(
    dependency: &ShuffleDependency,
    config: &ShuffleConfig,
) -> ShuffleStrategy {
    match disqualification(dependency, config) {
        Some(reason) => {
            debug!(
                "Can't use serialized shuffle for shuffle {} because {reason}",
                dependency.shuffle_id()
            );
            ShuffleStrategy::General
        }
        None => {
            debug!(
                "Can use serialized shuffle for shuffle {}",
                dependency.shuffle_id()
            );
            ShuffleStrategy::SerializedSort
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BALLISTA_SHUFFLE_FORCE_GENERAL, BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS,
    };
    use crate::dependency::{Aggregator, HashPartitioner, Record};
    use crate::error::Result;
    use crate::serializer::{LengthPrefixedSerializer, Serializer};
    use std::sync::Arc;

    #[derive(Debug)]
    struct StatefulSerializer;

    impl Serializer for StatefulSerializer {
        fn supports_relocation(&self) -> bool {
            false
        }
        fn serialize(&self, _: &Record, _: &mut Vec<u8>) -> Result<()> {
            Ok(())
        }
        fn deserialize(&self, _: &[u8]) -> Result<Vec<Record>> {
            Ok(vec![])
        }
    }

    #[derive(Debug)]
    struct Concat;

    impl Aggregator for Concat {
        fn merge(&self, _key: &[u8], mut combined: Vec<u8>, value: &[u8]) -> Vec<u8> {
            combined.extend_from_slice(value);
            combined
        }
    }

    fn dependency(partitions: usize) -> ShuffleDependency {
        ShuffleDependency::new(
            7,
            Arc::new(HashPartitioner::new(partitions)),
            Arc::new(LengthPrefixedSerializer),
        )
    }

    fn config_with_max(max: usize) -> ShuffleConfig {
        ShuffleConfig::default()
            .with_setting(BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS, max.to_string())
            .unwrap()
    }

    #[test]
    fn small_relocatable_shuffle_uses_serialized_path() {
        let config = config_with_max(5);
        assert_eq!(
            select_strategy(&dependency(3), &config),
            ShuffleStrategy::SerializedSort
        );
        // the limit itself is still addressable
        assert_eq!(
            select_strategy(&dependency(5), &config),
            ShuffleStrategy::SerializedSort
        );
    }

    #[test]
    fn too_many_partitions_falls_back() {
        let config = config_with_max(5);
        assert_eq!(
            disqualification(&dependency(10), &config),
            Some(Disqualification::TooManyPartitions {
                num_partitions: 10,
                max_partitions: 5
            })
        );
        assert_eq!(
            select_strategy(&dependency(10), &config),
            ShuffleStrategy::General
        );
    }

    #[test]
    fn non_relocatable_serializer_falls_back() {
        let dep = ShuffleDependency::new(
            1,
            Arc::new(HashPartitioner::new(2)),
            Arc::new(StatefulSerializer),
        );
        let config = ShuffleConfig::default();
        assert_eq!(
            serializer_not_relocatable(&dep, &config),
            Some(Disqualification::SerializerNotRelocatable)
        );
        assert_eq!(select_strategy(&dep, &config), ShuffleStrategy::General);
    }

    #[test]
    fn aggregator_falls_back() {
        let dep = dependency(2).with_aggregator(Arc::new(Concat));
        let config = ShuffleConfig::default();
        assert_eq!(
            has_aggregator(&dep, &config),
            Some(Disqualification::HasAggregator)
        );
        assert_eq!(select_strategy(&dep, &config), ShuffleStrategy::General);
    }

    #[test]
    fn forced_general_wins_over_everything_else() {
        let config = ShuffleConfig::default()
            .with_setting(BALLISTA_SHUFFLE_FORCE_GENERAL, "true")
            .unwrap()
            .with_setting(BALLISTA_SHUFFLE_MAX_SERIALIZED_PARTITIONS, "1")
            .unwrap();
        let dep = dependency(10).with_aggregator(Arc::new(Concat));
        assert_eq!(
            disqualification(&dep, &config),
            Some(Disqualification::ForcedGeneral)
        );
    }

    #[test]
    fn first_matching_condition_is_reported() {
        let config = config_with_max(1);
        let dep = ShuffleDependency::new(
            1,
            Arc::new(HashPartitioner::new(4)),
            Arc::new(StatefulSerializer),
        )
        .with_aggregator(Arc::new(Concat));
        assert_eq!(
            disqualification(&dep, &config),
            Some(Disqualification::SerializerNotRelocatable)
        );

        let dep = dependency(4).with_aggregator(Arc::new(Concat));
        assert_eq!(
            disqualification(&dep, &config),
            Some(Disqualification::HasAggregator)
        );
    }

    #[test]
    fn strategy_display_names() {
        assert_eq!(ShuffleStrategy::SerializedSort.to_string(), "fast-serialized");
        assert_eq!(ShuffleStrategy::General.to_string(), "general");
    }
}
