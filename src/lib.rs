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

#![doc = include_str!("../README.md")]

/// The current version of the shuffle manager, derived from the Cargo package version.
pub const BALLISTA_SHUFFLE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration settings for the shuffle manager.
pub mod config;
/// Shuffle dependencies: partitioner, serializer and aggregator of a shuffle.
pub mod dependency;
/// Error types and result definitions for shuffle operations.
pub mod error;
/// Handles returned by shuffle registration.
pub mod handle;
/// The shuffle manager and its lifecycle.
pub mod manager;
/// Reading shuffle partitions back.
pub mod reader;
/// Registry of live shuffles and their producer counts.
pub mod registry;
/// Record serializers.
pub mod serializer;
/// Storage of shuffle map output.
pub mod storage;
/// Selection of the shuffle execution strategy.
pub mod strategy;
/// Shuffle writers for the serialized and general paths.
pub mod writer;

pub use config::ShuffleConfig;
pub use dependency::{Aggregator, HashPartitioner, Partitioner, Record, ShuffleDependency, ShuffleId};
pub use error::{Result, ShuffleError};
pub use handle::ShuffleHandle;
pub use manager::{ManagerState, ShuffleManager};
pub use reader::BlockStoreShuffleReader;
pub use serializer::{LengthPrefixedSerializer, Serializer};
pub use storage::{InMemoryStorage, LocalDiskStorage, ShuffleStorage};
pub use strategy::ShuffleStrategy;
pub use writer::{MapStatus, ShuffleWriter};
