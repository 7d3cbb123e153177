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

//! Shuffle error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    io, result,
};

use crate::dependency::ShuffleId;
use crate::manager::ManagerState;

/// Result type alias for shuffle operations.
pub type Result<T> = result::Result<T, ShuffleError>;

/// Errors raised by the shuffle manager and its collaborators.
#[derive(Debug)]
pub enum ShuffleError {
    /// A writer or reader was requested for a shuffle id that is not live:
    /// it was never registered or has already been torn down.
    UnknownShuffle(ShuffleId),
    /// An operation was requested while the manager was not running.
    NotRunning(ManagerState),
    /// A consumer asked for a partition range outside `[0, num_partitions]`
    /// or with `start > end`.
    InvalidPartitionRange {
        /// Shuffle the reader was requested for.
        shuffle_id: ShuffleId,
        /// First requested partition (inclusive).
        start: usize,
        /// Last requested partition (exclusive).
        end: usize,
        /// Number of output partitions of the shuffle.
        num_partitions: usize,
    },
    /// A producer or consumer referenced a map index the shuffle does not have.
    InvalidMapIndex {
        /// Shuffle the map index was used with.
        shuffle_id: ShuffleId,
        /// Offending map index.
        map_id: usize,
        /// Number of producers recorded for the shuffle.
        num_maps: usize,
    },
    /// Invalid configuration setting.
    Configuration(String),
    /// A serialized block could not be decoded.
    Serialization(String),
    /// I/O operation error.
    IoError(io::Error),
    /// General error with a descriptive message.
    General(String),
    /// Internal error indicating a bug or unexpected state.
    Internal(String),
}

impl ShuffleError {
    /// Returns true for errors that signal a bug in the caller's integration
    /// with the shuffle manager. These must never be retried.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            ShuffleError::UnknownShuffle(_)
                | ShuffleError::NotRunning(_)
                | ShuffleError::InvalidPartitionRange { .. }
                | ShuffleError::InvalidMapIndex { .. }
        )
    }
}

impl From<io::Error> for ShuffleError {
    fn from(e: io::Error) -> Self {
        ShuffleError::IoError(e)
    }
}

impl Display for ShuffleError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ShuffleError::UnknownShuffle(shuffle_id) => {
                write!(f, "Shuffle {shuffle_id} is not registered")
            }
            ShuffleError::NotRunning(state) => {
                write!(f, "Shuffle manager is not running (state: {state})")
            }
            ShuffleError::InvalidPartitionRange {
                shuffle_id,
                start,
                end,
                num_partitions,
            } => write!(
                f,
                "Invalid partition range [{start}, {end}) for shuffle {shuffle_id} \
                with {num_partitions} partitions"
            ),
            ShuffleError::InvalidMapIndex {
                shuffle_id,
                map_id,
                num_maps,
            } => write!(
                f,
                "Invalid map index {map_id} for shuffle {shuffle_id} with {num_maps} maps"
            ),
            ShuffleError::Configuration(desc) => {
                write!(f, "Configuration error: {desc}")
            }
            ShuffleError::Serialization(desc) => {
                write!(f, "Serialization error: {desc}")
            }
            ShuffleError::IoError(desc) => write!(f, "IO error: {desc}"),
            ShuffleError::General(desc) => write!(f, "General error: {desc}"),
            ShuffleError::Internal(desc) => {
                write!(f, "Internal shuffle error: {desc}")
            }
        }
    }
}

impl Error for ShuffleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ShuffleError::IoError(e) => Some(e),
            _ => None,
        }
    }
}
