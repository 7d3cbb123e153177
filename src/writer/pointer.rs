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

//! Packed addresses of serialized records.
//!
//! ```text
//! [24 bit partition id][40 bit byte offset]
//! ```
//!
//! Because the partition id occupies the high bits, sorting raw pointers
//! orders records by partition and, within a partition, by offset.

use crate::error::{Result, ShuffleError};

const PARTITION_ID_BITS: u32 = 24;
const OFFSET_BITS: u32 = 40;

/// Largest partition id that fits in a [`PackedRecordPointer`].
pub const MAXIMUM_PARTITION_ID: usize = (1 << PARTITION_ID_BITS) - 1;

/// Largest byte offset that fits in a [`PackedRecordPointer`].
pub const MAXIMUM_OFFSET: u64 = (1 << OFFSET_BITS) - 1;

/// Number of output partitions the serialized path can address.
pub const MAX_SERIALIZED_MODE_PARTITIONS: usize = MAXIMUM_PARTITION_ID + 1;

/// A serialized record's partition id and buffer offset packed in a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackedRecordPointer(u64);

impl PackedRecordPointer {
    pub fn try_new(partition_id: usize, offset: u64) -> Result<Self> {
        if partition_id > MAXIMUM_PARTITION_ID {
            return Err(ShuffleError::Internal(format!(
                "Partition id {partition_id} exceeds maximum {MAXIMUM_PARTITION_ID}"
            )));
        }
        if offset > MAXIMUM_OFFSET {
            return Err(ShuffleError::General(format!(
                "Record offset {offset} exceeds maximum {MAXIMUM_OFFSET}, \
                the serialized writer buffer is full"
            )));
        }
        Ok(Self(((partition_id as u64) << OFFSET_BITS) | offset))
    }

    pub fn partition_id(&self) -> usize {
        (self.0 >> OFFSET_BITS) as usize
    }

    pub fn offset(&self) -> u64 {
        self.0 & MAXIMUM_OFFSET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_extremes() -> Result<()> {
        let pointer = PackedRecordPointer::try_new(MAXIMUM_PARTITION_ID, MAXIMUM_OFFSET)?;
        assert_eq!(pointer.partition_id(), MAXIMUM_PARTITION_ID);
        assert_eq!(pointer.offset(), MAXIMUM_OFFSET);

        let pointer = PackedRecordPointer::try_new(0, 0)?;
        assert_eq!(pointer.partition_id(), 0);
        assert_eq!(pointer.offset(), 0);
        Ok(())
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(PackedRecordPointer::try_new(MAX_SERIALIZED_MODE_PARTITIONS, 0).is_err());
        assert!(PackedRecordPointer::try_new(0, MAXIMUM_OFFSET + 1).is_err());
    }

    #[test]
    fn sorts_by_partition_then_offset() -> Result<()> {
        let mut pointers = vec![
            PackedRecordPointer::try_new(2, 5)?,
            PackedRecordPointer::try_new(0, 900)?,
            PackedRecordPointer::try_new(2, 1)?,
            PackedRecordPointer::try_new(1, 0)?,
        ];
        pointers.sort_unstable();
        let order: Vec<_> = pointers
            .iter()
            .map(|p| (p.partition_id(), p.offset()))
            .collect();
        assert_eq!(order, vec![(0, 900), (1, 0), (2, 1), (2, 5)]);
        Ok(())
    }
}
